//! Decision-maker abstraction and retry policy.
//!
//! The [`DecisionMaker`] trait decouples step execution from the actual
//! completion backend (a language-model service in production). Tests use
//! scripted makers that return predetermined completions without any network
//! traffic.
//!
//! Failure handling follows a strict taxonomy: transient service malfunctions
//! are retried with exponential backoff up to a bounded attempt count; output
//! that parses wrong or picks a choice outside the offered set is durably
//! recorded through a [`DiscardSink`] and retried with a fresh call, without
//! backoff. Everything else is fatal for the current trajectory.

use std::fmt::Write as _;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::core::types::EngineError;

/// Role tag of one transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// One entry of the ordered transcript sent to the decision maker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Output of one decision-maker call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    /// Reasoning trace, if the backend exposes one.
    pub reasoning: String,
    /// Final content string.
    pub content: String,
    /// Raw combined text as returned by the backend.
    pub raw: String,
}

/// Decision-maker failure taxonomy.
#[derive(Debug, Clone, Error)]
pub enum DecisionError {
    /// Transient service-level failure. Retried with backoff.
    #[error("decision service malfunction: {0}")]
    Malfunction(String),
    /// Output did not parse into the expected shape.
    #[error("malformed decision output: {0}")]
    Malformed(String),
    /// Output selected a choice outside the offered option set.
    #[error("choice {choice:?} is not among the offered options {offered:?}")]
    BadChoice {
        choice: String,
        offered: Vec<String>,
    },
    /// The bounded attempt budget ran out.
    #[error("decision service gave no usable output after {attempts} attempts")]
    TooManyRetries { attempts: u32 },
}

/// Abstraction over completion backends.
///
/// `Sync` because one concurrent step drives a worker thread per active
/// participant against the same maker.
pub trait DecisionMaker: Sync {
    fn complete(&self, messages: &[Message]) -> Result<Completion, DecisionError>;
}

/// One rejected completion, durably recorded for offline inspection.
#[derive(Debug, Serialize)]
pub struct DiscardedAttempt<'a> {
    pub messages: &'a [Message],
    pub output: Option<&'a str>,
    pub error: String,
}

/// Sink for rejected completions. Must not lose records: every discarded
/// attempt is part of the corpus even though no node keeps it.
pub trait DiscardSink: Sync {
    fn record(&self, attempt: &DiscardedAttempt<'_>) -> std::io::Result<()>;
}

/// Sink that drops discards. Only appropriate for throwaway standalone runs.
pub struct NoDiscard;

impl DiscardSink for NoDiscard {
    fn record(&self, _attempt: &DiscardedAttempt<'_>) -> std::io::Result<()> {
        Ok(())
    }
}

/// Bounded retry budget shared by both failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total calls allowed per decision, counting rejected outputs.
    pub max_attempts: u32,
    /// Base cooldown before re-calling after a malfunction; doubles per
    /// consecutive attempt, capped at [`RetryPolicy::MAX_COOLDOWN`].
    pub cooldown: Duration,
}

impl RetryPolicy {
    pub const MAX_COOLDOWN: Duration = Duration::from_secs(30);

    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.cooldown
            .saturating_mul(factor)
            .min(Self::MAX_COOLDOWN)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            cooldown: Duration::from_secs(1),
        }
    }
}

/// Everything a step needs to obtain one decision: the backend, the retry
/// budget, and the sink for rejected attempts.
pub struct DecisionSession<'a> {
    pub decider: &'a dyn DecisionMaker,
    pub policy: RetryPolicy,
    pub discards: &'a dyn DiscardSink,
}

impl<'a> DecisionSession<'a> {
    pub fn new(decider: &'a dyn DecisionMaker, discards: &'a dyn DiscardSink) -> Self {
        Self {
            decider,
            policy: RetryPolicy::default(),
            discards,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Obtain one decision: call the maker, validate through `parse`, retry
    /// per the taxonomy until the attempt budget runs out.
    pub fn decide<T>(
        &self,
        messages: &[Message],
        parse: impl Fn(&Completion) -> Result<T, DecisionError>,
    ) -> Result<(Completion, T), EngineError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let completion = match self.decider.complete(messages) {
                Ok(completion) => completion,
                Err(err @ DecisionError::Malfunction(_)) => {
                    if attempts >= self.policy.max_attempts {
                        return Err(DecisionError::TooManyRetries { attempts }.into());
                    }
                    let cooldown = self.policy.backoff(attempts);
                    warn!(attempt = attempts, error = %err, cooldown_ms = cooldown.as_millis() as u64, "decision maker malfunction, backing off");
                    thread::sleep(cooldown);
                    continue;
                }
                Err(err) => {
                    self.discards.record(&DiscardedAttempt {
                        messages,
                        output: None,
                        error: err.to_string(),
                    })?;
                    if attempts >= self.policy.max_attempts {
                        return Err(DecisionError::TooManyRetries { attempts }.into());
                    }
                    warn!(attempt = attempts, error = %err, "unusable completion, asking again");
                    continue;
                }
            };
            match parse(&completion) {
                Ok(value) => return Ok((completion, value)),
                Err(err) => {
                    self.discards.record(&DiscardedAttempt {
                        messages,
                        output: Some(&completion.raw),
                        error: err.to_string(),
                    })?;
                    if attempts >= self.policy.max_attempts {
                        return Err(DecisionError::TooManyRetries { attempts }.into());
                    }
                    warn!(attempt = attempts, error = %err, "rejected completion, asking again");
                }
            }
        }
    }
}

/// Render a transcript for telemetry, one role-tagged line per message.
pub fn render_transcript(messages: &[Message]) -> String {
    let mut buf = String::new();
    for message in messages {
        let tag = match message.role {
            Role::System => "system",
            Role::User => "user",
        };
        let _ = writeln!(buf, "[{tag}] {}", message.content);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CollectingDiscardSink, FlakyDecisionMaker, ScriptedDecisionMaker};

    fn zero_cooldown(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            cooldown: Duration::ZERO,
        }
    }

    /// Verifies transient malfunctions are retried and eventually succeed.
    #[test]
    fn decide_retries_through_malfunctions() {
        let maker = FlakyDecisionMaker::new(2, ScriptedDecisionMaker::constant("ok"));
        let sink = CollectingDiscardSink::default();
        let session =
            DecisionSession::new(&maker, &sink).with_policy(zero_cooldown(5));

        let (completion, value) = session
            .decide(&[Message::user("go")], |c| Ok(c.content.clone()))
            .expect("decide");
        assert_eq!(value, "ok");
        assert_eq!(completion.content, "ok");
        // Malfunctions are not discards.
        assert!(sink.entries().is_empty());
    }

    /// Verifies the attempt budget turns persistent malfunctions fatal.
    #[test]
    fn decide_gives_up_after_the_attempt_budget() {
        let maker = FlakyDecisionMaker::new(10, ScriptedDecisionMaker::constant("ok"));
        let sink = CollectingDiscardSink::default();
        let session =
            DecisionSession::new(&maker, &sink).with_policy(zero_cooldown(3));

        let err = session
            .decide(&[Message::user("go")], |c| Ok(c.content.clone()))
            .expect_err("should give up");
        assert!(err.to_string().contains("after 3 attempts"));
    }

    /// Verifies rejected outputs are recorded and retried without backoff.
    #[test]
    fn decide_records_rejected_outputs_and_retries() {
        let maker = ScriptedDecisionMaker::constant("maybe");
        let sink = CollectingDiscardSink::default();
        let session =
            DecisionSession::new(&maker, &sink).with_policy(zero_cooldown(4));

        let calls = std::sync::atomic::AtomicU32::new(0);
        let (_, value) = session
            .decide(&[Message::user("vote")], |c| {
                let n = calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if n < 2 {
                    Err(DecisionError::BadChoice {
                        choice: c.content.clone(),
                        offered: vec!["yes".to_string(), "no".to_string()],
                    })
                } else {
                    Ok("yes".to_string())
                }
            })
            .expect("decide");
        assert_eq!(value, "yes");
        assert_eq!(sink.entries().len(), 2);
        assert!(sink.entries()[0].contains("not among the offered options"));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            cooldown: Duration::from_millis(100),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(30), RetryPolicy::MAX_COOLDOWN);
    }

    #[test]
    fn transcript_rendering_tags_roles() {
        let rendered = render_transcript(&[
            Message::system("rules"),
            Message::user("your move"),
        ]);
        assert_eq!(rendered, "[system] rules\n[user] your move\n");
    }
}
