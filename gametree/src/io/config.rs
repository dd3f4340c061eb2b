//! Sampler configuration stored as TOML.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::decision::RetryPolicy;

/// Sampler configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SamplerConfig {
    /// Human-readable name of the sampling run.
    pub name: String,

    /// Maximum number of `BRANCHED` strict ancestors any node may have.
    pub max_depth: usize,

    /// Maximum number of children a branch point fans out to.
    pub max_degree: usize,

    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total decision-maker calls allowed per decision.
    pub max_attempts: u32,

    /// Base cooldown in milliseconds after a transient malfunction.
    pub cooldown_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            cooldown_ms: 1_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            cooldown: Duration::from_millis(self.cooldown_ms),
        }
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            name: "sampler".to_string(),
            max_depth: 2,
            max_degree: 2,
            retry: RetryConfig::default(),
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("name must be non-empty"));
        }
        if self.max_degree == 0 {
            return Err(anyhow!("max_degree must be > 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `SamplerConfig::default()`.
pub fn load_config(path: &Path) -> Result<SamplerConfig> {
    if !path.exists() {
        let cfg = SamplerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: SamplerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &SamplerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, SamplerConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let cfg = SamplerConfig {
            name: "council-run".to_string(),
            max_depth: 3,
            max_degree: 4,
            retry: RetryConfig {
                max_attempts: 5,
                cooldown_ms: 250,
            },
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn zero_degree_is_rejected() {
        let cfg = SamplerConfig {
            max_degree: 0,
            ..SamplerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn retry_config_converts_to_policy() {
        let retry = RetryConfig {
            max_attempts: 3,
            cooldown_ms: 500,
        };
        let policy = retry.policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.cooldown, Duration::from_millis(500));
    }
}
