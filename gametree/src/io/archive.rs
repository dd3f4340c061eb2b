//! Archive export of a sampler run, with schema-validated reload.
//!
//! The archive flattens the node tree into rows so a finished run can be
//! inspected or reconstructed without the snapshot store. The schema is
//! compiled in; reload refuses anything that does not validate against it.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::types::{BranchStatus, DecisionRecord, PlayStatus};

const ARCHIVE_SCHEMA: &str = include_str!("../../schemas/archive.schema.json");

/// One node of the exploration tree, flattened for the archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRow {
    pub id: String,
    pub parent_id: Option<String>,
    pub branch_status: BranchStatus,
    pub game_status: PlayStatus,
    pub level: usize,
    pub result: BTreeMap<String, f64>,
    pub observable_state: Value,
    pub detail: Vec<DecisionRecord>,
}

/// Run-level metadata stored beside the rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplerMeta {
    pub name: String,
    pub sample_id: String,
    pub max_depth: usize,
    pub max_degree: usize,
}

/// The complete persisted form of one sampler run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Archive {
    pub meta: SamplerMeta,
    pub nodes: Vec<ArchiveRow>,
}

/// Write the archive with canonicalized row order (level, then id).
pub fn write_archive(path: &Path, archive: &Archive) -> Result<()> {
    let mut cloned = archive.clone();
    cloned.nodes.sort_by(|a, b| (a.level, &a.id).cmp(&(b.level, &b.id)));
    let mut buf = serde_json::to_string_pretty(&cloned)?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("archive path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp archive {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace archive {}", path.display()))?;
    Ok(())
}

/// Load and schema-validate an archive from disk.
pub fn load_archive(path: &Path) -> Result<Archive> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read archive {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse archive {}", path.display()))?;
    validate_schema(&value)?;
    let archive: Archive = serde_json::from_value(value)
        .with_context(|| format!("deserialize archive {}", path.display()))?;
    Ok(archive)
}

fn validate_schema(archive: &Value) -> Result<()> {
    let schema_value: Value =
        serde_json::from_str(ARCHIVE_SCHEMA).context("parse built-in archive schema")?;
    let compiled =
        validator_for(&schema_value).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(archive) {
        let messages = compiled
            .iter_errors(archive)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "archive schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_archive() -> Archive {
        Archive {
            meta: SamplerMeta {
                name: "council-run".to_string(),
                sample_id: "abc123".to_string(),
                max_depth: 2,
                max_degree: 2,
            },
            nodes: vec![
                ArchiveRow {
                    id: "root".to_string(),
                    parent_id: None,
                    branch_status: BranchStatus::Branched,
                    game_status: PlayStatus::Played,
                    level: 0,
                    result: BTreeMap::from([("yes".to_string(), 2.0)]),
                    observable_state: serde_json::json!({"motion": "adjourn?"}),
                    detail: Vec::new(),
                },
                ArchiveRow {
                    id: "leaf".to_string(),
                    parent_id: Some("root".to_string()),
                    branch_status: BranchStatus::Unbranchable,
                    game_status: PlayStatus::Finished,
                    level: 1,
                    result: BTreeMap::from([("yes".to_string(), 2.0)]),
                    observable_state: Value::Null,
                    detail: vec![DecisionRecord {
                        step: "council -> tally".to_string(),
                        player: None,
                        prompt: "[user] count the votes\n".to_string(),
                        reasoning: String::new(),
                        output: "2 yes".to_string(),
                    }],
                },
            ],
        }
    }

    /// Verifies write then load round-trips through schema validation.
    #[test]
    fn write_and_load_round_trip() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("archive.json");

        let archive = sample_archive();
        write_archive(&path, &archive).expect("write");
        let loaded = load_archive(&path).expect("load");

        assert_eq!(loaded, archive);
    }

    /// Verifies reload rejects rows with an unknown status value.
    #[test]
    fn load_rejects_unknown_statuses() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("archive.json");

        write_archive(&path, &sample_archive()).expect("write");
        let mut value: Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("parse");
        value["nodes"][0]["branch_status"] = Value::String("SPROUTED".to_string());
        fs::write(&path, serde_json::to_string(&value).expect("serialize")).expect("rewrite");

        let err = load_archive(&path).expect_err("should fail validation");
        assert!(err.to_string().contains("schema validation failed"));
    }
}
