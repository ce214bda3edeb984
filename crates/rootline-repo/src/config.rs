//! Target-metadata configuration
//!
//! The ceremony playbook describes target files in a YAML document. Two
//! shapes are accepted: the richer `{add: {...}, delete: {...}}` form, and
//! a bare map of target paths to custom metadata which is treated as
//! all-adds. Custom metadata is carried opaquely into the targets map.

use rootline_core::error::{CeremonyError, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Parsed target-metadata configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetsConfig {
    /// Target paths to stage, with optional custom metadata
    #[serde(default)]
    pub add: BTreeMap<String, Option<Value>>,

    /// Target paths to drop from the role's targets map
    #[serde(default)]
    pub delete: BTreeMap<String, Option<Value>>,
}

impl TargetsConfig {
    /// Parse either accepted YAML shape.
    pub fn from_yaml(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_yaml::from_slice(bytes)
            .map_err(|e| CeremonyError::Config(format!("invalid YAML: {e}")))?;
        let map = match value {
            Value::Null => return Ok(Self::default()),
            Value::Object(map) => map,
            _ => {
                return Err(CeremonyError::Config(
                    "expected a mapping of target paths".to_string(),
                ))
            }
        };

        if map.keys().all(|k| k == "add" || k == "delete") {
            return serde_json::from_value(Value::Object(map))
                .map_err(|e| CeremonyError::Config(e.to_string()));
        }

        // Bare map form: every entry is an addition.
        let mut add = BTreeMap::new();
        for (path, custom) in map {
            let custom = match custom {
                Value::Null => None,
                other => Some(other),
            };
            add.insert(path, custom);
        }
        Ok(Self {
            add,
            delete: BTreeMap::new(),
        })
    }

    /// Read and parse a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_yaml(&std::fs::read(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_map_is_all_adds() {
        let yaml = b"
foo.txt:
  sigstore:
    usage: signing
    status: active
bar.txt:
";
        let cfg = TargetsConfig::from_yaml(yaml).unwrap();
        assert_eq!(cfg.add.len(), 2);
        assert!(cfg.delete.is_empty());
        let custom = cfg.add["foo.txt"].as_ref().unwrap();
        assert_eq!(custom["sigstore"]["usage"], "signing");
        assert!(cfg.add["bar.txt"].is_none());
    }

    #[test]
    fn test_add_delete_form() {
        let yaml = b"
add:
  new.txt:
    sigstore:
      usage: signing
      status: active
delete:
  old.txt:
";
        let cfg = TargetsConfig::from_yaml(yaml).unwrap();
        assert_eq!(cfg.add.len(), 1);
        assert_eq!(cfg.delete.len(), 1);
        assert!(cfg.delete.contains_key("old.txt"));
    }

    #[test]
    fn test_empty_document() {
        let cfg = TargetsConfig::from_yaml(b"").unwrap();
        assert!(cfg.add.is_empty() && cfg.delete.is_empty());
    }

    #[test]
    fn test_scalar_document_rejected() {
        assert!(TargetsConfig::from_yaml(b"42").is_err());
    }
}
