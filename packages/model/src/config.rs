use crate::errors::ModelResult;
use docsync_markup::EditMode;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_CONFIG_NAME: &str = "docsync.config.json";

/// Document model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    /// Attributes that identify an element across reparses, in priority order
    #[serde(default = "default_identifying_attributes")]
    pub identifying_attributes: Vec<String>,

    /// Consult per-component prefix maps before walking the parent chain
    #[serde(default = "default_true")]
    pub optimized_prefix_lookup: bool,

    /// Prefix allocated for namespaces that have none in scope
    #[serde(default = "default_prefix")]
    pub default_prefix: String,

    #[serde(default = "default_max_prefix_attempts")]
    pub max_prefix_attempts: usize,

    #[serde(default)]
    pub edit_mode: EditMode,

    /// Maximum number of undo levels (0 = unlimited)
    #[serde(default = "default_undo_levels")]
    pub undo_levels: usize,

    #[serde(default)]
    pub read_only: bool,

    /// Node versions the markup arena may accumulate beyond twice its size
    /// after the last compaction before it is compacted again
    #[serde(default = "default_compaction_slack")]
    pub compaction_slack: usize,
}

fn default_identifying_attributes() -> Vec<String> {
    vec!["name".to_string(), "id".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_prefix() -> String {
    "ns".to_string()
}

fn default_max_prefix_attempts() -> usize {
    100
}

fn default_undo_levels() -> usize {
    100
}

fn default_compaction_slack() -> usize {
    1024
}

impl ModelConfig {
    /// Load config from a JSON file
    pub fn load(path: impl AsRef<Path>) -> ModelResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Load `docsync.config.json` from a directory, or the default config if absent
    pub fn load_from_dir(dir: impl AsRef<Path>) -> ModelResult<Self> {
        let path = dir.as_ref().join(DEFAULT_CONFIG_NAME);
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_json(json: &str) -> ModelResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn with_edit_mode(mut self, mode: EditMode) -> Self {
        self.edit_mode = mode;
        self
    }

    pub fn with_compaction_slack(mut self, slack: usize) -> Self {
        self.compaction_slack = slack;
        self
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            identifying_attributes: default_identifying_attributes(),
            optimized_prefix_lookup: default_true(),
            default_prefix: default_prefix(),
            max_prefix_attempts: default_max_prefix_attempts(),
            edit_mode: EditMode::default(),
            undo_levels: default_undo_levels(),
            read_only: false,
            compaction_slack: default_compaction_slack(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let json = r#"{
            "identifyingAttributes": ["id"],
            "optimizedPrefixLookup": false,
            "editMode": "inPlace",
            "undoLevels": 5
        }"#;

        let config = ModelConfig::from_json(json).unwrap();
        assert_eq!(config.identifying_attributes, vec!["id"]);
        assert!(!config.optimized_prefix_lookup);
        assert_eq!(config.edit_mode, EditMode::InPlace);
        assert_eq!(config.undo_levels, 5);
        assert_eq!(config.default_prefix, "ns");
        assert_eq!(config.max_prefix_attempts, 100);
        assert!(!config.read_only);
        assert_eq!(config.compaction_slack, 1024);
    }

    #[test]
    fn test_default_config() {
        let config = ModelConfig::default();
        assert_eq!(config.identifying_attributes, vec!["name", "id"]);
        assert!(config.optimized_prefix_lookup);
        assert_eq!(config.edit_mode, EditMode::CopyOnWrite);
        assert_eq!(ModelConfig::from_json("{}").unwrap(), config);
    }

    #[test]
    fn test_load_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(ModelConfig::load_from_dir(dir.path()).unwrap(), ModelConfig::default());

        std::fs::write(dir.path().join(DEFAULT_CONFIG_NAME), r#"{"readOnly": true}"#).unwrap();
        assert!(ModelConfig::load_from_dir(dir.path()).unwrap().read_only);

        std::fs::write(dir.path().join(DEFAULT_CONFIG_NAME), "not json").unwrap();
        assert!(ModelConfig::load_from_dir(dir.path()).is_err());
    }
}
