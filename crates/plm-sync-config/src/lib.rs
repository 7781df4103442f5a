//! External, read-only user configuration for plm-sync.
//!
//! The core treats these settings as external interfaces it consumes but
//! never edits: they are authored through configuration UI this crate does
//! not implement. What lives here is purely the load/save/merge plumbing,
//! in the same shape as a project's `.toml` config file.
//!
//! # Example
//!
//! ```
//! use plm_sync_config::{load_config, UserConfig};
//! use std::path::Path;
//!
//! let config = load_config(Path::new(".")).expect("load config");
//! assert_eq!(config.bom_levels.leaf_level, 2);
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use plm_sync_types::{PlmError, Result};
use serde::{Deserialize, Serialize};

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".plm-sync.toml";

pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

/// Complete external user configuration: position attribute, BOM level
/// mapping, item columns, category colors, favorites, and the assembly-type
/// system.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub position_attribute: Option<PositionAttributeConfig>,
    #[serde(default)]
    pub bom_levels: BomLevelsConfig,
    #[serde(default)]
    pub item_columns: ItemColumnsConfig,
    #[serde(default)]
    pub category_colors: CategoryColorsConfig,
    #[serde(default)]
    pub favorites: FavoritesConfig,
    #[serde(default)]
    pub type_system: TypeSystemConfig,
}

impl UserConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the configured hierarchy level for a category, falling back
    /// to `bom_levels.leaf_level`.
    pub fn level_for_category(&self, category: &str) -> u32 {
        self.bom_levels
            .levels
            .get(category)
            .copied()
            .unwrap_or(self.bom_levels.leaf_level)
    }

    /// Merge this config with `other`, `other` taking precedence field by
    /// field (non-default values win).
    pub fn merge(&self, other: &UserConfig) -> UserConfig {
        UserConfig {
            position_attribute: other.position_attribute.clone().or_else(|| self.position_attribute.clone()),
            bom_levels: BomLevelsConfig {
                levels: if other.bom_levels.levels.is_empty() {
                    self.bom_levels.levels.clone()
                } else {
                    other.bom_levels.levels.clone()
                },
                leaf_level: if other.bom_levels.leaf_level != default_leaf_level() {
                    other.bom_levels.leaf_level
                } else {
                    self.bom_levels.leaf_level
                },
            },
            item_columns: if other.item_columns.0.is_empty() {
                self.item_columns.clone()
            } else {
                other.item_columns.clone()
            },
            category_colors: if other.category_colors.0.is_empty() {
                self.category_colors.clone()
            } else {
                other.category_colors.clone()
            },
            favorites: FavoritesConfig {
                racks: if other.favorites.racks.is_empty() {
                    self.favorites.racks.clone()
                } else {
                    other.favorites.racks.clone()
                },
                items: if other.favorites.items.is_empty() {
                    self.favorites.items.clone()
                } else {
                    other.favorites.items.clone()
                },
            },
            type_system: if other.type_system == TypeSystemConfig::default() {
                self.type_system.clone()
            } else {
                other.type_system.clone()
            },
        }
    }
}

/// The position attribute used to record column placements on a row's BOM
/// lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionAttributeConfig {
    pub attribute_id: String,
    pub attribute_name: String,
}

/// Category name → hierarchy level map used by the consolidation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BomLevelsConfig {
    #[serde(default)]
    pub levels: BTreeMap<String, u32>,
    #[serde(default = "default_leaf_level")]
    pub leaf_level: u32,
}

fn default_leaf_level() -> u32 {
    2
}

impl Default for BomLevelsConfig {
    fn default() -> Self {
        Self { levels: BTreeMap::new(), leaf_level: default_leaf_level() }
    }
}

/// Ordered list of extra attribute columns shown on a rack configuration
/// sheet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemColumnsConfig(#[serde(default)] pub Vec<String>);

/// Category name → display color, used by the (out-of-scope) workbook UI;
/// the core passes this through read-only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryColorsConfig(#[serde(default)] pub BTreeMap<String, String>);

/// Favorited racks and items, surfaced by the (out-of-scope) UI shell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FavoritesConfig {
    #[serde(default)]
    pub racks: Vec<String>,
    #[serde(default)]
    pub items: Vec<String>,
}

/// Assembly-type vocabulary and default category, used at item-creation
/// time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeSystemConfig {
    #[serde(default)]
    pub assembly_types: Vec<String>,
    #[serde(default)]
    pub default_category: Option<String>,
}

/// Load configuration from a directory, defaulting if absent.
pub fn load_config(dir: &Path) -> Result<UserConfig> {
    load_config_from_file(&config_path(dir))
}

/// Load configuration from a specific file path, defaulting if absent.
pub fn load_config_from_file(path: &Path) -> Result<UserConfig> {
    if !path.exists() {
        return Ok(UserConfig::default());
    }
    let content = std::fs::read_to_string(path).map_err(|e| PlmError::Configuration(e.to_string()))?;
    toml::from_str(&content).map_err(|e| PlmError::Configuration(e.to_string()))
}

/// Save configuration to a directory's config file.
pub fn save_config(dir: &Path, config: &UserConfig) -> Result<()> {
    let path = config_path(dir);
    let content =
        toml::to_string_pretty(config).map_err(|e| PlmError::Configuration(e.to_string()))?;
    std::fs::write(&path, content).map_err(|e| PlmError::Configuration(e.to_string()))
}

/// Find a configuration file by walking up the directory tree.
pub fn find_config(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir;
    loop {
        let candidate = current.join(CONFIG_FILE);
        if candidate.exists() {
            return Some(candidate);
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_has_expected_leaf_level() {
        let config = UserConfig::new();
        assert_eq!(config.bom_levels.leaf_level, 2);
        assert!(config.position_attribute.is_none());
    }

    #[test]
    fn load_missing_config_returns_default() {
        let td = tempdir().expect("tempdir");
        let config = load_config(td.path()).expect("load");
        assert!(config.item_columns.0.is_empty());
    }

    #[test]
    fn save_and_load_config_round_trips() {
        let td = tempdir().expect("tempdir");
        let mut config = UserConfig::new();
        config.position_attribute = Some(PositionAttributeConfig {
            attribute_id: "attr-1".into(),
            attribute_name: "Position".into(),
        });
        config.bom_levels.levels.insert("Server".into(), 2);

        save_config(td.path(), &config).expect("save");

        let loaded = load_config(td.path()).expect("load");
        assert_eq!(loaded.position_attribute.unwrap().attribute_id, "attr-1");
        assert_eq!(loaded.level_for_category("Server"), 2);
    }

    #[test]
    fn level_for_category_falls_back_to_leaf_level() {
        let config = UserConfig::new();
        assert_eq!(config.level_for_category("Unconfigured"), 2);
    }

    #[test]
    fn load_config_from_toml_text() {
        let td = tempdir().expect("tempdir");
        let path = config_path(td.path());
        let content = r#"
[position_attribute]
attribute_id = "attr-9"
attribute_name = "Slot"

[bom_levels]
leaf_level = 3
[bom_levels.levels]
Server = 1
Cable = 2

item_columns = ["Notes", "Owner"]

[category_colors]
Server = "#FF0000"

[favorites]
racks = ["R1", "R2"]
items = []

[type_system]
assembly_types = ["kit", "assembly"]
default_category = "Electrical"
"#;
        std::fs::write(&path, content).expect("write");

        let config = load_config(td.path()).expect("load");
        assert_eq!(config.bom_levels.leaf_level, 3);
        assert_eq!(config.level_for_category("Server"), 1);
        assert_eq!(config.item_columns.0, vec!["Notes".to_string(), "Owner".to_string()]);
        assert_eq!(config.favorites.racks, vec!["R1".to_string(), "R2".to_string()]);
        assert_eq!(config.type_system.default_category.as_deref(), Some("Electrical"));
    }

    #[test]
    fn merge_prefers_other_when_set() {
        let mut base = UserConfig::new();
        base.favorites.racks = vec!["R1".to_string()];

        let mut override_config = UserConfig::new();
        override_config.favorites.racks = vec!["R2".to_string()];

        let merged = base.merge(&override_config);
        assert_eq!(merged.favorites.racks, vec!["R2".to_string()]);
    }

    #[test]
    fn merge_keeps_base_when_other_is_default() {
        let mut base = UserConfig::new();
        base.favorites.racks = vec!["R1".to_string()];

        let override_config = UserConfig::new();
        let merged = base.merge(&override_config);
        assert_eq!(merged.favorites.racks, vec!["R1".to_string()]);
    }

    #[test]
    fn find_config_walks_up_directory_tree() {
        let td = tempdir().expect("tempdir");
        let nested = td.path().join("a").join("b").join("c");
        std::fs::create_dir_all(&nested).expect("create dirs");

        let path = config_path(td.path());
        std::fs::write(&path, "item_columns = []").expect("write");

        let found = find_config(&nested);
        assert_eq!(found, Some(path));
    }

    #[test]
    fn find_config_returns_none_if_not_found() {
        let td = tempdir().expect("tempdir");
        let nested = td.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("create dirs");
        assert!(find_config(&nested).is_none());
    }

    #[test]
    fn config_path_helper() {
        let dir = PathBuf::from("/project");
        assert_eq!(config_path(&dir), PathBuf::from("/project/.plm-sync.toml"));
    }
}
