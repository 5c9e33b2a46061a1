//! Configuration management
//!
//! Settings live in `<data_dir>/settings.json`:
//! ```json
//! {
//!   "profileId": "default",
//!   "assistantGuidance": "netflix=Subscriptions",
//!   "mappingPresets": {
//!     "chase": [{ "column": "Posting Date", "field": "transaction_date" }]
//!   }
//! }
//! ```
//! Keys this crate does not manage are preserved on save.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::result::{Error, Result};
use crate::domain::ColumnMapping;

/// Environment variable overriding the data directory
pub const DIR_ENV: &str = "LEDGERLIFT_DIR";

/// Environment variable overriding the active profile
pub const PROFILE_ENV: &str = "LEDGERLIFT_PROFILE";

pub const DEFAULT_PROFILE: &str = "default";

const SETTINGS_FILE: &str = "settings.json";

/// Raw settings.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    profile_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    assistant_guidance: Option<String>,
    #[serde(default)]
    mapping_presets: BTreeMap<String, Vec<ColumnMapping>>,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

/// Ledgerlift configuration (resolved view of settings and environment)
#[derive(Debug, Clone)]
pub struct Config {
    pub profile_id: String,
    /// Default free-text guidance for assisted mapping and classification
    pub assistant_guidance: Option<String>,
    pub mapping_presets: BTreeMap<String, Vec<ColumnMapping>>,
    // Keep the raw settings for preservation when saving
    raw: SettingsFile,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile_id: DEFAULT_PROFILE.to_string(),
            assistant_guidance: None,
            mapping_presets: BTreeMap::new(),
            raw: SettingsFile::default(),
        }
    }
}

/// Data directory: `LEDGERLIFT_DIR`, else `~/.ledgerlift`
pub fn data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(DIR_ENV) {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    dirs::home_dir()
        .map(|home| home.join(".ledgerlift"))
        .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))
}

impl Config {
    /// Load settings from the data directory
    ///
    /// A missing file yields defaults; `LEDGERLIFT_PROFILE` overrides the
    /// stored profile.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let settings_path = data_dir.join(SETTINGS_FILE);

        let raw: SettingsFile = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)?;
            serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %settings_path.display(), error = %e, "ignoring unreadable settings");
                SettingsFile::default()
            })
        } else {
            SettingsFile::default()
        };

        let profile_id = std::env::var(PROFILE_ENV)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .or_else(|| raw.profile_id.clone())
            .unwrap_or_else(|| DEFAULT_PROFILE.to_string());

        Ok(Self {
            profile_id,
            assistant_guidance: raw.assistant_guidance.clone(),
            mapping_presets: raw.mapping_presets.clone(),
            raw,
        })
    }

    /// Save settings, preserving keys this crate does not manage
    ///
    /// The profile is only written if it was already stored, so an
    /// environment override never becomes permanent.
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(data_dir)?;
        let settings_path = data_dir.join(SETTINGS_FILE);

        let mut settings = self.raw.clone();
        settings.assistant_guidance = self.assistant_guidance.clone();
        settings.mapping_presets = self.mapping_presets.clone();

        let content = serde_json::to_string_pretty(&settings)?;
        std::fs::write(&settings_path, content)?;
        Ok(())
    }

    /// Store a named mapping, replacing any previous one
    pub fn save_preset(&mut self, name: &str, mapping: Vec<ColumnMapping>) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::validation("Preset name cannot be empty"));
        }
        self.mapping_presets.insert(name.to_string(), mapping);
        Ok(())
    }

    /// Delete a named mapping. Returns true if it existed.
    pub fn remove_preset(&mut self, name: &str) -> bool {
        self.mapping_presets.remove(name.trim()).is_some()
    }

    pub fn get_preset(&self, name: &str) -> Option<&[ColumnMapping]> {
        self.mapping_presets.get(name.trim()).map(Vec::as_slice)
    }

    /// Preset names in alphabetical order
    pub fn list_presets(&self) -> Vec<&str> {
        self.mapping_presets.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CanonicalField;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert!(config.mapping_presets.is_empty());
        assert!(config.assistant_guidance.is_none());
    }

    #[test]
    fn test_presets_round_trip_and_unknown_keys_survive() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{ "theme": "dark", "assistantGuidance": "be brief" }"#,
        )
        .unwrap();

        let mut config = Config::load(dir.path()).unwrap();
        assert_eq!(config.assistant_guidance.as_deref(), Some("be brief"));
        config
            .save_preset(
                "chase",
                vec![
                    ColumnMapping::new("Posting Date", CanonicalField::TransactionDate),
                    ColumnMapping::ignore("Balance"),
                ],
            )
            .unwrap();
        config.save(dir.path()).unwrap();

        let reloaded = Config::load(dir.path()).unwrap();
        assert_eq!(reloaded.list_presets(), vec!["chase"]);
        assert_eq!(reloaded.get_preset("chase").unwrap()[1].field, CanonicalField::Ignore);

        let raw = std::fs::read_to_string(dir.path().join(SETTINGS_FILE)).unwrap();
        assert!(raw.contains("\"theme\": \"dark\""));

        let mut reloaded = reloaded;
        assert!(reloaded.remove_preset(" chase "));
        assert!(!reloaded.remove_preset("chase"));
        assert!(reloaded.list_presets().is_empty());
    }

    #[test]
    fn test_blank_preset_name_is_rejected() {
        let mut config = Config::default();
        assert!(matches!(config.save_preset("  ", vec![]), Err(Error::Validation(_))));
    }
}
