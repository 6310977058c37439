//! Persisted settings: `settings.json`.
//!
//! The file is a JSON object. The `plugins` key holds a flat
//! `{identifier: enabled}` map; identifiers are plugin display names or
//! stable keys. Other top-level keys belong to other tools and are kept
//! as they are on save.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub plugins: BTreeMap<String, bool>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Settings {
    /// Load settings. A missing or unreadable file yields defaults.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no settings file");
                return Self::default();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read settings");
                return Self::default();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "ignoring invalid settings");
            Self::default()
        })
    }

    /// Write settings as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Persist one plugin's enabled flag under `id`.
    ///
    /// Entries under the plugin's other identifiers (`aliases`) are
    /// removed, so the file holds a single flag per plugin and the latest
    /// call wins regardless of which name it used.
    pub fn set_plugin_enabled(
        path: &Path,
        id: &str,
        aliases: &[&str],
        enabled: bool,
    ) -> Result<(), SettingsError> {
        let mut settings = Self::load(path);
        for alias in aliases {
            settings.plugins.remove(*alias);
        }
        settings.plugins.insert(id.to_string(), enabled);
        settings.save(path)
    }
}
