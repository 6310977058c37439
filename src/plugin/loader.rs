//! Plugin directory scan.
//!
//! One candidate unit per regular file, visited in file-name order so the
//! pipeline order is stable. Files starting with `_` or `.` are private
//! and skipped. A unit that fails to load is recorded as a warning and the
//! scan goes on.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::external::ExternalPlugin;
use super::{Plugin, PluginError, PluginRecord, builtin};
use crate::ipc::protocol::ENTRY_ON_CLIPBOARD;

/// Marker extension for compiled-in plugins.
pub const BUILTIN_EXTENSION: &str = "builtin";

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("no built-in plugin {stem:?} (known: {})", builtin::KNOWN.join(", "))]
    UnknownBuiltin { stem: String },
    #[error("not a plugin unit: expected a .{BUILTIN_EXTENSION} marker or an executable")]
    NotAUnit,
    #[error("missing entry point {0:?}")]
    MissingEntryPoint(&'static str),
    #[error("handshake failed: {0}")]
    Handshake(#[from] PluginError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Turns one candidate file into a plugin.
pub trait UnitLoader {
    fn load(&self, path: &Path, key: &str) -> Result<Arc<dyn Plugin>, LoadError>;
}

/// `*.builtin` markers resolve to compiled-in plugins; executables are
/// spawned as subprocess units.
#[derive(Debug, Clone)]
pub struct DefaultUnitLoader {
    pub timeout: Duration,
}

impl DefaultUnitLoader {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl UnitLoader for DefaultUnitLoader {
    fn load(&self, path: &Path, key: &str) -> Result<Arc<dyn Plugin>, LoadError> {
        if path.extension().is_some_and(|ext| ext == BUILTIN_EXTENSION) {
            return builtin::lookup(key).ok_or_else(|| LoadError::UnknownBuiltin {
                stem: key.to_string(),
            });
        }

        let mode = std::fs::metadata(path)?.permissions().mode();
        if mode & 0o111 == 0 {
            return Err(LoadError::NotAUnit);
        }

        let plugin = ExternalPlugin::spawn(path, self.timeout)?;
        if !plugin.supports(ENTRY_ON_CLIPBOARD) {
            return Err(LoadError::MissingEntryPoint(ENTRY_ON_CLIPBOARD));
        }
        Ok(Arc::new(plugin))
    }
}

/// Result of a directory scan.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Loaded plugins, in load order, all enabled.
    pub records: Vec<PluginRecord>,
    /// One line per skipped unit: `"<file>: <reason>"`.
    pub warnings: Vec<String>,
}

/// Scan `dir` and load every candidate unit with `loader`.
///
/// A missing directory yields an empty report.
pub fn load_all(dir: &Path, loader: &dyn UnitLoader) -> LoadReport {
    let mut report = LoadReport::default();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(dir = %dir.display(), "plugin directory not found");
            return report;
        }
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "cannot read plugin directory");
            report.warnings.push(format!("{}: {e}", dir.display()));
            return report;
        }
    };

    let mut candidates: Vec<(String, PathBuf)> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            (!name.starts_with('_') && !name.starts_with('.')).then(|| (name, entry.path()))
        })
        .collect();
    candidates.sort_by(|a, b| a.0.cmp(&b.0));

    for (file_name, path) in candidates {
        let key = unit_key(&path, &file_name);
        match loader.load(&path, &key) {
            Ok(plugin) => {
                let record = PluginRecord::new(key, plugin);
                info!(plugin = %record.name, key = %record.key, "plugin loaded");
                report.records.push(record);
            }
            Err(e) => {
                warn!(unit = %file_name, error = %e, "plugin unit skipped");
                report.warnings.push(format!("{file_name}: {e}"));
            }
        }
    }

    report
}

/// Stable key: the file stem, or the whole name when there is none.
fn unit_key(path: &Path, file_name: &str) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string())
}
