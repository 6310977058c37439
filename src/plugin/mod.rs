//! Content plugins: contract, records, loading and the pipeline.
//!
//! A plugin sees each clipboard change as a [`ClipContent`] and answers
//! with a [`PluginOutcome`]: no opinion, veto, or a replacement. Plugins
//! are mutually distrusting; the [`pipeline`] isolates each call so one
//! misbehaving plugin never stops the others.

pub mod builtin;
pub mod external;
pub mod loader;
pub mod pipeline;

use std::sync::Arc;

use crate::content::ClipContent;
use crate::engine::Engine;

pub use pipeline::{PluginPipeline, Processed};

/// What a plugin wants done with the current content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginOutcome {
    /// Leave the content as it is.
    NoOpinion,
    /// Drop the event; no later plugin runs.
    Skip,
    /// Replace the running content.
    Replace(ClipContent),
}

/// A loaded clipboard plugin.
///
/// `Send + Sync` because the pipeline runs on whichever task delivered
/// the event (poller or key-press loop).
pub trait Plugin: Send + Sync {
    /// Display name. Used for logging and enable/disable lookups.
    fn name(&self) -> &str;

    /// Transformation entry point.
    fn on_clipboard(&self, content: &ClipContent) -> Result<PluginOutcome, PluginError>;

    /// Optional startup hook, run once after loading if enabled.
    fn on_startup(&self, _engine: &Engine) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Runtime plugin failures. Each one turns into "no opinion" for the call
/// that produced it.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("{0}")]
    Failed(String),
    #[error("plugin panicked: {0}")]
    Panicked(String),
    #[error("malformed reply: {0}")]
    Malformed(String),
    #[error("no reply within {0:?}")]
    Timeout(std::time::Duration),
    #[error("plugin process is gone")]
    Disconnected,
    #[error("plugin protocol error: {0}")]
    Codec(#[from] crate::ipc::codec::CodecError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One loaded plugin and its enabled flag.
#[derive(Clone)]
pub struct PluginRecord {
    /// Display name (plugin-provided, falls back to `key`).
    pub name: String,
    /// Stable identity: the unit's file stem.
    pub key: String,
    pub plugin: Arc<dyn Plugin>,
    pub enabled: bool,
}

impl PluginRecord {
    pub fn new(key: impl Into<String>, plugin: Arc<dyn Plugin>) -> Self {
        let key = key.into();
        let name = match plugin.name() {
            "" => key.clone(),
            name => name.to_string(),
        };
        Self {
            name,
            key,
            plugin,
            enabled: true,
        }
    }

    /// Whether `id` names this record by display name or stable key.
    pub fn matches(&self, id: &str) -> bool {
        self.name == id || self.key == id
    }
}

impl std::fmt::Debug for PluginRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRecord")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("enabled", &self.enabled)
            .finish()
    }
}
