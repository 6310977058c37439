//! Plugin pipeline: strict left-to-right fold over enabled plugins.
//!
//! Each `process` call snapshots the enabled plugins, then threads the
//! running content through them in load order. Errors and panics are
//! logged and count as "no opinion"; a skip ends the walk.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use super::{Plugin, PluginError, PluginOutcome, PluginRecord};
use crate::content::ClipContent;
use crate::engine::{Engine, lock, panic_message};

/// Result of one pipeline pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Processed {
    /// Final content after every enabled plugin ran.
    Content(ClipContent),
    /// A plugin vetoed the event.
    Skipped { by: String },
}

#[derive(Default)]
pub struct PluginPipeline {
    records: Mutex<Vec<PluginRecord>>,
}

impl PluginPipeline {
    pub fn new(records: Vec<PluginRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    /// Feed `content` through every enabled plugin in order.
    pub fn process(&self, content: ClipContent) -> Processed {
        let enabled: Vec<(String, Arc<dyn Plugin>)> = lock(&self.records)
            .iter()
            .filter(|r| r.enabled)
            .map(|r| (r.name.clone(), Arc::clone(&r.plugin)))
            .collect();

        let mut current = content;
        for (name, plugin) in enabled {
            match invoke(&name, || plugin.on_clipboard(&current)) {
                Ok(PluginOutcome::NoOpinion) => {}
                Ok(PluginOutcome::Skip) => {
                    tracing::info!(plugin = %name, "plugin skipped the clipboard item");
                    return Processed::Skipped { by: name };
                }
                Ok(PluginOutcome::Replace(next)) => {
                    tracing::debug!(
                        plugin = %name,
                        from = %current.kind(),
                        to = %next.kind(),
                        "plugin replaced content"
                    );
                    current = next;
                }
                Err(e) => {
                    tracing::warn!(plugin = %name, error = %e, "plugin failed");
                }
            }
        }
        Processed::Content(current)
    }

    /// Enable or disable the first plugin whose display name or key is
    /// `id`. Returns whether a plugin matched.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        let mut records = lock(&self.records);
        match records.iter_mut().find(|r| r.matches(id)) {
            Some(record) => {
                record.enabled = enabled;
                tracing::info!(plugin = %record.name, enabled, "plugin toggled");
                true
            }
            None => false,
        }
    }

    /// Apply a persisted `{id: enabled}` map. Unknown ids are ignored.
    pub fn apply_enabled_map(&self, map: &BTreeMap<String, bool>) {
        for (id, &enabled) in map {
            if !self.set_enabled(id, enabled) {
                tracing::debug!(plugin = %id, "no loaded plugin for persisted setting");
            }
        }
    }

    /// Run every enabled plugin's startup hook in load order.
    ///
    /// Failures are logged and never stop the sequence. Returns the
    /// number of hooks that failed.
    pub fn run_startup_hooks(&self, engine: &Engine) -> usize {
        let enabled: Vec<(String, Arc<dyn Plugin>)> = lock(&self.records)
            .iter()
            .filter(|r| r.enabled)
            .map(|r| (r.name.clone(), Arc::clone(&r.plugin)))
            .collect();

        let mut failed = 0;
        for (name, plugin) in enabled {
            if let Err(e) = invoke(&name, || plugin.on_startup(engine)) {
                tracing::warn!(plugin = %name, error = %e, "startup hook failed");
                failed += 1;
            }
        }
        failed
    }

    /// `(display name, key, enabled)` for every loaded plugin, in order.
    pub fn list(&self) -> Vec<(String, String, bool)> {
        lock(&self.records)
            .iter()
            .map(|r| (r.name.clone(), r.key.clone(), r.enabled))
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.records).is_empty()
    }
}

/// Call into a plugin, turning a panic into [`PluginError::Panicked`].
fn invoke<T>(
    name: &str,
    call: impl FnOnce() -> Result<T, PluginError>,
) -> Result<T, PluginError> {
    catch_unwind(AssertUnwindSafe(call)).unwrap_or_else(|panic| {
        tracing::trace!(plugin = %name, "caught plugin panic");
        Err(PluginError::Panicked(panic_message(&*panic)))
    })
}
