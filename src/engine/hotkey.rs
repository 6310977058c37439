//! Hotkey matcher: combo table and key-press → event name.
//!
//! The platform side (global key grabs, event taps) sits behind
//! [`KeyMonitor`]. The matcher only consumes decoded [`KeyPress`]
//! signals, so it works the same for a real X11 monitor and for tests.
//! Dispatching the matched event is the [`Engine`](super::Engine)'s job.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc::UnboundedReceiver;

use super::{EngineError, lock};
use crate::combo::{self, Combo};

/// A decoded platform key press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPress {
    /// Modifier bitmask in the [`combo`] `MOD_*` layout.
    pub modifiers: u16,
    /// Key name or character, any case.
    pub key: String,
}

/// Platform hook delivering key presses for watched combos.
///
/// Implementations keep whatever handles the platform needs alive for as
/// long as the monitor value lives; the matcher owns the monitor for the
/// rest of the process.
pub trait KeyMonitor: Send {
    /// Start watching `combo`. May be called before or after `start`.
    fn watch(&mut self, combo: &Combo) -> Result<(), HotkeyError>;

    /// Begin delivering key presses on the returned channel.
    fn start(&mut self) -> Result<UnboundedReceiver<KeyPress>, HotkeyError>;
}

/// Key monitor errors.
#[derive(Debug, thiserror::Error)]
pub enum HotkeyError {
    #[error("X11: {0}")]
    X11(String),
    #[error("cannot grab {combo}: {reason}")]
    Unsupported { combo: String, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Default)]
pub struct HotkeyMatcher {
    table: Mutex<HashMap<Combo, String>>,
    monitor: Mutex<Option<Box<dyn KeyMonitor>>>,
}

impl HotkeyMatcher {
    /// Bind `combo` to `event`. A second binding for the same combo
    /// silently replaces the first.
    pub fn register(&self, raw_combo: &str, event: &str) {
        let combo = combo::normalize(raw_combo);
        if let Some(previous) = lock(&self.table).insert(combo.clone(), event.to_string())
            && previous != event
        {
            tracing::debug!(combo = %combo, previous = %previous, event = %event, "hotkey rebound");
        }

        if let Some(monitor) = lock(&self.monitor).as_mut()
            && let Err(e) = monitor.watch(&combo)
        {
            tracing::warn!(combo = %combo, error = %e, "hotkey not watched");
        }
    }

    /// Event name bound to `combo`, if any.
    pub fn lookup(&self, combo: &Combo) -> Option<String> {
        lock(&self.table).get(combo).cloned()
    }

    /// Event bound to a decoded key press, if any. A miss is only
    /// logged at debug level.
    pub fn match_press(&self, modifiers: u16, key: &str) -> Option<String> {
        let combo = Combo::from_key_press(modifiers, key);
        let event = self.lookup(&combo);
        match &event {
            Some(event) => tracing::debug!(combo = %combo, event = %event, "hotkey matched"),
            None => tracing::debug!(combo = %combo, "key press not bound"),
        }
        event
    }

    /// Install the platform monitor.
    ///
    /// The first call watches every registered combo, starts the monitor
    /// and returns its key-press channel. Later calls are no-ops returning
    /// `None`; the first monitor stays installed.
    pub fn install(
        &self,
        mut monitor: Box<dyn KeyMonitor>,
    ) -> Result<Option<UnboundedReceiver<KeyPress>>, EngineError> {
        let mut slot = lock(&self.monitor);
        if slot.is_some() {
            tracing::debug!("key monitor already installed");
            return Ok(None);
        }

        let combos: Vec<Combo> = lock(&self.table).keys().cloned().collect();
        for combo in &combos {
            if let Err(e) = monitor.watch(combo) {
                tracing::warn!(combo = %combo, error = %e, "hotkey not watched");
            }
        }

        let rx = monitor.start()?;
        *slot = Some(monitor);
        tracing::info!(hotkeys = combos.len(), "key monitor installed");
        Ok(Some(rx))
    }

    #[cfg(test)]
    pub fn is_installed(&self) -> bool {
        lock(&self.monitor).is_some()
    }
}
