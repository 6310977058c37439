//! Event dispatcher: event name → ordered handler list.
//!
//! Handlers run synchronously on the caller's thread, in registration
//! order. A failing handler stops that dispatch and its error goes back
//! to the caller; the table itself is never affected.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{BoxError, EngineError, lock};
use crate::content::Arg;

/// A registered event handler.
pub type Handler = Arc<dyn Fn(&[Arg]) -> Result<(), BoxError> + Send + Sync>;

#[derive(Default)]
pub struct Dispatcher {
    handlers: Mutex<HashMap<String, Vec<Handler>>>,
}

impl Dispatcher {
    /// Append a handler for `event`. Never replaces or deduplicates.
    pub fn on<F>(&self, event: &str, handler: F)
    where
        F: Fn(&[Arg]) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        lock(&self.handlers)
            .entry(event.to_string())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Invoke every handler for `event` with `args`, in order.
    ///
    /// The handler list is snapshotted first, so handlers may register
    /// further handlers; those take effect from the next dispatch.
    pub fn dispatch(&self, event: &str, args: &[Arg]) -> Result<(), EngineError> {
        let snapshot: Vec<Handler> = lock(&self.handlers)
            .get(event)
            .cloned()
            .unwrap_or_default();

        for (index, handler) in snapshot.iter().enumerate() {
            handler(args).map_err(|source| EngineError::Handler {
                event: event.to_string(),
                index,
                source,
            })?;
        }
        Ok(())
    }

    /// Number of handlers registered for `event`.
    #[cfg(test)]
    pub fn handler_count(&self, event: &str) -> usize {
        lock(&self.handlers).get(event).map_or(0, Vec::len)
    }
}
