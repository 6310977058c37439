//! Event engine: dispatcher, condition poller and hotkey matcher.
//!
//! [`Engine`] owns every registration table. It is built once at startup,
//! shared as `Arc<Engine>` with the poller task, the key-press loop and
//! plugin startup hooks, and mutated only through its methods.

pub mod dispatcher;
pub mod hotkey;
pub mod poller;

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use crate::content::{Arg, EventArgs};
use dispatcher::Dispatcher;
use hotkey::HotkeyMatcher;
pub use hotkey::{HotkeyError, KeyMonitor, KeyPress};
use poller::Poller;

/// Error type returned by handler and condition callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Engine errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("handler #{index} for event {event:?} failed: {source}")]
    Handler {
        event: String,
        index: usize,
        source: BoxError,
    },
    #[error("key monitor: {0}")]
    Hotkey(#[from] HotkeyError),
}

#[derive(Default)]
pub struct Engine {
    dispatcher: Dispatcher,
    poller: Poller,
    hotkeys: HotkeyMatcher,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `event`. See [`Dispatcher::on`].
    pub fn on<F>(&self, event: &str, handler: F)
    where
        F: Fn(&[Arg]) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.dispatcher.on(event, handler);
    }

    /// Synchronously run all handlers for `event`. See [`Dispatcher::dispatch`].
    pub fn dispatch(&self, event: &str, args: &[Arg]) -> Result<(), EngineError> {
        self.dispatcher.dispatch(event, args)
    }

    /// Register a change condition for `event`. See [`Poller::add_condition`].
    pub fn add_condition<F>(&self, event: &str, condition: F)
    where
        F: Fn() -> Result<Option<EventArgs>, BoxError> + Send + Sync + 'static,
    {
        self.poller.add_condition(event, condition);
    }

    /// One poller pass. Returns the number of events fired.
    pub fn tick(&self) -> usize {
        self.poller.tick(&self.dispatcher)
    }

    /// Poll every `interval` until `cancel` fires.
    ///
    /// Each pass runs on the blocking pool: conditions and handlers shell
    /// out to the clipboard and wait on plugin units. Cancellation is
    /// checked before each pass and interrupts the inter-tick sleep; a
    /// pass already in progress runs to completion.
    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        tracing::debug!(interval_ms = interval.as_millis() as u64, "poller started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let engine = Arc::clone(&self);
            if let Err(e) = tokio::task::spawn_blocking(move || engine.tick()).await {
                tracing::error!(error = %e, "poller pass aborted");
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        tracing::debug!("poller stopped");
    }

    /// Bind a key combination string to `event`.
    pub fn register_hotkey(&self, combo: &str, event: &str) {
        self.hotkeys.register(combo, event);
    }

    /// Match a decoded key press and dispatch its event with no
    /// arguments. Returns the event name, or `None` on a miss.
    pub fn handle_key_press(&self, modifiers: u16, key: &str) -> Result<Option<String>, EngineError> {
        let Some(event) = self.hotkeys.match_press(modifiers, key) else {
            return Ok(None);
        };
        self.dispatch(&event, &[])?;
        Ok(Some(event))
    }

    /// Install the platform key monitor (first call only).
    pub fn install_key_monitor(
        &self,
        monitor: Box<dyn KeyMonitor>,
    ) -> Result<Option<UnboundedReceiver<KeyPress>>, EngineError> {
        self.hotkeys.install(monitor)
    }
}

/// Lock a registration table, recovering from a poisoned mutex.
///
/// Tables are only ever appended to or overwritten whole-entry, so the
/// data behind a poisoned lock is still consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combo::{MOD_CMD, MOD_SHIFT};

    #[test]
    fn condition_to_handler_through_engine() {
        let engine = Engine::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        engine.on("clipboard_changed", move |args: &[Arg]| {
            sink.lock().unwrap().push(args.to_vec());
            Ok(())
        });
        engine.add_condition("clipboard_changed", || {
            Ok(Some(vec![Arg::from("text"), Arg::from("a")]))
        });

        assert_eq!(engine.tick(), 1);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![vec![Arg::from("text"), Arg::from("a")]]
        );
    }

    #[test]
    fn hotkey_through_engine() {
        let engine = Engine::new();
        let count = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&count);
        engine.on("open", move |_: &[Arg]| {
            *sink.lock().unwrap() += 1;
            Ok(())
        });
        engine.register_hotkey("shift+cmd+v", "open");

        engine.handle_key_press(MOD_SHIFT | MOD_CMD, "v").unwrap();
        engine.handle_key_press(MOD_SHIFT | MOD_CMD, "w").unwrap();
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn lock_recovers_from_poison() {
        let table = Arc::new(Mutex::new(vec![1]));
        let inner = Arc::clone(&table);
        let _ = std::thread::spawn(move || {
            let _guard = inner.lock().unwrap();
            panic!("poison");
        })
        .join();

        assert!(table.is_poisoned());
        lock(&table).push(2);
        assert_eq!(*lock(&table), vec![1, 2]);
    }

    #[test]
    fn panic_message_variants() {
        let s: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(&*s), "static");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*owned), "owned");
        let other: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(&*other), "non-string panic payload");
    }

    fn ticking_engine() -> (Arc<Engine>, Arc<Mutex<usize>>) {
        let engine = Arc::new(Engine::new());
        let seen = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&seen);
        engine.on("e", move |_: &[Arg]| {
            *sink.lock().unwrap() += 1;
            Ok(())
        });
        engine.add_condition("e", || Ok(Some(vec![Arg::from("tick")])));
        (engine, seen)
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let (engine, seen) = ticking_engine();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&engine).run(Duration::from_millis(5), cancel.clone()));

        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("poller did not stop")
            .unwrap();

        let ticks = *seen.lock().unwrap();
        assert!(ticks >= 2, "expected several ticks, got {ticks}");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*seen.lock().unwrap(), ticks);
    }

    #[tokio::test]
    async fn run_with_cancelled_token_never_ticks() {
        let (engine, seen) = ticking_engine();
        let cancel = CancellationToken::new();
        cancel.cancel();
        engine.run(Duration::from_millis(1), cancel).await;
        assert_eq!(*seen.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn slow_pass_leaves_the_runtime_free() {
        let engine = Arc::new(Engine::new());
        engine.add_condition("slow", || {
            std::thread::sleep(Duration::from_millis(300));
            Ok(None)
        });
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&engine).run(Duration::from_millis(1), cancel.clone()));

        // On a current-thread runtime this timer could not fire while a
        // pass blocked the only worker.
        let started = std::time::Instant::now();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(started.elapsed() < Duration::from_millis(250));

        cancel.cancel();
        task.await.unwrap();
    }
}
