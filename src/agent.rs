//! Clipboard agent: wires the engine, plugins, clipboard and history.
//!
//! Startup order:
//! 1. settings → plugin scan → persisted enabled map
//! 2. engine, configured hotkeys, plugin startup hooks
//! 3. clipboard watcher as the `clipboard_changed` condition, plus its
//!    handler (pipeline → history → optional write-back)
//! 4. X11 key monitor (optional), poller task, signal loop

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::signal::unix::{SignalKind, signal as tokio_signal};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use crate::clipboard::{ClipboardProvider, ClipboardWatcher, XclipClipboard};
use crate::content::{Arg, ClipContent};
use crate::engine::{Engine, KeyPress, lock};
use crate::history::{HistoryError, HistoryRing, PREVIEW_CHARS, load_snapshot, now_millis};
use crate::plugin::builtin::SHOW_HISTORY;
use crate::plugin::loader::{DefaultUnitLoader, load_all};
use crate::plugin::{PluginPipeline, Processed};
use crate::settings::{Settings, SettingsError};
use crate::x11::X11KeyMonitor;

/// Event fired by the clipboard watcher with `[kind, value]`.
pub const CLIPBOARD_CHANGED: &str = "clipboard_changed";

/// How many entries `show_history` logs.
const SHOW_HISTORY_LIMIT: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("settings: {0}")]
    Settings(#[from] SettingsError),
    #[error("history: {0}")]
    History(#[from] HistoryError),
    #[error("no loaded plugin matches {0:?}")]
    UnknownPlugin(String),
    #[error("poller task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Daemon configuration, built from `run` flags.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub plugin_dir: PathBuf,
    pub settings_path: PathBuf,
    pub interval: Duration,
    pub plugin_timeout: Duration,
    pub history_depth: usize,
    pub history_file: Option<PathBuf>,
    pub write_back: bool,
    /// `(combo, event)` pairs from `--hotkey`.
    pub hotkeys: Vec<(String, String)>,
}

/// Scan the plugin directory and apply the persisted enabled map.
pub fn load_pipeline(plugin_dir: &Path, settings_path: &Path, timeout: Duration) -> PluginPipeline {
    let settings = Settings::load(settings_path);
    let report = load_all(plugin_dir, &DefaultUnitLoader::new(timeout));
    if !report.warnings.is_empty() {
        tracing::warn!(skipped = report.warnings.len(), "some plugin units were not loaded");
    }
    let pipeline = PluginPipeline::new(report.records);
    pipeline.apply_enabled_map(&settings.plugins);
    pipeline
}

/// A fully wired agent, minus the platform key monitor and the tasks.
pub struct Agent {
    pub engine: Arc<Engine>,
    pub history: Arc<Mutex<HistoryRing>>,
}

impl Agent {
    pub fn build(config: &AgentConfig, clipboard: Arc<dyn ClipboardProvider>) -> Self {
        let pipeline = Arc::new(load_pipeline(
            &config.plugin_dir,
            &config.settings_path,
            config.plugin_timeout,
        ));
        if pipeline.is_empty() {
            tracing::info!(dir = %config.plugin_dir.display(), "no plugins loaded");
        } else {
            tracing::info!(plugins = pipeline.len(), "plugins ready");
        }

        let engine = Arc::new(Engine::new());
        for (combo, event) in &config.hotkeys {
            engine.register_hotkey(combo, event);
        }

        let failed = pipeline.run_startup_hooks(&engine);
        if failed > 0 {
            tracing::warn!(failed, "plugin startup hooks failed");
        }

        let mut ring = HistoryRing::new(config.history_depth);
        if let Some(path) = &config.history_file {
            ring.restore(&load_snapshot(path));
            if !ring.is_empty() {
                tracing::info!(entries = ring.len(), path = %path.display(), "history restored");
            }
        }
        let history = Arc::new(Mutex::new(ring));
        let watcher = Arc::new(ClipboardWatcher::new(clipboard));
        watcher.prime();

        {
            let watcher = Arc::clone(&watcher);
            engine.add_condition(CLIPBOARD_CHANGED, move || {
                Ok(watcher.probe()?.map(|content| content.to_args()))
            });
        }

        {
            let pipeline = Arc::clone(&pipeline);
            let history = Arc::clone(&history);
            let watcher = Arc::clone(&watcher);
            let write_back = config.write_back;
            engine.on(CLIPBOARD_CHANGED, move |args: &[Arg]| {
                let content = ClipContent::from_args(args)
                    .ok_or("clipboard_changed expects (kind, value)")?;
                tracing::info!(
                    kind = %content.kind(),
                    preview = %content.preview(40),
                    "clipboard changed"
                );

                let result = match pipeline.process(content.clone()) {
                    Processed::Content(result) => result,
                    Processed::Skipped { .. } => return Ok(()),
                };
                lock(&history).push(result.clone(), now_millis());

                if write_back && result != content {
                    let clipboard = watcher.provider();
                    match &result {
                        ClipContent::Text(text) => clipboard.set_text(text)?,
                        ClipContent::Image(image) => clipboard.set_image(image)?,
                    }
                    watcher.remember(&result);
                    tracing::info!(kind = %result.kind(), "wrote transformed content back");
                }
                Ok(())
            });
        }

        {
            let history = Arc::clone(&history);
            engine.on(SHOW_HISTORY, move |_: &[Arg]| {
                let ring = lock(&history);
                if ring.is_empty() {
                    tracing::info!("clipboard history is empty");
                }
                for entry in ring.iter_newest_first(Some(SHOW_HISTORY_LIMIT)) {
                    tracing::info!(
                        seq = entry.seq,
                        ts = entry.timestamp,
                        preview = %entry.content.preview(PREVIEW_CHARS),
                        "history"
                    );
                }
                Ok(())
            });
        }

        Self { engine, history }
    }

    /// Write the history snapshot, if a file is configured.
    pub fn flush_history(&self, path: Option<&Path>) -> Result<(), HistoryError> {
        let Some(path) = path else {
            return Ok(());
        };
        lock(&self.history).save(path)?;
        tracing::info!(path = %path.display(), "history saved");
        Ok(())
    }
}

/// Run the agent until SIGTERM/SIGINT.
pub async fn run(config: AgentConfig) -> Result<(), AgentError> {
    let agent = Agent::build(&config, Arc::new(XclipClipboard::new()));

    // Without a display the agent still watches the clipboard.
    let mut key_rx = match X11KeyMonitor::connect() {
        Ok(monitor) => match agent.engine.install_key_monitor(Box::new(monitor)) {
            Ok(rx) => rx,
            Err(e) => {
                tracing::warn!(error = %e, "key monitor failed, hotkeys disabled");
                None
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "no X11 display, hotkeys disabled");
            None
        }
    };

    let cancel = CancellationToken::new();
    let poller = {
        let engine = Arc::clone(&agent.engine);
        let cancel = cancel.clone();
        let interval = config.interval;
        tokio::spawn(async move { engine.run(interval, cancel).await })
    };

    let mut sig_term = tokio_signal(SignalKind::terminate())?;
    let mut sig_int = tokio_signal(SignalKind::interrupt())?;

    tracing::info!(interval_ms = config.interval.as_millis() as u64, "clipboard agent running");

    loop {
        tokio::select! {
            press = next_key(&mut key_rx) => {
                let Some(press) = press else {
                    tracing::error!("X11 event thread exited, hotkeys disabled");
                    key_rx = None;
                    continue;
                };
                if let Err(e) = agent.engine.handle_key_press(press.modifiers, &press.key) {
                    tracing::warn!(key = %press.key, error = %e, "hotkey handler failed");
                }
            }

            _ = sig_term.recv() => {
                tracing::info!("received SIGTERM, shutting down");
                break;
            }

            _ = sig_int.recv() => {
                tracing::info!("received SIGINT, shutting down");
                break;
            }
        }
    }

    cancel.cancel();
    poller.await?;
    agent.flush_history(config.history_file.as_deref())?;

    tracing::info!("clipboard agent stopped");
    Ok(())
}

/// Next key press, or never when no monitor is installed.
async fn next_key(rx: &mut Option<UnboundedReceiver<KeyPress>>) -> Option<KeyPress> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// `plugins list`: `(display name, key, enabled)` after settings apply.
pub fn list_plugins(
    plugin_dir: &Path,
    settings_path: &Path,
    timeout: Duration,
) -> Vec<(String, String, bool)> {
    load_pipeline(plugin_dir, settings_path, timeout).list()
}

/// `plugins enable|disable ID`: persist the flag for a loaded plugin.
///
/// The flag is stored under the identifier as given; an entry under the
/// plugin's other identifier is dropped so the latest command wins.
pub fn set_plugin_enabled(
    plugin_dir: &Path,
    settings_path: &Path,
    timeout: Duration,
    id: &str,
    enabled: bool,
) -> Result<(), AgentError> {
    let Some((name, key, _)) = list_plugins(plugin_dir, settings_path, timeout)
        .into_iter()
        .find(|(name, key, _)| name == id || key == id)
    else {
        return Err(AgentError::UnknownPlugin(id.to_string()));
    };

    let other = if name == id { key } else { name };
    let aliases: Vec<&str> = [other.as_str()].into_iter().filter(|o| *o != id).collect();
    Settings::set_plugin_enabled(settings_path, id, &aliases, enabled)?;
    Ok(())
}
