//! Subprocess plugin units.
//!
//! Each executable in the plugin directory runs as one long-lived child
//! process. The host writes requests to the child's stdin and a reader
//! thread forwards framed replies from its stdout over a channel, so every
//! call can wait with a bounded timeout and a wedged unit never stalls the
//! pipeline for longer than that.

use std::io::{Read, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::{Plugin, PluginError, PluginOutcome};
use crate::content::ClipContent;
use crate::engine::{Engine, lock};
use crate::ipc::codec::{CodecError, Frame, FrameReader, write_message};
use crate::ipc::protocol::{Action, ENTRY_ON_STARTUP, Message, PROTOCOL_VERSION, WireContent};

/// Request side of the connection. Held under one lock for a whole
/// request/reply exchange.
struct Channel {
    writer: Box<dyn Write + Send>,
    replies: Receiver<Frame>,
}

pub struct ExternalPlugin {
    /// File name, for logs before the unit has named itself.
    label: String,
    name: String,
    entry_points: Vec<String>,
    timeout: Duration,
    next_id: AtomicU32,
    channel: Mutex<Channel>,
    child: Mutex<Option<Child>>,
}

impl ExternalPlugin {
    /// Spawn `path` and perform the `describe` handshake.
    pub fn spawn(path: &Path, timeout: Duration) -> Result<Self, PluginError> {
        let mut child = Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(PluginError::Disconnected);
        };

        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        match Self::connect(label, stdout, stdin, timeout) {
            Ok(plugin) => {
                *lock(&plugin.child) = Some(child);
                Ok(plugin)
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(e)
            }
        }
    }

    /// Handshake over an arbitrary byte stream pair.
    pub fn connect<R, W>(
        label: impl Into<String>,
        reader: R,
        writer: W,
        timeout: Duration,
    ) -> Result<Self, PluginError>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let label = label.into();
        let (tx, rx) = mpsc::channel();

        let thread_label = label.clone();
        thread::Builder::new()
            .name(format!("plugin-{label}"))
            .spawn(move || {
                let mut frames = FrameReader::new(reader);
                loop {
                    match frames.read_frame() {
                        Ok(frame) => {
                            if tx.send(frame).is_err() {
                                break;
                            }
                        }
                        Err(CodecError::Closed) => {
                            debug!(unit = %thread_label, "plugin output closed");
                            break;
                        }
                        // No id to answer; the waiting call times out.
                        Err(CodecError::Decode(e)) => {
                            warn!(unit = %thread_label, error = %e, "undecodable plugin reply");
                        }
                        Err(e) => {
                            warn!(unit = %thread_label, error = %e, "plugin connection failed");
                            break;
                        }
                    }
                }
            })?;

        let mut plugin = Self {
            label,
            name: String::new(),
            entry_points: Vec::new(),
            timeout,
            next_id: AtomicU32::new(1),
            channel: Mutex::new(Channel {
                writer: Box::new(writer),
                replies: rx,
            }),
            child: Mutex::new(None),
        };

        let reply = plugin.request(|id| Message::Describe {
            id,
            version: PROTOCOL_VERSION,
        })?;
        match reply {
            Message::DescribeAck {
                name, entry_points, ..
            } => {
                plugin.name = name.unwrap_or_default();
                plugin.entry_points = entry_points;
                Ok(plugin)
            }
            Message::Error { message, .. } => Err(PluginError::Failed(message)),
            other => Err(PluginError::Malformed(format!(
                "expected describe_ack, got {}",
                other.type_name()
            ))),
        }
    }

    /// Whether the unit listed `entry` in its `describe_ack`.
    pub fn supports(&self, entry: &str) -> bool {
        self.entry_points.iter().any(|e| e == entry)
    }

    /// Send one request and wait for the reply with the same id.
    ///
    /// A reply whose body does not decode fails the request right away.
    fn request(&self, build: impl FnOnce(u32) -> Message) -> Result<Message, PluginError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut channel = lock(&self.channel);
        write_message(&mut channel.writer, build(id))?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match channel.replies.recv_timeout(remaining) {
                Ok(Frame::Message(reply)) if reply.id() == id => return Ok(reply),
                Ok(Frame::Unrecognized { envelope, error }) if envelope.id == id => {
                    return Err(PluginError::Malformed(format!(
                        "undecodable {} reply: {error}",
                        envelope.msg_type
                    )));
                }
                Ok(stale) => {
                    debug!(
                        unit = %self.label,
                        id = stale.id(),
                        expected = id,
                        "discarding stale plugin reply"
                    );
                }
                Err(RecvTimeoutError::Timeout) => return Err(PluginError::Timeout(self.timeout)),
                Err(RecvTimeoutError::Disconnected) => return Err(PluginError::Disconnected),
            }
        }
    }
}

impl Plugin for ExternalPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_clipboard(&self, content: &ClipContent) -> Result<PluginOutcome, PluginError> {
        let reply = self.request(|id| Message::Transform {
            id,
            content: WireContent::from(content),
        })?;

        match reply {
            Message::TransformResult { action, content, .. } => match (action, content) {
                (Action::None, _) => Ok(PluginOutcome::NoOpinion),
                (Action::Skip, _) => Ok(PluginOutcome::Skip),
                (Action::Replace, Some(c)) if c.is_skip() => Ok(PluginOutcome::Skip),
                (Action::Replace, Some(c)) => c
                    .into_content()
                    .map(PluginOutcome::Replace)
                    .map_err(PluginError::Malformed),
                (Action::Replace, None) => {
                    Err(PluginError::Malformed("replace without content".into()))
                }
            },
            Message::Error { message, .. } => Err(PluginError::Failed(message)),
            other => Err(PluginError::Malformed(format!(
                "expected result, got {}",
                other.type_name()
            ))),
        }
    }

    fn on_startup(&self, engine: &Engine) -> Result<(), PluginError> {
        if !self.supports(ENTRY_ON_STARTUP) {
            return Ok(());
        }

        match self.request(|id| Message::Startup { id })? {
            Message::StartupAck { hotkeys, .. } => {
                for binding in hotkeys {
                    debug!(unit = %self.label, combo = %binding.combo, event = %binding.event, "plugin hotkey");
                    engine.register_hotkey(&binding.combo, &binding.event);
                }
                Ok(())
            }
            Message::Error { message, .. } => Err(PluginError::Failed(message)),
            other => Err(PluginError::Malformed(format!(
                "expected startup_ack, got {}",
                other.type_name()
            ))),
        }
    }
}

impl Drop for ExternalPlugin {
    fn drop(&mut self) {
        let child = self
            .child
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(mut child) = child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
