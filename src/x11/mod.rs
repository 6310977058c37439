//! X11 key monitor: global key grabs and a polling event thread.
//!
//! Each watched combo is grabbed on the root window four times, with and
//! without CapsLock/NumLock, so hotkeys fire regardless of lock state.
//! Grabbed key presses are decoded into [`KeyPress`] values (lock bits
//! removed, keycode mapped back to the combo's key name) and sent to the
//! async side over an unbounded channel.

mod keysym;

use std::collections::HashMap;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use x11rb::connection::Connection;
use x11rb::protocol::Event;
use x11rb::protocol::xproto::{self, GrabMode, Keycode, Keysym, ModMask, Window};
use x11rb::rust_connection::RustConnection;

use crate::combo::Combo;
use crate::engine::{HotkeyError, KeyMonitor, KeyPress, lock};
use keysym::{key_name_to_keysym, keycodes_for, keysym_to_keycode};

/// CapsLock modifier bit (always LockMask, bit 1).
const LOCK_MASK: u16 = 0x0002;

/// XK_Num_Lock keysym for dynamic modifier detection.
const XK_NUM_LOCK: Keysym = 0xff7f;

/// Only the eight core modifier bits; higher bits are mouse buttons.
const CORE_MODIFIERS: u16 = 0x00ff;

pub struct X11KeyMonitor {
    conn: Arc<RustConnection>,
    root: Window,
    numlock_mask: u16,
    /// Keycode → combo key name, shared with the event thread.
    keys: Arc<Mutex<HashMap<Keycode, String>>>,
    /// Every (keycode, modifiers) grabbed, for ungrab on drop.
    grabs: Vec<(Keycode, u16)>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl X11KeyMonitor {
    /// Connect to the default display.
    pub fn connect() -> Result<Self, HotkeyError> {
        let (conn, screen_num) = RustConnection::connect(None)
            .map_err(|e| HotkeyError::X11(format!("connect failed: {e}")))?;
        let root = conn.setup().roots[screen_num].root;

        let numlock_mask = detect_numlock_mask(&conn);
        tracing::debug!(
            numlock_mask = format_args!("0x{numlock_mask:04x}"),
            "detected NumLock modifier"
        );

        Ok(Self {
            conn: Arc::new(conn),
            root,
            numlock_mask,
            keys: Arc::new(Mutex::new(HashMap::new())),
            grabs: Vec::new(),
            stop: Arc::new(AtomicBool::new(false)),
            thread: None,
        })
    }

    /// Lock mask combinations: [0, CapsLock, NumLock, CapsLock|NumLock].
    fn lock_masks(&self) -> [u16; 4] {
        lock_masks(self.numlock_mask)
    }
}

impl KeyMonitor for X11KeyMonitor {
    fn watch(&mut self, combo: &Combo) -> Result<(), HotkeyError> {
        let unsupported = |reason: &str| HotkeyError::Unsupported {
            combo: combo.to_string(),
            reason: reason.to_string(),
        };

        if combo.is_empty() {
            return Err(unsupported("empty combo"));
        }
        let modifiers = combo
            .modifier_mask()
            .ok_or_else(|| unsupported("modifier has no X11 mapping"))?;
        let keysym = key_name_to_keysym(combo.key()).ok_or_else(|| unsupported("unknown key"))?;
        let keycode = keysym_to_keycode(&*self.conn, keysym)
            .ok_or_else(|| unsupported("key not in keyboard mapping"))?;

        for lock_mask in self.lock_masks() {
            let mods = modifiers | lock_mask;
            let cookie = xproto::grab_key(
                &*self.conn,
                true, // owner_events
                self.root,
                ModMask::from(mods),
                keycode,
                GrabMode::ASYNC,
                GrabMode::ASYNC,
            )
            .map_err(|e| HotkeyError::X11(format!("grab_key send: {e}")))?;

            // An error reply means another client holds the grab.
            if let Err(e) = cookie.check() {
                tracing::warn!(
                    combo = %combo,
                    lock_mask,
                    error = %e,
                    "XGrabKey failed, combo may conflict with another application"
                );
                continue;
            }
            self.grabs.push((keycode, mods));
        }

        lock(&self.keys).insert(keycode, combo.key().to_string());
        tracing::info!(combo = %combo, keycode, "hotkey grabbed");
        Ok(())
    }

    fn start(&mut self) -> Result<UnboundedReceiver<KeyPress>, HotkeyError> {
        if self.thread.is_some() {
            return Err(HotkeyError::X11("event thread already running".into()));
        }
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = spawn_event_thread(
            Arc::clone(&self.conn),
            Arc::clone(&self.keys),
            self.numlock_mask,
            Arc::clone(&self.stop),
            tx,
        )?;
        self.thread = Some(handle);
        Ok(rx)
    }
}

impl Drop for X11KeyMonitor {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }

        for &(keycode, mods) in &self.grabs {
            if let Err(e) = xproto::ungrab_key(&*self.conn, keycode, self.root, ModMask::from(mods)) {
                tracing::debug!(keycode, error = %e, "XUngrabKey failed");
            }
        }
        if let Err(e) = self.conn.flush() {
            tracing::debug!(error = %e, "flush after ungrab failed");
        }
    }
}

fn lock_masks(numlock_mask: u16) -> [u16; 4] {
    [0, LOCK_MASK, numlock_mask, LOCK_MASK | numlock_mask]
}

/// Strip lock and mouse-button bits from an event state.
fn clean_state(state: u16, numlock_mask: u16) -> u16 {
    state & !(LOCK_MASK | numlock_mask) & CORE_MODIFIERS
}

/// Detect which modifier bit corresponds to NumLock by querying the
/// X11 modifier mapping and keyboard mapping.
///
/// Falls back to Mod2 (0x0010), the xmodmap default.
fn detect_numlock_mask(conn: &RustConnection) -> u16 {
    const FALLBACK: u16 = 0x0010;

    let Some(mod_reply) = xproto::get_modifier_mapping(conn)
        .ok()
        .and_then(|cookie| cookie.reply().ok())
    else {
        return FALLBACK;
    };

    let setup = conn.setup();
    let min_kc = setup.min_keycode;
    let count = setup.max_keycode - min_kc + 1;
    let Some(kb_reply) = xproto::get_keyboard_mapping(conn, min_kc, count)
        .ok()
        .and_then(|cookie| cookie.reply().ok())
    else {
        return FALLBACK;
    };

    let numlock_keycodes: Vec<Keycode> =
        keycodes_for(&kb_reply.keysyms, kb_reply.keysyms_per_keycode, min_kc, XK_NUM_LOCK)
            .collect();

    numlock_modifier(
        &mod_reply.keycodes,
        usize::from(mod_reply.keycodes_per_modifier()),
        &numlock_keycodes,
    )
    .unwrap_or(FALLBACK)
}

/// Scan the modifier map (8 rows × `per_modifier` keycodes, row i = bit
/// `1 << i`) for a row containing one of `numlock_keycodes`.
fn numlock_modifier(
    modifier_map: &[Keycode],
    per_modifier: usize,
    numlock_keycodes: &[Keycode],
) -> Option<u16> {
    if per_modifier == 0 {
        return None;
    }
    modifier_map
        .chunks(per_modifier)
        .take(8)
        .position(|row| {
            row.iter()
                .any(|kc| *kc != 0 && numlock_keycodes.contains(kc))
        })
        .map(|idx| 1u16 << idx)
}

/// Spawn a dedicated thread that polls the X11 connection for events.
///
/// Uses `nix::poll()` on the X11 connection fd with a 100ms timeout and
/// checks the `stop` flag each iteration for clean shutdown.
fn spawn_event_thread(
    conn: Arc<RustConnection>,
    keys: Arc<Mutex<HashMap<Keycode, String>>>,
    numlock_mask: u16,
    stop: Arc<AtomicBool>,
    tx: UnboundedSender<KeyPress>,
) -> Result<JoinHandle<()>, HotkeyError> {
    let handle = std::thread::Builder::new()
        .name("x11-events".into())
        .spawn(move || {
            let raw_fd = conn.stream().as_raw_fd();

            while !stop.load(Ordering::Relaxed) {
                // SAFETY: raw_fd is the X11 connection fd, valid while conn is alive.
                let borrowed = unsafe { BorrowedFd::borrow_raw(raw_fd) };
                let mut fds = [PollFd::new(borrowed, PollFlags::POLLIN)];

                match poll(&mut fds, PollTimeout::from(100u16)) {
                    Ok(0) => continue,
                    Ok(_) => loop {
                        match conn.poll_for_event() {
                            Ok(Some(Event::KeyPress(ev))) => {
                                let Some(key) = lock(&keys).get(&ev.detail).cloned() else {
                                    continue;
                                };
                                let press = KeyPress {
                                    modifiers: clean_state(u16::from(ev.state), numlock_mask),
                                    key,
                                };
                                if tx.send(press).is_err() {
                                    // Receiver dropped, shut down.
                                    return;
                                }
                            }
                            Ok(Some(_)) => {}
                            Ok(None) => break,
                            Err(e) => {
                                tracing::error!(error = %e, "X11 connection error");
                                return;
                            }
                        }
                    },
                    Err(nix::Error::EINTR) => continue,
                    Err(e) => {
                        tracing::error!(error = %e, "poll error on X11 fd");
                        return;
                    }
                }
            }
        })?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combo::{MOD_CMD, MOD_SHIFT};

    #[test]
    fn lock_variants() {
        assert_eq!(lock_masks(0x10), [0, 0x02, 0x10, 0x12]);
    }

    #[test]
    fn clean_state_strips_locks_and_buttons() {
        let mods = MOD_SHIFT | MOD_CMD;
        assert_eq!(clean_state(mods | LOCK_MASK, 0x10), mods);
        assert_eq!(clean_state(mods | 0x10, 0x10), mods);
        assert_eq!(clean_state(mods | 0x100, 0x10), mods);
        // Mod2 is a real modifier when NumLock lives on Mod3.
        assert_eq!(clean_state(mods | 0x10, 0x20), mods | 0x10);
    }

    #[test]
    fn numlock_row_detection() {
        // Two keycodes per modifier; NumLock (77) on row 4 → Mod2.
        let map: Vec<Keycode> = vec![50, 62, 66, 0, 37, 105, 64, 108, 77, 0, 0, 0, 133, 134, 0, 0];
        assert_eq!(numlock_modifier(&map, 2, &[77]), Some(0x10));
        assert_eq!(numlock_modifier(&map, 2, &[200]), None);
        assert_eq!(numlock_modifier(&map, 0, &[77]), None);
    }
}
