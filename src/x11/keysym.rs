//! Key names ↔ X11 keysyms ↔ keycodes.

use x11rb::connection::Connection;
use x11rb::protocol::xproto::{self, Keycode, Keysym};

/// Map a normalized combo key to an X11 keysym.
///
/// Supports single ASCII letters and digits, function keys (F1-F12) and
/// common named keys.
pub fn key_name_to_keysym(name: &str) -> Option<Keysym> {
    if name.len() == 1 {
        let ch = name.chars().next()?;
        if ch.is_ascii_alphabetic() {
            return Some(ch.to_ascii_lowercase() as Keysym);
        }
        if ch.is_ascii_digit() {
            return Some(ch as Keysym);
        }
    }

    let name = name.to_ascii_lowercase();

    if let Some(rest) = name.strip_prefix('f')
        && let Ok(n) = rest.parse::<u32>()
        && (1..=12).contains(&n)
    {
        // XK_F1 = 0xffbe, XK_F2 = 0xffbf, ...
        return Some(0xffbe + n - 1);
    }

    match name.as_str() {
        "space" => Some(0x0020),
        "return" | "enter" => Some(0xff0d),
        "escape" | "esc" => Some(0xff1b),
        "tab" => Some(0xff09),
        "backspace" => Some(0xff08),
        "delete" => Some(0xffff),
        "insert" => Some(0xff63),
        "home" => Some(0xff50),
        "end" => Some(0xff57),
        "page_up" | "pageup" | "prior" => Some(0xff55),
        "page_down" | "pagedown" | "next" => Some(0xff56),
        "up" => Some(0xff52),
        "down" => Some(0xff54),
        "left" => Some(0xff51),
        "right" => Some(0xff53),
        _ => None,
    }
}

/// Resolve a keysym to the first keycode that produces it.
pub fn keysym_to_keycode(conn: &impl Connection, keysym: Keysym) -> Option<Keycode> {
    let setup = conn.setup();
    let min_keycode = setup.min_keycode;
    let count = setup.max_keycode - min_keycode + 1;

    let reply = xproto::get_keyboard_mapping(conn, min_keycode, count)
        .ok()?
        .reply()
        .ok()?;

    keycodes_for(&reply.keysyms, reply.keysyms_per_keycode, min_keycode, keysym).next()
}

/// Keycodes whose keysym row contains `keysym`, given a flat keyboard
/// mapping starting at `min_keycode`.
pub(crate) fn keycodes_for(
    keysyms: &[Keysym],
    per_keycode: u8,
    min_keycode: Keycode,
    keysym: Keysym,
) -> impl Iterator<Item = Keycode> + '_ {
    let per_keycode = usize::from(per_keycode).max(1);
    keysyms
        .chunks(per_keycode)
        .enumerate()
        .filter(move |(_, row)| row.contains(&keysym))
        .filter_map(move |(i, _)| u8::try_from(i).ok()?.checked_add(min_keycode))
}
