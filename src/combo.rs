//! Key combination normalizer: "Shift+Cmd+V" → order-free [`Combo`].
//!
//! Both sides of a hotkey match go through here: user-provided binding
//! strings via [`normalize`], and live key presses via
//! [`Combo::from_key_press`]. Two combos are equal iff their modifier sets
//! are equal and their keys match case-insensitively.

use std::collections::BTreeSet;
use std::fmt;

/// Shift modifier bit (X11 `ShiftMask`).
pub const MOD_SHIFT: u16 = 0x0001;
/// Control modifier bit (X11 `ControlMask`).
pub const MOD_CTRL: u16 = 0x0004;
/// Alt/Option modifier bit (X11 `Mod1Mask`).
pub const MOD_ALT: u16 = 0x0008;
/// Command/Super modifier bit (X11 `Mod4Mask`).
pub const MOD_CMD: u16 = 0x0040;

/// Canonical modifier tokens paired with their bitmask bits.
const MODIFIER_BITS: [(&str, u16); 4] = [
    ("shift", MOD_SHIFT),
    ("ctrl", MOD_CTRL),
    ("alt", MOD_ALT),
    ("cmd", MOD_CMD),
];

/// A normalized key combination.
///
/// The empty combo (no modifiers, empty key) is what blank input
/// normalizes to; no real key press ever produces it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Combo {
    modifiers: BTreeSet<String>,
    key: String,
}

impl Combo {
    /// Build a combo from a decoded key press.
    ///
    /// `modifiers` is a bitmask in the `MOD_*` layout; bits outside the
    /// four known modifiers (lock keys, mouse buttons) are ignored.
    pub fn from_key_press(modifiers: u16, key: &str) -> Self {
        let modifiers = MODIFIER_BITS
            .iter()
            .filter(|(_, bit)| modifiers & bit != 0)
            .map(|(name, _)| (*name).to_string())
            .collect();
        Self {
            modifiers,
            key: key.trim().to_lowercase(),
        }
    }

    /// Canonical modifier tokens, sorted.
    pub fn modifiers(&self) -> impl Iterator<Item = &str> {
        self.modifiers.iter().map(String::as_str)
    }

    /// Lowercased key token.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_empty() && self.modifiers.is_empty()
    }

    /// Modifier bitmask for platform key grabs.
    ///
    /// Returns `None` if any modifier has no known bit (a pass-through
    /// token such as a typo), since such a combo cannot be grabbed.
    pub fn modifier_mask(&self) -> Option<u16> {
        self.modifiers.iter().try_fold(0u16, |mask, m| {
            MODIFIER_BITS
                .iter()
                .find(|(name, _)| name == m)
                .map(|(_, bit)| mask | bit)
        })
    }
}

impl fmt::Display for Combo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for m in self.modifiers() {
            write!(f, "{m}+")?;
        }
        f.write_str(&self.key)
    }
}

/// Normalize a human-readable combination string.
///
/// Format: `[Modifier+...]Key`. Tokens are trimmed and empty tokens
/// dropped; the last token is the key, everything before is a modifier.
/// When the last token is itself a known modifier and exactly one other
/// token is not, that token is the key instead, so `V+Shift+Cmd` equals
/// `Shift+Cmd+V`. Never fails: malformed input degrades to a combo that
/// matches nothing.
pub fn normalize(raw: &str) -> Combo {
    let mut parts: Vec<&str> = raw
        .split('+')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    let key_index = match parts.last() {
        None => return Combo::default(),
        Some(last) if is_known_modifier(last) => {
            let mut non_modifiers = parts
                .iter()
                .enumerate()
                .filter(|(_, p)| !is_known_modifier(p));
            match (non_modifiers.next(), non_modifiers.next()) {
                (Some((i, _)), None) => i,
                _ => parts.len() - 1,
            }
        }
        Some(_) => parts.len() - 1,
    };
    let key = parts.remove(key_index);

    let modifiers = parts.into_iter().map(canonical_modifier).collect();

    Combo {
        modifiers,
        key: key.to_lowercase(),
    }
}

fn is_known_modifier(token: &str) -> bool {
    let canonical = canonical_modifier(token);
    MODIFIER_BITS.iter().any(|(name, _)| *name == canonical)
}

/// Map a modifier alias to its canonical token.
///
/// Unrecognized tokens pass through lowercased so they still take part
/// in equality.
fn canonical_modifier(name: &str) -> String {
    let lower = name.to_lowercase();
    match lower.as_str() {
        "command" | "cmd" => "cmd".to_string(),
        "control" | "ctl" | "ctrl" => "ctrl".to_string(),
        "option" | "opt" | "alt" => "alt".to_string(),
        "shift" => "shift".to_string(),
        _ => lower,
    }
}
