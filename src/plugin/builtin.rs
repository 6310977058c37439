//! Compiled-in plugins, selected by `<stem>.builtin` marker files.

use std::sync::Arc;

use super::{Plugin, PluginError, PluginOutcome};
use crate::content::ClipContent;

/// Look up a compiled-in plugin by marker stem.
pub fn lookup(stem: &str) -> Option<Arc<dyn Plugin>> {
    match stem {
        "uppercase" => Some(Arc::new(UppercaseText)),
        "history" => Some(Arc::new(HistoryProvider)),
        _ => None,
    }
}

/// Stems `lookup` knows, for diagnostics.
pub const KNOWN: &[&str] = &["history", "uppercase"];

/// Uppercases copied text; no opinion on images.
pub struct UppercaseText;

impl Plugin for UppercaseText {
    fn name(&self) -> &str {
        "Uppercase Text"
    }

    fn on_clipboard(&self, content: &ClipContent) -> Result<PluginOutcome, PluginError> {
        match content {
            ClipContent::Text(text) => Ok(PluginOutcome::Replace(ClipContent::Text(
                text.to_uppercase(),
            ))),
            ClipContent::Image(_) => Ok(PluginOutcome::NoOpinion),
        }
    }
}

/// Never transforms anything. Its presence binds the history view to
/// `shift+cmd+v` at startup.
pub struct HistoryProvider;

/// Event the history hotkey fires.
pub const SHOW_HISTORY: &str = "show_history";

impl Plugin for HistoryProvider {
    fn name(&self) -> &str {
        "History Provider"
    }

    fn on_clipboard(&self, _content: &ClipContent) -> Result<PluginOutcome, PluginError> {
        Ok(PluginOutcome::NoOpinion)
    }

    fn on_startup(&self, engine: &crate::engine::Engine) -> Result<(), PluginError> {
        engine.register_hotkey("shift+cmd+v", SHOW_HISTORY);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::combo::{MOD_CMD, MOD_SHIFT};
    use crate::content::{Arg, Bitmap};
    use crate::engine::Engine;

    #[test]
    fn lookup_known_and_unknown() {
        for stem in KNOWN {
            assert!(lookup(stem).is_some(), "{stem} should resolve");
        }
        assert!(lookup("better_shot").is_none());
        assert!(lookup("").is_none());
    }

    #[test]
    fn uppercase_text_only() {
        let p = UppercaseText;
        assert_eq!(
            p.on_clipboard(&ClipContent::Text("mixed Case ß".into())).unwrap(),
            PluginOutcome::Replace(ClipContent::Text("MIXED CASE SS".into()))
        );
        let img = ClipContent::Image(Bitmap::from_rgba(1, 1, vec![0; 4]).unwrap());
        assert_eq!(p.on_clipboard(&img).unwrap(), PluginOutcome::NoOpinion);
    }

    #[test]
    fn history_provider_binds_hotkey() {
        let engine = Engine::new();
        let hits = std::sync::Arc::new(Mutex::new(0));
        let sink = std::sync::Arc::clone(&hits);
        engine.on(SHOW_HISTORY, move |_: &[Arg]| {
            *sink.lock().unwrap() += 1;
            Ok(())
        });

        HistoryProvider.on_startup(&engine).unwrap();
        engine.handle_key_press(MOD_SHIFT | MOD_CMD, "v").unwrap();
        assert_eq!(*hits.lock().unwrap(), 1);
        assert_eq!(
            HistoryProvider
                .on_clipboard(&ClipContent::Text("x".into()))
                .unwrap(),
            PluginOutcome::NoOpinion
        );
    }
}
