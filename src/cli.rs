use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "copybento", about = "Clipboard agent with a plugin pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Flags shared by every command that loads plugins.
#[derive(Args, Clone)]
pub struct PluginArgs {
    /// Directory scanned for plugin units
    #[arg(long, default_value = "Plugins")]
    pub plugin_dir: PathBuf,

    /// Settings file holding the persisted enabled map
    #[arg(long, default_value = "settings.json")]
    pub settings: PathBuf,

    /// Maximum wait for one subprocess plugin reply, in milliseconds
    #[arg(long, default_value_t = 2000)]
    pub plugin_timeout_ms: u64,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the clipboard agent
    Run {
        #[command(flatten)]
        plugins: PluginArgs,

        /// Clipboard poll interval in milliseconds
        #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u64).range(1..))]
        interval_ms: u64,

        /// Number of history entries kept in memory
        #[arg(long, default_value_t = 200, value_parser = clap::value_parser!(u64).range(1..))]
        history_depth: u64,

        /// Write the history snapshot here on shutdown
        #[arg(long)]
        history_file: Option<PathBuf>,

        /// Write transformed content back to the clipboard
        #[arg(long)]
        write_back: bool,

        /// Bind a hotkey to an event, e.g. `shift+cmd+v=show_history`
        #[arg(long = "hotkey", value_name = "COMBO=EVENT", value_parser = parse_hotkey)]
        hotkeys: Vec<(String, String)>,
    },

    /// Inspect or toggle loaded plugins
    Plugins {
        #[command(flatten)]
        plugins: PluginArgs,

        #[command(subcommand)]
        action: PluginAction,
    },

    /// Run stdin text through the plugin pipeline once
    Pipe {
        #[command(flatten)]
        plugins: PluginArgs,
    },
}

#[derive(Subcommand)]
pub enum PluginAction {
    /// List plugins in pipeline order
    List,
    /// Enable a plugin by display name or key
    Enable { id: String },
    /// Disable a plugin by display name or key
    Disable { id: String },
}

fn parse_hotkey(raw: &str) -> Result<(String, String), String> {
    let (combo, event) = raw
        .rsplit_once('=')
        .ok_or_else(|| format!("expected COMBO=EVENT, got {raw:?}"))?;
    let (combo, event) = (combo.trim(), event.trim());
    if combo.is_empty() || event.is_empty() {
        return Err(format!("expected COMBO=EVENT, got {raw:?}"));
    }
    Ok((combo.to_string(), event.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hotkey_flag_parsing() {
        assert_eq!(
            parse_hotkey("shift+cmd+v=show_history").unwrap(),
            ("shift+cmd+v".to_string(), "show_history".to_string())
        );
        assert_eq!(
            parse_hotkey(" ctrl + = = zoom ").unwrap(),
            ("ctrl + =".to_string(), "zoom".to_string())
        );
        assert!(parse_hotkey("shift+cmd+v").is_err());
        assert!(parse_hotkey("=event").is_err());
        assert!(parse_hotkey("ctrl+x=").is_err());
    }

    #[test]
    fn run_defaults() {
        let cli = Cli::try_parse_from(["copybento", "run"]).unwrap();
        let Command::Run {
            plugins,
            interval_ms,
            history_depth,
            history_file,
            write_back,
            hotkeys,
        } = cli.command
        else {
            panic!("expected run");
        };
        assert_eq!(plugins.plugin_dir, PathBuf::from("Plugins"));
        assert_eq!(plugins.settings, PathBuf::from("settings.json"));
        assert_eq!(plugins.plugin_timeout_ms, 2000);
        assert_eq!(interval_ms, 100);
        assert_eq!(history_depth, 200);
        assert!(history_file.is_none());
        assert!(!write_back);
        assert!(hotkeys.is_empty());
    }

    #[test]
    fn repeated_hotkeys_and_zero_interval() {
        let cli = Cli::try_parse_from([
            "copybento",
            "run",
            "--hotkey",
            "shift+cmd+v=show_history",
            "--hotkey",
            "ctrl+u=upper",
        ])
        .unwrap();
        let Command::Run { hotkeys, .. } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(hotkeys.len(), 2);

        assert!(Cli::try_parse_from(["copybento", "run", "--interval-ms", "0"]).is_err());
    }

    #[test]
    fn plugins_subcommands() {
        let cli = Cli::try_parse_from(["copybento", "plugins", "disable", "Uppercase Text"]).unwrap();
        let Command::Plugins { action, .. } = cli.command else {
            panic!("expected plugins");
        };
        assert!(matches!(action, PluginAction::Disable { id } if id == "Uppercase Text"));
    }
}
