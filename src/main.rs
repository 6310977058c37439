mod agent;
mod cli;
mod clipboard;
mod combo;
mod content;
mod engine;
mod history;
mod ipc;
mod plugin;
mod settings;
mod x11;

use std::io::Read;
use std::time::Duration;

use clap::Parser;
use cli::{Cli, Command, PluginAction, PluginArgs};
use content::ClipContent;
use plugin::Processed;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            plugins,
            interval_ms,
            history_depth,
            history_file,
            write_back,
            hotkeys,
        } => {
            let history_depth = usize::try_from(history_depth).unwrap_or_else(|_| {
                eprintln!("copybento run: --history-depth value too large for this platform");
                std::process::exit(1);
            });
            let config = agent::AgentConfig {
                plugin_dir: plugins.plugin_dir,
                settings_path: plugins.settings,
                interval: Duration::from_millis(interval_ms),
                plugin_timeout: Duration::from_millis(plugins.plugin_timeout_ms),
                history_depth,
                history_file,
                write_back,
                hotkeys,
            };
            if let Err(e) = agent::run(config).await {
                tracing::error!(error = %e, "agent failed");
                eprintln!("copybento run: {e}");
                std::process::exit(1);
            }
        }
        Command::Plugins { plugins, action } => {
            if let Err(e) = plugins_command(&plugins, action) {
                tracing::error!(error = %e, "plugins command failed");
                eprintln!("copybento plugins: {e}");
                std::process::exit(1);
            }
        }
        Command::Pipe { plugins } => match pipe_command(&plugins) {
            Ok(Processed::Content(content)) => match content {
                ClipContent::Text(text) => println!("{text}"),
                image @ ClipContent::Image(_) => println!("{}", image.preview(0)),
            },
            Ok(Processed::Skipped { by }) => {
                eprintln!("skipped by {by}");
                std::process::exit(2);
            }
            Err(e) => {
                tracing::error!(error = %e, "pipe failed");
                eprintln!("copybento pipe: {e}");
                std::process::exit(1);
            }
        },
    }
}

fn plugins_command(args: &PluginArgs, action: PluginAction) -> Result<(), agent::AgentError> {
    let timeout = Duration::from_millis(args.plugin_timeout_ms);
    match action {
        PluginAction::List => {
            for (name, key, enabled) in agent::list_plugins(&args.plugin_dir, &args.settings, timeout)
            {
                let flag = if enabled { "on " } else { "off" };
                println!("{flag} {key} {name}");
            }
            Ok(())
        }
        PluginAction::Enable { id } => {
            agent::set_plugin_enabled(&args.plugin_dir, &args.settings, timeout, &id, true)
        }
        PluginAction::Disable { id } => {
            agent::set_plugin_enabled(&args.plugin_dir, &args.settings, timeout, &id, false)
        }
    }
}

fn pipe_command(args: &PluginArgs) -> Result<Processed, std::io::Error> {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    if input.ends_with('\n') {
        input.pop();
    }

    let pipeline = agent::load_pipeline(
        &args.plugin_dir,
        &args.settings,
        Duration::from_millis(args.plugin_timeout_ms),
    );
    Ok(pipeline.process(ClipContent::Text(input)))
}
