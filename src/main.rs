use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use ccjournal::app;
use ccjournal::cli::{Cli, Commands, ConfigAction, DaemonAction};
use ccjournal::config::{self, JournalConfig, StatePaths};
use ccjournal::util::setup_tracing;

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("ccjournal error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<u8> {
    setup_tracing();
    let cli = Cli::parse();
    let paths = StatePaths::default_paths();

    // These work without a readable config file.
    match &cli.command {
        Commands::Init(args) => return app::init(args),
        Commands::Config {
            action: ConfigAction::Path,
        } => {
            println!("{}", config::config_path().display());
            return Ok(0);
        }
        Commands::Config {
            action: ConfigAction::Edit,
        } => return app::config_edit(),
        Commands::Daemon {
            action: DaemonAction::Uninstall { system },
        } => return app::daemon_uninstall(*system),
        _ => {}
    }

    let config = JournalConfig::load()?;
    match cli.command {
        Commands::Sync(args) => app::sync(&config, &paths, &args),
        Commands::Config { .. } => {
            app::config_show(&config);
            Ok(0)
        }
        Commands::List { limit } => app::list(&config, limit),
        Commands::Doctor => app::doctor(&config, &paths),
        Commands::Daemon { action } => match action {
            DaemonAction::Start { foreground } => app::daemon_start(config, &paths, foreground),
            DaemonAction::Stop => app::daemon_stop(&paths),
            DaemonAction::Status => app::daemon_status(&paths),
            DaemonAction::Install { system, force } => {
                app::daemon_install(&paths, system, force)
            }
            DaemonAction::Uninstall { system } => app::daemon_uninstall(system),
        },
        Commands::Init(args) => app::init(&args),
    }
}
