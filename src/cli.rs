use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use crate::config::OutputStructure;

#[derive(Parser, Debug)]
#[command(
    name = "ccjournal",
    version,
    about = "Sync coding-assistant conversation logs to a Git repository as Markdown"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write configuration and prepare the output repository.
    Init(InitArgs),
    /// Convert conversation logs and commit them to the output repository.
    Sync(SyncArgs),
    /// Inspect or edit the configuration file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// List recently written journal files.
    List {
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
    /// Run health diagnostics for setup and runtime requirements.
    Doctor,
    /// Manage the background sync daemon.
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
}

#[derive(Args, Debug)]
pub struct InitArgs {
    #[arg(long)]
    pub repository: Option<PathBuf>,
    #[arg(long, value_enum)]
    pub structure: Option<OutputStructure>,
    /// Commit without pushing.
    #[arg(long)]
    pub no_auto_push: bool,
    /// Overwrite an existing configuration file.
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Show what would be written without changing anything.
    #[arg(long)]
    pub dry_run: bool,
    /// Only sync messages from this day (YYYY-MM-DD).
    #[arg(long, value_name = "YYYY-MM-DD", value_parser = parse_date)]
    pub date: Option<NaiveDate>,
    #[arg(long)]
    pub no_commit: bool,
    /// Commit but do not push.
    #[arg(long)]
    pub no_push: bool,
    /// Ignore the last-sync watermark and re-render everything.
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration.
    Show,
    /// Print the configuration file path.
    Path,
    /// Open the configuration file in $EDITOR.
    Edit,
}

#[derive(Subcommand, Debug)]
pub enum DaemonAction {
    /// Start the daemon (detached unless --foreground).
    Start {
        #[arg(short, long)]
        foreground: bool,
    },
    /// Stop a running daemon.
    Stop,
    /// Show daemon state and sync watermarks.
    Status,
    /// Install a launchd/systemd unit that runs the daemon.
    Install {
            #[arg(long)]
        system: bool,
        #[arg(long)]
        force: bool,
    },
    /// Remove the installed unit file.
    Uninstall {
        #[arg(long)]
        system: bool,
    },
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| format!("invalid date `{raw}`, expected YYYY-MM-DD"))
}
