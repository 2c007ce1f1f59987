use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local, Utc};
use tracing::debug;
use walkdir::WalkDir;

use crate::cli::{InitArgs, SyncArgs};
use crate::config::{self, JournalConfig, StatePaths};
use crate::daemon::{self, Daemon, StopOutcome};
use crate::git::{self, GitCli};
use crate::path_codec;
use crate::process_guard::{self, AcquireState};
use crate::service::{self, ServiceManager};
use crate::state;
use crate::sync::{self, SyncRequest};
use crate::util::format_since;
use crate::vcs::{self, CommitOutcome, PushRefused, RepositoryVisibility};

const GIT_CACHE_TTL: Duration = Duration::from_secs(60);
const GIT_INIT_TIMEOUT: Duration = Duration::from_secs(30);

pub fn sync(config: &JournalConfig, paths: &StatePaths, args: &SyncArgs) -> Result<u8> {
    let since = if args.force || args.date.is_some() {
        None
    } else {
        state::load_last_sync(&paths.last_sync)
    };
    if let Some(since) = since {
        println!("Syncing files modified since {}", since.to_rfc3339());
    }
    if args.dry_run {
        println!("Dry run mode - no changes will be made\n");
    }

    let request = SyncRequest {
        since,
        date_filter: args.date,
        dry_run: args.dry_run,
    };
    let mut git = GitCli::new(GIT_CACHE_TTL);
    let started = Utc::now();
    let written = sync::sync_logs(config, &request, &mut git)?;

    if !args.dry_run && !written.is_empty() {
        state::save_last_sync(&paths.last_sync, started)?;
    }
    if written.is_empty() {
        println!("No logs to sync.");
        return Ok(0);
    }

    println!(
        "{} {} file(s):",
        if args.dry_run { "Would write" } else { "Wrote" },
        written.len()
    );
    for path in &written {
        println!("  - {}", path.display());
    }
    if args.dry_run || args.no_commit {
        return Ok(0);
    }

    let output = &config.output;
    let mut push = output.auto_push && !args.no_push;
    if push {
        let visibility = vcs::check_repository_visibility(&output.repository, &output.remote);
        let permission = vcs::check_push_permission(
            visibility,
            output.allow_public_repository,
            output.allow_unknown_visibility,
        );
        if !permission.allowed {
            if visibility == RepositoryVisibility::Public {
                return Err(PushRefused {
                    repo: output.repository.clone(),
                }
                .into());
            }
            eprintln!("\nError: {}", permission.warning.unwrap_or("push not allowed"));
            push = false;
        } else if let Some(warning) = permission.warning {
            eprintln!("\nWarning: {warning}");
        }
    }

    match vcs::commit_and_push(&output.repository, &output.remote, &output.branch, push) {
        Ok(CommitOutcome::NothingToCommit) => println!("\nNothing to commit."),
        Ok(CommitOutcome::Committed) => println!("\nChanges committed (not pushed)."),
        Ok(CommitOutcome::Pushed) => println!("\nChanges committed and pushed to remote."),
        Err(err) => eprintln!("\nWarning: Git operations failed: {err:#}"),
    }
    Ok(0)
}

pub fn init(args: &InitArgs) -> Result<u8> {
    let config_path = config::config_path();
    if config_path.exists() && !args.force {
        println!(
            "Config already exists at {}. Re-run with --force to overwrite.",
            config_path.display()
        );
        return Ok(1);
    }

    let mut cfg = JournalConfig::default();
    if let Some(repository) = &args.repository {
        cfg.output.repository = config::expand_tilde(repository);
    }
    if let Some(structure) = args.structure {
        cfg.output.structure = structure;
    }
    cfg.output.auto_push = !args.no_auto_push;
    cfg.save_to(&config_path)?;
    println!("Configuration saved to {}", config_path.display());

    let repo = &cfg.output.repository;
    if !repo.exists() {
        fs::create_dir_all(repo)
            .with_context(|| format!("failed to create repository {}", repo.display()))?;
        println!("Created {}", repo.display());
    }
    if !repo.join(".git").exists() {
        let output = git::run_command("git", repo, &["init"], GIT_INIT_TIMEOUT)?;
        if !output.status.success() {
            bail!(
                "git init failed in {}: {}",
                repo.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        println!("Initialized Git repository");
    }
    Ok(0)
}

pub fn config_show(config: &JournalConfig) {
    let path = config::config_path();
    println!("Configuration file: {}", path.display());
    println!("  exists: {}\n", path.exists());

    let output = &config.output;
    println!("[output]");
    println!("  repository: {}", output.repository.display());
    println!("  structure: {}", output.structure.as_str());
    println!("  remote: {}", output.remote);
    println!("  branch: {}", output.branch);
    println!("  auto_push: {}", output.auto_push);
    println!("  allow_public_repository: {}", output.allow_public_repository);
    println!("  allow_unknown_visibility: {}", output.allow_unknown_visibility);

    let sync = &config.sync;
    println!("\n[sync]");
    println!("  interval: {}", sync.interval);
    println!("  exclude_system: {}", sync.exclude_system);
    println!("  exclude_tool_messages: {}", sync.exclude_tool_messages);
    println!("  split_by_day: {}", sync.split_by_day);
    println!("  projects_dir: {}", config.projects_dir().display());

    if !config.projects.aliases.is_empty() {
        println!("\n[projects.aliases]");
        for (original, alias) in &config.projects.aliases {
            println!("  \"{original}\" = \"{alias}\"");
        }
    }
}

pub fn config_edit() -> Result<u8> {
    let path = config::config_path();
    if !path.exists() {
        println!("Configuration file does not exist: {}", path.display());
        println!("Run 'ccjournal init' to create it.");
        return Ok(1);
    }

    let editor = env::var("VISUAL")
        .or_else(|_| env::var("EDITOR"))
        .unwrap_or_else(|_| "vi".to_string());
    let mut parts = editor.split_whitespace();
    let program = parts.next().unwrap_or("vi");
    let status = Command::new(program)
        .args(parts)
        .arg(&path)
        .status()
        .with_context(|| format!("failed to launch editor `{editor}`"))?;
    Ok(if status.success() { 0 } else { 1 })
}

pub fn list(config: &JournalConfig, limit: usize) -> Result<u8> {
    let repo = &config.output.repository;
    if !repo.exists() {
        println!("Repository does not exist: {}", repo.display());
        return Ok(1);
    }

    let files = recent_journal_files(repo);
    if files.is_empty() {
        println!("No logs found.");
        return Ok(0);
    }

    println!(
        "Recent logs (showing {} of {}):\n",
        limit.min(files.len()),
        files.len()
    );
    for (path, modified) in files.iter().take(limit) {
        let relative = path.strip_prefix(repo).unwrap_or(path);
        let modified: DateTime<Local> = (*modified).into();
        println!(
            "  {}  ({})",
            relative.display(),
            modified.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(0)
}

fn recent_journal_files(repo: &Path) -> Vec<(PathBuf, SystemTime)> {
    let mut files: Vec<(PathBuf, SystemTime)> = WalkDir::new(repo)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git")
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.path().extension().and_then(|ext| ext.to_str()) == Some("md"))
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some((entry.into_path(), modified))
        })
        .collect();
    files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    files
}

pub fn doctor(config: &JournalConfig, paths: &StatePaths) -> Result<u8> {
    let mut issues = 0u8;
    let config_path = config::config_path();
    let projects_dir = config.projects_dir();
    let repo = &config.output.repository;

    println!("ccjournal doctor");
    println!("config_path: {}", config_path.display());
    println!("projects_dir: {}", projects_dir.display());
    println!("repository: {}", repo.display());

    if config_path.exists() {
        println!("[OK] Configuration file found.");
    } else {
        println!("[INFO] No configuration file; defaults in use (run `ccjournal init`).");
    }

    if projects_dir.is_dir() {
        let count = WalkDir::new(&projects_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_dir())
            .count();
        println!("[OK] Projects directory accessible ({count} project(s)).");
    } else {
        issues += 1;
        println!("[WARN] Projects directory not found.");
    }

    for (path, alias) in &config.projects.aliases {
        let token = path_codec::encode(Path::new(path));
        if projects_dir.join(&token).is_dir() {
            println!("[OK] Alias `{alias}` matches logs in {token}.");
        } else {
            println!("[INFO] Alias `{alias}` has no logs yet (expected {token}).");
        }
    }

    if repo.is_dir() {
        println!("[OK] Output repository exists.");
        if repo.join(".git").exists() {
            println!("[OK] Output repository is a Git repository.");
        } else {
            issues += 1;
            println!("[WARN] Output repository is not a Git repository (run `git init`).");
        }
    } else {
        issues += 1;
        println!("[WARN] Output repository does not exist.");
    }

    if command_available("git") {
        println!("[OK] git command available.");
    } else {
        issues += 1;
        println!("[WARN] git command not found in PATH.");
    }
    if command_available("gh") {
        println!("[OK] gh command available (repository visibility checks).");
    } else if config.output.auto_push && !config.output.allow_unknown_visibility {
        issues += 1;
        println!("[WARN] gh command not found; pushes will be skipped as visibility is unknown.");
    } else {
        println!("[INFO] gh command not found in PATH.");
    }

    match daemon::status(paths)? {
        status if status.running => {
            println!("[OK] Daemon running (PID {}).", describe_pid(status.pid));
        }
        _ => println!("[INFO] Daemon not running."),
    }

    if issues == 0 {
        println!("Doctor: healthy");
        Ok(0)
    } else {
        println!("Doctor: {issues} issue(s) found");
        Ok(1)
    }
}

pub fn daemon_start(config: JournalConfig, paths: &StatePaths, foreground: bool) -> Result<u8> {
    let status = daemon::status(paths)?;
    if status.running {
        println!("Daemon is already running (PID: {})", describe_pid(status.pid));
        return Ok(1);
    }

    if !foreground {
        let pid = daemon::spawn_background(paths)?;
        println!("Daemon started in background (PID: {pid}).");
        println!("Log: {}", paths.log_file.display());
        return Ok(0);
    }

    let guard = match process_guard::acquire_single_instance(paths)? {
        AcquireState::Acquired(guard) => guard,
        AcquireState::AlreadyRunning { pid } => {
            println!("Daemon is already running (PID: {})", describe_pid(pid));
            return Ok(1);
        }
    };
    println!("Starting daemon in foreground mode (Ctrl+C to stop)...");
    let stop = install_stop_signal()?;
    let mut daemon = Daemon::new(config, paths.clone(), stop);
    let result = daemon.run();
    drop(guard);
    result?;
    Ok(0)
}

pub fn daemon_stop(paths: &StatePaths) -> Result<u8> {
    match daemon::stop(paths, daemon::STOP_TIMEOUT)? {
        StopOutcome::NotRunning => {
            println!("Daemon not running.");
            Ok(1)
        }
        StopOutcome::StaleRemoved(pid) => {
            println!("Daemon not running (removed stale PID file: {pid})");
            Ok(1)
        }
        StopOutcome::Stopped(pid) => {
            println!("Daemon stopped (PID: {pid}).");
            Ok(0)
        }
        StopOutcome::StillRunning(pid) => {
            eprintln!("Daemon (PID: {pid}) did not exit within {}s.", daemon::STOP_TIMEOUT.as_secs());
            Ok(1)
        }
    }
}

pub fn daemon_status(paths: &StatePaths) -> Result<u8> {
    let status = daemon::status(paths)?;
    if status.running {
        println!("Daemon: running (PID: {})", describe_pid(status.pid));
    } else {
        println!("Daemon: not running");
    }

    let now = Utc::now();
    match status.last_sync {
        Some(at) => println!("Last sync: {}", format_since(at, now)),
        None => println!("Last sync: never"),
    }
    match status.last_commit {
        Some(date) => println!("Last commit: {}", date.format("%Y-%m-%d")),
        None => println!("Last commit: never"),
    }
    Ok(0)
}

pub fn daemon_install(paths: &StatePaths, system: bool, force: bool) -> Result<u8> {
    let Some(manager) = ServiceManager::detect() else {
        println!("Automatic service setup is not supported on this platform.");
        println!("Use 'ccjournal daemon start' or schedule it with your task scheduler.");
        return Ok(1);
    };

    let exe = env::current_exe().context("failed to resolve current executable path")?;
    let user = !system;
    let unit_path = manager.unit_path(user);
    service::install(manager, &unit_path, &exe, &paths.log_file, force)?;
    debug!(unit = %unit_path.display(), exe = %exe.display(), "installed service unit");

    println!("Created {}\n", unit_path.display());
    println!("To start the service:");
    for command in manager.activation_hint(&unit_path, user) {
        println!("  {command}");
    }
    Ok(0)
}

pub fn daemon_uninstall(system: bool) -> Result<u8> {
    let Some(manager) = ServiceManager::detect() else {
        println!("Automatic service setup is not supported on this platform.");
        return Ok(1);
    };

    let unit_path = manager.unit_path(!system);
    if service::uninstall(&unit_path)? {
        println!("Removed {}", unit_path.display());
        println!("Stop the running service with your service manager if it is still loaded.");
        Ok(0)
    } else {
        println!("No service file at {}", unit_path.display());
        Ok(1)
    }
}

fn describe_pid(pid: Option<u32>) -> String {
    pid.map_or_else(|| "unknown".to_string(), |pid| pid.to_string())
}

fn command_available(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn install_stop_signal() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::Relaxed);
    })
    .context("failed to install signal handler")?;
    Ok(stop)
}
