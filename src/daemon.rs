use std::env;
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local, NaiveDate, Utc};
use tracing::{debug, error, info, warn};

use crate::config::{JournalConfig, StatePaths};
use crate::git::{GitCli, GitProbe};
use crate::process_guard::{self, RunningState};
use crate::state;
use crate::sync::{self, SyncRequest};
use crate::vcs::{self, CommitOutcome};

const SLEEP_SLICE: Duration = Duration::from_secs(1);
const GIT_CACHE_TTL: Duration = Duration::from_secs(300);
const STARTUP_GRACE: Duration = Duration::from_millis(500);
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Periodic sync loop. Commits at most once per local calendar day.
pub struct Daemon {
    config: JournalConfig,
    paths: StatePaths,
    stop: Arc<AtomicBool>,
    git: Box<dyn GitProbe>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub written: usize,
    pub commit: Option<CommitOutcome>,
}

impl Daemon {
    pub fn new(config: JournalConfig, paths: StatePaths, stop: Arc<AtomicBool>) -> Self {
        Self::with_probe(config, paths, stop, Box::new(GitCli::new(GIT_CACHE_TTL)))
    }

    pub fn with_probe(
        config: JournalConfig,
        paths: StatePaths,
        stop: Arc<AtomicBool>,
        git: Box<dyn GitProbe>,
    ) -> Self {
        Self {
            config,
            paths,
            stop,
            git,
        }
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    pub fn run(&mut self) -> Result<()> {
        let interval = self.config.sync.interval();
        info!(
            pid = std::process::id(),
            interval_secs = interval.as_secs(),
            repository = %self.config.output.repository.display(),
            "daemon started"
        );

        while !self.is_stopping() {
            if let Err(err) = self.run_cycle(Local::now().date_naive()) {
                error!(error = %format!("{err:#}"), "sync cycle failed");
            }
            self.sleep(interval);
        }

        info!("daemon stopped");
        Ok(())
    }

    fn sleep(&self, interval: Duration) {
        let deadline = Instant::now() + interval;
        while !self.is_stopping() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }

    pub fn should_commit(&self, today: NaiveDate) -> bool {
        state::load_last_commit(&self.paths.last_commit) != Some(today)
    }

    pub fn run_cycle(&mut self, today: NaiveDate) -> Result<CycleReport> {
        let since = state::load_last_sync(&self.paths.last_sync);
        if let Some(since) = since {
            debug!(since = %since.to_rfc3339(), "syncing files modified since watermark");
        }

        let request = SyncRequest {
            since,
            ..SyncRequest::default()
        };
        // Files appended while the pass runs must stay newer than the next watermark.
        let started = Utc::now();
        let written = sync::sync_logs(&self.config, &request, self.git.as_mut())?;
        if written.is_empty() {
            debug!("no logs to sync");
            return Ok(CycleReport::default());
        }

        info!(files = written.len(), "wrote journal files");
        state::save_last_sync(&self.paths.last_sync, started)?;

        let mut report = CycleReport {
            written: written.len(),
            commit: None,
        };
        if !self.should_commit(today) {
            return Ok(report);
        }

        let output = &self.config.output;
        let push = output.auto_push && self.push_allowed();
        info!(push, "committing changes (daily commit)");
        let outcome = vcs::commit_and_push(&output.repository, &output.remote, &output.branch, push)?;
        state::save_last_commit(&self.paths.last_commit, today)?;
        report.commit = Some(outcome);
        Ok(report)
    }

    fn push_allowed(&self) -> bool {
        let output = &self.config.output;
        let visibility = vcs::check_repository_visibility(&output.repository, &output.remote);
        let permission = vcs::check_push_permission(
            visibility,
            output.allow_public_repository,
            output.allow_unknown_visibility,
        );
        match (permission.allowed, permission.warning) {
            (false, warning) => {
                error!(
                    %visibility,
                    "{}",
                    warning.unwrap_or("push not allowed")
                );
                false
            }
            (true, Some(warning)) => {
                warn!(%visibility, "{warning}");
                true
            }
            (true, None) => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub last_sync: Option<DateTime<Utc>>,
    pub last_commit: Option<NaiveDate>,
}

pub fn status(paths: &StatePaths) -> Result<DaemonStatus> {
    let (running, pid) = match process_guard::inspect_running_instance(paths)? {
        RunningState::Running { pid } => (true, pid),
        RunningState::NotRunning { stale_pid } => (false, stale_pid),
    };
    Ok(DaemonStatus {
        running,
        pid,
        last_sync: state::load_last_sync(&paths.last_sync),
        last_commit: state::load_last_commit(&paths.last_commit),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    StaleRemoved(u32),
    Stopped(u32),
    StillRunning(u32),
}

pub fn stop(paths: &StatePaths, timeout: Duration) -> Result<StopOutcome> {
    match process_guard::inspect_running_instance(paths)? {
        RunningState::NotRunning { stale_pid: None } => Ok(StopOutcome::NotRunning),
        RunningState::NotRunning {
            stale_pid: Some(pid),
        } => {
            process_guard::remove_pid_file(&paths.pid_file);
            Ok(StopOutcome::StaleRemoved(pid))
        }
        RunningState::Running { pid: None } => {
            bail!("daemon holds the lock but its PID file is missing")
        }
        RunningState::Running { pid: Some(pid) } => {
            process_guard::terminate_process(pid, false)?;
            if process_guard::wait_for_exit(pid, timeout) {
                Ok(StopOutcome::Stopped(pid))
            } else {
                Ok(StopOutcome::StillRunning(pid))
            }
        }
    }
}

/// Output of the detached child is appended to the daemon log.
pub fn spawn_background(paths: &StatePaths) -> Result<u32> {
    let exe = env::current_exe().context("failed to resolve current executable path")?;
    let log = open_log(&paths.log_file)?;
    let log_err = log
        .try_clone()
        .context("failed to duplicate daemon log handle")?;

    let mut command = Command::new(&exe);
    command
        .args(["daemon", "start", "--foreground"])
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err));
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut child = command
        .spawn()
        .with_context(|| format!("failed to spawn {}", exe.display()))?;
    let pid = child.id();

    thread::sleep(STARTUP_GRACE);
    if let Some(status) = child.try_wait().context("failed to poll daemon process")? {
        bail!(
            "daemon exited immediately ({status}); see {}",
            paths.log_file.display()
        );
    }
    Ok(pid)
}

fn open_log(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open daemon log {}", path.display()))
}
