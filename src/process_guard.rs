use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use fs2::FileExt;
use tracing::debug;

use crate::config::StatePaths;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub enum AcquireState {
    Acquired(InstanceGuard),
    AlreadyRunning { pid: Option<u32> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunningState {
    NotRunning { stale_pid: Option<u32> },
    Running { pid: Option<u32> },
}

/// Holds the exclusive daemon lock; releasing it also removes our PID file.
pub struct InstanceGuard {
    file: File,
    pid_path: PathBuf,
    pid: u32,
}

impl InstanceGuard {
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        if read_pid_file(&self.pid_path) == Some(self.pid) {
            let _ = fs::remove_file(&self.pid_path);
        }
    }
}

pub fn acquire_single_instance(paths: &StatePaths) -> Result<AcquireState> {
    if let Some(parent) = paths.lock_file.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create state directory {}", parent.display()))?;
    }

    let mut file = open_lock_file(&paths.lock_file)?;
    if file.try_lock_exclusive().is_err() {
        return Ok(AcquireState::AlreadyRunning {
            pid: read_pid_file(&paths.pid_file),
        });
    }

    let pid = std::process::id();
    write_pid_compat(&mut file, pid)?;
    write_pid_file(&paths.pid_file, pid)?;
    debug!(pid, lock = %paths.lock_file.display(), "acquired daemon lock");
    Ok(AcquireState::Acquired(InstanceGuard {
        file,
        pid_path: paths.pid_file.clone(),
        pid,
    }))
}

pub fn inspect_running_instance(paths: &StatePaths) -> Result<RunningState> {
    let recorded = read_pid_file(&paths.pid_file);

    if paths.lock_file.exists() {
        let file = open_lock_file(&paths.lock_file)?;
        if file.try_lock_exclusive().is_err() {
            return Ok(RunningState::Running { pid: recorded });
        }
        let _ = file.unlock();
    }

    match recorded {
        Some(pid) if process_exists(pid) => Ok(RunningState::Running { pid: Some(pid) }),
        stale => Ok(RunningState::NotRunning { stale_pid: stale }),
    }
}

pub fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while process_exists(pid) {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    }
    true
}

pub fn read_pid_file(path: &Path) -> Option<u32> {
    let raw = fs::read_to_string(path).ok()?;
    raw.trim().parse::<u32>().ok().filter(|pid| *pid > 0)
}

pub fn remove_pid_file(path: &Path) {
    if let Err(err) = fs::remove_file(path)
        && err.kind() != std::io::ErrorKind::NotFound
    {
        debug!(path = %path.display(), error = %err, "failed to remove pid file");
    }
}

fn write_pid_file(path: &Path, pid: u32) -> Result<()> {
    fs::write(path, pid.to_string())
        .with_context(|| format!("failed to write pid file {}", path.display()))
}

pub fn terminate_process(pid: u32, force: bool) -> Result<()> {
    if !process_exists(pid) {
        return Ok(());
    }

    #[cfg(windows)]
    let status = {
        let mut command = Command::new("taskkill");
        command.arg("/PID").arg(pid.to_string());
        if force {
            command.arg("/F");
        }
        command
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .context("failed to execute taskkill")?
    };

    #[cfg(not(windows))]
    let status = Command::new("kill")
        .arg(if force { "-KILL" } else { "-TERM" })
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .context("failed to execute kill")?;

    if !status.success() && process_exists(pid) {
        bail!("failed to signal daemon process {pid}");
    }
    Ok(())
}

#[cfg(windows)]
pub fn process_exists(pid: u32) -> bool {
    let Ok(output) = Command::new("tasklist")
        .arg("/FI")
        .arg(format!("PID eq {pid}"))
        .args(["/FO", "CSV", "/NH"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
    else {
        return false;
    };
    output.status.success()
        && String::from_utf8_lossy(&output.stdout).contains(&format!("\"{pid}\""))
}

#[cfg(not(windows))]
pub fn process_exists(pid: u32) -> bool {
    Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn open_lock_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("failed to open lock file {}", path.display()))
}

fn write_pid_compat(file: &mut File, pid: u32) -> Result<()> {
    file.seek(SeekFrom::Start(0))?;
    file.set_len(0)?;
    file.write_all(pid.to_string().as_bytes())?;
    file.flush()?;
    Ok(())
}
