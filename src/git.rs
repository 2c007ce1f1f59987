use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use regex::Regex;
use tracing::debug;

const QUERY_TIMEOUT: Duration = Duration::from_secs(5);
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Every failure maps to `None`.
pub trait GitProbe {
    fn remote_url(&mut self, project_path: &Path) -> Option<String>;
    fn branch(&mut self, project_path: &Path) -> Option<String>;
}

#[derive(Debug)]
pub struct GitCli {
    ttl: Duration,
    remotes: HashMap<PathBuf, Cached>,
    branches: HashMap<PathBuf, Cached>,
}

#[derive(Debug, Clone)]
struct Cached {
    value: Option<String>,
    expires_at: Instant,
}

impl GitCli {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            remotes: HashMap::new(),
            branches: HashMap::new(),
        }
    }

    fn lookup<F>(
        cache: &mut HashMap<PathBuf, Cached>,
        ttl: Duration,
        project_path: &Path,
        fetch: F,
    ) -> Option<String>
    where
        F: FnOnce(&Path) -> Option<String>,
    {
        if project_path.as_os_str().is_empty() || !project_path.is_dir() {
            return None;
        }

        if let Some(cached) = cache.get(project_path)
            && Instant::now() < cached.expires_at
        {
            return cached.value.clone();
        }

        let value = fetch(project_path);
        cache.insert(
            project_path.to_path_buf(),
            Cached {
                value: value.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        value
    }
}

impl GitProbe for GitCli {
    fn remote_url(&mut self, project_path: &Path) -> Option<String> {
        Self::lookup(&mut self.remotes, self.ttl, project_path, fetch_remote_url)
    }

    fn branch(&mut self, project_path: &Path) -> Option<String> {
        Self::lookup(&mut self.branches, self.ttl, project_path, fetch_git_branch)
    }
}

pub fn fetch_remote_url(path: &Path) -> Option<String> {
    git_query(path, &["remote", "get-url", "origin"])
}

pub fn fetch_git_branch(project_path: &Path) -> Option<String> {
    let branch = git_query(project_path, &["rev-parse", "--abbrev-ref", "HEAD"])?;
    if branch == "HEAD" {
        return git_query(project_path, &["rev-parse", "--short", "HEAD"]);
    }
    Some(branch)
}

fn git_query(dir: &Path, args: &[&str]) -> Option<String> {
    match run_command("git", dir, args, QUERY_TIMEOUT) {
        Ok(output) if output.status.success() => {
            let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
            (!text.is_empty()).then_some(text)
        }
        Ok(output) => {
            debug!(
                dir = %dir.display(),
                args = args.join(" "),
                status = %output.status,
                "git query returned non-zero status"
            );
            None
        }
        Err(err) => {
            debug!(dir = %dir.display(), error = %err, "git query failed");
            None
        }
    }
}

pub fn run_command(program: &str, dir: &Path, args: &[&str], timeout: Duration) -> Result<Output> {
    let mut child = Command::new(program)
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn `{program}` in {}", dir.display()))?;

    let stdout = child.stdout.take().map(drain_in_background);
    let stderr = child.stderr.take().map(drain_in_background);

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child
            .try_wait()
            .with_context(|| format!("failed to wait for `{program}`"))?
        {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            bail!(
                "`{program} {}` timed out after {}s",
                args.join(" "),
                timeout.as_secs()
            );
        }
        thread::sleep(WAIT_POLL_INTERVAL);
    };

    Ok(Output {
        status,
        stdout: stdout.map(join_drain).unwrap_or_default(),
        stderr: stderr.map(join_drain).unwrap_or_default(),
    })
}

fn drain_in_background<R: Read + Send + 'static>(mut reader: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}

fn join_drain(handle: thread::JoinHandle<Vec<u8>>) -> Vec<u8> {
    handle.join().unwrap_or_default()
}

pub fn normalize_remote_url(url: &str) -> String {
    let url = url.trim();
    let url = url.strip_suffix(".git").unwrap_or(url);

    for regex in remote_url_regexes() {
        if let Some(caps) = regex.captures(url) {
            return format!("{}/{}", &caps[1], &caps[2]);
        }
    }
    url.to_string()
}

fn remote_url_regexes() -> &'static [Regex; 3] {
    static REGEXES: OnceLock<[Regex; 3]> = OnceLock::new();
    REGEXES.get_or_init(|| {
        [
            Regex::new(r"^[^@/\s]+@([^:/]+):/?(.+)$").expect("valid scp-style remote regex"),
            Regex::new(r"^ssh://(?:[^@/]+@)?([^/:]+)(?::\d+)?/(.+)$")
                .expect("valid ssh remote regex"),
            Regex::new(r"^https?://(?:[^@/]+@)?([^/]+)/(.+)$").expect("valid http remote regex"),
        ]
    })
}

pub fn derive_project_name(project_path: &Path, git: &mut dyn GitProbe) -> String {
    if let Some(remote) = git.remote_url(project_path) {
        return normalize_remote_url(&remote);
    }
    local_project_name(project_path)
}

pub fn local_project_name(project_path: &Path) -> String {
    let name = project_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_string());
    format!("_local-{name}")
}
