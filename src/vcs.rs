use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Result, bail};
use chrono::Local;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info};

use crate::git::run_command;

const STATUS_TIMEOUT: Duration = Duration::from_secs(10);
const ADD_TIMEOUT: Duration = Duration::from_secs(10);
const COMMIT_TIMEOUT: Duration = Duration::from_secs(30);
const PUSH_TIMEOUT: Duration = Duration::from_secs(60);
const REMOTE_TIMEOUT: Duration = Duration::from_secs(5);
const GH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
#[error(
    "refusing to push to public repository {}; session logs may contain sensitive information. \
     Set 'allow_public_repository = true' in the config file to allow it",
    repo.display()
)]
pub struct PushRefused {
    pub repo: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    NothingToCommit,
    Committed,
    Pushed,
}

pub fn commit_and_push(repo: &Path, remote: &str, branch: &str, push: bool) -> Result<CommitOutcome> {
    let status = git(repo, &["status", "--porcelain"], STATUS_TIMEOUT)?;
    if String::from_utf8_lossy(&status.stdout).trim().is_empty() {
        debug!(repo = %repo.display(), "working tree clean");
        return Ok(CommitOutcome::NothingToCommit);
    }

    git(repo, &["add", "-A"], ADD_TIMEOUT)?;
    let message = format!(
        "Update conversation logs ({})",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    git(repo, &["commit", "-m", &message], COMMIT_TIMEOUT)?;
    info!(repo = %repo.display(), "committed journal changes");

    if !push {
        return Ok(CommitOutcome::Committed);
    }
    git(repo, &["push", remote, branch], PUSH_TIMEOUT)?;
    info!(remote, branch, "pushed journal changes");
    Ok(CommitOutcome::Pushed)
}

fn git(repo: &Path, args: &[&str], timeout: Duration) -> Result<Output> {
    let output = run_command("git", repo, args, timeout)?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "`git {}` failed ({}): {}",
            args.join(" "),
            output.status,
            stderr.trim()
        );
    }
    Ok(output)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryVisibility {
    Public,
    Private,
    Unknown,
}

impl fmt::Display for RepositoryVisibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Public => "public",
            Self::Private => "private",
            Self::Unknown => "unknown",
        })
    }
}

pub fn check_repository_visibility(repo: &Path, remote: &str) -> RepositoryVisibility {
    let url = match run_command("git", repo, &["remote", "get-url", remote], REMOTE_TIMEOUT) {
        Ok(output) if output.status.success() => {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        }
        Ok(_) => return RepositoryVisibility::Unknown,
        Err(err) => {
            debug!(error = %err, "cannot read remote url");
            return RepositoryVisibility::Unknown;
        }
    };
    if !is_github_url(&url) {
        return RepositoryVisibility::Unknown;
    }

    match run_command(
        "gh",
        repo,
        &["repo", "view", "--json", "isPrivate", "--jq", ".isPrivate"],
        GH_TIMEOUT,
    ) {
        Ok(output) if output.status.success() => {
            visibility_from_gh(&String::from_utf8_lossy(&output.stdout))
        }
        Ok(output) => {
            debug!(status = %output.status, "gh repo view failed");
            RepositoryVisibility::Unknown
        }
        Err(err) => {
            debug!(error = %err, "gh not available");
            RepositoryVisibility::Unknown
        }
    }
}

fn visibility_from_gh(stdout: &str) -> RepositoryVisibility {
    if stdout.trim().eq_ignore_ascii_case("true") {
        RepositoryVisibility::Private
    } else {
        RepositoryVisibility::Public
    }
}

pub fn is_github_url(url: &str) -> bool {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX
        .get_or_init(|| Regex::new(r"github\.com[:/]").expect("valid github url regex"))
        .is_match(url)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushPermission {
    pub allowed: bool,
    pub visibility: RepositoryVisibility,
    pub warning: Option<&'static str>,
}

pub fn check_push_permission(
    visibility: RepositoryVisibility,
    allow_public: bool,
    allow_unknown: bool,
) -> PushPermission {
    let (allowed, warning) = match visibility {
        RepositoryVisibility::Private => (true, None),
        RepositoryVisibility::Public if allow_public => (
            true,
            Some("Pushing to a PUBLIC repository. Ensure no sensitive information is included."),
        ),
        RepositoryVisibility::Public => (
            false,
            Some(
                "Refusing to push to public repository. Set 'allow_public_repository = true' to override.",
            ),
        ),
        RepositoryVisibility::Unknown if allow_unknown => {
            (true, Some("Repository visibility unknown. Proceeding with push."))
        }
        RepositoryVisibility::Unknown => (
            false,
            Some(
                "Repository visibility unknown (non-GitHub or gh CLI not available). \
                 Set 'allow_unknown_visibility = true' to push anyway.",
            ),
        ),
    };
    PushPermission {
        allowed,
        visibility,
        warning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn github_urls_are_recognised() {
        assert!(is_github_url("git@github.com:user/repo.git"));
        assert!(is_github_url("https://github.com/user/repo"));
        assert!(!is_github_url("https://gitlab.com/user/repo"));
        assert!(!is_github_url("https://notgithub.company/user/repo"));
    }

    #[test]
    fn gh_output_maps_to_visibility() {
        assert_eq!(visibility_from_gh("true\n"), RepositoryVisibility::Private);
        assert_eq!(visibility_from_gh("false\n"), RepositoryVisibility::Public);
    }

    #[test]
    fn private_repositories_push_silently() {
        let permission = check_push_permission(RepositoryVisibility::Private, false, false);
        assert!(permission.allowed);
        assert_eq!(permission.warning, None);
    }

    #[test]
    fn public_repositories_need_opt_in() {
        let refused = check_push_permission(RepositoryVisibility::Public, false, true);
        assert!(!refused.allowed);
        assert!(refused.warning.expect("warning").contains("allow_public_repository"));

        let allowed = check_push_permission(RepositoryVisibility::Public, true, false);
        assert!(allowed.allowed);
        assert!(allowed.warning.expect("warning").contains("PUBLIC"));
    }

    #[test]
    fn unknown_visibility_needs_opt_in() {
        let refused = check_push_permission(RepositoryVisibility::Unknown, true, false);
        assert!(!refused.allowed);
        assert!(refused.warning.expect("warning").contains("allow_unknown_visibility"));

        let allowed = check_push_permission(RepositoryVisibility::Unknown, false, true);
        assert!(allowed.allowed);
        assert_eq!(
            allowed.warning,
            Some("Repository visibility unknown. Proceeding with push.")
        );
    }

    #[test]
    fn directory_without_remote_has_unknown_visibility() {
        let tmp = TempDir::new().expect("temp dir");
        assert_eq!(
            check_repository_visibility(tmp.path(), "origin"),
            RepositoryVisibility::Unknown
        );
    }

    #[test]
    fn commit_outside_a_repository_fails() {
        let tmp = TempDir::new().expect("temp dir");
        assert!(commit_and_push(tmp.path(), "origin", "main", false).is_err());
    }

    #[test]
    fn commit_in_repository_records_changes() {
        let tmp = TempDir::new().expect("temp dir");
        let repo = tmp.path();
        let timeout = Duration::from_secs(10);
        if !run_command("git", repo, &["init", "-q"], timeout).is_ok_and(|o| o.status.success()) {
            return;
        }
        for args in [
            ["config", "user.email", "journal@example.com"],
            ["config", "user.name", "Journal Test"],
            ["config", "commit.gpgsign", "false"],
        ] {
            run_command("git", repo, &args, timeout).expect("configure repository");
        }

        assert_eq!(
            commit_and_push(repo, "origin", "main", false).expect("clean tree"),
            CommitOutcome::NothingToCommit
        );

        fs::write(repo.join("2024-01-15.md"), "# journal\n").expect("write journal");
        assert_eq!(
            commit_and_push(repo, "origin", "main", false).expect("commit"),
            CommitOutcome::Committed
        );
        let log = run_command("git", repo, &["log", "--format=%s"], timeout).expect("git log");
        assert!(String::from_utf8_lossy(&log.stdout).starts_with("Update conversation logs ("));

        assert_eq!(
            commit_and_push(repo, "origin", "main", false).expect("clean again"),
            CommitOutcome::NothingToCommit
        );
    }
}
