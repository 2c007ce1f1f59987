use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::git::{self, GitProbe};
use crate::path_codec;
use crate::session::{self, Message, ParseOptions, ProjectSession};

const SESSION_EXTENSION: &str = "jsonl";

#[derive(Debug, Clone, Copy)]
pub struct CollectOptions<'a> {
    pub aliases: &'a BTreeMap<String, String>,
    pub since: Option<DateTime<Utc>>,
    pub parse: ParseOptions,
}

pub fn collect_sessions(
    root: &Path,
    options: &CollectOptions<'_>,
    git: &mut dyn GitProbe,
) -> Result<Vec<ProjectSession>> {
    if !root.is_dir() {
        debug!(root = %root.display(), "projects directory does not exist");
        return Ok(Vec::new());
    }

    let mut sessions = Vec::new();
    for project_dir in project_dirs(root) {
        sessions.extend(collect_project(&project_dir, options, git)?);
    }
    Ok(sessions)
}

pub fn project_dirs(root: &Path) -> Vec<PathBuf> {
    if !root.is_dir() {
        return Vec::new();
    }
    list_entries(root, |entry| entry.file_type().is_dir())
}

/// Display name for an encoded project directory. Several directories can share one
/// name, e.g. two clones with the same remote.
pub fn project_name(
    project_dir: &Path,
    aliases: &BTreeMap<String, String>,
    git: &mut dyn GitProbe,
) -> String {
    let token = project_dir
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    resolve_name(&path_codec::decode(&token), aliases, git)
}

pub fn collect_project(
    project_dir: &Path,
    options: &CollectOptions<'_>,
    git: &mut dyn GitProbe,
) -> Result<Vec<ProjectSession>> {
    let Some(token) = project_dir.file_name().map(|name| name.to_string_lossy().to_string())
    else {
        return Ok(Vec::new());
    };

    let mut project: Option<ProjectInfo> = None;
    let mut sessions = Vec::new();

    for file in list_entries(project_dir, is_session_file) {
        if let Some(since) = options.since
            && !modified_after(&file, since)
        {
            continue;
        }

        let messages: Vec<Message> = match session::parse_session_file(&file, options.parse) {
            Ok(stream) => stream.collect(),
            Err(err) => {
                warn!(path = %file.display(), error = %err, "skipping unreadable session file");
                continue;
            }
        };
        if messages.is_empty() {
            continue;
        }

        let info = project.get_or_insert_with(|| ProjectInfo::resolve(&token, options.aliases, git));
        let session_id = file
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();

        sessions.push(ProjectSession {
            session_id,
            project_name: info.name.clone(),
            project_path: info.path.clone(),
            branch: info.branch.clone(),
            source_file: file,
            messages,
        });
    }

    Ok(sessions)
}

struct ProjectInfo {
    name: String,
    path: PathBuf,
    branch: Option<String>,
}

impl ProjectInfo {
    fn resolve(token: &str, aliases: &BTreeMap<String, String>, git: &mut dyn GitProbe) -> Self {
        let path = path_codec::decode(token);
        let name = resolve_name(&path, aliases, git);
        let branch = if path.is_dir() { git.branch(&path) } else { None };
        debug!(token, path = %path.display(), name = %name, "resolved project");
        Self { name, path, branch }
    }
}

fn resolve_name(path: &Path, aliases: &BTreeMap<String, String>, git: &mut dyn GitProbe) -> String {
    match aliases.get(path.to_string_lossy().as_ref()) {
        Some(alias) => alias.clone(),
        None => git::derive_project_name(path, git),
    }
}

fn list_entries<F>(dir: &Path, keep: F) -> Vec<PathBuf>
where
    F: Fn(&walkdir::DirEntry) -> bool,
{
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| keep(entry))
        .map(walkdir::DirEntry::into_path)
        .collect()
}

fn is_session_file(entry: &walkdir::DirEntry) -> bool {
    entry.file_type().is_file()
        && entry.path().extension().and_then(|ext| ext.to_str()) == Some(SESSION_EXTENSION)
}

fn modified_after(path: &Path, since: DateTime<Utc>) -> bool {
    let modified = match path.metadata().and_then(|meta| meta.modified()) {
        Ok(modified) => modified,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "cannot read modification time");
            return false;
        }
    };
    DateTime::<Utc>::from(modified) > since
}
