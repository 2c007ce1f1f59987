use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;
const MIN_SYNC_INTERVAL_SECS: u64 = 10;
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JournalConfig {
    pub output: OutputConfig,
    pub sync: SyncConfig,
    pub projects: ProjectsConfig,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OutputStructure {
    /// `YYYY/MM/DD/<project>.md`
    #[default]
    Date,
    /// `<project>/YYYY-MM-DD.md`
    Project,
}

impl OutputStructure {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::Project => "project",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub repository: PathBuf,
    pub structure: OutputStructure,
    pub remote: String,
    pub branch: String,
    pub auto_push: bool,
    pub allow_public_repository: bool,
    pub allow_unknown_visibility: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    pub interval: u64,
    pub exclude_system: bool,
    pub exclude_tool_messages: bool,
    pub split_by_day: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projects_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProjectsConfig {
    pub aliases: BTreeMap<String, String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            repository: home_dir().join("Documents").join("claude-logs"),
            structure: OutputStructure::Date,
            remote: "origin".to_string(),
            branch: "main".to_string(),
            auto_push: true,
            allow_public_repository: false,
            allow_unknown_visibility: false,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SYNC_INTERVAL_SECS,
            exclude_system: true,
            exclude_tool_messages: true,
            split_by_day: true,
            projects_dir: None,
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }
}

impl JournalConfig {
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    /// Missing file means defaults; a present but invalid file is an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            let mut cfg = Self::default();
            cfg.normalize();
            return Ok(cfg);
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut parsed: JournalConfig =
            toml::from_str(&raw).with_context(|| format!("invalid TOML in {}", path.display()))?;
        parsed.normalize();
        Ok(parsed)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create config directory {}", parent.display())
            })?;
        }

        let data = toml::to_string_pretty(self)?;
        fs::write(path, data).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.sync
            .projects_dir
            .clone()
            .unwrap_or_else(claude_projects_path)
    }

    fn normalize(&mut self) -> bool {
        let mut changed = false;

        let expanded = expand_tilde(&self.output.repository);
        if expanded != self.output.repository {
            self.output.repository = expanded;
            changed = true;
        }
        if let Some(dir) = self.sync.projects_dir.as_mut() {
            let expanded = expand_tilde(dir);
            if expanded != *dir {
                *dir = expanded;
                changed = true;
            }
        }

        if self.sync.interval < MIN_SYNC_INTERVAL_SECS {
            self.sync.interval = MIN_SYNC_INTERVAL_SECS;
            changed = true;
        }
        for (value, default) in [
            (&mut self.output.remote, "origin"),
            (&mut self.output.branch, "main"),
        ] {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                *value = default.to_string();
                changed = true;
            } else if trimmed.len() != value.len() {
                *value = trimmed.to_string();
                changed = true;
            }
        }

        if normalize_aliases(&mut self.projects.aliases) {
            changed = true;
        }

        changed
    }
}

fn normalize_aliases(aliases: &mut BTreeMap<String, String>) -> bool {
    let mut normalized = BTreeMap::new();
    for (raw_path, raw_name) in aliases.iter() {
        let path = raw_path.trim();
        let name = raw_name.trim();
        if path.is_empty() || name.is_empty() {
            continue;
        }
        let path = expand_tilde(Path::new(path)).to_string_lossy().to_string();
        normalized.insert(path, name.to_string());
    }
    if *aliases != normalized {
        *aliases = normalized;
        return true;
    }
    false
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    pub last_sync: PathBuf,
    pub last_commit: PathBuf,
    pub pid_file: PathBuf,
    pub lock_file: PathBuf,
    pub log_file: PathBuf,
}

impl StatePaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            last_sync: dir.join("last_sync"),
            last_commit: dir.join("last_commit"),
            pid_file: dir.join("ccjournal.pid"),
            lock_file: dir.join("ccjournal.lock"),
            log_file: dir.join("daemon.log"),
        }
    }

    pub fn default_paths() -> Self {
        Self::in_dir(&journal_home())
    }
}

pub fn journal_home() -> PathBuf {
    if let Ok(custom) = env::var("CCJOURNAL_HOME") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }

    home_dir().join(".config").join("ccjournal")
}

pub fn config_path() -> PathBuf {
    journal_home().join(CONFIG_FILE_NAME)
}

pub fn claude_projects_path() -> PathBuf {
    home_dir().join(".claude").join("projects")
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    home_dir().join(rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = TempDir::new().expect("temp dir");
        let cfg = JournalConfig::load_from(&tmp.path().join("absent.toml")).expect("load");
        assert_eq!(cfg.output.structure, OutputStructure::Date);
        assert_eq!(cfg.output.remote, "origin");
        assert_eq!(cfg.output.branch, "main");
        assert!(cfg.output.auto_push);
        assert!(!cfg.output.allow_public_repository);
        assert!(!cfg.output.allow_unknown_visibility);
        assert_eq!(cfg.sync.interval, 300);
        assert!(cfg.sync.exclude_system);
        assert!(cfg.sync.exclude_tool_messages);
        assert!(cfg.sync.split_by_day);
        assert!(cfg.projects.aliases.is_empty());
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let tmp = TempDir::new().expect("temp dir");
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[output]
repository = "/srv/journal"
structure = "project"
auto_push = false

[sync]
interval = 60

[projects.aliases]
"/home/me/work/app" = "work-app"
"#,
        )
        .expect("write config");

        let cfg = JournalConfig::load_from(&path).expect("load");
        assert_eq!(cfg.output.repository, PathBuf::from("/srv/journal"));
        assert_eq!(cfg.output.structure, OutputStructure::Project);
        assert!(!cfg.output.auto_push);
        assert_eq!(cfg.output.remote, "origin");
        assert_eq!(cfg.sync.interval, 60);
        assert!(cfg.sync.exclude_system);
        assert_eq!(
            cfg.projects.aliases.get("/home/me/work/app").map(String::as_str),
            Some("work-app")
        );
    }

    #[test]
    fn save_then_load_preserves_values() {
        let tmp = TempDir::new().expect("temp dir");
        let path = tmp.path().join("nested").join("config.toml");
        let mut cfg = JournalConfig::default();
        cfg.output.repository = PathBuf::from("/srv/journal");
        cfg.output.structure = OutputStructure::Project;
        cfg.sync.exclude_tool_messages = false;
        cfg.projects
            .aliases
            .insert("/srv/app".to_string(), "app".to_string());

        cfg.save_to(&path).expect("save");
        let loaded = JournalConfig::load_from(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let tmp = TempDir::new().expect("temp dir");
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[output\nrepository = ").expect("write config");
        assert!(JournalConfig::load_from(&path).is_err());
    }

    #[test]
    fn normalization_clamps_interval_and_drops_blank_aliases() {
        let mut cfg = JournalConfig::default();
        cfg.sync.interval = 0;
        cfg.output.branch = "  ".to_string();
        cfg.projects
            .aliases
            .insert(" /srv/app ".to_string(), " app ".to_string());
        cfg.projects.aliases.insert("/srv/blank".to_string(), " ".to_string());

        assert!(cfg.normalize());
        assert_eq!(cfg.sync.interval, MIN_SYNC_INTERVAL_SECS);
        assert_eq!(cfg.output.branch, "main");
        assert_eq!(cfg.projects.aliases.len(), 1);
        assert_eq!(
            cfg.projects.aliases.get("/srv/app").map(String::as_str),
            Some("app")
        );
    }

    #[test]
    fn tilde_paths_are_expanded() {
        let expanded = expand_tilde(Path::new("~/Documents/logs"));
        assert!(!expanded.starts_with("~"));
        assert!(expanded.ends_with("Documents/logs"));
        assert_eq!(
            expand_tilde(Path::new("/abs/path")),
            PathBuf::from("/abs/path")
        );
    }

    #[test]
    fn state_paths_live_in_one_directory() {
        let paths = StatePaths::in_dir(Path::new("/state"));
        assert_eq!(paths.last_sync, PathBuf::from("/state/last_sync"));
        assert_eq!(paths.pid_file, PathBuf::from("/state/ccjournal.pid"));
        assert_eq!(paths.log_file, PathBuf::from("/state/daemon.log"));
    }
}
