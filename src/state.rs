use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use tracing::debug;

pub fn load_last_sync(path: &Path) -> Option<DateTime<Utc>> {
    let raw = read_trimmed(path)?;
    match DateTime::parse_from_rfc3339(&raw) {
        Ok(parsed) => Some(parsed.with_timezone(&Utc)),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "ignoring invalid sync watermark");
            None
        }
    }
}

pub fn save_last_sync(path: &Path, at: DateTime<Utc>) -> Result<()> {
    write_state(path, &at.to_rfc3339_opts(SecondsFormat::Micros, true))
}

pub fn load_last_commit(path: &Path) -> Option<NaiveDate> {
    let raw = read_trimmed(path)?;
    match NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "ignoring invalid commit date");
            None
        }
    }
}

pub fn save_last_commit(path: &Path, date: NaiveDate) -> Result<()> {
    write_state(path, &date.format("%Y-%m-%d").to_string())
}

fn read_trimmed(path: &Path) -> Option<String> {
    let raw = fs::read_to_string(path).ok()?;
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn write_state(path: &Path, value: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create state directory {}", parent.display()))?;
    }
    fs::write(path, value).with_context(|| format!("failed to write {}", path.display()))
}
