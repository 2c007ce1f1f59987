use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::content::{self, MessageContent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    fn from_entry_type(kind: &str) -> Option<Self> {
        match kind {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "Assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub timestamp: DateTime<FixedOffset>,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ProjectSession {
    pub session_id: String,
    pub project_name: String,
    pub project_path: PathBuf,
    pub branch: Option<String>,
    pub source_file: PathBuf,
    pub messages: Vec<Message>,
}

impl ProjectSession {
    pub fn start_time(&self) -> Option<DateTime<FixedOffset>> {
        self.messages.first().map(|msg| msg.timestamp)
    }

    pub fn end_time(&self) -> Option<DateTime<FixedOffset>> {
        self.messages.last().map(|msg| msg.timestamp)
    }

    fn clone_metadata(&self) -> ProjectSession {
        ProjectSession {
            session_id: self.session_id.clone(),
            project_name: self.project_name.clone(),
            project_path: self.project_path.clone(),
            branch: self.branch.clone(),
            source_file: self.source_file.clone(),
            messages: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ParseOptions {
    pub exclude_system: bool,
    pub exclude_tool_messages: bool,
    pub date_filter: Option<NaiveDate>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            exclude_system: true,
            exclude_tool_messages: true,
            date_filter: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    message: Option<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    content: Option<MessageContent>,
}

/// Forward-only stream of the messages in one session file.
///
/// The file is read line by line as the iterator advances; it cannot be rewound, so
/// callers that need the messages twice must collect them.
pub struct SessionMessages {
    reader: BufReader<File>,
    options: ParseOptions,
    path: PathBuf,
    line_no: usize,
    buf: Vec<u8>,
}

pub fn parse_session_file(path: &Path, options: ParseOptions) -> Result<SessionMessages> {
    let file = File::open(path)
        .with_context(|| format!("failed to open session file {}", path.display()))?;
    Ok(SessionMessages {
        reader: BufReader::new(file),
        options,
        path: path.to_path_buf(),
        line_no: 0,
        buf: Vec::new(),
    })
}

impl Iterator for SessionMessages {
    type Item = Message;

    fn next(&mut self) -> Option<Message> {
        loop {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(err) => {
                    warn!(path = %self.path.display(), error = %err, "stopped reading session file");
                    return None;
                }
            }
            self.line_no += 1;

            let Ok(line) = std::str::from_utf8(&self.buf) else {
                debug!(path = %self.path.display(), line = self.line_no, "skipping non-utf8 line");
                continue;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(message) = parse_line(line, &self.options) {
                return Some(message);
            }
        }
    }
}

fn parse_line(line: &str, options: &ParseOptions) -> Option<Message> {
    let entry: RawEntry = serde_json::from_str(line).ok()?;
    let role = entry.kind.as_deref().and_then(Role::from_entry_type)?;
    let timestamp = entry.timestamp.as_deref().and_then(parse_timestamp)?;

    if let Some(filter) = options.date_filter
        && timestamp.date_naive() != filter
    {
        return None;
    }

    let raw_content = entry
        .message
        .and_then(|message| message.content)
        .unwrap_or_default();
    let extracted = content::extract_text(&raw_content);
    let cleaned = content::clean_content(&extracted);

    if options.exclude_system && content::is_system_message(&cleaned) {
        return None;
    }
    if options.exclude_tool_messages && content::is_tool_only_message(&cleaned) {
        return None;
    }
    if cleaned.trim().is_empty() {
        return None;
    }

    Some(Message {
        role,
        timestamp,
        content: cleaned.into_owned(),
    })
}

pub fn parse_timestamp(text: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(text.trim()).ok()
}

pub fn day_key(timestamp: &DateTime<FixedOffset>) -> DateTime<Utc> {
    timestamp
        .with_timezone(&Utc)
        .date_naive()
        .and_time(NaiveTime::MIN)
        .and_utc()
}

pub fn split_by_day(session: &ProjectSession) -> BTreeMap<DateTime<Utc>, ProjectSession> {
    let mut days: BTreeMap<DateTime<Utc>, Vec<Message>> = BTreeMap::new();
    for message in &session.messages {
        days.entry(day_key(&message.timestamp))
            .or_default()
            .push(message.clone());
    }

    days.into_iter()
        .map(|(day, messages)| {
            (
                day,
                ProjectSession {
                    messages,
                    ..session.clone_metadata()
                },
            )
        })
        .collect()
}
