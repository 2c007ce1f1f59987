use std::borrow::Cow;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::Deserialize;
use serde_json::Value;

pub const TOOL_RESULT_MARKER: &str = "[Tool Result]";

const SYSTEM_TAG_MARKERS: [&str; 4] = [
    "<system-reminder>",
    "</system-reminder>",
    "<local-command-",
    "</local-command-",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
    Part(Value),
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ContentPart {
    Plain(String),
    Block(ContentBlock),
    Unknown(Value),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        #[serde(default)]
        name: Option<String>,
    },
    ToolResult {},
}

impl ContentBlock {
    fn to_fragment(&self) -> String {
        match self {
            Self::Text { text } => text.clone(),
            Self::ToolUse { name } => {
                format!("[Tool: {}]", name.as_deref().unwrap_or("unknown"))
            }
            Self::ToolResult {} => TOOL_RESULT_MARKER.to_string(),
        }
    }
}

pub fn extract_text(content: &MessageContent) -> String {
    match content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Plain(text) => Some(text.clone()),
                ContentPart::Block(block) => Some(block.to_fragment()),
                ContentPart::Unknown(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        MessageContent::Part(value) => match value.get("type").and_then(Value::as_str) {
            Some("text") => value
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            _ => value.to_string(),
        },
    }
}

// Substring search only, the text is never parsed as markup.
pub fn is_system_message(text: &str) -> bool {
    SYSTEM_TAG_MARKERS.iter().any(|marker| text.contains(marker))
}

pub fn is_tool_only_message(text: &str) -> bool {
    let mut lines = text.lines().map(str::trim).filter(|line| !line.is_empty()).peekable();
    if lines.peek().is_none() {
        return false;
    }
    lines.all(|line| line == TOOL_RESULT_MARKER || tool_marker_regex().is_match(line))
}

#[derive(Debug, Clone, Copy)]
enum TagAction {
    KeepInner,
    Drop,
}

const WRAPPER_TAGS: [(&str, TagAction); 9] = [
    ("command-name", TagAction::KeepInner),
    ("command-args", TagAction::KeepInner),
    ("command-message", TagAction::Drop),
    ("bash-input", TagAction::KeepInner),
    ("bash-stdout", TagAction::KeepInner),
    ("bash-stderr", TagAction::KeepInner),
    ("local-command-stdout", TagAction::Drop),
    ("local-command-stderr", TagAction::Drop),
    ("local-command-output", TagAction::Drop),
];

pub fn clean_content(text: &str) -> Cow<'_, str> {
    if !text.contains('<') {
        return Cow::Borrowed(text);
    }

    let mut current: Cow<'_, str> = Cow::Borrowed(text);
    let mut changed = false;
    for (regex, action) in wrapper_regexes() {
        if !regex.is_match(&current) {
            continue;
        }
        let replaced = regex
            .replace_all(&current, |caps: &Captures<'_>| match action {
                TagAction::KeepInner => caps[1].trim().to_string(),
                TagAction::Drop => String::new(),
            })
            .into_owned();
        current = Cow::Owned(replaced);
        changed = true;
    }

    if changed && current.trim().is_empty() {
        return Cow::Owned(String::new());
    }
    current
}

fn tool_marker_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^\[Tool: [^\]\n]*\]$").expect("valid tool marker regex"))
}

fn wrapper_regexes() -> &'static [(Regex, TagAction)] {
    static REGEXES: OnceLock<Vec<(Regex, TagAction)>> = OnceLock::new();
    REGEXES.get_or_init(|| {
        WRAPPER_TAGS
            .iter()
            .map(|(tag, action)| {
                let pattern = format!(r"(?s)<{tag}>(.*?)</{tag}>");
                (Regex::new(&pattern).expect("valid wrapper tag regex"), *action)
            })
            .collect()
    })
}
