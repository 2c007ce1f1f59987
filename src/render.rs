use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate, Utc};

use crate::config::OutputStructure;
use crate::session::{Message, ProjectSession};

pub fn sanitize_project_name(name: &str) -> String {
    name.replace(['/', '\\'], "-")
}

pub fn generate_output_path(
    root: &Path,
    structure: OutputStructure,
    project_name: &str,
    date: NaiveDate,
) -> PathBuf {
    let safe_name = sanitize_project_name(project_name);
    match structure {
        OutputStructure::Date => root
            .join(format!("{:04}", date.year()))
            .join(format!("{:02}", date.month()))
            .join(format!("{:02}", date.day()))
            .join(format!("{safe_name}.md")),
        OutputStructure::Project => root
            .join(safe_name)
            .join(format!("{}.md", date.format("%Y-%m-%d"))),
    }
}

pub fn format_message_markdown(message: &Message) -> String {
    format!(
        "### {} {}\n\n{}\n",
        message.timestamp.format("%H:%M:%S"),
        message.role.title(),
        message.content
    )
}

pub fn format_session_markdown(session: &ProjectSession) -> String {
    let (Some(start), Some(end)) = (session.start_time(), session.end_time()) else {
        return String::new();
    };

    let mut time_range = format!("{} - {}", start.format("%H:%M"), end.format("%H:%M"));
    let day_diff = (end.with_timezone(&Utc).date_naive() - start.with_timezone(&Utc).date_naive())
        .num_days();
    if day_diff > 0 {
        time_range.push_str(&format!(" (+{day_diff})"));
    }

    let short_id: String = session.session_id.chars().take(8).collect();
    let mut metadata = Vec::with_capacity(2);
    if let Some(branch) = session.branch.as_deref().filter(|b| !b.is_empty()) {
        metadata.push(format!("**Branch:** {branch}"));
    }
    metadata.push(format!("**Path:** {}", session.project_path.display()));

    let mut lines = Vec::with_capacity(session.messages.len() + 4);
    lines.push(format!("## Session: {short_id} ({time_range})"));
    lines.push(metadata.join(" | "));
    lines.push(String::new());
    lines.extend(session.messages.iter().map(format_message_markdown));
    lines.push("---\n".to_string());
    lines.join("\n")
}

pub fn render_document(project_name: &str, date: NaiveDate, sessions: &[&ProjectSession]) -> String {
    let mut ordered: Vec<&ProjectSession> = sessions
        .iter()
        .copied()
        .filter(|session| !session.messages.is_empty())
        .collect();
    ordered.sort_by_key(|session| session.start_time());

    let mut document = format!("# {project_name} - {}\n\n", date.format("%Y-%m-%d"));
    for session in ordered {
        document.push_str(&format_session_markdown(session));
    }
    document
}

/// Replace `path` wholesale, creating parent directories as needed.
pub fn write_markdown_file(path: &Path, document: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory {}", parent.display()))?;
    }
    fs::write(path, document).with_context(|| format!("failed to write {}", path.display()))
}
