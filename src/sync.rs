use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info};

use crate::collector::{self, CollectOptions};
use crate::config::JournalConfig;
use crate::git::GitProbe;
use crate::render;
use crate::session::{self, ParseOptions, ProjectSession};

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncRequest {
    pub since: Option<DateTime<Utc>>,
    pub date_filter: Option<NaiveDate>,
    pub dry_run: bool,
}

type GroupKey = (String, NaiveDate);

/// Render every `(project, day)` group touched by the request into the output
/// repository and return the file paths written, or that would be written on a dry run.
pub fn sync_logs(
    config: &JournalConfig,
    request: &SyncRequest,
    git: &mut dyn GitProbe,
) -> Result<Vec<PathBuf>> {
    let projects_dir = config.projects_dir();
    let mut options = CollectOptions {
        aliases: &config.projects.aliases,
        since: request.since,
        parse: ParseOptions {
            exclude_system: config.sync.exclude_system,
            exclude_tool_messages: config.sync.exclude_tool_messages,
            date_filter: request.date_filter,
        },
    };

    let changed = collector::collect_sessions(&projects_dir, &options, git)?;
    if changed.is_empty() {
        debug!(root = %projects_dir.display(), "no sessions to sync");
        return Ok(Vec::new());
    }

    let (sessions, affected) = match request.since {
        None => (changed, None),
        Some(_) => {
            let affected: BTreeSet<GroupKey> =
                expand(changed.iter().cloned(), config.sync.split_by_day)
                    .iter()
                    .filter_map(group_key)
                    .collect();
            let names: BTreeSet<&str> = affected.iter().map(|(name, _)| name.as_str()).collect();

            // A rewritten document holds every session of its project, including unchanged
            // files and other directories that resolve to the same name.
            options.since = None;
            let mut full = Vec::new();
            for dir in collector::project_dirs(&projects_dir) {
                let name = collector::project_name(&dir, options.aliases, git);
                if names.contains(name.as_str()) {
                    full.extend(collector::collect_project(&dir, &options, git)?);
                }
            }
            (full, Some(affected))
        }
    };

    let mut groups: BTreeMap<GroupKey, Vec<ProjectSession>> = BTreeMap::new();
    for session in expand(sessions.into_iter(), config.sync.split_by_day) {
        let Some(key) = group_key(&session) else {
            continue;
        };
        if affected.as_ref().is_some_and(|keys| !keys.contains(&key)) {
            continue;
        }
        groups.entry(key).or_default().push(session);
    }

    let mut written = Vec::with_capacity(groups.len());
    for ((project_name, date), sessions) in &groups {
        let path = render::generate_output_path(
            &config.output.repository,
            config.output.structure,
            project_name,
            *date,
        );
        if !request.dry_run {
            let refs: Vec<&ProjectSession> = sessions.iter().collect();
            let document = render::render_document(project_name, *date, &refs);
            render::write_markdown_file(&path, &document)?;
            debug!(path = %path.display(), sessions = sessions.len(), "wrote journal file");
        }
        written.push(path);
    }

    info!(
        files = written.len(),
        dry_run = request.dry_run,
        "sync pass finished"
    );
    Ok(written)
}

fn expand<I>(sessions: I, split_by_day: bool) -> Vec<ProjectSession>
where
    I: Iterator<Item = ProjectSession>,
{
    if !split_by_day {
        return sessions.collect();
    }
    sessions
        .flat_map(|session| session::split_by_day(&session).into_values())
        .collect()
}

fn group_key(session: &ProjectSession) -> Option<GroupKey> {
    let start = session.start_time()?;
    Some((
        session.project_name.clone(),
        session::day_key(&start).date_naive(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::tests::FakeGit;
    use crate::config::OutputStructure;
    use std::fs;
    use std::path::Path;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        config: JournalConfig,
        project_dir: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().expect("temp dir");
            let projects = tmp.path().join("projects");
            let project_dir = projects.join("-nowhere-app");
            fs::create_dir_all(&project_dir).expect("create project dir");

            let mut config = JournalConfig::default();
            config.output.repository = tmp.path().join("journal");
            config.output.structure = OutputStructure::Date;
            config.sync.projects_dir = Some(projects);
            Self {
                _tmp: tmp,
                config,
                project_dir,
            }
        }

        fn write(&self, name: &str, lines: &[&str]) -> PathBuf {
            let path = self.project_dir.join(name);
            fs::write(&path, lines.join("\n") + "\n").expect("write session");
            path
        }

        fn output(&self, relative: &str) -> PathBuf {
            self.config.output.repository.join(relative)
        }

        fn sync(&self, request: SyncRequest) -> Vec<PathBuf> {
            sync_logs(&self.config, &request, &mut FakeGit::default()).expect("sync")
        }
    }

    fn mtime(path: &Path) -> DateTime<Utc> {
        fs::metadata(path)
            .and_then(|meta| meta.modified())
            .expect("mtime")
            .into()
    }

    fn write_after(path: &Path, lines: &[&str], since: DateTime<Utc>) {
        for _ in 0..40 {
            fs::write(path, lines.join("\n") + "\n").expect("write session");
            if mtime(path) > since {
                return;
            }
            thread::sleep(Duration::from_millis(50));
        }
        panic!("mtime of {} never passed {since}", path.display());
    }

    #[test]
    fn one_session_becomes_one_document() {
        let fixture = Fixture::new();
        fixture.write(
            "abc12345-0000.jsonl",
            &[
                r#"{"type":"user","timestamp":"2024-01-15T10:30:00Z","message":{"content":"How do I sort?"}}"#,
                r#"{"type":"assistant","timestamp":"2024-01-15T10:30:15Z","message":{"content":"<system-reminder>hidden</system-reminder>"}}"#,
                r#"{"type":"assistant","timestamp":"2024-01-15T10:31:00Z","message":{"content":[{"type":"text","text":"Use sort()."}]}}"#,
            ],
        );

        let written = fixture.sync(SyncRequest::default());
        let expected = fixture.output("2024/01/15/_local-app.md");
        assert_eq!(written, vec![expected.clone()]);

        let document = fs::read_to_string(&expected).expect("read document");
        assert!(document.starts_with("# _local-app - 2024-01-15\n\n"));
        assert!(document.contains("## Session: abc12345 (10:30 - 10:31)"));
        assert!(document.contains("### 10:30:00 User\n\nHow do I sort?\n"));
        assert!(document.contains("### 10:31:00 Assistant\n\nUse sort().\n"));
        assert!(!document.contains("system-reminder"));
    }

    #[test]
    fn sessions_crossing_midnight_are_split_into_daily_files() {
        let fixture = Fixture::new();
        fixture.write(
            "night.jsonl",
            &[
                r#"{"type":"user","timestamp":"2024-01-15T23:50:00Z","message":{"content":"before midnight"}}"#,
                r#"{"type":"assistant","timestamp":"2024-01-16T00:10:00Z","message":{"content":"after midnight"}}"#,
            ],
        );

        let written = fixture.sync(SyncRequest::default());
        assert_eq!(
            written,
            vec![
                fixture.output("2024/01/15/_local-app.md"),
                fixture.output("2024/01/16/_local-app.md"),
            ]
        );

        let first = fs::read_to_string(&written[0]).expect("first day");
        let second = fs::read_to_string(&written[1]).expect("second day");
        assert!(first.contains("before midnight") && !first.contains("after midnight"));
        assert!(second.contains("after midnight") && !second.contains("before midnight"));
    }

    #[test]
    fn without_splitting_a_session_stays_on_its_first_day() {
        let mut fixture = Fixture::new();
        fixture.config.sync.split_by_day = false;
        fixture.write(
            "night.jsonl",
            &[
                r#"{"type":"user","timestamp":"2024-01-15T23:50:00Z","message":{"content":"before midnight"}}"#,
                r#"{"type":"assistant","timestamp":"2024-01-16T00:10:00Z","message":{"content":"after midnight"}}"#,
            ],
        );

        let written = fixture.sync(SyncRequest::default());
        assert_eq!(written, vec![fixture.output("2024/01/15/_local-app.md")]);
        let document = fs::read_to_string(&written[0]).expect("document");
        assert!(document.contains("(23:50 - 00:10 (+1))"));
    }

    #[test]
    fn unchanged_files_after_the_watermark_write_nothing() {
        let fixture = Fixture::new();
        fixture.write(
            "s1.jsonl",
            &[r#"{"type":"user","timestamp":"2024-01-15T10:30:00Z","message":{"content":"hi"}}"#],
        );
        assert_eq!(fixture.sync(SyncRequest::default()).len(), 1);

        let request = SyncRequest {
            since: Some(Utc::now() + chrono::TimeDelta::seconds(5)),
            ..SyncRequest::default()
        };
        assert!(fixture.sync(request).is_empty());
    }

    #[test]
    fn incremental_sync_rerenders_whole_day_files() {
        let fixture = Fixture::new();
        fixture.write(
            "cccccccc-other-day.jsonl",
            &[r#"{"type":"user","timestamp":"2024-01-20T09:00:00Z","message":{"content":"other day"}}"#],
        );
        let first = fixture.write(
            "aaaaaaaa-first.jsonl",
            &[r#"{"type":"user","timestamp":"2024-01-15T09:00:00Z","message":{"content":"morning"}}"#],
        );
        assert_eq!(fixture.sync(SyncRequest::default()).len(), 2);

        let since = mtime(&first);
        write_after(
            &fixture.project_dir.join("bbbbbbbb-second.jsonl"),
            &[r#"{"type":"user","timestamp":"2024-01-15T15:00:00Z","message":{"content":"afternoon"}}"#],
            since,
        );

        let written = fixture.sync(SyncRequest {
            since: Some(since),
            ..SyncRequest::default()
        });
        let day_file = fixture.output("2024/01/15/_local-app.md");
        assert_eq!(written, vec![day_file.clone()]);

        let document = fs::read_to_string(&day_file).expect("day file");
        let morning = document.find("morning").expect("unchanged session kept");
        let afternoon = document.find("afternoon").expect("new session added");
        assert!(morning < afternoon);
    }

    #[test]
    fn incremental_sync_keeps_sessions_from_other_clones_of_the_same_repo() {
        let fixture = Fixture::new();
        let projects = fixture.config.projects_dir();
        let clone_a = projects.join("-nowhere-clonea");
        let clone_b = projects.join("-nowhere-cloneb");
        fs::create_dir_all(&clone_a).expect("clone a");
        fs::create_dir_all(&clone_b).expect("clone b");

        let mut git = FakeGit::default();
        for path in ["/nowhere/clonea", "/nowhere/cloneb"] {
            git.remotes
                .insert(PathBuf::from(path), "git@github.com:u/r.git".to_string());
        }

        let from_b = [r#"{"type":"user","timestamp":"2024-01-15T11:00:00Z","message":{"content":"from clone b"}}"#];
        let from_a = [r#"{"type":"user","timestamp":"2024-01-15T10:00:00Z","message":{"content":"from clone a"}}"#];
        fs::write(clone_b.join("bbbbbbbb.jsonl"), from_b.join("\n")).expect("write b");
        let session_a = clone_a.join("aaaaaaaa.jsonl");
        fs::write(&session_a, from_a.join("\n")).expect("write a");

        let document = fixture.output("2024/01/15/github.com-u-r.md");
        let written = sync_logs(&fixture.config, &SyncRequest::default(), &mut git).expect("full sync");
        assert_eq!(written, vec![document.clone()]);

        let since = mtime(&session_a);
        write_after(
            &session_a,
            &[
                from_a[0],
                r#"{"type":"assistant","timestamp":"2024-01-15T10:05:00Z","message":{"content":"more from clone a"}}"#,
            ],
            since,
        );

        let request = SyncRequest {
            since: Some(since),
            ..SyncRequest::default()
        };
        let written = sync_logs(&fixture.config, &request, &mut git).expect("incremental sync");
        assert_eq!(written, vec![document.clone()]);

        let rendered = fs::read_to_string(&document).expect("document");
        assert!(rendered.contains("more from clone a"));
        assert!(rendered.contains("from clone b"));
    }

    #[test]
    fn dry_run_reports_paths_without_writing() {
        let mut fixture = Fixture::new();
        fixture.config.output.structure = OutputStructure::Project;
        fixture.write(
            "s1.jsonl",
            &[r#"{"type":"user","timestamp":"2024-01-15T10:30:00Z","message":{"content":"hi"}}"#],
        );

        let written = fixture.sync(SyncRequest {
            dry_run: true,
            ..SyncRequest::default()
        });
        assert_eq!(written, vec![fixture.output("_local-app/2024-01-15.md")]);
        assert!(!written[0].exists());
    }

    #[test]
    fn date_filter_limits_output_to_one_day() {
        let fixture = Fixture::new();
        fixture.write(
            "s1.jsonl",
            &[
                r#"{"type":"user","timestamp":"2024-01-15T10:30:00Z","message":{"content":"day one"}}"#,
                r#"{"type":"user","timestamp":"2024-01-16T10:30:00Z","message":{"content":"day two"}}"#,
            ],
        );

        let written = fixture.sync(SyncRequest {
            date_filter: NaiveDate::from_ymd_opt(2024, 1, 16),
            ..SyncRequest::default()
        });
        assert_eq!(written, vec![fixture.output("2024/01/16/_local-app.md")]);
    }
}
