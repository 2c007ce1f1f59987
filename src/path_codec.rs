
use std::path::{Path, PathBuf};

const DELIMITER: char = '-';
const JOINERS: [char; 2] = ['.', '-'];

/// The encoding is lossy (`my-app` and `my/app` encode identically), so this is a
/// best-effort guess confirmed against the filesystem, never an error.
pub fn decode(encoded: &str) -> PathBuf {
    decode_with(encoded, |candidate| candidate.is_dir())
}

pub fn decode_with<F>(encoded: &str, is_dir: F) -> PathBuf
where
    F: Fn(&Path) -> bool,
{
    let Some(rest) = encoded.strip_prefix(DELIMITER) else {
        return PathBuf::from(encoded.replace(DELIMITER, "/"));
    };

    let tokens: Vec<&str> = rest.split(DELIMITER).collect();
    let root = PathBuf::from("/");
    let segments = resolve_segments(&tokens, &root, &is_dir);

    let mut path = root;
    for segment in segments {
        path.push(segment);
    }
    path
}

pub fn encode(path: &Path) -> String {
    path.to_string_lossy()
        .chars()
        .map(|ch| if ch == '/' || ch == '.' { DELIMITER } else { ch })
        .collect()
}

// Greedy, one pass over the tokens. `.` is tried before `-`.
fn resolve_segments<F>(tokens: &[&str], root: &Path, is_dir: &F) -> Vec<String>
where
    F: Fn(&Path) -> bool,
{
    let mut committed: Vec<String> = Vec::with_capacity(tokens.len());
    let mut prefix = root.to_path_buf();
    let mut idx = 0usize;

    while idx < tokens.len() {
        let mut segment = tokens[idx].to_string();
        let mut next = idx + 1;

        while next < tokens.len() {
            let extended = JOINERS.iter().find_map(|joiner| {
                let candidate = format!("{segment}{joiner}{}", tokens[next]);
                is_dir(&prefix.join(&candidate)).then_some(candidate)
            });
            match extended {
                Some(candidate) => {
                    segment = candidate;
                    next += 1;
                }
                None => break,
            }
        }

        prefix.push(&segment);
        committed.push(segment);
        idx = next;
    }

    committed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn probe(dirs: &[&str]) -> impl Fn(&Path) -> bool {
        let known: HashSet<PathBuf> = dirs.iter().map(PathBuf::from).collect();
        move |path: &Path| known.contains(path)
    }

    #[test]
    fn relative_names_use_plain_substitution() {
        assert_eq!(decode("projects-myapp"), PathBuf::from("projects/myapp"));
        assert_eq!(decode("a-b-c"), PathBuf::from("a/b/c"));
    }

    #[test]
    fn absolute_name_without_matches_falls_back_to_separators() {
        let decoded = decode_with("-Users-takeda-projects-myapp", |_| false);
        assert_eq!(decoded, PathBuf::from("/Users/takeda/projects/myapp"));
    }

    #[test]
    fn dotted_and_dashed_segments_are_recovered() {
        let is_dir = probe(&[
            "/Users",
            "/Users/takeda.takashi",
            "/Users/takeda.takashi/ghq",
            "/Users/takeda.takashi/ghq/github.com",
            "/Users/takeda.takashi/ghq/github.com/org",
            "/Users/takeda.takashi/ghq/github.com/org/my-repo",
        ]);
        let decoded = decode_with("-Users-takeda-takashi-ghq-github-com-org-my-repo", is_dir);
        assert_eq!(
            decoded,
            PathBuf::from("/Users/takeda.takashi/ghq/github.com/org/my-repo")
        );
    }

    #[test]
    fn dot_joiner_wins_over_dash_joiner() {
        let is_dir = probe(&["/srv/a.b", "/srv/a-b"]);
        assert_eq!(decode_with("-srv-a-b", is_dir), PathBuf::from("/srv/a.b"));
    }

    #[test]
    fn merge_keeps_extending_while_probes_succeed() {
        let is_dir = probe(&["/work/ai-image", "/work/ai-image-dashboard"]);
        assert_eq!(
            decode_with("-work-ai-image-dashboard-src", is_dir),
            PathBuf::from("/work/ai-image-dashboard/src")
        );
    }

    #[test]
    fn encode_then_decode_recovers_existing_directories() {
        let tmp = TempDir::new().expect("temp dir");
        let root = tmp.path().canonicalize().expect("canonical temp dir");
        let project = root.join("team.name").join("my-project").join("app");
        std::fs::create_dir_all(&project).expect("create project");

        let encoded = encode(&project);
        assert!(encoded.starts_with('-'));
        assert_eq!(decode(&encoded), project);
    }

    #[test]
    fn encode_replaces_separators_and_dots() {
        assert_eq!(
            encode(Path::new("/Users/me/github.com/repo")),
            "-Users-me-github-com-repo"
        );
    }
}
