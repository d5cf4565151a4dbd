//! Filesystem tool implementations behind the dispatcher.
//!
//! Every operation returns either its textual result or an [`FsError`]
//! describing exactly what went wrong; the dispatcher renders both through
//! the same result-block channel.

use std::fmt::Write as _;
use std::path::Path;

use regex_lite::Regex;
use walkdir::WalkDir;

/// Failure conditions for filesystem tools.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("is a directory: {0}")]
    IsDirectory(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("no match for the given string in {0}")]
    NoMatch(String),
    #[error("ambiguous match: {count} occurrences in {path}, expected exactly one")]
    AmbiguousMatch { path: String, count: usize },
    #[error("invalid pattern: {0}")]
    BadPattern(String),
    #[error("io error on {path}: {message}")]
    Io { path: String, message: String },
}

fn io_error(path: &Path, err: &std::io::Error) -> FsError {
    let display = path.display().to_string();
    match err.kind() {
        std::io::ErrorKind::NotFound => FsError::NotFound(display),
        std::io::ErrorKind::PermissionDenied => FsError::PermissionDenied(display),
        _ => FsError::Io {
            path: display,
            message: err.to_string(),
        },
    }
}

/// List one directory, sorted, directories suffixed with `/`.
pub fn list_dir(path: &Path) -> Result<String, FsError> {
    let metadata = std::fs::metadata(path).map_err(|err| io_error(path, &err))?;
    if !metadata.is_dir() {
        return Err(FsError::NotADirectory(path.display().to_string()));
    }
    let mut entries: Vec<String> = Vec::new();
    for entry in std::fs::read_dir(path).map_err(|err| io_error(path, &err))? {
        let entry = entry.map_err(|err| io_error(path, &err))?;
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            name.push('/');
        }
        entries.push(name);
    }
    entries.sort_unstable();
    if entries.is_empty() {
        return Ok(format!("{} is empty", path.display()));
    }
    Ok(entries.join("\n"))
}

/// Find files under `root` whose relative path matches `query`.
///
/// `query` is a glob (`**`, `*`, `?`) when it contains glob metacharacters,
/// otherwise a plain substring match on the relative path.
pub fn file_search(root: &Path, query: &str, max_results: usize) -> Result<String, FsError> {
    let glob = if query.contains(['*', '?']) {
        Some(glob_to_regex(query)?)
    } else {
        None
    };

    let mut matches: Vec<String> = Vec::new();
    for entry in walk(root) {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or_else(|_| entry.path())
            .to_string_lossy()
            .into_owned();
        let matched = match &glob {
            Some(regex) => regex.is_match(&relative),
            None => relative.contains(query),
        };
        if matched {
            matches.push(relative);
            if matches.len() >= max_results {
                break;
            }
        }
    }

    if matches.is_empty() {
        return Ok(format!("No files matching '{query}'"));
    }
    Ok(matches.join("\n"))
}

/// Search file contents under `root`, reporting `path:line: text` matches.
pub fn grep_search(
    root: &Path,
    query: &str,
    is_regexp: bool,
    include_pattern: Option<&str>,
    max_results: usize,
) -> Result<String, FsError> {
    let regex = if is_regexp {
        Some(Regex::new(query).map_err(|err| FsError::BadPattern(err.to_string()))?)
    } else {
        None
    };
    let include = include_pattern
        .filter(|pattern| !pattern.is_empty())
        .map(glob_to_regex)
        .transpose()?;

    let mut out = String::new();
    let mut count = 0usize;
    'files: for entry in walk(root) {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or_else(|_| entry.path())
            .to_string_lossy()
            .into_owned();
        if let Some(include) = &include {
            if !include.is_match(&relative) {
                continue;
            }
        }
        // Binary or unreadable files are skipped silently.
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        for (line_index, line) in content.lines().enumerate() {
            let matched = match &regex {
                Some(regex) => regex.is_match(line),
                None => line.contains(query),
            };
            if matched {
                let _ = writeln!(out, "{relative}:{}: {line}", line_index + 1);
                count += 1;
                if count >= max_results {
                    break 'files;
                }
            }
        }
    }

    if count == 0 {
        return Ok(format!("No matches for '{query}'"));
    }
    Ok(out.trim_end().to_string())
}

/// Read a file, optionally a 1-based line range.
pub fn read_file(
    path: &Path,
    start_line: Option<usize>,
    line_count: Option<usize>,
) -> Result<String, FsError> {
    let metadata = std::fs::metadata(path).map_err(|err| io_error(path, &err))?;
    if metadata.is_dir() {
        return Err(FsError::IsDirectory(path.display().to_string()));
    }
    let content = std::fs::read_to_string(path).map_err(|err| io_error(path, &err))?;
    match (start_line, line_count) {
        (None, None) => Ok(content),
        (start, count) => {
            let skip = start.map_or(0, |line| line.saturating_sub(1));
            let take = count.unwrap_or(usize::MAX);
            let selected: Vec<&str> = content.lines().skip(skip).take(take).collect();
            Ok(selected.join("\n"))
        }
    }
}

/// Create a new file; refuses to overwrite an existing one.
pub fn create_file(path: &Path, content: &str) -> Result<String, FsError> {
    if path.exists() {
        return Err(FsError::AlreadyExists(path.display().to_string()));
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|err| io_error(parent, &err))?;
        }
    }
    std::fs::write(path, content).map_err(|err| io_error(path, &err))?;
    Ok(format!("Created {}", path.display()))
}

/// Replace exactly one occurrence of `old` with `new`.
pub fn replace_string_in_file(path: &Path, old: &str, new: &str) -> Result<String, FsError> {
    let content = std::fs::read_to_string(path).map_err(|err| io_error(path, &err))?;
    let count = content.matches(old).count();
    match count {
        0 => Err(FsError::NoMatch(path.display().to_string())),
        1 => {
            let updated = content.replacen(old, new, 1);
            std::fs::write(path, updated).map_err(|err| io_error(path, &err))?;
            Ok(format!("Replaced 1 occurrence in {}", path.display()))
        }
        count => Err(FsError::AmbiguousMatch {
            path: path.display().to_string(),
            count,
        }),
    }
}

fn walk(root: &Path) -> impl Iterator<Item = walkdir::Result<walkdir::DirEntry>> {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            let skip = entry.file_type().is_dir()
                && (name.starts_with('.') || name == "target" || name == "node_modules");
            !skip
        })
}

/// Translate a glob (`**`, `*`, `?`) into an anchored regex over a relative
/// path string.
fn glob_to_regex(pattern: &str) -> Result<Regex, FsError> {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push('^');
    // A leading `**/` also matches entries at the root itself.
    let mut rest = pattern;
    if let Some(stripped) = rest.strip_prefix("**/") {
        regex.push_str("(?:.*/)?");
        rest = stripped;
    }
    let mut chars = rest.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    regex.push_str(".*");
                } else {
                    regex.push_str("[^/]*");
                }
            }
            '?' => regex.push_str("[^/]"),
            '.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|' | '\\' => {
                regex.push('\\');
                regex.push(ch);
            }
            other => regex.push(other),
        }
    }
    regex.push('$');
    Regex::new(&regex).map_err(|err| FsError::BadPattern(err.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("alpha.txt"), "one\ntwo needle\nthree\n").unwrap();
        fs::write(dir.path().join("beta.rs"), "fn main() {}\n").unwrap();
        fs::write(dir.path().join("sub/gamma.txt"), "needle here\n").unwrap();
        dir
    }

    #[test]
    fn list_dir_sorts_and_marks_directories() {
        let dir = fixture();
        let listing = list_dir(dir.path()).expect("list");
        assert_eq!(listing, "alpha.txt\nbeta.rs\nsub/");
    }

    #[test]
    fn list_dir_missing_path_is_not_found() {
        let dir = fixture();
        let err = list_dir(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, FsError::NotFound(_)));
    }

    #[test]
    fn list_dir_on_file_is_not_a_directory() {
        let dir = fixture();
        let err = list_dir(&dir.path().join("alpha.txt")).unwrap_err();
        assert!(matches!(err, FsError::NotADirectory(_)));
    }

    #[test]
    fn file_search_substring_and_glob() {
        let dir = fixture();
        let found = file_search(dir.path(), "gamma", 50).expect("search");
        assert!(found.contains("sub/gamma.txt"));

        let found = file_search(dir.path(), "**/*.txt", 50).expect("glob");
        assert!(found.contains("alpha.txt"));
        assert!(found.contains("sub/gamma.txt"));
        assert!(!found.contains("beta.rs"));
    }

    #[test]
    fn file_search_respects_max_results() {
        let dir = fixture();
        let found = file_search(dir.path(), "**/*.txt", 1).expect("glob");
        assert_eq!(found.lines().count(), 1);
    }

    #[test]
    fn grep_search_literal_reports_path_line_text() {
        let dir = fixture();
        let found = grep_search(dir.path(), "needle", false, None, 50).expect("grep");
        assert!(found.contains("alpha.txt:2: two needle"));
        assert!(found.contains("sub/gamma.txt:1: needle here"));
    }

    #[test]
    fn grep_search_regex_and_include_pattern() {
        let dir = fixture();
        let found =
            grep_search(dir.path(), "need.e", true, Some("sub/*.txt"), 50).expect("grep");
        assert!(found.contains("sub/gamma.txt"));
        assert!(!found.contains("alpha.txt"));
    }

    #[test]
    fn grep_search_bad_regex_is_reported() {
        let dir = fixture();
        let err = grep_search(dir.path(), "a(", true, None, 50).unwrap_err();
        assert!(matches!(err, FsError::BadPattern(_)));
    }

    #[test]
    fn read_file_full_and_range() {
        let dir = fixture();
        let path = dir.path().join("alpha.txt");
        assert_eq!(read_file(&path, None, None).unwrap(), "one\ntwo needle\nthree\n");
        assert_eq!(read_file(&path, Some(2), Some(1)).unwrap(), "two needle");
    }

    #[test]
    fn read_file_on_directory_is_is_directory() {
        let dir = fixture();
        let err = read_file(&dir.path().join("sub"), None, None).unwrap_err();
        assert!(matches!(err, FsError::IsDirectory(_)));
    }

    #[test]
    fn create_file_refuses_overwrite_and_makes_parents() {
        let dir = fixture();
        let fresh = dir.path().join("deep/new.txt");
        create_file(&fresh, "content").expect("create");
        assert_eq!(fs::read_to_string(&fresh).unwrap(), "content");

        let err = create_file(&dir.path().join("alpha.txt"), "x").unwrap_err();
        assert!(matches!(err, FsError::AlreadyExists(_)));
    }

    #[test]
    fn replace_string_exactly_one_match() {
        let dir = fixture();
        let path = dir.path().join("beta.rs");
        replace_string_in_file(&path, "main", "start").expect("replace");
        assert_eq!(fs::read_to_string(&path).unwrap(), "fn start() {}\n");
    }

    #[test]
    fn replace_string_no_match_and_ambiguous() {
        let dir = fixture();
        let path = dir.path().join("alpha.txt");
        assert!(matches!(
            replace_string_in_file(&path, "absent", "x").unwrap_err(),
            FsError::NoMatch(_)
        ));
        assert!(matches!(
            replace_string_in_file(&path, "e", "x").unwrap_err(),
            FsError::AmbiguousMatch { .. }
        ));
    }
}
