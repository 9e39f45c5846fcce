//! Locating and reading configuration sources.
//!
//! A source is looked up in the bundled archive first (when one is
//! configured) and then on the filesystem. Whatever comes back is
//! normalized: full-line `#` comments are dropped and backslash
//! continuations are folded into single lines.

use std::{
    fmt,
    path::{Component, Path, PathBuf},
};

use {include_dir::Dir, tracing::info};

use crate::error::{Error, Result};

/// Where a [`Source`] was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Bundle,
    Filesystem,
}

/// One normalized configuration file.
#[derive(Debug, Clone)]
pub struct Source {
    pub text: String,
    /// Absolute filesystem path, or the archive-relative path for bundled files.
    pub path: PathBuf,
    pub origin: Origin,
}

impl Source {
    /// Directory that relative includes inside this source resolve against.
    pub fn dir(&self) -> PathBuf {
        self.path.parent().map(Path::to_path_buf).unwrap_or_default()
    }

    pub(crate) fn same_file(&self, other: &Source) -> bool {
        self.origin == other.origin && self.path == other.path
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.origin {
            Origin::Bundle => write!(f, "bundle:{}", self.path.display()),
            Origin::Filesystem => write!(f, "{}", self.path.display()),
        }
    }
}

/// Resolves include paths and reads the files behind them.
#[derive(Debug, Clone)]
pub struct SourceReader {
    bundle: Option<&'static Dir<'static>>,
    exec_dir: PathBuf,
    work_dir: PathBuf,
}

impl SourceReader {
    pub fn new(exec_dir: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            bundle: None,
            exec_dir: exec_dir.into(),
            work_dir: work_dir.into(),
        }
    }

    pub fn with_bundle(mut self, bundle: &'static Dir<'static>) -> Self {
        self.bundle = Some(bundle);
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Read `path` relative to `base`.
    ///
    /// A missing file is `Ok(None)` when `mandatory` is false and
    /// [`Error::NotFound`] otherwise.
    pub fn read(&self, path: &str, base: &Path, mandatory: bool) -> Result<Option<Source>> {
        if let Some(source) = self.read_bundled(path, base) {
            return Ok(Some(source));
        }

        let resolved = self.resolve(path, base)?;
        let data = match std::fs::read(&resolved) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if mandatory {
                    return Err(Error::NotFound { path: resolved });
                }
                info!(path = %resolved.display(), "included file not found");
                return Ok(None);
            },
            Err(e) => return Err(Error::io(resolved, e)),
        };

        let expected = std::fs::metadata(&resolved)
            .map_err(|e| Error::io(&resolved, e))?
            .len();
        let got = data.len() as u64;
        if got < expected {
            return Err(Error::ShortRead {
                path: resolved,
                expected,
                got,
            });
        }

        let text = String::from_utf8(data).map_err(|_| Error::Utf8 {
            path: resolved.clone(),
        })?;

        Ok(Some(Source {
            text: normalize_source(&text),
            path: resolved,
            origin: Origin::Filesystem,
        }))
    }

    fn read_bundled(&self, path: &str, base: &Path) -> Option<Source> {
        let bundle = self.bundle?;
        let key = bundle_key(path)?;

        // Relative to the including bundled file first, then from the archive root.
        let mut candidates = Vec::with_capacity(2);
        if base.is_relative() && !base.as_os_str().is_empty() {
            candidates.push(lexical_normalize(&base.join(&key)));
        }
        candidates.push(key);

        candidates.into_iter().find_map(|candidate| {
            let file = bundle.get_file(&candidate)?;
            let text = file.contents_utf8()?;
            Some(Source {
                text: normalize_source(text),
                path: candidate,
                origin: Origin::Bundle,
            })
        })
    }

    /// Turn `path` into an absolute filesystem path.
    ///
    /// A leading `^` anchors the path at the executable's directory; other
    /// relative paths are joined onto `base`, which itself is anchored at the
    /// work directory when relative.
    pub fn resolve(&self, path: &str, base: &Path) -> Result<PathBuf> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(Error::PathResolve {
                path: path.to_string(),
                reason: "empty path".into(),
            });
        }

        let joined = if let Some(rest) = trimmed.strip_prefix('^') {
            self.exec_dir.join(rest.trim_start_matches(['/', '\\']))
        } else {
            let p = Path::new(trimmed);
            if p.is_absolute() {
                p.to_path_buf()
            } else if base.is_absolute() {
                base.join(p)
            } else {
                self.work_dir.join(base).join(p)
            }
        };

        if !joined.is_absolute() {
            return Err(Error::PathResolve {
                path: path.to_string(),
                reason: format!("{} is not absolute", joined.display()),
            });
        }

        Ok(lexical_normalize(&joined))
    }
}

fn bundle_key(path: &str) -> Option<PathBuf> {
    let trimmed = path.trim();
    let trimmed = trimmed.strip_prefix('^').unwrap_or(trimmed);
    let trimmed = trimmed.trim_start_matches("./");
    let p = Path::new(trimmed);
    if trimmed.is_empty() || p.has_root() {
        return None;
    }
    Some(lexical_normalize(p))
}

/// Drop `.` components and fold `..` without touching the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {},
            Component::ParentDir => {
                if !out.pop() && !out.has_root() {
                    out.push("..");
                }
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Strip full-line comments and fold backslash continuations.
///
/// A line whose first non-space character is `#` is removed. A line ending
/// in `\` (optionally followed by whitespace) is joined to the next non-blank
/// line with a single space. A stray continuation at the end of the text is
/// dropped.
pub fn normalize_source(raw: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut pending = false;

    for line in raw.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.trim_start().starts_with('#') {
            continue;
        }
        if pending && line.trim().is_empty() {
            continue;
        }

        let trimmed_end = line.trim_end();
        let (body, continues) = match trimmed_end.strip_suffix('\\') {
            Some(body) => (body.trim_end(), true),
            None => (trimmed_end, false),
        };

        if pending {
            current.push(' ');
            current.push_str(body.trim_start());
        } else {
            current.push_str(body);
        }

        pending = continues;
        if !pending {
            lines.push(std::mem::take(&mut current));
        }
    }

    if !current.is_empty() {
        lines.push(current);
    }

    lines.join("\n").trim().to_string()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[test]
    fn comments_and_continuations_are_folded() {
        let raw = "auth = { \\\nendpoints = [], \\\n\t\t\t# a comment   \n# another\nuser1 = \"a\", \\\n\tuser2 = \"b\", \\\t\t\n}\n";
        assert_eq!(
            normalize_source(raw),
            "auth = { endpoints = [], user1 = \"a\", user2 = \"b\", }"
        );
    }

    #[rstest]
    #[case("a = 1\n\n# x\nb = 2", "a = 1\n\nb = 2")]
    #[case("a = \\\n\n\n  1", "a = 1")]
    #[case("a = 1 \\", "a = 1")]
    #[case("   # only a comment", "")]
    #[case("a = 1\r\nb = 2\r\n", "a = 1\nb = 2")]
    fn normalize_cases(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_source(raw), expected);
    }

    #[test]
    fn normalizing_twice_is_stable() {
        let once = normalize_source("x = [1, \\\n 2]\n# c\ny = 3");
        assert_eq!(normalize_source(&once), once);
    }

    #[test]
    fn resolve_anchors_caret_at_exec_dir() {
        let reader = SourceReader::new("/opt/svc/bin", "/srv");
        let p = reader.resolve("^conf/app.toml", Path::new("/ignored")).unwrap();
        assert_eq!(p, PathBuf::from("/opt/svc/bin/conf/app.toml"));
    }

    #[test]
    fn resolve_joins_relative_base_onto_work_dir() {
        let reader = SourceReader::new("/opt", "/srv");
        let p = reader.resolve("../inc/x.toml", Path::new("conf")).unwrap();
        assert_eq!(p, PathBuf::from("/srv/inc/x.toml"));
    }

    #[test]
    fn resolve_rejects_empty_path() {
        let reader = SourceReader::new("/opt", "/srv");
        assert!(matches!(
            reader.resolve("  ", Path::new("/srv")),
            Err(Error::PathResolve { .. })
        ));
    }

    #[test]
    fn missing_optional_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let reader = SourceReader::new(dir.path(), dir.path());
        assert!(reader.read("nope.toml", dir.path(), false).unwrap().is_none());
        assert!(matches!(
            reader.read("nope.toml", dir.path(), true),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn reads_and_normalizes_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.toml"), "# head\nx = [1, \\\n  2]\n").unwrap();
        let reader = SourceReader::new(dir.path(), dir.path());
        let src = reader.read("a.toml", dir.path(), true).unwrap().unwrap();
        assert_eq!(src.text, "x = [1, 2]");
        assert_eq!(src.origin, Origin::Filesystem);
        assert_eq!(src.dir(), dir.path());
    }

    #[test]
    fn invalid_utf8_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bin.toml"), [0x66, 0xff, 0xfe]).unwrap();
        let reader = SourceReader::new(dir.path(), dir.path());
        assert!(matches!(
            reader.read("bin.toml", dir.path(), true),
            Err(Error::Utf8 { .. })
        ));
    }
}
