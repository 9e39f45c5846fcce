//! Identity of the running application.
//!
//! These values feed the synthetic `___App*` entries of the configuration
//! environment, so a config file can refer to `{$___AppName}` or
//! `{$___AppWorkDir}` without the operator exporting anything.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct AppInfo {
    pub name: String,
    pub full_name: String,
    pub version: String,
    pub tags: String,
    pub copyright: String,
    pub build_time: String,
    pub exec_path: PathBuf,
    pub work_dir: PathBuf,
}

impl AppInfo {
    /// Build an identity for `name`/`version`, capturing the executable path
    /// and the current working directory of this process.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        let name = name.into();
        let version = version.into();
        let exec_path = std::env::current_exe().unwrap_or_default();
        let work_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            full_name: format!("{name} {version}"),
            name,
            version,
            tags: String::new(),
            copyright: String::new(),
            build_time: option_env!("STRATA_BUILD_TIME").unwrap_or_default().to_string(),
            exec_path,
            work_dir,
        }
    }

    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = full_name.into();
        self
    }

    pub fn with_tags(mut self, tags: impl Into<String>) -> Self {
        self.tags = tags.into();
        self
    }

    pub fn with_copyright(mut self, copyright: impl Into<String>) -> Self {
        self.copyright = copyright.into();
        self
    }

    pub fn with_build_time(mut self, build_time: impl Into<String>) -> Self {
        self.build_time = build_time.into();
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    /// File name of the executable, or an empty string when unknown.
    pub fn exec_name(&self) -> String {
        self.exec_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Directory holding the executable; falls back to the work directory.
    pub fn exec_dir(&self) -> &Path {
        match self.exec_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => &self.work_dir,
        }
    }
}

impl Default for AppInfo {
    fn default() -> Self {
        Self::new("strata", env!("CARGO_PKG_VERSION"))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_name_combines_name_and_version() {
        let app = AppInfo::new("svc", "1.2.3");
        assert_eq!(app.full_name, "svc 1.2.3");
    }

    #[test]
    fn exec_dir_falls_back_to_work_dir() {
        let mut app = AppInfo::new("svc", "1").with_work_dir("/srv/svc");
        app.exec_path = PathBuf::new();
        assert_eq!(app.exec_dir(), Path::new("/srv/svc"));
        assert_eq!(app.exec_name(), "");
    }
}
