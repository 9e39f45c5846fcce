//! Snapshot of the variables visible to `{$NAME}` / `${NAME}` references.
//!
//! The table is the process environment overlaid with a fixed set of
//! synthetic `___App*` entries. Synthetic entries always win over an OS
//! variable of the same name.

use std::collections::HashMap;

use strata_common::AppInfo;

pub const APP_PID: &str = "___AppPID";
pub const APP_VERSION: &str = "___AppVersion";
pub const APP_TAGS: &str = "___AppTags";
pub const APP_COPYRIGHT: &str = "___Copyright";
pub const APP_BUILD_TIME: &str = "___BuildTime";
pub const APP_NAME: &str = "___AppName";
pub const APP_FULL_NAME: &str = "___AppFullName";
pub const APP_EXEC_PATH: &str = "___AppExecPath";
pub const APP_EXEC_NAME: &str = "___AppExecName";
pub const APP_WORK_DIR: &str = "___AppWorkDir";

#[derive(Debug, Clone, Default)]
pub struct EnvironmentTable {
    vars: HashMap<String, String>,
}

impl EnvironmentTable {
    /// Capture the current process environment.
    pub fn capture(app: &AppInfo) -> Self {
        let os = std::env::vars_os().map(|(k, v)| {
            (
                k.to_string_lossy().into_owned(),
                v.to_string_lossy().into_owned(),
            )
        });
        Self::from_vars(app, os)
    }

    /// Build a table from explicit `(name, value)` pairs instead of the OS
    /// environment. Names and values are trimmed; empty names are dropped.
    pub fn from_vars<I, K, V>(app: &AppInfo, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let synthetic = synthetic_entries(app);
        let mut table: HashMap<String, String> = HashMap::new();

        for (name, value) in vars {
            let name = name.as_ref().trim();
            if name.is_empty() || synthetic.iter().any(|(k, _)| *k == name) {
                continue;
            }
            table.insert(name.to_string(), value.as_ref().trim().to_string());
        }

        for (name, value) in synthetic {
            table.insert(name.to_string(), value);
        }

        Self { vars: table }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

fn synthetic_entries(app: &AppInfo) -> [(&'static str, String); 10] {
    [
        (APP_PID, std::process::id().to_string()),
        (APP_VERSION, app.version.clone()),
        (APP_TAGS, app.tags.clone()),
        (APP_COPYRIGHT, app.copyright.clone()),
        (APP_BUILD_TIME, app.build_time.clone()),
        (APP_NAME, app.name.clone()),
        (APP_FULL_NAME, app.full_name.clone()),
        (APP_EXEC_PATH, app.exec_path.display().to_string()),
        (APP_EXEC_NAME, app.exec_name()),
        (APP_WORK_DIR, app.work_dir.display().to_string()),
    ]
}
