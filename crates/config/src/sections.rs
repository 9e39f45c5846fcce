//! Standard sections shared by every service configuration.

use std::{borrow::Cow, collections::BTreeSet};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    auth::Auth,
    duration::Duration,
    error::{Error, Messages, Result},
    validate::{Validate, ValidationContext},
};

pub const DEFAULT_LOAD_AVG_PERIOD: i64 = 60;
pub const LISTENER_DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DB_DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A decoded root configuration.
///
/// The loader calls [`common`](Self::common) and [`listener`](Self::listener)
/// after every successful decode and caches what they return, so code far
/// from the root can reach those sections through the context.
pub trait ConfigRoot: DeserializeOwned + Clone + Send + Sync + 'static {
    fn common(&self) -> Option<&Common> {
        None
    }

    fn listener(&self) -> Option<&Listener> {
        None
    }
}

/// Trim, turn `\` into `/`, collapse repeated slashes and drop a trailing one
/// unless the path is just `/`. Prefixes such as `!` are kept as written.
pub fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.trim().chars() {
        let c = if c == '\\' { '/' } else { c };
        if c == '/' && out.ends_with('/') {
            continue;
        }
        out.push(c);
    }
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

fn endpoint_set(paths: &[String]) -> BTreeSet<String> {
    paths
        .iter()
        .map(|p| normalize_path(p))
        .filter(|p| !p.is_empty())
        .collect()
}

// ── Common ──────────────────────────────────────────────────────────────────

/// Process-wide settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Common {
    pub name: String,
    pub description: String,
    pub class: String,

    pub log_local_time: bool,
    pub log_dir: String,
    pub log_level: String,
    pub log_buffer_size: i64,
    pub log_buffer_delay: i64,

    pub max_threads: i64,

    pub mem_stats_period: i64,
    pub mem_stats_level: String,

    pub load_avg_period: i64,

    pub profiler_enabled: bool,
    pub deep_profiling: bool,

    #[serde(rename = "disabled-endpoints")]
    pub disabled_endpoint_list: Vec<String>,
    #[serde(skip)]
    pub disabled_endpoints: BTreeSet<String>,
}

impl Common {
    pub fn is_endpoint_disabled(&self, path: &str) -> bool {
        self.disabled_endpoints.contains(&normalize_path(path))
    }
}

impl Validate for Common {
    fn validate(&mut self, cx: &ValidationContext<'_>) -> Result<()> {
        if self.name.trim().is_empty() {
            self.name = cx.app.name.clone();
        }
        if self.load_avg_period <= 0 {
            self.load_avg_period = DEFAULT_LOAD_AVG_PERIOD;
        }
        self.disabled_endpoints = endpoint_set(&self.disabled_endpoint_list);
        Ok(())
    }

    fn section_name(&self) -> Cow<'static, str> {
        "common".into()
    }
}

// ── Listener ────────────────────────────────────────────────────────────────

/// The primary HTTP listener.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Listener {
    pub bind_addr: String,
    /// Certificate and key in one PEM file; enables TLS when set.
    pub ssl_combined_pem: String,
    pub timeout: Duration,
    pub root: String,
    pub proxy_prefix: String,
    pub icon_file: String,

    #[serde(rename = "disabled-endpoints")]
    pub disabled_endpoint_list: Vec<String>,
    #[serde(skip)]
    pub disabled_endpoints: BTreeSet<String>,

    pub basic_auth_enabled: bool,
    pub auth: Auth,
}

impl Listener {
    pub fn is_tls(&self) -> bool {
        !self.ssl_combined_pem.is_empty()
    }
}

impl Validate for Listener {
    fn validate(&mut self, cx: &ValidationContext<'_>) -> Result<()> {
        let mut problems = Messages::new();

        self.bind_addr = self.bind_addr.trim().to_string();
        self.ssl_combined_pem = self.ssl_combined_pem.trim().to_string();
        if self.bind_addr.is_empty() {
            self.bind_addr = if self.is_tls() { ":443" } else { ":80" }.to_string();
        }
        if self.timeout.is_zero() {
            self.timeout = LISTENER_DEFAULT_TIMEOUT;
        }
        if !self.proxy_prefix.trim().is_empty() {
            self.proxy_prefix = normalize_path(&self.proxy_prefix);
        }
        self.disabled_endpoints = endpoint_set(&self.disabled_endpoint_list);

        let auth_name = self.auth.section_name();
        if let Err(e) = self.auth.validate(cx) {
            problems.extend_prefixed(&auth_name, Messages::from(e));
        }
        if self.basic_auth_enabled && self.auth.users.is_empty() {
            problems.push("basic auth enabled but users list is empty");
        }

        problems.into_result(Error::Validation)
    }

    fn section_name(&self) -> Cow<'static, str> {
        "listener".into()
    }
}

// ── Db ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Db {
    #[serde(rename = "type")]
    pub kind: String,
    pub dsn: String,
    pub timeout: Duration,
    pub retry: u32,
}

impl Validate for Db {
    fn validate(&mut self, _cx: &ValidationContext<'_>) -> Result<()> {
        self.kind = self.kind.trim().to_string();
        if self.timeout.is_zero() {
            self.timeout = DB_DEFAULT_TIMEOUT;
        }
        Ok(())
    }

    fn section_name(&self) -> Cow<'static, str> {
        "db".into()
    }
}
