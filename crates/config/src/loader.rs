//! Loading a configuration file into a typed root and keeping the result
//! around for later retrieval.

use std::{
    any::Any,
    fmt,
    sync::{Arc, OnceLock, RwLock},
};

use {
    include_dir::Dir,
    serde::{Serialize, de::DeserializeOwned},
    strata_common::AppInfo,
    tracing::{debug, info, warn},
};

use crate::{
    auth::AuthMethodRegistry,
    env::EnvironmentTable,
    error::{Error, Result},
    include::SourceReader,
    preprocess::{Expansion, Preprocessor},
    redact::RedactionFilters,
    sections::{Common, ConfigRoot, Listener},
    validate::{self, Validate, ValidationContext},
};

#[derive(Default)]
struct Loaded {
    text: String,
    warnings: bool,
    root: Option<Arc<dyn Any + Send + Sync>>,
    common: Option<Arc<Common>>,
    listener: Option<Arc<Listener>>,
}

/// Everything one configuration load needs, owned by the caller.
///
/// Build it once at startup, register auth methods, then load. The last
/// successful load is kept and can be read back from any thread; a failed
/// load leaves it untouched.
pub struct ConfigContext {
    app: AppInfo,
    reader: SourceReader,
    environment: OnceLock<EnvironmentTable>,
    auth_methods: AuthMethodRegistry,
    filters: RwLock<RedactionFilters>,
    loaded: RwLock<Loaded>,
}

impl Default for ConfigContext {
    fn default() -> Self {
        Self::new(AppInfo::default())
    }
}

impl ConfigContext {
    pub fn new(app: AppInfo) -> Self {
        let reader = SourceReader::new(app.exec_dir(), app.work_dir.clone());
        Self {
            app,
            reader,
            environment: OnceLock::new(),
            auth_methods: AuthMethodRegistry::new(),
            filters: RwLock::new(RedactionFilters::default()),
            loaded: RwLock::new(Loaded::default()),
        }
    }

    /// Look files up in `bundle` before the filesystem.
    pub fn with_bundle(mut self, bundle: &'static Dir<'static>) -> Self {
        self.reader = self.reader.with_bundle(bundle);
        self
    }

    /// Use `env` instead of capturing the process environment.
    pub fn with_environment(mut self, env: EnvironmentTable) -> Self {
        self.environment = OnceLock::from(env);
        self
    }

    /// Forget the environment snapshot; the next load captures a new one.
    pub fn clear_environment(&mut self) {
        self.environment = OnceLock::new();
    }

    pub fn app(&self) -> &AppInfo {
        &self.app
    }

    /// The environment table, captured on first use.
    pub fn environment(&self) -> &EnvironmentTable {
        self.environment.get_or_init(|| {
            let env = EnvironmentTable::capture(&self.app);
            debug!(vars = env.len(), "environment captured");
            env
        })
    }

    pub fn register_auth_method<O>(&mut self, name: impl Into<String>, prototype: O) -> Result<()>
    where
        O: Validate + Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static,
    {
        self.auth_methods.register(name, prototype)
    }

    // ── Loading ─────────────────────────────────────────────────────────────

    /// Read `path` and expand it, without decoding.
    ///
    /// Only a root file that cannot be read is an `Err`; expansion problems
    /// are reported in [`Expansion::errors`].
    pub fn preprocess_file(&self, path: &str) -> Result<Expansion> {
        let source = self
            .reader
            .read(path, self.reader.work_dir(), true)?
            .ok_or_else(|| Error::NotFound { path: path.into() })?;
        debug!(source = %source, "preprocessing configuration");

        let env = self.environment();
        let mut preprocessor = Preprocessor::new(env, &self.reader);
        Ok(preprocessor.expand_source(&source))
    }

    /// Load `path` into a `T`.
    ///
    /// On success the expanded text, the root and its common and listener
    /// sections replace whatever an earlier load left behind.
    pub fn load_file<T: ConfigRoot>(&self, path: &str) -> Result<T> {
        info!(path, "loading configuration");
        let Expansion {
            text,
            warnings,
            errors,
        } = self.preprocess_file(path)?;

        if !errors.is_empty() {
            dump_listing(path, &text, "configuration has preprocessing errors");
            return Err(Error::Preprocess(errors));
        }

        let root: T = match toml::from_str(&text) {
            Ok(root) => root,
            Err(source) => {
                let listing = numbered_listing(&text);
                warn!(path, error = %source, "configuration decode failed\n{listing}");
                return Err(Error::Decode { source, listing });
            },
        };

        if warnings {
            dump_listing(path, &text, "configuration expanded with warnings");
        }

        let loaded = Loaded {
            common: root.common().cloned().map(Arc::new),
            listener: root.listener().cloned().map(Arc::new),
            root: Some(Arc::new(root.clone())),
            text,
            warnings,
        };
        *self.loaded.write().unwrap_or_else(|e| e.into_inner()) = loaded;

        info!(path, warnings, "configuration loaded");
        Ok(root)
    }

    // ── Retrieval ───────────────────────────────────────────────────────────

    /// Expanded text of the last successful load.
    pub fn text(&self) -> String {
        self.loaded
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .text
            .clone()
    }

    /// Whether the last successful load had undefined environment references.
    pub fn had_warnings(&self) -> bool {
        self.loaded.read().unwrap_or_else(|e| e.into_inner()).warnings
    }

    /// [`text`](Self::text) with every redaction filter applied.
    pub fn secured_text(&self) -> String {
        let text = self.text();
        self.filters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .apply(&text)
    }

    pub fn add_filter(&self, pattern: &str, replacement: impl Into<String>) -> Result<()> {
        self.filters
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .add(pattern, replacement)
    }

    /// The last loaded root, if it is a `T`.
    pub fn config<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let root = self
            .loaded
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .root
            .clone()?;
        root.downcast::<T>().ok()
    }

    pub fn common(&self) -> Option<Arc<Common>> {
        self.loaded
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .common
            .clone()
    }

    pub fn listener(&self) -> Option<Arc<Listener>> {
        self.loaded
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .listener
            .clone()
    }

    /// Replace the cached common section, typically with its validated form.
    pub fn set_common(&self, common: Common) {
        self.loaded.write().unwrap_or_else(|e| e.into_inner()).common = Some(Arc::new(common));
    }

    pub fn set_listener(&self, listener: Listener) {
        self.loaded.write().unwrap_or_else(|e| e.into_inner()).listener =
            Some(Arc::new(listener));
    }

    // ── Validation ──────────────────────────────────────────────────────────

    /// Validate `sections`, with the last loaded root as the shared context.
    pub fn check(&self, sections: Vec<&mut dyn Validate>) -> Result<()> {
        let root = self
            .loaded
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .root
            .clone();
        let root_ref: &dyn Any = match &root {
            Some(root) => &**root,
            None => &(),
        };
        let cx = ValidationContext::new(root_ref, &self.app, &self.auth_methods);
        validate::check(&cx, sections)
    }
}

/// Render `text` as a numbered listing for diagnostics.
pub fn numbered_listing(text: &str) -> String {
    let mut out = String::from("Config file:\n>>>\n");
    for (i, line) in text.lines().enumerate() {
        out.push_str(&format!("{:04} | {line}\n", i + 1));
    }
    out.push_str("<<<");
    out
}

fn dump_listing(path: &str, text: &str, message: &str) {
    warn!(path, "{message}\n{}", numbered_listing(text));
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde::Deserialize};

    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(default)]
    struct Root {
        common: Common,
        value: i64,
    }

    impl ConfigRoot for Root {
        fn common(&self) -> Option<&Common> {
            Some(&self.common)
        }
    }

    fn context(dir: &std::path::Path) -> ConfigContext {
        let app = AppInfo::new("svc", "1.0.0").with_work_dir(dir);
        ConfigContext::new(app.clone())
            .with_environment(EnvironmentTable::from_vars(&app, [("VALUE", "42")]))
    }

    #[test]
    fn listing_is_numbered() {
        assert_eq!(
            numbered_listing("a = 1\nb = 2\n"),
            "Config file:\n>>>\n0001 | a = 1\n0002 | b = 2\n<<<"
        );
    }

    #[test]
    fn load_stores_text_root_and_common() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("app.toml"),
            "value = {$VALUE}\n[common]\nname = \"edge\"\n",
        )
        .unwrap();
        let cx = context(dir.path());

        let root: Root = cx.load_file("app.toml").unwrap();
        assert_eq!(root.value, 42);
        assert_eq!(cx.text(), "value = 42\n[common]\nname = \"edge\"\n");
        assert_eq!(cx.config::<Root>().unwrap().value, 42);
        assert!(cx.config::<Common>().is_none());
        assert_eq!(cx.common().unwrap().name, "edge");
        assert!(cx.listener().is_none());
    }

    #[test]
    fn failed_load_keeps_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("good.toml"), "value = 1").unwrap();
        std::fs::write(dir.path().join("bad.toml"), "value = = 2").unwrap();
        std::fs::write(dir.path().join("macro.toml"), "value = {@nope}").unwrap();
        let cx = context(dir.path());

        cx.load_file::<Root>("good.toml").unwrap();
        let err = cx.load_file::<Root>("bad.toml").unwrap_err();
        match err {
            Error::Decode { listing, .. } => assert!(listing.contains("0001 | value = = 2")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            cx.load_file::<Root>("macro.toml"),
            Err(Error::Preprocess(_))
        ));
        assert!(matches!(
            cx.load_file::<Root>("missing.toml"),
            Err(Error::NotFound { .. })
        ));

        assert_eq!(cx.text(), "value = 1\n");
        assert_eq!(cx.config::<Root>().unwrap().value, 1);
    }

    #[test]
    fn check_sees_the_loaded_root() {
        struct Limit;

        impl Validate for Limit {
            fn validate(&mut self, cx: &ValidationContext<'_>) -> Result<()> {
                let root = cx
                    .root::<Root>()
                    .ok_or_else(|| Error::message("no root"))?;
                if root.value > 10 {
                    return Err(Error::message(format!("value {} is too big", root.value)));
                }
                Ok(())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.toml"), "value = {$VALUE}").unwrap();
        let cx = context(dir.path());

        assert!(cx.check(vec![&mut Limit]).unwrap_err().to_string().contains("no root"));
        cx.load_file::<Root>("app.toml").unwrap();
        let err = cx.check(vec![&mut Limit]).unwrap_err();
        assert_eq!(err.to_string(), "Limit: value 42 is too big");
    }

    #[test]
    fn environment_is_captured_once_until_cleared() {
        let mut cx = ConfigContext::new(AppInfo::new("svc", "1.0.0"));
        let first = cx.environment() as *const EnvironmentTable;
        assert_eq!(first, cx.environment() as *const EnvironmentTable);
        cx.clear_environment();
        assert_eq!(cx.environment().get("___AppName"), Some("svc"));
    }
}
