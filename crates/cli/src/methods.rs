//! Built-in auth methods and the configuration shape the CLI checks.

use {
    serde::{Deserialize, Serialize},
    strata_common::AppInfo,
    strata_config::{
        Common, ConfigContext, ConfigRoot, Db, Duration, Error, Listener, Result, Validate,
        ValidationContext,
    },
};

const DEFAULT_JWT_LIFETIME: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Http {
    pub listener: Listener,
}

/// Root of a service configuration file: `[common]`, `[http.listener]`, `[db]`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub common: Common,
    pub http: Http,
    pub db: Db,
}

impl ConfigRoot for ServiceConfig {
    fn common(&self) -> Option<&Common> {
        Some(&self.common)
    }

    fn listener(&self) -> Option<&Listener> {
        Some(&self.http.listener)
    }
}

/// HTTP basic auth against the listener's `users` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BasicOptions {
    pub realm: String,
}

impl Validate for BasicOptions {
    fn validate(&mut self, cx: &ValidationContext<'_>) -> Result<()> {
        if self.realm.trim().is_empty() {
            self.realm = cx.app.name.clone();
        }
        let has_users = cx
            .root::<ServiceConfig>()
            .is_some_and(|root| !root.http.listener.auth.user_entries.is_empty());
        if !has_users {
            return Err(Error::message("no users are configured"));
        }
        Ok(())
    }
}

/// Signed bearer tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JwtOptions {
    pub secret: String,
    pub lifetime: Duration,
    pub issuer: String,
}

impl Default for JwtOptions {
    fn default() -> Self {
        Self {
            secret: String::new(),
            lifetime: DEFAULT_JWT_LIFETIME,
            issuer: String::new(),
        }
    }
}

impl Validate for JwtOptions {
    fn validate(&mut self, cx: &ValidationContext<'_>) -> Result<()> {
        if self.secret.trim().is_empty() {
            return Err(Error::message("secret is empty"));
        }
        if self.lifetime.is_zero() {
            self.lifetime = DEFAULT_JWT_LIFETIME;
        }
        if self.issuer.is_empty() {
            self.issuer = cx.app.name.clone();
        }
        Ok(())
    }
}

/// A context with the built-in methods registered.
pub fn context(app: AppInfo) -> Result<ConfigContext> {
    let mut cx = ConfigContext::new(app);
    cx.register_auth_method("basic", BasicOptions::default())?;
    cx.register_auth_method("jwt", JwtOptions::default())?;
    Ok(cx)
}

/// Validate every standard section of `cfg`.
pub fn check(cx: &ConfigContext, cfg: &mut ServiceConfig) -> Result<()> {
    let outcome = cx.check(vec![&mut cfg.common, &mut cfg.http.listener, &mut cfg.db]);
    cx.set_common(cfg.common.clone());
    cx.set_listener(cfg.http.listener.clone());
    outcome
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, strata_config::EnvironmentTable};

    fn load(text: &str) -> (ConfigContext, tempfile::TempDir, Result<ServiceConfig>) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("svc.toml"), text).unwrap();
        let app = AppInfo::new("strata", "0.0.0").with_work_dir(dir.path());
        let env = EnvironmentTable::from_vars(&app, [("SECRET", "k")]);
        let cx = context(app).unwrap().with_environment(env);
        let cfg = cx.load_file::<ServiceConfig>("svc.toml");
        (cx, dir, cfg)
    }

    #[test]
    fn jwt_defaults_are_filled() {
        let (cx, _dir, cfg) = load(
            "[http.listener.auth.methods.jwt]\nenabled = true\noptions = { secret = \"{$SECRET}\", lifetime = 600 }",
        );
        let mut cfg = cfg.unwrap();
        check(&cx, &mut cfg).unwrap();

        let jwt = cfg.http.listener.auth.methods["jwt"]
            .options::<JwtOptions>()
            .unwrap();
        assert_eq!(jwt.lifetime, Duration::from_secs(600));
        assert_eq!(jwt.issuer, "strata");

        let cached = cx.listener().unwrap();
        assert!(cached.auth.methods["jwt"].options::<JwtOptions>().is_some());
    }

    #[test]
    fn basic_needs_users() {
        let (cx, _dir, cfg) = load("[http.listener.auth.methods.basic]\nenabled = true");
        let mut cfg = cfg.unwrap();
        let err = check(&cx, &mut cfg).unwrap_err();
        assert!(err.to_string().contains("basic: no users are configured"));
    }

    #[test]
    fn basic_with_users_passes() {
        let (cx, _dir, cfg) = load(
            "[http.listener.auth.users]\n\"admin@ops\" = \"pw\"\n[http.listener.auth.methods.basic]\nenabled = true",
        );
        let mut cfg = cfg.unwrap();
        check(&cx, &mut cfg).unwrap();
        assert_eq!(
            cfg.http.listener.auth.methods["basic"]
                .options::<BasicOptions>()
                .unwrap()
                .realm,
            "strata"
        );
    }

    #[test]
    fn unknown_option_is_rejected() {
        let (cx, _dir, cfg) = load(
            "[http.listener.auth.methods.jwt]\noptions = { secret = \"x\", audience = \"web\" }",
        );
        let mut cfg = cfg.unwrap();
        let err = check(&cx, &mut cfg).unwrap_err();
        assert!(err.to_string().contains("jwt: decode error"));
    }
}
