//! Configuration loading for long-running services.
//!
//! A file is first expanded as text (`{$ENV}` and `${ENV}` references,
//! `@name = value` macros referenced as `{@name}`, and `{#include path}` /
//! `{##include path}` directives), then decoded from TOML into the caller's
//! root type, and finally validated section by section.
//!
//! ```ignore
//! let mut cx = ConfigContext::new(AppInfo::new("svc", env!("CARGO_PKG_VERSION")));
//! cx.register_auth_method("jwt", JwtOptions::default())?;
//! let mut cfg: MyConfig = cx.load_file("^conf/svc.toml")?;
//! cx.check(vec![&mut cfg.common, &mut cfg.listener])?;
//! ```

pub mod auth;
pub mod coerce;
pub mod duration;
pub mod env;
pub mod error;
pub mod include;
pub mod loader;
pub mod preprocess;
pub mod redact;
pub mod sections;
pub mod validate;

pub use {
    auth::{Auth, AuthMethod, AuthMethodRegistry, AuthOptions, MethodOptions, User},
    coerce::coerce_into,
    duration::{Duration, parse_duration},
    env::EnvironmentTable,
    error::{Context, Error, Messages, Result},
    include::{Origin, Source, SourceReader, normalize_source},
    loader::{ConfigContext, numbered_listing},
    preprocess::{Expansion, MAX_REWRITE_PASSES, Preprocessor},
    redact::RedactionFilters,
    sections::{Common, ConfigRoot, Db, Listener, normalize_path},
    validate::{Validate, ValidationContext, check},
};
