//! Section validation.
//!
//! Every configuration section that needs normalization or cross-checks
//! implements [`Validate`]. The caller lists the sections to check and
//! [`check`] runs each of them exactly once, in order, collecting every
//! failure into one [`Error::Validation`].

use std::{any::Any, borrow::Cow};

use {strata_common::AppInfo, tracing::debug};

use crate::{
    auth::AuthMethodRegistry,
    error::{Error, Messages, Result},
};

/// What a section sees while it validates itself.
#[derive(Clone, Copy)]
pub struct ValidationContext<'a> {
    /// The decoded root configuration, for cross-section lookups.
    pub root: &'a dyn Any,
    pub app: &'a AppInfo,
    pub auth_methods: &'a AuthMethodRegistry,
}

impl<'a> ValidationContext<'a> {
    pub fn new(root: &'a dyn Any, app: &'a AppInfo, auth_methods: &'a AuthMethodRegistry) -> Self {
        Self {
            root,
            app,
            auth_methods,
        }
    }

    /// The root configuration as `T`, if that is its concrete type.
    pub fn root<T: Any>(&self) -> Option<&'a T> {
        self.root.downcast_ref::<T>()
    }
}

/// Self-check and normalization of one configuration section.
pub trait Validate {
    /// Fill defaults, normalize values and report problems.
    ///
    /// Mutations made before an error is returned are kept.
    fn validate(&mut self, cx: &ValidationContext<'_>) -> Result<()>;

    /// Name the section is reported under.
    fn section_name(&self) -> Cow<'static, str> {
        let full = std::any::type_name::<Self>();
        Cow::Borrowed(full.rsplit("::").next().unwrap_or(full))
    }
}

/// Validate every section in `sections`, in order, never stopping early.
pub fn check(cx: &ValidationContext<'_>, sections: Vec<&mut dyn Validate>) -> Result<()> {
    let mut failures = Messages::new();
    let total = sections.len();

    for section in sections {
        let name = section.section_name();
        match section.validate(cx) {
            Ok(()) => debug!(section = %name, "section validated"),
            Err(e) => failures.extend_prefixed(&name, Messages::from(e)),
        }
    }

    debug!(sections = total, problems = failures.len(), "validation pass finished");
    failures.into_result(Error::Validation)
}
