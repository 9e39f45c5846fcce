//! Shared error-context plumbing and application identity used across the strata crates.

pub mod app;
pub mod error;

pub use {app::AppInfo, error::FromMessage};
