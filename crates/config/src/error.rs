use std::{fmt, path::PathBuf};

use thiserror::Error;

/// An ordered batch of independent problems found in one pass.
///
/// Both the preprocessor and the validation pass push into one of these and
/// keep going, so a single run reports everything that is wrong with a file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Messages {
    items: Vec<String>,
}

impl Messages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !message.is_empty() {
            self.items.push(message);
        }
    }

    /// Append every entry of `other`, each prefixed with `prefix: ` when the
    /// prefix is non-empty.
    pub fn extend_prefixed(&mut self, prefix: &str, other: Messages) {
        for item in other.items {
            if prefix.is_empty() {
                self.items.push(item);
            } else {
                self.items.push(format!("{prefix}: {item}"));
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(String::as_str)
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.items.iter().any(|m| m.contains(needle))
    }

    /// `Ok(())` when nothing was recorded, otherwise `wrap(self)`.
    pub fn into_result(self, wrap: impl FnOnce(Messages) -> Error) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(wrap(self))
        }
    }
}

impl fmt::Display for Messages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            f.write_str(item)?;
        }
        Ok(())
    }
}

impl From<Error> for Messages {
    fn from(err: Error) -> Self {
        match err {
            Error::Preprocess(m) | Error::Validation(m) => m,
            other => {
                let mut m = Messages::new();
                m.push(other.to_string());
                m
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("file {path} not found")]
    NotFound { path: PathBuf },

    #[error("{path}: read {got} bytes, expected {expected}")]
    ShortRead {
        path: PathBuf,
        expected: u64,
        got: u64,
    },

    #[error("cannot resolve path \"{path}\": {reason}")]
    PathResolve { path: String, reason: String },

    #[error("{path} is not valid UTF-8")]
    Utf8 { path: PathBuf },

    #[error("{0}")]
    Preprocess(Messages),

    #[error("{source}\n{listing}")]
    Decode {
        #[source]
        source: toml::de::Error,
        listing: String,
    },

    #[error("encode error: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("{0}")]
    Validation(Messages),

    #[error("method \"{0}\" is already defined")]
    DuplicateAuthMethod(String),

    #[error("{0}")]
    Registry(String),

    #[error(transparent)]
    Regex(#[from] regex::Error),

    #[error("{0}")]
    Message(String),
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// The accumulated problems when this error is a batch, `None` otherwise.
    pub fn messages(&self) -> Option<&Messages> {
        match self {
            Self::Preprocess(m) | Self::Validation(m) => Some(m),
            _ => None,
        }
    }
}

impl strata_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

strata_common::impl_context!();

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_join_with_newlines() {
        let mut m = Messages::new();
        m.push("first");
        m.push("");
        m.push("second");
        assert_eq!(m.len(), 2);
        assert_eq!(m.to_string(), "first\nsecond");
    }

    #[test]
    fn empty_messages_are_ok() {
        assert!(Messages::new().into_result(Error::Validation).is_ok());
    }

    #[test]
    fn prefixed_extend_attributes_entries() {
        let mut inner = Messages::new();
        inner.push("timeout is zero");
        let mut outer = Messages::new();
        outer.extend_prefixed("db", inner);
        assert_eq!(outer.to_string(), "db: timeout is zero");
    }

    #[test]
    fn non_batch_error_converts_to_single_message() {
        let m: Messages = Error::DuplicateAuthMethod("jwt".into()).into();
        assert_eq!(m.to_string(), "method \"jwt\" is already defined");
    }
}
