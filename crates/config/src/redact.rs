//! Find/replace filters that mask secrets in the expanded text before it is
//! shown to anyone.

use regex::Regex;

use crate::error::Result;

const DEFAULT_FILTERS: [(&str, &str); 3] = [
    (r#"(password\s*=\s*")(.*)(")"#, "${1}*${3}"),
    (r#"(secret\s*=\s*")(.*)(")"#, "${1}*${3}"),
    (r"(users\s*=\s*\{)(.*)(\})", "${1}*${3}"),
];

#[derive(Debug, Clone)]
pub struct RedactionFilters {
    filters: Vec<(Regex, String)>,
}

impl Default for RedactionFilters {
    /// Masks `password = "..."`, `secret = "..."` and inline `users = {...}`.
    fn default() -> Self {
        let filters = DEFAULT_FILTERS
            .iter()
            .filter_map(|(pattern, replacement)| {
                Regex::new(pattern)
                    .ok()
                    .map(|re| (re, (*replacement).to_string()))
            })
            .collect();
        Self { filters }
    }
}

impl RedactionFilters {
    /// No filters at all.
    pub fn empty() -> Self {
        Self {
            filters: Vec::new(),
        }
    }

    /// Append a filter. `replacement` may refer to capture groups as `${n}`.
    pub fn add(&mut self, pattern: &str, replacement: impl Into<String>) -> Result<()> {
        let re = Regex::new(pattern)?;
        self.filters.push((re, replacement.into()));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run every filter over `text`, in the order they were added.
    pub fn apply(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (re, replacement) in &self.filters {
            out = re.replace_all(&out, replacement.as_str()).into_owned();
        }
        out
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_installed() {
        assert_eq!(RedactionFilters::default().len(), 3);
    }

    #[test]
    fn password_is_masked() {
        let f = RedactionFilters::default();
        assert_eq!(f.apply("password = \"s3cret\""), "password = \"*\"");
    }

    #[test]
    fn secret_and_users_are_masked_but_other_lines_kept() {
        let f = RedactionFilters::default();
        let text = "name = \"svc\"\nsecret=\"k\"\nusers = { alice = \"pw\" }\n";
        assert_eq!(f.apply(text), "name = \"svc\"\nsecret=\"*\"\nusers = {*}\n");
    }

    #[test]
    fn custom_filters_run_after_defaults() {
        let mut f = RedactionFilters::default();
        f.add(r"(dsn\s*=\s*.)([^@]*)(@)", "${1}***${3}").unwrap();
        assert_eq!(
            f.apply("dsn = \"user:pw@db:5432\""),
            "dsn = \"***@db:5432\""
        );
    }

    #[test]
    fn bad_pattern_is_rejected() {
        let mut f = RedactionFilters::empty();
        assert!(f.add("(unclosed", "x").is_err());
        assert!(f.is_empty());
    }
}
