//! Textual expansion of configuration sources.
//!
//! Runs before any TOML decoding. Each logical line is rewritten until it no
//! longer contains a reference token:
//!
//! | token                 | meaning                                      |
//! |-----------------------|----------------------------------------------|
//! | `{$NAME}` / `${NAME}` | environment value, empty (with warning) if unset |
//! | `{@name}`             | macro defined earlier with `@name = value`   |
//! | `{#include path}`     | content of `path`, error if missing          |
//! | `{##include path}`    | content of `path`, nothing if missing        |
//!
//! Problems are collected rather than returned early, so one run reports
//! every broken line of a file and of everything it includes.

use std::{collections::HashMap, path::Path};

use tracing::warn;

use crate::{
    env::EnvironmentTable,
    error::{Error, Messages, Result},
    include::{Source, SourceReader},
};

/// Rewrite passes allowed per line before it is reported as cyclic.
pub const MAX_REWRITE_PASSES: usize = 32;

/// Output of one expansion run.
#[derive(Debug, Clone, Default)]
pub struct Expansion {
    /// Flattened text, one resolved line per `\n`-terminated row.
    pub text: String,
    /// Set when an environment reference was undefined somewhere.
    pub warnings: bool,
    pub errors: Messages,
}

impl Expansion {
    pub fn into_result(self) -> Result<(String, bool)> {
        if self.errors.is_empty() {
            Ok((self.text, self.warnings))
        } else {
            Err(Error::Preprocess(self.errors))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Env,
    Macro,
    Command,
}

#[derive(Debug, Clone, Copy)]
struct Token<'a> {
    kind: TokenKind,
    start: usize,
    end: usize,
    body: &'a str,
}

/// Find every reference token in `line`, left to right, non-overlapping.
fn scan(line: &str) -> Vec<Token<'_>> {
    let bytes = line.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i + 1 < bytes.len() {
        let kind = match (bytes[i], bytes[i + 1]) {
            (b'$', b'{') | (b'{', b'$') => Some(TokenKind::Env),
            (b'{', b'@') => Some(TokenKind::Macro),
            (b'{', b'#') => Some(TokenKind::Command),
            _ => None,
        };

        if let Some(kind) = kind {
            let body_start = i + 2;
            if let Some(rel) = line[body_start..].find('}')
                && rel > 0
            {
                let end = body_start + rel + 1;
                tokens.push(Token {
                    kind,
                    start: i,
                    end,
                    body: &line[body_start..body_start + rel],
                });
                i = end;
                continue;
            }
        }
        i += 1;
    }

    tokens
}

/// Line expander shared by a top-level file and everything it includes.
///
/// The macro table and the line counter live here, so a macro defined inside
/// an included file is visible to the lines after the include, and line
/// numbers in diagnostics are absolute across the flattened output.
pub struct Preprocessor<'a> {
    env: &'a EnvironmentTable,
    reader: &'a SourceReader,
    macros: HashMap<String, String>,
    line: usize,
    active: Vec<Source>,
}

impl<'a> Preprocessor<'a> {
    pub fn new(env: &'a EnvironmentTable, reader: &'a SourceReader) -> Self {
        Self {
            env,
            reader,
            macros: HashMap::with_capacity(128),
            line: 0,
            active: Vec::new(),
        }
    }

    /// Expand a source, tracking it as active so that it cannot include itself.
    pub fn expand_source(&mut self, source: &Source) -> Expansion {
        self.active.push(source.clone());
        let out = self.expand(&source.text, &source.dir());
        self.active.pop();
        out
    }

    /// Expand already-normalized text whose relative includes resolve
    /// against `base`.
    pub fn expand(&mut self, text: &str, base: &Path) -> Expansion {
        let mut out = Expansion::default();

        for raw in text.split('\n') {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            self.line += 1;
            let line = line.replace('\t', " ");

            if let Some(definition) = line.strip_prefix('@') {
                self.define_macro(&line, definition, &mut out.errors);
                continue;
            }

            let resolved = self.resolve_line(&line, base, &mut out);
            let resolved = resolved.trim();
            if !resolved.is_empty() {
                out.text.push_str(resolved);
                out.text.push('\n');
            }
        }

        out
    }

    fn define_macro(&mut self, line: &str, definition: &str, errors: &mut Messages) {
        match definition.split_once('=') {
            Some((name, value)) if !name.trim().is_empty() => {
                self.macros
                    .insert(name.trim().to_string(), value.trim().to_string());
            },
            _ => errors.push(format!(
                "bad macro definition \"{line}\" in line {}",
                self.line
            )),
        }
    }

    fn resolve_line(&mut self, original: &str, base: &Path, out: &mut Expansion) -> String {
        self.rewrite(original.to_string(), original, base, out)
    }

    /// Rewrite `line` until no tokens remain. Text produced by an include is
    /// final; only the parts of the line around it are rewritten further.
    fn rewrite(
        &mut self,
        mut line: String,
        original: &str,
        base: &Path,
        out: &mut Expansion,
    ) -> String {
        let mut passes = 0;

        loop {
            let tokens = scan(&line);
            if tokens.is_empty() {
                break;
            }
            if passes == MAX_REWRITE_PASSES {
                out.errors.push(format!(
                    "too many iterations for \"{original}\" in line {}",
                    self.line
                ));
                break;
            }
            passes += 1;

            let mut next = String::with_capacity(line.len());
            let mut cursor = 0;

            for token in tokens {
                next.push_str(&line[cursor..token.start]);
                cursor = token.end;
                match token.kind {
                    TokenKind::Env => next.push_str(&self.env_value(token.body, out)),
                    TokenKind::Macro => {
                        next.push_str(&self.macro_ref(token.body, &mut out.errors));
                    },
                    TokenKind::Command => match self.command(token.body, base, out) {
                        Some(text) => {
                            let tail = line[cursor..].to_string();
                            let head = self.rewrite(next, original, base, out);
                            let tail = self.rewrite(tail, original, base, out);
                            return format!("{head}{text}{tail}");
                        },
                        None => return String::new(),
                    },
                }
            }
            next.push_str(&line[cursor..]);
            line = next;
        }

        line
    }

    fn env_value(&self, name: &str, out: &mut Expansion) -> String {
        match self.env.get(name) {
            Some(v) => v.to_string(),
            None => {
                out.warnings = true;
                warn!(
                    name,
                    line = self.line,
                    "undefined environment variable, using empty value"
                );
                String::new()
            },
        }
    }

    fn macro_ref(&self, name: &str, errors: &mut Messages) -> String {
        match self.macros.get(name) {
            Some(v) => v.clone(),
            None => {
                errors.push(format!("undefined macro \"{name}\" in line {}", self.line));
                String::new()
            },
        }
    }

    /// Run a `{#...}` command. `None` means the command was not understood
    /// and the whole line is dropped.
    fn command(&mut self, body: &str, base: &Path, out: &mut Expansion) -> Option<String> {
        let mut words = body.split_whitespace();
        let mandatory = match words.next() {
            Some("include") => true,
            Some("#include") => false,
            _ => {
                out.errors.push(format!(
                    "unknown preprocessor command \"{body}\" in line {}",
                    self.line
                ));
                return None;
            },
        };

        let args: Vec<&str> = words.collect();
        let [path] = args.as_slice() else {
            out.errors.push(format!(
                "illegal preprocessor command \"{body}\" in line {}",
                self.line
            ));
            return Some(String::new());
        };

        Some(self.include(path, base, mandatory, out))
    }

    fn include(&mut self, path: &str, base: &Path, mandatory: bool, out: &mut Expansion) -> String {
        let source = match self.reader.read(path, base, mandatory) {
            Ok(Some(source)) => source,
            Ok(None) => {
                // An absent optional include emits nothing and takes no line.
                self.line = self.line.saturating_sub(1);
                return String::new();
            },
            Err(e) => {
                out.errors
                    .push(format!("include error \"{e}\" in line {}", self.line));
                return String::new();
            },
        };

        if self.active.iter().any(|s| s.same_file(&source)) {
            let chain: Vec<String> = self
                .active
                .iter()
                .map(ToString::to_string)
                .chain(std::iter::once(source.to_string()))
                .collect();
            out.errors.push(format!(
                "include cycle {} in line {}",
                chain.join(" -> "),
                self.line
            ));
            return String::new();
        }

        // The include line itself is replaced by the first included line.
        self.line = self.line.saturating_sub(1);
        let nested = self.expand_source(&source);
        out.warnings |= nested.warnings;
        out.errors
            .extend_prefixed(&format!("include \"{path}\""), nested.errors);

        nested.text.trim().to_string()
    }
}
