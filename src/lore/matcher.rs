//! Key parsing and matching for lore activation.
//!
//! A key string is one of two forms:
//! - a delimited regex literal: `/pattern/flags` (flags `i`, `s`, `m`
//!   honored; anything else ignored);
//! - a keyword boolean expression: terms joined by `&` (AND), a leading
//!   `!` negating a term, each term matched by case-insensitive substring
//!   containment (`dragon & fire & !ice`).
//!
//! A malformed regex is non-fatal: it is reported via `tracing::warn!`
//! and the key simply never matches.

use regex::{Regex, RegexBuilder};
use thiserror::Error;
use tracing::warn;

/// Errors from parsing a key string.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("empty key")]
    Empty,

    #[error("malformed regex `{pattern}`: {source}")]
    MalformedRegex {
        pattern: String,
        source: regex::Error,
    },
}

/// A parsed activation key.
#[derive(Debug, Clone)]
pub enum LoreKey {
    /// A compiled regex literal.
    Pattern(Regex),
    /// A keyword boolean expression (AND over terms).
    Keywords(Vec<KeywordTerm>),
}

/// One term of a keyword expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordTerm {
    /// Lowercased keyword text.
    pub text: String,
    /// Whether the term is negated (`!term`).
    pub negated: bool,
}

impl LoreKey {
    /// Parse a key string.
    ///
    /// Strings delimited by `/…/` parse as regex literals; everything
    /// else parses as a keyword expression.
    pub fn parse(raw: &str) -> Result<Self, KeyError> {
        Self::parse_with_mode(raw, false)
    }

    /// Parse a key string, optionally forcing regex interpretation even
    /// without `/…/` delimiters (the entry's `use_regex` flag).
    pub fn parse_with_mode(raw: &str, force_regex: bool) -> Result<Self, KeyError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(KeyError::Empty);
        }

        if let Some((pattern, flags)) = split_regex_literal(trimmed) {
            return compile_regex(pattern, flags);
        }

        if force_regex {
            return compile_regex(trimmed, "");
        }

        Ok(Self::Keywords(parse_keyword_expression(trimmed)?))
    }

    /// Whether this key matches the given text.
    pub fn matches(&self, text: &str) -> bool {
        match self {
            Self::Pattern(regex) => regex.is_match(text),
            Self::Keywords(terms) => {
                let haystack = text.to_lowercase();
                terms.iter().all(|term| {
                    let contained = haystack.contains(&term.text);
                    contained != term.negated
                })
            }
        }
    }
}

/// Split `/pattern/flags` into its parts, or `None` if not a regex literal.
fn split_regex_literal(raw: &str) -> Option<(&str, &str)> {
    let rest = raw.strip_prefix('/')?;
    let close = rest.rfind('/')?;
    let (pattern, flags) = rest.split_at(close);
    Some((pattern, &flags[1..]))
}

fn compile_regex(pattern: &str, flags: &str) -> Result<LoreKey, KeyError> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in flags.chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            // JS-style flags with no analogue here (`g`, `u`) are ignored.
            _ => {}
        }
    }
    builder
        .build()
        .map(LoreKey::Pattern)
        .map_err(|source| KeyError::MalformedRegex {
            pattern: pattern.to_string(),
            source,
        })
}

fn parse_keyword_expression(raw: &str) -> Result<Vec<KeywordTerm>, KeyError> {
    let terms: Vec<KeywordTerm> = raw
        .split('&')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|term| {
            let (negated, text) = match term.strip_prefix('!') {
                Some(rest) => (true, rest.trim()),
                None => (false, term),
            };
            KeywordTerm {
                text: text.to_lowercase(),
                negated,
            }
        })
        .filter(|t| !t.text.is_empty())
        .collect();

    if terms.is_empty() {
        return Err(KeyError::Empty);
    }
    Ok(terms)
}

/// Whether any of the raw key strings matches the text.
///
/// Malformed keys are logged and skipped rather than failing the scan.
pub fn any_key_matches(keys: &[String], text: &str, force_regex: bool) -> bool {
    keys.iter().any(|raw| {
        match LoreKey::parse_with_mode(raw, force_regex) {
            Ok(key) => key.matches(text),
            Err(KeyError::Empty) => false,
            Err(err) => {
                warn!(key = raw.as_str(), %err, "skipping malformed lore key");
                false
            }
        }
    })
}
