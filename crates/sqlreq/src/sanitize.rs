//! Query sanitizing: terminator stripping and the prohibited-word blacklist.

use crate::error::{RequestError, RequestResult};
use regex::Regex;
use std::sync::LazyLock;

/// Words that may not appear as standalone tokens in a request body.
pub const PROHIBITED_WORDS: &[&str] = &[
    "delete",
    "drop",
    "insert",
    "alter",
    "truncate",
    "execute",
    "create",
    "update",
    "ir_config_parameter",
];

static DEFAULT_GUARD: LazyLock<QueryGuard> = LazyLock::new(|| QueryGuard::new(PROHIBITED_WORDS));

/// Strip surrounding whitespace and every trailing `;`.
///
/// Whitespace between trailing terminators is removed as well, so `"SELECT 1; ;"`
/// becomes `"SELECT 1"`.
pub fn clean_query(query: &str) -> RequestResult<String> {
    let mut q = query.trim();
    while let Some(rest) = q.strip_suffix(';') {
        q = rest.trim_end();
    }
    if q.is_empty() {
        return Err(RequestError::validation("The query is empty"));
    }
    Ok(q.to_string())
}

/// Reject `query` if it contains a prohibited word from the default blacklist.
pub fn check_prohibited_words(query: &str) -> RequestResult<()> {
    DEFAULT_GUARD.check(query)
}

/// A compiled blacklist, matched case-insensitively on word boundaries.
#[derive(Debug, Clone)]
pub struct QueryGuard {
    words: Vec<(String, Regex)>,
}

impl QueryGuard {
    pub fn new(words: &[&str]) -> Self {
        let words = words
            .iter()
            .map(|word| {
                let word = word.to_lowercase();
                let re = Regex::new(&format!(r"\b{}\b", regex::escape(&word)))
                    .expect("escaped literal is a valid regex");
                (word, re)
            })
            .collect();
        Self { words }
    }

    /// Blacklisted words, in the order they are checked.
    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.words.iter().map(|(w, _)| w.as_str())
    }

    /// Fail with the first blacklisted word (in list order) found in `query`.
    pub fn check(&self, query: &str) -> RequestResult<()> {
        let query = query.to_lowercase();
        for (word, re) in &self.words {
            if re.is_match(&query) {
                return Err(RequestError::ProhibitedWord(word.clone()));
            }
        }
        Ok(())
    }
}

impl Default for QueryGuard {
    fn default() -> Self {
        DEFAULT_GUARD.clone()
    }
}
