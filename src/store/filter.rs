//! Path allow-list for pending change queries.
//!
//! A record matches when its path contains any of the configured
//! substrings. An empty filter matches everything.

/// Escape character used in generated `LIKE` patterns.
pub const LIKE_ESCAPE: char = '!';

/// Substring allow-list applied to change-log paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathFilter {
    substrings: Vec<String>,
}

impl PathFilter {
    /// Filter that accepts every path.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new<I, S>(substrings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            substrings: substrings.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.substrings.is_empty()
    }

    pub fn substrings(&self) -> &[String] {
        &self.substrings
    }

    /// Check whether a path passes the filter.
    pub fn matches(&self, path: &str) -> bool {
        self.is_empty() || self.substrings.iter().any(|s| path.contains(s.as_str()))
    }

    /// `LIKE` patterns equivalent to [`matches`](Self::matches), one per
    /// substring, escaped with [`LIKE_ESCAPE`].
    pub fn like_patterns(&self) -> Vec<String> {
        self.substrings
            .iter()
            .map(|s| format!("%{}%", escape_like(s)))
            .collect()
    }
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '%' || c == '_' || c == LIKE_ESCAPE {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(c);
    }
    escaped
}
