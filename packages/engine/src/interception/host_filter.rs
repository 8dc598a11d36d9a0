// packages/engine/src/interception/host_filter.rs
//! Host patterns excluded from interception
//!
//! Patterns are either an exact host (`api.example.com`) or a wildcard
//! suffix (`*.example.com`, which matches subdomains but not the apex).
//! A filter is immutable once built so it can be shared across exchanges
//! without synchronization.

use std::collections::HashSet;
use tracing::debug;

/// Immutable set of ignored host patterns
#[derive(Debug, Clone, Default)]
pub struct HostFilter {
    /// Exact host matches (lowercase)
    exact: HashSet<String>,

    /// Wildcard suffixes including the leading dot (e.g. `.example.com`)
    suffixes: Vec<String>,
}

impl HostFilter {
    /// Create an empty filter that matches nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a filter from configured patterns
    pub fn from_patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        patterns
            .into_iter()
            .fold(Self::new(), |filter, pattern| filter.with_pattern(pattern.as_ref()))
    }

    /// Add a pattern
    pub fn with_pattern(mut self, pattern: &str) -> Self {
        let pattern = pattern.trim().to_ascii_lowercase();

        if let Some(suffix) = pattern.strip_prefix('*') {
            if suffix.starts_with('.') && suffix.len() > 1 {
                self.suffixes.push(suffix.to_string());
            }
        } else if !pattern.is_empty() {
            self.exact.insert(pattern);
        }

        self
    }

    /// Check whether `host` is ignored
    pub fn matches(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();

        if self.exact.contains(&host) {
            debug!("Host {} matched exact ignore pattern", host);
            return true;
        }

        if let Some(suffix) = self.suffixes.iter().find(|s| host.ends_with(s.as_str())) {
            debug!("Host {} matched wildcard ignore pattern *{}", host, suffix);
            return true;
        }

        false
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.suffixes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.suffixes.len()
    }
}
