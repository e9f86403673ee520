//! Cache-key normalization and ignore-parameter rules.
//!
//! Two requests that differ only in query parameters a deployment declared
//! irrelevant (build hashes, analytics tags) must resolve to the same cached
//! response. Rules match query parameter *names*; matching parameters are
//! stripped before keys are compared. Fragments never participate in keys.

use regex::Regex;
use url::form_urlencoded;

use crate::CacheError;

/// A pattern matched against query-string parameter names.
#[derive(Debug, Clone)]
pub struct IgnoreParamRule {
    pattern: Regex,
}

impl IgnoreParamRule {
    /// Compile a rule from a regex pattern.
    pub fn new(pattern: &str) -> Result<Self, CacheError> {
        let pattern = Regex::new(pattern).map_err(|source| CacheError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self { pattern })
    }

    /// Compile a list of rules, failing on the first bad pattern.
    pub fn compile_all(patterns: &[String]) -> Result<Vec<Self>, CacheError> {
        patterns.iter().map(|p| Self::new(p)).collect()
    }

    /// Check whether a parameter name matches this rule.
    pub fn matches(&self, param_name: &str) -> bool {
        self.pattern.is_match(param_name)
    }

    /// The source pattern.
    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }
}

/// Normalize a URL into a cache key.
///
/// Strips the fragment, then removes every query parameter whose name
/// matches any rule. Parameter order is preserved. Works on absolute URLs
/// and root-relative paths alike, since only the query string is rewritten.
pub fn normalize_cache_key(url: &str, rules: &[IgnoreParamRule]) -> String {
    let without_fragment = url.split('#').next().unwrap_or(url);

    let (base, query) = match without_fragment.split_once('?') {
        Some((base, query)) => (base, query),
        None => return without_fragment.to_string(),
    };

    let kept: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
        .filter(|(name, _)| !rules.iter().any(|rule| rule.matches(name)))
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();

    if kept.is_empty() {
        return base.to_string();
    }

    let rebuilt: String = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(kept)
        .finish();
    format!("{}?{}", base, rebuilt)
}
