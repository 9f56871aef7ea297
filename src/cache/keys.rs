//! Cache key definitions.
//!
//! A `CacheKey` is a canonical URL-like identifier. Keys ending in `*` are
//! prefix patterns: they cover every key that starts with the text before the
//! star. Scheme folding (`https` → `http`) happens in [`normalize`] so drivers
//! never have to care which scheme a page was requested over.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

const WILDCARD: char = '*';
const SECURE_SCHEME: &str = "https";
const PLAIN_SCHEME: &str = "http";

/// Normalized identifier of a cached resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

/// Ordered, deduplicated set of keys handed to drivers.
pub type KeySet = BTreeSet<CacheKey>;

impl CacheKey {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Wildcard covering everything below `home`.
    pub fn site_wildcard(home: &str) -> Self {
        Self(format!("{}/{WILDCARD}", home.trim_end_matches('/')))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    pub fn is_wildcard(&self) -> bool {
        self.0.ends_with(WILDCARD)
    }

    /// Text before the trailing `*`, if this key is a prefix pattern.
    pub fn prefix(&self) -> Option<&str> {
        self.0.strip_suffix(WILDCARD)
    }

    /// Whether `candidate` falls under this key (prefix match for wildcards).
    pub fn covers(&self, candidate: &str) -> bool {
        match self.prefix() {
            Some(prefix) => candidate.starts_with(prefix),
            None => self.0 == candidate,
        }
    }

    pub fn normalized(&self, scheme_indifferent: bool) -> Self {
        Self(normalize(&self.0, scheme_indifferent))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&String> for CacheKey {
    fn from(value: &String) -> Self {
        Self(value.clone())
    }
}

/// Fold every `https` occurrence into `http` when scheme indifference is on.
///
/// Folding repeats until no `https` is left, so the result is a fixpoint:
/// `normalize(normalize(k)) == normalize(k)`.
pub fn normalize(key: &str, scheme_indifferent: bool) -> String {
    if !scheme_indifferent {
        return key.to_string();
    }

    let mut folded = key.to_string();
    while folded.contains(SECURE_SCHEME) {
        folded = folded.replace(SECURE_SCHEME, PLAIN_SCHEME);
    }
    folded
}

/// Coerce one or many raw keys into a set, dropping blank entries.
pub fn key_set<I, K>(keys: I) -> KeySet
where
    I: IntoIterator<Item = K>,
    K: Into<CacheKey>,
{
    keys.into_iter()
        .map(Into::into)
        .filter(|key: &CacheKey| !key.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_scheme() {
        assert_eq!(
            normalize("https://example.com/post", true),
            "http://example.com/post"
        );
    }

    #[test]
    fn normalize_is_identity_when_disabled() {
        assert_eq!(
            normalize("https://example.com/post", false),
            "https://example.com/post"
        );
    }

    #[test]
    fn normalize_is_idempotent() {
        for raw in [
            "https://example.com/",
            "httpss://odd",
            "https://example.com/?next=https://other.org",
            "/relative/path",
            "",
        ] {
            let once = normalize(raw, true);
            assert_eq!(normalize(&once, true), once, "not a fixpoint for {raw}");
            assert!(!once.contains("https"));
        }
    }

    #[test]
    fn site_wildcard_covers_everything_below_home() {
        let wildcard = CacheKey::site_wildcard("http://example.com/");
        assert_eq!(wildcard.as_str(), "http://example.com/*");
        assert!(wildcard.is_wildcard());
        assert!(wildcard.covers("http://example.com/"));
        assert!(wildcard.covers("http://example.com/2024/hello"));
        assert!(!wildcard.covers("http://other.org/"));
    }

    #[test]
    fn exact_key_covers_only_itself() {
        let key = CacheKey::from("http://example.com/a");
        assert!(!key.is_wildcard());
        assert!(key.covers("http://example.com/a"));
        assert!(!key.covers("http://example.com/ab"));
    }

    #[test]
    fn key_set_deduplicates_and_drops_blanks() {
        let set = key_set(["/x", "/y", "/x", "  ", ""]);
        let keys: Vec<_> = set.iter().map(CacheKey::as_str).collect();
        assert_eq!(keys, vec!["/x", "/y"]);
    }
}
