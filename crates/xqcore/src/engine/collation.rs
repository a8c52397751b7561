use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::error::{Error, ErrorCode};

pub use crate::consts::{ASCII_CASE_URI, CODEPOINT_URI};

pub trait Collation: Send + Sync {
    fn uri(&self) -> &str;
    fn compare(&self, a: &str, b: &str) -> core::cmp::Ordering;
    fn key(&self, s: &str) -> String {
        s.to_string()
    }
}

pub struct CodepointCollation;

impl Collation for CodepointCollation {
    fn uri(&self) -> &str {
        CODEPOINT_URI
    }
    fn compare(&self, a: &str, b: &str) -> core::cmp::Ordering {
        a.cmp(b)
    }
}

/// ASCII case-insensitive collation: `A-Z` fold to `a-z`, everything else compares
/// by codepoint.
pub struct AsciiCaseCollation;

impl Collation for AsciiCaseCollation {
    fn uri(&self) -> &str {
        ASCII_CASE_URI
    }
    fn compare(&self, a: &str, b: &str) -> core::cmp::Ordering {
        let fold = |c: char| c.to_ascii_lowercase();
        a.chars().map(fold).cmp(b.chars().map(fold))
    }
    fn key(&self, s: &str) -> String {
        s.to_ascii_lowercase()
    }
}

/// Registry of available collations, keyed by URI.
pub struct CollationRegistry {
    by_uri: HashMap<String, Arc<dyn Collation>>,
}

impl Default for CollationRegistry {
    fn default() -> Self {
        let mut reg = Self { by_uri: HashMap::new() };
        reg.insert(Arc::new(CodepointCollation));
        reg.insert(Arc::new(AsciiCaseCollation));
        reg
    }
}

impl core::fmt::Debug for CollationRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.by_uri.keys()).finish()
    }
}

impl CollationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, uri: &str) -> Option<Arc<dyn Collation>> {
        self.by_uri.get(uri).cloned()
    }

    pub fn insert(&mut self, collation: Arc<dyn Collation>) {
        self.by_uri.insert(collation.uri().to_string(), collation);
    }

    /// Resolves `uri`, falling back to the codepoint collation when no URI was given.
    pub fn resolve(&self, uri: Option<&str>) -> Result<Arc<dyn Collation>, Error> {
        match uri {
            Some(u) => self
                .get(u)
                .ok_or_else(|| Error::from_code(ErrorCode::FOCH0002, format!("unknown collation URI: {u}"))),
            None => Ok(self.get(CODEPOINT_URI).unwrap_or_else(|| Arc::new(CodepointCollation))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_case_folds_only_ascii() {
        let c = AsciiCaseCollation;
        assert!(c.compare("ABC", "abc").is_eq());
        assert!(c.compare("Ä", "ä").is_ne());
    }

    #[test]
    fn unknown_collation_is_foch0002() {
        let reg = CollationRegistry::default();
        let err = reg.resolve(Some("urn:nope")).err().unwrap();
        assert_eq!(err.code_enum(), ErrorCode::FOCH0002);
    }
}
