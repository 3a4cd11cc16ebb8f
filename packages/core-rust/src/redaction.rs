//! Masking of sensitive header and query values before they reach logs.

use std::collections::{BTreeMap, HashSet};

use tracing::warn;

use crate::request::MultiMap;

/// Placeholder written in place of a sensitive value.
pub const MASK: &str = "********";

/// Read-only set of field names whose values must never be logged.
///
/// Built once at startup and shared behind an `Arc`; matching is exact and
/// case-sensitive.
#[derive(Debug, Clone, Default)]
pub struct RedactionPolicy {
    sensitive: HashSet<String>,
}

impl RedactionPolicy {
    #[must_use]
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sensitive: names.into_iter().map(Into::into).collect(),
        }
    }

    /// A policy that masks nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_sensitive(&self, key: &str) -> bool {
        self.sensitive.contains(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sensitive.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sensitive.is_empty()
    }

    /// Projects `fields` to one value per key with sensitive values masked.
    ///
    /// The first value of each key is kept (`""` when the key has none).
    /// Sensitive keys are masked without reading their value. A non-sensitive
    /// entry whose value is not valid UTF-8 is logged and left out; the rest
    /// of the map is still processed.
    #[must_use]
    pub fn redact(&self, fields: &MultiMap) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for (key, values) in fields.iter() {
            if self.is_sensitive(key) {
                out.insert(key.to_string(), MASK.to_string());
                continue;
            }
            match values.first().map(|v| v.as_str()).transpose() {
                Ok(value) => {
                    out.insert(key.to_string(), value.unwrap_or_default().to_string());
                }
                Err(error) => {
                    warn!(field = key, %error, "skipping unreadable field while redacting");
                }
            }
        }
        out
    }
}
