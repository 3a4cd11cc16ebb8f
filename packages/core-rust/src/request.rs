//! Immutable snapshot of an inbound gateway request.
//!
//! A [`RequestDescriptor`] is created once by the HTTP boundary and never
//! mutated. Enrichment (for example stamping a correlation header) goes
//! through [`RequestDescriptor::with_header`], which returns a new descriptor
//! sharing every untouched field with the original via `Arc`.

use std::fmt;
use std::str::Utf8Error;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Method
// ---------------------------------------------------------------------------

/// HTTP request method.
///
/// Serializes as the canonical upper-case token (`"GET"`, `"POST"`, ...).
/// Tokens outside the standard set are kept verbatim in `Extension`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
    Trace,
    Connect,
    /// Any non-standard method token.
    Extension(String),
}

impl Method {
    /// Parses a method token. Matching is exact: `"get"` is an extension
    /// method, as HTTP method tokens are case-sensitive.
    #[must_use]
    pub fn parse(token: &str) -> Self {
        match token {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "PATCH" => Self::Patch,
            "DELETE" => Self::Delete,
            "HEAD" => Self::Head,
            "OPTIONS" => Self::Options,
            "TRACE" => Self::Trace,
            "CONNECT" => Self::Connect,
            other => Self::Extension(other.to_string()),
        }
    }

    /// Returns the canonical method token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
            Self::Connect => "CONNECT",
            Self::Extension(token) => token,
        }
    }

    /// CORS preflight requests skip audit content capture.
    #[must_use]
    pub fn is_preflight(&self) -> bool {
        matches!(self, Self::Options)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Method {
    fn from(token: &str) -> Self {
        Self::parse(token)
    }
}

impl From<String> for Method {
    fn from(token: String) -> Self {
        Self::parse(&token)
    }
}

impl From<Method> for String {
    fn from(method: Method) -> Self {
        match method {
            Method::Extension(token) => token,
            other => other.as_str().to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// FieldValue
// ---------------------------------------------------------------------------

/// A single raw header or query-parameter value.
///
/// Values come straight off the wire and are not guaranteed to be UTF-8, so
/// the textual view is fallible.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldValue(Box<[u8]>);

impl FieldValue {
    /// Wraps raw bytes without validation.
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into().into_boxed_slice())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the value as text.
    ///
    /// # Errors
    ///
    /// Returns the UTF-8 decoding error if the raw bytes are not valid UTF-8.
    pub fn as_str(&self) -> Result<&str, Utf8Error> {
        std::str::from_utf8(&self.0)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::from_bytes(value.as_bytes())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::from_bytes(value.into_bytes())
    }
}

// ---------------------------------------------------------------------------
// MultiMap
// ---------------------------------------------------------------------------

/// Ordered multimap of field name to an ordered sequence of values.
///
/// Keys keep first-seen order. Key comparison is exact unless a method says
/// otherwise; header lookups that must ignore case use
/// [`MultiMap::first_ignore_case`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiMap {
    entries: Vec<(String, Vec<FieldValue>)>,
}

impl MultiMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value under `key`, creating the key if needed.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((key, vec![value])),
        }
    }

    /// Appends every value under `key`. An empty iterator still registers the
    /// key, which then has no values.
    pub fn append_all<I, V>(&mut self, key: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<FieldValue>,
    {
        let key = key.into();
        let values = values.into_iter().map(Into::into);
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => existing.extend(values),
            None => self.entries.push((key, values.collect())),
        }
    }

    /// All values stored under exactly `key`.
    #[must_use]
    pub fn get_all(&self, key: &str) -> &[FieldValue] {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map_or(&[], |(_, values)| values.as_slice())
    }

    #[must_use]
    pub fn first(&self, key: &str) -> Option<&FieldValue> {
        self.get_all(key).first()
    }

    /// First value of the first key matching `key` ignoring ASCII case.
    #[must_use]
    pub fn first_ignore_case(&self, key: &str) -> Option<&FieldValue> {
        self.entries
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(key))
            .find_map(|(_, values)| values.first())
    }

    /// Returns a copy in which every key matching `key` (ignoring ASCII case)
    /// is replaced by a single `key` entry holding only `value`.
    ///
    /// The replacement keeps the position of the first matching key, or is
    /// appended when no key matched. `self` is left untouched.
    #[must_use]
    pub fn with_replaced(&self, key: &str, value: impl Into<FieldValue>) -> Self {
        let mut entries = Vec::with_capacity(self.entries.len() + 1);
        let mut slot = Some((key.to_string(), vec![value.into()]));
        for (k, values) in &self.entries {
            if k.eq_ignore_ascii_case(key) {
                if let Some(replacement) = slot.take() {
                    entries.push(replacement);
                }
            } else {
                entries.push((k.clone(), values.clone()));
            }
        }
        if let Some(replacement) = slot {
            entries.push(replacement);
        }
        Self { entries }
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates keys in first-seen order with their values.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[FieldValue])> {
        self.entries
            .iter()
            .map(|(k, values)| (k.as_str(), values.as_slice()))
    }
}

impl<K, V> FromIterator<(K, V)> for MultiMap
where
    K: Into<String>,
    V: Into<FieldValue>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.append(k, v);
        }
        map
    }
}

// ---------------------------------------------------------------------------
// Principal
// ---------------------------------------------------------------------------

/// Identity established by an authentication layer in front of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Unique identifier of the authenticated user or service.
    pub id: String,
}

// ---------------------------------------------------------------------------
// RequestDescriptor
// ---------------------------------------------------------------------------

/// Immutable snapshot of one inbound request.
///
/// Cloning is cheap: every non-`Copy` field sits behind an `Arc`.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    method: Method,
    path: Arc<str>,
    headers: Arc<MultiMap>,
    query: Arc<MultiMap>,
    raw_query: Option<Arc<str>>,
    remote_addr: Option<Arc<str>>,
    principal: Option<Arc<Principal>>,
}

impl RequestDescriptor {
    /// Starts building a descriptor for `method` on `path`.
    #[must_use]
    pub fn builder(method: Method, path: impl Into<String>) -> RequestDescriptorBuilder {
        RequestDescriptorBuilder {
            method,
            path: path.into(),
            headers: MultiMap::new(),
            query: MultiMap::new(),
            raw_query: None,
            remote_addr: None,
            principal: None,
        }
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn headers(&self) -> &MultiMap {
        &self.headers
    }

    #[must_use]
    pub fn query(&self) -> &MultiMap {
        &self.query
    }

    /// The query string exactly as received, without the leading `?`.
    ///
    /// [`RequestDescriptor::query`] is a decoded view of the same data for
    /// inspection; this is what goes over the wire.
    #[must_use]
    pub fn raw_query(&self) -> Option<&str> {
        self.raw_query.as_deref()
    }

    #[must_use]
    pub fn remote_addr(&self) -> Option<&str> {
        self.remote_addr.as_deref()
    }

    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_deref()
    }

    /// Returns a new descriptor whose headers hold exactly one `name: value`
    /// entry (any casing of `name` is replaced). All other fields are shared
    /// with `self`.
    #[must_use]
    pub fn with_header(&self, name: &str, value: impl Into<FieldValue>) -> Self {
        Self {
            method: self.method.clone(),
            path: Arc::clone(&self.path),
            headers: Arc::new(self.headers.with_replaced(name, value)),
            query: Arc::clone(&self.query),
            raw_query: self.raw_query.clone(),
            remote_addr: self.remote_addr.clone(),
            principal: self.principal.clone(),
        }
    }
}

/// Builder for [`RequestDescriptor`], used by the HTTP boundary and tests.
#[derive(Debug)]
pub struct RequestDescriptorBuilder {
    method: Method,
    path: String,
    headers: MultiMap,
    query: MultiMap,
    raw_query: Option<String>,
    remote_addr: Option<String>,
    principal: Option<Principal>,
}

impl RequestDescriptorBuilder {
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.headers.append(name, value);
        self
    }

    #[must_use]
    pub fn headers(mut self, headers: MultiMap) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn query_param(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.query.append(name, value);
        self
    }

    #[must_use]
    pub fn query(mut self, query: MultiMap) -> Self {
        self.query = query;
        self
    }

    #[must_use]
    pub fn raw_query(mut self, raw: impl Into<String>) -> Self {
        self.raw_query = Some(raw.into());
        self
    }

    #[must_use]
    pub fn remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    #[must_use]
    pub fn principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    #[must_use]
    pub fn build(self) -> RequestDescriptor {
        RequestDescriptor {
            method: self.method,
            path: self.path.into(),
            headers: Arc::new(self.headers),
            query: Arc::new(self.query),
            raw_query: self.raw_query.map(Into::into),
            remote_addr: self.remote_addr.map(Into::into),
            principal: self.principal.map(Arc::new),
        }
    }
}
