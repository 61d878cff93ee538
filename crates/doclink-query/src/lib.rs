//! URL query-string building.
//!
//! Turns flat key/value mappings into `key=value&key=value` strings for
//! appending to request URLs. Values are percent-encoded; everything except
//! the RFC 3986 unreserved characters (`A-Z a-z 0-9 - _ . ~`) becomes `%XX`,
//! and a space is `%20`, never `+`.
//!
//! Entries are emitted in the iteration order of the input, so a `BTreeMap`
//! or `serde_json::Map` gives sorted output.

use std::fmt;

use serde::Serialize;
use url::Url;

/// Errors from query-string building.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Invalid value for '{key}': {reason}")]
    InvalidArgument { key: String, reason: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Failed to serialize value: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Percent-encode a single query-string component.
pub fn escape_string(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Turn a value into its query-string text.
///
/// Strings pass through, numbers use their JSON form, booleans become
/// `true`/`false`. Nulls, arrays and objects have no single text form and
/// are rejected.
fn stringify<V: Serialize + ?Sized>(key: &str, value: &V) -> Result<String, QueryError> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        other => Err(QueryError::InvalidArgument {
            key: key.to_string(),
            reason: format!("{} cannot be used as a query value", json_type_name(&other)),
        }),
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Build `key=escaped-value` pairs joined by `&`. Empty input gives `""`.
///
/// Keys are written as given.
pub fn query_string<I, K, V>(params: I) -> Result<String, QueryError>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Serialize,
{
    let mut builder = QueryStringBuilder::new();
    builder.extend(params)?;
    Ok(builder.build())
}

/// Append a query string to `url`, after any existing query and before any
/// fragment.
pub fn append_query<I, K, V>(url: &str, params: I) -> Result<String, QueryError>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Serialize,
{
    let mut parsed = Url::parse(url)?;
    let query = query_string(params)?;
    if query.is_empty() {
        return Ok(parsed.to_string());
    }
    let joined = match parsed.query().map(|q| q.trim_end_matches('&')) {
        Some(existing) if !existing.is_empty() => format!("{}&{}", existing, query),
        _ => query,
    };
    parsed.set_query(Some(&joined));
    Ok(parsed.to_string())
}

/// Incremental query-string builder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryStringBuilder {
    pairs: Vec<(String, String)>,
}

impl QueryStringBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one entry. Fails for values with no text form.
    pub fn push<V: Serialize + ?Sized>(
        &mut self,
        key: impl AsRef<str>,
        value: &V,
    ) -> Result<&mut Self, QueryError> {
        let key = key.as_ref();
        let text = stringify(key, value)?;
        self.pairs.push((key.to_string(), escape_string(&text)));
        Ok(self)
    }

    /// Add every entry of `params`, stopping at the first invalid value.
    pub fn extend<I, K, V>(&mut self, params: I) -> Result<&mut Self, QueryError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Serialize,
    {
        for (key, value) in params {
            self.push(key, &value)?;
        }
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn build(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for QueryStringBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.pairs.iter().enumerate() {
            if i > 0 {
                f.write_str("&")?;
            }
            write!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}
