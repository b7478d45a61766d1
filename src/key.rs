//! Cache key derivation for named queries.

use crate::Params;
use serde_json::Value;

/// String parameters longer than this are shortened before going into a key.
const MAX_PARAM_LEN: usize = 16;

/// Length a long string parameter is cut down to.
const TRUNCATED_PARAM_LEN: usize = 15;

/// Builds cache keys of the form `{query}:{param}:{value}:{param}:{value}...`.
///
/// Parameters appear in the order the caller inserted them. String values
/// longer than 16 characters are truncated to their first 15 characters, so
/// two calls differing only past that point share a key. This is a
/// shortening, not a hash.
///
/// Every other value is written as its JSON text: `true`, `null`, `1.0`
/// (a float keeps its fraction, so `1` and `1.0` give different keys) and
/// `[1,2]` for an array. Keys built elsewhere from a different
/// stringification will not line up with these.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use storage_kit::key::CacheKeyBuilder;
///
/// let params = json!({"id": 42, "note": "a-very-long-string-value"});
/// let key = CacheKeyBuilder::build("users", params.as_object().unwrap());
/// assert_eq!(key, "users:id:42:note:a-very-long-str");
/// ```
pub struct CacheKeyBuilder;

impl CacheKeyBuilder {
    /// Build the cache key for `query_name` called with `params`.
    pub fn build(query_name: &str, params: &Params) -> String {
        let mut key = String::from(query_name);
        for (name, value) in params {
            key.push(':');
            key.push_str(name);
            key.push(':');
            key.push_str(&Self::param_fragment(value));
        }
        key
    }

    fn param_fragment(value: &Value) -> String {
        match value {
            Value::String(s) if s.chars().count() > MAX_PARAM_LEN => {
                s.chars().take(TRUNCATED_PARAM_LEN).collect()
            }
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}
