//! Settings and query definitions, and the validation gating them.
//!
//! Both payloads arrive as JSON. They are checked against typed serde
//! definitions (unknown fields rejected) plus a few structural rules before
//! anything is merged into a [`Storage`](crate::Storage).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Top-level keys that mark a settings object as a single connection
/// definition rather than a map of named connections.
pub const CONNECTION_KEYS: [&str; 4] = ["driver", "connection", "redis", "cache"];

/// Keys whose presence selects the single-connection shape.
const SINGLE_SHAPE_MARKERS: [&str; 3] = ["driver", "redis", "cache"];

/// One connection: an optional database and an optional cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionDefinition {
    /// Registered database driver name (`postgres`, `mysql`, `memory`, ...).
    #[serde(default)]
    pub driver: Option<String>,

    /// Driver-specific connection options.
    #[serde(default)]
    pub connection: Option<Value>,

    /// Redis cache options.
    #[serde(default)]
    pub redis: Option<Value>,

    /// Any other registered cache driver.
    #[serde(default)]
    pub cache: Option<CacheDefinition>,
}

/// `cache` entry of a connection definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheDefinition {
    pub driver: String,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl ConnectionDefinition {
    fn validate(&self, name: &str) -> Result<()> {
        if let Some(driver) = &self.driver {
            if driver.is_empty() {
                return Err(Error::ValidationError(format!(
                    "Connection \"{}\": driver must not be empty",
                    name
                )));
            }
            match &self.connection {
                Some(Value::Object(_)) | Some(Value::String(_)) => {}
                Some(other) => {
                    return Err(Error::ValidationError(format!(
                        "Connection \"{}\": connection must be an object or a URL, got {}",
                        name, other
                    )))
                }
                None => {
                    return Err(Error::ValidationError(format!(
                        "Connection \"{}\": driver \"{}\" requires connection options",
                        name, driver
                    )))
                }
            }
        }

        if let Some(redis) = &self.redis {
            if !redis.is_object() {
                return Err(Error::ValidationError(format!(
                    "Connection \"{}\": redis must be an object",
                    name
                )));
            }
        }

        if self.redis.is_some() && self.cache.is_some() {
            return Err(Error::ValidationError(format!(
                "Connection \"{}\": redis and cache are mutually exclusive",
                name
            )));
        }

        if let Some(cache) = &self.cache {
            if cache.driver.is_empty() {
                return Err(Error::ValidationError(format!(
                    "Connection \"{}\": cache driver must not be empty",
                    name
                )));
            }
        }

        Ok(())
    }
}

/// Validated settings, in one of the two accepted shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsShape {
    /// The settings object itself is one connection definition.
    Single(ConnectionDefinition),
    /// The settings object maps connection names to definitions.
    Named(Vec<(String, ConnectionDefinition)>),
}

/// Validate a (merged) settings object and classify its shape.
///
/// # Errors
///
/// - `Error::ConfigError`: single-connection keys mixed with other keys
/// - `Error::ValidationError`: a definition does not match the schema
pub fn validate_settings(settings: &Map<String, Value>) -> Result<SettingsShape> {
    let has_connection_keys = settings
        .keys()
        .any(|k| CONNECTION_KEYS.contains(&k.as_str()));
    let foreign_keys: Vec<&str> = settings
        .keys()
        .map(String::as_str)
        .filter(|k| !CONNECTION_KEYS.contains(k))
        .collect();

    if has_connection_keys && !foreign_keys.is_empty() {
        return Err(Error::ConfigError(format!(
            "Incorrect settings: connection keys mixed with named connections ({})",
            foreign_keys.join(", ")
        )));
    }

    if settings
        .keys()
        .any(|k| SINGLE_SHAPE_MARKERS.contains(&k.as_str()))
    {
        let definition = parse_definition(settings, crate::DEFAULT_CONNECTION)?;
        return Ok(SettingsShape::Single(definition));
    }

    let mut named = Vec::with_capacity(settings.len());
    for (name, value) in settings {
        let definition = match value {
            Value::Object(object) => parse_definition(object, name)?,
            other => {
                return Err(Error::ValidationError(format!(
                    "Connection \"{}\" must be an object, got {}",
                    name, other
                )))
            }
        };
        named.push((name.clone(), definition));
    }

    Ok(SettingsShape::Named(named))
}

fn parse_definition(object: &Map<String, Value>, name: &str) -> Result<ConnectionDefinition> {
    let definition: ConnectionDefinition = serde_json::from_value(Value::Object(object.clone()))
        .map_err(|e| Error::ValidationError(format!("Connection \"{}\": {}", name, e)))?;
    definition.validate(name)?;
    Ok(definition)
}

/// One registered query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryDefinition {
    /// Statement template in the target engine's language.
    pub sql: String,

    /// Target connection; the default connection when absent.
    #[serde(default)]
    pub connection: Option<String>,

    /// Write database results back to the cache on cache-aside reads.
    #[serde(default)]
    pub caching: bool,

    /// Cache lifetime in seconds, `0` for no expiry.
    #[serde(default)]
    pub expire: u64,

    /// Conditional fragments: placeholder name → replacement text.
    #[serde(default)]
    pub addition: BTreeMap<String, String>,
}

/// Validate a queries object.
///
/// # Errors
///
/// Returns `Error::ValidationError` for empty names, empty statements, or
/// definitions not matching the schema.
pub fn validate_queries(queries: &Map<String, Value>) -> Result<Vec<(String, QueryDefinition)>> {
    let mut validated = Vec::with_capacity(queries.len());
    for (name, value) in queries {
        if name.is_empty() {
            return Err(Error::ValidationError(
                "Query name must not be empty".to_string(),
            ));
        }

        let definition: QueryDefinition = serde_json::from_value(value.clone())
            .map_err(|e| Error::ValidationError(format!("Query \"{}\": {}", name, e)))?;

        if definition.sql.trim().is_empty() {
            return Err(Error::ValidationError(format!(
                "Query \"{}\": sql must not be empty",
                name
            )));
        }

        if matches!(&definition.connection, Some(c) if c.is_empty()) {
            return Err(Error::ValidationError(format!(
                "Query \"{}\": connection must not be empty",
                name
            )));
        }

        validated.push((name.clone(), definition));
    }
    Ok(validated)
}

/// Accept a JSON object, treating `null` as an empty object.
pub(crate) fn into_object(value: Value, what: &str) -> Result<Map<String, Value>> {
    match value {
        Value::Object(object) => Ok(object),
        Value::Null => Ok(Map::new()),
        other => Err(Error::ValidationError(format!(
            "{} must be an object, got {}",
            what, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_single_shape_detected() {
        let shape = validate_settings(&object(json!({
            "driver": "memory",
            "connection": {},
            "redis": {"host": "localhost"}
        })))
        .expect("valid settings");

        match shape {
            SettingsShape::Single(def) => {
                assert_eq!(def.driver.as_deref(), Some("memory"));
                assert!(def.redis.is_some());
            }
            other => panic!("expected single shape, got {:?}", other),
        }
    }

    #[test]
    fn test_named_shape_detected() {
        let shape = validate_settings(&object(json!({
            "main": {"driver": "memory", "connection": {}},
            "sessions": {"redis": {}}
        })))
        .expect("valid settings");

        match shape {
            SettingsShape::Named(named) => {
                let names: Vec<&str> = named.iter().map(|(n, _)| n.as_str()).collect();
                assert_eq!(names, vec!["main", "sessions"]);
            }
            other => panic!("expected named shape, got {:?}", other),
        }
    }

    #[test]
    fn test_mixed_shape_is_config_error() {
        let result = validate_settings(&object(json!({
            "driver": "memory",
            "connection": {},
            "other": {"driver": "memory", "connection": {}}
        })));
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_driver_without_connection_is_invalid() {
        let result = validate_settings(&object(json!({"driver": "postgres"})));
        assert!(matches!(result, Err(Error::ValidationError(_))));
    }

    #[test]
    fn test_unknown_connection_field_is_invalid() {
        let result = validate_settings(&object(json!({
            "main": {"driver": "memory", "connection": {}, "pool": 3}
        })));
        assert!(matches!(result, Err(Error::ValidationError(_))));
    }

    #[test]
    fn test_named_entry_must_be_object() {
        let result = validate_settings(&object(json!({"main": 5})));
        assert!(matches!(result, Err(Error::ValidationError(_))));
    }

    #[test]
    fn test_cache_definition_keeps_options() {
        let shape = validate_settings(&object(json!({
            "cache": {"driver": "memory", "prefix": "app"}
        })))
        .expect("valid settings");

        match shape {
            SettingsShape::Single(def) => {
                let cache = def.cache.expect("cache definition");
                assert_eq!(cache.driver, "memory");
                assert_eq!(cache.options.get("prefix"), Some(&json!("app")));
            }
            other => panic!("expected single shape, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_queries_defaults() {
        let queries = validate_queries(&object(json!({
            "users": {"sql": "SELECT * FROM users"}
        })))
        .expect("valid queries");

        let (name, def) = &queries[0];
        assert_eq!(name, "users");
        assert_eq!(def.connection, None);
        assert!(!def.caching);
        assert_eq!(def.expire, 0);
        assert!(def.addition.is_empty());
    }

    #[test]
    fn test_validate_queries_rejects_bad_input() {
        assert!(validate_queries(&object(json!({"q": {"sql": ""}}))).is_err());
        assert!(validate_queries(&object(json!({"q": {"statement": "SELECT 1"}}))).is_err());
        assert!(validate_queries(&object(json!({"q": {"sql": "SELECT 1", "expire": -1}}))).is_err());
        assert!(validate_queries(&object(json!({"q": "SELECT 1"}))).is_err());
    }

    #[test]
    fn test_into_object() {
        assert!(into_object(Value::Null, "settings").expect("null").is_empty());
        assert!(matches!(
            into_object(json!([1]), "settings"),
            Err(Error::ValidationError(_))
        ));
    }
}
