//! Named query registry, resolution, and conditional fragments.

use crate::connection::ConnectionRegistry;
use crate::error::{Error, Result};
use crate::settings::QueryDefinition;
use crate::Params;
use dashmap::DashMap;
use std::collections::BTreeMap;

/// A registered query resolved for one call.
///
/// Resolution hands out a copy, so augmenting the statement never touches
/// the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor {
    pub name: String,
    pub sql: String,
    pub connection: String,
    pub caching: bool,
    pub expire: u64,
    pub addition: BTreeMap<String, String>,
}

impl QueryDescriptor {
    /// Placeholder token for a conditional fragment.
    pub fn placeholder(name: &str) -> String {
        format!("$>{}<", name)
    }

    /// Apply conditional fragments: each `$>name<` token takes the fragment
    /// text when `params` has a `name` key and the empty string otherwise.
    /// Only the first occurrence of each token is substituted.
    pub fn augment(mut self, params: &Params) -> Self {
        for (name, fragment) in &self.addition {
            let replacement = if params.contains_key(name) {
                fragment.as_str()
            } else {
                ""
            };
            self.sql = self
                .sql
                .replacen(&Self::placeholder(name), replacement, 1);
        }
        self
    }
}

/// Registered query definitions by name.
#[derive(Default)]
pub struct QueryRegistry {
    queries: DashMap<String, QueryDefinition>,
}

impl QueryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add validated definitions; existing names are overwritten.
    pub fn merge(&self, definitions: Vec<(String, QueryDefinition)>) {
        for (name, definition) in definitions {
            if self.queries.insert(name.clone(), definition).is_some() {
                debug!("Query \"{}\" overwritten", name);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<QueryDefinition> {
        self.queries.get(name).map(|q| q.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.queries.contains_key(name)
    }

    /// Query names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    /// Look up `name` and check its connection slot exists.
    ///
    /// # Errors
    ///
    /// - `Error::NotFoundError`: no query registered under `name`
    /// - `Error::UnknownConnectionError`: the query's connection has no slot
    pub fn resolve(
        &self,
        name: &str,
        connections: &ConnectionRegistry,
        default_connection: &str,
    ) -> Result<QueryDescriptor> {
        let definition = self
            .get(name)
            .ok_or_else(|| Error::NotFoundError(name.to_string()))?;

        let connection = definition
            .connection
            .unwrap_or_else(|| default_connection.to_string());

        if !connections.contains(&connection) {
            return Err(Error::UnknownConnectionError(connection));
        }

        Ok(QueryDescriptor {
            name: name.to_string(),
            sql: definition.sql,
            connection,
            caching: definition.caching,
            expire: definition.expire,
            addition: definition.addition,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionSlot;
    use serde_json::json;

    fn definition(sql: &str, connection: Option<&str>) -> QueryDefinition {
        QueryDefinition {
            sql: sql.to_string(),
            connection: connection.map(str::to_string),
            caching: true,
            expire: 60,
            addition: BTreeMap::new(),
        }
    }

    fn connections(names: &[&str]) -> ConnectionRegistry {
        let registry = ConnectionRegistry::new();
        registry.replace_all(
            names
                .iter()
                .map(|n| (n.to_string(), ConnectionSlot::Empty))
                .collect(),
        );
        registry
    }

    #[test]
    fn test_resolve_defaults_connection() {
        let registry = QueryRegistry::new();
        registry.merge(vec![("users".to_string(), definition("SELECT 1", None))]);

        let descriptor = registry
            .resolve("users", &connections(&["main"]), "main")
            .expect("resolve");
        assert_eq!(descriptor.connection, "main");
        assert_eq!(descriptor.name, "users");
        assert!(descriptor.caching);
        assert_eq!(descriptor.expire, 60);
    }

    #[test]
    fn test_resolve_unknown_query() {
        let registry = QueryRegistry::new();
        assert_eq!(
            registry.resolve("nope", &connections(&["main"]), "main"),
            Err(Error::NotFoundError("nope".to_string()))
        );
    }

    #[test]
    fn test_resolve_unknown_connection() {
        let registry = QueryRegistry::new();
        registry.merge(vec![(
            "users".to_string(),
            definition("SELECT 1", Some("reports")),
        )]);
        assert_eq!(
            registry.resolve("users", &connections(&["main"]), "main"),
            Err(Error::UnknownConnectionError("reports".to_string()))
        );
    }

    #[test]
    fn test_merge_overwrites() {
        let registry = QueryRegistry::new();
        registry.merge(vec![("q".to_string(), definition("SELECT 1", None))]);
        registry.merge(vec![
            ("q".to_string(), definition("SELECT 2", None)),
            ("r".to_string(), definition("SELECT 3", None)),
        ]);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("q").expect("q").sql, "SELECT 2");
        assert_eq!(registry.names(), vec!["q", "r"]);
    }

    #[test]
    fn test_augment_applies_fragments() {
        let mut addition = BTreeMap::new();
        addition.insert("status".to_string(), " AND status = :status".to_string());
        addition.insert("limit".to_string(), " LIMIT :limit".to_string());

        let descriptor = QueryDescriptor {
            name: "users".to_string(),
            sql: "SELECT * FROM users WHERE 1 = 1$>status<$>limit<".to_string(),
            connection: "main".to_string(),
            caching: false,
            expire: 0,
            addition,
        };

        let params = json!({"status": "active"});
        let augmented = descriptor
            .clone()
            .augment(params.as_object().expect("object"));
        assert_eq!(
            augmented.sql,
            "SELECT * FROM users WHERE 1 = 1 AND status = :status"
        );

        let bare = descriptor.augment(&Params::new());
        assert_eq!(bare.sql, "SELECT * FROM users WHERE 1 = 1");
    }

    #[test]
    fn test_augment_does_not_touch_registry() {
        let registry = QueryRegistry::new();
        let mut def = definition("SELECT * FROM t$>f<", None);
        def.addition.insert("f".to_string(), " WHERE f".to_string());
        registry.merge(vec![("q".to_string(), def)]);

        let params = json!({"f": 1});
        let augmented = registry
            .resolve("q", &connections(&["main"]), "main")
            .expect("resolve")
            .augment(params.as_object().expect("object"));

        assert_eq!(augmented.sql, "SELECT * FROM t WHERE f");
        assert_eq!(registry.get("q").expect("q").sql, "SELECT * FROM t$>f<");
    }
}
