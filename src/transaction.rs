//! Multi-statement transactions and cache batches.

use crate::backend::{CacheAction, CacheOp};
use crate::connection::ConnectionRegistry;
use crate::error::{Error, Result};
use crate::orchestrator::Orchestrator;
use crate::query::{QueryDescriptor, QueryRegistry};
use crate::Params;
use futures::future::{join_all, try_join_all};
use serde_json::Value;

/// Groups named queries into one database transaction, or cache operations
/// into one batch.
pub struct TransactionCoordinator<'a> {
    queries: &'a QueryRegistry,
    connections: &'a ConnectionRegistry,
    default_connection: &'a str,
}

impl<'a> TransactionCoordinator<'a> {
    pub fn new(
        queries: &'a QueryRegistry,
        connections: &'a ConnectionRegistry,
        default_connection: &'a str,
    ) -> Self {
        TransactionCoordinator {
            queries,
            connections,
            default_connection,
        }
    }

    /// Run the named queries as one database transaction.
    ///
    /// `params[i]` goes with `query_names[i]`; missing trailing entries are
    /// empty parameter sets. Every name must resolve, and all must resolve
    /// to the same connection, before any statement is sent. Results come
    /// back in input order.
    ///
    /// # Errors
    ///
    /// - `Error::ShapeError`: no names, or more parameter sets than names
    /// - `Error::NotFoundError` / `Error::UnknownConnectionError`: a name
    ///   does not resolve
    /// - `Error::MixedConnectionError`: names span connections
    /// - `Error::BackendError`: the adapter rolled the transaction back
    pub async fn to_db<S>(&self, query_names: &[S], params: &[Params]) -> Result<Vec<Option<Value>>>
    where
        S: AsRef<str> + Sync,
    {
        if query_names.is_empty() {
            return Err(Error::ShapeError(
                "Names for transaction query must be a non-empty list".to_string(),
            ));
        }
        if params.len() > query_names.len() {
            return Err(Error::ShapeError(format!(
                "Got {} parameter sets for {} transaction queries",
                params.len(),
                query_names.len()
            )));
        }

        let descriptors = try_join_all(query_names.iter().map(|name| async move {
            self.queries
                .resolve(name.as_ref(), self.connections, self.default_connection)
        }))
        .await?;

        let connection = Self::shared_connection(&descriptors)?;

        let params: Vec<Params> = (0..query_names.len())
            .map(|i| params.get(i).cloned().unwrap_or_default())
            .collect();

        let augmented = join_all(
            descriptors
                .into_iter()
                .zip(params.iter())
                .map(|(descriptor, p)| async move { descriptor.augment(p) }),
        )
        .await;

        let statements: Vec<String> = augmented.into_iter().map(|q| q.sql).collect();

        let slot = self
            .connections
            .get(&connection)
            .ok_or_else(|| Error::UnknownConnectionError(connection.clone()))?;
        let database = Orchestrator::database(&slot, &connection)?;

        debug!(
            "» Transaction of {} statements on connection {}",
            statements.len(),
            connection
        );
        let results = database.transaction_request(&statements, &params).await?;
        info!(
            "✓ Transaction of {} statements committed on {}",
            statements.len(),
            connection
        );
        Ok(results)
    }

    /// Run a positional cache batch on one connection.
    ///
    /// `keys`, `values` and `expirations` line up with `actions`. A `set`
    /// needs a value at its position; a missing expiration means none.
    ///
    /// # Errors
    ///
    /// - `Error::ShapeError`: fewer keys than actions, or a `set` without value
    /// - `Error::UnknownConnectionError` / `Error::ConfigError`: no such
    ///   connection, or it has no cache
    /// - `Error::BackendError`: the cache rejected the batch
    pub async fn to_cache(
        &self,
        connection: Option<&str>,
        actions: &[CacheAction],
        keys: &[String],
        values: &[Value],
        expirations: &[u64],
    ) -> Result<Vec<Option<Value>>> {
        let ops = Self::cache_ops(actions, keys, values, expirations)?;

        let name = connection.unwrap_or(self.default_connection);
        let slot = self
            .connections
            .get(name)
            .ok_or_else(|| Error::UnknownConnectionError(name.to_string()))?;
        let cache = Orchestrator::cache(&slot, name)?;

        debug!("» Cache batch of {} operations on {}", ops.len(), name);
        cache.transaction_request(&ops).await
    }

    fn shared_connection(descriptors: &[QueryDescriptor]) -> Result<String> {
        let expected = match descriptors.first() {
            Some(first) => first.connection.clone(),
            None => return Err(Error::ShapeError("Empty transaction".to_string())),
        };

        match descriptors.iter().find(|d| d.connection != expected) {
            Some(stray) => Err(Error::MixedConnectionError {
                expected,
                found: stray.connection.clone(),
                query: stray.name.clone(),
            }),
            None => Ok(expected),
        }
    }

    fn cache_ops(
        actions: &[CacheAction],
        keys: &[String],
        values: &[Value],
        expirations: &[u64],
    ) -> Result<Vec<CacheOp>> {
        if keys.len() < actions.len() {
            return Err(Error::ShapeError(format!(
                "Got {} keys for {} cache actions",
                keys.len(),
                actions.len()
            )));
        }

        actions
            .iter()
            .enumerate()
            .map(|(i, action)| match action {
                CacheAction::Get => Ok(CacheOp::Get {
                    key: keys[i].clone(),
                }),
                CacheAction::Set => {
                    let value = values.get(i).cloned().ok_or_else(|| {
                        Error::ShapeError(format!("Cache set at position {} has no value", i))
                    })?;
                    Ok(CacheOp::Set {
                        key: keys[i].clone(),
                        value,
                        expire: expirations.get(i).copied().unwrap_or(0),
                    })
                }
            })
            .collect()
    }
}
