//! PostgreSQL database adapter.

use super::sql::{compile, PlaceholderStyle, SqlConfig};
use super::{normalize_rows, BackendAdapter, DatabaseAdapter};
use crate::error::{Error, Result};
use crate::Params;
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Executor, Postgres, Row, TypeInfo};

/// PostgreSQL adapter over a lazily connecting `sqlx` pool.
///
/// Statements use `:name` placeholders; rows come back as JSON objects
/// keyed by column name.
pub struct PostgresDatabase {
    config: SqlConfig,
    pool: OnceCell<PgPool>,
}

impl PostgresDatabase {
    /// Create the adapter and its pool. No connection is opened until the
    /// first statement runs.
    ///
    /// # Errors
    /// Returns `Err` if the connection URL cannot be parsed
    pub fn new(config: SqlConfig) -> Result<Self> {
        let db = PostgresDatabase {
            config,
            pool: OnceCell::new(),
        };
        db.connect()?;
        info!(
            "✓ PostgreSQL adapter initialized (pool size: {})",
            db.config.pool_size()
        );
        Ok(db)
    }

    pub fn from_options(options: &Value) -> Result<Self> {
        Self::new(SqlConfig::from_options(options)?)
    }

    /// Build the pool, or return the existing one.
    pub fn connect(&self) -> Result<&PgPool> {
        self.pool.get_or_try_init(|| {
            PgPoolOptions::new()
                .max_connections(self.config.pool_size())
                .connect_lazy(&self.config.connection_url("postgres", 5432))
                .map_err(|e| Error::ConfigError(format!("Failed to create PostgreSQL pool: {}", e)))
        })
    }

    async fn fetch<'e, E>(executor: E, statement: &str, params: &Params) -> Result<Vec<Value>>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let compiled = compile(statement, params, PlaceholderStyle::Numbered);
        let mut query = sqlx::query(&compiled.sql);
        for value in &compiled.binds {
            query = bind_value(query, value);
        }

        let rows = query
            .fetch_all(executor)
            .await
            .map_err(|e| Error::BackendError(e.to_string()))?;

        Ok(rows.iter().map(row_to_json).collect())
    }
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.clone()),
    }
}

fn row_to_json(row: &PgRow) -> Value {
    let mut object = serde_json::Map::new();
    for column in row.columns() {
        let index = column.ordinal();
        let value = match column.type_info().name() {
            "BOOL" => row.try_get::<Option<bool>, _>(index).ok().flatten().map(Value::from),
            "INT2" => row
                .try_get::<Option<i16>, _>(index)
                .ok()
                .flatten()
                .map(Value::from),
            "INT4" => row
                .try_get::<Option<i32>, _>(index)
                .ok()
                .flatten()
                .map(Value::from),
            "INT8" => row
                .try_get::<Option<i64>, _>(index)
                .ok()
                .flatten()
                .map(Value::from),
            "FLOAT4" => row
                .try_get::<Option<f32>, _>(index)
                .ok()
                .flatten()
                .map(Value::from),
            "FLOAT8" => row
                .try_get::<Option<f64>, _>(index)
                .ok()
                .flatten()
                .map(Value::from),
            "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(index).ok().flatten(),
            _ => row
                .try_get::<Option<String>, _>(index)
                .ok()
                .flatten()
                .map(Value::String),
        };
        object.insert(column.name().to_string(), value.unwrap_or(Value::Null));
    }
    Value::Object(object)
}

#[async_trait]
impl BackendAdapter for PostgresDatabase {
    fn driver(&self) -> &str {
        "postgres"
    }

    async fn health_check(&self) -> Result<bool> {
        let pool = self.connect()?;
        Ok(sqlx::query("SELECT 1").execute(pool).await.is_ok())
    }

    async fn close(&self) -> Result<()> {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
            info!("✓ PostgreSQL pool closed");
        }
        Ok(())
    }
}

#[async_trait]
impl DatabaseAdapter for PostgresDatabase {
    async fn get_data(&self, statement: &str, params: &Params) -> Result<Option<Value>> {
        let rows = Self::fetch(self.connect()?, statement, params).await?;
        debug!("✓ PostgreSQL read returned {} rows", rows.len());
        Ok(normalize_rows(rows))
    }

    async fn set_data(&self, statement: &str, params: &Params) -> Result<Option<Value>> {
        let rows = Self::fetch(self.connect()?, statement, params).await?;
        debug!("✓ PostgreSQL write returned {} rows", rows.len());
        Ok(normalize_rows(rows))
    }

    async fn transaction_request(
        &self,
        statements: &[String],
        params: &[Params],
    ) -> Result<Vec<Option<Value>>> {
        let mut tx = self
            .connect()?
            .begin()
            .await
            .map_err(|e| Error::BackendError(e.to_string()))?;

        let empty = Params::new();
        let mut results = Vec::with_capacity(statements.len());

        for (index, statement) in statements.iter().enumerate() {
            let statement_params = params.get(index).unwrap_or(&empty);
            match Self::fetch(&mut *tx, statement, statement_params).await {
                Ok(rows) => results.push(normalize_rows(rows)),
                Err(e) => {
                    if let Err(rollback) = tx.rollback().await {
                        warn!("PostgreSQL rollback failed: {}", rollback);
                    }
                    debug!("✗ PostgreSQL transaction rolled back at statement {}", index);
                    return Err(e);
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| Error::BackendError(e.to_string()))?;

        debug!(
            "✓ PostgreSQL transaction committed {} statements",
            statements.len()
        );
        Ok(results)
    }
}
