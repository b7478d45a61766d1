//! MySQL / MariaDB database adapter.

use super::sql::{compile, PlaceholderStyle, SqlConfig};
use super::{normalize_rows, BackendAdapter, DatabaseAdapter};
use crate::error::{Error, Result};
use crate::Params;
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde_json::Value;
use sqlx::mysql::{MySql, MySqlArguments, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, Executor, Row, TypeInfo};

/// MySQL adapter over a lazily connecting `sqlx` pool.
pub struct MySqlDatabase {
    config: SqlConfig,
    pool: OnceCell<MySqlPool>,
}

impl MySqlDatabase {
    /// # Errors
    /// Returns `Err` if the connection URL cannot be parsed
    pub fn new(config: SqlConfig) -> Result<Self> {
        let db = MySqlDatabase {
            config,
            pool: OnceCell::new(),
        };
        db.connect()?;
        info!(
            "✓ MySQL adapter initialized (pool size: {})",
            db.config.pool_size()
        );
        Ok(db)
    }

    pub fn from_options(options: &Value) -> Result<Self> {
        Self::new(SqlConfig::from_options(options)?)
    }

    /// Build the pool, or return the existing one.
    pub fn connect(&self) -> Result<&MySqlPool> {
        self.pool.get_or_try_init(|| {
            MySqlPoolOptions::new()
                .max_connections(self.config.pool_size())
                .connect_lazy(&self.config.connection_url("mysql", 3306))
                .map_err(|e| Error::ConfigError(format!("Failed to create MySQL pool: {}", e)))
        })
    }

    async fn fetch<'e, E>(executor: E, statement: &str, params: &Params) -> Result<Vec<Value>>
    where
        E: Executor<'e, Database = MySql>,
    {
        let compiled = compile(statement, params, PlaceholderStyle::Question);
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
    query: Query<'q, MySql, MySqlArguments>,
    value: &Value,
) -> Query<'q, MySql, MySqlArguments> {
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

fn row_to_json(row: &MySqlRow) -> Value {
    let mut object = serde_json::Map::new();
    for column in row.columns() {
        let index = column.ordinal();
        let type_name = column.type_info().name();
        let value = match type_name {
            "BOOLEAN" => row.try_get::<Option<bool>, _>(index).ok().flatten().map(Value::from),
            name if name.ends_with("UNSIGNED") => row
                .try_get::<Option<u64>, _>(index)
                .ok()
                .flatten()
                .map(Value::from),
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => row
                .try_get::<Option<i64>, _>(index)
                .ok()
                .flatten()
                .map(Value::from),
            "FLOAT" => row
                .try_get::<Option<f32>, _>(index)
                .ok()
                .flatten()
                .map(Value::from),
            "DOUBLE" => row
                .try_get::<Option<f64>, _>(index)
                .ok()
                .flatten()
                .map(Value::from),
            "JSON" => row.try_get::<Option<Value>, _>(index).ok().flatten(),
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
impl BackendAdapter for MySqlDatabase {
    fn driver(&self) -> &str {
        "mysql"
    }

    async fn health_check(&self) -> Result<bool> {
        let pool = self.connect()?;
        Ok(sqlx::query("SELECT 1").execute(pool).await.is_ok())
    }

    async fn close(&self) -> Result<()> {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
            info!("✓ MySQL pool closed");
        }
        Ok(())
    }
}

#[async_trait]
impl DatabaseAdapter for MySqlDatabase {
    async fn get_data(&self, statement: &str, params: &Params) -> Result<Option<Value>> {
        let rows = Self::fetch(self.connect()?, statement, params).await?;
        debug!("✓ MySQL read returned {} rows", rows.len());
        Ok(normalize_rows(rows))
    }

    async fn set_data(&self, statement: &str, params: &Params) -> Result<Option<Value>> {
        let rows = Self::fetch(self.connect()?, statement, params).await?;
        debug!("✓ MySQL write returned {} rows", rows.len());
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
                        warn!("MySQL rollback failed: {}", rollback);
                    }
                    debug!("✗ MySQL transaction rolled back at statement {}", index);
                    return Err(e);
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| Error::BackendError(e.to_string()))?;

        debug!("✓ MySQL transaction committed {} statements", statements.len());
        Ok(results)
    }
}
