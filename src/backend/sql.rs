//! Named placeholder handling shared by the SQL adapters.
//!
//! Statements are written with `:name` placeholders. Before execution they
//! are rewritten to the engine's positional form (`$1` for PostgreSQL, `?`
//! for MySQL) and the matching values are collected in bind order.
//! Placeholders without a matching parameter are left untouched, `::` casts
//! are not placeholders, and quoted literals are copied verbatim.

use crate::error::{Error, Result};
use crate::Params;
use serde::Deserialize;
use serde_json::Value;

/// Default SQL connection pool size.
/// Override with the DATABASE_POOL_SIZE environment variable or `pool_size`.
const DEFAULT_POOL_SIZE: u32 = 10;

/// Connection options of a SQL `connection` settings entry.
///
/// The entry is either a URL string or an object of discrete fields.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqlConfig {
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    #[serde(alias = "poolSize")]
    pub pool_size: Option<u32>,
}

impl SqlConfig {
    pub fn from_options(options: &Value) -> Result<Self> {
        match options {
            Value::String(url) => Ok(SqlConfig {
                url: Some(url.clone()),
                ..Default::default()
            }),
            other => serde_json::from_value(other.clone()).map_err(|e| {
                Error::ValidationError(format!("Invalid database connection settings: {}", e))
            }),
        }
    }

    /// Connection URL for `scheme` (`postgres`, `mysql`).
    pub fn connection_url(&self, scheme: &str, default_port: u16) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }

        let credentials = match (&self.user, &self.password) {
            (Some(user), Some(password)) => format!("{}:{}@", user, password),
            (Some(user), None) => format!("{}@", user),
            _ => String::new(),
        };

        format!(
            "{}://{}{}:{}/{}",
            scheme,
            credentials,
            self.host.as_deref().unwrap_or("localhost"),
            self.port.unwrap_or(default_port),
            self.database.as_deref().unwrap_or_default()
        )
    }

    pub fn pool_size(&self) -> u32 {
        self.pool_size.unwrap_or_else(|| {
            std::env::var("DATABASE_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse::<u32>().ok())
                .unwrap_or(DEFAULT_POOL_SIZE)
        })
    }
}

/// Positional placeholder syntax of a SQL engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `$1`, `$2`, ... (PostgreSQL)
    Numbered,
    /// `?` (MySQL)
    Question,
}

/// A statement rewritten for positional binding.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledStatement {
    pub sql: String,
    pub binds: Vec<Value>,
}

/// Rewrite `:name` placeholders in `statement` to `style`.
pub fn compile(statement: &str, params: &Params, style: PlaceholderStyle) -> CompiledStatement {
    let mut sql = String::with_capacity(statement.len());
    let mut binds = Vec::new();
    let mut chars = statement.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            sql.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '\'' | '"' | '`' => {
                quote = Some(c);
                sql.push(c);
            }
            ':' if chars.peek() == Some(&':') => {
                sql.push_str("::");
                chars.next();
            }
            ':' if chars
                .peek()
                .map(|n| n.is_ascii_alphabetic() || *n == '_')
                .unwrap_or(false) =>
            {
                let mut name = String::new();
                while let Some(&n) = chars.peek() {
                    if n.is_ascii_alphanumeric() || n == '_' {
                        name.push(n);
                        chars.next();
                    } else {
                        break;
                    }
                }

                match params.get(&name) {
                    Some(value) => {
                        binds.push(value.clone());
                        match style {
                            PlaceholderStyle::Numbered => {
                                sql.push('$');
                                sql.push_str(&binds.len().to_string());
                            }
                            PlaceholderStyle::Question => sql.push('?'),
                        }
                    }
                    None => {
                        sql.push(':');
                        sql.push_str(&name);
                    }
                }
            }
            _ => sql.push(c),
        }
    }

    CompiledStatement { sql, binds }
}
