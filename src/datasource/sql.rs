//! SQL datasource over sqlx pools.

use super::{BoundParam, Datasource, RenderedRequest};
use crate::config::DatasourceConfig;
use crate::models::{DataType, sql_placeholder_spans};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo};
use std::collections::HashMap;

/// Positional placeholder style of the target database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindStyle {
    /// Postgres `$1`, `$2`, …
    Dollar,
    /// SQLite `?`.
    Question,
}

/// Rewrites named `:name` placeholders into the positional style of the
/// target database.
///
/// Returns the rewritten SQL plus the parameter names in bind order; a name
/// appearing more than once produces one bind slot per occurrence.
#[must_use]
pub fn rewrite_sql_placeholders(sql: &str, style: BindStyle) -> (String, Vec<String>) {
    let spans = sql_placeholder_spans(sql);
    let mut rewritten = String::with_capacity(sql.len());
    let mut names = Vec::with_capacity(spans.len());
    let mut cursor = 0;

    for (range, name) in spans {
        rewritten.push_str(&sql[cursor..range.start]);
        match style {
            BindStyle::Dollar => {
                rewritten.push('$');
                rewritten.push_str(&(names.len() + 1).to_string());
            },
            BindStyle::Question => rewritten.push('?'),
        }
        cursor = range.end;
        names.push(name);
    }
    rewritten.push_str(&sql[cursor..]);
    (rewritten, names)
}

enum SqlPool {
    Postgres(sqlx::PgPool),
    Sqlite(sqlx::SqlitePool),
}

/// SQL datasource backed by a connection pool.
///
/// The connection string selects the database: `postgres://` builds a Postgres
/// pool, `sqlite:` builds a SQLite pool. Pools are created lazily; the first
/// execution opens connections.
pub struct SqlDatasource {
    pool: SqlPool,
}

impl SqlDatasource {
    /// Creates a datasource from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for an unsupported connection string.
    pub fn from_config(config: &DatasourceConfig) -> Result<Self> {
        let url = config.url.as_str();
        let pool = if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            let pool = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .connect_lazy(url)
                .map_err(|e| Error::OperationFailed {
                    operation: "build_sql_pool".to_string(),
                    cause: e.to_string(),
                })?;
            SqlPool::Postgres(pool)
        } else if url.starts_with("sqlite:") {
            let pool = SqlitePoolOptions::new()
                .max_connections(config.max_connections)
                .connect_lazy(url)
                .map_err(|e| Error::OperationFailed {
                    operation: "build_sql_pool".to_string(),
                    cause: e.to_string(),
                })?;
            SqlPool::Sqlite(pool)
        } else {
            return Err(Error::OperationFailed {
                operation: "build_sql_pool".to_string(),
                cause: format!("unsupported sql connection string: {url}"),
            });
        };
        Ok(Self { pool })
    }

    const fn bind_style(&self) -> BindStyle {
        match &self.pool {
            SqlPool::Postgres(_) => BindStyle::Dollar,
            SqlPool::Sqlite(_) => BindStyle::Question,
        }
    }
}

/// A parsed date bind value.
fn parse_date(value: &serde_json::Value, name: &str) -> Result<NaiveDate> {
    value
        .as_str()
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        .ok_or_else(|| Error::OperationFailed {
            operation: "bind_parameter".to_string(),
            cause: format!("parameter '{name}' is not an ISO date: {value}"),
        })
}

/// A parsed datetime bind value.
fn parse_datetime(value: &serde_json::Value, name: &str) -> Result<NaiveDateTime> {
    let text = value.as_str().ok_or_else(|| Error::OperationFailed {
        operation: "bind_parameter".to_string(),
        cause: format!("parameter '{name}' is not an ISO datetime: {value}"),
    })?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.naive_utc());
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S"))
        .map_err(|_| Error::OperationFailed {
            operation: "bind_parameter".to_string(),
            cause: format!("parameter '{name}' is not an ISO datetime: {text}"),
        })
}

macro_rules! bind_typed {
    ($query:expr, $param:expr) => {{
        let param = $param;
        match (param.data_type, &param.value) {
            (_, serde_json::Value::Null) => $query.bind(None::<String>),
            (DataType::Integer, value) => {
                let number = value.as_i64().ok_or_else(|| Error::OperationFailed {
                    operation: "bind_parameter".to_string(),
                    cause: format!("parameter '{}' is not an integer: {value}", param.name),
                })?;
                $query.bind(number)
            },
            (DataType::Decimal, value) => {
                let number = value.as_f64().ok_or_else(|| Error::OperationFailed {
                    operation: "bind_parameter".to_string(),
                    cause: format!("parameter '{}' is not a number: {value}", param.name),
                })?;
                $query.bind(number)
            },
            (DataType::Boolean, value) => {
                let flag = value.as_bool().ok_or_else(|| Error::OperationFailed {
                    operation: "bind_parameter".to_string(),
                    cause: format!("parameter '{}' is not a boolean: {value}", param.name),
                })?;
                $query.bind(flag)
            },
            (DataType::Date, value) => $query.bind(parse_date(value, &param.name)?),
            (DataType::Datetime, value) => $query.bind(parse_datetime(value, &param.name)?),
            (DataType::String | DataType::Enum, value) => {
                let text = value
                    .as_str()
                    .map_or_else(|| value.to_string(), str::to_string);
                $query.bind(text)
            },
        }
    }};
}

fn order_params<'a>(
    names: &[String],
    params: &'a [BoundParam],
) -> Result<Vec<&'a BoundParam>> {
    let by_name: HashMap<&str, &BoundParam> =
        params.iter().map(|p| (p.name.as_str(), p)).collect();
    names
        .iter()
        .map(|name| {
            by_name
                .get(name.as_str())
                .copied()
                .ok_or_else(|| Error::OperationFailed {
                    operation: "bind_parameter".to_string(),
                    cause: format!("no value bound for placeholder :{name}"),
                })
        })
        .collect()
}

fn json_number(value: f64) -> serde_json::Value {
    serde_json::Number::from_f64(value).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

fn pg_row_to_json(row: &PgRow) -> serde_json::Value {
    let mut record = serde_json::Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "BOOL" => row
                .try_get::<Option<bool>, _>(index)
                .ok()
                .flatten()
                .map_or(serde_json::Value::Null, serde_json::Value::Bool),
            "INT2" => decode_int(row.try_get::<Option<i16>, _>(index).ok().flatten().map(i64::from)),
            "INT4" => decode_int(row.try_get::<Option<i32>, _>(index).ok().flatten().map(i64::from)),
            "INT8" => decode_int(row.try_get::<Option<i64>, _>(index).ok().flatten()),
            "FLOAT4" => row
                .try_get::<Option<f32>, _>(index)
                .ok()
                .flatten()
                .map_or(serde_json::Value::Null, |v| json_number(f64::from(v))),
            "FLOAT8" => row
                .try_get::<Option<f64>, _>(index)
                .ok()
                .flatten()
                .map_or(serde_json::Value::Null, json_number),
            "DATE" => row
                .try_get::<Option<NaiveDate>, _>(index)
                .ok()
                .flatten()
                .map_or(serde_json::Value::Null, |d| {
                    serde_json::Value::String(d.format("%Y-%m-%d").to_string())
                }),
            "TIMESTAMP" => row
                .try_get::<Option<NaiveDateTime>, _>(index)
                .ok()
                .flatten()
                .map_or(serde_json::Value::Null, |d| {
                    serde_json::Value::String(d.format("%Y-%m-%dT%H:%M:%S").to_string())
                }),
            "TIMESTAMPTZ" => row
                .try_get::<Option<DateTime<Utc>>, _>(index)
                .ok()
                .flatten()
                .map_or(serde_json::Value::Null, |d| {
                    serde_json::Value::String(d.to_rfc3339())
                }),
            "JSON" | "JSONB" => row
                .try_get::<Option<serde_json::Value>, _>(index)
                .ok()
                .flatten()
                .unwrap_or(serde_json::Value::Null),
            _ => row
                .try_get::<Option<String>, _>(index)
                .ok()
                .flatten()
                .map_or(serde_json::Value::Null, serde_json::Value::String),
        };
        record.insert(column.name().to_string(), value);
    }
    serde_json::Value::Object(record)
}

fn sqlite_row_to_json(row: &SqliteRow) -> serde_json::Value {
    let mut record = serde_json::Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "BOOLEAN" => row
                .try_get::<Option<bool>, _>(index)
                .ok()
                .flatten()
                .map_or(serde_json::Value::Null, serde_json::Value::Bool),
            "INTEGER" => decode_int(row.try_get::<Option<i64>, _>(index).ok().flatten()),
            "REAL" => row
                .try_get::<Option<f64>, _>(index)
                .ok()
                .flatten()
                .map_or(serde_json::Value::Null, json_number),
            _ => row
                .try_get::<Option<String>, _>(index)
                .ok()
                .flatten()
                .map_or(serde_json::Value::Null, serde_json::Value::String),
        };
        record.insert(column.name().to_string(), value);
    }
    serde_json::Value::Object(record)
}

fn decode_int(value: Option<i64>) -> serde_json::Value {
    value.map_or(serde_json::Value::Null, |v| {
        serde_json::Value::Number(v.into())
    })
}

#[async_trait]
impl Datasource for SqlDatasource {
    fn kind(&self) -> &'static str {
        "sql"
    }

    async fn execute(&self, request: &RenderedRequest) -> Result<Vec<serde_json::Value>> {
        let RenderedRequest::Sql { sql, params } = request else {
            return Err(Error::OperationFailed {
                operation: "sql_execute".to_string(),
                cause: "request is not a SQL request".to_string(),
            });
        };

        let (rewritten, names) = rewrite_sql_placeholders(sql, self.bind_style());
        let ordered = order_params(&names, params)?;
        tracing::debug!(sql = %rewritten, binds = names.len(), "Executing SQL template");

        match &self.pool {
            SqlPool::Postgres(pool) => {
                let mut query = sqlx::query(&rewritten);
                for param in ordered {
                    query = bind_typed!(query, param);
                }
                let rows = query.fetch_all(pool).await.map_err(|e| {
                    Error::OperationFailed {
                        operation: "sql_execute".to_string(),
                        cause: e.to_string(),
                    }
                })?;
                Ok(rows.iter().map(pg_row_to_json).collect())
            },
            SqlPool::Sqlite(pool) => {
                let mut query = sqlx::query(&rewritten);
                for param in ordered {
                    query = bind_typed!(query, param);
                }
                let rows = query.fetch_all(pool).await.map_err(|e| {
                    Error::OperationFailed {
                        operation: "sql_execute".to_string(),
                        cause: e.to_string(),
                    }
                })?;
                Ok(rows.iter().map(sqlite_row_to_json).collect())
            },
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::models::HttpLocation;

    #[test]
    fn test_rewrite_dollar_style() {
        let sql = "SELECT * FROM orders WHERE customer_id = :customer_id AND order_date >= :since";
        let (rewritten, names) = rewrite_sql_placeholders(sql, BindStyle::Dollar);
        assert_eq!(
            rewritten,
            "SELECT * FROM orders WHERE customer_id = $1 AND order_date >= $2"
        );
        assert_eq!(names, vec!["customer_id", "since"]);
    }

    #[test]
    fn test_rewrite_question_style() {
        let sql = "SELECT * FROM customers WHERE id = :id";
        let (rewritten, names) = rewrite_sql_placeholders(sql, BindStyle::Question);
        assert_eq!(rewritten, "SELECT * FROM customers WHERE id = ?");
        assert_eq!(names, vec!["id"]);
    }

    #[test]
    fn test_rewrite_repeated_name_binds_twice() {
        let sql = "SELECT * FROM t WHERE a = :x OR b = :x";
        let (rewritten, names) = rewrite_sql_placeholders(sql, BindStyle::Dollar);
        assert_eq!(rewritten, "SELECT * FROM t WHERE a = $1 OR b = $2");
        assert_eq!(names, vec!["x", "x"]);
    }

    #[test]
    fn test_rewrite_preserves_casts() {
        let sql = "SELECT total::numeric FROM orders WHERE id = :id";
        let (rewritten, _) = rewrite_sql_placeholders(sql, BindStyle::Dollar);
        assert!(rewritten.contains("total::numeric"));
        assert!(rewritten.contains("= $1"));
    }

    #[test]
    fn test_order_params_missing_placeholder() {
        let params = vec![BoundParam {
            name: "other".to_string(),
            data_type: DataType::Integer,
            value: serde_json::json!(1),
            location: HttpLocation::Query,
        }];
        let err = order_params(&["customer_id".to_string()], &params).unwrap_err();
        assert!(err.to_string().contains("customer_id"));
    }

    #[test]
    fn test_parse_date_valid_and_invalid() {
        let ok = parse_date(&serde_json::json!("2024-06-01"), "since").unwrap();
        assert_eq!(ok, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        assert!(parse_date(&serde_json::json!("June 1st"), "since").is_err());
    }

    #[test]
    fn test_parse_datetime_formats() {
        assert!(parse_datetime(&serde_json::json!("2024-06-01T10:00:00Z"), "at").is_ok());
        assert!(parse_datetime(&serde_json::json!("2024-06-01T10:00:00"), "at").is_ok());
        assert!(parse_datetime(&serde_json::json!("2024-06-01 10:00:00"), "at").is_ok());
        assert!(parse_datetime(&serde_json::json!(42), "at").is_err());
    }

    #[test]
    fn test_from_config_rejects_unknown_scheme() {
        let config = DatasourceConfig {
            kind: "sql".to_string(),
            url: "mysql://nope".to_string(),
            ..DatasourceConfig::default()
        };
        assert!(SqlDatasource::from_config(&config).is_err());
    }
}
