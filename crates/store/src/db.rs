use std::path::Path;

use sea_orm::sea_query::{
    MysqlQueryBuilder, PostgresQueryBuilder, QueryStatementWriter, SqliteQueryBuilder,
};
use sea_orm::{ConnectionTrait, DatabaseBackend, QueryResult, Statement};
use serde_json::Value as JsonValue;

use crate::config::{BackendConfig, FacetLabConfig};
use facetlab_core::{FacetError, FacetResult};

pub(crate) fn build_stmt<S: QueryStatementWriter>(
    backend: DatabaseBackend,
    stmt: &S,
) -> (String, sea_orm::sea_query::Values) {
    match backend {
        DatabaseBackend::Sqlite => stmt.build(SqliteQueryBuilder),
        DatabaseBackend::Postgres => stmt.build(PostgresQueryBuilder),
        DatabaseBackend::MySql => stmt.build(MysqlQueryBuilder),
        _ => stmt.build(SqliteQueryBuilder),
    }
}

pub(crate) fn statement<S: QueryStatementWriter>(backend: DatabaseBackend, stmt: &S) -> Statement {
    let (sql, values) = build_stmt(backend, stmt);
    Statement::from_sql_and_values(backend, sql, values)
}

pub(crate) async fn exec<C, S>(conn: &C, stmt: &S) -> FacetResult<()>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    conn.execute_raw(statement(backend, stmt)).await?;
    Ok(())
}

pub(crate) async fn exec_sql<C: ConnectionTrait>(conn: &C, sql: String) -> FacetResult<()> {
    let backend = conn.get_database_backend();
    conn.execute_raw(Statement::from_string(backend, sql))
        .await?;
    Ok(())
}

pub(crate) async fn query_all<C, S>(conn: &C, stmt: &S) -> FacetResult<Vec<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let rows = conn.query_all_raw(statement(backend, stmt)).await?;
    Ok(rows)
}

pub(crate) async fn query_one<C, S>(conn: &C, stmt: &S) -> FacetResult<Option<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let row = conn.query_one_raw(statement(backend, stmt)).await?;
    Ok(row)
}

pub(crate) fn build_connection_url(config: &FacetLabConfig, base_dir: &Path) -> FacetResult<String> {
    match &config.database {
        BackendConfig::Sqlite { .. } => {
            let path = config.sqlite_path(base_dir)?;
            Ok(format!("sqlite://{}?mode=rwc", path.display()))
        }
        BackendConfig::Postgres { url } | BackendConfig::Mysql { url } => Ok(url.clone()),
        BackendConfig::Memory => Err(FacetError::configuration(
            "memory backend has no connection url",
        )),
    }
}

/// Quotes an identifier for raw SQL fragments.
pub(crate) fn quote_ident(backend: DatabaseBackend, name: &str) -> String {
    match backend {
        DatabaseBackend::MySql => format!("`{}`", name.replace('`', "``")),
        _ => format!("\"{}\"", name.replace('"', "\"\"")),
    }
}

/// Numeric column read that tolerates the integer and float encodings the
/// drivers pick for aggregates.
pub(crate) fn read_f64(row: &QueryResult, column: &str) -> FacetResult<Option<f64>> {
    if let Ok(value) = row.try_get::<Option<f64>>("", column) {
        return Ok(value);
    }
    if let Ok(value) = row.try_get::<Option<i64>>("", column) {
        return Ok(value.map(|value| value as f64));
    }
    if let Ok(value) = row.try_get::<Option<i32>>("", column) {
        return Ok(value.map(f64::from));
    }
    if let Ok(value) = row.try_get::<Option<f32>>("", column) {
        return Ok(value.map(f64::from));
    }
    Err(FacetError::query(format!("column {column} is not numeric")))
}

pub(crate) fn read_index(row: &QueryResult, column: &str) -> FacetResult<usize> {
    let value = read_f64(row, column)?.unwrap_or(0.0);
    if value < 0.0 {
        return Err(FacetError::query(format!("negative bucket {value}")));
    }
    Ok(value as usize)
}

/// Value of a scanned column as JSON, numbers first.
pub(crate) fn read_json(row: &QueryResult, column: &str) -> FacetResult<JsonValue> {
    if let Ok(value) = row.try_get::<Option<String>>("", column) {
        return Ok(value.map_or(JsonValue::Null, JsonValue::String));
    }
    if let Ok(value) = row.try_get::<Option<i64>>("", column) {
        return Ok(value.map_or(JsonValue::Null, JsonValue::from));
    }
    match read_f64(row, column)? {
        Some(value) if value.fract() == 0.0 && value.abs() < 9.007_199_254_740_992e15 => {
            Ok(JsonValue::from(value as i64))
        }
        Some(value) => Ok(JsonValue::from(value)),
        None => Ok(JsonValue::Null),
    }
}

pub(crate) fn read_text(row: &QueryResult, column: &str) -> FacetResult<String> {
    if let Ok(value) = row.try_get::<String>("", column) {
        return Ok(value);
    }
    if let Ok(value) = row.try_get::<i64>("", column) {
        return Ok(value.to_string());
    }
    if let Ok(value) = row.try_get::<f64>("", column) {
        return Ok(value.to_string());
    }
    Err(FacetError::query(format!("column {column} is not text")))
}

#[cfg(test)]
mod tests {
    use super::quote_ident;
    use sea_orm::DatabaseBackend;

    #[test]
    fn quotes_per_dialect() {
        assert_eq!(quote_ident(DatabaseBackend::Sqlite, "a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_ident(DatabaseBackend::Postgres, "price"), "\"price\"");
        assert_eq!(quote_ident(DatabaseBackend::MySql, "a`b"), "`a``b`");
    }
}
