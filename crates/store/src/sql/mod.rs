//! Relational backend: every filter compiles to one grouped query executed on
//! a pooled `sea-orm` connection.

mod compiler;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use sea_orm::sea_query::{Alias, Expr, Query, Value as SeaValue};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection,
    DatabaseTransaction, Statement, TransactionTrait,
};
use serde_json::Value as JsonValue;
use tokio::task::JoinHandle;

use crate::config::{FacetLabConfig, Limits};
use crate::db::{
    build_connection_url, exec, exec_sql, query_all, query_one, quote_ident, read_f64,
    read_index, read_json, read_text, statement,
};
use compiler::{BUCKET_PREFIX, Columns, ColumnType, Compiler, MEASURE_PREFIX};
use facetlab_core::inference::classify;
use facetlab_core::value::canonical_text;
use facetlab_core::{
    CategorialTransform, ContinuousTransform, DataRow, DatasetBackend, DatasetView,
    DeliveryTicket, Facet, FacetError, FacetResult, Facets, Filter, Partition,
};

pub struct SqlBackend {
    conn: DatabaseConnection,
    backend: DatabaseBackend,
    table: String,
    limits: Limits,
    columns: Columns,
    /// Column names in table order.
    column_order: Vec<String>,
}

impl SqlBackend {
    pub async fn connect(config: &FacetLabConfig, base_dir: &Path) -> FacetResult<Self> {
        let url = build_connection_url(config, base_dir)?;
        let mut options = ConnectOptions::new(url);
        if let Some(pool) = &config.pool {
            if let Some(max) = pool.max_connections {
                options.max_connections(max);
            }
            if let Some(min) = pool.min_connections {
                options.min_connections(min);
            }
            if let Some(timeout_ms) = pool.connect_timeout_ms {
                options.connect_timeout(Duration::from_millis(timeout_ms));
            }
            if let Some(timeout_ms) = pool.acquire_timeout_ms {
                options.acquire_timeout(Duration::from_millis(timeout_ms));
            }
            if let Some(timeout_ms) = pool.idle_timeout_ms {
                options.idle_timeout(Duration::from_millis(timeout_ms));
            }
        }
        options.sqlx_logging(false);
        let conn = Database::connect(options).await?;
        let backend = conn.get_database_backend();
        let mut store = Self {
            conn,
            backend,
            table: config.table_name().to_string(),
            limits: config.limits(),
            columns: Columns::new(),
            column_order: Vec::new(),
        };
        store.refresh_columns().await?;
        info!(
            "sql: connected to {:?} table {} with {} columns",
            store.backend,
            store.table,
            store.column_order.len()
        );
        Ok(store)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_order
    }

    fn compiler(&self) -> Compiler<'_> {
        Compiler::new(self.backend, &self.table, &self.columns)
    }

    async fn refresh_columns(&mut self) -> FacetResult<()> {
        let conn = self.conn.clone();
        self.load_columns(&conn).await
    }

    async fn load_columns<C: ConnectionTrait>(&mut self, conn: &C) -> FacetResult<()> {
        let sql = match self.backend {
            DatabaseBackend::Postgres => {
                "SELECT column_name AS name, data_type AS type_name \
                 FROM information_schema.columns WHERE table_name = $1 \
                 ORDER BY ordinal_position"
            }
            DatabaseBackend::MySql => {
                "SELECT column_name AS name, data_type AS type_name \
                 FROM information_schema.columns \
                 WHERE table_name = ? AND table_schema = DATABASE() \
                 ORDER BY ordinal_position"
            }
            _ => "SELECT name, type AS type_name FROM pragma_table_info(?) ORDER BY cid",
        };
        let stmt = Statement::from_sql_and_values(
            self.backend,
            sql,
            [SeaValue::from(self.table.clone())],
        );
        let rows = conn.query_all_raw(stmt).await?;
        self.columns.clear();
        self.column_order.clear();
        for row in rows {
            let name = read_text(&row, "name")?;
            let declared = read_text(&row, "type_name").unwrap_or_default();
            self.columns
                .insert(name.clone(), ColumnType::from_declared(&declared));
            self.column_order.push(name);
        }
        Ok(())
    }

    /// Creates or widens the table for the records and inserts them in one
    /// transaction.
    pub async fn import_records(&mut self, records: &[JsonValue]) -> FacetResult<usize> {
        let mut flattened = Vec::with_capacity(records.len());
        for (at, record) in records.iter().enumerate() {
            if !record.is_object() {
                return Err(FacetError::ingestion(format!(
                    "record {at} is not a JSON object"
                )));
            }
            let mut leaves = Vec::new();
            flatten(record, String::new(), &mut leaves);
            flattened.push(leaves);
        }

        let mut incoming: Vec<(String, ColumnType)> = Vec::new();
        for (name, value) in flattened.iter().flatten() {
            let column_type = match value {
                JsonValue::Number(_) => ColumnType::Numeric,
                JsonValue::Null => continue,
                _ => ColumnType::Text,
            };
            match incoming.iter_mut().find(|(known, _)| known == name) {
                Some((_, known)) if *known != column_type => *known = ColumnType::Text,
                Some(_) => {}
                None => incoming.push((name.clone(), column_type)),
            }
        }
        for (name, value) in flattened.iter().flatten() {
            if value.is_null() && !incoming.iter().any(|(known, _)| known == name) {
                incoming.push((name.clone(), ColumnType::Text));
            }
        }
        let tx = self.conn.begin().await?;
        match self.write_records(&tx, &incoming, &flattened).await {
            Ok(written) => {
                tx.commit().await?;
                if written == 0 {
                    warn!("sql: {} records carry no fields, nothing imported", records.len());
                    return Ok(0);
                }
            }
            Err(err) => {
                tx.rollback().await?;
                self.refresh_columns().await?;
                return Err(err);
            }
        }
        debug!("sql: imported {} records into {}", records.len(), self.table);
        Ok(records.len())
    }

    /// Table changes and inserts of one import, all on the import transaction.
    async fn write_records(
        &mut self,
        tx: &DatabaseTransaction,
        incoming: &[(String, ColumnType)],
        flattened: &[Vec<(String, JsonValue)>],
    ) -> FacetResult<usize> {
        self.ensure_columns(tx, incoming).await?;
        let names: Vec<String> = self.column_order.clone();
        if names.is_empty() {
            return Ok(0);
        }
        for chunk in flattened.chunks(self.limits.max_ingest_batch) {
            let mut insert = Query::insert();
            insert
                .into_table(Alias::new(self.table.clone()))
                .columns(names.iter().map(|name| Alias::new(name.clone())));
            for leaves in chunk {
                let row = names.iter().map(|name| {
                    let value = leaves
                        .iter()
                        .find(|(leaf, _)| leaf == name)
                        .map(|(_, value)| value);
                    Expr::val(self.sea_value(name, value))
                });
                insert
                    .values(row)
                    .map_err(|err| FacetError::ingestion(err.to_string()))?;
            }
            exec(tx, &insert)
                .await
                .map_err(|err| FacetError::ingestion(err.to_string()))?;
        }
        Ok(flattened.len())
    }

    async fn ensure_columns(
        &mut self,
        tx: &DatabaseTransaction,
        incoming: &[(String, ColumnType)],
    ) -> FacetResult<()> {
        let table = quote_ident(self.backend, &self.table);
        if self.column_order.is_empty() {
            if incoming.is_empty() {
                return Ok(());
            }
            let definitions: Vec<String> = incoming
                .iter()
                .map(|(name, column_type)| {
                    format!(
                        "{} {}",
                        quote_ident(self.backend, name),
                        column_type.declared(self.backend)
                    )
                })
                .collect();
            let sql = format!(
                "CREATE TABLE IF NOT EXISTS {table} ({})",
                definitions.join(", ")
            );
            exec_sql(tx, sql).await?;
        } else {
            for (name, column_type) in incoming {
                if self.columns.contains_key(name) {
                    continue;
                }
                let sql = format!(
                    "ALTER TABLE {table} ADD COLUMN {} {}",
                    quote_ident(self.backend, name),
                    column_type.declared(self.backend)
                );
                exec_sql(tx, sql).await?;
            }
        }
        self.load_columns(tx).await
    }

    fn sea_value(&self, column: &str, value: Option<&JsonValue>) -> SeaValue {
        let value = value.filter(|value| !value.is_null());
        match self.columns.get(column) {
            Some(ColumnType::Numeric) => {
                SeaValue::Double(value.and_then(JsonValue::as_f64))
            }
            _ => SeaValue::String(value.and_then(|value| match value {
                JsonValue::Array(_) | JsonValue::Object(_) => Some(value.to_string()),
                _ => canonical_text(value),
            })),
        }
    }
}

/// Scalar leaves of a record under dotted paths; arrays are kept whole.
fn flatten(value: &JsonValue, prefix: String, leaves: &mut Vec<(String, JsonValue)>) {
    match value {
        JsonValue::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(child, path, leaves);
            }
        }
        _ => leaves.push((prefix, value.clone())),
    }
}

/// Reads grouped rows, relabels bucket indices and orders them by index tuple.
fn collect_rows(
    rows: Vec<sea_orm::QueryResult>,
    partitions: &[Partition],
    measures: usize,
) -> FacetResult<Vec<DataRow>> {
    let mut keyed = Vec::with_capacity(rows.len());
    for row in rows {
        let mut buckets = Vec::with_capacity(partitions.len());
        for at in 0..partitions.len() {
            buckets.push(read_index(&row, &format!("{BUCKET_PREFIX}{at}"))?);
        }
        let mut aggregates = Vec::with_capacity(measures);
        for at in 0..measures {
            aggregates.push(read_f64(&row, &format!("{MEASURE_PREFIX}{at}"))?);
        }
        keyed.push((buckets, aggregates));
    }
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(keyed
        .into_iter()
        .map(|(buckets, aggregates)| DataRow {
            groups: buckets
                .iter()
                .zip(partitions)
                .map(|(bucket, partition)| partition.label_of(*bucket))
                .collect(),
            aggregates,
        })
        .collect())
}

#[async_trait]
impl DatasetBackend for SqlBackend {
    fn name(&self) -> &'static str {
        match self.backend {
            DatabaseBackend::Postgres => "postgres",
            DatabaseBackend::MySql => "mysql",
            _ => "sqlite",
        }
    }

    async fn ingest(&mut self, records: Vec<JsonValue>) -> FacetResult<usize> {
        self.import_records(&records).await
    }

    async fn scan_data(&mut self, facets: &mut Facets) -> FacetResult<()> {
        let columns = self.column_order.clone();
        for column in columns {
            if facets.by_accessor(&column).is_some() {
                continue;
            }
            let sample = self.compiler().sample(&column, self.limits.sample_size);
            let rows = query_all(&self.conn, &sample).await?;
            let mut values = Vec::with_capacity(rows.len());
            for row in &rows {
                values.push(read_json(row, "v")?);
            }
            let kind = classify(&values);
            let mut facet = Facet::new(column.as_str(), column.as_str(), kind);
            facet.description = values
                .iter()
                .map(|value| canonical_text(value).unwrap_or_else(|| "null".to_string()))
                .collect::<Vec<_>>()
                .join(", ");
            debug!("sql: column {column} inferred as {}", kind.as_str());
            facets.insert(facet);
        }
        Ok(())
    }

    async fn set_min_max(&mut self, facet: &mut Facet) -> FacetResult<()> {
        let Some(select) = self.compiler().min_max(facet) else {
            return Ok(());
        };
        let row = query_one(&self.conn, &select).await?;
        let (lo, hi) = match row {
            Some(row) => (read_f64(&row, "lo")?, read_f64(&row, "hi")?),
            None => (None, None),
        };
        facet.minval = lo;
        facet.maxval = hi;
        Ok(())
    }

    async fn set_categories(&mut self, facet: &mut Facet) -> FacetResult<()> {
        let select = self.compiler().categories(facet, self.limits.category_limit);
        let rows = query_all(&self.conn, &select).await?;
        let mut counts = Vec::with_capacity(rows.len());
        for row in &rows {
            let count = read_f64(row, "n")?.unwrap_or(0.0) as u64;
            counts.push((read_text(row, "v")?, count));
        }
        facet.categorial_transform = CategorialTransform::from_counts(counts);
        Ok(())
    }

    async fn set_percentiles(&mut self, facet: &mut Facet) -> FacetResult<()> {
        let values = self.sorted_values(facet).await?;
        facet.continuous_transform = ContinuousTransform::percentiles(&values);
        Ok(())
    }

    async fn set_exceedances(&mut self, facet: &mut Facet) -> FacetResult<()> {
        let values = self.sorted_values(facet).await?;
        facet.continuous_transform = ContinuousTransform::exceedances(&values);
        Ok(())
    }

    fn init_data_filter(&mut self, view: &DatasetView<'_>, filter: &Filter) -> FacetResult<()> {
        for partition in &filter.partitions {
            if view.facet(partition.facet_id).is_none() {
                warn!("sql: partition facet {} is unknown", partition.facet_id);
            }
        }
        Ok(())
    }

    fn release_data_filter(&mut self, filter: &Filter) {
        debug!("sql: released {}", filter.id);
    }

    fn update_data_filter(&mut self, _view: &DatasetView<'_>, filter: &Filter) -> FacetResult<()> {
        debug!("sql: selection of {} changed", filter.id);
        Ok(())
    }

    fn get_data(
        &mut self,
        view: &DatasetView<'_>,
        filter: &Filter,
        ticket: DeliveryTicket,
    ) -> Option<JoinHandle<()>> {
        let select = self.compiler().group_by(view, filter);
        let stmt = statement(self.backend, &select);
        let conn = self.conn.clone();
        let partitions = filter.partitions.clone();
        let measures = filter.aggregates.len();
        let id = filter.id;
        Some(tokio::spawn(async move {
            let rows = match conn.query_all_raw(stmt).await {
                Ok(rows) => rows,
                Err(err) => {
                    error!("sql: query for {id} failed: {err}");
                    return;
                }
            };
            match collect_rows(rows, &partitions, measures) {
                Ok(rows) => {
                    if !ticket.deliver(rows) {
                        debug!("sql: result for {id} arrived after a newer request");
                    }
                }
                Err(err) => error!("sql: rows for {id} unreadable: {err}"),
            }
        }))
    }
}

impl SqlBackend {
    async fn sorted_values(&self, facet: &Facet) -> FacetResult<Vec<f64>> {
        let Some(select) = self.compiler().sorted_values(facet) else {
            return Ok(Vec::new());
        };
        let rows = query_all(&self.conn, &select).await?;
        let mut values = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(value) = read_f64(row, "v")? {
                values.push(value);
            }
        }
        values.sort_by(f64::total_cmp);
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flatten_uses_dotted_paths() {
        let mut leaves = Vec::new();
        flatten(
            &json!({"a": {"b": 1, "c": [1, 2]}, "d": null}),
            String::new(),
            &mut leaves,
        );
        let names: Vec<&str> = leaves.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["a.b", "a.c", "d"]);
    }
}
