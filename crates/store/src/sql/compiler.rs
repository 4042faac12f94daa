//! Translates filters and facet scans into `sea_query` statements.
//!
//! Dialect-specific pieces (casts, epoch extraction, pattern matching) are
//! written as custom expressions with `?` placeholders and bound values; the
//! surrounding statement is assembled with the query builder.

use std::collections::HashMap;

use log::warn;
use sea_orm::DatabaseBackend;
use sea_orm::sea_query::{Alias, Expr, ExprTrait, Order, Query, SelectStatement, Value as SeaValue};

use crate::db::quote_ident;
use facetlab_core::transform::WILDCARD;
use facetlab_core::value::{canonical_text, coerce_number};
use facetlab_core::{Aggregate, AggregateOp, DatasetView, Facet, FacetKind, Filter, Partition};

pub(crate) const BUCKET_PREFIX: &str = "b";
pub(crate) const MEASURE_PREFIX: &str = "m";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ColumnType {
    Numeric,
    Text,
}

impl ColumnType {
    pub(crate) fn from_declared(declared: &str) -> Self {
        let declared = declared.to_ascii_uppercase();
        let numeric = ["REAL", "DOUBLE", "FLOAT", "INT", "NUMERIC", "DECIMAL"]
            .iter()
            .any(|name| declared.contains(name));
        if numeric { Self::Numeric } else { Self::Text }
    }

    pub(crate) fn declared(self, backend: DatabaseBackend) -> &'static str {
        match self {
            Self::Numeric => real_type(backend),
            Self::Text => "TEXT",
        }
    }
}

pub(crate) type Columns = HashMap<String, ColumnType>;

/// SQL text with `?` placeholders and the values bound to them.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Fragment {
    pub sql: String,
    pub values: Vec<SeaValue>,
}

impl Fragment {
    fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            values: Vec::new(),
        }
    }

    fn never() -> Self {
        Self::raw("1 = 0")
    }

    fn push(&mut self, sql: &str) {
        self.sql.push_str(sql);
    }

    fn push_value(&mut self, value: impl Into<SeaValue>) {
        self.sql.push('?');
        self.values.push(value.into());
    }

    fn append(&mut self, other: &Fragment) {
        self.sql.push_str(&other.sql);
        self.values.extend(other.values.iter().cloned());
    }

    fn and(parts: Vec<Fragment>) -> Self {
        let mut joined = Fragment::default();
        for (at, part) in parts.iter().enumerate() {
            if at > 0 {
                joined.push(" AND ");
            }
            joined.push("(");
            joined.append(part);
            joined.push(")");
        }
        if joined.sql.is_empty() {
            joined.push("1 = 1");
        }
        joined
    }

    pub(crate) fn into_expr(self) -> Expr {
        if self.values.is_empty() {
            Expr::cust(self.sql)
        } else {
            Expr::cust_with_values(self.sql, self.values)
        }
    }
}

pub(crate) fn real_type(backend: DatabaseBackend) -> &'static str {
    match backend {
        DatabaseBackend::Postgres => "DOUBLE PRECISION",
        DatabaseBackend::MySql => "DOUBLE",
        _ => "REAL",
    }
}

/// Compiles relational statements against one table.
pub(crate) struct Compiler<'a> {
    pub backend: DatabaseBackend,
    pub table: &'a str,
    pub columns: &'a Columns,
}

impl<'a> Compiler<'a> {
    pub(crate) fn new(backend: DatabaseBackend, table: &'a str, columns: &'a Columns) -> Self {
        Self {
            backend,
            table,
            columns,
        }
    }

    fn column_type(&self, facet: &Facet) -> Option<ColumnType> {
        self.columns.get(facet.column()).copied()
    }

    fn ident(&self, facet: &Facet) -> String {
        quote_ident(self.backend, facet.column())
    }

    /// Numeric base expression of an interval facet; `None` when the dialect
    /// cannot express it.
    pub(crate) fn base(&self, facet: &Facet) -> Option<Fragment> {
        let column = self.ident(facet);
        let real = real_type(self.backend);
        let sql = match (facet.kind, self.backend) {
            (FacetKind::Categorial, _) => return None,
            (FacetKind::Continuous, _) => format!("CAST({column} AS {real})"),
            (FacetKind::Datetime, DatabaseBackend::Postgres) => format!(
                "CAST(FLOOR(EXTRACT(EPOCH FROM CAST({column} AS TIMESTAMPTZ))) AS {real})"
            ),
            (FacetKind::Datetime, DatabaseBackend::MySql) => {
                let mut fragment = Fragment::raw("TIMESTAMPDIFF(SECOND, ");
                fragment.push_value("1970-01-01 00:00:00");
                fragment.push(&format!(", CAST({column} AS DATETIME))"));
                return Some(fragment);
            }
            (FacetKind::Datetime, _) => format!("unixepoch({column})"),
            (FacetKind::Duration, DatabaseBackend::Postgres) => {
                format!("CAST(EXTRACT(EPOCH FROM CAST({column} AS INTERVAL)) AS {real})")
            }
            (FacetKind::Duration, _) => {
                warn!(
                    "sql: durations are not supported on {:?}, facet {} degrades",
                    self.backend, facet.accessor
                );
                return None;
            }
        };
        Some(Fragment::raw(sql))
    }

    /// Condition a record must meet for the facet to have a usable value.
    pub(crate) fn validity(&self, facet: &Facet) -> Fragment {
        let Some(column_type) = self.column_type(facet) else {
            warn!("sql: column {} not in {}", facet.column(), self.table);
            return Fragment::never();
        };
        let column = self.ident(facet);
        let mut parts = vec![Fragment::raw(format!("{column} IS NOT NULL"))];
        let real = real_type(self.backend);
        for sentinel in &facet.missing {
            let part = match (facet.kind, column_type, coerce_number(sentinel)) {
                // Numeric sentinels of continuous facets compare by value, as in memory.
                (FacetKind::Continuous, ColumnType::Text, Some(number)) => {
                    let mut part = Fragment::raw(format!("CAST({column} AS {real}) <> "));
                    part.push_value(number);
                    part
                }
                (_, ColumnType::Numeric, Some(number)) => {
                    let mut part = Fragment::raw(format!("{column} <> "));
                    part.push_value(number);
                    part
                }
                (_, ColumnType::Numeric, None) => continue,
                (_, ColumnType::Text, _) => {
                    let Some(text) = canonical_text(sentinel) else {
                        continue;
                    };
                    let mut part = Fragment::raw(format!("{column} <> "));
                    part.push_value(text);
                    part
                }
            };
            parts.push(part);
        }
        if facet.kind.is_interval()
            && let Some(base) = self.base(facet)
        {
            let mut part = base;
            part.push(" IS NOT NULL");
            parts.push(part);
        }
        Fragment::and(parts)
    }

    /// `CASE` expression yielding the bucket index of a partition.
    pub(crate) fn bucket(&self, partition: &Partition, facet: Option<&Facet>) -> Fragment {
        let Some(facet) = facet else {
            return Fragment::raw("0");
        };
        let mut arms = Vec::new();
        if partition.is_categorial() {
            arms.extend(self.categorial_arms(partition, facet));
        } else if let Some(base) = self.base(facet) {
            for (at, group) in partition.groups.iter().enumerate() {
                let Some(bounds) = group.bounds else {
                    continue;
                };
                let mut arm = Fragment::raw("WHEN ");
                arm.append(&base);
                arm.push(if at == 0 { " >= " } else { " > " });
                arm.push_value(bounds.raw_min);
                arm.push(" AND ");
                arm.append(&base);
                arm.push(" <= ");
                arm.push_value(bounds.raw_max);
                arm.push(&format!(" THEN {}", group.index));
                arms.push(arm);
            }
        }
        if arms.is_empty() {
            return Fragment::raw("0");
        }
        let mut case = Fragment::raw("CASE");
        for arm in &arms {
            case.push(" ");
            case.append(arm);
        }
        case.push(" ELSE 0 END");
        case
    }

    fn categorial_arms(&self, partition: &Partition, facet: &Facet) -> Vec<Fragment> {
        let column = self.ident(facet);
        let numeric = self.column_type(facet) == Some(ColumnType::Numeric);
        let index_of = |label: &str| {
            partition
                .groups
                .iter()
                .find(|group| group.value == label)
                .map_or(0, |group| group.index)
        };
        let rules = &facet.categorial_transform.rules;
        let literals = rules.iter().filter(|rule| !rule.is_wildcard());
        let wildcards = rules.iter().filter(|rule| rule.is_wildcard());
        let mut arms = Vec::new();
        for rule in literals {
            let mut arm = Fragment::raw(format!("WHEN {column} = "));
            if numeric {
                let Ok(number) = rule.expression.parse::<f64>() else {
                    continue;
                };
                arm.push_value(number);
            } else {
                arm.push_value(rule.expression.clone());
            }
            arm.push(&format!(" THEN {}", index_of(&rule.group)));
            arms.push(arm);
        }
        let text = if numeric {
            let target = match self.backend {
                DatabaseBackend::MySql => "CHAR",
                _ => "TEXT",
            };
            format!("CAST({column} AS {target})")
        } else {
            column.clone()
        };
        for rule in wildcards {
            let mut arm = Fragment::raw(format!("WHEN {text} "));
            match self.backend {
                DatabaseBackend::Postgres => {
                    arm.push("LIKE ");
                    arm.push_value(like_pattern(&rule.expression));
                }
                DatabaseBackend::MySql => {
                    arm.push("LIKE BINARY ");
                    arm.push_value(like_pattern(&rule.expression));
                }
                _ => {
                    arm.push("GLOB ");
                    arm.push_value(glob_pattern(&rule.expression));
                }
            }
            arm.push(&format!(" THEN {}", index_of(&rule.group)));
            arms.push(arm);
        }
        arms
    }

    fn measure(&self, aggregate: &Aggregate, view: &DatasetView<'_>) -> Fragment {
        let null = Fragment::raw(format!("CAST(NULL AS {})", real_type(self.backend)));
        let Some(facet_id) = aggregate.facet_id else {
            return Fragment::raw("COUNT(*)");
        };
        let Some(facet) = view.facet(facet_id) else {
            return null;
        };
        if self.column_type(facet).is_none() {
            return null;
        }
        let value = match (facet.kind, aggregate.operation) {
            (FacetKind::Categorial, AggregateOp::Count) => Fragment::raw("0"),
            (FacetKind::Categorial, _) => return null,
            _ => match self.base(facet) {
                Some(base) => base,
                None => return null,
            },
        };
        let function = match aggregate.operation {
            AggregateOp::Count => "COUNT",
            AggregateOp::Sum => "SUM",
            AggregateOp::Avg => "AVG",
        };
        let mut measure = Fragment::raw(format!("{function}(CASE WHEN "));
        measure.append(&self.validity(facet));
        measure.push(" THEN ");
        measure.append(&value);
        measure.push(" END)");
        measure
    }

    /// The grouped query of one filter, restricted by the selections of every
    /// other active filter.
    pub(crate) fn group_by(&self, view: &DatasetView<'_>, filter: &Filter) -> SelectStatement {
        let mut select = Query::select();
        select.from(Alias::new(self.table.to_string()));
        for (at, partition) in filter.partitions.iter().enumerate() {
            let facet = view.facet(partition.facet_id);
            select.expr_as(
                self.bucket(partition, facet).into_expr(),
                Alias::new(format!("{BUCKET_PREFIX}{at}")),
            );
            if let Some(facet) = facet {
                select.and_where(self.validity(facet).into_expr());
            }
        }
        for (at, aggregate) in filter.aggregates.iter().enumerate() {
            select.expr_as(
                self.measure(aggregate, view).into_expr(),
                Alias::new(format!("{MEASURE_PREFIX}{at}")),
            );
        }
        for other in view.other_active(filter.id) {
            if let Some(condition) = self.selection(view, other) {
                select.and_where(condition.into_expr());
            }
        }
        for at in 0..filter.partitions.len() {
            select.group_by_col(Alias::new(format!("{BUCKET_PREFIX}{at}")));
        }
        select
    }

    /// Condition matching the records another filter's selection lets through.
    fn selection(&self, view: &DatasetView<'_>, filter: &Filter) -> Option<Fragment> {
        if !filter.has_selection() {
            return None;
        }
        let mut parts = Vec::new();
        for partition in &filter.partitions {
            let facet = view.facet(partition.facet_id);
            if let Some(facet) = facet {
                parts.push(self.validity(facet));
            }
            if !partition.has_selection() {
                continue;
            }
            let indices = partition.selected_indices();
            if indices.is_empty() {
                parts.push(Fragment::never());
                continue;
            }
            let mut part = self.bucket(partition, facet);
            let listed: Vec<String> = indices.iter().map(usize::to_string).collect();
            part.push(&format!(" IN ({})", listed.join(", ")));
            parts.push(part);
        }
        Some(Fragment::and(parts))
    }

    /// `MIN`/`MAX` of an interval facet's base values as `lo`/`hi`.
    pub(crate) fn min_max(&self, facet: &Facet) -> Option<SelectStatement> {
        let base = self.base(facet)?;
        let mut lo = Fragment::raw("MIN(");
        lo.append(&base);
        lo.push(")");
        let mut hi = Fragment::raw("MAX(");
        hi.append(&base);
        hi.push(")");
        Some(
            Query::select()
                .expr_as(lo.into_expr(), Alias::new("lo"))
                .expr_as(hi.into_expr(), Alias::new("hi"))
                .from(Alias::new(self.table.to_string()))
                .and_where(self.validity(facet).into_expr())
                .to_owned(),
        )
    }

    /// Distinct values with their counts as `v`/`n`, most frequent first.
    pub(crate) fn categories(&self, facet: &Facet, limit: usize) -> SelectStatement {
        Query::select()
            .expr_as(Expr::col(Alias::new(facet.column().to_string())), Alias::new("v"))
            .expr_as(Expr::cust("COUNT(*)"), Alias::new("n"))
            .from(Alias::new(self.table.to_string()))
            .and_where(self.validity(facet).into_expr())
            .group_by_col(Alias::new(facet.column().to_string()))
            .order_by(Alias::new("n"), Order::Desc)
            .order_by(Alias::new("v"), Order::Asc)
            .limit(limit as u64)
            .to_owned()
    }

    /// Ascending base values of an interval facet as `v`.
    pub(crate) fn sorted_values(&self, facet: &Facet) -> Option<SelectStatement> {
        let base = self.base(facet)?;
        Some(
            Query::select()
                .expr_as(base.into_expr(), Alias::new("v"))
                .from(Alias::new(self.table.to_string()))
                .and_where(self.validity(facet).into_expr())
                .order_by(Alias::new("v"), Order::Asc)
                .to_owned(),
        )
    }

    /// Distinct non-null values of one column as `v`.
    pub(crate) fn sample(&self, column: &str, limit: usize) -> SelectStatement {
        Query::select()
            .distinct()
            .expr_as(Expr::col(Alias::new(column.to_string())), Alias::new("v"))
            .from(Alias::new(self.table.to_string()))
            .and_where(Expr::col(Alias::new(column.to_string())).is_not_null())
            .limit(limit as u64)
            .to_owned()
    }
}

/// `%` wildcard rule as a `LIKE` pattern with `_` and `\` escaped.
pub(crate) fn like_pattern(expression: &str) -> String {
    let mut pattern = String::with_capacity(expression.len());
    for ch in expression.chars() {
        match ch {
            '\\' | '_' => {
                pattern.push('\\');
                pattern.push(ch);
            }
            _ => pattern.push(ch),
        }
    }
    pattern
}

/// `%` wildcard rule as a SQLite `GLOB` pattern.
pub(crate) fn glob_pattern(expression: &str) -> String {
    let mut pattern = String::with_capacity(expression.len());
    for ch in expression.chars() {
        match ch {
            WILDCARD => pattern.push('*'),
            '*' | '?' | '[' => {
                pattern.push('[');
                pattern.push(ch);
                pattern.push(']');
            }
            _ => pattern.push(ch),
        }
    }
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::build_stmt;
    use facetlab_core::{Facets, Grouping};
    use serde_json::json;

    fn columns() -> Columns {
        Columns::from([
            ("price".to_string(), ColumnType::Numeric),
            ("animal".to_string(), ColumnType::Text),
        ])
    }

    fn price() -> Facet {
        let mut facet = Facet::continuous("price").with_missing(vec![json!(-1)]);
        facet.minval = Some(1.0);
        facet.maxval = Some(10.0);
        facet
    }

    #[test]
    fn patterns_escape_their_metacharacters() {
        assert_eq!(glob_pattern("a%b*"), "a*b[*]");
        assert_eq!(like_pattern("a_%"), "a\\_%");
    }

    #[test]
    fn declared_types_classify() {
        assert_eq!(ColumnType::from_declared("double precision"), ColumnType::Numeric);
        assert_eq!(ColumnType::from_declared("REAL"), ColumnType::Numeric);
        assert_eq!(ColumnType::from_declared("TEXT"), ColumnType::Text);
    }

    #[test]
    fn interval_bucket_closes_only_first_lower_bound() {
        let columns = columns();
        let compiler = Compiler::new(DatabaseBackend::Sqlite, "dataset", &columns);
        let facet = price();
        let mut partition = Partition::new(&facet, 1);
        partition.set_grouping(Grouping::FixedN, 2.0);
        partition.compute_groups(&facet);

        let bucket = compiler.bucket(&partition, Some(&facet));
        assert!(bucket.sql.starts_with("CASE WHEN CAST(\"price\" AS REAL) >= ?"));
        assert!(bucket.sql.contains("THEN 1 WHEN CAST(\"price\" AS REAL) > ?"));
        assert!(bucket.sql.ends_with("THEN 2 ELSE 0 END"));
        assert_eq!(bucket.values.len(), 4);
    }

    #[test]
    fn validity_skips_sentinels_and_null() {
        let columns = columns();
        let compiler = Compiler::new(DatabaseBackend::Sqlite, "dataset", &columns);
        let validity = compiler.validity(&price());
        assert_eq!(
            validity.sql,
            "(\"price\" IS NOT NULL) AND (\"price\" <> ?) AND (CAST(\"price\" AS REAL) IS NOT NULL)"
        );
        assert_eq!(validity.values, vec![SeaValue::from(-1.0f64)]);
    }

    #[test]
    fn text_columns_compare_numeric_sentinels_by_value() {
        let columns = Columns::from([("price".to_string(), ColumnType::Text)]);
        let compiler = Compiler::new(DatabaseBackend::Sqlite, "dataset", &columns);
        let validity = compiler.validity(&price());
        assert!(validity.sql.contains("(CAST(\"price\" AS REAL) <> ?)"));
        assert_eq!(validity.values, vec![SeaValue::from(-1.0f64)]);
    }

    #[test]
    fn unknown_columns_match_nothing() {
        let columns = columns();
        let compiler = Compiler::new(DatabaseBackend::Sqlite, "dataset", &columns);
        assert_eq!(compiler.validity(&Facet::continuous("weight")).sql, "1 = 0");
    }

    #[test]
    fn durations_degrade_outside_postgres() {
        let columns = Columns::from([("wait".to_string(), ColumnType::Text)]);
        let facet = Facet::new("wait", "wait", FacetKind::Duration);
        let sqlite = Compiler::new(DatabaseBackend::Sqlite, "dataset", &columns);
        assert!(sqlite.base(&facet).is_none());
        let postgres = Compiler::new(DatabaseBackend::Postgres, "dataset", &columns);
        assert!(postgres.base(&facet).is_some());
    }

    #[test]
    fn categorial_literals_precede_wildcards() {
        let columns = columns();
        let compiler = Compiler::new(DatabaseBackend::Sqlite, "dataset", &columns);
        let mut facet = Facet::categorial("animal");
        facet.categorial_transform.set_rule_group("c%", "c-words");
        facet.categorial_transform.set_rule_group("dog", "dog");
        let mut partition = Partition::new(&facet, 1);
        partition.compute_groups(&facet);

        let bucket = compiler.bucket(&partition, Some(&facet));
        let literal = bucket.sql.find("\"animal\" = ?").expect("literal arm");
        let wildcard = bucket.sql.find("\"animal\" GLOB ?").expect("wildcard arm");
        assert!(literal < wildcard);
        assert_eq!(
            bucket.values,
            vec![SeaValue::from("dog".to_string()), SeaValue::from("c*".to_string())]
        );
    }

    #[test]
    fn group_by_query_names_buckets_and_measures() {
        let columns = columns();
        let compiler = Compiler::new(DatabaseBackend::Sqlite, "dataset", &columns);
        let facet = price();
        let mut facets = Facets::new();
        facets.insert(facet.clone());
        let mut filter = Filter::new("prices", 1, 1);
        let mut partition = Partition::new(&facet, 1);
        partition.compute_groups(&facet);
        filter.partitions.push(partition);
        filter
            .aggregates
            .push(Aggregate::over(facet.id, AggregateOp::Sum));
        let filters = vec![filter];
        let view = DatasetView {
            facets: &facets,
            filters: &filters,
        };

        let select = compiler.group_by(&view, &filters[0]);
        let (sql, _) = build_stmt(DatabaseBackend::Sqlite, &select);
        assert!(sql.contains("AS \"b0\""));
        assert!(sql.contains("SUM(CASE WHEN"));
        assert!(sql.contains("AS \"m0\""));
        assert!(sql.contains("FROM \"dataset\""));
        assert!(sql.contains("GROUP BY \"b0\""));
    }
}
