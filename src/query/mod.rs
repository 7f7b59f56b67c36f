//! Union query construction.
//!
//! Every participating source becomes one sub-query with an identical column
//! shape: `id`, the bound type tag, then the order columns. The sub-queries
//! are joined with `UNION` or `UNION ALL`, ordered once, and optionally
//! limited. Identifiers are validated and quoted, values are always bound.

mod filter;

pub use filter::{CompareOp, Filter};

use crate::errors::{MergeError, MergeResult};
use crate::models::{Limit, OrderKey, OrderSpec, ID_COLUMN, TIMESTAMP_COLUMN, TYPE_TAG_COLUMN};
use crate::source::SourceDescriptor;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::Value;
use std::collections::HashSet;

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").expect("valid regex")
});

static ALIAS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

/// SQL text plus its positional parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub sql: String,
    pub params: Vec<Value>,
}

/// A validated, immutable union over a set of sources.
#[derive(Debug, Clone)]
pub struct UnionQueryBuilder<'a> {
    sources: Vec<&'a SourceDescriptor>,
    order: &'a OrderSpec,
    dedup: bool,
}

impl<'a> UnionQueryBuilder<'a> {
    pub fn new<I>(sources: I, order: &'a OrderSpec, dedup: bool) -> MergeResult<Self>
    where
        I: IntoIterator<Item = &'a SourceDescriptor>,
    {
        let sources: Vec<&SourceDescriptor> = sources.into_iter().collect();
        if sources.is_empty() {
            return Err(MergeError::Configuration(
                "at least one record source is required".to_string(),
            ));
        }

        let order_columns = order.columns();
        for column in &order_columns {
            validate_alias(column)?;
        }
        if order_columns
            .iter()
            .any(|column| *column == ID_COLUMN || *column == TYPE_TAG_COLUMN)
        {
            return Err(MergeError::Configuration(format!(
                "order columns may not reuse the reserved names '{}' or '{}'",
                ID_COLUMN, TYPE_TAG_COLUMN
            )));
        }

        let mut tags = HashSet::new();
        for source in &sources {
            if !tags.insert(source.type_tag.as_str()) {
                return Err(MergeError::Configuration(format!(
                    "duplicate type tag '{}'",
                    source.type_tag
                )));
            }
            validate_source(source, order)?;
        }

        Ok(Self {
            sources,
            order,
            dedup,
        })
    }

    pub fn order(&self) -> &OrderSpec {
        self.order
    }

    /// The lean query: ordered, optionally limited.
    pub fn build(&self, limit: Option<Limit>) -> Query {
        let mut query = self.union();

        let direction = self.order.direction.as_sql();
        let order_by: Vec<String> = self
            .order
            .columns()
            .into_iter()
            .chain([TYPE_TAG_COLUMN, ID_COLUMN])
            .map(|column| format!("{} {}", quote_ident(column), direction))
            .collect();
        query.sql.push_str(" ORDER BY ");
        query.sql.push_str(&order_by.join(", "));

        if let Some(limit) = limit {
            query.sql.push_str(" LIMIT ? OFFSET ?");
            query.params.push(Value::Integer(to_sql_int(limit.count)));
            query.params.push(Value::Integer(to_sql_int(limit.offset)));
        }

        query
    }

    /// Row count of the same union, with identical dedup semantics.
    pub fn count_query(&self) -> Query {
        let union = self.union();
        Query {
            sql: format!("SELECT COUNT(*) FROM ({}) AS \"records\"", union.sql),
            params: union.params,
        }
    }

    fn union(&self) -> Query {
        let separator = if self.dedup { " UNION " } else { " UNION ALL " };
        let mut query = Query::default();
        for (index, source) in self.sources.iter().enumerate() {
            if index > 0 {
                query.sql.push_str(separator);
            }
            self.render_source(source, &mut query);
        }
        query
    }

    fn render_source(&self, source: &SourceDescriptor, query: &mut Query) {
        let mut columns = vec![
            format!("{} AS {}", quote_ident(&source.id_field), quote_ident(ID_COLUMN)),
            format!("? AS {}", quote_ident(TYPE_TAG_COLUMN)),
        ];
        query.params.push(Value::Text(source.type_tag.clone()));

        match &self.order.key {
            OrderKey::Timestamp => columns.push(format!(
                "COALESCE({}, {}) AS {}",
                quote_ident(&source.updated_column),
                quote_ident(&source.created_column),
                quote_ident(TIMESTAMP_COLUMN)
            )),
            OrderKey::Fields(names) => {
                let fields = if source.order_fields.is_empty() {
                    names
                } else {
                    &source.order_fields
                };
                for (field, alias) in fields.iter().zip(names) {
                    columns.push(format!("{} AS {}", quote_ident(field), quote_ident(alias)));
                }
            }
        }

        query.sql.push_str("SELECT ");
        query.sql.push_str(&columns.join(", "));
        query.sql.push_str(" FROM ");
        query.sql.push_str(&quote_ident(&source.table_name));

        for (index, filter) in source.filters.iter().enumerate() {
            query.sql.push_str(if index == 0 { " WHERE " } else { " AND " });
            filter.render(&mut query.sql, &mut query.params);
        }
    }
}

/// Builds the lean union query for `sources`.
pub fn build_query(
    sources: &[SourceDescriptor],
    order: &OrderSpec,
    dedup: bool,
    limit: Option<Limit>,
) -> MergeResult<Query> {
    Ok(UnionQueryBuilder::new(sources, order, dedup)?.build(limit))
}

/// Builds the `COUNT(*)` companion of [`build_query`].
pub fn count_query(sources: &[SourceDescriptor], order: &OrderSpec, dedup: bool) -> MergeResult<Query> {
    Ok(UnionQueryBuilder::new(sources, order, dedup)?.count_query())
}

pub fn validate_identifier(raw: &str) -> MergeResult<()> {
    if IDENTIFIER.is_match(raw) {
        Ok(())
    } else {
        Err(MergeError::Configuration(format!(
            "'{}' is not a valid SQL identifier",
            raw
        )))
    }
}

/// Output column names must be bare; a qualified alias is not valid SQL.
fn validate_alias(raw: &str) -> MergeResult<()> {
    if ALIAS.is_match(raw) {
        Ok(())
    } else {
        Err(MergeError::Configuration(format!(
            "order column '{}' must be an unqualified name",
            raw
        )))
    }
}

/// Double-quotes each dot-separated part. Callers validate first.
pub(crate) fn quote_ident(raw: &str) -> String {
    raw.split('.')
        .map(|part| format!("\"{}\"", part))
        .collect::<Vec<_>>()
        .join(".")
}

fn validate_source(source: &SourceDescriptor, order: &OrderSpec) -> MergeResult<()> {
    if source.type_tag.trim().is_empty() {
        return Err(MergeError::Configuration(format!(
            "source for table '{}' has an empty type tag",
            source.table_name
        )));
    }
    validate_identifier(&source.table_name)?;
    validate_identifier(&source.id_field)?;
    for filter in &source.filters {
        validate_identifier(filter.column())?;
    }

    match &order.key {
        OrderKey::Timestamp => {
            validate_identifier(&source.updated_column)?;
            validate_identifier(&source.created_column)?;
        }
        OrderKey::Fields(names) => {
            if !source.order_fields.is_empty() && source.order_fields.len() != names.len() {
                return Err(MergeError::Configuration(format!(
                    "source '{}' projects {} order fields, expected {}",
                    source.type_tag,
                    source.order_fields.len(),
                    names.len()
                )));
            }
            for field in &source.order_fields {
                validate_identifier(field)?;
            }
        }
    }
    Ok(())
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
