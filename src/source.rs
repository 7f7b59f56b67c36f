use crate::db::Database;
use crate::errors::{MergeError, MergeResult};
use crate::models::{Record, RecordId};
use crate::query::{quote_ident, validate_identifier, Filter, Query};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use serde::Serialize;
use std::sync::Arc;

/// Largest id batch bound into a single `IN (...)` list.
const FETCH_CHUNK: usize = 500;

/// Where a record type lives and how it is projected into the lean query.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDescriptor {
    pub type_tag: String,
    pub table_name: String,
    pub id_field: String,
    /// Per-source columns mapped positionally onto the unified order fields.
    /// Empty means the unified names are used as-is.
    pub order_fields: Vec<String>,
    pub updated_column: String,
    pub created_column: String,
    pub filters: Vec<Filter>,
}

impl SourceDescriptor {
    pub fn new(type_tag: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            table_name: table_name.into(),
            id_field: "id".to_string(),
            order_fields: Vec::new(),
            updated_column: "updated_at".to_string(),
            created_column: "created_at".to_string(),
            filters: Vec::new(),
        }
    }

    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    pub fn with_order_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.order_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timestamp_columns(mut self, updated: impl Into<String>, created: impl Into<String>) -> Self {
        self.updated_column = updated.into();
        self.created_column = created.into();
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }
}

/// One participating record type. Implementations may omit ids they cannot
/// find; the engine reports the gap.
pub trait RecordSource<R: Record>: Send + Sync {
    fn descriptor(&self) -> &SourceDescriptor;

    fn fetch_by_ids(&self, ids: &[RecordId]) -> MergeResult<Vec<R>>;
}

/// A row loaded by [`TableSource`], keyed by column name.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRecord {
    pub type_tag: String,
    pub id: RecordId,
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl TableRecord {
    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.fields.get(field)
    }

    /// `updated` if set, otherwise `created`, parsed as RFC 3339.
    pub fn timestamp(&self, updated: &str, created: &str) -> Option<DateTime<Utc>> {
        [updated, created]
            .into_iter()
            .filter_map(|column| self.get(column).and_then(serde_json::Value::as_str))
            .find_map(|raw| {
                DateTime::parse_from_rfc3339(raw)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            })
    }
}

impl Record for TableRecord {
    fn record_id(&self) -> RecordId {
        self.id
    }
}

/// Generic SQLite-backed source: `SELECT * FROM table WHERE id IN (...)`.
#[derive(Debug, Clone)]
pub struct TableSource {
    descriptor: SourceDescriptor,
    db: Arc<Database>,
}

impl TableSource {
    pub fn new(descriptor: SourceDescriptor, db: Arc<Database>) -> MergeResult<Self> {
        validate_identifier(&descriptor.table_name)?;
        validate_identifier(&descriptor.id_field)?;
        Ok(Self { descriptor, db })
    }
}

impl RecordSource<TableRecord> for TableSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    fn fetch_by_ids(&self, ids: &[RecordId]) -> MergeResult<Vec<TableRecord>> {
        let mut records = Vec::with_capacity(ids.len());
        let id_column = self
            .descriptor
            .id_field
            .rsplit('.')
            .next()
            .unwrap_or(&self.descriptor.id_field);

        for chunk in ids.chunks(FETCH_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let query = Query {
                sql: format!(
                    "SELECT * FROM {} WHERE {} IN ({})",
                    quote_ident(&self.descriptor.table_name),
                    quote_ident(&self.descriptor.id_field),
                    placeholders
                ),
                params: chunk.iter().map(|id| Value::Integer(*id)).collect(),
            };

            let rows = self.db.select(&query)?;
            let id_index = rows.column_index(id_column).ok_or_else(|| {
                MergeError::Decode(format!(
                    "table '{}' has no column '{}'",
                    self.descriptor.table_name, id_column
                ))
            })?;

            for row in rows.rows {
                let id = match row.get(id_index) {
                    Some(Value::Integer(id)) => *id,
                    other => {
                        return Err(MergeError::Decode(format!(
                            "non-integer id {:?} in table '{}'",
                            other, self.descriptor.table_name
                        )))
                    }
                };
                let fields = rows
                    .columns
                    .iter()
                    .cloned()
                    .zip(row.into_iter().map(value_to_json))
                    .collect();
                records.push(TableRecord {
                    type_tag: self.descriptor.type_tag.clone(),
                    id,
                    fields,
                });
            }
        }

        Ok(records)
    }
}

fn value_to_json(value: Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(number) => serde_json::Value::from(number),
        Value::Real(number) => serde_json::Number::from_f64(number)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Text(text) => serde_json::Value::String(text),
        Value::Blob(bytes) => serde_json::Value::from(bytes),
    }
}
