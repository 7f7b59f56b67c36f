use crate::errors::{MergeError, MergeResult};
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;

pub type RecordId = i64;

/// Alias of the coalesced `updated_at`/`created_at` column in lean rows.
pub const TIMESTAMP_COLUMN: &str = "timestamp_at";
pub const ID_COLUMN: &str = "id";
pub const TYPE_TAG_COLUMN: &str = "type_tag";

/// A hydrated row. The engine only looks at its id.
pub trait Record: Clone {
    fn record_id(&self) -> RecordId;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }

    fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            Self::Asc => ordering,
            Self::Desc => ordering.reverse(),
        }
    }
}

impl FromStr for SortDirection {
    type Err = MergeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(MergeError::InvalidArgument(format!(
                "unknown sort direction '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "fields")]
pub enum OrderKey {
    /// `COALESCE(updated, created)` per source.
    Timestamp,
    /// Explicit unified column names, compared left to right.
    Fields(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSpec {
    pub key: OrderKey,
    pub direction: SortDirection,
}

impl OrderSpec {
    pub fn timestamp(direction: SortDirection) -> Self {
        Self {
            key: OrderKey::Timestamp,
            direction,
        }
    }

    pub fn fields<I, S>(names: I, direction: SortDirection) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: OrderKey::Fields(names.into_iter().map(Into::into).collect()),
            direction,
        }
    }

    /// Parses `"timestamp_at"` or a comma-separated field list such as
    /// `"priority,created_at"`.
    pub fn parse(raw: &str, direction: SortDirection) -> MergeResult<Self> {
        if raw.trim() == TIMESTAMP_COLUMN {
            return Ok(Self::timestamp(direction));
        }
        let names: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(ToString::to_string)
            .collect();
        if names.is_empty() {
            return Err(MergeError::Configuration(format!(
                "order spec '{}' names no fields",
                raw
            )));
        }
        Ok(Self::fields(names, direction))
    }

    /// Unified output column names of the order key, in comparison order.
    pub fn columns(&self) -> Vec<&str> {
        match &self.key {
            OrderKey::Timestamp => vec![TIMESTAMP_COLUMN],
            OrderKey::Fields(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

impl Default for OrderSpec {
    fn default() -> Self {
        Self::timestamp(SortDirection::default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderValue {
    Timestamp(Value),
    Fields(Vec<Value>),
}

impl OrderValue {
    pub fn values(&self) -> &[Value] {
        match self {
            Self::Timestamp(value) => std::slice::from_ref(value),
            Self::Fields(values) => values,
        }
    }

    /// Lexicographic comparison using SQLite storage-class order.
    pub(crate) fn compare(&self, other: &Self) -> Ordering {
        let left = self.values();
        let right = other.values();
        for (a, b) in left.iter().zip(right) {
            let ordering = compare_values(a, b);
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        left.len().cmp(&right.len())
    }
}

/// One row of the lean union query.
#[derive(Debug, Clone, PartialEq)]
pub struct LeanTuple {
    pub type_tag: String,
    pub id: RecordId,
    pub order_key: OrderValue,
}

impl LeanTuple {
    /// Total order matching the emitted `ORDER BY`: order key, then type tag,
    /// then id, all in `direction`.
    pub fn compare(&self, other: &Self, direction: SortDirection) -> Ordering {
        let ordering = self
            .order_key
            .compare(&other.order_key)
            .then_with(|| self.type_tag.cmp(&other.type_tag))
            .then_with(|| self.id.cmp(&other.id));
        direction.apply(ordering)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    pub page_index: i64,
    pub page_size: i64,
}

impl PageRequest {
    pub fn new(page_index: i64, page_size: i64) -> Self {
        Self {
            page_index,
            page_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Limit {
    pub count: u64,
    pub offset: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub total_rows: u64,
    pub total_pages: u64,
    pub current_page: u64,
    pub limit: Limit,
}

impl PageMeta {
    pub fn has_next(&self) -> bool {
        self.current_page + 1 < self.total_pages
    }

    pub fn has_previous(&self) -> bool {
        self.current_page > 0
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult<R> {
    pub total_rows: u64,
    pub records: Vec<R>,
    pub meta: PageMeta,
}

pub(crate) fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
        (Value::Integer(a), Value::Real(b)) => (*a as f64).total_cmp(b),
        (Value::Real(a), Value::Integer(b)) => a.total_cmp(&(*b as f64)),
        (Value::Real(a), Value::Real(b)) => a.total_cmp(b),
        (Value::Text(a), Value::Text(b)) => a.cmp(b),
        (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
        (a, b) => storage_class_rank(a).cmp(&storage_class_rank(b)),
    }
}

fn storage_class_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Integer(_) | Value::Real(_) => 1,
        Value::Text(_) => 2,
        Value::Blob(_) => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::{LeanTuple, OrderKey, OrderSpec, OrderValue, PageMeta, Limit, SortDirection};
    use rusqlite::types::Value;
    use std::cmp::Ordering;

    fn tuple(tag: &str, id: i64, ts: &str) -> LeanTuple {
        LeanTuple {
            type_tag: tag.to_string(),
            id,
            order_key: OrderValue::Timestamp(Value::Text(ts.to_string())),
        }
    }

    #[test]
    fn parses_timestamp_keyword_and_field_lists() {
        let spec = OrderSpec::parse("timestamp_at", SortDirection::Asc).expect("parse");
        assert_eq!(spec.key, OrderKey::Timestamp);

        let spec = OrderSpec::parse(" priority , created_at,", SortDirection::Desc).expect("parse");
        assert_eq!(spec.columns(), vec!["priority", "created_at"]);

        assert!(OrderSpec::parse(" , ", SortDirection::Desc).is_err());
    }

    #[test]
    fn direction_parses_case_insensitively() {
        assert_eq!("ASC".parse::<SortDirection>().expect("asc"), SortDirection::Asc);
        assert_eq!(" desc ".parse::<SortDirection>().expect("desc"), SortDirection::Desc);
        assert!("sideways".parse::<SortDirection>().is_err());
    }

    #[test]
    fn null_sorts_before_numbers_and_text() {
        let null = OrderValue::Fields(vec![Value::Null]);
        let number = OrderValue::Fields(vec![Value::Real(1.5)]);
        let text = OrderValue::Fields(vec![Value::Text("a".to_string())]);
        assert_eq!(null.compare(&number), Ordering::Less);
        assert_eq!(number.compare(&text), Ordering::Less);
        assert_eq!(
            OrderValue::Fields(vec![Value::Integer(2)]).compare(&number),
            Ordering::Greater
        );
    }

    #[test]
    fn ties_break_on_tag_then_id() {
        let a1 = tuple("A", 1, "2024-01-01T00:00:00+00:00");
        let a2 = tuple("A", 2, "2024-01-01T00:00:00+00:00");
        let b1 = tuple("B", 1, "2024-01-01T00:00:00+00:00");
        assert_eq!(a1.compare(&a2, SortDirection::Asc), Ordering::Less);
        assert_eq!(a2.compare(&b1, SortDirection::Asc), Ordering::Less);
        assert_eq!(a1.compare(&b1, SortDirection::Desc), Ordering::Greater);
    }

    #[test]
    fn page_meta_reports_neighbours() {
        let meta = PageMeta {
            total_rows: 5,
            total_pages: 3,
            current_page: 1,
            limit: Limit { count: 2, offset: 2 },
        };
        assert!(meta.has_next());
        assert!(meta.has_previous());
    }
}
