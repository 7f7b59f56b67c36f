//! Merges several record tables into one ordered, paginated feed.
//!
//! A lean `UNION` query returns `(id, type_tag, order key)` rows in their
//! final order; each referenced type is then loaded once by id and the rows
//! are substituted back in place.

mod config;
mod db;
mod engine;
mod errors;
mod logging;
mod models;
mod paginator;
mod query;
mod source;

pub use crate::config::MergeSettings;
pub use crate::db::{Database, RowSet, Store};
pub use crate::engine::{find_page, MergeSession, MergeSessionBuilder, SharedSource};
pub use crate::errors::{MergeError, MergeResult};
pub use crate::logging::init_tracing;
pub use crate::models::{
    LeanTuple, Limit, OrderKey, OrderSpec, OrderValue, PageMeta, PageRequest, PageResult, Record, RecordId,
    SortDirection, ID_COLUMN, TIMESTAMP_COLUMN, TYPE_TAG_COLUMN,
};
pub use crate::paginator::{limit_for, paginate};
pub use crate::query::{build_query, count_query, validate_identifier, CompareOp, Filter, Query, UnionQueryBuilder};
pub use crate::source::{RecordSource, SourceDescriptor, TableRecord, TableSource};
