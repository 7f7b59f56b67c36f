use crate::config::MergeSettings;
use crate::db::Store;
use crate::errors::{MergeError, MergeResult};
use crate::models::{
    LeanTuple, OrderKey, OrderSpec, OrderValue, PageRequest, PageResult, Record, RecordId,
};
use crate::paginator::paginate;
use crate::query::{Query, UnionQueryBuilder};
use crate::source::{RecordSource, SourceDescriptor};
use rusqlite::types::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

pub type SharedSource<R> = Arc<dyn RecordSource<R> + Send + Sync>;

/// A frozen set of sources plus ordering. Built once, then queried any number
/// of times.
pub struct MergeSession<R: Record> {
    sources: Vec<SharedSource<R>>,
    by_tag: HashMap<String, usize>,
    order: OrderSpec,
    dedup: bool,
    default_page_size: i64,
    max_page_size: i64,
}

pub struct MergeSessionBuilder<R: Record> {
    sources: Vec<SharedSource<R>>,
    order: Option<OrderSpec>,
    dedup: Option<bool>,
    settings: MergeSettings,
}

impl<R: Record> MergeSessionBuilder<R> {
    pub fn source<S>(mut self, source: S) -> Self
    where
        S: RecordSource<R> + 'static,
    {
        self.sources.push(Arc::new(source));
        self
    }

    pub fn shared_source(mut self, source: SharedSource<R>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn order(mut self, order: OrderSpec) -> Self {
        self.order = Some(order);
        self
    }

    pub fn dedup(mut self, dedup: bool) -> Self {
        self.dedup = Some(dedup);
        self
    }

    pub fn settings(mut self, settings: MergeSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> MergeResult<MergeSession<R>> {
        self.settings.validate()?;
        let order = self
            .order
            .unwrap_or_else(|| OrderSpec::timestamp(self.settings.default_direction));
        let dedup = self.dedup.unwrap_or(self.settings.dedup);

        UnionQueryBuilder::new(self.sources.iter().map(|source| source.descriptor()), &order, dedup)?;

        let by_tag = self
            .sources
            .iter()
            .enumerate()
            .map(|(index, source)| (source.descriptor().type_tag.clone(), index))
            .collect();

        Ok(MergeSession {
            sources: self.sources,
            by_tag,
            order,
            dedup,
            default_page_size: self.settings.default_page_size,
            max_page_size: self.settings.max_page_size,
        })
    }
}

impl<R: Record> MergeSession<R> {
    pub fn builder() -> MergeSessionBuilder<R> {
        MergeSessionBuilder {
            sources: Vec::new(),
            order: None,
            dedup: None,
            settings: MergeSettings::default(),
        }
    }

    pub fn order(&self) -> &OrderSpec {
        &self.order
    }

    pub fn dedup(&self) -> bool {
        self.dedup
    }

    pub fn type_tags(&self) -> impl Iterator<Item = &str> {
        self.sources
            .iter()
            .map(|source| source.descriptor().type_tag.as_str())
    }

    pub fn source_for(&self, type_tag: &str) -> Option<&SharedSource<R>> {
        self.by_tag.get(type_tag).map(|index| &self.sources[*index])
    }

    /// First page sized by the configured default.
    pub fn default_page(&self, page_index: i64) -> PageRequest {
        PageRequest::new(page_index, self.default_page_size)
    }

    pub fn query_builder(&self) -> MergeResult<UnionQueryBuilder<'_>> {
        UnionQueryBuilder::new(self.descriptors(), &self.order, self.dedup)
    }

    /// Lean query text for inspection or logging.
    pub fn build_query(&self, request: Option<PageRequest>) -> MergeResult<Query> {
        let limit = request.map(crate::paginator::limit_for).transpose()?;
        Ok(self.query_builder()?.build(limit))
    }

    pub fn count_query(&self) -> MergeResult<Query> {
        Ok(self.query_builder()?.count_query())
    }

    pub fn find_page<S>(&self, store: &S, request: PageRequest) -> MergeResult<PageResult<R>>
    where
        S: Store + ?Sized,
    {
        if request.page_size > self.max_page_size {
            return Err(MergeError::InvalidArgument(format!(
                "page size {} exceeds the maximum of {}",
                request.page_size, self.max_page_size
            )));
        }

        let builder = self.query_builder()?;
        let meta = paginate(request.page_index, request.page_size, || {
            store.scalar(&builder.count_query())
        })?;

        let tuples = self.lean_tuples(store, &builder.build(Some(meta.limit)))?;
        let records = self.rehydrate(&tuples)?;
        tracing::debug!(
            page = request.page_index,
            total_rows = meta.total_rows,
            returned = records.len(),
            "merged page"
        );

        Ok(PageResult {
            total_rows: meta.total_rows,
            records,
            meta,
        })
    }

    /// Every row of the union, in order, without pagination.
    pub fn find_all<S>(&self, store: &S) -> MergeResult<Vec<R>>
    where
        S: Store + ?Sized,
    {
        let builder = self.query_builder()?;
        let tuples = self.lean_tuples(store, &builder.build(None))?;
        self.rehydrate(&tuples)
    }

    pub fn lean_tuples<S>(&self, store: &S, query: &Query) -> MergeResult<Vec<LeanTuple>>
    where
        S: Store + ?Sized,
    {
        let rows = store.execute_query(query)?;
        tracing::debug!(rows = rows.len(), "lean query returned");
        let tuples = rows
            .into_iter()
            .map(|row| decode_lean_row(row, &self.order))
            .collect::<MergeResult<Vec<_>>>()?;

        let direction = self.order.direction;
        let unordered = tuples
            .windows(2)
            .filter(|pair| pair[0].compare(&pair[1], direction) == Ordering::Greater)
            .count();
        if unordered > 0 {
            // Output still follows the store's row order.
            tracing::warn!(unordered, "store returned lean rows out of merge order");
        }
        Ok(tuples)
    }

    /// Loads every referenced record once per `(type_tag, id)` and lays them
    /// out in tuple order.
    pub fn rehydrate(&self, tuples: &[LeanTuple]) -> MergeResult<Vec<R>> {
        let mut wanted: BTreeMap<&str, Vec<RecordId>> = BTreeMap::new();
        let mut seen = HashSet::new();
        for tuple in tuples {
            if seen.insert((tuple.type_tag.as_str(), tuple.id)) {
                wanted.entry(tuple.type_tag.as_str()).or_default().push(tuple.id);
            }
        }

        let mut hydrated: HashMap<&str, HashMap<RecordId, R>> = HashMap::new();
        for (type_tag, ids) in wanted {
            let source = self.source_for(type_tag).ok_or_else(|| {
                MergeError::Configuration(format!(
                    "lean row references unregistered type tag '{}'",
                    type_tag
                ))
            })?;
            tracing::trace!(type_tag, ids = ids.len(), "rehydrating");
            let records: HashMap<RecordId, R> = source
                .fetch_by_ids(&ids)?
                .into_iter()
                .map(|record| (record.record_id(), record))
                .collect();
            hydrated.insert(type_tag, records);
        }

        let mut result = Vec::with_capacity(tuples.len());
        for tuple in tuples {
            let record = hydrated
                .get(tuple.type_tag.as_str())
                .and_then(|records| records.get(&tuple.id))
                .ok_or_else(|| {
                    tracing::warn!(type_tag = %tuple.type_tag, id = tuple.id, "record vanished before rehydration");
                    MergeError::RecordNotFound {
                        type_tag: tuple.type_tag.clone(),
                        id: tuple.id,
                    }
                })?;
            result.push(record.clone());
        }
        Ok(result)
    }

    fn descriptors(&self) -> impl Iterator<Item = &SourceDescriptor> {
        self.sources.iter().map(|source| source.descriptor())
    }
}

impl<R: Record> fmt::Debug for MergeSession<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeSession")
            .field("type_tags", &self.type_tags().collect::<Vec<_>>())
            .field("order", &self.order)
            .field("dedup", &self.dedup)
            .finish()
    }
}

/// One-shot form of [`MergeSession::find_page`]. No page size ceiling is
/// applied beyond positivity.
pub fn find_page<R, S>(
    store: &S,
    sources: &[SharedSource<R>],
    order_spec: OrderSpec,
    dedup: bool,
    page_request: PageRequest,
) -> MergeResult<PageResult<R>>
where
    R: Record,
    S: Store + ?Sized,
{
    sources
        .iter()
        .cloned()
        .fold(MergeSession::builder(), MergeSessionBuilder::shared_source)
        .settings(MergeSettings {
            max_page_size: i64::MAX,
            ..MergeSettings::default()
        })
        .order(order_spec)
        .dedup(dedup)
        .build()?
        .find_page(store, page_request)
}

fn decode_lean_row(row: Vec<Value>, order: &OrderSpec) -> MergeResult<LeanTuple> {
    let expected = 2 + order.columns().len();
    if row.len() != expected {
        return Err(MergeError::Decode(format!(
            "lean row has {} columns, expected {}",
            row.len(),
            expected
        )));
    }

    let mut values = row.into_iter();
    let id = match values.next() {
        Some(Value::Integer(id)) => id,
        other => return Err(MergeError::Decode(format!("lean row id {:?} is not an integer", other))),
    };
    let type_tag = match values.next() {
        Some(Value::Text(tag)) => tag,
        other => return Err(MergeError::Decode(format!("lean row tag {:?} is not text", other))),
    };
    let order_key = match order.key {
        OrderKey::Timestamp => OrderValue::Timestamp(values.next().unwrap_or(Value::Null)),
        OrderKey::Fields(_) => OrderValue::Fields(values.collect()),
    };

    Ok(LeanTuple {
        type_tag,
        id,
        order_key,
    })
}
