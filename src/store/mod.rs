//! Document-store collaborator contract.
//!
//! The engagement core persists everything through this seam: versioned JSON
//! documents addressed by slash-separated paths, queried per collection, and
//! mutated either by single commutative writes or by optimistic
//! read-modify-write transactions that re-run on conflicting commits.

pub mod memory;
pub mod sqlite;

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use futures::future::BoxFuture;
use serde_json::Value;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Attempts before an optimistic transaction gives up on conflicting writers.
pub const MAX_TRANSACTION_ATTEMPTS: u32 = 5;

pub type Fields = serde_json::Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transaction aborted after {0} conflicting attempts")]
    Contention(u32),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Slash-separated document path, alternating collection and id segments:
/// `users/u1`, `images/i1/likes/u1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocPath(String);

impl DocPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parent collection path (everything before the final segment).
    pub fn collection(&self) -> &str {
        self.0.rsplit_once('/').map(|(head, _)| head).unwrap_or("")
    }

    /// Final path segment, the document id.
    pub fn id(&self) -> &str {
        self.0.rsplit_once('/').map(|(_, id)| id).unwrap_or(&self.0)
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: DocPath,
    pub fields: Fields,
    /// Bumped on every committed write; the optimistic-concurrency token.
    pub version: u64,
}

impl Document {
    pub fn id(&self) -> &str {
        self.path.id()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    pub fn i64_field(&self, field: &str) -> Option<i64> {
        self.fields.get(field).and_then(Value::as_i64)
    }

    pub fn f64_field(&self, field: &str) -> Option<f64> {
        self.fields.get(field).and_then(Value::as_f64)
    }

    pub fn bool_field(&self, field: &str) -> Option<bool> {
        self.fields.get(field).and_then(Value::as_bool)
    }
}

/// A staged mutation of one document field, resolved at commit time.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Set(Value),
    /// Numeric add against the committed value; integer arithmetic is
    /// preserved when both sides are integral.
    Increment(f64),
    /// Commit-time timestamp, stored as fixed-precision RFC 3339.
    ServerTimestamp,
}

#[derive(Debug, Clone, Default)]
pub struct Patch(pub BTreeMap<String, FieldValue>);

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), FieldValue::Set(value.into()));
        self
    }

    pub fn increment(mut self, field: impl Into<String>, by: f64) -> Self {
        self.0.insert(field.into(), FieldValue::Increment(by));
        self
    }

    pub fn server_time(mut self, field: impl Into<String>) -> Self {
        self.0.insert(field.into(), FieldValue::ServerTimestamp);
        self
    }

    pub fn from_fields(fields: Fields) -> Self {
        Self(
            fields
                .into_iter()
                .map(|(key, value)| (key, FieldValue::Set(value)))
                .collect(),
        )
    }
}

#[derive(Debug, Clone)]
pub enum Write {
    /// Replace the whole document with the resolved patch.
    Set { path: DocPath, patch: Patch },
    /// Merge the patch into the existing document, creating it if absent.
    Merge { path: DocPath, patch: Patch },
    Delete { path: DocPath },
}

impl Write {
    pub fn path(&self) -> &DocPath {
        match self {
            Write::Set { path, .. } | Write::Merge { path, .. } | Write::Delete { path } => path,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Lt,
    Gt,
}

#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// Collection read with equality/range filters, multi-key ordering, a limit
/// and a start-after-document cursor.
#[derive(Debug, Clone)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Vec<(String, Direction)>,
    pub limit: Option<usize>,
    pub start_after: Option<DocPath>,
}

impl Query {
    pub fn collection(path: impl Into<String>) -> Self {
        Self {
            collection: path.into(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            start_after: None,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op: FilterOp::Eq,
            value: value.into(),
        });
        self
    }

    pub fn where_lt(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op: FilterOp::Lt,
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push((field.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start_after(mut self, cursor: DocPath) -> Self {
        self.start_after = Some(cursor);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// A document in the read set changed since it was read.
    Conflict,
}

/// The path and version observed by a transactional read; `None` = absent.
pub type ReadRecord = (DocPath, Option<u64>);

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &DocPath) -> StoreResult<Option<Document>>;

    async fn query(&self, query: &Query) -> StoreResult<Vec<Document>>;

    /// Atomically validate the read set and apply the writes. Returns
    /// `Conflict` (without applying anything) when any read document has a
    /// different committed version than recorded.
    async fn try_commit(&self, reads: &[ReadRecord], writes: &[Write]) -> StoreResult<CommitOutcome>;
}

pub type SharedStore = std::sync::Arc<dyn DocumentStore>;

/// Apply a single write outside any transaction. Field increments still
/// resolve atomically against the committed value, so concurrent counters
/// commute without a read-modify-write round trip.
pub async fn apply(store: &dyn DocumentStore, write: Write) -> StoreResult<()> {
    match store.try_commit(&[], &[write]).await? {
        CommitOutcome::Committed => Ok(()),
        // Unreachable with an empty read set; surface it rather than loop.
        CommitOutcome::Conflict => Err(StoreError::Contention(1)),
    }
}

/// Transactional handle passed to `run_transaction` closures. Reads record
/// the observed document version; writes are staged and committed together.
pub struct Transaction<'s> {
    store: &'s dyn DocumentStore,
    reads: Vec<ReadRecord>,
    writes: Vec<Write>,
}

impl<'s> Transaction<'s> {
    fn new(store: &'s dyn DocumentStore) -> Self {
        Self {
            store,
            reads: Vec::new(),
            writes: Vec::new(),
        }
    }

    pub async fn get(&mut self, path: &DocPath) -> StoreResult<Option<Document>> {
        let doc = self.store.get(path).await?;
        self.reads
            .push((path.clone(), doc.as_ref().map(|d| d.version)));
        Ok(doc)
    }

    pub fn set(&mut self, path: DocPath, patch: Patch) {
        self.writes.push(Write::Set { path, patch });
    }

    pub fn merge(&mut self, path: DocPath, patch: Patch) {
        self.writes.push(Write::Merge { path, patch });
    }

    pub fn delete(&mut self, path: DocPath) {
        self.writes.push(Write::Delete { path });
    }
}

/// Run an optimistic read-modify-write unit. The closure is re-executed in
/// full when the commit loses a race, so it must stage side effects only
/// through the transaction handle, never directly.
pub async fn run_transaction<'s, T, E, F>(store: &'s dyn DocumentStore, mut body: F) -> Result<T, E>
where
    E: From<StoreError>,
    F: for<'t> FnMut(&'t mut Transaction<'s>) -> BoxFuture<'t, Result<T, E>> + Send,
{
    for attempt in 0..MAX_TRANSACTION_ATTEMPTS {
        let mut txn = Transaction::new(store);
        let value = body(&mut txn).await?;
        match store
            .try_commit(&txn.reads, &txn.writes)
            .await
            .map_err(E::from)?
        {
            CommitOutcome::Committed => return Ok(value),
            CommitOutcome::Conflict => {
                tracing::debug!(attempt, "transaction conflict, retrying");
            }
        }
    }
    Err(E::from(StoreError::Contention(MAX_TRANSACTION_ATTEMPTS)))
}

pub(crate) fn server_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Resolve one staged field against the committed value.
pub(crate) fn resolve_field(current: Option<&Value>, op: &FieldValue, now: &str) -> Value {
    match op {
        FieldValue::Set(value) => value.clone(),
        FieldValue::ServerTimestamp => Value::String(now.to_string()),
        FieldValue::Increment(delta) => {
            let integral = delta.fract() == 0.0;
            match current.and_then(Value::as_i64) {
                Some(base) if integral => Value::from(base + *delta as i64),
                _ => {
                    let base = current.and_then(Value::as_f64).unwrap_or(0.0);
                    Value::from(base + delta)
                }
            }
        }
    }
}

/// Merge a patch into existing fields (or an empty map) at commit time.
pub(crate) fn resolve_patch(current: Option<&Fields>, patch: &Patch, now: &str) -> Fields {
    let mut fields = current.cloned().unwrap_or_default();
    for (key, op) in &patch.0 {
        let resolved = resolve_field(fields.get(key), op, now);
        fields.insert(key.clone(), resolved);
    }
    fields
}

/// Total order over JSON values for filters and sorting: null < bool <
/// number < string; arrays/objects compare equal (never used as sort keys).
pub(crate) fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn matches_filters(doc: &Document, filters: &[Filter]) -> bool {
    filters.iter().all(|filter| {
        // Documents without the field never match, so range scans cannot
        // sweep up unrelated docs.
        let Some(actual) = doc.get(&filter.field) else {
            return false;
        };
        let ordering = compare_values(Some(actual), Some(&filter.value));
        match filter.op {
            FilterOp::Eq => actual == &filter.value,
            FilterOp::Lt => ordering == Ordering::Less,
            FilterOp::Gt => ordering == Ordering::Greater,
        }
    })
}

/// Shared filter/sort/cursor/limit pipeline for backends that materialize a
/// collection before narrowing it.
pub(crate) fn apply_query(mut docs: Vec<Document>, query: &Query) -> Vec<Document> {
    docs.retain(|doc| matches_filters(doc, &query.filters));

    docs.sort_by(|a, b| {
        for (field, direction) in &query.order_by {
            let ordering = compare_values(a.get(field), b.get(field));
            let ordering = match direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        a.path.cmp(&b.path)
    });

    if let Some(cursor) = &query.start_after {
        if let Some(position) = docs.iter().position(|doc| &doc.path == cursor) {
            docs.drain(..=position);
        }
    }

    if let Some(limit) = query.limit {
        docs.truncate(limit);
    }

    docs
}
