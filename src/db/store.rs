//! Abstract keyed record store with collection semantics.
//!
//! The engine never talks to a database directly; everything goes through
//! [`DocumentStore`], which models a remote document database partitioned by
//! tenant: `get`, `query`-by-field, merge/replace `set`, idempotent
//! `delete`, and batched atomic commits with a hard per-commit mutation
//! ceiling. [`super::mongo::MongoStore`] is the production implementation,
//! [`super::memory::InMemoryStore`] the test/dev one.

use async_trait::async_trait;
use bson::{Bson, Document};

use crate::types::Result;

/// Hard per-commit mutation ceiling of the underlying store.
pub const MAX_BATCH_MUTATIONS: usize = 500;

/// Chunk size used by fan-out callers, bounded below the store ceiling.
pub const FAN_OUT_CHUNK: usize = 450;

/// Comparison operator for [`DocumentStore::query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl QueryOp {
    /// MongoDB operator keyword for this comparison.
    pub fn mongo_operator(&self) -> &'static str {
        match self {
            QueryOp::Eq => "$eq",
            QueryOp::Ne => "$ne",
            QueryOp::Gt => "$gt",
            QueryOp::Gte => "$gte",
            QueryOp::Lt => "$lt",
            QueryOp::Lte => "$lte",
        }
    }

    /// Evaluate the comparison between a stored value and the query value.
    ///
    /// Missing fields only match `Ne`. Ordering comparisons on mixed types
    /// evaluate to false, matching the permissive behavior of the backing
    /// store rather than erroring.
    pub fn matches(&self, stored: Option<&Bson>, value: &Bson) -> bool {
        match self {
            QueryOp::Eq => stored == Some(value),
            QueryOp::Ne => stored != Some(value),
            QueryOp::Gt | QueryOp::Gte | QueryOp::Lt | QueryOp::Lte => {
                let ord = match (stored, value) {
                    (Some(Bson::Int32(a)), Bson::Int32(b)) => a.partial_cmp(b),
                    (Some(Bson::Int64(a)), Bson::Int64(b)) => a.partial_cmp(b),
                    (Some(Bson::Double(a)), Bson::Double(b)) => a.partial_cmp(b),
                    (Some(Bson::String(a)), Bson::String(b)) => a.partial_cmp(b),
                    (Some(Bson::DateTime(a)), Bson::DateTime(b)) => a.partial_cmp(b),
                    _ => None,
                };
                match ord {
                    Some(ord) => match self {
                        QueryOp::Gt => ord.is_gt(),
                        QueryOp::Gte => ord.is_ge(),
                        QueryOp::Lt => ord.is_lt(),
                        QueryOp::Lte => ord.is_le(),
                        _ => unreachable!(),
                    },
                    None => false,
                }
            }
        }
    }
}

/// A single mutation inside a [`WriteBatch`].
#[derive(Debug, Clone)]
pub enum BatchOp {
    Set {
        tenant: String,
        collection: String,
        id: String,
        fields: Document,
        merge: bool,
    },
    Delete {
        tenant: String,
        collection: String,
        id: String,
    },
}

/// An ordered set of mutations committed together.
///
/// Callers chunk large fan-outs into batches of at most [`FAN_OUT_CHUNK`]
/// mutations; [`DocumentStore::commit_batch`] rejects anything above
/// [`MAX_BATCH_MUTATIONS`].
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an upsert. `merge = true` overwrites only the supplied
    /// top-level fields (last-write-wins per field); `merge = false`
    /// replaces the whole document.
    pub fn set(
        &mut self,
        tenant: impl Into<String>,
        collection: impl Into<String>,
        id: impl Into<String>,
        fields: Document,
        merge: bool,
    ) {
        self.ops.push(BatchOp::Set {
            tenant: tenant.into(),
            collection: collection.into(),
            id: id.into(),
            fields,
            merge,
        });
    }

    /// Queue a delete. Deleting an absent document is a no-op.
    pub fn delete(
        &mut self,
        tenant: impl Into<String>,
        collection: impl Into<String>,
        id: impl Into<String>,
    ) {
        self.ops.push(BatchOp::Delete {
            tenant: tenant.into(),
            collection: collection.into(),
            id: id.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

impl FromIterator<BatchOp> for WriteBatch {
    fn from_iter<I: IntoIterator<Item = BatchOp>>(iter: I) -> Self {
        Self {
            ops: iter.into_iter().collect(),
        }
    }
}

/// Tenant-partitioned document store consumed by the engine.
///
/// Stored documents always materialize `id` and `tenantId` fields, so
/// `get`/`query` results are self-describing without the caller having to
/// thread keys alongside them.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch one document by id, or `None` if absent.
    async fn get(&self, tenant: &str, collection: &str, id: &str) -> Result<Option<Document>>;

    /// Fetch every document in the collection whose `field` satisfies the
    /// comparison. No ordering guarantee.
    async fn query(
        &self,
        tenant: &str,
        collection: &str,
        field: &str,
        op: QueryOp,
        value: Bson,
    ) -> Result<Vec<Document>>;

    /// Upsert a document. See [`WriteBatch::set`] for merge semantics.
    async fn set(
        &self,
        tenant: &str,
        collection: &str,
        id: &str,
        fields: Document,
        merge: bool,
    ) -> Result<()>;

    /// Delete a document; absent documents are a no-op.
    async fn delete(&self, tenant: &str, collection: &str, id: &str) -> Result<()>;

    /// Commit a batch of mutations, returning the number applied.
    ///
    /// Rejects batches above [`MAX_BATCH_MUTATIONS`] without applying
    /// anything.
    async fn commit_batch(&self, batch: WriteBatch) -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::bson;

    #[test]
    fn test_query_op_eq_ne() {
        let v = bson!("worship");
        assert!(QueryOp::Eq.matches(Some(&bson!("worship")), &v));
        assert!(!QueryOp::Eq.matches(Some(&bson!("youth")), &v));
        assert!(!QueryOp::Eq.matches(None, &v));
        assert!(QueryOp::Ne.matches(None, &v));
        assert!(QueryOp::Ne.matches(Some(&bson!("youth")), &v));
    }

    #[test]
    fn test_query_op_ordering() {
        assert!(QueryOp::Gt.matches(Some(&bson!(5)), &bson!(3)));
        assert!(!QueryOp::Gt.matches(Some(&bson!(3)), &bson!(3)));
        assert!(QueryOp::Gte.matches(Some(&bson!(3)), &bson!(3)));
        assert!(QueryOp::Lt.matches(Some(&bson!("a")), &bson!("b")));
        // Mixed types never satisfy ordering comparisons
        assert!(!QueryOp::Gt.matches(Some(&bson!("5")), &bson!(3)));
    }

    #[test]
    fn test_write_batch_collects_ops() {
        let mut batch = WriteBatch::new();
        assert!(batch.is_empty());
        batch.set("t1", "members", "m1", bson::doc! { "role": "leader" }, true);
        batch.delete("t1", "members", "m2");
        assert_eq!(batch.len(), 2);
        let ops = batch.into_ops();
        assert!(matches!(ops[0], BatchOp::Set { ref id, .. } if id == "m1"));
        assert!(matches!(ops[1], BatchOp::Delete { ref id, .. } if id == "m2"));
    }
}
