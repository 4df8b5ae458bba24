//! In-memory document store.
//!
//! A faithful double of the remote store used by tests and local
//! development: same merge semantics, same self-describing documents, same
//! batch ceiling. Backed by a `DashMap` of per-(tenant, collection)
//! partitions.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bson::{Bson, Document};
use dashmap::DashMap;

use super::store::{BatchOp, DocumentStore, QueryOp, WriteBatch, MAX_BATCH_MUTATIONS};
use crate::types::{Result, SyncError};

/// Partition key: (tenant, collection).
type PartitionKey = (String, String);

/// In-memory [`DocumentStore`] implementation.
#[derive(Default)]
pub struct InMemoryStore {
    partitions: DashMap<PartitionKey, BTreeMap<String, Document>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents currently in a (tenant, collection) partition.
    pub fn count(&self, tenant: &str, collection: &str) -> usize {
        self.partitions
            .get(&(tenant.to_string(), collection.to_string()))
            .map(|p| p.len())
            .unwrap_or(0)
    }

    fn apply_set(&self, tenant: &str, collection: &str, id: &str, fields: Document, merge: bool) {
        let key = (tenant.to_string(), collection.to_string());
        let mut partition = self.partitions.entry(key).or_default();

        let entry = partition.entry(id.to_string());
        match entry {
            std::collections::btree_map::Entry::Occupied(mut occupied) if merge => {
                let doc = occupied.get_mut();
                for (field, value) in fields {
                    doc.insert(field, value);
                }
            }
            std::collections::btree_map::Entry::Occupied(mut occupied) => {
                occupied.insert(Self::materialize(tenant, id, fields));
            }
            std::collections::btree_map::Entry::Vacant(vacant) => {
                vacant.insert(Self::materialize(tenant, id, fields));
            }
        }
    }

    fn apply_delete(&self, tenant: &str, collection: &str, id: &str) {
        let key = (tenant.to_string(), collection.to_string());
        if let Some(mut partition) = self.partitions.get_mut(&key) {
            partition.remove(id);
        }
    }

    /// Stamp the self-describing `id` / `tenantId` fields onto a document.
    fn materialize(tenant: &str, id: &str, mut fields: Document) -> Document {
        fields.insert("id", Bson::String(id.to_string()));
        fields.insert("tenantId", Bson::String(tenant.to_string()));
        fields
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get(&self, tenant: &str, collection: &str, id: &str) -> Result<Option<Document>> {
        let key = (tenant.to_string(), collection.to_string());
        Ok(self
            .partitions
            .get(&key)
            .and_then(|p| p.get(id).cloned()))
    }

    async fn query(
        &self,
        tenant: &str,
        collection: &str,
        field: &str,
        op: QueryOp,
        value: Bson,
    ) -> Result<Vec<Document>> {
        let key = (tenant.to_string(), collection.to_string());
        let Some(partition) = self.partitions.get(&key) else {
            return Ok(Vec::new());
        };

        Ok(partition
            .values()
            .filter(|doc| op.matches(doc.get(field), &value))
            .cloned()
            .collect())
    }

    async fn set(
        &self,
        tenant: &str,
        collection: &str,
        id: &str,
        fields: Document,
        merge: bool,
    ) -> Result<()> {
        self.apply_set(tenant, collection, id, fields, merge);
        Ok(())
    }

    async fn delete(&self, tenant: &str, collection: &str, id: &str) -> Result<()> {
        self.apply_delete(tenant, collection, id);
        Ok(())
    }

    async fn commit_batch(&self, batch: WriteBatch) -> Result<usize> {
        if batch.len() > MAX_BATCH_MUTATIONS {
            return Err(SyncError::Internal(format!(
                "batch of {} mutations exceeds ceiling of {}",
                batch.len(),
                MAX_BATCH_MUTATIONS
            )));
        }

        let ops = batch.into_ops();
        let applied = ops.len();
        for op in ops {
            match op {
                BatchOp::Set {
                    tenant,
                    collection,
                    id,
                    fields,
                    merge,
                } => self.apply_set(&tenant, &collection, &id, fields, merge),
                BatchOp::Delete {
                    tenant,
                    collection,
                    id,
                } => self.apply_delete(&tenant, &collection, &id),
            }
        }

        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[tokio::test]
    async fn test_set_get_roundtrip_materializes_keys() {
        let store = InMemoryStore::new();
        store
            .set("t1", "members", "m1", doc! { "firstName": "Ada" }, false)
            .await
            .unwrap();

        let found = store.get("t1", "members", "m1").await.unwrap().unwrap();
        assert_eq!(found.get_str("id").unwrap(), "m1");
        assert_eq!(found.get_str("tenantId").unwrap(), "t1");
        assert_eq!(found.get_str("firstName").unwrap(), "Ada");
        assert!(store.get("t2", "members", "m1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_merge_overwrites_only_supplied_fields() {
        let store = InMemoryStore::new();
        store
            .set(
                "t1",
                "members",
                "m1",
                doc! { "firstName": "Ada", "role": "member" },
                false,
            )
            .await
            .unwrap();
        store
            .set("t1", "members", "m1", doc! { "role": "leader" }, true)
            .await
            .unwrap();

        let found = store.get("t1", "members", "m1").await.unwrap().unwrap();
        assert_eq!(found.get_str("firstName").unwrap(), "Ada");
        assert_eq!(found.get_str("role").unwrap(), "leader");
    }

    #[tokio::test]
    async fn test_replace_drops_unsupplied_fields() {
        let store = InMemoryStore::new();
        store
            .set(
                "t1",
                "members",
                "m1",
                doc! { "firstName": "Ada", "role": "member" },
                false,
            )
            .await
            .unwrap();
        store
            .set("t1", "members", "m1", doc! { "firstName": "Ada" }, false)
            .await
            .unwrap();

        let found = store.get("t1", "members", "m1").await.unwrap().unwrap();
        assert!(found.get("role").is_none());
    }

    #[tokio::test]
    async fn test_query_by_field() {
        let store = InMemoryStore::new();
        store
            .set("t1", "members", "m1", doc! { "classificationTag": "worship" }, false)
            .await
            .unwrap();
        store
            .set("t1", "members", "m2", doc! { "classificationTag": "youth" }, false)
            .await
            .unwrap();

        let found = store
            .query(
                "t1",
                "members",
                "classificationTag",
                QueryOp::Eq,
                Bson::String("worship".into()),
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get_str("id").unwrap(), "m1");
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = InMemoryStore::new();
        store
            .set("t1", "members", "m1", doc! {}, false)
            .await
            .unwrap();
        store.delete("t1", "members", "m1").await.unwrap();
        store.delete("t1", "members", "m1").await.unwrap();
        assert!(store.get("t1", "members", "m1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_batch_enforces_ceiling() {
        let store = InMemoryStore::new();
        let mut batch = WriteBatch::new();
        for i in 0..=MAX_BATCH_MUTATIONS {
            batch.set("t1", "members", format!("m{}", i), doc! {}, true);
        }
        assert!(store.commit_batch(batch).await.is_err());
        assert_eq!(store.count("t1", "members"), 0);
    }

    #[tokio::test]
    async fn test_commit_batch_applies_all_ops() {
        let store = InMemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.set("t1", "members", "m1", doc! { "a": 1 }, true);
        batch.set("t2", "members", "m1", doc! { "a": 2 }, true);
        batch.delete("t1", "members", "missing");
        let applied = store.commit_batch(batch).await.unwrap();
        assert_eq!(applied, 3);
        assert_eq!(store.count("t1", "members"), 1);
        assert_eq!(store.count("t2", "members"), 1);
    }
}
