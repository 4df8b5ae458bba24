//! MongoDB-backed document store.
//!
//! Pattern adapted from holo-host/rust/util_libs/db/src/mongodb.
//!
//! Tenant partitioning is field-based: every document lands in a per-kind
//! collection under `_id = "{tenant}:{id}"` with `tenantId` materialized for
//! queries. Schema-declared indexes are applied once at startup.

use bson::{doc, Bson, Document};
use futures_util::StreamExt;
use mongodb::{options::IndexOptions, Client, Collection, IndexModel};
use tracing::{error, info};

use super::schemas::{
    AccessIndexDoc, AttendanceDoc, ConfirmationDoc, CrossTenantLinkDoc, ExclusionDoc,
    InvitationDoc, MemberDoc, MemberOverrideDoc, NewBelieverDoc, UserProfileDoc,
    ACCESS_INDEX_COLLECTION, ATTENDANCE_COLLECTION, CONFIRMATION_COLLECTION,
    EXCLUSION_COLLECTION, INVITATION_COLLECTION, LINK_COLLECTION, MEMBER_COLLECTION,
    NEW_BELIEVER_COLLECTION, OVERRIDE_COLLECTION, USER_COLLECTION,
};
use super::store::{BatchOp, DocumentStore, QueryOp, WriteBatch, MAX_BATCH_MUTATIONS};
use crate::types::{Result, SyncError};
use async_trait::async_trait;

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// MongoDB-backed [`DocumentStore`].
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    db_name: String,
}

impl MongoStore {
    /// Connect and verify reachability.
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self> {
        info!("Connecting to MongoDB at {}", uri);

        // Use serverSelectionTimeoutMS to avoid hanging on unreachable MongoDB
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| SyncError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| SyncError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Apply schema-declared indexes for every collection the engine touches.
    pub async fn ensure_indexes(&self) -> Result<()> {
        self.apply_indexes(MEMBER_COLLECTION, MemberDoc::into_indices()).await?;
        self.apply_indexes(ATTENDANCE_COLLECTION, AttendanceDoc::into_indices()).await?;
        self.apply_indexes(NEW_BELIEVER_COLLECTION, NewBelieverDoc::into_indices()).await?;
        self.apply_indexes(CONFIRMATION_COLLECTION, ConfirmationDoc::into_indices()).await?;
        self.apply_indexes(OVERRIDE_COLLECTION, MemberOverrideDoc::into_indices()).await?;
        self.apply_indexes(EXCLUSION_COLLECTION, ExclusionDoc::into_indices()).await?;
        self.apply_indexes(USER_COLLECTION, UserProfileDoc::into_indices()).await?;
        self.apply_indexes(INVITATION_COLLECTION, InvitationDoc::into_indices()).await?;
        self.apply_indexes(LINK_COLLECTION, CrossTenantLinkDoc::into_indices()).await?;
        self.apply_indexes(ACCESS_INDEX_COLLECTION, AccessIndexDoc::into_indices()).await?;
        Ok(())
    }

    async fn apply_indexes(
        &self,
        collection: &str,
        indices: Vec<(Document, Option<IndexOptions>)>,
    ) -> Result<()> {
        if indices.is_empty() {
            return Ok(());
        }

        let models: Vec<IndexModel> = indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.collection(collection)
            .create_indexes(models)
            .await
            .map_err(|e| {
                SyncError::Database(format!(
                    "Failed to create indexes on '{}': {}",
                    collection, e
                ))
            })?;

        Ok(())
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.client.database(&self.db_name).collection::<Document>(name)
    }

    /// Composite primary key: tenant-scoped ids share one physical collection.
    fn composite_id(tenant: &str, id: &str) -> String {
        format!("{}:{}", tenant, id)
    }

    /// Stamp the self-describing `id` / `tenantId` fields onto a document.
    fn materialize(tenant: &str, id: &str, mut fields: Document) -> Document {
        fields.insert("id", Bson::String(id.to_string()));
        fields.insert("tenantId", Bson::String(tenant.to_string()));
        fields
    }

    async fn apply_set(
        &self,
        tenant: &str,
        collection: &str,
        id: &str,
        fields: Document,
        merge: bool,
    ) -> Result<()> {
        let cid = Self::composite_id(tenant, id);
        let fields = Self::materialize(tenant, id, fields);

        if merge {
            self.collection(collection)
                .update_one(doc! { "_id": &cid }, doc! { "$set": fields })
                .upsert(true)
                .await
                .map_err(|e| SyncError::Database(format!("Merge write failed: {}", e)))?;
        } else {
            self.collection(collection)
                .replace_one(doc! { "_id": &cid }, fields)
                .upsert(true)
                .await
                .map_err(|e| SyncError::Database(format!("Replace write failed: {}", e)))?;
        }

        Ok(())
    }

    async fn apply_delete(&self, tenant: &str, collection: &str, id: &str) -> Result<()> {
        let cid = Self::composite_id(tenant, id);
        self.collection(collection)
            .delete_one(doc! { "_id": &cid })
            .await
            .map_err(|e| SyncError::Database(format!("Delete failed: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn get(&self, tenant: &str, collection: &str, id: &str) -> Result<Option<Document>> {
        let cid = Self::composite_id(tenant, id);
        let mut found = self
            .collection(collection)
            .find_one(doc! { "_id": &cid })
            .await
            .map_err(|e| SyncError::Database(format!("Find failed: {}", e)))?;

        if let Some(doc) = found.as_mut() {
            doc.remove("_id");
        }
        Ok(found)
    }

    async fn query(
        &self,
        tenant: &str,
        collection: &str,
        field: &str,
        op: QueryOp,
        value: Bson,
    ) -> Result<Vec<Document>> {
        let mut criteria = Document::new();
        criteria.insert(op.mongo_operator(), value);
        let mut filter = doc! { "tenantId": tenant };
        filter.insert(field, criteria);

        let cursor = self
            .collection(collection)
            .find(filter)
            .await
            .map_err(|e| SyncError::Database(format!("Query failed: {}", e)))?;

        let results: Vec<Document> = cursor
            .filter_map(|doc| async {
                match doc {
                    Ok(mut d) => {
                        d.remove("_id");
                        Some(d)
                    }
                    Err(e) => {
                        error!("Error reading document: {}", e);
                        None
                    }
                }
            })
            .collect()
            .await;

        Ok(results)
    }

    async fn set(
        &self,
        tenant: &str,
        collection: &str,
        id: &str,
        fields: Document,
        merge: bool,
    ) -> Result<()> {
        self.apply_set(tenant, collection, id, fields, merge).await
    }

    async fn delete(&self, tenant: &str, collection: &str, id: &str) -> Result<()> {
        self.apply_delete(tenant, collection, id).await
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
        let mut applied = 0usize;
        for op in ops {
            match op {
                BatchOp::Set {
                    tenant,
                    collection,
                    id,
                    fields,
                    merge,
                } => self.apply_set(&tenant, &collection, &id, fields, merge).await?,
                BatchOp::Delete {
                    tenant,
                    collection,
                    id,
                } => self.apply_delete(&tenant, &collection, &id).await?,
            }
            applied += 1;
        }

        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    // Integration tests would require a running MongoDB instance;
    // engine-level coverage runs against db::memory::InMemoryStore.
}
