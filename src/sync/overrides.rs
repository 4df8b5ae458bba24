//! Context-scoped override layer.
//!
//! Writes land in the aggregation tenant's `member_overrides` collection,
//! keyed by (recordId, canonicalTenantId). The canonical record is never
//! touched from here; readers layer the stored fields over the mirror.

use std::sync::Arc;

use bson::DateTime;
use tracing::debug;

use crate::db::schemas::{decode, encode, MemberOverrideDoc, OverrideFields, OVERRIDE_COLLECTION};
use crate::db::DocumentStore;
use crate::types::Result;

/// Sparse per-(record, canonical-tenant) override store.
#[derive(Clone)]
pub struct OverrideStore {
    store: Arc<dyn DocumentStore>,
}

impl OverrideStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Merge `incoming` over any existing override for the pair. Empty
    /// change-sets are a no-op.
    pub async fn upsert(
        &self,
        aggregation_tenant: &str,
        record_id: &str,
        canonical_tenant: &str,
        incoming: &OverrideFields,
        updated_by: &str,
    ) -> Result<()> {
        if incoming.is_empty() {
            return Ok(());
        }

        let id = MemberOverrideDoc::doc_id(record_id, canonical_tenant);
        let existing = self
            .store
            .get(aggregation_tenant, OVERRIDE_COLLECTION, &id)
            .await?
            .map(decode::<MemberOverrideDoc>)
            .transpose()?;

        let fields = match &existing {
            Some(current) => current.fields.merged_with(incoming),
            None => incoming.clone(),
        };

        let doc = MemberOverrideDoc {
            id: id.clone(),
            record_id: record_id.to_string(),
            canonical_tenant_id: canonical_tenant.to_string(),
            fields,
            updated_at: Some(DateTime::now()),
            updated_by: Some(updated_by.to_string()),
        };

        self.store
            .set(aggregation_tenant, OVERRIDE_COLLECTION, &id, encode(&doc)?, false)
            .await?;

        debug!(
            record_id = %record_id,
            canonical_tenant = %canonical_tenant,
            aggregation_tenant = %aggregation_tenant,
            "Override upserted"
        );
        Ok(())
    }

    /// Fetch the override for a pair, if any.
    pub async fn get(
        &self,
        aggregation_tenant: &str,
        record_id: &str,
        canonical_tenant: &str,
    ) -> Result<Option<MemberOverrideDoc>> {
        let id = MemberOverrideDoc::doc_id(record_id, canonical_tenant);
        self.store
            .get(aggregation_tenant, OVERRIDE_COLLECTION, &id)
            .await?
            .map(decode)
            .transpose()
    }

    /// Remove the override for a pair. No-op when absent.
    pub async fn clear(
        &self,
        aggregation_tenant: &str,
        record_id: &str,
        canonical_tenant: &str,
    ) -> Result<()> {
        let id = MemberOverrideDoc::doc_id(record_id, canonical_tenant);
        self.store
            .delete(aggregation_tenant, OVERRIDE_COLLECTION, &id)
            .await
    }
}
