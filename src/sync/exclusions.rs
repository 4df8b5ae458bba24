//! Mirror exclusion registry.
//!
//! Append-only tombstones consulted by every fan-out pass. Recording is
//! idempotent; nothing here ever clears an entry.

use std::sync::Arc;

use bson::DateTime;
use tracing::debug;

use crate::db::schemas::{encode, ExclusionDoc, EXCLUSION_COLLECTION};
use crate::db::DocumentStore;
use crate::types::Result;

/// Permanent (recordId, canonicalTenantId) tombstone set, one per
/// aggregation tenant.
#[derive(Clone)]
pub struct ExclusionRegistry {
    store: Arc<dyn DocumentStore>,
}

impl ExclusionRegistry {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Record a tombstone. Re-recording an existing pair is a no-op merge.
    pub async fn record(
        &self,
        aggregation_tenant: &str,
        record_id: &str,
        canonical_tenant: &str,
        excluded_by: &str,
    ) -> Result<()> {
        let id = ExclusionDoc::doc_id(record_id, canonical_tenant);
        let doc = ExclusionDoc {
            id: id.clone(),
            record_id: record_id.to_string(),
            canonical_tenant_id: canonical_tenant.to_string(),
            excluded_at: Some(DateTime::now()),
            excluded_by: Some(excluded_by.to_string()),
        };

        self.store
            .set(aggregation_tenant, EXCLUSION_COLLECTION, &id, encode(&doc)?, true)
            .await?;

        debug!(
            record_id = %record_id,
            canonical_tenant = %canonical_tenant,
            aggregation_tenant = %aggregation_tenant,
            "Exclusion recorded"
        );
        Ok(())
    }

    /// Whether the pair is tombstoned in this aggregation tenant.
    pub async fn is_excluded(
        &self,
        aggregation_tenant: &str,
        record_id: &str,
        canonical_tenant: &str,
    ) -> Result<bool> {
        let id = ExclusionDoc::doc_id(record_id, canonical_tenant);
        Ok(self
            .store
            .get(aggregation_tenant, EXCLUSION_COLLECTION, &id)
            .await?
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryStore;

    #[tokio::test]
    async fn test_record_then_check() {
        let registry = ExclusionRegistry::new(Arc::new(InMemoryStore::new()));
        assert!(!registry.is_excluded("ag1", "m1", "c1").await.unwrap());

        registry.record("ag1", "m1", "c1", "u1").await.unwrap();
        assert!(registry.is_excluded("ag1", "m1", "c1").await.unwrap());
        // Scoped to the aggregation tenant that deleted the mirror
        assert!(!registry.is_excluded("ag2", "m1", "c1").await.unwrap());
    }

    #[tokio::test]
    async fn test_record_is_idempotent() {
        let registry = ExclusionRegistry::new(Arc::new(InMemoryStore::new()));
        registry.record("ag1", "m1", "c1", "u1").await.unwrap();
        registry.record("ag1", "m1", "c1", "u2").await.unwrap();
        assert!(registry.is_excluded("ag1", "m1", "c1").await.unwrap());
    }
}
