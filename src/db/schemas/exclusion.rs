//! Mirror exclusion document schema.
//!
//! Permanent tombstones, one per (recordId, canonicalTenantId) pair and per
//! aggregation tenant, written when a mirror is deleted from that context.
//! Once present the fan-out path skips the pair forever; clearing one is an
//! administrative action outside the engine.

use bson::{doc, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::IntoIndexes;

/// Collection name for mirror exclusions (per aggregation tenant)
pub const EXCLUSION_COLLECTION: &str = "mirror_exclusions";

/// Exclusion tombstone
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExclusionDoc {
    #[serde(default)]
    pub id: String,

    pub record_id: String,

    pub canonical_tenant_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub excluded_at: Option<DateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub excluded_by: Option<String>,
}

impl ExclusionDoc {
    pub fn doc_id(record_id: &str, canonical_tenant_id: &str) -> String {
        format!("{}_{}", record_id, canonical_tenant_id)
    }
}

impl IntoIndexes for ExclusionDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "tenantId": 1, "canonicalTenantId": 1 },
            Some(
                IndexOptions::builder()
                    .name("tenant_canonical_index".to_string())
                    .build(),
            ),
        )]
    }
}
