//! Confirmation document schema.

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::IntoIndexes;
use crate::db::schemas::{Metadata, SyncMetadata};

/// Collection name for confirmations
pub const CONFIRMATION_COLLECTION: &str = "confirmations";

/// Confirmation record for a member
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationDoc {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub metadata: Metadata,

    pub member_id: String,

    /// Confirmation date, ISO `YYYY-MM-DD`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation_date: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub officiant: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_metadata: Option<SyncMetadata>,
}

impl IntoIndexes for ConfirmationDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "tenantId": 1, "memberId": 1 },
            Some(
                IndexOptions::builder()
                    .name("tenant_member_index".to_string())
                    .build(),
            ),
        )]
    }
}
