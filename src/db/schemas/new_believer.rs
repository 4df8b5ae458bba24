//! New-believer document schema.

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::IntoIndexes;
use crate::db::schemas::{Metadata, SyncMetadata};

/// Collection name for new believers
pub const NEW_BELIEVER_COLLECTION: &str = "new_believers";

/// Conversion record, optionally linked to a member
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct NewBelieverDoc {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub metadata: Metadata,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_id: Option<String>,

    #[serde(default)]
    pub first_name: String,

    #[serde(default)]
    pub last_name: String,

    /// Decision date, ISO `YYYY-MM-DD`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_date: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub counselor: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_metadata: Option<SyncMetadata>,
}

impl IntoIndexes for NewBelieverDoc {
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
