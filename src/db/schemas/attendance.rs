//! Attendance document schema.
//!
//! Each tenant's attendance ledger is tenant-authoritative: rows are
//! mirrored on add but updates never propagate across tenants.

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::IntoIndexes;
use crate::db::schemas::{Metadata, SyncMetadata};

/// Collection name for attendance rows
pub const ATTENDANCE_COLLECTION: &str = "attendance";

/// Attendance row for one member on one date
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceDoc {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub metadata: Metadata,

    /// Owning member within the same tenant
    pub member_id: String,

    /// Service date, ISO `YYYY-MM-DD`
    pub date: String,

    #[serde(default = "default_true")]
    pub present: bool,

    /// Service or meeting label ("sunday", "midweek", ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_metadata: Option<SyncMetadata>,
}

fn default_true() -> bool {
    true
}

impl AttendanceDoc {
    /// Deterministic row id so repeated adds for the same member/date merge
    /// instead of duplicating.
    pub fn row_id(member_id: &str, date: &str) -> String {
        format!("{}_{}", member_id, date)
    }
}

impl IntoIndexes for AttendanceDoc {
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
