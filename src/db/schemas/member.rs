//! Member document schema.
//!
//! The one record kind that participates in classification-tag fan-out. A
//! member copy is canonical when `sourceTenantId` is absent or equal to the
//! tenant it lives in; otherwise it is a mirror and deletion of it must
//! never reach the canonical copy.

use bson::{doc, Bson, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::IntoIndexes;
use crate::db::schemas::Metadata;

/// Collection name for members
pub const MEMBER_COLLECTION: &str = "members";

/// Fields that an aggregation-context edit may layer over a mirror without
/// touching the canonical record (serialized names).
pub const OVERRIDE_FIELDS: &[&str] = &["frozen", "role", "ministryPosition"];

/// Structural/grouping fields cleared when a member is mirrored into an
/// aggregation tenant (serialized names).
pub const STRUCTURAL_FIELDS: &[&str] = &["groupId", "department"];

/// Direction of an engine-originated write, stamped into `syncMetadata` to
/// distinguish engine writes from user writes and prevent sync loops.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SyncDirection {
    /// Canonical tenant copy propagated out to aggregation contexts.
    NormalToMinistry,
    /// Aggregation-context record written back into a canonical tenant.
    MinistryToNormal,
}

/// Provenance stamp on any field written by the engine.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadata {
    pub source_tenant_id: String,
    pub synced_at: DateTime,
    pub synced_by: String,
    pub direction: SyncDirection,
}

impl SyncMetadata {
    pub fn stamp(source_tenant_id: &str, synced_by: &str, direction: SyncDirection) -> Self {
        Self {
            source_tenant_id: source_tenant_id.to_string(),
            synced_at: DateTime::now(),
            synced_by: synced_by.to_string(),
            direction,
        }
    }
}

/// Member document
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct MemberDoc {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub metadata: Metadata,

    #[serde(default)]
    pub first_name: String,

    #[serde(default)]
    pub last_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    /// Deactivated members are withdrawn from every aggregation context.
    #[serde(default = "default_true")]
    pub is_active: bool,

    /// True if the record was created directly in its current tenant and
    /// has no canonical copy elsewhere.
    #[serde(default)]
    pub is_native: bool,

    /// Canonical tenant of a mirrored copy. Absent or equal to the current
    /// tenant means this copy is canonical.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_tenant_id: Option<String>,

    /// Aggregation-context grouping key (e.g. a ministry name).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification_tag: Option<String>,

    /// Structural assignment within the canonical tenant; cleared in mirrors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,

    /// Context-only field: excluded from attendance rosters while set.
    #[serde(default)]
    pub frozen: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ministry_position: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_metadata: Option<SyncMetadata>,
}

fn default_true() -> bool {
    true
}

impl MemberDoc {
    /// Create a native member record.
    pub fn new(id: String, first_name: String, last_name: String) -> Self {
        Self {
            id,
            metadata: Metadata::new(),
            first_name,
            last_name,
            is_active: true,
            is_native: true,
            ..Default::default()
        }
    }

    /// Whether this copy is a mirror when resident in `tenant`.
    pub fn is_mirror_in(&self, tenant: &str) -> bool {
        match self.source_tenant_id.as_deref() {
            Some(source) => source != tenant,
            None => false,
        }
    }

    /// Whether this member should be mirrored into aggregation contexts.
    pub fn qualifies_for_fan_out(&self) -> bool {
        self.is_active && self.classification_tag.is_some()
    }

    /// Build the stripped mirror document written into an aggregation
    /// tenant: structural fields nulled out, provenance stamped, native
    /// flag cleared. Merge-written so a re-run converges instead of
    /// duplicating.
    pub fn mirror_copy(&self, canonical_tenant: &str, synced_by: &str) -> Document {
        let mut copy = bson::to_document(self).unwrap_or_default();
        copy.insert("isNative", false);
        copy.insert("sourceTenantId", canonical_tenant);
        for field in STRUCTURAL_FIELDS {
            copy.insert(*field, Bson::Null);
        }
        let stamp = SyncMetadata::stamp(canonical_tenant, synced_by, SyncDirection::NormalToMinistry);
        copy.insert(
            "syncMetadata",
            bson::to_bson(&stamp).unwrap_or(Bson::Null),
        );
        copy
    }
}

/// Split a change-set into its override-eligible part and everything else.
pub fn split_override_fields(changes: Document) -> (Document, Document) {
    let mut overrides = Document::new();
    let mut rest = Document::new();
    for (key, value) in changes {
        if OVERRIDE_FIELDS.contains(&key.as_str()) {
            overrides.insert(key, value);
        } else {
            rest.insert(key, value);
        }
    }
    (overrides, rest)
}

impl IntoIndexes for MemberDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Fan-out scans: members of a tenant carrying a given tag
            (
                doc! { "tenantId": 1, "classificationTag": 1 },
                Some(
                    IndexOptions::builder()
                        .name("tenant_classification_index".to_string())
                        .build(),
                ),
            ),
            // Mirror lookups by canonical tenant
            (
                doc! { "tenantId": 1, "sourceTenantId": 1 },
                Some(
                    IndexOptions::builder()
                        .name("tenant_source_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_vs_mirror_classification() {
        let mut m = MemberDoc::new("m1".into(), "Ada".into(), "Okafor".into());
        assert!(!m.is_mirror_in("ag1"));

        m.source_tenant_id = Some("c1".into());
        assert!(m.is_mirror_in("ag1"));
        assert!(!m.is_mirror_in("c1"));
    }

    #[test]
    fn test_mirror_copy_strips_structure_and_stamps_provenance() {
        let mut m = MemberDoc::new("m1".into(), "Ada".into(), "Okafor".into());
        m.classification_tag = Some("worship".into());
        m.group_id = Some("g7".into());

        let copy = m.mirror_copy("c1", "system");
        assert_eq!(copy.get_bool("isNative").unwrap(), false);
        assert_eq!(copy.get_str("sourceTenantId").unwrap(), "c1");
        assert_eq!(copy.get("groupId"), Some(&Bson::Null));
        let stamp = copy.get_document("syncMetadata").unwrap();
        assert_eq!(stamp.get_str("direction").unwrap(), "normal-to-ministry");
        assert_eq!(stamp.get_str("sourceTenantId").unwrap(), "c1");
    }

    #[test]
    fn test_split_override_fields() {
        let changes = doc! { "role": "leader", "email": "a@example.org", "frozen": true };
        let (overrides, rest) = split_override_fields(changes);
        assert_eq!(overrides.len(), 2);
        assert!(overrides.contains_key("role"));
        assert!(overrides.contains_key("frozen"));
        assert_eq!(rest.len(), 1);
        assert!(rest.contains_key("email"));
    }

    #[test]
    fn test_direction_wire_format() {
        let s = bson::to_bson(&SyncDirection::NormalToMinistry).unwrap();
        assert_eq!(s, Bson::String("normal-to-ministry".into()));
        let s = bson::to_bson(&SyncDirection::MinistryToNormal).unwrap();
        assert_eq!(s, Bson::String("ministry-to-normal".into()));
    }
}
