//! Context-scoped override document schema.
//!
//! A sparse per-(record, canonical-tenant) layer of fields that apply only
//! inside one aggregation context's view. Override fields are never written
//! into the canonical record.

use bson::{doc, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::IntoIndexes;

/// Collection name for member overrides (per aggregation tenant)
pub const OVERRIDE_COLLECTION: &str = "member_overrides";

/// The override-eligible field values
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct OverrideFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frozen: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ministry_position: Option<String>,
}

impl OverrideFields {
    /// Extract the override-eligible values from a raw change-set.
    pub fn from_changes(changes: &Document) -> Self {
        Self {
            frozen: changes.get_bool("frozen").ok(),
            role: changes.get_str("role").ok().map(str::to_string),
            ministry_position: changes
                .get_str("ministryPosition")
                .ok()
                .map(str::to_string),
        }
    }

    /// Merge `other` over `self`, field by field.
    pub fn merged_with(&self, other: &OverrideFields) -> Self {
        Self {
            frozen: other.frozen.or(self.frozen),
            role: other.role.clone().or_else(|| self.role.clone()),
            ministry_position: other
                .ministry_position
                .clone()
                .or_else(|| self.ministry_position.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frozen.is_none() && self.role.is_none() && self.ministry_position.is_none()
    }

    /// Layer these values over a member for an aggregation-context view.
    pub fn apply_to(&self, member: &mut crate::db::schemas::MemberDoc) {
        if let Some(frozen) = self.frozen {
            member.frozen = frozen;
        }
        if let Some(role) = &self.role {
            member.role = Some(role.clone());
        }
        if let Some(position) = &self.ministry_position {
            member.ministry_position = Some(position.clone());
        }
    }
}

/// Override document keyed by (recordId, canonicalTenantId)
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct MemberOverrideDoc {
    #[serde(default)]
    pub id: String,

    pub record_id: String,

    pub canonical_tenant_id: String,

    #[serde(default)]
    pub fields: OverrideFields,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}

impl MemberOverrideDoc {
    /// Document id for the (record, canonical tenant) pair.
    pub fn doc_id(record_id: &str, canonical_tenant_id: &str) -> String {
        format!("{}_{}", record_id, canonical_tenant_id)
    }
}

impl IntoIndexes for MemberOverrideDoc {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_changes_picks_eligible_fields_only() {
        let changes = doc! { "role": "leader", "email": "a@example.org", "frozen": false };
        let fields = OverrideFields::from_changes(&changes);
        assert_eq!(fields.role.as_deref(), Some("leader"));
        assert_eq!(fields.frozen, Some(false));
        assert!(fields.ministry_position.is_none());
    }

    #[test]
    fn test_merged_with_prefers_newer_values() {
        let old = OverrideFields {
            frozen: Some(true),
            role: Some("member".into()),
            ministry_position: Some("usher".into()),
        };
        let new = OverrideFields {
            frozen: None,
            role: Some("leader".into()),
            ministry_position: None,
        };
        let merged = old.merged_with(&new);
        assert_eq!(merged.frozen, Some(true));
        assert_eq!(merged.role.as_deref(), Some("leader"));
        assert_eq!(merged.ministry_position.as_deref(), Some("usher"));
    }
}
