//! Cross-tenant authorization link and derived access-index schemas.
//!
//! A link grants a viewer read/write reach into an owner's tenant; the
//! derived index entry, keyed `{viewerUserId}_{ownerTenantId}`, makes the
//! authorization check a single keyed read. At most one non-revoked index
//! entry may exist per key; swaps create the replacement before revoking
//! the old entry so readers never observe zero valid entries.

use bson::{doc, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::db::mongo::IntoIndexes;

/// Collection name for cross-tenant links
pub const LINK_COLLECTION: &str = "cross_tenant_links";

/// Collection name for the derived access index
pub const ACCESS_INDEX_COLLECTION: &str = "access_index";

/// Reach granted by a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LinkPermission {
    #[default]
    Read,
    Write,
}

impl fmt::Display for LinkPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkPermission::Read => write!(f, "read"),
            LinkPermission::Write => write!(f, "write"),
        }
    }
}

/// Cross-tenant link document
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct CrossTenantLinkDoc {
    #[serde(default)]
    pub id: String,

    pub viewer_user_id: String,

    pub owner_user_id: String,

    pub owner_tenant_id: String,

    #[serde(default)]
    pub permission: LinkPermission,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,

    #[serde(default)]
    pub revoked: bool,

    #[serde(rename = "_fixedByMigration", skip_serializing_if = "Option::is_none")]
    pub fixed_by_migration: Option<bool>,
}

/// Derived access-index entry
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct AccessIndexDoc {
    /// `{viewerUserId}_{ownerTenantId}`
    #[serde(default)]
    pub id: String,

    pub viewer_user_id: String,

    pub owner_user_id: String,

    pub owner_tenant_id: String,

    /// The link this entry was derived from
    pub link_id: String,

    #[serde(default)]
    pub permission: LinkPermission,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,

    #[serde(default)]
    pub revoked: bool,

    #[serde(rename = "_fixedByMigration", skip_serializing_if = "Option::is_none")]
    pub fixed_by_migration: Option<bool>,
}

impl AccessIndexDoc {
    /// O(1) lookup key for a (viewer, owner tenant) pair.
    pub fn index_key(viewer_user_id: &str, owner_tenant_id: &str) -> String {
        format!("{}_{}", viewer_user_id, owner_tenant_id)
    }
}

impl IntoIndexes for CrossTenantLinkDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "ownerUserId": 1 },
                Some(
                    IndexOptions::builder()
                        .name("owner_user_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "viewerUserId": 1 },
                Some(
                    IndexOptions::builder()
                        .name("viewer_user_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl IntoIndexes for AccessIndexDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "viewerUserId": 1, "revoked": 1 },
            Some(
                IndexOptions::builder()
                    .name("viewer_revoked_index".to_string())
                    .build(),
            ),
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_key() {
        assert_eq!(AccessIndexDoc::index_key("u1", "t9"), "u1_t9");
    }

    #[test]
    fn test_permission_ordering() {
        assert!(LinkPermission::Write > LinkPermission::Read);
    }
}
