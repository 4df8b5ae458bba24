//! Invitation document schema.
//!
//! Accepted invitations are the bounded historical event set the
//! reconciliation jobs scan; the engine itself only reads them.

use bson::{doc, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::IntoIndexes;

/// Collection name for invitations (directory partition)
pub const INVITATION_COLLECTION: &str = "invitations";

/// How an accepted invitation was handled
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum HandledAs {
    /// Changed the invited user's role and/or canonical tenant
    RoleChange,
    /// Granted the invited user a ministry role in an aggregation context
    MinistryRole,
    /// Created a cross-tenant link into the invited user's tenant
    Link,
}

/// Invitation document
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InvitationDoc {
    #[serde(default)]
    pub id: String,

    pub invited_user_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub invited_by_user_id: Option<String>,

    /// Tenant the invitation intended the user to land in
    pub canonical_tenant_id: String,

    /// Role the invitation intended to assign, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    pub handled_as: HandledAs,

    #[serde(default)]
    pub is_cross_context_invite: bool,

    #[serde(default)]
    pub accepted: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<DateTime>,
}

impl IntoIndexes for InvitationDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "accepted": 1, "handledAs": 1 },
            Some(
                IndexOptions::builder()
                    .name("accepted_handled_index".to_string())
                    .build(),
            ),
        )]
    }
}
