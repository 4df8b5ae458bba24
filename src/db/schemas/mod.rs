//! Database schemas for Crossview
//!
//! Defines the document structures for members and their child records,
//! context overrides, mirror exclusions, cross-tenant links, invitations,
//! and user profiles. All documents serialize camelCase.

mod attendance;
mod confirmation;
mod exclusion;
mod invitation;
mod link;
mod member;
mod member_override;
mod metadata;
mod new_believer;
mod profile;

pub use attendance::{AttendanceDoc, ATTENDANCE_COLLECTION};
pub use confirmation::{ConfirmationDoc, CONFIRMATION_COLLECTION};
pub use exclusion::{ExclusionDoc, EXCLUSION_COLLECTION};
pub use invitation::{HandledAs, InvitationDoc, INVITATION_COLLECTION};
pub use link::{
    AccessIndexDoc, CrossTenantLinkDoc, LinkPermission, ACCESS_INDEX_COLLECTION, LINK_COLLECTION,
};
pub use member::{
    split_override_fields, MemberDoc, SyncDirection, SyncMetadata, MEMBER_COLLECTION,
    OVERRIDE_FIELDS, STRUCTURAL_FIELDS,
};
pub use member_override::{MemberOverrideDoc, OverrideFields, OVERRIDE_COLLECTION};
pub use metadata::Metadata;
pub use new_believer::{NewBelieverDoc, NEW_BELIEVER_COLLECTION};
pub use profile::{UserProfileDoc, USER_COLLECTION};

use bson::Document;
use serde::{de::DeserializeOwned, Serialize};

use crate::types::{Result, SyncError};

/// Reserved partition for directory-wide collections (users, invitations,
/// links, access index) that are not scoped to any one tenant.
pub const DIRECTORY_TENANT: &str = "_directory";

/// Record kinds owned by a member that never fan out on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildRecordKind {
    Attendance,
    Confirmation,
    NewBeliever,
}

/// All child record kinds, for per-kind sweeps.
pub const CHILD_KINDS: [ChildRecordKind; 3] = [
    ChildRecordKind::Attendance,
    ChildRecordKind::Confirmation,
    ChildRecordKind::NewBeliever,
];

impl ChildRecordKind {
    pub fn collection(&self) -> &'static str {
        match self {
            ChildRecordKind::Attendance => ATTENDANCE_COLLECTION,
            ChildRecordKind::Confirmation => CONFIRMATION_COLLECTION,
            ChildRecordKind::NewBeliever => NEW_BELIEVER_COLLECTION,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ChildRecordKind::Attendance => "attendance",
            ChildRecordKind::Confirmation => "confirmation",
            ChildRecordKind::NewBeliever => "new-believer",
        }
    }
}

/// Deserialize a stored document into a typed schema.
pub fn decode<T: DeserializeOwned>(doc: Document) -> Result<T> {
    bson::from_document(doc).map_err(|e| SyncError::Internal(format!("Malformed document: {}", e)))
}

/// Serialize a typed schema into a storable document.
pub fn encode<T: Serialize>(value: &T) -> Result<Document> {
    bson::to_document(value)
        .map_err(|e| SyncError::Internal(format!("Unserializable document: {}", e)))
}
