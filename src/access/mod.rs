//! Cross-tenant access index.
//!
//! Authorization side-table granting a viewer reach into an owner's
//! tenant. Links are created when a cross-context invitation is accepted;
//! the derived index entry keyed `{viewer}_{ownerTenant}` gives O(1)
//! authorization lookups. Superseding a link writes the replacement entry
//! before revoking the old one, so a reader racing the swap observes
//! either entry but never neither.

use std::sync::Arc;

use bson::{doc, DateTime};
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::schemas::{
    decode, encode, AccessIndexDoc, CrossTenantLinkDoc, InvitationDoc, LinkPermission,
    UserProfileDoc, ACCESS_INDEX_COLLECTION, DIRECTORY_TENANT, LINK_COLLECTION,
};
use crate::db::DocumentStore;
use crate::types::{Result, SyncError};

/// Link store plus derived authorization index.
#[derive(Clone)]
pub struct AccessIndex {
    store: Arc<dyn DocumentStore>,
}

impl AccessIndex {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Build the link and index entry for an accepted cross-context
    /// invitation: the inviter becomes the viewer, the invited user the
    /// owner, and the owner tenant is the invited user's aggregation
    /// pointer.
    pub async fn record_acceptance(
        &self,
        invitation: &InvitationDoc,
        owner: &UserProfileDoc,
        permission: LinkPermission,
    ) -> Result<String> {
        let viewer = invitation.invited_by_user_id.clone().ok_or_else(|| {
            SyncError::InvalidState(format!(
                "invitation '{}' accepted without an inviting user",
                invitation.id
            ))
        })?;
        let owner_tenant = owner.derived_aggregation_tenant().ok_or_else(|| {
            SyncError::InvalidState(format!(
                "user '{}' resolves to no tenant; cannot link",
                owner.uid
            ))
        })?;

        let link = CrossTenantLinkDoc {
            id: Uuid::new_v4().to_string(),
            viewer_user_id: viewer,
            owner_user_id: invitation.invited_user_id.clone(),
            owner_tenant_id: owner_tenant.to_string(),
            permission,
            created_at: Some(DateTime::now()),
            revoked: false,
            fixed_by_migration: None,
        };

        self.store
            .set(DIRECTORY_TENANT, LINK_COLLECTION, &link.id, encode(&link)?, false)
            .await?;
        self.write_index_entry(&link, false).await?;

        info!(
            link_id = %link.id,
            viewer = %link.viewer_user_id,
            owner_tenant = %link.owner_tenant_id,
            "Cross-tenant link created from invitation acceptance"
        );
        Ok(link.id)
    }

    /// O(1) authorization lookup: the non-revoked entry for the pair, if any.
    pub async fn lookup(
        &self,
        viewer_user_id: &str,
        owner_tenant_id: &str,
    ) -> Result<Option<AccessIndexDoc>> {
        let key = AccessIndexDoc::index_key(viewer_user_id, owner_tenant_id);
        let entry = self
            .store
            .get(DIRECTORY_TENANT, ACCESS_INDEX_COLLECTION, &key)
            .await?
            .map(decode::<AccessIndexDoc>)
            .transpose()?;
        Ok(entry.filter(|e| !e.revoked))
    }

    /// Fetch a link by id.
    pub async fn link(&self, link_id: &str) -> Result<Option<CrossTenantLinkDoc>> {
        self.store
            .get(DIRECTORY_TENANT, LINK_COLLECTION, link_id)
            .await?
            .map(decode)
            .transpose()
    }

    /// Point a link at a different owner tenant, swapping the index entry.
    ///
    /// Order matters: the replacement entry is written before the stale one
    /// is revoked, so read traffic never finds zero valid entries.
    pub async fn retarget(
        &self,
        link: &CrossTenantLinkDoc,
        old_owner_tenant_id: &str,
        fixed_by_migration: bool,
    ) -> Result<()> {
        let mut updated = link.clone();
        if fixed_by_migration {
            updated.fixed_by_migration = Some(true);
        }
        self.store
            .set(
                DIRECTORY_TENANT,
                LINK_COLLECTION,
                &updated.id,
                encode(&updated)?,
                false,
            )
            .await?;

        self.write_index_entry(&updated, fixed_by_migration).await?;

        if old_owner_tenant_id != link.owner_tenant_id {
            let stale_key =
                AccessIndexDoc::index_key(&link.viewer_user_id, old_owner_tenant_id);
            self.store
                .set(
                    DIRECTORY_TENANT,
                    ACCESS_INDEX_COLLECTION,
                    &stale_key,
                    doc! { "revoked": true, "_fixedByMigration": fixed_by_migration },
                    true,
                )
                .await?;
        }

        debug!(
            link_id = %link.id,
            old_owner_tenant = %old_owner_tenant_id,
            new_owner_tenant = %link.owner_tenant_id,
            "Access index entry swapped"
        );
        Ok(())
    }

    async fn write_index_entry(
        &self,
        link: &CrossTenantLinkDoc,
        fixed_by_migration: bool,
    ) -> Result<()> {
        let key = AccessIndexDoc::index_key(&link.viewer_user_id, &link.owner_tenant_id);
        let entry = AccessIndexDoc {
            id: key.clone(),
            viewer_user_id: link.viewer_user_id.clone(),
            owner_user_id: link.owner_user_id.clone(),
            owner_tenant_id: link.owner_tenant_id.clone(),
            link_id: link.id.clone(),
            permission: link.permission,
            created_at: Some(DateTime::now()),
            revoked: false,
            fixed_by_migration: fixed_by_migration.then_some(true),
        };
        self.store
            .set(
                DIRECTORY_TENANT,
                ACCESS_INDEX_COLLECTION,
                &key,
                encode(&entry)?,
                false,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::HandledAs;
    use crate::db::InMemoryStore;

    fn invitation(id: &str, invited: &str, inviter: Option<&str>) -> InvitationDoc {
        InvitationDoc {
            id: id.to_string(),
            invited_user_id: invited.to_string(),
            invited_by_user_id: inviter.map(str::to_string),
            canonical_tenant_id: "c1".to_string(),
            role: None,
            handled_as: HandledAs::Link,
            is_cross_context_invite: true,
            accepted: true,
            accepted_at: Some(DateTime::now()),
        }
    }

    fn owner(uid: &str, aggregation_tenant: &str) -> UserProfileDoc {
        UserProfileDoc {
            uid: uid.to_string(),
            aggregation_tenant_id: Some(aggregation_tenant.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_acceptance_creates_link_and_index_entry() {
        let access = AccessIndex::new(Arc::new(InMemoryStore::new()));
        let link_id = access
            .record_acceptance(
                &invitation("i1", "owner1", Some("viewer1")),
                &owner("owner1", "t9"),
                LinkPermission::Write,
            )
            .await
            .unwrap();

        let entry = access.lookup("viewer1", "t9").await.unwrap().unwrap();
        assert_eq!(entry.link_id, link_id);
        assert_eq!(entry.permission, LinkPermission::Write);
    }

    #[tokio::test]
    async fn test_acceptance_without_inviter_is_invalid() {
        let access = AccessIndex::new(Arc::new(InMemoryStore::new()));
        let err = access
            .record_acceptance(
                &invitation("i1", "owner1", None),
                &owner("owner1", "t9"),
                LinkPermission::Read,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_retarget_revokes_old_entry_and_creates_new() {
        let access = AccessIndex::new(Arc::new(InMemoryStore::new()));
        access
            .record_acceptance(
                &invitation("i1", "owner1", Some("viewer1")),
                &owner("owner1", "t-old"),
                LinkPermission::Read,
            )
            .await
            .unwrap();

        let entry = access.lookup("viewer1", "t-old").await.unwrap().unwrap();
        let mut link = access.link(&entry.link_id).await.unwrap().unwrap();
        link.owner_tenant_id = "t-new".to_string();
        access.retarget(&link, "t-old", true).await.unwrap();

        assert!(access.lookup("viewer1", "t-old").await.unwrap().is_none());
        let fresh = access.lookup("viewer1", "t-new").await.unwrap().unwrap();
        assert_eq!(fresh.fixed_by_migration, Some(true));
    }
}
