//! Reconciliation jobs.
//!
//! Idempotent backward scans over accepted invitations that detect and
//! repair specific classes of historical inconsistency left behind by
//! earlier propagation code: role/tenant mismatches, stale aggregation
//! pointers, and links built from the wrong tenant pointer. Every job is
//! safe to re-run, records a detail entry for every checked entity,
//! accumulates per-entity errors instead of aborting, and has a read-only
//! preview mode (`dry_run`).

mod context_pointer;
mod links;
mod role;

use std::sync::Arc;

use serde::Serialize;

use crate::access::AccessIndex;
use crate::db::schemas::{
    decode, HandledAs, InvitationDoc, DIRECTORY_TENANT, INVITATION_COLLECTION,
};
use crate::db::{DocumentStore, QueryOp};
use crate::directory::TenantDirectory;
use crate::types::Result;

/// Per-entity audit record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairDetail {
    /// The invitation that was checked
    pub entity_id: String,
    /// The user the invitation concerns
    pub subject: String,
    pub finding: String,
    pub needs_fix: bool,
    pub fixed: bool,
}

/// Result of one repair run.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
    pub total_checked: usize,
    pub total_affected: usize,
    pub total_fixed: usize,
    pub errors: Vec<String>,
    pub details: Vec<RepairDetail>,
}

impl RepairReport {
    /// Record one checked entity.
    pub fn record(
        &mut self,
        entity_id: impl Into<String>,
        subject: impl Into<String>,
        finding: impl Into<String>,
        needs_fix: bool,
        fixed: bool,
    ) {
        self.total_checked += 1;
        if needs_fix {
            self.total_affected += 1;
        }
        if fixed {
            self.total_fixed += 1;
        }
        self.details.push(RepairDetail {
            entity_id: entity_id.into(),
            subject: subject.into(),
            finding: finding.into(),
            needs_fix,
            fixed,
        });
    }

    /// Record a per-entity error without aborting the scan.
    pub fn record_error(&mut self, entity_id: &str, message: impl std::fmt::Display) {
        self.errors.push(format!("{}: {}", entity_id, message));
    }
}

/// Shared dependencies of the repair jobs.
pub struct Repairs {
    pub(crate) store: Arc<dyn DocumentStore>,
    pub(crate) directory: Arc<TenantDirectory>,
    pub(crate) access: AccessIndex,
}

impl Repairs {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        directory: Arc<TenantDirectory>,
        access: AccessIndex,
    ) -> Self {
        Self {
            store,
            directory,
            access,
        }
    }

    /// The bounded historical event set each job scans: accepted
    /// invitations of one kind.
    pub(crate) async fn accepted_invitations(&self, kind: HandledAs) -> Result<Vec<InvitationDoc>> {
        let kind_value = bson::to_bson(&kind).map_err(|e| {
            crate::types::SyncError::Internal(format!("Unserializable invitation kind: {}", e))
        })?;

        let docs = self
            .store
            .query(
                DIRECTORY_TENANT,
                INVITATION_COLLECTION,
                "handledAs",
                QueryOp::Eq,
                kind_value,
            )
            .await?;

        let mut invitations = Vec::new();
        for doc in docs {
            match decode::<InvitationDoc>(doc) {
                Ok(inv) if inv.accepted => invitations.push(inv),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed invitation");
                }
            }
        }
        Ok(invitations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::{
        encode, LinkPermission, UserProfileDoc, ACCESS_INDEX_COLLECTION, USER_COLLECTION,
    };
    use crate::db::InMemoryStore;
    use bson::DateTime;

    struct Fixture {
        store: Arc<InMemoryStore>,
        repairs: Repairs,
        access: AccessIndex,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let dyn_store: Arc<dyn DocumentStore> = store.clone();
        let directory = Arc::new(TenantDirectory::new(Arc::clone(&dyn_store)));
        let access = AccessIndex::new(Arc::clone(&dyn_store));
        let repairs = Repairs::new(dyn_store, directory, access.clone());
        Fixture {
            store,
            repairs,
            access,
        }
    }

    async fn seed_user(fixture: &Fixture, profile: &UserProfileDoc) {
        fixture
            .store
            .set(
                DIRECTORY_TENANT,
                USER_COLLECTION,
                &profile.uid,
                encode(profile).unwrap(),
                false,
            )
            .await
            .unwrap();
    }

    async fn seed_invitation(fixture: &Fixture, invitation: &InvitationDoc) {
        fixture
            .store
            .set(
                DIRECTORY_TENANT,
                INVITATION_COLLECTION,
                &invitation.id,
                encode(invitation).unwrap(),
                false,
            )
            .await
            .unwrap();
    }

    fn invitation(id: &str, invited: &str, tenant: &str, handled_as: HandledAs) -> InvitationDoc {
        InvitationDoc {
            id: id.to_string(),
            invited_user_id: invited.to_string(),
            invited_by_user_id: Some("inviter".to_string()),
            canonical_tenant_id: tenant.to_string(),
            role: None,
            handled_as,
            is_cross_context_invite: handled_as == HandledAs::Link,
            accepted: true,
            accepted_at: Some(DateTime::now()),
        }
    }

    async fn profile(fixture: &Fixture, uid: &str) -> UserProfileDoc {
        decode(
            fixture
                .store
                .get(DIRECTORY_TENANT, USER_COLLECTION, uid)
                .await
                .unwrap()
                .unwrap(),
        )
        .unwrap()
    }

    // ------------------------------------------------------------------------
    // Role repair
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_role_repair_fixes_mismatch_then_converges() {
        let f = fixture();
        seed_user(
            &f,
            &UserProfileDoc {
                uid: "u1".into(),
                role: Some("member".into()),
                default_tenant_id: Some("c1".into()),
                ..Default::default()
            },
        )
        .await;
        let mut inv = invitation("i1", "u1", "c2", HandledAs::RoleChange);
        inv.role = Some("admin".into());
        seed_invitation(&f, &inv).await;

        // Preview reports the mismatch without writing
        let preview = f.repairs.run_role_repair(true).await.unwrap();
        assert_eq!(preview.total_checked, 1);
        assert_eq!(preview.total_affected, 1);
        assert_eq!(preview.total_fixed, 0);
        assert_eq!(profile(&f, "u1").await.role.as_deref(), Some("member"));

        let first = f.repairs.run_role_repair(false).await.unwrap();
        assert_eq!(first.total_fixed, 1);
        let fixed = profile(&f, "u1").await;
        assert_eq!(fixed.role.as_deref(), Some("admin"));
        assert_eq!(fixed.default_tenant_id.as_deref(), Some("c2"));
        assert_eq!(fixed.fixed_by_migration, Some(true));

        // Already consistent on the second pass
        let second = f.repairs.run_role_repair(false).await.unwrap();
        assert_eq!(second.total_checked, 1);
        assert_eq!(second.total_affected, 0);
        assert_eq!(second.total_fixed, 0);
    }

    #[tokio::test]
    async fn test_role_repair_records_detail_for_consistent_entities() {
        let f = fixture();
        seed_user(
            &f,
            &UserProfileDoc {
                uid: "u1".into(),
                default_tenant_id: Some("c1".into()),
                ..Default::default()
            },
        )
        .await;
        seed_invitation(&f, &invitation("i1", "u1", "c1", HandledAs::RoleChange)).await;

        let report = f.repairs.run_role_repair(false).await.unwrap();
        assert_eq!(report.total_checked, 1);
        assert_eq!(report.details.len(), 1);
        assert!(!report.details[0].needs_fix);
    }

    #[tokio::test]
    async fn test_role_repair_tolerates_missing_users() {
        let f = fixture();
        seed_invitation(&f, &invitation("i1", "ghost", "c1", HandledAs::RoleChange)).await;

        let report = f.repairs.run_role_repair(false).await.unwrap();
        assert_eq!(report.total_checked, 1);
        assert_eq!(report.total_affected, 0);
        assert!(report.errors.is_empty());
    }

    // ------------------------------------------------------------------------
    // Context pointer repair
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_pointer_repair_overwrites_diverged_pointer() {
        let f = fixture();
        seed_user(
            &f,
            &UserProfileDoc {
                uid: "u1".into(),
                default_tenant_id: Some("c1".into()),
                aggregation_tenant_id: Some("stale".into()),
                ..Default::default()
            },
        )
        .await;
        seed_invitation(&f, &invitation("i1", "u1", "c1", HandledAs::MinistryRole)).await;

        let first = f.repairs.run_context_pointer_repair(false).await.unwrap();
        assert_eq!(first.total_fixed, 1);
        let fixed = profile(&f, "u1").await;
        assert_eq!(fixed.aggregation_tenant_id.as_deref(), Some("c1"));
        assert_eq!(fixed.fixed_by_migration, Some(true));

        let second = f.repairs.run_context_pointer_repair(false).await.unwrap();
        assert_eq!(second.total_fixed, 0);
    }

    #[tokio::test]
    async fn test_pointer_repair_dry_run_leaves_pointer_alone() {
        let f = fixture();
        seed_user(
            &f,
            &UserProfileDoc {
                uid: "u1".into(),
                default_tenant_id: Some("c1".into()),
                aggregation_tenant_id: Some("stale".into()),
                ..Default::default()
            },
        )
        .await;
        seed_invitation(&f, &invitation("i1", "u1", "c1", HandledAs::MinistryRole)).await;

        let report = f.repairs.run_context_pointer_repair(true).await.unwrap();
        assert_eq!(report.total_affected, 1);
        assert_eq!(report.total_fixed, 0);
        assert_eq!(
            profile(&f, "u1").await.aggregation_tenant_id.as_deref(),
            Some("stale")
        );
    }

    // ------------------------------------------------------------------------
    // Link repair
    // ------------------------------------------------------------------------

    /// Recreates the historical bug: the link was built while the owner's
    /// aggregation pointer was stale, then the pointer moved on.
    async fn seed_stale_link(f: &Fixture) {
        seed_user(
            f,
            &UserProfileDoc {
                uid: "owner1".into(),
                aggregation_tenant_id: Some("t-stale".into()),
                ..Default::default()
            },
        )
        .await;
        let inv = invitation("i1", "owner1", "c1", HandledAs::Link);
        seed_invitation(f, &inv).await;
        f.access
            .record_acceptance(&inv, &profile(f, "owner1").await, LinkPermission::Read)
            .await
            .unwrap();

        // Pointer later corrected; the link still aims at the stale tenant
        seed_user(
            f,
            &UserProfileDoc {
                uid: "owner1".into(),
                aggregation_tenant_id: Some("t-current".into()),
                ..Default::default()
            },
        )
        .await;
    }

    async fn non_revoked_entries(f: &Fixture, viewer: &str) -> usize {
        f.store
            .query(
                DIRECTORY_TENANT,
                ACCESS_INDEX_COLLECTION,
                "viewerUserId",
                QueryOp::Eq,
                bson::Bson::String(viewer.to_string()),
            )
            .await
            .unwrap()
            .into_iter()
            .filter(|d| !d.get_bool("revoked").unwrap_or(false))
            .count()
    }

    #[tokio::test]
    async fn test_link_repair_retargets_and_swaps_index() {
        let f = fixture();
        seed_stale_link(&f).await;
        assert!(f
            .access
            .lookup("inviter", "t-stale")
            .await
            .unwrap()
            .is_some());

        let first = f.repairs.run_link_repair(false).await.unwrap();
        assert_eq!(first.total_fixed, 1);

        assert!(f.access.lookup("inviter", "t-stale").await.unwrap().is_none());
        let entry = f
            .access
            .lookup("inviter", "t-current")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.fixed_by_migration, Some(true));

        let link = f.access.link(&entry.link_id).await.unwrap().unwrap();
        assert_eq!(link.owner_tenant_id, "t-current");
        assert_eq!(link.fixed_by_migration, Some(true));

        // Single-validity: repeated repairs never leave zero or duplicate
        // non-revoked entries
        let second = f.repairs.run_link_repair(false).await.unwrap();
        assert_eq!(second.total_fixed, 0);
        assert_eq!(non_revoked_entries(&f, "inviter").await, 1);
    }

    #[tokio::test]
    async fn test_link_repair_dry_run_reports_without_swapping() {
        let f = fixture();
        seed_stale_link(&f).await;

        let report = f.repairs.run_link_repair(true).await.unwrap();
        assert_eq!(report.total_affected, 1);
        assert_eq!(report.total_fixed, 0);
        assert!(f
            .access
            .lookup("inviter", "t-stale")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_link_repair_with_no_link_is_a_noop() {
        let f = fixture();
        seed_user(
            &f,
            &UserProfileDoc {
                uid: "owner1".into(),
                aggregation_tenant_id: Some("t1".into()),
                ..Default::default()
            },
        )
        .await;
        seed_invitation(&f, &invitation("i1", "owner1", "c1", HandledAs::Link)).await;

        let report = f.repairs.run_link_repair(false).await.unwrap();
        assert_eq!(report.total_checked, 1);
        assert_eq!(report.total_affected, 0);
        assert!(report.errors.is_empty());
    }
}
