//! Cross-tenant link repair.
//!
//! An earlier version of the acceptance handler built links from the
//! user's stale aggregation pointer, leaving the viewer's reach aimed at
//! the wrong tenant. For every accepted link invitation this job compares
//! the resulting link's owner tenant against the invited user's current
//! aggregation pointer, updates wrong links, and swaps the access-index
//! entry (replacement written before the stale entry is revoked).

use tracing::info;

use super::{RepairReport, Repairs};
use crate::db::schemas::{
    decode, CrossTenantLinkDoc, HandledAs, InvitationDoc, DIRECTORY_TENANT, LINK_COLLECTION,
};
use crate::db::QueryOp;
use crate::types::Result;

impl Repairs {
    pub async fn run_link_repair(&self, dry_run: bool) -> Result<RepairReport> {
        let mut report = RepairReport::default();
        let invitations = self.accepted_invitations(HandledAs::Link).await?;

        info!(
            count = invitations.len(),
            dry_run = dry_run,
            "Scanning accepted link invitations"
        );

        for inv in invitations {
            let profile = match self.directory.profile(&inv.invited_user_id).await {
                Ok(Some(p)) => p,
                Ok(None) => {
                    report.record(
                        &inv.id,
                        &inv.invited_user_id,
                        "invited user no longer exists",
                        false,
                        false,
                    );
                    continue;
                }
                Err(e) => {
                    report.record_error(&inv.id, &e);
                    report.record(
                        &inv.id,
                        &inv.invited_user_id,
                        format!("profile lookup failed: {}", e),
                        false,
                        false,
                    );
                    continue;
                }
            };

            let Some(expected_owner_tenant) = profile.derived_aggregation_tenant() else {
                report.record(
                    &inv.id,
                    &profile.uid,
                    "user resolves to no tenant; cannot repair link",
                    false,
                    false,
                );
                continue;
            };
            let expected_owner_tenant = expected_owner_tenant.to_string();

            let link = match self.link_for_invitation(&inv).await {
                Ok(Some(link)) => link,
                Ok(None) => {
                    report.record(&inv.id, &profile.uid, "no matching link", false, false);
                    continue;
                }
                Err(e) => {
                    report.record_error(&inv.id, &e);
                    report.record(
                        &inv.id,
                        &profile.uid,
                        format!("link lookup failed: {}", e),
                        false,
                        false,
                    );
                    continue;
                }
            };

            if link.owner_tenant_id == expected_owner_tenant {
                report.record(&inv.id, &profile.uid, "link owner tenant consistent", false, false);
                continue;
            }

            let finding = format!(
                "link '{}' targets '{}' instead of '{}'",
                link.id, link.owner_tenant_id, expected_owner_tenant
            );

            if dry_run {
                report.record(&inv.id, &profile.uid, finding, true, false);
                continue;
            }

            let old_owner_tenant = link.owner_tenant_id.clone();
            let mut updated = link;
            updated.owner_tenant_id = expected_owner_tenant;

            match self.access.retarget(&updated, &old_owner_tenant, true).await {
                Ok(()) => report.record(&inv.id, &profile.uid, finding, true, true),
                Err(e) => {
                    report.record_error(&inv.id, &e);
                    report.record(&inv.id, &profile.uid, finding, true, false);
                }
            }
        }

        info!(
            checked = report.total_checked,
            affected = report.total_affected,
            fixed = report.total_fixed,
            "Link repair finished"
        );
        Ok(report)
    }

    /// The non-revoked link the invitation produced: owned by the invited
    /// user, viewed by the inviter when one is recorded.
    async fn link_for_invitation(
        &self,
        invitation: &InvitationDoc,
    ) -> Result<Option<CrossTenantLinkDoc>> {
        let docs = self
            .store
            .query(
                DIRECTORY_TENANT,
                LINK_COLLECTION,
                "ownerUserId",
                QueryOp::Eq,
                bson::Bson::String(invitation.invited_user_id.clone()),
            )
            .await?;

        for doc in docs {
            let link: CrossTenantLinkDoc = match decode(doc) {
                Ok(l) => l,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed link");
                    continue;
                }
            };
            if link.revoked {
                continue;
            }
            if let Some(viewer) = invitation.invited_by_user_id.as_deref() {
                if link.viewer_user_id != viewer {
                    continue;
                }
            }
            return Ok(Some(link));
        }
        Ok(None)
    }
}
