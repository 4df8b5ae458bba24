//! Role/tenant repair.
//!
//! For every accepted role-change invitation, compares the invited user's
//! current role and default tenant against what the invitation intended;
//! mismatches are rewritten and stamped `_fixedByMigration`.

use bson::doc;
use tracing::info;

use super::{RepairReport, Repairs};
use crate::db::schemas::{HandledAs, DIRECTORY_TENANT, USER_COLLECTION};
use crate::types::Result;

impl Repairs {
    pub async fn run_role_repair(&self, dry_run: bool) -> Result<RepairReport> {
        let mut report = RepairReport::default();
        let invitations = self.accepted_invitations(HandledAs::RoleChange).await?;

        info!(
            count = invitations.len(),
            dry_run = dry_run,
            "Scanning accepted role-change invitations"
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

            let role_matches = inv.role.is_none() || profile.role == inv.role;
            let tenant_matches =
                profile.default_tenant_id.as_deref() == Some(inv.canonical_tenant_id.as_str());

            if role_matches && tenant_matches {
                report.record(&inv.id, &profile.uid, "role and tenant consistent", false, false);
                continue;
            }

            let finding = format!(
                "role {:?} / tenant {:?} diverge from intended {:?} / '{}'",
                profile.role, profile.default_tenant_id, inv.role, inv.canonical_tenant_id
            );

            if dry_run {
                report.record(&inv.id, &profile.uid, finding, true, false);
                continue;
            }

            let mut fields = doc! {
                "defaultTenantId": &inv.canonical_tenant_id,
                "_fixedByMigration": true,
            };
            if let Some(role) = &inv.role {
                fields.insert("role", role);
            }

            match self
                .store
                .set(DIRECTORY_TENANT, USER_COLLECTION, &profile.uid, fields, true)
                .await
            {
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
            "Role repair finished"
        );
        Ok(report)
    }
}
