//! Aggregation-context pointer repair.
//!
//! For every accepted ministry-role invitation, compares the user's
//! aggregation-context tenant pointer to their canonical tenant pointer;
//! diverged aggregation pointers are overwritten with the canonical one.

use bson::doc;
use tracing::info;

use super::{RepairReport, Repairs};
use crate::db::schemas::{HandledAs, DIRECTORY_TENANT, USER_COLLECTION};
use crate::directory::TenantDirectory;
use crate::types::Result;

impl Repairs {
    pub async fn run_context_pointer_repair(&self, dry_run: bool) -> Result<RepairReport> {
        let mut report = RepairReport::default();
        let invitations = self.accepted_invitations(HandledAs::MinistryRole).await?;

        info!(
            count = invitations.len(),
            dry_run = dry_run,
            "Scanning accepted ministry-role invitations"
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

            let Some(canonical) = TenantDirectory::canonical_tenant_for(&profile) else {
                report.record(
                    &inv.id,
                    &profile.uid,
                    "user resolves to no canonical tenant; cannot repair",
                    false,
                    false,
                );
                continue;
            };

            if profile.aggregation_tenant_id.as_deref() == Some(canonical.as_str()) {
                report.record(&inv.id, &profile.uid, "aggregation pointer consistent", false, false);
                continue;
            }

            let finding = format!(
                "aggregation pointer {:?} diverges from canonical '{}'",
                profile.aggregation_tenant_id, canonical
            );

            if dry_run {
                report.record(&inv.id, &profile.uid, finding, true, false);
                continue;
            }

            let fields = doc! {
                "aggregationTenantId": &canonical,
                "_fixedByMigration": true,
            };
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
            "Context pointer repair finished"
        );
        Ok(report)
    }
}
