//! Mirror sync engine.
//!
//! Orchestrates every mutation made from an aggregation context against
//! both the aggregation-context copy and the canonical-tenant copy,
//! consulting the tenant directory, the override layer, and the exclusion
//! registry to decide direction and scope.
//!
//! # Write policy
//!
//! The primary, user-visible write of each operation fails loudly: the
//! local write for native records, the canonical-tenant write for
//! explicit-target adds, mirrored updates, and transfers. Every downstream
//! mirror/override/exclusion write is caught, logged with record id,
//! target tenant, and operation, and counted; a mirroring hiccup never
//! blocks the caller's own data from saving, and the idempotent merge
//! semantics let a later pass converge the mirrors.
//!
//! # Reactive trigger
//!
//! [`MirrorSyncEngine::on_member_change`] is called synchronously by every
//! code path that mutates a member (and via the outbox for the engine's
//! own canonical writes). Re-running it with the same (old, new) pair any
//! number of times converges to the same mirror state: upserts are merges,
//! removals are no-ops when already absent.

use std::sync::{Arc, Weak};

use bson::Document;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::schemas::{
    decode, encode, split_override_fields, ChildRecordKind, MemberDoc, Metadata, OverrideFields,
    SyncDirection, SyncMetadata, CHILD_KINDS, MEMBER_COLLECTION,
};
use crate::db::store::{BatchOp, WriteBatch, FAN_OUT_CHUNK};
use crate::db::DocumentStore;
use crate::directory::TenantDirectory;
use crate::sync::exclusions::ExclusionRegistry;
use crate::sync::outbox::Outbox;
use crate::sync::overrides::OverrideStore;
use crate::types::{Result, SyncError};

/// Actor recorded on engine-originated writes with no acting user.
const SYSTEM_ACTOR: &str = "system";

/// The tenant a caller is acting in, plus who they are.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: String,
    pub acting_uid: String,
}

impl TenantContext {
    pub fn new(tenant_id: impl Into<String>, acting_uid: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            acting_uid: acting_uid.into(),
        }
    }
}

/// Counts of entities actually touched by a fan-out pass.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorSyncReport {
    pub mirrors_upserted: usize,
    pub mirrors_removed: usize,
    /// Targets skipped because of an exclusion tombstone.
    pub tenants_skipped: usize,
    /// Downstream mutations that failed and were logged.
    pub failed_mutations: usize,
}

impl MirrorSyncReport {
    fn absorb(&mut self, other: MirrorSyncReport) {
        self.mirrors_upserted += other.mirrors_upserted;
        self.mirrors_removed += other.mirrors_removed;
        self.tenants_skipped += other.tenants_skipped;
        self.failed_mutations += other.failed_mutations;
    }
}

/// Outcome of a chunked batch commit.
struct ChunkOutcome {
    attempted: usize,
    succeeded: usize,
}

/// Cross-tenant mirroring engine.
pub struct MirrorSyncEngine {
    store: Arc<dyn DocumentStore>,
    directory: Arc<TenantDirectory>,
    overrides: OverrideStore,
    exclusions: ExclusionRegistry,
    outbox: Outbox,
    /// Back-reference handed to outbox tasks; always upgradable while the
    /// engine is alive.
    weak_self: Weak<MirrorSyncEngine>,
}

impl MirrorSyncEngine {
    /// Build the engine. Must run inside a tokio runtime (the outbox
    /// worker is spawned here).
    pub fn new(store: Arc<dyn DocumentStore>, directory: Arc<TenantDirectory>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            overrides: OverrideStore::new(Arc::clone(&store)),
            exclusions: ExclusionRegistry::new(Arc::clone(&store)),
            outbox: Outbox::start(),
            store,
            directory,
            weak_self: weak.clone(),
        })
    }

    pub fn overrides(&self) -> &OverrideStore {
        &self.overrides
    }

    pub fn exclusions(&self) -> &ExclusionRegistry {
        &self.exclusions
    }

    // ========================================================================
    // Add
    // ========================================================================

    /// Add a member from an aggregation context.
    ///
    /// Without a target tenant the record is native: one local write, no
    /// fan-out. With an explicit target the record is written locally as a
    /// mirror and then directly into the target canonical tenant; the
    /// canonical write surfaces failure to the caller.
    pub async fn add_member(
        &self,
        ctx: &TenantContext,
        mut member: MemberDoc,
        target_tenant: Option<String>,
    ) -> Result<String> {
        if member.id.is_empty() {
            member.id = Uuid::new_v4().to_string();
        }
        member.metadata = Metadata::new();

        match target_tenant {
            None => {
                member.is_native = true;
                member.source_tenant_id = None;
                self.store
                    .set(
                        &ctx.tenant_id,
                        MEMBER_COLLECTION,
                        &member.id,
                        encode(&member)?,
                        false,
                    )
                    .await?;
                info!(
                    member_id = %member.id,
                    tenant = %ctx.tenant_id,
                    "Native member added"
                );
            }
            Some(target) => {
                if target == ctx.tenant_id {
                    return Err(SyncError::InvalidState(format!(
                        "target tenant '{}' is the acting tenant; add without a target instead",
                        target
                    )));
                }

                member.is_native = false;
                member.source_tenant_id = Some(target.clone());
                self.store
                    .set(
                        &ctx.tenant_id,
                        MEMBER_COLLECTION,
                        &member.id,
                        encode(&member)?,
                        false,
                    )
                    .await?;

                let mut canonical = member.clone();
                canonical.is_native = true;
                canonical.source_tenant_id = None;
                canonical.sync_metadata = Some(SyncMetadata::stamp(
                    &ctx.tenant_id,
                    &ctx.acting_uid,
                    SyncDirection::MinistryToNormal,
                ));
                self.store
                    .set(
                        &target,
                        MEMBER_COLLECTION,
                        &member.id,
                        encode(&canonical)?,
                        false,
                    )
                    .await
                    .map_err(|e| SyncError::Propagation {
                        record_id: member.id.clone(),
                        tenant: target.clone(),
                        operation: "add".to_string(),
                        message: e.to_string(),
                    })?;

                info!(
                    member_id = %member.id,
                    tenant = %ctx.tenant_id,
                    canonical_tenant = %target,
                    "Member added with explicit canonical tenant"
                );
            }
        }

        Ok(member.id)
    }

    /// Add a child record (attendance, confirmation, new believer).
    ///
    /// Writes locally, then syncs the row to the one tenant the owning
    /// member is mirrored from, and only when that member is non-native and
    /// its source differs from the current tenant. Never fans out. The
    /// local write is the primary; the source-tenant copy is best-effort.
    pub async fn add_child_record(
        &self,
        ctx: &TenantContext,
        kind: ChildRecordKind,
        mut record: Document,
    ) -> Result<String> {
        let member_id = record
            .get_str("memberId")
            .map(str::to_string)
            .map_err(|_| {
                SyncError::InvalidState(format!("{} record requires a memberId", kind.label()))
            })?;

        let id = match record.get_str("id") {
            Ok(id) if !id.is_empty() => id.to_string(),
            _ => Uuid::new_v4().to_string(),
        };
        record.insert("id", id.clone());

        // Merge-write so a repeated add with the same id converges instead
        // of duplicating.
        self.store
            .set(&ctx.tenant_id, kind.collection(), &id, record.clone(), true)
            .await?;

        match self.owning_member(&ctx.tenant_id, &member_id).await {
            Ok(Some(member)) if !member.is_native => {
                if let Some(source) = member.source_tenant_id.as_deref() {
                    if source != ctx.tenant_id {
                        let mut mirror = record.clone();
                        let stamp = SyncMetadata::stamp(
                            &ctx.tenant_id,
                            &ctx.acting_uid,
                            SyncDirection::MinistryToNormal,
                        );
                        mirror.insert("syncMetadata", encode(&stamp)?);
                        if let Err(e) = self
                            .store
                            .set(source, kind.collection(), &id, mirror, true)
                            .await
                        {
                            warn!(
                                record_id = %id,
                                target_tenant = %source,
                                operation = %format!("{}-sync", kind.label()),
                                error = %e,
                                "Child record sync failed; local write stands"
                            );
                        }
                    }
                }
            }
            Ok(_) => {
                debug!(
                    record_id = %id,
                    member_id = %member_id,
                    "Child record is local-only (native or absent member)"
                );
            }
            Err(e) => {
                warn!(
                    record_id = %id,
                    member_id = %member_id,
                    error = %e,
                    "Could not resolve owning member; child record stays local"
                );
            }
        }

        Ok(id)
    }

    // ========================================================================
    // Update
    // ========================================================================

    /// Update a member from an aggregation context.
    ///
    /// Mirrored-only records route context-only fields into the override
    /// layer and forward everything else to the canonical tenant (loud).
    /// Canonical records write locally (loud), mirror the override-eligible
    /// subset into the override layer for aggregation readers, forward
    /// non-context fields to a chained source tenant when one exists, and
    /// enqueue a mirror refresh.
    pub async fn update_member(
        &self,
        ctx: &TenantContext,
        member_id: &str,
        changes: Document,
    ) -> Result<()> {
        let before: MemberDoc = decode(
            self.store
                .get(&ctx.tenant_id, MEMBER_COLLECTION, member_id)
                .await?
                .ok_or_else(|| {
                    SyncError::NotFound(format!(
                        "member '{}' in tenant '{}'",
                        member_id, ctx.tenant_id
                    ))
                })?,
        )?;

        let (override_part, rest) = split_override_fields(changes.clone());
        let mirrored_only = !before.is_native && before.is_mirror_in(&ctx.tenant_id);

        if mirrored_only {
            // is_mirror_in guarantees the pointer is present
            let source = before.source_tenant_id.clone().unwrap_or_default();

            // Canonical-tenant write of the non-context fields: primary,
            // surfaces failure.
            if !rest.is_empty() {
                let mut forward = rest.clone();
                forward.insert(
                    "syncMetadata",
                    encode(&SyncMetadata::stamp(
                        &ctx.tenant_id,
                        &ctx.acting_uid,
                        SyncDirection::MinistryToNormal,
                    ))?,
                );
                self.store
                    .set(&source, MEMBER_COLLECTION, member_id, forward, true)
                    .await
                    .map_err(|e| SyncError::Propagation {
                        record_id: member_id.to_string(),
                        tenant: source.clone(),
                        operation: "update".to_string(),
                        message: e.to_string(),
                    })?;
            }

            // Context-only fields stay in this context's override layer.
            let incoming = OverrideFields::from_changes(&override_part);
            if let Err(e) = self
                .overrides
                .upsert(&ctx.tenant_id, member_id, &source, &incoming, &ctx.acting_uid)
                .await
            {
                warn!(
                    record_id = %member_id,
                    target_tenant = %ctx.tenant_id,
                    operation = "override-upsert",
                    error = %e,
                    "Override write failed"
                );
            }

            // Keep the resident mirror current for this context's readers.
            if let Err(e) = self
                .store
                .set(&ctx.tenant_id, MEMBER_COLLECTION, member_id, changes, true)
                .await
            {
                warn!(
                    record_id = %member_id,
                    target_tenant = %ctx.tenant_id,
                    operation = "mirror-refresh",
                    error = %e,
                    "Local mirror refresh failed"
                );
            }

            return Ok(());
        }

        // Canonical here: the local write is the primary.
        self.store
            .set(
                &ctx.tenant_id,
                MEMBER_COLLECTION,
                member_id,
                changes.clone(),
                true,
            )
            .await?;

        // Mirror role/position changes into the override layer so
        // aggregation-context readers see them without re-fetching.
        let incoming = OverrideFields::from_changes(&override_part);
        if !incoming.is_empty() {
            if let Err(e) = self
                .overrides
                .upsert(
                    &ctx.tenant_id,
                    member_id,
                    &ctx.tenant_id,
                    &incoming,
                    &ctx.acting_uid,
                )
                .await
            {
                warn!(
                    record_id = %member_id,
                    target_tenant = %ctx.tenant_id,
                    operation = "override-upsert",
                    error = %e,
                    "Override write failed"
                );
            }
        }

        // Chained mirror: this copy is canonical for its own mirrors but
        // was itself mirrored from another tenant; forward the
        // non-context fields upstream, best-effort.
        if let Some(source) = before.source_tenant_id.as_deref() {
            if source != ctx.tenant_id && !rest.is_empty() {
                let mut forward = rest.clone();
                forward.insert(
                    "syncMetadata",
                    encode(&SyncMetadata::stamp(
                        &ctx.tenant_id,
                        &ctx.acting_uid,
                        SyncDirection::MinistryToNormal,
                    ))?,
                );
                if let Err(e) = self
                    .store
                    .set(source, MEMBER_COLLECTION, member_id, forward, true)
                    .await
                {
                    warn!(
                        record_id = %member_id,
                        target_tenant = %source,
                        operation = "chained-forward",
                        error = %e,
                        "Chained mirror forward failed"
                    );
                }
            }
        }

        // Refresh downstream mirrors off the caller's path.
        let after: Option<MemberDoc> = self
            .store
            .get(&ctx.tenant_id, MEMBER_COLLECTION, member_id)
            .await
            .ok()
            .flatten()
            .map(decode)
            .transpose()
            .unwrap_or_default();

        if let Some(after) = after {
            if before.qualifies_for_fan_out() || after.qualifies_for_fan_out() {
                if let Some(engine) = self.weak_self.upgrade() {
                    let tenant = ctx.tenant_id.clone();
                    let description = format!("mirror-refresh:{}:{}", tenant, member_id);
                    self.outbox.enqueue(description, async move {
                        engine
                            .on_member_change(&tenant, Some(&before), Some(&after))
                            .await
                            .map(|_| ())
                    });
                }
            }
        }

        Ok(())
    }

    /// Update an attendance row. Local only: each tenant's attendance
    /// ledger is tenant-authoritative, so edits never cross tenants.
    pub async fn update_attendance(
        &self,
        ctx: &TenantContext,
        attendance_id: &str,
        changes: Document,
    ) -> Result<()> {
        let collection = ChildRecordKind::Attendance.collection();
        if self
            .store
            .get(&ctx.tenant_id, collection, attendance_id)
            .await?
            .is_none()
        {
            return Err(SyncError::NotFound(format!(
                "attendance '{}' in tenant '{}'",
                attendance_id, ctx.tenant_id
            )));
        }
        self.store
            .set(&ctx.tenant_id, collection, attendance_id, changes, true)
            .await
    }

    // ========================================================================
    // Delete
    // ========================================================================

    /// Delete a member from an aggregation context.
    ///
    /// Deletes the local copy (loud). A mirrored copy additionally gains an
    /// exclusion tombstone and loses its override; the canonical copy is
    /// never deleted. A canonical copy's mirrors are withdrawn via the
    /// outbox. The member's child rows in the current tenant are cleaned up
    /// best-effort.
    pub async fn delete_member(&self, ctx: &TenantContext, member_id: &str) -> Result<()> {
        let current: MemberDoc = decode(
            self.store
                .get(&ctx.tenant_id, MEMBER_COLLECTION, member_id)
                .await?
                .ok_or_else(|| {
                    SyncError::NotFound(format!(
                        "member '{}' in tenant '{}'",
                        member_id, ctx.tenant_id
                    ))
                })?,
        )?;

        self.store
            .delete(&ctx.tenant_id, MEMBER_COLLECTION, member_id)
            .await?;

        if current.is_mirror_in(&ctx.tenant_id) {
            // is_mirror_in guarantees the pointer is present
            let source = current.source_tenant_id.clone().unwrap_or_default();

            // Tombstone before anything else so a racing fan-out cannot
            // resurrect the record.
            if let Err(e) = self
                .exclusions
                .record(&ctx.tenant_id, member_id, &source, &ctx.acting_uid)
                .await
            {
                warn!(
                    record_id = %member_id,
                    target_tenant = %ctx.tenant_id,
                    operation = "exclusion-record",
                    error = %e,
                    "Exclusion write failed; record may re-mirror until re-deleted"
                );
            }
            if let Err(e) = self
                .overrides
                .clear(&ctx.tenant_id, member_id, &source)
                .await
            {
                warn!(
                    record_id = %member_id,
                    target_tenant = %ctx.tenant_id,
                    operation = "override-clear",
                    error = %e,
                    "Override clear failed"
                );
            }
        } else if current.classification_tag.is_some() {
            // Canonical copy gone: withdraw its mirrors off the caller's path.
            if let Some(engine) = self.weak_self.upgrade() {
                let tenant = ctx.tenant_id.clone();
                let old = current.clone();
                let description = format!("mirror-withdraw:{}:{}", tenant, member_id);
                self.outbox.enqueue(description, async move {
                    engine
                        .on_member_change(&tenant, Some(&old), None)
                        .await
                        .map(|_| ())
                });
            }
        }

        // Context-scoped child rows, current tenant only.
        match self.collect_child_deletes(&ctx.tenant_id, member_id).await {
            Ok(ops) if !ops.is_empty() => {
                let total = ops.len();
                match self.commit_in_chunks(ops, "child-cleanup").await {
                    Ok(outcome) => debug!(
                        member_id = %member_id,
                        tenant = %ctx.tenant_id,
                        removed = outcome.succeeded,
                        total = total,
                        "Child records cleaned up"
                    ),
                    Err(e) => warn!(
                        member_id = %member_id,
                        tenant = %ctx.tenant_id,
                        error = %e,
                        "Child record cleanup failed"
                    ),
                }
            }
            Ok(_) => {}
            Err(e) => warn!(
                member_id = %member_id,
                tenant = %ctx.tenant_id,
                error = %e,
                "Could not enumerate child records for cleanup"
            ),
        }

        info!(
            member_id = %member_id,
            tenant = %ctx.tenant_id,
            mirrored = current.is_mirror_in(&ctx.tenant_id),
            "Member deleted"
        );
        Ok(())
    }

    // ========================================================================
    // Transfer
    // ========================================================================

    /// Transfer a native record to a canonical tenant.
    ///
    /// Rejected with `InvalidState` (no partial write) when the record is
    /// already mirrored. Flips the local flags, then writes the full record
    /// into the target tenant stamped `ministry-to-normal`; the canonical
    /// write surfaces failure.
    pub async fn transfer_member(
        &self,
        ctx: &TenantContext,
        member_id: &str,
        target_tenant: &str,
    ) -> Result<()> {
        let mut member: MemberDoc = decode(
            self.store
                .get(&ctx.tenant_id, MEMBER_COLLECTION, member_id)
                .await?
                .ok_or_else(|| {
                    SyncError::NotFound(format!(
                        "member '{}' in tenant '{}'",
                        member_id, ctx.tenant_id
                    ))
                })?,
        )?;

        if !member.is_native {
            return Err(SyncError::InvalidState(format!(
                "member '{}' is already mirrored from '{}'",
                member_id,
                member.source_tenant_id.as_deref().unwrap_or("?")
            )));
        }
        if target_tenant == ctx.tenant_id {
            return Err(SyncError::InvalidState(
                "transfer target is the current tenant".to_string(),
            ));
        }

        member.is_native = false;
        member.source_tenant_id = Some(target_tenant.to_string());
        member.sync_metadata = Some(SyncMetadata::stamp(
            &ctx.tenant_id,
            &ctx.acting_uid,
            SyncDirection::MinistryToNormal,
        ));
        self.store
            .set(
                &ctx.tenant_id,
                MEMBER_COLLECTION,
                member_id,
                encode(&member)?,
                false,
            )
            .await?;

        let mut canonical = member.clone();
        canonical.is_native = true;
        canonical.source_tenant_id = None;
        self.store
            .set(
                target_tenant,
                MEMBER_COLLECTION,
                member_id,
                encode(&canonical)?,
                false,
            )
            .await
            .map_err(|e| SyncError::Propagation {
                record_id: member_id.to_string(),
                tenant: target_tenant.to_string(),
                operation: "transfer".to_string(),
                message: e.to_string(),
            })?;

        info!(
            member_id = %member_id,
            tenant = %ctx.tenant_id,
            canonical_tenant = %target_tenant,
            "Member transferred to canonical tenant"
        );
        Ok(())
    }

    // ========================================================================
    // Reactive trigger
    // ========================================================================

    /// Converge the mirror set after a member changed in `canonical_tenant`.
    ///
    /// Decides the corrective action from the (old, new) pair:
    /// deleted or deactivated or tag cleared → withdraw mirrors under the
    /// old tag; present and active → upsert mirrors under the new tag; tag
    /// moved A→B → withdraw from tenants matching only A, upsert under B.
    /// Idempotent by construction.
    pub async fn on_member_change(
        &self,
        canonical_tenant: &str,
        old: Option<&MemberDoc>,
        new: Option<&MemberDoc>,
    ) -> Result<MirrorSyncReport> {
        let mut report = MirrorSyncReport::default();

        match (old, new) {
            (None, None) => return Ok(report),
            (Some(o), Some(n)) if o.id != n.id => {
                return Err(SyncError::InvalidState(format!(
                    "change pair ids disagree: '{}' vs '{}'",
                    o.id, n.id
                )));
            }
            _ => {}
        }
        let record_id = new.or(old).map(|m| m.id.clone()).unwrap_or_default();

        let fanout_member = new.filter(|m| m.qualifies_for_fan_out());
        let new_tag = fanout_member.and_then(|m| m.classification_tag.clone());
        let old_tag = old.and_then(|m| m.classification_tag.clone());

        let upsert_targets: Vec<String> = match &new_tag {
            Some(tag) => self.directory.aggregation_tenants_for(tag).await?,
            None => Vec::new(),
        };

        // Tenants that matched the old tag but not the new one; everything
        // in the upsert set is refreshed rather than cycled.
        let removal_targets: Vec<String> = match &old_tag {
            Some(tag) if new_tag.as_deref() != Some(tag.as_str()) => self
                .directory
                .aggregation_tenants_for(tag)
                .await?
                .into_iter()
                .filter(|t| !upsert_targets.contains(t))
                .collect(),
            _ => Vec::new(),
        };

        for target in &removal_targets {
            if target == canonical_tenant {
                continue;
            }
            match self.store.get(target, MEMBER_COLLECTION, &record_id).await {
                Ok(Some(resident)) => {
                    // Only withdraw copies this canonical tenant put there.
                    if resident.get_str("sourceTenantId").ok() != Some(canonical_tenant) {
                        continue;
                    }
                    match self.store.delete(target, MEMBER_COLLECTION, &record_id).await {
                        Ok(()) => {
                            report.mirrors_removed += 1;
                            if let Err(e) = self
                                .overrides
                                .clear(target, &record_id, canonical_tenant)
                                .await
                            {
                                warn!(
                                    record_id = %record_id,
                                    target_tenant = %target,
                                    operation = "override-clear",
                                    error = %e,
                                    "Override clear failed during mirror withdrawal"
                                );
                                report.failed_mutations += 1;
                            }
                        }
                        Err(e) => {
                            warn!(
                                record_id = %record_id,
                                target_tenant = %target,
                                operation = "mirror-withdraw",
                                error = %e,
                                "Mirror withdrawal failed"
                            );
                            report.failed_mutations += 1;
                        }
                    }
                }
                Ok(None) => {} // already absent, converged
                Err(e) => {
                    warn!(
                        record_id = %record_id,
                        target_tenant = %target,
                        operation = "mirror-withdraw",
                        error = %e,
                        "Mirror lookup failed during withdrawal"
                    );
                    report.failed_mutations += 1;
                }
            }
        }

        if let Some(member) = fanout_member {
            let mut ops: Vec<BatchOp> = Vec::new();
            for target in &upsert_targets {
                if target == canonical_tenant {
                    continue;
                }
                match self
                    .exclusions
                    .is_excluded(target, &record_id, canonical_tenant)
                    .await
                {
                    Ok(true) => {
                        report.tenants_skipped += 1;
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        // Cannot prove the pair is not tombstoned; skip it.
                        warn!(
                            record_id = %record_id,
                            target_tenant = %target,
                            operation = "exclusion-check",
                            error = %e,
                            "Exclusion check failed; skipping target"
                        );
                        report.failed_mutations += 1;
                        continue;
                    }
                }
                ops.push(BatchOp::Set {
                    tenant: target.clone(),
                    collection: MEMBER_COLLECTION.to_string(),
                    id: record_id.clone(),
                    fields: member.mirror_copy(canonical_tenant, SYSTEM_ACTOR),
                    merge: true,
                });
            }

            if !ops.is_empty() {
                let outcome = self.commit_in_chunks(ops, "mirror-fan-out").await?;
                report.mirrors_upserted += outcome.succeeded;
                report.failed_mutations += outcome.attempted - outcome.succeeded;
            }
        }

        debug!(
            record_id = %record_id,
            canonical_tenant = %canonical_tenant,
            upserted = report.mirrors_upserted,
            removed = report.mirrors_removed,
            skipped = report.tenants_skipped,
            "Mirror state converged"
        );
        Ok(report)
    }

    /// First-sync/backfill entry: fan out every active tagged member of a
    /// canonical tenant over the reactive-trigger path.
    pub async fn backfill_classification(
        &self,
        canonical_tenant: &str,
        tag: &str,
    ) -> Result<MirrorSyncReport> {
        let members = self
            .store
            .query(
                canonical_tenant,
                MEMBER_COLLECTION,
                "classificationTag",
                crate::db::QueryOp::Eq,
                bson::Bson::String(tag.to_string()),
            )
            .await?;

        let mut report = MirrorSyncReport::default();
        for doc in members {
            let member: MemberDoc = match decode(doc) {
                Ok(m) => m,
                Err(e) => {
                    warn!(tenant = %canonical_tenant, error = %e, "Skipping malformed member during backfill");
                    report.failed_mutations += 1;
                    continue;
                }
            };
            if !member.qualifies_for_fan_out() {
                continue;
            }
            match self
                .on_member_change(canonical_tenant, None, Some(&member))
                .await
            {
                Ok(r) => report.absorb(r),
                Err(e) => {
                    warn!(
                        member_id = %member.id,
                        tenant = %canonical_tenant,
                        error = %e,
                        "Backfill fan-out failed for member"
                    );
                    report.failed_mutations += 1;
                }
            }
        }

        info!(
            tenant = %canonical_tenant,
            tag = %tag,
            upserted = report.mirrors_upserted,
            "Backfill completed"
        );
        Ok(report)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// A member as this aggregation context sees it: the resident copy
    /// with its context overrides layered on top.
    pub async fn member_view(
        &self,
        ctx: &TenantContext,
        member_id: &str,
    ) -> Result<Option<MemberDoc>> {
        let Some(doc) = self
            .store
            .get(&ctx.tenant_id, MEMBER_COLLECTION, member_id)
            .await?
        else {
            return Ok(None);
        };
        let mut member: MemberDoc = decode(doc)?;

        let canonical = member
            .source_tenant_id
            .clone()
            .unwrap_or_else(|| ctx.tenant_id.clone());
        if let Some(layer) = self
            .overrides
            .get(&ctx.tenant_id, member_id, &canonical)
            .await?
        {
            layer.fields.apply_to(&mut member);
        }
        Ok(Some(member))
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn owning_member(&self, tenant: &str, member_id: &str) -> Result<Option<MemberDoc>> {
        self.store
            .get(tenant, MEMBER_COLLECTION, member_id)
            .await?
            .map(decode)
            .transpose()
    }

    async fn collect_child_deletes(&self, tenant: &str, member_id: &str) -> Result<Vec<BatchOp>> {
        let mut ops = Vec::new();
        for kind in CHILD_KINDS {
            let rows = self
                .store
                .query(
                    tenant,
                    kind.collection(),
                    "memberId",
                    crate::db::QueryOp::Eq,
                    bson::Bson::String(member_id.to_string()),
                )
                .await?;
            for row in rows {
                if let Ok(id) = row.get_str("id") {
                    ops.push(BatchOp::Delete {
                        tenant: tenant.to_string(),
                        collection: kind.collection().to_string(),
                        id: id.to_string(),
                    });
                }
            }
        }
        Ok(ops)
    }

    /// Commit mutations in fixed-size chunks. A failed chunk is logged and
    /// skipped; committed chunks stand. Raises only when nothing succeeded.
    async fn commit_in_chunks(&self, ops: Vec<BatchOp>, what: &str) -> Result<ChunkOutcome> {
        let attempted = ops.len();
        let mut succeeded = 0usize;

        for chunk in ops.chunks(FAN_OUT_CHUNK) {
            let batch: WriteBatch = chunk.iter().cloned().collect();
            match self.store.commit_batch(batch).await {
                Ok(n) => succeeded += n,
                Err(e) => warn!(
                    operation = %what,
                    chunk_size = chunk.len(),
                    error = %e,
                    "Batch chunk failed; committed chunks stand"
                ),
            }
        }

        if attempted > 0 && succeeded == 0 {
            return Err(SyncError::BatchPartialFailure {
                attempted,
                succeeded: 0,
            });
        }
        Ok(ChunkOutcome {
            attempted,
            succeeded,
        })
    }
}
