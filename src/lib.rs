//! Crossview - cross-tenant mirroring and reconciliation engine
//!
//! A multi-tenant organizational directory keeps each organization's
//! records in its own tenant partition. An "aggregation context" unions
//! records drawn from every tenant sharing a classification tag into one
//! tenant-like view. Crossview is the engine underneath that view:
//!
//! - **Directory**: resolves which aggregation tenants a tag fans out to
//!   and which tenant is canonical for a user
//! - **Sync**: classifies records as native vs. mirrored, propagates
//!   writes to the canonical tenant, fans canonical records out to
//!   matching aggregation tenants, and maintains the override layer and
//!   exclusion tombstones that keep mirrored views consistent without
//!   resurrecting deleted data
//! - **Access**: authorization side-table granting a viewer reach into an
//!   owner's tenant, with an O(1) index kept valid across swaps
//! - **Repair**: idempotent backward scans that correct historical
//!   inconsistencies left by earlier propagation code

pub mod access;
pub mod config;
pub mod db;
pub mod directory;
pub mod repair;
pub mod sync;
pub mod types;

pub use config::Args;
pub use sync::{MirrorSyncEngine, MirrorSyncReport, TenantContext};
pub use types::{Result, SyncError};
