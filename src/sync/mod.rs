//! Cross-tenant mirroring: engine, override layer, exclusion registry,
//! propagation outbox, and request coalescing.

pub mod coalesce;
pub mod engine;
pub mod exclusions;
pub mod outbox;
pub mod overrides;

pub use coalesce::SingleFlight;
pub use engine::{MirrorSyncEngine, MirrorSyncReport, TenantContext};
pub use exclusions::ExclusionRegistry;
pub use outbox::Outbox;
pub use overrides::OverrideStore;
