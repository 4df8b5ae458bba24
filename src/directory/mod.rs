//! Tenant directory resolver.
//!
//! Answers the two routing questions the mirror engine asks: which
//! aggregation tenants union over a given classification tag, and which
//! tenant is canonical for a given user. Also serves as the user-profile
//! provider for the reconciliation jobs.

use std::collections::HashSet;
use std::sync::Arc;

use bson::Bson;
use tracing::warn;

use crate::db::schemas::{decode, UserProfileDoc, DIRECTORY_TENANT, USER_COLLECTION};
use crate::db::{DocumentStore, QueryOp};
use crate::sync::SingleFlight;
use crate::types::Result;

/// Resolver over the directory partition's user profiles.
pub struct TenantDirectory {
    store: Arc<dyn DocumentStore>,
    /// Coalesces concurrent lookups for the same tag; in-flight only,
    /// nothing is cached across calls.
    tag_lookups: SingleFlight<String, Vec<String>>,
}

impl TenantDirectory {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            tag_lookups: SingleFlight::new(),
        }
    }

    /// Fetch a user profile by uid.
    pub async fn profile(&self, uid: &str) -> Result<Option<UserProfileDoc>> {
        self.store
            .get(DIRECTORY_TENANT, USER_COLLECTION, uid)
            .await?
            .map(decode)
            .transpose()
    }

    /// Every aggregation tenant with at least one active operator carrying
    /// the given classification tag, deduplicated by derived tenant id.
    /// Discovery order, no priority; zero results is a valid outcome.
    pub async fn aggregation_tenants_for(&self, tag: &str) -> Result<Vec<String>> {
        let store = Arc::clone(&self.store);
        let tag_owned = tag.to_string();

        self.tag_lookups
            .run(tag.to_string(), || async move {
                let operators = store
                    .query(
                        DIRECTORY_TENANT,
                        USER_COLLECTION,
                        "classificationTag",
                        QueryOp::Eq,
                        Bson::String(tag_owned.clone()),
                    )
                    .await?;

                let mut seen = HashSet::new();
                let mut tenants = Vec::new();
                for doc in operators {
                    let profile: UserProfileDoc = match decode(doc) {
                        Ok(p) => p,
                        Err(e) => {
                            warn!(tag = %tag_owned, error = %e, "Skipping malformed operator profile");
                            continue;
                        }
                    };
                    if !profile.is_aggregation_operator || !profile.is_active {
                        continue;
                    }
                    if let Some(tenant) = profile.derived_aggregation_tenant() {
                        if seen.insert(tenant.to_string()) {
                            tenants.push(tenant.to_string());
                        }
                    }
                }
                Ok(tenants)
            })
            .await
    }

    /// The canonical tenant for a user: the stored default-tenant pointer,
    /// falling back to the tenant they are currently in. `None` means
    /// "cannot propagate"; callers log and skip rather than erroring.
    pub fn canonical_tenant_for(profile: &UserProfileDoc) -> Option<String> {
        let resolved = profile
            .default_tenant_id
            .clone()
            .or_else(|| profile.current_tenant_id.clone());
        if resolved.is_none() {
            warn!(uid = %profile.uid, "User resolves to no canonical tenant; cannot propagate");
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::encode;
    use crate::db::InMemoryStore;

    async fn seed_operator(
        store: &InMemoryStore,
        uid: &str,
        tag: Option<&str>,
        aggregation_tenant: Option<&str>,
        active: bool,
    ) {
        let profile = UserProfileDoc {
            uid: uid.to_string(),
            classification_tag: tag.map(str::to_string),
            aggregation_tenant_id: aggregation_tenant.map(str::to_string),
            is_aggregation_operator: true,
            is_active: active,
            ..Default::default()
        };
        store
            .set(
                DIRECTORY_TENANT,
                USER_COLLECTION,
                uid,
                encode(&profile).unwrap(),
                false,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_tenants_for_tag_deduplicates() {
        let store = Arc::new(InMemoryStore::new());
        seed_operator(&store, "u1", Some("worship"), Some("ag1"), true).await;
        seed_operator(&store, "u2", Some("worship"), Some("ag1"), true).await;
        seed_operator(&store, "u3", Some("worship"), Some("ag2"), true).await;
        seed_operator(&store, "u4", Some("youth"), Some("ag3"), true).await;

        let directory = TenantDirectory::new(store);
        let mut tenants = directory.aggregation_tenants_for("worship").await.unwrap();
        tenants.sort();
        assert_eq!(tenants, vec!["ag1", "ag2"]);
    }

    #[tokio::test]
    async fn test_inactive_operators_are_skipped() {
        let store = Arc::new(InMemoryStore::new());
        seed_operator(&store, "u1", Some("worship"), Some("ag1"), false).await;

        let directory = TenantDirectory::new(store);
        let tenants = directory.aggregation_tenants_for("worship").await.unwrap();
        assert!(tenants.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tag_yields_empty() {
        let directory = TenantDirectory::new(Arc::new(InMemoryStore::new()));
        let tenants = directory.aggregation_tenants_for("nobody").await.unwrap();
        assert!(tenants.is_empty());
    }

    #[test]
    fn test_canonical_tenant_fallback_chain() {
        let mut profile = UserProfileDoc {
            uid: "u1".into(),
            default_tenant_id: Some("c1".into()),
            current_tenant_id: Some("c2".into()),
            ..Default::default()
        };
        assert_eq!(
            TenantDirectory::canonical_tenant_for(&profile).as_deref(),
            Some("c1")
        );

        profile.default_tenant_id = None;
        assert_eq!(
            TenantDirectory::canonical_tenant_for(&profile).as_deref(),
            Some("c2")
        );

        profile.current_tenant_id = None;
        assert!(TenantDirectory::canonical_tenant_for(&profile).is_none());
    }
}
