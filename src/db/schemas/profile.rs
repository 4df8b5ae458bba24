//! User profile document schema.
//!
//! Stores tenant pointers and aggregation-context operator preferences.

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::IntoIndexes;
use crate::db::schemas::Metadata;

/// Collection name for user profiles (directory partition)
pub const USER_COLLECTION: &str = "users";

/// User profile document
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct UserProfileDoc {
    /// User identifier; doubles as the document id
    #[serde(default)]
    pub uid: String,

    #[serde(default)]
    pub metadata: Metadata,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Stored default-tenant pointer (the canonical tenant)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_tenant_id: Option<String>,

    /// Tenant the user is currently operating in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_tenant_id: Option<String>,

    /// Aggregation-context tenant pointer; kept aligned with the canonical
    /// pointer by the reconciliation jobs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregation_tenant_id: Option<String>,

    /// Classification tag this operator's aggregation context unions over
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification_tag: Option<String>,

    /// Whether this user operates an aggregation context
    #[serde(default)]
    pub is_aggregation_operator: bool,

    #[serde(default = "default_true")]
    pub is_active: bool,

    #[serde(rename = "_fixedByMigration", skip_serializing_if = "Option::is_none")]
    pub fixed_by_migration: Option<bool>,
}

fn default_true() -> bool {
    true
}

impl UserProfileDoc {
    /// The aggregation tenant this operator's context maps onto.
    pub fn derived_aggregation_tenant(&self) -> Option<&str> {
        self.aggregation_tenant_id
            .as_deref()
            .or(self.default_tenant_id.as_deref())
    }
}

impl IntoIndexes for UserProfileDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "classificationTag": 1, "isAggregationOperator": 1 },
            Some(
                IndexOptions::builder()
                    .name("classification_operator_index".to_string())
                    .build(),
            ),
        )]
    }
}
