//! Domain types for the Director state store.
//!
//! These types represent the persisted state of applications, runtimes,
//! formations, formation templates, and the membership relation between
//! them. All types are serializable to/from JSON for storage in redb tables.

use std::collections::BTreeMap;

use director_core::{LabelValue, ResourceType, TenantId};
use serde::{Deserialize, Serialize};

/// Label set carried by applications and runtimes.
pub type Labels = BTreeMap<String, LabelValue>;

// ── Applications ──────────────────────────────────────────────────

/// A registered application (a "system").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Application {
    pub id: String,
    pub tenant: TenantId,
    pub name: String,
    pub description: Option<String>,
    pub base_url: Option<String>,
    /// Tenant identifier in the application's own system.
    pub local_tenant_id: Option<String>,
    pub status: ApplicationStatus,
    /// Includes the synthesised `scenarios` label when read back.
    pub labels: Labels,
    /// Store-wide registration order; stable sort key for pagination.
    pub ordinal: u64,
    /// Unix timestamp (seconds) when the application was registered.
    pub created_at: u64,
    /// Unix timestamp (seconds) of the last update.
    pub updated_at: u64,
}

/// Connection status of an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStatus {
    Initial,
    Connected,
    Unpaired,
}

/// Input for registering an application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationRegisterInput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub local_tenant_id: Option<String>,
    #[serde(default)]
    pub labels: Labels,
}

/// Partial update of an application. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationUpdateInput {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub status: Option<ApplicationStatus>,
    #[serde(default)]
    pub local_tenant_id: Option<String>,
}

// ── Runtimes ──────────────────────────────────────────────────────

/// A registered runtime that consumes applications through formations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Runtime {
    pub id: String,
    pub tenant: TenantId,
    pub name: String,
    pub description: Option<String>,
    pub labels: Labels,
    pub ordinal: u64,
    pub created_at: u64,
}

/// Input for registering a runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeRegisterInput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub labels: Labels,
}

// ── Formations ────────────────────────────────────────────────────

/// A named, tenant-scoped grouping of applications and runtimes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Formation {
    pub id: String,
    pub tenant: TenantId,
    pub name: String,
    pub template_name: Option<String>,
    pub created_at: u64,
}

/// Constraints on which resource types may join a formation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormationTemplate {
    pub name: String,
    /// `None` makes the template visible to every tenant.
    #[serde(default)]
    pub tenant: Option<TenantId>,
    /// Allowed `runtimeType` label values. Empty allows any.
    #[serde(default)]
    pub runtime_types: Vec<String>,
    /// Allowed `applicationType` label values. Empty allows any.
    #[serde(default)]
    pub application_types: Vec<String>,
    /// Tenant that published the template. Set by the store; only the
    /// owner may replace it.
    #[serde(default)]
    pub owner: Option<TenantId>,
}

/// One row of the membership relation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Membership {
    pub tenant: TenantId,
    pub formation: String,
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub assigned_at: u64,
}

/// Membership facts about a resource, captured inside the transaction
/// that will delete or unpair it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipSnapshot {
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub resource_name: String,
    /// Formations the resource belongs to, sorted.
    pub formations: Vec<String>,
    /// Names of other runtimes sharing any of those formations, sorted.
    pub runtimes: Vec<String>,
}

impl FormationTemplate {
    pub fn visible_to(&self, tenant: &str) -> bool {
        self.tenant.as_deref().is_none_or(|t| t == tenant)
    }

    /// Whether a resource whose type label is `type_label` may join.
    pub fn permits(&self, resource_type: ResourceType, type_label: Option<&LabelValue>) -> bool {
        let allowed = match resource_type {
            ResourceType::Application => &self.application_types,
            ResourceType::Runtime => &self.runtime_types,
        };
        if allowed.is_empty() {
            return true;
        }
        type_label
            .and_then(LabelValue::as_scalar)
            .is_some_and(|t| allowed.iter().any(|a| a == t))
    }
}
