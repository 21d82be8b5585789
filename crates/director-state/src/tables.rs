//! redb table definitions for the Director state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types),
//! except `SEQUENCES`. Every tenant-scoped key starts with `{tenant}/`, so a
//! prefix scan never crosses a tenant boundary.

use director_core::ResourceType;
use redb::TableDefinition;

/// Applications keyed by `{tenant}/{id}`.
pub const APPLICATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("applications");

/// Runtimes keyed by `{tenant}/{id}`.
pub const RUNTIMES: TableDefinition<&str, &[u8]> = TableDefinition::new("runtimes");

/// Formations keyed by `{tenant}/{name}`.
pub const FORMATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("formations");

/// Formation templates keyed by `{name}`.
pub const FORMATION_TEMPLATES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("formation_templates");

/// Membership rows keyed by `{tenant}/{formation}/{type}/{id}`.
pub const MEMBERSHIPS: TableDefinition<&str, &[u8]> = TableDefinition::new("memberships");

/// Reverse membership index keyed by `{tenant}/{type}/{id}/{formation}`.
pub const RESOURCE_FORMATIONS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("resource_formations");

/// Monotonic counters keyed by name.
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

pub fn tenant_prefix(tenant: &str) -> String {
    format!("{tenant}/")
}

pub fn object_key(tenant: &str, id: &str) -> String {
    format!("{tenant}/{id}")
}

pub fn membership_key(tenant: &str, formation: &str, rt: ResourceType, id: &str) -> String {
    format!("{tenant}/{formation}/{rt}/{id}")
}

/// Prefix of all membership rows of a formation, optionally of one type.
pub fn membership_prefix(tenant: &str, formation: &str, rt: Option<ResourceType>) -> String {
    match rt {
        Some(rt) => format!("{tenant}/{formation}/{rt}/"),
        None => format!("{tenant}/{formation}/"),
    }
}

pub fn reverse_key(tenant: &str, rt: ResourceType, id: &str, formation: &str) -> String {
    format!("{tenant}/{rt}/{id}/{formation}")
}

/// Prefix of the reverse rows of one resource, or of every resource of a type.
pub fn reverse_prefix(tenant: &str, rt: ResourceType, id: Option<&str>) -> String {
    match id {
        Some(id) => format!("{tenant}/{rt}/{id}/"),
        None => format!("{tenant}/{rt}/"),
    }
}

pub fn resource_table(rt: ResourceType) -> TableDefinition<'static, &'static str, &'static [u8]> {
    match rt {
        ResourceType::Application => APPLICATIONS,
        ResourceType::Runtime => RUNTIMES,
    }
}
