//! StateStore — redb-backed state persistence for Director.
//!
//! Holds the application and runtime registries, formations, formation
//! templates, and the membership relation (with its reverse index). All
//! values are JSON-serialized into redb's `&[u8]` value columns. The store
//! supports both on-disk and in-memory backends (the latter for testing).
//!
//! Every multi-step mutation runs inside a single write transaction; an
//! error aborts the transaction, so no partial state is ever committed.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use director_core::{
    APPLICATION_TYPE_LABEL, LabelValue, Normalizer, ResourceType, SCENARIOS_LABEL,
};
use redb::{Database, ReadTransaction, ReadableDatabase, ReadableTable, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

const ORDINAL_SEQ: &str = "ordinal";

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(APPLICATIONS).map_err(map_err!(Table))?;
        txn.open_table(RUNTIMES).map_err(map_err!(Table))?;
        txn.open_table(FORMATIONS).map_err(map_err!(Table))?;
        txn.open_table(FORMATION_TEMPLATES).map_err(map_err!(Table))?;
        txn.open_table(MEMBERSHIPS).map_err(map_err!(Table))?;
        txn.open_table(RESOURCE_FORMATIONS).map_err(map_err!(Table))?;
        txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Run `f` in a write transaction, committing on success and aborting on error.
    fn write<T>(&self, f: impl FnOnce(&WriteTransaction) -> StateResult<T>) -> StateResult<T> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        match f(&txn) {
            Ok(value) => {
                txn.commit().map_err(map_err!(Transaction))?;
                Ok(value)
            }
            Err(e) => {
                txn.abort().map_err(map_err!(Transaction))?;
                Err(e)
            }
        }
    }

    // ── Formation templates ───────────────────────────────────────

    /// Insert or update a formation template on behalf of `publisher`.
    ///
    /// Template names are global. An existing template may only be replaced
    /// by the tenant that published it, and a global template cannot be
    /// narrowed to a single tenant.
    pub fn put_formation_template(
        &self,
        publisher: &str,
        template: &FormationTemplate,
    ) -> StateResult<FormationTemplate> {
        validate_segment(publisher, "tenant")?;
        validate_segment(&template.name, "formation template name")?;
        if template.tenant.as_deref().is_some_and(|t| t != publisher) {
            return Err(StateError::Forbidden(
                "formation templates can only be scoped to the publishing tenant".to_string(),
            ));
        }
        let mut stored = template.clone();
        stored.owner = Some(publisher.to_string());
        let value = encode(&stored)?;

        self.write(|txn| {
            let mut table = txn.open_table(FORMATION_TEMPLATES).map_err(map_err!(Table))?;
            let existing: Option<FormationTemplate> = get_json(&table, &template.name)?;
            if let Some(existing) = existing {
                if !existing.visible_to(publisher) {
                    return Err(StateError::NotFound("formationTemplate".to_string()));
                }
                if existing.owner.as_deref() != Some(publisher) {
                    return Err(StateError::Forbidden(format!(
                        "formation template {} is owned by another tenant",
                        template.name
                    )));
                }
                if existing.tenant.is_none() && stored.tenant.is_some() {
                    return Err(StateError::Conflict(format!(
                        "formation template {} is global and cannot be scoped to a tenant",
                        template.name
                    )));
                }
            }
            table
                .insert(template.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            Ok(())
        })?;
        debug!(name = %template.name, %publisher, "formation template stored");
        Ok(stored)
    }

    /// Get a formation template by name, regardless of visibility.
    pub fn get_formation_template(&self, name: &str) -> StateResult<Option<FormationTemplate>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(FORMATION_TEMPLATES).map_err(map_err!(Table))?;
        get_json(&table, name)
    }

    /// List the formation templates visible to a tenant.
    pub fn list_formation_templates(&self, tenant: &str) -> StateResult<Vec<FormationTemplate>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(FORMATION_TEMPLATES).map_err(map_err!(Table))?;
        let all: Vec<FormationTemplate> = scan_json(&table, "")?;
        Ok(all
            .into_iter()
            .filter(|t| t.visible_to(tenant))
            .map(|mut t| {
                if t.owner.as_deref() != Some(tenant) {
                    t.owner = None;
                }
                t
            })
            .collect())
    }

    // ── Formations ────────────────────────────────────────────────

    /// Create a formation, optionally constrained by a template.
    pub fn create_formation(
        &self,
        tenant: &str,
        name: &str,
        template_name: Option<&str>,
    ) -> StateResult<Formation> {
        validate_segment(tenant, "tenant")?;
        validate_segment(name, "formation name")?;
        let formation = self.write(|txn| {
            if let Some(template_name) = template_name {
                let templates = txn.open_table(FORMATION_TEMPLATES).map_err(map_err!(Table))?;
                let template: Option<FormationTemplate> = get_json(&templates, template_name)?;
                if !template.is_some_and(|t| t.visible_to(tenant)) {
                    return Err(StateError::NotFound("formationTemplate".to_string()));
                }
            }

            let key = object_key(tenant, name);
            let mut table = txn.open_table(FORMATIONS).map_err(map_err!(Table))?;
            if table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists("formation".to_string()));
            }
            let formation = Formation {
                id: uuid::Uuid::new_v4().to_string(),
                tenant: tenant.to_string(),
                name: name.to_string(),
                template_name: template_name.map(str::to_string),
                created_at: epoch_secs(),
            };
            let value = encode(&formation)?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            Ok(formation)
        })?;
        info!(%tenant, formation = %name, "formation created");
        Ok(formation)
    }

    /// Get a formation by tenant and name.
    pub fn get_formation(&self, tenant: &str, name: &str) -> StateResult<Option<Formation>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(FORMATIONS).map_err(map_err!(Table))?;
        get_json(&table, &object_key(tenant, name))
    }

    /// List all formations of a tenant, sorted by name.
    pub fn list_formations(&self, tenant: &str) -> StateResult<Vec<Formation>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(FORMATIONS).map_err(map_err!(Table))?;
        scan_json(&table, &tenant_prefix(tenant))
    }

    /// Delete a formation. Fails with `Conflict` while it still has members.
    pub fn delete_formation(&self, tenant: &str, name: &str) -> StateResult<Formation> {
        let formation = self.write(|txn| {
            let key = object_key(tenant, name);
            let formation = read_formation(txn, tenant, name)?
                .ok_or_else(|| StateError::NotFound("formation".to_string()))?;

            let prefix = membership_prefix(tenant, name, None);
            let members: Vec<Membership> = {
                let memberships = txn.open_table(MEMBERSHIPS).map_err(map_err!(Table))?;
                scan_json(&memberships, &prefix)?
            };
            if !members.is_empty() {
                return Err(StateError::Conflict(format!(
                    "Formation {name} still has {} assigned resources and cannot be deleted",
                    members.len()
                )));
            }

            let mut table = txn.open_table(FORMATIONS).map_err(map_err!(Table))?;
            table.remove(key.as_str()).map_err(map_err!(Write))?;
            Ok(formation)
        })?;
        info!(%tenant, formation = %name, "formation deleted");
        Ok(formation)
    }

    // ── Memberships ───────────────────────────────────────────────

    /// Add a resource to a formation. Returns false if it was already a member.
    pub fn assign_resource(
        &self,
        tenant: &str,
        formation: &str,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> StateResult<bool> {
        validate_segment(resource_id, "resource id")?;
        self.write(|txn| assign_in(txn, tenant, formation, resource_type, resource_id))
    }

    /// Remove a resource from a formation. Returns false if it was not a member.
    pub fn unassign_resource(
        &self,
        tenant: &str,
        formation: &str,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> StateResult<bool> {
        validate_segment(resource_id, "resource id")?;
        self.write(|txn| unassign_in(txn, tenant, formation, resource_type, resource_id))
    }

    /// Formations a resource belongs to, sorted by name.
    pub fn list_formations_for_resource(
        &self,
        tenant: &str,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> StateResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let reverse = txn.open_table(RESOURCE_FORMATIONS).map_err(map_err!(Table))?;
        formations_of(&reverse, tenant, resource_type, resource_id)
    }

    /// IDs of the members of a formation, optionally filtered by type.
    pub fn list_members_for_formation(
        &self,
        tenant: &str,
        formation: &str,
        resource_type: Option<ResourceType>,
    ) -> StateResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let formations = txn.open_table(FORMATIONS).map_err(map_err!(Table))?;
        let exists: Option<Formation> = get_json(&formations, &object_key(tenant, formation))?;
        if exists.is_none() {
            return Err(StateError::NotFound("formation".to_string()));
        }
        let memberships = txn.open_table(MEMBERSHIPS).map_err(map_err!(Table))?;
        let rows: Vec<Membership> =
            scan_json(&memberships, &membership_prefix(tenant, formation, resource_type))?;
        Ok(rows.into_iter().map(|m| m.resource_id).collect())
    }

    // ── Applications ──────────────────────────────────────────────

    /// Register an application. Names are unique per tenant after normalization.
    pub fn register_application(
        &self,
        tenant: &str,
        input: &ApplicationRegisterInput,
        normalizer: &Normalizer,
    ) -> StateResult<Application> {
        validate_segment(tenant, "tenant")?;
        validate_register_input(&input.name, &input.labels)?;
        if !normalizer.has_slug(&input.name) {
            return Err(StateError::Validation(
                "name must contain at least one letter or digit".to_string(),
            ));
        }
        let normalized = normalizer.normalize(&input.name);

        let app = self.write(|txn| {
            let ordinal = next_ordinal(txn)?;
            let mut table = txn.open_table(APPLICATIONS).map_err(map_err!(Table))?;
            let existing: Vec<Application> = scan_json(&table, &tenant_prefix(tenant))?;
            if existing
                .iter()
                .any(|a| normalizer.normalize(&a.name) == normalized)
            {
                return Err(StateError::AlreadyExists("application".to_string()));
            }

            let now = epoch_secs();
            let app = Application {
                id: uuid::Uuid::new_v4().to_string(),
                tenant: tenant.to_string(),
                name: input.name.clone(),
                description: input.description.clone(),
                base_url: input.base_url.clone(),
                local_tenant_id: input.local_tenant_id.clone(),
                status: if input.base_url.is_some() {
                    ApplicationStatus::Connected
                } else {
                    ApplicationStatus::Initial
                },
                labels: input.labels.clone(),
                ordinal,
                created_at: now,
                updated_at: now,
            };
            let value = encode(&app)?;
            table
                .insert(object_key(tenant, &app.id).as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            Ok(app)
        })?;
        info!(%tenant, id = %app.id, name = %app.name, "application registered");
        Ok(app)
    }

    /// Get an application, with its `scenarios` label filled in.
    pub fn get_application(&self, tenant: &str, id: &str) -> StateResult<Option<Application>> {
        self.get_resource(tenant, id)
    }

    /// List a tenant's applications in registration order.
    pub fn list_applications(&self, tenant: &str) -> StateResult<Vec<Application>> {
        self.list_resources(tenant)
    }

    /// Apply a partial update to an application.
    pub fn update_application(
        &self,
        tenant: &str,
        id: &str,
        input: &ApplicationUpdateInput,
    ) -> StateResult<Application> {
        let app = self.write(|txn| {
            let mut app: Application = load(txn, tenant, id)?;
            if let Some(description) = &input.description {
                app.description = Some(description.clone());
            }
            if let Some(base_url) = &input.base_url {
                app.base_url = Some(base_url.clone());
            }
            if let Some(status) = input.status {
                app.status = status;
            }
            if let Some(local_tenant_id) = &input.local_tenant_id {
                app.local_tenant_id = Some(local_tenant_id.clone());
            }
            app.updated_at = epoch_secs();
            save(txn, tenant, &app)?;
            let formations = formations_in(txn, tenant, ResourceType::Application, id)?;
            Ok(with_formations(app, formations))
        })?;
        debug!(%tenant, %id, "application updated");
        Ok(app)
    }

    /// Set a label on an application. `scenarios` is applied as a membership diff.
    pub fn set_application_label(
        &self,
        tenant: &str,
        id: &str,
        key: &str,
        value: &LabelValue,
    ) -> StateResult<Application> {
        self.set_label(tenant, id, key, value)
    }

    /// Delete a label from an application. `scenarios` unassigns every formation.
    pub fn delete_application_label(
        &self,
        tenant: &str,
        id: &str,
        key: &str,
    ) -> StateResult<Application> {
        self.delete_label(tenant, id, key)
    }

    /// Delete an application if `guard` accepts its membership snapshot.
    pub fn unregister_application<G>(
        &self,
        tenant: &str,
        id: &str,
        guard: G,
    ) -> StateResult<Application>
    where
        G: FnOnce(&MembershipSnapshot) -> StateResult<()>,
    {
        self.guarded_remove(tenant, id, guard)
    }

    /// Mark an application unpaired if `guard` accepts its membership snapshot.
    pub fn unpair_application<G>(&self, tenant: &str, id: &str, guard: G) -> StateResult<Application>
    where
        G: FnOnce(&MembershipSnapshot) -> StateResult<()>,
    {
        let app = self.write(|txn| {
            let mut app: Application = load(txn, tenant, id)?;
            let snapshot = snapshot_in(txn, tenant, ResourceType::Application, id, &app.name)?;
            guard(&snapshot)?;
            app.status = ApplicationStatus::Unpaired;
            app.updated_at = epoch_secs();
            save(txn, tenant, &app)?;
            Ok(with_formations(app, snapshot.formations))
        })?;
        info!(%tenant, %id, "application unpaired");
        Ok(app)
    }

    /// Merge `source_id` into `destination_id` and delete the source.
    ///
    /// The destination keeps its own non-empty fields and labels, gains the
    /// source's missing ones, and joins every formation the source was in.
    /// Any failure leaves both applications untouched.
    pub fn merge_applications(
        &self,
        tenant: &str,
        destination_id: &str,
        source_id: &str,
        protected_label_keys: &[String],
    ) -> StateResult<Application> {
        if destination_id == source_id {
            return Err(StateError::Validation(
                "source and destination applications must differ".to_string(),
            ));
        }
        let merged = self.write(|txn| {
            let mut dest: Application = load(txn, tenant, destination_id)?;
            let source: Application = load(txn, tenant, source_id)?;

            for app in [&dest, &source] {
                if let Some(key) = protected_label_keys
                    .iter()
                    .find(|k| app.labels.contains_key(k.as_str()))
                {
                    return Err(StateError::Validation(format!(
                        "application {} carries protected label {key} and cannot be merged",
                        app.name
                    )));
                }
            }
            if let (Some(a), Some(b)) = (
                dest.labels.get(APPLICATION_TYPE_LABEL),
                source.labels.get(APPLICATION_TYPE_LABEL),
            ) {
                if a != b {
                    return Err(StateError::Validation(
                        "applications of different types cannot be merged".to_string(),
                    ));
                }
            }

            dest.description = dest.description.take().or(source.description.clone());
            dest.base_url = dest.base_url.take().or(source.base_url.clone());
            dest.local_tenant_id = dest.local_tenant_id.take().or(source.local_tenant_id.clone());
            if dest.status == ApplicationStatus::Initial {
                dest.status = source.status;
            }
            for (key, value) in &source.labels {
                dest.labels
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
            dest.updated_at = epoch_secs();
            save(txn, tenant, &dest)?;

            let source_formations =
                formations_in(txn, tenant, ResourceType::Application, source_id)?;
            for formation in &source_formations {
                unassign_in(txn, tenant, formation, ResourceType::Application, source_id)?;
                assign_in(txn, tenant, formation, ResourceType::Application, destination_id)?;
            }

            let mut table = txn.open_table(APPLICATIONS).map_err(map_err!(Table))?;
            table
                .remove(object_key(tenant, source_id).as_str())
                .map_err(map_err!(Write))?;
            drop(table);

            let formations = formations_in(txn, tenant, ResourceType::Application, destination_id)?;
            Ok(with_formations(dest, formations))
        })?;
        info!(%tenant, destination = %destination_id, source = %source_id, "applications merged");
        Ok(merged)
    }

    // ── Runtimes ──────────────────────────────────────────────────

    /// Register a runtime.
    pub fn register_runtime(
        &self,
        tenant: &str,
        input: &RuntimeRegisterInput,
    ) -> StateResult<Runtime> {
        validate_segment(tenant, "tenant")?;
        validate_register_input(&input.name, &input.labels)?;
        let runtime = self.write(|txn| {
            let ordinal = next_ordinal(txn)?;
            let runtime = Runtime {
                id: uuid::Uuid::new_v4().to_string(),
                tenant: tenant.to_string(),
                name: input.name.clone(),
                description: input.description.clone(),
                labels: input.labels.clone(),
                ordinal,
                created_at: epoch_secs(),
            };
            save(txn, tenant, &runtime)?;
            Ok(runtime)
        })?;
        info!(%tenant, id = %runtime.id, name = %runtime.name, "runtime registered");
        Ok(runtime)
    }

    /// Get a runtime, with its `scenarios` label filled in.
    pub fn get_runtime(&self, tenant: &str, id: &str) -> StateResult<Option<Runtime>> {
        self.get_resource(tenant, id)
    }

    /// List a tenant's runtimes in registration order.
    pub fn list_runtimes(&self, tenant: &str) -> StateResult<Vec<Runtime>> {
        self.list_resources(tenant)
    }

    pub fn set_runtime_label(
        &self,
        tenant: &str,
        id: &str,
        key: &str,
        value: &LabelValue,
    ) -> StateResult<Runtime> {
        self.set_label(tenant, id, key, value)
    }

    pub fn delete_runtime_label(&self, tenant: &str, id: &str, key: &str) -> StateResult<Runtime> {
        self.delete_label(tenant, id, key)
    }

    /// Delete a runtime if `guard` accepts its membership snapshot.
    pub fn unregister_runtime<G>(&self, tenant: &str, id: &str, guard: G) -> StateResult<Runtime>
    where
        G: FnOnce(&MembershipSnapshot) -> StateResult<()>,
    {
        self.guarded_remove(tenant, id, guard)
    }

    /// A runtime together with every application of its tenant, read from
    /// one snapshot so memberships on both sides agree.
    pub fn runtime_with_applications(
        &self,
        tenant: &str,
        runtime_id: &str,
    ) -> StateResult<Option<(Runtime, Vec<Application>)>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let Some(runtime) = read_resource::<Runtime>(&txn, tenant, runtime_id)? else {
            return Ok(None);
        };
        let applications = read_resources::<Application>(&txn, tenant)?;
        Ok(Some((runtime, applications)))
    }

    // ── Shared resource plumbing ──────────────────────────────────

    fn get_resource<T: LabeledResource>(&self, tenant: &str, id: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        read_resource(&txn, tenant, id)
    }

    fn list_resources<T: LabeledResource>(&self, tenant: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        read_resources(&txn, tenant)
    }

    fn set_label<T: LabeledResource>(
        &self,
        tenant: &str,
        id: &str,
        key: &str,
        value: &LabelValue,
    ) -> StateResult<T> {
        if key.trim().is_empty() {
            return Err(StateError::Validation("label key must not be empty".to_string()));
        }
        let resource = self.write(|txn| {
            let mut resource: T = load(txn, tenant, id)?;
            if key == SCENARIOS_LABEL {
                let desired: BTreeSet<String> = value.to_list().into_iter().collect();
                let current: BTreeSet<String> =
                    formations_in(txn, tenant, T::TYPE, id)?.into_iter().collect();
                for formation in desired.difference(&current) {
                    assign_in(txn, tenant, formation, T::TYPE, id)?;
                }
                for formation in current.difference(&desired) {
                    unassign_in(txn, tenant, formation, T::TYPE, id)?;
                }
            } else {
                resource.labels_mut().insert(key.to_string(), value.clone());
                if key == T::TYPE.type_label() {
                    ensure_still_permitted(txn, tenant, T::TYPE, id, resource.labels())?;
                }
                save(txn, tenant, &resource)?;
            }
            let formations = formations_in(txn, tenant, T::TYPE, id)?;
            Ok(with_formations(resource, formations))
        })?;
        debug!(%tenant, %id, %key, resource = %T::TYPE, "label set");
        Ok(resource)
    }

    fn delete_label<T: LabeledResource>(&self, tenant: &str, id: &str, key: &str) -> StateResult<T> {
        let resource = self.write(|txn| {
            let mut resource: T = load(txn, tenant, id)?;
            if key == SCENARIOS_LABEL {
                for formation in formations_in(txn, tenant, T::TYPE, id)? {
                    unassign_in(txn, tenant, &formation, T::TYPE, id)?;
                }
            } else {
                if resource.labels_mut().remove(key).is_none() {
                    return Err(StateError::NotFound("label".to_string()));
                }
                if key == T::TYPE.type_label() {
                    ensure_still_permitted(txn, tenant, T::TYPE, id, resource.labels())?;
                }
                save(txn, tenant, &resource)?;
            }
            let formations = formations_in(txn, tenant, T::TYPE, id)?;
            Ok(with_formations(resource, formations))
        })?;
        debug!(%tenant, %id, %key, resource = %T::TYPE, "label deleted");
        Ok(resource)
    }

    fn guarded_remove<T, G>(&self, tenant: &str, id: &str, guard: G) -> StateResult<T>
    where
        T: LabeledResource,
        G: FnOnce(&MembershipSnapshot) -> StateResult<()>,
    {
        let resource = self.write(|txn| {
            let resource: T = load(txn, tenant, id)?;
            let snapshot = snapshot_in(txn, tenant, T::TYPE, id, resource.name())?;
            guard(&snapshot)?;
            for formation in &snapshot.formations {
                unassign_in(txn, tenant, formation, T::TYPE, id)?;
            }
            let mut table = txn.open_table(resource_table(T::TYPE)).map_err(map_err!(Table))?;
            table
                .remove(object_key(tenant, id).as_str())
                .map_err(map_err!(Write))?;
            Ok(resource)
        })?;
        info!(%tenant, %id, resource = %T::TYPE, "resource unregistered");
        Ok(resource)
    }
}

// ── Resource abstraction ──────────────────────────────────────────

/// Common shape of applications and runtimes as stored records.
trait LabeledResource: Serialize + DeserializeOwned {
    const TYPE: ResourceType;
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn ordinal(&self) -> u64;
    fn labels(&self) -> &Labels;
    fn labels_mut(&mut self) -> &mut Labels;
}

impl LabeledResource for Application {
    const TYPE: ResourceType = ResourceType::Application;
    fn id(&self) -> &str {
        &self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn ordinal(&self) -> u64 {
        self.ordinal
    }
    fn labels(&self) -> &Labels {
        &self.labels
    }
    fn labels_mut(&mut self) -> &mut Labels {
        &mut self.labels
    }
}

impl LabeledResource for Runtime {
    const TYPE: ResourceType = ResourceType::Runtime;
    fn id(&self) -> &str {
        &self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn ordinal(&self) -> u64 {
        self.ordinal
    }
    fn labels(&self) -> &Labels {
        &self.labels
    }
    fn labels_mut(&mut self) -> &mut Labels {
        &mut self.labels
    }
}

/// Attach the synthesised `scenarios` label. Never persisted.
fn with_formations<T: LabeledResource>(mut resource: T, formations: Vec<String>) -> T {
    if !formations.is_empty() {
        resource
            .labels_mut()
            .insert(SCENARIOS_LABEL.to_string(), LabelValue::List(formations));
    }
    resource
}

// ── Read helpers ──────────────────────────────────────────────────

fn read_resource<T: LabeledResource>(
    txn: &ReadTransaction,
    tenant: &str,
    id: &str,
) -> StateResult<Option<T>> {
    let table = txn.open_table(resource_table(T::TYPE)).map_err(map_err!(Table))?;
    let Some(resource) = get_json::<T>(&table, &object_key(tenant, id))? else {
        return Ok(None);
    };
    let reverse = txn.open_table(RESOURCE_FORMATIONS).map_err(map_err!(Table))?;
    let formations = formations_of(&reverse, tenant, T::TYPE, id)?;
    Ok(Some(with_formations(resource, formations)))
}

/// All resources of a tenant in registration order, with their formations.
fn read_resources<T: LabeledResource>(txn: &ReadTransaction, tenant: &str) -> StateResult<Vec<T>> {
    let table = txn.open_table(resource_table(T::TYPE)).map_err(map_err!(Table))?;
    let mut resources: Vec<T> = scan_json(&table, &tenant_prefix(tenant))?;
    resources.sort_by_key(|r| r.ordinal());

    let reverse = txn.open_table(RESOURCE_FORMATIONS).map_err(map_err!(Table))?;
    let rows: Vec<Membership> = scan_json(&reverse, &reverse_prefix(tenant, T::TYPE, None))?;
    let mut by_resource: HashMap<String, Vec<String>> = HashMap::new();
    for row in rows {
        by_resource
            .entry(row.resource_id)
            .or_default()
            .push(row.formation);
    }

    Ok(resources
        .into_iter()
        .map(|r| {
            let formations = by_resource.remove(r.id()).unwrap_or_default();
            with_formations(r, formations)
        })
        .collect())
}

// ── Transaction helpers ───────────────────────────────────────────
//
// Each helper opens the tables it needs and drops them before returning,
// so helpers can be chained inside one write transaction.

fn load<T: LabeledResource>(txn: &WriteTransaction, tenant: &str, id: &str) -> StateResult<T> {
    let table = txn.open_table(resource_table(T::TYPE)).map_err(map_err!(Table))?;
    get_json(&table, &object_key(tenant, id))?
        .ok_or_else(|| StateError::NotFound(T::TYPE.to_string()))
}

fn save<T: LabeledResource>(txn: &WriteTransaction, tenant: &str, resource: &T) -> StateResult<()> {
    debug_assert!(!resource.labels().contains_key(SCENARIOS_LABEL));
    let value = encode(resource)?;
    let mut table = txn.open_table(resource_table(T::TYPE)).map_err(map_err!(Table))?;
    table
        .insert(object_key(tenant, resource.id()).as_str(), value.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}

fn resource_labels(
    txn: &WriteTransaction,
    tenant: &str,
    rt: ResourceType,
    id: &str,
) -> StateResult<Labels> {
    Ok(match rt {
        ResourceType::Application => load::<Application>(txn, tenant, id)?.labels,
        ResourceType::Runtime => load::<Runtime>(txn, tenant, id)?.labels,
    })
}

fn read_formation(txn: &WriteTransaction, tenant: &str, name: &str) -> StateResult<Option<Formation>> {
    let table = txn.open_table(FORMATIONS).map_err(map_err!(Table))?;
    get_json(&table, &object_key(tenant, name))
}

fn formations_in(
    txn: &WriteTransaction,
    tenant: &str,
    rt: ResourceType,
    id: &str,
) -> StateResult<Vec<String>> {
    let reverse = txn.open_table(RESOURCE_FORMATIONS).map_err(map_err!(Table))?;
    formations_of(&reverse, tenant, rt, id)
}

fn assign_in(
    txn: &WriteTransaction,
    tenant: &str,
    formation: &str,
    rt: ResourceType,
    id: &str,
) -> StateResult<bool> {
    let target = read_formation(txn, tenant, formation)?
        .ok_or_else(|| StateError::NotFound("formation".to_string()))?;
    let labels = resource_labels(txn, tenant, rt, id)?;
    ensure_permitted(txn, &target, rt, &labels)?;

    let key = membership_key(tenant, formation, rt, id);
    let membership = Membership {
        tenant: tenant.to_string(),
        formation: formation.to_string(),
        resource_type: rt,
        resource_id: id.to_string(),
        assigned_at: epoch_secs(),
    };
    let value = encode(&membership)?;
    {
        let mut memberships = txn.open_table(MEMBERSHIPS).map_err(map_err!(Table))?;
        if memberships.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
            return Ok(false);
        }
        memberships
            .insert(key.as_str(), value.as_slice())
            .map_err(map_err!(Write))?;
    }
    let mut reverse = txn.open_table(RESOURCE_FORMATIONS).map_err(map_err!(Table))?;
    reverse
        .insert(reverse_key(tenant, rt, id, formation).as_str(), value.as_slice())
        .map_err(map_err!(Write))?;
    debug!(%tenant, %formation, resource = %rt, %id, "resource assigned");
    Ok(true)
}

/// Reject a resource whose type label the formation's template does not allow.
fn ensure_permitted(
    txn: &WriteTransaction,
    formation: &Formation,
    rt: ResourceType,
    labels: &Labels,
) -> StateResult<()> {
    let Some(template_name) = &formation.template_name else {
        return Ok(());
    };
    let templates = txn.open_table(FORMATION_TEMPLATES).map_err(map_err!(Table))?;
    let template: Option<FormationTemplate> = get_json(&templates, template_name)?;
    let Some(template) = template else {
        return Ok(());
    };
    let type_label = labels.get(rt.type_label());
    if template.permits(rt, type_label) {
        return Ok(());
    }
    let shown = type_label
        .and_then(LabelValue::as_scalar)
        .unwrap_or("<none>");
    Err(StateError::NotFound(format!(
        "{rt} with {}={shown} in formation template {template_name}",
        rt.type_label()
    )))
}

/// Re-check every formation `id` belongs to after its type label changed.
fn ensure_still_permitted(
    txn: &WriteTransaction,
    tenant: &str,
    rt: ResourceType,
    id: &str,
    labels: &Labels,
) -> StateResult<()> {
    for name in formations_in(txn, tenant, rt, id)? {
        if let Some(formation) = read_formation(txn, tenant, &name)? {
            ensure_permitted(txn, &formation, rt, labels)?;
        }
    }
    Ok(())
}

fn unassign_in(
    txn: &WriteTransaction,
    tenant: &str,
    formation: &str,
    rt: ResourceType,
    id: &str,
) -> StateResult<bool> {
    let removed;
    {
        let mut memberships = txn.open_table(MEMBERSHIPS).map_err(map_err!(Table))?;
        removed = memberships
            .remove(membership_key(tenant, formation, rt, id).as_str())
            .map_err(map_err!(Write))?
            .is_some();
    }
    {
        let mut reverse = txn.open_table(RESOURCE_FORMATIONS).map_err(map_err!(Table))?;
        reverse
            .remove(reverse_key(tenant, rt, id, formation).as_str())
            .map_err(map_err!(Write))?;
    }
    debug!(%tenant, %formation, resource = %rt, %id, removed, "resource unassigned");
    Ok(removed)
}

/// Capture the formations of a resource and the runtimes sharing them.
fn snapshot_in(
    txn: &WriteTransaction,
    tenant: &str,
    rt: ResourceType,
    id: &str,
    name: &str,
) -> StateResult<MembershipSnapshot> {
    let formations = formations_in(txn, tenant, rt, id)?;

    let mut runtime_ids = BTreeSet::new();
    {
        let memberships = txn.open_table(MEMBERSHIPS).map_err(map_err!(Table))?;
        for formation in &formations {
            let prefix = membership_prefix(tenant, formation, Some(ResourceType::Runtime));
            let rows: Vec<Membership> = scan_json(&memberships, &prefix)?;
            runtime_ids.extend(
                rows.into_iter()
                    .map(|m| m.resource_id)
                    .filter(|rid| !(rt == ResourceType::Runtime && rid == id)),
            );
        }
    }

    let mut runtimes = BTreeSet::new();
    {
        let table = txn.open_table(RUNTIMES).map_err(map_err!(Table))?;
        for rid in &runtime_ids {
            let runtime: Option<Runtime> = get_json(&table, &object_key(tenant, rid))?;
            if let Some(runtime) = runtime {
                runtimes.insert(runtime.name);
            }
        }
    }

    Ok(MembershipSnapshot {
        resource_type: rt,
        resource_id: id.to_string(),
        resource_name: name.to_string(),
        formations,
        runtimes: runtimes.into_iter().collect(),
    })
}

fn next_ordinal(txn: &WriteTransaction) -> StateResult<u64> {
    let mut table = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
    let next = table
        .get(ORDINAL_SEQ)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value())
        .unwrap_or(0)
        + 1;
    table.insert(ORDINAL_SEQ, next).map_err(map_err!(Write))?;
    Ok(next)
}

// ── Table helpers ─────────────────────────────────────────────────

fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

fn get_json<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> StateResult<Option<T>> {
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => {
            let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Decode every value whose key starts with `prefix`, in key order.
fn scan_json<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    prefix: &str,
) -> StateResult<Vec<T>> {
    let mut results = Vec::new();
    for entry in table.range(prefix..).map_err(map_err!(Read))? {
        let (key, value) = entry.map_err(map_err!(Read))?;
        if !key.value().starts_with(prefix) {
            break;
        }
        results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
    }
    Ok(results)
}

fn formations_of(
    reverse: &impl ReadableTable<&'static str, &'static [u8]>,
    tenant: &str,
    rt: ResourceType,
    id: &str,
) -> StateResult<Vec<String>> {
    let rows: Vec<Membership> = scan_json(reverse, &reverse_prefix(tenant, rt, Some(id)))?;
    Ok(rows.into_iter().map(|m| m.formation).collect())
}

fn validate_segment(value: &str, what: &str) -> StateResult<()> {
    if value.trim().is_empty() {
        return Err(StateError::Validation(format!("{what} must not be empty")));
    }
    if value.contains('/') {
        return Err(StateError::Validation(format!("{what} must not contain '/'")));
    }
    Ok(())
}

fn validate_register_input(name: &str, labels: &Labels) -> StateResult<()> {
    if name.trim().is_empty() {
        return Err(StateError::Validation("name must not be empty".to_string()));
    }
    if labels.contains_key(SCENARIOS_LABEL) {
        return Err(StateError::Validation(
            "scenarios label is managed through formation assignment".to_string(),
        ));
    }
    Ok(())
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
