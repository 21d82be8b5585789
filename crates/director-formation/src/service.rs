//! Director — the operation surface over the state store.
//!
//! Wires configuration, the deletion guard, and the visibility resolver
//! around a [`StateStore`]. Every operation is tenant-scoped; the API layer
//! maps each route onto exactly one method here.

use std::sync::Arc;

use director_core::{ConsumerType, DirectorConfig, LabelValue, ResourceType};
use director_state::*;
use tracing::{info, warn};

use crate::guard::{DeletionKind, deletion_guard};
use crate::page::{Page, PageRequest, paginate};
use crate::visibility::VisibilityResolver;

#[derive(Clone)]
pub struct Director {
    store: StateStore,
    config: Arc<DirectorConfig>,
    resolver: VisibilityResolver,
}

impl Director {
    pub fn new(store: StateStore, config: DirectorConfig) -> Self {
        let resolver = VisibilityResolver::new(&config);
        Self {
            store,
            config: Arc::new(config),
            resolver,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn config(&self) -> &DirectorConfig {
        &self.config
    }

    // ── Formation templates ───────────────────────────────────────

    pub fn put_formation_template(
        &self,
        tenant: &str,
        template: &FormationTemplate,
    ) -> StateResult<FormationTemplate> {
        self.store.put_formation_template(tenant, template)
    }

    pub fn formation_templates(&self, tenant: &str) -> StateResult<Vec<FormationTemplate>> {
        self.store.list_formation_templates(tenant)
    }

    // ── Formations ────────────────────────────────────────────────

    pub fn create_formation(
        &self,
        tenant: &str,
        name: &str,
        template_name: Option<&str>,
    ) -> StateResult<Formation> {
        self.store.create_formation(tenant, name, template_name)
    }

    pub fn delete_formation(&self, tenant: &str, name: &str) -> StateResult<Formation> {
        self.store.delete_formation(tenant, name)
    }

    pub fn formation(&self, tenant: &str, name: &str) -> StateResult<Formation> {
        self.store
            .get_formation(tenant, name)?
            .ok_or_else(|| StateError::NotFound("formation".to_string()))
    }

    pub fn formations(&self, tenant: &str) -> StateResult<Vec<Formation>> {
        self.store.list_formations(tenant)
    }

    /// Assign a resource and return the formation.
    pub fn assign_formation(
        &self,
        tenant: &str,
        formation: &str,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> StateResult<Formation> {
        let added = self
            .store
            .assign_resource(tenant, formation, resource_type, resource_id)?;
        if added {
            info!(%tenant, %formation, resource = %resource_type, id = %resource_id, "assigned to formation");
        }
        self.formation(tenant, formation)
    }

    /// Unassign a resource. Idempotent; the formation is returned if it exists.
    pub fn unassign_formation(
        &self,
        tenant: &str,
        formation: &str,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> StateResult<Option<Formation>> {
        let removed = self
            .store
            .unassign_resource(tenant, formation, resource_type, resource_id)?;
        if removed {
            info!(%tenant, %formation, resource = %resource_type, id = %resource_id, "unassigned from formation");
        }
        self.store.get_formation(tenant, formation)
    }

    pub fn formation_members(
        &self,
        tenant: &str,
        formation: &str,
        resource_type: Option<ResourceType>,
    ) -> StateResult<Vec<String>> {
        self.store
            .list_members_for_formation(tenant, formation, resource_type)
    }

    // ── Applications ──────────────────────────────────────────────

    pub fn register_application(
        &self,
        tenant: &str,
        input: &ApplicationRegisterInput,
    ) -> StateResult<Application> {
        let normalizer = self.config.normalizer(tenant);
        self.store.register_application(tenant, input, &normalizer)
    }

    pub fn application(&self, tenant: &str, id: &str) -> StateResult<Application> {
        self.store
            .get_application(tenant, id)?
            .ok_or_else(|| StateError::NotFound("application".to_string()))
    }

    pub fn applications(&self, tenant: &str, page: &PageRequest) -> StateResult<Page<Application>> {
        let apps = self.store.list_applications(tenant)?;
        paginate(apps, page, self.config.pagination.max_page_size)
    }

    /// Update an application. Only integration systems may set `local_tenant_id`.
    pub fn update_application(
        &self,
        tenant: &str,
        id: &str,
        input: &ApplicationUpdateInput,
        consumer: ConsumerType,
    ) -> StateResult<Application> {
        if input.local_tenant_id.is_some() && consumer != ConsumerType::IntegrationSystem {
            warn!(%tenant, %id, ?consumer, "local tenant id update refused");
            return Err(StateError::Forbidden(
                "local tenant id can only be set by integration systems".to_string(),
            ));
        }
        self.store.update_application(tenant, id, input)
    }

    pub fn set_application_label(
        &self,
        tenant: &str,
        id: &str,
        key: &str,
        value: &LabelValue,
    ) -> StateResult<Application> {
        self.store.set_application_label(tenant, id, key, value)
    }

    pub fn delete_application_label(
        &self,
        tenant: &str,
        id: &str,
        key: &str,
    ) -> StateResult<Application> {
        self.store.delete_application_label(tenant, id, key)
    }

    pub fn unregister_application(&self, tenant: &str, id: &str) -> StateResult<Application> {
        self.store
            .unregister_application(tenant, id, deletion_guard(DeletionKind::Unregister))
    }

    pub fn unpair_application(&self, tenant: &str, id: &str) -> StateResult<Application> {
        self.store
            .unpair_application(tenant, id, deletion_guard(DeletionKind::Unpair))
    }

    pub fn merge_applications(
        &self,
        tenant: &str,
        destination_id: &str,
        source_id: &str,
    ) -> StateResult<Application> {
        self.store.merge_applications(
            tenant,
            destination_id,
            source_id,
            &self.config.merge.protected_label_keys,
        )
    }

    // ── Runtimes ──────────────────────────────────────────────────

    pub fn register_runtime(
        &self,
        tenant: &str,
        input: &RuntimeRegisterInput,
    ) -> StateResult<Runtime> {
        self.store.register_runtime(tenant, input)
    }

    pub fn runtime(&self, tenant: &str, id: &str) -> StateResult<Runtime> {
        self.store
            .get_runtime(tenant, id)?
            .ok_or_else(|| StateError::NotFound("runtime".to_string()))
    }

    pub fn runtimes(&self, tenant: &str) -> StateResult<Vec<Runtime>> {
        self.store.list_runtimes(tenant)
    }

    pub fn set_runtime_label(
        &self,
        tenant: &str,
        id: &str,
        key: &str,
        value: &LabelValue,
    ) -> StateResult<Runtime> {
        self.store.set_runtime_label(tenant, id, key, value)
    }

    pub fn delete_runtime_label(&self, tenant: &str, id: &str, key: &str) -> StateResult<Runtime> {
        self.store.delete_runtime_label(tenant, id, key)
    }

    pub fn unregister_runtime(&self, tenant: &str, id: &str) -> StateResult<Runtime> {
        self.store
            .unregister_runtime(tenant, id, deletion_guard(DeletionKind::Unregister))
    }

    /// Applications visible to a runtime, one page at a time.
    pub fn applications_for_runtime(
        &self,
        tenant: &str,
        runtime_id: &str,
        page: &PageRequest,
    ) -> StateResult<Page<Application>> {
        let (runtime, apps) = self
            .store
            .runtime_with_applications(tenant, runtime_id)?
            .ok_or_else(|| StateError::NotFound("runtime".to_string()))?;
        let normalizer = self.config.normalizer(tenant);
        let visible = self.resolver.resolve(&runtime, apps, &normalizer);
        paginate(visible, page, self.config.pagination.max_page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use director_core::SCENARIOS_LABEL;

    const TENANT: &str = "tenant-a";

    fn director() -> Director {
        let store = StateStore::open_in_memory().unwrap();
        Director::new(store, DirectorConfig::default())
    }

    fn register_app(d: &Director, name: &str) -> Application {
        d.register_application(TENANT, &ApplicationRegisterInput {
            name: name.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    fn register_runtime(d: &Director, name: &str, labels: &[(&str, &str)]) -> Runtime {
        d.register_runtime(TENANT, &RuntimeRegisterInput {
            name: name.to_string(),
            description: None,
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), LabelValue::from(*v)))
                .collect(),
        })
        .unwrap()
    }

    #[test]
    fn unregister_in_formation_is_blocked_then_allowed() {
        let d = director();
        d.create_formation(TENANT, "test-scenario", None).unwrap();
        let app = register_app(&d, "app-name");
        d.assign_formation(TENANT, "test-scenario", ResourceType::Application, &app.id)
            .unwrap();

        let err = d.unregister_application(TENANT, &app.id).unwrap_err();
        assert!(err
            .to_string()
            .contains("System app-name is part of the following formations : test-scenario"));
        assert!(d.application(TENANT, &app.id).is_ok());

        d.unassign_formation(TENANT, "test-scenario", ResourceType::Application, &app.id)
            .unwrap();
        d.unregister_application(TENANT, &app.id).unwrap();
        assert!(matches!(
            d.application(TENANT, &app.id),
            Err(StateError::NotFound(_))
        ));
    }

    #[test]
    fn unpair_blocked_by_runtime_in_shared_formation() {
        let d = director();
        d.create_formation(TENANT, "f1", None).unwrap();
        let app = register_app(&d, "app-name");
        let rt = register_runtime(&d, "rt-name", &[]);
        d.assign_formation(TENANT, "f1", ResourceType::Application, &app.id).unwrap();
        d.assign_formation(TENANT, "f1", ResourceType::Runtime, &rt.id).unwrap();

        let msg = d.unpair_application(TENANT, &app.id).unwrap_err().to_string();
        assert!(msg.contains("following formations first: f1"));
        assert!(msg.contains("following runtimes, too: rt-name"));
        assert_eq!(
            d.application(TENANT, &app.id).unwrap().status,
            ApplicationStatus::Initial
        );

        d.unassign_formation(TENANT, "f1", ResourceType::Runtime, &rt.id).unwrap();
        let unpaired = d.unpair_application(TENANT, &app.id).unwrap();
        assert_eq!(unpaired.status, ApplicationStatus::Unpaired);
    }

    #[test]
    fn local_tenant_id_requires_integration_system() {
        let d = director();
        let app = register_app(&d, "app");
        let input = ApplicationUpdateInput {
            local_tenant_id: Some("local-1".to_string()),
            ..Default::default()
        };

        let err = d
            .update_application(TENANT, &app.id, &input, ConsumerType::User)
            .unwrap_err();
        assert!(matches!(err, StateError::Forbidden(_)));

        let updated = d
            .update_application(TENANT, &app.id, &input, ConsumerType::IntegrationSystem)
            .unwrap();
        assert_eq!(updated.local_tenant_id.as_deref(), Some("local-1"));
    }

    #[test]
    fn applications_for_runtime_normalization() {
        let d = director();
        d.create_formation(TENANT, "f1", None).unwrap();
        let app = register_app(&d, "Commerce");
        d.assign_formation(TENANT, "f1", ResourceType::Application, &app.id).unwrap();

        let raw_rt = register_runtime(&d, "raw", &[("isNormalized", "false")]);
        let plain_rt = register_runtime(&d, "plain", &[]);
        for rt in [&raw_rt, &plain_rt] {
            d.set_runtime_label(TENANT, &rt.id, SCENARIOS_LABEL, &LabelValue::List(vec!["f1".to_string()]))
                .unwrap();
        }

        let raw = d
            .applications_for_runtime(TENANT, &raw_rt.id, &PageRequest::default())
            .unwrap();
        assert_eq!(raw.data[0].name, "Commerce");

        let normalized = d
            .applications_for_runtime(TENANT, &plain_rt.id, &PageRequest::default())
            .unwrap();
        assert_eq!(normalized.data[0].name, "mp-commerce");
        assert_eq!(normalized.total_count, 1);
    }

    #[test]
    fn applications_for_unknown_runtime() {
        let d = director();
        assert!(matches!(
            d.applications_for_runtime(TENANT, "missing", &PageRequest::default()),
            Err(StateError::NotFound(_))
        ));
    }

    #[test]
    fn applications_pagination_covers_everything() {
        let d = director();
        let n = 7;
        let k = 3;
        let registered: Vec<String> = (0..n).map(|i| register_app(&d, &format!("app-{i}")).id).collect();

        let mut request = PageRequest::first(k);
        let mut collected = Vec::new();
        let mut pages = 0;
        loop {
            let page = d.applications(TENANT, &request).unwrap();
            assert_eq!(page.total_count, n);
            collected.extend(page.data.into_iter().map(|a| a.id));
            pages += 1;
            if !page.page_info.has_next_page {
                break;
            }
            request = request.after(page.page_info.end_cursor);
        }
        assert_eq!(pages, n.div_ceil(k));
        assert_eq!(collected, registered);
    }

    #[test]
    fn merge_uses_configured_protected_keys() {
        let store = StateStore::open_in_memory().unwrap();
        let mut config = DirectorConfig::default();
        config.merge.protected_label_keys = vec!["managed".to_string()];
        let d = Director::new(store, config);

        let dest = register_app(&d, "dest");
        let src = register_app(&d, "src");
        d.set_application_label(TENANT, &src.id, "managed", &LabelValue::from("true"))
            .unwrap();

        assert!(matches!(
            d.merge_applications(TENANT, &dest.id, &src.id),
            Err(StateError::Validation(_))
        ));
        d.delete_application_label(TENANT, &src.id, "managed").unwrap();
        d.merge_applications(TENANT, &dest.id, &src.id).unwrap();
        assert!(d.application(TENANT, &src.id).is_err());
    }

    #[test]
    fn tenant_normalization_prefix_override() {
        let store = StateStore::open_in_memory().unwrap();
        let mut config = DirectorConfig::default();
        config.tenants.insert(
            TENANT.to_string(),
            director_core::config::TenantConfig {
                normalization_prefix: Some("acme-".to_string()),
            },
        );
        let d = Director::new(store, config);

        d.create_formation(TENANT, "f1", None).unwrap();
        let app = register_app(&d, "Shop");
        let rt = register_runtime(&d, "rt", &[]);
        d.assign_formation(TENANT, "f1", ResourceType::Application, &app.id).unwrap();
        d.assign_formation(TENANT, "f1", ResourceType::Runtime, &rt.id).unwrap();

        let page = d
            .applications_for_runtime(TENANT, &rt.id, &PageRequest::default())
            .unwrap();
        assert_eq!(page.data[0].name, "acme-shop");
    }
}
