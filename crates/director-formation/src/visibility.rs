//! Visibility resolver — which applications a runtime can see.
//!
//! An application is visible to a runtime when they share at least one
//! formation and the application matches no hide selector. Visible names are
//! normalized unless the runtime opts out with `isNormalized=false`.

use std::collections::{BTreeSet, HashMap};

use director_core::config::DirectorConfig;
use director_core::{IS_NORMALIZED_LABEL, LabelValue, Normalizer, SCENARIOS_LABEL};
use director_state::{Application, Labels, Runtime};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct VisibilityResolver {
    hide_selectors: HashMap<String, Vec<String>>,
    default_normalized: bool,
}

impl VisibilityResolver {
    pub fn new(config: &DirectorConfig) -> Self {
        Self {
            hide_selectors: config.visibility.hide_selectors.clone(),
            default_normalized: config.normalization.default_normalized,
        }
    }

    /// Whether the runtime wants normalized application names.
    pub fn wants_normalized(&self, runtime: &Runtime) -> bool {
        match runtime.labels.get(IS_NORMALIZED_LABEL) {
            Some(value) => !value
                .as_scalar()
                .is_some_and(|v| v.eq_ignore_ascii_case("false")),
            None => self.default_normalized,
        }
    }

    pub fn is_hidden(&self, app: &Application) -> bool {
        self.hide_selectors.iter().any(|(key, values)| {
            app.labels
                .get(key)
                .is_some_and(|label| values.iter().any(|v| label.contains(v)))
        })
    }

    /// Filter `applications` (in their given order) down to what `runtime` sees.
    ///
    /// Both sides must carry their `scenarios` label as read from the store.
    pub fn resolve(
        &self,
        runtime: &Runtime,
        applications: Vec<Application>,
        normalizer: &Normalizer,
    ) -> Vec<Application> {
        let runtime_formations = formations(&runtime.labels);
        if runtime_formations.is_empty() {
            debug!(runtime = %runtime.id, "runtime is in no formation");
            return Vec::new();
        }
        let normalize = self.wants_normalized(runtime);

        let visible: Vec<Application> = applications
            .into_iter()
            .filter(|app| {
                !formations(&app.labels).is_disjoint(&runtime_formations) && !self.is_hidden(app)
            })
            .map(|mut app| {
                if normalize {
                    app.name = normalizer.normalize(&app.name);
                }
                app
            })
            .collect();

        debug!(
            runtime = %runtime.id,
            formations = runtime_formations.len(),
            normalize,
            visible = visible.len(),
            "resolved runtime applications"
        );
        visible
    }
}

fn formations(labels: &Labels) -> BTreeSet<String> {
    labels
        .get(SCENARIOS_LABEL)
        .map(LabelValue::to_list)
        .unwrap_or_default()
        .into_iter()
        .collect()
}
