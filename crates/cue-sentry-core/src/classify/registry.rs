use super::ensemble::{CategoryPolicy, Ensemble, LoadedModel};
use crate::error::Result;
use crate::storage::models::{ModelStatus, NlpModel};
use crate::storage::Store;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Holds the ensemble workers score with. Workers take a snapshot per job, so
/// a refresh never changes the model set underneath a file mid-processing.
pub struct ModelRegistry {
    current: RwLock<Arc<Ensemble>>,
    global_threshold: f64,
}

impl ModelRegistry {
    pub fn new(global_threshold: f64) -> Self {
        Self::from_ensemble(Ensemble::empty(global_threshold))
    }

    pub fn from_ensemble(ensemble: Ensemble) -> Self {
        let global_threshold = ensemble.global_threshold();
        Self {
            current: RwLock::new(Arc::new(ensemble)),
            global_threshold,
        }
    }

    pub fn current(&self) -> Arc<Ensemble> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn replace(&self, ensemble: Ensemble) -> Arc<Ensemble> {
        let ensemble = Arc::new(ensemble);
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::clone(&ensemble);
        ensemble
    }

    /// Rebuild the ensemble from the active categories and models in `store`.
    ///
    /// Every model that is not already `ready` moves through `loading` to
    /// `ready`, or to `error` with the load failure recorded on its row. A
    /// model that fails to load is left out of the ensemble.
    pub fn refresh(&self, store: &dyn Store) -> Result<Arc<Ensemble>> {
        let mut policies = Vec::new();
        for category in store.active_categories()? {
            match category.severity_mapping.validate() {
                Ok(()) => policies.push(CategoryPolicy {
                    name: category.name,
                    mapping: category.severity_mapping,
                }),
                Err(e) => warn!("Category '{}' disabled: {}", category.name, e),
            }
        }

        let mut loaded = Vec::new();
        for model in store.active_models()? {
            let was_ready = model.status == ModelStatus::Ready;
            if !was_ready {
                store.set_model_status(model.id, ModelStatus::Loading, None)?;
            }
            match load_model(&model) {
                Ok(m) => {
                    if !was_ready {
                        store.set_model_status(model.id, ModelStatus::Ready, None)?;
                        info!("Model {} ({}) ready", model.name, model.identifier);
                    }
                    loaded.push(m);
                }
                Err(e) => {
                    warn!("Model {} failed to load: {}", model.identifier, e);
                    store.set_model_status(model.id, ModelStatus::Error, Some(&e.to_string()))?;
                }
            }
        }

        let ensemble = Ensemble::new(loaded, policies, self.global_threshold)?;
        let previous = self.current();
        if previous.version() != ensemble.version() {
            info!(
                "Ensemble {} -> {} ({} models)",
                previous.version(),
                ensemble.version(),
                ensemble.model_count()
            );
        } else {
            debug!("Ensemble {} unchanged", ensemble.version());
        }
        Ok(self.replace(ensemble))
    }
}

fn load_model(model: &NlpModel) -> Result<LoadedModel> {
    let classifier = model.config.build(&model.categories)?;
    let revision = serde_json::to_string(&model.config)?;
    Ok(LoadedModel::new(
        model.id,
        &model.identifier,
        model.weight,
        model.categories.iter().cloned(),
        classifier,
    )?
    .with_revision(revision))
}
