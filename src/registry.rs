//! Model Lifecycle Manager
//!
//! An explicit registry owning every classifier's lifecycle. Weights are
//! loaded on first use and the ready handle is shared for the rest of the
//! process. Failed loads are not cached; the next request tries again.

use dashmap::DashMap;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{error, info};

use crate::classifier::{Capability, Classifier, ClassifierId, ClassifierSpec, ModelLoader};
use crate::config::ModelConfig;
use crate::ensemble::EnsembleArbitrator;
use crate::error::{EngineError, Result};
use crate::image_input::DecodedImage;
use crate::metrics::{Timer, MODEL_LOADS, MODEL_LOAD_FAILURES, MODEL_LOAD_LATENCY};
use crate::onnx::OnnxModelLoader;
use crate::prediction::PredictionResult;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ModelState {
    Unloaded,
    Loading,
    Ready,
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub model: ClassifierId,
    #[serde(flatten)]
    pub state: ModelState,
    pub capability: Option<Capability>,
    pub weights: PathBuf,
}

type Slot = Arc<OnceCell<Arc<Classifier>>>;

struct Inner {
    loader: Arc<dyn ModelLoader>,
    specs: Vec<(ClassifierSpec, PathBuf)>,
    slots: DashMap<ClassifierId, Slot>,
    states: DashMap<ClassifierId, ModelState>,
    ensemble_ready: AtomicBool,
}

/// Cheap to clone; clones share the same cache
#[derive(Clone)]
pub struct ModelRegistry {
    inner: Arc<Inner>,
}

impl ModelRegistry {
    pub fn new(config: &ModelConfig, loader: Arc<dyn ModelLoader>) -> Self {
        let specs = ClassifierId::ALL
            .iter()
            .map(|&id| (ClassifierSpec::for_id(id), config.weights_path(id).clone()))
            .collect();

        let registry = Self {
            inner: Arc::new(Inner {
                loader,
                specs,
                slots: DashMap::new(),
                states: DashMap::new(),
                ensemble_ready: AtomicBool::new(false),
            }),
        };
        registry.reset();
        registry
    }

    /// Registry backed by ONNX Runtime sessions
    pub fn with_onnx(config: &ModelConfig) -> Self {
        Self::new(config, Arc::new(OnnxModelLoader::new(config.clone())))
    }

    fn spec(&self, id: ClassifierId) -> Result<&(ClassifierSpec, PathBuf)> {
        self.inner
            .specs
            .iter()
            .find(|(spec, _)| spec.id == id)
            .ok_or_else(|| EngineError::Internal(format!("no spec registered for {}", id)))
    }

    fn slot(&self, id: ClassifierId) -> Slot {
        self.inner
            .slots
            .entry(id)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// Return the ready classifier, loading it on first use.
    /// Concurrent first callers share one load.
    pub async fn get_or_load(&self, id: ClassifierId) -> Result<Arc<Classifier>> {
        let slot = self.slot(id);
        if let Some(ready) = slot.get() {
            return Ok(ready.clone());
        }

        let classifier = slot
            .get_or_try_init(|| self.load(id))
            .await?
            .clone();

        if ClassifierId::ENSEMBLE.contains(&id) {
            self.check_ensemble_ready();
        }
        Ok(classifier)
    }

    async fn load(&self, id: ClassifierId) -> Result<Arc<Classifier>> {
        let (spec, weights) = self.spec(id)?.clone();
        let loader = self.inner.loader.clone();

        self.inner.states.insert(id, ModelState::Loading);
        info!(model = %id, weights = ?weights, "Loading model");
        let timer = Timer::new();

        let loaded = tokio::task::spawn_blocking(move || {
            loader
                .load(&spec, &weights)
                .map(|model| Classifier::new(spec, model))
        })
        .await
        .map_err(|e| EngineError::Internal(format!("load task failed: {}", e)))
        .and_then(|r| r);

        timer.observe_labeled(&MODEL_LOAD_LATENCY, id.as_str());

        match loaded {
            Ok(classifier) => {
                MODEL_LOADS.with_label_values(&[id.as_str()]).inc();
                self.inner.states.insert(id, ModelState::Ready);
                info!(
                    model = %id,
                    labels = classifier.labels().len(),
                    capability = ?classifier.capability(),
                    latency_ms = timer.elapsed_ms(),
                    "Model loaded"
                );
                Ok(Arc::new(classifier))
            }
            Err(e) => {
                MODEL_LOAD_FAILURES.with_label_values(&[id.as_str()]).inc();
                let reason = match &e {
                    EngineError::ModelUnavailable { reason, .. } => reason.clone(),
                    other => other.to_string(),
                };
                self.inner.states.insert(
                    id,
                    ModelState::Failed {
                        reason: reason.clone(),
                    },
                );
                error!(model = %id, error = %reason, "Model load failed");
                Err(EngineError::ModelUnavailable {
                    model: id.to_string(),
                    reason,
                })
            }
        }
    }

    fn check_ensemble_ready(&self) {
        let all_ready = ClassifierId::ENSEMBLE
            .iter()
            .all(|id| self.slot(*id).initialized());
        if all_ready && !self.inner.ensemble_ready.swap(true, Ordering::SeqCst) {
            info!("All ensemble members loaded, ensemble arbitrator ready");
        }
    }

    pub fn is_ensemble_ready(&self) -> bool {
        self.inner.ensemble_ready.load(Ordering::SeqCst)
    }

    /// Load (if needed) and run one classifier. Load failures become a failed result.
    pub async fn predict(&self, id: ClassifierId, image: Arc<DecodedImage>) -> PredictionResult {
        let classifier = match self.get_or_load(id).await {
            Ok(classifier) => classifier,
            Err(e) => return PredictionResult::failure(id, e),
        };

        match tokio::task::spawn_blocking(move || classifier.predict(&image)).await {
            Ok(result) => result,
            Err(e) => PredictionResult::failure(id, format!("inference task failed: {}", e)),
        }
    }

    /// Warm the three ensemble members concurrently
    pub async fn preload_ensemble(&self) -> Vec<(ClassifierId, Result<()>)> {
        let loads = ClassifierId::ENSEMBLE.iter().map(|&id| async move {
            (id, self.get_or_load(id).await.map(|_| ()))
        });
        futures::future::join_all(loads).await
    }

    /// Lifecycle state of every classifier, in priority order
    pub fn status(&self) -> Vec<ModelStatus> {
        self.inner
            .specs
            .iter()
            .map(|(spec, weights)| {
                let state = self
                    .inner
                    .states
                    .get(&spec.id)
                    .map(|s| s.clone())
                    .unwrap_or(ModelState::Unloaded);
                let capability = self
                    .inner
                    .slots
                    .get(&spec.id)
                    .and_then(|slot| slot.get().map(|c| c.capability()));
                ModelStatus {
                    model: spec.id,
                    state,
                    capability,
                    weights: weights.clone(),
                }
            })
            .collect()
    }

    /// Drop every cached handle; the next request reloads
    pub fn reset(&self) {
        for (spec, _) in &self.inner.specs {
            self.inner.slots.insert(spec.id, Arc::new(OnceCell::new()));
            self.inner.states.insert(spec.id, ModelState::Unloaded);
        }
        self.inner.ensemble_ready.store(false, Ordering::SeqCst);
    }

    /// Arbitrator over this registry. It can be built before any member has
    /// loaded: members load lazily on its first prediction, and
    /// [`is_ensemble_ready`](Self::is_ensemble_ready) reports when all three are in.
    pub fn ensemble(&self) -> EnsembleArbitrator {
        EnsembleArbitrator::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{LoadedModel, ProbabilisticModel};
    use crate::preprocess::ModelInput;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;

    struct Uniform(usize);

    impl ProbabilisticModel for Uniform {
        fn scores(&self, _input: &ModelInput) -> Result<Vec<f32>> {
            Ok(vec![1.0 / self.0 as f32; self.0])
        }
    }

    #[derive(Default)]
    struct CountingLoader {
        loads: AtomicUsize,
        fail_first: usize,
    }

    impl ModelLoader for CountingLoader {
        fn load(&self, spec: &ClassifierSpec, _weights: &Path) -> Result<LoadedModel> {
            let attempt = self.loads.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_first {
                return Err(EngineError::ModelUnavailable {
                    model: spec.id.to_string(),
                    reason: "weights corrupt".into(),
                });
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
            Ok(LoadedModel::probabilistic(Uniform(spec.labels.len())))
        }
    }

    fn registry(loader: Arc<CountingLoader>) -> ModelRegistry {
        ModelRegistry::new(&ModelConfig::with_model_dir("models"), loader)
    }

    #[tokio::test]
    async fn test_lazy_load_once() {
        let loader = Arc::new(CountingLoader::default());
        let registry = registry(loader.clone());
        assert_eq!(loader.loads.load(Ordering::SeqCst), 0);

        let first = registry.get_or_load(ClassifierId::Maize).await.unwrap();
        let second = registry.get_or_load(ClassifierId::Maize).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_use_shares_load() {
        let loader = Arc::new(CountingLoader::default());
        let registry = registry(loader.clone());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.get_or_load(ClassifierId::Rice).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let loader = Arc::new(CountingLoader {
            fail_first: 1,
            ..Default::default()
        });
        let registry = registry(loader.clone());

        let err = registry.get_or_load(ClassifierId::PlantDoc).await.unwrap_err();
        assert!(matches!(err, EngineError::ModelUnavailable { .. }));
        assert_eq!(
            registry.status()[0].state,
            ModelState::Failed {
                reason: "weights corrupt".into()
            }
        );

        assert!(registry.get_or_load(ClassifierId::PlantDoc).await.is_ok());
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
        assert_eq!(registry.status()[0].state, ModelState::Ready);
    }

    #[tokio::test]
    async fn test_status_preload_and_reset() {
        let loader = Arc::new(CountingLoader::default());
        let registry = registry(loader.clone());
        assert!(registry
            .status()
            .iter()
            .all(|s| s.state == ModelState::Unloaded && s.capability.is_none()));

        let results = registry.preload_ensemble().await;
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert!(registry.is_ensemble_ready());

        let status = registry.status();
        assert_eq!(status.len(), 4);
        assert_eq!(status[1].capability, Some(Capability::Probabilistic));
        assert_eq!(status[3].model, ClassifierId::LegacyPest);
        assert_eq!(status[3].state, ModelState::Unloaded);

        registry.reset();
        assert!(!registry.is_ensemble_ready());
        assert_eq!(registry.status()[0].state, ModelState::Unloaded);
        registry.get_or_load(ClassifierId::PlantDoc).await.unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 4);
    }
}
