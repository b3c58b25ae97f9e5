pub mod reference;

use crate::graph::{Graph, SubgraphView};
use crate::handles::TensorHandleFactoryRegistry;
use crate::network::ModelOptions;
use crate::types::{BackendId, DataType, FactoryId, LayerId};
use indexmap::{IndexMap, IndexSet};
use std::fmt;
use std::sync::Arc;

/// Answer to an is-layer-supported query.
#[derive(Debug, Clone)]
pub enum LayerSupport {
    Supported,
    Unsupported(String),
    /// Unsupported specifically because the hardware revision cannot run
    /// float16; the assignment stage may repair this with conversions.
    Fp16NotSupported(String),
}

impl LayerSupport {
    pub fn is_supported(&self) -> bool {
        matches!(self, LayerSupport::Supported)
    }

    pub fn reason(&self) -> &str {
        match self {
            LayerSupport::Supported => "",
            LayerSupport::Unsupported(reason) | LayerSupport::Fp16NotSupported(reason) => reason,
        }
    }
}

/// An execution target. The core only consults a backend for support
/// queries, handle-factory preferences and subgraph rewrites; workload
/// creation lives outside this crate. Methods must be re-entrant: backends
/// are shared immutable references.
pub trait Backend: fmt::Debug {
    fn id(&self) -> BackendId;

    /// Accelerated backends get the weight-normalization pre-passes before
    /// their subgraphs are selected.
    fn accelerated(&self) -> bool {
        false
    }

    fn supports_tensor_allocator(&self) -> bool {
        true
    }

    /// Can this backend execute `layer` with its current connected tensor
    /// types, or with every float input/output read as `dtype_override`?
    fn is_layer_supported(
        &self,
        graph: &Graph,
        layer: LayerId,
        dtype_override: Option<DataType>,
    ) -> LayerSupport;

    /// Handle factories in preference order, most preferred first.
    fn handle_factory_preferences(&self) -> Vec<FactoryId>;

    fn register_handle_factories(&self, registry: &mut TensorHandleFactoryRegistry);

    /// Rewrite a subgraph assigned to this backend. Replacement layers are
    /// created in `graph`; the returned views direct the substitution.
    fn optimize_subgraph(
        &self,
        graph: &mut Graph,
        subgraph: &SubgraphView,
        options: &ModelOptions,
    ) -> OptimizationViews;
}

/// One subgraph replacement proposed by a backend.
#[derive(Debug, Clone)]
pub struct Substitution {
    pub substitutable: SubgraphView,
    pub replacement: SubgraphView,
}

/// A backend's verdict on the subgraphs it was handed: regions to
/// substitute, regions it attempted and gave up on, and regions to leave
/// as they are.
#[derive(Debug, Clone, Default)]
pub struct OptimizationViews {
    pub substitutions: Vec<Substitution>,
    pub failed: Vec<SubgraphView>,
    pub untouched: Vec<SubgraphView>,
}

impl OptimizationViews {
    pub fn untouched_only(subgraph: SubgraphView) -> Self {
        Self {
            substitutions: Vec::new(),
            failed: Vec::new(),
            untouched: vec![subgraph],
        }
    }

    /// Every member of the original subgraph must be accounted for exactly
    /// once across substitutable, failed and untouched views.
    pub fn validate(&self, original: &SubgraphView) -> bool {
        let mut seen: Vec<LayerId> = Vec::new();
        let all = self
            .substitutions
            .iter()
            .map(|s| &s.substitutable)
            .chain(self.failed.iter())
            .chain(self.untouched.iter());
        for view in all {
            for &layer in view.layers() {
                if seen.contains(&layer) || !original.contains(layer) {
                    return false;
                }
                seen.push(layer);
            }
        }
        seen.len() == original.num_layers()
    }
}

/// Name -> backend-object factory. Built explicitly and passed into the
/// optimize call; there is no process-wide instance.
#[derive(Default)]
pub struct BackendRegistry {
    factories: IndexMap<BackendId, Box<dyn Fn() -> Arc<dyn Backend>>>,
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the reference backend pre-registered.
    pub fn with_reference_backend() -> Self {
        let mut registry = Self::new();
        registry.register(BackendId::cpu_ref(), || {
            Arc::new(reference::RefBackend::new()) as Arc<dyn Backend>
        });
        registry
    }

    pub fn register<F>(&mut self, id: BackendId, factory: F)
    where
        F: Fn() -> Arc<dyn Backend> + 'static,
    {
        self.factories.insert(id, Box::new(factory));
    }

    pub fn create(&self, id: &BackendId) -> Option<Arc<dyn Backend>> {
        self.factories.get(id).map(|f| f())
    }

    pub fn backend_ids(&self) -> impl Iterator<Item = &BackendId> {
        self.factories.keys()
    }
}

/// The platform's capabilities: which backends exist on this device.
#[derive(Debug, Clone, Default)]
pub struct DeviceSpec {
    pub supported_backends: IndexSet<BackendId>,
}

impl DeviceSpec {
    pub fn new(supported: impl IntoIterator<Item = BackendId>) -> Self {
        Self {
            supported_backends: supported.into_iter().collect(),
        }
    }
}

/// Mutable bookkeeping of the assignment stage: which backends were asked
/// for, are available, were actually chosen, or are to be avoided.
#[derive(Debug, Clone, Default)]
pub struct BackendSettings {
    pub preferred_backends: Vec<BackendId>,
    pub supported_backends: IndexSet<BackendId>,
    pub selected_backends: IndexSet<BackendId>,
    pub ignored_backends: IndexSet<BackendId>,
}

impl BackendSettings {
    pub fn new(preferred: Vec<BackendId>, spec: &DeviceSpec) -> Self {
        Self {
            preferred_backends: preferred,
            supported_backends: spec.supported_backends.clone(),
            selected_backends: IndexSet::new(),
            ignored_backends: IndexSet::new(),
        }
    }

    pub fn is_backend_preferred(&self, backend: &BackendId) -> bool {
        self.preferred_backends.contains(backend)
    }

    pub fn is_backend_supported(&self, backend: &BackendId) -> bool {
        self.supported_backends.contains(backend)
    }

    pub fn is_backend_ignored(&self, backend: &BackendId) -> bool {
        self.ignored_backends.contains(backend)
    }

    /// CpuRef counts as used only when it is both supported and preferred.
    pub fn is_cpu_ref_used(&self) -> bool {
        let cpu_ref = BackendId::cpu_ref();
        self.is_backend_supported(&cpu_ref) && self.is_backend_preferred(&cpu_ref)
    }

    /// preferred ∩ supported − ignored, in preference order.
    pub fn available_preferred_backends(&self) -> Vec<BackendId> {
        self.preferred_backends
            .iter()
            .filter(|b| self.is_backend_supported(b) && !self.is_backend_ignored(b))
            .cloned()
            .collect()
    }
}

/// Instantiated backends keyed by id, iteration in insertion order.
pub type BackendsMap = IndexMap<BackendId, Arc<dyn Backend>>;

/// Instantiate every supported backend and let each register its handle
/// factories.
pub fn create_supported_backends(
    registry: &BackendRegistry,
    settings: &BackendSettings,
    handle_registry: &mut TensorHandleFactoryRegistry,
) -> BackendsMap {
    let mut backends = BackendsMap::new();
    for id in &settings.supported_backends {
        if let Some(backend) = registry.create(id) {
            backend.register_handle_factories(handle_registry);
            backends.insert(backend.id(), backend);
        }
    }
    backends
}
