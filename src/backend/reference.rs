use crate::backend::{Backend, LayerSupport, OptimizationViews};
use crate::graph::{Graph, LayerKind, SubgraphView};
use crate::handles::{TensorHandleFactory, TensorHandleFactoryRegistry};
use crate::network::ModelOptions;
use crate::types::{mem_source, BackendId, DataType, FactoryId, LayerId, MemorySourceFlags};
use std::sync::Arc;

/// Map/unmap-capable host-memory factory of the reference backend.
#[derive(Debug)]
pub struct RefTensorHandleFactory;

impl RefTensorHandleFactory {
    pub const NAME: &'static str = "RefMemory";

    pub fn factory_id() -> FactoryId {
        FactoryId::new(Self::NAME)
    }
}

impl TensorHandleFactory for RefTensorHandleFactory {
    fn id(&self) -> FactoryId {
        Self::factory_id()
    }

    fn supports_map_unmap(&self) -> bool {
        true
    }

    fn import_flags(&self) -> MemorySourceFlags {
        mem_source::MALLOC
    }

    fn export_flags(&self) -> MemorySourceFlags {
        mem_source::MALLOC
    }
}

/// The always-available reference CPU backend. It executes every kind on
/// plain host memory, so support queries only reject type combinations the
/// reference kernels genuinely lack.
#[derive(Debug, Default)]
pub struct RefBackend;

impl RefBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Backend for RefBackend {
    fn id(&self) -> BackendId {
        BackendId::cpu_ref()
    }

    fn is_layer_supported(
        &self,
        graph: &Graph,
        layer: LayerId,
        dtype_override: Option<DataType>,
    ) -> LayerSupport {
        let layer = graph.layer(layer);

        let mut data_types: Vec<DataType> = Vec::new();
        for slot in 0..layer.num_inputs() {
            if let Some(source) = layer.input(slot).source() {
                if let Some(info) = graph.layer(source.layer).output_info(source.slot) {
                    data_types.push(info.data_type);
                }
            }
        }
        for slot in 0..layer.num_outputs() {
            if let Some(info) = layer.output_info(slot) {
                data_types.push(info.data_type);
            }
        }
        if let Some(override_type) = dtype_override {
            for dt in &mut data_types {
                if matches!(dt, DataType::Float16 | DataType::Float32) {
                    *dt = override_type;
                }
            }
        }

        if data_types.contains(&DataType::BFloat16) {
            return LayerSupport::Unsupported(format!(
                "{} is not supported with BFloat16 on the reference backend",
                layer.kind_name()
            ));
        }

        if matches!(layer.kind(), LayerKind::Lstm { .. })
            && data_types.iter().any(|dt| dt.is_quantized())
        {
            return LayerSupport::Unsupported(
                "the reference LSTM kernels only run on float tensors".to_string(),
            );
        }

        LayerSupport::Supported
    }

    fn handle_factory_preferences(&self) -> Vec<FactoryId> {
        vec![RefTensorHandleFactory::factory_id()]
    }

    fn register_handle_factories(&self, registry: &mut TensorHandleFactoryRegistry) {
        registry.register(Arc::new(RefTensorHandleFactory));
    }

    fn optimize_subgraph(
        &self,
        _graph: &mut Graph,
        subgraph: &SubgraphView,
        _options: &ModelOptions,
    ) -> OptimizationViews {
        OptimizationViews::untouched_only(subgraph.clone())
    }
}
