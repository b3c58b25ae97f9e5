//! Configurable backend and factory doubles for pipeline tests.
#![allow(dead_code)]

use std::sync::Arc;
use tensorplan::backend::{Backend, LayerSupport, OptimizationViews};
use tensorplan::graph::{Graph, LayerKind, SubgraphView};
use tensorplan::handles::{TensorHandleFactory, TensorHandleFactoryRegistry};
use tensorplan::network::ModelOptions;
use tensorplan::types::MemorySourceFlags;
use tensorplan::{BackendId, DataType, FactoryId, LayerId};

#[derive(Debug, Clone)]
pub struct TestFactory {
    pub id: FactoryId,
    pub map_unmap: bool,
    pub import_flags: MemorySourceFlags,
    pub export_flags: MemorySourceFlags,
}

impl TensorHandleFactory for TestFactory {
    fn id(&self) -> FactoryId {
        self.id.clone()
    }

    fn supports_map_unmap(&self) -> bool {
        self.map_unmap
    }

    fn import_flags(&self) -> MemorySourceFlags {
        self.import_flags
    }

    fn export_flags(&self) -> MemorySourceFlags {
        self.export_flags
    }
}

#[derive(Debug)]
pub struct TestBackend {
    pub id: BackendId,
    pub accelerated: bool,
    /// Kind names this backend refuses outright.
    pub rejected_kinds: Vec<&'static str>,
    /// Report float16 tensors as unsupported by the hardware revision.
    pub rejects_fp16: bool,
    pub factory: TestFactory,
}

impl TestBackend {
    pub fn new(id: &str, factory: TestFactory) -> Self {
        Self {
            id: BackendId::new(id),
            accelerated: false,
            rejected_kinds: Vec::new(),
            rejects_fp16: false,
            factory,
        }
    }

    pub fn map_unmap_factory(name: &str) -> TestFactory {
        TestFactory {
            id: FactoryId::new(name),
            map_unmap: true,
            import_flags: 0,
            export_flags: 0,
        }
    }

    fn connected_data_types(&self, graph: &Graph, layer: LayerId) -> Vec<DataType> {
        let layer = graph.layer(layer);
        let mut data_types = Vec::new();
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
        data_types
    }
}

impl Backend for TestBackend {
    fn id(&self) -> BackendId {
        self.id.clone()
    }

    fn accelerated(&self) -> bool {
        self.accelerated
    }

    fn is_layer_supported(
        &self,
        graph: &Graph,
        layer: LayerId,
        dtype_override: Option<DataType>,
    ) -> LayerSupport {
        let kind_name = graph.layer(layer).kind_name();
        if self.rejected_kinds.contains(&kind_name) {
            return LayerSupport::Unsupported(format!("{kind_name} is not implemented"));
        }
        // Conversion kernels exist precisely for fp16-less hardware, and
        // pass-through kinds never touch the vector units.
        let exempt_from_fp16 = matches!(
            graph.layer(layer).kind(),
            LayerKind::ConvertFp16ToFp32
                | LayerKind::ConvertFp32ToFp16
                | LayerKind::Input { .. }
                | LayerKind::Output { .. }
                | LayerKind::Constant { .. }
                | LayerKind::MemCopy
                | LayerKind::MemImport
                | LayerKind::Debug { .. }
        );
        if self.rejects_fp16 && !exempt_from_fp16 {
            let mut data_types = self.connected_data_types(graph, layer);
            if let Some(override_type) = dtype_override {
                for dt in &mut data_types {
                    if matches!(dt, DataType::Float16 | DataType::Float32) {
                        *dt = override_type;
                    }
                }
            }
            if data_types.contains(&DataType::Float16) {
                return LayerSupport::Fp16NotSupported(
                    "this hardware revision does not support float16".to_string(),
                );
            }
        }
        LayerSupport::Supported
    }

    fn handle_factory_preferences(&self) -> Vec<FactoryId> {
        vec![self.factory.id.clone()]
    }

    fn register_handle_factories(&self, registry: &mut TensorHandleFactoryRegistry) {
        registry.register(Arc::new(self.factory.clone()));
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
