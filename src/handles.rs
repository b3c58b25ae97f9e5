use crate::graph::Graph;
use crate::types::{
    Capability, CapabilityClass, FactoryId, LayerId, MemorySourceFlags, Shape, TensorInfo,
};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// An allocation strategy for tensor buffers. Factories declare how their
/// handles can be reached: mapped into host memory, imported from another
/// factory's export, or sliced into sub-tensors.
pub trait TensorHandleFactory: fmt::Debug {
    fn id(&self) -> FactoryId;

    fn supports_map_unmap(&self) -> bool {
        false
    }

    fn import_flags(&self) -> MemorySourceFlags {
        crate::types::mem_source::UNDEFINED
    }

    fn export_flags(&self) -> MemorySourceFlags {
        crate::types::mem_source::UNDEFINED
    }

    /// Capabilities of the given class that apply to this producer/consumer
    /// pair. A non-empty answer disqualifies the factory from export paths.
    fn capabilities(
        &self,
        _graph: &Graph,
        _producer: LayerId,
        _consumer: LayerId,
        _class: CapabilityClass,
    ) -> Vec<Capability> {
        Vec::new()
    }

    fn supports_subtensors(&self) -> bool {
        false
    }

    /// Info of a sub-tensor window over a parent buffer, when the factory
    /// can alias rather than copy.
    fn create_subtensor(
        &self,
        _parent: &TensorInfo,
        _shape: &Shape,
        _origin: &[usize],
    ) -> Option<TensorInfo> {
        None
    }
}

/// Name -> factory lookup, filled by the backends at pipeline start.
#[derive(Debug, Default)]
pub struct TensorHandleFactoryRegistry {
    factories: IndexMap<FactoryId, Arc<dyn TensorHandleFactory>>,
}

impl TensorHandleFactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Arc<dyn TensorHandleFactory>) {
        self.factories.insert(factory.id(), factory);
    }

    pub fn get(&self, id: &FactoryId) -> Option<&Arc<dyn TensorHandleFactory>> {
        self.factories.get(id)
    }

    pub fn factory_ids(&self) -> impl Iterator<Item = &FactoryId> {
        self.factories.keys()
    }
}
