pub mod builder;
pub mod descriptors;
pub mod layer;
pub mod shape;
pub mod subgraph;

pub use builder::GraphBuilder;
pub use layer::{InputSlotRef, Layer, LayerKind, OutputSlotRef};
pub use subgraph::{SubgraphView, SubgraphViewSelector};

use crate::errors::{TPError, TPResult};
use crate::types::{EdgeStrategy, LayerId, TensorInfo};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// How [`Graph::infer_tensor_infos`] treats pre-set output infos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeInferenceMethod {
    /// Every output must carry an info equal to the inferred one.
    ValidateOnly,
    /// Inferred shapes overwrite stored ones.
    InferAndValidate,
}

/// The computation graph: a slab of layers addressed by stable [`LayerId`]s.
/// Insertion order is stable and breaks topological-sort ties, so passes are
/// reproducible.
#[derive(Debug, Default)]
pub struct Graph {
    layers: Vec<Option<Layer>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_layer(&mut self, layer: Layer) -> LayerId {
        let id = LayerId(self.layers.len());
        self.layers.push(Some(layer));
        id
    }

    /// The layer behind `id`. Ids handed out by the graph stay valid until
    /// the layer is erased; looking up an erased id is a logic error.
    pub fn layer(&self, id: LayerId) -> &Layer {
        self.layers[id.0]
            .as_ref()
            .unwrap_or_else(|| panic!("layer {id} was erased"))
    }

    pub fn layer_mut(&mut self, id: LayerId) -> &mut Layer {
        self.layers[id.0]
            .as_mut()
            .unwrap_or_else(|| panic!("layer {id} was erased"))
    }

    pub fn try_layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(id.0).and_then(|l| l.as_ref())
    }

    pub fn num_layers(&self) -> usize {
        self.layers.iter().filter(|l| l.is_some()).count()
    }

    /// Live layer ids in insertion order.
    pub fn layer_ids(&self) -> impl Iterator<Item = LayerId> + '_ {
        self.layers
            .iter()
            .enumerate()
            .filter_map(|(i, l)| l.as_ref().map(|_| LayerId(i)))
    }

    pub fn for_each_layer(&self, mut f: impl FnMut(LayerId, &Layer)) {
        for id in self.layer_ids() {
            f(id, self.layer(id));
        }
    }

    pub fn output_ref(&self, layer: LayerId, slot: usize) -> OutputSlotRef {
        OutputSlotRef { layer, slot }
    }

    pub fn input_ref(&self, layer: LayerId, slot: usize) -> InputSlotRef {
        InputSlotRef { layer, slot }
    }

    /// Establish one edge. Fails if the consumer slot is already bound or the
    /// edge would create a cycle.
    pub fn connect(&mut self, from: OutputSlotRef, to: InputSlotRef) -> TPResult<()> {
        if self.layer(to.layer).input(to.slot).is_connected() {
            return Err(TPError::invalid_argument(format!(
                "input slot {} of layer {} is already connected",
                to.slot, to.layer
            )));
        }
        if from.layer == to.layer || self.reaches(to.layer, from.layer) {
            return Err(TPError::invalid_argument(format!(
                "connecting {} to {} would create a cycle",
                from.layer, to.layer
            )));
        }
        let out = self.layer_mut(from.layer).output_mut(from.slot);
        out.consumers.push(to);
        out.strategies.push(EdgeStrategy::Undefined);
        self.layer_mut(to.layer).inputs[to.slot].source = Some(from);
        Ok(())
    }

    /// Remove the edge feeding `to`, if any.
    pub fn disconnect(&mut self, to: InputSlotRef) {
        let source = match self.layer(to.layer).input(to.slot).source() {
            Some(s) => s,
            None => return,
        };
        let out = self.layer_mut(source.layer).output_mut(source.slot);
        if let Some(pos) = out.consumers.iter().position(|c| *c == to) {
            out.consumers.remove(pos);
            out.strategies.remove(pos);
        }
        self.layer_mut(to.layer).inputs[to.slot].source = None;
    }

    /// True when `to` is reachable from `from` along forward edges.
    fn reaches(&self, from: LayerId, to: LayerId) -> bool {
        if from == to {
            return true;
        }
        let mut stack = vec![from];
        let mut visited = vec![false; self.layers.len()];
        while let Some(id) = stack.pop() {
            if visited[id.0] {
                continue;
            }
            visited[id.0] = true;
            let layer = match self.try_layer(id) {
                Some(l) => l,
                None => continue,
            };
            for out in &layer.outputs {
                for consumer in &out.consumers {
                    if consumer.layer == to {
                        return true;
                    }
                    stack.push(consumer.layer);
                }
            }
        }
        false
    }

    /// Rewire every consumer of `from` onto `to`. Edge strategies reset to
    /// Undefined.
    pub fn move_consumers(&mut self, from: OutputSlotRef, to: OutputSlotRef) {
        let consumers: Vec<InputSlotRef> = self
            .layer(from.layer)
            .output(from.slot)
            .consumers
            .clone();
        for consumer in consumers {
            self.disconnect(consumer);
            self.connect(to, consumer)
                .expect("moving an existing edge cannot form a cycle");
        }
    }

    /// Splice a unary layer onto the edge feeding `consumer`:
    /// producer -> new_layer -> consumer, atomically.
    pub fn insert_before(&mut self, consumer: InputSlotRef, new_layer: LayerId) -> TPResult<()> {
        let producer = self
            .layer(consumer.layer)
            .input(consumer.slot)
            .source()
            .ok_or_else(|| {
                TPError::invalid_argument(format!(
                    "input slot {} of layer {} is not connected",
                    consumer.slot, consumer.layer
                ))
            })?;
        self.disconnect(consumer);
        self.connect(producer, self.input_ref(new_layer, 0))?;
        self.connect(self.output_ref(new_layer, 0), consumer)?;
        Ok(())
    }

    /// Splice a unary layer after `producer`, taking over all its consumers.
    pub fn insert_after(&mut self, producer: OutputSlotRef, new_layer: LayerId) -> TPResult<()> {
        self.move_consumers(producer, self.output_ref(new_layer, 0));
        self.connect(producer, self.input_ref(new_layer, 0))?;
        Ok(())
    }

    /// Erase a layer. Only permitted once nothing consumes its outputs.
    pub fn erase(&mut self, id: LayerId) -> TPResult<()> {
        let layer = self.layer(id);
        if layer.outputs.iter().any(|o| !o.consumers.is_empty()) {
            return Err(TPError::Graph(format!(
                "cannot erase layer {id} ({}) while it still has consumers",
                layer.kind_name()
            )));
        }
        for slot in 0..layer.num_inputs() {
            self.disconnect(self.input_ref(id, slot));
        }
        self.layers[id.0] = None;
        Ok(())
    }

    /// Replace `old` with `new_layer` (same arity), carrying over producers,
    /// consumers and output infos. Returns the id of the new layer.
    pub fn substitute_layer(&mut self, old: LayerId, new_layer: Layer) -> TPResult<LayerId> {
        let (num_in, num_out) = (new_layer.num_inputs(), new_layer.num_outputs());
        if num_in != self.layer(old).num_inputs() || num_out != self.layer(old).num_outputs() {
            return Err(TPError::Graph(format!(
                "substitute_layer arity mismatch on layer {old}"
            )));
        }
        let new_id = self.add_layer(new_layer);
        for slot in 0..num_in {
            if let Some(producer) = self.layer(old).input(slot).source() {
                self.disconnect(self.input_ref(old, slot));
                self.connect(producer, self.input_ref(new_id, slot))?;
            }
        }
        for slot in 0..num_out {
            let info = self.layer(old).output_info(slot).cloned();
            if let Some(info) = info {
                self.layer_mut(new_id).set_output_info(slot, info);
            }
            self.move_consumers(self.output_ref(old, slot), self.output_ref(new_id, slot));
        }
        self.erase(old)?;
        Ok(new_id)
    }

    /// Deterministic topological order; ties broken by insertion order.
    pub fn topological_order(&self) -> Vec<LayerId> {
        let mut indegree = vec![0usize; self.layers.len()];
        for id in self.layer_ids() {
            indegree[id.0] = self
                .layer(id)
                .inputs
                .iter()
                .filter(|i| i.is_connected())
                .count();
        }
        let mut ready: BinaryHeap<Reverse<usize>> = self
            .layer_ids()
            .filter(|id| indegree[id.0] == 0)
            .map(|id| Reverse(id.0))
            .collect();
        let mut order = Vec::with_capacity(self.num_layers());
        while let Some(Reverse(idx)) = ready.pop() {
            let id = LayerId(idx);
            order.push(id);
            for out in &self.layer(id).outputs {
                for consumer in &out.consumers {
                    indegree[consumer.layer.0] -= 1;
                    if indegree[consumer.layer.0] == 0 {
                        ready.push(Reverse(consumer.layer.0));
                    }
                }
            }
        }
        debug_assert_eq!(order.len(), self.num_layers(), "graph must stay acyclic");
        order
    }

    /// The tensor info flowing into `slot`, if the producer has one.
    pub fn producer_info(&self, slot: InputSlotRef) -> Option<&TensorInfo> {
        let source = self.layer(slot.layer).input(slot.slot).source()?;
        self.layer(source.layer).output_info(source.slot)
    }

    /// Cloned infos of all connected inputs of `id`, in slot order.
    pub fn input_infos(&self, id: LayerId) -> TPResult<Vec<TensorInfo>> {
        let layer = self.layer(id);
        let mut infos = Vec::with_capacity(layer.num_inputs());
        for slot in 0..layer.num_inputs() {
            let info = self.producer_info(self.input_ref(id, slot)).ok_or_else(|| {
                TPError::layer_validation(
                    format!("{} ({})", layer.kind_name(), layer.name()),
                    format!("input slot {slot} has no connected tensor info"),
                )
            })?;
            infos.push(info.clone());
        }
        Ok(infos)
    }

    /// Assert that every non-source input slot is connected and every
    /// constant producer carries a tensor info.
    pub fn verify_connections(&self) -> TPResult<()> {
        for id in self.layer_ids() {
            let layer = self.layer(id);
            for (slot, input) in layer.inputs.iter().enumerate() {
                if !input.is_connected() {
                    return Err(TPError::Graph(format!(
                        "input slot {slot} of layer {id} ({}) is unconnected",
                        layer.kind_name()
                    )));
                }
            }
            if matches!(layer.kind(), LayerKind::Constant { .. }) && layer.output_info(0).is_none()
            {
                return Err(TPError::Graph(format!(
                    "constant layer {id} ({}) has no tensor info",
                    layer.name()
                )));
            }
        }
        Ok(())
    }

    /// Run shape/dtype propagation layer by layer in topological order.
    pub fn infer_tensor_infos(&mut self, method: ShapeInferenceMethod) -> TPResult<()> {
        for id in self.topological_order() {
            let layer = self.layer(id);
            if matches!(layer.kind(), LayerKind::Output { .. }) {
                continue;
            }
            let inputs = self.input_infos(id)?;
            let layer = self.layer(id);
            let inferred = shape::inferred_output_infos(layer, &inputs)?;
            match method {
                ShapeInferenceMethod::ValidateOnly => {
                    for (slot, info) in inferred.iter().enumerate() {
                        let existing = layer.output_info(slot).ok_or_else(|| {
                            TPError::layer_validation(
                                format!("{} ({})", layer.kind_name(), layer.name()),
                                format!("output {slot} has no tensor info to validate"),
                            )
                        })?;
                        if existing.shape != info.shape {
                            return Err(TPError::layer_validation(
                                format!("{} ({})", layer.kind_name(), layer.name()),
                                format!(
                                    "declared shape {} does not match inferred {}",
                                    existing.shape, info.shape
                                ),
                            ));
                        }
                    }
                }
                ShapeInferenceMethod::InferAndValidate => {
                    for (slot, info) in inferred.into_iter().enumerate() {
                        self.layer_mut(id).set_output_info(slot, info);
                    }
                }
            }
        }
        Ok(())
    }

    /// Atomically replace a connected region with another of equal external
    /// signature. The old region's layers are erased.
    pub fn substitute_subgraph(
        &mut self,
        old: &SubgraphView,
        new: &SubgraphView,
    ) -> TPResult<()> {
        if old.input_slots().len() != new.input_slots().len()
            || old.output_slots().len() != new.output_slots().len()
        {
            return Err(TPError::invalid_argument(format!(
                "subgraph substitution signature mismatch: {}x{} vs {}x{}",
                old.input_slots().len(),
                old.output_slots().len(),
                new.input_slots().len(),
                new.output_slots().len()
            )));
        }
        for (old_out, new_out) in old.output_slots().iter().zip(new.output_slots()) {
            let old_info = self.layer(old_out.layer).output_info(old_out.slot);
            let new_info = self.layer(new_out.layer).output_info(new_out.slot);
            if let (Some(a), Some(b)) = (old_info, new_info) {
                if a.shape != b.shape || !a.type_space_matches(b) {
                    return Err(TPError::invalid_argument(
                        "subgraph substitution output tensor info mismatch",
                    ));
                }
            }
        }

        // Feed the replacement from the old region's producers.
        for (old_in, new_in) in old.input_slots().iter().zip(new.input_slots()) {
            let producer = self.layer(old_in.layer).input(old_in.slot).source();
            let producer = match producer {
                Some(p) => p,
                None => continue,
            };
            let current = self.layer(new_in.layer).input(new_in.slot).source();
            match current {
                Some(existing) if existing == producer => {}
                Some(_) => {
                    return Err(TPError::invalid_argument(
                        "replacement subgraph input is already connected elsewhere",
                    ))
                }
                None => {
                    self.disconnect(*old_in);
                    self.connect(producer, *new_in)?;
                }
            }
        }

        // Hand the old region's external consumers to the replacement.
        for (old_out, new_out) in old.output_slots().iter().zip(new.output_slots()) {
            let external: Vec<InputSlotRef> = self
                .layer(old_out.layer)
                .output(old_out.slot)
                .consumers
                .iter()
                .copied()
                .filter(|c| !old.contains(c.layer))
                .collect();
            for consumer in external {
                self.disconnect(consumer);
                self.connect(*new_out, consumer)?;
            }
        }

        // Detach and erase the old region.
        for &id in old.layers() {
            let num_in = self.layer(id).num_inputs();
            for slot in 0..num_in {
                self.disconnect(self.input_ref(id, slot));
            }
        }
        for &id in old.layers() {
            self.erase(id)?;
        }
        Ok(())
    }
}
