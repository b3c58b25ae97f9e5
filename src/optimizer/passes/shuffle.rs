//! Permute/transpose manipulation: squashing equal siblings, cancelling
//! inverse pairs, hoisting shuffles above shape-agnostic layers and turning
//! memory-no-op shuffles into reshapes.

use crate::errors::TPResult;
use crate::graph::descriptors::{
    is_inverse_permutation, BinaryOp, PermuteDescriptor, ReshapeDescriptor, TransposeDescriptor,
};
use crate::graph::{Graph, Layer, LayerKind};
use crate::optimizer::passes::{bypass_unary, shuffled_shape, sole_consumer, ShuffleKind};
use crate::optimizer::{Pass, PassOutcome};
use crate::types::LayerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SquashKind {
    Permute,
    Transpose,
    Reshape,
}

/// Squash equal sibling permutes, transposes or reshapes hanging off the
/// same output slot into a single layer feeding all their consumers.
pub struct SquashEqualSiblings {
    kind: SquashKind,
}

impl SquashEqualSiblings {
    pub fn permutes() -> Self {
        Self {
            kind: SquashKind::Permute,
        }
    }

    pub fn transposes() -> Self {
        Self {
            kind: SquashKind::Transpose,
        }
    }

    pub fn reshapes() -> Self {
        Self {
            kind: SquashKind::Reshape,
        }
    }

    fn matches(&self, kind: &LayerKind) -> bool {
        matches!(
            (self.kind, kind),
            (SquashKind::Permute, LayerKind::Permute(_))
                | (SquashKind::Transpose, LayerKind::Transpose(_))
                | (SquashKind::Reshape, LayerKind::Reshape(_))
        )
    }
}

fn equal_descriptors(a: &LayerKind, b: &LayerKind) -> bool {
    match (a, b) {
        (LayerKind::Permute(x), LayerKind::Permute(y)) => x == y,
        (LayerKind::Transpose(x), LayerKind::Transpose(y)) => x == y,
        (LayerKind::Reshape(x), LayerKind::Reshape(y)) => x == y,
        _ => false,
    }
}

impl Pass for SquashEqualSiblings {
    fn name(&self) -> &str {
        match self.kind {
            SquashKind::Permute => "SquashEqualPermuteSiblings",
            SquashKind::Transpose => "SquashEqualTransposeSiblings",
            SquashKind::Reshape => "SquashEqualReshapeSiblings",
        }
    }

    fn run(&self, graph: &mut Graph, id: LayerId) -> TPResult<PassOutcome> {
        if !self.matches(graph.layer(id).kind()) {
            return Ok(PassOutcome::Unchanged);
        }
        let producer = match graph.layer(id).input(0).source() {
            Some(p) => p,
            None => return Ok(PassOutcome::Unchanged),
        };
        let siblings: Vec<LayerId> = graph
            .layer(producer.layer)
            .output(producer.slot)
            .consumers()
            .iter()
            .map(|c| c.layer)
            .filter(|&l| l != id)
            .collect();
        for sibling in siblings {
            if equal_descriptors(graph.layer(id).kind(), graph.layer(sibling).kind()) {
                let (keeper, mover) = if sibling.0 < id.0 { (sibling, id) } else { (id, sibling) };
                graph.move_consumers(graph.output_ref(mover, 0), graph.output_ref(keeper, 0));
                return Ok(PassOutcome::Substituted);
            }
        }
        Ok(PassOutcome::Unchanged)
    }
}

/// Remove a permute (or transpose) pair where the child undoes the parent.
pub struct OptimizeInverseShuffles {
    kind: ShuffleKind,
}

impl OptimizeInverseShuffles {
    pub fn permutes() -> Self {
        Self {
            kind: ShuffleKind::Permute,
        }
    }

    pub fn transposes() -> Self {
        Self {
            kind: ShuffleKind::Transpose,
        }
    }
}

fn shuffle_mappings<'a>(kind: ShuffleKind, layer_kind: &'a LayerKind) -> Option<&'a [usize]> {
    match (kind, layer_kind) {
        (ShuffleKind::Permute, LayerKind::Permute(desc)) => Some(&desc.mappings),
        (ShuffleKind::Transpose, LayerKind::Transpose(desc)) => Some(&desc.mappings),
        _ => None,
    }
}

impl Pass for OptimizeInverseShuffles {
    fn name(&self) -> &str {
        match self.kind {
            ShuffleKind::Permute => "OptimizeInversePermutes",
            ShuffleKind::Transpose => "OptimizeInverseTransposes",
        }
    }

    fn run(&self, graph: &mut Graph, id: LayerId) -> TPResult<PassOutcome> {
        let child = match shuffle_mappings(self.kind, graph.layer(id).kind()) {
            Some(m) => m.to_vec(),
            None => return Ok(PassOutcome::Unchanged),
        };
        let producer = match graph.layer(id).input(0).source() {
            Some(p) => p,
            None => return Ok(PassOutcome::Unchanged),
        };
        let parent = match shuffle_mappings(self.kind, graph.layer(producer.layer).kind()) {
            Some(m) => m.to_vec(),
            None => return Ok(PassOutcome::Unchanged),
        };
        if !is_inverse_permutation(&parent, &child) {
            return Ok(PassOutcome::Unchanged);
        }
        let grandparent = match graph.layer(producer.layer).input(0).source() {
            Some(p) => p,
            None => return Ok(PassOutcome::Unchanged),
        };
        graph.move_consumers(graph.output_ref(id, 0), grandparent);
        Ok(PassOutcome::Substituted)
    }
}

/// Layers that do not care about the memory order of their tensors, so a
/// shuffle can hop over them towards the inputs.
fn is_shape_agnostic(kind: &LayerKind) -> bool {
    use crate::graph::descriptors::UnaryOp;
    matches!(
        kind,
        LayerKind::Activation(_)
            | LayerKind::ElementwiseBinary(BinaryOp::Add)
            | LayerKind::ElementwiseBinary(BinaryOp::Mul)
            | LayerKind::ElementwiseUnary(UnaryOp::Floor)
            | LayerKind::FakeQuantization(_)
            | LayerKind::MemCopy
    )
}

/// Move a permute (or transpose) upward past a shape-agnostic layer,
/// multiplying it onto each of that layer's inputs.
pub struct MoveShuffleUp {
    kind: ShuffleKind,
}

impl MoveShuffleUp {
    pub fn permutes() -> Self {
        Self {
            kind: ShuffleKind::Permute,
        }
    }

    pub fn transposes() -> Self {
        Self {
            kind: ShuffleKind::Transpose,
        }
    }
}

impl Pass for MoveShuffleUp {
    fn name(&self) -> &str {
        match self.kind {
            ShuffleKind::Permute => "MovePermuteUp",
            ShuffleKind::Transpose => "MoveTransposeUp",
        }
    }

    fn run(&self, graph: &mut Graph, id: LayerId) -> TPResult<PassOutcome> {
        let mappings = match shuffle_mappings(self.kind, graph.layer(id).kind()) {
            Some(m) => m.to_vec(),
            None => return Ok(PassOutcome::Unchanged),
        };
        let base_ref = match graph.layer(id).input(0).source() {
            Some(p) => p,
            None => return Ok(PassOutcome::Unchanged),
        };
        let base = base_ref.layer;
        if !is_shape_agnostic(graph.layer(base).kind()) {
            return Ok(PassOutcome::Unchanged);
        }
        if !sole_consumer(graph, base_ref, id) {
            return Ok(PassOutcome::Unchanged);
        }

        // One fresh shuffle in front of each of the base layer's inputs.
        let num_inputs = graph.layer(base).num_inputs();
        for slot in 0..num_inputs {
            let consumer = graph.input_ref(base, slot);
            if graph.layer(base).input(slot).source().is_none() {
                continue;
            }
            let kind = match self.kind {
                ShuffleKind::Permute => LayerKind::Permute(PermuteDescriptor::new(&mappings)),
                ShuffleKind::Transpose => LayerKind::Transpose(TransposeDescriptor::new(&mappings)),
            };
            let name = format!("{}_moved_up", graph.layer(id).name());
            let produced = graph.producer_info(consumer).cloned();
            let new_id = graph.add_layer(Layer::new(kind, name)?);
            graph.insert_before(consumer, new_id)?;
            if let Some(info) = produced {
                let shape = shuffled_shape(self.kind, &info.shape, &mappings);
                graph.layer_mut(new_id).set_output_info(0, info.with_shape(shape));
            }
        }

        // The base layer now produces shuffled tensors.
        if let Some(info) = graph.layer(id).output_info(0).cloned() {
            graph.layer_mut(base).set_output_info(0, info);
        }
        bypass_unary(graph, id)?;
        Ok(PassOutcome::Substituted)
    }
}

/// Convert a shuffle that is a no-op in memory (it only moves size-1
/// dimensions) into a reshape.
pub struct ShuffleAsReshape {
    kind: ShuffleKind,
}

impl ShuffleAsReshape {
    pub fn permutes() -> Self {
        Self {
            kind: ShuffleKind::Permute,
        }
    }

    pub fn transposes() -> Self {
        Self {
            kind: ShuffleKind::Transpose,
        }
    }

    fn is_memory_noop(&self, dims: &[usize], mappings: &[usize]) -> bool {
        match self.kind {
            ShuffleKind::Permute => {
                // Destination indices of the size>1 dims must stay ordered.
                let mut last = None;
                for (src, &dst) in mappings.iter().enumerate() {
                    if dims[src] > 1 {
                        if let Some(prev) = last {
                            if dst < prev {
                                return false;
                            }
                        }
                        last = Some(dst);
                    }
                }
                true
            }
            ShuffleKind::Transpose => {
                // Source indices of the size>1 dims must stay ordered.
                let mut last = None;
                for &src in mappings {
                    if dims[src] > 1 {
                        if let Some(prev) = last {
                            if src < prev {
                                return false;
                            }
                        }
                        last = Some(src);
                    }
                }
                true
            }
        }
    }
}

impl Pass for ShuffleAsReshape {
    fn name(&self) -> &str {
        match self.kind {
            ShuffleKind::Permute => "PermuteAsReshape",
            ShuffleKind::Transpose => "TransposeAsReshape",
        }
    }

    fn run(&self, graph: &mut Graph, id: LayerId) -> TPResult<PassOutcome> {
        let mappings = match shuffle_mappings(self.kind, graph.layer(id).kind()) {
            Some(m) => m.to_vec(),
            None => return Ok(PassOutcome::Unchanged),
        };
        let input_info = match graph.producer_info(graph.input_ref(id, 0)) {
            Some(info) => info.clone(),
            None => return Ok(PassOutcome::Unchanged),
        };
        if !self.is_memory_noop(input_info.shape.dims(), &mappings) {
            return Ok(PassOutcome::Unchanged);
        }
        let target = shuffled_shape(self.kind, &input_info.shape, &mappings);
        let name = graph.layer(id).name().to_string();
        let reshape = Layer::new(
            LayerKind::Reshape(ReshapeDescriptor {
                target_shape: target.clone(),
            }),
            name,
        )?;
        let new_id = graph.substitute_layer(id, reshape)?;
        if graph.layer(new_id).output_info(0).is_none() {
            graph
                .layer_mut(new_id)
                .set_output_info(0, input_info.with_shape(target));
        }
        Ok(PassOutcome::Substituted)
    }
}
