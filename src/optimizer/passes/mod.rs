pub mod broadcast;
pub mod constants;
pub mod conversion;
pub mod debug;
pub mod norm_fold;
pub mod pad_fold;
pub mod reshape;
pub mod shuffle;
pub mod space_depth;

pub use broadcast::AddBroadcastReshapeLayer;
pub use constants::{
    ConvertConstDequantisationLayersToConstLayers, ConvertConstantsFloatToHalf,
    ConvertConstantsHalfToFloat, FusePermuteIntoConstLayer, PermuteDepthwiseConv2dWeights,
};
pub use conversion::{Fp32NetworkToFp16Converter, OptimizeInverseConversions};
pub use debug::InsertDebugLayer;
pub use norm_fold::FuseBatchNormIntoConvolution2d;
pub use pad_fold::{
    FoldPadIntoConvolution2d, FoldPadIntoDepthwiseConvolution2d, FoldPadIntoPooling2d,
};
pub use reshape::OptimizeConsecutiveReshapes;
pub use shuffle::{MoveShuffleUp, OptimizeInverseShuffles, ShuffleAsReshape, SquashEqualSiblings};
pub use space_depth::ShuffleAndBatchToSpaceAsDepthToSpace;

use crate::errors::{TPError, TPResult};
use crate::graph::{Graph, OutputSlotRef};
use crate::optimizer::Pass;
use crate::types::{LayerId, Shape};

/// The algebraic rewrites the pipeline runs between shape inference and
/// backend assignment, in application order.
pub fn default_pass_set() -> Vec<Box<dyn Pass>> {
    vec![
        Box::new(SquashEqualSiblings::permutes()),
        Box::new(SquashEqualSiblings::transposes()),
        Box::new(SquashEqualSiblings::reshapes()),
        Box::new(OptimizeInverseShuffles::permutes()),
        Box::new(OptimizeInverseShuffles::transposes()),
        Box::new(MoveShuffleUp::permutes()),
        Box::new(MoveShuffleUp::transposes()),
        Box::new(ShuffleAsReshape::permutes()),
        Box::new(ShuffleAsReshape::transposes()),
        Box::new(OptimizeConsecutiveReshapes),
        Box::new(FoldPadIntoConvolution2d),
        Box::new(FoldPadIntoDepthwiseConvolution2d),
        Box::new(FoldPadIntoPooling2d),
        Box::new(ShuffleAndBatchToSpaceAsDepthToSpace::permutes()),
        Box::new(ShuffleAndBatchToSpaceAsDepthToSpace::transposes()),
        Box::new(FuseBatchNormIntoConvolution2d::conv_f32()),
        Box::new(FuseBatchNormIntoConvolution2d::conv_f16()),
        Box::new(FuseBatchNormIntoConvolution2d::depthwise_f32()),
        Box::new(FuseBatchNormIntoConvolution2d::depthwise_f16()),
    ]
}

/// Which of the two axis-shuffling kinds a pass targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShuffleKind {
    /// Source-major mapping: destination dim `m[i]` takes source dim `i`.
    Permute,
    /// Destination-major mapping: destination dim `i` takes source dim `m[i]`.
    Transpose,
}

/// Rewire the consumers of `id`'s single output onto its producer, leaving
/// the layer dangling for the optimizer sweep to erase.
pub(crate) fn bypass_unary(graph: &mut Graph, id: LayerId) -> TPResult<OutputSlotRef> {
    let producer = graph.layer(id).input(0).source().ok_or_else(|| {
        TPError::Graph(format!("cannot bypass layer {id} with an unconnected input"))
    })?;
    graph.move_consumers(graph.output_ref(id, 0), producer);
    Ok(producer)
}

/// Apply a shuffle mapping to a shape.
pub(crate) fn shuffled_shape(kind: ShuffleKind, shape: &Shape, mappings: &[usize]) -> Shape {
    let dims = shape.dims();
    match kind {
        ShuffleKind::Permute => {
            let mut out = vec![0usize; dims.len()];
            for (src, &dst) in mappings.iter().enumerate() {
                out[dst] = dims[src];
            }
            Shape::new(&out)
        }
        ShuffleKind::Transpose => {
            let out: Vec<usize> = mappings.iter().map(|&src| dims[src]).collect();
            Shape::new(&out)
        }
    }
}

/// True when the producer of `slot` feeds only that one consumer.
pub(crate) fn sole_consumer(graph: &Graph, producer: OutputSlotRef, consumer_layer: LayerId) -> bool {
    let consumers = graph.layer(producer.layer).output(producer.slot).consumers();
    consumers.len() == 1 && consumers[0].layer == consumer_layer
}
