//! Recognizing a channels-to-batch shuffle followed by batch-to-space as a
//! single depth-to-space rewrite.

use crate::errors::TPResult;
use crate::graph::descriptors::{DataLayout, DepthToSpaceDescriptor};
use crate::graph::{Graph, Layer, LayerKind};
use crate::optimizer::passes::{sole_consumer, ShuffleKind};
use crate::optimizer::{Pass, PassOutcome};
use crate::types::LayerId;

/// The permute mapping that moves channels into the batch dimension, in
/// each of the two shuffle conventions.
const CHANNELS_TO_BATCH_PERMUTE: [usize; 4] = [3, 0, 1, 2];
const CHANNELS_TO_BATCH_TRANSPOSE: [usize; 4] = [1, 2, 3, 0];

pub struct ShuffleAndBatchToSpaceAsDepthToSpace {
    kind: ShuffleKind,
}

impl ShuffleAndBatchToSpaceAsDepthToSpace {
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

    fn matches_shuffle(&self, kind: &LayerKind) -> bool {
        match (self.kind, kind) {
            (ShuffleKind::Permute, LayerKind::Permute(desc)) => {
                desc.mappings == CHANNELS_TO_BATCH_PERMUTE
            }
            (ShuffleKind::Transpose, LayerKind::Transpose(desc)) => {
                desc.mappings == CHANNELS_TO_BATCH_TRANSPOSE
            }
            _ => false,
        }
    }
}

impl Pass for ShuffleAndBatchToSpaceAsDepthToSpace {
    fn name(&self) -> &str {
        match self.kind {
            ShuffleKind::Permute => "PermuteAndBatchToSpaceAsDepthToSpace",
            ShuffleKind::Transpose => "TransposeAndBatchToSpaceAsDepthToSpace",
        }
    }

    fn run(&self, graph: &mut Graph, id: LayerId) -> TPResult<PassOutcome> {
        let block = match graph.layer(id).kind() {
            LayerKind::BatchToSpaceNd(desc)
                if desc.has_zero_crops()
                    && desc.block_shape.len() == 2
                    && desc.block_shape[0] == desc.block_shape[1] =>
            {
                desc.block_shape[0]
            }
            _ => return Ok(PassOutcome::Unchanged),
        };
        let producer = match graph.layer(id).input(0).source() {
            Some(p) => p,
            None => return Ok(PassOutcome::Unchanged),
        };
        if !self.matches_shuffle(graph.layer(producer.layer).kind()) {
            return Ok(PassOutcome::Unchanged);
        }
        if !sole_consumer(graph, producer, id) {
            return Ok(PassOutcome::Unchanged);
        }
        let shuffle_id = producer.layer;
        let shuffle_producer = match graph.layer(shuffle_id).input(0).source() {
            Some(p) => p,
            None => return Ok(PassOutcome::Unchanged),
        };

        let name = graph.layer(id).name().to_string();
        let d2s = Layer::new(
            LayerKind::DepthToSpace(DepthToSpaceDescriptor {
                block_size: block,
                data_layout: DataLayout::Nhwc,
            }),
            name,
        )?;
        let new_id = graph.add_layer(d2s);
        graph.connect(shuffle_producer, graph.input_ref(new_id, 0))?;
        if let Some(info) = graph.layer(id).output_info(0).cloned() {
            graph.layer_mut(new_id).set_output_info(0, info);
        }
        graph.move_consumers(graph.output_ref(id, 0), graph.output_ref(new_id, 0));
        graph.disconnect(graph.input_ref(id, 0));
        graph.erase(id)?;
        graph.erase(shuffle_id)?;
        Ok(PassOutcome::Substituted)
    }
}
