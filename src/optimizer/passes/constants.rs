//! Constant-layer normalization: folding shuffles and dequantizations into
//! stored constant data, and converting constant buffers between float
//! widths to match their slots.

use crate::errors::TPResult;
use crate::graph::descriptors::validate_permutation;
use crate::graph::{Graph, LayerKind};
use crate::optimizer::passes::{bypass_unary, sole_consumer};
use crate::optimizer::{Pass, PassOutcome};
use crate::types::{DataType, LayerId};

/// Fold a permute or transpose that only feeds a constant's single consumer
/// chain into the constant's stored data.
pub struct FusePermuteIntoConstLayer;

impl Pass for FusePermuteIntoConstLayer {
    fn name(&self) -> &str {
        "FusePermuteIntoConstLayer"
    }

    fn run(&self, graph: &mut Graph, id: LayerId) -> TPResult<PassOutcome> {
        // Normalize both conventions to the source-major mapping.
        let mappings: Vec<usize> = match graph.layer(id).kind() {
            LayerKind::Permute(desc) => desc.mappings.clone(),
            LayerKind::Transpose(desc) => {
                let mut inverse = vec![0usize; desc.mappings.len()];
                validate_permutation(&desc.mappings)?;
                for (dst, &src) in desc.mappings.iter().enumerate() {
                    inverse[src] = dst;
                }
                inverse
            }
            _ => return Ok(PassOutcome::Unchanged),
        };
        let producer = match graph.layer(id).input(0).source() {
            Some(p) => p,
            None => return Ok(PassOutcome::Unchanged),
        };
        if !matches!(graph.layer(producer.layer).kind(), LayerKind::Constant { .. })
            || !sole_consumer(graph, producer, id)
        {
            return Ok(PassOutcome::Unchanged);
        }

        let permuted = match graph.layer(producer.layer).kind() {
            LayerKind::Constant { tensor } => tensor.permuted(&mappings)?,
            _ => unreachable!(),
        };
        let new_info = permuted.info().clone();
        if let LayerKind::Constant { tensor } = graph.layer_mut(producer.layer).kind_mut() {
            *tensor = permuted;
        }
        graph.layer_mut(producer.layer).set_output_info(0, new_info);
        bypass_unary(graph, id)?;
        Ok(PassOutcome::Substituted)
    }
}

/// Collapse a constant feeding a dequantize into a single constant of the
/// dequantized type.
pub struct ConvertConstDequantisationLayersToConstLayers;

impl Pass for ConvertConstDequantisationLayersToConstLayers {
    fn name(&self) -> &str {
        "ConvertConstDequantisationLayersToConstLayers"
    }

    fn run(&self, graph: &mut Graph, id: LayerId) -> TPResult<PassOutcome> {
        if !matches!(graph.layer(id).kind(), LayerKind::Dequantize) {
            return Ok(PassOutcome::Unchanged);
        }
        let producer = match graph.layer(id).input(0).source() {
            Some(p) => p,
            None => return Ok(PassOutcome::Unchanged),
        };
        if !matches!(graph.layer(producer.layer).kind(), LayerKind::Constant { .. })
            || !sole_consumer(graph, producer, id)
        {
            return Ok(PassOutcome::Unchanged);
        }

        let dequantized = match graph.layer(producer.layer).kind() {
            LayerKind::Constant { tensor } => tensor.to_f32()?,
            _ => unreachable!(),
        };
        let new_info = dequantized.info().clone();
        if let LayerKind::Constant { tensor } = graph.layer_mut(producer.layer).kind_mut() {
            *tensor = dequantized;
        }
        graph.layer_mut(producer.layer).set_output_info(0, new_info);
        bypass_unary(graph, id)?;
        Ok(PassOutcome::Substituted)
    }
}

/// Narrow f32 constant buffers to f16 wherever the owning slot already
/// advertises float16 data. Rewrites allocate fresh buffers; shared clones
/// keep the old ones.
pub struct ConvertConstantsFloatToHalf;

impl Pass for ConvertConstantsFloatToHalf {
    fn name(&self) -> &str {
        "ConvertConstantsFloatToHalf"
    }

    fn run(&self, graph: &mut Graph, id: LayerId) -> TPResult<PassOutcome> {
        let layer = graph.layer(id);
        let wants_f16 = layer.num_outputs() > 0
            && layer
                .output_info(0)
                .map(|info| info.data_type == DataType::Float16)
                .unwrap_or(false);
        if !wants_f16 {
            return Ok(PassOutcome::Unchanged);
        }
        let layer = graph.layer_mut(id);
        for tensor in layer.kind_mut().const_tensors_mut() {
            if tensor.data_type() == DataType::Float32 {
                *tensor = tensor.to_f16()?;
            }
        }
        Ok(PassOutcome::Unchanged)
    }
}

/// Widen f16 constant buffers to f32 wherever the owning slot advertises
/// float32 data, e.g. after a fallback path rewrote the slot.
pub struct ConvertConstantsHalfToFloat;

impl Pass for ConvertConstantsHalfToFloat {
    fn name(&self) -> &str {
        "ConvertConstantsHalfToFloat"
    }

    fn run(&self, graph: &mut Graph, id: LayerId) -> TPResult<PassOutcome> {
        let layer = graph.layer(id);
        let wants_f32 = layer.num_outputs() > 0
            && layer
                .output_info(0)
                .map(|info| info.data_type == DataType::Float32)
                .unwrap_or(false);
        if !wants_f32 {
            return Ok(PassOutcome::Unchanged);
        }
        let layer = graph.layer_mut(id);
        for tensor in layer.kind_mut().const_tensors_mut() {
            if tensor.data_type() == DataType::Float16 {
                *tensor = tensor.to_f32()?;
            }
        }
        Ok(PassOutcome::Unchanged)
    }
}

/// Normalize depthwise weights from the builder's [M, I, Hk, Wk] layout to
/// the accelerated backends' [1, Hk, Wk, I*M] layout.
pub struct PermuteDepthwiseConv2dWeights;

impl Pass for PermuteDepthwiseConv2dWeights {
    fn name(&self) -> &str {
        "PermuteDepthwiseConv2dWeights"
    }

    fn run(&self, graph: &mut Graph, id: LayerId) -> TPResult<PassOutcome> {
        let needs_permute = match graph.layer(id).kind() {
            LayerKind::DepthwiseConvolution2d { weights, .. } => {
                weights.shape().rank() == 4 && weights.shape().dims()[0] != 1
            }
            _ => false,
        };
        if !needs_permute {
            return Ok(PassOutcome::Unchanged);
        }
        if let LayerKind::DepthwiseConvolution2d { weights, .. } =
            graph.layer_mut(id).kind_mut()
        {
            let dims = weights.shape().dims().to_vec();
            // [M, I, Hk, Wk] -> [Hk, Wk, I, M] in memory, read as [1, Hk, Wk, I*M].
            let rearranged = weights.permuted(&[3, 2, 0, 1])?;
            *weights = rearranged.reshaped(&[1, dims[2], dims[3], dims[1] * dims[0]])?;
        }
        Ok(PassOutcome::Unchanged)
    }
}
