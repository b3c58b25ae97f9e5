//! Folding a batch normalization into the weights and bias of the
//! convolution that feeds it.

use crate::errors::{TPError, TPResult};
use crate::graph::{Graph, Layer, LayerKind};
use crate::optimizer::passes::sole_consumer;
use crate::optimizer::{Pass, PassOutcome};
use crate::tensor::ConstTensor;
use crate::types::{DataType, LayerId, Shape, TensorInfo};
use ndarray::{ArrayD, Dimension, IxDyn};

/// Fuse a batch normalization into a preceding (depthwise) convolution by
/// rewriting the convolution's weights and bias. Separate instances gate on
/// float32 and float16 weights.
pub struct FuseBatchNormIntoConvolution2d {
    depthwise: bool,
    data_type: DataType,
}

impl FuseBatchNormIntoConvolution2d {
    pub fn conv_f32() -> Self {
        Self {
            depthwise: false,
            data_type: DataType::Float32,
        }
    }

    pub fn conv_f16() -> Self {
        Self {
            depthwise: false,
            data_type: DataType::Float16,
        }
    }

    pub fn depthwise_f32() -> Self {
        Self {
            depthwise: true,
            data_type: DataType::Float32,
        }
    }

    pub fn depthwise_f16() -> Self {
        Self {
            depthwise: true,
            data_type: DataType::Float16,
        }
    }

    fn back_to_stored_type(&self, tensor: ConstTensor) -> TPResult<ConstTensor> {
        match self.data_type {
            DataType::Float16 => tensor.to_f16(),
            _ => Ok(tensor),
        }
    }
}

/// The output channel a weight element scales with, given the weight layout.
fn depthwise_channel(index: &[usize], dims: &[usize]) -> usize {
    if dims[0] == 1 {
        // normalized [1, H, W, I*M]
        index[3]
    } else {
        // as built: [M, I, H, W] maps to channel i*M + m
        index[1] * dims[0] + index[0]
    }
}

impl Pass for FuseBatchNormIntoConvolution2d {
    fn name(&self) -> &str {
        match (self.depthwise, self.data_type) {
            (false, DataType::Float16) => "FuseBatchNormIntoConvolution2dFloat16",
            (false, _) => "FuseBatchNormIntoConvolution2dFloat32",
            (true, DataType::Float16) => "FuseBatchNormIntoDepthwiseConvolution2dFloat16",
            (true, _) => "FuseBatchNormIntoDepthwiseConvolution2dFloat32",
        }
    }

    fn run(&self, graph: &mut Graph, id: LayerId) -> TPResult<PassOutcome> {
        let (eps, bn_mean, bn_var, bn_beta, bn_gamma) = match graph.layer(id).kind() {
            LayerKind::BatchNormalization {
                desc,
                mean,
                variance,
                beta,
                gamma,
            } => (
                desc.eps,
                mean.clone(),
                variance.clone(),
                beta.clone(),
                gamma.clone(),
            ),
            _ => return Ok(PassOutcome::Unchanged),
        };
        let producer = match graph.layer(id).input(0).source() {
            Some(p) => p,
            None => return Ok(PassOutcome::Unchanged),
        };
        if !sole_consumer(graph, producer, id) {
            return Ok(PassOutcome::Unchanged);
        }
        let conv_id = producer.layer;
        let matches = match graph.layer(conv_id).kind() {
            LayerKind::Convolution2d { weights, .. } if !self.depthwise => {
                weights.data_type() == self.data_type
            }
            LayerKind::DepthwiseConvolution2d { weights, .. } if self.depthwise => {
                weights.data_type() == self.data_type
            }
            _ => false,
        };
        if !matches {
            return Ok(PassOutcome::Unchanged);
        }

        let (weights, bias) = match graph.layer(conv_id).kind() {
            LayerKind::Convolution2d { weights, bias, .. }
            | LayerKind::DepthwiseConvolution2d { weights, bias, .. } => {
                (weights.clone(), bias.clone())
            }
            _ => unreachable!(),
        };

        let mean: Vec<f32> = bn_mean.to_f32_values()?.iter().copied().collect();
        let var: Vec<f32> = bn_var.to_f32_values()?.iter().copied().collect();
        let beta: Vec<f32> = bn_beta.to_f32_values()?.iter().copied().collect();
        let gamma: Vec<f32> = bn_gamma.to_f32_values()?.iter().copied().collect();
        let channels = mean.len();
        let factor: Vec<f32> = (0..channels)
            .map(|c| gamma[c] / (var[c] + eps).sqrt())
            .collect();

        let mut new_weights = weights.to_f32_values()?;
        let wdims: Vec<usize> = new_weights.shape().to_vec();
        for (index, value) in new_weights.indexed_iter_mut() {
            let idx = index.slice();
            let c = if self.depthwise {
                depthwise_channel(idx, &wdims)
            } else {
                idx[0]
            };
            *value *= factor[c];
        }

        let old_bias: Vec<f32> = match &bias {
            Some(b) => b.to_f32_values()?.iter().copied().collect(),
            None => vec![0.0; channels],
        };
        let new_bias: Vec<f32> = (0..channels)
            .map(|c| (old_bias[c] - mean[c]) * factor[c] + beta[c])
            .collect();

        let fused_weights = self.back_to_stored_type(ConstTensor::from_f32_values(
            weights.info().clone().with_data_type(DataType::Float32),
            new_weights,
        )?)?;
        let fused_bias = self.back_to_stored_type(ConstTensor::from_f32_values(
            TensorInfo::new(Shape::new(&[channels]), DataType::Float32).with_constant(true),
            ArrayD::from_shape_vec(IxDyn(&[channels]), new_bias)
                .map_err(|e| TPError::Graph(format!("fused bias shape: {e}")))?,
        )?)?;

        let fused_kind = match graph.layer(conv_id).kind() {
            LayerKind::Convolution2d { desc, .. } => {
                let mut desc = desc.clone();
                desc.bias_enabled = true;
                LayerKind::Convolution2d {
                    desc,
                    weights: fused_weights,
                    bias: Some(fused_bias),
                }
            }
            LayerKind::DepthwiseConvolution2d { desc, .. } => {
                let mut desc = desc.clone();
                desc.bias_enabled = true;
                LayerKind::DepthwiseConvolution2d {
                    desc,
                    weights: fused_weights,
                    bias: Some(fused_bias),
                }
            }
            _ => unreachable!(),
        };

        let conv_producer = match graph.layer(conv_id).input(0).source() {
            Some(p) => p,
            None => return Ok(PassOutcome::Unchanged),
        };
        let name = graph.layer(conv_id).name().to_string();
        let fused_id = graph.add_layer(Layer::new(fused_kind, name)?);
        graph.connect(conv_producer, graph.input_ref(fused_id, 0))?;
        if let Some(info) = graph.layer(id).output_info(0).cloned() {
            graph.layer_mut(fused_id).set_output_info(0, info);
        }
        graph.move_consumers(graph.output_ref(id, 0), graph.output_ref(fused_id, 0));
        graph.disconnect(graph.input_ref(id, 0));
        graph.erase(id)?;
        graph.erase(conv_id)?;
        Ok(PassOutcome::Substituted)
    }
}
