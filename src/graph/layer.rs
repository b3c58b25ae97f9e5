use crate::errors::{TPError, TPResult};
use crate::graph::descriptors::*;
use crate::tensor::ConstTensor;
use crate::types::{BackendId, BindingId, EdgeStrategy, FactoryId, LayerId, TensorInfo};

/// Reference to an output slot: (owning layer, slot index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputSlotRef {
    pub layer: LayerId,
    pub slot: usize,
}

/// Reference to an input slot: (owning layer, slot index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputSlotRef {
    pub layer: LayerId,
    pub slot: usize,
}

/// Consumes at most one edge.
#[derive(Debug, Clone, Default)]
pub struct InputSlot {
    pub(crate) source: Option<OutputSlotRef>,
}

impl InputSlot {
    pub fn source(&self) -> Option<OutputSlotRef> {
        self.source
    }

    pub fn is_connected(&self) -> bool {
        self.source.is_some()
    }
}

/// Feeds any number of consumers; carries the produced tensor's info, the
/// chosen handle factory and one edge strategy per consumer.
#[derive(Debug, Clone)]
pub struct OutputSlot {
    pub(crate) info: Option<TensorInfo>,
    pub(crate) consumers: Vec<InputSlotRef>,
    pub(crate) factory: FactoryId,
    pub(crate) strategies: Vec<EdgeStrategy>,
}

impl OutputSlot {
    pub(crate) fn new() -> Self {
        Self {
            info: None,
            consumers: Vec::new(),
            factory: FactoryId::legacy(),
            strategies: Vec::new(),
        }
    }

    pub fn info(&self) -> Option<&TensorInfo> {
        self.info.as_ref()
    }

    pub fn consumers(&self) -> &[InputSlotRef] {
        &self.consumers
    }

    pub fn factory(&self) -> &FactoryId {
        &self.factory
    }

    pub fn strategies(&self) -> &[EdgeStrategy] {
        &self.strategies
    }
}

/// Optional parameter groups of an LSTM layer. Group presence must agree
/// with the descriptor flags.
#[derive(Debug, Clone)]
pub struct LstmParams {
    pub basic: LstmBasicParams,
    /// Input-gate parameters, required when CIFG is disabled.
    pub cifg: Option<LstmCifgParams>,
    pub projection: Option<LstmProjectionParams>,
    pub peephole: Option<LstmPeepholeParams>,
    pub layer_norm: Option<LstmLayerNormParams>,
}

#[derive(Debug, Clone)]
pub struct LstmBasicParams {
    pub input_to_forget_weights: ConstTensor,
    pub input_to_cell_weights: ConstTensor,
    pub input_to_output_weights: ConstTensor,
    pub recurrent_to_forget_weights: ConstTensor,
    pub recurrent_to_cell_weights: ConstTensor,
    pub recurrent_to_output_weights: ConstTensor,
    pub forget_gate_bias: ConstTensor,
    pub cell_bias: ConstTensor,
    pub output_gate_bias: ConstTensor,
}

#[derive(Debug, Clone)]
pub struct LstmCifgParams {
    pub input_to_input_weights: ConstTensor,
    pub recurrent_to_input_weights: ConstTensor,
    pub input_gate_bias: ConstTensor,
}

#[derive(Debug, Clone)]
pub struct LstmProjectionParams {
    pub projection_weights: ConstTensor,
    pub projection_bias: Option<ConstTensor>,
}

#[derive(Debug, Clone)]
pub struct LstmPeepholeParams {
    /// Required when CIFG is disabled.
    pub cell_to_input_weights: Option<ConstTensor>,
    pub cell_to_forget_weights: ConstTensor,
    pub cell_to_output_weights: ConstTensor,
}

#[derive(Debug, Clone)]
pub struct LstmLayerNormParams {
    /// Required when CIFG is disabled.
    pub input_layer_norm_weights: Option<ConstTensor>,
    pub forget_layer_norm_weights: ConstTensor,
    pub cell_layer_norm_weights: ConstTensor,
    pub output_layer_norm_weights: ConstTensor,
}

/// The closed set of operation kinds a layer can have, with per-kind
/// parameter payloads. Constant tensors owned here share storage across
/// clones.
#[derive(Debug, Clone)]
pub enum LayerKind {
    Input {
        binding: BindingId,
    },
    Output {
        binding: BindingId,
    },
    Activation(ActivationDescriptor),
    ElementwiseBinary(BinaryOp),
    ElementwiseUnary(UnaryOp),
    Comparison(ComparisonOp),
    LogicalBinary(LogicalOp),
    Softmax(SoftmaxDescriptor),
    FullyConnected {
        desc: FullyConnectedDescriptor,
        weights: ConstTensor,
        bias: Option<ConstTensor>,
    },
    Convolution2d {
        desc: Convolution2dDescriptor,
        weights: ConstTensor,
        bias: Option<ConstTensor>,
    },
    DepthwiseConvolution2d {
        desc: DepthwiseConvolution2dDescriptor,
        weights: ConstTensor,
        bias: Option<ConstTensor>,
    },
    Pooling2d(Pooling2dDescriptor),
    Pooling3d(Pooling3dDescriptor),
    BatchNormalization {
        desc: BatchNormalizationDescriptor,
        mean: ConstTensor,
        variance: ConstTensor,
        beta: ConstTensor,
        gamma: ConstTensor,
    },
    InstanceNormalization(InstanceNormalizationDescriptor),
    L2Normalization(L2NormalizationDescriptor),
    Normalization(NormalizationDescriptor),
    Reshape(ReshapeDescriptor),
    Permute(PermuteDescriptor),
    Transpose(TransposeDescriptor),
    Concat(OriginsDescriptor),
    Splitter(ViewsDescriptor),
    Constant {
        tensor: ConstTensor,
    },
    Dequantize,
    Quantize,
    Cast(CastDescriptor),
    Pad(PadDescriptor),
    Mean(MeanDescriptor),
    Reduce(ReduceDescriptor),
    SpaceToBatchNd(SpaceToBatchNdDescriptor),
    BatchToSpaceNd(BatchToSpaceNdDescriptor),
    SpaceToDepth(SpaceToDepthDescriptor),
    DepthToSpace(DepthToSpaceDescriptor),
    BroadcastTo(BroadcastToDescriptor),
    Lstm {
        desc: LstmDescriptor,
        params: LstmParams,
    },
    BatchMatMul(BatchMatMulDescriptor),
    Gather(GatherDescriptor),
    GatherNd,
    Slice(SliceDescriptor),
    StridedSlice(StridedSliceDescriptor),
    Stack(StackDescriptor),
    Tile(TileDescriptor),
    Resize(ResizeDescriptor),
    Prelu,
    ChannelShuffle(ChannelShuffleDescriptor),
    Rank,
    Shape,
    ScatterNd,
    DetectionPostProcess {
        desc: DetectionPostProcessDescriptor,
        anchors: ConstTensor,
    },
    FakeQuantization(FakeQuantizationDescriptor),
    MemCopy,
    MemImport,
    ConvertFp16ToFp32,
    ConvertFp32ToFp16,
    Debug {
        to_file: bool,
    },
    Precompiled(PrecompiledDescriptor),
    StandIn(StandInDescriptor),
    Fused(FusedDescriptor),
}

impl LayerKind {
    /// (number of input slots, number of output slots) for this kind.
    pub fn arity(&self) -> (usize, usize) {
        match self {
            LayerKind::Input { .. } => (0, 1),
            LayerKind::Output { .. } => (1, 0),
            LayerKind::Activation(_)
            | LayerKind::ElementwiseUnary(_)
            | LayerKind::Softmax(_)
            | LayerKind::FullyConnected { .. }
            | LayerKind::Convolution2d { .. }
            | LayerKind::DepthwiseConvolution2d { .. }
            | LayerKind::Pooling2d(_)
            | LayerKind::Pooling3d(_)
            | LayerKind::BatchNormalization { .. }
            | LayerKind::InstanceNormalization(_)
            | LayerKind::L2Normalization(_)
            | LayerKind::Normalization(_)
            | LayerKind::Reshape(_)
            | LayerKind::Permute(_)
            | LayerKind::Transpose(_)
            | LayerKind::Dequantize
            | LayerKind::Quantize
            | LayerKind::Cast(_)
            | LayerKind::Pad(_)
            | LayerKind::Mean(_)
            | LayerKind::Reduce(_)
            | LayerKind::SpaceToBatchNd(_)
            | LayerKind::BatchToSpaceNd(_)
            | LayerKind::SpaceToDepth(_)
            | LayerKind::DepthToSpace(_)
            | LayerKind::BroadcastTo(_)
            | LayerKind::Slice(_)
            | LayerKind::StridedSlice(_)
            | LayerKind::Tile(_)
            | LayerKind::Resize(_)
            | LayerKind::ChannelShuffle(_)
            | LayerKind::Rank
            | LayerKind::Shape
            | LayerKind::FakeQuantization(_)
            | LayerKind::MemCopy
            | LayerKind::MemImport
            | LayerKind::ConvertFp16ToFp32
            | LayerKind::ConvertFp32ToFp16
            | LayerKind::Debug { .. } => (1, 1),
            LayerKind::ElementwiseBinary(_)
            | LayerKind::Comparison(_)
            | LayerKind::LogicalBinary(_)
            | LayerKind::BatchMatMul(_)
            | LayerKind::Gather(_)
            | LayerKind::GatherNd
            | LayerKind::Prelu => (2, 1),
            LayerKind::Concat(desc) => (desc.num_views(), 1),
            LayerKind::Splitter(desc) => (1, desc.num_views()),
            LayerKind::Constant { .. } => (0, 1),
            LayerKind::Lstm { .. } => (3, 4),
            LayerKind::Stack(desc) => (desc.num_inputs, 1),
            LayerKind::ScatterNd => (3, 1),
            LayerKind::DetectionPostProcess { .. } => (2, 4),
            LayerKind::Precompiled(desc) => (desc.num_inputs, desc.num_outputs),
            LayerKind::StandIn(desc) => (desc.num_inputs, desc.num_outputs),
            LayerKind::Fused(desc) => (desc.num_inputs, desc.num_outputs),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LayerKind::Input { .. } => "Input",
            LayerKind::Output { .. } => "Output",
            LayerKind::Activation(_) => "Activation",
            LayerKind::ElementwiseBinary(op) => match op {
                BinaryOp::Add => "Addition",
                BinaryOp::Sub => "Subtraction",
                BinaryOp::Mul => "Multiplication",
                BinaryOp::Div => "Division",
                BinaryOp::Maximum => "Maximum",
                BinaryOp::Minimum => "Minimum",
                BinaryOp::Power => "Power",
                BinaryOp::SquaredDifference => "SquaredDifference",
            },
            LayerKind::ElementwiseUnary(op) => match op {
                UnaryOp::Abs => "Abs",
                UnaryOp::Ceil => "Ceil",
                UnaryOp::Exp => "Exp",
                UnaryOp::Floor => "Floor",
                UnaryOp::Log => "Log",
                UnaryOp::Neg => "Neg",
                UnaryOp::Rsqrt => "Rsqrt",
                UnaryOp::Sin => "Sin",
                UnaryOp::Sqrt => "Sqrt",
            },
            LayerKind::Comparison(_) => "Comparison",
            LayerKind::LogicalBinary(_) => "LogicalBinary",
            LayerKind::Softmax(_) => "Softmax",
            LayerKind::FullyConnected { .. } => "FullyConnected",
            LayerKind::Convolution2d { .. } => "Convolution2d",
            LayerKind::DepthwiseConvolution2d { .. } => "DepthwiseConvolution2d",
            LayerKind::Pooling2d(_) => "Pooling2d",
            LayerKind::Pooling3d(_) => "Pooling3d",
            LayerKind::BatchNormalization { .. } => "BatchNormalization",
            LayerKind::InstanceNormalization(_) => "InstanceNormalization",
            LayerKind::L2Normalization(_) => "L2Normalization",
            LayerKind::Normalization(_) => "Normalization",
            LayerKind::Reshape(_) => "Reshape",
            LayerKind::Permute(_) => "Permute",
            LayerKind::Transpose(_) => "Transpose",
            LayerKind::Concat(_) => "Concat",
            LayerKind::Splitter(_) => "Splitter",
            LayerKind::Constant { .. } => "Constant",
            LayerKind::Dequantize => "Dequantize",
            LayerKind::Quantize => "Quantize",
            LayerKind::Cast(_) => "Cast",
            LayerKind::Pad(_) => "Pad",
            LayerKind::Mean(_) => "Mean",
            LayerKind::Reduce(_) => "Reduce",
            LayerKind::SpaceToBatchNd(_) => "SpaceToBatchNd",
            LayerKind::BatchToSpaceNd(_) => "BatchToSpaceNd",
            LayerKind::SpaceToDepth(_) => "SpaceToDepth",
            LayerKind::DepthToSpace(_) => "DepthToSpace",
            LayerKind::BroadcastTo(_) => "BroadcastTo",
            LayerKind::Lstm { .. } => "Lstm",
            LayerKind::BatchMatMul(_) => "BatchMatMul",
            LayerKind::Gather(_) => "Gather",
            LayerKind::GatherNd => "GatherNd",
            LayerKind::Slice(_) => "Slice",
            LayerKind::StridedSlice(_) => "StridedSlice",
            LayerKind::Stack(_) => "Stack",
            LayerKind::Tile(_) => "Tile",
            LayerKind::Resize(_) => "Resize",
            LayerKind::Prelu => "Prelu",
            LayerKind::ChannelShuffle(_) => "ChannelShuffle",
            LayerKind::Rank => "Rank",
            LayerKind::Shape => "Shape",
            LayerKind::ScatterNd => "ScatterNd",
            LayerKind::DetectionPostProcess { .. } => "DetectionPostProcess",
            LayerKind::FakeQuantization(_) => "FakeQuantization",
            LayerKind::MemCopy => "MemCopy",
            LayerKind::MemImport => "MemImport",
            LayerKind::ConvertFp16ToFp32 => "ConvertFp16ToFp32",
            LayerKind::ConvertFp32ToFp16 => "ConvertFp32ToFp16",
            LayerKind::Debug { .. } => "Debug",
            LayerKind::Precompiled(_) => "Precompiled",
            LayerKind::StandIn(_) => "StandIn",
            LayerKind::Fused(_) => "Fused",
        }
    }

    /// Construction-time invariants of the kind's parameters.
    pub fn validate(&self) -> TPResult<()> {
        match self {
            LayerKind::Convolution2d { desc, weights, bias } => {
                desc.validate()?;
                if weights.shape().rank() != 4 {
                    return Err(TPError::invalid_argument(
                        "convolution weights must have rank 4",
                    ));
                }
                if desc.bias_enabled && bias.is_none() {
                    return Err(TPError::invalid_argument(
                        "biased convolution is missing its bias tensor",
                    ));
                }
                Ok(())
            }
            LayerKind::DepthwiseConvolution2d { desc, weights, bias } => {
                desc.validate()?;
                if weights.shape().rank() != 4 {
                    return Err(TPError::invalid_argument(
                        "depthwise convolution weights must have rank 4",
                    ));
                }
                if desc.bias_enabled && bias.is_none() {
                    return Err(TPError::invalid_argument(
                        "biased depthwise convolution is missing its bias tensor",
                    ));
                }
                Ok(())
            }
            LayerKind::FullyConnected { desc, weights, bias } => {
                if weights.shape().rank() != 2 {
                    return Err(TPError::invalid_argument(
                        "fully connected weights must have rank 2",
                    ));
                }
                if desc.bias_enabled && bias.is_none() {
                    return Err(TPError::invalid_argument(
                        "biased fully connected layer is missing its bias tensor",
                    ));
                }
                Ok(())
            }
            LayerKind::Pooling2d(desc) => desc.validate(),
            LayerKind::Pooling3d(desc) => desc.validate(),
            LayerKind::Normalization(desc) => desc.validate(),
            LayerKind::Permute(desc) => desc.validate(),
            LayerKind::Transpose(desc) => desc.validate(),
            LayerKind::Concat(desc) => desc.validate(),
            LayerKind::Splitter(desc) => desc.validate(),
            LayerKind::StridedSlice(desc) => desc.validate(),
            LayerKind::Stack(desc) => {
                if desc.num_inputs == 0 {
                    return Err(TPError::invalid_argument("stack requires at least one input"));
                }
                if desc.axis > desc.input_shape.rank() {
                    return Err(TPError::invalid_argument("stack axis out of range"));
                }
                Ok(())
            }
            LayerKind::Tile(desc) => {
                if desc.multiples.iter().any(|&m| m == 0) {
                    return Err(TPError::invalid_argument("tile multiples must be non-zero"));
                }
                Ok(())
            }
            LayerKind::ChannelShuffle(desc) => {
                if desc.num_groups == 0 {
                    return Err(TPError::invalid_argument(
                        "channel shuffle requires at least one group",
                    ));
                }
                Ok(())
            }
            LayerKind::Lstm { desc, params } => validate_lstm(desc, params),
            _ => Ok(()),
        }
    }

    /// Constant tensors owned by this kind, in a stable order.
    pub fn const_tensors(&self) -> Vec<&ConstTensor> {
        let mut out = Vec::new();
        match self {
            LayerKind::Constant { tensor } => out.push(tensor),
            LayerKind::Convolution2d { weights, bias, .. }
            | LayerKind::DepthwiseConvolution2d { weights, bias, .. }
            | LayerKind::FullyConnected { weights, bias, .. } => {
                out.push(weights);
                if let Some(b) = bias {
                    out.push(b);
                }
            }
            LayerKind::BatchNormalization {
                mean,
                variance,
                beta,
                gamma,
                ..
            } => {
                out.extend([mean, variance, beta, gamma]);
            }
            LayerKind::DetectionPostProcess { anchors, .. } => out.push(anchors),
            LayerKind::Lstm { params, .. } => {
                let b = &params.basic;
                out.extend([
                    &b.input_to_forget_weights,
                    &b.input_to_cell_weights,
                    &b.input_to_output_weights,
                    &b.recurrent_to_forget_weights,
                    &b.recurrent_to_cell_weights,
                    &b.recurrent_to_output_weights,
                    &b.forget_gate_bias,
                    &b.cell_bias,
                    &b.output_gate_bias,
                ]);
                if let Some(g) = &params.cifg {
                    out.extend([
                        &g.input_to_input_weights,
                        &g.recurrent_to_input_weights,
                        &g.input_gate_bias,
                    ]);
                }
                if let Some(g) = &params.projection {
                    out.push(&g.projection_weights);
                    if let Some(b) = &g.projection_bias {
                        out.push(b);
                    }
                }
                if let Some(g) = &params.peephole {
                    if let Some(t) = &g.cell_to_input_weights {
                        out.push(t);
                    }
                    out.extend([&g.cell_to_forget_weights, &g.cell_to_output_weights]);
                }
                if let Some(g) = &params.layer_norm {
                    if let Some(t) = &g.input_layer_norm_weights {
                        out.push(t);
                    }
                    out.extend([
                        &g.forget_layer_norm_weights,
                        &g.cell_layer_norm_weights,
                        &g.output_layer_norm_weights,
                    ]);
                }
            }
            _ => {}
        }
        out
    }

    /// Mutable access to the owned constant tensors, same order as
    /// [`LayerKind::const_tensors`].
    pub fn const_tensors_mut(&mut self) -> Vec<&mut ConstTensor> {
        let mut out = Vec::new();
        match self {
            LayerKind::Constant { tensor } => out.push(tensor),
            LayerKind::Convolution2d { weights, bias, .. }
            | LayerKind::DepthwiseConvolution2d { weights, bias, .. }
            | LayerKind::FullyConnected { weights, bias, .. } => {
                out.push(weights);
                if let Some(b) = bias {
                    out.push(b);
                }
            }
            LayerKind::BatchNormalization {
                mean,
                variance,
                beta,
                gamma,
                ..
            } => {
                out.push(mean);
                out.push(variance);
                out.push(beta);
                out.push(gamma);
            }
            LayerKind::DetectionPostProcess { anchors, .. } => out.push(anchors),
            LayerKind::Lstm { params, .. } => {
                let b = &mut params.basic;
                out.push(&mut b.input_to_forget_weights);
                out.push(&mut b.input_to_cell_weights);
                out.push(&mut b.input_to_output_weights);
                out.push(&mut b.recurrent_to_forget_weights);
                out.push(&mut b.recurrent_to_cell_weights);
                out.push(&mut b.recurrent_to_output_weights);
                out.push(&mut b.forget_gate_bias);
                out.push(&mut b.cell_bias);
                out.push(&mut b.output_gate_bias);
                if let Some(g) = &mut params.cifg {
                    out.push(&mut g.input_to_input_weights);
                    out.push(&mut g.recurrent_to_input_weights);
                    out.push(&mut g.input_gate_bias);
                }
                if let Some(g) = &mut params.projection {
                    out.push(&mut g.projection_weights);
                    if let Some(bias) = &mut g.projection_bias {
                        out.push(bias);
                    }
                }
                if let Some(g) = &mut params.peephole {
                    if let Some(t) = &mut g.cell_to_input_weights {
                        out.push(t);
                    }
                    out.push(&mut g.cell_to_forget_weights);
                    out.push(&mut g.cell_to_output_weights);
                }
                if let Some(g) = &mut params.layer_norm {
                    if let Some(t) = &mut g.input_layer_norm_weights {
                        out.push(t);
                    }
                    out.push(&mut g.forget_layer_norm_weights);
                    out.push(&mut g.cell_layer_norm_weights);
                    out.push(&mut g.output_layer_norm_weights);
                }
            }
            _ => {}
        }
        out
    }
}

fn validate_lstm(desc: &LstmDescriptor, params: &LstmParams) -> TPResult<()> {
    if !desc.cifg_enabled && params.cifg.is_none() {
        return Err(TPError::invalid_argument(
            "LSTM with CIFG disabled requires input-gate weights and bias",
        ));
    }
    if desc.cifg_enabled && params.cifg.is_some() {
        return Err(TPError::invalid_argument(
            "LSTM with CIFG enabled must not carry input-gate parameters",
        ));
    }
    if desc.projection_enabled != params.projection.is_some() {
        return Err(TPError::invalid_argument(
            "LSTM projection parameters must match the projection flag",
        ));
    }
    if desc.peephole_enabled != params.peephole.is_some() {
        return Err(TPError::invalid_argument(
            "LSTM peephole parameters must match the peephole flag",
        ));
    }
    if desc.layer_norm_enabled != params.layer_norm.is_some() {
        return Err(TPError::invalid_argument(
            "LSTM layer-norm parameters must match the layer-norm flag",
        ));
    }
    if let Some(peephole) = &params.peephole {
        if !desc.cifg_enabled && peephole.cell_to_input_weights.is_none() {
            return Err(TPError::invalid_argument(
                "LSTM peephole with CIFG disabled requires cell-to-input weights",
            ));
        }
    }
    if let Some(layer_norm) = &params.layer_norm {
        if !desc.cifg_enabled && layer_norm.input_layer_norm_weights.is_none() {
            return Err(TPError::invalid_argument(
                "LSTM layer norm with CIFG disabled requires input layer-norm weights",
            ));
        }
    }
    Ok(())
}

/// A node in the computation graph. Arity is fixed at construction; edits
/// proceed by substitution, never by changing slot counts.
#[derive(Debug, Clone)]
pub struct Layer {
    pub(crate) kind: LayerKind,
    pub(crate) name: String,
    pub(crate) backend: BackendId,
    pub(crate) hint: Option<BackendId>,
    pub(crate) inputs: Vec<InputSlot>,
    pub(crate) outputs: Vec<OutputSlot>,
}

impl Layer {
    pub fn new(kind: LayerKind, name: impl Into<String>) -> TPResult<Self> {
        kind.validate()?;
        let (num_in, num_out) = kind.arity();
        Ok(Self {
            kind,
            name: name.into(),
            backend: BackendId::unassigned(),
            hint: None,
            inputs: vec![InputSlot::default(); num_in],
            outputs: (0..num_out).map(|_| OutputSlot::new()).collect(),
        })
    }

    pub fn kind(&self) -> &LayerKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut LayerKind {
        &mut self.kind
    }

    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend(&self) -> &BackendId {
        &self.backend
    }

    pub fn set_backend(&mut self, backend: BackendId) {
        self.backend = backend;
    }

    pub fn hint(&self) -> Option<&BackendId> {
        self.hint.as_ref()
    }

    pub fn set_hint(&mut self, hint: Option<BackendId>) {
        self.hint = hint;
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn input(&self, slot: usize) -> &InputSlot {
        &self.inputs[slot]
    }

    pub fn output(&self, slot: usize) -> &OutputSlot {
        &self.outputs[slot]
    }

    pub fn output_mut(&mut self, slot: usize) -> &mut OutputSlot {
        &mut self.outputs[slot]
    }

    pub fn output_info(&self, slot: usize) -> Option<&TensorInfo> {
        self.outputs[slot].info.as_ref()
    }

    pub fn set_output_info(&mut self, slot: usize, info: TensorInfo) {
        self.outputs[slot].info = Some(info);
    }

    pub fn is_output_unconnected(&self) -> bool {
        !self.outputs.is_empty() && self.outputs.iter().all(|o| o.consumers.is_empty())
    }
}
