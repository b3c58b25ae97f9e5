use crate::errors::TPResult;
use crate::graph::descriptors::*;
use crate::graph::layer::{InputSlotRef, Layer, LayerKind, LstmParams, OutputSlotRef};
use crate::graph::Graph;
use crate::tensor::ConstTensor;
use crate::types::{BindingId, LayerId, TensorInfo};

/// Fluent facade for assembling a graph layer by layer. Each call returns a
/// stable layer reference whose slots can then be connected.
pub struct GraphBuilder<'a> {
    graph: &'a mut Graph,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(graph: &'a mut Graph) -> Self {
        Self { graph }
    }

    pub fn graph(&mut self) -> &mut Graph {
        &mut *self.graph
    }

    fn add(&mut self, kind: LayerKind, name: &str) -> TPResult<LayerId> {
        Ok(self.graph.add_layer(Layer::new(kind, name)?))
    }

    pub fn connect(&mut self, from: LayerId, to: LayerId) -> TPResult<()> {
        self.connect_slots(from, 0, to, 0)
    }

    pub fn connect_slots(
        &mut self,
        from: LayerId,
        from_slot: usize,
        to: LayerId,
        to_slot: usize,
    ) -> TPResult<()> {
        self.graph.connect(
            OutputSlotRef {
                layer: from,
                slot: from_slot,
            },
            InputSlotRef {
                layer: to,
                slot: to_slot,
            },
        )
    }

    pub fn set_output_info(&mut self, layer: LayerId, slot: usize, info: TensorInfo) {
        self.graph.layer_mut(layer).set_output_info(slot, info);
    }

    pub fn input(&mut self, binding: BindingId, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::Input { binding }, name)
    }

    pub fn output(&mut self, binding: BindingId, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::Output { binding }, name)
    }

    pub fn activation(&mut self, desc: ActivationDescriptor, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::Activation(desc), name)
    }

    pub fn elementwise_binary(&mut self, op: BinaryOp, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::ElementwiseBinary(op), name)
    }

    pub fn addition(&mut self, name: &str) -> TPResult<LayerId> {
        self.elementwise_binary(BinaryOp::Add, name)
    }

    pub fn multiplication(&mut self, name: &str) -> TPResult<LayerId> {
        self.elementwise_binary(BinaryOp::Mul, name)
    }

    pub fn elementwise_unary(&mut self, op: UnaryOp, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::ElementwiseUnary(op), name)
    }

    pub fn floor(&mut self, name: &str) -> TPResult<LayerId> {
        self.elementwise_unary(UnaryOp::Floor, name)
    }

    pub fn comparison(&mut self, op: ComparisonOp, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::Comparison(op), name)
    }

    pub fn logical_binary(&mut self, op: LogicalOp, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::LogicalBinary(op), name)
    }

    pub fn softmax(&mut self, desc: SoftmaxDescriptor, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::Softmax(desc), name)
    }

    pub fn fully_connected(
        &mut self,
        desc: FullyConnectedDescriptor,
        weights: ConstTensor,
        bias: Option<ConstTensor>,
        name: &str,
    ) -> TPResult<LayerId> {
        self.add(LayerKind::FullyConnected { desc, weights, bias }, name)
    }

    pub fn convolution2d(
        &mut self,
        desc: Convolution2dDescriptor,
        weights: ConstTensor,
        bias: Option<ConstTensor>,
        name: &str,
    ) -> TPResult<LayerId> {
        self.add(LayerKind::Convolution2d { desc, weights, bias }, name)
    }

    pub fn depthwise_convolution2d(
        &mut self,
        desc: DepthwiseConvolution2dDescriptor,
        weights: ConstTensor,
        bias: Option<ConstTensor>,
        name: &str,
    ) -> TPResult<LayerId> {
        self.add(
            LayerKind::DepthwiseConvolution2d { desc, weights, bias },
            name,
        )
    }

    pub fn pooling2d(&mut self, desc: Pooling2dDescriptor, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::Pooling2d(desc), name)
    }

    pub fn pooling3d(&mut self, desc: Pooling3dDescriptor, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::Pooling3d(desc), name)
    }

    pub fn batch_normalization(
        &mut self,
        desc: BatchNormalizationDescriptor,
        mean: ConstTensor,
        variance: ConstTensor,
        beta: ConstTensor,
        gamma: ConstTensor,
        name: &str,
    ) -> TPResult<LayerId> {
        self.add(
            LayerKind::BatchNormalization {
                desc,
                mean,
                variance,
                beta,
                gamma,
            },
            name,
        )
    }

    pub fn instance_normalization(
        &mut self,
        desc: InstanceNormalizationDescriptor,
        name: &str,
    ) -> TPResult<LayerId> {
        self.add(LayerKind::InstanceNormalization(desc), name)
    }

    pub fn l2_normalization(
        &mut self,
        desc: L2NormalizationDescriptor,
        name: &str,
    ) -> TPResult<LayerId> {
        self.add(LayerKind::L2Normalization(desc), name)
    }

    pub fn normalization(
        &mut self,
        desc: NormalizationDescriptor,
        name: &str,
    ) -> TPResult<LayerId> {
        self.add(LayerKind::Normalization(desc), name)
    }

    pub fn reshape(&mut self, desc: ReshapeDescriptor, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::Reshape(desc), name)
    }

    pub fn permute(&mut self, desc: PermuteDescriptor, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::Permute(desc), name)
    }

    pub fn transpose(&mut self, desc: TransposeDescriptor, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::Transpose(desc), name)
    }

    pub fn concat(&mut self, desc: OriginsDescriptor, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::Concat(desc), name)
    }

    pub fn splitter(&mut self, desc: ViewsDescriptor, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::Splitter(desc), name)
    }

    pub fn constant(&mut self, tensor: ConstTensor, name: &str) -> TPResult<LayerId> {
        let info = tensor.info().clone();
        let id = self.add(LayerKind::Constant { tensor }, name)?;
        self.graph.layer_mut(id).set_output_info(0, info);
        Ok(id)
    }

    pub fn dequantize(&mut self, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::Dequantize, name)
    }

    pub fn quantize(&mut self, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::Quantize, name)
    }

    pub fn cast(&mut self, desc: CastDescriptor, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::Cast(desc), name)
    }

    pub fn pad(&mut self, desc: PadDescriptor, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::Pad(desc), name)
    }

    pub fn mean(&mut self, desc: MeanDescriptor, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::Mean(desc), name)
    }

    pub fn reduce(&mut self, desc: ReduceDescriptor, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::Reduce(desc), name)
    }

    pub fn space_to_batch_nd(
        &mut self,
        desc: SpaceToBatchNdDescriptor,
        name: &str,
    ) -> TPResult<LayerId> {
        self.add(LayerKind::SpaceToBatchNd(desc), name)
    }

    pub fn batch_to_space_nd(
        &mut self,
        desc: BatchToSpaceNdDescriptor,
        name: &str,
    ) -> TPResult<LayerId> {
        self.add(LayerKind::BatchToSpaceNd(desc), name)
    }

    pub fn space_to_depth(&mut self, desc: SpaceToDepthDescriptor, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::SpaceToDepth(desc), name)
    }

    pub fn depth_to_space(&mut self, desc: DepthToSpaceDescriptor, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::DepthToSpace(desc), name)
    }

    pub fn broadcast_to(&mut self, desc: BroadcastToDescriptor, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::BroadcastTo(desc), name)
    }

    pub fn lstm(
        &mut self,
        desc: LstmDescriptor,
        params: LstmParams,
        name: &str,
    ) -> TPResult<LayerId> {
        self.add(LayerKind::Lstm { desc, params }, name)
    }

    pub fn batch_mat_mul(&mut self, desc: BatchMatMulDescriptor, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::BatchMatMul(desc), name)
    }

    pub fn gather(&mut self, desc: GatherDescriptor, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::Gather(desc), name)
    }

    pub fn gather_nd(&mut self, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::GatherNd, name)
    }

    pub fn slice(&mut self, desc: SliceDescriptor, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::Slice(desc), name)
    }

    pub fn strided_slice(&mut self, desc: StridedSliceDescriptor, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::StridedSlice(desc), name)
    }

    pub fn stack(&mut self, desc: StackDescriptor, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::Stack(desc), name)
    }

    pub fn tile(&mut self, desc: TileDescriptor, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::Tile(desc), name)
    }

    pub fn resize(&mut self, desc: ResizeDescriptor, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::Resize(desc), name)
    }

    pub fn prelu(&mut self, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::Prelu, name)
    }

    pub fn channel_shuffle(
        &mut self,
        desc: ChannelShuffleDescriptor,
        name: &str,
    ) -> TPResult<LayerId> {
        self.add(LayerKind::ChannelShuffle(desc), name)
    }

    pub fn rank(&mut self, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::Rank, name)
    }

    pub fn shape(&mut self, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::Shape, name)
    }

    pub fn scatter_nd(&mut self, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::ScatterNd, name)
    }

    pub fn detection_post_process(
        &mut self,
        desc: DetectionPostProcessDescriptor,
        anchors: ConstTensor,
        name: &str,
    ) -> TPResult<LayerId> {
        self.add(LayerKind::DetectionPostProcess { desc, anchors }, name)
    }

    pub fn fake_quantization(
        &mut self,
        desc: FakeQuantizationDescriptor,
        name: &str,
    ) -> TPResult<LayerId> {
        self.add(LayerKind::FakeQuantization(desc), name)
    }

    pub fn mem_copy(&mut self, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::MemCopy, name)
    }

    pub fn mem_import(&mut self, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::MemImport, name)
    }

    pub fn convert_fp16_to_fp32(&mut self, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::ConvertFp16ToFp32, name)
    }

    pub fn convert_fp32_to_fp16(&mut self, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::ConvertFp32ToFp16, name)
    }

    pub fn debug(&mut self, to_file: bool, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::Debug { to_file }, name)
    }

    pub fn precompiled(&mut self, desc: PrecompiledDescriptor, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::Precompiled(desc), name)
    }

    pub fn stand_in(&mut self, desc: StandInDescriptor, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::StandIn(desc), name)
    }

    pub fn fused(&mut self, desc: FusedDescriptor, name: &str) -> TPResult<LayerId> {
        self.add(LayerKind::Fused(desc), name)
    }
}
