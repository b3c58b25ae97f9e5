use crate::errors::{TPError, TPResult};
use crate::types::{DataType, Shape};
use serde::{Deserialize, Serialize};

/// Memory order of the batch/channel/spatial dimensions of a 4-D tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataLayout {
    Nchw,
    Nhwc,
}

impl DataLayout {
    pub fn channels_index(self) -> usize {
        match self {
            DataLayout::Nchw => 1,
            DataLayout::Nhwc => 3,
        }
    }

    pub fn height_index(self) -> usize {
        match self {
            DataLayout::Nchw => 2,
            DataLayout::Nhwc => 1,
        }
    }

    pub fn width_index(self) -> usize {
        match self {
            DataLayout::Nchw => 3,
            DataLayout::Nhwc => 2,
        }
    }
}

impl Default for DataLayout {
    fn default() -> Self {
        DataLayout::Nchw
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationFunction {
    Sigmoid,
    TanH,
    Linear,
    ReLu,
    BoundedReLu,
    SoftReLu,
    LeakyReLu,
    Abs,
    Sqrt,
    Square,
    Elu,
    HardSwish,
    Gelu,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActivationDescriptor {
    pub function: ActivationFunction,
    /// Alpha for bounded/leaky/elu variants.
    pub alpha: f32,
    /// Beta for bounded variants.
    pub beta: f32,
}

impl Default for ActivationDescriptor {
    fn default() -> Self {
        Self {
            function: ActivationFunction::ReLu,
            alpha: 0.0,
            beta: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Maximum,
    Minimum,
    Power,
    SquaredDifference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Abs,
    Ceil,
    Exp,
    Floor,
    Log,
    Neg,
    Rsqrt,
    Sin,
    Sqrt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOp {
    Equal,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    NotEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SoftmaxDescriptor {
    pub beta: f32,
    pub axis: i32,
}

impl Default for SoftmaxDescriptor {
    fn default() -> Self {
        Self { beta: 1.0, axis: -1 }
    }
}

/// Padding on one spatial axis: (low, high).
pub type AxisPadding = (usize, usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Padding2d {
    pub height: AxisPadding,
    pub width: AxisPadding,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Convolution2dDescriptor {
    pub stride: (usize, usize),
    pub padding: Padding2d,
    pub dilation: (usize, usize),
    pub bias_enabled: bool,
    pub data_layout: DataLayout,
}

impl Default for Convolution2dDescriptor {
    fn default() -> Self {
        Self {
            stride: (1, 1),
            padding: Padding2d::default(),
            dilation: (1, 1),
            bias_enabled: false,
            data_layout: DataLayout::Nchw,
        }
    }
}

impl Convolution2dDescriptor {
    pub fn validate(&self) -> TPResult<()> {
        if self.stride.0 == 0 || self.stride.1 == 0 {
            return Err(TPError::invalid_argument("convolution stride must be non-zero"));
        }
        if self.dilation.0 == 0 || self.dilation.1 == 0 {
            return Err(TPError::invalid_argument("convolution dilation must be non-zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthwiseConvolution2dDescriptor {
    pub stride: (usize, usize),
    pub padding: Padding2d,
    pub dilation: (usize, usize),
    pub bias_enabled: bool,
    pub data_layout: DataLayout,
}

impl Default for DepthwiseConvolution2dDescriptor {
    fn default() -> Self {
        Self {
            stride: (1, 1),
            padding: Padding2d::default(),
            dilation: (1, 1),
            bias_enabled: false,
            data_layout: DataLayout::Nchw,
        }
    }
}

impl DepthwiseConvolution2dDescriptor {
    pub fn validate(&self) -> TPResult<()> {
        if self.stride.0 == 0 || self.stride.1 == 0 {
            return Err(TPError::invalid_argument(
                "depthwise convolution stride must be non-zero",
            ));
        }
        if self.dilation.0 == 0 || self.dilation.1 == 0 {
            return Err(TPError::invalid_argument(
                "depthwise convolution dilation must be non-zero",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FullyConnectedDescriptor {
    pub bias_enabled: bool,
    pub transpose_weight_matrix: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolType {
    Max,
    Average,
    L2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pooling2dDescriptor {
    pub pool_type: PoolType,
    pub kernel: (usize, usize),
    pub stride: (usize, usize),
    pub padding: Padding2d,
    /// Pool over the whole spatial extent; kernel and stride are ignored.
    pub global: bool,
    pub data_layout: DataLayout,
}

impl Default for Pooling2dDescriptor {
    fn default() -> Self {
        Self {
            pool_type: PoolType::Max,
            kernel: (1, 1),
            stride: (1, 1),
            padding: Padding2d::default(),
            global: false,
            data_layout: DataLayout::Nchw,
        }
    }
}

impl Pooling2dDescriptor {
    pub fn validate(&self) -> TPResult<()> {
        if !self.global && (self.stride.0 == 0 || self.stride.1 == 0) {
            return Err(TPError::invalid_argument(
                "pooling stride must be non-zero unless global pooling is requested",
            ));
        }
        if !self.global && (self.kernel.0 == 0 || self.kernel.1 == 0) {
            return Err(TPError::invalid_argument("pooling kernel must be non-zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Padding3d {
    pub depth: AxisPadding,
    pub height: AxisPadding,
    pub width: AxisPadding,
}

/// 3-D pooling over a rank-5 tensor in NCDHW or NDHWC order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pooling3dDescriptor {
    pub pool_type: PoolType,
    pub kernel: (usize, usize, usize),
    pub stride: (usize, usize, usize),
    pub padding: Padding3d,
    /// Pool over the whole spatial volume; kernel and stride are ignored.
    pub global: bool,
    pub data_layout: DataLayout3d,
}

impl Default for Pooling3dDescriptor {
    fn default() -> Self {
        Self {
            pool_type: PoolType::Max,
            kernel: (1, 1, 1),
            stride: (1, 1, 1),
            padding: Padding3d::default(),
            global: false,
            data_layout: DataLayout3d::Ncdhw,
        }
    }
}

impl Pooling3dDescriptor {
    pub fn validate(&self) -> TPResult<()> {
        if !self.global && (self.stride.0 == 0 || self.stride.1 == 0 || self.stride.2 == 0) {
            return Err(TPError::invalid_argument(
                "pooling stride must be non-zero unless global pooling is requested",
            ));
        }
        if !self.global && (self.kernel.0 == 0 || self.kernel.1 == 0 || self.kernel.2 == 0) {
            return Err(TPError::invalid_argument("pooling kernel must be non-zero"));
        }
        Ok(())
    }
}

/// Memory order of a rank-5 tensor: batch, channel and three spatial dims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataLayout3d {
    Ncdhw,
    Ndhwc,
}

impl DataLayout3d {
    pub fn channels_index(self) -> usize {
        match self {
            DataLayout3d::Ncdhw => 1,
            DataLayout3d::Ndhwc => 4,
        }
    }

    pub fn depth_index(self) -> usize {
        match self {
            DataLayout3d::Ncdhw => 2,
            DataLayout3d::Ndhwc => 1,
        }
    }

    pub fn height_index(self) -> usize {
        match self {
            DataLayout3d::Ncdhw => 3,
            DataLayout3d::Ndhwc => 2,
        }
    }

    pub fn width_index(self) -> usize {
        match self {
            DataLayout3d::Ncdhw => 4,
            DataLayout3d::Ndhwc => 3,
        }
    }
}

impl Default for DataLayout3d {
    fn default() -> Self {
        DataLayout3d::Ncdhw
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatchNormalizationDescriptor {
    pub eps: f32,
    pub data_layout: DataLayout,
}

impl Default for BatchNormalizationDescriptor {
    fn default() -> Self {
        Self {
            eps: 1e-5,
            data_layout: DataLayout::Nchw,
        }
    }
}

/// Per-instance normalization with scalar scale and offset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InstanceNormalizationDescriptor {
    pub gamma: f32,
    pub beta: f32,
    pub eps: f32,
    pub data_layout: DataLayout,
}

impl Default for InstanceNormalizationDescriptor {
    fn default() -> Self {
        Self {
            gamma: 1.0,
            beta: 0.0,
            eps: 1e-12,
            data_layout: DataLayout::Nchw,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct L2NormalizationDescriptor {
    pub eps: f32,
    pub data_layout: DataLayout,
}

impl Default for L2NormalizationDescriptor {
    fn default() -> Self {
        Self {
            eps: 1e-12,
            data_layout: DataLayout::Nchw,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormChannelType {
    Across,
    Within,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormMethodType {
    LocalBrightness,
    LocalContrast,
}

/// Local-response normalization over a window of neighbouring elements.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizationDescriptor {
    pub channel_type: NormChannelType,
    pub method: NormMethodType,
    pub norm_size: usize,
    pub alpha: f32,
    pub beta: f32,
    pub k: f32,
    pub data_layout: DataLayout,
}

impl Default for NormalizationDescriptor {
    fn default() -> Self {
        Self {
            channel_type: NormChannelType::Across,
            method: NormMethodType::LocalBrightness,
            norm_size: 1,
            alpha: 1.0,
            beta: 0.5,
            k: 1.0,
            data_layout: DataLayout::Nchw,
        }
    }
}

impl NormalizationDescriptor {
    pub fn validate(&self) -> TPResult<()> {
        if self.norm_size == 0 {
            return Err(TPError::invalid_argument(
                "normalization window size must be non-zero",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReshapeDescriptor {
    pub target_shape: Shape,
}

/// Mapping such that destination dimension `mappings[i]` takes source
/// dimension `i`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermuteDescriptor {
    pub mappings: Vec<usize>,
}

impl PermuteDescriptor {
    pub fn new(mappings: &[usize]) -> Self {
        Self {
            mappings: mappings.to_vec(),
        }
    }

    pub fn validate(&self) -> TPResult<()> {
        validate_permutation(&self.mappings)
    }

    /// True when applying `other` after `self` restores the original order.
    pub fn is_inverse_of(&self, other: &PermuteDescriptor) -> bool {
        is_inverse_permutation(&self.mappings, &other.mappings)
    }
}

/// Mapping such that destination dimension `i` takes source dimension
/// `mappings[i]`. The inverse convention of [`PermuteDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransposeDescriptor {
    pub mappings: Vec<usize>,
}

impl TransposeDescriptor {
    pub fn new(mappings: &[usize]) -> Self {
        Self {
            mappings: mappings.to_vec(),
        }
    }

    pub fn validate(&self) -> TPResult<()> {
        validate_permutation(&self.mappings)
    }

    pub fn is_inverse_of(&self, other: &TransposeDescriptor) -> bool {
        is_inverse_permutation(&self.mappings, &other.mappings)
    }
}

pub(crate) fn validate_permutation(mappings: &[usize]) -> TPResult<()> {
    let mut seen = vec![false; mappings.len()];
    for &m in mappings {
        if m >= mappings.len() || seen[m] {
            return Err(TPError::invalid_argument(format!(
                "invalid permutation vector {mappings:?}"
            )));
        }
        seen[m] = true;
    }
    Ok(())
}

pub(crate) fn is_inverse_permutation(a: &[usize], b: &[usize]) -> bool {
    a.len() == b.len() && a.iter().enumerate().all(|(i, &m)| b.get(m) == Some(&i))
}

/// Per-view origins of a concatenation; the output is the bounding box of
/// all views and the views must tile it exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginsDescriptor {
    pub origins: Vec<Vec<usize>>,
}

impl OriginsDescriptor {
    /// Origins for concatenation along one axis, given each input's extent on
    /// that axis.
    pub fn along_axis(axis: usize, rank: usize, extents: &[usize]) -> Self {
        let mut origins = Vec::with_capacity(extents.len());
        let mut offset = 0;
        for &extent in extents {
            let mut origin = vec![0; rank];
            origin[axis] = offset;
            origins.push(origin);
            offset += extent;
        }
        Self { origins }
    }

    pub fn num_views(&self) -> usize {
        self.origins.len()
    }

    pub fn validate(&self) -> TPResult<()> {
        if self.origins.is_empty() {
            return Err(TPError::invalid_argument("concat requires at least one view"));
        }
        let rank = self.origins[0].len();
        if self.origins.iter().any(|o| o.len() != rank) {
            return Err(TPError::invalid_argument("concat view origins must share a rank"));
        }
        Ok(())
    }
}

/// Origins and sizes of the views a splitter produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewsDescriptor {
    pub origins: Vec<Vec<usize>>,
    pub sizes: Vec<Vec<usize>>,
}

impl ViewsDescriptor {
    pub fn num_views(&self) -> usize {
        self.origins.len()
    }

    pub fn validate(&self) -> TPResult<()> {
        if self.origins.is_empty() {
            return Err(TPError::invalid_argument("splitter requires at least one view"));
        }
        if self.origins.len() != self.sizes.len() {
            return Err(TPError::invalid_argument(
                "splitter origin and size counts must match",
            ));
        }
        let rank = self.origins[0].len();
        if self
            .origins
            .iter()
            .chain(self.sizes.iter())
            .any(|v| v.len() != rank)
        {
            return Err(TPError::invalid_argument(
                "splitter view origins and sizes must share a rank",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PadDescriptor {
    /// (low, high) padding per dimension.
    pub pad_list: Vec<AxisPadding>,
    pub pad_value: f32,
}

impl PadDescriptor {
    pub fn is_zero_value(&self) -> bool {
        self.pad_value == 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeanDescriptor {
    pub axes: Vec<usize>,
    pub keep_dims: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReduceOp {
    Sum,
    Max,
    Min,
    Mean,
    Prod,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReduceDescriptor {
    pub op: ReduceOp,
    pub axes: Vec<usize>,
    pub keep_dims: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceToBatchNdDescriptor {
    pub block_shape: Vec<usize>,
    pub pad_list: Vec<AxisPadding>,
    pub data_layout: DataLayout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchToSpaceNdDescriptor {
    pub block_shape: Vec<usize>,
    pub crops: Vec<AxisPadding>,
    pub data_layout: DataLayout,
}

impl BatchToSpaceNdDescriptor {
    pub fn has_zero_crops(&self) -> bool {
        self.crops.iter().all(|&(lo, hi)| lo == 0 && hi == 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceToDepthDescriptor {
    pub block_size: usize,
    pub data_layout: DataLayout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthToSpaceDescriptor {
    pub block_size: usize,
    pub data_layout: DataLayout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastToDescriptor {
    pub target_shape: Shape,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LstmDescriptor {
    pub activation: ActivationFunction,
    pub cell_clip: f32,
    pub projection_clip: f32,
    pub cifg_enabled: bool,
    pub peephole_enabled: bool,
    pub projection_enabled: bool,
    pub layer_norm_enabled: bool,
}

impl Default for LstmDescriptor {
    fn default() -> Self {
        Self {
            activation: ActivationFunction::TanH,
            cell_clip: 0.0,
            projection_clip: 0.0,
            cifg_enabled: false,
            peephole_enabled: false,
            projection_enabled: false,
            layer_norm_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchMatMulDescriptor {
    pub transpose_x: bool,
    pub transpose_y: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatherDescriptor {
    pub axis: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceDescriptor {
    pub begin: Vec<usize>,
    pub size: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StridedSliceDescriptor {
    pub begin: Vec<i64>,
    pub end: Vec<i64>,
    pub stride: Vec<i64>,
    pub shrink_axis_mask: u32,
}

impl StridedSliceDescriptor {
    pub fn validate(&self) -> TPResult<()> {
        if self.begin.len() != self.end.len() || self.begin.len() != self.stride.len() {
            return Err(TPError::invalid_argument(
                "strided slice begin/end/stride lengths must match",
            ));
        }
        if self.stride.iter().any(|&s| s == 0) {
            return Err(TPError::invalid_argument("strided slice stride must be non-zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackDescriptor {
    pub axis: usize,
    pub num_inputs: usize,
    pub input_shape: Shape,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileDescriptor {
    pub multiples: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResizeMethod {
    NearestNeighbor,
    Bilinear,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeDescriptor {
    pub target_height: usize,
    pub target_width: usize,
    pub method: ResizeMethod,
    pub data_layout: DataLayout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelShuffleDescriptor {
    pub num_groups: usize,
    pub axis: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FakeQuantizationDescriptor {
    pub min: f32,
    pub max: f32,
}

impl Default for FakeQuantizationDescriptor {
    fn default() -> Self {
        Self { min: -6.0, max: 6.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionPostProcessDescriptor {
    pub max_detections: usize,
    pub max_classes_per_detection: usize,
    pub detections_per_class: usize,
    pub nms_score_threshold: f32,
    pub nms_iou_threshold: f32,
    pub num_classes: usize,
    pub use_regular_nms: bool,
    pub scale_x: f32,
    pub scale_y: f32,
    pub scale_w: f32,
    pub scale_h: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecompiledDescriptor {
    pub num_inputs: usize,
    pub num_outputs: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandInDescriptor {
    pub num_inputs: usize,
    pub num_outputs: usize,
}

/// Result of a backend-internal fusion; the label names the fused kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusedDescriptor {
    pub num_inputs: usize,
    pub num_outputs: usize,
    pub fused_kernel: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastDescriptor {
    pub target_type: DataType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverse_permutations_cancel() {
        let forward = PermuteDescriptor::new(&[0, 2, 3, 1]);
        let backward = PermuteDescriptor::new(&[0, 3, 1, 2]);
        assert!(forward.is_inverse_of(&backward));
        assert!(backward.is_inverse_of(&forward));
        assert!(!forward.is_inverse_of(&forward));
    }

    #[test]
    fn permutations_must_be_bijective() {
        assert!(PermuteDescriptor::new(&[0, 1, 1, 2]).validate().is_err());
        assert!(PermuteDescriptor::new(&[0, 4, 1, 2]).validate().is_err());
        assert!(PermuteDescriptor::new(&[3, 2, 1, 0]).validate().is_ok());
    }
}
