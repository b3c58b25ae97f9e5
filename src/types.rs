use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a layer in the computation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LayerId(pub usize);

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Binding id tying an Input/Output layer to the caller's tensors.
pub type BindingId = u32;

/// Names an execution backend. Compared case-sensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BackendId(String);

impl BackendId {
    pub const UNASSIGNED_NAME: &'static str = "Unassigned";
    /// The always-available reference CPU backend.
    pub const CPU_REF_NAME: &'static str = "CpuRef";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn unassigned() -> Self {
        Self(Self::UNASSIGNED_NAME.to_string())
    }

    pub fn cpu_ref() -> Self {
        Self(Self::CPU_REF_NAME.to_string())
    }

    pub fn is_unassigned(&self) -> bool {
        self.0 == Self::UNASSIGNED_NAME
    }

    pub fn is_cpu_ref(&self) -> bool {
        self.0 == Self::CPU_REF_NAME
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BackendId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Names a tensor-handle factory registered by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FactoryId(String);

impl FactoryId {
    /// Sentinel for backends predating the tensor-allocator interface.
    pub const LEGACY_NAME: &'static str = "LegacyFactory";
    /// Sentinel for Output layers: the consumer of the optimized network chooses.
    pub const DEFERRED_NAME: &'static str = "DeferredFactory";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn legacy() -> Self {
        Self(Self::LEGACY_NAME.to_string())
    }

    pub fn deferred() -> Self {
        Self(Self::DEFERRED_NAME.to_string())
    }

    pub fn is_legacy(&self) -> bool {
        self.0 == Self::LEGACY_NAME
    }

    pub fn is_deferred(&self) -> bool {
        self.0 == Self::DEFERRED_NAME
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FactoryId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl fmt::Display for FactoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Float32,
    Float16,
    BFloat16,
    QAsymmU8,
    QAsymmS8,
    QSymmS8,
    QSymmS16,
    Signed32,
    Signed64,
    Boolean,
}

impl DataType {
    pub fn is_quantized(self) -> bool {
        matches!(
            self,
            DataType::QAsymmU8 | DataType::QAsymmS8 | DataType::QSymmS8 | DataType::QSymmS16
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::Float32 => "Float32",
            DataType::Float16 => "Float16",
            DataType::BFloat16 => "BFloat16",
            DataType::QAsymmU8 => "QAsymmU8",
            DataType::QAsymmS8 => "QAsymmS8",
            DataType::QSymmS8 => "QSymmS8",
            DataType::QSymmS16 => "QSymmS16",
            DataType::Signed32 => "Signed32",
            DataType::Signed64 => "Signed64",
            DataType::Boolean => "Boolean",
        }
    }
}

/// Whether a shape's dimensions are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dimensionality {
    Specified,
    NotSpecified,
    Scalar,
}

/// Ordered dimensions plus a dimensionality tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
    dims: Vec<usize>,
    dimensionality: Dimensionality,
}

impl Shape {
    pub fn new(dims: &[usize]) -> Self {
        Self {
            dims: dims.to_vec(),
            dimensionality: Dimensionality::Specified,
        }
    }

    pub fn scalar() -> Self {
        Self {
            dims: Vec::new(),
            dimensionality: Dimensionality::Scalar,
        }
    }

    pub fn not_specified() -> Self {
        Self {
            dims: Vec::new(),
            dimensionality: Dimensionality::NotSpecified,
        }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dimensionality(&self) -> Dimensionality {
        self.dimensionality
    }

    pub fn is_specified(&self) -> bool {
        self.dimensionality == Dimensionality::Specified
    }

    pub fn num_elements(&self) -> usize {
        match self.dimensionality {
            Dimensionality::Scalar => 1,
            _ => self.dims.iter().product(),
        }
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Self {
            dims,
            dimensionality: Dimensionality::Specified,
        }
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dimensionality {
            Dimensionality::Scalar => f.write_str("[scalar]"),
            Dimensionality::NotSpecified => f.write_str("[?]"),
            Dimensionality::Specified => write!(f, "{:?}", self.dims),
        }
    }
}

/// Per-tensor quantization parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantizationInfo {
    pub scale: f32,
    pub offset: i32,
}

/// Shape, element type, optional quantization and constness of one tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorInfo {
    pub shape: Shape,
    pub data_type: DataType,
    pub quantization: Option<QuantizationInfo>,
    pub constant: bool,
}

impl TensorInfo {
    pub fn new(shape: impl Into<Shape>, data_type: DataType) -> Self {
        Self {
            shape: shape.into(),
            data_type,
            quantization: None,
            constant: false,
        }
    }

    pub fn quantized(
        shape: impl Into<Shape>,
        data_type: DataType,
        scale: f32,
        offset: i32,
    ) -> Self {
        Self {
            shape: shape.into(),
            data_type,
            quantization: Some(QuantizationInfo { scale, offset }),
            constant: false,
        }
    }

    pub fn with_constant(mut self, constant: bool) -> Self {
        self.constant = constant;
        self
    }

    pub fn with_shape(mut self, shape: impl Into<Shape>) -> Self {
        self.shape = shape.into();
        self
    }

    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn num_elements(&self) -> usize {
        self.shape.num_elements()
    }

    /// True when two infos occupy the same type space: identical element type
    /// and, for quantized types, identical quantization parameters.
    pub fn type_space_matches(&self, other: &TensorInfo) -> bool {
        if self.data_type != other.data_type {
            return false;
        }
        if self.data_type.is_quantized() {
            return self.quantization == other.quantization;
        }
        true
    }
}

/// How a producer's tensor handle reaches one consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeStrategy {
    Undefined,
    /// Producer and consumer use the same handle type directly.
    DirectCompatibility,
    /// Producer exports its buffer, consumer imports it in place.
    ExportToTarget,
    /// An explicit memcopy bridges the two handle types.
    CopyToTarget,
}

/// Bitset of memory sources a factory can import from or export to.
pub type MemorySourceFlags = u32;

pub mod mem_source {
    use super::MemorySourceFlags;

    pub const UNDEFINED: MemorySourceFlags = 0;
    pub const MALLOC: MemorySourceFlags = 1;
    pub const DMA_BUF: MemorySourceFlags = 1 << 1;
    pub const DMA_BUF_PROTECTED: MemorySourceFlags = 1 << 2;
}

/// Capability classes consulted by the edge-strategy planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapabilityClass {
    PaddingRequired,
    FallbackImportDisabled,
}

/// One capability declared by a tensor-handle factory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub class: CapabilityClass,
    pub value: bool,
}
