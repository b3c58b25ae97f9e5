use crate::errors::{TPError, TPResult};
use crate::types::{DataType, QuantizationInfo, Shape, TensorInfo};
use half::{bf16, f16};
use ndarray::{ArrayD, IxDyn};
use num_traits::AsPrimitive;
use std::sync::Arc;

/// Typed storage for one constant tensor.
#[derive(Clone, Debug, PartialEq)]
pub enum TensorData {
    F32(ArrayD<f32>),
    F16(ArrayD<f16>),
    Bf16(ArrayD<bf16>),
    QU8(ArrayD<u8>),
    QS8(ArrayD<i8>),
    QS16(ArrayD<i16>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
    Bool(ArrayD<bool>),
}

impl TensorData {
    pub fn data_type(&self) -> DataType {
        match self {
            TensorData::F32(_) => DataType::Float32,
            TensorData::F16(_) => DataType::Float16,
            TensorData::Bf16(_) => DataType::BFloat16,
            TensorData::QU8(_) => DataType::QAsymmU8,
            TensorData::QS8(_) => DataType::QAsymmS8,
            TensorData::QS16(_) => DataType::QSymmS16,
            TensorData::I32(_) => DataType::Signed32,
            TensorData::I64(_) => DataType::Signed64,
            TensorData::Bool(_) => DataType::Boolean,
        }
    }

    pub fn num_elements(&self) -> usize {
        match self {
            TensorData::F32(a) => a.len(),
            TensorData::F16(a) => a.len(),
            TensorData::Bf16(a) => a.len(),
            TensorData::QU8(a) => a.len(),
            TensorData::QS8(a) => a.len(),
            TensorData::QS16(a) => a.len(),
            TensorData::I32(a) => a.len(),
            TensorData::I64(a) => a.len(),
            TensorData::Bool(a) => a.len(),
        }
    }
}

/// A constant tensor (weights, biases, anchors). The buffer is shared by
/// reference counting so layer clones are cheap; rewrites allocate a fresh
/// buffer and redirect.
#[derive(Clone, Debug)]
pub struct ConstTensor {
    info: TensorInfo,
    data: Arc<TensorData>,
}

fn dequantized<T>(values: &ArrayD<T>, q: QuantizationInfo) -> ArrayD<f32>
where
    T: Copy + AsPrimitive<f32>,
{
    values.mapv(|v| (v.as_() - q.offset as f32) * q.scale)
}

impl ConstTensor {
    pub fn new(info: TensorInfo, data: TensorData) -> TPResult<Self> {
        if info.data_type != data.data_type() {
            return Err(TPError::invalid_argument(format!(
                "constant tensor data type {} does not match its info {}",
                data.data_type().name(),
                info.data_type.name()
            )));
        }
        if info.num_elements() != data.num_elements() {
            return Err(TPError::invalid_argument(format!(
                "constant tensor has {} elements but its shape {} implies {}",
                data.num_elements(),
                info.shape,
                info.num_elements()
            )));
        }
        let info = info.with_constant(true);
        Ok(Self {
            info,
            data: Arc::new(data),
        })
    }

    pub fn from_f32(dims: &[usize], values: Vec<f32>) -> TPResult<Self> {
        let array = ArrayD::from_shape_vec(IxDyn(dims), values)
            .map_err(|e| TPError::invalid_argument(format!("bad constant tensor shape: {e}")))?;
        Self::new(
            TensorInfo::new(Shape::new(dims), DataType::Float32),
            TensorData::F32(array),
        )
    }

    pub fn from_f16(dims: &[usize], values: Vec<f16>) -> TPResult<Self> {
        let array = ArrayD::from_shape_vec(IxDyn(dims), values)
            .map_err(|e| TPError::invalid_argument(format!("bad constant tensor shape: {e}")))?;
        Self::new(
            TensorInfo::new(Shape::new(dims), DataType::Float16),
            TensorData::F16(array),
        )
    }

    pub fn zeros_f32(dims: &[usize]) -> Self {
        Self {
            info: TensorInfo::new(Shape::new(dims), DataType::Float32).with_constant(true),
            data: Arc::new(TensorData::F32(ArrayD::zeros(IxDyn(dims)))),
        }
    }

    /// Uniformly random f32 tensor, for tests and demos.
    pub fn random_f32(dims: &[usize]) -> Self {
        use ndarray_rand::RandomExt;
        use rand::distributions::Uniform;
        let array = ArrayD::random(IxDyn(dims), Uniform::new(-1.0, 1.0));
        Self {
            info: TensorInfo::new(Shape::new(dims), DataType::Float32).with_constant(true),
            data: Arc::new(TensorData::F32(array)),
        }
    }

    pub fn info(&self) -> &TensorInfo {
        &self.info
    }

    pub fn shape(&self) -> &Shape {
        &self.info.shape
    }

    pub fn data_type(&self) -> DataType {
        self.data.data_type()
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn num_elements(&self) -> usize {
        self.data.num_elements()
    }

    pub fn as_f32(&self) -> Option<&ArrayD<f32>> {
        match self.data.as_ref() {
            TensorData::F32(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_f16(&self) -> Option<&ArrayD<f16>> {
        match self.data.as_ref() {
            TensorData::F16(a) => Some(a),
            _ => None,
        }
    }

    /// Widens the values to f32, dequantizing where the type carries
    /// quantization parameters. Always allocates a fresh buffer.
    pub fn to_f32_values(&self) -> TPResult<ArrayD<f32>> {
        let q = self.info.quantization.unwrap_or(QuantizationInfo {
            scale: 1.0,
            offset: 0,
        });
        Ok(match self.data.as_ref() {
            TensorData::F32(a) => a.clone(),
            TensorData::F16(a) => a.mapv(f32::from),
            TensorData::Bf16(a) => a.mapv(f32::from),
            TensorData::QU8(a) => dequantized(a, q),
            TensorData::QS8(a) => dequantized(a, q),
            TensorData::QS16(a) => dequantized(a, q),
            TensorData::I32(a) => a.mapv(|v| v as f32),
            TensorData::I64(a) => a.mapv(|v| v as f32),
            TensorData::Bool(_) => {
                return Err(TPError::invalid_argument(
                    "cannot widen a boolean constant tensor to f32",
                ))
            }
        })
    }

    /// A fresh f32 tensor with the same shape. The shared original buffer is
    /// left untouched.
    pub fn to_f32(&self) -> TPResult<Self> {
        let values = self.to_f32_values()?;
        let mut info = self.info.clone().with_data_type(DataType::Float32);
        info.quantization = None;
        Self::new(info, TensorData::F32(values))
    }

    /// A fresh f16 tensor with the same shape. Only defined for float inputs.
    pub fn to_f16(&self) -> TPResult<Self> {
        let values = match self.data.as_ref() {
            TensorData::F32(a) => a.mapv(f16::from_f32),
            TensorData::F16(a) => a.clone(),
            other => {
                return Err(TPError::invalid_argument(format!(
                    "cannot narrow {} constant tensor to f16",
                    other.data_type().name()
                )))
            }
        };
        let info = self.info.clone().with_data_type(DataType::Float16);
        Self::new(info, TensorData::F16(values))
    }

    pub fn from_f32_values(info: TensorInfo, values: ArrayD<f32>) -> TPResult<Self> {
        Self::new(info.with_data_type(DataType::Float32), TensorData::F32(values))
    }

    /// Reorders the stored data so that destination axis `mappings[i]` takes
    /// source axis `i`, returning a fresh standard-layout tensor.
    pub fn permuted(&self, mappings: &[usize]) -> TPResult<Self> {
        let rank = self.info.shape.rank();
        if mappings.len() != rank {
            return Err(TPError::invalid_argument(format!(
                "permutation of length {} applied to rank-{} constant",
                mappings.len(),
                rank
            )));
        }
        // dst axis k reads src axis inverse[k]
        let mut inverse = vec![0usize; rank];
        for (src, &dst) in mappings.iter().enumerate() {
            if dst >= rank {
                return Err(TPError::invalid_argument(format!(
                    "permutation target axis {dst} out of range for rank {rank}"
                )));
            }
            inverse[dst] = src;
        }

        fn apply<T: Clone>(a: &ArrayD<T>, inverse: &[usize]) -> ArrayD<T> {
            a.view()
                .permuted_axes(IxDyn(inverse))
                .as_standard_layout()
                .to_owned()
        }

        let data = match self.data.as_ref() {
            TensorData::F32(a) => TensorData::F32(apply(a, &inverse)),
            TensorData::F16(a) => TensorData::F16(apply(a, &inverse)),
            TensorData::Bf16(a) => TensorData::Bf16(apply(a, &inverse)),
            TensorData::QU8(a) => TensorData::QU8(apply(a, &inverse)),
            TensorData::QS8(a) => TensorData::QS8(apply(a, &inverse)),
            TensorData::QS16(a) => TensorData::QS16(apply(a, &inverse)),
            TensorData::I32(a) => TensorData::I32(apply(a, &inverse)),
            TensorData::I64(a) => TensorData::I64(apply(a, &inverse)),
            TensorData::Bool(a) => TensorData::Bool(apply(a, &inverse)),
        };

        let mut new_dims = vec![0usize; rank];
        for (src, &dst) in mappings.iter().enumerate() {
            new_dims[dst] = self.info.shape.dims()[src];
        }
        let info = self.info.clone().with_shape(Shape::new(&new_dims));
        Self::new(info, data)
    }

    /// Reshapes without touching the stored values. Element count must match.
    pub fn reshaped(&self, dims: &[usize]) -> TPResult<Self> {
        let target: usize = dims.iter().product();
        if target != self.num_elements() {
            return Err(TPError::invalid_argument(format!(
                "cannot reshape {}-element constant to {:?}",
                self.num_elements(),
                dims
            )));
        }

        fn apply<T: Clone>(a: &ArrayD<T>, dims: &[usize]) -> ArrayD<T> {
            a.view()
                .as_standard_layout()
                .to_owned()
                .into_shape(IxDyn(dims))
                .expect("element count checked above")
        }

        let data = match self.data.as_ref() {
            TensorData::F32(a) => TensorData::F32(apply(a, dims)),
            TensorData::F16(a) => TensorData::F16(apply(a, dims)),
            TensorData::Bf16(a) => TensorData::Bf16(apply(a, dims)),
            TensorData::QU8(a) => TensorData::QU8(apply(a, dims)),
            TensorData::QS8(a) => TensorData::QS8(apply(a, dims)),
            TensorData::QS16(a) => TensorData::QS16(apply(a, dims)),
            TensorData::I32(a) => TensorData::I32(apply(a, dims)),
            TensorData::I64(a) => TensorData::I64(apply(a, dims)),
            TensorData::Bool(a) => TensorData::Bool(apply(a, dims)),
        };
        let info = self.info.clone().with_shape(Shape::new(dims));
        Self::new(info, data)
    }
}
