//! Per-kind output shape and type inference.
//!
//! Kinds fall into families with shared rules: elementwise ops broadcast,
//! the convolution family shares the padded-window arithmetic, the
//! space/batch/depth reshuffles are product-preserving rewrites with
//! divisibility checks.

use crate::errors::{TPError, TPResult};
use crate::graph::descriptors::*;
use crate::graph::layer::{Layer, LayerKind};
use crate::types::{DataType, Shape, TensorInfo};

fn validation(layer: &Layer, reason: impl Into<String>) -> TPError {
    TPError::layer_validation(
        format!("{} ({})", layer.kind_name(), layer.name()),
        reason,
    )
}

/// Broadcast two shapes against each other, aligning from the right.
/// Dimensions must match or one of them must be 1.
pub fn broadcast_shapes(a: &Shape, b: &Shape) -> Option<Shape> {
    let (long, short) = if a.rank() >= b.rank() { (a, b) } else { (b, a) };
    let offset = long.rank() - short.rank();
    let mut dims = long.dims().to_vec();
    for (i, &s) in short.dims().iter().enumerate() {
        let l = dims[offset + i];
        if l == s || s == 1 {
            // keep l
        } else if l == 1 {
            dims[offset + i] = s;
        } else {
            return None;
        }
    }
    Some(Shape::new(&dims))
}

fn conv_output_extent(
    layer: &Layer,
    input: usize,
    pad: (usize, usize),
    kernel: usize,
    dilation: usize,
    stride: usize,
) -> TPResult<usize> {
    let effective_kernel = dilation * (kernel - 1) + 1;
    let padded = input + pad.0 + pad.1;
    if effective_kernel > padded {
        return Err(validation(
            layer,
            format!("kernel extent {effective_kernel} exceeds padded input extent {padded}"),
        ));
    }
    Ok(1 + (padded - effective_kernel) / stride)
}

fn require_rank(layer: &Layer, shape: &Shape, rank: usize) -> TPResult<()> {
    if shape.rank() != rank {
        return Err(validation(
            layer,
            format!("expected a rank-{rank} input, got {}", shape),
        ));
    }
    Ok(())
}

fn concat_output_shape(
    layer: &Layer,
    desc: &OriginsDescriptor,
    inputs: &[TensorInfo],
) -> TPResult<Shape> {
    let rank = desc.origins[0].len();
    for info in inputs {
        require_rank(layer, &info.shape, rank)?;
    }
    if inputs.len() != desc.num_views() {
        return Err(validation(
            layer,
            format!(
                "concat has {} views but {} inputs",
                desc.num_views(),
                inputs.len()
            ),
        ));
    }

    // Bounding box of all views.
    let mut out = vec![0usize; rank];
    for (origin, info) in desc.origins.iter().zip(inputs) {
        for (d, (&o, &extent)) in origin.iter().zip(info.shape.dims()).enumerate() {
            out[d] = out[d].max(o + extent);
        }
    }

    // No two views may overlap.
    for i in 0..inputs.len() {
        for j in (i + 1)..inputs.len() {
            let overlap = (0..rank).all(|d| {
                let (ai, ae) = (desc.origins[i][d], inputs[i].shape.dims()[d]);
                let (bi, be) = (desc.origins[j][d], inputs[j].shape.dims()[d]);
                ai < bi + be && bi < ai + ae
            });
            if overlap {
                return Err(validation(
                    layer,
                    format!("concat views {i} and {j} overlap"),
                ));
            }
        }
    }

    // The views must tile the bounding box exactly.
    let covered: usize = inputs.iter().map(|i| i.shape.num_elements()).sum();
    let total: usize = out.iter().product();
    if covered != total {
        return Err(validation(
            layer,
            format!("concat views cover {covered} elements of a {total}-element bounding box"),
        ));
    }

    Ok(Shape::new(&out))
}

fn reduced_shape(
    layer: &Layer,
    input: &Shape,
    axes: &[usize],
    keep_dims: bool,
) -> TPResult<Shape> {
    for &axis in axes {
        if axis >= input.rank() {
            return Err(validation(
                layer,
                format!("reduction axis {axis} out of range for {input}"),
            ));
        }
    }
    // Empty axis list reduces every dimension.
    let reduce_all = axes.is_empty();
    let mut dims = Vec::new();
    for (d, &extent) in input.dims().iter().enumerate() {
        let reduced = reduce_all || axes.contains(&d);
        if reduced {
            if keep_dims {
                dims.push(1);
            }
        } else {
            dims.push(extent);
        }
    }
    if dims.is_empty() {
        dims.push(1);
    }
    Ok(Shape::new(&dims))
}

fn strided_slice_shape(layer: &Layer, desc: &StridedSliceDescriptor, input: &Shape) -> TPResult<Shape> {
    require_rank(layer, input, desc.begin.len())?;
    let mut dims = Vec::new();
    for (d, &extent) in input.dims().iter().enumerate() {
        let extent = extent as i64;
        let stride = desc.stride[d];
        let clamp = |v: i64| -> i64 {
            let v = if v < 0 { v + extent } else { v };
            v.clamp(0, extent)
        };
        let (begin, end) = (clamp(desc.begin[d]), clamp(desc.end[d]));
        let count = if stride > 0 {
            (end - begin + stride - 1).max(0) / stride
        } else {
            (begin - end + (-stride) - 1).max(0) / (-stride)
        };
        if desc.shrink_axis_mask & (1 << d) != 0 {
            continue;
        }
        dims.push(count as usize);
    }
    if dims.is_empty() {
        dims.push(1);
    }
    Ok(Shape::new(&dims))
}

/// Data type of output slots when none was pre-set by the builder.
fn derived_data_type(kind: &LayerKind, inputs: &[TensorInfo]) -> DataType {
    match kind {
        LayerKind::Comparison(_) | LayerKind::LogicalBinary(_) => DataType::Boolean,
        LayerKind::Rank | LayerKind::Shape => DataType::Signed32,
        LayerKind::Cast(desc) => desc.target_type,
        LayerKind::Dequantize => DataType::Float32,
        LayerKind::Quantize => DataType::QAsymmU8,
        LayerKind::ConvertFp16ToFp32 => DataType::Float32,
        LayerKind::ConvertFp32ToFp16 => DataType::Float16,
        LayerKind::Constant { tensor } => tensor.data_type(),
        _ => inputs
            .first()
            .map(|i| i.data_type)
            .unwrap_or(DataType::Float32),
    }
}

/// Infer the full output infos of `layer` from its connected input infos.
///
/// Where an output slot already carries an info, its data type and
/// quantization are kept and only the shape is recomputed; otherwise the
/// data type is derived from the kind and first input.
pub fn inferred_output_infos(layer: &Layer, inputs: &[TensorInfo]) -> TPResult<Vec<TensorInfo>> {
    let shapes = inferred_output_shapes(layer, inputs)?;
    let mut infos = Vec::with_capacity(shapes.len());
    for (slot, shape) in shapes.into_iter().enumerate() {
        let info = match layer.output_info(slot) {
            Some(existing) => existing.clone().with_shape(shape),
            None => {
                let data_type = derived_data_type(layer.kind(), inputs);
                let mut info = TensorInfo::new(shape, data_type);
                if let Some(first) = inputs.first() {
                    if first.data_type == data_type {
                        info.quantization = first.quantization;
                    }
                }
                info
            }
        };
        infos.push(info);
    }
    Ok(infos)
}

/// Shape-only inference; the per-kind rules.
pub fn inferred_output_shapes(layer: &Layer, inputs: &[TensorInfo]) -> TPResult<Vec<Shape>> {
    let kind = layer.kind();
    let shape_of = |i: usize| -> &Shape { &inputs[i].shape };

    let expected = kind.arity().0;
    if inputs.len() != expected {
        return Err(validation(
            layer,
            format!("expected {expected} connected inputs, got {}", inputs.len()),
        ));
    }

    let out = match kind {
        LayerKind::Input { .. } | LayerKind::Constant { .. } => {
            // Source layers: shape comes from the binding or the tensor.
            match kind {
                LayerKind::Constant { tensor } => vec![tensor.shape().clone()],
                _ => match layer.output_info(0) {
                    Some(info) => vec![info.shape.clone()],
                    None => {
                        return Err(validation(layer, "input layer has no tensor info set"))
                    }
                },
            }
        }
        LayerKind::Output { .. } => Vec::new(),

        LayerKind::Activation(_)
        | LayerKind::ElementwiseUnary(_)
        | LayerKind::Softmax(_)
        | LayerKind::BatchNormalization { .. }
        | LayerKind::InstanceNormalization(_)
        | LayerKind::L2Normalization(_)
        | LayerKind::Normalization(_)
        | LayerKind::Dequantize
        | LayerKind::Quantize
        | LayerKind::Cast(_)
        | LayerKind::FakeQuantization(_)
        | LayerKind::MemCopy
        | LayerKind::MemImport
        | LayerKind::ConvertFp16ToFp32
        | LayerKind::ConvertFp32ToFp16
        | LayerKind::Debug { .. }
        | LayerKind::ChannelShuffle(_) => {
            if let LayerKind::ChannelShuffle(desc) = kind {
                let channels = shape_of(0)
                    .dims()
                    .get(desc.axis)
                    .copied()
                    .ok_or_else(|| validation(layer, "channel shuffle axis out of range"))?;
                if channels % desc.num_groups != 0 {
                    return Err(validation(
                        layer,
                        format!(
                            "channel count {channels} not divisible into {} groups",
                            desc.num_groups
                        ),
                    ));
                }
            }
            vec![shape_of(0).clone()]
        }

        LayerKind::ElementwiseBinary(_)
        | LayerKind::Comparison(_)
        | LayerKind::LogicalBinary(_)
        | LayerKind::Prelu => {
            let shape = broadcast_shapes(shape_of(0), shape_of(1)).ok_or_else(|| {
                validation(
                    layer,
                    format!(
                        "shapes {} and {} do not broadcast",
                        shape_of(0),
                        shape_of(1)
                    ),
                )
            })?;
            vec![shape]
        }

        LayerKind::FullyConnected { desc, weights, .. } => {
            let batch = *shape_of(0)
                .dims()
                .first()
                .ok_or_else(|| validation(layer, "fully connected input must not be a scalar"))?;
            let wdims = weights.shape().dims();
            let units = if desc.transpose_weight_matrix {
                wdims[0]
            } else {
                wdims[1]
            };
            vec![Shape::new(&[batch, units])]
        }

        LayerKind::Convolution2d { desc, weights, .. } => {
            require_rank(layer, shape_of(0), 4)?;
            let dims = shape_of(0).dims();
            let layout = desc.data_layout;
            let wdims = weights.shape().dims();
            let (kh, kw) = (wdims[2], wdims[3]);
            let oh = conv_output_extent(
                layer,
                dims[layout.height_index()],
                desc.padding.height,
                kh,
                desc.dilation.0,
                desc.stride.0,
            )?;
            let ow = conv_output_extent(
                layer,
                dims[layout.width_index()],
                desc.padding.width,
                kw,
                desc.dilation.1,
                desc.stride.1,
            )?;
            let mut out = [0usize; 4];
            out[0] = dims[0];
            out[layout.channels_index()] = wdims[0];
            out[layout.height_index()] = oh;
            out[layout.width_index()] = ow;
            vec![Shape::new(&out)]
        }

        LayerKind::DepthwiseConvolution2d { desc, weights, .. } => {
            require_rank(layer, shape_of(0), 4)?;
            let dims = shape_of(0).dims();
            let layout = desc.data_layout;
            let wdims = weights.shape().dims();
            // Weights are either [M, I, Hk, Wk] as built, or the normalized
            // [1, Hk, Wk, I*M] produced by the weight-permute rewrite.
            let (kh, kw, out_channels) = if wdims[0] == 1 {
                (wdims[1], wdims[2], wdims[3])
            } else {
                (wdims[2], wdims[3], wdims[0] * wdims[1])
            };
            let oh = conv_output_extent(
                layer,
                dims[layout.height_index()],
                desc.padding.height,
                kh,
                desc.dilation.0,
                desc.stride.0,
            )?;
            let ow = conv_output_extent(
                layer,
                dims[layout.width_index()],
                desc.padding.width,
                kw,
                desc.dilation.1,
                desc.stride.1,
            )?;
            let mut out = [0usize; 4];
            out[0] = dims[0];
            out[layout.channels_index()] = out_channels;
            out[layout.height_index()] = oh;
            out[layout.width_index()] = ow;
            vec![Shape::new(&out)]
        }

        LayerKind::Pooling2d(desc) => {
            require_rank(layer, shape_of(0), 4)?;
            let dims = shape_of(0).dims();
            let layout = desc.data_layout;
            let (oh, ow) = if desc.global {
                (1, 1)
            } else {
                (
                    conv_output_extent(
                        layer,
                        dims[layout.height_index()],
                        desc.padding.height,
                        desc.kernel.0,
                        1,
                        desc.stride.0,
                    )?,
                    conv_output_extent(
                        layer,
                        dims[layout.width_index()],
                        desc.padding.width,
                        desc.kernel.1,
                        1,
                        desc.stride.1,
                    )?,
                )
            };
            let mut out = dims.to_vec();
            out[layout.height_index()] = oh;
            out[layout.width_index()] = ow;
            vec![Shape::new(&out)]
        }

        LayerKind::Pooling3d(desc) => {
            require_rank(layer, shape_of(0), 5)?;
            let dims = shape_of(0).dims();
            let layout = desc.data_layout;
            let (od, oh, ow) = if desc.global {
                (1, 1, 1)
            } else {
                (
                    conv_output_extent(
                        layer,
                        dims[layout.depth_index()],
                        desc.padding.depth,
                        desc.kernel.0,
                        1,
                        desc.stride.0,
                    )?,
                    conv_output_extent(
                        layer,
                        dims[layout.height_index()],
                        desc.padding.height,
                        desc.kernel.1,
                        1,
                        desc.stride.1,
                    )?,
                    conv_output_extent(
                        layer,
                        dims[layout.width_index()],
                        desc.padding.width,
                        desc.kernel.2,
                        1,
                        desc.stride.2,
                    )?,
                )
            };
            let mut out = dims.to_vec();
            out[layout.depth_index()] = od;
            out[layout.height_index()] = oh;
            out[layout.width_index()] = ow;
            vec![Shape::new(&out)]
        }

        LayerKind::Reshape(desc) => {
            if desc.target_shape.num_elements() != shape_of(0).num_elements() {
                return Err(validation(
                    layer,
                    format!(
                        "cannot reshape {} to {}",
                        shape_of(0),
                        desc.target_shape
                    ),
                ));
            }
            vec![desc.target_shape.clone()]
        }

        LayerKind::Permute(desc) => {
            require_rank(layer, shape_of(0), desc.mappings.len())?;
            let dims = shape_of(0).dims();
            let mut out = vec![0usize; dims.len()];
            for (src, &dst) in desc.mappings.iter().enumerate() {
                out[dst] = dims[src];
            }
            vec![Shape::new(&out)]
        }

        LayerKind::Transpose(desc) => {
            require_rank(layer, shape_of(0), desc.mappings.len())?;
            let dims = shape_of(0).dims();
            let out: Vec<usize> = desc.mappings.iter().map(|&src| dims[src]).collect();
            vec![Shape::new(&out)]
        }

        LayerKind::Concat(desc) => vec![concat_output_shape(layer, desc, inputs)?],

        LayerKind::Splitter(desc) => {
            let input = shape_of(0);
            require_rank(layer, input, desc.origins[0].len())?;
            let mut out = Vec::with_capacity(desc.num_views());
            for (origin, size) in desc.origins.iter().zip(&desc.sizes) {
                for d in 0..input.rank() {
                    if origin[d] + size[d] > input.dims()[d] {
                        return Err(validation(
                            layer,
                            format!("splitter view exceeds input extent on dimension {d}"),
                        ));
                    }
                }
                out.push(Shape::new(size));
            }
            out
        }

        LayerKind::Pad(desc) => {
            require_rank(layer, shape_of(0), desc.pad_list.len())?;
            let out: Vec<usize> = shape_of(0)
                .dims()
                .iter()
                .zip(&desc.pad_list)
                .map(|(&d, &(lo, hi))| d + lo + hi)
                .collect();
            vec![Shape::new(&out)]
        }

        LayerKind::Mean(desc) => vec![reduced_shape(layer, shape_of(0), &desc.axes, desc.keep_dims)?],
        LayerKind::Reduce(desc) => vec![reduced_shape(layer, shape_of(0), &desc.axes, desc.keep_dims)?],

        LayerKind::SpaceToBatchNd(desc) => {
            require_rank(layer, shape_of(0), 4)?;
            let dims = shape_of(0).dims();
            let layout = desc.data_layout;
            let block: usize = desc.block_shape.iter().product();
            let spatial = [layout.height_index(), layout.width_index()];
            let mut out = dims.to_vec();
            out[0] = dims[0] * block;
            for (i, &d) in spatial.iter().enumerate() {
                let padded = dims[d] + desc.pad_list[i].0 + desc.pad_list[i].1;
                if padded % desc.block_shape[i] != 0 {
                    return Err(validation(
                        layer,
                        format!("padded extent {padded} not divisible by block {}", desc.block_shape[i]),
                    ));
                }
                out[d] = padded / desc.block_shape[i];
            }
            vec![Shape::new(&out)]
        }

        LayerKind::BatchToSpaceNd(desc) => {
            require_rank(layer, shape_of(0), 4)?;
            let dims = shape_of(0).dims();
            let layout = desc.data_layout;
            let block: usize = desc.block_shape.iter().product();
            if dims[0] % block != 0 {
                return Err(validation(
                    layer,
                    format!("batch {} not divisible by block product {block}", dims[0]),
                ));
            }
            let spatial = [layout.height_index(), layout.width_index()];
            let mut out = dims.to_vec();
            out[0] = dims[0] / block;
            for (i, &d) in spatial.iter().enumerate() {
                let expanded = dims[d] * desc.block_shape[i];
                let cropped = expanded
                    .checked_sub(desc.crops[i].0 + desc.crops[i].1)
                    .ok_or_else(|| validation(layer, "crops exceed expanded extent"))?;
                out[d] = cropped;
            }
            vec![Shape::new(&out)]
        }

        LayerKind::SpaceToDepth(desc) => {
            require_rank(layer, shape_of(0), 4)?;
            let dims = shape_of(0).dims();
            let layout = desc.data_layout;
            let b = desc.block_size;
            let (h, w) = (dims[layout.height_index()], dims[layout.width_index()]);
            if h % b != 0 || w % b != 0 {
                return Err(validation(
                    layer,
                    format!("spatial extents {h}x{w} not divisible by block {b}"),
                ));
            }
            let mut out = dims.to_vec();
            out[layout.height_index()] = h / b;
            out[layout.width_index()] = w / b;
            out[layout.channels_index()] = dims[layout.channels_index()] * b * b;
            vec![Shape::new(&out)]
        }

        LayerKind::DepthToSpace(desc) => {
            require_rank(layer, shape_of(0), 4)?;
            let dims = shape_of(0).dims();
            let layout = desc.data_layout;
            let b = desc.block_size;
            let c = dims[layout.channels_index()];
            if c % (b * b) != 0 {
                return Err(validation(
                    layer,
                    format!("channel count {c} not divisible by block square {}", b * b),
                ));
            }
            let mut out = dims.to_vec();
            out[layout.height_index()] = dims[layout.height_index()] * b;
            out[layout.width_index()] = dims[layout.width_index()] * b;
            out[layout.channels_index()] = c / (b * b);
            vec![Shape::new(&out)]
        }

        LayerKind::BroadcastTo(desc) => {
            let target = &desc.target_shape;
            if broadcast_shapes(shape_of(0), target).as_ref() != Some(target) {
                return Err(validation(
                    layer,
                    format!("shape {} does not broadcast to {}", shape_of(0), target),
                ));
            }
            vec![target.clone()]
        }

        LayerKind::Lstm { desc, params } => {
            require_rank(layer, shape_of(0), 2)?;
            let batch = shape_of(0).dims()[0];
            let num_units = params.basic.input_to_forget_weights.shape().dims()[0];
            let output_size = params.basic.recurrent_to_forget_weights.shape().dims()[1];
            let gates = if desc.cifg_enabled { 3 } else { 4 };
            vec![
                Shape::new(&[batch, num_units * gates]),
                Shape::new(&[batch, output_size]),
                Shape::new(&[batch, num_units]),
                Shape::new(&[batch, output_size]),
            ]
        }

        LayerKind::BatchMatMul(desc) => {
            let (a, b) = (shape_of(0), shape_of(1));
            if a.rank() < 2 || b.rank() < 2 {
                return Err(validation(layer, "batch matmul inputs must have rank >= 2"));
            }
            let (ar, br) = (a.rank(), b.rank());
            let (mut m, mut ka) = (a.dims()[ar - 2], a.dims()[ar - 1]);
            if desc.transpose_x {
                std::mem::swap(&mut m, &mut ka);
            }
            let (mut kb, mut n) = (b.dims()[br - 2], b.dims()[br - 1]);
            if desc.transpose_y {
                std::mem::swap(&mut kb, &mut n);
            }
            if ka != kb {
                return Err(validation(
                    layer,
                    format!("batch matmul contraction mismatch: {ka} vs {kb}"),
                ));
            }
            let batch_a = Shape::new(&a.dims()[..ar - 2]);
            let batch_b = Shape::new(&b.dims()[..br - 2]);
            let batch = broadcast_shapes(&batch_a, &batch_b).ok_or_else(|| {
                validation(layer, "batch matmul leading dimensions do not broadcast")
            })?;
            let mut out = batch.dims().to_vec();
            out.push(m);
            out.push(n);
            vec![Shape::new(&out)]
        }

        LayerKind::Gather(desc) => {
            let params = shape_of(0);
            let indices = shape_of(1);
            let rank = params.rank() as i32;
            let axis = if desc.axis < 0 { desc.axis + rank } else { desc.axis };
            if axis < 0 || axis >= rank {
                return Err(validation(
                    layer,
                    format!("gather axis {} out of range for {params}", desc.axis),
                ));
            }
            let axis = axis as usize;
            let mut out = params.dims()[..axis].to_vec();
            out.extend_from_slice(indices.dims());
            out.extend_from_slice(&params.dims()[axis + 1..]);
            vec![Shape::new(&out)]
        }

        LayerKind::GatherNd => {
            let params = shape_of(0);
            let indices = shape_of(1);
            let depth = *indices
                .dims()
                .last()
                .ok_or_else(|| validation(layer, "gather-nd indices must not be scalar"))?;
            if depth > params.rank() {
                return Err(validation(
                    layer,
                    format!("gather-nd index depth {depth} exceeds params rank"),
                ));
            }
            let mut out = indices.dims()[..indices.rank() - 1].to_vec();
            out.extend_from_slice(&params.dims()[depth..]);
            if out.is_empty() {
                out.push(1);
            }
            vec![Shape::new(&out)]
        }

        LayerKind::Slice(desc) => {
            require_rank(layer, shape_of(0), desc.begin.len())?;
            for (d, (&b, &s)) in desc.begin.iter().zip(&desc.size).enumerate() {
                if b + s > shape_of(0).dims()[d] {
                    return Err(validation(
                        layer,
                        format!("slice exceeds input extent on dimension {d}"),
                    ));
                }
            }
            vec![Shape::new(&desc.size)]
        }

        LayerKind::StridedSlice(desc) => vec![strided_slice_shape(layer, desc, shape_of(0))?],

        LayerKind::Stack(desc) => {
            for info in inputs {
                if info.shape != desc.input_shape {
                    return Err(validation(
                        layer,
                        format!(
                            "stack input {} differs from the declared shape {}",
                            info.shape, desc.input_shape
                        ),
                    ));
                }
            }
            let mut out = desc.input_shape.dims().to_vec();
            out.insert(desc.axis, desc.num_inputs);
            vec![Shape::new(&out)]
        }

        LayerKind::Tile(desc) => {
            require_rank(layer, shape_of(0), desc.multiples.len())?;
            let out: Vec<usize> = shape_of(0)
                .dims()
                .iter()
                .zip(&desc.multiples)
                .map(|(&d, &m)| d * m)
                .collect();
            vec![Shape::new(&out)]
        }

        LayerKind::Resize(desc) => {
            require_rank(layer, shape_of(0), 4)?;
            let layout = desc.data_layout;
            let mut out = shape_of(0).dims().to_vec();
            out[layout.height_index()] = desc.target_height;
            out[layout.width_index()] = desc.target_width;
            vec![Shape::new(&out)]
        }

        LayerKind::Rank => vec![Shape::scalar()],
        LayerKind::Shape => vec![Shape::new(&[shape_of(0).rank()])],

        LayerKind::ScatterNd => vec![shape_of(0).clone()],

        LayerKind::DetectionPostProcess { desc, .. } => {
            let detected = desc.max_detections * desc.max_classes_per_detection;
            vec![
                Shape::new(&[1, detected, 4]),
                Shape::new(&[1, detected]),
                Shape::new(&[1, detected]),
                Shape::new(&[1]),
            ]
        }

        LayerKind::Precompiled(_) | LayerKind::StandIn(_) | LayerKind::Fused(_) => {
            // Externally defined kinds: shapes must be pre-set.
            let mut out = Vec::with_capacity(layer.num_outputs());
            for slot in 0..layer.num_outputs() {
                match layer.output_info(slot) {
                    Some(info) => out.push(info.shape.clone()),
                    None => {
                        return Err(validation(
                            layer,
                            format!("output {slot} of an externally defined kind has no tensor info"),
                        ))
                    }
                }
            }
            out
        }
    };

    Ok(out)
}
