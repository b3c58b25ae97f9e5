//! Reference checks for the per-kind shape inference rules.

use tensorplan::graph::descriptors::*;
use tensorplan::graph::{Graph, GraphBuilder, ShapeInferenceMethod};
use tensorplan::tensor::ConstTensor;
use tensorplan::{DataType, LayerId, Shape, TPError, TensorInfo};

fn f32_info(dims: &[usize]) -> TensorInfo {
    TensorInfo::new(Shape::new(dims), DataType::Float32)
}

/// Build input -> layer, infer, and return the layer's output shape.
fn inferred_unary(
    input_dims: &[usize],
    make: impl FnOnce(&mut GraphBuilder) -> LayerId,
) -> Result<Shape, TPError> {
    let mut graph = Graph::new();
    let mut gb = GraphBuilder::new(&mut graph);
    let input = gb.input(0, "input").unwrap();
    gb.set_output_info(input, 0, f32_info(input_dims));
    let layer = make(&mut gb);
    gb.connect(input, layer).unwrap();
    graph.infer_tensor_infos(ShapeInferenceMethod::InferAndValidate)?;
    Ok(graph.layer(layer).output_info(0).unwrap().shape.clone())
}

fn inferred_binary(
    a_dims: &[usize],
    b_dims: &[usize],
    make: impl FnOnce(&mut GraphBuilder) -> LayerId,
) -> Result<Shape, TPError> {
    let mut graph = Graph::new();
    let mut gb = GraphBuilder::new(&mut graph);
    let a = gb.input(0, "a").unwrap();
    gb.set_output_info(a, 0, f32_info(a_dims));
    let b = gb.input(1, "b").unwrap();
    gb.set_output_info(b, 0, f32_info(b_dims));
    let layer = make(&mut gb);
    gb.connect_slots(a, 0, layer, 0).unwrap();
    gb.connect_slots(b, 0, layer, 1).unwrap();
    graph.infer_tensor_infos(ShapeInferenceMethod::InferAndValidate)?;
    Ok(graph.layer(layer).output_info(0).unwrap().shape.clone())
}

#[test]
fn elementwise_binary_broadcasts_to_max_suffix() {
    let shape = inferred_binary(&[2, 3, 4], &[3, 1], |gb| {
        gb.elementwise_binary(BinaryOp::Add, "add").unwrap()
    })
    .unwrap();
    assert_eq!(shape, Shape::new(&[2, 3, 4]));

    let shape = inferred_binary(&[1], &[4, 5], |gb| {
        gb.elementwise_binary(BinaryOp::Mul, "mul").unwrap()
    })
    .unwrap();
    assert_eq!(shape, Shape::new(&[4, 5]));

    let err = inferred_binary(&[2, 3], &[2, 4], |gb| {
        gb.elementwise_binary(BinaryOp::Add, "add").unwrap()
    })
    .unwrap_err();
    assert!(matches!(err, TPError::LayerValidation { .. }));
}

#[test]
fn convolution_output_follows_window_arithmetic() {
    // out = 1 + (in + pad_lo + pad_hi - (dilation*(k-1)+1)) / stride
    let shape = inferred_unary(&[1, 3, 8, 8], |gb| {
        gb.convolution2d(
            Convolution2dDescriptor {
                stride: (2, 2),
                padding: Padding2d {
                    height: (1, 1),
                    width: (1, 1),
                },
                dilation: (1, 1),
                bias_enabled: false,
                data_layout: DataLayout::Nchw,
            },
            ConstTensor::random_f32(&[16, 3, 3, 3]),
            None,
            "conv",
        )
        .unwrap()
    })
    .unwrap();
    assert_eq!(shape, Shape::new(&[1, 16, 4, 4]));

    // Dilation stretches the effective kernel.
    let shape = inferred_unary(&[1, 3, 9, 9], |gb| {
        gb.convolution2d(
            Convolution2dDescriptor {
                stride: (1, 1),
                padding: Padding2d::default(),
                dilation: (2, 2),
                bias_enabled: false,
                data_layout: DataLayout::Nchw,
            },
            ConstTensor::random_f32(&[4, 3, 3, 3]),
            None,
            "conv",
        )
        .unwrap()
    })
    .unwrap();
    assert_eq!(shape, Shape::new(&[1, 4, 5, 5]));
}

#[test]
fn depthwise_convolution_multiplies_channels() {
    let shape = inferred_unary(&[1, 3, 8, 8], |gb| {
        gb.depthwise_convolution2d(
            DepthwiseConvolution2dDescriptor {
                stride: (1, 1),
                padding: Padding2d::default(),
                dilation: (1, 1),
                bias_enabled: false,
                data_layout: DataLayout::Nchw,
            },
            ConstTensor::random_f32(&[2, 3, 3, 3]),
            None,
            "dwconv",
        )
        .unwrap()
    })
    .unwrap();
    assert_eq!(shape, Shape::new(&[1, 6, 6, 6]));
}

#[test]
fn pooling_has_a_global_branch() {
    let shape = inferred_unary(&[1, 4, 6, 6], |gb| {
        gb.pooling2d(
            Pooling2dDescriptor {
                pool_type: PoolType::Max,
                kernel: (2, 2),
                stride: (2, 2),
                padding: Padding2d::default(),
                global: false,
                data_layout: DataLayout::Nchw,
            },
            "pool",
        )
        .unwrap()
    })
    .unwrap();
    assert_eq!(shape, Shape::new(&[1, 4, 3, 3]));

    let shape = inferred_unary(&[1, 4, 6, 6], |gb| {
        gb.pooling2d(
            Pooling2dDescriptor {
                pool_type: PoolType::Average,
                kernel: (0, 0),
                stride: (0, 0),
                padding: Padding2d::default(),
                global: true,
                data_layout: DataLayout::Nchw,
            },
            "gpool",
        )
        .unwrap()
    })
    .unwrap();
    assert_eq!(shape, Shape::new(&[1, 4, 1, 1]));
}

#[test]
fn pooling3d_follows_the_same_window_arithmetic() {
    let shape = inferred_unary(&[1, 4, 6, 6, 6], |gb| {
        gb.pooling3d(
            Pooling3dDescriptor {
                pool_type: PoolType::Max,
                kernel: (2, 2, 2),
                stride: (2, 2, 2),
                padding: Padding3d::default(),
                global: false,
                data_layout: DataLayout3d::Ncdhw,
            },
            "pool3d",
        )
        .unwrap()
    })
    .unwrap();
    assert_eq!(shape, Shape::new(&[1, 4, 3, 3, 3]));

    let shape = inferred_unary(&[2, 5, 4, 4, 3], |gb| {
        gb.pooling3d(
            Pooling3dDescriptor {
                pool_type: PoolType::Average,
                kernel: (0, 0, 0),
                stride: (0, 0, 0),
                padding: Padding3d::default(),
                global: true,
                data_layout: DataLayout3d::Ndhwc,
            },
            "gpool3d",
        )
        .unwrap()
    })
    .unwrap();
    assert_eq!(shape, Shape::new(&[2, 1, 1, 1, 3]));

    // Rank-4 input is not a 3-D pooling volume.
    let err = inferred_unary(&[1, 4, 6, 6], |gb| {
        gb.pooling3d(Pooling3dDescriptor::default(), "pool3d").unwrap()
    })
    .unwrap_err();
    assert!(matches!(err, TPError::LayerValidation { .. }));
}

#[test]
fn pooling3d_zero_stride_without_global_is_rejected() {
    let mut graph = Graph::new();
    let mut gb = GraphBuilder::new(&mut graph);
    let err = gb
        .pooling3d(
            Pooling3dDescriptor {
                stride: (2, 0, 2),
                ..Default::default()
            },
            "pool3d",
        )
        .unwrap_err();
    assert!(matches!(err, TPError::InvalidArgument(_)));
}

#[test]
fn normalization_kinds_preserve_the_input_shape() {
    let shape = inferred_unary(&[2, 8, 5, 5], |gb| {
        gb.instance_normalization(InstanceNormalizationDescriptor::default(), "inorm")
            .unwrap()
    })
    .unwrap();
    assert_eq!(shape, Shape::new(&[2, 8, 5, 5]));

    let shape = inferred_unary(&[2, 8, 5, 5], |gb| {
        gb.l2_normalization(L2NormalizationDescriptor::default(), "l2norm")
            .unwrap()
    })
    .unwrap();
    assert_eq!(shape, Shape::new(&[2, 8, 5, 5]));

    let shape = inferred_unary(&[2, 8, 5, 5], |gb| {
        gb.normalization(
            NormalizationDescriptor {
                norm_size: 5,
                ..Default::default()
            },
            "lrn",
        )
        .unwrap()
    })
    .unwrap();
    assert_eq!(shape, Shape::new(&[2, 8, 5, 5]));
}

#[test]
fn normalization_window_must_be_non_zero() {
    let mut graph = Graph::new();
    let mut gb = GraphBuilder::new(&mut graph);
    let err = gb
        .normalization(
            NormalizationDescriptor {
                norm_size: 0,
                ..Default::default()
            },
            "lrn",
        )
        .unwrap_err();
    assert!(matches!(err, TPError::InvalidArgument(_)));
}

#[test]
fn zero_stride_without_global_pooling_is_rejected() {
    let mut graph = Graph::new();
    let mut gb = GraphBuilder::new(&mut graph);
    let err = gb
        .pooling2d(
            Pooling2dDescriptor {
                pool_type: PoolType::Max,
                kernel: (2, 2),
                stride: (0, 0),
                padding: Padding2d::default(),
                global: false,
                data_layout: DataLayout::Nchw,
            },
            "pool",
        )
        .unwrap_err();
    assert!(matches!(err, TPError::InvalidArgument(_)));
}

#[test]
fn concat_views_tile_the_bounding_box() {
    let shape = inferred_binary(&[1, 2, 4], &[1, 3, 4], |gb| {
        gb.concat(
            OriginsDescriptor::along_axis(1, 3, &[2, 3]),
            "concat",
        )
        .unwrap()
    })
    .unwrap();
    assert_eq!(shape, Shape::new(&[1, 5, 4]));
}

#[test]
fn concat_with_overlapping_views_fails_validation() {
    let err = inferred_binary(&[1, 3, 4], &[1, 3, 4], |gb| {
        gb.concat(
            OriginsDescriptor {
                origins: vec![vec![0, 0, 0], vec![0, 1, 0]],
            },
            "concat",
        )
        .unwrap()
    })
    .unwrap_err();
    assert!(matches!(err, TPError::LayerValidation { .. }));
}

#[test]
fn splitter_views_report_their_declared_sizes() {
    let mut graph = Graph::new();
    let mut gb = GraphBuilder::new(&mut graph);
    let input = gb.input(0, "input").unwrap();
    gb.set_output_info(input, 0, f32_info(&[1, 5, 4]));
    let split = gb
        .splitter(
            ViewsDescriptor {
                origins: vec![vec![0, 0, 0], vec![0, 2, 0]],
                sizes: vec![vec![1, 2, 4], vec![1, 3, 4]],
            },
            "split",
        )
        .unwrap();
    gb.connect(input, split).unwrap();
    graph
        .infer_tensor_infos(ShapeInferenceMethod::InferAndValidate)
        .unwrap();
    assert_eq!(
        graph.layer(split).output_info(0).unwrap().shape,
        Shape::new(&[1, 2, 4])
    );
    assert_eq!(
        graph.layer(split).output_info(1).unwrap().shape,
        Shape::new(&[1, 3, 4])
    );
}

#[test]
fn concat_of_splitter_views_restores_the_input_shape() -> anyhow::Result<()> {
    // Splitter of X re-concatenated with the same view descriptors is the
    // identity on shapes.
    let mut graph = Graph::new();
    let mut gb = GraphBuilder::new(&mut graph);
    let input = gb.input(0, "input")?;
    gb.set_output_info(input, 0, f32_info(&[1, 5, 4]));
    let split = gb.splitter(
        ViewsDescriptor {
            origins: vec![vec![0, 0, 0], vec![0, 2, 0]],
            sizes: vec![vec![1, 2, 4], vec![1, 3, 4]],
        },
        "split",
    )?;
    let concat = gb.concat(
        OriginsDescriptor {
            origins: vec![vec![0, 0, 0], vec![0, 2, 0]],
        },
        "concat",
    )?;
    gb.connect(input, split)?;
    gb.connect_slots(split, 0, concat, 0)?;
    gb.connect_slots(split, 1, concat, 1)?;
    graph.infer_tensor_infos(ShapeInferenceMethod::InferAndValidate)?;
    assert_eq!(
        graph.layer(concat).output_info(0).unwrap().shape,
        Shape::new(&[1, 5, 4])
    );
    Ok(())
}

#[test]
fn reductions_drop_or_keep_axes() {
    let shape = inferred_unary(&[2, 3, 4], |gb| {
        gb.mean(
            MeanDescriptor {
                axes: vec![1],
                keep_dims: true,
            },
            "mean",
        )
        .unwrap()
    })
    .unwrap();
    assert_eq!(shape, Shape::new(&[2, 1, 4]));

    let shape = inferred_unary(&[2, 3, 4], |gb| {
        gb.reduce(
            ReduceDescriptor {
                op: ReduceOp::Sum,
                axes: vec![0, 2],
                keep_dims: false,
            },
            "reduce",
        )
        .unwrap()
    })
    .unwrap();
    assert_eq!(shape, Shape::new(&[3]));

    let err = inferred_unary(&[2, 3], |gb| {
        gb.mean(
            MeanDescriptor {
                axes: vec![5],
                keep_dims: false,
            },
            "mean",
        )
        .unwrap()
    })
    .unwrap_err();
    assert!(matches!(err, TPError::LayerValidation { .. }));
}

#[test]
fn space_and_depth_rewrites_preserve_element_count() {
    let shape = inferred_unary(&[1, 8, 4, 4], |gb| {
        gb.depth_to_space(
            DepthToSpaceDescriptor {
                block_size: 2,
                data_layout: DataLayout::Nchw,
            },
            "d2s",
        )
        .unwrap()
    })
    .unwrap();
    assert_eq!(shape, Shape::new(&[1, 2, 8, 8]));

    let shape = inferred_unary(&[1, 2, 8, 8], |gb| {
        gb.space_to_depth(
            SpaceToDepthDescriptor {
                block_size: 2,
                data_layout: DataLayout::Nchw,
            },
            "s2d",
        )
        .unwrap()
    })
    .unwrap();
    assert_eq!(shape, Shape::new(&[1, 8, 4, 4]));

    let shape = inferred_unary(&[1, 4, 4, 1], |gb| {
        gb.space_to_batch_nd(
            SpaceToBatchNdDescriptor {
                block_shape: vec![2, 2],
                pad_list: vec![(0, 0), (0, 0)],
                data_layout: DataLayout::Nhwc,
            },
            "s2b",
        )
        .unwrap()
    })
    .unwrap();
    assert_eq!(shape, Shape::new(&[4, 2, 2, 1]));

    let shape = inferred_unary(&[4, 2, 2, 1], |gb| {
        gb.batch_to_space_nd(
            BatchToSpaceNdDescriptor {
                block_shape: vec![2, 2],
                crops: vec![(0, 0), (0, 0)],
                data_layout: DataLayout::Nhwc,
            },
            "b2s",
        )
        .unwrap()
    })
    .unwrap();
    assert_eq!(shape, Shape::new(&[1, 4, 4, 1]));
}

#[test]
fn batch_matmul_contracts_and_broadcasts() {
    let shape = inferred_binary(&[2, 3, 4], &[2, 4, 5], |gb| {
        gb.batch_mat_mul(BatchMatMulDescriptor::default(), "bmm").unwrap()
    })
    .unwrap();
    assert_eq!(shape, Shape::new(&[2, 3, 5]));

    let shape = inferred_binary(&[2, 4, 3], &[2, 4, 5], |gb| {
        gb.batch_mat_mul(
            BatchMatMulDescriptor {
                transpose_x: true,
                transpose_y: false,
            },
            "bmm",
        )
        .unwrap()
    })
    .unwrap();
    assert_eq!(shape, Shape::new(&[2, 3, 5]));

    let err = inferred_binary(&[2, 3, 4], &[2, 3, 5], |gb| {
        gb.batch_mat_mul(BatchMatMulDescriptor::default(), "bmm").unwrap()
    })
    .unwrap_err();
    assert!(matches!(err, TPError::LayerValidation { .. }));
}

#[test]
fn lstm_derives_gate_stacked_shapes() {
    let num_units = 4;
    let input_size = 3;
    let output_size = 4;
    let weight = |r, c| ConstTensor::random_f32(&[r, c]);
    let bias = |n| ConstTensor::random_f32(&[n]);
    let params = tensorplan::graph::layer::LstmParams {
        basic: tensorplan::graph::layer::LstmBasicParams {
            input_to_forget_weights: weight(num_units, input_size),
            input_to_cell_weights: weight(num_units, input_size),
            input_to_output_weights: weight(num_units, input_size),
            recurrent_to_forget_weights: weight(num_units, output_size),
            recurrent_to_cell_weights: weight(num_units, output_size),
            recurrent_to_output_weights: weight(num_units, output_size),
            forget_gate_bias: bias(num_units),
            cell_bias: bias(num_units),
            output_gate_bias: bias(num_units),
        },
        cifg: Some(tensorplan::graph::layer::LstmCifgParams {
            input_to_input_weights: weight(num_units, input_size),
            recurrent_to_input_weights: weight(num_units, output_size),
            input_gate_bias: bias(num_units),
        }),
        projection: None,
        peephole: None,
        layer_norm: None,
    };

    let mut graph = Graph::new();
    let mut gb = GraphBuilder::new(&mut graph);
    let input = gb.input(0, "input").unwrap();
    gb.set_output_info(input, 0, f32_info(&[2, input_size]));
    let state_out = gb.input(1, "state_in").unwrap();
    gb.set_output_info(state_out, 0, f32_info(&[2, output_size]));
    let cell_in = gb.input(2, "cell_in").unwrap();
    gb.set_output_info(cell_in, 0, f32_info(&[2, num_units]));
    let lstm = gb.lstm(LstmDescriptor::default(), params, "lstm").unwrap();
    gb.connect_slots(input, 0, lstm, 0).unwrap();
    gb.connect_slots(state_out, 0, lstm, 1).unwrap();
    gb.connect_slots(cell_in, 0, lstm, 2).unwrap();
    graph
        .infer_tensor_infos(ShapeInferenceMethod::InferAndValidate)
        .unwrap();

    // CIFG disabled: four gates stacked in the scratch buffer.
    assert_eq!(
        graph.layer(lstm).output_info(0).unwrap().shape,
        Shape::new(&[2, num_units * 4])
    );
    assert_eq!(
        graph.layer(lstm).output_info(1).unwrap().shape,
        Shape::new(&[2, output_size])
    );
    assert_eq!(
        graph.layer(lstm).output_info(2).unwrap().shape,
        Shape::new(&[2, num_units])
    );
    assert_eq!(
        graph.layer(lstm).output_info(3).unwrap().shape,
        Shape::new(&[2, output_size])
    );
}

#[test]
fn lstm_without_input_gate_params_is_rejected_when_cifg_disabled() {
    let num_units = 4;
    let weight = |r, c| ConstTensor::random_f32(&[r, c]);
    let bias = |n| ConstTensor::random_f32(&[n]);
    let params = tensorplan::graph::layer::LstmParams {
        basic: tensorplan::graph::layer::LstmBasicParams {
            input_to_forget_weights: weight(num_units, 3),
            input_to_cell_weights: weight(num_units, 3),
            input_to_output_weights: weight(num_units, 3),
            recurrent_to_forget_weights: weight(num_units, 4),
            recurrent_to_cell_weights: weight(num_units, 4),
            recurrent_to_output_weights: weight(num_units, 4),
            forget_gate_bias: bias(num_units),
            cell_bias: bias(num_units),
            output_gate_bias: bias(num_units),
        },
        cifg: None,
        projection: None,
        peephole: None,
        layer_norm: None,
    };

    let mut graph = Graph::new();
    let mut gb = GraphBuilder::new(&mut graph);
    let err = gb
        .lstm(LstmDescriptor::default(), params, "lstm")
        .unwrap_err();
    assert!(matches!(err, TPError::InvalidArgument(_)));
}

#[test]
fn validate_only_rejects_mismatched_declared_shapes() {
    let mut graph = Graph::new();
    let mut gb = GraphBuilder::new(&mut graph);
    let input = gb.input(0, "input").unwrap();
    gb.set_output_info(input, 0, f32_info(&[1, 2, 3, 5]));
    let reshape = gb
        .reshape(
            ReshapeDescriptor {
                target_shape: Shape::new(&[1, 30]),
            },
            "reshape",
        )
        .unwrap();
    gb.set_output_info(reshape, 0, f32_info(&[1, 31]));
    gb.connect(input, reshape).unwrap();
    let err = graph
        .infer_tensor_infos(ShapeInferenceMethod::ValidateOnly)
        .unwrap_err();
    assert!(matches!(err, TPError::LayerValidation { .. }));
}

#[test]
fn gather_and_stack_and_tile_shapes() {
    let shape = inferred_binary(&[5, 6, 7], &[2, 3], |gb| {
        gb.gather(GatherDescriptor { axis: 1 }, "gather").unwrap()
    })
    .unwrap();
    assert_eq!(shape, Shape::new(&[5, 2, 3, 7]));

    let shape = inferred_binary(&[3, 4], &[3, 4], |gb| {
        gb.stack(
            StackDescriptor {
                axis: 1,
                num_inputs: 2,
                input_shape: Shape::new(&[3, 4]),
            },
            "stack",
        )
        .unwrap()
    })
    .unwrap();
    assert_eq!(shape, Shape::new(&[3, 2, 4]));

    let shape = inferred_unary(&[2, 3], |gb| {
        gb.tile(
            TileDescriptor {
                multiples: vec![2, 3],
            },
            "tile",
        )
        .unwrap()
    })
    .unwrap();
    assert_eq!(shape, Shape::new(&[4, 9]));
}
