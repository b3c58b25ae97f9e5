//! Scenario tests for the algebraic pass library: each graph must come out
//! of the optimizer with an exact layer sequence, not merely an equivalent
//! one.

use tensorplan::graph::descriptors::{
    ActivationDescriptor, FakeQuantizationDescriptor, PermuteDescriptor, ReshapeDescriptor,
};
use tensorplan::graph::{Graph, GraphBuilder, LayerKind};
use tensorplan::optimizer::{passes, Optimizer};
use tensorplan::{DataType, Shape, TensorInfo};

fn optimize_graph(graph: &mut Graph) {
    Optimizer::with_passes(passes::default_pass_set())
        .run(graph)
        .unwrap();
}

fn kind_sequence(graph: &Graph) -> Vec<&'static str> {
    graph
        .topological_order()
        .into_iter()
        .map(|id| graph.layer(id).kind_name())
        .collect()
}

fn f32_info(dims: &[usize]) -> TensorInfo {
    TensorInfo::new(Shape::new(dims), DataType::Float32)
}

#[test]
fn squash_inverse_permutes() {
    let mut graph = Graph::new();
    let mut gb = GraphBuilder::new(&mut graph);

    let input = gb.input(0, "input").unwrap();
    gb.set_output_info(input, 0, f32_info(&[1, 2, 3, 5]));
    let perm0231 = gb.permute(PermuteDescriptor::new(&[0, 2, 3, 1]), "perm0231").unwrap();
    gb.set_output_info(perm0231, 0, f32_info(&[1, 5, 2, 3]));
    let perm0312 = gb.permute(PermuteDescriptor::new(&[0, 3, 1, 2]), "perm0312").unwrap();
    gb.set_output_info(perm0312, 0, f32_info(&[1, 2, 3, 5]));
    let output = gb.output(0, "output").unwrap();
    gb.connect(input, perm0231).unwrap();
    gb.connect(perm0231, perm0312).unwrap();
    gb.connect(perm0312, output).unwrap();

    assert_eq!(
        kind_sequence(&graph),
        vec!["Input", "Permute", "Permute", "Output"]
    );

    optimize_graph(&mut graph);

    assert_eq!(kind_sequence(&graph), vec!["Input", "Output"]);
}

#[test]
fn move_permute_up_past_elementwise_chain() {
    let info = f32_info(&[1, 5, 2, 3]);
    let permuted = f32_info(&[1, 3, 5, 2]);

    let mut graph = Graph::new();
    let mut gb = GraphBuilder::new(&mut graph);

    let in1 = gb.input(0, "in1").unwrap();
    let in2 = gb.input(1, "in2").unwrap();
    let in3 = gb.input(2, "in3").unwrap();
    for id in [in1, in2, in3] {
        gb.set_output_info(id, 0, info.clone());
    }

    let mul = gb.multiplication("mul").unwrap();
    let memcopy = gb.mem_copy("memcopy").unwrap();
    let floor = gb.floor("floor").unwrap();
    let fq = gb
        .fake_quantization(FakeQuantizationDescriptor::default(), "fq")
        .unwrap();
    let add = gb.addition("add").unwrap();
    let act = gb
        .activation(ActivationDescriptor::default(), "act")
        .unwrap();
    let perm = gb.permute(PermuteDescriptor::new(&[0, 2, 3, 1]), "perm").unwrap();
    let output = gb.output(0, "output").unwrap();

    for id in [mul, memcopy, floor, fq, add, act] {
        gb.set_output_info(id, 0, info.clone());
    }
    gb.set_output_info(perm, 0, permuted.clone());

    gb.connect_slots(in3, 0, mul, 0).unwrap();
    gb.connect_slots(in2, 0, mul, 1).unwrap();
    gb.connect(mul, memcopy).unwrap();
    gb.connect(memcopy, floor).unwrap();
    gb.connect(floor, fq).unwrap();
    gb.connect_slots(fq, 0, add, 0).unwrap();
    gb.connect_slots(in1, 0, add, 1).unwrap();
    gb.connect(add, act).unwrap();
    gb.connect(act, perm).unwrap();
    gb.connect(perm, output).unwrap();

    optimize_graph(&mut graph);

    assert_eq!(
        kind_sequence(&graph),
        vec![
            "Input",
            "Input",
            "Input",
            "Permute",
            "Permute",
            "Permute",
            "Multiplication",
            "MemCopy",
            "Floor",
            "FakeQuantization",
            "Addition",
            "Activation",
            "Output",
        ]
    );

    // The tail operators all see the permuted tensor now.
    for id in graph.topological_order() {
        let layer = graph.layer(id);
        if matches!(
            layer.kind_name(),
            "Multiplication" | "MemCopy" | "Floor" | "FakeQuantization" | "Addition" | "Activation"
        ) {
            assert_eq!(layer.output_info(0).unwrap().shape, permuted.shape);
        }
    }
}

#[test]
fn permute_of_unit_dims_becomes_reshape() {
    let mut graph = Graph::new();
    let mut gb = GraphBuilder::new(&mut graph);

    let input = gb.input(0, "input").unwrap();
    gb.set_output_info(input, 0, f32_info(&[1, 2, 3, 1]));
    let perm = gb.permute(PermuteDescriptor::new(&[0, 2, 3, 1]), "perm").unwrap();
    gb.set_output_info(perm, 0, f32_info(&[1, 1, 2, 3]));
    let output = gb.output(0, "output").unwrap();
    gb.connect(input, perm).unwrap();
    gb.connect(perm, output).unwrap();

    optimize_graph(&mut graph);

    assert_eq!(kind_sequence(&graph), vec!["Input", "Reshape", "Output"]);
    let reshape = graph
        .topological_order()
        .into_iter()
        .find(|&id| graph.layer(id).kind_name() == "Reshape")
        .unwrap();
    match graph.layer(reshape).kind() {
        LayerKind::Reshape(desc) => {
            assert_eq!(desc.target_shape, Shape::new(&[1, 1, 2, 3]));
        }
        _ => unreachable!(),
    }
    assert_eq!(
        graph.layer(reshape).output_info(0).unwrap().shape,
        Shape::new(&[1, 1, 2, 3])
    );
}

#[test]
fn squash_consecutive_reshapes_then_identity() {
    let mut graph = Graph::new();
    let mut gb = GraphBuilder::new(&mut graph);

    let input = gb.input(0, "input").unwrap();
    gb.set_output_info(input, 0, f32_info(&[1, 2, 3, 5]));
    let reshape1 = gb
        .reshape(
            ReshapeDescriptor {
                target_shape: Shape::new(&[1, 30, 1, 1]),
            },
            "reshape1",
        )
        .unwrap();
    gb.set_output_info(reshape1, 0, f32_info(&[1, 30, 1, 1]));
    let reshape2 = gb
        .reshape(
            ReshapeDescriptor {
                target_shape: Shape::new(&[1, 2, 1, 15]),
            },
            "reshape2",
        )
        .unwrap();
    gb.set_output_info(reshape2, 0, f32_info(&[1, 2, 1, 15]));
    let output = gb.output(0, "output").unwrap();
    gb.connect(input, reshape1).unwrap();
    gb.connect(reshape1, reshape2).unwrap();
    gb.connect(reshape2, output).unwrap();

    optimize_graph(&mut graph);

    // The two reshapes collapse into the second one.
    assert_eq!(kind_sequence(&graph), vec!["Input", "Reshape", "Output"]);
    let reshape = graph
        .topological_order()
        .into_iter()
        .find(|&id| graph.layer(id).kind_name() == "Reshape")
        .unwrap();
    match graph.layer(reshape).kind() {
        LayerKind::Reshape(desc) => {
            assert_eq!(desc.target_shape, Shape::new(&[1, 2, 1, 15]));
        }
        _ => unreachable!(),
    }

    // Appending a reshape back to the input shape removes everything.
    let output_in = graph.input_ref(output, 0);
    graph.disconnect(output_in);
    let reshape3 = {
        let mut gb = GraphBuilder::new(&mut graph);
        let id = gb
            .reshape(
                ReshapeDescriptor {
                    target_shape: Shape::new(&[1, 2, 3, 5]),
                },
                "reshape_to_in",
            )
            .unwrap();
        gb.set_output_info(id, 0, f32_info(&[1, 2, 3, 5]));
        id
    };
    graph
        .connect(graph.output_ref(reshape, 0), graph.input_ref(reshape3, 0))
        .unwrap();
    graph
        .connect(graph.output_ref(reshape3, 0), output_in)
        .unwrap();

    optimize_graph(&mut graph);

    assert_eq!(kind_sequence(&graph), vec!["Input", "Output"]);
}

#[test]
fn equal_siblings_squash_into_one() {
    let permuted = f32_info(&[1, 5, 2, 3]);

    let mut graph = Graph::new();
    let mut gb = GraphBuilder::new(&mut graph);

    let input = gb.input(0, "input").unwrap();
    gb.set_output_info(input, 0, f32_info(&[1, 2, 3, 5]));

    let perm_desc = PermuteDescriptor::new(&[0, 2, 3, 1]);
    let reshape_desc = ReshapeDescriptor {
        target_shape: Shape::new(&[1, 3, 1, 5]),
    };

    let perm_a = gb.permute(perm_desc.clone(), "perm_a").unwrap();
    gb.set_output_info(perm_a, 0, permuted.clone());
    let reshape_a = gb.reshape(reshape_desc.clone(), "reshape_a").unwrap();
    let floor = gb.floor("floor").unwrap();
    let reshape_b = gb.reshape(reshape_desc.clone(), "reshape_b").unwrap();
    let perm_b = gb.permute(perm_desc.clone(), "perm_b").unwrap();
    gb.set_output_info(perm_b, 0, permuted);

    for (i, &branch) in [perm_a, reshape_a, floor, reshape_b, perm_b].iter().enumerate() {
        gb.connect(input, branch).unwrap();
        let out = gb.output(i as u32, &format!("out{i}")).unwrap();
        gb.connect(branch, out).unwrap();
    }

    optimize_graph(&mut graph);

    let sequence = kind_sequence(&graph);
    assert_eq!(
        sequence.iter().filter(|k| **k == "Permute").count(),
        1,
        "equal permutes must squash into one"
    );
    assert_eq!(
        sequence.iter().filter(|k| **k == "Reshape").count(),
        1,
        "equal reshapes must squash into one"
    );
    assert_eq!(sequence.iter().filter(|k| **k == "Floor").count(), 1);
    assert_eq!(sequence.iter().filter(|k| **k == "Output").count(), 5);

    // The survivors feed two outputs each.
    for id in graph.topological_order() {
        let layer = graph.layer(id);
        match layer.kind_name() {
            "Permute" | "Reshape" => {
                assert_eq!(layer.output(0).consumers().len(), 2);
            }
            "Floor" => assert_eq!(layer.output(0).consumers().len(), 1),
            _ => {}
        }
    }
}

#[test]
fn pass_manager_is_idempotent() {
    // Applying the pass set twice must give the same graph as once.
    let mut graph = Graph::new();
    let mut gb = GraphBuilder::new(&mut graph);

    let input = gb.input(0, "input").unwrap();
    gb.set_output_info(input, 0, f32_info(&[1, 2, 3, 5]));
    let perm = gb.permute(PermuteDescriptor::new(&[0, 2, 3, 1]), "perm").unwrap();
    gb.set_output_info(perm, 0, f32_info(&[1, 5, 2, 3]));
    let floor = gb.floor("floor").unwrap();
    gb.set_output_info(floor, 0, f32_info(&[1, 5, 2, 3]));
    let output = gb.output(0, "output").unwrap();
    gb.connect(input, perm).unwrap();
    gb.connect(perm, floor).unwrap();
    gb.connect(floor, output).unwrap();

    optimize_graph(&mut graph);
    let once = kind_sequence(&graph);
    optimize_graph(&mut graph);
    let twice = kind_sequence(&graph);
    assert_eq!(once, twice);
}

#[test]
fn inverse_conversion_pair_is_removed() {
    let mut graph = Graph::new();
    let mut gb = GraphBuilder::new(&mut graph);

    let input = gb.input(0, "input").unwrap();
    gb.set_output_info(input, 0, TensorInfo::new(Shape::new(&[2, 2]), DataType::Float16));
    let up = gb.convert_fp16_to_fp32("up").unwrap();
    gb.set_output_info(up, 0, TensorInfo::new(Shape::new(&[2, 2]), DataType::Float32));
    let down = gb.convert_fp32_to_fp16("down").unwrap();
    gb.set_output_info(down, 0, TensorInfo::new(Shape::new(&[2, 2]), DataType::Float16));
    let output = gb.output(0, "output").unwrap();
    gb.connect(input, up).unwrap();
    gb.connect(up, down).unwrap();
    gb.connect(down, output).unwrap();

    Optimizer::with_passes(vec![Box::new(passes::OptimizeInverseConversions)])
        .run(&mut graph)
        .unwrap();

    assert_eq!(kind_sequence(&graph), vec!["Input", "Output"]);
}
