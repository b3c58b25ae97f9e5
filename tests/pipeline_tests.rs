//! Whole-pipeline behaviors: float16 lowering, debug taps, verification of
//! entry-point checks.

mod common;

use common::TestBackend;
use std::sync::Arc;
use tensorplan::backend::{Backend, BackendRegistry, DeviceSpec};
use tensorplan::graph::descriptors::ActivationDescriptor;
use tensorplan::graph::{Graph, GraphBuilder};
use tensorplan::{
    optimize, BackendId, DataType, OptimizerOptions, Shape, TPError, TensorInfo,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn f32_info(dims: &[usize]) -> TensorInfo {
    TensorInfo::new(Shape::new(dims), DataType::Float32)
}

fn simple_graph() -> Graph {
    let mut graph = Graph::new();
    let mut gb = GraphBuilder::new(&mut graph);
    let input = gb.input(0, "input").unwrap();
    gb.set_output_info(input, 0, f32_info(&[1, 4]));
    let act = gb
        .activation(ActivationDescriptor::default(), "act")
        .unwrap();
    gb.set_output_info(act, 0, f32_info(&[1, 4]));
    let output = gb.output(0, "output").unwrap();
    gb.connect(input, act).unwrap();
    gb.connect(act, output).unwrap();
    graph
}

fn single_backend(name: &str) -> (BackendRegistry, DeviceSpec, BackendId) {
    let backend = TestBackend::new(name, TestBackend::map_unmap_factory(&format!("{name}Mem")));
    let id = backend.id.clone();
    let mut registry = BackendRegistry::new();
    let shared = Arc::new(backend);
    registry.register(id.clone(), move || shared.clone() as Arc<dyn Backend>);
    (registry, DeviceSpec::new(vec![id.clone()]), id)
}

#[test]
fn fp16_reduction_converts_the_interior_of_the_network() {
    init_tracing();
    let (registry, spec, id) = single_backend("Acc");
    let optimized = optimize(
        simple_graph(),
        &[id],
        &spec,
        &registry,
        &OptimizerOptions {
            reduce_fp32_to_fp16: true,
            ..Default::default()
        },
        None,
    )
    .unwrap();

    let graph = optimized.graph();
    let kinds: Vec<&str> = graph
        .topological_order()
        .into_iter()
        .map(|id| graph.layer(id).kind_name())
        .collect();
    assert_eq!(
        kinds,
        vec![
            "Input",
            "ConvertFp32ToFp16",
            "Activation",
            "ConvertFp16ToFp32",
            "Output"
        ]
    );

    let act = graph
        .layer_ids()
        .find(|&l| graph.layer(l).kind_name() == "Activation")
        .unwrap();
    assert_eq!(
        graph.layer(act).output_info(0).unwrap().data_type,
        DataType::Float16
    );
    // Inputs stay float32 on the outside.
    let input = graph
        .layer_ids()
        .find(|&l| graph.layer(l).kind_name() == "Input")
        .unwrap();
    assert_eq!(
        graph.layer(input).output_info(0).unwrap().data_type,
        DataType::Float32
    );
}

#[test]
fn debug_option_taps_every_interior_layer() {
    init_tracing();
    let (registry, spec, id) = single_backend("Acc");
    let optimized = optimize(
        simple_graph(),
        &[id],
        &spec,
        &registry,
        &OptimizerOptions {
            debug: true,
            ..Default::default()
        },
        None,
    )
    .unwrap();

    let graph = optimized.graph();
    for l in graph.layer_ids() {
        let layer = graph.layer(l);
        if matches!(layer.kind_name(), "Debug" | "Output") {
            continue;
        }
        for slot in 0..layer.num_outputs() {
            assert!(
                layer
                    .output(slot)
                    .consumers()
                    .iter()
                    .all(|c| graph.layer(c.layer).kind_name() == "Debug"),
                "layer {l} is not tapped"
            );
        }
    }
}

#[test]
fn unconnected_input_slots_fail_verification() {
    let (registry, spec, id) = single_backend("Acc");
    let mut graph = Graph::new();
    {
        let mut gb = GraphBuilder::new(&mut graph);
        let input = gb.input(0, "input").unwrap();
        gb.set_output_info(input, 0, f32_info(&[1, 4]));
        let add = gb.addition("add").unwrap();
        gb.set_output_info(add, 0, f32_info(&[1, 4]));
        let output = gb.output(0, "output").unwrap();
        gb.connect_slots(input, 0, add, 0).unwrap();
        // add input 1 left unconnected
        gb.connect(add, output).unwrap();
    }
    let err = optimize(
        graph,
        &[id],
        &spec,
        &registry,
        &OptimizerOptions::default(),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, TPError::Graph(_)));
}

#[test]
fn cycle_creation_is_rejected_at_connect_time() {
    let mut graph = Graph::new();
    let mut gb = GraphBuilder::new(&mut graph);
    let a = gb.addition("a").unwrap();
    let b = gb.addition("b").unwrap();
    gb.connect_slots(a, 0, b, 0).unwrap();
    let err = gb.connect_slots(b, 0, a, 0).unwrap_err();
    assert!(matches!(err, TPError::InvalidArgument(_)));
}

#[test]
fn double_connection_of_an_input_slot_is_rejected() {
    let mut graph = Graph::new();
    let mut gb = GraphBuilder::new(&mut graph);
    let a = gb.input(0, "a").unwrap();
    let b = gb.input(1, "b").unwrap();
    let add = gb.addition("add").unwrap();
    gb.connect_slots(a, 0, add, 0).unwrap();
    let err = gb.connect_slots(b, 0, add, 0).unwrap_err();
    assert!(matches!(err, TPError::InvalidArgument(_)));
}
