//! Edge-strategy planning: the direct < export < copy cost lattice, the
//! compatibility layers that realize the chosen strategies, and the
//! pipeline-wide annotation invariants.

mod common;

use common::{TestBackend, TestFactory};
use std::sync::Arc;
use tensorplan::backend::{Backend, BackendRegistry, DeviceSpec};
use tensorplan::graph::descriptors::ActivationDescriptor;
use tensorplan::graph::{Graph, GraphBuilder};
use tensorplan::types::mem_source;
use tensorplan::{
    optimize, BackendId, DataType, EdgeStrategy, FactoryId, OptimizerOptions, Shape, TPError,
    TensorInfo,
};

fn f32_info(dims: &[usize]) -> TensorInfo {
    TensorInfo::new(Shape::new(dims), DataType::Float32)
}

/// input -> act_a -> act_b -> output with act_a hinted onto `a` and act_b
/// onto `b`, so the interesting edge crosses the two backends.
fn two_backend_graph(a: &str, b: &str) -> Graph {
    let mut graph = Graph::new();
    let mut gb = GraphBuilder::new(&mut graph);
    let input = gb.input(0, "input").unwrap();
    gb.set_output_info(input, 0, f32_info(&[1, 4]));
    let act_a = gb
        .activation(ActivationDescriptor::default(), "act_a")
        .unwrap();
    gb.set_output_info(act_a, 0, f32_info(&[1, 4]));
    let act_b = gb
        .activation(ActivationDescriptor::default(), "act_b")
        .unwrap();
    gb.set_output_info(act_b, 0, f32_info(&[1, 4]));
    let output = gb.output(0, "output").unwrap();
    gb.connect(input, act_a).unwrap();
    gb.connect(act_a, act_b).unwrap();
    gb.connect(act_b, output).unwrap();
    graph.layer_mut(act_a).set_hint(Some(BackendId::new(a)));
    graph.layer_mut(act_b).set_hint(Some(BackendId::new(b)));
    graph
}

fn registry_of(backends: Vec<TestBackend>) -> (BackendRegistry, DeviceSpec, Vec<BackendId>) {
    let mut registry = BackendRegistry::new();
    let mut supported = Vec::new();
    for backend in backends {
        let id = backend.id.clone();
        supported.push(id.clone());
        let shared = Arc::new(backend);
        registry.register(id, move || shared.clone() as Arc<dyn Backend>);
    }
    (
        registry,
        DeviceSpec::new(supported.clone()),
        supported,
    )
}

fn cross_edge_strategy(graph: &Graph) -> EdgeStrategy {
    let act_a = graph
        .layer_ids()
        .find(|&id| graph.layer(id).name() == "act_a")
        .unwrap();
    graph.layer(act_a).output(0).strategies()[0]
}

#[test]
fn shared_factory_gives_direct_compatibility() {
    let factory = TestFactory {
        id: FactoryId::new("SharedMem"),
        map_unmap: true,
        import_flags: 0,
        export_flags: 0,
    };
    let a = TestBackend::new("AccA", factory.clone());
    let b = TestBackend::new("AccB", factory);
    let (registry, spec, preferences) = registry_of(vec![a, b]);

    let optimized = optimize(
        two_backend_graph("AccA", "AccB"),
        &preferences,
        &spec,
        &registry,
        &OptimizerOptions::default(),
        None,
    )
    .unwrap();

    assert_eq!(
        cross_edge_strategy(optimized.graph()),
        EdgeStrategy::DirectCompatibility
    );
}

#[test]
fn export_beats_copy_when_flags_intersect() {
    let a = TestBackend::new(
        "AccA",
        TestFactory {
            id: FactoryId::new("DmaMemA"),
            map_unmap: true,
            import_flags: mem_source::DMA_BUF,
            export_flags: mem_source::DMA_BUF,
        },
    );
    let b = TestBackend::new(
        "AccB",
        TestFactory {
            id: FactoryId::new("DmaMemB"),
            map_unmap: true,
            import_flags: mem_source::DMA_BUF,
            export_flags: mem_source::DMA_BUF,
        },
    );
    let (registry, spec, preferences) = registry_of(vec![a, b]);

    let optimized = optimize(
        two_backend_graph("AccA", "AccB"),
        &preferences,
        &spec,
        &registry,
        &OptimizerOptions {
            import_enabled: true,
            ..Default::default()
        },
        None,
    )
    .unwrap();

    assert_eq!(
        cross_edge_strategy(optimized.graph()),
        EdgeStrategy::ExportToTarget
    );

    // The export edge got its import bridge.
    let kinds: Vec<&str> = optimized
        .graph()
        .topological_order()
        .into_iter()
        .map(|id| optimized.graph().layer(id).kind_name())
        .collect();
    assert!(kinds.contains(&"MemImport"), "sequence: {kinds:?}");
}

#[test]
fn disjoint_factories_fall_back_to_copy() {
    let a = TestBackend::new("AccA", TestBackend::map_unmap_factory("MemA"));
    let b = TestBackend::new("AccB", TestBackend::map_unmap_factory("MemB"));
    let (registry, spec, preferences) = registry_of(vec![a, b]);

    let optimized = optimize(
        two_backend_graph("AccA", "AccB"),
        &preferences,
        &spec,
        &registry,
        &OptimizerOptions::default(),
        None,
    )
    .unwrap();

    assert_eq!(
        cross_edge_strategy(optimized.graph()),
        EdgeStrategy::CopyToTarget
    );

    let graph = optimized.graph();
    let kinds: Vec<&str> = graph
        .topological_order()
        .into_iter()
        .map(|id| graph.layer(id).kind_name())
        .collect();
    assert!(kinds.contains(&"MemCopy"), "sequence: {kinds:?}");

    // The bridge runs on the consumer's backend.
    let bridge = graph
        .layer_ids()
        .find(|&id| graph.layer(id).kind_name() == "MemCopy")
        .unwrap();
    assert_eq!(graph.layer(bridge).backend(), &BackendId::new("AccB"));
}

#[test]
fn no_legal_handshake_fails_the_planner() {
    // Source factory can neither export nor be mapped; destination cannot
    // reach it in any way.
    let a = TestBackend::new(
        "AccA",
        TestFactory {
            id: FactoryId::new("OpaqueMem"),
            map_unmap: false,
            import_flags: 0,
            export_flags: 0,
        },
    );
    let b = TestBackend::new("AccB", TestBackend::map_unmap_factory("MemB"));
    let (registry, spec, preferences) = registry_of(vec![a, b]);

    let mut messages = Vec::new();
    let err = optimize(
        two_backend_graph("AccA", "AccB"),
        &preferences,
        &spec,
        &registry,
        &OptimizerOptions {
            export_enabled: true,
            ..Default::default()
        },
        Some(&mut messages),
    )
    .unwrap_err();
    assert!(matches!(err, TPError::InvalidArgument(_)));
    assert!(
        messages.iter().any(|m| m.contains("act_a")),
        "the diagnostic names the layers involved: {messages:?}"
    );
}

#[test]
fn every_edge_is_annotated_after_optimize() {
    let a = TestBackend::new("AccA", TestBackend::map_unmap_factory("MemA"));
    let b = TestBackend::new("AccB", TestBackend::map_unmap_factory("MemB"));
    let (registry, spec, preferences) = registry_of(vec![a, b]);

    let optimized = optimize(
        two_backend_graph("AccA", "AccB"),
        &preferences,
        &spec,
        &registry,
        &OptimizerOptions::default(),
        None,
    )
    .unwrap();

    let graph = optimized.graph();
    for id in graph.layer_ids() {
        let layer = graph.layer(id);
        assert!(
            !layer.backend().is_unassigned(),
            "layer {id} has no backend"
        );
        assert!(
            preferences.contains(layer.backend()),
            "layer {id} assigned outside the selected set"
        );
        for slot in 0..layer.num_outputs() {
            for strategy in layer.output(slot).strategies() {
                assert_ne!(*strategy, EdgeStrategy::Undefined);
            }
        }
    }
}

#[test]
fn global_model_options_record_import_export() {
    let a = TestBackend::new("AccA", TestBackend::map_unmap_factory("MemA"));
    let (registry, spec, preferences) = registry_of(vec![a]);

    let mut graph = Graph::new();
    {
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
    }

    let optimized = optimize(
        graph,
        &preferences,
        &spec,
        &registry,
        &OptimizerOptions {
            import_enabled: true,
            export_enabled: false,
            ..Default::default()
        },
        None,
    )
    .unwrap();

    let global = optimized
        .model_options()
        .iter()
        .find(|bag| bag.backend.as_str() == "Global")
        .expect("a Global bag is always appended");
    assert_eq!(global.get("ImportEnabled"), Some(&serde_json::json!(true)));
    assert_eq!(global.get("ExportEnabled"), Some(&serde_json::json!(false)));
}
