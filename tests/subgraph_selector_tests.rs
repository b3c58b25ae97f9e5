//! Subgraph selection must produce a partition of the selected layers into
//! maximal, externally convex, acyclic regions.

use tensorplan::graph::descriptors::ActivationDescriptor;
use tensorplan::graph::{Graph, GraphBuilder, SubgraphViewSelector};
use tensorplan::{BackendId, DataType, LayerId, Shape, TensorInfo};

fn f32_info(dims: &[usize]) -> TensorInfo {
    TensorInfo::new(Shape::new(dims), DataType::Float32)
}

/// input -> act x count -> output, returning the activation ids.
fn chain(graph: &mut Graph, count: usize) -> Vec<LayerId> {
    let mut gb = GraphBuilder::new(graph);
    let input = gb.input(0, "input").unwrap();
    gb.set_output_info(input, 0, f32_info(&[1, 4]));
    let mut acts = Vec::new();
    let mut previous = input;
    for i in 0..count {
        let act = gb
            .activation(ActivationDescriptor::default(), &format!("act{i}"))
            .unwrap();
        gb.set_output_info(act, 0, f32_info(&[1, 4]));
        gb.connect(previous, act).unwrap();
        acts.push(act);
        previous = act;
    }
    let output = gb.output(0, "output").unwrap();
    gb.connect(previous, output).unwrap();
    acts
}

fn assign(graph: &mut Graph, layers: &[LayerId], backend: &str) {
    for &id in layers {
        graph.layer_mut(id).set_backend(BackendId::new(backend));
    }
}

fn selected_by_backend(graph: &Graph, backend: &str) -> Vec<LayerId> {
    graph
        .layer_ids()
        .filter(|&id| graph.layer(id).backend() == &BackendId::new(backend))
        .filter(|&id| {
            !matches!(graph.layer(id).kind_name(), "Input" | "Output")
        })
        .collect()
}

#[test]
fn contiguous_region_forms_one_subgraph() {
    let mut graph = Graph::new();
    let acts = chain(&mut graph, 3);
    assign(&mut graph, &acts, "Acc");

    let subgraphs = SubgraphViewSelector::select_subgraphs(&graph, |g, id| {
        g.layer(id).backend() == &BackendId::new("Acc")
            && !matches!(g.layer(id).kind_name(), "Input" | "Output")
    });

    assert_eq!(subgraphs.len(), 1);
    assert_eq!(subgraphs[0].num_layers(), 3);
    assert_eq!(subgraphs[0].input_slots().len(), 1);
    assert_eq!(subgraphs[0].output_slots().len(), 1);
}

#[test]
fn interrupted_region_splits_into_two_subgraphs() {
    let mut graph = Graph::new();
    let acts = chain(&mut graph, 3);
    assign(&mut graph, &[acts[0], acts[2]], "Acc");
    assign(&mut graph, &[acts[1]], "Other");

    let subgraphs = SubgraphViewSelector::select_subgraphs(&graph, |g, id| {
        g.layer(id).backend() == &BackendId::new("Acc")
            && !matches!(g.layer(id).kind_name(), "Input" | "Output")
    });

    assert_eq!(subgraphs.len(), 2);
    for view in &subgraphs {
        assert_eq!(view.num_layers(), 1);
    }
}

#[test]
fn selection_is_a_partition_of_the_selected_set() {
    let mut graph = Graph::new();
    let acts = chain(&mut graph, 5);
    assign(&mut graph, &[acts[0], acts[1], acts[3]], "Acc");
    assign(&mut graph, &[acts[2], acts[4]], "Other");

    let subgraphs = SubgraphViewSelector::select_subgraphs(&graph, |g, id| {
        g.layer(id).backend() == &BackendId::new("Acc")
            && !matches!(g.layer(id).kind_name(), "Input" | "Output")
    });

    let mut seen = Vec::new();
    for view in &subgraphs {
        for &layer in view.layers() {
            assert!(!seen.contains(&layer), "layer {layer} appears twice");
            seen.push(layer);
        }
    }
    let mut expected = selected_by_backend(&graph, "Acc");
    seen.sort();
    expected.sort();
    assert_eq!(seen, expected);
}

#[test]
fn path_leaving_and_reentering_the_selection_splits_the_region() {
    // input -> a (sel) -> {b (unsel), c (sel)} -> d joins both: d must not
    // share a region with a/c, or the region would wrap around b.
    let mut graph = Graph::new();
    let mut gb = GraphBuilder::new(&mut graph);
    let input = gb.input(0, "input").unwrap();
    gb.set_output_info(input, 0, f32_info(&[1, 4]));
    let a = gb.activation(ActivationDescriptor::default(), "a").unwrap();
    gb.set_output_info(a, 0, f32_info(&[1, 4]));
    let b = gb.activation(ActivationDescriptor::default(), "b").unwrap();
    gb.set_output_info(b, 0, f32_info(&[1, 4]));
    let c = gb.activation(ActivationDescriptor::default(), "c").unwrap();
    gb.set_output_info(c, 0, f32_info(&[1, 4]));
    let d = gb.addition("d").unwrap();
    gb.set_output_info(d, 0, f32_info(&[1, 4]));
    let output = gb.output(0, "output").unwrap();
    gb.connect(input, a).unwrap();
    gb.connect(a, b).unwrap();
    gb.connect(a, c).unwrap();
    gb.connect_slots(b, 0, d, 0).unwrap();
    gb.connect_slots(c, 0, d, 1).unwrap();
    gb.connect(d, output).unwrap();

    assign(&mut graph, &[a, c, d], "Acc");
    assign(&mut graph, &[b], "Other");

    let subgraphs = SubgraphViewSelector::select_subgraphs(&graph, |g, id| {
        g.layer(id).backend() == &BackendId::new("Acc")
            && !matches!(g.layer(id).kind_name(), "Input" | "Output")
    });

    let region_of = |layer: LayerId| {
        subgraphs
            .iter()
            .position(|view| view.contains(layer))
            .unwrap()
    };
    assert_ne!(
        region_of(a),
        region_of(d),
        "the join below the excluded layer must live in its own region"
    );
}
