use crate::graph::layer::{InputSlotRef, OutputSlotRef};
use crate::graph::Graph;
use crate::types::LayerId;
use indexmap::IndexMap;

/// A non-owning window over a contiguous, acyclic region of the graph,
/// exposing the slots that cross its boundary.
#[derive(Debug, Clone, Default)]
pub struct SubgraphView {
    layers: Vec<LayerId>,
    input_slots: Vec<InputSlotRef>,
    output_slots: Vec<OutputSlotRef>,
}

impl SubgraphView {
    pub fn new(
        layers: Vec<LayerId>,
        input_slots: Vec<InputSlotRef>,
        output_slots: Vec<OutputSlotRef>,
    ) -> Self {
        Self {
            layers,
            input_slots,
            output_slots,
        }
    }

    /// A view spanning every live layer of the graph.
    pub fn whole_graph(graph: &Graph) -> Self {
        Self {
            layers: graph.layer_ids().collect(),
            input_slots: Vec::new(),
            output_slots: Vec::new(),
        }
    }

    pub fn layers(&self) -> &[LayerId] {
        &self.layers
    }

    pub fn input_slots(&self) -> &[InputSlotRef] {
        &self.input_slots
    }

    pub fn output_slots(&self) -> &[OutputSlotRef] {
        &self.output_slots
    }

    pub fn contains(&self, layer: LayerId) -> bool {
        self.layers.contains(&layer)
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}

struct SelectionInfo {
    split_id: u32,
    selected: bool,
    visited: bool,
}

/// Partitions selected layers into maximal acyclic per-backend regions using
/// split-id propagation: walking down from the graph's sources, a transition
/// off the selected set bumps the id, forcing later selected layers into a
/// separate region.
pub struct SubgraphViewSelector;

impl SubgraphViewSelector {
    pub fn select_subgraphs<F>(graph: &Graph, selector: F) -> Vec<SubgraphView>
    where
        F: Fn(&Graph, LayerId) -> bool,
    {
        let capacity = graph.layer_ids().map(|id| id.0 + 1).max().unwrap_or(0);
        let mut infos: Vec<Option<SelectionInfo>> = (0..capacity).map(|_| None).collect();
        for id in graph.layer_ids() {
            infos[id.0] = Some(SelectionInfo {
                split_id: 0,
                selected: selector(graph, id),
                visited: false,
            });
        }

        // Walk from every source layer (no connected inputs).
        let initial_split = 1u32;
        for id in graph.layer_ids() {
            let is_source = graph
                .layer(id)
                .kind()
                .arity()
                .0
                == 0;
            if is_source {
                Self::mark_children_splits(graph, &mut infos, id, initial_split, false);
            }
        }

        // Group selected layers by split id, in insertion order.
        let mut split_map: IndexMap<u32, Vec<LayerId>> = IndexMap::new();
        for id in graph.layer_ids() {
            let info = infos[id.0].as_ref().expect("every live layer has an info");
            if info.selected {
                split_map.entry(info.split_id).or_default().push(id);
            }
        }

        let mut result = Vec::new();
        for (_, members) in split_map {
            if members.is_empty() {
                continue;
            }
            let mut inputs = Vec::new();
            let mut outputs = Vec::new();
            for &id in &members {
                let layer = graph.layer(id);
                for slot in 0..layer.num_inputs() {
                    if let Some(producer) = layer.input(slot).source() {
                        if !selector(graph, producer.layer) {
                            inputs.push(graph.input_ref(id, slot));
                        }
                    }
                }
                for slot in 0..layer.num_outputs() {
                    let feeds_outside = layer
                        .output(slot)
                        .consumers()
                        .iter()
                        .any(|c| !selector(graph, c.layer));
                    if feeds_outside {
                        outputs.push(graph.output_ref(id, slot));
                    }
                }
            }
            result.push(SubgraphView::new(members, inputs, outputs));
        }
        result
    }

    fn mark_children_splits(
        graph: &Graph,
        infos: &mut [Option<SelectionInfo>],
        id: LayerId,
        split_id: u32,
        prev_selected: bool,
    ) {
        let (current_split, selected) = {
            let info = infos[id.0].as_mut().expect("every live layer has an info");
            if info.visited {
                return;
            }
            info.visited = true;
            if info.split_id < split_id {
                info.split_id = split_id;
            }
            // A new split point at each selected -> non-selected transition,
            // so a region never wraps around an excluded layer.
            if !info.selected && prev_selected {
                info.split_id += 1;
            }
            (info.split_id, info.selected)
        };

        let children: Vec<LayerId> = {
            let layer = graph.layer(id);
            layer
                .outputs
                .iter()
                .flat_map(|o| o.consumers().iter().map(|c| c.layer))
                .collect()
        };
        for child in children {
            Self::mark_children_splits(graph, infos, child, current_split, selected);
        }
    }
}
