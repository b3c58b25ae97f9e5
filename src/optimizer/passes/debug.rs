use crate::errors::TPResult;
use crate::graph::{Graph, Layer, LayerKind};
use crate::optimizer::{Pass, PassOutcome};
use crate::types::LayerId;

/// Attach a debug tap after every layer output, optionally writing the
/// intermediate tensors to disk.
pub struct InsertDebugLayer {
    to_file: bool,
}

impl InsertDebugLayer {
    pub fn new() -> Self {
        Self { to_file: false }
    }

    pub fn to_file() -> Self {
        Self { to_file: true }
    }
}

impl Default for InsertDebugLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl Pass for InsertDebugLayer {
    fn name(&self) -> &str {
        if self.to_file {
            "InsertDebugToFileLayer"
        } else {
            "InsertDebugLayer"
        }
    }

    fn run(&self, graph: &mut Graph, id: LayerId) -> TPResult<PassOutcome> {
        if matches!(
            graph.layer(id).kind(),
            LayerKind::Output { .. } | LayerKind::Debug { .. }
        ) {
            return Ok(PassOutcome::Unchanged);
        }
        let mut changed = false;
        let num_outputs = graph.layer(id).num_outputs();
        for slot in 0..num_outputs {
            let consumers = graph.layer(id).output(slot).consumers();
            if consumers.is_empty() {
                continue;
            }
            let tapped = consumers
                .iter()
                .all(|c| matches!(graph.layer(c.layer).kind(), LayerKind::Debug { .. }));
            if tapped {
                continue;
            }
            let info = graph.layer(id).output_info(slot).cloned();
            let name = format!("debug_{}_{}", graph.layer(id).name(), slot);
            let debug = graph.add_layer(Layer::new(
                LayerKind::Debug {
                    to_file: self.to_file,
                },
                name,
            )?);
            graph.insert_after(graph.output_ref(id, slot), debug)?;
            if let Some(info) = info {
                graph.layer_mut(debug).set_output_info(0, info);
            }
            // The tap runs where its source runs.
            let backend = graph.layer(id).backend().clone();
            graph.layer_mut(debug).set_backend(backend);
            changed = true;
        }
        Ok(if changed {
            PassOutcome::Substituted
        } else {
            PassOutcome::Unchanged
        })
    }
}
