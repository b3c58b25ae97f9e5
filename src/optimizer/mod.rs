pub mod passes;

use crate::errors::TPResult;
use crate::graph::{Graph, LayerKind};
use crate::types::LayerId;

/// What a pass did at the cursor position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Nothing applied; the walk tries the next pass.
    Unchanged,
    /// The neighbourhood was rewritten; the walk restarts its scan.
    Substituted,
    /// The cursor layer was erased; the walk steps to a safe neighbour.
    Erased,
}

/// One idempotent local rewrite. Given a mutable graph and a cursor, a pass
/// performs at most one rewrite on that layer and its immediate
/// neighbourhood.
pub trait Pass {
    fn name(&self) -> &str;

    fn run(&self, graph: &mut Graph, layer: LayerId) -> TPResult<PassOutcome>;
}

/// Applies an ordered list of passes over the graph in reverse topological
/// order until a full sweep produces no change. Layers whose outputs lose
/// all consumers along the way are erased.
pub struct Optimizer {
    passes: Vec<Box<dyn Pass>>,
}

impl Optimizer {
    pub fn with_passes(passes: Vec<Box<dyn Pass>>) -> Self {
        Self { passes }
    }

    pub fn run(&self, graph: &mut Graph) -> TPResult<()> {
        let sweep_limit = 8 + graph.num_layers() * (1 + self.passes.len());
        let mut sweeps = 0;
        loop {
            let mut changed = false;
            let order = graph.topological_order();
            for &id in order.iter().rev() {
                if graph.try_layer(id).is_none() {
                    continue;
                }
                for pass in &self.passes {
                    match pass.run(graph, id)? {
                        PassOutcome::Unchanged => {}
                        PassOutcome::Substituted | PassOutcome::Erased => {
                            tracing::debug!(pass = pass.name(), layer = %id, "pass applied");
                            changed = true;
                            break;
                        }
                    }
                    if graph.try_layer(id).is_none() {
                        changed = true;
                        break;
                    }
                }
                // Reverse order visits consumers before producers, so a
                // dangling chain unwinds within a single sweep.
                if let Some(layer) = graph.try_layer(id) {
                    let keep = matches!(layer.kind(), LayerKind::Output { .. });
                    if layer.is_output_unconnected() && !keep {
                        graph.erase(id)?;
                        changed = true;
                    }
                }
            }
            if !changed {
                return Ok(());
            }
            sweeps += 1;
            if sweeps > sweep_limit {
                tracing::warn!(sweeps, "optimizer did not reach a fixpoint; stopping");
                return Ok(());
            }
        }
    }
}
