use crate::errors::TPResult;
use crate::graph::{Graph, LayerKind};
use crate::optimizer::passes::bypass_unary;
use crate::optimizer::{Pass, PassOutcome};
use crate::types::LayerId;

/// Squash consecutive reshapes into one, and drop a reshape whose target
/// equals its input shape.
pub struct OptimizeConsecutiveReshapes;

impl Pass for OptimizeConsecutiveReshapes {
    fn name(&self) -> &str {
        "OptimizeConsecutiveReshapes"
    }

    fn run(&self, graph: &mut Graph, id: LayerId) -> TPResult<PassOutcome> {
        if !matches!(graph.layer(id).kind(), LayerKind::Reshape(_)) {
            return Ok(PassOutcome::Unchanged);
        }
        let producer = match graph.layer(id).input(0).source() {
            Some(p) => p,
            None => return Ok(PassOutcome::Unchanged),
        };
        let out_shape = match graph.layer(id).output_info(0) {
            Some(info) => info.shape.clone(),
            None => match graph.layer(id).kind() {
                LayerKind::Reshape(desc) => desc.target_shape.clone(),
                _ => unreachable!(),
            },
        };

        if matches!(graph.layer(producer.layer).kind(), LayerKind::Reshape(_)) {
            // Pair of reshapes: retarget onto the first one's producer, or
            // drop both when the chain is the identity.
            let grandparent = match graph.layer(producer.layer).input(0).source() {
                Some(p) => p,
                None => return Ok(PassOutcome::Unchanged),
            };
            let original_shape = graph
                .layer(grandparent.layer)
                .output_info(grandparent.slot)
                .map(|info| info.shape.clone());
            if original_shape.as_ref() == Some(&out_shape) {
                graph.move_consumers(graph.output_ref(id, 0), grandparent);
            } else {
                graph.disconnect(graph.input_ref(id, 0));
                graph.connect(grandparent, graph.input_ref(id, 0))?;
            }
            return Ok(PassOutcome::Substituted);
        }

        // A reshape to the shape it already has is a no-op.
        let in_shape = graph
            .layer(producer.layer)
            .output_info(producer.slot)
            .map(|info| info.shape.clone());
        if in_shape.as_ref() == Some(&out_shape) {
            bypass_unary(graph, id)?;
            return Ok(PassOutcome::Substituted);
        }
        Ok(PassOutcome::Unchanged)
    }
}
