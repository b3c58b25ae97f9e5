use crate::errors::TPResult;
use crate::graph::descriptors::ReshapeDescriptor;
use crate::graph::{Graph, Layer, LayerKind};
use crate::optimizer::{Pass, PassOutcome};
use crate::types::{LayerId, Shape};

/// Make implicit broadcasting explicit: in front of an elementwise binary
/// whose inputs differ in rank, reshape the lower-rank side to pad leading
/// 1-dimensions. A constant feeding only this layer is reshaped in place
/// instead of growing the graph.
pub struct AddBroadcastReshapeLayer;

impl Pass for AddBroadcastReshapeLayer {
    fn name(&self) -> &str {
        "AddBroadcastReshapeLayer"
    }

    fn run(&self, graph: &mut Graph, id: LayerId) -> TPResult<PassOutcome> {
        if !matches!(
            graph.layer(id).kind(),
            LayerKind::ElementwiseBinary(_) | LayerKind::Comparison(_) | LayerKind::LogicalBinary(_)
        ) {
            return Ok(PassOutcome::Unchanged);
        }
        let info0 = match graph.producer_info(graph.input_ref(id, 0)) {
            Some(info) => info.clone(),
            None => return Ok(PassOutcome::Unchanged),
        };
        let info1 = match graph.producer_info(graph.input_ref(id, 1)) {
            Some(info) => info.clone(),
            None => return Ok(PassOutcome::Unchanged),
        };
        if info0.shape.rank() == info1.shape.rank() {
            return Ok(PassOutcome::Unchanged);
        }
        let (slot, small, big_rank) = if info0.shape.rank() < info1.shape.rank() {
            (0, info0, info1.shape.rank())
        } else {
            (1, info1, info0.shape.rank())
        };
        let mut dims = vec![1usize; big_rank - small.shape.rank()];
        dims.extend_from_slice(small.shape.dims());
        let target = Shape::new(&dims);

        let consumer = graph.input_ref(id, slot);
        let producer = graph
            .layer(consumer.layer)
            .input(consumer.slot)
            .source()
            .expect("checked connected above");

        // Constants with a single consumer are reshaped in place.
        let producer_layer = graph.layer(producer.layer);
        let single_const = matches!(producer_layer.kind(), LayerKind::Constant { .. })
            && producer_layer.output(0).consumers().len() == 1;
        if single_const {
            if let LayerKind::Constant { tensor } = graph.layer_mut(producer.layer).kind_mut() {
                *tensor = tensor.reshaped(target.dims())?;
            }
            let info = small.with_shape(target);
            graph.layer_mut(producer.layer).set_output_info(0, info);
            return Ok(PassOutcome::Substituted);
        }

        let name = format!("broadcast_reshape_{}", graph.layer(id).name());
        let reshape = Layer::new(
            LayerKind::Reshape(ReshapeDescriptor {
                target_shape: target.clone(),
            }),
            name,
        )?;
        let new_id = graph.add_layer(reshape);
        graph.insert_before(consumer, new_id)?;
        graph
            .layer_mut(new_id)
            .set_output_info(0, small.with_shape(target));
        Ok(PassOutcome::Substituted)
    }
}
