//! Folding a zero-valued pad into the padding parameters of a following
//! convolution, depthwise convolution or max pooling.

use crate::errors::TPResult;
use crate::graph::descriptors::{DataLayout, PadDescriptor, PoolType};
use crate::graph::{Graph, LayerKind};
use crate::optimizer::passes::sole_consumer;
use crate::optimizer::{Pass, PassOutcome};
use crate::types::LayerId;

/// The pad amounts on the spatial axes, when the pad only touches them.
fn foldable_spatial_pads(
    pad: &PadDescriptor,
    layout: DataLayout,
) -> Option<((usize, usize), (usize, usize))> {
    if !pad.is_zero_value() || pad.pad_list.len() != 4 {
        return None;
    }
    let batch = pad.pad_list[0];
    let channel = pad.pad_list[layout.channels_index()];
    if batch != (0, 0) || channel != (0, 0) {
        return None;
    }
    Some((
        pad.pad_list[layout.height_index()],
        pad.pad_list[layout.width_index()],
    ))
}

/// The producing Pad layer of `id`, when it exists, feeds only `id` and
/// carries zero pad values.
fn producing_pad(graph: &Graph, id: LayerId) -> Option<(LayerId, PadDescriptor)> {
    let producer = graph.layer(id).input(0).source()?;
    let desc = match graph.layer(producer.layer).kind() {
        LayerKind::Pad(desc) => desc.clone(),
        _ => return None,
    };
    if !sole_consumer(graph, producer, id) {
        return None;
    }
    Some((producer.layer, desc))
}

/// Rewire `id`'s input from the pad layer onto the pad's own producer.
fn skip_pad(graph: &mut Graph, id: LayerId, pad_layer: LayerId) -> TPResult<()> {
    let pad_producer = graph
        .layer(pad_layer)
        .input(0)
        .source()
        .expect("a folded pad always has a producer");
    graph.disconnect(graph.input_ref(id, 0));
    graph.connect(pad_producer, graph.input_ref(id, 0))?;
    Ok(())
}

pub struct FoldPadIntoConvolution2d;

impl Pass for FoldPadIntoConvolution2d {
    fn name(&self) -> &str {
        "FoldPadIntoConvolution2d"
    }

    fn run(&self, graph: &mut Graph, id: LayerId) -> TPResult<PassOutcome> {
        let layout = match graph.layer(id).kind() {
            LayerKind::Convolution2d { desc, .. } => desc.data_layout,
            _ => return Ok(PassOutcome::Unchanged),
        };
        let (pad_layer, pad_desc) = match producing_pad(graph, id) {
            Some(found) => found,
            None => return Ok(PassOutcome::Unchanged),
        };
        let (pad_h, pad_w) = match foldable_spatial_pads(&pad_desc, layout) {
            Some(p) => p,
            None => return Ok(PassOutcome::Unchanged),
        };
        if let LayerKind::Convolution2d { desc, .. } = graph.layer_mut(id).kind_mut() {
            desc.padding.height.0 += pad_h.0;
            desc.padding.height.1 += pad_h.1;
            desc.padding.width.0 += pad_w.0;
            desc.padding.width.1 += pad_w.1;
        }
        skip_pad(graph, id, pad_layer)?;
        Ok(PassOutcome::Substituted)
    }
}

pub struct FoldPadIntoDepthwiseConvolution2d;

impl Pass for FoldPadIntoDepthwiseConvolution2d {
    fn name(&self) -> &str {
        "FoldPadIntoDepthwiseConvolution2d"
    }

    fn run(&self, graph: &mut Graph, id: LayerId) -> TPResult<PassOutcome> {
        let layout = match graph.layer(id).kind() {
            LayerKind::DepthwiseConvolution2d { desc, .. } => desc.data_layout,
            _ => return Ok(PassOutcome::Unchanged),
        };
        let (pad_layer, pad_desc) = match producing_pad(graph, id) {
            Some(found) => found,
            None => return Ok(PassOutcome::Unchanged),
        };
        let (pad_h, pad_w) = match foldable_spatial_pads(&pad_desc, layout) {
            Some(p) => p,
            None => return Ok(PassOutcome::Unchanged),
        };
        if let LayerKind::DepthwiseConvolution2d { desc, .. } = graph.layer_mut(id).kind_mut() {
            desc.padding.height.0 += pad_h.0;
            desc.padding.height.1 += pad_h.1;
            desc.padding.width.0 += pad_w.0;
            desc.padding.width.1 += pad_w.1;
        }
        skip_pad(graph, id, pad_layer)?;
        Ok(PassOutcome::Substituted)
    }
}

/// Only max pooling folds; average pooling would change what the divisor
/// counts at the borders.
pub struct FoldPadIntoPooling2d;

impl Pass for FoldPadIntoPooling2d {
    fn name(&self) -> &str {
        "FoldPadIntoPooling2d"
    }

    fn run(&self, graph: &mut Graph, id: LayerId) -> TPResult<PassOutcome> {
        let layout = match graph.layer(id).kind() {
            LayerKind::Pooling2d(desc)
                if desc.pool_type == PoolType::Max
                    && !desc.global
                    && desc.padding == Default::default() =>
            {
                desc.data_layout
            }
            _ => return Ok(PassOutcome::Unchanged),
        };
        let (pad_layer, pad_desc) = match producing_pad(graph, id) {
            Some(found) => found,
            None => return Ok(PassOutcome::Unchanged),
        };
        let (pad_h, pad_w) = match foldable_spatial_pads(&pad_desc, layout) {
            Some(p) => p,
            None => return Ok(PassOutcome::Unchanged),
        };
        if let LayerKind::Pooling2d(desc) = graph.layer_mut(id).kind_mut() {
            desc.padding.height = pad_h;
            desc.padding.width = pad_w;
        }
        skip_pad(graph, id, pad_layer)?;
        Ok(PassOutcome::Substituted)
    }
}
