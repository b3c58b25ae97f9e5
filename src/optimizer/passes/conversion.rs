//! Float-width conversion passes: lowering a float32 network to float16
//! and removing conversion pairs that cancel out.

use crate::errors::TPResult;
use crate::graph::{Graph, Layer, LayerKind};
use crate::optimizer::{Pass, PassOutcome};
use crate::types::{DataType, LayerId};

/// Remove back-to-back fp16->fp32->fp16 (or fp32->fp16->fp32) conversion
/// pairs left behind by backend assignment.
pub struct OptimizeInverseConversions;

impl OptimizeInverseConversions {
    fn is_inverse_pair(parent: &LayerKind, child: &LayerKind) -> bool {
        matches!(
            (parent, child),
            (LayerKind::ConvertFp16ToFp32, LayerKind::ConvertFp32ToFp16)
                | (LayerKind::ConvertFp32ToFp16, LayerKind::ConvertFp16ToFp32)
        )
    }
}

impl Pass for OptimizeInverseConversions {
    fn name(&self) -> &str {
        "OptimizeInverseConversions"
    }

    fn run(&self, graph: &mut Graph, id: LayerId) -> TPResult<PassOutcome> {
        if !matches!(
            graph.layer(id).kind(),
            LayerKind::ConvertFp16ToFp32 | LayerKind::ConvertFp32ToFp16
        ) {
            return Ok(PassOutcome::Unchanged);
        }
        let producer = match graph.layer(id).input(0).source() {
            Some(p) => p,
            None => return Ok(PassOutcome::Unchanged),
        };
        if !Self::is_inverse_pair(
            graph.layer(producer.layer).kind(),
            graph.layer(id).kind(),
        ) {
            return Ok(PassOutcome::Unchanged);
        }
        let grandparent = match graph.layer(producer.layer).input(0).source() {
            Some(p) => p,
            None => return Ok(PassOutcome::Unchanged),
        };
        graph.move_consumers(graph.output_ref(id, 0), grandparent);
        Ok(PassOutcome::Substituted)
    }
}

/// Lower a float32 network to float16: convert after inputs, convert back
/// before outputs, and flip every interior float32 slot to float16.
pub struct Fp32NetworkToFp16Converter;

impl Pass for Fp32NetworkToFp16Converter {
    fn name(&self) -> &str {
        "Fp32NetworkToFp16Converter"
    }

    fn run(&self, graph: &mut Graph, id: LayerId) -> TPResult<PassOutcome> {
        match graph.layer(id).kind() {
            LayerKind::Input { .. } => {
                let info = match graph.layer(id).output_info(0) {
                    Some(info) if info.data_type == DataType::Float32 => info.clone(),
                    _ => return Ok(PassOutcome::Unchanged),
                };
                let already = graph
                    .layer(id)
                    .output(0)
                    .consumers()
                    .iter()
                    .all(|c| matches!(graph.layer(c.layer).kind(), LayerKind::ConvertFp32ToFp16));
                if already || graph.layer(id).output(0).consumers().is_empty() {
                    return Ok(PassOutcome::Unchanged);
                }
                let name = format!("convert_fp32_to_fp16-{}", graph.layer(id).name());
                let convert = graph.add_layer(Layer::new(LayerKind::ConvertFp32ToFp16, name)?);
                graph.insert_after(graph.output_ref(id, 0), convert)?;
                graph
                    .layer_mut(convert)
                    .set_output_info(0, info.with_data_type(DataType::Float16));
                Ok(PassOutcome::Substituted)
            }
            LayerKind::Output { .. } => {
                let producer = match graph.layer(id).input(0).source() {
                    Some(p) => p,
                    None => return Ok(PassOutcome::Unchanged),
                };
                if matches!(
                    graph.layer(producer.layer).kind(),
                    LayerKind::ConvertFp16ToFp32
                ) {
                    return Ok(PassOutcome::Unchanged);
                }
                let info = match graph.layer(producer.layer).output_info(producer.slot) {
                    Some(info) if info.data_type == DataType::Float32 => info.clone(),
                    _ => return Ok(PassOutcome::Unchanged),
                };
                let name = format!("convert_fp16_to_fp32-{}", graph.layer(id).name());
                let convert = graph.add_layer(Layer::new(LayerKind::ConvertFp16ToFp32, name)?);
                graph.insert_before(graph.input_ref(id, 0), convert)?;
                graph
                    .layer_mut(convert)
                    .set_output_info(0, info.with_data_type(DataType::Float32));
                Ok(PassOutcome::Substituted)
            }
            LayerKind::ConvertFp16ToFp32 | LayerKind::ConvertFp32ToFp16 => {
                Ok(PassOutcome::Unchanged)
            }
            _ => {
                // Interior layer: flip float32 slots to float16.
                let num_outputs = graph.layer(id).num_outputs();
                for slot in 0..num_outputs {
                    let flip = graph
                        .layer(id)
                        .output_info(slot)
                        .map(|info| info.data_type == DataType::Float32)
                        .unwrap_or(false);
                    if flip {
                        let info = graph.layer(id).output_info(slot).cloned().unwrap();
                        graph
                            .layer_mut(id)
                            .set_output_info(slot, info.with_data_type(DataType::Float16));
                    }
                }
                Ok(PassOutcome::Unchanged)
            }
        }
    }
}
