//! Backend assignment: binding each layer to exactly one backend via the
//! hint -> preferred-list -> fallback policy, repairing float16 rejections
//! with conversion layers, and the per-backend subgraph optimization driver.

use crate::backend::{BackendSettings, BackendsMap, LayerSupport};
use crate::errors::TPResult;
use crate::graph::{Graph, Layer, LayerKind, SubgraphViewSelector};
use crate::network::ModelOptions;
use crate::optimizer::{passes, Optimizer, Pass};
use crate::types::{BackendId, DataType, LayerId, QuantizationInfo};

/// Three-state result of an assignment step: continue, try the next
/// backend, or abort with diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationResult {
    Ok,
    WarningOnly,
    Error,
}

impl OptimizationResult {
    pub fn is_ok(self) -> bool {
        self == OptimizationResult::Ok
    }

    pub fn is_error(self) -> bool {
        self == OptimizationResult::Error
    }
}

pub(crate) fn report_warning(message: String, messages: &mut Option<&mut Vec<String>>) {
    tracing::warn!("{message}");
    if let Some(sink) = messages {
        sink.push(format!("WARNING: {message}"));
    }
}

pub(crate) fn report_error(message: String, messages: &mut Option<&mut Vec<String>>) {
    tracing::error!("{message}");
    if let Some(sink) = messages {
        sink.push(format!("ERROR: {message}"));
    }
}

/// (input, output) data types of a layer, read from the connected tensors.
pub fn layer_in_out_data_types(graph: &Graph, id: LayerId) -> (DataType, DataType) {
    let layer = graph.layer(id);
    let data_in = if layer.num_inputs() == 0 {
        DataType::Float32
    } else {
        graph
            .producer_info(graph.input_ref(id, 0))
            .map(|info| info.data_type)
            .unwrap_or(DataType::Float32)
    };
    let data_out = if layer.num_outputs() == 0 {
        DataType::Float32
    } else {
        layer
            .output_info(0)
            .map(|info| info.data_type)
            .unwrap_or(DataType::Float32)
    };
    (data_in, data_out)
}

const SOFTMAX_QASYMMU8_SCALE: f32 = 1.0 / 256.0;

/// Every QAsymmU8 output must carry a non-zero scale; softmax outputs of
/// that type are pinned to scale 1/256 and offset 0, corrected with a
/// warning when they differ.
fn check_scale_set_on_quantized_type(
    graph: &mut Graph,
    id: LayerId,
    messages: &mut Option<&mut Vec<String>>,
) -> bool {
    let mut no_errors = true;
    let num_outputs = graph.layer(id).num_outputs();
    for slot in 0..num_outputs {
        let info = match graph.layer(id).output_info(slot) {
            Some(info) => info.clone(),
            None => continue,
        };
        if info.data_type != DataType::QAsymmU8 {
            continue;
        }
        let scale = info.quantization.map(|q| q.scale).unwrap_or(0.0);
        if scale == 0.0 {
            no_errors = false;
            report_error(
                format!(
                    "output {slot} of layer {} ({}) is quantized 8 bit but its scale parameter has not been set",
                    graph.layer(id).kind_name(),
                    graph.layer(id).name()
                ),
                messages,
            );
        }
        let is_softmax = matches!(graph.layer(id).kind(), LayerKind::Softmax(_));
        let offset = info.quantization.map(|q| q.offset).unwrap_or(0);
        if is_softmax && (scale != SOFTMAX_QASYMMU8_SCALE || offset != 0) {
            report_warning(
                format!(
                    "quantization parameters for softmax layer {} (scale {scale}, offset {offset}) \
                     are incorrect and have been updated to scale 1/256 and offset 0",
                    graph.layer(id).name()
                ),
                messages,
            );
            let mut fixed = info;
            fixed.quantization = Some(QuantizationInfo {
                scale: SOFTMAX_QASYMMU8_SCALE,
                offset: 0,
            });
            graph.layer_mut(id).set_output_info(slot, fixed);
        }
    }
    no_errors
}

/// Insert a fp16->fp32 conversion before each (fp16) input slot of `layer`.
pub fn insert_convert_fp16_to_fp32_layers_before(
    graph: &mut Graph,
    layer: LayerId,
    expect_correct_input_type: bool,
) -> TPResult<Vec<LayerId>> {
    let mut converts = Vec::new();
    let num_inputs = graph.layer(layer).num_inputs();
    for slot in 0..num_inputs {
        let produced = graph.producer_info(graph.input_ref(layer, slot)).cloned();
        let info = match produced {
            Some(info) => info,
            None => continue,
        };
        if expect_correct_input_type && info.data_type != DataType::Float16 {
            continue;
        }
        let name = format!(
            "convert_fp16_to_fp32-{slot}-{}",
            graph.layer(layer).name()
        );
        let convert = graph.add_layer(Layer::new(LayerKind::ConvertFp16ToFp32, name)?);
        graph.insert_before(graph.input_ref(layer, slot), convert)?;
        graph
            .layer_mut(convert)
            .set_output_info(0, info.with_data_type(DataType::Float32));
        converts.push(convert);
    }
    Ok(converts)
}

/// Flip the layer's fp16 outputs to fp32 and insert fp32->fp16 conversions
/// after each of them.
pub fn insert_convert_fp32_to_fp16_layers_after(
    graph: &mut Graph,
    layer: LayerId,
) -> TPResult<Vec<LayerId>> {
    let num_outputs = graph.layer(layer).num_outputs();
    for slot in 0..num_outputs {
        if let Some(info) = graph.layer(layer).output_info(slot).cloned() {
            if info.data_type == DataType::Float16 {
                graph
                    .layer_mut(layer)
                    .set_output_info(slot, info.with_data_type(DataType::Float32));
            }
        }
    }

    let mut converts = Vec::new();
    for slot in 0..num_outputs {
        let info = match graph.layer(layer).output_info(slot) {
            Some(info) if info.data_type == DataType::Float32 => info.clone(),
            _ => continue,
        };
        let name = format!(
            "convert_fp32_to_fp16-{slot}-{}",
            graph.layer(layer).name()
        );
        let convert = graph.add_layer(Layer::new(LayerKind::ConvertFp32ToFp16, name)?);
        graph.insert_after(graph.output_ref(layer, slot), convert)?;
        graph
            .layer_mut(convert)
            .set_output_info(0, info.with_data_type(DataType::Float16));
        converts.push(convert);
    }
    Ok(converts)
}

fn unsupported_on_all(
    graph: &Graph,
    id: LayerId,
    settings: &BackendSettings,
    messages: &mut Option<&mut Vec<String>>,
) -> OptimizationResult {
    report_error(
        format!(
            "layer {} ({}) is not supported on any preferred backend {:?}",
            graph.layer(id).kind_name(),
            graph.layer(id).name(),
            settings
                .preferred_backends
                .iter()
                .map(|b| b.as_str())
                .collect::<Vec<_>>()
        ),
        messages,
    );
    OptimizationResult::Error
}

/// Try to bind `layer` to `backend`, repairing a float16 rejection by
/// wrapping the layer with conversions when the backend would accept it in
/// float32.
#[allow(clippy::too_many_arguments)]
fn attempt_backend_assignment(
    graph: &mut Graph,
    backends: &BackendsMap,
    settings: &BackendSettings,
    id: LayerId,
    candidate: &BackendId,
    data_in: DataType,
    data_out: DataType,
    available_preferred: &[BackendId],
    messages: &mut Option<&mut Vec<String>>,
) -> TPResult<OptimizationResult> {
    graph.layer_mut(id).set_backend(candidate.clone());
    let backend = match backends.get(candidate) {
        Some(b) => b,
        None => return Ok(OptimizationResult::WarningOnly),
    };

    let support = backend.is_layer_supported(graph, id, None);
    let fp16_repairable = matches!(support, LayerSupport::Fp16NotSupported(_))
        && (data_in == DataType::Float16 || data_out == DataType::Float16);

    if support.is_supported() {
        return Ok(OptimizationResult::Ok);
    }

    if fp16_repairable {
        let supported_as_fp32 = backend
            .is_layer_supported(graph, id, Some(DataType::Float32))
            .is_supported();
        let is_conversion = matches!(
            graph.layer(id).kind(),
            LayerKind::ConvertFp16ToFp32 | LayerKind::ConvertFp32ToFp16
        );
        if supported_as_fp32 && !is_conversion {
            // Constants feeding only this layer are rewritten to fp32 in
            // place instead of gaining a conversion layer.
            let mut rewrote_constant = false;
            let num_inputs = graph.layer(id).num_inputs();
            for slot in 0..num_inputs {
                let producer = match graph.layer(id).input(slot).source() {
                    Some(p) => p,
                    None => continue,
                };
                let is_single_use_constant = matches!(
                    graph.layer(producer.layer).kind(),
                    LayerKind::Constant { .. }
                ) && graph
                    .layer(producer.layer)
                    .output(0)
                    .consumers()
                    .len()
                    == 1;
                if !is_single_use_constant {
                    continue;
                }
                let is_fp16 = graph
                    .layer(producer.layer)
                    .output_info(0)
                    .map(|info| info.data_type == DataType::Float16)
                    .unwrap_or(false);
                if !is_fp16 {
                    continue;
                }
                let widened = match graph.layer(producer.layer).kind() {
                    LayerKind::Constant { tensor } => tensor.to_f32()?,
                    _ => unreachable!(),
                };
                let new_info = widened.info().clone();
                if let LayerKind::Constant { tensor } = graph.layer_mut(producer.layer).kind_mut()
                {
                    *tensor = widened;
                }
                graph.layer_mut(producer.layer).set_output_info(0, new_info);
                rewrote_constant = true;
            }

            let mut converts = Vec::new();
            if data_in == DataType::Float16 {
                converts.extend(insert_convert_fp16_to_fp32_layers_before(
                    graph,
                    id,
                    rewrote_constant,
                )?);
            }
            if data_out == DataType::Float16 {
                converts.extend(insert_convert_fp32_to_fp16_layers_after(graph, id)?);
            }

            // Each inserted conversion needs a backend of its own: the
            // candidate first, then the rest of the available list.
            for convert in converts {
                let mut found = false;
                graph.layer_mut(convert).set_backend(candidate.clone());
                if let Some(b) = backends.get(candidate) {
                    if b.is_layer_supported(graph, convert, None).is_supported() {
                        found = true;
                    }
                }
                if !found {
                    for other in available_preferred {
                        if other == candidate {
                            continue;
                        }
                        graph.layer_mut(convert).set_backend(other.clone());
                        if let Some(b) = backends.get(other) {
                            if b.is_layer_supported(graph, convert, None).is_supported() {
                                found = true;
                                break;
                            }
                        }
                    }
                }
                if !found {
                    return Ok(unsupported_on_all(graph, convert, settings, messages));
                }
            }
            return Ok(OptimizationResult::Ok);
        }
    }

    report_warning(
        format!(
            "layer {} ({}) is not supported on requested backend {} for input type {} and \
             output type {} (reason: {}), falling back to the next backend",
            graph.layer(id).kind_name(),
            graph.layer(id).name(),
            candidate,
            data_in.name(),
            data_out.name(),
            support.reason()
        ),
        messages,
    );
    Ok(OptimizationResult::WarningOnly)
}

fn assign_backends_for_layer(
    graph: &mut Graph,
    backends: &BackendsMap,
    settings: &mut BackendSettings,
    id: LayerId,
    available_preferred: &[BackendId],
    messages: &mut Option<&mut Vec<String>>,
) -> TPResult<OptimizationResult> {
    if matches!(graph.layer(id).kind(), LayerKind::Input { .. }) {
        return Ok(OptimizationResult::Ok);
    }

    let mut result = OptimizationResult::Ok;
    if !check_scale_set_on_quantized_type(graph, id, messages) {
        // Keep walking so every unset scale in the graph is reported.
        result = OptimizationResult::Error;
    }

    let (data_in, data_out) = layer_in_out_data_types(graph, id);
    let hint = graph.layer(id).hint().cloned();
    let mut found = false;

    if let Some(hinted) = hint.as_ref().filter(|h| settings.is_backend_supported(h)) {
        if attempt_backend_assignment(
            graph,
            backends,
            settings,
            id,
            hinted,
            data_in,
            data_out,
            available_preferred,
            messages,
        )?
        .is_ok()
        {
            found = true;
            settings.selected_backends.insert(hinted.clone());
        }
    }

    if !found {
        for candidate in available_preferred {
            if hint.as_ref() == Some(candidate) {
                continue; // the hint already failed
            }
            let res = attempt_backend_assignment(
                graph,
                backends,
                settings,
                id,
                candidate,
                data_in,
                data_out,
                available_preferred,
                messages,
            )?;
            if res.is_ok() {
                found = true;
                settings.selected_backends.insert(candidate.clone());
                break;
            } else if res.is_error() {
                result = res;
            }
        }
    }

    if !found {
        // A few utility kinds have no accelerated implementations; they go
        // to the reference backend when it exists, even unrequested.
        let kind_allows_fallback = matches!(
            graph.layer(id).kind(),
            LayerKind::MemCopy | LayerKind::Constant { .. } | LayerKind::Permute(_)
        );
        let cpu_ref = BackendId::cpu_ref();
        if !settings.is_cpu_ref_used()
            && kind_allows_fallback
            && settings.is_backend_supported(&cpu_ref)
        {
            graph.layer_mut(id).set_backend(cpu_ref.clone());
            settings.selected_backends.insert(cpu_ref);
        } else {
            result = unsupported_on_all(graph, id, settings, messages);
        }
    }

    Ok(result)
}

/// Bind each of `layer_ids` (or the whole graph) to a backend. Input layers
/// take the backend of their first consumer at the end.
pub fn assign_backends(
    graph: &mut Graph,
    backends: &BackendsMap,
    settings: &mut BackendSettings,
    layer_ids: Option<&[LayerId]>,
    messages: &mut Option<&mut Vec<String>>,
) -> TPResult<OptimizationResult> {
    let available_preferred = settings.available_preferred_backends();
    if available_preferred.is_empty() {
        report_error("no preferred backends are available".to_string(), messages);
        return Ok(OptimizationResult::Error);
    }

    let ids: Vec<LayerId> = match layer_ids {
        Some(ids) => ids.to_vec(),
        None => graph.topological_order(),
    };

    let mut result = OptimizationResult::Ok;
    for &id in &ids {
        if graph.try_layer(id).is_none() {
            continue;
        }
        let res = assign_backends_for_layer(
            graph,
            backends,
            settings,
            id,
            &available_preferred,
            messages,
        )?;
        if res.is_error() {
            result = res;
        }
    }

    for &id in &ids {
        if graph.try_layer(id).is_none() {
            continue;
        }
        if matches!(graph.layer(id).kind(), LayerKind::Input { .. }) {
            let consumer_backend = graph
                .layer(id)
                .output(0)
                .consumers()
                .first()
                .map(|c| graph.layer(c.layer).backend().clone());
            if let Some(backend) = consumer_backend {
                graph.layer_mut(id).set_backend(backend);
            }
        }
    }

    Ok(result)
}

/// Hand each backend its subgraphs, apply the substitutions it returns and
/// reassign any subgraph it failed on to the other available backends.
pub fn apply_backend_optimizations(
    graph: &mut Graph,
    backends: &BackendsMap,
    settings: &mut BackendSettings,
    model_options: &ModelOptions,
    messages: &mut Option<&mut Vec<String>>,
) -> TPResult<OptimizationResult> {
    let selected: Vec<BackendId> = settings.selected_backends.iter().cloned().collect();
    for selected_backend in selected {
        let backend = match backends.get(&selected_backend) {
            Some(b) => b.clone(),
            None => continue,
        };

        if backend.accelerated() {
            let prepass: Vec<Box<dyn Pass>> = vec![
                Box::new(passes::PermuteDepthwiseConv2dWeights),
                Box::new(passes::FusePermuteIntoConstLayer),
            ];
            Optimizer::with_passes(prepass).run(graph)?;
        }

        let subgraphs = SubgraphViewSelector::select_subgraphs(graph, |g, id| {
            let layer = g.layer(id);
            !matches!(
                layer.kind(),
                LayerKind::Input { .. } | LayerKind::Output { .. }
            ) && layer.backend() == &selected_backend
        });
        if subgraphs.is_empty() {
            continue;
        }

        for subgraph in &subgraphs {
            let views = backend.optimize_subgraph(graph, subgraph, model_options);
            debug_assert!(views.validate(subgraph), "backend returned inconsistent views");

            for substitution in &views.substitutions {
                graph.substitute_subgraph(&substitution.substitutable, &substitution.replacement)?;
                for &id in substitution.replacement.layers() {
                    graph.layer_mut(id).set_backend(selected_backend.clone());
                }
            }

            if !views.failed.is_empty() {
                report_warning(
                    format!("some subgraphs failed to optimize on the {selected_backend} backend"),
                    messages,
                );
                let mut settings_copy = settings.clone();
                if !selected_backend.is_cpu_ref() {
                    settings_copy.ignored_backends.insert(selected_backend.clone());
                }
                for (count, failed) in views.failed.iter().enumerate() {
                    report_warning(
                        format!(
                            "re-assigning backends to {} layers inside sub-graph {count}",
                            failed.num_layers()
                        ),
                        messages,
                    );
                    let res = assign_backends(
                        graph,
                        backends,
                        &mut settings_copy,
                        Some(failed.layers()),
                        messages,
                    )?;
                    if res.is_error() {
                        return Ok(OptimizationResult::Error);
                    }
                }
                settings
                    .selected_backends
                    .extend(settings_copy.selected_backends);
            }
        }
    }
    Ok(OptimizationResult::Ok)
}
