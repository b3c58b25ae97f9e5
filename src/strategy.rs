//! Tensor-handle strategy selection: per output slot, pick the handle
//! factory that minimizes copies; per edge, pick the cheapest legal
//! producer/consumer handshake; then splice in the copy and import layers
//! that realize it.

use crate::assignment::report_error;
use crate::backend::BackendsMap;
use crate::errors::TPResult;
use crate::graph::{Graph, InputSlotRef, Layer, LayerKind, OutputSlotRef};
use crate::handles::TensorHandleFactoryRegistry;
use crate::types::{CapabilityClass, EdgeStrategy, FactoryId, LayerId};
use indexmap::IndexMap;

/// Whether moving a tensor from `src` to `dst` handles needs an explicit
/// copy: only when the factories differ and export/import flags do not
/// intersect.
fn requires_copy(
    src: &FactoryId,
    dst: &FactoryId,
    registry: &TensorHandleFactoryRegistry,
) -> bool {
    if src == dst {
        return false;
    }
    if let (Some(src_factory), Some(dst_factory)) = (registry.get(src), registry.get(dst)) {
        if src_factory.export_flags() & dst_factory.import_flags() != 0 {
            return false;
        }
    }
    true
}

/// Input layers all use the same host-visible implementation, so the factory
/// is chosen for maximum compatibility with the connected consumers: one
/// point per consumer listing the candidate, filtered by map/unmap or
/// import capability.
fn calculate_slot_option_for_input(
    graph: &Graph,
    backends: &BackendsMap,
    slot: OutputSlotRef,
    registry: &TensorHandleFactoryRegistry,
    import_enabled: bool,
) -> FactoryId {
    let layer = graph.layer(slot.layer);
    match backends.get(layer.backend()) {
        Some(b) if b.supports_tensor_allocator() => {}
        _ => return FactoryId::legacy(),
    }

    let mut scores: IndexMap<FactoryId, i32> = IndexMap::new();
    let mut top_score = 0;
    let mut top_choice = FactoryId::legacy();

    for connection in layer.output(slot.slot).consumers() {
        let to_backend = match backends.get(graph.layer(connection.layer).backend()) {
            Some(b) => b,
            None => continue,
        };
        if !to_backend.supports_tensor_allocator() {
            continue;
        }
        for dst in to_backend.handle_factory_preferences() {
            let factory = match registry.get(&dst) {
                Some(f) => f,
                None => continue,
            };
            if import_enabled && factory.import_flags() == 0 {
                continue;
            }
            if !import_enabled && !factory.supports_map_unmap() {
                continue;
            }
            match scores.get_mut(&dst) {
                None => {
                    scores.insert(dst.clone(), 0);
                    if top_choice.is_legacy() {
                        top_choice = dst;
                    }
                }
                Some(score) => {
                    *score += 1;
                    if *score > top_score {
                        top_score = *score;
                        top_choice = dst;
                    }
                }
            }
        }
    }
    top_choice
}

/// Output layers defer the choice to the consumer of the optimized network.
fn calculate_slot_option_for_output() -> FactoryId {
    FactoryId::deferred()
}

/// For every factory the source backend lists, count the connections that
/// would need a copy; keep the cheapest, preferring the source backend's
/// own ordering on ties.
fn calculate_slot_option(
    graph: &Graph,
    backends: &BackendsMap,
    slot: OutputSlotRef,
    registry: &TensorHandleFactoryRegistry,
    export_enabled: bool,
) -> FactoryId {
    let layer = graph.layer(slot.layer);
    let src_backend = match backends.get(layer.backend()) {
        Some(b) if b.supports_tensor_allocator() => b,
        _ => return FactoryId::legacy(),
    };
    let src_prefs = src_backend.handle_factory_preferences();

    let output_connection = layer
        .output(slot.slot)
        .consumers()
        .iter()
        .any(|c| matches!(graph.layer(c.layer).kind(), LayerKind::Output { .. }));

    let mut scores: IndexMap<FactoryId, i32> = IndexMap::new();
    for pref in &src_prefs {
        let factory = match registry.get(pref) {
            Some(f) => f,
            None => continue,
        };
        if export_enabled {
            if output_connection {
                // A layer fed from another backend is a fallback boundary;
                // its factory must allow fallback imports.
                let fallback_connection = (0..layer.num_inputs()).any(|i| {
                    graph
                        .layer(slot.layer)
                        .input(i)
                        .source()
                        .map(|p| graph.layer(p.layer).backend() != layer.backend())
                        .unwrap_or(false)
                });
                if fallback_connection {
                    let caps = factory.capabilities(
                        graph,
                        slot.layer,
                        slot.layer,
                        CapabilityClass::FallbackImportDisabled,
                    );
                    if !caps.is_empty() {
                        continue;
                    }
                } else if factory.export_flags() == 0 {
                    continue;
                }
            } else {
                let caps = factory.capabilities(
                    graph,
                    slot.layer,
                    slot.layer,
                    CapabilityClass::FallbackImportDisabled,
                );
                if !caps.is_empty() {
                    continue;
                }
            }
        } else if !factory.supports_map_unmap() {
            continue;
        }
        scores.insert(pref.clone(), 0);
    }

    for connection in layer.output(slot.slot).consumers() {
        let to_backend = match backends.get(graph.layer(connection.layer).backend()) {
            Some(b) => b,
            None => continue,
        };
        let dst_prefs = to_backend.handle_factory_preferences();
        for src in &src_prefs {
            if !scores.contains_key(src) {
                continue;
            }
            for dst in &dst_prefs {
                if requires_copy(src, dst, registry) {
                    *scores.get_mut(src).expect("present above") += 1;
                    break;
                }
            }
        }
    }

    let min_score = match scores.values().min() {
        Some(&m) => m,
        None => return FactoryId::legacy(),
    };
    for pref in &src_prefs {
        if scores.get(pref) == Some(&min_score) {
            return pref.clone();
        }
    }
    FactoryId::legacy()
}

/// The cheapest legal handshake for one edge, in the cost order
/// direct < export < copy.
fn calculate_edge_strategy(
    graph: &Graph,
    backends: &BackendsMap,
    src_factory_id: &FactoryId,
    producer: LayerId,
    consumer: LayerId,
    registry: &TensorHandleFactoryRegistry,
    import_enabled: bool,
) -> EdgeStrategy {
    let to_backend = match backends.get(graph.layer(consumer).backend()) {
        Some(b) => b,
        None => return EdgeStrategy::Undefined,
    };
    let dst_prefs = to_backend.handle_factory_preferences();

    // Legacy handles know only same-backend direct access and cross-backend
    // copies.
    if src_factory_id.is_legacy() || dst_prefs.is_empty() {
        return if graph.layer(producer).backend() != graph.layer(consumer).backend() {
            EdgeStrategy::CopyToTarget
        } else {
            EdgeStrategy::DirectCompatibility
        };
    }

    // Output layers consume any handle via import or map/unmap.
    if matches!(graph.layer(consumer).kind(), LayerKind::Output { .. }) {
        return EdgeStrategy::DirectCompatibility;
    }

    if dst_prefs.contains(src_factory_id) {
        return EdgeStrategy::DirectCompatibility;
    }

    let src_factory = match registry.get(src_factory_id) {
        Some(f) => f,
        None => return EdgeStrategy::Undefined,
    };

    if src_factory.export_flags() != 0 && import_enabled {
        for pref in &dst_prefs {
            let dst_factory = match registry.get(pref) {
                Some(f) => f,
                None => continue,
            };
            if dst_factory.import_flags() & src_factory.export_flags() == 0 {
                continue;
            }
            let src_padding =
                src_factory.capabilities(graph, producer, producer, CapabilityClass::PaddingRequired);
            let dst_padding =
                dst_factory.capabilities(graph, consumer, consumer, CapabilityClass::PaddingRequired);
            let src_fallback = src_factory.capabilities(
                graph,
                producer,
                producer,
                CapabilityClass::FallbackImportDisabled,
            );
            let dst_fallback = dst_factory.capabilities(
                graph,
                consumer,
                consumer,
                CapabilityClass::FallbackImportDisabled,
            );
            let padding = !src_padding.is_empty() || !dst_padding.is_empty();
            let fallback = !src_fallback.is_empty() || !dst_fallback.is_empty();
            if padding && fallback {
                tracing::warn!(
                    src = %src_factory_id,
                    dst = %pref,
                    "factory pair declares both padding-required and fallback-import-disabled"
                );
            }
            if !padding && !fallback {
                return EdgeStrategy::ExportToTarget;
            }
        }
    }

    if src_factory.supports_map_unmap() {
        for pref in &dst_prefs {
            if let Some(dst_factory) = registry.get(pref) {
                if dst_factory.supports_map_unmap() {
                    return EdgeStrategy::CopyToTarget;
                }
            }
        }
    }

    EdgeStrategy::Undefined
}

/// Choose a handle factory for every output slot and a strategy for every
/// edge. An undefined strategy anywhere fails the planner.
pub fn select_tensor_handle_strategy(
    graph: &mut Graph,
    backends: &BackendsMap,
    registry: &TensorHandleFactoryRegistry,
    import_enabled: bool,
    export_enabled: bool,
    messages: &mut Option<&mut Vec<String>>,
) -> TPResult<crate::assignment::OptimizationResult> {
    let mut result = crate::assignment::OptimizationResult::Ok;
    let ids: Vec<LayerId> = graph.layer_ids().collect();
    for id in ids {
        let num_outputs = graph.layer(id).num_outputs();
        for slot in 0..num_outputs {
            let slot_ref = graph.output_ref(id, slot);
            let option = match graph.layer(id).kind() {
                LayerKind::Input { .. } => calculate_slot_option_for_input(
                    graph,
                    backends,
                    slot_ref,
                    registry,
                    import_enabled,
                ),
                LayerKind::Output { .. } => calculate_slot_option_for_output(),
                _ => calculate_slot_option(graph, backends, slot_ref, registry, export_enabled),
            };
            graph.layer_mut(id).output_mut(slot).factory = option.clone();

            let consumers: Vec<InputSlotRef> =
                graph.layer(id).output(slot).consumers().to_vec();
            for (idx, consumer) in consumers.iter().enumerate() {
                let strategy = calculate_edge_strategy(
                    graph,
                    backends,
                    &option,
                    id,
                    consumer.layer,
                    registry,
                    import_enabled,
                );
                if strategy == EdgeStrategy::Undefined {
                    report_error(
                        format!(
                            "could not find a valid tensor-handle strategy between {} ({}) and {} ({})",
                            graph.layer(id).kind_name(),
                            graph.layer(id).name(),
                            graph.layer(consumer.layer).kind_name(),
                            graph.layer(consumer.layer).name()
                        ),
                        messages,
                    );
                    result = crate::assignment::OptimizationResult::Error;
                }
                graph.layer_mut(id).output_mut(slot).strategies[idx] = strategy;
            }
        }
    }
    Ok(result)
}

fn set_edge_strategy(
    graph: &mut Graph,
    producer: OutputSlotRef,
    consumer: InputSlotRef,
    strategy: EdgeStrategy,
) {
    let out = graph.layer_mut(producer.layer).output_mut(producer.slot);
    if let Some(idx) = out.consumers.iter().position(|c| *c == consumer) {
        out.strategies[idx] = strategy;
    }
}

/// The factory a spliced compatibility layer produces into: the consumer
/// backend's first preference that can complete the handshake.
fn compatibility_factory(
    graph: &Graph,
    backends: &BackendsMap,
    registry: &TensorHandleFactoryRegistry,
    src_factory: &FactoryId,
    consumer: LayerId,
    strategy: EdgeStrategy,
) -> FactoryId {
    let to_backend = match backends.get(graph.layer(consumer).backend()) {
        Some(b) => b,
        None => return FactoryId::legacy(),
    };
    let prefs = to_backend.handle_factory_preferences();
    let export_flags = registry
        .get(src_factory)
        .map(|f| f.export_flags())
        .unwrap_or(0);
    for pref in &prefs {
        let factory = match registry.get(pref) {
            Some(f) => f,
            None => continue,
        };
        let fits = match strategy {
            EdgeStrategy::CopyToTarget => factory.supports_map_unmap(),
            EdgeStrategy::ExportToTarget => factory.import_flags() & export_flags != 0,
            _ => true,
        };
        if fits {
            return pref.clone();
        }
    }
    prefs.first().cloned().unwrap_or_else(FactoryId::legacy)
}

/// Materialize the chosen strategies: splice a memcopy layer into every
/// copy edge and an import layer into every export edge. The inserted
/// layer runs on the consumer's backend.
pub fn insert_compatibility_layers(
    graph: &mut Graph,
    backends: &BackendsMap,
    registry: &TensorHandleFactoryRegistry,
) -> TPResult<()> {
    struct Splice {
        producer: OutputSlotRef,
        consumer: InputSlotRef,
        strategy: EdgeStrategy,
    }

    let mut work = Vec::new();
    for id in graph.layer_ids().collect::<Vec<_>>() {
        let layer = graph.layer(id);
        for slot in 0..layer.num_outputs() {
            let out = layer.output(slot);
            for (consumer, strategy) in out.consumers().iter().zip(out.strategies()) {
                if matches!(
                    strategy,
                    EdgeStrategy::CopyToTarget | EdgeStrategy::ExportToTarget
                ) {
                    work.push(Splice {
                        producer: OutputSlotRef { layer: id, slot },
                        consumer: *consumer,
                        strategy: *strategy,
                    });
                }
            }
        }
    }

    for splice in work {
        let kind = match splice.strategy {
            EdgeStrategy::CopyToTarget => LayerKind::MemCopy,
            _ => LayerKind::MemImport,
        };
        let name = format!(
            "{}-{}-to-{}",
            kind.name(),
            graph.layer(splice.producer.layer).name(),
            graph.layer(splice.consumer.layer).name()
        );
        let new_id = graph.add_layer(Layer::new(kind, name)?);

        let src_factory = graph
            .layer(splice.producer.layer)
            .output(splice.producer.slot)
            .factory()
            .clone();
        let consumer_backend = graph.layer(splice.consumer.layer).backend().clone();
        let info = graph
            .layer(splice.producer.layer)
            .output_info(splice.producer.slot)
            .cloned();

        let bridge_in = graph.input_ref(new_id, 0);
        let bridge_out = graph.output_ref(new_id, 0);
        graph.disconnect(splice.consumer);
        graph.connect(splice.producer, bridge_in)?;
        graph.connect(bridge_out, splice.consumer)?;

        let factory = compatibility_factory(
            graph,
            backends,
            registry,
            &src_factory,
            splice.consumer.layer,
            splice.strategy,
        );
        let new_layer = graph.layer_mut(new_id);
        new_layer.set_backend(consumer_backend);
        if let Some(info) = info {
            new_layer.set_output_info(0, info);
        }
        new_layer.output_mut(0).factory = factory;

        // The handshake happens on the producer->bridge edge; the bridge
        // hands its consumer a native handle.
        set_edge_strategy(graph, splice.producer, bridge_in, splice.strategy);
        set_edge_strategy(
            graph,
            bridge_out,
            splice.consumer,
            EdgeStrategy::DirectCompatibility,
        );
    }
    Ok(())
}
