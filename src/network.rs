//! The top-level optimize entry point and its options.

use crate::assignment::{
    apply_backend_optimizations, assign_backends, report_error, OptimizationResult,
};
use crate::backend::{create_supported_backends, BackendRegistry, BackendSettings, DeviceSpec};
use crate::errors::{TPError, TPResult};
use crate::graph::{Graph, ShapeInferenceMethod};
use crate::handles::TensorHandleFactoryRegistry;
use crate::optimizer::{passes, Optimizer};
use crate::strategy::{insert_compatibility_layers, select_tensor_handle_strategy};
use crate::types::BackendId;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// An opaque bag of options addressed to one backend, forwarded verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendOptions {
    pub backend: BackendId,
    pub options: IndexMap<String, serde_json::Value>,
}

impl BackendOptions {
    pub fn new(backend: BackendId) -> Self {
        Self {
            backend,
            options: IndexMap::new(),
        }
    }

    pub fn with_option(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.options.get(name)
    }
}

pub type ModelOptions = Vec<BackendOptions>;

/// Name of the synthetic option bag recording the import/export choice.
pub const GLOBAL_OPTIONS_BACKEND: &str = "Global";

/// Options recognized by the optimize pipeline.
#[derive(Debug, Clone)]
pub struct OptimizerOptions {
    pub reduce_fp32_to_fp16: bool,
    /// Reserved; rejected at entry. Use a backend option instead.
    pub reduce_fp32_to_bf16: bool,
    pub shape_inference_method: ShapeInferenceMethod,
    pub import_enabled: bool,
    pub export_enabled: bool,
    /// Insert a debug tap after every layer.
    pub debug: bool,
    /// Debug taps write intermediate outputs to disk.
    pub debug_to_file: bool,
    pub debug_output_dir: PathBuf,
    pub allow_expanded_dims: bool,
    pub profiling_enabled: bool,
    /// Per-backend opaque option bags, forwarded to the backends.
    pub model_options: ModelOptions,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            reduce_fp32_to_fp16: false,
            reduce_fp32_to_bf16: false,
            shape_inference_method: ShapeInferenceMethod::ValidateOnly,
            import_enabled: false,
            export_enabled: false,
            debug: false,
            debug_to_file: false,
            debug_output_dir: PathBuf::from("tensorplan-intermediate-outputs"),
            allow_expanded_dims: false,
            profiling_enabled: false,
            model_options: Vec::new(),
        }
    }
}

/// The result of a successful optimize call: a fully annotated graph plus
/// the model-wide options to hand to the runtime.
#[derive(Debug)]
pub struct OptimizedNetwork {
    graph: Graph,
    model_options: ModelOptions,
}

impl OptimizedNetwork {
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn model_options(&self) -> &ModelOptions {
        &self.model_options
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }
}

/// Run the whole optimization and partitioning pipeline over `graph`.
///
/// Returns the optimized network, or an error with all accumulated
/// diagnostics pushed into `messages`. On error the graph state is
/// discarded; no partial result is surfaced.
#[tracing::instrument(skip_all, fields(backends = ?backend_preferences))]
pub fn optimize(
    mut graph: Graph,
    backend_preferences: &[BackendId],
    device_spec: &DeviceSpec,
    registry: &BackendRegistry,
    options: &OptimizerOptions,
    mut messages: Option<&mut Vec<String>>,
) -> TPResult<OptimizedNetwork> {
    if backend_preferences.is_empty() {
        return Err(TPError::invalid_argument(
            "invoked optimize with no backends specified",
        ));
    }
    if options.reduce_fp32_to_bf16 {
        return Err(TPError::invalid_argument(
            "BFloat16 reduction is currently ignored; use the fast-math backend option instead",
        ));
    }
    if options.reduce_fp32_to_fp16 && options.reduce_fp32_to_bf16 {
        return Err(TPError::invalid_argument(
            "BFloat16 and Float16 reduction cannot be enabled at the same time",
        ));
    }

    graph.verify_connections()?;

    // The runtime needs to know whether import/export semantics were
    // requested; record them as a synthetic model option.
    let mut model_options = options.model_options.clone();
    model_options.push(
        BackendOptions::new(BackendId::new(GLOBAL_OPTIONS_BACKEND))
            .with_option("ImportEnabled", serde_json::json!(options.import_enabled))
            .with_option("ExportEnabled", serde_json::json!(options.export_enabled)),
    );

    if options.shape_inference_method == ShapeInferenceMethod::InferAndValidate {
        graph.infer_tensor_infos(ShapeInferenceMethod::InferAndValidate)?;
    }

    Optimizer::with_passes(vec![Box::new(passes::AddBroadcastReshapeLayer)]).run(&mut graph)?;

    if options.shape_inference_method == ShapeInferenceMethod::ValidateOnly {
        graph.infer_tensor_infos(ShapeInferenceMethod::ValidateOnly)?;
    }

    // Constant-layer normalization runs before the pad and batch-norm
    // folds that rely on it.
    Optimizer::with_passes(vec![
        Box::new(passes::FusePermuteIntoConstLayer),
        Box::new(passes::ConvertConstDequantisationLayersToConstLayers),
    ])
    .run(&mut graph)?;

    Optimizer::with_passes(passes::default_pass_set()).run(&mut graph)?;

    if options.reduce_fp32_to_fp16 {
        Optimizer::with_passes(vec![Box::new(passes::Fp32NetworkToFp16Converter)])
            .run(&mut graph)?;
        Optimizer::with_passes(vec![Box::new(passes::ConvertConstantsFloatToHalf)])
            .run(&mut graph)?;
    }

    let mut settings = BackendSettings::new(backend_preferences.to_vec(), device_spec);
    if settings.available_preferred_backends().is_empty() {
        let message = format!(
            "none of the preferred backends {:?} are supported; current platform provides {:?}",
            backend_preferences
                .iter()
                .map(|b| b.as_str())
                .collect::<Vec<_>>(),
            settings
                .supported_backends
                .iter()
                .map(|b| b.as_str())
                .collect::<Vec<_>>()
        );
        report_error(message.clone(), &mut messages);
        return Err(TPError::invalid_argument(message));
    }

    let mut handle_registry = TensorHandleFactoryRegistry::new();
    let backends = create_supported_backends(registry, &settings, &mut handle_registry);

    let assignment =
        assign_backends(&mut graph, &backends, &mut settings, None, &mut messages)?;
    if assignment.is_error() {
        return Err(TPError::invalid_argument(
            "failed to assign a backend to each layer",
        ));
    }

    Optimizer::with_passes(vec![Box::new(passes::OptimizeInverseConversions)])
        .run(&mut graph)?;

    let backend_result = apply_backend_optimizations(
        &mut graph,
        &backends,
        &mut settings,
        &model_options,
        &mut messages,
    )?;
    if backend_result.is_error() {
        return Err(TPError::invalid_argument(
            "failed to apply the backend-specific optimizations",
        ));
    }

    // Normalize constants the backends may have introduced or retyped.
    Optimizer::with_passes(vec![
        Box::new(passes::ConvertConstantsFloatToHalf),
        Box::new(passes::ConvertConstantsHalfToFloat),
    ])
    .run(&mut graph)?;

    // Taps go in after every topological change but before handle
    // strategies, so the copies they observe are the real ones.
    if options.debug && !options.debug_to_file {
        Optimizer::with_passes(vec![Box::new(passes::InsertDebugLayer::new())])
            .run(&mut graph)?;
    } else if options.debug_to_file {
        match std::fs::create_dir_all(&options.debug_output_dir) {
            Ok(()) => {
                tracing::info!(
                    dir = %options.debug_output_dir.display(),
                    "intermediate tensors will be written to disk"
                );
                Optimizer::with_passes(vec![Box::new(passes::InsertDebugLayer::to_file())])
                    .run(&mut graph)?;
            }
            Err(error) => {
                tracing::warn!(%error, "unable to print intermediate layer outputs");
            }
        }
    }

    let strategy_result = select_tensor_handle_strategy(
        &mut graph,
        &backends,
        &handle_registry,
        options.import_enabled,
        options.export_enabled,
        &mut messages,
    )?;
    if strategy_result == OptimizationResult::Error {
        return Err(TPError::invalid_argument(
            "failed to select tensor-handle strategies for all edges",
        ));
    }

    insert_compatibility_layers(&mut graph, &backends, &handle_registry)?;

    Ok(OptimizedNetwork {
        graph,
        model_options,
    })
}
