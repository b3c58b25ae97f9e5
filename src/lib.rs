//! A neural-network graph compiler: algebraic rewrites over a computation
//! graph, backend assignment with float16 repair, per-backend subgraph
//! optimization, and tensor-handle strategy planning.

pub mod assignment;
pub mod backend;
pub mod errors;
pub mod graph;
pub mod handles;
pub mod network;
pub mod optimizer;
pub mod strategy;
pub mod tensor;
pub mod types;

pub use errors::{TPError, TPResult};
pub use graph::{Graph, GraphBuilder, LayerKind, ShapeInferenceMethod, SubgraphView};
pub use network::{optimize, BackendOptions, ModelOptions, OptimizedNetwork, OptimizerOptions};
pub use tensor::ConstTensor;
pub use types::{BackendId, DataType, EdgeStrategy, FactoryId, LayerId, Shape, TensorInfo};
