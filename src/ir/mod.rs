pub mod allocation;
pub mod compiler_flags;
pub mod dtype;
pub mod graph;
pub mod memory_planner;
pub mod node;
pub mod op;
pub mod pass;
pub mod pass_utils;
pub mod printer;
pub mod runtime;
pub mod scheduler;
pub mod shape_inference;
pub mod tensor;
pub mod transpose_fusion;
pub mod verifier;

pub use allocation::{Allocator, AllocatorError, AllocatorUsage};
pub use compiler_flags::{CompilerFlags, PlanStrategy};
pub use dtype::DataType;
pub use graph::{Graph, GraphError};
pub use memory_planner::{MemoryPlan, MemoryPlanError};
pub use node::{Fuid, Guid, Operator};
pub use op::{BinaryOp, CustomOp, MatMulAttrs, OpKind, OpType, TransposeAttrs, UnaryOp};
pub use pass::Pass;
pub use pass_utils::run_with_verifier_guard;
pub use printer::print_graph;
pub use runtime::{MemoryProvider, NativeCpuRuntime, RuntimeError};
pub use shape_inference::{ShapeError, broadcast_shapes, infer_matmul, infer_transpose};
pub use tensor::{Blob, Shape, Tensor};
pub use transpose_fusion::{TransposeFusionPass, TransposeFusionReport};
pub use verifier::{VerifyError, verify_graph};
