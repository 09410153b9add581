//! # tensorplan
//!
//! In-memory IR and memory planner for tensor computation graphs: tensors and
//! operators wired into a DAG, scheduled topologically, peephole-optimized,
//! and finally laid out in a single contiguous arena.
//!
//! ## Pipeline
//!
//! ```text
//! Graph construction (add_tensor / add_op)
//!    │
//!    ▼  Graph::topo_sort
//! Topologically ordered operators
//!    │
//!    ▼  Graph::optimize (TransposeFusionPass + infer_shapes)
//! Rewritten graph with refreshed shapes
//!    │
//!    ▼  Graph::plan_memory (Allocator)
//! Every tensor bound to base + offset inside one arena
//! ```
//!
//! ## Quick start
//!
//! ```rust
//! use tensorplan::ir::{DataType, Graph, OpKind};
//!
//! let mut graph = Graph::new();
//! let a = graph.add_tensor(vec![4, 3], DataType::Float32).unwrap();
//! let b = graph.add_tensor(vec![4, 5], DataType::Float32).unwrap();
//! let at = graph.add_op(OpKind::transpose(vec![1, 0]), vec![a]).unwrap();
//! let at = graph.operator(at).unwrap().outputs[0];
//! graph.add_op(OpKind::matmul(), vec![at, b]).unwrap();
//!
//! graph.optimize().unwrap();
//! assert_eq!(graph.op_count(), 1);
//!
//! let plan = graph.plan_memory().unwrap();
//! assert!(plan.arena_bytes >= plan.used_bytes);
//! ```

#![allow(
    clippy::missing_errors_doc,
    clippy::must_use_candidate,
    clippy::uninlined_format_args,
    clippy::too_many_lines,
    clippy::match_same_arms,
    clippy::needless_pass_by_value,
    clippy::missing_panics_doc,
    clippy::doc_markdown
)]

pub mod ir;
