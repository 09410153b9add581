// Graph builders shared by the integration tests.
// Included with: `#[path = "common/graphs.rs"] mod graphs;`
#![allow(dead_code)]
use tensorplan::ir::{DataType, Fuid, Graph, Guid, OpKind, UnaryOp};

/// Output tensor of a single-output operator.
pub fn output_of(graph: &Graph, guid: Guid) -> Fuid {
    graph.operator(guid).expect("operator exists").outputs[0]
}

/// Builds a tree of `parents.len()` unary operators over `[4]` tensors.
///
/// Operator `j` reads tensor `parents[j] % (j + 1)` and writes tensor `j + 1`.
/// Operators are inserted following `insertion`, a permutation of their
/// indices, so the initial order is generally not topological.
pub fn random_tree(graph: &mut Graph, parents: &[usize], insertion: &[usize]) -> Vec<Fuid> {
    let tensors = (0..=parents.len())
        .map(|_| {
            graph
                .add_tensor(vec![4], DataType::Float32)
                .expect("valid tensor")
        })
        .collect::<Vec<_>>();
    for &j in insertion {
        let input = tensors[parents[j] % (j + 1)];
        graph
            .add_op_with_outputs(OpKind::Unary(UnaryOp::Relu), vec![input], vec![tensors[j + 1]])
            .expect("tree operator is valid");
    }
    tensors
}
