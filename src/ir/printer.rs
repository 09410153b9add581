use std::fmt::Display;

use crate::ir::{Fuid, Graph, OpKind, Operator, Tensor};

/// Renders every tensor (declaration order) and every operator (current
/// order) with their edges.
pub fn print_graph(graph: &Graph) -> String {
    let mut lines = Vec::with_capacity(graph.tensor_count() + graph.op_count() + 2);
    lines.push("Graph Tensors:".to_string());
    for (index, tensor) in graph.tensors().iter().enumerate() {
        lines.push(format_tensor(index, tensor));
    }
    lines.push("Graph operators:".to_string());
    for op in graph.operators() {
        lines.push(format!(
            "OP {}, pred {}, succ {}, {}",
            op.guid,
            fmt_list(&op.predecessors),
            fmt_list(&op.successors),
            format_op(op)
        ));
    }
    lines.join("\n")
}

fn format_tensor(index: usize, tensor: &Tensor) -> String {
    let source = tensor
        .source
        .map_or_else(|| "None".to_string(), |guid| guid.to_string());
    format!(
        "Tensor {index}, Fuid {}, shape {}, dtype {}, source {source}, targets {}",
        tensor.fuid,
        fmt_list(&tensor.shape),
        tensor.dtype,
        fmt_list(&tensor.targets)
    )
}

fn format_op(op: &Operator) -> String {
    match &op.kind {
        OpKind::MatMul(attrs) => format!(
            "MatMul([{},{}],A={},B={},C={},mnk=[{},{},{}])",
            if attrs.trans_a { "A^T" } else { "A" },
            if attrs.trans_b { "B^T" } else { "B" },
            slot(&op.inputs, 0),
            slot(&op.inputs, 1),
            slot(&op.outputs, 0),
            attrs.m,
            attrs.n,
            attrs.k
        ),
        OpKind::Transpose(attrs) => format!(
            "Transpose(perm={},input={},output={})",
            fmt_list(&attrs.permute),
            slot(&op.inputs, 0),
            slot(&op.outputs, 0)
        ),
        OpKind::ElementWise(_) => format!(
            "{}(input0={},input1={},output={})",
            op.kind.name(),
            slot(&op.inputs, 0),
            slot(&op.inputs, 1),
            slot(&op.outputs, 0)
        ),
        OpKind::Unary(_) => format!(
            "{}(input={},output={})",
            op.kind.name(),
            slot(&op.inputs, 0),
            slot(&op.outputs, 0)
        ),
        OpKind::Custom(_) => format!(
            "{}(inputs={},outputs={})",
            op.kind.name(),
            fmt_list(&op.inputs),
            fmt_list(&op.outputs)
        ),
    }
}

fn slot(fuids: &[Fuid], index: usize) -> String {
    fuids
        .get(index)
        .map_or_else(|| "?".to_string(), ToString::to_string)
}

fn fmt_list<T: Display>(items: &[T]) -> String {
    let joined = items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!("[{joined}]")
}
