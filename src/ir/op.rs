use std::fmt;
use std::sync::Arc;

use crate::ir::Shape;
use crate::ir::shape_inference::{broadcast_shapes, infer_matmul, infer_transpose};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Relu,
    Sigmoid,
    Tanh,
    Neg,
    Identity,
}

/// Attributes of a (batched) matrix multiply `C = op(A) x op(B)`.
///
/// `m`, `n` and `k` are derived from the operand shapes and refreshed by every
/// shape inference: `op(A)` is `[.., m, k]` and `op(B)` is `[.., k, n]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatMulAttrs {
    pub trans_a: bool,
    pub trans_b: bool,
    pub m: usize,
    pub n: usize,
    pub k: usize,
}

impl MatMulAttrs {
    pub fn new(trans_a: bool, trans_b: bool) -> Self {
        Self {
            trans_a,
            trans_b,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransposeAttrs {
    pub permute: Vec<usize>,
}

impl TransposeAttrs {
    pub fn new(permute: Vec<usize>) -> Self {
        Self { permute }
    }

    pub fn is_identity(&self) -> bool {
        self.permute.iter().copied().eq(0..self.permute.len())
    }

    /// True when the permutation is the identity except for the last two axes,
    /// which are swapped.
    pub fn swaps_last_two_axes(&self) -> bool {
        let rank = self.permute.len();
        if rank < 2 {
            return false;
        }
        self.permute.iter().enumerate().all(|(axis, &source)| {
            if axis == rank - 1 {
                source == rank - 2
            } else if axis == rank - 2 {
                source == rank - 1
            } else {
                source == axis
            }
        })
    }

    /// Permutation equivalent to applying `self` and then `next`.
    pub fn then(&self, next: &TransposeAttrs) -> Option<Vec<usize>> {
        if self.permute.len() != next.permute.len() {
            return None;
        }
        next.permute
            .iter()
            .map(|&axis| self.permute.get(axis).copied())
            .collect()
    }
}

/// Operator kind whose semantics live outside this crate. The graph only needs
/// a stable name and a way to infer output shapes.
pub trait CustomOp: fmt::Debug {
    fn name(&self) -> &str;

    fn infer_shape(&self, inputs: &[Shape]) -> Result<Vec<Shape>, String>;
}

#[derive(Debug, Clone)]
pub enum OpKind {
    MatMul(MatMulAttrs),
    Transpose(TransposeAttrs),
    ElementWise(BinaryOp),
    Unary(UnaryOp),
    Custom(Arc<dyn CustomOp>),
}

/// Payload-free tag of an `OpKind`, used when patterns compare kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpType {
    MatMul,
    Transpose,
    ElementWise(BinaryOp),
    Unary(UnaryOp),
    Custom,
}

impl OpKind {
    pub fn matmul() -> Self {
        OpKind::MatMul(MatMulAttrs::default())
    }

    pub fn transpose(permute: Vec<usize>) -> Self {
        OpKind::Transpose(TransposeAttrs::new(permute))
    }

    pub fn op_type(&self) -> OpType {
        match self {
            OpKind::MatMul(_) => OpType::MatMul,
            OpKind::Transpose(_) => OpType::Transpose,
            OpKind::ElementWise(op) => OpType::ElementWise(*op),
            OpKind::Unary(op) => OpType::Unary(*op),
            OpKind::Custom(_) => OpType::Custom,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            OpKind::MatMul(_) => "MatMul",
            OpKind::Transpose(_) => "Transpose",
            OpKind::ElementWise(BinaryOp::Add) => "Add",
            OpKind::ElementWise(BinaryOp::Sub) => "Sub",
            OpKind::ElementWise(BinaryOp::Mul) => "Mul",
            OpKind::ElementWise(BinaryOp::Div) => "Div",
            OpKind::Unary(UnaryOp::Relu) => "Relu",
            OpKind::Unary(UnaryOp::Sigmoid) => "Sigmoid",
            OpKind::Unary(UnaryOp::Tanh) => "Tanh",
            OpKind::Unary(UnaryOp::Neg) => "Neg",
            OpKind::Unary(UnaryOp::Identity) => "Identity",
            OpKind::Custom(op) => op.name(),
        }
    }

    /// Number of inputs the kind requires, `None` when the kind decides for
    /// itself.
    pub fn arity(&self) -> Option<usize> {
        match self {
            OpKind::MatMul(_) | OpKind::ElementWise(_) => Some(2),
            OpKind::Transpose(_) | OpKind::Unary(_) => Some(1),
            OpKind::Custom(_) => None,
        }
    }

    /// Infers one shape per output from the input shapes.
    pub fn infer_shape(&self, inputs: &[Shape]) -> Result<Vec<Shape>, String> {
        if let Some(expected) = self.arity()
            && inputs.len() != expected
        {
            return Err(format!(
                "{} expects {expected} inputs, got {}",
                self.name(),
                inputs.len()
            ));
        }

        match self {
            OpKind::MatMul(attrs) => {
                infer_matmul(&inputs[0], &inputs[1], attrs).map(|(shape, _)| vec![shape])
            }
            OpKind::Transpose(attrs) => infer_transpose(&inputs[0], attrs).map(|shape| vec![shape]),
            OpKind::ElementWise(_) => {
                broadcast_shapes(&inputs[0], &inputs[1]).map(|shape| vec![shape])
            }
            OpKind::Unary(_) => Ok(vec![inputs[0].clone()]),
            OpKind::Custom(op) => op.infer_shape(inputs),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::{OpKind, OpType, TransposeAttrs};

    #[test]
    fn detects_last_two_axes_swap() {
        assert!(TransposeAttrs::new(vec![1, 0]).swaps_last_two_axes());
        assert!(TransposeAttrs::new(vec![0, 2, 1]).swaps_last_two_axes());
        assert!(TransposeAttrs::new(vec![0, 1, 3, 2]).swaps_last_two_axes());
        assert!(!TransposeAttrs::new(vec![1, 0, 2]).swaps_last_two_axes());
        assert!(!TransposeAttrs::new(vec![2, 1, 0]).swaps_last_two_axes());
        assert!(!TransposeAttrs::new(vec![0]).swaps_last_two_axes());
    }

    #[test]
    fn composes_permutations() {
        let rotate = TransposeAttrs::new(vec![1, 2, 0]);
        let inverse = TransposeAttrs::new(vec![2, 0, 1]);
        let composed = rotate.then(&inverse).expect("same rank");
        assert_eq!(composed, vec![0, 1, 2]);

        let twice = rotate.then(&rotate).expect("same rank");
        assert_eq!(twice, vec![2, 0, 1]);
    }

    #[test]
    fn op_type_ignores_attributes() {
        assert_eq!(OpKind::transpose(vec![1, 0]).op_type(), OpType::Transpose);
        assert_eq!(
            OpKind::transpose(vec![0, 2, 1]).op_type(),
            OpKind::transpose(vec![1, 0]).op_type()
        );
        assert_ne!(OpKind::matmul().op_type(), OpType::Transpose);
    }

    #[test]
    fn rejects_wrong_arity() {
        let err = OpKind::matmul()
            .infer_shape(&[vec![2, 3]])
            .expect_err("matmul needs two inputs");
        assert!(err.contains("expects 2 inputs"));
    }
}
