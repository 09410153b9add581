use thiserror::Error;

use crate::ir::{Graph, Guid, MatMulAttrs, OpKind, Shape, TransposeAttrs};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ShapeError {
    #[error("shape inference needs a topological order: graph has a cycle or dangling input")]
    Unsorted,
    #[error("shape inference failed at operator {guid} ({kind}): {message}")]
    Operator {
        guid: Guid,
        kind: String,
        message: String,
    },
}

impl Graph {
    /// Re-infers every operator's output shapes in topological order and
    /// writes changed shapes back onto the output tensors.
    ///
    /// Stops at the first operator whose inference fails; tensors of operators
    /// after it keep their previous shapes.
    pub fn infer_shapes(&mut self) -> Result<(), ShapeError> {
        if !self.topo_sort() {
            return Err(ShapeError::Unsorted);
        }

        for index in 0..self.ops.len() {
            let (guid, inputs, outputs) = {
                let op = &self.ops[index];
                (op.guid, op.inputs.clone(), op.outputs.clone())
            };
            let fail = |graph: &Graph, message: String| ShapeError::Operator {
                guid,
                kind: graph.ops[index].kind.name().to_string(),
                message,
            };

            let mut input_shapes = Vec::with_capacity(inputs.len());
            for fuid in &inputs {
                match self.get_tensor(*fuid) {
                    Some(tensor) => input_shapes.push(tensor.shape.clone()),
                    None => return Err(fail(self, format!("input tensor {fuid} is missing"))),
                }
            }

            let inferred = self.ops[index]
                .kind
                .infer_shape(&input_shapes)
                .map_err(|message| fail(self, message))?;
            if inferred.len() != outputs.len() {
                return Err(fail(
                    self,
                    format!(
                        "inferred {} output shapes for {} outputs",
                        inferred.len(),
                        outputs.len()
                    ),
                ));
            }

            if let OpKind::MatMul(attrs) = &mut self.ops[index].kind {
                refresh_matmul_dims(attrs, &input_shapes);
            }

            for (fuid, shape) in outputs.iter().zip(inferred) {
                let Some(tensor) = self.tensor_mut(*fuid) else {
                    return Err(fail(self, format!("output tensor {fuid} is missing")));
                };
                if tensor.shape != shape {
                    log::debug!(
                        "operator {guid} reshapes tensor {fuid}: {:?} -> {:?}",
                        tensor.shape,
                        shape
                    );
                    tensor.shape = shape;
                }
            }
        }
        Ok(())
    }
}

fn refresh_matmul_dims(attrs: &mut MatMulAttrs, inputs: &[Shape]) {
    if let [a, b] = inputs
        && let Ok((_, (m, n, k))) = infer_matmul(a, b, attrs)
    {
        attrs.m = m;
        attrs.n = n;
        attrs.k = k;
    }
}

fn swap_last_two(shape: &[usize]) -> Shape {
    let mut swapped = shape.to_vec();
    let rank = swapped.len();
    if rank >= 2 {
        swapped.swap(rank - 1, rank - 2);
    }
    swapped
}

/// Output shape of a batched matmul together with its `(m, n, k)`.
///
/// Operands flagged as transposed have their last two axes swapped first.
/// Leading batch axes broadcast against each other.
pub fn infer_matmul(
    a: &[usize],
    b: &[usize],
    attrs: &MatMulAttrs,
) -> Result<(Shape, (usize, usize, usize)), String> {
    if a.len() < 2 || b.len() < 2 {
        return Err(format!(
            "MatMul expects operands of rank >= 2, got {:?} and {:?}",
            a, b
        ));
    }
    let a = if attrs.trans_a { swap_last_two(a) } else { a.to_vec() };
    let b = if attrs.trans_b { swap_last_two(b) } else { b.to_vec() };

    let (m, k) = (a[a.len() - 2], a[a.len() - 1]);
    let (k_b, n) = (b[b.len() - 2], b[b.len() - 1]);
    if k != k_b {
        return Err(format!(
            "Shape mismatch in MatMul: inner dimensions {k} and {k_b} differ ({:?} x {:?})",
            a, b
        ));
    }

    let batch = broadcast_shapes(&a[..a.len() - 2], &b[..b.len() - 2])
        .map_err(|message| format!("MatMul batch dimensions: {message}"))?;
    let mut shape = batch;
    shape.push(m);
    shape.push(n);
    Ok((shape, (m, n, k)))
}

pub fn infer_transpose(input: &[usize], attrs: &TransposeAttrs) -> Result<Shape, String> {
    let rank = input.len();
    if attrs.permute.len() != rank {
        return Err(format!(
            "Transpose permutation {:?} does not match rank {rank}",
            attrs.permute
        ));
    }
    let mut seen = vec![false; rank];
    for &axis in &attrs.permute {
        if axis >= rank || seen[axis] {
            return Err(format!(
                "Transpose permutation {:?} is not a permutation of 0..{rank}",
                attrs.permute
            ));
        }
        seen[axis] = true;
    }
    Ok(attrs.permute.iter().map(|&axis| input[axis]).collect())
}

/// Multidirectional (numpy-style) broadcast of two shapes.
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Result<Shape, String> {
    let rank = a.len().max(b.len());
    let mut shape = vec![0; rank];
    for axis in 0..rank {
        let dim_a = dim_from_end(a, rank - 1 - axis);
        let dim_b = dim_from_end(b, rank - 1 - axis);
        shape[axis] = match (dim_a, dim_b) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            (x, y) => {
                return Err(format!(
                    "Shape mismatch in broadcast: {:?} vs {:?} (dims {x} and {y})",
                    a, b
                ));
            }
        };
    }
    Ok(shape)
}

fn dim_from_end(shape: &[usize], from_end: usize) -> usize {
    if from_end < shape.len() {
        shape[shape.len() - 1 - from_end]
    } else {
        1
    }
}
