use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use crate::ir::{
    Allocator, CompilerFlags, DataType, Fuid, Guid, MemoryProvider, NativeCpuRuntime, OpKind,
    Operator, Pass, Shape, ShapeError, Tensor, TransposeFusionPass, print_graph,
    run_with_verifier_guard,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("tensor {fuid} is not part of the graph")]
    UnknownTensor { fuid: Fuid },
    #[error("operator {guid} is not part of the graph")]
    UnknownOperator { guid: Guid },
    #[error("tensor {fuid} is already registered")]
    DuplicateTensor { fuid: Fuid },
    #[error("invalid tensor shape {shape:?}: dimensions must be positive")]
    InvalidShape { shape: Shape },
    #[error("tensor of shape {shape:?} and dtype {dtype} does not fit in memory")]
    TensorTooLarge { shape: Shape, dtype: DataType },
    #[error("tensor {fuid} is already produced by operator {producer}")]
    AlreadyProduced { fuid: Fuid, producer: Guid },
    #[error("{kind}: {message}")]
    InvalidOperator { kind: String, message: String },
    #[error("{kind}: output tensor {fuid} has shape {actual:?}, inferred {expected:?}")]
    OutputShapeMismatch {
        kind: String,
        fuid: Fuid,
        expected: Shape,
        actual: Shape,
    },
    #[error("graph cannot be topologically sorted: cycle or dangling input")]
    NotSorted,
    #[error(transparent)]
    Shape(#[from] ShapeError),
}

/// Tensor/operator graph. Owns every tensor and operator record; all edges
/// are ids resolved through it.
///
/// `tensor_index` and `op_index` map ids to positions in `tensors` and `ops`
/// and must be rebuilt whenever either vector is reordered or shrunk.
#[derive(Debug)]
pub struct Graph {
    pub(crate) tensors: Vec<Tensor>,
    pub(crate) ops: Vec<Operator>,
    tensor_index: HashMap<Fuid, usize>,
    op_index: HashMap<Guid, usize>,
    pub(crate) sorted: bool,
    pub(crate) allocator: Allocator,
    pub(crate) flags: CompilerFlags,
    next_fuid: usize,
    next_guid: usize,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    #[must_use]
    pub fn new() -> Self {
        Self::with_flags(CompilerFlags::default())
    }

    #[must_use]
    pub fn with_flags(flags: CompilerFlags) -> Self {
        Self::with_runtime(flags, Box::new(NativeCpuRuntime))
    }

    #[must_use]
    pub fn with_runtime(flags: CompilerFlags, runtime: Box<dyn MemoryProvider>) -> Self {
        Self {
            tensors: Vec::new(),
            ops: Vec::new(),
            tensor_index: HashMap::new(),
            op_index: HashMap::new(),
            sorted: false,
            allocator: Allocator::with_alignment(runtime, flags.alignment),
            flags,
            next_fuid: 0,
            next_guid: 0,
        }
    }

    pub fn flags(&self) -> &CompilerFlags {
        &self.flags
    }

    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    pub fn tensors(&self) -> &[Tensor] {
        &self.tensors
    }

    pub fn operators(&self) -> &[Operator] {
        &self.ops
    }

    pub fn tensor_count(&self) -> usize {
        self.tensors.len()
    }

    pub fn op_count(&self) -> usize {
        self.ops.len()
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    #[must_use]
    pub fn get_tensor(&self, fuid: Fuid) -> Option<&Tensor> {
        let index = *self.tensor_index.get(&fuid)?;
        self.tensors.get(index)
    }

    pub fn tensor_mut(&mut self, fuid: Fuid) -> Option<&mut Tensor> {
        let index = *self.tensor_index.get(&fuid)?;
        self.tensors.get_mut(index)
    }

    #[must_use]
    pub fn operator(&self, guid: Guid) -> Option<&Operator> {
        let index = *self.op_index.get(&guid)?;
        self.ops.get(index)
    }

    pub fn operator_mut(&mut self, guid: Guid) -> Option<&mut Operator> {
        let index = *self.op_index.get(&guid)?;
        self.ops.get_mut(index)
    }

    pub(crate) fn op_position(&self, guid: Guid) -> Option<usize> {
        self.op_index.get(&guid).copied()
    }

    pub(crate) fn reindex_tensors(&mut self) {
        self.tensor_index = self
            .tensors
            .iter()
            .enumerate()
            .map(|(index, tensor)| (tensor.fuid, index))
            .collect();
    }

    pub(crate) fn reindex_ops(&mut self) {
        self.op_index = self
            .ops
            .iter()
            .enumerate()
            .map(|(index, op)| (op.guid, index))
            .collect();
    }

    fn push_tensor(&mut self, tensor: Tensor) -> Fuid {
        let fuid = tensor.fuid;
        self.tensor_index.insert(fuid, self.tensors.len());
        self.tensors.push(tensor);
        fuid
    }

    /// Registers a new standalone tensor.
    pub fn add_tensor(&mut self, shape: Shape, dtype: DataType) -> Result<Fuid, GraphError> {
        validate_shape(&shape, dtype)?;
        let fuid = Fuid(self.next_fuid);
        self.next_fuid += 1;
        Ok(self.push_tensor(Tensor::new(fuid, shape, dtype)))
    }

    /// Registers a tensor built by the caller. Its edges and storage are
    /// reset; the graph establishes them.
    pub fn add_existing_tensor(&mut self, mut tensor: Tensor) -> Result<Fuid, GraphError> {
        validate_shape(&tensor.shape, tensor.dtype)?;
        if self.get_tensor(tensor.fuid).is_some() {
            return Err(GraphError::DuplicateTensor { fuid: tensor.fuid });
        }
        tensor.source = None;
        tensor.targets.clear();
        tensor.storage = None;
        self.next_fuid = self.next_fuid.max(tensor.fuid.0 + 1);
        Ok(self.push_tensor(tensor))
    }

    pub fn add_tensors(&mut self, specs: &[(Shape, DataType)]) -> Result<Vec<Fuid>, GraphError> {
        specs
            .iter()
            .map(|(shape, dtype)| self.add_tensor(shape.clone(), *dtype))
            .collect()
    }

    /// Adds an operator over existing `inputs`; output tensors are created
    /// from shape inference and take the dtype of the first input.
    pub fn add_op(&mut self, kind: OpKind, inputs: Vec<Fuid>) -> Result<Guid, GraphError> {
        let input_shapes = self.input_shapes(&inputs)?;
        let inferred = infer_for(&kind, &input_shapes)?;
        let dtype = inputs
            .first()
            .and_then(|fuid| self.get_tensor(*fuid))
            .map_or(DataType::Float32, |tensor| tensor.dtype);

        let mut outputs = Vec::with_capacity(inferred.len());
        for shape in inferred {
            outputs.push(self.add_tensor(shape, dtype)?);
        }
        Ok(self.attach(kind, inputs, outputs, &input_shapes))
    }

    /// Adds an operator writing into caller-created `outputs`. Their shapes must
    /// agree with inference and none may already have a producer.
    pub fn add_op_with_outputs(
        &mut self,
        kind: OpKind,
        inputs: Vec<Fuid>,
        outputs: Vec<Fuid>,
    ) -> Result<Guid, GraphError> {
        let input_shapes = self.input_shapes(&inputs)?;
        let inferred = infer_for(&kind, &input_shapes)?;
        if inferred.len() != outputs.len() {
            return Err(GraphError::InvalidOperator {
                kind: kind.name().to_string(),
                message: format!(
                    "declares {} outputs but infers {}",
                    outputs.len(),
                    inferred.len()
                ),
            });
        }

        for (fuid, expected) in outputs.iter().zip(&inferred) {
            let tensor = self
                .get_tensor(*fuid)
                .ok_or(GraphError::UnknownTensor { fuid: *fuid })?;
            if let Some(producer) = tensor.source {
                return Err(GraphError::AlreadyProduced {
                    fuid: *fuid,
                    producer,
                });
            }
            if tensor.shape != *expected {
                return Err(GraphError::OutputShapeMismatch {
                    kind: kind.name().to_string(),
                    fuid: *fuid,
                    expected: expected.clone(),
                    actual: tensor.shape.clone(),
                });
            }
        }
        Ok(self.attach(kind, inputs, outputs, &input_shapes))
    }

    fn input_shapes(&self, inputs: &[Fuid]) -> Result<Vec<Shape>, GraphError> {
        inputs
            .iter()
            .map(|fuid| {
                self.get_tensor(*fuid)
                    .map(|tensor| tensor.shape.clone())
                    .ok_or(GraphError::UnknownTensor { fuid: *fuid })
            })
            .collect()
    }

    fn attach(
        &mut self,
        mut kind: OpKind,
        inputs: Vec<Fuid>,
        outputs: Vec<Fuid>,
        input_shapes: &[Shape],
    ) -> Guid {
        if let (OpKind::MatMul(attrs), [a, b]) = (&mut kind, input_shapes)
            && let Ok((_, (m, n, k))) = crate::ir::infer_matmul(a, b, attrs)
        {
            attrs.m = m;
            attrs.n = n;
            attrs.k = k;
        }

        let guid = Guid(self.next_guid);
        self.next_guid += 1;
        self.op_index.insert(guid, self.ops.len());
        self.ops.push(Operator::new(guid, kind, inputs, outputs));
        self.connect(guid);
        guid
    }

    /// Wires the operator's tensors and neighbours. Every insertion is
    /// idempotent.
    fn connect(&mut self, guid: Guid) {
        self.sorted = false;
        let Some(op) = self.operator(guid) else {
            return;
        };
        let (inputs, outputs) = (op.inputs.clone(), op.outputs.clone());

        for input in inputs {
            let Some(tensor) = self.tensor_mut(input) else {
                continue;
            };
            tensor.add_target(guid);
            if let Some(source) = tensor.source {
                self.link(source, guid);
            }
        }

        for output in outputs {
            let Some(tensor) = self.tensor_mut(output) else {
                continue;
            };
            tensor.source = Some(guid);
            let consumers = tensor.targets.clone();
            for consumer in consumers {
                self.link(guid, consumer);
            }
        }
    }

    /// Adds the `from -> to` operator edge when both ends exist.
    pub(crate) fn link(&mut self, from: Guid, to: Guid) {
        if self.operator(from).is_none() || self.operator(to).is_none() {
            return;
        }
        if let Some(op) = self.operator_mut(from) {
            op.add_successor(to);
        }
        if let Some(op) = self.operator_mut(to) {
            op.add_predecessor(from);
        }
    }

    /// Deletes an operator and splices its neighbours together.
    ///
    /// Successors that consumed one of the operator's outputs consume its first
    /// input instead, and that input's producer becomes their predecessor.
    /// Outputs nobody consumes any more leave the graph. The relative order of
    /// the remaining operators is unchanged.
    pub fn remove_operator(&mut self, guid: Guid) -> Result<(), GraphError> {
        let index = self
            .op_position(guid)
            .ok_or(GraphError::UnknownOperator { guid })?;
        let op = self.ops.remove(index);
        self.reindex_ops();

        for input in &op.inputs {
            if let Some(tensor) = self.tensor_mut(*input) {
                tensor.remove_target(guid);
            }
        }

        for pred in &op.predecessors {
            if let Some(pred) = self.operator_mut(*pred) {
                pred.remove_successor(guid);
            }
        }

        let forwarded = op.inputs.first().copied();
        let forwarded_source = forwarded
            .and_then(|fuid| self.get_tensor(fuid))
            .and_then(|tensor| tensor.source);

        for succ in &op.successors {
            let Some(successor) = self.operator_mut(*succ) else {
                continue;
            };
            successor.remove_predecessor(guid);
            let Some(forwarded) = forwarded else {
                continue;
            };
            let rewired = op
                .outputs
                .iter()
                .map(|output| successor.replace_input(*output, forwarded))
                .sum::<usize>();
            if rewired == 0 {
                continue;
            }
            if let Some(tensor) = self.tensor_mut(forwarded) {
                tensor.add_target(*succ);
            }
            if let Some(source) = forwarded_source {
                self.link(source, *succ);
            }
        }

        for output in &op.outputs {
            let Some(tensor) = self.get_tensor(*output) else {
                continue;
            };
            let consumers = tensor
                .targets
                .iter()
                .copied()
                .filter(|target| {
                    self.operator(*target)
                        .is_some_and(|candidate| candidate.consumes(*output))
                })
                .collect::<Vec<_>>();
            if consumers.is_empty() {
                self.tensors.retain(|tensor| tensor.fuid != *output);
                self.reindex_tensors();
            } else if let Some(tensor) = self.tensor_mut(*output) {
                tensor.source = None;
                tensor.targets = consumers;
            }
        }

        log::debug!("removed operator {guid} ({})", op.kind.name());
        Ok(())
    }

    /// Runs a rewrite pass, guarded by the verifier when enabled.
    pub fn run_pass<P: Pass>(&mut self, pass: &mut P) {
        if self.flags.verify_passes {
            run_with_verifier_guard(self, |graph| pass.run(graph));
        } else {
            pass.run(self);
        }
    }

    /// Peephole-optimizes the sorted graph, then re-infers shapes.
    pub fn optimize(&mut self) -> Result<(), GraphError> {
        if !self.topo_sort() {
            return Err(GraphError::NotSorted);
        }
        let mut pass = TransposeFusionPass::new();
        self.run_pass(&mut pass);
        self.infer_shapes()?;
        Ok(())
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&print_graph(self))
    }
}

fn validate_shape(shape: &Shape, dtype: DataType) -> Result<(), GraphError> {
    if shape.contains(&0) {
        return Err(GraphError::InvalidShape {
            shape: shape.clone(),
        });
    }
    if crate::ir::tensor::checked_bytes(shape, dtype).is_none() {
        return Err(GraphError::TensorTooLarge {
            shape: shape.clone(),
            dtype,
        });
    }
    Ok(())
}

fn infer_for(kind: &OpKind, input_shapes: &[Shape]) -> Result<Vec<Shape>, GraphError> {
    kind.infer_shape(input_shapes)
        .map_err(|message| GraphError::InvalidOperator {
            kind: kind.name().to_string(),
            message,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, UnaryOp, verify_graph};

    #[test]
    fn add_op_wires_producer_and_consumer_edges() {
        let mut graph = Graph::new();
        let x = graph
            .add_tensor(vec![2, 3], DataType::Float32)
            .expect("valid tensor");
        let relu = graph
            .add_op(OpKind::Unary(UnaryOp::Relu), vec![x])
            .expect("valid op");
        let hidden = graph.operator(relu).expect("op exists").outputs[0];
        let neg = graph
            .add_op(OpKind::Unary(UnaryOp::Neg), vec![hidden])
            .expect("valid op");

        let relu_op = graph.operator(relu).expect("op exists");
        let neg_op = graph.operator(neg).expect("op exists");
        assert_eq!(relu_op.successors, vec![neg]);
        assert_eq!(neg_op.predecessors, vec![relu]);

        let hidden_tensor = graph.get_tensor(hidden).expect("tensor exists");
        assert_eq!(hidden_tensor.source, Some(relu));
        assert_eq!(hidden_tensor.targets, vec![neg]);
        assert_eq!(hidden_tensor.shape, vec![2, 3]);
        assert!(!graph.is_sorted());
        verify_graph(&graph).expect("graph should be consistent");
    }

    #[test]
    fn producer_added_after_consumer_links_both_ways() {
        let mut graph = Graph::new();
        let x = graph
            .add_tensor(vec![4], DataType::Float32)
            .expect("valid tensor");
        let y = graph
            .add_tensor(vec![4], DataType::Float32)
            .expect("valid tensor");
        let consumer = graph
            .add_op(OpKind::Unary(UnaryOp::Tanh), vec![y])
            .expect("valid op");
        let producer = graph
            .add_op_with_outputs(OpKind::Unary(UnaryOp::Sigmoid), vec![x], vec![y])
            .expect("valid op");

        assert_eq!(
            graph.operator(producer).expect("op exists").successors,
            vec![consumer]
        );
        assert_eq!(
            graph.operator(consumer).expect("op exists").predecessors,
            vec![producer]
        );
    }

    #[test]
    fn same_tensor_twice_does_not_duplicate_edges() {
        let mut graph = Graph::new();
        let x = graph
            .add_tensor(vec![3], DataType::Float32)
            .expect("valid tensor");
        let first = graph
            .add_op(OpKind::Unary(UnaryOp::Relu), vec![x])
            .expect("valid op");
        let y = graph.operator(first).expect("op exists").outputs[0];
        let mul = graph
            .add_op(OpKind::ElementWise(BinaryOp::Mul), vec![y, y])
            .expect("valid op");

        assert_eq!(graph.get_tensor(y).expect("tensor exists").targets, vec![mul]);
        assert_eq!(
            graph.operator(mul).expect("op exists").predecessors,
            vec![first]
        );
    }

    #[test]
    fn rejects_shapes_whose_byte_size_overflows() {
        let mut graph = Graph::new();
        let shape = vec![usize::MAX / 4, 2];
        let err = graph
            .add_tensor(shape.clone(), DataType::Float64)
            .expect_err("byte size overflows");
        assert_eq!(
            err,
            GraphError::TensorTooLarge {
                shape,
                dtype: DataType::Float64
            }
        );

        let tensor = Tensor::new(Fuid(3), vec![usize::MAX, usize::MAX], DataType::Int8);
        assert!(matches!(
            graph.add_existing_tensor(tensor),
            Err(GraphError::TensorTooLarge { .. })
        ));
        assert_eq!(graph.tensor_count(), 0);
    }

    #[test]
    fn rejects_unknown_inputs_and_bad_outputs() {
        let mut graph = Graph::new();
        let err = graph
            .add_op(OpKind::Unary(UnaryOp::Relu), vec![Fuid(42)])
            .expect_err("input is missing");
        assert_eq!(err, GraphError::UnknownTensor { fuid: Fuid(42) });

        let a = graph
            .add_tensor(vec![2, 3], DataType::Float32)
            .expect("valid tensor");
        let b = graph
            .add_tensor(vec![3, 4], DataType::Float32)
            .expect("valid tensor");
        let wrong = graph
            .add_tensor(vec![2, 5], DataType::Float32)
            .expect("valid tensor");
        let err = graph
            .add_op_with_outputs(OpKind::matmul(), vec![a, b], vec![wrong])
            .expect_err("output shape disagrees");
        assert!(matches!(err, GraphError::OutputShapeMismatch { .. }));

        let err = graph
            .add_op(OpKind::matmul(), vec![b, b])
            .expect_err("inner dims differ");
        assert!(matches!(err, GraphError::InvalidOperator { .. }));
        assert_eq!(graph.op_count(), 0);
    }

    #[test]
    fn rejects_second_producer_for_a_tensor() {
        let mut graph = Graph::new();
        let x = graph
            .add_tensor(vec![2], DataType::Float32)
            .expect("valid tensor");
        let first = graph
            .add_op(OpKind::Unary(UnaryOp::Relu), vec![x])
            .expect("valid op");
        let y = graph.operator(first).expect("op exists").outputs[0];
        let err = graph
            .add_op_with_outputs(OpKind::Unary(UnaryOp::Neg), vec![x], vec![y])
            .expect_err("y already has a producer");
        assert_eq!(
            err,
            GraphError::AlreadyProduced {
                fuid: y,
                producer: first
            }
        );
    }

    #[test]
    fn existing_tensor_keeps_identity() {
        let mut graph = Graph::new();
        let fuid = graph
            .add_existing_tensor(Tensor::new(Fuid(10), vec![2, 2], DataType::Int32))
            .expect("fresh fuid");
        assert_eq!(fuid, Fuid(10));
        let err = graph
            .add_existing_tensor(Tensor::new(Fuid(10), vec![2, 2], DataType::Int32))
            .expect_err("duplicate fuid");
        assert_eq!(err, GraphError::DuplicateTensor { fuid: Fuid(10) });

        let next = graph
            .add_tensor(vec![1], DataType::Int32)
            .expect("valid tensor");
        assert_eq!(next, Fuid(11));
        assert!(graph.add_tensor(vec![2, 0], DataType::Int32).is_err());
    }

    #[test]
    fn removal_splices_chain() {
        let mut graph = Graph::new();
        let x = graph
            .add_tensor(vec![2, 2], DataType::Float32)
            .expect("valid tensor");
        let a = graph
            .add_op(OpKind::Unary(UnaryOp::Relu), vec![x])
            .expect("valid op");
        let ya = graph.operator(a).expect("op exists").outputs[0];
        let b = graph
            .add_op(OpKind::Unary(UnaryOp::Identity), vec![ya])
            .expect("valid op");
        let yb = graph.operator(b).expect("op exists").outputs[0];
        let c = graph
            .add_op(OpKind::Unary(UnaryOp::Neg), vec![yb])
            .expect("valid op");

        graph.remove_operator(b).expect("b exists");

        assert_eq!(graph.op_count(), 2);
        assert!(graph.get_tensor(yb).is_none());
        let c_op = graph.operator(c).expect("op exists");
        assert_eq!(c_op.inputs, vec![ya]);
        assert_eq!(c_op.predecessors, vec![a]);
        assert_eq!(graph.operator(a).expect("op exists").successors, vec![c]);
        assert_eq!(graph.get_tensor(ya).expect("tensor exists").targets, vec![c]);
        verify_graph(&graph).expect("graph should stay consistent");

        assert_eq!(
            graph.remove_operator(b),
            Err(GraphError::UnknownOperator { guid: b })
        );
    }
}
