use std::collections::HashSet;

use thiserror::Error;

use crate::ir::{Fuid, Graph, Guid};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("duplicate tensor id {fuid}")]
    DuplicateFuid { fuid: Fuid },
    #[error("duplicate operator id {guid}")]
    DuplicateGuid { guid: Guid },
    #[error("tensor {fuid} has neither a source nor targets")]
    DanglingTensor { fuid: Fuid },
    #[error("tensor {fuid} lists target {guid}, which is not in the graph")]
    TargetNotInGraph { fuid: Fuid, guid: Guid },
    #[error("tensor {fuid} lists source {guid}, which is not in the graph")]
    SourceNotInGraph { fuid: Fuid, guid: Guid },
    #[error("operator {guid} reads tensor {fuid}, which is not in the graph")]
    InputNotInGraph { guid: Guid, fuid: Fuid },
    #[error("operator {guid} writes tensor {fuid}, which is not in the graph")]
    OutputNotInGraph { guid: Guid, fuid: Fuid },
    #[error("operator {guid} lists predecessor {pred}, which is not in the graph")]
    PredecessorNotInGraph { guid: Guid, pred: Guid },
    #[error("operator {guid} lists successor {succ}, which is not in the graph")]
    SuccessorNotInGraph { guid: Guid, succ: Guid },
}

/// Checks that every id the graph stores resolves to a member of the graph.
/// Reports the first violation found.
pub fn verify_graph(graph: &Graph) -> Result<(), VerifyError> {
    let mut fuids = HashSet::with_capacity(graph.tensor_count());
    for tensor in graph.tensors() {
        if !fuids.insert(tensor.fuid) {
            return Err(VerifyError::DuplicateFuid { fuid: tensor.fuid });
        }
    }

    let mut guids = HashSet::with_capacity(graph.op_count());
    for op in graph.operators() {
        if !guids.insert(op.guid) {
            return Err(VerifyError::DuplicateGuid { guid: op.guid });
        }
    }

    for tensor in graph.tensors() {
        if tensor.is_dangling() {
            return Err(VerifyError::DanglingTensor { fuid: tensor.fuid });
        }
        if let Some(source) = tensor.source
            && !guids.contains(&source)
        {
            return Err(VerifyError::SourceNotInGraph {
                fuid: tensor.fuid,
                guid: source,
            });
        }
        if let Some(guid) = tensor.targets.iter().find(|guid| !guids.contains(*guid)) {
            return Err(VerifyError::TargetNotInGraph {
                fuid: tensor.fuid,
                guid: *guid,
            });
        }
    }

    for op in graph.operators() {
        if let Some(fuid) = op.inputs.iter().find(|fuid| !fuids.contains(*fuid)) {
            return Err(VerifyError::InputNotInGraph {
                guid: op.guid,
                fuid: *fuid,
            });
        }
        if let Some(fuid) = op.outputs.iter().find(|fuid| !fuids.contains(*fuid)) {
            return Err(VerifyError::OutputNotInGraph {
                guid: op.guid,
                fuid: *fuid,
            });
        }
        if let Some(pred) = op.predecessors.iter().find(|guid| !guids.contains(*guid)) {
            return Err(VerifyError::PredecessorNotInGraph {
                guid: op.guid,
                pred: *pred,
            });
        }
        if let Some(succ) = op.successors.iter().find(|guid| !guids.contains(*guid)) {
            return Err(VerifyError::SuccessorNotInGraph {
                guid: op.guid,
                succ: *succ,
            });
        }
    }

    Ok(())
}
