use std::fmt;

use crate::ir::op::OpKind;

/// Stable identity of an operator inside a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Guid(pub usize);

/// Stable identity of a tensor inside a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fuid(pub usize);

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Fuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Computation node. Edges are ids resolved through the owning `Graph`.
#[derive(Debug, Clone)]
pub struct Operator {
    pub guid: Guid,
    pub kind: OpKind,
    pub inputs: Vec<Fuid>,
    pub outputs: Vec<Fuid>,
    pub predecessors: Vec<Guid>,
    pub successors: Vec<Guid>,
}

impl Operator {
    pub fn new(guid: Guid, kind: OpKind, inputs: Vec<Fuid>, outputs: Vec<Fuid>) -> Self {
        Self {
            guid,
            kind,
            inputs,
            outputs,
            predecessors: Vec::new(),
            successors: Vec::new(),
        }
    }

    pub fn add_predecessor(&mut self, guid: Guid) {
        push_unique(&mut self.predecessors, guid);
    }

    pub fn add_successor(&mut self, guid: Guid) {
        push_unique(&mut self.successors, guid);
    }

    pub fn remove_predecessor(&mut self, guid: Guid) {
        self.predecessors.retain(|pred| *pred != guid);
    }

    pub fn remove_successor(&mut self, guid: Guid) {
        self.successors.retain(|succ| *succ != guid);
    }

    /// Replaces every occurrence of `old` in the input list. Returns how many
    /// slots changed.
    pub fn replace_input(&mut self, old: Fuid, new: Fuid) -> usize {
        let mut replaced = 0;
        for input in &mut self.inputs {
            if *input == old {
                *input = new;
                replaced += 1;
            }
        }
        replaced
    }

    pub fn consumes(&self, fuid: Fuid) -> bool {
        self.inputs.contains(&fuid)
    }
}

pub(crate) fn push_unique<T: PartialEq>(items: &mut Vec<T>, item: T) {
    if !items.contains(&item) {
        items.push(item);
    }
}
