use std::collections::HashMap;

use crate::ir::{Graph, Guid};

impl Graph {
    /// Execution order as guids, or `None` when some operator can never be
    /// placed (a cycle, or an input tensor missing from the graph).
    ///
    /// The order is that of repeated passes over the current sequence, each
    /// placing every operator whose inputs have no producer or an already
    /// placed producer. An operator's pass is derived from its producers in
    /// one Kahn traversal: a producer later in the sequence pushes it one
    /// pass further.
    #[must_use]
    pub fn topo_order(&self) -> Option<Vec<Guid>> {
        let count = self.ops.len();
        let mut producers = Vec::with_capacity(count);
        let mut consumers = vec![Vec::new(); count];
        for (index, op) in self.ops.iter().enumerate() {
            let mut deps = Vec::<usize>::new();
            for input in &op.inputs {
                let tensor = self.get_tensor(*input)?;
                if let Some(source) = tensor.source {
                    let producer = self.op_position(source)?;
                    if !deps.contains(&producer) {
                        deps.push(producer);
                        consumers[producer].push(index);
                    }
                }
            }
            producers.push(deps);
        }

        let mut pending = producers.iter().map(Vec::len).collect::<Vec<_>>();
        let mut ready = (0..count)
            .filter(|index| pending[*index] == 0)
            .collect::<Vec<_>>();
        let mut pass = vec![0usize; count];
        let mut visited = 0;
        while let Some(index) = ready.pop() {
            visited += 1;
            pass[index] = producers[index]
                .iter()
                .map(|&producer| pass[producer] + usize::from(producer > index))
                .max()
                .unwrap_or(0);
            for &consumer in &consumers[index] {
                pending[consumer] -= 1;
                if pending[consumer] == 0 {
                    ready.push(consumer);
                }
            }
        }
        if visited < count {
            return None;
        }

        let mut order = (0..count).collect::<Vec<_>>();
        order.sort_by_key(|index| (pass[*index], *index));
        Some(order.into_iter().map(|index| self.ops[index].guid).collect())
    }

    /// Reorders the operator sequence topologically. Returns the cached answer
    /// when already sorted; on failure the sequence is left untouched.
    pub fn topo_sort(&mut self) -> bool {
        if self.sorted {
            return true;
        }
        let Some(order) = self.topo_order() else {
            log::debug!("topological sort failed over {} operators", self.ops.len());
            return false;
        };

        let rank = order
            .iter()
            .enumerate()
            .map(|(position, guid)| (*guid, position))
            .collect::<HashMap<_, _>>();
        self.ops
            .sort_by_key(|op| rank.get(&op.guid).copied().unwrap_or(usize::MAX));
        self.reindex_ops();
        self.sorted = true;
        true
    }
}
