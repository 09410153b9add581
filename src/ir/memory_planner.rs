use std::collections::HashMap;

use thiserror::Error;

use crate::ir::{AllocatorError, Blob, Fuid, Graph, PlanStrategy};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MemoryPlanError {
    #[error("memory planning needs a topological order: graph has a cycle or dangling input")]
    NotSorted,
    #[error("tensor {fuid} is too large to address")]
    TensorTooLarge { fuid: Fuid },
    #[error(transparent)]
    Allocator(#[from] AllocatorError),
}

/// Arena offsets chosen for every tensor, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryPlan {
    pub strategy: PlanStrategy,
    pub offsets: Vec<(Fuid, usize)>,
    pub peak_bytes: usize,
    pub used_bytes: usize,
    pub arena_bytes: usize,
}

impl MemoryPlan {
    pub fn offset_of(&self, fuid: Fuid) -> Option<usize> {
        self.offsets
            .iter()
            .find(|(candidate, _)| *candidate == fuid)
            .map(|(_, offset)| *offset)
    }
}

impl Graph {
    /// Assigns every tensor an offset, reserves the arena once and binds each
    /// tensor's storage into it.
    ///
    /// The arena can be reserved only once, so a second call fails with
    /// `ArenaMaterialized` instead of producing a different layout. A failed
    /// attempt resets the allocator, leaving the graph ready to plan again.
    pub fn plan_memory(&mut self) -> Result<MemoryPlan, MemoryPlanError> {
        if self.allocator.is_materialized() {
            return Err(AllocatorError::ArenaMaterialized {
                operation: "plan_memory",
            }
            .into());
        }
        if !self.topo_sort() {
            return Err(MemoryPlanError::NotSorted);
        }

        let strategy = self.flags.strategy;
        let laid_out = self.assign_offsets(strategy).and_then(|offsets| {
            let base = self.allocator.base_pointer()?;
            Ok((offsets, base))
        });
        let (offsets, base) = match laid_out {
            Ok(laid_out) => laid_out,
            Err(err) => {
                self.allocator.reset()?;
                log::debug!("memory planning failed, allocator reset: {err}");
                return Err(err);
            }
        };
        for tensor in &mut self.tensors {
            if let Some(offset) = offsets.get(&tensor.fuid) {
                tensor.storage = Some(Blob::new(base, *offset));
            }
        }

        let plan = MemoryPlan {
            strategy,
            offsets: self
                .tensors
                .iter()
                .filter_map(|tensor| {
                    offsets
                        .get(&tensor.fuid)
                        .map(|offset| (tensor.fuid, *offset))
                })
                .collect(),
            peak_bytes: self.allocator.peak_used(),
            used_bytes: self.allocator.current_used(),
            arena_bytes: self.allocator.high_water(),
        };
        log::debug!(
            "planned {} tensors with {:?}: {}, arena {} bytes",
            plan.offsets.len(),
            strategy,
            self.allocator.usage(),
            plan.arena_bytes
        );
        Ok(plan)
    }

    fn assign_offsets(
        &mut self,
        strategy: PlanStrategy,
    ) -> Result<HashMap<Fuid, usize>, MemoryPlanError> {
        let bytes = self
            .tensors
            .iter()
            .map(|tensor| {
                tensor
                    .checked_bytes()
                    .map(|size| (tensor.fuid, size))
                    .ok_or(MemoryPlanError::TensorTooLarge { fuid: tensor.fuid })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let offsets = match strategy {
            PlanStrategy::Sequential => self.plan_sequential(&bytes)?,
            PlanStrategy::LivenessReuse => self.plan_with_reuse(&bytes)?,
        };
        Ok(offsets)
    }

    fn plan_sequential(
        &mut self,
        bytes: &[(Fuid, usize)],
    ) -> Result<HashMap<Fuid, usize>, AllocatorError> {
        let mut offsets = HashMap::with_capacity(bytes.len());
        for (fuid, size) in bytes {
            offsets.insert(*fuid, self.allocator.alloc(*size)?);
        }
        Ok(offsets)
    }

    /// Allocates tensors when an operator first touches them and frees them
    /// after their last consumer. Tensors nobody consumes stay live.
    fn plan_with_reuse(
        &mut self,
        sizes: &[(Fuid, usize)],
    ) -> Result<HashMap<Fuid, usize>, AllocatorError> {
        let mut last_use = HashMap::<Fuid, usize>::new();
        for (step, op) in self.ops.iter().enumerate() {
            for input in &op.inputs {
                last_use.insert(*input, step);
            }
        }
        let bytes = sizes.iter().copied().collect::<HashMap<_, _>>();

        let mut offsets = HashMap::with_capacity(sizes.len());
        let mut live = Vec::<Fuid>::new();
        for (step, op) in self.ops.iter().enumerate() {
            for fuid in op.inputs.iter().chain(&op.outputs) {
                if offsets.contains_key(fuid) {
                    continue;
                }
                let Some(size) = bytes.get(fuid) else {
                    continue;
                };
                offsets.insert(*fuid, self.allocator.alloc(*size)?);
                live.push(*fuid);
            }

            let mut index = 0;
            while index < live.len() {
                let fuid = live[index];
                if last_use.get(&fuid) == Some(&step) {
                    if let (Some(offset), Some(size)) = (offsets.get(&fuid), bytes.get(&fuid)) {
                        self.allocator.free(*offset, *size)?;
                    }
                    live.remove(index);
                } else {
                    index += 1;
                }
            }
        }

        for (fuid, size) in sizes {
            if !offsets.contains_key(fuid) {
                offsets.insert(*fuid, self.allocator.alloc(*size)?);
            }
        }
        Ok(offsets)
    }
}
