use crate::ir::DataType;

/// How `Graph::plan_memory` feeds tensors to the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlanStrategy {
    /// Every tensor is allocated in declaration order and never freed.
    #[default]
    Sequential,
    /// Tensors are allocated at first use and freed after their last consumer,
    /// following the topological order.
    LivenessReuse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompilerFlags {
    pub alignment: usize,
    pub strategy: PlanStrategy,
    pub verify_passes: bool,
}

impl Default for CompilerFlags {
    fn default() -> Self {
        Self {
            alignment: DataType::MAX_WIDTH,
            strategy: PlanStrategy::Sequential,
            verify_passes: cfg!(debug_assertions),
        }
    }
}

impl CompilerFlags {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            alignment: read_alignment("TENSORPLAN_ALIGNMENT", defaults.alignment),
            strategy: if read_bool("TENSORPLAN_REUSE", false) {
                PlanStrategy::LivenessReuse
            } else {
                PlanStrategy::Sequential
            },
            verify_passes: read_bool("TENSORPLAN_VERIFY", defaults.verify_passes),
        }
    }

    pub fn with_strategy(mut self, strategy: PlanStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_alignment(mut self, alignment: usize) -> Self {
        if alignment.is_power_of_two() {
            self.alignment = alignment;
        }
        self
    }
}

fn read_bool(key: &str, default_value: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(default_value)
}

fn read_alignment(key: &str, default_value: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .filter(|value| value.is_power_of_two())
        .unwrap_or(default_value)
}

#[cfg(test)]
mod tests {
    use crate::ir::{CompilerFlags, DataType, PlanStrategy};

    #[test]
    fn flags_are_readable_from_environment_defaults() {
        let flags = CompilerFlags::from_env();
        assert!(flags.alignment.is_power_of_two());
        if cfg!(debug_assertions) && std::env::var("TENSORPLAN_VERIFY").is_err() {
            assert!(flags.verify_passes);
        }
    }

    #[test]
    fn builder_rejects_non_power_of_two_alignment() {
        let flags = CompilerFlags::default()
            .with_alignment(12)
            .with_strategy(PlanStrategy::LivenessReuse);
        assert_eq!(flags.alignment, DataType::MAX_WIDTH);
        assert_eq!(flags.strategy, PlanStrategy::LivenessReuse);
        assert_eq!(CompilerFlags::default().with_alignment(64).alignment, 64);
    }
}
