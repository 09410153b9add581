use crate::ir::Graph;

/// Graph rewrite applied in place.
pub trait Pass {
    fn name(&self) -> &'static str;

    fn run(&mut self, graph: &mut Graph);
}
