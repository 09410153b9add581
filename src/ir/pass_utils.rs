use crate::ir::{Graph, verify_graph};

/// Runs `run` and, in debug builds, checks that a graph which satisfied every
/// invariant before still satisfies them afterwards.
pub fn run_with_verifier_guard(graph: &mut Graph, run: impl FnOnce(&mut Graph)) {
    let valid_before = cfg!(debug_assertions) && verify_graph(graph).is_ok();
    run(graph);
    if valid_before && let Err(err) = verify_graph(graph) {
        panic!("rewrite broke graph invariants: {err}");
    }
}
