//! Benchmarks for the tensorplan pipeline.
//!
//! Run with:
//! ```sh
//! cargo bench
//! ```
//!
//! Each benchmark covers one phase so that regressions can be attributed to a
//! specific component (scheduling, rewriting, or memory planning).

use tensorplan::ir::{
    BinaryOp, CompilerFlags, DataType, Fuid, Graph, Guid, OpKind, PlanStrategy, UnaryOp,
};

// ── Shared graph fixtures ─────────────────────────────────────────────────────

const LAYERS: usize = 64;

fn output_of(graph: &Graph, guid: Guid) -> Fuid {
    graph.operator(guid).expect("operator exists").outputs[0]
}

/// A stack of `x @ W^T + b -> relu` layers, each weight transposed explicitly
/// so the rewrite pass has something to fuse.
fn mlp(flags: CompilerFlags) -> Graph {
    let mut graph = Graph::with_flags(flags);
    let mut x = graph
        .add_tensor(vec![32, 128], DataType::Float32)
        .expect("valid input");
    for _ in 0..LAYERS {
        let w = graph
            .add_tensor(vec![128, 128], DataType::Float32)
            .expect("valid weight");
        let b = graph
            .add_tensor(vec![128], DataType::Float32)
            .expect("valid bias");
        let wt = graph
            .add_op(OpKind::transpose(vec![1, 0]), vec![w])
            .expect("valid transpose");
        let mm = graph
            .add_op(OpKind::matmul(), vec![x, output_of(&graph, wt)])
            .expect("valid matmul");
        let add = graph
            .add_op(OpKind::ElementWise(BinaryOp::Add), vec![output_of(&graph, mm), b])
            .expect("valid add");
        let relu = graph
            .add_op(OpKind::Unary(UnaryOp::Relu), vec![output_of(&graph, add)])
            .expect("valid relu");
        x = output_of(&graph, relu);
    }
    graph
}

/// A unary chain whose operators are inserted consumer-first, so the
/// scheduler has to reverse the whole sequence.
fn reverse_chain(len: usize) -> Graph {
    let mut graph = Graph::new();
    let chain = (0..=len)
        .map(|_| {
            graph
                .add_tensor(vec![16], DataType::Float32)
                .expect("valid tensor")
        })
        .collect::<Vec<_>>();
    for step in (0..len).rev() {
        graph
            .add_op_with_outputs(
                OpKind::Unary(UnaryOp::Relu),
                vec![chain[step]],
                vec![chain[step + 1]],
            )
            .expect("valid op");
    }
    graph
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn time_bench(label: &str, iters: u32, mut f: impl FnMut()) {
    let start = std::time::Instant::now();
    for _ in 0..iters {
        f();
    }
    println!("{} ×{}: {:?} avg", label, iters, start.elapsed() / iters);
}

// ── Main ──────────────────────────────────────────────────────────────────────

fn main() {
    let flags = CompilerFlags::default();

    time_bench("build (mlp)", 200, || {
        let _ = mlp(flags);
    });

    time_bench("topo_sort (mlp)", 200, || {
        let mut graph = mlp(flags);
        assert!(graph.topo_sort());
    });

    time_bench("topo_sort (reverse chain)", 20, || {
        let mut graph = reverse_chain(10_000);
        assert!(graph.topo_sort());
    });

    time_bench("optimize (mlp)", 200, || {
        let mut graph = mlp(flags);
        graph.optimize().expect("optimize failed");
    });

    time_bench("plan_memory sequential (mlp)", 200, || {
        let mut graph = mlp(flags);
        graph.plan_memory().expect("plan failed");
    });

    let reuse = flags.with_strategy(PlanStrategy::LivenessReuse);
    time_bench("plan_memory liveness (mlp)", 200, || {
        let mut graph = mlp(reuse);
        graph.optimize().expect("optimize failed");
        graph.plan_memory().expect("plan failed");
    });
}
