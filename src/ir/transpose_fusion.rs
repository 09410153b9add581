use crate::ir::{Fuid, Graph, Guid, OpKind, Operator, Pass, TransposeAttrs};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatMulOperand {
    A,
    B,
}

/// What one run of `TransposeFusionPass` changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransposeFusionReport {
    pub removed: Vec<Guid>,
    pub cancelled_pairs: usize,
    pub fused_into_matmul: usize,
}

#[derive(Debug, Default)]
struct RewritePlan {
    removals: Vec<Guid>,
    fusions: Vec<(Guid, MatMulOperand)>,
    cancelled_pairs: usize,
}

/// Peephole pass over a topologically sorted graph. Compares each operator
/// with the one right before it:
///
/// * two transposes that undo each other are both dropped;
/// * a transpose of the last two axes feeding a matmul becomes the matmul's
///   `trans_a`/`trans_b` flag.
///
/// Decisions are collected first and applied afterwards, so no removal is
/// visible while scanning.
#[derive(Debug, Default)]
pub struct TransposeFusionPass {
    report: TransposeFusionReport,
}

impl TransposeFusionPass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self) -> &TransposeFusionReport {
        &self.report
    }
}

impl Pass for TransposeFusionPass {
    fn name(&self) -> &'static str {
        "transpose-fusion"
    }

    fn run(&mut self, graph: &mut Graph) {
        let plan = plan_rewrites(graph);

        for (guid, operand) in &plan.fusions {
            if let Some(op) = graph.operator_mut(*guid)
                && let OpKind::MatMul(attrs) = &mut op.kind
            {
                match operand {
                    MatMulOperand::A => attrs.trans_a = !attrs.trans_a,
                    MatMulOperand::B => attrs.trans_b = !attrs.trans_b,
                }
            }
        }

        let mut removed = Vec::with_capacity(plan.removals.len());
        for guid in plan.removals {
            match graph.remove_operator(guid) {
                Ok(()) => removed.push(guid),
                Err(err) => log::warn!("{}: skipping removal: {err}", self.name()),
            }
        }

        log::debug!(
            "{}: removed {} operators ({} cancelled pairs, {} matmul fusions)",
            self.name(),
            removed.len(),
            plan.cancelled_pairs,
            plan.fusions.len()
        );
        self.report = TransposeFusionReport {
            removed,
            cancelled_pairs: plan.cancelled_pairs,
            fused_into_matmul: plan.fusions.len(),
        };
    }
}

fn plan_rewrites(graph: &Graph) -> RewritePlan {
    let ops = graph.operators();
    let mut plan = RewritePlan::default();

    let mut index = 1;
    while index < ops.len() {
        let (prev, cur) = (&ops[index - 1], &ops[index]);
        match (&prev.kind, &cur.kind) {
            (OpKind::Transpose(first), OpKind::Transpose(second))
                if cancels(graph, prev, cur, first, second) =>
            {
                plan.removals.push(prev.guid);
                plan.removals.push(cur.guid);
                plan.cancelled_pairs += 1;
                index += 2;
                continue;
            }
            (OpKind::Transpose(perm), OpKind::MatMul(_)) if perm.swaps_last_two_axes() => {
                if let Some(operand) = fusable_operand(graph, prev, cur) {
                    plan.removals.push(prev.guid);
                    plan.fusions.push((cur.guid, operand));
                }
            }
            _ => {}
        }
        index += 1;
    }
    plan
}

/// The output of `transpose` feeds only `consumer`.
fn feeds_only(graph: &Graph, transpose: &Operator, consumer: Guid) -> Option<Fuid> {
    let [output] = transpose.outputs.as_slice() else {
        return None;
    };
    let tensor = graph.get_tensor(*output)?;
    (tensor.targets == [consumer]).then_some(*output)
}

fn cancels(
    graph: &Graph,
    prev: &Operator,
    cur: &Operator,
    first: &TransposeAttrs,
    second: &TransposeAttrs,
) -> bool {
    let Some(link) = feeds_only(graph, prev, cur.guid) else {
        return false;
    };
    if cur.inputs != [link] {
        return false;
    }
    let identity = first
        .then(second)
        .is_some_and(|perm| TransposeAttrs::new(perm).is_identity());
    // Dropping a pair whose result nobody reads would drop the graph output.
    let consumed = cur
        .outputs
        .iter()
        .all(|fuid| graph.get_tensor(*fuid).is_some_and(|t| !t.targets.is_empty()));
    identity && consumed
}

fn fusable_operand(
    graph: &Graph,
    transpose: &Operator,
    matmul: &Operator,
) -> Option<MatMulOperand> {
    let link = feeds_only(graph, transpose, matmul.guid)?;
    match matmul.inputs.as_slice() {
        [a, b] if *a == link && *b != link => Some(MatMulOperand::A),
        [a, b] if *b == link && *a != link => Some(MatMulOperand::B),
        _ => None,
    }
}
