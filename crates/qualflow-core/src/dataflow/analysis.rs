//! Forward dataflow analysis with a worklist-based fixpoint solver
//!
//! Every CFG edge carries its own store. A block's input is the LUB of the stores on its
//! incoming edges; its transfer output is pushed onto its outgoing edges, and successors
//! are re-enqueued whenever an edge store changes. Two bailouts bound the iteration:
//! - after `max_count_before_widening` visits a block merges with the widened upper bound
//! - after `max_block_visits` visits a block's input is forced to the empty store

use super::cfg::{BasicBlock, BlockId, Cfg, Node, Terminator};
use super::store::Store;
use super::transfer::{Outcome, TransferFunction, TransferResult};
use crate::config::AnalysisOptions;
use crate::error::InternalError;
use crate::hir::{Expr, ExprId};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet, VecDeque};

/// Stores computed by one run of the analysis over one method body
#[derive(Debug, Clone, Default)]
pub struct AnalysisResult {
    /// Store immediately before each node, keyed by node id
    node_stores: HashMap<ExprId, Store>,
    /// Every expression evaluated by a node maps to that node
    owner: HashMap<ExprId, ExprId>,
    block_inputs: HashMap<BlockId, Store>,
    regular_exit: Option<Store>,
    exceptional_exit: Option<Store>,
    return_stores: IndexMap<BlockId, (Option<ExprId>, Store)>,
    iterations: usize,
    widened_blocks: HashSet<BlockId>,
    forced_blocks: HashSet<BlockId>,
}

impl AnalysisResult {
    /// Store in effect just before `expr` is evaluated
    pub fn store_before(&self, expr: ExprId) -> Option<&Store> {
        let node = self.owner.get(&expr).copied().unwrap_or(expr);
        self.node_stores.get(&node)
    }

    pub fn block_input(&self, block: BlockId) -> Option<&Store> {
        self.block_inputs.get(&block)
    }

    pub fn regular_exit_store(&self) -> Option<&Store> {
        self.regular_exit.as_ref()
    }

    pub fn exceptional_exit_store(&self) -> Option<&Store> {
        self.exceptional_exit.as_ref()
    }

    /// Store at each reachable `return`, with the returned expression
    pub fn return_stores(&self) -> impl Iterator<Item = (Option<ExprId>, &Store)> {
        self.return_stores.values().map(|(id, store)| (*id, store))
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn widened(&self) -> bool {
        !self.widened_blocks.is_empty()
    }

    pub fn bailed_out(&self) -> bool {
        !self.forced_blocks.is_empty()
    }

    fn record(&mut self, node_id: ExprId, exprs: &[&Expr], store: &Store) {
        self.node_stores.insert(node_id, store.clone());
        for expr in exprs {
            expr.walk(&mut |e| {
                self.owner.insert(e.id, node_id);
            });
        }
    }
}

/// Forward worklist solver driving a transfer function over a CFG
pub struct ForwardAnalysis<'a, T: TransferFunction + ?Sized> {
    transfer: &'a T,
    options: &'a AnalysisOptions,
}

impl<'a, T: TransferFunction + ?Sized> ForwardAnalysis<'a, T> {
    pub fn new(transfer: &'a T, options: &'a AnalysisOptions) -> Self {
        Self { transfer, options }
    }

    pub fn run(&self, cfg: &Cfg) -> Result<AnalysisResult, InternalError> {
        let mut result = AnalysisResult::default();
        let mut edge_stores: HashMap<(BlockId, BlockId), Store> = HashMap::new();
        let mut visits: HashMap<BlockId, usize> = HashMap::new();

        let mut worklist: VecDeque<BlockId> = VecDeque::from([cfg.entry]);
        let mut in_worklist: HashSet<BlockId> = HashSet::from([cfg.entry]);

        // Safety net on top of the per-block bailouts
        let max_iterations = self
            .options
            .max_block_visits
            .saturating_add(1)
            .saturating_mul(cfg.blocks.len().max(1));

        while let Some(block_id) = worklist.pop_front() {
            in_worklist.remove(&block_id);
            result.iterations += 1;
            if result.iterations > max_iterations {
                tracing::warn!(iterations = result.iterations, "dataflow iteration cap reached");
                break;
            }

            let block = cfg.block(block_id)?;
            let count = {
                let c = visits.entry(block_id).or_insert(0);
                *c += 1;
                *c
            };

            let mut input = if block_id == cfg.entry {
                self.transfer.initial_store()
            } else {
                let incoming: Vec<&Store> = block
                    .predecessors
                    .iter()
                    .filter_map(|p| edge_stores.get(&(*p, block_id)))
                    .collect();
                let Some((first, rest)) = incoming.split_first() else {
                    continue;
                };
                let merged = rest.iter().fold((*first).clone(), |acc, s| acc.least_upper_bound(s));
                match result.block_inputs.get(&block_id) {
                    Some(_) if count > self.options.max_block_visits => {
                        if result.forced_blocks.insert(block_id) {
                            tracing::debug!(block = block_id.0, "block visit limit reached, forcing empty store");
                        }
                        merged.empty_like()
                    }
                    Some(previous) if count > self.options.max_count_before_widening => {
                        if result.widened_blocks.insert(block_id) {
                            tracing::debug!(block = block_id.0, visits = count, "widening block input");
                        }
                        previous.widened_upper_bound(&merged)
                    }
                    _ => merged,
                }
            };
            if input.truncate_to(self.options.max_store_size) {
                tracing::debug!(block = block_id.0, max = self.options.max_store_size, "store truncated");
            }

            if count > 1 && result.block_inputs.get(&block_id) == Some(&input) {
                continue;
            }
            result.block_inputs.insert(block_id, input.clone());

            if block_id == cfg.regular_exit {
                result.regular_exit = Some(input);
                continue;
            }
            if block_id == cfg.exceptional_exit {
                result.exceptional_exit = Some(input);
                continue;
            }

            let outgoing = self.transfer_block(cfg, block_id, input, &mut result)?;
            for (successor, store) in outgoing {
                let key = (block_id, successor);
                if edge_stores.get(&key) != Some(&store) {
                    edge_stores.insert(key, store);
                    if in_worklist.insert(successor) {
                        worklist.push_back(successor);
                    }
                }
            }
        }

        tracing::debug!(
            iterations = result.iterations,
            blocks = cfg.blocks.len(),
            widened = result.widened_blocks.len(),
            forced = result.forced_blocks.len(),
            "dataflow fixpoint reached"
        );
        Ok(result)
    }

    /// Run the block's nodes and terminator, returning the store for each successor
    fn transfer_block(
        &self,
        cfg: &Cfg,
        block_id: BlockId,
        input: Store,
        result: &mut AnalysisResult,
    ) -> Result<IndexMap<BlockId, Store>, InternalError> {
        let block = cfg.block(block_id)?;
        let mut outgoing: IndexMap<BlockId, Store> = IndexMap::new();
        let mut store = input;

        for (index, node) in block.nodes.iter().enumerate() {
            result.record(node.id(), &node.expressions(), &store);
            let transferred = self.transfer.visit_node(node, store);
            self.route_exceptional(block, index, &transferred, &mut outgoing);
            store = match transferred.outcome {
                Outcome::Regular(s) => s,
                Outcome::Conditional { .. } => {
                    return Err(InternalError::UnexpectedNode {
                        kind: node_kind(node).to_string(),
                        context: "a straight-line position yielding a conditional store".to_string(),
                    })
                }
            };
        }

        let condition_index = block.nodes.len();
        match &block.terminator {
            Terminator::Goto(target) => merge_into(&mut outgoing, *target, store),
            Terminator::Branch {
                condition,
                then_block,
                else_block,
            } => {
                result.record(condition.id, &[condition], &store);
                let transferred = self.transfer.visit_condition(condition, store);
                self.route_exceptional(block, condition_index, &transferred, &mut outgoing);
                let (then_store, else_store) = match transferred.outcome {
                    Outcome::Conditional { then_store, else_store } => (then_store, else_store),
                    Outcome::Regular(s) => (s.clone(), s),
                };
                merge_into(&mut outgoing, *then_block, then_store);
                merge_into(&mut outgoing, *else_block, else_store);
            }
            Terminator::Return(value) => {
                if let Some(expr) = value {
                    result.record(expr.id, &[expr], &store);
                }
                let out = self.transfer.visit_return(value.as_ref(), store).into_regular_store();
                result
                    .return_stores
                    .insert(block_id, (value.as_ref().map(|e| e.id), out.clone()));
                merge_into(&mut outgoing, cfg.regular_exit, out);
            }
            Terminator::Throw { exception, target } => {
                result.record(exception.id, &[exception], &store);
                let out = self.transfer.visit_throw(exception, store).into_regular_store();
                merge_into(&mut outgoing, *target, out);
            }
            Terminator::Exit => {
                return Err(InternalError::MalformedCfg(format!(
                    "block {} ends in Exit but is not an exit block",
                    block_id.0
                )))
            }
        }
        Ok(outgoing)
    }

    fn route_exceptional(
        &self,
        block: &BasicBlock,
        index: usize,
        transferred: &TransferResult,
        outgoing: &mut IndexMap<BlockId, Store>,
    ) {
        for edge in block.exceptional.iter().filter(|e| e.node_index == index) {
            if let Some(store) = transferred.exceptional.get(&edge.exception) {
                merge_into(outgoing, edge.target, store.clone());
            }
        }
    }
}

fn merge_into(outgoing: &mut IndexMap<BlockId, Store>, target: BlockId, store: Store) {
    let merged = match outgoing.get(&target) {
        Some(existing) => existing.least_upper_bound(&store),
        None => store,
    };
    outgoing.insert(target, merged);
}

fn node_kind(node: &Node) -> &'static str {
    match node {
        Node::VarDecl { .. } => "variable declaration",
        Node::Assign { .. } => "assignment",
        Node::Expr(_) => "expression statement",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::cfg::CfgBuilder;
    use crate::dataflow::receiver::Receiver;
    use crate::dataflow::store::AbstractValue;
    use crate::hir::{MethodDecl, Stmt};
    use crate::qualifier::{AnnotatedType, QualifierHierarchies, QualifierHierarchy, SetQualifierHierarchy};
    use crate::types::{ClassTable, Type};
    use std::sync::Arc;

    /// Each assignment `x = <int literal n>` gives `x` the set {n}; a loop keeps adding members
    struct Counter {
        hierarchies: Arc<QualifierHierarchies>,
    }

    impl Counter {
        fn new() -> Self {
            let h: Arc<dyn QualifierHierarchy> = Arc::new(SetQualifierHierarchy::new("seen", "Unseen", "Seen", "SeenBottom"));
            Self {
                hierarchies: Arc::new(QualifierHierarchies::new(vec![h]).unwrap()),
            }
        }
    }

    impl TransferFunction for Counter {
        fn initial_store(&self) -> Store {
            Store::new(self.hierarchies.clone(), true)
        }

        fn visit_var_decl(&self, _: &str, _: &AnnotatedType, _: Option<&Expr>, input: Store) -> TransferResult {
            TransferResult::regular(input)
        }

        fn visit_assignment(&self, target: &Expr, value: &Expr, input: Store) -> TransferResult {
            let mut store = input;
            let receiver = Receiver::from_expr(target);
            let previous: Vec<String> = store
                .get_qualifier(&receiver, 0)
                .map(|q| q.args.iter().cloned().collect())
                .unwrap_or_default();
            let mut args = previous;
            args.push(Receiver::from_expr(value).to_string());
            let mut value = AbstractValue::empty(&self.hierarchies);
            value.set(0, Some(crate::qualifier::Qualifier::with_args("Seen", args)));
            store.replace_value(&receiver, value);
            TransferResult::regular(store)
        }

        fn visit_expression(&self, _: &Expr, input: Store) -> TransferResult {
            TransferResult::regular(input)
        }

        fn visit_condition(&self, _: &Expr, input: Store) -> TransferResult {
            TransferResult::conditional(input.clone(), input)
        }
    }

    fn run(body: Vec<Stmt>, options: &AnalysisOptions) -> AnalysisResult {
        let classes = ClassTable::with_defaults();
        let method = MethodDecl::new("m", vec![], AnnotatedType::unqualified(Type::Void), body);
        let cfg = CfgBuilder::new(&classes).build_method(&method).unwrap();
        let counter = Counter::new();
        ForwardAnalysis::new(&counter, options).run(&cfg).unwrap()
    }

    #[test]
    fn test_join_keeps_common_members() {
        let result = run(
            vec![
                Stmt::assign(Expr::local("x"), Expr::int(1)),
                Stmt::if_else(
                    Expr::local("c"),
                    vec![Stmt::assign(Expr::local("x"), Expr::int(2))],
                    vec![Stmt::assign(Expr::local("x"), Expr::int(3))],
                ),
            ],
            &AnalysisOptions::default(),
        );
        let exit = result.regular_exit_store().unwrap();
        assert_eq!(
            exit.get_qualifier(&Receiver::local("x"), 0).map(|q| q.args.len()),
            Some(1)
        );
    }

    #[test]
    fn test_growing_loop_terminates() {
        let options = AnalysisOptions {
            max_count_before_widening: 3,
            max_block_visits: 6,
            ..AnalysisOptions::default()
        };
        let result = run(
            vec![
                Stmt::assign(Expr::local("x"), Expr::int(0)),
                Stmt::While {
                    cond: Expr::local("c"),
                    body: vec![Stmt::assign(Expr::local("x"), Expr::local("x"))],
                },
            ],
            &options,
        );
        assert!(result.regular_exit_store().is_some());
        assert!(result.iterations() < 100);
    }

    #[test]
    fn test_store_before_covers_subexpressions() {
        let value = Expr::int(7);
        let value_id = value.id;
        let stmt = Stmt::assign(Expr::local("x"), value);
        let Stmt::Assign { id, .. } = &stmt else {
            unreachable!()
        };
        let node_id = *id;
        let result = run(vec![stmt], &AnalysisOptions::default());
        assert!(result.store_before(node_id).is_some());
        assert_eq!(result.store_before(value_id), result.store_before(node_id));
    }

    #[test]
    fn test_unreachable_code_has_no_store() {
        let dead = Expr::int(1);
        let dead_id = dead.id;
        let result = run(vec![Stmt::Return(None), Stmt::Expr(dead)], &AnalysisOptions::default());
        assert!(result.store_before(dead_id).is_none());
        assert_eq!(result.return_stores().count(), 1);
    }
}
