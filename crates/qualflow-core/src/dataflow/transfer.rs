//! Transfer functions: how one CFG node changes the store

use super::cfg::Node;
use super::receiver::Receiver;
use super::refinement::{BranchStores, RefinementRegistry};
use super::store::{AbstractValue, Store};
use crate::config::AnalysisOptions;
use crate::hir::{Expr, ExprKind};
use crate::qualifier::AnnotatedType;
use indexmap::IndexMap;

/// Store(s) flowing out of a node on its regular edges
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Regular(Store),
    Conditional { then_store: Store, else_store: Store },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferResult {
    pub outcome: Outcome,
    /// Store on the exceptional edge, keyed by exception class
    pub exceptional: IndexMap<String, Store>,
}

impl TransferResult {
    pub fn regular(store: Store) -> Self {
        Self {
            outcome: Outcome::Regular(store),
            exceptional: IndexMap::new(),
        }
    }

    pub fn conditional(then_store: Store, else_store: Store) -> Self {
        Self {
            outcome: Outcome::Conditional { then_store, else_store },
            exceptional: IndexMap::new(),
        }
    }

    pub fn with_exceptional(mut self, exceptional: IndexMap<String, Store>) -> Self {
        self.exceptional = exceptional;
        self
    }

    /// The single regular store; a conditional pair is merged
    pub fn into_regular_store(self) -> Store {
        match self.outcome {
            Outcome::Regular(store) => store,
            Outcome::Conditional { then_store, else_store } => then_store.least_upper_bound(&else_store),
        }
    }
}

/// Evaluates the annotated type of an expression against a given store
pub trait ExpressionEvaluator {
    fn evaluate(&self, expr: &Expr, store: &Store) -> AnnotatedType;
}

pub trait TransferFunction {
    /// Store on method entry
    fn initial_store(&self) -> Store;

    fn visit_var_decl(&self, name: &str, ty: &AnnotatedType, init: Option<&Expr>, input: Store) -> TransferResult;

    fn visit_assignment(&self, target: &Expr, value: &Expr, input: Store) -> TransferResult;

    fn visit_expression(&self, expr: &Expr, input: Store) -> TransferResult;

    /// Boolean test at the end of a block: yields a then/else pair
    fn visit_condition(&self, condition: &Expr, input: Store) -> TransferResult;

    fn visit_return(&self, value: Option<&Expr>, input: Store) -> TransferResult {
        match value {
            Some(expr) => self.visit_expression(expr, input),
            None => TransferResult::regular(input),
        }
    }

    fn visit_throw(&self, exception: &Expr, input: Store) -> TransferResult {
        self.visit_expression(exception, input)
    }

    fn visit_node(&self, node: &Node, input: Store) -> TransferResult {
        match node {
            Node::VarDecl { name, ty, init, .. } => self.visit_var_decl(name, ty, init.as_ref(), input),
            Node::Assign { target, value, .. } => self.visit_assignment(target, value, input),
            Node::Expr(expr) => self.visit_expression(expr, input),
        }
    }
}

/// Transfer function for qualifier refinement across every registered hierarchy
pub struct QualifierTransfer<'a> {
    evaluator: &'a dyn ExpressionEvaluator,
    refinements: &'a RefinementRegistry,
    options: &'a AnalysisOptions,
    initial: Store,
}

impl<'a> QualifierTransfer<'a> {
    pub fn new(
        evaluator: &'a dyn ExpressionEvaluator,
        refinements: &'a RefinementRegistry,
        options: &'a AnalysisOptions,
        initial: Store,
    ) -> Self {
        Self {
            evaluator,
            refinements,
            options,
            initial,
        }
    }

    /// Apply the side effects of evaluating `expr`, children first
    fn apply_effects(&self, expr: &Expr, store: &mut Store, exceptional: &mut IndexMap<String, Store>) {
        for child in expr.children() {
            self.apply_effects(child, store, exceptional);
        }
        match &expr.kind {
            ExprKind::FieldAccess { base, .. } => self.refinements.after_dereference(base, store),
            ExprKind::ArrayLength(array) | ExprKind::ArrayAccess { array, .. } => {
                self.refinements.after_dereference(array, store)
            }
            ExprKind::MethodCall { receiver, method, .. } => {
                let pure = method.purity.side_effect_free || self.options.assume_side_effect_free;
                store.update_for_method_call(pure);
                for exception in &method.throws {
                    record_exceptional(exceptional, exception, store);
                }
                if let Some(receiver) = receiver {
                    self.refinements.after_dereference(receiver, store);
                }
                self.refinements.after_method_call(expr, store);
            }
            ExprKind::NewObject { ctor: Some(ctor), .. } => {
                let pure = ctor.purity.side_effect_free || self.options.assume_side_effect_free;
                store.update_for_method_call(pure);
                for exception in &ctor.throws {
                    record_exceptional(exceptional, exception, store);
                }
            }
            _ => {}
        }
    }

    fn value_of(&self, expr: &Expr, store: &Store) -> AbstractValue {
        let ty = self.evaluator.evaluate(expr, store);
        AbstractValue::from_qualifiers(store.hierarchies(), ty.qualifiers.iter())
    }
}

fn record_exceptional(exceptional: &mut IndexMap<String, Store>, exception: &str, store: &Store) {
    let merged = match exceptional.get(exception) {
        Some(existing) => existing.least_upper_bound(store),
        None => store.clone(),
    };
    exceptional.insert(exception.to_string(), merged);
}

/// Receiver written by an assignment; unlike a read, an unknown base still names the field
fn assignment_target(target: &Expr) -> Receiver {
    match &target.kind {
        ExprKind::FieldAccess { base, field } if !field.is_static => {
            Receiver::field(Receiver::from_expr(base), field.name.clone())
        }
        ExprKind::ArrayAccess { array, index } => Receiver::ArrayAccess {
            array: Box::new(Receiver::from_expr(array)),
            index: Box::new(Receiver::from_expr(index)),
        },
        _ => Receiver::from_expr(target),
    }
}

impl TransferFunction for QualifierTransfer<'_> {
    fn initial_store(&self) -> Store {
        self.initial.clone()
    }

    fn visit_var_decl(&self, name: &str, _ty: &AnnotatedType, init: Option<&Expr>, input: Store) -> TransferResult {
        let mut store = input;
        let mut exceptional = IndexMap::new();
        let receiver = Receiver::local(name);
        match init {
            Some(value) => {
                self.apply_effects(value, &mut store, &mut exceptional);
                let abstract_value = self.value_of(value, &store);
                store.update_for_assignment(&receiver, Some(abstract_value));
                self.refinements.after_assignment(&receiver, value, &mut store);
            }
            None => store.update_for_assignment(&receiver, None),
        }
        TransferResult::regular(store).with_exceptional(exceptional)
    }

    fn visit_assignment(&self, target: &Expr, value: &Expr, input: Store) -> TransferResult {
        let mut store = input;
        let mut exceptional = IndexMap::new();
        for child in target.children() {
            self.apply_effects(child, &mut store, &mut exceptional);
        }
        self.apply_effects(value, &mut store, &mut exceptional);

        let abstract_value = self.value_of(value, &store);
        let receiver = assignment_target(target);
        store.update_for_assignment(&receiver, Some(abstract_value));
        if let Receiver::Field { base, field } = &receiver {
            if **base == Receiver::This {
                store.mark_field_initialized(field.clone());
            }
        }
        if !receiver.contains_unknown() {
            self.refinements.after_assignment(&receiver, value, &mut store);
        }
        TransferResult::regular(store).with_exceptional(exceptional)
    }

    fn visit_expression(&self, expr: &Expr, input: Store) -> TransferResult {
        let mut store = input;
        let mut exceptional = IndexMap::new();
        self.apply_effects(expr, &mut store, &mut exceptional);
        TransferResult::regular(store).with_exceptional(exceptional)
    }

    fn visit_condition(&self, condition: &Expr, input: Store) -> TransferResult {
        let mut store = input;
        let mut exceptional = IndexMap::new();
        self.apply_effects(condition, &mut store, &mut exceptional);

        let mut branches = BranchStores::new(store);
        match &condition.kind {
            ExprKind::Binary { op, left, right } if op.is_comparison() => {
                self.refinements.refine_comparison(*op, left, right, &mut branches)
            }
            ExprKind::MethodCall { .. } => self.refinements.refine_call_condition(condition, &mut branches),
            _ => {}
        }
        TransferResult::conditional(branches.then_store, branches.else_store).with_exceptional(exceptional)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{FieldSym, MethodSig, Purity};
    use crate::qualifier::{GraphQualifierHierarchy, Qualifier, QualifierHierarchies, QualifierHierarchy};
    use crate::types::Type;
    use std::sync::Arc;

    /// Literals are NonNull, `null` is Nullable, everything else reads the store
    struct LiteralEvaluator;

    impl ExpressionEvaluator for LiteralEvaluator {
        fn evaluate(&self, expr: &Expr, store: &Store) -> AnnotatedType {
            let q = match &expr.kind {
                ExprKind::Literal(crate::hir::Literal::Null) => Qualifier::new("Nullable"),
                ExprKind::Literal(_) => Qualifier::new("NonNull"),
                _ => store
                    .get_qualifier(&Receiver::from_expr(expr), 0)
                    .cloned()
                    .unwrap_or_else(|| Qualifier::new("Nullable")),
            };
            AnnotatedType::unqualified(Type::object()).with(q)
        }
    }

    fn store() -> Store {
        let h: Arc<dyn QualifierHierarchy> = Arc::new(
            GraphQualifierHierarchy::builder("nullness")
                .qualifier("Nullable", &[])
                .qualifier("NonNull", &["Nullable"])
                .build()
                .unwrap(),
        );
        Store::new(Arc::new(QualifierHierarchies::new(vec![h]).unwrap()), true)
    }

    fn field_f() -> Arc<FieldSym> {
        Arc::new(FieldSym::new("C", "f", AnnotatedType::unqualified(Type::string())))
    }

    #[test]
    fn test_assignment_to_this_field_records_initialization() {
        let registry = RefinementRegistry::new();
        let options = AnalysisOptions::default();
        let transfer = QualifierTransfer::new(&LiteralEvaluator, &registry, &options, store());
        let target = Expr::field(Expr::this(), field_f());
        let out = transfer
            .visit_assignment(&target, &Expr::string("v"), transfer.initial_store())
            .into_regular_store();
        assert!(out.is_field_initialized("f"));
        assert_eq!(
            out.get_qualifier(&Receiver::this_field("f"), 0),
            Some(&Qualifier::new("NonNull"))
        );
    }

    #[test]
    fn test_impure_call_in_expression_kills_fields() {
        let registry = RefinementRegistry::new();
        let options = AnalysisOptions::default();
        let mut initial = store();
        initial.insert_qualifier(&Receiver::this_field("f"), Qualifier::new("NonNull"));
        let transfer = QualifierTransfer::new(&LiteralEvaluator, &registry, &options, initial);
        let sig = Arc::new(MethodSig::new("C", "reset", vec![], AnnotatedType::unqualified(Type::Void)));
        let out = transfer
            .visit_expression(&Expr::call(None, sig, vec![]), transfer.initial_store())
            .into_regular_store();
        assert!(out.is_empty());
    }

    #[test]
    fn test_pure_call_keeps_fields_and_assume_flag_does_too() {
        let registry = RefinementRegistry::new();
        let mut initial = store();
        initial.insert_qualifier(&Receiver::this_field("f"), Qualifier::new("NonNull"));
        let pure = Arc::new(
            MethodSig::new("C", "peek", vec![], AnnotatedType::unqualified(Type::int())).with_purity(Purity::PURE),
        );
        let impure = Arc::new(MethodSig::new("C", "poke", vec![], AnnotatedType::unqualified(Type::Void)));

        let options = AnalysisOptions::default();
        let transfer = QualifierTransfer::new(&LiteralEvaluator, &registry, &options, initial.clone());
        let out = transfer
            .visit_expression(&Expr::call(None, pure, vec![]), transfer.initial_store())
            .into_regular_store();
        assert_eq!(out.len(), 1);

        let options = AnalysisOptions {
            assume_side_effect_free: true,
            ..AnalysisOptions::default()
        };
        let transfer = QualifierTransfer::new(&LiteralEvaluator, &registry, &options, initial);
        let out = transfer
            .visit_expression(&Expr::call(None, impure, vec![]), transfer.initial_store())
            .into_regular_store();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_declared_throws_produce_exceptional_store() {
        let registry = RefinementRegistry::new();
        let options = AnalysisOptions::default();
        let transfer = QualifierTransfer::new(&LiteralEvaluator, &registry, &options, store());
        let sig = Arc::new(
            MethodSig::new("Files", "read", vec![], AnnotatedType::unqualified(Type::string()))
                .into_static()
                .with_throws("IOException"),
        );
        let result = transfer.visit_expression(&Expr::call(None, sig, vec![]), transfer.initial_store());
        assert!(result.exceptional.contains_key("IOException"));
    }

    #[test]
    fn test_var_decl_without_initializer_forgets_old_value() {
        let registry = RefinementRegistry::new();
        let options = AnalysisOptions::default();
        let mut initial = store();
        initial.insert_qualifier(&Receiver::local("e"), Qualifier::new("NonNull"));
        let transfer = QualifierTransfer::new(&LiteralEvaluator, &registry, &options, initial);
        let ty = AnnotatedType::unqualified(Type::class("Exception"));
        let out = transfer
            .visit_var_decl("e", &ty, None, transfer.initial_store())
            .into_regular_store();
        assert!(out.is_empty());
    }
}
