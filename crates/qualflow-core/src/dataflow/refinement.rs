//! Pluggable flow refinement rules
//!
//! Each type system contributes a handler that knows how a comparison, an assignment or a
//! call refines the qualifiers of its hierarchy. The transfer function asks every
//! registered handler in turn; a handler that has nothing to say leaves the stores alone.

use super::receiver::Receiver;
use super::store::Store;
use crate::hir::{BinOp, Expr};

/// Outgoing stores of a boolean test
#[derive(Debug, Clone)]
pub struct BranchStores {
    pub then_store: Store,
    pub else_store: Store,
}

impl BranchStores {
    pub fn new(store: Store) -> Self {
        Self {
            then_store: store.clone(),
            else_store: store,
        }
    }
}

/// Trait for refinement handlers; every hook defaults to doing nothing
pub trait RefinementHandler {
    /// The type system this handler refines for
    fn name(&self) -> &str;

    /// `left op right` used as a branch condition
    fn refine_comparison(&self, _op: BinOp, _left: &Expr, _right: &Expr, _branches: &mut BranchStores) {}

    /// A method call used as a branch condition, e.g. `m.containsKey(k)`
    fn refine_call_condition(&self, _call: &Expr, _branches: &mut BranchStores) {}

    /// Runs after `target = value` has been applied to the store
    fn after_assignment(&self, _target: &Receiver, _value: &Expr, _store: &mut Store) {}

    /// Runs after the call returned normally
    fn after_method_call(&self, _call: &Expr, _store: &mut Store) {}

    /// `base` was dereferenced without throwing
    fn after_dereference(&self, _base: &Expr, _store: &mut Store) {}
}

/// Registry of all refinement handlers
#[derive(Default)]
pub struct RefinementRegistry {
    handlers: Vec<Box<dyn RefinementHandler + Send + Sync>>,
}

impl RefinementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Box<dyn RefinementHandler + Send + Sync>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    pub fn refine_comparison(&self, op: BinOp, left: &Expr, right: &Expr, branches: &mut BranchStores) {
        for handler in &self.handlers {
            handler.refine_comparison(op, left, right, branches);
        }
    }

    pub fn refine_call_condition(&self, call: &Expr, branches: &mut BranchStores) {
        for handler in &self.handlers {
            handler.refine_call_condition(call, branches);
        }
    }

    pub fn after_assignment(&self, target: &Receiver, value: &Expr, store: &mut Store) {
        for handler in &self.handlers {
            handler.after_assignment(target, value, store);
        }
    }

    pub fn after_method_call(&self, call: &Expr, store: &mut Store) {
        for handler in &self.handlers {
            handler.after_method_call(call, store);
        }
    }

    pub fn after_dereference(&self, base: &Expr, store: &mut Store) {
        for handler in &self.handlers {
            handler.after_dereference(base, store);
        }
    }
}

impl std::fmt::Debug for RefinementRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefinementRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qualifier::{GraphQualifierHierarchy, Qualifier, QualifierHierarchies, QualifierHierarchy};
    use std::sync::Arc;

    struct MarkThen;

    impl RefinementHandler for MarkThen {
        fn name(&self) -> &str {
            "mark"
        }

        fn refine_comparison(&self, _op: BinOp, left: &Expr, _right: &Expr, branches: &mut BranchStores) {
            branches
                .then_store
                .insert_qualifier(&Receiver::from_expr(left), Qualifier::new("Marked"));
        }
    }

    #[test]
    fn test_registry_dispatches_to_handlers() {
        let h: Arc<dyn QualifierHierarchy> = Arc::new(
            GraphQualifierHierarchy::builder("mark")
                .qualifier("Unmarked", &[])
                .qualifier("Marked", &["Unmarked"])
                .build()
                .unwrap(),
        );
        let hs = Arc::new(QualifierHierarchies::new(vec![h]).unwrap());
        let mut registry = RefinementRegistry::new();
        registry.register(Box::new(MarkThen));
        assert_eq!(registry.names(), vec!["mark"]);

        let mut branches = BranchStores::new(Store::new(hs, true));
        registry.refine_comparison(BinOp::Eq, &Expr::local("x"), &Expr::int(0), &mut branches);
        assert_eq!(
            branches.then_store.get_qualifier(&Receiver::local("x"), 0),
            Some(&Qualifier::new("Marked"))
        );
        assert!(branches.else_store.is_empty());
    }
}
