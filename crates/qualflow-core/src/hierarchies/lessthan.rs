//! `@LessThan(x, ..)`: values known to be strictly smaller than every listed expression

use super::{known_receiver, recorded_arguments, TypeSystem};
use crate::dataflow::{BranchStores, Receiver, RefinementHandler, Store};
use crate::hir::{BinOp, Expr};
use crate::qualifier::{QualifierHierarchy, SetQualifierHierarchy};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct LessThanTypeSystem {
    hierarchy: Arc<SetQualifierHierarchy>,
}

impl LessThanTypeSystem {
    pub fn new() -> Self {
        Self {
            hierarchy: Arc::new(SetQualifierHierarchy::new(
                "lessthan",
                "LessThanUnknown",
                "LessThan",
                "LessThanBottom",
            )),
        }
    }
}

impl Default for LessThanTypeSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeSystem for LessThanTypeSystem {
    fn name(&self) -> &str {
        "lessthan"
    }

    fn hierarchy(&self) -> Arc<dyn QualifierHierarchy> {
        self.hierarchy.clone()
    }

    fn refinement(&self, slot: usize) -> Option<Box<dyn RefinementHandler + Send + Sync>> {
        Some(Box::new(LessThanRefinement {
            hierarchy: self.hierarchy.clone(),
            slot,
        }))
    }
}

struct LessThanRefinement {
    hierarchy: Arc<SetQualifierHierarchy>,
    slot: usize,
}

impl LessThanRefinement {
    /// Record `smaller < larger`; whatever `larger` is below, `smaller` is below too
    fn record(&self, store: &mut Store, smaller: &Expr, larger: &Expr) {
        let (Some(small), Some(large)) = (known_receiver(smaller), known_receiver(larger)) else {
            return;
        };
        if small == large {
            return;
        }
        let mut bounds = recorded_arguments(store, &large, self.slot);
        bounds.insert(large.to_string());
        bounds.remove(&small.to_string());
        store.insert_qualifier(&small, self.hierarchy.qualifier(bounds));
    }
}

impl RefinementHandler for LessThanRefinement {
    fn name(&self) -> &str {
        "lessthan"
    }

    fn refine_comparison(&self, op: BinOp, left: &Expr, right: &Expr, branches: &mut BranchStores) {
        match op {
            BinOp::Lt => self.record(&mut branches.then_store, left, right),
            BinOp::Gt => self.record(&mut branches.then_store, right, left),
            // !(left >= right) is left < right
            BinOp::GtE => self.record(&mut branches.else_store, left, right),
            BinOp::LtE => self.record(&mut branches.else_store, right, left),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qualifier::{Qualifier, QualifierHierarchies};

    fn setup() -> (LessThanRefinement, BranchStores) {
        let ts = LessThanTypeSystem::new();
        let store = Store::new(Arc::new(QualifierHierarchies::new(vec![ts.hierarchy()]).unwrap()), true);
        let handler = LessThanRefinement {
            hierarchy: ts.hierarchy.clone(),
            slot: 0,
        };
        (handler, BranchStores::new(store))
    }

    fn less_than(args: &[&str]) -> Qualifier {
        Qualifier::with_args("LessThan", args.iter().copied())
    }

    #[test]
    fn test_greater_than_refines_right_in_then_branch() {
        let (handler, mut branches) = setup();
        handler.refine_comparison(BinOp::Gt, &Expr::local("left"), &Expr::local("right"), &mut branches);
        assert_eq!(
            branches.then_store.get_qualifier(&Receiver::local("right"), 0),
            Some(&less_than(&["left"]))
        );
        assert!(branches.then_store.get_value(&Receiver::local("left")).is_none());
        assert!(branches.else_store.is_empty());
    }

    #[test]
    fn test_greater_or_equal_refines_else_branch() {
        let (handler, mut branches) = setup();
        handler.refine_comparison(BinOp::GtE, &Expr::local("i"), &Expr::local("n"), &mut branches);
        assert!(branches.then_store.is_empty());
        assert_eq!(
            branches.else_store.get_qualifier(&Receiver::local("i"), 0),
            Some(&less_than(&["n"]))
        );
    }

    #[test]
    fn test_bounds_are_transitive() {
        let (handler, mut branches) = setup();
        branches
            .then_store
            .insert_qualifier(&Receiver::local("y"), less_than(&["z"]));
        handler.refine_comparison(BinOp::Lt, &Expr::local("x"), &Expr::local("y"), &mut branches);
        assert_eq!(
            branches.then_store.get_qualifier(&Receiver::local("x"), 0),
            Some(&less_than(&["y", "z"]))
        );
    }
}
