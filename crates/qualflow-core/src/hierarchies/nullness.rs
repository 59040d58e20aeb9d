//! `@Nullable` / `@NonNull`

use super::{known_receiver, TypeSystem};
use crate::dataflow::{BranchStores, RefinementHandler, Store};
use crate::error::ConfigError;
use crate::factory::TypeUseLocation;
use crate::hir::{BinOp, Expr, ExprKind, Literal};
use crate::qualifier::{GraphQualifierHierarchy, Qualifier, QualifierHierarchy};
use std::sync::Arc;

pub const NULLABLE: &str = "Nullable";
pub const NON_NULL: &str = "NonNull";

#[derive(Debug, Clone)]
pub struct NullnessTypeSystem {
    hierarchy: Arc<GraphQualifierHierarchy>,
}

impl NullnessTypeSystem {
    pub fn new() -> Result<Self, ConfigError> {
        let hierarchy = GraphQualifierHierarchy::builder("nullness")
            .qualifier(NULLABLE, &[])
            .qualifier(NON_NULL, &[NULLABLE])
            .build()?;
        Ok(Self {
            hierarchy: Arc::new(hierarchy),
        })
    }
}

impl TypeSystem for NullnessTypeSystem {
    fn name(&self) -> &str {
        "nullness"
    }

    fn hierarchy(&self) -> Arc<dyn QualifierHierarchy> {
        self.hierarchy.clone()
    }

    fn defaults(&self) -> Vec<(TypeUseLocation, Qualifier)> {
        vec![
            (TypeUseLocation::Field, Qualifier::new(NON_NULL)),
            (TypeUseLocation::Parameter, Qualifier::new(NON_NULL)),
            (TypeUseLocation::Return, Qualifier::new(NON_NULL)),
            (TypeUseLocation::Receiver, Qualifier::new(NON_NULL)),
            (TypeUseLocation::LocalVariable, Qualifier::new(NULLABLE)),
        ]
    }

    fn literal_qualifier(&self, literal: &Literal) -> Option<Qualifier> {
        Some(match literal {
            Literal::Null => Qualifier::new(NULLABLE),
            _ => Qualifier::new(NON_NULL),
        })
    }

    fn new_object_qualifier(&self) -> Option<Qualifier> {
        Some(Qualifier::new(NON_NULL))
    }

    fn primitive_qualifier(&self) -> Option<Qualifier> {
        Some(Qualifier::new(NON_NULL))
    }

    fn refinement(&self, _slot: usize) -> Option<Box<dyn RefinementHandler + Send + Sync>> {
        Some(Box::new(NullnessRefinement))
    }
}

/// `x != null` and successful dereferences prove `x` non-null
struct NullnessRefinement;

fn is_null(expr: &Expr) -> bool {
    matches!(expr.kind, ExprKind::Literal(Literal::Null))
}

impl RefinementHandler for NullnessRefinement {
    fn name(&self) -> &str {
        "nullness"
    }

    fn refine_comparison(&self, op: BinOp, left: &Expr, right: &Expr, branches: &mut BranchStores) {
        let operand = match (is_null(left), is_null(right)) {
            (false, true) => left,
            (true, false) => right,
            _ => return,
        };
        let Some(receiver) = known_receiver(operand) else {
            return;
        };
        match op {
            BinOp::NotEq => branches.then_store.insert_qualifier(&receiver, Qualifier::new(NON_NULL)),
            BinOp::Eq => branches.else_store.insert_qualifier(&receiver, Qualifier::new(NON_NULL)),
            _ => {}
        }
    }

    fn after_dereference(&self, base: &Expr, store: &mut Store) {
        if matches!(base.kind, ExprKind::This | ExprKind::ClassName(_)) {
            return;
        }
        if let Some(receiver) = known_receiver(base) {
            store.insert_qualifier(&receiver, Qualifier::new(NON_NULL));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::Receiver;
    use crate::qualifier::QualifierHierarchies;

    fn store() -> Store {
        let ts = NullnessTypeSystem::new().unwrap();
        Store::new(Arc::new(QualifierHierarchies::new(vec![ts.hierarchy()]).unwrap()), true)
    }

    #[test]
    fn test_not_null_check_refines_then_branch() {
        let handler = NullnessRefinement;
        let mut branches = BranchStores::new(store());
        handler.refine_comparison(BinOp::NotEq, &Expr::local("x"), &Expr::null(), &mut branches);
        assert_eq!(
            branches.then_store.get_qualifier(&Receiver::local("x"), 0),
            Some(&Qualifier::new(NON_NULL))
        );
        assert!(branches.else_store.is_empty());
    }

    #[test]
    fn test_null_on_left_of_equality_refines_else_branch() {
        let handler = NullnessRefinement;
        let mut branches = BranchStores::new(store());
        handler.refine_comparison(BinOp::Eq, &Expr::null(), &Expr::local("x"), &mut branches);
        assert!(branches.then_store.is_empty());
        assert!(branches.else_store.get_value(&Receiver::local("x")).is_some());
    }

    #[test]
    fn test_dereference_of_this_is_not_recorded() {
        let handler = NullnessRefinement;
        let mut s = store();
        handler.after_dereference(&Expr::this(), &mut s);
        handler.after_dereference(&Expr::local("y"), &mut s);
        assert_eq!(s.len(), 1);
    }
}
