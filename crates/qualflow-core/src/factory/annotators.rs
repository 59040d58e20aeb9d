//! Annotator chains
//!
//! Each annotator fills in qualifiers for hierarchies the type has none in yet, so the
//! first annotator in the chain to speak for a hierarchy wins.

use crate::hierarchies::TypeSystem;
use crate::hir::{BinOp, Expr, ExprKind};
use crate::qualifier::{AnnotatedType, QualifierHierarchy};
use crate::types::Type;
use std::sync::Arc;

/// Qualifiers implied by the syntactic form of an expression
pub trait TreeAnnotator {
    fn annotate(&self, expr: &Expr, ty: &mut AnnotatedType);
}

/// Qualifiers implied by the underlying type alone
pub trait TypeAnnotator {
    fn annotate(&self, ty: &mut AnnotatedType);
}

/// Literals, allocations and string concatenation
pub struct ImplicitsTreeAnnotator {
    system: Arc<dyn TypeSystem>,
    hierarchy: Arc<dyn QualifierHierarchy>,
}

impl ImplicitsTreeAnnotator {
    pub fn new(system: Arc<dyn TypeSystem>) -> Self {
        let hierarchy = system.hierarchy();
        Self { system, hierarchy }
    }
}

impl TreeAnnotator for ImplicitsTreeAnnotator {
    fn annotate(&self, expr: &Expr, ty: &mut AnnotatedType) {
        if ty.qualifier_in(self.hierarchy.as_ref()).is_some() {
            return;
        }
        let implied = match &expr.kind {
            ExprKind::Literal(literal) => self.system.literal_qualifier(literal),
            ExprKind::NewObject { .. } | ExprKind::NewArray { .. } | ExprKind::Lambda { .. } => {
                self.system.new_object_qualifier()
            }
            ExprKind::Binary { op: BinOp::Add, .. } if ty.ty == Type::string() => self.system.new_object_qualifier(),
            _ => None,
        };
        if let Some(qualifier) = implied {
            ty.qualifiers.push(qualifier);
        }
    }
}

pub struct PrimitiveTypeAnnotator {
    system: Arc<dyn TypeSystem>,
    hierarchy: Arc<dyn QualifierHierarchy>,
}

impl PrimitiveTypeAnnotator {
    pub fn new(system: Arc<dyn TypeSystem>) -> Self {
        let hierarchy = system.hierarchy();
        Self { system, hierarchy }
    }
}

impl TypeAnnotator for PrimitiveTypeAnnotator {
    fn annotate(&self, ty: &mut AnnotatedType) {
        if !ty.ty.is_primitive() || ty.qualifier_in(self.hierarchy.as_ref()).is_some() {
            return;
        }
        if let Some(qualifier) = self.system.primitive_qualifier() {
            ty.qualifiers.push(qualifier);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchies::{NullnessTypeSystem, SameLenTypeSystem};
    use crate::hir::Literal;
    use crate::qualifier::Qualifier;

    fn nullness() -> Arc<dyn TypeSystem> {
        Arc::new(NullnessTypeSystem::new().unwrap())
    }

    #[test]
    fn test_null_literal_is_nullable() {
        let annotator = ImplicitsTreeAnnotator::new(nullness());
        let mut ty = AnnotatedType::unqualified(Type::Null);
        annotator.annotate(&Expr::null(), &mut ty);
        assert_eq!(ty.qualifiers.as_slice(), &[Qualifier::new("Nullable")]);
    }

    #[test]
    fn test_string_concatenation_is_a_new_object() {
        let annotator = ImplicitsTreeAnnotator::new(nullness());
        let concat = Expr::binary(BinOp::Add, Expr::string("a"), Expr::local("s"));
        let mut ty = AnnotatedType::unqualified(Type::string());
        annotator.annotate(&concat, &mut ty);
        assert!(ty.has_qualifier(&Qualifier::new("NonNull")));
    }

    #[test]
    fn test_existing_qualifier_wins() {
        let annotator = ImplicitsTreeAnnotator::new(nullness());
        let mut ty = AnnotatedType::unqualified(Type::string()).with(Qualifier::new("Nullable"));
        annotator.annotate(&Expr::string("x"), &mut ty);
        assert_eq!(ty.qualifiers.as_slice(), &[Qualifier::new("Nullable")]);
    }

    #[test]
    fn test_primitives_only() {
        let annotator = PrimitiveTypeAnnotator::new(nullness());
        let mut int = AnnotatedType::unqualified(Type::int());
        annotator.annotate(&mut int);
        assert!(int.has_qualifier(&Qualifier::new("NonNull")));

        let mut string = AnnotatedType::unqualified(Type::string());
        annotator.annotate(&mut string);
        assert!(string.qualifiers.is_empty());
    }

    #[test]
    fn test_system_without_literal_rule_adds_nothing() {
        let annotator = ImplicitsTreeAnnotator::new(Arc::new(SameLenTypeSystem::new()));
        let mut ty = AnnotatedType::unqualified(Type::int());
        annotator.annotate(&Expr::literal(Literal::Int(3)), &mut ty);
        assert!(ty.qualifiers.is_empty());
    }
}
