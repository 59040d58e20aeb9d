//! Constraint formulas and their reduction to bounds

use super::bounds::BoundKind;
use super::InferenceRun;
use crate::error::InferenceError;
use crate::hir::Expr;
use crate::types::{ClassTable, Type, WildcardBound};
use std::fmt;

/// A typing relationship between two types, at least one of which may mention a variable
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// `‹S → T›`: `S` is compatible with `T` in a loose invocation context
    Compatible(Type, Type),
    /// `‹S <: T›`
    Subtype(Type, Type),
    /// `‹S <= T›`: type argument `S` is contained by `T`
    Contained(Type, Type),
    /// `‹S = T›`
    Equal(Type, Type),
    /// `‹lambda → T›`, reduced once the lambda's parameter types are known
    Lambda { params: Vec<String>, body: Expr, target: Type },
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Compatible(s, t) => write!(f, "{} → {}", s, t),
            Constraint::Subtype(s, t) => write!(f, "{} <: {}", s, t),
            Constraint::Contained(s, t) => write!(f, "{} <= {}", s, t),
            Constraint::Equal(s, t) => write!(f, "{} = {}", s, t),
            Constraint::Lambda { params, target, .. } => write!(f, "({}) -> .. → {}", params.join(", "), target),
        }
    }
}

impl InferenceRun<'_> {
    pub(super) fn reduce(&mut self, constraint: Constraint) -> Result<(), InferenceError> {
        match constraint {
            Constraint::Compatible(s, t) => self.reduce_compatible(self.bounds.apply(&s), self.bounds.apply(&t)),
            Constraint::Subtype(s, t) => self.reduce_subtype(self.bounds.apply(&s), self.bounds.apply(&t)),
            Constraint::Contained(s, t) => self.reduce_contained(self.bounds.apply(&s), self.bounds.apply(&t)),
            Constraint::Equal(s, t) => self.reduce_equal(self.bounds.apply(&s), self.bounds.apply(&t)),
            lambda @ Constraint::Lambda { .. } => {
                self.deferred.push(lambda);
                Ok(())
            }
        }
    }

    fn check(&self, holds: bool, constraint: Constraint) -> Result<(), InferenceError> {
        if holds {
            Ok(())
        } else {
            Err(self.false_bound(&constraint))
        }
    }

    fn reduce_compatible(&mut self, s: Type, t: Type) -> Result<(), InferenceError> {
        if s.is_proper() && t.is_proper() {
            let holds = self.loosely_compatible(&s, &t);
            return self.check(holds, Constraint::Compatible(s, t));
        }
        if let Type::Primitive(kind) = &s {
            if let Type::Infer(var) = &t {
                if let Some(flags) = self.bounds.flags_mut(*var) {
                    flags.boxed_primitive = true;
                }
            }
            self.push(Constraint::Compatible(ClassTable::box_type(*kind), t));
            return Ok(());
        }
        if let Type::Primitive(kind) = &t {
            self.push(Constraint::Equal(s, ClassTable::box_type(*kind)));
            return Ok(());
        }
        // Unchecked conversion: a raw argument where a parameterization is expected
        if let Type::Declared { name, args } = &t {
            if !args.is_empty() && s.is_proper() {
                if let Some(view) = self.classes.as_super(&s, name) {
                    if self.classes.is_raw(&view) {
                        tracing::debug!(call = %self.call, argument = %s, "unchecked conversion");
                        self.unchecked = true;
                        return Ok(());
                    }
                }
            }
        }
        self.push(Constraint::Subtype(s, t));
        Ok(())
    }

    fn loosely_compatible(&self, s: &Type, t: &Type) -> bool {
        if self.classes.is_subtype(s, t) {
            return true;
        }
        match (s, t) {
            (Type::Primitive(kind), _) => self.classes.is_subtype(&ClassTable::box_type(*kind), t),
            (_, Type::Primitive(target)) => ClassTable::unbox(s).is_some_and(|kind| kind.widens_to(*target)),
            (Type::Declared { name, .. }, Type::Declared { name: target, args }) if !args.is_empty() => self
                .classes
                .as_super(s, target)
                .is_some_and(|view| self.classes.is_raw(&view) || name == target && self.classes.is_raw(s)),
            _ => false,
        }
    }

    fn reduce_subtype(&mut self, s: Type, t: Type) -> Result<(), InferenceError> {
        if s.is_proper() && t.is_proper() {
            let holds = self.classes.is_subtype(&s, &t);
            return self.check(holds, Constraint::Subtype(s, t));
        }
        match (&s, &t) {
            (Type::Null, _) => Ok(()),
            (_, Type::Null) => Err(self.false_bound(&Constraint::Subtype(s, t))),
            (Type::Infer(var), _) => {
                if let Type::Infer(other) = &t {
                    self.add_bound(*other, BoundKind::Lower, s.clone());
                }
                self.add_bound(*var, BoundKind::Upper, t);
                Ok(())
            }
            (_, Type::Infer(var)) => {
                self.note_lower_bound_shape(*var, &s);
                self.add_bound(*var, BoundKind::Lower, s);
                Ok(())
            }
            (_, Type::Declared { name, args }) => match self.classes.as_super(&s, name) {
                Some(Type::Declared { args: view_args, .. }) => {
                    if args.is_empty() {
                        return Ok(());
                    }
                    if view_args.len() != args.len() {
                        return Err(self.false_bound(&Constraint::Subtype(s.clone(), t.clone())));
                    }
                    for (sa, ta) in view_args.into_iter().zip(args.iter().cloned()) {
                        self.push(Constraint::Contained(sa, ta));
                    }
                    Ok(())
                }
                _ => Err(self.false_bound(&Constraint::Subtype(s.clone(), t.clone()))),
            },
            (Type::Array(se), Type::Array(te)) => {
                if se.is_primitive() || te.is_primitive() {
                    let holds = se == te;
                    return self.check(holds, Constraint::Subtype(s.clone(), t.clone()));
                }
                self.push(Constraint::Subtype((**se).clone(), (**te).clone()));
                Ok(())
            }
            (_, Type::Intersection(parts)) => {
                for part in parts {
                    self.push(Constraint::Subtype(s.clone(), part.clone()));
                }
                Ok(())
            }
            (Type::Intersection(parts), _) => match parts.first() {
                Some(first) => {
                    self.push(Constraint::Subtype(first.clone(), t.clone()));
                    Ok(())
                }
                None => Err(self.false_bound(&Constraint::Subtype(s.clone(), t.clone()))),
            },
            _ => Err(self.false_bound(&Constraint::Subtype(s, t))),
        }
    }

    fn reduce_contained(&mut self, s: Type, t: Type) -> Result<(), InferenceError> {
        match &t {
            Type::Wildcard(WildcardBound::Unbounded) => Ok(()),
            Type::Wildcard(WildcardBound::Extends(bound)) => {
                let bound = (**bound).clone();
                let implied = match &s {
                    Type::Wildcard(WildcardBound::Unbounded) => Constraint::Subtype(Type::object(), bound),
                    Type::Wildcard(WildcardBound::Extends(sb)) => Constraint::Subtype((**sb).clone(), bound),
                    Type::Wildcard(WildcardBound::Super(_)) => Constraint::Equal(Type::object(), bound),
                    _ => Constraint::Subtype(s, bound),
                };
                self.push(implied);
                Ok(())
            }
            Type::Wildcard(WildcardBound::Super(bound)) => {
                let bound = (**bound).clone();
                match &s {
                    Type::Wildcard(WildcardBound::Super(sb)) => {
                        self.push(Constraint::Subtype(bound, (**sb).clone()));
                        Ok(())
                    }
                    Type::Wildcard(_) => Err(self.false_bound(&Constraint::Contained(s.clone(), t.clone()))),
                    _ => {
                        self.push(Constraint::Subtype(bound, s));
                        Ok(())
                    }
                }
            }
            _ if s.is_wildcard() => Err(self.false_bound(&Constraint::Contained(s, t))),
            _ => {
                self.push(Constraint::Equal(s, t));
                Ok(())
            }
        }
    }

    fn reduce_equal(&mut self, s: Type, t: Type) -> Result<(), InferenceError> {
        if s.is_proper() && t.is_proper() {
            let holds = s == t;
            return self.check(holds, Constraint::Equal(s, t));
        }
        match (&s, &t) {
            (Type::Infer(var), _) if !t.is_primitive() => {
                if let Type::Infer(other) = &t {
                    self.add_bound(*other, BoundKind::Equal, s.clone());
                }
                self.add_bound(*var, BoundKind::Equal, t);
                Ok(())
            }
            (_, Type::Infer(var)) if !s.is_primitive() => {
                self.add_bound(*var, BoundKind::Equal, s);
                Ok(())
            }
            (Type::Declared { name: n1, args: a1 }, Type::Declared { name: n2, args: a2 })
                if n1 == n2 && a1.len() == a2.len() =>
            {
                for (x, y) in a1.iter().zip(a2.iter()) {
                    self.push(Constraint::Equal(x.clone(), y.clone()));
                }
                Ok(())
            }
            (Type::Array(x), Type::Array(y)) => {
                self.push(Constraint::Equal((**x).clone(), (**y).clone()));
                Ok(())
            }
            (Type::Wildcard(WildcardBound::Extends(x)), Type::Wildcard(WildcardBound::Extends(y)))
            | (Type::Wildcard(WildcardBound::Super(x)), Type::Wildcard(WildcardBound::Super(y))) => {
                self.push(Constraint::Equal((**x).clone(), (**y).clone()));
                Ok(())
            }
            _ => Err(self.false_bound(&Constraint::Equal(s, t))),
        }
    }

    /// Raw and wildcard-parameterized lower bounds change how the variable may resolve
    fn note_lower_bound_shape(&mut self, var: crate::types::VarId, lower: &Type) {
        let raw = self.classes.is_raw(lower);
        let wildcard = matches!(lower, Type::Declared { args, .. } if args.iter().any(Type::is_wildcard));
        if let Some(flags) = self.bounds.flags_mut(var) {
            flags.raw |= raw;
            flags.wildcard_parameterized |= wildcard;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infer::tests::{fixture, NoLambdas};
    use crate::types::VarId;

    #[test]
    fn test_subtype_against_variable_adds_lower_bound() {
        let (classes, hierarchies) = fixture();
        let mut run = InferenceRun::new(&classes, &hierarchies, &NoLambdas, "m", 100);
        let a = run.bounds.fresh("T");
        run.push(Constraint::Compatible(Type::string(), Type::Infer(a)));
        run.solve_pending().unwrap();
        assert!(run.bounds.get(a).unwrap().lower.contains(&Type::string()));
    }

    #[test]
    fn test_primitive_argument_is_boxed() {
        let (classes, hierarchies) = fixture();
        let mut run = InferenceRun::new(&classes, &hierarchies, &NoLambdas, "m", 100);
        let a = run.bounds.fresh("T");
        run.push(Constraint::Compatible(Type::int(), Type::Infer(a)));
        run.solve_pending().unwrap();
        let v = run.bounds.get(a).unwrap();
        assert!(v.lower.contains(&Type::class("Integer")));
        assert!(v.flags.boxed_primitive);
    }

    #[test]
    fn test_parameterized_subtype_reduces_to_equality() {
        let (classes, hierarchies) = fixture();
        let mut run = InferenceRun::new(&classes, &hierarchies, &NoLambdas, "m", 100);
        let a = run.bounds.fresh("E");
        run.push(Constraint::Subtype(
            Type::generic("ArrayList", vec![Type::string()]),
            Type::generic("List", vec![Type::Infer(a)]),
        ));
        run.solve_pending().unwrap();
        assert!(run.bounds.get(a).unwrap().equal.contains(&Type::string()));
    }

    #[test]
    fn test_extends_wildcard_gives_upper_bound() {
        let (classes, hierarchies) = fixture();
        let mut run = InferenceRun::new(&classes, &hierarchies, &NoLambdas, "m", 100);
        let a = run.bounds.fresh("T");
        run.push(Constraint::Contained(Type::Infer(a), Type::extends_wildcard(Type::class("Number"))));
        run.solve_pending().unwrap();
        assert!(run.bounds.get(a).unwrap().upper.contains(&Type::class("Number")));
    }

    #[test]
    fn test_raw_argument_is_unchecked() {
        let (classes, hierarchies) = fixture();
        let mut run = InferenceRun::new(&classes, &hierarchies, &NoLambdas, "m", 100);
        let a = run.bounds.fresh("E");
        run.push(Constraint::Compatible(Type::class("ArrayList"), Type::generic("List", vec![Type::Infer(a)])));
        run.solve_pending().unwrap();
        assert!(run.unchecked);
        assert!(run.bounds.get(VarId(0)).unwrap().equal.is_empty());
    }

    #[test]
    fn test_false_proper_subtype_is_reported() {
        let (classes, hierarchies) = fixture();
        let mut run = InferenceRun::new(&classes, &hierarchies, &NoLambdas, "m", 100);
        run.push(Constraint::Subtype(Type::string(), Type::class("Integer")));
        let err = run.solve_pending().unwrap_err();
        assert!(matches!(err, InferenceError::FalseBound { .. }));
    }
}
