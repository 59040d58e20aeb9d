//! Incorporation: new constraints implied by combinations of bounds

use super::bounds::BoundKind;
use super::constraint::Constraint;
use super::InferenceRun;
use crate::types::{Type, VarId};

impl InferenceRun<'_> {
    /// Record a bound and queue every constraint it implies together with the existing ones
    pub(super) fn add_bound(&mut self, var: VarId, kind: BoundKind, bound: Type) {
        if !self.bounds.add(var, kind, bound.clone()) {
            return;
        }
        let implied = self.implied_by(var, kind, &bound);
        for constraint in implied {
            self.push(constraint);
        }
    }

    fn implied_by(&self, var: VarId, kind: BoundKind, bound: &Type) -> Vec<Constraint> {
        let Some(v) = self.bounds.get(var) else {
            return Vec::new();
        };
        let others = |set: &indexmap::IndexSet<Type>| -> Vec<Type> { set.iter().filter(|t| *t != bound).cloned().collect() };
        let (equal, lower, upper) = (others(&v.equal), others(&v.lower), others(&v.upper));

        let mut implied = Vec::new();
        match kind {
            BoundKind::Equal => {
                implied.extend(equal.iter().map(|e| Constraint::Equal(bound.clone(), e.clone())));
                implied.extend(lower.iter().map(|l| Constraint::Subtype(l.clone(), bound.clone())));
                implied.extend(upper.iter().map(|u| Constraint::Subtype(bound.clone(), u.clone())));
                if bound.is_proper() {
                    implied.extend(self.substitute_into_others(var, bound));
                }
            }
            BoundKind::Lower => {
                implied.extend(equal.iter().map(|e| Constraint::Subtype(bound.clone(), e.clone())));
                for u in &upper {
                    implied.push(Constraint::Subtype(bound.clone(), u.clone()));
                    implied.extend(self.common_parameterizations(bound, u));
                }
            }
            BoundKind::Upper => {
                implied.extend(equal.iter().map(|e| Constraint::Subtype(e.clone(), bound.clone())));
                for l in &lower {
                    implied.push(Constraint::Subtype(l.clone(), bound.clone()));
                    implied.extend(self.common_parameterizations(l, bound));
                }
                for u in &upper {
                    implied.extend(self.common_parameterizations(bound, u));
                }
            }
        }
        implied.extend(self.substitute_known_equalities(var, kind, bound));
        implied
    }

    /// `α = U` with `U` proper: every other bound mentioning `α` holds with `U` in its place
    fn substitute_into_others(&self, var: VarId, value: &Type) -> Vec<Constraint> {
        let mut implied = Vec::new();
        for other in self.bounds.iter().filter(|o| o.id != var && !o.is_resolved()) {
            for (kind, t) in other.all_bounds().filter(|(_, t)| t.mentions(var)) {
                let replaced = t.instantiate(&|v| (v == var).then(|| value.clone()));
                implied.push(bound_constraint(other.id, kind, replaced));
            }
        }
        implied
    }

    /// A new bound mentioning variables that already have a proper equal bound
    fn substitute_known_equalities(&self, var: VarId, kind: BoundKind, bound: &Type) -> Vec<Constraint> {
        let mut mentioned = Vec::new();
        bound.collect_vars(&mut mentioned);
        let known: Vec<(VarId, Type)> = mentioned
            .into_iter()
            .filter(|v| *v != var)
            .filter_map(|v| {
                let bounds = self.bounds.get(v)?;
                bounds.equal.iter().find(|e| e.is_proper()).map(|e| (v, e.clone()))
            })
            .collect();
        if known.is_empty() {
            return Vec::new();
        }
        let replaced = bound.instantiate(&|v| known.iter().find(|(k, _)| *k == v).map(|(_, t)| t.clone()));
        vec![bound_constraint(var, kind, replaced)]
    }

    /// If `s` and `t` both have a parameterized supertype `G<..>`, their type arguments agree
    fn common_parameterizations(&self, s: &Type, t: &Type) -> Vec<Constraint> {
        if !matches!(s, Type::Declared { .. }) || !matches!(t, Type::Declared { .. }) {
            return Vec::new();
        }
        let t_supers = self.classes.erased_supertypes(t);
        let mut implied = Vec::new();
        for class in self.classes.erased_supertypes(s).iter().filter(|c| t_supers.contains(*c)) {
            let (Some(Type::Declared { args: sa, .. }), Some(Type::Declared { args: ta, .. })) =
                (self.classes.as_super(s, class), self.classes.as_super(t, class))
            else {
                continue;
            };
            if sa.is_empty() || sa.len() != ta.len() {
                continue;
            }
            for (x, y) in sa.into_iter().zip(ta) {
                if !x.is_wildcard() && !y.is_wildcard() && x != y {
                    implied.push(Constraint::Equal(x, y));
                }
            }
        }
        implied
    }
}

fn bound_constraint(var: VarId, kind: BoundKind, bound: Type) -> Constraint {
    match kind {
        BoundKind::Equal => Constraint::Equal(Type::Infer(var), bound),
        BoundKind::Lower => Constraint::Subtype(bound, Type::Infer(var)),
        BoundKind::Upper => Constraint::Subtype(Type::Infer(var), bound),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InferenceError;
    use crate::infer::tests::{fixture, NoLambdas};

    #[test]
    fn test_lower_and_upper_bounds_are_checked_against_each_other() {
        let (classes, hierarchies) = fixture();
        let mut run = InferenceRun::new(&classes, &hierarchies, &NoLambdas, "m", 100);
        let a = run.bounds.fresh("T");
        run.add_bound(a, BoundKind::Upper, Type::class("Integer"));
        run.add_bound(a, BoundKind::Lower, Type::string());
        let err = run.solve_pending().unwrap_err();
        assert!(matches!(err, InferenceError::FalseBound { .. }));
    }

    #[test]
    fn test_two_parameterized_upper_bounds_imply_equal_arguments() {
        let (classes, hierarchies) = fixture();
        let mut run = InferenceRun::new(&classes, &hierarchies, &NoLambdas, "m", 100);
        let a = run.bounds.fresh("T");
        let b = run.bounds.fresh("E");
        run.add_bound(a, BoundKind::Upper, Type::generic("List", vec![Type::Infer(b)]));
        run.add_bound(a, BoundKind::Upper, Type::generic("Collection", vec![Type::string()]));
        run.solve_pending().unwrap();
        assert!(run.bounds.get(b).unwrap().equal.contains(&Type::string()));
    }

    #[test]
    fn test_proper_equality_is_substituted_into_other_bounds() {
        let (classes, hierarchies) = fixture();
        let mut run = InferenceRun::new(&classes, &hierarchies, &NoLambdas, "m", 100);
        let a = run.bounds.fresh("T");
        let b = run.bounds.fresh("U");
        run.add_bound(b, BoundKind::Lower, Type::generic("List", vec![Type::Infer(a)]));
        run.add_bound(a, BoundKind::Equal, Type::string());
        run.solve_pending().unwrap();
        assert!(run
            .bounds
            .get(b)
            .unwrap()
            .lower
            .contains(&Type::generic("List", vec![Type::string()])));
    }

    #[test]
    fn test_step_limit_stops_runaway_incorporation() {
        let (classes, hierarchies) = fixture();
        let mut run = InferenceRun::new(&classes, &hierarchies, &NoLambdas, "m", 2);
        let a = run.bounds.fresh("T");
        run.add_bound(a, BoundKind::Upper, Type::object());
        run.add_bound(a, BoundKind::Lower, Type::string());
        run.add_bound(a, BoundKind::Lower, Type::class("Integer"));
        run.add_bound(a, BoundKind::Upper, Type::class("Serializable"));
        let err = run.solve_pending().unwrap_err();
        assert!(matches!(err, InferenceError::StepLimit { limit: 2, .. }));
    }
}
