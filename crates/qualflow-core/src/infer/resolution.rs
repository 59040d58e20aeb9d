//! Resolution: choosing instantiations for inference variables
//!
//! Variables are resolved in dependency order, a smallest closed set at a time. Lambda
//! arguments stay deferred until every variable in their parameter types is resolved;
//! the variables in their return types wait for them.

use super::bounds::BoundKind;
use super::constraint::Constraint;
use super::InferenceRun;
use crate::error::InferenceError;
use crate::qualifier::Qualifier;
use crate::types::{Type, VarId};
use std::collections::{BTreeSet, VecDeque};

impl InferenceRun<'_> {
    pub(super) fn resolve_all(&mut self) -> Result<(), InferenceError> {
        loop {
            self.solve_pending()?;
            if self.run_ready_lambdas()? {
                continue;
            }
            let unresolved = self.bounds.unresolved();
            if unresolved.is_empty() {
                break;
            }
            let set = self.smallest_resolution_set(&unresolved);
            self.resolve_set(&set)?;
        }
        // Bounds queued by the last instantiations are checks on proper types
        self.solve_pending()
    }

    /// Run every deferred lambda whose parameter types are now proper
    fn run_ready_lambdas(&mut self) -> Result<bool, InferenceError> {
        let mut ran = false;
        for lambda in std::mem::take(&mut self.deferred) {
            let Constraint::Lambda { params, body, target } = lambda else {
                continue;
            };
            let target = self.bounds.apply(&target);
            let ready = match (&target, self.classes.functional_signature(&target)) {
                (Type::Infer(_), _) => false,
                (_, Some(sig)) => sig.params.iter().all(Type::is_proper),
                (_, None) => true,
            };
            if !ready {
                self.deferred.push(Constraint::Lambda { params, body, target });
                continue;
            }
            ran = true;
            let not_functional = || InferenceError::NotFunctional {
                call: self.call.clone(),
                target: target.to_string(),
            };
            let sig = self.classes.functional_signature(&target).ok_or_else(not_functional)?;
            if sig.params.len() != params.len() {
                return Err(not_functional());
            }
            let bindings: Vec<(String, Type)> = params.into_iter().zip(sig.params).collect();
            match self.typer.lambda_body_type(&bindings, &body) {
                Some(body_type) if sig.ret != Type::Void => self.push(Constraint::Compatible(body_type, sig.ret)),
                _ => {}
            }
        }
        Ok(ran)
    }

    /// Variables in the return types of lambdas that cannot run yet
    fn blocked_by_lambdas(&self) -> BTreeSet<VarId> {
        let mut blocked = Vec::new();
        for lambda in &self.deferred {
            if let Constraint::Lambda { target, .. } = lambda {
                let target = self.bounds.apply(target);
                if let Some(sig) = self.classes.functional_signature(&target) {
                    sig.ret.collect_vars(&mut blocked);
                }
            }
        }
        blocked.into_iter().collect()
    }

    /// Smallest set of unresolved variables closed under the dependency relation
    fn smallest_resolution_set(&self, unresolved: &[VarId]) -> Vec<VarId> {
        let blocked = self.blocked_by_lambdas();
        let mut candidates: Vec<VarId> = unresolved.iter().copied().filter(|v| !blocked.contains(v)).collect();
        if candidates.is_empty() {
            candidates = unresolved.to_vec();
        }

        // `α` depends on every variable mentioned in its own bounds
        let neighbours = |var: VarId| -> Vec<VarId> { self.bounds.get(var).map(|b| b.dependencies()).unwrap_or_default() };

        candidates
            .iter()
            .map(|&start| {
                let mut closure = BTreeSet::from([start]);
                let mut queue = VecDeque::from([start]);
                while let Some(v) = queue.pop_front() {
                    for n in neighbours(v) {
                        if candidates.contains(&n) && closure.insert(n) {
                            queue.push_back(n);
                        }
                    }
                }
                closure
            })
            .min_by_key(|closure| (closure.len(), closure.iter().next().copied()))
            .map(|closure| closure.into_iter().collect())
            .unwrap_or_default()
    }

    /// Resolve a dependency-closed set; members whose bounds only become proper once a
    /// sibling is instantiated are retried after it
    fn resolve_set(&mut self, set: &[VarId]) -> Result<(), InferenceError> {
        let mut remaining = set.to_vec();
        while !remaining.is_empty() {
            let mut postponed = Vec::new();
            let mut progressed = false;
            for var in remaining {
                match self.candidate(var) {
                    Ok(ty) => {
                        tracing::debug!(call = %self.call, var = %self.bounds.name_of(var), resolved = %ty, "inference variable resolved");
                        self.add_bound(var, BoundKind::Equal, ty.clone());
                        self.bounds.instantiate(var, ty);
                        self.solve_pending()?;
                        progressed = true;
                    }
                    Err(InferenceError::Unresolved { .. }) => postponed.push(var),
                    Err(err) => return Err(err),
                }
            }
            if !progressed {
                if let Some(&stuck) = postponed.first() {
                    return Err(self.unresolved(stuck));
                }
            }
            remaining = postponed;
        }
        Ok(())
    }

    /// Instantiation from proper bounds: an equal bound, else the lub of the lower bounds,
    /// else the glb of the upper bounds
    fn candidate(&self, var: VarId) -> Result<Type, InferenceError> {
        let Some(v) = self.bounds.get(var) else {
            return Err(self.unresolved(var));
        };
        let proper = |set: &indexmap::IndexSet<Type>| -> Vec<Type> {
            set.iter()
                .map(|t| self.bounds.apply(t))
                .filter(Type::is_proper)
                .collect()
        };

        if let Some(equal) = proper(&v.equal).into_iter().next() {
            return Ok(equal);
        }

        let lower: Vec<Type> = proper(&v.lower).into_iter().filter(|t| *t != Type::Null).collect();
        let upper = proper(&v.upper);
        if !lower.is_empty() {
            let mut lub = self.classes.lub(&lower);
            if v.flags.raw {
                lub = self.classes.erasure(&lub);
            }
            let violated = upper.iter().find(|u| {
                let u = if v.flags.raw { self.classes.erasure(u) } else { (*u).clone() };
                !self.classes.is_subtype(&lub, &u)
            });
            if let Some(u) = violated {
                return Err(self.false_bound(&Constraint::Subtype(lub, u.clone())));
            }
            return Ok(lub);
        }

        let non_trivial: Vec<Type> = upper.iter().filter(|u| !u.is_object()).cloned().collect();
        if !non_trivial.is_empty() {
            return Ok(self.classes.glb(&non_trivial));
        }
        if !upper.is_empty() {
            return Ok(Type::object());
        }
        Err(self.unresolved(var))
    }

    fn unresolved(&self, var: VarId) -> InferenceError {
        InferenceError::Unresolved {
            call: self.call.clone(),
            variable: self.bounds.name_of(var),
        }
    }

    /// Per hierarchy: lub of the qualifier lower bounds, else glb of the upper bounds
    pub(super) fn resolve_qualifiers(&self, var: VarId) -> Result<Vec<Qualifier>, InferenceError> {
        let Some(v) = self.bounds.get(var) else {
            return Ok(Vec::new());
        };
        let mut resolved = Vec::new();
        for (_, hierarchy) in self.hierarchies.iter() {
            let lower: Vec<&Qualifier> = v.qualifier_lower.iter().filter(|q| hierarchy.owns(q)).collect();
            let upper: Vec<&Qualifier> = v.qualifier_upper.iter().filter(|q| hierarchy.owns(q)).collect();
            let lub = lower
                .iter()
                .skip(1)
                .fold(lower.first().map(|q| (*q).clone()), |acc, q| {
                    acc.map(|a| hierarchy.least_upper_bound(&a, q))
                });
            match lub {
                Some(lub) => {
                    if let Some(u) = upper.iter().find(|u| !hierarchy.is_subtype(&lub, u)) {
                        return Err(InferenceError::FalseBound {
                            call: self.call.clone(),
                            constraint: format!("{} {} <: {}", v.name, lub, u),
                        });
                    }
                    resolved.push(lub);
                }
                None => {
                    if let Some((first, rest)) = upper.split_first() {
                        let glb = rest
                            .iter()
                            .fold((*first).clone(), |acc, q| hierarchy.greatest_lower_bound(&acc, q));
                        resolved.push(glb);
                    }
                }
            }
        }
        Ok(resolved)
    }
}
