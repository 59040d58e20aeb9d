//! `@SameLen(a, b, ..)`: arrays known to have equal length

use super::{known_receiver, recorded_arguments, TypeSystem};
use crate::dataflow::{BranchStores, Receiver, RefinementHandler, Store};
use crate::hir::{BinOp, Expr, ExprKind};
use crate::qualifier::{QualifierHierarchy, SetQualifierHierarchy};
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct SameLenTypeSystem {
    hierarchy: Arc<SetQualifierHierarchy>,
}

impl SameLenTypeSystem {
    pub fn new() -> Self {
        let hierarchy =
            SetQualifierHierarchy::new("samelen", "SameLenUnknown", "SameLen", "SameLenBottom").glb_requires_overlap(true);
        Self {
            hierarchy: Arc::new(hierarchy),
        }
    }
}

impl Default for SameLenTypeSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeSystem for SameLenTypeSystem {
    fn name(&self) -> &str {
        "samelen"
    }

    fn hierarchy(&self) -> Arc<dyn QualifierHierarchy> {
        self.hierarchy.clone()
    }

    fn refinement(&self, slot: usize) -> Option<Box<dyn RefinementHandler + Send + Sync>> {
        Some(Box::new(SameLenRefinement {
            hierarchy: self.hierarchy.clone(),
            slot,
        }))
    }
}

struct SameLenRefinement {
    hierarchy: Arc<SetQualifierHierarchy>,
    slot: usize,
}

impl SameLenRefinement {
    /// Make every receiver in `members` SameLen with all of them and with what each already knew
    fn unify(&self, store: &mut Store, members: &[Receiver]) {
        let mut names: BTreeSet<String> = BTreeSet::new();
        for member in members {
            names.insert(member.to_string());
            names.extend(recorded_arguments(store, member, self.slot));
        }
        // Receivers already in the group learn about the new members too
        let mut group: Vec<Receiver> = members.to_vec();
        group.extend(
            store
                .iter()
                .map(|(receiver, _)| receiver)
                .filter(|r| !members.contains(r) && names.contains(&r.to_string()))
                .cloned(),
        );
        let qualifier = self.hierarchy.qualifier(names);
        for member in &group {
            store.insert_qualifier(member, qualifier.clone());
        }
    }
}

fn length_of(expr: &Expr) -> Option<Receiver> {
    match &expr.kind {
        ExprKind::ArrayLength(array) => known_receiver(array),
        _ => None,
    }
}

impl RefinementHandler for SameLenRefinement {
    fn name(&self) -> &str {
        "samelen"
    }

    fn refine_comparison(&self, op: BinOp, left: &Expr, right: &Expr, branches: &mut BranchStores) {
        let (Some(a), Some(b)) = (length_of(left), length_of(right)) else {
            return;
        };
        if a == b {
            return;
        }
        match op {
            BinOp::Eq => self.unify(&mut branches.then_store, &[a, b]),
            BinOp::NotEq => self.unify(&mut branches.else_store, &[a, b]),
            _ => {}
        }
    }

    /// `c = new T[a.length]` makes `c` and `a` the same length at creation time
    fn after_assignment(&self, target: &Receiver, value: &Expr, store: &mut Store) {
        let ExprKind::NewArray { dims, .. } = &value.kind else {
            return;
        };
        let Some(source) = dims.first().and_then(length_of) else {
            return;
        };
        if &source != target {
            self.unify(store, &[source, target.clone()]);
        }
    }
}
