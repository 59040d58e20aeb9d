//! Per-invocation arena of inference variables and their bounds
//!
//! Bounds are append-only: adding a bound that is already present is a no-op, and a new
//! bound is handed back to the caller so it can be incorporated against the existing ones.
//! Once a variable is instantiated its bounds are frozen.

use crate::qualifier::Qualifier;
use crate::types::{Type, VarId};
use indexmap::IndexSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoundKind {
    /// `α = T`
    Equal,
    /// `T <: α`
    Lower,
    /// `α <: T`
    Upper,
}

/// Special-case facts about how a variable's bounds arose
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoundFlags {
    /// A primitive argument was boxed to reach this variable
    pub boxed_primitive: bool,
    /// A lower bound is a wildcard-parameterized type
    pub wildcard_parameterized: bool,
    /// A lower bound is a raw type
    pub raw: bool,
}

#[derive(Debug, Clone)]
pub struct VariableBounds {
    pub id: VarId,
    /// Name of the type parameter this variable stands for
    pub name: String,
    pub equal: IndexSet<Type>,
    pub lower: IndexSet<Type>,
    pub upper: IndexSet<Type>,
    pub qualifier_lower: Vec<Qualifier>,
    pub qualifier_upper: Vec<Qualifier>,
    pub flags: BoundFlags,
    pub instantiation: Option<Type>,
}

impl VariableBounds {
    fn new(id: VarId, name: String) -> Self {
        Self {
            id,
            name,
            equal: IndexSet::new(),
            lower: IndexSet::new(),
            upper: IndexSet::new(),
            qualifier_lower: Vec::new(),
            qualifier_upper: Vec::new(),
            flags: BoundFlags::default(),
            instantiation: None,
        }
    }

    pub fn bounds(&self, kind: BoundKind) -> &IndexSet<Type> {
        match kind {
            BoundKind::Equal => &self.equal,
            BoundKind::Lower => &self.lower,
            BoundKind::Upper => &self.upper,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.instantiation.is_some()
    }

    /// Every bound with its kind, in insertion order per kind
    pub fn all_bounds(&self) -> impl Iterator<Item = (BoundKind, &Type)> {
        self.equal
            .iter()
            .map(|t| (BoundKind::Equal, t))
            .chain(self.lower.iter().map(|t| (BoundKind::Lower, t)))
            .chain(self.upper.iter().map(|t| (BoundKind::Upper, t)))
    }

    /// Other inference variables mentioned by this variable's bounds
    pub fn dependencies(&self) -> Vec<VarId> {
        let mut vars = Vec::new();
        for (_, t) in self.all_bounds() {
            t.collect_vars(&mut vars);
        }
        vars.retain(|v| *v != self.id);
        vars
    }
}

/// Owned arena of the variables of one invocation
#[derive(Debug, Clone, Default)]
pub struct BoundSet {
    vars: Vec<VariableBounds>,
}

impl BoundSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self, name: impl Into<String>) -> VarId {
        let id = VarId(self.vars.len() as u32);
        self.vars.push(VariableBounds::new(id, name.into()));
        id
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn get(&self, var: VarId) -> Option<&VariableBounds> {
        self.vars.get(var.0 as usize)
    }

    fn get_mut(&mut self, var: VarId) -> Option<&mut VariableBounds> {
        self.vars.get_mut(var.0 as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VariableBounds> {
        self.vars.iter()
    }

    pub fn flags_mut(&mut self, var: VarId) -> Option<&mut BoundFlags> {
        self.get_mut(var).map(|v| &mut v.flags)
    }

    /// Record `bound`; returns false when it was already known or the variable is frozen
    pub fn add(&mut self, var: VarId, kind: BoundKind, bound: Type) -> bool {
        let Some(v) = self.get_mut(var) else {
            return false;
        };
        if v.is_resolved() || bound == Type::Infer(var) {
            return false;
        }
        let added = match kind {
            BoundKind::Equal => v.equal.insert(bound),
            BoundKind::Lower => v.lower.insert(bound),
            BoundKind::Upper => v.upper.insert(bound),
        };
        if added {
            tracing::trace!(var = %v.name, ?kind, "bound added");
        }
        added
    }

    pub fn add_qualifier_bound(&mut self, var: VarId, kind: BoundKind, qualifier: Qualifier) {
        let Some(v) = self.get_mut(var) else {
            return;
        };
        let target = match kind {
            BoundKind::Lower => &mut v.qualifier_lower,
            BoundKind::Upper => &mut v.qualifier_upper,
            BoundKind::Equal => {
                v.qualifier_upper.push(qualifier.clone());
                &mut v.qualifier_lower
            }
        };
        if !target.contains(&qualifier) {
            target.push(qualifier);
        }
    }

    pub fn instantiate(&mut self, var: VarId, ty: Type) {
        if let Some(v) = self.get_mut(var) {
            v.instantiation = Some(ty);
        }
    }

    pub fn instantiation(&self, var: VarId) -> Option<&Type> {
        self.get(var).and_then(|v| v.instantiation.as_ref())
    }

    pub fn unresolved(&self) -> Vec<VarId> {
        self.vars.iter().filter(|v| !v.is_resolved()).map(|v| v.id).collect()
    }

    /// Replace every resolved variable in `ty` by its instantiation
    pub fn apply(&self, ty: &Type) -> Type {
        ty.instantiate(&|v| self.instantiation(v).cloned())
    }

    pub fn name_of(&self, var: VarId) -> String {
        self.get(var).map(|v| v.name.clone()).unwrap_or_else(|| format!("α{}", var.0))
    }
}

impl fmt::Display for BoundSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for v in &self.vars {
            write!(f, "{} (α{}):", v.name, v.id.0)?;
            for (kind, t) in v.all_bounds() {
                let op = match kind {
                    BoundKind::Equal => "=",
                    BoundKind::Lower => ":>",
                    BoundKind::Upper => "<:",
                };
                write!(f, " {} {};", op, t)?;
            }
            if let Some(t) = &v.instantiation {
                write!(f, " resolved to {}", t)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
