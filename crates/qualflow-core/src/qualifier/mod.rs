//! Qualifiers and qualifier hierarchies
//!
//! A qualifier hierarchy is a lattice over [`Qualifier`] values with a top, a bottom,
//! a subtype relation and LUB/GLB operators. The dataflow engine and the inference
//! engine only ever talk to the [`QualifierHierarchy`] trait:
//! - [`GraphQualifierHierarchy`]: a finite poset declared qualifier by qualifier
//! - [`SetQualifierHierarchy`]: qualifiers carrying a set of expression strings
//! - [`QualifierHierarchies`]: every hierarchy in effect for one analysis run

mod graph;
mod registry;
mod set;

pub use graph::{GraphHierarchyBuilder, GraphQualifierHierarchy};
pub use registry::QualifierHierarchies;
pub use set::SetQualifierHierarchy;

use crate::error::ConfigError;
use crate::types::Type;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeSet;
use std::fmt;

/// Immutable type qualifier; identity is the name plus the argument set
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Qualifier {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub args: BTreeSet<String>,
}

impl Qualifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: BTreeSet::new(),
        }
    }

    pub fn with_args<I, S>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has_args(&self) -> bool {
        !self.args.is_empty()
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.name)?;
        if !self.args.is_empty() {
            let args: Vec<&str> = self.args.iter().map(String::as_str).collect();
            write!(f, "({})", args.join(", "))?;
        }
        Ok(())
    }
}

/// Lattice of qualifiers for one type system
pub trait QualifierHierarchy: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn top(&self) -> Qualifier;

    fn bottom(&self) -> Qualifier;

    /// Whether `qualifier` is drawn from this hierarchy
    fn owns(&self, qualifier: &Qualifier) -> bool;

    fn is_subtype(&self, sub: &Qualifier, sup: &Qualifier) -> bool;

    fn least_upper_bound(&self, a: &Qualifier, b: &Qualifier) -> Qualifier;

    fn greatest_lower_bound(&self, a: &Qualifier, b: &Qualifier) -> Qualifier;

    /// Names of every qualifier kind this hierarchy declares
    fn qualifier_names(&self) -> Vec<String>;

    /// Upper bound used once a loop has been visited too often.
    /// Must reach a fixpoint in finitely many steps.
    fn widened_upper_bound(&self, previous: &Qualifier, next: &Qualifier) -> Qualifier {
        self.least_upper_bound(previous, next)
    }

    /// Remove qualifier arguments naming an expression that may have changed
    fn drop_argument(&self, qualifier: &Qualifier, _mentions: &dyn Fn(&str) -> bool) -> Qualifier {
        qualifier.clone()
    }

    /// Check the lattice laws that must hold for every hierarchy
    fn validate(&self) -> Result<(), ConfigError> {
        let top = self.top();
        let bottom = self.bottom();
        let broken = |detail: &str| ConfigError::Inconsistent {
            hierarchy: self.name().to_string(),
            detail: detail.to_string(),
        };
        if !self.owns(&top) {
            return Err(broken("top qualifier is not part of the hierarchy"));
        }
        if !self.owns(&bottom) {
            return Err(ConfigError::MissingBottom {
                hierarchy: self.name().to_string(),
            });
        }
        if !self.is_subtype(&bottom, &top) {
            return Err(broken("bottom is not below top"));
        }
        if top != bottom && self.is_subtype(&top, &bottom) {
            return Err(broken("top is below bottom"));
        }
        if self.least_upper_bound(&top, &bottom) != top || self.greatest_lower_bound(&top, &bottom) != bottom {
            return Err(broken("top and bottom do not bound each other"));
        }
        Ok(())
    }
}

/// A type decorated with at most one qualifier per hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnnotatedType {
    pub ty: Type,
    pub qualifiers: SmallVec<[Qualifier; 2]>,
}

impl AnnotatedType {
    pub fn new(ty: Type, qualifiers: impl IntoIterator<Item = Qualifier>) -> Self {
        Self {
            ty,
            qualifiers: qualifiers.into_iter().collect(),
        }
    }

    pub fn unqualified(ty: Type) -> Self {
        Self {
            ty,
            qualifiers: SmallVec::new(),
        }
    }

    pub fn with(mut self, qualifier: Qualifier) -> Self {
        self.qualifiers.push(qualifier);
        self
    }

    pub fn qualifier_in(&self, hierarchy: &dyn QualifierHierarchy) -> Option<&Qualifier> {
        self.qualifiers.iter().find(|q| hierarchy.owns(q))
    }

    /// Replace this type's qualifier in `hierarchy`, or add one if missing
    pub fn set_qualifier(&mut self, hierarchy: &dyn QualifierHierarchy, qualifier: Qualifier) {
        match self.qualifiers.iter_mut().find(|q| hierarchy.owns(q)) {
            Some(slot) => *slot = qualifier,
            None => self.qualifiers.push(qualifier),
        }
    }

    pub fn has_qualifier(&self, qualifier: &Qualifier) -> bool {
        self.qualifiers.contains(qualifier)
    }
}

impl fmt::Display for AnnotatedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for q in &self.qualifiers {
            write!(f, "{} ", q)?;
        }
        write!(f, "{}", self.ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualifier_identity_is_structural() {
        let a = Qualifier::with_args("KeyFor", ["m", "n"]);
        let b = Qualifier::with_args("KeyFor", ["n", "m"]);
        assert_eq!(a, b);
        assert_ne!(a, Qualifier::with_args("KeyFor", ["m"]));
    }

    #[test]
    fn test_qualifier_display() {
        assert_eq!(Qualifier::new("NonNull").to_string(), "@NonNull");
        assert_eq!(Qualifier::with_args("SameLen", ["b", "a"]).to_string(), "@SameLen(a, b)");
    }

    #[test]
    fn test_set_qualifier_replaces_owned_slot() {
        let nullness = GraphQualifierHierarchy::builder("nullness")
            .qualifier("Nullable", &[])
            .qualifier("NonNull", &["Nullable"])
            .build()
            .unwrap();
        let mut ty = AnnotatedType::unqualified(Type::string()).with(Qualifier::new("Nullable"));
        ty.set_qualifier(&nullness, Qualifier::new("NonNull"));
        assert_eq!(ty.qualifiers.len(), 1);
        assert_eq!(ty.to_string(), "@NonNull String");
    }
}
