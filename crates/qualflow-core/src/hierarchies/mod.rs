//! Pluggable type systems
//!
//! A [`TypeSystem`] bundles one qualifier hierarchy with everything the factory and the
//! dataflow engine need to know about it: location defaults, the qualifiers of literals
//! and allocations, and the refinement rules applied at conditions and assignments.

mod keyfor;
mod lessthan;
mod nullness;
mod samelen;

pub use keyfor::KeyForTypeSystem;
pub use lessthan::LessThanTypeSystem;
pub use nullness::NullnessTypeSystem;
pub use samelen::SameLenTypeSystem;

use crate::dataflow::{Receiver, RefinementHandler, Store};
use crate::error::ConfigError;
use crate::factory::TypeUseLocation;
use crate::hir::{Expr, Literal};
use crate::qualifier::{Qualifier, QualifierHierarchy};
use std::collections::BTreeSet;
use std::sync::Arc;

pub trait TypeSystem: Send + Sync {
    fn name(&self) -> &str;

    fn hierarchy(&self) -> Arc<dyn QualifierHierarchy>;

    /// Qualifier applied to unannotated types at each location; unlisted locations get top
    fn defaults(&self) -> Vec<(TypeUseLocation, Qualifier)> {
        Vec::new()
    }

    fn literal_qualifier(&self, _literal: &Literal) -> Option<Qualifier> {
        None
    }

    /// Qualifier of `new C(..)` and `new T[n]`
    fn new_object_qualifier(&self) -> Option<Qualifier> {
        None
    }

    fn primitive_qualifier(&self) -> Option<Qualifier> {
        None
    }

    /// Flow refinement rules, given the store slot this system's hierarchy occupies
    fn refinement(&self, _slot: usize) -> Option<Box<dyn RefinementHandler + Send + Sync>> {
        None
    }
}

/// Nullness, same-length, less-than and key-for, in that slot order
pub fn standard_type_systems() -> Result<Vec<Box<dyn TypeSystem>>, ConfigError> {
    Ok(vec![
        Box::new(NullnessTypeSystem::new()?),
        Box::new(SameLenTypeSystem::new()),
        Box::new(LessThanTypeSystem::new()),
        Box::new(KeyForTypeSystem::new()),
    ])
}

/// Canonical receiver of `expr`, if it can serve as a refinement key
fn known_receiver(expr: &Expr) -> Option<Receiver> {
    let receiver = Receiver::from_expr(expr);
    (!receiver.is_unknown()).then_some(receiver)
}

/// Arguments already recorded for `receiver` in a set-valued slot
fn recorded_arguments(store: &Store, receiver: &Receiver, slot: usize) -> BTreeSet<String> {
    store
        .get_qualifier(receiver, slot)
        .map(|q| q.args.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qualifier::QualifierHierarchies;

    #[test]
    fn test_standard_type_systems_form_a_valid_registry() {
        let systems = standard_type_systems().unwrap();
        let hierarchies = QualifierHierarchies::new(systems.iter().map(|s| s.hierarchy()).collect()).unwrap();
        assert_eq!(hierarchies.len(), 4);
        assert_eq!(hierarchies.index_of("nullness"), Some(0));
        assert_eq!(hierarchies.index_of("keyfor"), Some(3));
    }

    #[test]
    fn test_every_standard_system_refines() {
        for (slot, system) in standard_type_systems().unwrap().iter().enumerate() {
            assert!(system.refinement(slot).is_some(), "{} has no refinement", system.name());
        }
    }
}
