//! Every qualifier hierarchy in effect for one analysis run

use super::{Qualifier, QualifierHierarchy};
use crate::error::ConfigError;
use std::collections::HashMap;
use std::sync::Arc;

/// Validated, immutable set of hierarchies; slot `i` of an abstract value belongs to hierarchy `i`
#[derive(Debug, Clone)]
pub struct QualifierHierarchies {
    hierarchies: Vec<Arc<dyn QualifierHierarchy>>,
}

impl QualifierHierarchies {
    pub fn new(hierarchies: Vec<Arc<dyn QualifierHierarchy>>) -> Result<Self, ConfigError> {
        let mut owners: HashMap<String, String> = HashMap::new();
        for (i, h) in hierarchies.iter().enumerate() {
            if hierarchies[..i].iter().any(|other| other.name() == h.name()) {
                return Err(ConfigError::Inconsistent {
                    hierarchy: h.name().to_string(),
                    detail: "hierarchy registered twice".to_string(),
                });
            }
            h.validate()?;
            for name in h.qualifier_names() {
                if owners.insert(name.clone(), h.name().to_string()).is_some() {
                    return Err(ConfigError::AmbiguousQualifier { qualifier: name });
                }
            }
        }
        tracing::debug!(count = hierarchies.len(), "qualifier hierarchies validated");
        Ok(Self { hierarchies })
    }

    pub fn len(&self) -> usize {
        self.hierarchies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hierarchies.is_empty()
    }

    pub fn get(&self, slot: usize) -> &dyn QualifierHierarchy {
        self.hierarchies[slot].as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &dyn QualifierHierarchy)> {
        self.hierarchies.iter().enumerate().map(|(i, h)| (i, h.as_ref()))
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.hierarchies.iter().position(|h| h.name() == name)
    }

    /// Slot of the hierarchy that owns `qualifier`
    pub fn slot_of(&self, qualifier: &Qualifier) -> Option<usize> {
        self.hierarchies.iter().position(|h| h.owns(qualifier))
    }

    pub fn tops(&self) -> Vec<Qualifier> {
        self.hierarchies.iter().map(|h| h.top()).collect()
    }

    pub fn bottoms(&self) -> Vec<Qualifier> {
        self.hierarchies.iter().map(|h| h.bottom()).collect()
    }

    /// Qualifier-wise subtyping; hierarchies missing from either side are not compared
    pub fn is_subtype(&self, sub: &[Qualifier], sup: &[Qualifier]) -> bool {
        self.hierarchies.iter().all(|h| {
            match (sub.iter().find(|q| h.owns(q)), sup.iter().find(|q| h.owns(q))) {
                (Some(a), Some(b)) => h.is_subtype(a, b),
                _ => true,
            }
        })
    }
}
