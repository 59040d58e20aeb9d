//! Qualifiers for types the program leaves unannotated

use crate::error::ConfigError;
use crate::qualifier::{AnnotatedType, Qualifier, QualifierHierarchies};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Syntactic position a type is written at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeUseLocation {
    Field,
    Parameter,
    Return,
    Receiver,
    LocalVariable,
    /// Array elements, operator results and anything else
    Other,
}

impl fmt::Display for TypeUseLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeUseLocation::Field => "field",
            TypeUseLocation::Parameter => "parameter",
            TypeUseLocation::Return => "return",
            TypeUseLocation::Receiver => "receiver",
            TypeUseLocation::LocalVariable => "local variable",
            TypeUseLocation::Other => "other",
        };
        f.write_str(name)
    }
}

/// Default qualifier per (hierarchy slot, location); unlisted pairs default to top
#[derive(Debug, Clone, Default)]
pub struct QualifierDefaults {
    entries: HashMap<(usize, TypeUseLocation), Qualifier>,
}

impl QualifierDefaults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        hierarchies: &QualifierHierarchies,
        location: TypeUseLocation,
        qualifier: Qualifier,
    ) -> Result<(), ConfigError> {
        let slot = hierarchies
            .slot_of(&qualifier)
            .ok_or_else(|| ConfigError::UnknownQualifier {
                hierarchy: format!("defaults for {}", location),
                qualifier: qualifier.to_string(),
            })?;
        if let Some(existing) = self.entries.get(&(slot, location)) {
            if *existing != qualifier {
                return Err(ConfigError::Inconsistent {
                    hierarchy: hierarchies.get(slot).name().to_string(),
                    detail: format!("conflicting defaults {} and {} for {}", existing, qualifier, location),
                });
            }
        }
        self.entries.insert((slot, location), qualifier);
        Ok(())
    }

    pub fn get(&self, slot: usize, location: TypeUseLocation) -> Option<&Qualifier> {
        self.entries.get(&(slot, location))
    }

    /// Give `ty` a qualifier in every hierarchy it has none in
    pub fn apply(&self, ty: &mut AnnotatedType, location: TypeUseLocation, hierarchies: &QualifierHierarchies) {
        for (slot, hierarchy) in hierarchies.iter() {
            if ty.qualifier_in(hierarchy).is_none() {
                let qualifier = self.get(slot, location).cloned().unwrap_or_else(|| hierarchy.top());
                ty.qualifiers.push(qualifier);
            }
        }
    }
}
