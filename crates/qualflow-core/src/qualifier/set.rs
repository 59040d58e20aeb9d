//! Qualifiers whose argument is a set of expression strings
//!
//! `@SameLen(a, b)`, `@LessThan(x)` and `@KeyFor(m)` all share one shape: more arguments
//! means more knowledge, so the subtype relation is set inclusion reversed.

use super::{Qualifier, QualifierHierarchy};
use crate::error::ConfigError;
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
pub struct SetQualifierHierarchy {
    name: String,
    top: String,
    element: String,
    bottom: String,
    /// GLB of disjoint argument sets is bottom instead of their union
    glb_requires_overlap: bool,
}

impl SetQualifierHierarchy {
    pub fn new(name: &str, top: &str, element: &str, bottom: &str) -> Self {
        Self {
            name: name.to_string(),
            top: top.to_string(),
            element: element.to_string(),
            bottom: bottom.to_string(),
            glb_requires_overlap: false,
        }
    }

    pub fn glb_requires_overlap(mut self, requires: bool) -> Self {
        self.glb_requires_overlap = requires;
        self
    }

    /// Element qualifier over `args`; an empty set carries no information and is top
    pub fn qualifier<I, S>(&self, args: I) -> Qualifier
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let q = Qualifier::with_args(self.element.clone(), args);
        if q.args.is_empty() {
            self.top()
        } else {
            q
        }
    }

    pub fn arguments<'a>(&self, qualifier: &'a Qualifier) -> Option<&'a BTreeSet<String>> {
        (qualifier.name == self.element && qualifier.has_args()).then_some(&qualifier.args)
    }

    fn is_top(&self, q: &Qualifier) -> bool {
        q.name == self.top || (q.name == self.element && q.args.is_empty())
    }

    fn is_bottom(&self, q: &Qualifier) -> bool {
        q.name == self.bottom
    }
}

impl QualifierHierarchy for SetQualifierHierarchy {
    fn name(&self) -> &str {
        &self.name
    }

    fn top(&self) -> Qualifier {
        Qualifier::new(self.top.clone())
    }

    fn bottom(&self) -> Qualifier {
        Qualifier::new(self.bottom.clone())
    }

    fn owns(&self, qualifier: &Qualifier) -> bool {
        qualifier.name == self.element
            || ((qualifier.name == self.top || qualifier.name == self.bottom) && !qualifier.has_args())
    }

    fn is_subtype(&self, sub: &Qualifier, sup: &Qualifier) -> bool {
        if self.is_top(sup) || self.is_bottom(sub) {
            return true;
        }
        if self.is_top(sub) || self.is_bottom(sup) {
            return false;
        }
        sub.args.is_superset(&sup.args)
    }

    fn least_upper_bound(&self, a: &Qualifier, b: &Qualifier) -> Qualifier {
        if self.is_bottom(a) {
            return b.clone();
        }
        if self.is_bottom(b) {
            return a.clone();
        }
        if self.is_top(a) || self.is_top(b) {
            return self.top();
        }
        self.qualifier(a.args.intersection(&b.args).cloned())
    }

    fn greatest_lower_bound(&self, a: &Qualifier, b: &Qualifier) -> Qualifier {
        if self.is_top(a) {
            return b.clone();
        }
        if self.is_top(b) {
            return a.clone();
        }
        if self.is_bottom(a) || self.is_bottom(b) {
            return self.bottom();
        }
        if self.glb_requires_overlap && a.args.is_disjoint(&b.args) {
            return self.bottom();
        }
        self.qualifier(a.args.union(&b.args).cloned())
    }

    fn qualifier_names(&self) -> Vec<String> {
        vec![self.top.clone(), self.element.clone(), self.bottom.clone()]
    }

    fn widened_upper_bound(&self, previous: &Qualifier, next: &Qualifier) -> Qualifier {
        let lub = self.least_upper_bound(previous, next);
        if &lub == previous {
            lub
        } else {
            self.top()
        }
    }

    fn drop_argument(&self, qualifier: &Qualifier, mentions: &dyn Fn(&str) -> bool) -> Qualifier {
        match self.arguments(qualifier) {
            Some(args) => self.qualifier(args.iter().filter(|a| !mentions(a)).cloned()),
            None => qualifier.clone(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let names = [&self.top, &self.element, &self.bottom];
        for (i, a) in names.iter().enumerate() {
            if names[i + 1..].contains(a) {
                return Err(ConfigError::DuplicateQualifier {
                    hierarchy: self.name.clone(),
                    qualifier: a.to_string(),
                });
            }
        }
        Ok(())
    }
}
