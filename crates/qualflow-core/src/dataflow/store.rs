//! Flow-sensitive stores
//!
//! A store maps receivers to abstract values at one program point:
//! - Bottom of the information order is an empty store: nothing is known, every receiver
//!   falls back to its declared or default qualifier
//! - Merging keeps only receivers known on both sides, at the per-hierarchy LUB
//! - Assignments and calls kill entries whose value they may have changed

use super::receiver::{FlowExprContext, Receiver};
use crate::qualifier::{Qualifier, QualifierHierarchies};
use indexmap::IndexMap;
use smallvec::SmallVec;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// One optional qualifier per hierarchy; `None` means this value says nothing about it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct AbstractValue {
    slots: SmallVec<[Option<Qualifier>; 2]>,
}

impl AbstractValue {
    pub fn empty(hierarchies: &QualifierHierarchies) -> Self {
        Self {
            slots: SmallVec::from_elem(None, hierarchies.len()),
        }
    }

    /// Sort qualifiers into their hierarchy slots; unowned qualifiers are ignored
    pub fn from_qualifiers<'q>(
        hierarchies: &QualifierHierarchies,
        qualifiers: impl IntoIterator<Item = &'q Qualifier>,
    ) -> Self {
        let mut value = Self::empty(hierarchies);
        for q in qualifiers {
            if let Some(slot) = hierarchies.slot_of(q) {
                value.slots[slot] = Some(q.clone());
            }
        }
        value
    }

    pub fn get(&self, slot: usize) -> Option<&Qualifier> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    pub fn set(&mut self, slot: usize, qualifier: Option<Qualifier>) {
        if slot >= self.slots.len() {
            self.slots.resize(slot + 1, None);
        }
        self.slots[slot] = qualifier;
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn qualifiers(&self) -> impl Iterator<Item = &Qualifier> {
        self.slots.iter().flatten()
    }

    fn zip_with(
        &self,
        other: &Self,
        hierarchies: &QualifierHierarchies,
        combine: &dyn Fn(usize, Option<&Qualifier>, Option<&Qualifier>) -> Option<Qualifier>,
    ) -> Self {
        let slots = (0..hierarchies.len())
            .map(|slot| combine(slot, self.get(slot), other.get(slot)))
            .collect();
        Self { slots }
    }

    pub fn least_upper_bound(&self, other: &Self, hierarchies: &QualifierHierarchies) -> Self {
        self.zip_with(other, hierarchies, &|slot, a, b| match (a, b) {
            (Some(a), Some(b)) => Some(hierarchies.get(slot).least_upper_bound(a, b)),
            _ => None,
        })
    }

    pub fn widened_upper_bound(&self, other: &Self, hierarchies: &QualifierHierarchies) -> Self {
        self.zip_with(other, hierarchies, &|slot, a, b| match (a, b) {
            (Some(a), Some(b)) => Some(hierarchies.get(slot).widened_upper_bound(a, b)),
            _ => None,
        })
    }

    /// Refinement: both sides hold, so take the GLB where both know something
    pub fn greatest_lower_bound(&self, other: &Self, hierarchies: &QualifierHierarchies) -> Self {
        self.zip_with(other, hierarchies, &|slot, a, b| match (a, b) {
            (Some(a), Some(b)) => Some(hierarchies.get(slot).greatest_lower_bound(a, b)),
            (Some(q), None) | (None, Some(q)) => Some(q.clone()),
            (None, None) => None,
        })
    }
}

impl fmt::Display for AbstractValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.qualifiers().map(|q| q.to_string()).collect();
        write!(f, "{}", rendered.join(" "))
    }
}

#[derive(Debug, Clone)]
pub struct Store {
    hierarchies: Arc<QualifierHierarchies>,
    values: IndexMap<Receiver, AbstractValue>,
    initialized_fields: BTreeSet<String>,
    sequential_semantics: bool,
}

impl PartialEq for Store {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values && self.initialized_fields == other.initialized_fields
    }
}

impl Store {
    /// `sequential_semantics == false` is the concurrent mode: receivers that other code can
    /// assign are never stored
    pub fn new(hierarchies: Arc<QualifierHierarchies>, sequential_semantics: bool) -> Self {
        Self {
            hierarchies,
            values: IndexMap::new(),
            initialized_fields: BTreeSet::new(),
            sequential_semantics,
        }
    }

    pub fn hierarchies(&self) -> &Arc<QualifierHierarchies> {
        &self.hierarchies
    }

    /// A store with the same configuration and no knowledge
    pub fn empty_like(&self) -> Self {
        Self::new(self.hierarchies.clone(), self.sequential_semantics)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Receiver, &AbstractValue)> {
        self.values.iter()
    }

    pub fn can_insert(&self, receiver: &Receiver) -> bool {
        !receiver.contains_unknown() && (self.sequential_semantics || !receiver.is_assignable_by_other_code())
    }

    /// Refine `receiver`: the new value is combined with any existing one by GLB
    pub fn insert_value(&mut self, receiver: &Receiver, value: AbstractValue) {
        if value.is_empty() || !self.can_insert(receiver) {
            return;
        }
        let merged = match self.values.get(receiver) {
            Some(existing) => existing.greatest_lower_bound(&value, &self.hierarchies),
            None => value,
        };
        self.values.insert(receiver.clone(), merged);
    }

    pub fn insert_qualifier(&mut self, receiver: &Receiver, qualifier: Qualifier) {
        let value = AbstractValue::from_qualifiers(&self.hierarchies, [&qualifier]);
        self.insert_value(receiver, value);
    }

    /// Overwrite `receiver` regardless of what was known before
    pub fn replace_value(&mut self, receiver: &Receiver, value: AbstractValue) {
        self.clear_value(receiver);
        self.insert_value(receiver, value);
    }

    pub fn clear_value(&mut self, receiver: &Receiver) {
        self.values.shift_remove(receiver);
    }

    pub fn get_value(&self, receiver: &Receiver) -> Option<&AbstractValue> {
        self.values.get(receiver)
    }

    pub fn get_qualifier(&self, receiver: &Receiver, slot: usize) -> Option<&Qualifier> {
        self.values.get(receiver).and_then(|v| v.get(slot))
    }

    pub fn mark_field_initialized(&mut self, field: impl Into<String>) {
        self.initialized_fields.insert(field.into());
    }

    pub fn is_field_initialized(&self, field: &str) -> bool {
        self.initialized_fields.contains(field)
    }

    pub fn initialized_fields(&self) -> &BTreeSet<String> {
        &self.initialized_fields
    }

    /// Merge at a control-flow join
    pub fn least_upper_bound(&self, other: &Store) -> Store {
        self.upper_bound(other, false)
    }

    /// Merge used once a block has been visited too often
    pub fn widened_upper_bound(&self, other: &Store) -> Store {
        self.upper_bound(other, true)
    }

    fn upper_bound(&self, other: &Store, widen: bool) -> Store {
        let mut merged = self.empty_like();
        for (receiver, value) in &self.values {
            let Some(theirs) = other.values.get(receiver) else {
                continue;
            };
            let joined = if widen {
                value.widened_upper_bound(theirs, &self.hierarchies)
            } else {
                value.least_upper_bound(theirs, &self.hierarchies)
            };
            if !joined.is_empty() {
                merged.values.insert(receiver.clone(), joined);
            }
        }
        merged.initialized_fields = self
            .initialized_fields
            .intersection(&other.initialized_fields)
            .cloned()
            .collect();
        merged
    }

    /// Assignment `target = value`, with the kill rules for the target's kind
    pub fn update_for_assignment(&mut self, target: &Receiver, value: Option<AbstractValue>) {
        match target {
            Receiver::Local(name) => {
                let name = name.clone();
                self.remove_conflicting(|r| r != target && r.mentions_local(&name));
            }
            Receiver::Field { field, .. } => {
                let field = field.clone();
                self.remove_conflicting(|r| r != target && (r.may_alias_field(&field) || r.contains_method_call()));
            }
            Receiver::ArrayAccess { .. } => {
                self.remove_conflicting(|r| r != target && (r.contains_array_access() || r.contains_method_call()));
            }
            _ => {}
        }
        self.drop_arguments_mentioning(target);
        self.clear_value(target);
        if let Some(value) = value {
            self.insert_value(target, value);
        }
    }

    /// A call that may have side effects forgets everything other code could change
    pub fn update_for_method_call(&mut self, side_effect_free: bool) {
        if side_effect_free {
            return;
        }
        let before = self.values.len();
        self.values.retain(|r, _| !r.is_assignable_by_other_code());
        tracing::trace!(killed = before - self.values.len(), "impure call invalidated receivers");
    }

    fn remove_conflicting(&mut self, conflicts: impl Fn(&Receiver) -> bool) {
        self.values.retain(|r, _| !conflicts(r));
    }

    /// Qualifier arguments that the assignment to `target` may have changed are stale.
    /// Arguments are parsed back into receivers so they are killed by the same rules as keys.
    fn drop_arguments_mentioning(&mut self, target: &Receiver) {
        let name = target.to_string();
        let context = FlowExprContext::default();
        let mentions = |arg: &str| {
            let textual = arg == name
                || arg
                    .strip_prefix(name.as_str())
                    .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('['));
            textual
                || Receiver::parse(arg, &context).is_ok_and(|parsed| match target {
                    Receiver::Local(local) => parsed.mentions_local(local),
                    Receiver::Field { field, .. } => parsed.may_alias_field(field) || parsed.contains_method_call(),
                    Receiver::ArrayAccess { .. } => parsed.contains_array_access() || parsed.contains_method_call(),
                    _ => parsed.contains(target),
                })
        };
        let hierarchies = self.hierarchies.clone();
        for value in self.values.values_mut() {
            for (slot, hierarchy) in hierarchies.iter() {
                if let Some(q) = value.get(slot) {
                    let dropped = hierarchy.drop_argument(q, &mentions);
                    if &dropped != q {
                        value.set(slot, Some(dropped));
                    }
                }
            }
        }
    }

    /// Bailout for runaway stores: keep the oldest `max` entries
    pub fn truncate_to(&mut self, max: usize) -> bool {
        if self.values.len() <= max {
            return false;
        }
        self.values.truncate(max);
        true
    }
}

impl fmt::Display for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<(String, String)> = self
            .values
            .iter()
            .map(|(r, v)| (r.to_string(), v.to_string()))
            .collect();
        entries.sort();
        writeln!(f, "Store {{")?;
        for (receiver, value) in entries {
            writeln!(f, "  {} -> {}", receiver, value)?;
        }
        if !self.initialized_fields.is_empty() {
            let fields: Vec<&str> = self.initialized_fields.iter().map(String::as_str).collect();
            writeln!(f, "  initialized: {}", fields.join(", "))?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qualifier::{GraphQualifierHierarchy, QualifierHierarchy, SetQualifierHierarchy};

    fn hierarchies() -> Arc<QualifierHierarchies> {
        let nullness: Arc<dyn QualifierHierarchy> = Arc::new(
            GraphQualifierHierarchy::builder("nullness")
                .qualifier("Nullable", &[])
                .qualifier("NonNull", &["Nullable"])
                .build()
                .unwrap(),
        );
        let lessthan: Arc<dyn QualifierHierarchy> =
            Arc::new(SetQualifierHierarchy::new("lessthan", "LessThanUnknown", "LessThan", "LessThanBottom"));
        Arc::new(QualifierHierarchies::new(vec![nullness, lessthan]).unwrap())
    }

    fn non_null() -> Qualifier {
        Qualifier::new("NonNull")
    }

    #[test]
    fn test_insert_refines_by_glb() {
        let mut store = Store::new(hierarchies(), true);
        let x = Receiver::local("x");
        store.insert_qualifier(&x, Qualifier::new("Nullable"));
        store.insert_qualifier(&x, non_null());
        assert_eq!(store.get_qualifier(&x, 0), Some(&non_null()));
    }

    #[test]
    fn test_unknown_receiver_is_never_stored() {
        let mut store = Store::new(hierarchies(), true);
        store.insert_qualifier(&Receiver::Unknown, non_null());
        assert!(store.is_empty());
    }

    #[test]
    fn test_merge_drops_one_sided_entries() {
        let hs = hierarchies();
        let mut left = Store::new(hs.clone(), true);
        let mut right = Store::new(hs, true);
        let x = Receiver::local("x");
        let y = Receiver::local("y");
        left.insert_qualifier(&x, non_null());
        left.insert_qualifier(&y, non_null());
        right.insert_qualifier(&x, Qualifier::new("Nullable"));
        let merged = left.least_upper_bound(&right);
        assert_eq!(merged.get_qualifier(&x, 0), Some(&Qualifier::new("Nullable")));
        assert!(merged.get_value(&y).is_none());
    }

    #[test]
    fn test_local_assignment_kills_dependent_receivers() {
        let mut store = Store::new(hierarchies(), true);
        let xf = Receiver::field(Receiver::local("x"), "f");
        let y = Receiver::local("y");
        store.insert_qualifier(&xf, non_null());
        store.insert_qualifier(&y, Qualifier::with_args("LessThan", ["x"]));
        store.update_for_assignment(&Receiver::local("x"), None);
        assert!(store.get_value(&xf).is_none());
        assert_eq!(store.get_qualifier(&y, 1), Some(&Qualifier::new("LessThanUnknown")));
    }

    #[test]
    fn test_index_assignment_drops_array_element_argument() {
        let mut store = Store::new(hierarchies(), true);
        let y = Receiver::local("y");
        store.insert_qualifier(&y, Qualifier::with_args("LessThan", ["a[i]", "n"]));
        store.update_for_assignment(&Receiver::local("i"), None);
        assert_eq!(store.get_qualifier(&y, 1), Some(&Qualifier::with_args("LessThan", ["n"])));
    }

    #[test]
    fn test_field_assignment_drops_aliased_field_argument() {
        let mut store = Store::new(hierarchies(), true);
        let y = Receiver::local("y");
        store.insert_qualifier(&y, Qualifier::with_args("LessThan", ["b.f", "b.g"]));
        store.update_for_assignment(&Receiver::field(Receiver::local("c"), "f"), None);
        assert_eq!(store.get_qualifier(&y, 1), Some(&Qualifier::with_args("LessThan", ["b.g"])));

        store.update_for_assignment(&Receiver::field(Receiver::local("d"), "g"), None);
        assert_eq!(store.get_qualifier(&y, 1), Some(&Qualifier::new("LessThanUnknown")));
    }

    #[test]
    fn test_field_assignment_kills_aliases_only() {
        let mut store = Store::new(hierarchies(), true);
        let a_f = Receiver::field(Receiver::local("a"), "f");
        let b_f = Receiver::field(Receiver::local("b"), "f");
        let b_g = Receiver::field(Receiver::local("b"), "g");
        for r in [&a_f, &b_f, &b_g] {
            store.insert_qualifier(r, non_null());
        }
        let mut value = AbstractValue::empty(store.hierarchies());
        value.set(0, Some(Qualifier::new("Nullable")));
        store.update_for_assignment(&a_f, Some(value));
        assert_eq!(store.get_qualifier(&a_f, 0), Some(&Qualifier::new("Nullable")));
        assert!(store.get_value(&b_f).is_none());
        assert!(store.get_value(&b_g).is_some());
    }

    #[test]
    fn test_impure_call_kills_fields_but_not_locals() {
        let mut store = Store::new(hierarchies(), true);
        let f = Receiver::this_field("f");
        let x = Receiver::local("x");
        store.insert_qualifier(&f, non_null());
        store.insert_qualifier(&x, non_null());
        store.update_for_method_call(true);
        assert_eq!(store.len(), 2);
        store.update_for_method_call(false);
        assert!(store.get_value(&f).is_none());
        assert!(store.get_value(&x).is_some());
    }

    #[test]
    fn test_concurrent_semantics_skips_fields() {
        let mut store = Store::new(hierarchies(), false);
        store.insert_qualifier(&Receiver::this_field("f"), non_null());
        assert!(store.is_empty());
        store.insert_qualifier(&Receiver::local("x"), non_null());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_initialized_fields_merge_by_intersection() {
        let hs = hierarchies();
        let mut left = Store::new(hs.clone(), true);
        let mut right = Store::new(hs, true);
        left.mark_field_initialized("a");
        left.mark_field_initialized("b");
        right.mark_field_initialized("b");
        let merged = left.least_upper_bound(&right);
        assert!(merged.is_field_initialized("b"));
        assert!(!merged.is_field_initialized("a"));
    }

    #[test]
    fn test_truncate_keeps_oldest() {
        let mut store = Store::new(hierarchies(), true);
        for name in ["a", "b", "c"] {
            store.insert_qualifier(&Receiver::local(name), non_null());
        }
        assert!(store.truncate_to(2));
        assert!(store.get_value(&Receiver::local("c")).is_none());
        assert!(!store.truncate_to(2));
    }

    #[test]
    fn test_equality_ignores_insertion_order() {
        let hs = hierarchies();
        let mut left = Store::new(hs.clone(), true);
        let mut right = Store::new(hs, true);
        left.insert_qualifier(&Receiver::local("a"), non_null());
        left.insert_qualifier(&Receiver::local("b"), non_null());
        right.insert_qualifier(&Receiver::local("b"), non_null());
        right.insert_qualifier(&Receiver::local("a"), non_null());
        assert_eq!(left, right);
    }
}
