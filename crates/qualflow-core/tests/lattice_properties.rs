//! Lattice laws for both hierarchy shapes and monotonicity of store joins

use proptest::prelude::*;
use qualflow_core::dataflow::{Receiver, Store};
use qualflow_core::qualifier::{GraphQualifierHierarchy, Qualifier, QualifierHierarchies, QualifierHierarchy, SetQualifierHierarchy};
use std::sync::Arc;

fn diamond() -> GraphQualifierHierarchy {
    GraphQualifierHierarchy::builder("diamond")
        .qualifier("Top", &[])
        .qualifier("Left", &["Top"])
        .qualifier("Right", &["Top"])
        .qualifier("Bottom", &["Left", "Right"])
        .build()
        .unwrap()
}

fn less_than() -> SetQualifierHierarchy {
    SetQualifierHierarchy::new("lessthan", "LessThanUnknown", "LessThan", "LessThanBottom")
}

fn diamond_qualifier() -> impl Strategy<Value = Qualifier> {
    prop::sample::select(vec!["Top", "Left", "Right", "Bottom"]).prop_map(Qualifier::new)
}

fn set_qualifier() -> impl Strategy<Value = Qualifier> {
    let hierarchy = less_than();
    prop_oneof![
        1 => Just(hierarchy.top()),
        1 => Just(hierarchy.bottom()),
        6 => prop::collection::btree_set(prop::sample::select(vec!["a", "b", "c", "d"]), 1..4)
            .prop_map(move |args| less_than().qualifier(args)),
    ]
}

fn check_laws(hierarchy: &dyn QualifierHierarchy, a: &Qualifier, b: &Qualifier) -> Result<(), TestCaseError> {
    let lub = hierarchy.least_upper_bound(a, b);
    let glb = hierarchy.greatest_lower_bound(a, b);

    prop_assert_eq!(&lub, &hierarchy.least_upper_bound(b, a));
    prop_assert_eq!(&glb, &hierarchy.greatest_lower_bound(b, a));
    prop_assert_eq!(&hierarchy.least_upper_bound(a, a), a);
    prop_assert_eq!(&hierarchy.greatest_lower_bound(a, a), a);

    prop_assert!(hierarchy.is_subtype(a, &lub), "{} is not below {}", a, lub);
    prop_assert!(hierarchy.is_subtype(b, &lub), "{} is not below {}", b, lub);
    prop_assert!(hierarchy.is_subtype(&glb, a), "{} is not below {}", glb, a);
    prop_assert!(hierarchy.is_subtype(&glb, b), "{} is not below {}", glb, b);

    prop_assert!(hierarchy.is_subtype(a, &hierarchy.top()));
    prop_assert!(hierarchy.is_subtype(&hierarchy.bottom(), a));
    Ok(())
}

proptest! {
    #[test]
    fn test_graph_hierarchy_is_a_lattice(a in diamond_qualifier(), b in diamond_qualifier()) {
        check_laws(&diamond(), &a, &b)?;
    }

    #[test]
    fn test_set_hierarchy_is_a_lattice(a in set_qualifier(), b in set_qualifier()) {
        check_laws(&less_than(), &a, &b)?;
    }

    #[test]
    fn test_set_lub_is_associative(a in set_qualifier(), b in set_qualifier(), c in set_qualifier()) {
        let h = less_than();
        let left = h.least_upper_bound(&h.least_upper_bound(&a, &b), &c);
        let right = h.least_upper_bound(&a, &h.least_upper_bound(&b, &c));
        prop_assert_eq!(left, right);
    }

    #[test]
    fn test_widening_stays_above_both(a in set_qualifier(), b in set_qualifier()) {
        let h = less_than();
        let widened = h.widened_upper_bound(&a, &b);
        prop_assert!(h.is_subtype(&a, &widened));
        prop_assert!(h.is_subtype(&b, &widened));
    }
}

fn registry() -> Arc<QualifierHierarchies> {
    let graph: Arc<dyn QualifierHierarchy> = Arc::new(diamond());
    let set: Arc<dyn QualifierHierarchy> = Arc::new(less_than());
    Arc::new(QualifierHierarchies::new(vec![graph, set]).unwrap())
}

type Entry = (usize, Option<Qualifier>, Option<Qualifier>);

fn entries() -> impl Strategy<Value = Vec<Entry>> {
    prop::collection::vec(
        (0usize..5, prop::option::of(diamond_qualifier()), prop::option::of(set_qualifier())),
        0..6,
    )
}

fn store_of(hierarchies: &Arc<QualifierHierarchies>, entries: &[Entry]) -> Store {
    let mut store = Store::new(hierarchies.clone(), true);
    for (local, graph, set) in entries {
        let receiver = Receiver::local(format!("v{local}"));
        for qualifier in graph.iter().chain(set.iter()) {
            store.insert_qualifier(&receiver, qualifier.clone());
        }
    }
    store
}

proptest! {
    #[test]
    fn test_store_join_is_an_upper_bound(left in entries(), right in entries()) {
        let hierarchies = registry();
        let a = store_of(&hierarchies, &left);
        let b = store_of(&hierarchies, &right);
        let joined = a.least_upper_bound(&b);

        prop_assert_eq!(&joined, &b.least_upper_bound(&a));
        prop_assert!(joined.len() <= a.len().min(b.len()));
        for (receiver, value) in joined.iter() {
            let (Some(ours), Some(theirs)) = (a.get_value(receiver), b.get_value(receiver)) else {
                return Err(TestCaseError::fail(format!("{receiver} is known on only one side")));
            };
            for (slot, hierarchy) in hierarchies.iter() {
                if let Some(merged) = value.get(slot) {
                    let (Some(x), Some(y)) = (ours.get(slot), theirs.get(slot)) else {
                        return Err(TestCaseError::fail(format!("{receiver} slot {slot} is one-sided")));
                    };
                    prop_assert!(hierarchy.is_subtype(x, merged));
                    prop_assert!(hierarchy.is_subtype(y, merged));
                }
            }
        }
    }

    #[test]
    fn test_store_join_with_itself_is_identity(entries in entries()) {
        let hierarchies = registry();
        let store = store_of(&hierarchies, &entries);
        prop_assert_eq!(store.least_upper_bound(&store), store);
    }
}
