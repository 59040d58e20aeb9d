//! `@KeyFor(m, ..)`: values known to be keys of every listed map

use super::{known_receiver, TypeSystem};
use crate::dataflow::{BranchStores, RefinementHandler, Store};
use crate::hir::{Expr, ExprKind, Literal};
use crate::qualifier::{Qualifier, QualifierHierarchy, SetQualifierHierarchy};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct KeyForTypeSystem {
    hierarchy: Arc<SetQualifierHierarchy>,
}

impl KeyForTypeSystem {
    pub fn new() -> Self {
        Self {
            hierarchy: Arc::new(SetQualifierHierarchy::new("keyfor", "UnknownKeyFor", "KeyFor", "KeyForBottom")),
        }
    }
}

impl Default for KeyForTypeSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeSystem for KeyForTypeSystem {
    fn name(&self) -> &str {
        "keyfor"
    }

    fn hierarchy(&self) -> Arc<dyn QualifierHierarchy> {
        self.hierarchy.clone()
    }

    /// `null` is a key for no map, but it is a subtype of every key-for type
    fn literal_qualifier(&self, literal: &Literal) -> Option<Qualifier> {
        matches!(literal, Literal::Null).then(|| self.hierarchy.bottom())
    }

    fn refinement(&self, _slot: usize) -> Option<Box<dyn RefinementHandler + Send + Sync>> {
        Some(Box::new(KeyForRefinement {
            hierarchy: self.hierarchy.clone(),
        }))
    }
}

struct KeyForRefinement {
    hierarchy: Arc<SetQualifierHierarchy>,
}

impl KeyForRefinement {
    /// `(map, key)` when `call` is `map.<method>(key, ..)`
    fn map_and_key<'e>(call: &'e Expr, method_name: &str) -> Option<(&'e Expr, &'e Expr)> {
        match &call.kind {
            ExprKind::MethodCall {
                receiver: Some(map),
                method,
                args,
                ..
            } if method.name == method_name && !method.is_static => Some((map.as_ref(), args.first()?)),
            _ => None,
        }
    }

    fn record(&self, store: &mut Store, map: &Expr, key: &Expr) {
        let (Some(map), Some(key)) = (known_receiver(map), known_receiver(key)) else {
            return;
        };
        store.insert_qualifier(&key, self.hierarchy.qualifier([map.to_string()]));
    }
}

impl RefinementHandler for KeyForRefinement {
    fn name(&self) -> &str {
        "keyfor"
    }

    fn refine_call_condition(&self, call: &Expr, branches: &mut BranchStores) {
        if let Some((map, key)) = Self::map_and_key(call, "containsKey") {
            self.record(&mut branches.then_store, map, key);
        }
    }

    fn after_method_call(&self, call: &Expr, store: &mut Store) {
        if let Some((map, key)) = Self::map_and_key(call, "put") {
            self.record(store, map, key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::Receiver;
    use crate::hir::{MethodSig, Purity};
    use crate::qualifier::{AnnotatedType, QualifierHierarchies};
    use crate::types::Type;

    fn setup() -> (KeyForRefinement, Store) {
        let ts = KeyForTypeSystem::new();
        let store = Store::new(Arc::new(QualifierHierarchies::new(vec![ts.hierarchy()]).unwrap()), true);
        (
            KeyForRefinement {
                hierarchy: ts.hierarchy.clone(),
            },
            store,
        )
    }

    fn map_method(name: &str, arity: usize) -> Arc<MethodSig> {
        let object = AnnotatedType::unqualified(Type::object());
        Arc::new(
            MethodSig::new("Map", name, vec![object.clone(); arity], AnnotatedType::unqualified(Type::boolean()))
                .with_purity(Purity::PURE),
        )
    }

    #[test]
    fn test_contains_key_refines_then_branch() {
        let (handler, store) = setup();
        let call = Expr::call(Some(Expr::local("m")), map_method("containsKey", 1), vec![Expr::local("k")]);
        let mut branches = BranchStores::new(store);
        handler.refine_call_condition(&call, &mut branches);
        assert_eq!(
            branches.then_store.get_qualifier(&Receiver::local("k"), 0),
            Some(&Qualifier::with_args("KeyFor", ["m"]))
        );
        assert!(branches.else_store.is_empty());
    }

    #[test]
    fn test_put_makes_key_for_map() {
        let (handler, mut store) = setup();
        let call = Expr::call(
            Some(Expr::local("m")),
            map_method("put", 2),
            vec![Expr::local("k"), Expr::string("v")],
        );
        handler.after_method_call(&call, &mut store);
        assert!(store.get_value(&Receiver::local("k")).is_some());
    }
}
