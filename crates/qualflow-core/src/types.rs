//! Host type system as seen by the qualifier engine
//!
//! `Type` is the unqualified type reported by the front end. `ClassTable` answers the
//! questions inference needs: subtyping between proper types, the parameterization of a
//! class when viewed as one of its supertypes, least upper bounds and boxing.

use indexmap::{IndexMap, IndexSet};
use std::collections::HashMap;
use std::fmt;

/// Inference variable handle, scoped to one inference episode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Boolean,
    Byte,
    Short,
    Char,
    Int,
    Long,
    Float,
    Double,
}

impl PrimitiveKind {
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveKind::Boolean => "boolean",
            PrimitiveKind::Byte => "byte",
            PrimitiveKind::Short => "short",
            PrimitiveKind::Char => "char",
            PrimitiveKind::Int => "int",
            PrimitiveKind::Long => "long",
            PrimitiveKind::Float => "float",
            PrimitiveKind::Double => "double",
        }
    }

    pub fn box_name(self) -> &'static str {
        match self {
            PrimitiveKind::Boolean => "Boolean",
            PrimitiveKind::Byte => "Byte",
            PrimitiveKind::Short => "Short",
            PrimitiveKind::Char => "Character",
            PrimitiveKind::Int => "Integer",
            PrimitiveKind::Long => "Long",
            PrimitiveKind::Float => "Float",
            PrimitiveKind::Double => "Double",
        }
    }

    pub fn from_box_name(name: &str) -> Option<Self> {
        Some(match name {
            "Boolean" => PrimitiveKind::Boolean,
            "Byte" => PrimitiveKind::Byte,
            "Short" => PrimitiveKind::Short,
            "Character" => PrimitiveKind::Char,
            "Integer" => PrimitiveKind::Int,
            "Long" => PrimitiveKind::Long,
            "Float" => PrimitiveKind::Float,
            "Double" => PrimitiveKind::Double,
            _ => return None,
        })
    }

    fn numeric_rank(self) -> Option<u8> {
        match self {
            PrimitiveKind::Byte => Some(1),
            PrimitiveKind::Short => Some(2),
            PrimitiveKind::Int => Some(3),
            PrimitiveKind::Long => Some(4),
            PrimitiveKind::Float => Some(5),
            PrimitiveKind::Double => Some(6),
            PrimitiveKind::Char | PrimitiveKind::Boolean => None,
        }
    }

    /// Primitive widening conversion
    pub fn widens_to(self, other: PrimitiveKind) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (PrimitiveKind::Char, o) => o.numeric_rank().is_some_and(|r| r >= 3),
            (s, o) => match (s.numeric_rank(), o.numeric_rank()) {
                (Some(a), Some(b)) => a < b,
                _ => false,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WildcardBound {
    Unbounded,
    Extends(Box<Type>),
    Super(Box<Type>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Primitive(PrimitiveKind),
    /// Class or interface type; empty `args` on a generic class is the raw type
    Declared { name: String, args: Vec<Type> },
    Array(Box<Type>),
    TypeVar(String),
    Wildcard(WildcardBound),
    Null,
    Intersection(Vec<Type>),
    Void,
    Infer(VarId),
}

impl Type {
    pub fn class(name: impl Into<String>) -> Self {
        Type::Declared {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn generic(name: impl Into<String>, args: Vec<Type>) -> Self {
        Type::Declared {
            name: name.into(),
            args,
        }
    }

    pub fn object() -> Self {
        Type::class("Object")
    }

    pub fn string() -> Self {
        Type::class("String")
    }

    pub fn int() -> Self {
        Type::Primitive(PrimitiveKind::Int)
    }

    pub fn boolean() -> Self {
        Type::Primitive(PrimitiveKind::Boolean)
    }

    pub fn array(element: Type) -> Self {
        Type::Array(Box::new(element))
    }

    pub fn type_var(name: impl Into<String>) -> Self {
        Type::TypeVar(name.into())
    }

    pub fn extends_wildcard(bound: Type) -> Self {
        Type::Wildcard(WildcardBound::Extends(Box::new(bound)))
    }

    pub fn super_wildcard(bound: Type) -> Self {
        Type::Wildcard(WildcardBound::Super(Box::new(bound)))
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Type::Declared { name, .. } if name == "Object")
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, Type::Primitive(_))
    }

    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Type::Declared { .. } | Type::Array(_) | Type::TypeVar(_) | Type::Null | Type::Intersection(_) | Type::Infer(_)
        )
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Type::Wildcard(_))
    }

    pub fn declared_name(&self) -> Option<&str> {
        match self {
            Type::Declared { name, .. } => Some(name),
            _ => None,
        }
    }

    /// A proper type mentions no inference variable
    pub fn is_proper(&self) -> bool {
        let mut vars = Vec::new();
        self.collect_vars(&mut vars);
        vars.is_empty()
    }

    pub fn mentions(&self, var: VarId) -> bool {
        let mut vars = Vec::new();
        self.collect_vars(&mut vars);
        vars.contains(&var)
    }

    pub fn collect_vars(&self, out: &mut Vec<VarId>) {
        match self {
            Type::Infer(v) => {
                if !out.contains(v) {
                    out.push(*v);
                }
            }
            Type::Declared { args, .. } => args.iter().for_each(|a| a.collect_vars(out)),
            Type::Array(e) => e.collect_vars(out),
            Type::Wildcard(WildcardBound::Extends(b)) | Type::Wildcard(WildcardBound::Super(b)) => b.collect_vars(out),
            Type::Intersection(parts) => parts.iter().for_each(|p| p.collect_vars(out)),
            _ => {}
        }
    }

    /// Replace type variables by name
    pub fn substitute(&self, map: &HashMap<String, Type>) -> Type {
        self.map_leaves(&|t| match t {
            Type::TypeVar(name) => map.get(name).cloned(),
            _ => None,
        })
    }

    /// Replace inference variables that `lookup` knows about
    pub fn instantiate(&self, lookup: &dyn Fn(VarId) -> Option<Type>) -> Type {
        self.map_leaves(&|t| match t {
            Type::Infer(v) => lookup(*v),
            _ => None,
        })
    }

    fn map_leaves(&self, f: &dyn Fn(&Type) -> Option<Type>) -> Type {
        if let Some(replaced) = f(self) {
            return replaced;
        }
        match self {
            Type::Declared { name, args } => Type::Declared {
                name: name.clone(),
                args: args.iter().map(|a| a.map_leaves(f)).collect(),
            },
            Type::Array(e) => Type::Array(Box::new(e.map_leaves(f))),
            Type::Wildcard(WildcardBound::Extends(b)) => Type::extends_wildcard(b.map_leaves(f)),
            Type::Wildcard(WildcardBound::Super(b)) => Type::super_wildcard(b.map_leaves(f)),
            Type::Intersection(parts) => Type::Intersection(parts.iter().map(|p| p.map_leaves(f)).collect()),
            other => other.clone(),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Primitive(p) => write!(f, "{}", p.name()),
            Type::Declared { name, args } => {
                write!(f, "{}", name)?;
                if !args.is_empty() {
                    let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                    write!(f, "<{}>", rendered.join(", "))?;
                }
                Ok(())
            }
            Type::Array(e) => write!(f, "{}[]", e),
            Type::TypeVar(name) => write!(f, "{}", name),
            Type::Wildcard(WildcardBound::Unbounded) => write!(f, "?"),
            Type::Wildcard(WildcardBound::Extends(b)) => write!(f, "? extends {}", b),
            Type::Wildcard(WildcardBound::Super(b)) => write!(f, "? super {}", b),
            Type::Null => write!(f, "null"),
            Type::Intersection(parts) => {
                let rendered: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
                write!(f, "{}", rendered.join(" & "))
            }
            Type::Void => write!(f, "void"),
            Type::Infer(v) => write!(f, "α{}", v.0),
        }
    }
}

/// Parameter and return types of a functional interface's single abstract method
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionalSig {
    pub params: Vec<Type>,
    pub ret: Type,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    pub name: String,
    pub type_params: Vec<String>,
    /// Direct supertypes, written in terms of `type_params`
    pub supertypes: Vec<Type>,
    pub is_interface: bool,
    pub sam: Option<FunctionalSig>,
}

impl ClassInfo {
    pub fn class(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_params: Vec::new(),
            supertypes: Vec::new(),
            is_interface: false,
            sam: None,
        }
    }

    pub fn interface(name: impl Into<String>) -> Self {
        let mut info = Self::class(name);
        info.is_interface = true;
        info
    }

    pub fn with_type_params(mut self, params: &[&str]) -> Self {
        self.type_params = params.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn extends(mut self, supertype: Type) -> Self {
        self.supertypes.push(supertype);
        self
    }

    pub fn with_sam(mut self, params: Vec<Type>, ret: Type) -> Self {
        self.sam = Some(FunctionalSig { params, ret });
        self
    }
}

/// Nominal class hierarchy used for subtyping of proper types
#[derive(Debug, Clone, Default)]
pub struct ClassTable {
    classes: IndexMap<String, ClassInfo>,
}

const MAX_LUB_DEPTH: usize = 2;

impl ClassTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table preloaded with the platform classes the engine reasons about
    pub fn with_defaults() -> Self {
        let tv = Type::type_var;
        let mut table = Self::new();
        table.insert(ClassInfo::class("Object"));
        table.insert(ClassInfo::interface("Serializable"));
        table.insert(ClassInfo::interface("Cloneable"));
        table.insert(ClassInfo::interface("Comparable").with_type_params(&["T"]));
        table.insert(ClassInfo::interface("CharSequence"));
        table.insert(
            ClassInfo::class("String")
                .extends(Type::class("CharSequence"))
                .extends(Type::generic("Comparable", vec![Type::string()]))
                .extends(Type::class("Serializable")),
        );
        table.insert(ClassInfo::class("Number").extends(Type::class("Serializable")));
        for boxed in ["Integer", "Long", "Short", "Byte", "Float", "Double"] {
            table.insert(
                ClassInfo::class(boxed)
                    .extends(Type::class("Number"))
                    .extends(Type::generic("Comparable", vec![Type::class(boxed)])),
            );
        }
        for boxed in ["Boolean", "Character"] {
            table.insert(
                ClassInfo::class(boxed)
                    .extends(Type::class("Serializable"))
                    .extends(Type::generic("Comparable", vec![Type::class(boxed)])),
            );
        }
        table.insert(ClassInfo::interface("Iterable").with_type_params(&["T"]));
        table.insert(
            ClassInfo::interface("Collection")
                .with_type_params(&["E"])
                .extends(Type::generic("Iterable", vec![tv("E")])),
        );
        table.insert(
            ClassInfo::interface("List")
                .with_type_params(&["E"])
                .extends(Type::generic("Collection", vec![tv("E")])),
        );
        table.insert(
            ClassInfo::class("ArrayList")
                .with_type_params(&["E"])
                .extends(Type::generic("List", vec![tv("E")]))
                .extends(Type::class("Serializable")),
        );
        table.insert(ClassInfo::interface("Map").with_type_params(&["K", "V"]));
        table.insert(
            ClassInfo::class("HashMap")
                .with_type_params(&["K", "V"])
                .extends(Type::generic("Map", vec![tv("K"), tv("V")])),
        );
        table.insert(
            ClassInfo::interface("Function")
                .with_type_params(&["T", "R"])
                .with_sam(vec![tv("T")], tv("R")),
        );
        table.insert(
            ClassInfo::interface("Supplier")
                .with_type_params(&["T"])
                .with_sam(vec![], tv("T")),
        );
        table.insert(
            ClassInfo::interface("Predicate")
                .with_type_params(&["T"])
                .with_sam(vec![tv("T")], Type::boolean()),
        );
        table.insert(ClassInfo::class("Throwable").extends(Type::class("Serializable")));
        table.insert(ClassInfo::class("Exception").extends(Type::class("Throwable")));
        table.insert(ClassInfo::class("Error").extends(Type::class("Throwable")));
        table.insert(ClassInfo::class("RuntimeException").extends(Type::class("Exception")));
        table.insert(ClassInfo::class("IOException").extends(Type::class("Exception")));
        table.insert(ClassInfo::class("NullPointerException").extends(Type::class("RuntimeException")));
        table.insert(ClassInfo::class("IllegalArgumentException").extends(Type::class("RuntimeException")));
        table.insert(
            ClassInfo::class("IndexOutOfBoundsException").extends(Type::class("RuntimeException")),
        );
        table
    }

    pub fn insert(&mut self, info: ClassInfo) {
        self.classes.insert(info.name.clone(), info);
    }

    pub fn get(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.get(name)
    }

    pub fn is_raw(&self, ty: &Type) -> bool {
        match ty {
            Type::Declared { name, args } => {
                args.is_empty() && self.get(name).is_some_and(|info| !info.type_params.is_empty())
            }
            _ => false,
        }
    }

    /// Is `sub` a subclass of `sup`, ignoring type arguments
    pub fn is_subclass(&self, sub: &str, sup: &str) -> bool {
        self.erased_supertypes(&Type::class(sub)).contains(sup)
    }

    /// View `ty` as an instance of class `target`, substituting type arguments along the way
    pub fn as_super(&self, ty: &Type, target: &str) -> Option<Type> {
        match ty {
            Type::Declared { name, args } => {
                if name == target {
                    return Some(ty.clone());
                }
                if target == "Object" {
                    return Some(Type::object());
                }
                let info = self.get(name)?;
                let raw = args.is_empty() && !info.type_params.is_empty();
                let subst: HashMap<String, Type> = info
                    .type_params
                    .iter()
                    .cloned()
                    .zip(args.iter().cloned())
                    .collect();
                info.supertypes.iter().find_map(|sup| {
                    let inst = if raw { self.erasure(sup) } else { sup.substitute(&subst) };
                    self.as_super(&inst, target)
                })
            }
            Type::Array(_) if matches!(target, "Object" | "Cloneable" | "Serializable") => Some(Type::class(target)),
            Type::Intersection(parts) => parts.iter().find_map(|p| self.as_super(p, target)),
            Type::TypeVar(_) if target == "Object" => Some(Type::object()),
            _ => None,
        }
    }

    /// Subtyping between proper types
    pub fn is_subtype(&self, sub: &Type, sup: &Type) -> bool {
        if sub == sup {
            return true;
        }
        match (sub, sup) {
            (_, Type::Intersection(parts)) => parts.iter().all(|p| self.is_subtype(sub, p)),
            (Type::Intersection(parts), _) => parts.iter().any(|p| self.is_subtype(p, sup)),
            (Type::Null, s) => s.is_reference(),
            (Type::Primitive(a), Type::Primitive(b)) => a.widens_to(*b),
            (Type::Primitive(_), _) | (_, Type::Primitive(_)) => false,
            (s, o) if o.is_object() => s.is_reference(),
            (Type::Array(a), Type::Array(b)) => {
                if a.is_primitive() || b.is_primitive() {
                    a == b
                } else {
                    self.is_subtype(a, b)
                }
            }
            (Type::Array(_), Type::Declared { name, .. }) => matches!(name.as_str(), "Cloneable" | "Serializable"),
            (Type::Declared { .. }, Type::Declared { name, args }) => match self.as_super(sub, name) {
                Some(Type::Declared { args: sub_args, .. }) => {
                    if args.is_empty() {
                        true
                    } else if sub_args.is_empty() {
                        false
                    } else {
                        sub_args.len() == args.len()
                            && sub_args.iter().zip(args.iter()).all(|(s, f)| self.contains(s, f))
                    }
                }
                _ => false,
            },
            _ => false,
        }
    }

    /// Type-argument containment: does `formal` contain `arg`
    pub fn contains(&self, arg: &Type, formal: &Type) -> bool {
        match formal {
            Type::Wildcard(WildcardBound::Unbounded) => true,
            Type::Wildcard(WildcardBound::Extends(bound)) => match arg {
                Type::Wildcard(WildcardBound::Extends(a)) => self.is_subtype(a, bound),
                Type::Wildcard(_) => bound.is_object(),
                t => self.is_subtype(t, bound),
            },
            Type::Wildcard(WildcardBound::Super(bound)) => match arg {
                Type::Wildcard(WildcardBound::Super(a)) => self.is_subtype(bound, a),
                Type::Wildcard(_) => false,
                t => self.is_subtype(bound, t),
            },
            f => arg == f,
        }
    }

    pub fn box_type(kind: PrimitiveKind) -> Type {
        Type::class(kind.box_name())
    }

    pub fn unbox(ty: &Type) -> Option<PrimitiveKind> {
        match ty {
            Type::Declared { name, args } if args.is_empty() => PrimitiveKind::from_box_name(name),
            _ => None,
        }
    }

    pub fn erasure(&self, ty: &Type) -> Type {
        match ty {
            Type::Declared { name, .. } => Type::class(name.clone()),
            Type::Array(e) => Type::array(self.erasure(e)),
            Type::TypeVar(_) | Type::Wildcard(_) | Type::Infer(_) => Type::object(),
            Type::Intersection(parts) => parts.first().map(|p| self.erasure(p)).unwrap_or_else(Type::object),
            other => other.clone(),
        }
    }

    /// Names of every class `ty` can be viewed as, including itself and `Object`
    pub fn erased_supertypes(&self, ty: &Type) -> IndexSet<String> {
        let mut out = IndexSet::new();
        match ty {
            Type::Declared { name, .. } => {
                let mut stack = vec![name.clone()];
                while let Some(current) = stack.pop() {
                    if !out.insert(current.clone()) {
                        continue;
                    }
                    if let Some(info) = self.get(&current) {
                        for sup in &info.supertypes {
                            if let Some(n) = sup.declared_name() {
                                stack.push(n.to_string());
                            }
                        }
                    }
                }
            }
            Type::Array(_) => {
                out.insert("Cloneable".to_string());
                out.insert("Serializable".to_string());
            }
            Type::Intersection(parts) => {
                for p in parts {
                    out.extend(self.erased_supertypes(p));
                }
            }
            _ => {}
        }
        out.insert("Object".to_string());
        out
    }

    /// Least upper bound of proper types
    pub fn lub(&self, types: &[Type]) -> Type {
        self.lub_at_depth(types, 0)
    }

    fn lub_at_depth(&self, types: &[Type], depth: usize) -> Type {
        let non_null: Vec<Type> = types.iter().filter(|t| **t != Type::Null).cloned().collect();
        let Some(first) = non_null.first() else {
            return Type::Null;
        };
        if non_null.iter().all(|t| t == first) {
            return first.clone();
        }
        let boxed: Vec<Type> = non_null
            .into_iter()
            .map(|t| match t {
                Type::Primitive(p) => Self::box_type(p),
                other => other,
            })
            .collect();
        if boxed.iter().all(|t| t == &boxed[0]) {
            return boxed[0].clone();
        }

        let components: Option<Vec<Type>> = boxed
            .iter()
            .map(|t| match t {
                Type::Array(e) if e.is_reference() => Some((**e).clone()),
                _ => None,
            })
            .collect();
        if let Some(components) = components {
            return Type::array(self.lub_at_depth(&components, depth));
        }

        let mut candidates: Vec<String> = self.erased_supertypes(&boxed[0]).into_iter().collect();
        for t in &boxed[1..] {
            let sups = self.erased_supertypes(t);
            candidates.retain(|c| sups.contains(c));
        }
        let minimal: Vec<String> = candidates
            .iter()
            .filter(|c| !candidates.iter().any(|d| d != *c && self.is_subclass(d, c)))
            .cloned()
            .collect();

        let mut parts: Vec<Type> = minimal
            .iter()
            .map(|class| {
                let views: Vec<Type> = boxed.iter().filter_map(|t| self.as_super(t, class)).collect();
                self.least_containing_invocation(class, &views, depth)
            })
            .collect();
        // Classes first, then interfaces; deterministic within each group
        parts.sort_by_key(|p| {
            let is_interface = p
                .declared_name()
                .and_then(|n| self.get(n))
                .is_some_and(|info| info.is_interface);
            (is_interface, p.to_string())
        });
        match parts.len() {
            0 => Type::object(),
            1 => parts.remove(0),
            _ => Type::Intersection(parts),
        }
    }

    fn least_containing_invocation(&self, class: &str, views: &[Type], depth: usize) -> Type {
        let Some(first) = views.first() else {
            return Type::class(class);
        };
        if views.iter().all(|v| v == first) {
            return first.clone();
        }
        let arg_lists: Vec<&Vec<Type>> = views
            .iter()
            .filter_map(|v| match v {
                Type::Declared { args, .. } => Some(args),
                _ => None,
            })
            .collect();
        let arity = arg_lists.first().map(|a| a.len()).unwrap_or(0);
        if arity == 0 || arg_lists.iter().any(|a| a.len() != arity) {
            return Type::class(class);
        }
        let args = (0..arity)
            .map(|i| {
                let column: Vec<Type> = arg_lists.iter().map(|a| a[i].clone()).collect();
                if column.iter().all(|c| c == &column[0]) {
                    column[0].clone()
                } else if depth + 1 >= MAX_LUB_DEPTH {
                    Type::Wildcard(WildcardBound::Unbounded)
                } else {
                    let uppers: Vec<Type> = column
                        .into_iter()
                        .map(|c| match c {
                            Type::Wildcard(WildcardBound::Extends(b)) => *b,
                            Type::Wildcard(_) => Type::object(),
                            other => other,
                        })
                        .collect();
                    Type::extends_wildcard(self.lub_at_depth(&uppers, depth + 1))
                }
            })
            .collect();
        Type::generic(class, args)
    }

    /// Greatest lower bound of proper reference types
    pub fn glb(&self, types: &[Type]) -> Type {
        let mut unique: Vec<Type> = Vec::new();
        for t in types {
            if !unique.contains(t) {
                unique.push(t.clone());
            }
        }
        let minimal: Vec<Type> = unique
            .iter()
            .filter(|t| !unique.iter().any(|u| u != *t && self.is_subtype(u, t)))
            .cloned()
            .collect();
        match minimal.len() {
            0 => Type::object(),
            1 => minimal.into_iter().next().unwrap_or_else(Type::object),
            _ => Type::Intersection(minimal),
        }
    }

    /// Function type of a functional interface, after substituting its type arguments
    pub fn functional_signature(&self, ty: &Type) -> Option<FunctionalSig> {
        let Type::Declared { name, args } = ty else {
            return None;
        };
        let info = self.get(name)?;
        let sam = info.sam.as_ref()?;
        if args.is_empty() {
            return Some(FunctionalSig {
                params: sam.params.iter().map(|p| self.erasure(p)).collect(),
                ret: self.erasure(&sam.ret),
            });
        }
        let subst: HashMap<String, Type> = info
            .type_params
            .iter()
            .cloned()
            .zip(args.iter().map(|a| match a {
                Type::Wildcard(WildcardBound::Extends(b)) | Type::Wildcard(WildcardBound::Super(b)) => (**b).clone(),
                Type::Wildcard(WildcardBound::Unbounded) => Type::object(),
                other => other.clone(),
            }))
            .collect();
        Some(FunctionalSig {
            params: sam.params.iter().map(|p| p.substitute(&subst)).collect(),
            ret: sam.ret.substitute(&subst),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_of(t: Type) -> Type {
        Type::generic("List", vec![t])
    }

    #[test]
    fn test_string_is_subtype_of_object_and_comparable() {
        let table = ClassTable::with_defaults();
        assert!(table.is_subtype(&Type::string(), &Type::object()));
        assert!(table.is_subtype(&Type::string(), &Type::generic("Comparable", vec![Type::string()])));
        assert!(!table.is_subtype(&Type::string(), &Type::class("Integer")));
    }

    #[test]
    fn test_as_super_substitutes_arguments() {
        let table = ClassTable::with_defaults();
        let array_list = Type::generic("ArrayList", vec![Type::string()]);
        assert_eq!(
            table.as_super(&array_list, "Iterable"),
            Some(Type::generic("Iterable", vec![Type::string()]))
        );
    }

    #[test]
    fn test_generic_subtyping_is_invariant() {
        let table = ClassTable::with_defaults();
        assert!(!table.is_subtype(&list_of(Type::string()), &list_of(Type::object())));
        assert!(table.is_subtype(
            &list_of(Type::string()),
            &list_of(Type::extends_wildcard(Type::object()))
        ));
        assert!(table.is_subtype(&list_of(Type::string()), &Type::class("List")));
    }

    #[test]
    fn test_primitive_widening() {
        assert!(PrimitiveKind::Int.widens_to(PrimitiveKind::Long));
        assert!(PrimitiveKind::Char.widens_to(PrimitiveKind::Int));
        assert!(!PrimitiveKind::Char.widens_to(PrimitiveKind::Short));
        assert!(!PrimitiveKind::Boolean.widens_to(PrimitiveKind::Int));
    }

    #[test]
    fn test_lub_of_boxed_numbers() {
        let table = ClassTable::with_defaults();
        let lub = table.lub(&[Type::class("Integer"), Type::class("Long")]);
        match lub {
            Type::Intersection(parts) => {
                assert_eq!(parts[0], Type::class("Number"));
                assert!(parts[1].to_string().starts_with("Comparable<? extends"));
            }
            other => panic!("expected intersection, got {}", other),
        }
    }

    #[test]
    fn test_lub_ignores_null() {
        let table = ClassTable::with_defaults();
        assert_eq!(table.lub(&[Type::Null, Type::string()]), Type::string());
    }

    #[test]
    fn test_glb_picks_most_specific() {
        let table = ClassTable::with_defaults();
        assert_eq!(table.glb(&[Type::object(), Type::string()]), Type::string());
        assert_eq!(
            table.glb(&[Type::class("Integer"), Type::string()]),
            Type::Intersection(vec![Type::class("Integer"), Type::string()])
        );
    }

    #[test]
    fn test_functional_signature_of_function() {
        let table = ClassTable::with_defaults();
        let f = Type::generic("Function", vec![Type::string(), Type::class("Integer")]);
        let sig = table.functional_signature(&f).unwrap();
        assert_eq!(sig.params, vec![Type::string()]);
        assert_eq!(sig.ret, Type::class("Integer"));
    }

    #[test]
    fn test_raw_type_detection() {
        let table = ClassTable::with_defaults();
        assert!(table.is_raw(&Type::class("List")));
        assert!(!table.is_raw(&Type::string()));
    }
}
