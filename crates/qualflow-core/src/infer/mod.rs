//! Type-argument inference for generic method and constructor invocations
//!
//! One [`InvocationInference::infer`] call is one inference episode:
//! - Building: a fresh variable per type parameter, bounded by its declared bound
//! - Collection: a compatibility constraint per argument; lambda arguments are deferred
//! - Incorporation: reduction of constraints to bounds and of bound pairs to new constraints
//! - Resolution: instantiation of every variable to a proper type, in dependency order
//!
//! The variables and their bounds live in an arena owned by the episode and are dropped
//! with it. A contradiction fails only this invocation.

mod bounds;
mod constraint;
mod incorporation;
mod resolution;

pub use bounds::{BoundFlags, BoundKind, BoundSet, VariableBounds};
pub use constraint::Constraint;

use crate::config::AnalysisOptions;
use crate::error::InferenceError;
use crate::hir::{Expr, MethodSig};
use crate::qualifier::{AnnotatedType, Qualifier, QualifierHierarchies};
use crate::types::{ClassTable, Type};
use indexmap::IndexMap;
use std::collections::{HashMap, VecDeque};

/// Types lambda bodies on behalf of the solver
pub trait ExpressionTyper {
    /// Type of `body` with the lambda parameters bound to the given types; `None` if unknown
    fn lambda_body_type(&self, params: &[(String, Type)], body: &Expr) -> Option<Type>;
}

/// An actual argument as seen by inference
#[derive(Debug, Clone)]
pub enum Argument {
    Typed(AnnotatedType),
    Lambda { params: Vec<String>, body: Expr },
}

/// Instantiation of every type parameter of one invocation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InferenceSolution {
    pub instantiations: IndexMap<String, Type>,
    /// Inferred qualifiers per type parameter, at most one per hierarchy
    pub qualifiers: IndexMap<String, Vec<Qualifier>>,
    /// An argument needed unchecked conversion; the result type is erased
    pub unchecked: bool,
}

impl InferenceSolution {
    pub fn get(&self, type_param: &str) -> Option<&Type> {
        self.instantiations.get(type_param)
    }

    /// Substitute the solution into a declared type mentioning the type parameters
    pub fn apply(&self, ty: &Type) -> Type {
        let map: HashMap<String, Type> = self
            .instantiations
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        ty.substitute(&map)
    }
}

/// Per-invocation solver state
pub(crate) struct InferenceRun<'a> {
    classes: &'a ClassTable,
    hierarchies: &'a QualifierHierarchies,
    typer: &'a dyn ExpressionTyper,
    call: String,
    bounds: BoundSet,
    pending: VecDeque<Constraint>,
    deferred: Vec<Constraint>,
    steps: usize,
    max_steps: usize,
    unchecked: bool,
}

impl<'a> InferenceRun<'a> {
    fn new(
        classes: &'a ClassTable,
        hierarchies: &'a QualifierHierarchies,
        typer: &'a dyn ExpressionTyper,
        call: impl Into<String>,
        max_steps: usize,
    ) -> Self {
        Self {
            classes,
            hierarchies,
            typer,
            call: call.into(),
            bounds: BoundSet::new(),
            pending: VecDeque::new(),
            deferred: Vec::new(),
            steps: 0,
            max_steps,
            unchecked: false,
        }
    }

    fn push(&mut self, constraint: Constraint) {
        self.pending.push_back(constraint);
    }

    /// Reduce queued constraints until none are left
    fn solve_pending(&mut self) -> Result<(), InferenceError> {
        while let Some(constraint) = self.pending.pop_front() {
            self.steps += 1;
            if self.steps > self.max_steps {
                tracing::debug!(call = %self.call, limit = self.max_steps, "inference step limit reached");
                return Err(InferenceError::StepLimit {
                    call: self.call.clone(),
                    limit: self.max_steps,
                });
            }
            tracing::trace!(call = %self.call, %constraint, "reducing");
            self.reduce(constraint)?;
        }
        Ok(())
    }

    fn false_bound(&self, constraint: &Constraint) -> InferenceError {
        tracing::debug!(call = %self.call, %constraint, bounds = %self.bounds, "false bound");
        InferenceError::FalseBound {
            call: self.call.clone(),
            constraint: constraint.to_string(),
        }
    }
}

/// Entry point for invocation type inference
pub struct InvocationInference<'a> {
    classes: &'a ClassTable,
    hierarchies: &'a QualifierHierarchies,
    typer: &'a dyn ExpressionTyper,
    max_steps: usize,
}

impl<'a> InvocationInference<'a> {
    pub fn new(
        classes: &'a ClassTable,
        hierarchies: &'a QualifierHierarchies,
        options: &AnalysisOptions,
        typer: &'a dyn ExpressionTyper,
    ) -> Self {
        Self {
            classes,
            hierarchies,
            typer,
            max_steps: options.max_inference_steps,
        }
    }

    pub fn infer(&self, method: &MethodSig, args: &[Argument]) -> Result<InferenceSolution, InferenceError> {
        let call = method.qualified_name();
        let mut run = InferenceRun::new(self.classes, self.hierarchies, self.typer, call.clone(), self.max_steps);

        // Building
        let mut subst: HashMap<String, Type> = HashMap::new();
        let mut vars = Vec::with_capacity(method.type_params.len());
        for tp in &method.type_params {
            let var = run.bounds.fresh(tp.name.clone());
            subst.insert(tp.name.clone(), Type::Infer(var));
            vars.push(var);
        }
        for (tp, &var) in method.type_params.iter().zip(&vars) {
            let bound = tp.bound.as_ref().map(|b| b.substitute(&subst)).unwrap_or_else(Type::object);
            run.add_bound(var, BoundKind::Upper, bound);
        }

        // Collection
        for (formal, arg) in method.params.iter().zip(args) {
            let formal_ty = formal.ty.substitute(&subst);
            match arg {
                Argument::Typed(actual) => {
                    if let Some(Type::Infer(var)) = direct_variable(&formal.ty, &subst) {
                        for q in &actual.qualifiers {
                            run.bounds.add_qualifier_bound(var, BoundKind::Lower, q.clone());
                        }
                        for q in &formal.qualifiers {
                            run.bounds.add_qualifier_bound(var, BoundKind::Upper, q.clone());
                        }
                    }
                    run.push(Constraint::Compatible(actual.ty.clone(), formal_ty));
                }
                Argument::Lambda { params, body } => run.push(Constraint::Lambda {
                    params: params.clone(),
                    body: body.clone(),
                    target: formal_ty,
                }),
            }
        }
        tracing::debug!(call = %call, variables = vars.len(), constraints = run.pending.len(), "inferring type arguments");

        // Incorporation and resolution
        run.resolve_all()?;

        let mut solution = InferenceSolution {
            unchecked: run.unchecked,
            ..InferenceSolution::default()
        };
        for (tp, &var) in method.type_params.iter().zip(&vars) {
            let ty = run
                .bounds
                .instantiation(var)
                .cloned()
                .ok_or_else(|| InferenceError::Unresolved {
                    call: call.clone(),
                    variable: tp.name.clone(),
                })?;
            solution.instantiations.insert(tp.name.clone(), ty);
            let qualifiers = run.resolve_qualifiers(var)?;
            if !qualifiers.is_empty() {
                solution.qualifiers.insert(tp.name.clone(), qualifiers);
            }
        }
        tracing::debug!(call = %call, unchecked = solution.unchecked, "type arguments inferred");
        Ok(solution)
    }
}

/// The variable a formal parameter type consists of, if it is exactly a type parameter
fn direct_variable(formal: &Type, subst: &HashMap<String, Type>) -> Option<Type> {
    match formal {
        Type::TypeVar(name) => subst.get(name).cloned(),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::hir::TypeParam;
    use crate::qualifier::{GraphQualifierHierarchy, QualifierHierarchy};
    use std::sync::Arc;

    pub(crate) struct NoLambdas;

    impl ExpressionTyper for NoLambdas {
        fn lambda_body_type(&self, _params: &[(String, Type)], _body: &Expr) -> Option<Type> {
            None
        }
    }

    /// Lambda bodies type as their first parameter's type, or `String` without parameters
    struct EchoFirstParam;

    impl ExpressionTyper for EchoFirstParam {
        fn lambda_body_type(&self, params: &[(String, Type)], _body: &Expr) -> Option<Type> {
            Some(params.first().map(|(_, t)| t.clone()).unwrap_or_else(Type::string))
        }
    }

    pub(crate) fn fixture() -> (ClassTable, QualifierHierarchies) {
        let nullness: Arc<dyn QualifierHierarchy> = Arc::new(
            GraphQualifierHierarchy::builder("nullness")
                .qualifier("Nullable", &[])
                .qualifier("NonNull", &["Nullable"])
                .build()
                .unwrap(),
        );
        (
            ClassTable::with_defaults(),
            QualifierHierarchies::new(vec![nullness]).unwrap(),
        )
    }

    fn t() -> AnnotatedType {
        AnnotatedType::unqualified(Type::type_var("T"))
    }

    fn identity() -> MethodSig {
        MethodSig::new("Util", "identity", vec![t()], t())
            .with_type_params(vec![TypeParam::new("T")])
            .into_static()
    }

    #[test]
    fn test_identity_resolves_to_argument_type() {
        let (classes, hierarchies) = fixture();
        let options = AnalysisOptions::default();
        let inference = InvocationInference::new(&classes, &hierarchies, &options, &NoLambdas);
        let args = [Argument::Typed(AnnotatedType::unqualified(Type::string()))];
        let solution = inference.infer(&identity(), &args).unwrap();
        assert_eq!(solution.get("T"), Some(&Type::string()));
        assert!(!solution.unchecked);
    }

    #[test]
    fn test_reinference_is_idempotent() {
        let (classes, hierarchies) = fixture();
        let options = AnalysisOptions::default();
        let inference = InvocationInference::new(&classes, &hierarchies, &options, &NoLambdas);
        let args = [Argument::Typed(AnnotatedType::unqualified(Type::int()))];
        let first = inference.infer(&identity(), &args).unwrap();
        let second = inference.infer(&identity(), &args).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.get("T"), Some(&Type::class("Integer")));
    }

    #[test]
    fn test_argument_qualifier_flows_to_result() {
        let (classes, hierarchies) = fixture();
        let options = AnalysisOptions::default();
        let inference = InvocationInference::new(&classes, &hierarchies, &options, &NoLambdas);
        let args = [Argument::Typed(
            AnnotatedType::unqualified(Type::string()).with(Qualifier::new("NonNull")),
        )];
        let solution = inference.infer(&identity(), &args).unwrap();
        assert_eq!(solution.qualifiers.get("T"), Some(&vec![Qualifier::new("NonNull")]));
    }

    #[test]
    fn test_lambda_argument_is_deferred_until_its_input_is_known() {
        let (classes, hierarchies) = fixture();
        let options = AnalysisOptions::default();
        let inference = InvocationInference::new(&classes, &hierarchies, &options, &EchoFirstParam);
        // <T, R> R apply(T value, Function<T, R> f)
        let apply = MethodSig::new(
            "Util",
            "apply",
            vec![
                t(),
                AnnotatedType::unqualified(Type::generic("Function", vec![Type::type_var("T"), Type::type_var("R")])),
            ],
            AnnotatedType::unqualified(Type::type_var("R")),
        )
        .with_type_params(vec![TypeParam::new("T"), TypeParam::new("R")]);
        let args = [
            Argument::Typed(AnnotatedType::unqualified(Type::string())),
            Argument::Lambda {
                params: vec!["s".to_string()],
                body: Expr::local("s"),
            },
        ];
        let solution = inference.infer(&apply, &args).unwrap();
        assert_eq!(solution.get("T"), Some(&Type::string()));
        assert_eq!(solution.get("R"), Some(&Type::string()));
    }

    #[test]
    fn test_lambda_against_non_functional_type_fails() {
        let (classes, hierarchies) = fixture();
        let options = AnalysisOptions::default();
        let inference = InvocationInference::new(&classes, &hierarchies, &options, &EchoFirstParam);
        let sig = MethodSig::new("Util", "take", vec![AnnotatedType::unqualified(Type::string())], t())
            .with_type_params(vec![TypeParam::new("T")]);
        let args = [Argument::Lambda {
            params: vec![],
            body: Expr::string("x"),
        }];
        let err = inference.infer(&sig, &args).unwrap_err();
        assert!(matches!(err, InferenceError::NotFunctional { .. }));
    }

    #[test]
    fn test_raw_argument_erases_result() {
        let (classes, hierarchies) = fixture();
        let options = AnalysisOptions::default();
        let inference = InvocationInference::new(&classes, &hierarchies, &options, &NoLambdas);
        // <E> List<E> copy(List<E> list)
        let list_e = AnnotatedType::unqualified(Type::generic("List", vec![Type::type_var("E")]));
        let sig = MethodSig::new("Util", "copy", vec![list_e.clone()], list_e).with_type_params(vec![TypeParam::new("E")]);
        let args = [Argument::Typed(AnnotatedType::unqualified(Type::class("ArrayList")))];
        let solution = inference.infer(&sig, &args).unwrap();
        assert!(solution.unchecked);
        assert_eq!(solution.get("E"), Some(&Type::object()));
    }
}
