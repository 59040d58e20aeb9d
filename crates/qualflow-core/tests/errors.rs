//! Fatal errors abort the run; local failures become diagnostics and analysis goes on

use qualflow_core::hierarchies::{NullnessTypeSystem, TypeSystem};
use qualflow_core::prelude::*;
use qualflow_core::qualifier::{GraphQualifierHierarchy, QualifierHierarchies};
use qualflow_core::{analyze_unit, InternalError};
use std::sync::Arc;

fn factory() -> AnnotatedTypeFactory {
    AnnotatedTypeFactory::standard(ClassTable::with_defaults(), AnalysisOptions::default()).unwrap()
}

fn void() -> AnnotatedType {
    AnnotatedType::unqualified(Type::Void)
}

#[test]
fn test_cyclic_hierarchy_is_rejected() {
    let err = GraphQualifierHierarchy::builder("broken")
        .qualifier("A", &["B"])
        .qualifier("B", &["A"])
        .build()
        .unwrap_err();
    assert!(matches!(err, ConfigError::CyclicHierarchy { .. }), "{err}");
}

#[test]
fn test_two_tops_are_rejected() {
    let err = GraphQualifierHierarchy::builder("forked")
        .qualifier("Left", &[])
        .qualifier("Right", &[])
        .qualifier("Bottom", &["Left", "Right"])
        .build()
        .unwrap_err();
    assert!(matches!(err, ConfigError::MultipleTops { .. }), "{err}");
}

#[test]
fn test_shared_qualifier_names_are_rejected() {
    let nullness: Arc<dyn QualifierHierarchy> = NullnessTypeSystem::new().unwrap().hierarchy();
    let rival: Arc<dyn QualifierHierarchy> = Arc::new(
        GraphQualifierHierarchy::builder("rival")
            .qualifier("Nullable", &[])
            .qualifier("Empty", &["Nullable"])
            .build()
            .unwrap(),
    );
    let err = QualifierHierarchies::new(vec![nullness, rival]).unwrap_err();
    assert!(matches!(err, ConfigError::AmbiguousQualifier { .. }), "{err}");
}

#[test]
fn test_hierarchy_registered_twice_is_inconsistent() {
    let nullness: Arc<dyn QualifierHierarchy> = NullnessTypeSystem::new().unwrap().hierarchy();
    let err = QualifierHierarchies::new(vec![nullness.clone(), nullness]).unwrap_err();
    assert!(matches!(err, ConfigError::Inconsistent { .. }), "{err}");
}

#[test]
fn test_registering_the_same_system_twice_fails_factory_construction() {
    let result = AnnotatedTypeFactory::builder(ClassTable::with_defaults(), AnalysisOptions::default())
        .type_system(Box::new(NullnessTypeSystem::new().unwrap()))
        .type_system(Box::new(NullnessTypeSystem::new().unwrap()))
        .build();
    assert!(result.is_err());
}

#[test]
fn test_malformed_option_is_a_config_error() {
    let err = AnalysisOptions::from_processor_args(&["-AmaxBlockVisits=often"]).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidOption { .. }));
    let err = AnalysisOptions::from_toml_str("cache_size = \"big\"").unwrap_err();
    assert!(matches!(err, ConfigError::Toml(_)));
}

#[test]
fn test_break_outside_loop_is_internal_and_names_the_method() {
    let factory = factory();
    let method = MethodDecl::new("broken", vec![], void(), vec![Stmt::Break]);
    let err = factory.analyze_method(&ClassDecl::new("C"), &method).unwrap_err();
    match &err {
        AnalysisError::InMethod { method, source } => {
            assert_eq!(method, "C::broken");
            assert!(matches!(**source, AnalysisError::Internal(InternalError::UnexpectedNode { .. })));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_analyze_unit_stops_at_fatal_error_with_context() {
    let factory = factory();
    let mut class = ClassDecl::new("C");
    class.methods.push(MethodDecl::new("fine", vec![], void(), vec![]));
    class.methods.push(MethodDecl::new("broken", vec![], void(), vec![Stmt::Continue]));
    let unit = CompilationUnit { classes: vec![class] };

    let err = analyze_unit(&factory, &unit).unwrap_err();
    let chain = format!("{err:#}");
    assert!(chain.contains("C::broken"), "{chain}");
    assert!(factory.analysis("C::fine").is_some());
}

#[test]
fn test_analyze_unit_covers_every_method() {
    let factory = factory();
    let mut first = ClassDecl::new("A");
    first.methods.push(MethodDecl::new("a", vec![], void(), vec![]));
    let mut second = ClassDecl::new("B");
    second.methods.push(MethodDecl::new("b", vec![], void(), vec![Stmt::Return(None)]));
    second.methods.push(MethodDecl::constructor(vec![], vec![]));
    let unit = CompilationUnit {
        classes: vec![first, second],
    };
    let analyses = analyze_unit(&factory, &unit).unwrap();
    let names: Vec<&str> = analyses.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["A::a", "B::b", "B::<init>"]);
}

#[test]
fn test_parameter_index_out_of_range_is_local() {
    let factory = factory();
    let method = MethodDecl::new(
        "m",
        vec![Param::new("s", AnnotatedType::unqualified(Type::string()))],
        void(),
        vec![],
    )
    .with_precondition("#2", Qualifier::new("NonNull"))
    .with_precondition("#1", Qualifier::new("NonNull"));
    factory.analyze_method(&ClassDecl::new("C"), &method).unwrap();

    let diagnostics = factory.take_diagnostics();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].key, Diagnostic::FLOW_EXPR_PARSE);
    assert_eq!(diagnostics[0].args[0], "#2");
}

#[test]
fn test_lambda_against_non_functional_parameter_is_local() {
    let factory = factory();
    let take = Arc::new(
        MethodSig::new(
            "Util",
            "take",
            vec![AnnotatedType::unqualified(Type::string())],
            AnnotatedType::unqualified(Type::type_var("T")),
        )
        .with_type_params(vec![TypeParam::new("T")])
        .into_static(),
    );
    let call = Expr::call(None, take, vec![Expr::lambda(vec!["x".to_string()], Expr::local("x"))]);
    let ty = factory.get_annotated_type(&call);
    assert_eq!(ty.ty, Type::object());

    let diagnostics = factory.take_diagnostics();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].key, Diagnostic::INFERENCE_FAILED);
}
