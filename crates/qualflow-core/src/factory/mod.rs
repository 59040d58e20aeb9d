//! The annotated type factory
//!
//! [`AnnotatedTypeFactory::get_annotated_type`] answers, for any expression, which type
//! and which qualifiers it has. Each hierarchy's qualifier comes from the first source
//! that knows it:
//! 1. the refined value in the dataflow store before the expression
//! 2. the explicit qualifier on the declaration (or the inferred one, for generic calls)
//! 3. the tree annotators, then the type annotators
//! 4. the default for the expression's location, else the hierarchy's top
//!
//! Calls to generic methods with implicit type arguments are handed to the inference
//! engine. A failure there becomes a diagnostic, and the call gets the erased declared
//! return type with top qualifiers.

mod annotators;
mod cache;
mod defaults;

pub use annotators::{ImplicitsTreeAnnotator, PrimitiveTypeAnnotator, TreeAnnotator, TypeAnnotator};
pub use cache::CacheStats;
pub use defaults::{QualifierDefaults, TypeUseLocation};

use crate::config::AnalysisOptions;
use crate::dataflow::{
    AbstractValue, AnalysisResult, Cfg, CfgBuilder, ExpressionEvaluator, FlowExprContext, ForwardAnalysis,
    QualifierTransfer, Receiver, RefinementRegistry, Store,
};
use crate::error::{AnalysisError, ConfigError, Diagnostic, InferenceError};
use crate::hierarchies::{standard_type_systems, TypeSystem};
use crate::hir::{BinOp, ClassDecl, Expr, ExprKind, Literal, MethodDecl, MethodSig, Stmt, UnaryOp};
use crate::infer::{Argument, ExpressionTyper, InferenceSolution, InvocationInference};
use crate::qualifier::{AnnotatedType, QualifierHierarchies};
use crate::types::{ClassTable, PrimitiveKind, Type};
use cache::{FactoryCaches, InferenceKey};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

/// Names in scope inside one method body, with their declared types
#[derive(Debug, Clone)]
struct Scope {
    this: Type,
    locals: HashMap<String, (AnnotatedType, TypeUseLocation)>,
}

impl Default for Scope {
    fn default() -> Self {
        Self {
            this: Type::object(),
            locals: HashMap::new(),
        }
    }
}

impl Scope {
    fn of_method(class: &ClassDecl, method: &MethodDecl) -> Self {
        let this = if class.type_params.is_empty() {
            Type::class(class.name.clone())
        } else {
            Type::generic(class.name.clone(), class.type_params.iter().map(Type::type_var).collect())
        };
        let mut locals = HashMap::new();
        for param in &method.params {
            locals.insert(param.name.clone(), (param.ty.clone(), TypeUseLocation::Parameter));
        }
        collect_locals(&method.body, &mut locals);
        Self { this, locals }
    }
}

fn collect_locals(stmts: &[Stmt], locals: &mut HashMap<String, (AnnotatedType, TypeUseLocation)>) {
    for stmt in stmts {
        match stmt {
            Stmt::VarDecl { name, ty, .. } => {
                locals.insert(name.clone(), (ty.clone(), TypeUseLocation::LocalVariable));
            }
            Stmt::If {
                then_body, else_body, ..
            } => {
                collect_locals(then_body, locals);
                collect_locals(else_body, locals);
            }
            Stmt::While { body, .. } => collect_locals(body, locals),
            Stmt::Try { body, catches } => {
                collect_locals(body, locals);
                for catch in catches {
                    // A caught exception is never null
                    let ty = AnnotatedType::unqualified(Type::class(catch.exception.clone()));
                    locals.insert(catch.var.clone(), (ty, TypeUseLocation::Parameter));
                    collect_locals(&catch.body, locals);
                }
            }
            _ => {}
        }
    }
}

/// Dataflow facts for one analysed method
#[derive(Debug)]
pub struct MethodAnalysis {
    /// `Class::method`
    pub name: String,
    pub cfg: Cfg,
    pub result: AnalysisResult,
    scope: Scope,
}

pub struct FactoryBuilder {
    classes: ClassTable,
    options: AnalysisOptions,
    systems: Vec<Box<dyn TypeSystem>>,
    tree_annotators: Vec<Box<dyn TreeAnnotator>>,
    type_annotators: Vec<Box<dyn TypeAnnotator>>,
}

impl FactoryBuilder {
    pub fn new(classes: ClassTable, options: AnalysisOptions) -> Self {
        Self {
            classes,
            options,
            systems: Vec::new(),
            tree_annotators: Vec::new(),
            type_annotators: Vec::new(),
        }
    }

    /// Add a type system; its hierarchy takes the next store slot
    pub fn type_system(mut self, system: Box<dyn TypeSystem>) -> Self {
        self.systems.push(system);
        self
    }

    pub fn type_systems(mut self, systems: impl IntoIterator<Item = Box<dyn TypeSystem>>) -> Self {
        self.systems.extend(systems);
        self
    }

    /// Runs before the annotators every type system contributes
    pub fn tree_annotator(mut self, annotator: Box<dyn TreeAnnotator>) -> Self {
        self.tree_annotators.push(annotator);
        self
    }

    /// Runs before the annotators every type system contributes
    pub fn type_annotator(mut self, annotator: Box<dyn TypeAnnotator>) -> Self {
        self.type_annotators.push(annotator);
        self
    }

    pub fn build(self) -> Result<AnnotatedTypeFactory, ConfigError> {
        let systems: Vec<Arc<dyn TypeSystem>> = self.systems.into_iter().map(Arc::from).collect();
        let hierarchies = Arc::new(QualifierHierarchies::new(
            systems.iter().map(|s| s.hierarchy()).collect(),
        )?);

        let mut defaults = QualifierDefaults::new();
        let mut refinements = RefinementRegistry::new();
        let mut tree_annotators = self.tree_annotators;
        let mut type_annotators = self.type_annotators;
        for (slot, system) in systems.iter().enumerate() {
            for (location, qualifier) in system.defaults() {
                defaults.add(&hierarchies, location, qualifier)?;
            }
            if let Some(handler) = system.refinement(slot) {
                refinements.register(handler);
            }
            tree_annotators.push(Box::new(ImplicitsTreeAnnotator::new(system.clone())));
            type_annotators.push(Box::new(PrimitiveTypeAnnotator::new(system.clone())));
        }
        tracing::debug!(
            hierarchies = hierarchies.len(),
            refinements = ?refinements.names(),
            cache_size = ?self.options.effective_cache_size(),
            "annotated type factory ready"
        );

        Ok(AnnotatedTypeFactory {
            caches: RefCell::new(FactoryCaches::new(&self.options)),
            classes: self.classes,
            options: self.options,
            hierarchies,
            defaults,
            tree_annotators,
            type_annotators,
            refinements,
            analyses: RefCell::new(IndexMap::new()),
            diagnostics: RefCell::new(Vec::new()),
        })
    }
}

/// Computes annotated types and owns every stateful component of one run.
/// Not shared across threads: each compilation unit analysed in parallel needs its own.
pub struct AnnotatedTypeFactory {
    classes: ClassTable,
    options: AnalysisOptions,
    hierarchies: Arc<QualifierHierarchies>,
    defaults: QualifierDefaults,
    tree_annotators: Vec<Box<dyn TreeAnnotator>>,
    type_annotators: Vec<Box<dyn TypeAnnotator>>,
    refinements: RefinementRegistry,
    analyses: RefCell<IndexMap<String, Rc<MethodAnalysis>>>,
    caches: RefCell<FactoryCaches>,
    diagnostics: RefCell<Vec<Diagnostic>>,
}

impl AnnotatedTypeFactory {
    pub fn builder(classes: ClassTable, options: AnalysisOptions) -> FactoryBuilder {
        FactoryBuilder::new(classes, options)
    }

    /// Factory running the nullness, same-length, less-than and key-for systems
    pub fn standard(classes: ClassTable, options: AnalysisOptions) -> Result<Self, ConfigError> {
        Self::builder(classes, options)
            .type_systems(standard_type_systems()?)
            .build()
    }

    pub fn hierarchies(&self) -> &Arc<QualifierHierarchies> {
        &self.hierarchies
    }

    pub fn classes(&self) -> &ClassTable {
        &self.classes
    }

    pub fn options(&self) -> &AnalysisOptions {
        &self.options
    }

    /// Run the dataflow analysis over one method body and keep its stores
    pub fn analyze_method(&self, class: &ClassDecl, method: &MethodDecl) -> Result<Rc<MethodAnalysis>, AnalysisError> {
        let name = format!("{}::{}", class.name, method.name);
        tracing::debug!(method = %name, "analysis started");

        let scope = Scope::of_method(class, method);
        let initial = self.entry_store(class, method, &scope);
        let cfg = CfgBuilder::new(&self.classes)
            .build_method(method)
            .map_err(|e| AnalysisError::from(e).in_method(name.clone()))?;
        let evaluator = FlowEvaluator { factory: self, scope: &scope };
        let transfer = QualifierTransfer::new(&evaluator, &self.refinements, &self.options, initial);
        let result = ForwardAnalysis::new(&transfer, &self.options)
            .run(&cfg)
            .map_err(|e| AnalysisError::from(e).in_method(name.clone()))?;

        tracing::debug!(
            method = %name,
            iterations = result.iterations(),
            widened = result.widened(),
            bailed_out = result.bailed_out(),
            "analysis finished"
        );
        let analysis = Rc::new(MethodAnalysis {
            name: name.clone(),
            cfg,
            result,
            scope,
        });
        self.analyses.borrow_mut().insert(name, analysis.clone());
        self.caches.borrow_mut().invalidate_types();
        Ok(analysis)
    }

    pub fn analyze_class(&self, class: &ClassDecl) -> Result<Vec<Rc<MethodAnalysis>>, AnalysisError> {
        class.methods.iter().map(|m| self.analyze_method(class, m)).collect()
    }

    /// Result of an earlier `analyze_method`, by `Class::method`
    pub fn analysis(&self, name: &str) -> Option<Rc<MethodAnalysis>> {
        self.analyses.borrow().get(name).cloned()
    }

    /// Annotated type of `expr`, flow-sensitively if its method has been analysed
    pub fn get_annotated_type(&self, expr: &Expr) -> AnnotatedType {
        let cached = self.caches.borrow_mut().get_type(expr.id);
        if let Some(ty) = cached {
            return ty;
        }
        let owner = self
            .analyses
            .borrow()
            .values()
            .find(|a| a.result.store_before(expr.id).is_some())
            .cloned();
        let ty = match &owner {
            Some(analysis) => self.evaluate(expr, analysis.result.store_before(expr.id), &analysis.scope),
            None => self.evaluate(expr, None, &Scope::default()),
        };
        self.caches.borrow_mut().put_type(expr.id, ty.clone());
        ty
    }

    /// A declared type with location defaults filled in
    pub fn apply_defaults(&self, declared: &AnnotatedType, location: TypeUseLocation) -> AnnotatedType {
        let mut ty = declared.clone();
        for annotator in &self.type_annotators {
            annotator.annotate(&mut ty);
        }
        self.defaults.apply(&mut ty, location, &self.hierarchies);
        self.in_slot_order(ty)
    }

    /// Forget cached types and inference results, e.g. before re-analysing a unit
    pub fn clear_caches(&self) {
        self.caches.borrow_mut().clear();
        self.analyses.borrow_mut().clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.caches.borrow().stats()
    }

    /// Drain the diagnostics recorded so far
    pub fn take_diagnostics(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.diagnostics.borrow_mut())
    }

    fn report(&self, diagnostic: Diagnostic) {
        let mut diagnostics = self.diagnostics.borrow_mut();
        if !diagnostics.contains(&diagnostic) {
            tracing::debug!(%diagnostic, "diagnostic recorded");
            diagnostics.push(diagnostic);
        }
    }

    /// Parameters with their declared qualifiers, plus every parsable precondition
    fn entry_store(&self, class: &ClassDecl, method: &MethodDecl, scope: &Scope) -> Store {
        let mut store = Store::new(self.hierarchies.clone(), !self.options.concurrent_semantics);
        for param in &method.params {
            let declared = self.apply_defaults(&param.ty, TypeUseLocation::Parameter);
            let value = AbstractValue::from_qualifiers(&self.hierarchies, declared.qualifiers.iter());
            store.insert_value(&Receiver::local(param.name.clone()), value);
        }

        let mut context = FlowExprContext::new(
            method.params.iter().map(|p| p.name.clone()).collect(),
            class.fields.iter().map(|f| f.name.clone()).collect(),
        );
        context.locals = scope.locals.keys().cloned().collect();
        for precondition in &method.preconditions {
            match Receiver::parse(&precondition.expression, &context) {
                Ok(receiver) => store.insert_qualifier(&receiver, precondition.qualifier.clone()),
                Err(err) => {
                    tracing::debug!(expression = %precondition.expression, %err, "precondition skipped");
                    self.report(
                        Diagnostic::error(Diagnostic::FLOW_EXPR_PARSE)
                            .with_arg(precondition.expression.clone())
                            .with_arg(err.to_string()),
                    );
                }
            }
        }
        store
    }

    fn evaluate(&self, expr: &Expr, store: Option<&Store>, scope: &Scope) -> AnnotatedType {
        let (mut ty, location) = self.declared(expr, store, scope);

        if let Some(value) = store.and_then(|s| s.get_value(&Receiver::from_expr(expr))) {
            for (slot, hierarchy) in self.hierarchies.iter() {
                if let Some(refined) = value.get(slot) {
                    // A refinement never loosens an explicit declaration
                    let combined = match ty.qualifier_in(hierarchy) {
                        Some(declared) => hierarchy.greatest_lower_bound(declared, refined),
                        None => refined.clone(),
                    };
                    ty.set_qualifier(hierarchy, combined);
                }
            }
        }
        for annotator in &self.tree_annotators {
            annotator.annotate(expr, &mut ty);
        }
        for annotator in &self.type_annotators {
            annotator.annotate(&mut ty);
        }
        self.defaults.apply(&mut ty, location, &self.hierarchies);
        self.in_slot_order(ty)
    }

    fn in_slot_order(&self, mut ty: AnnotatedType) -> AnnotatedType {
        ty.qualifiers
            .sort_by_key(|q| self.hierarchies.slot_of(q).unwrap_or(usize::MAX));
        ty
    }

    /// Underlying type plus explicit qualifiers, and the location whose defaults apply
    fn declared(&self, expr: &Expr, store: Option<&Store>, scope: &Scope) -> (AnnotatedType, TypeUseLocation) {
        let plain = |ty: Type| AnnotatedType::unqualified(ty);
        match &expr.kind {
            ExprKind::Literal(literal) => (plain(literal_type(literal)), TypeUseLocation::Other),
            ExprKind::Local(name) => match scope.locals.get(name) {
                Some((ty, location)) => (ty.clone(), *location),
                None => (plain(Type::object()), TypeUseLocation::LocalVariable),
            },
            ExprKind::This => (plain(scope.this.clone()), TypeUseLocation::Receiver),
            ExprKind::ClassName(name) => (plain(Type::class(name.clone())), TypeUseLocation::Receiver),
            ExprKind::FieldAccess { field, .. } => (field.ty.clone(), TypeUseLocation::Field),
            ExprKind::ArrayLength(_) => (plain(Type::int()), TypeUseLocation::Other),
            ExprKind::ArrayAccess { array, .. } => {
                let element = match self.evaluate(array, store, scope).ty {
                    Type::Array(element) => *element,
                    _ => Type::object(),
                };
                (plain(element), TypeUseLocation::Other)
            }
            ExprKind::Binary { op, left, right } => {
                (plain(self.binary_type(*op, left, right, store, scope)), TypeUseLocation::Other)
            }
            ExprKind::Unary { op: UnaryOp::Not, .. } => (plain(Type::boolean()), TypeUseLocation::Other),
            ExprKind::Unary { op: UnaryOp::Neg, operand } => {
                (plain(self.evaluate(operand, store, scope).ty), TypeUseLocation::Other)
            }
            ExprKind::MethodCall {
                receiver,
                method,
                args,
                type_args,
            } => {
                let substitution = self.receiver_substitution(receiver.as_deref(), method, store, scope);
                let ty = self.invocation_type(expr, method, args, type_args, substitution, store, scope);
                (ty, TypeUseLocation::Return)
            }
            ExprKind::NewObject { class, ctor, args } => match ctor {
                Some(sig) if sig.is_generic() && class.declared_name().is_some_and(|n| self.is_diamond(class, n)) => {
                    let ty = self.invocation_type(expr, sig, args, &[], HashMap::new(), store, scope);
                    (AnnotatedType::unqualified(ty.ty), TypeUseLocation::Other)
                }
                _ => (plain(class.clone()), TypeUseLocation::Other),
            },
            ExprKind::NewArray { element, dims } => {
                let ty = (0..dims.len().max(1)).fold(element.clone(), |ty, _| Type::array(ty));
                (plain(ty), TypeUseLocation::Other)
            }
            ExprKind::Lambda { .. } => (plain(Type::object()), TypeUseLocation::Other),
            ExprKind::Conditional {
                then_expr, else_expr, ..
            } => (self.conditional_type(then_expr, else_expr, store, scope), TypeUseLocation::Other),
        }
    }

    /// `new C<>(..)` of a generic class: the type arguments are left to inference
    fn is_diamond(&self, class: &Type, name: &str) -> bool {
        let generic = self.classes.get(name).is_some_and(|info| !info.type_params.is_empty());
        generic && matches!(class, Type::Declared { args, .. } if args.is_empty())
    }

    fn binary_type(&self, op: BinOp, left: &Expr, right: &Expr, store: Option<&Store>, scope: &Scope) -> Type {
        if op.is_comparison() || matches!(op, BinOp::And | BinOp::Or) {
            return Type::boolean();
        }
        let l = self.evaluate(left, store, scope).ty;
        let r = self.evaluate(right, store, scope).ty;
        if op == BinOp::Add && (l == Type::string() || r == Type::string()) {
            return Type::string();
        }
        numeric_promotion(&l, &r)
    }

    fn conditional_type(&self, then_expr: &Expr, else_expr: &Expr, store: Option<&Store>, scope: &Scope) -> AnnotatedType {
        let a = self.evaluate(then_expr, store, scope);
        let b = self.evaluate(else_expr, store, scope);
        let ty = match (&a.ty, &b.ty) {
            (x, y) if x == y => x.clone(),
            (Type::Null, other) | (other, Type::Null) => other.clone(),
            (x, y) => self.classes.lub(&[x.clone(), y.clone()]),
        };
        let mut joined = AnnotatedType::unqualified(ty);
        for (_, hierarchy) in self.hierarchies.iter() {
            if let (Some(qa), Some(qb)) = (a.qualifier_in(hierarchy), b.qualifier_in(hierarchy)) {
                joined.qualifiers.push(hierarchy.least_upper_bound(qa, qb));
            }
        }
        joined
    }

    /// Class type parameters of the method's owner, as seen through the receiver's type
    fn receiver_substitution(
        &self,
        receiver: Option<&Expr>,
        method: &MethodSig,
        store: Option<&Store>,
        scope: &Scope,
    ) -> HashMap<String, Type> {
        let (Some(receiver), Some(info)) = (receiver, self.classes.get(&method.owner)) else {
            return HashMap::new();
        };
        if info.type_params.is_empty() {
            return HashMap::new();
        }
        let receiver_ty = self.evaluate(receiver, store, scope).ty;
        match self.classes.as_super(&receiver_ty, &method.owner) {
            Some(Type::Declared { args, .. }) if args.len() == info.type_params.len() => {
                info.type_params.iter().cloned().zip(args).collect()
            }
            _ => HashMap::new(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn invocation_type(
        &self,
        call: &Expr,
        method: &MethodSig,
        args: &[Expr],
        type_args: &[Type],
        mut substitution: HashMap<String, Type>,
        store: Option<&Store>,
        scope: &Scope,
    ) -> AnnotatedType {
        let declared = &method.ret;
        if !method.is_generic() || !type_args.is_empty() {
            for (param, arg) in method.type_params.iter().zip(type_args) {
                substitution.insert(param.name.clone(), arg.clone());
            }
            return AnnotatedType::new(declared.ty.substitute(&substitution), declared.qualifiers.iter().cloned());
        }

        let ret = declared.ty.substitute(&substitution);
        match self.infer(call, method, args, store, scope) {
            Ok(solution) => {
                let ty = if solution.unchecked {
                    self.classes.erasure(&ret)
                } else {
                    solution.apply(&ret)
                };
                let mut result = AnnotatedType::new(ty, declared.qualifiers.iter().cloned());
                if let Type::TypeVar(name) = &declared.ty {
                    for qualifier in solution.qualifiers.get(name).into_iter().flatten() {
                        if let Some(slot) = self.hierarchies.slot_of(qualifier) {
                            if result.qualifier_in(self.hierarchies.get(slot)).is_none() {
                                result.qualifiers.push(qualifier.clone());
                            }
                        }
                    }
                }
                result
            }
            Err(err) => {
                tracing::debug!(call = %method.qualified_name(), %err, "falling back to the erased return type");
                self.report(Diagnostic::from_inference(&err, call.id, call.span));
                AnnotatedType::new(self.classes.erasure(&ret), self.hierarchies.tops())
            }
        }
    }

    fn infer(
        &self,
        call: &Expr,
        method: &MethodSig,
        args: &[Expr],
        store: Option<&Store>,
        scope: &Scope,
    ) -> Result<InferenceSolution, InferenceError> {
        let arguments: Vec<Argument> = args
            .iter()
            .map(|arg| match &arg.kind {
                ExprKind::Lambda { params, body } => Argument::Lambda {
                    params: params.clone(),
                    body: (**body).clone(),
                },
                _ => Argument::Typed(self.evaluate(arg, store, scope)),
            })
            .collect();
        let key = InferenceKey {
            call: call.id,
            args: arguments
                .iter()
                .map(|a| match a {
                    Argument::Typed(ty) => Some(ty.clone()),
                    Argument::Lambda { .. } => None,
                })
                .collect(),
        };
        let cached = self.caches.borrow_mut().get_inference(&key);
        if let Some(result) = cached {
            return result;
        }

        let typer = LambdaTyper { factory: self, scope };
        let result = InvocationInference::new(&self.classes, &self.hierarchies, &self.options, &typer)
            .infer(method, &arguments);
        self.caches.borrow_mut().put_inference(key, result.clone());
        result
    }
}

/// Evaluates expressions inside the method being analysed
struct FlowEvaluator<'f> {
    factory: &'f AnnotatedTypeFactory,
    scope: &'f Scope,
}

impl ExpressionEvaluator for FlowEvaluator<'_> {
    fn evaluate(&self, expr: &Expr, store: &Store) -> AnnotatedType {
        self.factory.evaluate(expr, Some(store), self.scope)
    }
}

/// Types lambda bodies for inference; the body runs later, so no store applies
struct LambdaTyper<'f> {
    factory: &'f AnnotatedTypeFactory,
    scope: &'f Scope,
}

impl ExpressionTyper for LambdaTyper<'_> {
    fn lambda_body_type(&self, params: &[(String, Type)], body: &Expr) -> Option<Type> {
        let mut scope = self.scope.clone();
        for (name, ty) in params {
            scope
                .locals
                .insert(name.clone(), (AnnotatedType::unqualified(ty.clone()), TypeUseLocation::Parameter));
        }
        let ty = self.factory.evaluate(body, None, &scope).ty;
        (ty != Type::Void).then_some(ty)
    }
}

fn literal_type(literal: &Literal) -> Type {
    match literal {
        Literal::Int(_) => Type::int(),
        Literal::Long(_) => Type::Primitive(PrimitiveKind::Long),
        Literal::Bool(_) => Type::boolean(),
        Literal::Char(_) => Type::Primitive(PrimitiveKind::Char),
        Literal::Str(_) => Type::string(),
        Literal::Null => Type::Null,
    }
}

/// Binary numeric promotion, unboxing wrapper operands
fn numeric_promotion(left: &Type, right: &Type) -> Type {
    let kind = |ty: &Type| match ty {
        Type::Primitive(kind) => Some(*kind),
        other => ClassTable::unbox(other),
    };
    let widest = [kind(left), kind(right)]
        .into_iter()
        .flatten()
        .max_by_key(|k| match k {
            PrimitiveKind::Double => 3,
            PrimitiveKind::Float => 2,
            PrimitiveKind::Long => 1,
            _ => 0,
        });
    match widest {
        Some(k @ (PrimitiveKind::Double | PrimitiveKind::Float | PrimitiveKind::Long)) => Type::Primitive(k),
        _ => Type::int(),
    }
}
