//! # Qualflow Core
//!
//! Pluggable type-qualifier inference: qualifier lattices, flow-sensitive refinement over a
//! control-flow graph, and type-argument inference for generic invocations.
//!
//! ## Modules
//!
//! - **[`qualifier`]** - Qualifier lattices and the multi-hierarchy registry
//! - **[`hierarchies`]** - Nullness, same-length, less-than and key-for type systems
//! - **[`dataflow`]** - Receivers, stores, CFG construction and the fixpoint engine
//! - **[`infer`]** - Invocation type inference
//! - **[`factory`]** - The annotated type factory tying everything together
//!
//! ## Quick Start
//!
//! ```rust
//! use qualflow_core::prelude::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let factory = AnnotatedTypeFactory::standard(ClassTable::with_defaults(), AnalysisOptions::default())?;
//!
//! let use_site = Expr::local("s");
//! let method = MethodDecl::new(
//!     "m",
//!     vec![Param::new("s", AnnotatedType::unqualified(Type::string()).with(Qualifier::new("Nullable")))],
//!     AnnotatedType::unqualified(Type::Void),
//!     vec![Stmt::if_else(
//!         Expr::binary(BinOp::NotEq, Expr::local("s"), Expr::null()),
//!         vec![Stmt::Expr(use_site.clone())],
//!         vec![],
//!     )],
//! );
//! factory.analyze_method(&ClassDecl::new("C"), &method)?;
//!
//! let ty = factory.get_annotated_type(&use_site);
//! assert!(ty.has_qualifier(&Qualifier::new("NonNull")));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dataflow;
pub mod error;
pub mod factory;
pub mod hierarchies;
pub mod hir;
pub mod infer;
pub mod qualifier;
pub mod types;

use anyhow::Context;
use std::rc::Rc;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::AnalysisOptions;
    pub use crate::error::{AnalysisError, ConfigError, Diagnostic, InferenceError};
    pub use crate::factory::{AnnotatedTypeFactory, MethodAnalysis, TypeUseLocation};
    pub use crate::hir::{
        BinOp, ClassDecl, CompilationUnit, Expr, ExprKind, FieldSym, Literal, MethodDecl, MethodSig, Param, Purity,
        Stmt, TypeParam,
    };
    pub use crate::qualifier::{AnnotatedType, Qualifier, QualifierHierarchy};
    pub use crate::types::{ClassTable, Type};
}

pub use config::AnalysisOptions;
pub use error::{AnalysisError, ConfigError, Diagnostic, InferenceError, InternalError};
pub use factory::{AnnotatedTypeFactory, FactoryBuilder, MethodAnalysis};

/// Analyse every method of a compilation unit, stopping at the first fatal error
pub fn analyze_unit(factory: &AnnotatedTypeFactory, unit: &hir::CompilationUnit) -> anyhow::Result<Vec<Rc<MethodAnalysis>>> {
    let mut analyses = Vec::new();
    for class in &unit.classes {
        for method in &class.methods {
            let analysis = factory
                .analyze_method(class, method)
                .with_context(|| format!("failed to analyze {}::{}", class.name, method.name))?;
            analyses.push(analysis);
        }
    }
    tracing::debug!(methods = analyses.len(), "compilation unit analysed");
    Ok(analyses)
}
