//! Error taxonomy and diagnostic records
//!
//! Errors fall into two groups:
//! - **Fatal**: [`ConfigError`] and [`InternalError`], wrapped by [`AnalysisError`].
//!   These abort the analysis run.
//! - **Local**: [`InferenceError`] and [`FlowExprError`]. These are turned into
//!   [`Diagnostic`] records tied to one expression and the analysis continues.

use crate::hir::{ExprId, Span};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Inconsistent qualifier hierarchy or invalid option, detected at startup
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("qualifier hierarchy `{hierarchy}` contains a subtyping cycle through `{qualifier}`")]
    CyclicHierarchy { hierarchy: String, qualifier: String },

    #[error("qualifier hierarchy `{hierarchy}` has no top qualifier")]
    MissingTop { hierarchy: String },

    #[error("qualifier hierarchy `{hierarchy}` has several top qualifiers: {tops:?}")]
    MultipleTops { hierarchy: String, tops: Vec<String> },

    #[error("qualifier hierarchy `{hierarchy}` has no bottom qualifier")]
    MissingBottom { hierarchy: String },

    #[error("qualifier hierarchy `{hierarchy}` has several bottom qualifiers: {bottoms:?}")]
    MultipleBottoms { hierarchy: String, bottoms: Vec<String> },

    #[error("qualifier hierarchy `{hierarchy}` is not a lattice: `{left}` and `{right}` have no unique {operation}")]
    NotALattice {
        hierarchy: String,
        left: String,
        right: String,
        operation: &'static str,
    },

    #[error("qualifier hierarchy `{hierarchy}` is inconsistent: {detail}")]
    Inconsistent { hierarchy: String, detail: String },

    #[error("qualifier `{qualifier}` is declared twice in `{hierarchy}`")]
    DuplicateQualifier { hierarchy: String, qualifier: String },

    #[error("qualifier `{qualifier}` referenced in `{hierarchy}` is not declared")]
    UnknownQualifier { hierarchy: String, qualifier: String },

    #[error("qualifier `{qualifier}` belongs to more than one hierarchy")]
    AmbiguousQualifier { qualifier: String },

    #[error("invalid value `{value}` for option `{name}`")]
    InvalidOption { name: String, value: String },

    #[error("cannot read analysis options: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Bug in the core itself, never a defect in the analysed program
#[derive(Debug, Error)]
pub enum InternalError {
    #[error("malformed control-flow graph: {0}")]
    MalformedCfg(String),

    #[error("unexpected {kind} in {context}")]
    UnexpectedNode { kind: String, context: String },
}

/// Fatal errors that abort the whole run
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Internal(#[from] InternalError),

    #[error("while analyzing `{method}`: {source}")]
    InMethod {
        method: String,
        #[source]
        source: Box<AnalysisError>,
    },
}

impl AnalysisError {
    /// Attach the enclosing method for diagnosis
    pub fn in_method(self, method: impl Into<String>) -> Self {
        AnalysisError::InMethod {
            method: method.into(),
            source: Box::new(self),
        }
    }
}

pub type Result<T, E = AnalysisError> = std::result::Result<T, E>;

/// Type-argument inference failed for one invocation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InferenceError {
    #[error("contradictory bounds for `{call}`: {constraint} is false")]
    FalseBound { call: String, constraint: String },

    #[error("inference variable `{variable}` of `{call}` has no proper bound")]
    Unresolved { call: String, variable: String },

    #[error("type-argument inference for `{call}` exceeded {limit} incorporation steps")]
    StepLimit { call: String, limit: usize },

    #[error("lambda argument of `{call}` targets non-functional type `{target}`")]
    NotFunctional { call: String, target: String },
}

impl InferenceError {
    pub fn call(&self) -> &str {
        match self {
            InferenceError::FalseBound { call, .. }
            | InferenceError::Unresolved { call, .. }
            | InferenceError::StepLimit { call, .. }
            | InferenceError::NotFunctional { call, .. } => call,
        }
    }
}

/// A flow-expression string in an annotation argument could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowExprError {
    #[error("cannot parse flow expression `{expression}`: {reason}")]
    Unparsable { expression: String, reason: String },

    #[error("parameter index #{index} is out of range (method has {arity} parameters)")]
    ParameterOutOfRange { index: usize, arity: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Structured failure record handed to the external reporter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Message key, e.g. `type.arguments.not.inferred`
    pub key: String,
    pub args: Vec<String>,
    pub expr: Option<ExprId>,
    pub span: Option<Span>,
    pub severity: Severity,
}

impl Diagnostic {
    pub const INFERENCE_FAILED: &'static str = "type.arguments.not.inferred";
    pub const FLOW_EXPR_PARSE: &'static str = "flowexpr.parse.error";

    pub fn error(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            args: Vec::new(),
            expr: None,
            span: None,
            severity: Severity::Error,
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn at(mut self, expr: ExprId, span: Option<Span>) -> Self {
        self.expr = Some(expr);
        self.span = span;
        self
    }

    pub fn from_inference(err: &InferenceError, expr: ExprId, span: Option<Span>) -> Self {
        Diagnostic::error(Self::INFERENCE_FAILED)
            .with_arg(err.call())
            .with_arg(err.to_string())
            .at(expr, span)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)?;
        if !self.args.is_empty() {
            write!(f, " [{}]", self.args.join(", "))?;
        }
        if let Some(span) = &self.span {
            write!(f, " at {}:{}", span.line, span.column)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_method_keeps_source() {
        let err = AnalysisError::from(InternalError::MalformedCfg("no entry".to_string())).in_method("Foo::bar");
        let text = err.to_string();
        assert!(text.contains("Foo::bar"));
        assert!(text.contains("no entry"));
    }

    #[test]
    fn test_diagnostic_from_inference() {
        let err = InferenceError::Unresolved {
            call: "identity".to_string(),
            variable: "T".to_string(),
        };
        let diag = Diagnostic::from_inference(&err, ExprId(7), None);
        assert_eq!(diag.key, Diagnostic::INFERENCE_FAILED);
        assert_eq!(diag.args[0], "identity");
        assert_eq!(diag.expr, Some(ExprId(7)));
    }

    #[test]
    fn test_diagnostic_serializes() {
        let diag = Diagnostic::error(Diagnostic::FLOW_EXPR_PARSE).with_arg("this.");
        let json = serde_json::to_string(&diag).unwrap();
        assert!(json.contains("flowexpr.parse.error"));
        assert!(json.contains("\"severity\":\"error\""));
    }
}
