//! Input tree consumed by the analysis
//!
//! The front end owns parsing and symbol resolution. What reaches this crate is an
//! already-resolved tree: method calls carry their signature, field accesses carry the
//! field declaration. The core only reads these trees.

use crate::qualifier::{AnnotatedType, Qualifier};
use crate::types::Type;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

static NEXT_EXPR_ID: AtomicU32 = AtomicU32::new(1);

/// Stable identity of a tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExprId(pub u32);

impl ExprId {
    pub fn fresh() -> Self {
        ExprId(NEXT_EXPR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Literal {
    Int(i64),
    Long(i64),
    Bool(bool),
    Char(char),
    Str(String),
    Null,
}

impl Literal {
    pub fn kind(&self) -> LiteralKind {
        match self {
            Literal::Int(_) => LiteralKind::Int,
            Literal::Long(_) => LiteralKind::Long,
            Literal::Bool(_) => LiteralKind::Bool,
            Literal::Char(_) => LiteralKind::Char,
            Literal::Str(_) => LiteralKind::Str,
            Literal::Null => LiteralKind::Null,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(v) => write!(f, "{}", v),
            Literal::Long(v) => write!(f, "{}L", v),
            Literal::Bool(v) => write!(f, "{}", v),
            Literal::Char(c) => write!(f, "'{}'", c),
            Literal::Str(s) => write!(f, "\"{}\"", s),
            Literal::Null => write!(f, "null"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LiteralKind {
    Int,
    Long,
    Bool,
    Char,
    Str,
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    And,
    Or,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::NotEq | BinOp::Lt | BinOp::LtE | BinOp::Gt | BinOp::GtE
        )
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Eq => "==",
            BinOp::NotEq => "!=",
            BinOp::Lt => "<",
            BinOp::LtE => "<=",
            BinOp::Gt => ">",
            BinOp::GtE => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// Side-effect and determinism facts about a method, as declared by the program
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Purity {
    pub side_effect_free: bool,
    pub deterministic: bool,
}

impl Purity {
    pub const PURE: Purity = Purity {
        side_effect_free: true,
        deterministic: true,
    };

    pub fn is_pure(&self) -> bool {
        self.side_effect_free && self.deterministic
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeParam {
    pub name: String,
    /// Declared upper bound; `None` means `Object`
    pub bound: Option<Type>,
}

impl TypeParam {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bound: None,
        }
    }

    pub fn bounded(name: impl Into<String>, bound: Type) -> Self {
        Self {
            name: name.into(),
            bound: Some(bound),
        }
    }
}

/// Resolved signature of an invoked method or constructor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSig {
    pub name: String,
    pub owner: String,
    pub type_params: Vec<TypeParam>,
    pub params: Vec<AnnotatedType>,
    pub ret: AnnotatedType,
    pub throws: Vec<String>,
    pub purity: Purity,
    pub is_static: bool,
}

impl MethodSig {
    pub fn new(owner: impl Into<String>, name: impl Into<String>, params: Vec<AnnotatedType>, ret: AnnotatedType) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            type_params: Vec::new(),
            params,
            ret,
            throws: Vec::new(),
            purity: Purity::default(),
            is_static: false,
        }
    }

    pub fn with_type_params(mut self, type_params: Vec<TypeParam>) -> Self {
        self.type_params = type_params;
        self
    }

    pub fn with_throws(mut self, exception: impl Into<String>) -> Self {
        self.throws.push(exception.into());
        self
    }

    pub fn with_purity(mut self, purity: Purity) -> Self {
        self.purity = purity;
        self
    }

    pub fn into_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn is_generic(&self) -> bool {
        !self.type_params.is_empty()
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.owner, self.name)
    }
}

/// Resolved field declaration referenced by a field access
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldSym {
    pub owner: String,
    pub name: String,
    pub ty: AnnotatedType,
    pub is_final: bool,
    pub is_static: bool,
}

impl FieldSym {
    pub fn new(owner: impl Into<String>, name: impl Into<String>, ty: AnnotatedType) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            ty,
            is_final: false,
            is_static: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Expr {
    pub id: ExprId,
    pub span: Option<Span>,
    pub kind: ExprKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExprKind {
    Literal(Literal),
    Local(String),
    This,
    ClassName(String),
    FieldAccess {
        base: Box<Expr>,
        field: Arc<FieldSym>,
    },
    ArrayLength(Box<Expr>),
    ArrayAccess {
        array: Box<Expr>,
        index: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    MethodCall {
        receiver: Option<Box<Expr>>,
        method: Arc<MethodSig>,
        args: Vec<Expr>,
        /// Explicit type arguments; empty means they must be inferred
        type_args: Vec<Type>,
    },
    NewObject {
        class: Type,
        ctor: Option<Arc<MethodSig>>,
        args: Vec<Expr>,
    },
    NewArray {
        element: Type,
        dims: Vec<Expr>,
    },
    Lambda {
        params: Vec<String>,
        body: Box<Expr>,
    },
    Conditional {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Self {
            id: ExprId::fresh(),
            span: None,
            kind,
        }
    }

    pub fn with_span(mut self, line: u32, column: u32) -> Self {
        self.span = Some(Span { line, column });
        self
    }

    pub fn literal(lit: Literal) -> Self {
        Self::new(ExprKind::Literal(lit))
    }

    pub fn int(value: i64) -> Self {
        Self::literal(Literal::Int(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::literal(Literal::Str(value.into()))
    }

    pub fn null() -> Self {
        Self::literal(Literal::Null)
    }

    pub fn local(name: impl Into<String>) -> Self {
        Self::new(ExprKind::Local(name.into()))
    }

    pub fn this() -> Self {
        Self::new(ExprKind::This)
    }

    pub fn class_name(name: impl Into<String>) -> Self {
        Self::new(ExprKind::ClassName(name.into()))
    }

    pub fn field(base: Expr, field: Arc<FieldSym>) -> Self {
        Self::new(ExprKind::FieldAccess {
            base: Box::new(base),
            field,
        })
    }

    pub fn array_length(array: Expr) -> Self {
        Self::new(ExprKind::ArrayLength(Box::new(array)))
    }

    pub fn array_access(array: Expr, index: Expr) -> Self {
        Self::new(ExprKind::ArrayAccess {
            array: Box::new(array),
            index: Box::new(index),
        })
    }

    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Self {
        Self::new(ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn not(operand: Expr) -> Self {
        Self::new(ExprKind::Unary {
            op: UnaryOp::Not,
            operand: Box::new(operand),
        })
    }

    pub fn call(receiver: Option<Expr>, method: Arc<MethodSig>, args: Vec<Expr>) -> Self {
        Self::new(ExprKind::MethodCall {
            receiver: receiver.map(Box::new),
            method,
            args,
            type_args: Vec::new(),
        })
    }

    pub fn new_object(class: Type, ctor: Option<Arc<MethodSig>>, args: Vec<Expr>) -> Self {
        Self::new(ExprKind::NewObject { class, ctor, args })
    }

    pub fn new_array(element: Type, dims: Vec<Expr>) -> Self {
        Self::new(ExprKind::NewArray { element, dims })
    }

    pub fn lambda(params: Vec<String>, body: Expr) -> Self {
        Self::new(ExprKind::Lambda {
            params,
            body: Box::new(body),
        })
    }

    /// Direct children in evaluation order
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Literal(_) | ExprKind::Local(_) | ExprKind::This | ExprKind::ClassName(_) => Vec::new(),
            ExprKind::FieldAccess { base, .. } => vec![base],
            ExprKind::ArrayLength(array) => vec![array],
            ExprKind::ArrayAccess { array, index } => vec![array, index],
            ExprKind::Binary { left, right, .. } => vec![left, right],
            ExprKind::Unary { operand, .. } => vec![operand],
            ExprKind::MethodCall { receiver, args, .. } => {
                let mut out: Vec<&Expr> = receiver.iter().map(|r| r.as_ref()).collect();
                out.extend(args.iter());
                out
            }
            ExprKind::NewObject { args, .. } => args.iter().collect(),
            ExprKind::NewArray { dims, .. } => dims.iter().collect(),
            // A lambda body is evaluated later, not where the lambda appears
            ExprKind::Lambda { .. } => Vec::new(),
            ExprKind::Conditional {
                cond,
                then_expr,
                else_expr,
            } => vec![cond, then_expr, else_expr],
        }
    }

    /// Pre-order walk over this expression and its evaluated sub-expressions
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Expr)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    pub exception: String,
    pub var: String,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    VarDecl {
        id: ExprId,
        name: String,
        ty: AnnotatedType,
        init: Option<Expr>,
    },
    Assign {
        id: ExprId,
        target: Expr,
        value: Expr,
    },
    Expr(Expr),
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    Return(Option<Expr>),
    Throw(Expr),
    Try {
        body: Vec<Stmt>,
        catches: Vec<CatchClause>,
    },
    Break,
    Continue,
}

impl Stmt {
    pub fn var(name: impl Into<String>, ty: AnnotatedType, init: Option<Expr>) -> Self {
        Stmt::VarDecl {
            id: ExprId::fresh(),
            name: name.into(),
            ty,
            init,
        }
    }

    pub fn assign(target: Expr, value: Expr) -> Self {
        Stmt::Assign {
            id: ExprId::fresh(),
            target,
            value,
        }
    }

    pub fn if_else(cond: Expr, then_body: Vec<Stmt>, else_body: Vec<Stmt>) -> Self {
        Stmt::If {
            cond,
            then_body,
            else_body,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: AnnotatedType,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: AnnotatedType) -> Self {
        Self { name: name.into(), ty }
    }
}

/// A precondition: the flow expression holds the qualifier on method entry
#[derive(Debug, Clone, PartialEq)]
pub struct Precondition {
    pub expression: String,
    pub qualifier: Qualifier,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: AnnotatedType,
    pub is_constructor: bool,
    pub is_static: bool,
    pub preconditions: Vec<Precondition>,
    pub body: Vec<Stmt>,
}

impl MethodDecl {
    pub fn new(name: impl Into<String>, params: Vec<Param>, ret: AnnotatedType, body: Vec<Stmt>) -> Self {
        Self {
            name: name.into(),
            params,
            ret,
            is_constructor: false,
            is_static: false,
            preconditions: Vec::new(),
            body,
        }
    }

    pub fn constructor(params: Vec<Param>, body: Vec<Stmt>) -> Self {
        let mut decl = Self::new("<init>", params, AnnotatedType::unqualified(Type::Void), body);
        decl.is_constructor = true;
        decl
    }

    pub fn with_precondition(mut self, expression: impl Into<String>, qualifier: Qualifier) -> Self {
        self.preconditions.push(Precondition {
            expression: expression.into(),
            qualifier,
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    pub name: String,
    pub type_params: Vec<String>,
    pub fields: Vec<Arc<FieldSym>>,
    pub methods: Vec<MethodDecl>,
}

impl ClassDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_params: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&Arc<FieldSym>> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompilationUnit {
    pub classes: Vec<ClassDecl>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_ids_are_unique() {
        let a = ExprId::fresh();
        let b = ExprId::fresh();
        assert_ne!(a, b);
    }

    #[test]
    fn test_walk_skips_lambda_body() {
        let body = Expr::local("x");
        let body_id = body.id;
        let lambda = Expr::lambda(vec!["x".to_string()], body);
        let mut seen = Vec::new();
        lambda.walk(&mut |e| seen.push(e.id));
        assert_eq!(seen, vec![lambda.id]);
        assert!(!seen.contains(&body_id));
    }

    #[test]
    fn test_walk_visits_call_receiver_first() {
        let sig = Arc::new(MethodSig::new(
            "List",
            "size",
            vec![],
            AnnotatedType::unqualified(Type::int()),
        ));
        let recv = Expr::local("xs");
        let recv_id = recv.id;
        let call = Expr::call(Some(recv), sig, vec![]);
        let mut seen = Vec::new();
        call.walk(&mut |e| seen.push(e.id));
        assert_eq!(seen, vec![call.id, recv_id]);
    }
}
