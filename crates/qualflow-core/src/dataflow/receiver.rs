//! Canonical reference expressions used as store keys
//!
//! A [`Receiver`] is built either from a tree ([`Receiver::from_expr`]) or from a flow
//! expression string written in an annotation argument ([`Receiver::parse`]). Both routes
//! produce the same value for the same expression, and `Display` renders the canonical
//! string that qualifier arguments refer to.

use crate::error::FlowExprError;
use crate::hir::{Expr, ExprKind};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Receiver {
    Local(String),
    This,
    ClassName(String),
    Field { base: Box<Receiver>, field: String },
    ArrayLength(Box<Receiver>),
    ArrayAccess { array: Box<Receiver>, index: Box<Receiver> },
    /// Call of a deterministic method; other calls canonicalize to `Unknown`
    MethodCall {
        receiver: Box<Receiver>,
        method: String,
        args: Vec<Receiver>,
    },
    Literal(String),
    Unknown,
}

impl Receiver {
    pub fn local(name: impl Into<String>) -> Self {
        Receiver::Local(name.into())
    }

    pub fn field(base: Receiver, field: impl Into<String>) -> Self {
        Receiver::Field {
            base: Box::new(base),
            field: field.into(),
        }
    }

    pub fn this_field(field: impl Into<String>) -> Self {
        Self::field(Receiver::This, field)
    }

    pub fn array_length(array: Receiver) -> Self {
        Receiver::ArrayLength(Box::new(array))
    }

    /// Canonicalize a tree; anything not purely syntactic becomes `Unknown`
    pub fn from_expr(expr: &Expr) -> Receiver {
        let receiver = match &expr.kind {
            ExprKind::Literal(lit) => Receiver::Literal(lit.to_string()),
            ExprKind::Local(name) => Receiver::Local(name.clone()),
            ExprKind::This => Receiver::This,
            ExprKind::ClassName(name) => Receiver::ClassName(name.clone()),
            ExprKind::FieldAccess { base, field } => {
                let base = if field.is_static {
                    Receiver::ClassName(field.owner.clone())
                } else {
                    Receiver::from_expr(base)
                };
                Receiver::field(base, field.name.clone())
            }
            ExprKind::ArrayLength(array) => Receiver::array_length(Receiver::from_expr(array)),
            ExprKind::ArrayAccess { array, index } => Receiver::ArrayAccess {
                array: Box::new(Receiver::from_expr(array)),
                index: Box::new(Receiver::from_expr(index)),
            },
            ExprKind::MethodCall {
                receiver,
                method,
                args,
                ..
            } if method.purity.deterministic => {
                let target = match receiver {
                    Some(r) => Receiver::from_expr(r),
                    None if method.is_static => Receiver::ClassName(method.owner.clone()),
                    None => Receiver::This,
                };
                Receiver::MethodCall {
                    receiver: Box::new(target),
                    method: method.name.clone(),
                    args: args.iter().map(Receiver::from_expr).collect(),
                }
            }
            _ => Receiver::Unknown,
        };
        if receiver.contains_unknown() {
            Receiver::Unknown
        } else {
            receiver
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Receiver::Unknown)
    }

    pub fn contains_unknown(&self) -> bool {
        self.any_part(&|r| r.is_unknown())
    }

    /// Whether a method or another thread can change the value without a local assignment
    pub fn is_assignable_by_other_code(&self) -> bool {
        match self {
            Receiver::Local(_) | Receiver::This | Receiver::ClassName(_) | Receiver::Literal(_) => false,
            Receiver::ArrayLength(array) => array.is_assignable_by_other_code(),
            Receiver::Field { .. } | Receiver::ArrayAccess { .. } | Receiver::MethodCall { .. } => true,
            Receiver::Unknown => true,
        }
    }

    pub fn is_method_call(&self) -> bool {
        matches!(self, Receiver::MethodCall { .. })
    }

    /// `self` or any sub-receiver satisfies `pred`
    pub fn any_part(&self, pred: &dyn Fn(&Receiver) -> bool) -> bool {
        if pred(self) {
            return true;
        }
        match self {
            Receiver::Field { base, .. } => base.any_part(pred),
            Receiver::ArrayLength(array) => array.any_part(pred),
            Receiver::ArrayAccess { array, index } => array.any_part(pred) || index.any_part(pred),
            Receiver::MethodCall { receiver, args, .. } => {
                receiver.any_part(pred) || args.iter().any(|a| a.any_part(pred))
            }
            _ => false,
        }
    }

    pub fn contains(&self, other: &Receiver) -> bool {
        self.any_part(&|r| r == other)
    }

    pub fn mentions_local(&self, name: &str) -> bool {
        self.any_part(&|r| matches!(r, Receiver::Local(n) if n == name))
    }

    /// Contains an access to a field with this name, through any base
    pub fn may_alias_field(&self, field_name: &str) -> bool {
        self.any_part(&|r| matches!(r, Receiver::Field { field, .. } if field == field_name))
    }

    pub fn contains_array_access(&self) -> bool {
        self.any_part(&|r| matches!(r, Receiver::ArrayAccess { .. }))
    }

    pub fn contains_method_call(&self) -> bool {
        self.any_part(&|r| r.is_method_call())
    }

    /// Parse a flow expression written in an annotation argument
    pub fn parse(source: &str, context: &FlowExprContext) -> Result<Receiver, FlowExprError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            source,
            tokens,
            pos: 0,
            context,
        };
        let receiver = parser.expression()?;
        if parser.pos != parser.tokens.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(receiver)
    }
}

impl fmt::Display for Receiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Receiver::Local(name) => write!(f, "{}", name),
            Receiver::This => write!(f, "this"),
            Receiver::ClassName(name) => write!(f, "{}", name),
            Receiver::Field { base, field } => write!(f, "{}.{}", base, field),
            Receiver::ArrayLength(array) => write!(f, "{}.length", array),
            Receiver::ArrayAccess { array, index } => write!(f, "{}[{}]", array, index),
            Receiver::MethodCall { receiver, method, args } => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}.{}({})", receiver, method, args.join(", "))
            }
            Receiver::Literal(text) => write!(f, "{}", text),
            Receiver::Unknown => write!(f, "?"),
        }
    }
}

/// Names visible to a flow expression: the method's parameters and the class's fields
#[derive(Debug, Clone, Default)]
pub struct FlowExprContext {
    pub params: Vec<String>,
    pub locals: Vec<String>,
    pub fields: Vec<String>,
}

impl FlowExprContext {
    pub fn new(params: Vec<String>, fields: Vec<String>) -> Self {
        Self {
            params,
            locals: Vec::new(),
            fields,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Number(String),
    Param(usize),
    Str(String),
    Ident(String),
    Punct(char),
}

static TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*(?:(?P<num>-?\d+L?)|#(?P<param>\d+)|(?P<str>"(?:[^"\\]|\\.)*")|(?P<ident>[A-Za-z_$][A-Za-z0-9_$]*)|(?P<punct>[.\[\](),]))"#)
        .expect("flow expression token regex")
});

fn tokenize(source: &str) -> Result<Vec<Token>, FlowExprError> {
    let mut tokens = Vec::new();
    let mut rest = source;
    while !rest.trim_start().is_empty() {
        let Some(caps) = TOKEN.captures(rest) else {
            return Err(FlowExprError::Unparsable {
                expression: source.to_string(),
                reason: format!("unexpected character at `{}`", rest.trim_start()),
            });
        };
        let token = if let Some(m) = caps.name("num") {
            Token::Number(m.as_str().to_string())
        } else if let Some(m) = caps.name("param") {
            let index = m.as_str().parse().map_err(|_| FlowExprError::Unparsable {
                expression: source.to_string(),
                reason: "parameter index too large".to_string(),
            })?;
            Token::Param(index)
        } else if let Some(m) = caps.name("str") {
            Token::Str(m.as_str().to_string())
        } else if let Some(m) = caps.name("ident") {
            Token::Ident(m.as_str().to_string())
        } else {
            let c = caps.name("punct").and_then(|m| m.as_str().chars().next()).unwrap_or(' ');
            Token::Punct(c)
        };
        tokens.push(token);
        rest = &rest[caps.get(0).map_or(rest.len(), |m| m.end())..];
    }
    Ok(tokens)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    context: &'a FlowExprContext,
}

impl Parser<'_> {
    fn error(&self, reason: &str) -> FlowExprError {
        FlowExprError::Unparsable {
            expression: self.source.to_string(),
            reason: reason.to_string(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(&Token::Punct(c)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<(), FlowExprError> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.error(&format!("expected `{}`", c)))
        }
    }

    fn expression(&mut self) -> Result<Receiver, FlowExprError> {
        let mut current = self.primary()?;
        loop {
            if self.eat('.') {
                let Some(Token::Ident(name)) = self.next() else {
                    return Err(self.error("expected identifier after `.`"));
                };
                if self.eat('(') {
                    let args = self.arguments()?;
                    current = Receiver::MethodCall {
                        receiver: Box::new(current),
                        method: name,
                        args,
                    };
                } else if name == "length" {
                    current = Receiver::array_length(current);
                } else {
                    current = Receiver::field(current, name);
                }
            } else if self.eat('[') {
                let index = self.expression()?;
                self.expect(']')?;
                current = Receiver::ArrayAccess {
                    array: Box::new(current),
                    index: Box::new(index),
                };
            } else {
                return Ok(current);
            }
        }
    }

    fn arguments(&mut self) -> Result<Vec<Receiver>, FlowExprError> {
        let mut args = Vec::new();
        if self.eat(')') {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.eat(')') {
                return Ok(args);
            }
            self.expect(',')?;
        }
    }

    fn primary(&mut self) -> Result<Receiver, FlowExprError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Receiver::Literal(n)),
            Some(Token::Str(s)) => Ok(Receiver::Literal(s)),
            Some(Token::Param(index)) => {
                let arity = self.context.params.len();
                if index == 0 || index > arity {
                    return Err(FlowExprError::ParameterOutOfRange { index, arity });
                }
                Ok(Receiver::Local(self.context.params[index - 1].clone()))
            }
            Some(Token::Ident(name)) => Ok(match name.as_str() {
                "this" => Receiver::This,
                "null" | "true" | "false" => Receiver::Literal(name),
                _ if self.peek() == Some(&Token::Punct('(')) => {
                    self.pos += 1;
                    let args = self.arguments()?;
                    Receiver::MethodCall {
                        receiver: Box::new(Receiver::This),
                        method: name,
                        args,
                    }
                }
                _ if self.context.params.contains(&name) || self.context.locals.contains(&name) => {
                    Receiver::Local(name)
                }
                _ if self.context.fields.contains(&name) => Receiver::this_field(name),
                _ if name.starts_with(char::is_uppercase) => Receiver::ClassName(name),
                _ => Receiver::Local(name),
            }),
            Some(Token::Punct('(')) => {
                let inner = self.expression()?;
                self.expect(')')?;
                Ok(inner)
            }
            _ => Err(self.error("expected an expression")),
        }
    }
}
