//! Control flow graph construction from method bodies

use crate::error::InternalError;
use crate::hir::{BinOp, CatchClause, Expr, ExprId, ExprKind, MethodDecl, Stmt, UnaryOp};
use crate::qualifier::AnnotatedType;
use crate::types::{ClassTable, Type};
use std::collections::{HashMap, HashSet};

/// Unique identifier for a basic block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

/// A straight-line step inside a basic block
#[derive(Debug, Clone)]
pub enum Node {
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
}

impl Node {
    pub fn id(&self) -> ExprId {
        match self {
            Node::VarDecl { id, .. } | Node::Assign { id, .. } => *id,
            Node::Expr(e) => e.id,
        }
    }

    /// Top-level expressions evaluated by this node
    pub fn expressions(&self) -> Vec<&Expr> {
        match self {
            Node::VarDecl { init, .. } => init.iter().collect(),
            Node::Assign { target, value, .. } => vec![target, value],
            Node::Expr(e) => vec![e],
        }
    }
}

/// How a basic block terminates
#[derive(Debug, Clone)]
pub enum Terminator {
    Goto(BlockId),
    Branch {
        condition: Expr,
        then_block: BlockId,
        else_block: BlockId,
    },
    /// Flows to the regular exit
    Return(Option<Expr>),
    Throw {
        exception: Expr,
        target: BlockId,
    },
    /// Only on the two exit blocks
    Exit,
}

/// Edge taken when a call inside the block throws a declared exception
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionalEdge {
    /// Index of the throwing node; `nodes.len()` means the branch condition
    pub node_index: usize,
    pub exception: String,
    pub target: BlockId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Regular,
    Then,
    Else,
    Exceptional,
}

/// A basic block in the CFG
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: BlockId,
    pub nodes: Vec<Node>,
    pub terminator: Terminator,
    pub exceptional: Vec<ExceptionalEdge>,
    pub predecessors: Vec<BlockId>,
}

impl BasicBlock {
    pub fn new(id: BlockId) -> Self {
        Self {
            id,
            nodes: Vec::new(),
            terminator: Terminator::Exit,
            exceptional: Vec::new(),
            predecessors: Vec::new(),
        }
    }

    /// Regular successors with the kind of edge leading to each
    pub fn regular_successors(&self, cfg: &Cfg) -> Vec<(BlockId, EdgeKind)> {
        match &self.terminator {
            Terminator::Goto(target) => vec![(*target, EdgeKind::Regular)],
            Terminator::Branch {
                then_block,
                else_block,
                ..
            } => vec![(*then_block, EdgeKind::Then), (*else_block, EdgeKind::Else)],
            Terminator::Return(_) => vec![(cfg.regular_exit, EdgeKind::Regular)],
            Terminator::Throw { target, .. } => vec![(*target, EdgeKind::Exceptional)],
            Terminator::Exit => Vec::new(),
        }
    }

    pub fn successors(&self, cfg: &Cfg) -> Vec<BlockId> {
        let mut out: Vec<BlockId> = self.regular_successors(cfg).into_iter().map(|(b, _)| b).collect();
        for edge in &self.exceptional {
            if !out.contains(&edge.target) {
                out.push(edge.target);
            }
        }
        out
    }
}

/// Control Flow Graph
#[derive(Debug, Clone)]
pub struct Cfg {
    pub blocks: Vec<BasicBlock>,
    pub entry: BlockId,
    pub regular_exit: BlockId,
    pub exceptional_exit: BlockId,
}

impl Cfg {
    pub fn new() -> Self {
        let mut cfg = Self {
            blocks: Vec::new(),
            entry: BlockId(0),
            regular_exit: BlockId(0),
            exceptional_exit: BlockId(0),
        };
        cfg.entry = cfg.new_block();
        cfg.regular_exit = cfg.new_block();
        cfg.exceptional_exit = cfg.new_block();
        cfg
    }

    pub fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(BasicBlock::new(id));
        id
    }

    pub fn block(&self, id: BlockId) -> Result<&BasicBlock, InternalError> {
        self.blocks
            .get(id.0)
            .ok_or_else(|| InternalError::MalformedCfg(format!("dangling block id {}", id.0)))
    }

    fn block_mut(&mut self, id: BlockId) -> Result<&mut BasicBlock, InternalError> {
        self.blocks
            .get_mut(id.0)
            .ok_or_else(|| InternalError::MalformedCfg(format!("dangling block id {}", id.0)))
    }

    pub fn set_terminator(&mut self, block: BlockId, terminator: Terminator) -> Result<(), InternalError> {
        self.block_mut(block)?.terminator = terminator;
        Ok(())
    }

    pub fn is_exit(&self, block: BlockId) -> bool {
        block == self.regular_exit || block == self.exceptional_exit
    }

    /// Check every edge target exists, then fill in predecessor lists
    pub fn link(&mut self) -> Result<(), InternalError> {
        let mut edges = Vec::new();
        for block in &self.blocks {
            if matches!(block.terminator, Terminator::Exit) && !self.is_exit(block.id) {
                return Err(InternalError::MalformedCfg(format!(
                    "block {} has no terminator",
                    block.id.0
                )));
            }
            for succ in block.successors(self) {
                if succ.0 >= self.blocks.len() {
                    return Err(InternalError::MalformedCfg(format!(
                        "block {} jumps to missing block {}",
                        block.id.0, succ.0
                    )));
                }
                edges.push((block.id, succ));
            }
        }
        for block in &mut self.blocks {
            block.predecessors.clear();
        }
        for (from, to) in edges {
            let preds = &mut self.blocks[to.0].predecessors;
            if !preds.contains(&from) {
                preds.push(from);
            }
        }
        Ok(())
    }

    /// Get blocks in reverse postorder (useful for forward dataflow)
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        let mut visited = HashSet::new();
        let mut postorder = Vec::new();
        self.dfs_postorder(self.entry, &mut visited, &mut postorder);
        postorder.reverse();
        postorder
    }

    fn dfs_postorder(&self, block: BlockId, visited: &mut HashSet<BlockId>, postorder: &mut Vec<BlockId>) {
        if !visited.insert(block) {
            return;
        }
        if let Some(b) = self.blocks.get(block.0) {
            for succ in b.successors(self) {
                self.dfs_postorder(succ, visited, postorder);
            }
        }
        postorder.push(block);
    }
}

impl Default for Cfg {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for constructing a CFG from a method body
pub struct CfgBuilder<'a> {
    classes: &'a ClassTable,
    cfg: Cfg,
    current_block: BlockId,
    loop_stack: Vec<LoopContext>,
    /// Innermost try block last; each frame lists its catch clauses in order
    handler_stack: Vec<Vec<(String, BlockId)>>,
    /// Declared types of parameters and locals seen so far, for `throw e`
    locals: HashMap<String, Type>,
}

struct LoopContext {
    continue_block: BlockId,
    break_block: BlockId,
}

impl<'a> CfgBuilder<'a> {
    pub fn new(classes: &'a ClassTable) -> Self {
        let cfg = Cfg::new();
        let entry = cfg.entry;
        Self {
            classes,
            cfg,
            current_block: entry,
            loop_stack: Vec::new(),
            handler_stack: Vec::new(),
            locals: HashMap::new(),
        }
    }

    pub fn build_method(mut self, method: &MethodDecl) -> Result<Cfg, InternalError> {
        for param in &method.params {
            self.locals.insert(param.name.clone(), param.ty.ty.clone());
        }
        self.build_body(&method.body)?;

        // Falling off the end is an implicit `return`
        if matches!(self.cfg.block(self.current_block)?.terminator, Terminator::Exit) {
            self.cfg.set_terminator(self.current_block, Terminator::Return(None))?;
        }

        self.cfg.link()?;
        tracing::trace!(method = %method.name, blocks = self.cfg.blocks.len(), "built control flow graph");
        Ok(self.cfg)
    }

    fn build_body(&mut self, stmts: &[Stmt]) -> Result<(), InternalError> {
        for stmt in stmts {
            self.build_stmt(stmt)?;
        }
        Ok(())
    }

    fn build_stmt(&mut self, stmt: &Stmt) -> Result<(), InternalError> {
        match stmt {
            Stmt::VarDecl { id, name, ty, init } => {
                self.locals.insert(name.clone(), ty.ty.clone());
                self.push_node(Node::VarDecl {
                    id: *id,
                    name: name.clone(),
                    ty: ty.clone(),
                    init: init.clone(),
                })
            }
            Stmt::Assign { id, target, value } => self.push_node(Node::Assign {
                id: *id,
                target: target.clone(),
                value: value.clone(),
            }),
            Stmt::Expr(expr) => self.push_node(Node::Expr(expr.clone())),
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => self.build_if(cond, then_body, else_body),
            Stmt::While { cond, body } => self.build_while(cond, body),
            Stmt::Return(value) => {
                self.cfg
                    .set_terminator(self.current_block, Terminator::Return(value.clone()))?;
                // Following statements land in an unreachable block
                self.current_block = self.cfg.new_block();
                Ok(())
            }
            Stmt::Throw(exception) => {
                let class = self.thrown_class(exception);
                let target = self.handler_for(&class);
                self.cfg.set_terminator(
                    self.current_block,
                    Terminator::Throw {
                        exception: exception.clone(),
                        target,
                    },
                )?;
                self.current_block = self.cfg.new_block();
                Ok(())
            }
            Stmt::Try { body, catches } => self.build_try(body, catches),
            Stmt::Break => {
                let target = self
                    .loop_stack
                    .last()
                    .map(|ctx| ctx.break_block)
                    .ok_or_else(|| InternalError::UnexpectedNode {
                        kind: "break".to_string(),
                        context: "a statement outside of any loop".to_string(),
                    })?;
                self.cfg.set_terminator(self.current_block, Terminator::Goto(target))?;
                self.current_block = self.cfg.new_block();
                Ok(())
            }
            Stmt::Continue => {
                let target = self
                    .loop_stack
                    .last()
                    .map(|ctx| ctx.continue_block)
                    .ok_or_else(|| InternalError::UnexpectedNode {
                        kind: "continue".to_string(),
                        context: "a statement outside of any loop".to_string(),
                    })?;
                self.cfg.set_terminator(self.current_block, Terminator::Goto(target))?;
                self.current_block = self.cfg.new_block();
                Ok(())
            }
        }
    }

    fn push_node(&mut self, node: Node) -> Result<(), InternalError> {
        let exceptions = declared_exceptions(&node.expressions());
        let index = self.cfg.block(self.current_block)?.nodes.len();
        self.add_exceptional_edges(index, exceptions)?;
        self.cfg.block_mut(self.current_block)?.nodes.push(node);
        Ok(())
    }

    fn add_exceptional_edges(&mut self, node_index: usize, exceptions: Vec<String>) -> Result<(), InternalError> {
        for exception in exceptions {
            let target = self.handler_for(&exception);
            let edge = ExceptionalEdge {
                node_index,
                exception,
                target,
            };
            let block = self.cfg.block_mut(self.current_block)?;
            if !block.exceptional.contains(&edge) {
                block.exceptional.push(edge);
            }
        }
        Ok(())
    }

    /// First enclosing catch clause whose type is a supertype of `exception`
    /// Static class of a thrown expression; unknown shapes are treated as `Throwable`
    fn thrown_class(&self, exception: &Expr) -> String {
        let static_type = match &exception.kind {
            ExprKind::NewObject { class, .. } => Some(class),
            ExprKind::Local(name) => self.locals.get(name),
            ExprKind::FieldAccess { field, .. } => Some(&field.ty.ty),
            ExprKind::MethodCall { method, .. } => Some(&method.ret.ty),
            _ => None,
        };
        static_type
            .and_then(Type::declared_name)
            .unwrap_or("Throwable")
            .to_string()
    }

    fn handler_for(&self, exception: &str) -> BlockId {
        for frame in self.handler_stack.iter().rev() {
            for (caught, block) in frame {
                if caught == exception || self.classes.is_subclass(exception, caught) {
                    return *block;
                }
            }
        }
        self.cfg.exceptional_exit
    }

    fn build_condition(&mut self, condition: &Expr, then_block: BlockId, else_block: BlockId) -> Result<(), InternalError> {
        match &condition.kind {
            ExprKind::Binary {
                op: BinOp::And,
                left,
                right,
            } => {
                let rhs = self.cfg.new_block();
                self.build_condition(left, rhs, else_block)?;
                self.current_block = rhs;
                self.build_condition(right, then_block, else_block)
            }
            ExprKind::Binary {
                op: BinOp::Or,
                left,
                right,
            } => {
                let rhs = self.cfg.new_block();
                self.build_condition(left, then_block, rhs)?;
                self.current_block = rhs;
                self.build_condition(right, then_block, else_block)
            }
            ExprKind::Unary {
                op: UnaryOp::Not,
                operand,
            } => self.build_condition(operand, else_block, then_block),
            _ => {
                let index = self.cfg.block(self.current_block)?.nodes.len();
                self.add_exceptional_edges(index, declared_exceptions(&[condition]))?;
                self.cfg.set_terminator(
                    self.current_block,
                    Terminator::Branch {
                        condition: condition.clone(),
                        then_block,
                        else_block,
                    },
                )
            }
        }
    }

    fn build_if(&mut self, condition: &Expr, then_body: &[Stmt], else_body: &[Stmt]) -> Result<(), InternalError> {
        let then_block = self.cfg.new_block();
        let else_block = self.cfg.new_block();
        let merge_block = self.cfg.new_block();

        self.build_condition(condition, then_block, else_block)?;

        self.current_block = then_block;
        self.build_body(then_body)?;
        self.cfg.set_terminator(self.current_block, Terminator::Goto(merge_block))?;

        self.current_block = else_block;
        self.build_body(else_body)?;
        self.cfg.set_terminator(self.current_block, Terminator::Goto(merge_block))?;

        self.current_block = merge_block;
        Ok(())
    }

    fn build_while(&mut self, condition: &Expr, body: &[Stmt]) -> Result<(), InternalError> {
        let header_block = self.cfg.new_block();
        let body_block = self.cfg.new_block();
        let exit_block = self.cfg.new_block();

        self.cfg.set_terminator(self.current_block, Terminator::Goto(header_block))?;

        self.current_block = header_block;
        self.build_condition(condition, body_block, exit_block)?;

        self.loop_stack.push(LoopContext {
            continue_block: header_block,
            break_block: exit_block,
        });
        self.current_block = body_block;
        self.build_body(body)?;
        // Back edge
        self.cfg.set_terminator(self.current_block, Terminator::Goto(header_block))?;
        self.loop_stack.pop();

        self.current_block = exit_block;
        Ok(())
    }

    fn build_try(&mut self, body: &[Stmt], catches: &[CatchClause]) -> Result<(), InternalError> {
        let merge_block = self.cfg.new_block();
        let frame: Vec<(String, BlockId)> = catches
            .iter()
            .map(|c| (c.exception.clone(), self.cfg.new_block()))
            .collect();

        self.handler_stack.push(frame.clone());
        self.build_body(body)?;
        self.handler_stack.pop();
        self.cfg.set_terminator(self.current_block, Terminator::Goto(merge_block))?;

        for (clause, (_, handler_block)) in catches.iter().zip(frame) {
            self.current_block = handler_block;
            self.locals.insert(clause.var.clone(), Type::class(clause.exception.clone()));
            self.push_node(Node::VarDecl {
                id: ExprId::fresh(),
                name: clause.var.clone(),
                ty: AnnotatedType::unqualified(Type::class(clause.exception.clone())),
                init: None,
            })?;
            self.build_body(&clause.body)?;
            self.cfg.set_terminator(self.current_block, Terminator::Goto(merge_block))?;
        }

        self.current_block = merge_block;
        Ok(())
    }
}

/// Exceptions declared by calls evaluated in these expressions
fn declared_exceptions(exprs: &[&Expr]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for expr in exprs {
        expr.walk(&mut |e| {
            let throws: &[String] = match &e.kind {
                ExprKind::MethodCall { method, .. } => method.throws.as_slice(),
                ExprKind::NewObject { ctor: Some(ctor), .. } => ctor.throws.as_slice(),
                _ => &[],
            };
            for t in throws {
                if !out.contains(t) {
                    out.push(t.clone());
                }
            }
        });
    }
    out
}
