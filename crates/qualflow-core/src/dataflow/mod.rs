//! Flow-sensitive qualifier refinement
//!
//! This module implements the intraprocedural dataflow framework:
//! - Control Flow Graph (CFG) construction from method bodies
//! - Receivers: the expressions a store may track
//! - Stores mapping receivers to refined qualifiers, with merge and widening
//! - Transfer functions and pluggable refinement rules
//! - Worklist-based forward fixpoint solver

mod analysis;
mod cfg;
pub mod receiver;
pub mod refinement;
mod store;
mod transfer;

pub use analysis::{AnalysisResult, ForwardAnalysis};
pub use cfg::{BasicBlock, BlockId, Cfg, CfgBuilder, EdgeKind, ExceptionalEdge, Node, Terminator};
pub use receiver::{FlowExprContext, Receiver};
pub use refinement::{BranchStores, RefinementHandler, RefinementRegistry};
pub use store::{AbstractValue, Store};
pub use transfer::{ExpressionEvaluator, Outcome, QualifierTransfer, TransferFunction, TransferResult};
