//! Expression core of an XPath-style query engine.
//!
//! A front-end builds an expression tree in an [`ExprArena`] (see
//! [`compiler::builder::ExprBuilder`]), [`Compiler::compile`] simplifies, type checks and
//! optimizes it, and the resulting [`CompiledExpr`] is evaluated lazily against a
//! [`DynamicContext`].

pub mod compiler;
pub mod consts;
pub mod engine;
pub mod model;
pub mod types;
pub mod xdm;

pub use compiler::builder::ExprBuilder;
pub use compiler::ir::{ArithOp, ComparisonOp, ExprArena, ExprId, ExprKind, IdentityOp, Location};
pub use compiler::optimizer::{BaselineOptimizer, Indexability, Optimizer};
pub use compiler::{CompiledExpr, Compiler};
pub use engine::error::{Error, ErrorCode, Warning};
pub use engine::runtime::{
    DynamicContext, DynamicContextBuilder, OptimizationLevel, StaticContext, StaticContextBuilder,
};
pub use model::simple::{SimpleNode, SimpleNodeBuilder, attr, doc as simple_doc, elem, text};
pub use model::{NodeKind, QName, XdmNode};
pub use types::{AtomicType, Cardinality, ItemType, SequenceType};
pub use xdm::{ExpandedName, XdmAtomicValue, XdmItem, XdmSequence};
