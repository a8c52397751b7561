//! Compile pipeline: simplify, type check and optimize an expression tree, producing a
//! [`CompiledExpr`] that can be evaluated any number of times.

use std::sync::Arc;

use tracing::debug;

use crate::engine::error::{Error, Warning};
use crate::engine::evaluator::{EvalContext, SequenceSink};
use crate::engine::runtime::{DynamicContext, OptimizationLevel, StaticContext};
use crate::model::XdmNode;
use crate::types::SequenceType;
use crate::xdm::{XdmItem, XdmSequence, XdmSequenceStream};

mod arithmetic;
pub mod builder;
mod comparison;
pub mod explain;
mod filter;
pub mod ir;
pub mod optimizer;
mod promotion;
pub mod properties;
mod type_checker;
mod visitor;

use ir::{ExprArena, ExprId};
use visitor::ExpressionVisitor;

pub struct Compiler;

impl Compiler {
    /// Runs the compile passes over the tree rooted at `root`.
    ///
    /// Static errors abort compilation; static warnings are collected on the result.
    pub fn compile(mut arena: ExprArena, root: ExprId, ctx: &StaticContext) -> Result<CompiledExpr, Error> {
        let mut v = ExpressionVisitor::new(&mut arena, ctx);
        let root = v.simplify(root)?;
        v.arena.set_parent(root, None);
        let root = v.type_check(root, ctx.context_item_type)?;
        v.arena.set_parent(root, None);
        let root = match ctx.optimization {
            OptimizationLevel::Full => {
                let r = v.optimize(root)?;
                v.arena.set_parent(r, None);
                r
            }
            OptimizationLevel::None => root,
        };
        let warnings = v.into_warnings();
        debug!(
            root = %root,
            nodes = arena.len(),
            slots = arena.slot_count(),
            warnings = warnings.len(),
            "expression compiled"
        );
        Ok(CompiledExpr { arena: Arc::new(arena), root, static_ctx: Arc::new(ctx.clone()), warnings })
    }
}

/// A compiled, immutable expression. Cloning is cheap and clones share the tree.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    arena: Arc<ExprArena>,
    root: ExprId,
    static_ctx: Arc<StaticContext>,
    warnings: Vec<Warning>,
}

impl CompiledExpr {
    pub fn arena(&self) -> &ExprArena {
        &self.arena
    }

    pub fn root(&self) -> ExprId {
        self.root
    }

    pub fn static_context(&self) -> &StaticContext {
        &self.static_ctx
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn static_type(&self) -> SequenceType {
        SequenceType::new(
            self.arena.item_type(self.root, self.static_ctx.type_hierarchy()),
            self.arena.cardinality(self.root),
        )
    }

    pub fn explain(&self) -> String {
        explain::explain(&self.arena, self.root)
    }

    /// Runs the compile passes again over the compiled tree.
    pub fn recompile(&self) -> Result<CompiledExpr, Error> {
        Compiler::compile((*self.arena).clone(), self.root, &self.static_ctx)
    }

    fn eval_context<N: XdmNode>(&self, dynamic: &DynamicContext<N>) -> Result<EvalContext<N>, Error> {
        EvalContext::new(
            Arc::clone(&self.arena),
            dynamic,
            Arc::clone(&self.static_ctx.type_hierarchy),
            self.static_ctx.default_collation.as_deref(),
            self.static_ctx.variables(),
        )
    }

    pub fn evaluate<N: XdmNode>(&self, dynamic: &DynamicContext<N>) -> Result<XdmSequence<N>, Error> {
        self.eval_context(dynamic)?.materialize(self.root)
    }

    /// Lazily evaluates the expression; items are computed as the stream is pulled.
    pub fn evaluate_stream<N: XdmNode>(&self, dynamic: &DynamicContext<N>) -> Result<XdmSequenceStream<N>, Error> {
        Ok(XdmSequenceStream::new(self.eval_context(dynamic)?.iterate(self.root)?))
    }

    /// At most one item; `err:XPTY0004` if the result has more.
    pub fn evaluate_item<N: XdmNode>(&self, dynamic: &DynamicContext<N>) -> Result<Option<XdmItem<N>>, Error> {
        self.eval_context(dynamic)?.evaluate_item(self.root)
    }

    /// Pushes every result item into `sink`.
    pub fn process<N: XdmNode>(&self, dynamic: &DynamicContext<N>, sink: &mut dyn SequenceSink<N>) -> Result<(), Error> {
        self.eval_context(dynamic)?.process(self.root, sink)
    }
}
