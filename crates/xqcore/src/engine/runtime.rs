use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;

use crate::compiler::optimizer::{BaselineOptimizer, Optimizer};
use crate::compiler::properties::Dependencies;
use crate::engine::collation::{CODEPOINT_URI, Collation, CollationRegistry};
use crate::engine::error::Error;
use crate::engine::functions::CoreFunctionLibrary;
use crate::model::XdmNode;
use crate::types::{BuiltinTypeHierarchy, ItemType, SequenceType, TypeHierarchy};
use crate::xdm::{ExpandedName, XdmItem, XdmSequence};

pub type Arity = usize;

/// Static description of a function, as seen by the type checker.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSignature {
    pub name: ExpandedName,
    pub params: Vec<SequenceType>,
    pub result: SequenceType,
    /// Parts of the dynamic context the function reads beyond its arguments.
    pub dependencies: Dependencies,
    /// The function constructs new nodes.
    pub creative: bool,
    /// Deterministic and context-free: calls with constant arguments may be folded.
    pub foldable: bool,
}

impl FunctionSignature {
    pub fn new(name: ExpandedName, params: Vec<SequenceType>, result: SequenceType) -> Self {
        Self { name, params, result, dependencies: Dependencies::empty(), creative: false, foldable: true }
    }

    pub fn arity(&self) -> Arity {
        self.params.len()
    }
}

#[derive(Debug, Clone)]
pub enum ResolveError {
    Unknown(ExpandedName),
    WrongArity { name: ExpandedName, available: Vec<Arity> },
}

impl ResolveError {
    /// `err:XPST0017` describing the failed lookup.
    pub fn into_error(self, arity: Arity) -> Error {
        let msg = match self {
            ResolveError::Unknown(name) => format!("unknown function {name}#{arity}"),
            ResolveError::WrongArity { name, available } => {
                let list: Vec<String> = available.iter().map(ToString::to_string).collect();
                format!("function {name} has no overload with {arity} arguments (available: {})", list.join(", "))
            }
        };
        Error::static_error(crate::engine::error::ErrorCode::XPST0017, msg)
    }
}

/// Compile-time function lookup.
pub trait FunctionResolver: Send + Sync + fmt::Debug {
    fn resolve(&self, name: &ExpandedName, arity: Arity) -> Result<Arc<FunctionSignature>, ResolveError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OptimizationLevel {
    /// Simplify and type-check only.
    None,
    #[default]
    Full,
}

#[derive(Debug, Clone)]
pub struct StaticContext {
    pub default_collation: Option<String>,
    /// XPath 1.0 compatibility mode.
    pub backwards_compatible: bool,
    pub optimization: OptimizationLevel,
    /// Log every optimizer rewrite at debug level.
    pub trace_optimizer: bool,
    /// Static type of the context item; `None` when no context item will be supplied.
    pub context_item_type: Option<ItemType>,
    pub optimizer: Arc<dyn Optimizer>,
    pub functions: Arc<dyn FunctionResolver>,
    pub type_hierarchy: Arc<dyn TypeHierarchy>,
    variables: Vec<(ExpandedName, SequenceType)>,
}

impl Default for StaticContext {
    fn default() -> Self {
        Self {
            default_collation: None,
            backwards_compatible: false,
            optimization: OptimizationLevel::Full,
            trace_optimizer: false,
            context_item_type: Some(ItemType::AnyItem),
            optimizer: Arc::new(BaselineOptimizer),
            functions: Arc::new(CoreFunctionLibrary),
            type_hierarchy: Arc::new(BuiltinTypeHierarchy),
            variables: Vec::new(),
        }
    }
}

impl StaticContext {
    /// Slot and declared type of an external variable.
    pub fn variable(&self, name: &ExpandedName) -> Option<(usize, SequenceType)> {
        self.variables.iter().position(|(n, _)| n == name).map(|slot| (slot, self.variables[slot].1))
    }

    pub fn variables(&self) -> &[(ExpandedName, SequenceType)] {
        &self.variables
    }

    pub fn type_hierarchy(&self) -> &dyn TypeHierarchy {
        self.type_hierarchy.as_ref()
    }
}

/// Builder for [`StaticContext`]. The context is captured by value when an expression
/// is compiled; later changes do not affect compiled expressions.
pub struct StaticContextBuilder {
    ctx: StaticContext,
}

impl Default for StaticContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticContextBuilder {
    pub fn new() -> Self {
        Self { ctx: StaticContext::default() }
    }

    #[must_use]
    pub fn with_default_collation(mut self, uri: impl Into<String>) -> Self {
        self.ctx.default_collation = Some(uri.into());
        self
    }

    #[must_use]
    pub fn with_backwards_compatible(mut self, on: bool) -> Self {
        self.ctx.backwards_compatible = on;
        self
    }

    #[must_use]
    pub fn with_optimization(mut self, level: OptimizationLevel) -> Self {
        self.ctx.optimization = level;
        self
    }

    #[must_use]
    pub fn with_optimizer_trace(mut self, on: bool) -> Self {
        self.ctx.trace_optimizer = on;
        self
    }

    #[must_use]
    pub fn with_context_item_type(mut self, t: Option<ItemType>) -> Self {
        self.ctx.context_item_type = t;
        self
    }

    #[must_use]
    pub fn with_optimizer(mut self, optimizer: Arc<dyn Optimizer>) -> Self {
        self.ctx.optimizer = optimizer;
        self
    }

    #[must_use]
    pub fn with_functions(mut self, resolver: Arc<dyn FunctionResolver>) -> Self {
        self.ctx.functions = resolver;
        self
    }

    #[must_use]
    pub fn with_type_hierarchy(mut self, th: Arc<dyn TypeHierarchy>) -> Self {
        self.ctx.type_hierarchy = th;
        self
    }

    /// Declares an external variable. Redeclaring a name replaces its type and keeps its slot.
    #[must_use]
    pub fn with_variable(mut self, name: impl Into<ExpandedName>, declared: SequenceType) -> Self {
        let name = name.into();
        if let Some(entry) = self.ctx.variables.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = declared;
        } else {
            self.ctx.variables.push((name, declared));
        }
        self
    }

    pub fn build(self) -> StaticContext {
        self.ctx
    }
}

pub struct CallCtx<'a, N> {
    pub dyn_ctx: &'a DynamicContext<N>,
    pub default_collation: Arc<dyn Collation>,
}

pub type FunctionImpl<N> =
    Arc<dyn Fn(&CallCtx<N>, &[XdmSequence<N>]) -> Result<XdmSequence<N>, Error> + Send + Sync>;

/// Runtime function implementations keyed by name and arity.
pub struct FunctionRegistry<N> {
    fns: HashMap<ExpandedName, Vec<(Arity, FunctionImpl<N>)>>,
}

impl<N> Default for FunctionRegistry<N> {
    fn default() -> Self {
        Self { fns: HashMap::new() }
    }
}

impl<N> FunctionRegistry<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: ExpandedName, arity: Arity, func: FunctionImpl<N>) {
        let overloads = self.fns.entry(name).or_default();
        overloads.retain(|(a, _)| *a != arity);
        overloads.push((arity, func));
        overloads.sort_by_key(|(a, _)| *a);
    }

    pub fn register_fn<F>(&mut self, name: ExpandedName, arity: Arity, f: F)
    where
        F: 'static + Send + Sync + Fn(&CallCtx<N>, &[XdmSequence<N>]) -> Result<XdmSequence<N>, Error>,
    {
        self.register(name, arity, Arc::new(f));
    }

    pub fn register_ns<F>(&mut self, ns_uri: &str, local: &str, arity: Arity, f: F)
    where
        F: 'static + Send + Sync + Fn(&CallCtx<N>, &[XdmSequence<N>]) -> Result<XdmSequence<N>, Error>,
    {
        self.register_fn(ExpandedName::new(Some(ns_uri.to_string()), local), arity, f);
    }

    pub fn resolve(&self, name: &ExpandedName, arity: Arity) -> Result<&FunctionImpl<N>, ResolveError> {
        let Some(overloads) = self.fns.get(name) else {
            return Err(ResolveError::Unknown(name.clone()));
        };
        overloads.iter().find(|(a, _)| *a == arity).map(|(_, f)| f).ok_or_else(|| ResolveError::WrongArity {
            name: name.clone(),
            available: overloads.iter().map(|(a, _)| *a).collect(),
        })
    }
}

#[derive(Clone)]
pub struct DynamicContext<N> {
    pub context_item: Option<XdmItem<N>>,
    pub variables: HashMap<ExpandedName, XdmSequence<N>>,
    pub functions: Arc<FunctionRegistry<N>>,
    pub collations: Arc<CollationRegistry>,
}

impl<N: XdmNode> Default for DynamicContext<N> {
    fn default() -> Self {
        Self {
            context_item: None,
            variables: HashMap::new(),
            functions: Arc::new(crate::engine::functions::default_function_registry::<N>()),
            collations: Arc::new(CollationRegistry::default()),
        }
    }
}

impl<N> DynamicContext<N> {
    pub fn collation(&self, uri: Option<&str>) -> Result<Arc<dyn Collation>, Error> {
        self.collations.resolve(uri.or(Some(CODEPOINT_URI)))
    }
}

pub struct DynamicContextBuilder<N> {
    ctx: DynamicContext<N>,
}

impl<N: XdmNode> Default for DynamicContextBuilder<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: XdmNode> DynamicContextBuilder<N> {
    pub fn new() -> Self {
        Self { ctx: DynamicContext::default() }
    }

    #[must_use]
    pub fn with_context_item(mut self, item: impl Into<XdmItem<N>>) -> Self {
        self.ctx.context_item = Some(item.into());
        self
    }

    #[must_use]
    pub fn with_context_node(mut self, node: N) -> Self {
        self.ctx.context_item = Some(XdmItem::Node(node));
        self
    }

    #[must_use]
    pub fn with_variable(mut self, name: impl Into<ExpandedName>, value: impl Into<XdmSequence<N>>) -> Self {
        self.ctx.variables.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_functions(mut self, reg: Arc<FunctionRegistry<N>>) -> Self {
        self.ctx.functions = reg;
        self
    }

    #[must_use]
    pub fn with_collations(mut self, reg: Arc<CollationRegistry>) -> Self {
        self.ctx.collations = reg;
        self
    }

    pub fn build(self) -> DynamicContext<N> {
        self.ctx
    }
}
