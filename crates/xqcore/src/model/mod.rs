use core::cmp::Ordering;
use core::fmt;

use crate::engine::error::{Error, ErrorCode};
use crate::xdm::XdmAtomicValue;

pub mod simple;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Document,
    Element,
    Attribute,
    Text,
    Comment,
    ProcessingInstruction,
}

impl NodeKind {
    pub fn test_name(self) -> &'static str {
        match self {
            NodeKind::Document => "document-node",
            NodeKind::Element => "element",
            NodeKind::Attribute => "attribute",
            NodeKind::Text => "text",
            NodeKind::Comment => "comment",
            NodeKind::ProcessingInstruction => "processing-instruction",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    pub prefix: Option<String>,
    pub local: String,
    pub ns_uri: Option<String>,
}

/// Document order fallback based on ancestry and sibling order.
///
/// - If one node is an ancestor of the other, the ancestor precedes the descendant.
/// - Among siblings, attributes precede children; within each group the adapter's order
///   is kept.
/// - Nodes from different roots cannot be ordered: `err:FOER0000`. Adapters with
///   multi-root trees override [`XdmNode::compare_document_order`].
pub fn try_compare_by_ancestry<N: XdmNode>(a: &N, b: &N) -> Result<Ordering, Error> {
    if a == b {
        return Ok(Ordering::Equal);
    }
    fn path_to_root<N: XdmNode>(mut n: N) -> Vec<N> {
        let mut p = vec![n.clone()];
        while let Some(parent) = n.parent() {
            p.push(parent.clone());
            n = parent;
        }
        p.reverse();
        p
    }
    let pa = path_to_root(a.clone());
    let pb = path_to_root(b.clone());
    let len = pa.len().min(pb.len());
    let mut i = 0usize;
    while i < len && pa[i] == pb[i] {
        i += 1;
    }
    if i == len {
        return Ok(if pa.len() < pb.len() { Ordering::Less } else { Ordering::Greater });
    }
    if i == 0 {
        return Err(Error::from_code(
            ErrorCode::FOER0000,
            "document order requires adapter: nodes from different roots",
        ));
    }
    let parent = &pa[i - 1];
    let mut siblings = parent.attributes();
    siblings.extend(parent.children());
    let pos_a = siblings.iter().position(|n| n == &pa[i]);
    let pos_b = siblings.iter().position(|n| n == &pb[i]);
    Ok(match (pos_a, pos_b) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => Ordering::Equal,
    })
}

pub trait XdmNode: Clone + Eq + fmt::Debug + 'static {
    fn kind(&self) -> NodeKind;
    fn name(&self) -> Option<QName>;
    fn string_value(&self) -> String;

    /// Typed value used by atomization. Nodes without schema type information yield
    /// their string value as `xs:untypedAtomic`; comments and processing instructions
    /// yield `xs:string`.
    fn typed_value(&self) -> Vec<XdmAtomicValue> {
        match self.kind() {
            NodeKind::Comment | NodeKind::ProcessingInstruction => vec![XdmAtomicValue::String(self.string_value())],
            _ => vec![XdmAtomicValue::UntypedAtomic(self.string_value())],
        }
    }

    fn parent(&self) -> Option<Self>;
    fn children(&self) -> Vec<Self>;
    fn attributes(&self) -> Vec<Self>;

    fn compare_document_order(&self, other: &Self) -> Result<Ordering, Error> {
        try_compare_by_ancestry(self, other)
    }
}

/// Node type with no values. Used where an evaluation is known not to touch nodes,
/// such as folding constant subexpressions at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoNode {}

impl XdmNode for NoNode {
    fn kind(&self) -> NodeKind {
        match *self {}
    }
    fn name(&self) -> Option<QName> {
        match *self {}
    }
    fn string_value(&self) -> String {
        match *self {}
    }
    fn parent(&self) -> Option<Self> {
        match *self {}
    }
    fn children(&self) -> Vec<Self> {
        match *self {}
    }
    fn attributes(&self) -> Vec<Self> {
        match *self {}
    }
}
