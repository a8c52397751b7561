//! Cursor implementations used by the evaluator.
//!
//! Windowing cursors ([`tail`], [`slice`]) discard leading items while they are being
//! constructed and report positions relative to the window. Over grounded input they
//! return an O(1) view instead.

use std::collections::VecDeque;
use std::rc::Rc;

use crate::compiler::ir::{ExprId, RoleLocator};
use crate::compiler::properties::Dependencies;
use crate::engine::error::Error;
use crate::engine::evaluator::convert::atomize_item;
use crate::engine::evaluator::{EvalContext, Focus, LastPosition};
use crate::model::XdmNode;
use crate::types::Cardinality;
use crate::xdm::{CursorProperties, EmptyCursor, SequenceCursor, XdmAtomicValue, XdmItem, XdmItemResult};

/// Advances `upstream` by `n` items. Returns the error that stopped it, if any.
fn skip<N>(upstream: &mut dyn SequenceCursor<N>, n: usize) -> Option<Error> {
    for _ in 0..n {
        match upstream.next_item() {
            None => return None,
            Some(Err(e)) => return Some(e),
            Some(Ok(_)) => {}
        }
    }
    None
}

/// Items of `upstream` from 1-based position `start` onwards.
pub(crate) fn tail<N: Clone + 'static>(upstream: Box<dyn SequenceCursor<N>>, start: usize) -> Box<dyn SequenceCursor<N>> {
    if start <= 1 {
        return upstream;
    }
    if let Some(g) = upstream.grounded() {
        return g.slice(start - 1, g.len()).cursor();
    }
    Box::new(TailCursor::new(upstream, start))
}

/// Items of `upstream` at 1-based positions `low..=high`.
pub(crate) fn slice<N: Clone + 'static>(
    mut upstream: Box<dyn SequenceCursor<N>>,
    low: usize,
    high: usize,
) -> Box<dyn SequenceCursor<N>> {
    let low = low.max(1);
    if high < low {
        upstream.close();
        return Box::new(EmptyCursor::new());
    }
    if let Some(g) = upstream.grounded() {
        return g.slice(low - 1, high).cursor();
    }
    Box::new(SliceCursor::new(upstream, low, high))
}

pub(crate) struct TailCursor<N> {
    upstream: Box<dyn SequenceCursor<N>>,
    start: usize,
    pending: Option<Error>,
    position: usize,
}

impl<N: Clone + 'static> TailCursor<N> {
    fn new(mut upstream: Box<dyn SequenceCursor<N>>, start: usize) -> Self {
        let pending = skip(upstream.as_mut(), start - 1);
        Self { upstream, start, pending, position: 0 }
    }
}

impl<N: Clone + 'static> SequenceCursor<N> for TailCursor<N> {
    fn next_item(&mut self) -> Option<XdmItemResult<N>> {
        if let Some(e) = self.pending.take() {
            return Some(Err(e));
        }
        let item = self.upstream.next_item()?;
        if item.is_ok() {
            self.position += 1;
        }
        Some(item)
    }

    fn position(&self) -> usize {
        self.position
    }

    fn fork(&self) -> Box<dyn SequenceCursor<N>> {
        Box::new(TailCursor::new(self.upstream.fork(), self.start))
    }

    fn properties(&self) -> CursorProperties {
        self.upstream.properties() & (CursorProperties::LOOKAHEAD | CursorProperties::LAST_POSITION_FINDER)
    }

    fn has_next(&self) -> bool {
        self.pending.is_some() || self.upstream.has_next()
    }

    fn last_position(&mut self) -> Result<usize, Error> {
        if self.upstream.properties().contains(CursorProperties::LAST_POSITION_FINDER) {
            return Ok(self.upstream.last_position()?.saturating_sub(self.start - 1));
        }
        let mut fork = self.fork();
        let mut n = 0;
        while let Some(item) = fork.next_item() {
            item?;
            n += 1;
        }
        Ok(n)
    }

    fn close(&mut self) {
        self.pending = None;
        self.upstream.close();
    }
}

pub(crate) struct SliceCursor<N> {
    upstream: Box<dyn SequenceCursor<N>>,
    low: usize,
    high: usize,
    pending: Option<Error>,
    position: usize,
}

impl<N: Clone + 'static> SliceCursor<N> {
    fn new(mut upstream: Box<dyn SequenceCursor<N>>, low: usize, high: usize) -> Self {
        let pending = skip(upstream.as_mut(), low - 1);
        Self { upstream, low, high, pending, position: 0 }
    }

    fn width(&self) -> usize {
        self.high - self.low + 1
    }
}

impl<N: Clone + 'static> SequenceCursor<N> for SliceCursor<N> {
    fn next_item(&mut self) -> Option<XdmItemResult<N>> {
        if let Some(e) = self.pending.take() {
            return Some(Err(e));
        }
        if self.position >= self.width() {
            self.upstream.close();
            return None;
        }
        let item = self.upstream.next_item()?;
        if item.is_ok() {
            self.position += 1;
        }
        Some(item)
    }

    fn position(&self) -> usize {
        self.position
    }

    fn fork(&self) -> Box<dyn SequenceCursor<N>> {
        Box::new(SliceCursor::new(self.upstream.fork(), self.low, self.high))
    }

    fn properties(&self) -> CursorProperties {
        self.upstream.properties() & CursorProperties::LAST_POSITION_FINDER
    }

    fn last_position(&mut self) -> Result<usize, Error> {
        if self.upstream.properties().contains(CursorProperties::LAST_POSITION_FINDER) {
            let len = self.upstream.last_position()?;
            return Ok(len.min(self.high).saturating_sub(self.low - 1));
        }
        let mut fork = self.fork();
        let mut n = 0;
        while let Some(item) = fork.next_item() {
            item?;
            n += 1;
        }
        Ok(n)
    }

    fn close(&mut self) {
        self.pending = None;
        self.position = self.width();
        self.upstream.close();
    }
}

/// `start to end` over integers, both ends inclusive.
pub(crate) struct RangeCursor {
    start: i64,
    end: i64,
    next: Option<i64>,
    position: usize,
}

impl RangeCursor {
    pub(crate) fn new(start: i64, end: i64) -> Self {
        Self { start, end, next: (start <= end).then_some(start), position: 0 }
    }

    fn len(&self) -> usize {
        if self.start > self.end {
            0
        } else {
            usize::try_from(i128::from(self.end) - i128::from(self.start) + 1).unwrap_or(usize::MAX)
        }
    }
}

impl<N: 'static> SequenceCursor<N> for RangeCursor {
    fn next_item(&mut self) -> Option<XdmItemResult<N>> {
        let v = self.next?;
        self.next = if v < self.end { Some(v + 1) } else { None };
        self.position += 1;
        Some(Ok(XdmItem::Atomic(XdmAtomicValue::Integer(v))))
    }

    fn position(&self) -> usize {
        self.position
    }

    fn fork(&self) -> Box<dyn SequenceCursor<N>> {
        Box::new(RangeCursor::new(self.start, self.end))
    }

    fn properties(&self) -> CursorProperties {
        CursorProperties::LOOKAHEAD | CursorProperties::LAST_POSITION_FINDER
    }

    fn has_next(&self) -> bool {
        self.next.is_some()
    }

    fn last_position(&mut self) -> Result<usize, Error> {
        Ok(self.len())
    }

    fn close(&mut self) {
        self.next = None;
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rest = self.len().saturating_sub(self.position);
        (rest, Some(rest))
    }
}

/// Concatenation of the results of several expressions, each evaluated on demand.
pub(crate) struct ConcatCursor<N> {
    ctx: EvalContext<N>,
    parts: Rc<[ExprId]>,
    index: usize,
    current: Option<Box<dyn SequenceCursor<N>>>,
    position: usize,
}

impl<N: XdmNode> ConcatCursor<N> {
    pub(crate) fn new(ctx: EvalContext<N>, parts: Rc<[ExprId]>) -> Self {
        Self { ctx, parts, index: 0, current: None, position: 0 }
    }
}

impl<N: XdmNode> SequenceCursor<N> for ConcatCursor<N> {
    fn next_item(&mut self) -> Option<XdmItemResult<N>> {
        loop {
            if let Some(current) = self.current.as_mut() {
                if let Some(item) = current.next_item() {
                    if item.is_ok() {
                        self.position += 1;
                    }
                    return Some(item);
                }
                self.current = None;
            }
            let id = *self.parts.get(self.index)?;
            self.index += 1;
            match self.ctx.iterate(id) {
                Ok(c) => self.current = Some(c),
                Err(e) => {
                    self.index = self.parts.len();
                    return Some(Err(e));
                }
            }
        }
    }

    fn position(&self) -> usize {
        self.position
    }

    fn fork(&self) -> Box<dyn SequenceCursor<N>> {
        Box::new(ConcatCursor::new(self.ctx.clone(), Rc::clone(&self.parts)))
    }

    fn close(&mut self) {
        if let Some(mut c) = self.current.take() {
            c.close();
        }
        self.index = self.parts.len();
    }
}

pub(crate) type ItemMapper<N> = Rc<dyn Fn(XdmItem<N>) -> Result<XdmItem<N>, Error>>;

/// One-to-one item mapping; used by the conversion and item-type guards.
pub(crate) struct MapCursor<N> {
    upstream: Box<dyn SequenceCursor<N>>,
    f: ItemMapper<N>,
    position: usize,
}

impl<N> MapCursor<N> {
    pub(crate) fn new(upstream: Box<dyn SequenceCursor<N>>, f: ItemMapper<N>) -> Self {
        Self { upstream, f, position: 0 }
    }
}

impl<N: 'static> SequenceCursor<N> for MapCursor<N> {
    fn next_item(&mut self) -> Option<XdmItemResult<N>> {
        let item = match self.upstream.next_item()? {
            Ok(item) => item,
            Err(e) => return Some(Err(e)),
        };
        let mapped = (self.f)(item);
        if mapped.is_ok() {
            self.position += 1;
        }
        Some(mapped)
    }

    fn position(&self) -> usize {
        self.position
    }

    fn fork(&self) -> Box<dyn SequenceCursor<N>> {
        Box::new(MapCursor::new(self.upstream.fork(), Rc::clone(&self.f)))
    }

    fn properties(&self) -> CursorProperties {
        self.upstream.properties() & (CursorProperties::LOOKAHEAD | CursorProperties::LAST_POSITION_FINDER)
    }

    fn has_next(&self) -> bool {
        self.upstream.has_next()
    }

    fn last_position(&mut self) -> Result<usize, Error> {
        self.upstream.last_position()
    }

    fn close(&mut self) {
        self.upstream.close();
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.upstream.size_hint()
    }
}

pub(crate) struct AtomizeCursor<N> {
    upstream: Box<dyn SequenceCursor<N>>,
    pending: VecDeque<XdmAtomicValue>,
    position: usize,
}

impl<N: XdmNode> AtomizeCursor<N> {
    pub(crate) fn new(upstream: Box<dyn SequenceCursor<N>>) -> Self {
        Self { upstream, pending: VecDeque::new(), position: 0 }
    }
}

impl<N: XdmNode> SequenceCursor<N> for AtomizeCursor<N> {
    fn next_item(&mut self) -> Option<XdmItemResult<N>> {
        loop {
            if let Some(v) = self.pending.pop_front() {
                self.position += 1;
                return Some(Ok(XdmItem::Atomic(v)));
            }
            match self.upstream.next_item()? {
                Ok(XdmItem::Atomic(v)) => {
                    self.position += 1;
                    return Some(Ok(XdmItem::Atomic(v)));
                }
                Ok(node) => self.pending.extend(atomize_item(node)),
                Err(e) => return Some(Err(e)),
            }
        }
    }

    fn position(&self) -> usize {
        self.position
    }

    fn fork(&self) -> Box<dyn SequenceCursor<N>> {
        Box::new(AtomizeCursor::new(self.upstream.fork()))
    }

    fn close(&mut self) {
        self.pending.clear();
        self.upstream.close();
    }
}

/// Passes items through and fails as soon as the count leaves `required`.
pub(crate) struct CardinalityCheckCursor<N> {
    upstream: Box<dyn SequenceCursor<N>>,
    required: Cardinality,
    role: Rc<RoleLocator>,
    position: usize,
    finished: bool,
}

impl<N> CardinalityCheckCursor<N> {
    pub(crate) fn new(upstream: Box<dyn SequenceCursor<N>>, required: Cardinality, role: Rc<RoleLocator>) -> Self {
        Self { upstream, required, role, position: 0, finished: false }
    }
}

impl<N: 'static> SequenceCursor<N> for CardinalityCheckCursor<N> {
    fn next_item(&mut self) -> Option<XdmItemResult<N>> {
        if self.finished {
            return None;
        }
        match self.upstream.next_item() {
            Some(Ok(item)) => {
                self.position += 1;
                if self.position == 2 && !self.required.allows_many() {
                    self.finished = true;
                    self.upstream.close();
                    return Some(Err(self.role.cardinality_error("a sequence of more than one item")));
                }
                Some(Ok(item))
            }
            Some(Err(e)) => Some(Err(e)),
            None => {
                self.finished = true;
                if self.position == 0 && !self.required.allows_zero() {
                    return Some(Err(self.role.cardinality_error("an empty sequence")));
                }
                None
            }
        }
    }

    fn position(&self) -> usize {
        self.position
    }

    fn fork(&self) -> Box<dyn SequenceCursor<N>> {
        Box::new(CardinalityCheckCursor::new(self.upstream.fork(), self.required, Rc::clone(&self.role)))
    }

    fn close(&mut self) {
        self.finished = true;
        self.upstream.close();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PredicateMode {
    /// The predicate may yield a number, compared against the position.
    Positional,
    /// The predicate is reduced to its effective boolean value.
    Boolean,
}

/// Filter over `upstream`, evaluating `predicate` once per candidate item with that
/// item, its position and a shared lazily computed size as the focus.
pub(crate) struct FilterCursor<N> {
    ctx: EvalContext<N>,
    predicate: ExprId,
    mode: PredicateMode,
    upstream: Box<dyn SequenceCursor<N>>,
    last: Rc<LastPosition<N>>,
    base_position: usize,
    position: usize,
}

impl<N: XdmNode> FilterCursor<N> {
    pub(crate) fn new(
        ctx: EvalContext<N>,
        predicate: ExprId,
        mode: PredicateMode,
        upstream: Box<dyn SequenceCursor<N>>,
    ) -> Self {
        let last = if ctx.arena().dependencies(predicate).contains(Dependencies::LAST) {
            LastPosition::lazy(upstream.fork())
        } else {
            LastPosition::unknown()
        };
        Self { ctx, predicate, mode, upstream, last, base_position: 0, position: 0 }
    }
}

impl<N: XdmNode> SequenceCursor<N> for FilterCursor<N> {
    fn next_item(&mut self) -> Option<XdmItemResult<N>> {
        loop {
            let item = match self.upstream.next_item()? {
                Ok(item) => item,
                Err(e) => return Some(Err(e)),
            };
            self.base_position += 1;
            let focus = Focus { item: item.clone(), position: self.base_position, last: Rc::clone(&self.last) };
            let inner = self.ctx.with_focus(focus);
            let keep = match self.mode {
                PredicateMode::Positional => inner.predicate_matches(self.predicate, self.base_position),
                PredicateMode::Boolean => inner.effective_boolean_value(self.predicate),
            };
            match keep {
                Ok(true) => {
                    self.position += 1;
                    return Some(Ok(item));
                }
                Ok(false) => {}
                Err(e) => return Some(Err(e)),
            }
        }
    }

    fn position(&self) -> usize {
        self.position
    }

    fn fork(&self) -> Box<dyn SequenceCursor<N>> {
        Box::new(FilterCursor::new(self.ctx.clone(), self.predicate, self.mode, self.upstream.fork()))
    }

    fn close(&mut self) {
        self.upstream.close();
    }
}
