//! Pull-based sequence protocol shared by the evaluator and the public API.
//!
//! A cursor delivers items one at a time and can be forked into a fresh cursor that
//! starts again at the beginning of the same logical sequence. Optional capabilities
//! are advertised through [`CursorProperties`]:
//!
//! - `GROUNDED`: the whole sequence is in memory; [`SequenceCursor::grounded`] returns it
//!   and windowing over it is O(1).
//! - `LOOKAHEAD`: [`SequenceCursor::has_next`] answers without consuming an item.
//! - `LAST_POSITION_FINDER`: [`SequenceCursor::last_position`] is cheap.
//!
//! Callers must check the flag before relying on the capability.

use std::marker::PhantomData;
use std::rc::Rc;

use bitflags::bitflags;

use crate::engine::error::Error;
use crate::xdm::{XdmItem, XdmItemResult, XdmSequence};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CursorProperties: u8 {
        const GROUNDED = 1 << 0;
        const LOOKAHEAD = 1 << 1;
        const LAST_POSITION_FINDER = 1 << 2;
    }
}

pub trait SequenceCursor<N> {
    fn next_item(&mut self) -> Option<XdmItemResult<N>>;

    /// Number of items delivered so far (the position of the current item, 0 before the first).
    fn position(&self) -> usize;

    /// A fresh cursor over the same logical sequence, positioned before its first item.
    fn fork(&self) -> Box<dyn SequenceCursor<N>>;

    fn properties(&self) -> CursorProperties {
        CursorProperties::empty()
    }

    /// Only meaningful when the cursor reports `LOOKAHEAD`.
    fn has_next(&self) -> bool {
        false
    }

    /// Length of the whole logical sequence. Cursors without `LAST_POSITION_FINDER`
    /// answer by draining a fork.
    fn last_position(&mut self) -> Result<usize, Error> {
        let mut fork = self.fork();
        let mut count = 0usize;
        while let Some(item) = fork.next_item() {
            item?;
            count += 1;
        }
        Ok(count)
    }

    /// The whole logical sequence, for cursors reporting `GROUNDED`.
    fn grounded(&self) -> Option<Grounded<N>> {
        None
    }

    /// Release resources early; subsequent `next_item` calls return `None`.
    fn close(&mut self) {}

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, None)
    }
}

/// Shared, immutable window over materialized items.
pub struct Grounded<N> {
    items: Rc<[XdmItem<N>]>,
    start: usize,
    end: usize,
}

impl<N> Clone for Grounded<N> {
    fn clone(&self) -> Self {
        Self { items: Rc::clone(&self.items), start: self.start, end: self.end }
    }
}

impl<N> core::fmt::Debug for Grounded<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Grounded").field("start", &self.start).field("end", &self.end).finish()
    }
}

impl<N> Grounded<N> {
    pub fn from_vec(items: XdmSequence<N>) -> Self {
        let end = items.len();
        Self { items: items.into(), start: 0, end }
    }

    pub fn empty() -> Self {
        Self::from_vec(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Zero-based access inside the window.
    pub fn get(&self, index: usize) -> Option<&XdmItem<N>> {
        if index < self.len() { self.items.get(self.start + index) } else { None }
    }

    /// Zero-based, half-open sub-window; bounds are clamped.
    #[must_use]
    pub fn slice(&self, from: usize, to: usize) -> Self {
        let len = self.len();
        let to = to.min(len);
        let from = from.min(to);
        Self { items: Rc::clone(&self.items), start: self.start + from, end: self.start + to }
    }

    pub fn iter(&self) -> impl Iterator<Item = &XdmItem<N>> {
        self.items[self.start..self.end].iter()
    }
}

impl<N: Clone> Grounded<N> {
    pub fn to_vec(&self) -> XdmSequence<N> {
        self.iter().cloned().collect()
    }
}

impl<N: Clone + 'static> Grounded<N> {
    pub fn cursor(&self) -> Box<dyn SequenceCursor<N>> {
        Box::new(VecCursor::new(self.clone()))
    }
}

pub struct VecCursor<N> {
    seq: Grounded<N>,
    index: usize,
}

impl<N> VecCursor<N> {
    pub fn new(seq: Grounded<N>) -> Self {
        Self { seq, index: 0 }
    }
}

impl<N: Clone + 'static> SequenceCursor<N> for VecCursor<N> {
    fn next_item(&mut self) -> Option<XdmItemResult<N>> {
        let item = self.seq.get(self.index)?.clone();
        self.index += 1;
        Some(Ok(item))
    }

    fn position(&self) -> usize {
        self.index
    }

    fn fork(&self) -> Box<dyn SequenceCursor<N>> {
        Box::new(VecCursor::new(self.seq.clone()))
    }

    fn properties(&self) -> CursorProperties {
        CursorProperties::all()
    }

    fn has_next(&self) -> bool {
        self.index < self.seq.len()
    }

    fn last_position(&mut self) -> Result<usize, Error> {
        Ok(self.seq.len())
    }

    fn grounded(&self) -> Option<Grounded<N>> {
        Some(self.seq.clone())
    }

    fn close(&mut self) {
        self.index = self.seq.len();
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rest = self.seq.len().saturating_sub(self.index);
        (rest, Some(rest))
    }
}

pub struct EmptyCursor<N>(PhantomData<N>);

impl<N> EmptyCursor<N> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<N> Default for EmptyCursor<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: 'static> SequenceCursor<N> for EmptyCursor<N> {
    fn next_item(&mut self) -> Option<XdmItemResult<N>> {
        None
    }

    fn position(&self) -> usize {
        0
    }

    fn fork(&self) -> Box<dyn SequenceCursor<N>> {
        Box::new(EmptyCursor::new())
    }

    fn properties(&self) -> CursorProperties {
        CursorProperties::LOOKAHEAD | CursorProperties::LAST_POSITION_FINDER
    }

    fn last_position(&mut self) -> Result<usize, Error> {
        Ok(0)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(0))
    }
}

pub struct SingletonCursor<N> {
    item: XdmItem<N>,
    done: bool,
}

impl<N> SingletonCursor<N> {
    pub fn new(item: XdmItem<N>) -> Self {
        Self { item, done: false }
    }
}

impl<N: Clone + 'static> SequenceCursor<N> for SingletonCursor<N> {
    fn next_item(&mut self) -> Option<XdmItemResult<N>> {
        if self.done {
            return None;
        }
        self.done = true;
        Some(Ok(self.item.clone()))
    }

    fn position(&self) -> usize {
        usize::from(self.done)
    }

    fn fork(&self) -> Box<dyn SequenceCursor<N>> {
        Box::new(SingletonCursor::new(self.item.clone()))
    }

    fn properties(&self) -> CursorProperties {
        CursorProperties::LOOKAHEAD | CursorProperties::LAST_POSITION_FINDER
    }

    fn has_next(&self) -> bool {
        !self.done
    }

    fn last_position(&mut self) -> Result<usize, Error> {
        Ok(1)
    }

    fn close(&mut self) {
        self.done = true;
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rest = usize::from(!self.done);
        (rest, Some(rest))
    }
}

/// Iterator adapter handed out by the public evaluation API.
pub struct XdmSequenceStream<N> {
    cursor: Box<dyn SequenceCursor<N>>,
}

impl<N> XdmSequenceStream<N> {
    pub fn new(cursor: Box<dyn SequenceCursor<N>>) -> Self {
        Self { cursor }
    }

    pub fn cursor(self) -> Box<dyn SequenceCursor<N>> {
        self.cursor
    }

    pub fn materialize(self) -> Result<XdmSequence<N>, Error> {
        self.collect()
    }
}

impl<N> Iterator for XdmSequenceStream<N> {
    type Item = XdmItemResult<N>;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.next_item()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.cursor.size_hint()
    }
}
