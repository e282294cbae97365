//! Non-recursive traversal and construction of [`Value`] trees.
//!
//! Values arrive from untrusted guests and callers, so their depth is only
//! bounded by memory. Everything that walks a tree (encoding, cloning) goes
//! through [`Events`], and everything that builds one (decoding, cloning)
//! goes through [`Builder`]; both keep their state on the heap.

use super::Value;

/// One step of a pre-order walk.
pub(crate) enum Event<'a> {
    /// A value with no children.
    Leaf(&'a Value),
    /// Start of an array; its elements follow.
    Array(usize),
    /// Start of a map; its keys and values follow, alternating.
    Map(usize),
}

/// Pre-order iterator over a value tree, in wire order.
pub(crate) struct Events<'a> {
    stack: Vec<&'a Value>,
}

impl<'a> Events<'a> {
    pub(crate) fn new(root: &'a Value) -> Self {
        Events { stack: vec![root] }
    }
}

impl<'a> Iterator for Events<'a> {
    type Item = Event<'a>;

    fn next(&mut self) -> Option<Event<'a>> {
        let value = self.stack.pop()?;
        let event = match value {
            Value::Array(items) => {
                self.stack.extend(items.iter().rev());
                Event::Array(items.len())
            }
            Value::Map(entries) => {
                for (k, v) in entries.iter().rev() {
                    self.stack.push(v);
                    self.stack.push(k);
                }
                Event::Map(entries.len())
            }
            leaf => Event::Leaf(leaf),
        };
        Some(event)
    }
}

/// Assembles a tree from pre-order events.
///
/// Each method returns the root once the event that completes it has been
/// added; until then it returns `None`.
#[derive(Default)]
pub(crate) struct Builder {
    stack: Vec<Frame>,
}

impl Builder {
    /// Opens an array of `len` elements, reserving at most `capacity` slots.
    pub(crate) fn array(&mut self, len: usize, capacity: usize) -> Option<Value> {
        if len == 0 {
            return self.leaf(Value::Array(Vec::new()));
        }
        self.stack.push(Frame::Array {
            remaining: len,
            items: Vec::with_capacity(capacity.min(len)),
        });
        None
    }

    /// Opens a map of `len` entries, reserving at most `capacity` slots.
    pub(crate) fn map(&mut self, len: usize, capacity: usize) -> Option<Value> {
        if len == 0 {
            return self.leaf(Value::Map(Vec::new()));
        }
        self.stack.push(Frame::Map {
            remaining: len,
            entries: Vec::with_capacity(capacity.min(len)),
            key: None,
        });
        None
    }

    /// Adds a finished value, closing every container it completes.
    pub(crate) fn leaf(&mut self, mut value: Value) -> Option<Value> {
        loop {
            let Some(mut top) = self.stack.pop() else {
                return Some(value);
            };
            if top.push(value) {
                value = top.finish();
            } else {
                self.stack.push(top);
                return None;
            }
        }
    }
}

enum Frame {
    Array {
        remaining: usize,
        items: Vec<Value>,
    },
    Map {
        remaining: usize,
        entries: Vec<(Value, Value)>,
        key: Option<Value>,
    },
}

impl Frame {
    /// Adds a child value. Returns true once the container is complete.
    fn push(&mut self, value: Value) -> bool {
        match self {
            Frame::Array { remaining, items } => {
                items.push(value);
                *remaining -= 1;
                *remaining == 0
            }
            Frame::Map {
                remaining,
                entries,
                key,
            } => match key.take() {
                None => {
                    *key = Some(value);
                    false
                }
                Some(k) => {
                    entries.push((k, value));
                    *remaining -= 1;
                    *remaining == 0
                }
            },
        }
    }

    fn finish(self) -> Value {
        match self {
            Frame::Array { items, .. } => Value::Array(items),
            Frame::Map { entries, .. } => Value::Map(entries),
        }
    }
}
