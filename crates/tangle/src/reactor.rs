#![forbid(unsafe_code)]

//! Reactive wrappers: tracked access over shared object sources.
//!
//! # Design
//!
//! A [`Reactor`] is the wrapper half of the source/wrapper pair. It shares
//! storage with its [`Obj`] source, so two wrappers over the same source are
//! interchangeable and compare equal — wrapping is identity-stable. Reads
//! through the wrapper register the active observer against the cell they
//! touch; writes diff the observable projection of the source and notify
//! exactly the cells that changed:
//!
//! - the **value** cell of a property, when its effective value differs;
//! - the **existence** cell of a property, when the property appears or
//!   disappears;
//! - the **key-set** cell, when the set of own keys changes.
//!
//! A write that changes nothing observable notifies nothing. Outside a
//! batch, a write drains the pending queue before returning, so observer
//! failures surface to the writer.
//!
//! Object-valued reads come back as `Value::Obj(Reactor)` — chained access
//! through nested objects keeps tracking without further ceremony.
//!
//! # Edge Cases
//!
//! - Overwriting an existing key with a strictly-equal value is silent.
//! - Overwriting an existing key with a new value leaves existence and the
//!   key set untouched; observers of those cells stay asleep.
//! - List insertions and removals diff the shifted tail index by index; an
//!    index that ends up holding an equal value stays silent.
//! - Reads of the wrong shape (`get` on a list) return `None` and subscribe
//!   nothing that could fire spuriously; writes of the wrong shape fail
//!   typed.

use std::fmt;
use std::rc::Rc;

use crate::error::GraphError;
use crate::object::{Obj, ObjKind};
use crate::registry::{AccessKey, PropKey};
use crate::runtime;
use crate::value::Value;

/// Tracked wrapper over an [`Obj`] source.
///
/// Cloning (and re-wrapping the same source) yields handles that compare
/// equal and subscribe against the same cells.
#[derive(Clone)]
pub struct Reactor {
    source: Obj,
}

impl Reactor {
    /// Wrap an object-like value.
    ///
    /// # Errors
    ///
    /// [`GraphError::NotAnObject`] when `value` is not an object.
    pub fn new(value: Value) -> Result<Self, GraphError> {
        match value {
            Value::Obj(reactor) => Ok(reactor),
            other => Err(GraphError::NotAnObject {
                found: other.kind_name(),
            }),
        }
    }

    /// The raw source behind this wrapper.
    ///
    /// Access through the returned handle is untracked and silent — the
    /// escape hatch for operations that cannot tolerate notification.
    #[must_use]
    pub fn shuck(&self) -> Obj {
        self.source.clone()
    }

    /// Shape of the underlying source.
    #[must_use]
    pub fn kind(&self) -> ObjKind {
        self.source.kind()
    }

    /// Whether the underlying source is a map.
    #[must_use]
    pub fn is_map(&self) -> bool {
        self.source.is_map()
    }

    /// Whether the underlying source is a list.
    #[must_use]
    pub fn is_list(&self) -> bool {
        self.source.is_list()
    }

    /// The source's monotonic write counter (untracked).
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.source.revision()
    }

    /// Tracked read of the value under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        runtime::track(
            &self.source,
            AccessKey::Value(PropKey::Name(Rc::from(key))),
        );
        self.source.get(key)
    }

    /// Tracked read of the value at `index`.
    #[must_use]
    pub fn at(&self, index: usize) -> Option<Value> {
        runtime::track(&self.source, AccessKey::Value(PropKey::Index(index)));
        self.source.at(index)
    }

    /// Tracked existence check for `key`.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        runtime::track(&self.source, AccessKey::Has(PropKey::Name(Rc::from(key))));
        self.source.contains_key(key)
    }

    /// Tracked existence check for `index`.
    #[must_use]
    pub fn has_index(&self, index: usize) -> bool {
        runtime::track(&self.source, AccessKey::Has(PropKey::Index(index)));
        self.source.has_index(index)
    }

    /// Tracked read of the own-key set.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        runtime::track(&self.source, AccessKey::Keys);
        self.source.keys()
    }

    /// Tracked read of the entry/item count (a projection of the key set).
    #[must_use]
    pub fn len(&self) -> usize {
        runtime::track(&self.source, AccessKey::Keys);
        self.source.len()
    }

    /// Tracked emptiness check.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write `key`, notifying the cells whose projection changed.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` on a list source, or failures from the observers
    /// drained by this write.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<(), GraphError> {
        let touched = {
            let mut inner = self.source.inner.borrow_mut();
            let (_, touched) = inner.set_entry(key, value.into())?;
            touched
        };
        self.emit(touched)
    }

    /// Delete `key`, returning the removed value.
    ///
    /// Deleting a missing key changes nothing and notifies nothing.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` on a list source, or drained-observer failures.
    pub fn remove(&self, key: &str) -> Result<Option<Value>, GraphError> {
        let (old, touched) = {
            let mut inner = self.source.inner.borrow_mut();
            inner.remove_entry(key)?
        };
        self.emit(touched)?;
        Ok(old)
    }

    /// Overwrite the item at `index`, returning the previous value.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` on a map source, `IndexOutOfBounds` past the end, or
    /// drained-observer failures.
    pub fn set_at(&self, index: usize, value: impl Into<Value>) -> Result<Value, GraphError> {
        let (old, touched) = {
            let mut inner = self.source.inner.borrow_mut();
            inner.set_item(index, value.into())?
        };
        self.emit(touched)?;
        Ok(old)
    }

    /// Append an item; a new index comes into existence.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` on a map source, or drained-observer failures.
    pub fn push(&self, value: impl Into<Value>) -> Result<(), GraphError> {
        let touched = {
            let mut inner = self.source.inner.borrow_mut();
            inner.push_item(value.into())?
        };
        self.emit(touched)
    }

    /// Remove and return the last item; popping an empty list is silent.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` on a map source, or drained-observer failures.
    pub fn pop(&self) -> Result<Option<Value>, GraphError> {
        let (old, touched) = {
            let mut inner = self.source.inner.borrow_mut();
            inner.pop_item()?
        };
        self.emit(touched)?;
        Ok(old)
    }

    /// Insert an item at `index`, shifting the tail right.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` on a map source, `IndexOutOfBounds` past `len`, or
    /// drained-observer failures.
    pub fn insert_at(&self, index: usize, value: impl Into<Value>) -> Result<(), GraphError> {
        let touched = {
            let mut inner = self.source.inner.borrow_mut();
            inner.insert_item(index, value.into())?
        };
        self.emit(touched)
    }

    /// Remove and return the item at `index`, shifting the tail left.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` on a map source, `IndexOutOfBounds` past the end, or
    /// drained-observer failures.
    pub fn remove_at(&self, index: usize) -> Result<Value, GraphError> {
        let (old, touched) = {
            let mut inner = self.source.inner.borrow_mut();
            inner.remove_item(index)?
        };
        self.emit(touched)?;
        Ok(old)
    }

    /// Notify the touched cells, then drain unless a batch or an enclosing
    /// drain is active.
    fn emit(&self, touched: Vec<AccessKey>) -> Result<(), GraphError> {
        if touched.is_empty() {
            return Ok(());
        }
        let id = self.source.id();
        for key in touched {
            runtime::notify(id, key);
        }
        runtime::maybe_drain()
    }
}

impl From<Obj> for Reactor {
    fn from(source: Obj) -> Self {
        Self { source }
    }
}

impl Default for Reactor {
    /// A wrapper over a fresh empty map.
    fn default() -> Self {
        Self::from(Obj::map())
    }
}

impl PartialEq for Reactor {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Reactor {}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("kind", &self.kind())
            .field("len", &self.source.len())
            .field("revision", &self.revision())
            .finish()
    }
}

/// Retrieve the raw source behind a wrapper.
///
/// Free-function form of [`Reactor::shuck`].
#[must_use]
pub fn shuck(reactor: &Reactor) -> Obj {
    reactor.shuck()
}
