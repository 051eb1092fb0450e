#![forbid(unsafe_code)]

//! Raw object sources: shared, shape-tagged containers behind the wrappers.
//!
//! # Design
//!
//! An [`Obj`] is a cheap handle (`Rc<RefCell<..>>`) over either an
//! insertion-ordered string-keyed map or a list. It is the *source* half of
//! the source/wrapper pair: all access through `Obj` is plain — nothing is
//! tracked and nothing is notified, exactly like mutating the raw target
//! behind a proxy. The reactive surface lives on [`Reactor`](crate::Reactor),
//! which shares the same storage.
//!
//! Mutation primitives report which cells of the source changed observably;
//! the wrapper turns those into notifications, the raw handle discards them.
//!
//! # Invariants
//!
//! 1. `revision` increments exactly once per mutation that changes stored
//!    content; no-op writes do not bump it.
//! 2. Map iteration order is insertion order; removal preserves the relative
//!    order of the remaining keys.
//! 3. Two handles are equal iff they share storage.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::error::GraphError;
use crate::registry::{AccessKey, PropKey};
use crate::value::Value;

/// Shape of an object source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjKind {
    /// String-keyed, insertion-ordered map.
    Map,
    /// Index-addressed list.
    List,
}

impl fmt::Display for ObjKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Map => write!(f, "map"),
            Self::List => write!(f, "list"),
        }
    }
}

/// Backing storage for a source.
pub(crate) enum ObjData {
    Map(IndexMap<Rc<str>, Value>),
    List(Vec<Value>),
}

/// Shared interior of a source: data plus a monotonic write counter.
pub(crate) struct ObjInner {
    data: ObjData,
    revision: u64,
}

pub(crate) type SourceRef = Rc<RefCell<ObjInner>>;
pub(crate) type SourceWeak = Weak<RefCell<ObjInner>>;

/// A raw object source.
///
/// Cloning an `Obj` produces another handle to the **same** storage. Access
/// through `Obj` never subscribes and never notifies; use the
/// [`Reactor`](crate::Reactor) wrapper for tracked access.
#[derive(Clone)]
pub struct Obj {
    pub(crate) inner: SourceRef,
}

impl Obj {
    /// Create an empty map source.
    #[must_use]
    pub fn map() -> Self {
        Self::from_data(ObjData::Map(IndexMap::new()))
    }

    /// Create an empty list source.
    #[must_use]
    pub fn list() -> Self {
        Self::from_data(ObjData::List(Vec::new()))
    }

    fn from_data(data: ObjData) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ObjInner { data, revision: 0 })),
        }
    }

    /// Shape of this source.
    #[must_use]
    pub fn kind(&self) -> ObjKind {
        match self.inner.borrow().data {
            ObjData::Map(_) => ObjKind::Map,
            ObjData::List(_) => ObjKind::List,
        }
    }

    /// Whether this source is a map.
    #[must_use]
    pub fn is_map(&self) -> bool {
        self.kind() == ObjKind::Map
    }

    /// Whether this source is a list.
    #[must_use]
    pub fn is_list(&self) -> bool {
        self.kind() == ObjKind::List
    }

    /// Number of entries (map) or items (list).
    #[must_use]
    pub fn len(&self) -> usize {
        match &self.inner.borrow().data {
            ObjData::Map(map) => map.len(),
            ObjData::List(items) => items.len(),
        }
    }

    /// Whether the source holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Monotonic write counter; bumps once per content-changing mutation.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.inner.borrow().revision
    }

    /// Value under `key`, for map sources.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        match &self.inner.borrow().data {
            ObjData::Map(map) => map.get(key).cloned(),
            ObjData::List(_) => None,
        }
    }

    /// Value at `index`, for list sources.
    #[must_use]
    pub fn at(&self, index: usize) -> Option<Value> {
        match &self.inner.borrow().data {
            ObjData::Map(_) => None,
            ObjData::List(items) => items.get(index).cloned(),
        }
    }

    /// Whether `key` exists, for map sources.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        match &self.inner.borrow().data {
            ObjData::Map(map) => map.contains_key(key),
            ObjData::List(_) => false,
        }
    }

    /// Whether `index` is populated, for list sources.
    #[must_use]
    pub fn has_index(&self, index: usize) -> bool {
        match &self.inner.borrow().data {
            ObjData::Map(_) => false,
            ObjData::List(items) => index < items.len(),
        }
    }

    /// Own keys: map keys in insertion order, or stringified list indices.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        match &self.inner.borrow().data {
            ObjData::Map(map) => map.keys().map(|k| k.to_string()).collect(),
            ObjData::List(items) => (0..items.len()).map(|i| i.to_string()).collect(),
        }
    }

    /// Snapshot of all `(key, value)` entries, for map sources.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, Value)> {
        match &self.inner.borrow().data {
            ObjData::Map(map) => map
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            ObjData::List(_) => Vec::new(),
        }
    }

    /// Snapshot of all items, for list sources.
    #[must_use]
    pub fn items(&self) -> Vec<Value> {
        match &self.inner.borrow().data {
            ObjData::Map(_) => Vec::new(),
            ObjData::List(items) => items.clone(),
        }
    }

    /// Insert or overwrite `key`, returning the previous value.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` on a list source.
    pub fn insert(&self, key: &str, value: impl Into<Value>) -> Result<Option<Value>, GraphError> {
        let (old, _) = self.inner.borrow_mut().set_entry(key, value.into())?;
        Ok(old)
    }

    /// Remove `key`, returning the removed value if it existed.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` on a list source.
    pub fn remove(&self, key: &str) -> Result<Option<Value>, GraphError> {
        let (old, _) = self.inner.borrow_mut().remove_entry(key)?;
        Ok(old)
    }

    /// Append an item to a list source.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` on a map source.
    pub fn push(&self, value: impl Into<Value>) -> Result<(), GraphError> {
        self.inner.borrow_mut().push_item(value.into())?;
        Ok(())
    }

    /// Remove and return the last item of a list source.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` on a map source.
    pub fn pop(&self) -> Result<Option<Value>, GraphError> {
        let (old, _) = self.inner.borrow_mut().pop_item()?;
        Ok(old)
    }

    /// Overwrite the item at `index`, returning the previous value.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` on a map source; `IndexOutOfBounds` past the end.
    pub fn set_at(&self, index: usize, value: impl Into<Value>) -> Result<Value, GraphError> {
        let (old, _) = self.inner.borrow_mut().set_item(index, value.into())?;
        Ok(old)
    }

    /// Insert an item at `index`, shifting the tail right.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` on a map source; `IndexOutOfBounds` past `len`.
    pub fn insert_at(&self, index: usize, value: impl Into<Value>) -> Result<(), GraphError> {
        self.inner.borrow_mut().insert_item(index, value.into())?;
        Ok(())
    }

    /// Remove and return the item at `index`, shifting the tail left.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` on a map source; `IndexOutOfBounds` past the end.
    pub fn remove_at(&self, index: usize) -> Result<Value, GraphError> {
        let (old, _) = self.inner.borrow_mut().remove_item(index)?;
        Ok(old)
    }

    /// Stable identity of this source while any handle is alive.
    pub(crate) fn id(&self) -> usize {
        Rc::as_ptr(&self.inner) as usize
    }

    /// Weak handle for the registry's source index.
    pub(crate) fn downgrade(&self) -> SourceWeak {
        Rc::downgrade(&self.inner)
    }
}

impl PartialEq for Obj {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Obj {}

impl fmt::Debug for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Obj")
            .field("kind", &self.kind())
            .field("len", &self.len())
            .field("revision", &self.revision())
            .finish()
    }
}

impl ObjInner {
    fn bump(&mut self) {
        self.revision += 1;
    }

    fn as_map_mut(&mut self, op: &'static str) -> Result<&mut IndexMap<Rc<str>, Value>, GraphError> {
        match &mut self.data {
            ObjData::Map(map) => Ok(map),
            ObjData::List(_) => Err(GraphError::ShapeMismatch {
                op,
                kind: ObjKind::List,
            }),
        }
    }

    fn as_list_mut(&mut self, op: &'static str) -> Result<&mut Vec<Value>, GraphError> {
        match &mut self.data {
            ObjData::List(items) => Ok(items),
            ObjData::Map(_) => Err(GraphError::ShapeMismatch {
                op,
                kind: ObjKind::Map,
            }),
        }
    }

    /// Insert or overwrite a map entry.
    ///
    /// Returns the previous value and the cells whose observable projection
    /// changed: the value cell iff the effective value differs, the HAS cell
    /// and the key-set cell iff the key is new.
    pub(crate) fn set_entry(
        &mut self,
        key: &str,
        value: Value,
    ) -> Result<(Option<Value>, Vec<AccessKey>), GraphError> {
        let map = self.as_map_mut("set")?;
        let old = map.get(key).cloned();
        if old.as_ref() == Some(&value) {
            return Ok((old, Vec::new()));
        }
        let created = old.is_none();
        let prop = PropKey::Name(Rc::from(key));
        map.insert(Rc::from(key), value);
        self.bump();

        let mut touched = vec![AccessKey::Value(prop.clone())];
        if created {
            touched.push(AccessKey::Has(prop));
            touched.push(AccessKey::Keys);
        }
        Ok((old, touched))
    }

    /// Remove a map entry. Removing a missing key changes nothing.
    pub(crate) fn remove_entry(
        &mut self,
        key: &str,
    ) -> Result<(Option<Value>, Vec<AccessKey>), GraphError> {
        let map = self.as_map_mut("remove")?;
        // shift_remove keeps the relative order of the remaining keys, so
        // the observable key sequence stays insertion-ordered.
        let Some(old) = map.shift_remove(key) else {
            return Ok((None, Vec::new()));
        };
        self.bump();
        let prop = PropKey::Name(Rc::from(key));
        let touched = vec![
            AccessKey::Value(prop.clone()),
            AccessKey::Has(prop),
            AccessKey::Keys,
        ];
        Ok((Some(old), touched))
    }

    /// Overwrite a list item in place.
    pub(crate) fn set_item(
        &mut self,
        index: usize,
        value: Value,
    ) -> Result<(Value, Vec<AccessKey>), GraphError> {
        let items = self.as_list_mut("set_at")?;
        let len = items.len();
        let Some(slot) = items.get_mut(index) else {
            return Err(GraphError::IndexOutOfBounds { index, len });
        };
        let old = slot.clone();
        if old == value {
            return Ok((old, Vec::new()));
        }
        *slot = value;
        self.bump();
        Ok((old, vec![AccessKey::Value(PropKey::Index(index))]))
    }

    /// Append a list item: a new index comes into existence.
    pub(crate) fn push_item(&mut self, value: Value) -> Result<Vec<AccessKey>, GraphError> {
        let items = self.as_list_mut("push")?;
        let index = items.len();
        items.push(value);
        self.bump();
        Ok(vec![
            AccessKey::Value(PropKey::Index(index)),
            AccessKey::Has(PropKey::Index(index)),
            AccessKey::Keys,
        ])
    }

    /// Remove the last list item; popping an empty list changes nothing.
    pub(crate) fn pop_item(&mut self) -> Result<(Option<Value>, Vec<AccessKey>), GraphError> {
        let items = self.as_list_mut("pop")?;
        let Some(old) = items.pop() else {
            return Ok((None, Vec::new()));
        };
        let index = items.len();
        self.bump();
        let touched = vec![
            AccessKey::Value(PropKey::Index(index)),
            AccessKey::Has(PropKey::Index(index)),
            AccessKey::Keys,
        ];
        Ok((Some(old), touched))
    }

    /// Insert a list item, shifting the tail right.
    ///
    /// Every index whose effective value actually changed is reported; a
    /// shift that lands an equal value on an index stays silent for it.
    pub(crate) fn insert_item(
        &mut self,
        index: usize,
        value: Value,
    ) -> Result<Vec<AccessKey>, GraphError> {
        let items = self.as_list_mut("insert_at")?;
        let old_len = items.len();
        if index > old_len {
            return Err(GraphError::IndexOutOfBounds {
                index,
                len: old_len,
            });
        }
        let old_tail: Vec<Value> = items[index..].to_vec();

        // After the shift, index j holds `value` (at the insertion point) or
        // the item previously at j - 1; diff each against what j held before.
        let mut touched = Vec::new();
        for j in index..=old_len {
            let new_val = if j == index {
                &value
            } else {
                &old_tail[j - index - 1]
            };
            let changed = match old_tail.get(j - index) {
                Some(old_val) => old_val != new_val,
                // The index at the old length is newly populated.
                None => true,
            };
            if changed {
                touched.push(AccessKey::Value(PropKey::Index(j)));
            }
        }
        touched.push(AccessKey::Has(PropKey::Index(old_len)));
        touched.push(AccessKey::Keys);

        items.insert(index, value);
        self.bump();
        Ok(touched)
    }

    /// Remove a list item, shifting the tail left.
    pub(crate) fn remove_item(
        &mut self,
        index: usize,
    ) -> Result<(Value, Vec<AccessKey>), GraphError> {
        let items = self.as_list_mut("remove_at")?;
        let old_len = items.len();
        if index >= old_len {
            return Err(GraphError::IndexOutOfBounds {
                index,
                len: old_len,
            });
        }
        let old_tail: Vec<Value> = items[index..].to_vec();
        let removed = items.remove(index);
        self.bump();

        // After the shift, index j holds the item previously at j + 1.
        let mut touched = Vec::new();
        for j in index..old_len - 1 {
            if old_tail[j - index] != old_tail[j - index + 1] {
                touched.push(AccessKey::Value(PropKey::Index(j)));
            }
        }
        // The last index ceased to exist.
        touched.push(AccessKey::Value(PropKey::Index(old_len - 1)));
        touched.push(AccessKey::Has(PropKey::Index(old_len - 1)));
        touched.push(AccessKey::Keys);
        Ok((removed, touched))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_roundtrip() {
        let o = Obj::map();
        assert!(o.is_map());
        assert!(o.is_empty());

        o.insert("foo", "bar").unwrap();
        assert_eq!(o.get("foo"), Some(Value::from("bar")));
        assert!(o.contains_key("foo"));
        assert_eq!(o.len(), 1);

        let old = o.remove("foo").unwrap();
        assert_eq!(old, Some(Value::from("bar")));
        assert!(!o.contains_key("foo"));
    }

    #[test]
    fn list_roundtrip() {
        let o = Obj::list();
        assert!(o.is_list());
        o.push(1).unwrap();
        o.push(2).unwrap();
        assert_eq!(o.at(0), Some(Value::from(1)));
        assert_eq!(o.len(), 2);
        assert_eq!(o.pop().unwrap(), Some(Value::from(2)));
        assert_eq!(o.len(), 1);
    }

    #[test]
    fn keys_are_insertion_ordered() {
        let o = Obj::map();
        o.insert("b", 1).unwrap();
        o.insert("a", 2).unwrap();
        o.insert("c", 3).unwrap();
        assert_eq!(o.keys(), vec!["b", "a", "c"]);

        o.remove("a").unwrap();
        assert_eq!(o.keys(), vec!["b", "c"]);

        o.insert("a", 4).unwrap();
        assert_eq!(o.keys(), vec!["b", "c", "a"]);
    }

    #[test]
    fn list_keys_are_indices() {
        let o = Obj::list();
        o.push("x").unwrap();
        o.push("y").unwrap();
        assert_eq!(o.keys(), vec!["0", "1"]);
    }

    #[test]
    fn revision_counts_real_changes_only() {
        let o = Obj::map();
        assert_eq!(o.revision(), 0);
        o.insert("k", 1).unwrap();
        assert_eq!(o.revision(), 1);
        o.insert("k", 1).unwrap(); // same value, no bump
        assert_eq!(o.revision(), 1);
        o.insert("k", 2).unwrap();
        assert_eq!(o.revision(), 2);
        o.remove("missing").unwrap();
        assert_eq!(o.revision(), 2);
        o.remove("k").unwrap();
        assert_eq!(o.revision(), 3);
    }

    #[test]
    fn shape_mismatch_on_wrong_ops() {
        let map = Obj::map();
        assert!(matches!(
            map.push(1),
            Err(GraphError::ShapeMismatch { kind: ObjKind::Map, .. })
        ));

        let list = Obj::list();
        assert!(matches!(
            list.insert("k", 1),
            Err(GraphError::ShapeMismatch { kind: ObjKind::List, .. })
        ));
    }

    #[test]
    fn reads_across_shapes_are_soft() {
        let map = Obj::map();
        assert_eq!(map.at(0), None);
        assert!(!map.has_index(0));

        let list = Obj::list();
        assert_eq!(list.get("k"), None);
        assert!(!list.contains_key("k"));
    }

    #[test]
    fn out_of_bounds_writes_fail_typed() {
        let list = Obj::list();
        list.push(1).unwrap();
        assert!(matches!(
            list.set_at(3, 9),
            Err(GraphError::IndexOutOfBounds { index: 3, len: 1 })
        ));
        assert!(matches!(
            list.remove_at(1),
            Err(GraphError::IndexOutOfBounds { index: 1, len: 1 })
        ));
        // Insertion at len is allowed (append position).
        list.insert_at(1, 2).unwrap();
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn handles_share_storage() {
        let a = Obj::map();
        let b = a.clone();
        b.insert("k", 7).unwrap();
        assert_eq!(a.get("k"), Some(Value::from(7)));
        assert_eq!(a, b);
        assert_ne!(a, Obj::map());
    }

    #[test]
    fn set_entry_reports_touched_cells() {
        let o = Obj::map();
        let (_, touched) = o.inner.borrow_mut().set_entry("k", Value::from(1)).unwrap();
        // New key: value, existence, and key set all changed.
        assert_eq!(touched.len(), 3);

        let (_, touched) = o.inner.borrow_mut().set_entry("k", Value::from(2)).unwrap();
        // Overwrite: only the value cell changed.
        assert_eq!(touched, vec![AccessKey::Value(PropKey::Name(Rc::from("k")))]);

        let (_, touched) = o.inner.borrow_mut().set_entry("k", Value::from(2)).unwrap();
        assert!(touched.is_empty());
    }

    #[test]
    fn insert_item_is_silent_for_equal_shifts() {
        let o = Obj::list();
        o.push("a").unwrap();
        o.push("a").unwrap();
        // Inserting "a" at the front shifts two equal values onto their own
        // positions; only the newly-populated index 2 changes.
        let touched = o.inner.borrow_mut().insert_item(0, Value::from("a")).unwrap();
        let value_cells: Vec<_> = touched
            .iter()
            .filter(|k| matches!(k, AccessKey::Value(_)))
            .cloned()
            .collect();
        assert_eq!(value_cells, vec![AccessKey::Value(PropKey::Index(2))]);
    }

    #[test]
    fn remove_item_diffs_the_shifted_tail() {
        let o = Obj::list();
        for v in ["a", "b", "b", "c"] {
            o.push(v).unwrap();
        }
        // Removing index 1 shifts ["b", "c"] left; index 1 keeps value "b",
        // index 2 changes to "c", index 3 vanishes.
        let (removed, touched) = o.inner.borrow_mut().remove_item(1).unwrap();
        assert_eq!(removed, Value::from("b"));
        let value_cells: Vec<_> = touched
            .iter()
            .filter_map(|k| match k {
                AccessKey::Value(PropKey::Index(i)) => Some(*i),
                _ => None,
            })
            .collect();
        assert_eq!(value_cells, vec![2, 3]);
    }
}
