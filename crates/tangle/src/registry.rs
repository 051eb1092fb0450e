#![forbid(unsafe_code)]

//! Cell registry: the bidirectional index between sources and observers.
//!
//! A *cell* is one observable facet of a source, addressed by [`AccessKey`]:
//! the value under a property, the existence of a property, or the set of
//! own keys. The registry maps *(source, cell)* to the observers subscribed
//! there, in subscription order, and each observer carries back-pointers so
//! its whole edge set can be torn down before a re-run.
//!
//! Sources are held weakly — the registry never keeps an otherwise
//! unreferenced object alive. Observers are held strongly — a subscribed
//! observer stays reachable from the cells it reads.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::trace;

use crate::object::{Obj, SourceWeak};
use crate::observer::ObserverCore;

/// Property address inside a source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum PropKey {
    /// Map entry by name.
    Name(Rc<str>),
    /// List item by position.
    Index(usize),
}

/// Address of one observable cell of a source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum AccessKey {
    /// The value stored under a property.
    Value(PropKey),
    /// Whether a property exists.
    Has(PropKey),
    /// The set of own keys.
    Keys,
}

/// Subscription index for one source.
struct SourceCells {
    source: SourceWeak,
    cells: HashMap<AccessKey, Vec<Rc<ObserverCore>>>,
}

/// The process-wide (per-thread) subscription index.
pub(crate) struct Registry {
    sources: HashMap<usize, SourceCells>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            sources: HashMap::new(),
        }
    }

    /// Add the edge *(source, key) → observer* and its back-pointer.
    ///
    /// Duplicate subscriptions within one run are collapsed; subscriber
    /// order within a cell is first-subscription order.
    pub(crate) fn subscribe(&mut self, source: &Obj, key: AccessKey, observer: &Rc<ObserverCore>) {
        let id = source.id();
        let entry = self.sources.entry(id).or_insert_with(|| SourceCells {
            source: source.downgrade(),
            cells: HashMap::new(),
        });
        // A recycled allocation can reuse a dead source's address; reset the
        // stale index when that happens.
        if entry.source.strong_count() == 0 {
            *entry = SourceCells {
                source: source.downgrade(),
                cells: HashMap::new(),
            };
        }

        let cell = entry.cells.entry(key.clone()).or_default();
        if cell.iter().any(|o| o.id() == observer.id()) {
            return;
        }
        cell.push(Rc::clone(observer));
        observer.push_dep(id, key.clone());
        trace!(target: "tangle::registry", observer = observer.id(), source = id, ?key, "subscribe");
    }

    /// Remove the observer from every cell it subscribed to.
    pub(crate) fn unsubscribe_all(&mut self, observer: &ObserverCore) {
        let deps = observer.take_deps();
        if deps.is_empty() {
            return;
        }
        trace!(target: "tangle::registry", observer = observer.id(), edges = deps.len(), "unsubscribe");
        for (source_id, key) in deps {
            let Some(entry) = self.sources.get_mut(&source_id) else {
                continue;
            };
            if let Some(cell) = entry.cells.get_mut(&key) {
                cell.retain(|o| o.id() != observer.id());
                if cell.is_empty() {
                    entry.cells.remove(&key);
                }
            }
            if entry.cells.is_empty() {
                self.sources.remove(&source_id);
            }
        }
    }

    /// Snapshot the subscribers of one cell.
    ///
    /// Returns a copy so a drain can iterate while re-runs rewrite the
    /// underlying sets. A dead source drops out of the index here.
    pub(crate) fn collect(&mut self, source_id: usize, key: &AccessKey) -> Vec<Rc<ObserverCore>> {
        match self.sources.get(&source_id) {
            Some(entry) if entry.source.strong_count() > 0 => {
                entry.cells.get(key).cloned().unwrap_or_default()
            }
            Some(_) => {
                self.sources.remove(&source_id);
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    /// Number of sources currently indexed (test support).
    #[cfg(test)]
    pub(crate) fn source_count(&self) -> usize {
        self.sources.len()
    }
}
