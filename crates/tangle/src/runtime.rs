#![forbid(unsafe_code)]

//! Thread-local reactive runtime: subscriber stack, pending queue, batching.
//!
//! # Design
//!
//! All coordination state lives in one thread-local context: the cell
//! registry, the stack of tracking/hidden frames, the de-duplicating FIFO of
//! observers awaiting a re-run, the batch depth, and a drain-in-progress
//! flag. The engine is single-threaded cooperative — a write either defers
//! its notifications (inside a batch) or fully drains them before returning.
//!
//! # Invariants
//!
//! 1. Reads subscribe only the observer on top of the stack, and only while
//!    no hidden frame covers it.
//! 2. The pending queue never holds the same observer twice.
//! 3. At most one drain loop is active; writes performed by a draining
//!    observer enqueue onto the live queue and run in the same cycle, after
//!    the current observer finishes.
//! 4. Batch depth is restored on unwind; only the outermost batch drains.
//! 5. A drain runs every enqueued observer even when some fail; the failures
//!    are aggregated afterwards.
//!
//! # Failure Modes
//!
//! - Observer bodies that keep re-triggering each other exhaust the
//!   configured drain budget and surface [`GraphError::DrainBudgetExceeded`]
//!   instead of looping forever.

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::rc::Rc;

use tracing::trace;

use crate::error::GraphError;
use crate::object::Obj;
use crate::observer::{self, ObserverCore, ObserverState};
use crate::registry::{AccessKey, Registry};

/// Tuning knobs for the reactive runtime.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Maximum observer runs a single drain cycle may perform before it is
    /// cut short with [`GraphError::DrainBudgetExceeded`]. Guards against
    /// observers that endlessly re-trigger each other.
    pub drain_run_budget: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            drain_run_budget: 10_000,
        }
    }
}

impl RuntimeConfig {
    /// Create a configuration with a custom drain budget.
    #[must_use]
    pub fn new(drain_run_budget: usize) -> Self {
        Self { drain_run_budget }
    }
}

/// One entry of the subscriber stack.
enum Frame {
    /// An observer run; reads subscribe to it.
    Tracking(Rc<ObserverCore>),
    /// A `hide` scope; reads subscribe to nothing.
    Hidden,
}

struct Runtime {
    registry: Registry,
    stack: Vec<Frame>,
    queue: VecDeque<Rc<ObserverCore>>,
    queued: HashSet<u64>,
    batch_depth: usize,
    draining: bool,
    config: RuntimeConfig,
    next_observer_id: u64,
}

impl Runtime {
    fn new() -> Self {
        Self {
            registry: Registry::new(),
            stack: Vec::new(),
            queue: VecDeque::new(),
            queued: HashSet::new(),
            batch_depth: 0,
            draining: false,
            config: RuntimeConfig::default(),
            next_observer_id: 0,
        }
    }
}

thread_local! {
    static RUNTIME: RefCell<Runtime> = RefCell::new(Runtime::new());
}

fn with<R>(f: impl FnOnce(&mut Runtime) -> R) -> R {
    RUNTIME.with(|rt| f(&mut rt.borrow_mut()))
}

/// Replace the runtime configuration for the current thread.
pub fn set_runtime_config(config: RuntimeConfig) {
    with(|rt| rt.config = config);
}

/// The current runtime configuration.
#[must_use]
pub fn runtime_config() -> RuntimeConfig {
    with(|rt| rt.config)
}

pub(crate) fn next_observer_id() -> u64 {
    with(|rt| {
        rt.next_observer_id += 1;
        rt.next_observer_id
    })
}

/// Register a read of *(source, key)* against the active subscriber, if any.
///
/// No-op when the stack is empty, when a hidden frame is on top, or when the
/// top observer has stopped mid-run.
pub(crate) fn track(source: &Obj, key: AccessKey) {
    let subscriber = with(|rt| match rt.stack.last() {
        Some(Frame::Tracking(core)) if core.state() == ObserverState::Running => {
            Some(Rc::clone(core))
        }
        _ => None,
    });
    if let Some(core) = subscriber {
        with(|rt| rt.registry.subscribe(source, key, &core));
    }
}

/// Enqueue every subscriber of *(source, key)* for a re-run.
///
/// The write path calls this once per changed cell and then
/// [`maybe_drain`]. A subscriber that is mid-run is skipped — a write an
/// observer makes to a cell it also reads cannot re-enqueue it within its
/// own run.
pub(crate) fn notify(source_id: usize, key: AccessKey) {
    let subscribers = with(|rt| rt.registry.collect(source_id, &key));
    if subscribers.is_empty() {
        return;
    }
    trace!(
        target: "tangle::runtime",
        source = source_id,
        ?key,
        subscribers = subscribers.len(),
        "notify"
    );
    with(|rt| {
        for core in subscribers {
            if core.state() == ObserverState::Running {
                continue;
            }
            if rt.queued.insert(core.id()) {
                rt.queue.push_back(core);
            }
        }
    });
}

pub(crate) fn unsubscribe_all(core: &ObserverCore) {
    with(|rt| rt.registry.unsubscribe_all(core));
}

/// Drop a stopped observer from the pending queue.
pub(crate) fn unqueue(id: u64) {
    with(|rt| {
        if rt.queued.remove(&id) {
            rt.queue.retain(|o| o.id() != id);
        }
    });
}

/// RAII frame on the subscriber stack; pops on drop, panic included.
pub(crate) struct FrameGuard(());

impl FrameGuard {
    pub(crate) fn tracking(core: Rc<ObserverCore>) -> Self {
        with(|rt| rt.stack.push(Frame::Tracking(core)));
        Self(())
    }

    fn hidden() -> Self {
        with(|rt| rt.stack.push(Frame::Hidden));
        Self(())
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        with(|rt| {
            rt.stack.pop();
        });
    }
}

struct BatchGuard(());

impl BatchGuard {
    fn enter() -> Self {
        with(|rt| rt.batch_depth += 1);
        Self(())
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        with(|rt| rt.batch_depth -= 1);
    }
}

struct DrainGuard(());

impl DrainGuard {
    fn enter() -> Self {
        with(|rt| rt.draining = true);
        Self(())
    }
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        with(|rt| rt.draining = false);
    }
}

/// Run `f` with dependency tracking suppressed.
///
/// Reads inside `f` subscribe nothing; writes still notify. Tracking is
/// restored on exit even if `f` unwinds. Returns `f`'s result.
pub fn hide<R>(f: impl FnOnce() -> R) -> R {
    let _frame = FrameGuard::hidden();
    f()
}

/// Run `f` with notifications deferred until the outermost batch exits.
///
/// Writes inside the batch are applied immediately and visible to reads;
/// the affected observers run at most once, after `f` returns. Nested
/// batches compose — only the outermost drains. The depth is restored even
/// if `f` unwinds.
///
/// # Errors
///
/// Failures from the observers drained at batch exit.
pub fn batch<R>(f: impl FnOnce() -> R) -> Result<R, GraphError> {
    let out = {
        let _guard = BatchGuard::enter();
        f()
    };
    maybe_drain()?;
    Ok(out)
}

/// Drain the pending queue unless a batch or another drain is active.
pub(crate) fn maybe_drain() -> Result<(), GraphError> {
    let ready = with(|rt| rt.batch_depth == 0 && !rt.draining && !rt.queue.is_empty());
    if !ready {
        return Ok(());
    }
    drain()
}

fn drain() -> Result<(), GraphError> {
    let _guard = DrainGuard::enter();
    let _span = tracing::debug_span!(target: "tangle::runtime", "drain").entered();
    let budget = with(|rt| rt.config.drain_run_budget);
    let mut runs = 0usize;
    let mut errors = Vec::new();

    loop {
        let next = with(|rt| {
            let core = rt.queue.pop_front();
            if let Some(core) = &core {
                rt.queued.remove(&core.id());
            }
            core
        });
        let Some(core) = next else { break };
        if core.state() != ObserverState::Idle {
            // Stopped while pending; skip without running.
            continue;
        }
        if runs == budget {
            errors.push(GraphError::DrainBudgetExceeded { budget });
            with(|rt| {
                rt.queue.clear();
                rt.queued.clear();
            });
            break;
        }
        runs += 1;
        if let Err(err) = observer::run_core(&core) {
            errors.push(err);
        }
    }

    trace!(target: "tangle::runtime", runs, failures = errors.len(), "drain complete");
    match GraphError::aggregate(errors) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Number of observers currently pending (test support).
#[cfg(test)]
pub(crate) fn pending_len() -> usize {
    with(|rt| rt.queue.len())
}

/// Number of sources the registry currently indexes (test support).
#[cfg(test)]
pub(crate) fn tracked_source_count() -> usize {
    with(|rt| rt.registry.source_count())
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use super::*;
    use crate::observer::Observer;
    use crate::reactor::Reactor;
    use crate::value::Value;

    fn counting_observer(r: &Reactor, key: &'static str) -> (Observer, Rc<Cell<u32>>) {
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        let r = r.clone();
        let o = Observer::from_fn(move || {
            c.set(c.get() + 1);
            let _ = r.get(key);
        });
        o.call(&[]).unwrap();
        (o, count)
    }

    #[test]
    fn hide_returns_result_and_suppresses_tracking() {
        let r = Reactor::default();
        r.set("inner", 1).unwrap();

        let count = Rc::new(Cell::new(0));
        let seen = Rc::new(Cell::new(0.0));
        let c = Rc::clone(&count);
        let s = Rc::clone(&seen);
        let r2 = r.clone();
        let o = Observer::from_fn(move || {
            c.set(c.get() + 1);
            if let Some(Value::Num(n)) = hide(|| r2.get("inner")) {
                s.set(n);
            }
        });
        o.call(&[]).unwrap();
        assert_eq!(count.get(), 1);
        assert_eq!(seen.get(), 1.0, "hidden read still sees the value");

        r.set("inner", 2).unwrap();
        assert_eq!(count.get(), 1, "hidden read must not subscribe");
    }

    #[test]
    fn hide_passes_value_through() {
        assert_eq!(hide(|| 42), 42);
    }

    #[test]
    fn batch_defers_and_coalesces() {
        let r = Reactor::default();
        r.set("value", 0).unwrap();
        let (_o, count) = counting_observer(&r, "value");
        assert_eq!(count.get(), 1);

        let out = batch(|| {
            r.set("value", 1).unwrap();
            r.set("value", 2).unwrap();
            r.set("value", 3).unwrap();
            assert_eq!(count.get(), 1, "no runs inside the batch");
            "done"
        })
        .unwrap();
        assert_eq!(out, "done");
        assert_eq!(count.get(), 2, "one coalesced run after the batch");
        assert_eq!(r.get("value"), Some(Value::from(3)));
    }

    #[test]
    fn nested_batches_drain_at_outermost_exit() {
        let r = Reactor::default();
        r.set("value", 0).unwrap();
        let (_o, count) = counting_observer(&r, "value");

        batch(|| {
            batch(|| {
                r.set("value", 1).unwrap();
            })
            .unwrap();
            assert_eq!(count.get(), 1, "inner batch exit must not drain");
            r.set("value", 2).unwrap();
        })
        .unwrap();
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn writes_inside_batch_are_visible_to_reads() {
        let r = Reactor::default();
        batch(|| {
            r.set("k", 5).unwrap();
            assert_eq!(r.get("k"), Some(Value::from(5)));
        })
        .unwrap();
    }

    #[test]
    fn hide_masks_reads_but_not_writes() {
        let r = Reactor::default();
        r.set("value", 0).unwrap();
        let (_o, count) = counting_observer(&r, "value");

        hide(|| r.set("value", 1).unwrap());
        assert_eq!(count.get(), 2, "writes inside hide still notify");
    }

    #[test]
    fn batch_surfaces_drain_failures() {
        let r = Reactor::default();
        r.set("value", 0).unwrap();

        let r2 = r.clone();
        let o = Observer::new(move |_| match r2.get("value").and_then(|v| v.as_num()) {
            Some(n) if n > 0.0 => Err(GraphError::custom("positive")),
            _ => Ok(Value::Null),
        });
        o.call(&[]).unwrap();

        let err = batch(|| {
            r.set("value", 1).unwrap();
        })
        .unwrap_err();
        assert!(matches!(err, GraphError::Custom(_)));
    }

    #[test]
    fn queue_is_empty_after_drain() {
        let r = Reactor::default();
        r.set("value", 0).unwrap();
        let (_o, _count) = counting_observer(&r, "value");
        r.set("value", 1).unwrap();
        assert_eq!(pending_len(), 0);
    }

    #[test]
    fn registry_releases_sources_no_run_reads_anymore() {
        let before = tracked_source_count();

        let keep = Reactor::default();
        keep.set("k", 0).unwrap();
        let tmp = Reactor::default();
        tmp.set("t", 0).unwrap();

        let keep2 = keep.clone();
        let tmp_slot: Rc<RefCell<Option<Reactor>>> = Rc::new(RefCell::new(Some(tmp)));
        let slot = Rc::clone(&tmp_slot);
        let o = Observer::from_fn(move || {
            let _ = keep2.get("k");
            if let Some(t) = slot.borrow().as_ref() {
                let _ = t.get("t");
            }
        });
        o.call(&[]).unwrap();
        assert_eq!(tracked_source_count(), before + 2);

        // Drop the temporary source; the next run no longer reads it, so
        // its subscriptions are torn down and its index entry disappears.
        *tmp_slot.borrow_mut() = None;
        keep.set("k", 1).unwrap();
        assert_eq!(tracked_source_count(), before + 1);

        o.stop();
        assert_eq!(tracked_source_count(), before, "stop releases the rest");
    }

    #[test]
    fn drain_budget_cuts_runaway_cycles() {
        let old = runtime_config();
        set_runtime_config(RuntimeConfig::new(16));

        let r = Reactor::default();
        r.set("ping", 0).unwrap();
        r.set("pong", 0).unwrap();

        // Two observers that endlessly bounce a counter between two cells.
        let ra = r.clone();
        let a = Observer::from_fn(move || {
            if let Some(Value::Num(n)) = ra.get("ping") {
                let _ = ra.set("pong", n + 1.0);
            }
        });
        a.call(&[]).unwrap();
        let rb = r.clone();
        let b = Observer::from_fn(move || {
            if let Some(Value::Num(n)) = rb.get("pong") {
                let _ = rb.set("ping", n + 1.0);
            }
        });
        b.call(&[]).unwrap();

        let err = r.set("ping", 1).unwrap_err();
        assert!(matches!(
            err,
            GraphError::DrainBudgetExceeded { budget: 16 }
        ));
        assert_eq!(pending_len(), 0, "queue cleared after budget cut");

        set_runtime_config(old);
        // Detach the cycle so later tests in this thread are unaffected.
        a.stop();
        b.stop();
    }
}
