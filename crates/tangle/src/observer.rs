#![forbid(unsafe_code)]

//! Observers: callable records whose bodies re-run when their reads change.
//!
//! # Design
//!
//! An [`Observer`] wraps a fallible body. Invoking it captures the call
//! arguments and runs the body with dependency tracking: every tracked read
//! performed during the run subscribes the observer to that cell, and the
//! whole subscription set is replaced wholesale on each run. When a write
//! later changes one of those cells, the observer is enqueued and re-run
//! with the most recently captured arguments.
//!
//! The run procedure is the heart of the engine:
//!
//! 1. mark `Running`,
//! 2. tear down all prior subscriptions,
//! 3. push a tracking frame,
//! 4. invoke the body with the replayed arguments,
//! 5. pop the frame,
//! 6. mark `Idle` and record the returned value.
//!
//! # Invariants
//!
//! 1. A freshly constructed observer is `Stopped`: it owns no subscriptions
//!    and nothing triggers it until it is invoked or started.
//! 2. A cell read last run but not this run no longer re-triggers the
//!    observer.
//! 3. On a body failure the stack and state are restored, subscriptions are
//!    cleared, and the error propagates to whoever caused the run.
//! 4. `start`/`stop` are idempotent.
//!
//! # Failure Modes
//!
//! - Recursive self-invocation from inside the body fails with
//!   [`GraphError::ReentrantObserver`] instead of aborting.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::error::GraphError;
use crate::registry::AccessKey;
use crate::runtime;
use crate::value::Value;

/// Lifecycle state of an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverState {
    /// Active and waiting for one of its cells to change.
    Idle,
    /// Currently executing its body.
    Running,
    /// Deactivated; owns no subscriptions and ignores notifications.
    Stopped,
}

type BodyFn = Box<dyn FnMut(&[Value]) -> Result<Value, GraphError>>;

/// Shared interior of an observer.
pub(crate) struct ObserverCore {
    id: u64,
    state: Cell<ObserverState>,
    body: RefCell<BodyFn>,
    value: RefCell<Option<Value>>,
    args: RefCell<Vec<Value>>,
    deps: RefCell<Vec<(usize, AccessKey)>>,
}

impl ObserverCore {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn state(&self) -> ObserverState {
        self.state.get()
    }

    pub(crate) fn push_dep(&self, source_id: usize, key: AccessKey) {
        self.deps.borrow_mut().push((source_id, key));
    }

    pub(crate) fn take_deps(&self) -> Vec<(usize, AccessKey)> {
        self.deps.borrow_mut().drain(..).collect()
    }
}

/// Execute one observer run.
///
/// Callers are the drain loop, direct invocation, and `start`.
pub(crate) fn run_core(core: &Rc<ObserverCore>) -> Result<Value, GraphError> {
    let mut body = core
        .body
        .try_borrow_mut()
        .map_err(|_| GraphError::ReentrantObserver)?;
    core.state.set(ObserverState::Running);
    runtime::unsubscribe_all(core);
    let args: Vec<Value> = core.args.borrow().clone();

    let result = {
        let _frame = runtime::FrameGuard::tracking(Rc::clone(core));
        (*body)(&args)
    };
    drop(body);

    match result {
        Ok(value) => {
            // The body may have stopped its own observer; keep that state.
            if core.state.get() == ObserverState::Running {
                core.state.set(ObserverState::Idle);
            }
            *core.value.borrow_mut() = Some(value.clone());
            Ok(value)
        }
        Err(err) => {
            runtime::unsubscribe_all(core);
            if core.state.get() == ObserverState::Running {
                core.state.set(ObserverState::Idle);
            }
            Err(err)
        }
    }
}

/// A callable whose body automatically re-runs when its tracked reads change.
///
/// Cloning produces another handle to the **same** observer; handles compare
/// equal iff they share state.
#[derive(Clone)]
pub struct Observer {
    core: Rc<ObserverCore>,
}

impl Observer {
    /// Create an observer from a fallible body.
    ///
    /// The observer starts out `Stopped`; invoke it (or call
    /// [`start`](Self::start)) to bind its dependencies.
    pub fn new(body: impl FnMut(&[Value]) -> Result<Value, GraphError> + 'static) -> Self {
        Self {
            core: Rc::new(ObserverCore {
                id: runtime::next_observer_id(),
                state: Cell::new(ObserverState::Stopped),
                body: RefCell::new(Box::new(body)),
                value: RefCell::new(None),
                args: RefCell::new(Vec::new()),
                deps: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Create an observer from an infallible side-effecting closure.
    pub fn from_fn(mut f: impl FnMut() + 'static) -> Self {
        Self::new(move |_args| {
            f();
            Ok(Value::Null)
        })
    }

    /// Invoke the observer: capture `args`, run the body, return its result.
    ///
    /// Invocation activates a stopped observer.
    ///
    /// # Errors
    ///
    /// The body's own failure, or [`GraphError::ReentrantObserver`] when
    /// called from inside this observer's body.
    pub fn call(&self, args: &[Value]) -> Result<Value, GraphError> {
        *self.core.args.borrow_mut() = args.to_vec();
        run_core(&self.core)
    }

    /// Ensure the observer is active, running it once with the last
    /// captured arguments if it was stopped. No-op when already active.
    ///
    /// # Errors
    ///
    /// The body's failure from the activation run.
    pub fn start(&self) -> Result<(), GraphError> {
        if self.core.state.get() != ObserverState::Stopped {
            return Ok(());
        }
        run_core(&self.core).map(|_| ())
    }

    /// Deactivate the observer and clear its subscriptions. Idempotent.
    pub fn stop(&self) {
        if self.core.state.get() == ObserverState::Stopped {
            return;
        }
        self.core.state.set(ObserverState::Stopped);
        runtime::unsubscribe_all(&self.core);
        runtime::unqueue(self.core.id);
    }

    /// Replace the body: equivalent to `stop()`, swap, `start()`.
    ///
    /// The immediate re-run populates the new body's dependency set.
    ///
    /// # Errors
    ///
    /// The new body's failure from its first run, or
    /// [`GraphError::ReentrantObserver`] when called from inside the body.
    pub fn set_body(
        &self,
        body: impl FnMut(&[Value]) -> Result<Value, GraphError> + 'static,
    ) -> Result<(), GraphError> {
        self.stop();
        *self
            .core
            .body
            .try_borrow_mut()
            .map_err(|_| GraphError::ReentrantObserver)? = Box::new(body);
        self.start()
    }

    /// The value returned by the last successful run, if any.
    #[must_use]
    pub fn value(&self) -> Option<Value> {
        self.core.value.borrow().clone()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ObserverState {
        self.core.state.get()
    }
}

impl PartialEq for Observer {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }
}

impl Eq for Observer {}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("id", &self.core.id)
            .field("state", &self.core.state.get())
            .field("has_value", &self.core.value.borrow().is_some())
            .finish()
    }
}
