#![forbid(unsafe_code)]

//! Tangle: a cell-granular reactive object graph.
//!
//! # Role
//! `tangle` is the state layer for reactive frontends: shared dynamic
//! objects whose reads become dependencies and whose writes re-run the
//! observers that depend on them. Binding layers (UI trees, render loops)
//! consume it through two operations — construct an [`Observer`], and attach
//! a function whose reads become its dependencies.
//!
//! # Primary responsibilities
//! - **[`Reactor`]**: tracked wrapper over a shared object source; reads
//!   subscribe at cell granularity (value, existence, key set), writes diff
//!   the observable projection and notify exactly what changed.
//! - **[`Observer`]**: a callable whose body re-runs whenever a cell it read
//!   on its last run changes; dependencies are replaced wholesale per run.
//! - **[`batch`]**: defer notifications until the outermost scope exits, so
//!   write storms coalesce into at most one run per observer.
//! - **[`hide`]**: read without subscribing.
//! - **[`shuck`]**: recover the raw, untracked [`Obj`] source behind a
//!   wrapper.
//!
//! # How it fits together
//! A write consults the cell registry for subscribers, enqueues them on a
//! de-duplicating pending queue, and (outside a batch) drains the queue
//! before returning. Each drained observer re-runs; reads during the run
//! repopulate its dependency set through the thread-local subscriber stack.
//! Failures never abort a drain: every enqueued observer runs, then a single
//! error or a flattened composite surfaces to the writer.
//!
//! # Example
//!
//! ```ignore
//! use tangle::{obj, Observer, Reactor};
//!
//! let state = Reactor::from(obj! { "count" => 0 });
//!
//! let view = state.clone();
//! let render = Observer::from_fn(move || {
//!     let count = view.get("count").and_then(|v| v.as_num()).unwrap_or(0.0);
//!     println!("count is {count}");
//! });
//! render.call(&[])?;            // prints "count is 0", binds the dependency
//!
//! state.set("count", 1)?;       // prints "count is 1"
//! state.set("count", 1)?;       // silent: nothing observable changed
//! # Ok::<(), tangle::GraphError>(())
//! ```
//!
//! The engine is single-threaded cooperative; all coordination state is
//! thread-local and no operation suspends.

pub mod error;
pub mod object;
pub mod observer;
pub mod reactor;
pub mod runtime;
pub mod value;

mod macros;
pub(crate) mod registry;

#[cfg(feature = "json")]
mod json;

pub use error::GraphError;
pub use object::{Obj, ObjKind};
pub use observer::{Observer, ObserverState};
pub use reactor::{shuck, Reactor};
pub use runtime::{batch, hide, runtime_config, set_runtime_config, RuntimeConfig};
pub use value::Value;
