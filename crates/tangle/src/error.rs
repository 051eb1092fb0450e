#![forbid(unsafe_code)]

//! Error types for graph construction, writes, and observer drains.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | Non-object wrap | `Reactor::new` over a primitive | `NotAnObject` |
//! | Bad index | list write past the end | `IndexOutOfBounds` |
//! | Wrong shape | map op on a list source (or vice versa) | `ShapeMismatch` |
//! | Body failure | observer body returned `Err` | propagated as-is |
//! | Many body failures | several observers failed in one drain | `Multiple` |
//! | Recursive call | observer invoked from its own body | `ReentrantObserver` |
//! | Runaway cycle | write→notify→write loop exhausted the drain budget | `DrainBudgetExceeded` |

use std::fmt;

use crate::object::ObjKind;

/// Errors surfaced by the reactive graph.
///
/// A drain cycle that collects exactly one failure re-raises it unchanged;
/// two or more aggregate into [`GraphError::Multiple`], whose cause list is
/// flattened one level so chained drains still produce a single flat list.
#[derive(Debug, Clone)]
pub enum GraphError {
    /// A reactor was constructed over a value that is not object-like.
    NotAnObject {
        /// Kind of the offending value (`"null"`, `"number"`, ...).
        found: &'static str,
    },
    /// A list write addressed an index past the end of the list.
    IndexOutOfBounds {
        /// The requested index.
        index: usize,
        /// Length of the list at the time of the write.
        len: usize,
    },
    /// An operation was applied to a source of the wrong shape.
    ShapeMismatch {
        /// Name of the rejected operation.
        op: &'static str,
        /// Actual shape of the source.
        kind: ObjKind,
    },
    /// An ad-hoc failure raised by an observer body.
    Custom(String),
    /// An observer was invoked while its own body was already executing.
    ReentrantObserver,
    /// A single drain cycle ran more observers than the configured budget.
    DrainBudgetExceeded {
        /// The budget that was exhausted.
        budget: usize,
    },
    /// A value graph with a reference cycle was exported to a tree format.
    CyclicValue,
    /// Several observers failed during one drain cycle.
    Multiple(Vec<GraphError>),
}

impl GraphError {
    /// Build an ad-hoc failure, typically from inside an observer body.
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }

    /// Collapse the failures of one drain cycle into a single error.
    ///
    /// Returns `None` for an empty list, the error itself for a single
    /// failure, and [`GraphError::Multiple`] otherwise. Nested composites
    /// are flattened one level.
    pub(crate) fn aggregate(errors: Vec<GraphError>) -> Option<GraphError> {
        match errors.len() {
            0 => None,
            1 => errors.into_iter().next(),
            _ => {
                let mut flat = Vec::with_capacity(errors.len());
                for err in errors {
                    match err {
                        GraphError::Multiple(inner) => flat.extend(inner),
                        other => flat.push(other),
                    }
                }
                Some(GraphError::Multiple(flat))
            }
        }
    }

    /// The underlying causes of a composite error.
    ///
    /// Empty for non-composite errors.
    #[must_use]
    pub fn causes(&self) -> &[GraphError] {
        match self {
            Self::Multiple(list) => list,
            _ => &[],
        }
    }
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAnObject { found } => {
                write!(f, "cannot construct a reactor over a {found} value")
            }
            Self::IndexOutOfBounds { index, len } => {
                write!(f, "index {index} out of bounds for list of length {len}")
            }
            Self::ShapeMismatch { op, kind } => {
                write!(f, "operation '{op}' is not supported on a {kind} source")
            }
            Self::Custom(msg) => write!(f, "{msg}"),
            Self::ReentrantObserver => {
                write!(f, "observer invoked recursively from its own body")
            }
            Self::DrainBudgetExceeded { budget } => {
                write!(f, "notification drain exceeded its run budget of {budget}")
            }
            Self::CyclicValue => write!(f, "object graph contains a reference cycle"),
            Self::Multiple(list) => {
                write!(f, "{} observers failed during one drain cycle", list.len())
            }
        }
    }
}

impl std::error::Error for GraphError {}
