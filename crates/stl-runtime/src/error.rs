//! Runtime errors.
//!
//! These are the framework-fatal conditions. Recoverable event failures are
//! not errors; they are consumed by the owning transition frame and surface
//! as a [`crate::executor::TransitionOutcome`].

use thiserror::Error;

/// Runtime result type
pub type Result<T> = std::result::Result<T, Error>;

/// Runtime errors
#[derive(Debug, Error)]
pub enum Error {
    /// An `external` name used by the program has no registered
    /// implementation.
    #[error("no primitive registered for '{0}'")]
    Registry(String),

    /// A step was requested for a role with no firable transition.
    /// Reported, not fatal; the driver chooses whether to abort.
    #[error("role '{role}' has no firable transition")]
    Stuck {
        role: String,
        /// The preconditions that kept each reachable transition from
        /// firing.
        unsatisfied: Vec<String>,
    },

    /// Event expansion exceeded the bound.
    #[error("event expansion exceeded depth {limit} while expanding '{event}'")]
    DepthExceeded { event: String, limit: usize },

    /// A primitive reported a fatal condition, or an invariant was violated.
    #[error("fatal: {0}")]
    Fatal(String),
}
