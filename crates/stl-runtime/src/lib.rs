//! STL runtime: value model, encodings, primitive registry, and the
//! transition executor.
//!
//! The executor consumes the immutable [`stl_resolve::Program`], a set of
//! role instances, and a [`PrimitiveRegistry`] populated by the host, and
//! drives roles through firable transitions while holding the global-state
//! valuation.

pub mod builtins;
pub mod encoding;
pub mod error;
pub mod executor;
pub mod registry;
pub mod rng;
pub mod value;

pub use error::{Error, Result};
pub use executor::{
    Executor, GlobalState, RoleInstance, SelectionPolicy, StateKey, StepReport,
    TransitionOutcome, DEFAULT_EXPANSION_DEPTH,
};
pub use registry::{
    verify_registry, CodecSet, Direction, Encoder, EventContext, EventHandler, EventOutcome,
    MessageCodec, PrimitiveRegistry, QualifierHandler,
};
pub use rng::RngStream;
pub use value::{matches, MessageBody, MessageValue, Value};
