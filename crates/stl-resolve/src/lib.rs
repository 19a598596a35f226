//! Linker and type checker for STL.
//!
//! Takes the per-file syntax trees produced by `stl-parser` and builds a
//! [`Program`]: every named entity interned under `module::name`, every
//! reference replaced with a typed handle, every body lowered to [`Rvalue`]
//! expressions the executor can evaluate directly.
//!
//! # Pipeline
//!
//! ```text
//! Parse → Register names → Resolve signatures → Resolve bodies → Type check
//! ```
//!
//! Name registration and body resolution are separate passes so declarations
//! can reference entities declared later in the same file or in another file
//! of the same run. External dotted names (`external "pkg.mod.Name"`) are
//! recorded verbatim; binding them to callables happens in the primitive
//! registry at execution time.

mod error;
mod link;
mod program;
mod suggest;
mod typecheck;

pub use error::{CompileError, LinkError, TypeError};
pub use program::*;

use stl_ast::ModuleSyntax;

/// Link a set of parsed modules into a [`Program`].
///
/// Detects duplicate names, unresolved references, arity mismatches, and
/// cyclic constant definitions. Cyclic composite events are legal and only
/// flagged (see [`Program::recursive_events`]); the executor's expansion
/// depth bound rejects runaway recursion at run time.
pub fn link(modules: &[ModuleSyntax]) -> Result<Program, LinkError> {
    link::link(modules)
}

/// Validate every type rule over a linked program.
pub fn typecheck(program: &Program) -> Result<(), TypeError> {
    typecheck::check(program)
}

/// Link and type-check in one step.
pub fn compile(modules: &[ModuleSyntax]) -> Result<Program, CompileError> {
    let program = link(modules)?;
    typecheck(&program)?;
    Ok(program)
}
