//! Conformance test driver.
//!
//! Loads a manifest, parses and links the STL files it names, assembles the
//! builtin primitive registry, and drives the test roles until every
//! executable transition has run (or no progress is possible).

pub mod manifest;

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use stl_ast::SourceMap;
use stl_resolve::{Program, RoleId, Ty};
use stl_runtime::builtins::register_builtins;
use stl_runtime::{
    Executor, PrimitiveRegistry, RoleInstance, SelectionPolicy, Value,
};

/// Driver-level errors, ordered by exit code.
#[derive(Debug, Error)]
pub enum RunError {
    /// Lex/parse/link/type error, with a human-readable location.
    #[error("{0}")]
    Static(String),
    /// Runtime failure surfaced by the executor.
    #[error(transparent)]
    Runtime(#[from] stl_runtime::Error),
    /// The manifest could not be read or parsed.
    #[error("{0}")]
    Manifest(String),
}

impl RunError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Static(_) => 1,
            RunError::Runtime(_) => 2,
            RunError::Manifest(_) => 3,
        }
    }
}

/// Knobs for one run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Seed for randomized builtins (and selection, when `randomize`).
    pub seed: u64,
    /// Use the randomized selection policy instead of declaration order.
    pub randomize: bool,
}

/// What one conformance run did.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Executables that committed at least once.
    pub executed: Vec<String>,
    /// Executables that ran but failed (rolled back or took error states).
    pub failed: Vec<String>,
    /// Executables never reached.
    pub remaining: Vec<String>,
}

impl RunSummary {
    /// Conformance holds when everything executed and nothing failed.
    pub fn success(&self) -> bool {
        self.failed.is_empty() && self.remaining.is_empty()
    }
}

/// Run a conformance test from a manifest file.
pub fn run_test(
    manifest_path: &Path,
    manifest_args: &IndexMap<String, String>,
    options: RunOptions,
) -> Result<RunSummary, RunError> {
    let manifest = manifest::load(manifest_path, manifest_args)?;
    let root = manifest_path.parent().unwrap_or_else(|| Path::new("."));

    let (program, _sources) = load_program(root, &manifest.stl_files)?;

    let mut registry = PrimitiveRegistry::new();
    register_builtins(&mut registry, options.seed);

    let mut executor = Executor::new(&program, registry)?;
    if options.randomize {
        executor.set_policy(SelectionPolicy::Randomized { seed: options.seed });
    }

    for entry in &manifest.roles {
        executor.add_role(role_instance(&program, entry)?);
    }
    let mut driven = Vec::new();
    for name in &manifest.test {
        let role = program
            .find_role(name)
            .ok_or_else(|| RunError::Manifest(format!("cannot find a role: {name}")))?;
        executor.drive(role)?;
        driven.push(role);
    }
    if driven.is_empty() {
        return Err(RunError::Manifest("no roles to test".to_string()));
    }

    executor.initialize_default_states()?;
    run_conformance(&mut executor, &driven).map_err(RunError::Runtime)
}

/// Parse and link every STL file of the manifest.
fn load_program(
    root: &Path,
    stl_files: &[String],
) -> Result<(Program, SourceMap), RunError> {
    let mut sources = SourceMap::new();
    let mut modules = Vec::new();
    for file in stl_files {
        let path: PathBuf = root.join(file);
        let text = std::fs::read_to_string(&path)
            .map_err(|e| RunError::Manifest(format!("cannot read {}: {e}", path.display())))?;
        let file_id = sources.add_file(path, text);
        let text = &sources.file(&stl_ast::Span::zero(file_id)).source;
        let module = stl_parser::parse_source(text, file_id).map_err(|e| {
            RunError::Static(format!("[{}] {}", sources.location(&e.span), e.message))
        })?;
        debug!(module = %module.name.node, "parsed");
        modules.push(module);
    }
    let program = stl_resolve::compile(&modules).map_err(|e| {
        RunError::Static(format!("[{}] {e}", sources.location(&e.span())))
    })?;
    Ok((program, sources))
}

/// Build a role instance from its manifest entry, validating fields against
/// the declaration.
fn role_instance(
    program: &Program,
    entry: &manifest::RoleEntry,
) -> Result<RoleInstance, RunError> {
    let role = program
        .find_role(&entry.role)
        .ok_or_else(|| RunError::Manifest(format!("cannot find a role: {}", entry.role)))?;
    let decl = program.role(role);
    let mut fields = IndexMap::new();
    for (name, value) in &entry.fields {
        let Some(ty) = decl.fields.get(name) else {
            return Err(RunError::Manifest(format!(
                "no field exists in role '{}': {name}",
                entry.role
            )));
        };
        let value = match (ty, value) {
            (Ty::Str, serde_json::Value::String(s)) => Value::Str(s.clone()),
            (Ty::Int, serde_json::Value::Number(n)) if n.is_i64() => {
                Value::Int(n.as_i64().unwrap_or_default())
            }
            (Ty::Bool, serde_json::Value::Bool(b)) => Value::Bool(*b),
            (_, serde_json::Value::Null) => Value::Null,
            _ => {
                return Err(RunError::Manifest(format!(
                    "field '{name}' of role '{}' has the wrong type",
                    entry.role
                )))
            }
        };
        fields.insert(name.clone(), value);
    }
    Ok(RoleInstance {
        role,
        name: decl.name.clone(),
        fields,
    })
}

/// Drive the test roles round-robin until every executable transition has
/// run once, or no further progress is possible.
///
/// When no unexecuted transition is firable, the driver takes a bounded
/// number of "bridge" steps (re-running already-covered transitions) to move
/// the valuation toward the rest.
pub fn run_conformance(
    executor: &mut Executor<'_>,
    driven: &[RoleId],
) -> Result<RunSummary, stl_runtime::Error> {
    let program = executor.program();
    let total = program.executables.len();
    let mut remaining: Vec<usize> = (0..total).collect();
    let mut executed = Vec::new();
    let mut failed = Vec::new();
    let mut bridge_budget = total * 4 + 8;

    while !remaining.is_empty() {
        let mut progressed = false;
        for &role in driven {
            let candidates = executor.candidates(role)?;
            let Some(&index) = candidates.iter().find(|i| remaining.contains(i)) else {
                continue;
            };
            let report = executor.run_executable(index)?;
            remaining.retain(|i| *i != index);
            if report.committed() {
                info!(transition = %report.executable, "PASSED");
                executed.push(report.executable);
            } else {
                warn!(transition = %report.executable, outcome = ?report.outcome, "FAILED");
                failed.push(report.executable);
            }
            progressed = true;
        }
        if progressed {
            continue;
        }

        // Re-run an already-covered transition to unlock the rest.
        let mut bridged = false;
        for &role in driven {
            if bridge_budget == 0 {
                break;
            }
            let candidates = executor.candidates(role)?;
            let Some(&index) = candidates.first() else {
                continue;
            };
            bridge_budget -= 1;
            debug!(
                transition = %program.executables[index].name,
                "bridge step"
            );
            let report = executor.run_executable(index)?;
            if !report.committed() {
                warn!(transition = %report.executable, "bridge step failed");
            }
            bridged = true;
            break;
        }
        if !bridged {
            break;
        }
    }

    let remaining = remaining
        .into_iter()
        .map(|i| program.executables[i].name.clone())
        .collect();
    Ok(RunSummary {
        executed,
        failed,
        remaining,
    })
}
