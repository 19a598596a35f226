//! Transition executor.
//!
//! Owns the global-state valuation, role instances, and the primitive
//! registry, and drives roles through firable transitions. Single-threaded
//! and cooperative: each step runs to completion with no interleaving.
//!
//! A transition frame moves through `INIT → RUNNING → {COMMIT | ROLLBACK |
//! ERROR_COMMIT} → DONE`. State updates are visible only on commit; a failed
//! transition leaves the valuation exactly as it found it unless
//! `error_states` is declared.

use indexmap::IndexMap;
use tracing::{debug, info, info_span, trace, warn};

use crate::error::{Error, Result};
use crate::registry::{verify_registry, Direction, EventOutcome, PrimitiveRegistry};
use crate::rng::RngStream;
use crate::value::{MessageBody, MessageValue, Value};
use stl_ast::Literal;
use stl_resolve::{
    Endpoint, EventBody, EventId, MessageLiteralBody, ParamDecl, Program, RoleId, Rvalue,
    StateId, StateSet, TransitionBody, TransitionKind, Ty, WriteTarget,
};

/// Default bound on composite-event expansion depth.
pub const DEFAULT_EXPANSION_DEPTH: usize = 64;

/// A role instance created from the manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleInstance {
    pub role: RoleId,
    /// Fully-qualified `module::name`.
    pub name: String,
    pub fields: IndexMap<String, Value>,
}

/// A concrete state instance: declaration plus evaluated parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateKey {
    pub state: StateId,
    pub args: Vec<Literal>,
}

impl StateKey {
    pub fn describe(&self, program: &Program) -> String {
        let decl = program.state(self.state);
        if self.args.is_empty() {
            decl.name.clone()
        } else {
            let args: Vec<String> = self.args.iter().map(|a| a.to_string()).collect();
            format!("{}({})", decl.name, args.join(", "))
        }
    }
}

/// The global-state valuation `G`: a partial mapping from state instance to
/// symbolic value. Mutated only by the commit phase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalState {
    values: IndexMap<StateKey, String>,
}

impl GlobalState {
    pub fn get(&self, key: &StateKey) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: StateKey, value: String) {
        self.values.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StateKey, &str)> {
        self.values.iter().map(|(k, v)| (k, v.as_str()))
    }
}

/// How a step chooses among firable transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPolicy {
    /// First firable transition in declaration order (default).
    DeclarationOrder,
    /// Seeded random choice, for exploration. Reproducible per seed.
    Randomized { seed: u64 },
}

/// How one transition run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// Every event succeeded; `post_states` applied.
    Committed,
    /// An event failed; `error_states` applied.
    ErrorStatesApplied { event_index: usize, reason: String },
    /// An event failed with no `error_states`; valuation unchanged.
    RolledBack { event_index: usize, reason: String },
}

/// Result of one executed step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub executable: String,
    pub outcome: TransitionOutcome,
}

impl StepReport {
    pub fn committed(&self) -> bool {
        self.outcome == TransitionOutcome::Committed
    }
}

/// Frame lifecycle, mirrored in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    Init,
    Running,
    Commit,
    Rollback,
    ErrorCommit,
    Done,
}

/// Evaluation faults. Recoverable faults are consumed by the transition
/// frame; fatal ones abort the run.
enum Fault {
    Recoverable(String),
    Fatal(Error),
}

impl From<Error> for Fault {
    fn from(e: Error) -> Self {
        Fault::Fatal(e)
    }
}

/// An evaluated argument: a value, a handle to a transition-local cell, or a
/// role.
#[derive(Debug, Clone)]
enum Operand {
    Value(Value),
    Cell(usize),
    Role(RoleId),
}

/// Local-variable cells of one in-flight transition.
struct Frame {
    locals: Vec<Option<Value>>,
}

impl Frame {
    fn new(locals: usize) -> Self {
        Self {
            locals: vec![None; locals],
        }
    }

    fn read(&self, index: usize) -> Option<Value> {
        self.locals[index].clone()
    }

    fn write(&mut self, index: usize, value: Value) {
        self.locals[index] = Some(value);
    }
}

/// The transition executor.
pub struct Executor<'p> {
    program: &'p Program,
    registry: PrimitiveRegistry,
    roles: IndexMap<RoleId, RoleInstance>,
    driven: Vec<RoleId>,
    globals: GlobalState,
    policy: SelectionPolicy,
    rng: RngStream,
    max_expansion_depth: usize,
}

impl<'p> Executor<'p> {
    /// Create an executor. Fails with [`Error::Registry`] if any external
    /// name the program uses has no registered implementation.
    pub fn new(program: &'p Program, registry: PrimitiveRegistry) -> Result<Self> {
        verify_registry(program, &registry)?;
        Ok(Self {
            program,
            registry,
            roles: IndexMap::new(),
            driven: Vec::new(),
            globals: GlobalState::default(),
            policy: SelectionPolicy::DeclarationOrder,
            rng: RngStream::new(0),
            max_expansion_depth: DEFAULT_EXPANSION_DEPTH,
        })
    }

    pub fn program(&self) -> &'p Program {
        self.program
    }

    pub fn set_policy(&mut self, policy: SelectionPolicy) {
        if let SelectionPolicy::Randomized { seed } = policy {
            self.rng = RngStream::new(seed);
        }
        self.policy = policy;
    }

    pub fn set_expansion_depth(&mut self, depth: usize) {
        self.max_expansion_depth = depth;
    }

    /// Install a role instance (from the manifest).
    pub fn add_role(&mut self, instance: RoleInstance) {
        debug!(role = %instance.name, "role instance added");
        self.roles.insert(instance.role, instance);
    }

    /// Mark a role as driven (under test).
    pub fn drive(&mut self, role: RoleId) -> Result<()> {
        if !self.roles.contains_key(&role) {
            return Err(Error::Fatal(format!(
                "role '{}' has no instance to drive",
                self.program.role(role).name
            )));
        }
        if !self.driven.contains(&role) {
            self.driven.push(role);
        }
        Ok(())
    }

    pub fn globals(&self) -> &GlobalState {
        &self.globals
    }

    /// Assign a state instance directly (initial valuation).
    pub fn set_state(&mut self, state: StateId, args: Vec<Literal>, value: &str) -> Result<()> {
        let decl = self.program.state(state);
        if decl.value_index(value).is_none() {
            return Err(Error::Fatal(format!(
                "invalid value in state {}: {value}",
                decl.name
            )));
        }
        self.globals
            .set(StateKey { state, args }, value.to_string());
        Ok(())
    }

    pub fn state(&self, state: StateId, args: &[Literal]) -> Option<&str> {
        self.globals.get(&StateKey {
            state,
            args: args.to_vec(),
        })
    }

    /// Map every state instance mentioned by an executable transition to its
    /// declaration's first value, where not already set.
    pub fn initialize_default_states(&mut self) -> Result<()> {
        let program = self.program;
        let mut defaults: Vec<(StateKey, String)> = Vec::new();
        for exec in &program.executables {
            let TransitionKind::Full(body) = &program.transition(exec.transition).kind else {
                continue;
            };
            let params = self
                .static_operands(&exec.args)
                .map_err(|f| self.flatten(f, &exec.name))?;
            let mut mentioned: Vec<(StateId, &Vec<Rvalue>)> = Vec::new();
            for test in &body.pre_states {
                mentioned.push((test.state, &test.args));
            }
            for set in &body.post_states {
                mentioned.push((set.state, &set.args));
            }
            if let Some(error_states) = &body.error_states {
                for set in error_states {
                    mentioned.push((set.state, &set.args));
                }
            }
            for (state, args) in mentioned {
                let key = self
                    .state_key(&params, None, state, args)
                    .map_err(|f| self.flatten(f, &exec.name))?;
                if self.globals.get(&key).is_none()
                    && !defaults.iter().any(|(k, _)| *k == key)
                {
                    let initial = program.state(state).values[0].clone();
                    defaults.push((key, initial));
                }
            }
        }
        for (key, value) in defaults {
            debug!(state = %key.describe(program), value = %value, "initial state");
            self.globals.set(key, value);
        }
        Ok(())
    }

    /// Indices of executables that are firable and whose first event
    /// originates at `role`.
    pub fn candidates(&self, role: RoleId) -> Result<Vec<usize>> {
        Ok(self.candidates_detail(role)?.0)
    }

    /// Execute one step for a role: select a firable transition per the
    /// policy and run it. [`Error::Stuck`] if none is firable.
    pub fn step(&mut self, role: RoleId) -> Result<StepReport> {
        let role_name = self.role_name(role);
        let span = info_span!("step", role = %role_name);
        let _guard = span.enter();

        let (candidates, unsatisfied) = self.candidates_detail(role)?;
        if candidates.is_empty() {
            return Err(Error::Stuck {
                role: role_name,
                unsatisfied,
            });
        }
        let chosen = match self.policy {
            SelectionPolicy::DeclarationOrder => candidates[0],
            SelectionPolicy::Randomized { .. } => {
                candidates[self.rng.next_below(candidates.len() as u64) as usize]
            }
        };
        debug!(
            executable = %self.program.executables[chosen].name,
            candidates = candidates.len(),
            "transition selected"
        );
        self.run_executable(chosen)
    }

    /// Run one executable transition by index, unconditionally.
    ///
    /// The caller is responsible for firability (see [`Self::candidates`]).
    pub fn run_executable(&mut self, index: usize) -> Result<StepReport> {
        let program = self.program;
        let Some(exec) = program.executables.get(index) else {
            return Err(Error::Fatal(format!("no executable at index {index}")));
        };
        let decl = program.transition(exec.transition);
        let TransitionKind::Full(body) = &decl.kind else {
            return Err(Error::Fatal(format!(
                "executable '{}' does not target a full transition",
                exec.name
            )));
        };
        let params = self
            .static_operands(&exec.args)
            .map_err(|f| self.flatten(f, &exec.name))?;
        let mut frame = Frame::new(body.locals.len());
        let mut frame_state = FrameState::Init;
        trace!(transition = %exec.name, state = ?frame_state, "frame created");

        frame_state = FrameState::Running;
        trace!(transition = %exec.name, state = ?frame_state, "frame running");
        for (event_index, step) in body.events.iter().enumerate() {
            let event_name = &program.event(step.event).name;
            match self.run_event_step(&params, &mut frame, step) {
                Ok(true) => {
                    trace!(transition = %exec.name, event_index, event = %event_name, "event ok")
                }
                Ok(false) => {
                    trace!(transition = %exec.name, event_index, event = %event_name, "event skipped (no driven role)")
                }
                Err(Fault::Recoverable(reason)) => {
                    warn!(
                        transition = %exec.name,
                        event_index,
                        event = %event_name,
                        reason = %reason,
                        "event failed"
                    );
                    let outcome = if let Some(error_states) = &body.error_states {
                        frame_state = FrameState::ErrorCommit;
                        trace!(transition = %exec.name, state = ?frame_state, "frame error commit");
                        let updates = self
                            .state_updates(&params, &frame, error_states)
                            .map_err(|f| self.flatten(f, &exec.name))?;
                        self.apply_updates(updates);
                        TransitionOutcome::ErrorStatesApplied {
                            event_index,
                            reason,
                        }
                    } else {
                        // No writes have reached the valuation, so restoring
                        // the pre-frame state is leaving it untouched.
                        frame_state = FrameState::Rollback;
                        trace!(transition = %exec.name, state = ?frame_state, "frame rollback");
                        TransitionOutcome::RolledBack {
                            event_index,
                            reason,
                        }
                    };
                    frame_state = FrameState::Done;
                    trace!(transition = %exec.name, state = ?frame_state, "frame finished");
                    return Ok(StepReport {
                        executable: exec.name.clone(),
                        outcome,
                    });
                }
                Err(Fault::Fatal(e)) => return Err(e),
            }
        }

        frame_state = FrameState::Commit;
        trace!(transition = %exec.name, state = ?frame_state, "frame committing");
        // Evaluate every assignment before touching the valuation, so a
        // commit is all-or-nothing.
        let updates = self
            .state_updates(&params, &frame, &body.post_states)
            .map_err(|f| self.flatten(f, &exec.name))?;
        self.apply_updates(updates);
        frame_state = FrameState::Done;
        trace!(transition = %exec.name, state = ?frame_state, "frame finished");
        info!(transition = %exec.name, "committed");
        Ok(StepReport {
            executable: exec.name.clone(),
            outcome: TransitionOutcome::Committed,
        })
    }

    pub fn role_name(&self, role: RoleId) -> String {
        self.roles
            .get(&role)
            .map(|i| i.name.clone())
            .unwrap_or_else(|| self.program.role(role).name.clone())
    }
}

// =============================================================================
// Selection internals
// =============================================================================

impl<'p> Executor<'p> {
    fn candidates_detail(&self, role: RoleId) -> Result<(Vec<usize>, Vec<String>)> {
        let program = self.program;
        let mut firable = Vec::new();
        let mut unsatisfied = Vec::new();
        for (index, exec) in program.executables.iter().enumerate() {
            let TransitionKind::Full(body) = &program.transition(exec.transition).kind else {
                continue;
            };
            let Some(first) = body.events.first() else {
                continue;
            };
            let params = self
                .static_operands(&exec.args)
                .map_err(|f| self.flatten(f, &exec.name))?;
            let source = self
                .endpoint_role(&params, first.source)
                .map_err(|f| self.flatten(f, &exec.name))?;
            if source != role {
                continue;
            }
            match self.unmet_preconditions(&params, body) {
                Ok(unmet) if unmet.is_empty() => firable.push(index),
                Ok(unmet) => {
                    for condition in unmet {
                        unsatisfied.push(format!("{}: {condition}", exec.name));
                    }
                }
                Err(f) => return Err(self.flatten(f, &exec.name)),
            }
        }
        Ok((firable, unsatisfied))
    }

    /// Descriptions of the pre-state entries the valuation does not satisfy.
    fn unmet_preconditions(
        &self,
        params: &[Operand],
        body: &TransitionBody,
    ) -> std::result::Result<Vec<String>, Fault> {
        let program = self.program;
        let mut unmet = Vec::new();
        for test in &body.pre_states {
            let key = self.state_key(params, None, test.state, &test.args)?;
            let decl = program.state(test.state);
            let current = self.globals.get(&key);
            let satisfied = current
                .map(|value| test.allowed.iter().any(|i| decl.values[*i] == value))
                .unwrap_or(false);
            if !satisfied {
                let allowed: Vec<&str> = test
                    .allowed
                    .iter()
                    .map(|i| decl.values[*i].as_str())
                    .collect();
                unmet.push(format!(
                    "{} is {}, needs one of [{}]",
                    key.describe(program),
                    current.unwrap_or("unset"),
                    allowed.join(", ")
                ));
            }
        }
        Ok(unmet)
    }
}

// =============================================================================
// Evaluation internals
// =============================================================================

impl<'p> Executor<'p> {
    /// Recoverable faults outside a frame context are invariant violations.
    fn flatten(&self, fault: Fault, context: &str) -> Error {
        match fault {
            Fault::Fatal(e) => e,
            Fault::Recoverable(reason) => Error::Fatal(format!("{context}: {reason}")),
        }
    }

    /// Evaluate binding-level arguments (literals, constants, roles).
    fn static_operands(&self, args: &[Rvalue]) -> std::result::Result<Vec<Operand>, Fault> {
        args.iter()
            .map(|arg| match arg {
                Rvalue::Literal(lit) => Ok(Operand::Value(lit.into())),
                Rvalue::Const(id) => {
                    Ok(Operand::Value((&self.program.const_decl(*id).value).into()))
                }
                Rvalue::Role(id) => Ok(Operand::Role(*id)),
                _ => Err(Fault::Fatal(Error::Fatal(
                    "transition binding arguments must be literals, constants, or roles"
                        .to_string(),
                ))),
            })
            .collect()
    }

    fn endpoint_role(
        &self,
        params: &[Operand],
        endpoint: Endpoint,
    ) -> std::result::Result<RoleId, Fault> {
        match endpoint {
            Endpoint::Role(id) => Ok(id),
            Endpoint::Param(index) => match params.get(index) {
                Some(Operand::Role(id)) => Ok(*id),
                _ => Err(Fault::Fatal(Error::Fatal(
                    "event endpoint parameter does not hold a role".to_string(),
                ))),
            },
        }
    }

    fn state_key(
        &self,
        params: &[Operand],
        frame: Option<&Frame>,
        state: StateId,
        args: &[Rvalue],
    ) -> std::result::Result<StateKey, Fault> {
        let mut literals = Vec::with_capacity(args.len());
        for arg in args {
            let value = self.eval_scalar(params, frame, arg)?;
            let Some(literal) = value.to_literal() else {
                return Err(Fault::Fatal(Error::Fatal(
                    "state arguments must evaluate to scalar values".to_string(),
                )));
            };
            literals.push(literal);
        }
        Ok(StateKey {
            state,
            args: literals,
        })
    }

    /// Scalar-only evaluation, usable without a mutable frame (firability
    /// checks, state keys).
    fn eval_scalar(
        &self,
        params: &[Operand],
        frame: Option<&Frame>,
        rv: &Rvalue,
    ) -> std::result::Result<Value, Fault> {
        let program = self.program;
        match rv {
            Rvalue::Literal(lit) => Ok(lit.into()),
            Rvalue::Const(id) => Ok((&program.const_decl(*id).value).into()),
            Rvalue::Param(index) => match params.get(*index) {
                Some(Operand::Value(v)) => Ok(v.clone()),
                Some(Operand::Cell(local)) => self.read_local(frame, *local),
                Some(Operand::Role(_)) => Err(Fault::Fatal(Error::Fatal(
                    "role parameter used as a value".to_string(),
                ))),
                None => Err(Fault::Fatal(Error::Fatal(
                    "parameter index out of range".to_string(),
                ))),
            },
            Rvalue::Local(index) => self.read_local(frame, *index),
            Rvalue::LocalRef(index) => Ok(frame
                .and_then(|f| f.read(*index))
                .unwrap_or(Value::Null)),
            Rvalue::RoleField { base, field } => {
                let role = self.endpoint_role(params, *base)?;
                let Some(instance) = self.roles.get(&role) else {
                    return Err(Fault::Fatal(Error::Fatal(format!(
                        "role '{}' has no instance",
                        program.role(role).name
                    ))));
                };
                match instance.fields.get(field) {
                    Some(value) => Ok(value.clone()),
                    None => Ok(Value::Null),
                }
            }
            Rvalue::Role(_) => Err(Fault::Fatal(Error::Fatal(
                "role used as a scalar value".to_string(),
            ))),
            Rvalue::Qualifier { .. } | Rvalue::Message(_) | Rvalue::Array(_) => {
                Err(Fault::Fatal(Error::Fatal(
                    "composite value in a scalar context".to_string(),
                )))
            }
        }
    }

    fn read_local(
        &self,
        frame: Option<&Frame>,
        index: usize,
    ) -> std::result::Result<Value, Fault> {
        match frame.and_then(|f| f.read(index)) {
            Some(value) => Ok(value),
            None => Err(Fault::Recoverable(
                "local variable does not have a value".to_string(),
            )),
        }
    }

    /// Full evaluation: qualifier invocation (with `-> var` writes) and
    /// message-literal construction happen here.
    fn eval_rvalue(
        &mut self,
        params: &[Operand],
        frame: &mut Frame,
        rv: &Rvalue,
    ) -> std::result::Result<Value, Fault> {
        let program = self.program;
        match rv {
            Rvalue::Qualifier {
                qualifier,
                args,
                out,
            } => {
                let decl = program.qualifier(*qualifier);
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval_rvalue(params, frame, arg)?);
                }
                let generated = self
                    .registry
                    .invoke_qualifier(&decl.external, &values)
                    .map_err(Fault::Fatal)?
                    .map_err(|reason| {
                        Fault::Recoverable(format!("qualifier '{}' failed: {reason}", decl.name))
                    })?;
                trace!(qualifier = %decl.name, value = %generated, "qualifier generated");
                if let Some(target) = out {
                    self.write_target(params, frame, *target, generated.clone())?;
                }
                Ok(generated)
            }
            Rvalue::Message(literal) => self.eval_message(params, frame, literal),
            Rvalue::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_rvalue(params, frame, item)?);
                }
                Ok(Value::Array(values))
            }
            _ => self.eval_scalar(params, Some(frame), rv),
        }
    }

    fn write_target(
        &self,
        params: &[Operand],
        frame: &mut Frame,
        target: WriteTarget,
        value: Value,
    ) -> std::result::Result<(), Fault> {
        match target {
            WriteTarget::Local(index) => {
                frame.write(index, value);
                Ok(())
            }
            WriteTarget::Param(index) => match params.get(index) {
                Some(Operand::Cell(local)) => {
                    frame.write(*local, value);
                    Ok(())
                }
                _ => Err(Fault::Fatal(Error::Fatal(
                    "reference parameter is not backed by a local cell".to_string(),
                ))),
            },
        }
    }

    /// Build a message instance. Fields are computed in declaration order;
    /// absent optional fields become `Null`.
    fn eval_message(
        &mut self,
        params: &[Operand],
        frame: &mut Frame,
        literal: &stl_resolve::MessageLiteral,
    ) -> std::result::Result<Value, Fault> {
        let body = match &literal.body {
            MessageLiteralBody::Object(inits) => {
                MessageBody::Object(self.eval_message_object(params, frame, literal.message, inits)?)
            }
            MessageLiteralBody::Array(elements) => {
                let mut objects = Vec::with_capacity(elements.len());
                for element in elements {
                    objects.push(self.eval_message_object(
                        params,
                        frame,
                        literal.message,
                        element,
                    )?);
                }
                MessageBody::Array(objects)
            }
        };
        Ok(Value::Message(MessageValue {
            message: literal.message,
            body,
        }))
    }

    fn eval_message_object(
        &mut self,
        params: &[Operand],
        frame: &mut Frame,
        message: stl_resolve::MessageId,
        inits: &[(String, Rvalue)],
    ) -> std::result::Result<IndexMap<String, Value>, Fault> {
        let program = self.program;
        let decl = program.message(message);
        let mut fields = IndexMap::new();
        if decl.fields.is_empty() {
            // External schema: keep the literal's own order.
            for (name, rv) in inits {
                let value = self.eval_rvalue(params, frame, rv)?;
                fields.insert(name.clone(), value);
            }
            return Ok(fields);
        }
        for field in &decl.fields {
            let value = match inits.iter().find(|(name, _)| *name == field.name) {
                Some((_, rv)) => self.eval_rvalue(params, frame, rv)?,
                None => Value::Null,
            };
            if field.is_required() && value.is_null() {
                return Err(Fault::Recoverable(format!(
                    "mandatory field missing in message '{}': {}",
                    decl.name, field.name
                )));
            }
            fields.insert(field.name.clone(), value);
        }
        Ok(fields)
    }

    /// Evaluate call arguments into operands, honoring reference parameters
    /// and role parameters.
    fn eval_call_operands(
        &mut self,
        params: &[Operand],
        frame: &mut Frame,
        target_params: &[ParamDecl],
        args: &[Rvalue],
    ) -> std::result::Result<Vec<Operand>, Fault> {
        let mut operands = Vec::with_capacity(args.len());
        for (param, arg) in target_params.iter().zip(args) {
            let operand = if param.by_ref {
                match arg {
                    Rvalue::LocalRef(index) => Operand::Cell(*index),
                    Rvalue::Param(index) => match params.get(*index) {
                        Some(Operand::Cell(local)) => Operand::Cell(*local),
                        _ => {
                            return Err(Fault::Fatal(Error::Fatal(
                                "reference parameter is not backed by a local cell".to_string(),
                            )))
                        }
                    },
                    _ => {
                        return Err(Fault::Fatal(Error::Fatal(format!(
                            "reference parameter '{}' needs a transition-local lvalue",
                            param.name
                        ))))
                    }
                }
            } else if param.ty == Ty::Role {
                match arg {
                    Rvalue::Role(id) => Operand::Role(*id),
                    Rvalue::Param(index) => match params.get(*index) {
                        Some(Operand::Role(id)) => Operand::Role(*id),
                        _ => {
                            return Err(Fault::Fatal(Error::Fatal(format!(
                                "role parameter '{}' did not receive a role",
                                param.name
                            ))))
                        }
                    },
                    _ => {
                        return Err(Fault::Fatal(Error::Fatal(format!(
                            "role parameter '{}' did not receive a role",
                            param.name
                        ))))
                    }
                }
            } else {
                Operand::Value(self.eval_rvalue(params, frame, arg)?)
            };
            operands.push(operand);
        }
        Ok(operands)
    }

    /// Plain values for a terminal external event.
    fn operand_values(
        &self,
        operands: &[Operand],
        frame: &Frame,
    ) -> std::result::Result<Vec<Value>, Fault> {
        operands
            .iter()
            .map(|operand| match operand {
                Operand::Value(v) => Ok(v.clone()),
                Operand::Cell(local) => Ok(frame.read(*local).unwrap_or(Value::Null)),
                Operand::Role(id) => Ok(Value::Str(self.role_name(*id))),
            })
            .collect()
    }

    /// Execute one `events` entry. `Ok(false)` means the event touches no
    /// driven role and was skipped.
    fn run_event_step(
        &mut self,
        params: &[Operand],
        frame: &mut Frame,
        step: &stl_resolve::EventStep,
    ) -> std::result::Result<bool, Fault> {
        let program = self.program;
        let source = self.endpoint_role(params, step.source)?;
        let target = self.endpoint_role(params, step.target)?;
        let source_driven = self.driven.contains(&source);
        let target_driven = self.driven.contains(&target);
        if source_driven && target_driven {
            return Err(Fault::Fatal(Error::Fatal(format!(
                "invalid transition with 2 roles under test: {}, {}",
                self.role_name(source),
                self.role_name(target)
            ))));
        }
        if !source_driven && !target_driven {
            return Ok(false);
        }
        let direction = if source_driven {
            Direction::Fire
        } else {
            Direction::Wait
        };
        let target_params = &program.event(step.event).params;
        let operands = self.eval_call_operands(params, frame, target_params, &step.args)?;
        self.expand_event(step.event, operands, frame, source, target, direction, 0)?;
        Ok(true)
    }

    /// Expand an event bottom-up until a terminal body, bounded by the
    /// expansion depth.
    #[allow(clippy::too_many_arguments)]
    fn expand_event(
        &mut self,
        event: EventId,
        operands: Vec<Operand>,
        frame: &mut Frame,
        source: RoleId,
        target: RoleId,
        direction: Direction,
        depth: usize,
    ) -> std::result::Result<(), Fault> {
        let program = self.program;
        if depth >= self.max_expansion_depth {
            return Err(Fault::Fatal(Error::DepthExceeded {
                event: program.event(event).name.clone(),
                limit: self.max_expansion_depth,
            }));
        }
        let decl = program.event(event);
        match &decl.body {
            EventBody::NoOp => {
                trace!(event = %decl.name, "no-op event");
                Ok(())
            }
            EventBody::External(name) => {
                let values = self.operand_values(&operands, frame)?;
                let Some(source_instance) = self.roles.get(&source) else {
                    return Err(Fault::Fatal(Error::Fatal(format!(
                        "role '{}' has no instance",
                        program.role(source).name
                    ))));
                };
                let Some(target_instance) = self.roles.get(&target) else {
                    return Err(Fault::Fatal(Error::Fatal(format!(
                        "role '{}' has no instance",
                        program.role(target).name
                    ))));
                };
                let outcome = self
                    .registry
                    .invoke_event(
                        program,
                        source_instance,
                        target_instance,
                        direction,
                        name,
                        &values,
                    )
                    .map_err(Fault::Fatal)?;
                match outcome {
                    EventOutcome::Ok => Ok(()),
                    EventOutcome::Failed(reason) => Err(Fault::Recoverable(reason)),
                    EventOutcome::Fatal(reason) => Err(Fault::Fatal(Error::Fatal(reason))),
                }
            }
            EventBody::Composite { event: inner, args } => {
                let inner_params = &program.event(*inner).params;
                let inner_operands =
                    self.eval_call_operands(&operands, frame, inner_params, args)?;
                self.expand_event(
                    *inner,
                    inner_operands,
                    frame,
                    source,
                    target,
                    direction,
                    depth + 1,
                )
            }
        }
    }

    /// Evaluate a `post_states` / `error_states` list into concrete updates
    /// without touching the valuation.
    fn state_updates(
        &self,
        params: &[Operand],
        frame: &Frame,
        sets: &[StateSet],
    ) -> std::result::Result<Vec<(StateKey, String)>, Fault> {
        let program = self.program;
        let mut updates = Vec::with_capacity(sets.len());
        for set in sets {
            let key = self.state_key(params, Some(frame), set.state, &set.args)?;
            let value = program.state(set.state).values[set.value].clone();
            updates.push((key, value));
        }
        Ok(updates)
    }

    fn apply_updates(&mut self, updates: Vec<(StateKey, String)>) {
        for (key, value) in updates {
            debug!(state = %key.describe(self.program), value = %value, "state committed");
            self.globals.set(key, value);
        }
    }
}
