//! The linked, type-checked, immutable program representation.
//!
//! Declarations live in typed arenas on [`Program`]; handles are plain index
//! newtypes. Per-module name tables map local names to handles. Everything is
//! immutable once linking returns.

use indexmap::IndexMap;
use stl_ast::{Literal, Multiplicity, Span};

macro_rules! decl_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

decl_id!(
    /// Handle to a constant declaration.
    ConstId
);
decl_id!(
    /// Handle to a role declaration.
    RoleId
);
decl_id!(
    /// Handle to a state declaration.
    StateId
);
decl_id!(
    /// Handle to a message declaration (top-level or nested).
    MessageId
);
decl_id!(
    /// Handle to a qualifier declaration.
    QualifierId
);
decl_id!(
    /// Handle to an event declaration.
    EventId
);
decl_id!(
    /// Handle to a transition declaration.
    TransitionId
);

/// A resolved type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ty {
    Bool,
    Int,
    Str,
    /// Role-typed parameter; only legal as an event endpoint or a field base.
    Role,
    Message(MessageId),
}

/// Message encoding, from `encode "...";`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Json,
    Bytestream,
    Protobuf,
}

impl Encoding {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "json" => Some(Encoding::Json),
            "bytestream" => Some(Encoding::Bytestream),
            "protobuf" => Some(Encoding::Protobuf),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Json => "json",
            Encoding::Bytestream => "bytestream",
            Encoding::Protobuf => "protobuf",
        }
    }
}

/// The union of all linked modules.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub modules: IndexMap<String, ModuleDecls>,
    pub consts: Vec<Const>,
    pub roles: Vec<Role>,
    pub states: Vec<StateDecl>,
    pub messages: Vec<MessageDecl>,
    pub qualifiers: Vec<QualifierDecl>,
    pub events: Vec<EventDecl>,
    pub transitions: Vec<TransitionDecl>,
    /// Executable transitions in declaration order: parameterless full
    /// transitions plus bindings, excluding those with no events.
    pub executables: Vec<Executable>,
    /// Composite events that participate in a reference cycle. Legal, but
    /// only terminating expansions will execute.
    pub recursive_events: Vec<EventId>,
}

/// Per-module name tables, each keyed by local name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleDecls {
    pub name: String,
    pub consts: IndexMap<String, ConstId>,
    pub roles: IndexMap<String, RoleId>,
    pub states: IndexMap<String, StateId>,
    pub messages: IndexMap<String, MessageId>,
    pub qualifiers: IndexMap<String, QualifierId>,
    pub events: IndexMap<String, EventId>,
    pub transitions: IndexMap<String, TransitionId>,
}

/// `const int kMax = 3;` with the value fully evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct Const {
    pub name: String,
    pub ty: Ty,
    pub value: Literal,
    pub span: Span,
}

/// A role declaration. Instances are created from the manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct Role {
    pub name: String,
    pub fields: IndexMap<String, Ty>,
    pub span: Span,
}

/// A state declaration: parameter types plus the set of symbolic values.
#[derive(Debug, Clone, PartialEq)]
pub struct StateDecl {
    pub name: String,
    pub params: Vec<Ty>,
    pub values: Vec<String>,
    pub span: Span,
}

impl StateDecl {
    pub fn value_index(&self, name: &str) -> Option<usize> {
        self.values.iter().position(|v| v == name)
    }
}

/// A message declaration.
///
/// Nested messages get their own arena entry, named
/// `module::mOuter::mInner`, and are reachable through `nested`. Messages
/// with an `external` schema carry no fields at link time; their layout is
/// owned by the registered codec.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDecl {
    pub name: String,
    pub encoding: Option<Encoding>,
    pub is_array: bool,
    pub external: Option<String>,
    pub fields: Vec<FieldDecl>,
    pub nested: IndexMap<String, MessageId>,
    pub span: Span,
}

impl MessageDecl {
    pub fn field(&self, name: &str) -> Option<&FieldDecl> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// One field of a message.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub ty: Ty,
    pub multiplicity: Multiplicity,
}

impl FieldDecl {
    pub fn is_required(&self) -> bool {
        self.multiplicity == Multiplicity::Required
    }

    pub fn is_repeated(&self) -> bool {
        self.multiplicity == Multiplicity::Repeated
    }
}

/// A qualifier declaration; the implementation is always external.
#[derive(Debug, Clone, PartialEq)]
pub struct QualifierDecl {
    pub name: String,
    pub ret: Ty,
    pub params: Vec<Ty>,
    pub external: String,
    pub span: Span,
}

/// A declared parameter of an event or transition.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDecl {
    pub name: String,
    pub ty: Ty,
    pub by_ref: bool,
}

/// A transition-local variable.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalDecl {
    pub name: String,
    pub ty: Ty,
}

/// An event declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDecl {
    pub name: String,
    pub params: Vec<ParamDecl>,
    pub body: EventBody,
    pub span: Span,
}

/// What an event does when executed.
#[derive(Debug, Clone, PartialEq)]
pub enum EventBody {
    /// Declared with no effect; always succeeds.
    NoOp,
    /// Terminal: invokes the registered primitive of this dotted name.
    External(String),
    /// Expands into another event with these arguments.
    Composite { event: EventId, args: Vec<Rvalue> },
}

/// A transition declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionDecl {
    pub name: String,
    pub params: Vec<ParamDecl>,
    pub kind: TransitionKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionKind {
    Full(TransitionBody),
    /// `transition tXActual = tX(1);`
    Binding {
        target: TransitionId,
        args: Vec<Rvalue>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransitionBody {
    pub locals: Vec<LocalDecl>,
    pub pre_states: Vec<StateTest>,
    pub events: Vec<EventStep>,
    pub post_states: Vec<StateSet>,
    pub error_states: Option<Vec<StateSet>>,
}

/// One `pre_states` entry: the instance must hold one of `allowed`.
#[derive(Debug, Clone, PartialEq)]
pub struct StateTest {
    pub state: StateId,
    pub args: Vec<Rvalue>,
    /// Indices into the state declaration's value list.
    pub allowed: Vec<usize>,
}

/// One `post_states` / `error_states` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSet {
    pub state: StateId,
    pub args: Vec<Rvalue>,
    /// Index into the state declaration's value list.
    pub value: usize,
}

/// One line of a transition's `events` block.
#[derive(Debug, Clone, PartialEq)]
pub struct EventStep {
    pub source: Endpoint,
    pub event: EventId,
    pub args: Vec<Rvalue>,
    pub target: Endpoint,
}

/// An event endpoint: a declared role or a role-typed parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Role(RoleId),
    Param(usize),
}

/// An executable unit: a parameterless transition or a binding, with its
/// argument values.
#[derive(Debug, Clone, PartialEq)]
pub struct Executable {
    pub name: String,
    pub transition: TransitionId,
    pub args: Vec<Rvalue>,
    pub span: Span,
}

/// A resolved value expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Rvalue {
    Literal(Literal),
    Const(ConstId),
    /// Read of the n-th parameter of the enclosing transition or event.
    Param(usize),
    /// Read of the n-th transition-local variable.
    Local(usize),
    /// Handle to the n-th transition-local variable (`&var`).
    LocalRef(usize),
    Role(RoleId),
    /// `role.field` read.
    RoleField { base: Endpoint, field: String },
    /// Qualifier call, optionally writing its value to a cell (`-> var`).
    Qualifier {
        qualifier: QualifierId,
        args: Vec<Rvalue>,
        out: Option<WriteTarget>,
    },
    Message(MessageLiteral),
    Array(Vec<Rvalue>),
}

/// Target of a qualifier write: a transition-local cell, directly or through
/// a reference parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteTarget {
    Local(usize),
    Param(usize),
}

/// A message literal with its fields resolved against the declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageLiteral {
    pub message: MessageId,
    pub body: MessageLiteralBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageLiteralBody {
    Object(Vec<(String, Rvalue)>),
    Array(Vec<Vec<(String, Rvalue)>>),
}

impl Program {
    pub fn const_decl(&self, id: ConstId) -> &Const {
        &self.consts[id.index()]
    }

    pub fn role(&self, id: RoleId) -> &Role {
        &self.roles[id.index()]
    }

    pub fn state(&self, id: StateId) -> &StateDecl {
        &self.states[id.index()]
    }

    pub fn message(&self, id: MessageId) -> &MessageDecl {
        &self.messages[id.index()]
    }

    pub fn qualifier(&self, id: QualifierId) -> &QualifierDecl {
        &self.qualifiers[id.index()]
    }

    pub fn event(&self, id: EventId) -> &EventDecl {
        &self.events[id.index()]
    }

    pub fn transition(&self, id: TransitionId) -> &TransitionDecl {
        &self.transitions[id.index()]
    }

    /// Look up a role by fully-qualified `module::name`.
    pub fn find_role(&self, qualified: &str) -> Option<RoleId> {
        let (module, name) = qualified.split_once("::")?;
        self.modules.get(module)?.roles.get(name).copied()
    }

    /// Human-readable name for a type.
    pub fn ty_name(&self, ty: &Ty) -> String {
        match ty {
            Ty::Bool => "bool".to_string(),
            Ty::Int => "int".to_string(),
            Ty::Str => "string".to_string(),
            Ty::Role => "role".to_string(),
            Ty::Message(id) => self.message(*id).name.clone(),
        }
    }
}
