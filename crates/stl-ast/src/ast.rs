//! Syntax tree for STL modules.
//!
//! These types mirror the surface grammar. Names are plain strings at this
//! stage; the linker interns them under `module::name` and replaces every
//! reference with a typed handle.

use crate::Spanned;

/// One parsed `.stl` file: `module <name>;` followed by declarations.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleSyntax {
    pub name: Spanned<String>,
    pub items: Vec<Spanned<Item>>,
}

/// Top-level declarations of a module.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Const(ConstDef),
    Role(RoleDef),
    State(StateDef),
    Message(MessageDef),
    Qualifier(QualifierDef),
    Event(EventDef),
    Transition(TransitionDef),
}

/// A type written in source: `bool`, `int`, `string`, `role`, or a message
/// name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeName {
    Bool,
    Int,
    String,
    /// Only legal in parameter lists.
    Role,
    /// Reference to a message declaration.
    Named(String),
}

/// A literal value: integer, boolean, string, or `null`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Literal {
    Int(i64),
    Bool(bool),
    Str(String),
    Null,
}

/// `const int kMaxRetries = 3;`
///
/// The right-hand side is a literal or a reference to another constant.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstDef {
    pub name: Spanned<String>,
    pub ty: TypeName,
    pub value: Spanned<ConstValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Literal(Literal),
    Ref(String),
}

/// `role rSender { string ipAddress; int port; }`
#[derive(Debug, Clone, PartialEq)]
pub struct RoleDef {
    pub name: Spanned<String>,
    pub fields: Vec<RoleField>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoleField {
    pub name: Spanned<String>,
    pub ty: TypeName,
}

/// `state sTlsState(int sessionId) { kNotConnected, kConnected, }`
#[derive(Debug, Clone, PartialEq)]
pub struct StateDef {
    pub name: Spanned<String>,
    pub params: Vec<ParamDef>,
    pub values: Vec<Spanned<String>>,
}

/// A declared parameter. `by_ref` marks the `&` form; reference parameters
/// accept only transition-local lvalues at call sites.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDef {
    pub name: Spanned<String>,
    pub ty: TypeName,
    pub by_ref: bool,
}

/// `message mRequest { encode "json"; required int requestId; ... }`
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDef {
    pub name: Spanned<String>,
    /// `message[]` declares an array-of-messages payload.
    pub is_array: bool,
    /// `encode "json" | "bytestream" | "protobuf"`. Absent on nested
    /// messages, which are carried by their parent's encoding.
    pub encoding: Option<Spanned<String>>,
    /// `external "pkg.Schema";` — names the registered codec or schema. A
    /// message with an external reference and no declared fields takes its
    /// field list from the schema; a `bytestream` message declares its
    /// fields and the reference keys the codec.
    pub external: Option<Spanned<String>>,
    pub fields: Vec<MessageField>,
    pub nested: Vec<MessageDef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageField {
    pub name: Spanned<String>,
    pub ty: TypeName,
    pub multiplicity: Multiplicity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Multiplicity {
    Required,
    Optional,
    Repeated,
}

/// `qualifier int UniqueInt(int prev) = external "stl.lib.UniqueInt";`
#[derive(Debug, Clone, PartialEq)]
pub struct QualifierDef {
    pub name: Spanned<String>,
    pub return_ty: TypeName,
    pub params: Vec<ParamDef>,
    pub external: Spanned<String>,
}

/// `event SendRequest(mRequest req) = external "...";` and friends.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDef {
    pub name: Spanned<String>,
    pub params: Vec<ParamDef>,
    pub body: EventBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventBody {
    /// `event eName(params);` — declared with no effect.
    NoOp,
    /// `= external "pkg.mod.Name";`
    External(Spanned<String>),
    /// `= OtherEvent(args);`
    Composite(CallExpr),
}

/// A named call with argument expressions: `Name(arg, arg)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CallExpr {
    pub target: Spanned<String>,
    pub args: Vec<Spanned<Expr>>,
}

/// A transition declaration: either a full body or a binding of another
/// transition to concrete arguments (`transition tXActual = tX(1);`).
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionDef {
    pub name: Spanned<String>,
    pub params: Vec<ParamDef>,
    pub body: TransitionBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionBody {
    Full(TransitionBlock),
    Binding(CallExpr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransitionBlock {
    pub locals: Vec<LocalDef>,
    /// Each entry is an OR-set: the named state instance must currently hold
    /// one of the listed values.
    pub pre_states: Vec<StateMatch>,
    pub events: Vec<EventLine>,
    pub post_states: Vec<StateAssign>,
    pub error_states: Option<Vec<StateAssign>>,
}

/// `int requestId;` inside a transition body.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalDef {
    pub name: Spanned<String>,
    pub ty: TypeName,
}

/// `sTlsState(sessionId).kConnected` or `sFoo(x).{kA, kB}` in `pre_states`.
#[derive(Debug, Clone, PartialEq)]
pub struct StateMatch {
    pub state: Spanned<String>,
    pub args: Vec<Spanned<Expr>>,
    pub values: Vec<Spanned<String>>,
}

/// `sTlsState(sessionId).kConnected` in `post_states` / `error_states`.
#[derive(Debug, Clone, PartialEq)]
pub struct StateAssign {
    pub state: Spanned<String>,
    pub args: Vec<Spanned<Expr>>,
    pub value: Spanned<String>,
}

/// `rSender -> SendRequest(...) -> rReceiver;` inside `events { }`.
#[derive(Debug, Clone, PartialEq)]
pub struct EventLine {
    pub source: Spanned<String>,
    pub call: CallExpr,
    pub target: Spanned<String>,
}

/// Value expressions: call arguments, message field values, state arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    /// Dotted reference: `name` or `role.field`.
    Ref(Vec<String>),
    /// `&name` — an lvalue handed to a reference parameter.
    RefOut(Vec<String>),
    /// `mName { field = expr; ... }`
    MessageLiteral {
        name: Spanned<String>,
        fields: Vec<FieldInit>,
    },
    /// `mName [ { ... }, { ... } ]`
    MessageArray {
        name: Spanned<String>,
        elements: Vec<Vec<FieldInit>>,
    },
    /// `[ expr, expr ]`
    Array(Vec<Spanned<Expr>>),
    /// `{ field = expr; ... }` — an anonymous struct; its message type comes
    /// from the field it is assigned to.
    Struct(Vec<FieldInit>),
    /// `Qualifier(args)` or `Qualifier(args) -> localVar`, legal only as a
    /// message field value.
    Qualifier {
        name: Spanned<String>,
        args: Vec<Spanned<Expr>>,
        out: Option<Spanned<String>>,
    },
}

/// `field = expr;` inside a message or struct literal.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInit {
    pub name: Spanned<String>,
    pub value: Spanned<Expr>,
}

impl std::fmt::Display for TypeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeName::Bool => write!(f, "bool"),
            TypeName::Int => write!(f, "int"),
            TypeName::String => write!(f, "string"),
            TypeName::Role => write!(f, "role"),
            TypeName::Named(name) => write!(f, "{name}"),
        }
    }
}

impl std::fmt::Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Int(v) => write!(f, "{v}"),
            Literal::Bool(v) => write!(f, "{v}"),
            Literal::Str(v) => write!(f, "{v:?}"),
            Literal::Null => write!(f, "null"),
        }
    }
}
