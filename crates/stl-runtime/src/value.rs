//! Runtime values.
//!
//! Tagged variants over int, bool, string, message instance, array, and
//! null/absent. A message instance keeps its fields in declaration order;
//! absent optional fields are explicitly `Null`.

use indexmap::IndexMap;
use stl_ast::Literal;
use stl_resolve::MessageId;

/// A runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Message(MessageValue),
    Array(Vec<Value>),
}

/// A message instance: the declaration handle plus field values.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageValue {
    pub message: MessageId,
    pub body: MessageBody,
}

/// Object form for plain messages, array-of-objects for `message[]`.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    Object(IndexMap<String, Value>),
    Array(Vec<IndexMap<String, Value>>),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Convert to a literal, for scalar contexts such as state arguments.
    pub fn to_literal(&self) -> Option<Literal> {
        match self {
            Value::Null => Some(Literal::Null),
            Value::Bool(v) => Some(Literal::Bool(*v)),
            Value::Int(v) => Some(Literal::Int(*v)),
            Value::Str(v) => Some(Literal::Str(v.clone())),
            Value::Message(_) | Value::Array(_) => None,
        }
    }
}

impl From<Literal> for Value {
    fn from(literal: Literal) -> Self {
        match literal {
            Literal::Int(v) => Value::Int(v),
            Literal::Bool(v) => Value::Bool(v),
            Literal::Str(v) => Value::Str(v),
            Literal::Null => Value::Null,
        }
    }
}

impl From<&Literal> for Value {
    fn from(literal: &Literal) -> Self {
        literal.clone().into()
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v:?}"),
            Value::Message(m) => {
                write!(f, "message#{}", m.message.0)
            }
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Whether `expected` is compatible with `actual`, used during event
/// validation of a decoded message.
///
/// - Objects: every field present in `expected` must match in `actual`;
///   extra actual fields are ignored. A `Null` expectation matches anything.
/// - Arrays: every expected entry must exist somewhere in the actual array.
/// - Scalars: equality.
pub fn matches(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Null, _) => true,
        (Value::Message(e), Value::Message(a)) => match (&e.body, &a.body) {
            (MessageBody::Object(e), MessageBody::Object(a)) => object_matches(e, a),
            (MessageBody::Array(e), MessageBody::Array(a)) => e.iter().all(|expected_obj| {
                a.iter().any(|actual_obj| object_matches(expected_obj, actual_obj))
            }),
            _ => false,
        },
        (Value::Array(e), Value::Array(a)) => e
            .iter()
            .all(|expected_item| a.iter().any(|actual_item| matches(expected_item, actual_item))),
        _ => expected == actual,
    }
}

fn object_matches(expected: &IndexMap<String, Value>, actual: &IndexMap<String, Value>) -> bool {
    expected.iter().all(|(name, expected_value)| {
        if expected_value.is_null() {
            return true;
        }
        match actual.get(name) {
            Some(actual_value) => matches(expected_value, actual_value),
            None => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(fields: &[(&str, Value)]) -> IndexMap<String, Value> {
        fields
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn scalar_matching() {
        assert!(matches(&Value::Int(3), &Value::Int(3)));
        assert!(!matches(&Value::Int(3), &Value::Int(4)));
        assert!(matches(&Value::Null, &Value::Int(4)));
    }

    #[test]
    fn object_subset_matching() {
        let expected = Value::Message(MessageValue {
            message: MessageId(0),
            body: MessageBody::Object(obj(&[("requestId", Value::Int(1))])),
        });
        let actual = Value::Message(MessageValue {
            message: MessageId(0),
            body: MessageBody::Object(obj(&[
                ("requestId", Value::Int(1)),
                ("payload", Value::Str("extra".to_string())),
            ])),
        });
        assert!(matches(&expected, &actual));
        assert!(!matches(&actual, &expected));
    }

    #[test]
    fn array_matching_is_order_insensitive() {
        let expected = Value::Array(vec![Value::Int(2), Value::Int(1)]);
        let actual = Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert!(matches(&expected, &actual));
        assert!(!matches(&actual, &expected));
    }
}
