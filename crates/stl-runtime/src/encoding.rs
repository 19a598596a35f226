//! Message encodings.
//!
//! `json` is implemented here: keys are emitted in field-declaration order
//! and the output round-trips through [`decode`] back to an equivalent
//! message instance. `bytestream` and `protobuf` delegate to the codec
//! registered under the message's `external` name.

use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::error::{Error, Result};
use crate::registry::CodecSet;
use crate::value::{MessageBody, MessageValue, Value};
use stl_resolve::{Encoding, FieldDecl, MessageDecl, MessageId, Program, Ty};

/// Encode a message instance to bytes per its declared encoding.
pub fn encode(program: &Program, codecs: &CodecSet, value: &MessageValue) -> Result<Vec<u8>> {
    let decl = program.message(value.message);
    let Some(encoding) = decl.encoding else {
        return Err(Error::Fatal(format!(
            "message '{}' has no encoding and cannot be serialized on its own",
            decl.name
        )));
    };
    match encoding {
        Encoding::Json => Ok(encode_json(program, codecs, value)?.into_bytes()),
        Encoding::Bytestream | Encoding::Protobuf => {
            let codec = external_codec(codecs, decl, encoding)?;
            codec
                .encode(program, value)
                .map_err(|reason| Error::Fatal(format!("codec failed to encode '{}': {reason}", decl.name)))
        }
    }
}

/// Decode bytes into a message instance per the declared encoding.
pub fn decode(
    program: &Program,
    codecs: &CodecSet,
    message: MessageId,
    bytes: &[u8],
) -> Result<MessageValue> {
    let decl = program.message(message);
    let Some(encoding) = decl.encoding else {
        return Err(Error::Fatal(format!(
            "message '{}' has no encoding and cannot be decoded on its own",
            decl.name
        )));
    };
    match encoding {
        Encoding::Json => {
            let json: Json = serde_json::from_slice(bytes).map_err(|e| {
                Error::Fatal(format!("cannot decode '{}' from JSON: {e}", decl.name))
            })?;
            json_to_message(program, message, &json)
        }
        Encoding::Bytestream | Encoding::Protobuf => {
            let codec = external_codec(codecs, decl, encoding)?;
            codec
                .decode(program, message, bytes)
                .map_err(|reason| Error::Fatal(format!("codec failed to decode '{}': {reason}", decl.name)))
        }
    }
}

fn external_codec<'a>(
    codecs: &'a CodecSet,
    decl: &MessageDecl,
    encoding: Encoding,
) -> Result<&'a dyn crate::registry::MessageCodec> {
    let Some(external) = &decl.external else {
        return Err(Error::Fatal(format!(
            "message '{}' uses {} encoding but names no external codec",
            decl.name,
            encoding.as_str()
        )));
    };
    codecs
        .get(external)
        .ok_or_else(|| Error::Registry(external.clone()))
}

/// Canonical JSON text for a message instance.
pub fn encode_json(program: &Program, codecs: &CodecSet, value: &MessageValue) -> Result<String> {
    let json = message_to_json(program, codecs, value)?;
    serde_json::to_string(&json)
        .map_err(|e| Error::Fatal(format!("JSON serialization failed: {e}")))
}

fn message_to_json(program: &Program, codecs: &CodecSet, value: &MessageValue) -> Result<Json> {
    let decl = program.message(value.message);
    match &value.body {
        MessageBody::Object(fields) => {
            Ok(Json::Object(object_to_json(program, codecs, decl, fields)?))
        }
        MessageBody::Array(elements) => {
            let mut array = Vec::with_capacity(elements.len());
            for element in elements {
                array.push(Json::Object(object_to_json(program, codecs, decl, element)?));
            }
            Ok(Json::Array(array))
        }
    }
}

fn object_to_json(
    program: &Program,
    codecs: &CodecSet,
    decl: &MessageDecl,
    fields: &IndexMap<String, Value>,
) -> Result<serde_json::Map<String, Json>> {
    let mut map = serde_json::Map::new();
    if decl.fields.is_empty() {
        // External schema: no declared order, keep instance order.
        for (name, value) in fields {
            if !value.is_null() {
                map.insert(name.clone(), value_to_json(program, codecs, value, None)?);
            }
        }
    } else {
        // Declaration order; absent optionals are omitted.
        for field in &decl.fields {
            let Some(value) = fields.get(&field.name) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            map.insert(
                field.name.clone(),
                value_to_json(program, codecs, value, Some(field))?,
            );
        }
    }
    Ok(map)
}

fn value_to_json(
    program: &Program,
    codecs: &CodecSet,
    value: &Value,
    field: Option<&FieldDecl>,
) -> Result<Json> {
    match value {
        Value::Null => Ok(Json::Null),
        Value::Bool(v) => Ok(Json::Bool(*v)),
        Value::Int(v) => Ok(Json::Number((*v).into())),
        Value::Str(v) => Ok(Json::String(v.clone())),
        Value::Message(inner) => {
            // A message carried in a string field is serialized with its own
            // encoding and embedded as text.
            if field.map(|f| f.ty) == Some(Ty::Str) {
                let bytes = encode(program, codecs, inner)?;
                let text = String::from_utf8(bytes).map_err(|_| {
                    Error::Fatal(
                        "embedded message encoding is not valid UTF-8 text".to_string(),
                    )
                })?;
                Ok(Json::String(text))
            } else {
                message_to_json(program, codecs, inner)
            }
        }
        Value::Array(items) => {
            let mut array = Vec::with_capacity(items.len());
            for item in items {
                array.push(value_to_json(program, codecs, item, field)?);
            }
            Ok(Json::Array(array))
        }
    }
}

fn json_to_message(program: &Program, id: MessageId, json: &Json) -> Result<MessageValue> {
    let decl = program.message(id);
    let body = if decl.is_array {
        let Json::Array(elements) = json else {
            return Err(decode_error(decl, "an array"));
        };
        let mut objects = Vec::with_capacity(elements.len());
        for element in elements {
            let Json::Object(object) = element else {
                return Err(decode_error(decl, "an array of objects"));
            };
            objects.push(json_to_object(program, decl, object)?);
        }
        MessageBody::Array(objects)
    } else {
        let Json::Object(object) = json else {
            return Err(decode_error(decl, "an object"));
        };
        MessageBody::Object(json_to_object(program, decl, object)?)
    };
    Ok(MessageValue { message: id, body })
}

fn json_to_object(
    program: &Program,
    decl: &MessageDecl,
    object: &serde_json::Map<String, Json>,
) -> Result<IndexMap<String, Value>> {
    let mut fields = IndexMap::new();
    if decl.fields.is_empty() {
        for (name, value) in object {
            fields.insert(name.clone(), json_to_untyped(value));
        }
        return Ok(fields);
    }
    for field in &decl.fields {
        let value = match object.get(&field.name) {
            None | Some(Json::Null) => Value::Null,
            Some(json) => json_to_field(program, decl, field, json)?,
        };
        fields.insert(field.name.clone(), value);
    }
    Ok(fields)
}

fn json_to_field(
    program: &Program,
    decl: &MessageDecl,
    field: &FieldDecl,
    json: &Json,
) -> Result<Value> {
    if field.is_repeated() {
        let Json::Array(items) = json else {
            return Err(decode_error(decl, "an array value"));
        };
        let element = FieldDecl {
            multiplicity: stl_ast::Multiplicity::Required,
            ..field.clone()
        };
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            values.push(json_to_field(program, decl, &element, item)?);
        }
        return Ok(Value::Array(values));
    }
    match field.ty {
        Ty::Bool => json
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(|| decode_error(decl, "a boolean value")),
        Ty::Int => json
            .as_i64()
            .map(Value::Int)
            .ok_or_else(|| decode_error(decl, "an integer value")),
        Ty::Str => json
            .as_str()
            .map(|s| Value::Str(s.to_string()))
            .ok_or_else(|| decode_error(decl, "a string value")),
        Ty::Message(sub) => json_to_message(program, sub, json).map(Value::Message),
        Ty::Role => Err(decode_error(decl, "a value type")),
    }
}

fn json_to_untyped(json: &Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(v) => Value::Bool(*v),
        Json::Number(v) => v.as_i64().map(Value::Int).unwrap_or(Value::Null),
        Json::String(v) => Value::Str(v.clone()),
        Json::Array(items) => Value::Array(items.iter().map(json_to_untyped).collect()),
        Json::Object(_) => Value::Null,
    }
}

fn decode_error(decl: &MessageDecl, expected: &str) -> Error {
    Error::Fatal(format!("cannot decode '{}': expected {expected}", decl.name))
}
