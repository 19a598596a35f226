//! JSON encoding: declaration-order keys, determinism, and round-trip.

use indexmap::IndexMap;
use stl_resolve::{MessageId, Program};
use stl_runtime::encoding::{decode, encode, encode_json};
use stl_runtime::registry::CodecSet;
use stl_runtime::{MessageBody, MessageValue, Value};

const STL: &str = r#"
module wire;

message mRequest {
    encode "json";
    required int requestId;
    optional string payload;
    repeated int tags;
}

message mEnvelope {
    encode "json";
    required mHeader header;
    message mHeader {
        required string kind;
    }
}

message[] mBatch {
    encode "json";
    required int sequence;
}
"#;

fn compile() -> Program {
    let module = stl_parser::parse_source(STL, 0).expect("parse failed");
    stl_resolve::compile(&[module]).expect("compile failed")
}

fn message_id(program: &Program, name: &str) -> MessageId {
    program.modules["wire"].messages[name]
}

fn object(fields: &[(&str, Value)]) -> IndexMap<String, Value> {
    fields
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

#[test]
fn json_keys_follow_declaration_order() {
    let program = compile();
    let id = message_id(&program, "mRequest");
    // Instance fields deliberately out of declaration order.
    let value = MessageValue {
        message: id,
        body: MessageBody::Object(object(&[
            ("tags", Value::Array(vec![Value::Int(1), Value::Int(2)])),
            ("payload", Value::Str("ping".to_string())),
            ("requestId", Value::Int(7)),
        ])),
    };
    let text = encode_json(&program, &CodecSet::default(), &value).unwrap();
    assert_eq!(text, r#"{"requestId":7,"payload":"ping","tags":[1,2]}"#);
}

#[test]
fn json_encoding_is_deterministic() {
    let program = compile();
    let id = message_id(&program, "mRequest");
    let value = MessageValue {
        message: id,
        body: MessageBody::Object(object(&[
            ("requestId", Value::Int(3)),
            ("payload", Value::Str("a \"quoted\" one".to_string())),
            ("tags", Value::Array(vec![])),
        ])),
    };
    let codecs = CodecSet::default();
    let first = encode(&program, &codecs, &value).unwrap();
    let second = encode(&program, &codecs, &value).unwrap();
    assert_eq!(first, second);
}

#[test]
fn json_round_trips_to_equivalent_instance() {
    let program = compile();
    let id = message_id(&program, "mRequest");
    let value = MessageValue {
        message: id,
        body: MessageBody::Object(object(&[
            ("requestId", Value::Int(11)),
            ("payload", Value::Null),
            ("tags", Value::Array(vec![Value::Int(5)])),
        ])),
    };
    let codecs = CodecSet::default();
    let bytes = encode(&program, &codecs, &value).unwrap();
    let decoded = decode(&program, &codecs, id, &bytes).unwrap();
    assert_eq!(decoded, value);
}

#[test]
fn absent_optional_is_omitted_then_restored_as_null() {
    let program = compile();
    let id = message_id(&program, "mRequest");
    let value = MessageValue {
        message: id,
        body: MessageBody::Object(object(&[
            ("requestId", Value::Int(1)),
            ("payload", Value::Null),
            ("tags", Value::Null),
        ])),
    };
    let codecs = CodecSet::default();
    let text = encode_json(&program, &codecs, &value).unwrap();
    assert_eq!(text, r#"{"requestId":1}"#);

    let decoded = decode(&program, &codecs, id, text.as_bytes()).unwrap();
    let MessageBody::Object(fields) = &decoded.body else {
        panic!("expected object");
    };
    assert_eq!(fields["payload"], Value::Null);
    assert_eq!(fields["tags"], Value::Null);
}

#[test]
fn nested_message_encodes_as_object() {
    let program = compile();
    let envelope = message_id(&program, "mEnvelope");
    let header = program.message(envelope).nested["mHeader"];
    let value = MessageValue {
        message: envelope,
        body: MessageBody::Object(object(&[(
            "header",
            Value::Message(MessageValue {
                message: header,
                body: MessageBody::Object(object(&[("kind", Value::Str("hello".to_string()))])),
            }),
        )])),
    };
    let codecs = CodecSet::default();
    let text = encode_json(&program, &codecs, &value).unwrap();
    assert_eq!(text, r#"{"header":{"kind":"hello"}}"#);

    let decoded = decode(&program, &codecs, envelope, text.as_bytes()).unwrap();
    assert_eq!(decoded, value);
}

#[test]
fn message_array_encodes_as_json_array() {
    let program = compile();
    let id = message_id(&program, "mBatch");
    let value = MessageValue {
        message: id,
        body: MessageBody::Array(vec![
            object(&[("sequence", Value::Int(1))]),
            object(&[("sequence", Value::Int(2))]),
        ]),
    };
    let codecs = CodecSet::default();
    let text = encode_json(&program, &codecs, &value).unwrap();
    assert_eq!(text, r#"[{"sequence":1},{"sequence":2}]"#);

    let decoded = decode(&program, &codecs, id, text.as_bytes()).unwrap();
    assert_eq!(decoded, value);
}

#[test]
fn missing_codec_is_a_registry_error() {
    const BYTESTREAM: &str = r#"
module wire;
message mRaw {
    encode "bytestream";
    external "codec.KeyValue";
}
"#;
    let module = stl_parser::parse_source(BYTESTREAM, 0).expect("parse failed");
    let program = stl_resolve::compile(&[module]).expect("compile failed");
    let id = program.modules["wire"].messages["mRaw"];
    let value = MessageValue {
        message: id,
        body: MessageBody::Object(IndexMap::new()),
    };
    let err = encode(&program, &CodecSet::default(), &value).unwrap_err();
    assert!(matches!(err, stl_runtime::Error::Registry(name) if name == "codec.KeyValue"));
}
