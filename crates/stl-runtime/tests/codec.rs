//! A registered bytestream codec: `key=value` pairs joined by commas.

use indexmap::IndexMap;
use stl_resolve::{MessageId, Program};
use stl_runtime::encoding::{decode, encode};
use stl_runtime::registry::CodecSet;
use stl_runtime::{MessageBody, MessageValue, Value};

const STL: &str = r#"
module wire;
message mPacket {
    encode "bytestream";
    external "example.KeyValue";
    required int requestId;
    optional string data;
    optional bool broadcast;
}
"#;

/// Encodes declared fields as `<name>=<value>,...` in declaration order.
struct KeyValueCodec;

impl stl_runtime::MessageCodec for KeyValueCodec {
    fn encode(&self, program: &Program, value: &MessageValue) -> Result<Vec<u8>, String> {
        let decl = program.message(value.message);
        let MessageBody::Object(fields) = &value.body else {
            return Err("key/value encoding takes a single object".to_string());
        };
        let mut pairs = Vec::new();
        for field in &decl.fields {
            let Some(v) = fields.get(&field.name) else {
                continue;
            };
            let rendered = match v {
                Value::Null => continue,
                Value::Bool(b) => b.to_string(),
                Value::Int(i) => i.to_string(),
                Value::Str(s) => s.clone(),
                _ => return Err(format!("unsupported field value in '{}'", field.name)),
            };
            pairs.push(format!("{}={rendered}", field.name));
        }
        Ok(pairs.join(",").into_bytes())
    }

    fn decode(
        &self,
        program: &Program,
        message: MessageId,
        bytes: &[u8],
    ) -> Result<MessageValue, String> {
        let decl = program.message(message);
        let text = std::str::from_utf8(bytes).map_err(|e| e.to_string())?;
        let mut fields: IndexMap<String, Value> = decl
            .fields
            .iter()
            .map(|f| (f.name.clone(), Value::Null))
            .collect();
        for pair in text.split(',').filter(|p| !p.is_empty()) {
            let (key, raw) = pair
                .split_once('=')
                .ok_or_else(|| format!("malformed pair: {pair}"))?;
            let field = decl
                .field(key)
                .ok_or_else(|| format!("unknown field: {key}"))?;
            let value = match field.ty {
                stl_resolve::Ty::Bool => Value::Bool(raw == "true"),
                stl_resolve::Ty::Int => {
                    Value::Int(raw.parse().map_err(|_| format!("not an integer: {raw}"))?)
                }
                _ => Value::Str(raw.to_string()),
            };
            fields.insert(key.to_string(), value);
        }
        Ok(MessageValue {
            message,
            body: MessageBody::Object(fields),
        })
    }
}

fn compile() -> Program {
    let module = stl_parser::parse_source(STL, 0).expect("parse failed");
    stl_resolve::compile(&[module]).expect("compile failed")
}

fn codecs() -> CodecSet {
    let mut set = CodecSet::default();
    set.register("example.KeyValue", Box::new(KeyValueCodec));
    set
}

#[test]
fn key_value_serialization() {
    let program = compile();
    let id = program.modules["wire"].messages["mPacket"];
    let value = MessageValue {
        message: id,
        body: MessageBody::Object(
            [
                ("requestId".to_string(), Value::Int(10)),
                ("data".to_string(), Value::Str("dummy_data".to_string())),
                ("broadcast".to_string(), Value::Bool(true)),
            ]
            .into_iter()
            .collect(),
        ),
    };
    let bytes = encode(&program, &codecs(), &value).unwrap();
    assert_eq!(
        String::from_utf8(bytes).unwrap(),
        "requestId=10,data=dummy_data,broadcast=true"
    );
}

#[test]
fn key_value_parsing() {
    let program = compile();
    let id = program.modules["wire"].messages["mPacket"];
    let decoded = decode(
        &program,
        &codecs(),
        id,
        b"requestId=10,data=dummy_data,broadcast=true",
    )
    .unwrap();
    let MessageBody::Object(fields) = &decoded.body else {
        panic!("expected object");
    };
    assert_eq!(fields["requestId"], Value::Int(10));
    assert_eq!(fields["data"], Value::Str("dummy_data".to_string()));
    assert_eq!(fields["broadcast"], Value::Bool(true));
}

#[test]
fn key_value_round_trip() {
    let program = compile();
    let id = program.modules["wire"].messages["mPacket"];
    let value = MessageValue {
        message: id,
        body: MessageBody::Object(
            [
                ("requestId".to_string(), Value::Int(3)),
                ("data".to_string(), Value::Null),
                ("broadcast".to_string(), Value::Bool(false)),
            ]
            .into_iter()
            .collect(),
        ),
    };
    let codecs = codecs();
    let bytes = encode(&program, &codecs, &value).unwrap();
    let decoded = decode(&program, &codecs, id, &bytes).unwrap();
    assert_eq!(decoded, value);
}
