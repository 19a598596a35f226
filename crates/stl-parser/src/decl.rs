//! Declaration parsers, dispatched on the leading keyword.

use crate::expr::{parse_call_args, parse_literal};
use crate::stream::TokenStream;
use crate::ParseError;
use stl_ast::*;
use stl_lexer::Token;

/// Parse `module <name>;` followed by declarations until EOF.
pub(crate) fn parse_module(stream: &mut TokenStream) -> Result<ModuleSyntax, ParseError> {
    stream.expect(Token::Module)?;
    let name = stream.expect_ident("after 'module'")?;
    stream.expect(Token::Semicolon)?;

    let mut items = Vec::new();
    while !stream.at_end() {
        let start = stream.current_pos();
        let item = parse_item(stream)?;
        items.push(Spanned::new(item, stream.span_from(start)));
    }
    Ok(ModuleSyntax { name, items })
}

fn parse_item(stream: &mut TokenStream) -> Result<Item, ParseError> {
    match stream.peek() {
        Some(Token::Const) => parse_const(stream).map(Item::Const),
        Some(Token::Role) => parse_role(stream).map(Item::Role),
        Some(Token::State) => parse_state(stream).map(Item::State),
        Some(Token::Message) => parse_message(stream).map(Item::Message),
        Some(Token::Qualifier) => parse_qualifier(stream).map(Item::Qualifier),
        Some(Token::Event) => parse_event(stream).map(Item::Event),
        Some(Token::Transition) => parse_transition(stream).map(Item::Transition),
        found => Err(ParseError::unexpected(
            found,
            "where a declaration was expected",
            stream.current_span(),
        )),
    }
}

/// `bool | int | string | <message name>`
fn parse_type(stream: &mut TokenStream) -> Result<TypeName, ParseError> {
    match stream.peek() {
        Some(Token::BoolType) => {
            stream.advance();
            Ok(TypeName::Bool)
        }
        Some(Token::IntType) => {
            stream.advance();
            Ok(TypeName::Int)
        }
        Some(Token::StringType) => {
            stream.advance();
            Ok(TypeName::String)
        }
        Some(Token::Ident(_)) => {
            let name = stream.expect_ident("as a type")?;
            Ok(TypeName::Named(name.node))
        }
        found => Err(ParseError::unexpected(
            found,
            "where a type was expected",
            stream.current_span(),
        )),
    }
}

/// Like [`parse_type`] but also admits the `role` keyword (parameter lists
/// only).
fn parse_type_or_role(stream: &mut TokenStream) -> Result<TypeName, ParseError> {
    if stream.check(&Token::Role) {
        stream.advance();
        Ok(TypeName::Role)
    } else {
        parse_type(stream)
    }
}

/// Parse `(type name, type &name, ...)`, or nothing at all.
fn parse_params(stream: &mut TokenStream) -> Result<Vec<ParamDef>, ParseError> {
    let mut params = Vec::new();
    if !stream.eat(&Token::ParenOpen) {
        return Ok(params);
    }
    if stream.eat(&Token::ParenClose) {
        return Ok(params);
    }
    loop {
        let ty = parse_type_or_role(stream)?;
        let by_ref = stream.eat(&Token::Ampersand);
        let name = stream.expect_ident("as a parameter name")?;
        params.push(ParamDef { name, ty, by_ref });
        if !stream.eat(&Token::Comma) {
            break;
        }
    }
    stream.expect(Token::ParenClose)?;
    Ok(params)
}

/// `const <type> <name> = <literal or const name>;`
fn parse_const(stream: &mut TokenStream) -> Result<ConstDef, ParseError> {
    stream.expect(Token::Const)?;
    let ty = parse_type(stream)?;
    let name = stream.expect_ident("as a constant name")?;
    stream.expect(Token::Equals)?;
    let value_start = stream.current_pos();
    let value = match stream.peek() {
        Some(Token::Ident(_)) => {
            ConstValue::Ref(stream.expect_ident("as a constant reference")?.node)
        }
        _ => ConstValue::Literal(parse_literal(stream)?),
    };
    let value = Spanned::new(value, stream.span_from(value_start));
    stream.expect(Token::Semicolon)?;
    Ok(ConstDef { name, ty, value })
}

/// `role <name> { <type> <field>; ... }`
fn parse_role(stream: &mut TokenStream) -> Result<RoleDef, ParseError> {
    stream.expect(Token::Role)?;
    let name = stream.expect_ident("as a role name")?;
    stream.expect(Token::BraceOpen)?;
    let mut fields = Vec::new();
    while !stream.check(&Token::BraceClose) {
        let ty = parse_type(stream)?;
        let field_name = stream.expect_ident("as a field name")?;
        stream.expect(Token::Semicolon)?;
        fields.push(RoleField {
            name: field_name,
            ty,
        });
    }
    stream.expect(Token::BraceClose)?;
    Ok(RoleDef { name, fields })
}

/// `state <name>(<params>) { kValue, kValue, }`
fn parse_state(stream: &mut TokenStream) -> Result<StateDef, ParseError> {
    stream.expect(Token::State)?;
    let name = stream.expect_ident("as a state name")?;
    let params = parse_params(stream)?;
    stream.expect(Token::BraceOpen)?;
    let mut values = Vec::new();
    while !stream.check(&Token::BraceClose) {
        values.push(stream.expect_ident("as a state value")?);
        if !stream.eat(&Token::Comma) {
            break;
        }
    }
    stream.expect(Token::BraceClose)?;
    Ok(StateDef {
        name,
        params,
        values,
    })
}

/// `message <name> { ... }`, `message[] <name> { ... }`, and nested forms.
fn parse_message(stream: &mut TokenStream) -> Result<MessageDef, ParseError> {
    stream.expect(Token::Message)?;
    let is_array = if stream.eat(&Token::BracketOpen) {
        stream.expect(Token::BracketClose)?;
        true
    } else {
        false
    };
    let name = stream.expect_ident("as a message name")?;
    stream.expect(Token::BraceOpen)?;

    let encoding = if stream.eat(&Token::Encode) {
        let enc = stream.expect_string("after 'encode'")?;
        stream.expect(Token::Semicolon)?;
        Some(enc)
    } else {
        None
    };
    let external = if stream.eat(&Token::External) {
        let ext = stream.expect_string("after 'external'")?;
        stream.expect(Token::Semicolon)?;
        Some(ext)
    } else {
        None
    };

    let mut fields = Vec::new();
    let mut nested = Vec::new();
    while !stream.check(&Token::BraceClose) {
        match stream.peek() {
            Some(Token::Required | Token::Optional | Token::Repeated) => {
                let multiplicity = match stream.advance() {
                    Some(Token::Required) => Multiplicity::Required,
                    Some(Token::Optional) => Multiplicity::Optional,
                    _ => Multiplicity::Repeated,
                };
                let ty = parse_type(stream)?;
                let field_name = stream.expect_ident("as a field name")?;
                stream.expect(Token::Semicolon)?;
                fields.push(MessageField {
                    name: field_name,
                    ty,
                    multiplicity,
                });
            }
            Some(Token::Message) => nested.push(parse_message(stream)?),
            found => {
                return Err(ParseError::unexpected(
                    found,
                    "in message body (expected a field or nested message)",
                    stream.current_span(),
                ))
            }
        }
    }
    stream.expect(Token::BraceClose)?;
    Ok(MessageDef {
        name,
        is_array,
        encoding,
        external,
        fields,
        nested,
    })
}

/// `qualifier <type> <name>(<params>) = external "...";`
fn parse_qualifier(stream: &mut TokenStream) -> Result<QualifierDef, ParseError> {
    stream.expect(Token::Qualifier)?;
    let return_ty = parse_type(stream)?;
    let name = stream.expect_ident("as a qualifier name")?;
    let params = parse_params(stream)?;
    stream.expect(Token::Equals)?;
    stream.expect(Token::External)?;
    let external = stream.expect_string("after 'external'")?;
    stream.expect(Token::Semicolon)?;
    Ok(QualifierDef {
        name,
        return_ty,
        params,
        external,
    })
}

/// `event <name>(<params>);`, `= external "...";`, or `= Other(args);`
fn parse_event(stream: &mut TokenStream) -> Result<EventDef, ParseError> {
    stream.expect(Token::Event)?;
    let name = stream.expect_ident("as an event name")?;
    let params = parse_params(stream)?;

    if stream.eat(&Token::Semicolon) {
        return Ok(EventDef {
            name,
            params,
            body: EventBody::NoOp,
        });
    }

    stream.expect(Token::Equals)?;
    let body = if stream.eat(&Token::External) {
        let external = stream.expect_string("after 'external'")?;
        EventBody::External(external)
    } else {
        let target = stream.expect_ident("as an event to expand")?;
        let args = parse_call_args(stream)?;
        EventBody::Composite(CallExpr { target, args })
    };
    stream.expect(Token::Semicolon)?;
    Ok(EventDef { name, params, body })
}

/// `transition <name>(<params>) { ... }` or `transition <name> = Other(args);`
fn parse_transition(stream: &mut TokenStream) -> Result<TransitionDef, ParseError> {
    stream.expect(Token::Transition)?;
    let name = stream.expect_ident("as a transition name")?;
    let params = parse_params(stream)?;

    if stream.eat(&Token::Equals) {
        let target = stream.expect_ident("as a transition to expand")?;
        let args = parse_call_args(stream)?;
        stream.expect(Token::Semicolon)?;
        return Ok(TransitionDef {
            name,
            params,
            body: TransitionBody::Binding(CallExpr { target, args }),
        });
    }

    stream.expect(Token::BraceOpen)?;

    // Locals come first; the next section always opens with `pre_states`.
    let mut locals = Vec::new();
    while matches!(
        stream.peek(),
        Some(Token::BoolType | Token::IntType | Token::StringType | Token::Ident(_))
    ) {
        let ty = parse_type(stream)?;
        let local_name = stream.expect_ident("as a local variable name")?;
        stream.expect(Token::Semicolon)?;
        locals.push(LocalDef {
            name: local_name,
            ty,
        });
    }

    stream.expect(Token::PreStates)?;
    stream.expect(Token::Equals)?;
    let pre_states = parse_state_matches(stream)?;

    stream.expect(Token::Events)?;
    stream.expect(Token::BraceOpen)?;
    let mut events = Vec::new();
    while !stream.check(&Token::BraceClose) {
        let source = stream.expect_ident("as the source role")?;
        stream.expect(Token::Arrow)?;
        let target_name = stream.expect_ident("as an event name")?;
        let args = parse_call_args(stream)?;
        stream.expect(Token::Arrow)?;
        let target = stream.expect_ident("as the target role")?;
        stream.expect(Token::Semicolon)?;
        events.push(EventLine {
            source,
            call: CallExpr {
                target: target_name,
                args,
            },
            target,
        });
    }
    stream.expect(Token::BraceClose)?;

    stream.expect(Token::PostStates)?;
    stream.expect(Token::Equals)?;
    let post_states = parse_state_assigns(stream)?;

    let error_states = if stream.eat(&Token::ErrorStates) {
        stream.expect(Token::Equals)?;
        Some(parse_state_assigns(stream)?)
    } else {
        None
    };

    stream.expect(Token::BraceClose)?;
    Ok(TransitionDef {
        name,
        params,
        body: TransitionBody::Full(TransitionBlock {
            locals,
            pre_states,
            events,
            post_states,
            error_states,
        }),
    })
}

/// `[ sName(args).kValue, sName(args).{kA, kB} ]`
fn parse_state_matches(stream: &mut TokenStream) -> Result<Vec<StateMatch>, ParseError> {
    stream.expect(Token::BracketOpen)?;
    let mut matches = Vec::new();
    if stream.eat(&Token::BracketClose) {
        return Ok(matches);
    }
    loop {
        let state = stream.expect_ident("as a state name")?;
        let args = parse_call_args(stream)?;
        stream.expect(Token::Dot)?;
        let values = if stream.eat(&Token::BraceOpen) {
            let mut values = Vec::new();
            while !stream.check(&Token::BraceClose) {
                values.push(stream.expect_ident("as a state value")?);
                if !stream.eat(&Token::Comma) {
                    break;
                }
            }
            stream.expect(Token::BraceClose)?;
            values
        } else {
            vec![stream.expect_ident("as a state value")?]
        };
        matches.push(StateMatch {
            state,
            args,
            values,
        });
        if !stream.eat(&Token::Comma) {
            break;
        }
    }
    stream.expect(Token::BracketClose)?;
    Ok(matches)
}

/// `[ sName(args).kValue, ... ]` (empty form allowed)
fn parse_state_assigns(stream: &mut TokenStream) -> Result<Vec<StateAssign>, ParseError> {
    stream.expect(Token::BracketOpen)?;
    let mut assigns = Vec::new();
    if stream.eat(&Token::BracketClose) {
        return Ok(assigns);
    }
    loop {
        let state = stream.expect_ident("as a state name")?;
        let args = parse_call_args(stream)?;
        stream.expect(Token::Dot)?;
        let value = stream.expect_ident("as a state value")?;
        assigns.push(StateAssign {
            state,
            args,
            value,
        });
        if !stream.eat(&Token::Comma) {
            break;
        }
    }
    stream.expect(Token::BracketClose)?;
    Ok(assigns)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> ModuleSyntax {
        crate::parse_source(source, 0).expect("parse failed")
    }

    #[test]
    fn test_module_header() {
        let module = parse("module tls;");
        assert_eq!(module.name.node, "tls");
        assert!(module.items.is_empty());
    }

    #[test]
    fn test_missing_module_header() {
        let err = crate::parse_source("role rFoo {}", 0).unwrap_err();
        assert!(err.message.contains("module"));
    }

    #[test]
    fn test_const() {
        let module = parse(r#"module m; const int kMax = 3; const string kName = "x";"#);
        assert_eq!(module.items.len(), 2);
        let Item::Const(c) = &module.items[0].node else {
            panic!("expected const");
        };
        assert_eq!(c.name.node, "kMax");
        assert_eq!(c.ty, TypeName::Int);
        assert_eq!(c.value.node, ConstValue::Literal(Literal::Int(3)));
    }

    #[test]
    fn test_const_reference() {
        let module = parse("module m; const int kA = 1; const int kB = kA;");
        let Item::Const(c) = &module.items[1].node else {
            panic!("expected const");
        };
        assert_eq!(c.value.node, ConstValue::Ref("kA".to_string()));
    }

    #[test]
    fn test_role() {
        let module = parse("module m; role rSender { string ipAddress; int port; }");
        let Item::Role(r) = &module.items[0].node else {
            panic!("expected role");
        };
        assert_eq!(r.name.node, "rSender");
        assert_eq!(r.fields.len(), 2);
        assert_eq!(r.fields[0].name.node, "ipAddress");
        assert_eq!(r.fields[0].ty, TypeName::String);
    }

    #[test]
    fn test_state_with_params_and_trailing_comma() {
        let module = parse(
            "module m; state sTlsState(int sessionId) { kNotConnected, kConnected, }",
        );
        let Item::State(s) = &module.items[0].node else {
            panic!("expected state");
        };
        assert_eq!(s.params.len(), 1);
        assert_eq!(s.params[0].ty, TypeName::Int);
        let values: Vec<&str> = s.values.iter().map(|v| v.node.as_str()).collect();
        assert_eq!(values, vec!["kNotConnected", "kConnected"]);
    }

    #[test]
    fn test_message_fields() {
        let module = parse(
            r#"module m;
            message mRequest {
                encode "json";
                required int requestId;
                optional string payload;
                repeated int tags;
            }"#,
        );
        let Item::Message(msg) = &module.items[0].node else {
            panic!("expected message");
        };
        assert!(!msg.is_array);
        assert_eq!(msg.encoding.as_ref().unwrap().node, "json");
        assert_eq!(msg.fields.len(), 3);
        assert!(msg.nested.is_empty());
        assert_eq!(msg.fields[0].multiplicity, Multiplicity::Required);
        assert_eq!(msg.fields[1].multiplicity, Multiplicity::Optional);
        assert_eq!(msg.fields[2].multiplicity, Multiplicity::Repeated);
    }

    #[test]
    fn test_message_array_and_external() {
        let module = parse(
            r#"module m;
            message[] mBatch {
                encode "protobuf";
                external "pkg.Batch";
            }"#,
        );
        let Item::Message(msg) = &module.items[0].node else {
            panic!("expected message");
        };
        assert!(msg.is_array);
        assert_eq!(
            msg.external,
            Some(Spanned::new("pkg.Batch".to_string(), Span::zero(0)))
        );
        assert!(msg.fields.is_empty());
    }

    #[test]
    fn test_bytestream_message_with_codec_and_fields() {
        let module = parse(
            r#"module m;
            message mPacket {
                encode "bytestream";
                external "example.KeyValue";
                required int requestId;
                optional string data;
            }"#,
        );
        let Item::Message(msg) = &module.items[0].node else {
            panic!("expected message");
        };
        assert_eq!(msg.external.as_ref().unwrap().node, "example.KeyValue");
        assert_eq!(msg.fields.len(), 2);
    }

    #[test]
    fn test_nested_message() {
        let module = parse(
            r#"module m;
            message mOuter {
                encode "json";
                required mInner nested;
                message mInner {
                    optional string note;
                }
            }"#,
        );
        let Item::Message(msg) = &module.items[0].node else {
            panic!("expected message");
        };
        assert_eq!(msg.fields[0].ty, TypeName::Named("mInner".to_string()));
        assert_eq!(msg.nested.len(), 1);
        assert_eq!(msg.nested[0].name.node, "mInner");
        assert!(msg.nested[0].encoding.is_none());
    }

    #[test]
    fn test_qualifier() {
        let module = parse(
            r#"module m; qualifier int UniqueInt(int prev) = external "stl.lib.UniqueInt";"#,
        );
        let Item::Qualifier(q) = &module.items[0].node else {
            panic!("expected qualifier");
        };
        assert_eq!(q.return_ty, TypeName::Int);
        assert_eq!(q.params.len(), 1);
        assert_eq!(q.external.node, "stl.lib.UniqueInt");
    }

    #[test]
    fn test_event_forms() {
        let module = parse(
            r#"module m;
            event eNothing(int x);
            event eExternal(int x) = external "pkg.Handler";
            event eComposite(int x) = eExternal(x);"#,
        );
        let bodies: Vec<&EventBody> = module
            .items
            .iter()
            .map(|i| match &i.node {
                Item::Event(e) => &e.body,
                _ => panic!("expected event"),
            })
            .collect();
        assert_eq!(bodies[0], &EventBody::NoOp);
        assert!(matches!(bodies[1], EventBody::External(_)));
        assert!(matches!(bodies[2], EventBody::Composite(_)));
    }

    #[test]
    fn test_event_reference_param() {
        let module = parse("module m; event eFill(int &out);");
        let Item::Event(e) = &module.items[0].node else {
            panic!("expected event");
        };
        assert!(e.params[0].by_ref);
    }

    #[test]
    fn test_transition_full_body() {
        let module = parse(
            r#"module m;
            transition tConnectTls(int sessionId) {
                int requestId;
                pre_states = [ sTlsState(sessionId).kNotConnected ]
                events {
                    rSender -> TlsConnect(sessionId) -> rReceiver;
                }
                post_states = [ sTlsState(sessionId).kConnected ]
                error_states = [ sTlsState(sessionId).kNotConnected ]
            }"#,
        );
        let Item::Transition(t) = &module.items[0].node else {
            panic!("expected transition");
        };
        let TransitionBody::Full(block) = &t.body else {
            panic!("expected full body");
        };
        assert_eq!(block.locals.len(), 1);
        assert_eq!(block.pre_states.len(), 1);
        assert_eq!(block.pre_states[0].values.len(), 1);
        assert_eq!(block.events.len(), 1);
        assert_eq!(block.events[0].source.node, "rSender");
        assert_eq!(block.events[0].target.node, "rReceiver");
        assert_eq!(block.post_states.len(), 1);
        assert!(block.error_states.is_some());
    }

    #[test]
    fn test_transition_or_set_pre_state() {
        let module = parse(
            r#"module m;
            transition tAny {
                pre_states = [ sFoo.{kA, kB} ]
                events { }
                post_states = [ ]
            }"#,
        );
        let Item::Transition(t) = &module.items[0].node else {
            panic!("expected transition");
        };
        let TransitionBody::Full(block) = &t.body else {
            panic!("expected full body");
        };
        assert_eq!(block.pre_states[0].values.len(), 2);
        assert!(block.post_states.is_empty());
    }

    #[test]
    fn test_transition_binding() {
        let module = parse("module m; transition tConnectTlsActual = tConnectTls(1);");
        let Item::Transition(t) = &module.items[0].node else {
            panic!("expected transition");
        };
        let TransitionBody::Binding(call) = &t.body else {
            panic!("expected binding");
        };
        assert_eq!(call.target.node, "tConnectTls");
        assert_eq!(call.args.len(), 1);
    }

    #[test]
    fn test_qualifier_write_in_field_value() {
        let module = parse(
            r#"module m;
            transition tSend {
                int requestId;
                pre_states = [ ]
                events {
                    rA -> Send(mReq { requestId = UniqueInt(0) -> requestId; }) -> rB;
                }
                post_states = [ ]
            }"#,
        );
        let Item::Transition(t) = &module.items[0].node else {
            panic!("expected transition");
        };
        let TransitionBody::Full(block) = &t.body else {
            panic!("expected full body");
        };
        let Expr::MessageLiteral { fields, .. } = &block.events[0].call.args[0].node else {
            panic!("expected message literal");
        };
        let Expr::Qualifier { name, out, .. } = &fields[0].value.node else {
            panic!("expected qualifier value");
        };
        assert_eq!(name.node, "UniqueInt");
        assert_eq!(out.as_ref().unwrap().node, "requestId");
    }

    #[test]
    fn test_syntax_error_position() {
        let err = crate::parse_source("module m; role rFoo { string }", 0).unwrap_err();
        assert_eq!(err.kind, crate::ParseErrorKind::UnexpectedToken);
        assert!(err.span.start > 0);
    }
}
