//! Type checker tests.

use stl_ast::ModuleSyntax;
use stl_resolve::{compile, CompileError};

fn parse(source: &str) -> Vec<ModuleSyntax> {
    vec![stl_parser::parse_source(source, 0).expect("parse failed")]
}

fn expect_type_error(source: &str) -> stl_resolve::TypeError {
    match compile(&parse(source)) {
        Err(CompileError::Type(err)) => err,
        Err(CompileError::Link(err)) => panic!("expected a type error, got link error: {err}"),
        Ok(_) => panic!("expected a type error, program checked"),
    }
}

#[test]
fn const_type_mismatch() {
    let err = expect_type_error(r#"module m; const int kX = "not an int";"#);
    assert_eq!(err.expected, "int");
    assert_eq!(err.got, "string");
}

#[test]
fn negative_integer_literal_rejected() {
    let err = expect_type_error("module m; const int kX = -1;");
    assert!(err.expected.contains("non-negative"), "{err}");
}

#[test]
fn negative_integer_in_binding_rejected() {
    let err = expect_type_error(
        r#"
module m;
state sFoo(int x) { kA }
role rA { }
role rB { }
event Ping(int x) = external "x.y.Ping";
transition tFoo(int x) {
    pre_states = [ sFoo(x).kA ]
    events { rA -> Ping(x) -> rB; }
    post_states = [ ]
}
transition tBad = tFoo(-3);
"#,
    );
    assert!(err.expected.contains("non-negative"), "{err}");
}

#[test]
fn state_argument_type_mismatch() {
    let err = expect_type_error(
        r#"
module m;
state sFoo(int x) { kA }
role rA { }
role rB { }
event Ping(int x) = external "x.y.Ping";
transition tBad {
    pre_states = [ sFoo("one").kA ]
    events { rA -> Ping(1) -> rB; }
    post_states = [ ]
}
"#,
    );
    assert_eq!(err.expected, "int");
    assert_eq!(err.got, "string");
}

#[test]
fn event_argument_type_mismatch() {
    let err = expect_type_error(
        r#"
module m;
role rA { }
role rB { }
event Ping(int x) = external "x.y.Ping";
transition tBad {
    pre_states = [ ]
    events { rA -> Ping("oops") -> rB; }
    post_states = [ ]
}
"#,
    );
    assert_eq!(err.expected, "int");
}

#[test]
fn required_field_must_be_present() {
    let err = expect_type_error(
        r#"
module m;
message mReq {
    encode "json";
    required int requestId;
    optional string payload;
}
role rA { }
role rB { }
event Send(mReq request) = external "x.y.Send";
transition tBad {
    pre_states = [ ]
    events { rA -> Send(mReq { payload = "only optional"; }) -> rB; }
    post_states = [ ]
}
"#,
    );
    assert!(err.expected.contains("requestId"), "{err}");
}

#[test]
fn field_value_type_mismatch() {
    let err = expect_type_error(
        r#"
module m;
message mReq {
    encode "json";
    required int requestId;
}
role rA { }
role rB { }
event Send(mReq request) = external "x.y.Send";
transition tBad {
    pre_states = [ ]
    events { rA -> Send(mReq { requestId = "nope"; }) -> rB; }
    post_states = [ ]
}
"#,
    );
    assert_eq!(err.expected, "int");
    assert_eq!(err.got, "string");
}

#[test]
fn repeated_field_needs_array() {
    let err = expect_type_error(
        r#"
module m;
message mReq {
    encode "json";
    repeated int tags;
}
role rA { }
role rB { }
event Send(mReq request) = external "x.y.Send";
transition tBad {
    pre_states = [ ]
    events { rA -> Send(mReq { tags = 7; }) -> rB; }
    post_states = [ ]
}
"#,
    );
    assert!(err.expected.contains("list"), "{err}");
}

#[test]
fn repeated_field_accepts_array() {
    let source = r#"
module m;
message mReq {
    encode "json";
    repeated int tags;
}
role rA { }
role rB { }
event Send(mReq request) = external "x.y.Send";
transition tOk {
    pre_states = [ ]
    events { rA -> Send(mReq { tags = [ 1, 2, 3 ]; }) -> rB; }
    post_states = [ ]
}
"#;
    compile(&parse(source)).expect("array-valued repeated field should check");
}

#[test]
fn nested_message_accepts_struct_literal() {
    let source = r#"
module m;
message mOuter {
    encode "json";
    required mInner inner;
    message mInner {
        required int x;
    }
}
role rA { }
role rB { }
event Send(mOuter payload) = external "x.y.Send";
transition tOk {
    pre_states = [ ]
    events { rA -> Send(mOuter { inner = { x = 1; }; }) -> rB; }
    post_states = [ ]
}
"#;
    compile(&parse(source)).expect("struct literal takes the field's message type");
}

#[test]
fn nested_message_wrong_type_rejected() {
    let err = expect_type_error(
        r#"
module m;
message mOther {
    encode "json";
    required int y;
}
message mOuter {
    encode "json";
    required mInner inner;
    message mInner {
        required int x;
    }
}
role rA { }
role rB { }
event Send(mOuter payload) = external "x.y.Send";
transition tBad {
    pre_states = [ ]
    events { rA -> Send(mOuter { inner = mOther { y = 2; }; }) -> rB; }
    post_states = [ ]
}
"#,
    );
    assert!(err.context.contains("inner"), "{err}");
}

#[test]
fn reference_param_requires_local_lvalue() {
    let err = expect_type_error(
        r#"
module m;
role rA { }
role rB { }
event Fill(int &out) = external "x.y.Fill";
transition tBad {
    pre_states = [ ]
    events { rA -> Fill(5) -> rB; }
    post_states = [ ]
}
"#,
    );
    assert!(err.expected.contains("reference"), "{err}");
}

#[test]
fn reference_param_accepts_matching_local() {
    let source = r#"
module m;
role rA { }
role rB { }
event Fill(int &out) = external "x.y.Fill";
transition tOk {
    int slot;
    pre_states = [ ]
    events { rA -> Fill(&slot) -> rB; }
    post_states = [ ]
}
"#;
    compile(&parse(source)).expect("local reference should check");
}

#[test]
fn reference_param_type_must_match() {
    let err = expect_type_error(
        r#"
module m;
role rA { }
role rB { }
event Fill(int &out) = external "x.y.Fill";
transition tBad {
    string slot;
    pre_states = [ ]
    events { rA -> Fill(&slot) -> rB; }
    post_states = [ ]
}
"#,
    );
    assert_eq!(err.expected, "int");
    assert_eq!(err.got, "string");
}

#[test]
fn qualifier_write_target_type_must_match() {
    let err = expect_type_error(
        r#"
module m;
qualifier int UniqueInt(int prev) = external "stl.lib.UniqueInt";
message mReq {
    encode "json";
    required int requestId;
}
role rA { }
role rB { }
event Send(mReq request) = external "x.y.Send";
transition tBad {
    string slot;
    pre_states = [ ]
    events { rA -> Send(mReq { requestId = UniqueInt(0) -> slot; }) -> rB; }
    post_states = [ ]
}
"#,
    );
    assert!(err.context.contains("write target"), "{err}");
}

#[test]
fn message_value_allowed_in_string_field() {
    let source = r#"
module m;
message mInnerMost {
    encode "json";
    required int x;
}
message mWrap {
    encode "json";
    required string payload;
}
role rA { }
role rB { }
event Send(mWrap w) = external "x.y.Send";
transition tOk {
    pre_states = [ ]
    events { rA -> Send(mWrap { payload = mInnerMost { x = 1; }; }) -> rB; }
    post_states = [ ]
}
"#;
    compile(&parse(source)).expect("message coerces to string via encoding");
}
