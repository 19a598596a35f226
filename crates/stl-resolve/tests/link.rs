//! Linker tests: name registration, reference resolution, suggestions,
//! constant cycles, bindings, and idempotence.

use stl_ast::ModuleSyntax;
use stl_resolve::{link, EventBody, Rvalue, TransitionKind, Ty};

fn parse(sources: &[&str]) -> Vec<ModuleSyntax> {
    sources
        .iter()
        .enumerate()
        .map(|(i, src)| stl_parser::parse_source(src, i as u16).expect("parse failed"))
        .collect()
}

const TLS_MODULE: &str = r#"
module tls;

const int kSessionId = 1;

role rSender {
    string ipAddress;
    int port;
}

role rReceiver {
    string ipAddress;
    int port;
}

state sTlsState(int sessionId) {
    kNotConnected,
    kConnected,
}

qualifier int UniqueInt(int prev) = external "stl.lib.UniqueInt";

message mRequest {
    encode "json";
    required int requestId;
    optional string payload;
}

event TlsConnect(int sessionId) = external "stl.lib.LogParams";
event SendRequest(mRequest request) = external "stl.lib.LogEncodedParams";

transition tConnectTls(int sessionId) {
    pre_states = [ sTlsState(sessionId).kNotConnected ]
    events {
        rSender -> TlsConnect(sessionId) -> rReceiver;
    }
    post_states = [ sTlsState(sessionId).kConnected ]
}

transition tConnectTlsActual = tConnectTls(kSessionId);
"#;

#[test]
fn links_full_module() {
    let program = link(&parse(&[TLS_MODULE])).expect("link failed");

    let module = &program.modules["tls"];
    assert_eq!(module.roles.len(), 2);
    assert_eq!(module.states.len(), 1);
    assert_eq!(module.transitions.len(), 2);

    let state = program.state(module.states["sTlsState"]);
    assert_eq!(state.name, "tls::sTlsState");
    assert_eq!(state.params, vec![Ty::Int]);
    assert_eq!(state.values, vec!["kNotConnected", "kConnected"]);

    let event = program.event(module.events["SendRequest"]);
    assert_eq!(
        event.body,
        EventBody::External("stl.lib.LogEncodedParams".to_string())
    );
    assert_eq!(event.params.len(), 1);
    assert_eq!(
        event.params[0].ty,
        Ty::Message(module.messages["mRequest"])
    );
}

#[test]
fn binding_becomes_executable_with_const_arg() {
    let program = link(&parse(&[TLS_MODULE])).expect("link failed");
    // tConnectTls has a parameter, so only the binding is executable.
    assert_eq!(program.executables.len(), 1);
    let executable = &program.executables[0];
    assert_eq!(executable.name, "tls::tConnectTlsActual");
    assert!(matches!(executable.args[0], Rvalue::Const(_)));

    let target = program.transition(executable.transition);
    assert_eq!(target.name, "tls::tConnectTls");
    assert!(matches!(target.kind, TransitionKind::Full(_)));
}

#[test]
fn unknown_transition_suggests_candidate() {
    let source = r#"
module m;
state sFoo { kA, kB }
transition tConnectTls {
    pre_states = [ sFoo.kA ]
    events { }
    post_states = [ ]
}
transition tBad = tConnectTsl();
"#;
    let err = link(&parse(&[source])).unwrap_err();
    assert!(err.message.contains("Did you mean tConnectTls?"), "{err}");
}

#[test]
fn unknown_state_value_suggests_candidate() {
    let source = r#"
module m;
state sTlsState { kNotConnected, kConnected }
transition tBad {
    pre_states = [ sTlsState.kNotConected ]
    events { }
    post_states = [ ]
}
"#;
    let err = link(&parse(&[source])).unwrap_err();
    assert!(err.message.contains("Did you mean kNotConnected?"), "{err}");
}

#[test]
fn duplicate_name_across_kinds_rejected() {
    let source = r#"
module m;
const int kFoo = 1;
state kFoo { kA }
"#;
    let err = link(&parse(&[source])).unwrap_err();
    assert!(err.message.contains("duplicated name"), "{err}");
}

#[test]
fn const_cycle_detected() {
    let source = r#"
module m;
const int kA = kB;
const int kB = kA;
"#;
    let err = link(&parse(&[source])).unwrap_err();
    assert!(err.message.contains("cyclic constant"), "{err}");
}

#[test]
fn const_chain_resolves() {
    let source = r#"
module m;
const int kA = 7;
const int kB = kA;
"#;
    let program = link(&parse(&[source])).expect("link failed");
    let module = &program.modules["m"];
    let b = program.const_decl(module.consts["kB"]);
    assert_eq!(b.value, stl_ast::Literal::Int(7));
}

#[test]
fn state_arity_mismatch_rejected() {
    let source = r#"
module m;
state sFoo(int a, int b) { kA }
transition tBad {
    pre_states = [ sFoo(1).kA ]
    events { }
    post_states = [ ]
}
"#;
    let err = link(&parse(&[source])).unwrap_err();
    assert!(err.message.contains("wrong number of arguments"), "{err}");
}

#[test]
fn event_cycle_is_flagged_not_fatal() {
    let source = r#"
module m;
event eA(int x) = eB(x);
event eB(int x) = eA(x);
"#;
    let program = link(&parse(&[source])).expect("cycles through events are legal");
    assert_eq!(program.recursive_events.len(), 2);
}

#[test]
fn self_expanding_event_rejected() {
    let source = r#"
module m;
event eA(int x) = eA(x);
"#;
    let err = link(&parse(&[source])).unwrap_err();
    assert!(err.message.contains("cannot expand self"), "{err}");
}

#[test]
fn cross_module_link() {
    let other = r#"
module net;
role rPeer { string host; }
"#;
    let program = link(&parse(&[TLS_MODULE, other])).expect("link failed");
    assert_eq!(program.modules.len(), 2);
    assert!(program.find_role("net::rPeer").is_some());
    assert!(program.find_role("tls::rSender").is_some());
    assert!(program.find_role("tls::rPeer").is_none());
}

#[test]
fn linking_is_idempotent() {
    let modules = parse(&[TLS_MODULE]);
    let first = link(&modules).expect("link failed");
    let second = link(&modules).expect("link failed");
    assert_eq!(first, second);
}

#[test]
fn qualifier_write_to_unknown_local_rejected() {
    let source = r#"
module m;
qualifier int UniqueInt(int prev) = external "stl.lib.UniqueInt";
message mReq {
    encode "json";
    required int requestId;
}
role rA { }
role rB { }
event Send(mReq request) = external "x.y.Z";
transition tBad {
    pre_states = [ ]
    events {
        rA -> Send(mReq { requestId = UniqueInt(0) -> missing; }) -> rB;
    }
    post_states = [ ]
}
"#;
    let err = link(&parse(&[source])).unwrap_err();
    assert!(
        err.message.contains("transition-local variable"),
        "{err}"
    );
}
