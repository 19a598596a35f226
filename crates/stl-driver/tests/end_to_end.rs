//! End-to-end runs over the example protocol in `testdata/`.

use std::io::Write;
use std::path::PathBuf;

use indexmap::IndexMap;
use stl_driver::{manifest, run_test, RunError, RunOptions};

fn testdata(file: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("testdata")
        .join(file)
}

fn args(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn simple_example_passes() {
    let summary = run_test(
        &testdata("simple_example.test"),
        &args(&[("ip", "\"0.0.0.0\"")]),
        RunOptions::default(),
    )
    .expect("run succeeds");
    assert!(summary.success(), "{summary:?}");
    assert_eq!(summary.executed.len(), 3);
    assert!(summary
        .executed
        .contains(&"tls::tConnectTlsActual".to_string()));
    assert!(summary
        .executed
        .contains(&"tls::tRequestResponseActual".to_string()));
    assert!(summary
        .executed
        .contains(&"tls::tDisconnectTlsActual".to_string()));
}

#[test]
fn simple_example_passes_with_randomized_selection() {
    let summary = run_test(
        &testdata("simple_example.test"),
        &args(&[("ip", "\"0.0.0.0\"")]),
        RunOptions {
            seed: 7,
            randomize: true,
        },
    )
    .expect("run succeeds");
    assert!(summary.success(), "{summary:?}");
}

#[test]
fn manifest_substitution_reaches_role_fields() {
    let text = std::fs::read_to_string(testdata("simple_example.test")).unwrap();
    let substituted = manifest::substitute(&text, &args(&[("ip", "\"0.0.0.0\"")]));
    let parsed = manifest::parse(&substituted).unwrap();
    assert_eq!(
        parsed.roles[0].fields["ipAddress"],
        serde_json::json!("0.0.0.0")
    );
}

#[test]
fn missing_substitution_is_a_manifest_error() {
    let err = run_test(
        &testdata("simple_example.test"),
        &IndexMap::new(),
        RunOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, RunError::Manifest(_)), "{err}");
    assert_eq!(err.exit_code(), 3);
}

#[test]
fn typo_in_transition_is_a_static_error() {
    let dir = tempfile::tempdir().unwrap();
    let stl_path = dir.path().join("typo.stl");
    let mut stl = std::fs::File::create(&stl_path).unwrap();
    write!(
        stl,
        r#"
module m;
role rA {{ string host; }}
role rB {{ string host; }}
state sFoo {{ kA, kB }}
event Go = external "stl.lib.NoOp";
transition tConnectTls {{
    pre_states = [ sFoo.kA ]
    events {{ rA -> Go -> rB; }}
    post_states = [ sFoo.kB ]
}}
transition tBad = tConnectTsl();
"#
    )
    .unwrap();

    let manifest_path = dir.path().join("typo.test");
    std::fs::write(
        &manifest_path,
        r#"{
            "stl_files": ["typo.stl"],
            "roles": [
                {"role": "m::rA", "host": "localhost"},
                {"role": "m::rB", "host": "localhost"}
            ],
            "test": ["m::rA"]
        }"#,
    )
    .unwrap();

    let err = run_test(&manifest_path, &IndexMap::new(), RunOptions::default()).unwrap_err();
    let RunError::Static(message) = &err else {
        panic!("expected static error, got {err}");
    };
    assert!(message.contains("Did you mean tConnectTls?"), "{message}");
    assert!(message.contains("typo.stl:"), "{message}");
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn unknown_role_field_in_manifest_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("tiny.stl"),
        r#"
module m;
role rA { string host; }
role rB { string host; }
event Go = external "stl.lib.NoOp";
transition tGo {
    pre_states = [ ]
    events { rA -> Go -> rB; }
    post_states = [ ]
}
"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join("tiny.test"),
        r#"{
            "stl_files": ["tiny.stl"],
            "roles": [
                {"role": "m::rA", "hostt": "oops"},
                {"role": "m::rB", "host": "localhost"}
            ],
            "test": ["m::rA"]
        }"#,
    )
    .unwrap();

    let err = run_test(
        &dir.path().join("tiny.test"),
        &IndexMap::new(),
        RunOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, RunError::Manifest(_)), "{err}");
    assert!(err.to_string().contains("hostt"), "{err}");
}
