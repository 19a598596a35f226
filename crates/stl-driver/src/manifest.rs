//! Manifest loading.
//!
//! A manifest is a JSON document with three keys: `stl_files` (relative
//! paths), `roles` (role instantiations), and `test` (roles to drive).
//! Before parsing, every `$key` in the text is literally replaced with the
//! corresponding argument value; substitution is textual and non-recursive.

use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::debug;

use crate::RunError;

/// A resolved manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub stl_files: Vec<String>,
    pub roles: Vec<RoleEntry>,
    pub test: Vec<String>,
}

/// One role instantiation: the fully-qualified `module::role` name plus one
/// entry per declared field.
#[derive(Debug, Clone, Deserialize)]
pub struct RoleEntry {
    pub role: String,
    #[serde(flatten)]
    pub fields: IndexMap<String, serde_json::Value>,
}

/// Replace every `$key` occurrence with its argument value.
///
/// One pass over the text; a substituted value is not re-scanned. Unknown
/// keys are left untouched.
pub fn substitute(text: &str, args: &IndexMap<String, String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let key_len = after
            .bytes()
            .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
            .count();
        let key = &after[..key_len];
        match args.get(key) {
            Some(value) if key_len > 0 => {
                debug!(key = %key, value = %value, "manifest substitution");
                out.push_str(value);
            }
            _ => {
                out.push('$');
                out.push_str(key);
            }
        }
        rest = &after[key_len..];
    }
    out.push_str(rest);
    out
}

/// Parse space-separated `key=value` pairs from the command line.
pub fn parse_args(spec: &str) -> Result<IndexMap<String, String>, RunError> {
    let mut args = IndexMap::new();
    for pair in spec.split_whitespace() {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(RunError::Manifest(format!(
                "manifest argument is not key=value: {pair}"
            )));
        };
        args.insert(key.to_string(), value.to_string());
    }
    Ok(args)
}

/// Read a manifest file, apply substitutions, and parse it.
pub fn load(path: &Path, args: &IndexMap<String, String>) -> Result<Manifest, RunError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| RunError::Manifest(format!("cannot read {}: {e}", path.display())))?;
    let substituted = substitute(&text, args);
    parse(&substituted)
}

/// Parse manifest text (after substitution).
pub fn parse(text: &str) -> Result<Manifest, RunError> {
    let manifest: Manifest = serde_json::from_str(text).map_err(|e| {
        RunError::Manifest(format!(
            "invalid manifest ({e}); you may have forgotten to pass \
             --manifest-args=\"key=value\" to substitute for $key"
        ))
    })?;
    for role in &manifest.test {
        if !manifest.roles.iter().any(|entry| entry.role == *role) {
            return Err(RunError::Manifest(format!(
                "test role '{role}' has no entry under 'roles'"
            )));
        }
    }
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitution_is_literal() {
        let out = substitute("\"ipAddress\": $ip", &args(&[("ip", "\"0.0.0.0\"")]));
        assert_eq!(out, "\"ipAddress\": \"0.0.0.0\"");
    }

    #[test]
    fn substituted_value_is_not_rescanned() {
        let out = substitute("$a $b", &args(&[("a", "$b"), ("b", "2")]));
        assert_eq!(out, "$b 2");
    }

    #[test]
    fn unknown_key_is_left_alone() {
        let out = substitute("keep $unknown here", &args(&[]));
        assert_eq!(out, "keep $unknown here");
    }

    #[test]
    fn parse_key_value_args() {
        let parsed = parse_args("ip=\"0.0.0.0\" port=8009").unwrap();
        assert_eq!(parsed["ip"], "\"0.0.0.0\"");
        assert_eq!(parsed["port"], "8009");
    }

    #[test]
    fn malformed_arg_is_rejected() {
        assert!(parse_args("no-equals-sign").is_err());
    }

    #[test]
    fn manifest_round_trip() {
        let text = r#"{
            "stl_files": ["tls.stl"],
            "roles": [
                {"role": "tls::rSender", "ipAddress": "0.0.0.0", "port": 8009}
            ],
            "test": ["tls::rSender"]
        }"#;
        let manifest = parse(text).unwrap();
        assert_eq!(manifest.stl_files, vec!["tls.stl"]);
        assert_eq!(manifest.roles[0].role, "tls::rSender");
        assert_eq!(
            manifest.roles[0].fields["ipAddress"],
            serde_json::json!("0.0.0.0")
        );
        assert_eq!(manifest.test, vec!["tls::rSender"]);
    }

    #[test]
    fn test_role_must_be_instantiated() {
        let text = r#"{
            "stl_files": [],
            "roles": [],
            "test": ["tls::rSender"]
        }"#;
        assert!(parse(text).is_err());
    }
}
