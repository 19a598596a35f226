//! Builtin primitive library.
//!
//! The standard handlers a conformance run can rely on without writing any
//! host code, registered under `stl.lib.*` dotted names:
//!
//! - events: `NoOp`, `Sleep`, `LogParams`, `LogEncodedParams`
//! - qualifiers: `AnyOf`, `RandomString`, `RandomBool`, `UniqueString`,
//!   `UniqueInt`, `DifferentFrom`

use std::collections::HashSet;

use tracing::info;

use crate::registry::{EventContext, EventHandler, EventOutcome, PrimitiveRegistry, QualifierHandler};
use crate::rng::RngStream;
use crate::value::Value;

/// Register every builtin under its `stl.lib.*` name.
///
/// `seed` drives the random qualifiers; the same seed reproduces the same
/// run.
pub fn register_builtins(registry: &mut PrimitiveRegistry, seed: u64) {
    let mut seeds = RngStream::new(seed);

    registry.register_event("stl.lib.NoOp", Box::new(NoOp));
    registry.register_event("stl.lib.Sleep", Box::new(Sleep));
    registry.register_event("stl.lib.LogParams", Box::new(LogParams));
    registry.register_event("stl.lib.LogEncodedParams", Box::new(LogEncodedParams));

    registry.register_qualifier(
        "stl.lib.AnyOf",
        Box::new(AnyOf {
            rng: RngStream::new(seeds.next_u64()),
        }),
    );
    registry.register_qualifier(
        "stl.lib.RandomString",
        Box::new(RandomString {
            rng: RngStream::new(seeds.next_u64()),
        }),
    );
    registry.register_qualifier(
        "stl.lib.RandomBool",
        Box::new(RandomBool {
            rng: RngStream::new(seeds.next_u64()),
        }),
    );
    registry.register_qualifier("stl.lib.UniqueString", Box::new(UniqueString::default()));
    registry.register_qualifier("stl.lib.UniqueInt", Box::new(UniqueInt::new()));
    registry.register_qualifier(
        "stl.lib.DifferentFrom",
        Box::new(DifferentFrom {
            rng: RngStream::new(seeds.next_u64()),
        }),
    );
}

// =============================================================================
// Events
// =============================================================================

/// Does nothing, always succeeds.
struct NoOp;

impl EventHandler for NoOp {
    fn fire(&mut self, _ctx: &EventContext<'_>, _args: &[Value]) -> EventOutcome {
        EventOutcome::Ok
    }

    fn wait(&mut self, _ctx: &EventContext<'_>, _args: &[Value]) -> EventOutcome {
        EventOutcome::Ok
    }
}

/// Sleeps for the number of seconds in its first argument.
struct Sleep;

impl Sleep {
    fn run(args: &[Value]) -> EventOutcome {
        match args.first().and_then(Value::as_int) {
            Some(secs) if secs >= 0 => {
                std::thread::sleep(std::time::Duration::from_secs(secs as u64));
                EventOutcome::Ok
            }
            _ => EventOutcome::Failed("Sleep expects a non-negative integer".to_string()),
        }
    }
}

impl EventHandler for Sleep {
    fn fire(&mut self, _ctx: &EventContext<'_>, args: &[Value]) -> EventOutcome {
        Self::run(args)
    }

    fn wait(&mut self, _ctx: &EventContext<'_>, args: &[Value]) -> EventOutcome {
        Self::run(args)
    }
}

/// Logs its raw arguments and succeeds.
struct LogParams;

impl LogParams {
    fn log(side: &str, ctx: &EventContext<'_>, args: &[Value]) -> EventOutcome {
        let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        info!(
            source = %ctx.source.name,
            target = %ctx.target.name,
            params = %rendered.join(", "),
            "{side}"
        );
        EventOutcome::Ok
    }
}

impl EventHandler for LogParams {
    fn fire(&mut self, ctx: &EventContext<'_>, args: &[Value]) -> EventOutcome {
        Self::log("fire", ctx, args)
    }

    fn wait(&mut self, ctx: &EventContext<'_>, args: &[Value]) -> EventOutcome {
        Self::log("wait", ctx, args)
    }
}

/// Logs its arguments with message arguments encoded to their wire form.
struct LogEncodedParams;

impl LogEncodedParams {
    fn log(side: &str, ctx: &EventContext<'_>, args: &[Value]) -> EventOutcome {
        let mut rendered = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                Value::Message(message) => match ctx.encoder.encode(message) {
                    Ok(bytes) => rendered.push(String::from_utf8_lossy(&bytes).into_owned()),
                    Err(e) => return EventOutcome::Fatal(e.to_string()),
                },
                other => rendered.push(other.to_string()),
            }
        }
        info!(
            source = %ctx.source.name,
            target = %ctx.target.name,
            params = %rendered.join(", "),
            "{side}"
        );
        EventOutcome::Ok
    }
}

impl EventHandler for LogEncodedParams {
    fn fire(&mut self, ctx: &EventContext<'_>, args: &[Value]) -> EventOutcome {
        Self::log("fire", ctx, args)
    }

    fn wait(&mut self, ctx: &EventContext<'_>, args: &[Value]) -> EventOutcome {
        Self::log("wait", ctx, args)
    }
}

// =============================================================================
// Qualifiers
// =============================================================================

/// Qualifies a value that is one of the given candidates.
struct AnyOf {
    rng: RngStream,
}

impl QualifierHandler for AnyOf {
    fn generate(&mut self, args: &[Value]) -> Result<Value, String> {
        if args.is_empty() {
            return Err("AnyOf needs at least one candidate".to_string());
        }
        let index = self.rng.next_below(args.len() as u64) as usize;
        Ok(args[index].clone())
    }

    fn validate(&mut self, value: &Value, args: &[Value]) -> bool {
        args.contains(value)
    }
}

/// Qualifies any string; generates `random-N`.
struct RandomString {
    rng: RngStream,
}

impl QualifierHandler for RandomString {
    fn generate(&mut self, _args: &[Value]) -> Result<Value, String> {
        Ok(Value::Str(format!("random-{}", self.rng.next_below(1_000_000))))
    }

    fn validate(&mut self, _value: &Value, _args: &[Value]) -> bool {
        true
    }
}

/// Qualifies any boolean; generates a random one.
struct RandomBool {
    rng: RngStream,
}

impl QualifierHandler for RandomBool {
    fn generate(&mut self, _args: &[Value]) -> Result<Value, String> {
        Ok(Value::Bool(self.rng.next_bool()))
    }

    fn validate(&mut self, _value: &Value, _args: &[Value]) -> bool {
        true
    }
}

/// Qualifies strings that never repeat within a run.
#[derive(Default)]
struct UniqueString {
    num: u64,
    previous: HashSet<String>,
}

impl QualifierHandler for UniqueString {
    fn generate(&mut self, args: &[Value]) -> Result<Value, String> {
        if let Some(prev) = args.first().and_then(Value::as_str) {
            self.previous.insert(prev.to_string());
        }
        loop {
            let value = format!("unique-{}", self.num);
            self.num += 1;
            if !self.previous.contains(&value) {
                return Ok(Value::Str(value));
            }
        }
    }

    fn validate(&mut self, value: &Value, args: &[Value]) -> bool {
        if let Some(prev) = args.first().and_then(Value::as_str) {
            self.previous.insert(prev.to_string());
        }
        match value.as_str() {
            Some(v) => !self.previous.contains(v),
            None => false,
        }
    }
}

/// Qualifies integers that never repeat within a run.
struct UniqueInt {
    num: i64,
    previous: HashSet<i64>,
}

impl UniqueInt {
    fn new() -> Self {
        Self {
            num: 1,
            previous: HashSet::new(),
        }
    }
}

impl QualifierHandler for UniqueInt {
    fn generate(&mut self, args: &[Value]) -> Result<Value, String> {
        if let Some(prev) = args.first().and_then(Value::as_int) {
            self.previous.insert(prev);
        }
        loop {
            let value = self.num;
            self.num += 1;
            if !self.previous.contains(&value) {
                return Ok(Value::Int(value));
            }
        }
    }

    fn validate(&mut self, value: &Value, args: &[Value]) -> bool {
        if let Some(prev) = args.first().and_then(Value::as_int) {
            self.previous.insert(prev);
        }
        match value.as_int() {
            Some(v) => !self.previous.contains(&v),
            None => false,
        }
    }
}

/// Qualifies a string different from the previous one.
struct DifferentFrom {
    rng: RngStream,
}

impl QualifierHandler for DifferentFrom {
    fn generate(&mut self, args: &[Value]) -> Result<Value, String> {
        let prev = args.first().and_then(Value::as_str).unwrap_or_default();
        let mut n = self.rng.next_below(1_000_000);
        if format!("random-{n}") == prev {
            n += 1;
        }
        Ok(Value::Str(format!("random-{n}")))
    }

    fn validate(&mut self, value: &Value, args: &[Value]) -> bool {
        match args.first() {
            Some(prev) => value != prev,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_int_values_are_pairwise_distinct() {
        let mut qualifier = UniqueInt::new();
        let mut seen = HashSet::new();
        for _ in 0..100 {
            let value = qualifier
                .generate(&[Value::Int(0)])
                .unwrap()
                .as_int()
                .unwrap();
            assert!(seen.insert(value), "value {value} repeated");
        }
    }

    #[test]
    fn unique_int_generate_validates() {
        let mut generator = UniqueInt::new();
        let mut validator = UniqueInt::new();
        let args = [Value::Int(0)];
        let value = generator.generate(&args).unwrap();
        assert!(validator.validate(&value, &args));
    }

    #[test]
    fn unique_int_skips_previous() {
        let mut qualifier = UniqueInt::new();
        let value = qualifier.generate(&[Value::Int(1)]).unwrap();
        assert_eq!(value, Value::Int(2));
    }

    #[test]
    fn unique_string_never_repeats() {
        let mut qualifier = UniqueString::default();
        let first = qualifier.generate(&[Value::Str("unique-0".to_string())]).unwrap();
        assert_eq!(first, Value::Str("unique-1".to_string()));
    }

    #[test]
    fn any_of_generates_member() {
        let mut qualifier = AnyOf {
            rng: RngStream::new(3),
        };
        let args = [Value::Int(1), Value::Int(2), Value::Int(3)];
        for _ in 0..20 {
            let value = qualifier.generate(&args).unwrap();
            assert!(qualifier.validate(&value, &args));
        }
    }

    #[test]
    fn different_from_avoids_previous() {
        let mut qualifier = DifferentFrom {
            rng: RngStream::new(9),
        };
        for _ in 0..20 {
            let prev = Value::Str("random-5".to_string());
            let value = qualifier.generate(std::slice::from_ref(&prev)).unwrap();
            assert!(qualifier.validate(&value, std::slice::from_ref(&prev)));
        }
    }
}
