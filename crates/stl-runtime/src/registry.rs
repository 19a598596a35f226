//! Primitive registry.
//!
//! A lookup by dotted name returns an external event handler, an external
//! qualifier, or a message codec. The registry is populated by the host
//! before execution and is read-only afterwards; handlers themselves may be
//! stateful (qualifiers usually are).

use indexmap::IndexMap;
use tracing::debug;

use crate::encoding;
use crate::error::{Error, Result};
use crate::executor::RoleInstance;
use crate::value::{MessageValue, Value};
use stl_resolve::{EventBody, MessageId, Program};

/// Result of invoking an external event handler.
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    Ok,
    /// Recoverable: the owning transition applies `error_states` or rolls
    /// back, and execution continues.
    Failed(String),
    /// Framework-fatal: aborts the run.
    Fatal(String),
}

/// Which side of an interaction the driven role plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The driven role initiates the interaction.
    Fire,
    /// The driven role waits for and validates the interaction.
    Wait,
}

/// Context handed to external event handlers.
pub struct EventContext<'a> {
    pub source: &'a RoleInstance,
    pub target: &'a RoleInstance,
    pub direction: Direction,
    pub encoder: Encoder<'a>,
}

/// Encode/decode capability for handlers, covering all three encodings.
#[derive(Clone, Copy)]
pub struct Encoder<'a> {
    program: &'a Program,
    codecs: &'a CodecSet,
}

impl<'a> Encoder<'a> {
    pub fn new(program: &'a Program, codecs: &'a CodecSet) -> Self {
        Self { program, codecs }
    }

    pub fn encode(&self, value: &MessageValue) -> Result<Vec<u8>> {
        encoding::encode(self.program, self.codecs, value)
    }

    pub fn decode(&self, message: MessageId, bytes: &[u8]) -> Result<MessageValue> {
        encoding::decode(self.program, self.codecs, message, bytes)
    }
}

/// An external terminal event.
///
/// `fire` initiates the interaction from source to target; `wait` blocks for
/// and validates the incoming interaction. The executor picks the side from
/// which role is under test.
pub trait EventHandler: Send {
    fn fire(&mut self, ctx: &EventContext<'_>, args: &[Value]) -> EventOutcome;
    fn wait(&mut self, ctx: &EventContext<'_>, args: &[Value]) -> EventOutcome;
}

/// An external qualifier.
///
/// Invariant: `validate(generate(args), args)` always holds.
pub trait QualifierHandler: Send {
    /// Generate a valid value, or fail with a reason (recoverable).
    fn generate(&mut self, args: &[Value]) -> std::result::Result<Value, String>;
    /// Whether `value` is acceptable.
    fn validate(&mut self, value: &Value, args: &[Value]) -> bool;
}

/// A codec for `bytestream` / `protobuf` messages, keyed on the message's
/// `external` reference. The codec owns the wire layout.
pub trait MessageCodec: Send {
    fn encode(
        &self,
        program: &Program,
        value: &MessageValue,
    ) -> std::result::Result<Vec<u8>, String>;
    fn decode(
        &self,
        program: &Program,
        message: MessageId,
        bytes: &[u8],
    ) -> std::result::Result<MessageValue, String>;
}

/// Registered codecs by dotted name.
#[derive(Default)]
pub struct CodecSet {
    codecs: IndexMap<String, Box<dyn MessageCodec>>,
}

impl CodecSet {
    pub fn register(&mut self, name: impl Into<String>, codec: Box<dyn MessageCodec>) {
        self.codecs.insert(name.into(), codec);
    }

    pub fn get(&self, name: &str) -> Option<&dyn MessageCodec> {
        self.codecs.get(name).map(|c| c.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.codecs.contains_key(name)
    }
}

/// The injected map from dotted names to callables.
#[derive(Default)]
pub struct PrimitiveRegistry {
    events: IndexMap<String, Box<dyn EventHandler>>,
    qualifiers: IndexMap<String, Box<dyn QualifierHandler>>,
    codecs: CodecSet,
}

impl PrimitiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_event(&mut self, name: impl Into<String>, handler: Box<dyn EventHandler>) {
        let name = name.into();
        debug!(name = %name, "event handler registered");
        self.events.insert(name, handler);
    }

    pub fn register_qualifier(
        &mut self,
        name: impl Into<String>,
        handler: Box<dyn QualifierHandler>,
    ) {
        let name = name.into();
        debug!(name = %name, "qualifier registered");
        self.qualifiers.insert(name, handler);
    }

    pub fn register_codec(&mut self, name: impl Into<String>, codec: Box<dyn MessageCodec>) {
        let name = name.into();
        debug!(name = %name, "codec registered");
        self.codecs.register(name, codec);
    }

    pub fn has_event(&self, name: &str) -> bool {
        self.events.contains_key(name)
    }

    pub fn has_qualifier(&self, name: &str) -> bool {
        self.qualifiers.contains_key(name)
    }

    pub fn codecs(&self) -> &CodecSet {
        &self.codecs
    }

    /// Invoke an external event. `Err` only for a missing registration.
    pub fn invoke_event(
        &mut self,
        program: &Program,
        source: &RoleInstance,
        target: &RoleInstance,
        direction: Direction,
        name: &str,
        args: &[Value],
    ) -> Result<EventOutcome> {
        let Some(handler) = self.events.get_mut(name) else {
            return Err(Error::Registry(name.to_string()));
        };
        let ctx = EventContext {
            source,
            target,
            direction,
            encoder: Encoder::new(program, &self.codecs),
        };
        Ok(match direction {
            Direction::Fire => handler.fire(&ctx, args),
            Direction::Wait => handler.wait(&ctx, args),
        })
    }

    /// Invoke a qualifier's generate side. The outer `Err` is a missing
    /// registration; the inner one is a recoverable generation failure.
    pub fn invoke_qualifier(
        &mut self,
        name: &str,
        args: &[Value],
    ) -> Result<std::result::Result<Value, String>> {
        let Some(handler) = self.qualifiers.get_mut(name) else {
            return Err(Error::Registry(name.to_string()));
        };
        Ok(handler.generate(args))
    }

    /// Invoke a qualifier's validate side.
    pub fn validate_qualifier(
        &mut self,
        name: &str,
        value: &Value,
        args: &[Value],
    ) -> Result<bool> {
        let Some(handler) = self.qualifiers.get_mut(name) else {
            return Err(Error::Registry(name.to_string()));
        };
        Ok(handler.validate(value, args))
    }
}

/// Verify that every external name the program uses has a registered
/// implementation. A missing one is fatal before execution starts.
pub fn verify_registry(program: &Program, registry: &PrimitiveRegistry) -> Result<()> {
    for event in &program.events {
        if let EventBody::External(name) = &event.body {
            if !registry.has_event(name) {
                return Err(Error::Registry(name.clone()));
            }
        }
    }
    for qualifier in &program.qualifiers {
        if !registry.has_qualifier(&qualifier.external) {
            return Err(Error::Registry(qualifier.external.clone()));
        }
    }
    for message in &program.messages {
        let needs_codec = matches!(
            message.encoding,
            Some(stl_resolve::Encoding::Bytestream) | Some(stl_resolve::Encoding::Protobuf)
        );
        if needs_codec {
            match &message.external {
                Some(external) if registry.codecs.contains(external) => {}
                Some(external) => return Err(Error::Registry(external.clone())),
                None => {
                    return Err(Error::Fatal(format!(
                        "message '{}' uses {} encoding but names no external codec",
                        message.name,
                        message.encoding.map(|e| e.as_str()).unwrap_or("?"),
                    )))
                }
            }
        }
    }
    Ok(())
}
