//! OneBot v11 adapter.
//!
//! Speaks the OneBot v11 WebSocket protocol: action envelopes with `echo`
//! correlation outbound, `post_type`-tagged frames inbound. The adapter
//! contributes two collectors, wire actions at the protocol layer and
//! message-element decoding at the application layer, plus the frame
//! pipeline that turns OneBot events into domain events.

use serde_json::Value;

use crate::artifact::{Isolate, RegistrationConflict};
use crate::event::EventPipeline;
use crate::protocol::{Platform, Protocol};

pub mod action;
pub mod event;
pub mod message;

/// The platform land OneBot selectors live under.
pub const LAND: &str = "qq";

/// Render a wire id (string or number) as a string.
pub(crate) fn value_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// The OneBot v11 protocol.
pub struct OneBot;

impl Protocol for OneBot {
    fn platform(&self) -> Platform {
        Platform {
            name: "OneBot",
            implementation: "sprawl-onebot",
            generation: "v11",
        }
    }

    fn register(&self, isolate: &mut Isolate) -> Result<(), RegistrationConflict> {
        isolate.attach(action::collector()?)?;
        isolate.attach(message::collector()?)?;
        Ok(())
    }

    fn pipeline(&self) -> EventPipeline {
        event::pipeline()
    }
}
