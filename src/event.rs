//! Domain events and the inbound-frame ingestion pipeline.
//!
//! Each inbound frame carries a string discriminator. The
//! [`EventPipeline`] extracts it with a protocol-specific function, looks
//! up a parser in a flat map, and produces at most one [`Event`]. An
//! unknown discriminator is logged and dropped (non-fatal) unless strict
//! mode is on, in which case [`EventPipeline::ingest`] reports it to the
//! caller; either way no frame affects any other frame.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::elements::MessageChain;
use crate::selector::Selector;

/// A domain event produced from one inbound frame or one lifecycle
/// transition, delivered on the bridge's event bus in per-connection
/// arrival order.
#[derive(Debug, Clone)]
pub enum Event {
    /// An account announced itself on a connection and is now routable.
    AccountRegistered {
        /// The account's route.
        route: Selector,
    },
    /// An account's connection dropped; the account is no longer routable.
    AccountUnregistered {
        /// The account's route.
        route: Selector,
    },
    /// A message arrived in a scene the account can see.
    MessageReceived {
        /// Route of the receiving account.
        account: Selector,
        /// Scene the message belongs to (group, user, ...).
        scene: Selector,
        /// Who sent it.
        sender: Selector,
        /// Decoded content.
        message: MessageChain,
        /// Platform-assigned message id.
        message_id: String,
        /// Platform timestamp.
        time: DateTime<Utc>,
    },
    /// A previously sent message was revoked.
    MessageRevoked {
        /// Route of the observing account.
        account: Selector,
        /// Scene the message belonged to.
        scene: Selector,
        /// Platform-assigned id of the revoked message.
        message_id: String,
        /// Who revoked it, when known.
        operator: Option<Selector>,
    },
    /// A friend/join request awaits a decision.
    RequestReceived {
        /// Route of the receiving account.
        account: Selector,
        /// Scene the request concerns.
        scene: Selector,
        /// Who asked.
        sender: Selector,
        /// Request selector usable as the target of
        /// [`crate::standard::RequestAccept`] / [`crate::standard::RequestReject`].
        request: Selector,
        /// Free-form application text, if any.
        comment: Option<String>,
        /// Platform timestamp.
        time: DateTime<Utc>,
    },
    /// A member left or was removed from a scene.
    MemberRemoved {
        /// Route of the observing account.
        account: Selector,
        /// The scene.
        scene: Selector,
        /// The member that is gone.
        member: Selector,
        /// Who removed them, when known.
        operator: Option<Selector>,
    },
    /// A member was muted.
    MemberMuted {
        /// Route of the observing account.
        account: Selector,
        /// The scene.
        scene: Selector,
        /// The muted member.
        member: Selector,
        /// Mute duration.
        duration: Duration,
        /// Who muted them, when known.
        operator: Option<Selector>,
    },
    /// A member's mute was lifted.
    MemberUnmuted {
        /// Route of the observing account.
        account: Selector,
        /// The scene.
        scene: Selector,
        /// The unmuted member.
        member: Selector,
        /// Who lifted the mute, when known.
        operator: Option<Selector>,
    },
}

/// A frame was recognized as unparseable in strict mode.
#[derive(Debug, Error)]
pub enum UnsupportedFrame {
    /// The frame carries no discriminator the protocol understands.
    #[error("frame carries no discriminator")]
    Missing,
    /// The discriminator has no registered parser.
    #[error("unknown frame discriminator '{0}'")]
    Unknown(String),
}

/// A registered frame parser: raw frame in, at most one event out.
///
/// Parsers receive the owning connection so they can resolve accounts,
/// bind new ones, and run capability calls (element deserialization).
pub type FrameParser =
    Arc<dyn Fn(Connection, Value) -> BoxFuture<'static, anyhow::Result<Option<Event>>> + Send + Sync>;

/// Flat mapping from frame discriminator to parser, plus the extraction
/// function that produces the discriminator from a raw frame.
pub struct EventPipeline {
    discriminator: fn(&Value) -> Option<String>,
    parsers: HashMap<String, FrameParser>,
    strict: bool,
}

impl EventPipeline {
    /// A pipeline using `discriminator` to tag frames, with no parsers and
    /// strict mode off.
    pub fn new(discriminator: fn(&Value) -> Option<String>) -> Self {
        Self {
            discriminator,
            parsers: HashMap::new(),
            strict: false,
        }
    }

    /// Toggle strict handling of unknown discriminators.
    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    /// Register `parser` for frames tagged `discriminator`. Registering a
    /// tag twice replaces the earlier parser.
    pub fn register<F, Fut>(&mut self, discriminator: &str, parser: F)
    where
        F: Fn(Connection, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<Event>>> + Send + 'static,
    {
        let erased: FrameParser = Arc::new(move |connection, frame| {
            let fut: BoxFuture<'static, anyhow::Result<Option<Event>>> =
                Box::pin(parser(connection, frame));
            fut
        });
        if self
            .parsers
            .insert(discriminator.to_owned(), erased)
            .is_some()
        {
            debug!(discriminator, "frame parser replaced");
        }
    }

    /// Number of registered parsers.
    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    /// Whether no parser is registered.
    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }

    /// Feed one raw frame through the pipeline.
    ///
    /// Returns `Ok(Some(event))` on a parsed event, `Ok(None)` when the
    /// frame legitimately produces nothing (including unknown
    /// discriminators outside strict mode, and parser failures, both of
    /// which are logged and dropped). `Err` is only returned in strict
    /// mode for missing/unknown discriminators.
    pub async fn ingest(
        &self,
        connection: Connection,
        frame: Value,
    ) -> Result<Option<Event>, UnsupportedFrame> {
        let Some(tag) = (self.discriminator)(&frame) else {
            if self.strict {
                return Err(UnsupportedFrame::Missing);
            }
            warn!("dropping frame without a discriminator");
            return Ok(None);
        };
        let Some(parser) = self.parsers.get(&tag) else {
            if self.strict {
                return Err(UnsupportedFrame::Unknown(tag));
            }
            warn!(discriminator = %tag, "dropping frame with unknown discriminator");
            return Ok(None);
        };
        match parser(connection, frame).await {
            Ok(event) => Ok(event),
            Err(error) => {
                warn!(discriminator = %tag, error = %error, "frame parser failed, frame dropped");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use url::Url;

    use super::*;
    use crate::artifact::Isolate;
    use crate::bridge::Bridge;
    use crate::connection::ConnectionConfig;

    fn stub_connection() -> Connection {
        let (bridge, _events) = Bridge::new(4);
        let config = ConnectionConfig::new(Url::parse("ws://127.0.0.1:1/").expect("url"));
        Connection::new(config, Arc::new(Isolate::new()), bridge)
    }

    fn tag_field(frame: &Value) -> Option<String> {
        frame.get("kind").and_then(Value::as_str).map(str::to_owned)
    }

    fn test_pipeline() -> EventPipeline {
        let mut pipeline = EventPipeline::new(tag_field);
        pipeline.register("online", |_connection, frame: Value| async move {
            let route = Selector::new()
                .land("qq")
                .account(frame.get("who").and_then(Value::as_str).unwrap_or("0"));
            Ok(Some(Event::AccountRegistered { route }))
        });
        pipeline.register("silent", |_connection, _frame| async { Ok(None) });
        pipeline.register("broken", |_connection, _frame| async {
            anyhow::bail!("parser exploded")
        });
        pipeline
    }

    #[tokio::test]
    async fn known_discriminator_produces_an_event() {
        let pipeline = test_pipeline();
        let event = pipeline
            .ingest(stub_connection(), json!({ "kind": "online", "who": "9" }))
            .await
            .expect("not strict");
        assert!(matches!(event, Some(Event::AccountRegistered { .. })));
    }

    #[tokio::test]
    async fn unknown_discriminator_is_inert_and_does_not_poison_the_stream() {
        let pipeline = test_pipeline();
        let connection = stub_connection();

        let nothing = pipeline
            .ingest(connection.clone(), json!({ "kind": "mystery" }))
            .await
            .expect("warn-and-drop");
        assert!(nothing.is_none());

        // The next frame on the same connection still parses.
        let event = pipeline
            .ingest(connection, json!({ "kind": "online", "who": "9" }))
            .await
            .expect("not strict");
        assert!(event.is_some());
    }

    #[tokio::test]
    async fn strict_mode_reports_unknown_and_missing_discriminators() {
        let mut pipeline = test_pipeline();
        pipeline.set_strict(true);
        let connection = stub_connection();

        let err = pipeline
            .ingest(connection.clone(), json!({ "kind": "mystery" }))
            .await
            .expect_err("strict");
        assert!(matches!(err, UnsupportedFrame::Unknown(tag) if tag == "mystery"));

        let err = pipeline
            .ingest(connection.clone(), json!({ "untagged": true }))
            .await
            .expect_err("strict");
        assert!(matches!(err, UnsupportedFrame::Missing));

        // Known frames are unaffected by strictness.
        let event = pipeline
            .ingest(connection, json!({ "kind": "online", "who": "9" }))
            .await
            .expect("known frame");
        assert!(event.is_some());
    }

    #[tokio::test]
    async fn parser_failure_drops_only_that_frame() {
        let pipeline = test_pipeline();
        let connection = stub_connection();

        let dropped = pipeline
            .ingest(connection.clone(), json!({ "kind": "broken" }))
            .await
            .expect("parser errors are non-fatal");
        assert!(dropped.is_none());

        let silent = pipeline
            .ingest(connection.clone(), json!({ "kind": "silent" }))
            .await
            .expect("legitimately empty");
        assert!(silent.is_none());

        let event = pipeline
            .ingest(connection, json!({ "kind": "online", "who": "9" }))
            .await
            .expect("stream unaffected");
        assert!(event.is_some());
    }
}
