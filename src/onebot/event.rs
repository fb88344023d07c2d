//! OneBot v11 frame ingestion.
//!
//! Frame discriminators compose `post_type` with its subordinate type
//! field: `message.group`, `notice.group_ban`, `request.group.invite`,
//! `meta_event.lifecycle.connect`. Every parser starts by resolving the
//! announcing account (`self_id`) against the connection's local map; a
//! frame for an account the connection never announced is dropped.

use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tracing::{info, warn};

use crate::connection::Connection;
use crate::event::{Event, EventPipeline};
use crate::selector::Selector;

use super::message::deserialize_chain;
use super::{value_string, LAND};

/// Build the OneBot frame pipeline.
pub fn pipeline() -> EventPipeline {
    let mut pipeline = EventPipeline::new(discriminator);
    pipeline.register("message.group", message_group);
    pipeline.register("message.private", message_private);
    pipeline.register("request.friend", request_friend);
    pipeline.register("request.group.add", request_group);
    pipeline.register("request.group.invite", request_group);
    pipeline.register("notice.group_ban", group_ban);
    pipeline.register("notice.group_decrease", group_decrease);
    pipeline.register("notice.group_recall", group_recall);
    pipeline.register("meta_event.lifecycle.connect", lifecycle_connect);
    pipeline.register("meta_event.heartbeat", heartbeat);
    pipeline
}

/// Extract the discriminator of a raw OneBot frame.
pub fn discriminator(frame: &Value) -> Option<String> {
    let post_type = frame.get("post_type")?.as_str()?;
    let sub_type = frame.get("sub_type").and_then(Value::as_str);
    match post_type {
        "message" => {
            let message_type = frame.get("message_type")?.as_str()?;
            Some(format!("message.{message_type}"))
        }
        "notice" => {
            let notice_type = frame.get("notice_type")?.as_str()?;
            Some(format!("notice.{notice_type}"))
        }
        "request" => {
            let request_type = frame.get("request_type")?.as_str()?;
            match sub_type {
                Some(sub) if request_type == "group" => {
                    Some(format!("request.{request_type}.{sub}"))
                }
                _ => Some(format!("request.{request_type}")),
            }
        }
        "meta_event" => {
            let meta_type = frame.get("meta_event_type")?.as_str()?;
            match sub_type {
                Some(sub) if meta_type == "lifecycle" => {
                    Some(format!("meta_event.{meta_type}.{sub}"))
                }
                _ => Some(format!("meta_event.{meta_type}")),
            }
        }
        _ => None,
    }
}

fn id_string(frame: &Value, key: &str) -> Option<String> {
    value_string(frame.get(key)?)
}

fn timestamp(frame: &Value) -> DateTime<Utc> {
    frame
        .get("time")
        .and_then(Value::as_i64)
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .unwrap_or_else(Utc::now)
}

/// Route of the account a frame belongs to, if this connection announced
/// it.
fn account_route(connection: &Connection, frame: &Value) -> Option<Selector> {
    let id = id_string(frame, "self_id")?;
    let route = connection.account_route(&id);
    if route.is_none() {
        warn!(account = %id, "frame for an account this connection never announced, dropping");
    }
    route
}

async fn lifecycle_connect(
    connection: Connection,
    frame: Value,
) -> anyhow::Result<Option<Event>> {
    let id = id_string(&frame, "self_id").context("lifecycle frame missing self_id")?;
    let route = Selector::new().land(LAND).account(&id);
    connection.bind_account(&id, route.clone());
    info!(account = %route, "account online");
    Ok(Some(Event::AccountRegistered { route }))
}

async fn heartbeat(_connection: Connection, _frame: Value) -> anyhow::Result<Option<Event>> {
    Ok(None)
}

async fn message_group(
    connection: Connection,
    frame: Value,
) -> anyhow::Result<Option<Event>> {
    let Some(account) = account_route(&connection, &frame) else {
        return Ok(None);
    };
    let group = id_string(&frame, "group_id").context("group message missing group_id")?;
    let sender_id = id_string(&frame, "user_id").context("group message missing user_id")?;
    let message_id = id_string(&frame, "message_id").context("group message missing message_id")?;

    let scene = Selector::new().land(LAND).group(group);
    let sender = scene.clone().member(sender_id);
    let raw_message = frame.get("message").cloned().unwrap_or(Value::Null);
    let message = deserialize_chain(&connection.resolver(), &raw_message).await;
    Ok(Some(Event::MessageReceived {
        account,
        scene,
        sender,
        message,
        message_id,
        time: timestamp(&frame),
    }))
}

async fn message_private(
    connection: Connection,
    frame: Value,
) -> anyhow::Result<Option<Event>> {
    let Some(account) = account_route(&connection, &frame) else {
        return Ok(None);
    };
    let user = id_string(&frame, "user_id").context("private message missing user_id")?;
    let message_id =
        id_string(&frame, "message_id").context("private message missing message_id")?;

    let scene = Selector::new().land(LAND).user(user);
    let raw_message = frame.get("message").cloned().unwrap_or(Value::Null);
    let message = deserialize_chain(&connection.resolver(), &raw_message).await;
    Ok(Some(Event::MessageReceived {
        account,
        scene: scene.clone(),
        sender: scene,
        message,
        message_id,
        time: timestamp(&frame),
    }))
}

async fn request_friend(
    connection: Connection,
    frame: Value,
) -> anyhow::Result<Option<Event>> {
    let Some(account) = account_route(&connection, &frame) else {
        return Ok(None);
    };
    let user = id_string(&frame, "user_id").context("friend request missing user_id")?;
    let flag = id_string(&frame, "flag").context("friend request missing flag")?;

    let sender = Selector::new().land(LAND).user(user);
    let request = sender.clone().push("request", format!("{flag}@friend"));
    Ok(Some(Event::RequestReceived {
        account,
        scene: sender.clone(),
        sender,
        request,
        comment: id_string(&frame, "comment").filter(|c| !c.is_empty()),
        time: timestamp(&frame),
    }))
}

async fn request_group(
    connection: Connection,
    frame: Value,
) -> anyhow::Result<Option<Event>> {
    let Some(account) = account_route(&connection, &frame) else {
        return Ok(None);
    };
    let group = id_string(&frame, "group_id").context("group request missing group_id")?;
    let user = id_string(&frame, "user_id").context("group request missing user_id")?;
    let flag = id_string(&frame, "flag").context("group request missing flag")?;
    let sub_type = frame
        .get("sub_type")
        .and_then(Value::as_str)
        .context("group request missing sub_type")?;

    let scene = Selector::new().land(LAND).group(group);
    let sender = Selector::new().land(LAND).user(user);
    let request = scene.clone().push("request", format!("{flag}@{sub_type}"));
    Ok(Some(Event::RequestReceived {
        account,
        scene,
        sender,
        request,
        comment: id_string(&frame, "comment").filter(|c| !c.is_empty()),
        time: timestamp(&frame),
    }))
}

async fn group_ban(connection: Connection, frame: Value) -> anyhow::Result<Option<Event>> {
    let Some(account) = account_route(&connection, &frame) else {
        return Ok(None);
    };
    let group = id_string(&frame, "group_id").context("group ban missing group_id")?;
    let user = id_string(&frame, "user_id").context("group ban missing user_id")?;

    let scene = Selector::new().land(LAND).group(group);
    let member = scene.clone().member(user);
    let operator = id_string(&frame, "operator_id").map(|op| scene.clone().member(op));

    if frame.get("sub_type").and_then(Value::as_str) == Some("lift_ban") {
        return Ok(Some(Event::MemberUnmuted {
            account,
            scene,
            member,
            operator,
        }));
    }
    let duration = frame.get("duration").and_then(Value::as_u64).unwrap_or(0);
    Ok(Some(Event::MemberMuted {
        account,
        scene,
        member,
        duration: Duration::from_secs(duration),
        operator,
    }))
}

async fn group_decrease(
    connection: Connection,
    frame: Value,
) -> anyhow::Result<Option<Event>> {
    let Some(account) = account_route(&connection, &frame) else {
        return Ok(None);
    };
    let group = id_string(&frame, "group_id").context("group decrease missing group_id")?;
    let user = id_string(&frame, "user_id").context("group decrease missing user_id")?;

    let scene = Selector::new().land(LAND).group(group);
    let member = scene.clone().member(user);
    // `leave` carries no meaningful operator; kicks do.
    let operator = match frame.get("sub_type").and_then(Value::as_str) {
        Some("leave") => None,
        _ => id_string(&frame, "operator_id").map(|op| scene.clone().member(op)),
    };
    Ok(Some(Event::MemberRemoved {
        account,
        scene,
        member,
        operator,
    }))
}

async fn group_recall(connection: Connection, frame: Value) -> anyhow::Result<Option<Event>> {
    let Some(account) = account_route(&connection, &frame) else {
        return Ok(None);
    };
    let group = id_string(&frame, "group_id").context("group recall missing group_id")?;
    let message_id = id_string(&frame, "message_id").context("group recall missing message_id")?;

    let scene = Selector::new().land(LAND).group(group);
    let operator = id_string(&frame, "operator_id").map(|op| scene.clone().member(op));
    Ok(Some(Event::MessageRevoked {
        account,
        scene,
        message_id,
        operator,
    }))
}
