//! OneBot v11 action performs.
//!
//! Each perform maps one abstract operation onto the wire action the
//! OneBot endpoint expects, addressed by the shape of the target selector:
//! `land.group` operations go to group endpoints, `land.user` to private
//! ones. All performs ride the connection bound into their environment.

use anyhow::Context;
use serde_json::json;

use crate::artifact::{Layer, RegistrationConflict};
use crate::collector::{Collector, Template};
use crate::resolve::PerformEnv;
use crate::selector::Selector;
use crate::standard::{
    AcceptRequest, FetchResource, LeaveScene, MessageRevoke, MessageSend, MessageTarget, MuteAll,
    MuteMember, MuteMemberArgs, RejectRequest, RemoveMember, RemoveMemberArgs, RequestAccept,
    RequestReject, ResourceArgs, SceneTarget, SendMessage, UnmuteAll, UnmuteMember,
};

use super::message::serialize_chain;
use super::value_string;

/// Build the wire-action collector.
pub fn collector() -> Result<Collector, RegistrationConflict> {
    let mut collector = Collector::new(
        "onebot::action",
        Layer::Protocol,
        Template::empty().with_connection().with_account(),
    );
    collector.collect::<MessageSend, _, _>("land.group", send_group)?;
    collector.collect::<MessageSend, _, _>("land.user", send_private)?;
    collector.collect::<MessageRevoke, _, _>("land.group.message", revoke)?;
    collector.collect::<MessageRevoke, _, _>("land.user.message", revoke)?;
    collector.collect::<RemoveMember, _, _>("land.group.member", kick_member)?;
    collector.collect::<MuteMember, _, _>("land.group.member", mute_member)?;
    collector.collect::<UnmuteMember, _, _>("land.group.member", unmute_member)?;
    collector.collect::<MuteAll, _, _>("land.group", mute_all)?;
    collector.collect::<UnmuteAll, _, _>("land.group", unmute_all)?;
    collector.collect::<LeaveScene, _, _>("land.group", leave_group)?;
    collector.collect::<RequestAccept, _, _>("land.user.request", accept_request)?;
    collector.collect::<RequestAccept, _, _>("land.group.request", accept_request)?;
    collector.collect::<RequestReject, _, _>("land.user.request", reject_request)?;
    collector.collect::<RequestReject, _, _>("land.group.request", reject_request)?;
    collector.collect::<FetchResource, _, _>("land.picture", fetch_picture)?;
    Ok(collector)
}

/// Numeric value of the named target segment.
fn numeric(target: &Selector, segment: &str) -> anyhow::Result<i64> {
    let value = target
        .get(segment)
        .with_context(|| format!("target '{target}' has no '{segment}' segment"))?;
    value
        .parse()
        .with_context(|| format!("segment '{segment}' of '{target}' is not numeric"))
}

/// Split a request selector's `request` value into `(flag, kind)`.
///
/// The event side encodes requests as `<flag>@<kind>` with kind one of
/// `friend`, `add`, `invite`.
fn request_parts(target: &Selector) -> anyhow::Result<(String, String)> {
    let raw = target
        .get("request")
        .with_context(|| format!("target '{target}' has no 'request' segment"))?;
    let (flag, kind) = raw
        .split_once('@')
        .with_context(|| format!("request id '{raw}' has no '@kind' suffix"))?;
    Ok((flag.to_owned(), kind.to_owned()))
}

async fn send_group(env: PerformEnv, args: SendMessage) -> anyhow::Result<Selector> {
    let connection = env.require_connection()?;
    let group = numeric(&args.target, "group")?;
    let mut segments = Vec::new();
    if let Some(reply) = &args.reply {
        let id = reply.get("message").unwrap_or_default();
        segments.push(json!({ "type": "reply", "data": { "id": id } }));
    }
    segments.extend(serialize_chain(&args.message));
    let data = connection
        .call(
            "send_msg",
            json!({ "message_type": "group", "group_id": group, "message": segments }),
        )
        .await?;
    let id = data
        .get("message_id")
        .and_then(value_string)
        .context("send_msg response missing message_id")?;
    Ok(args.target.clone().message(id))
}

async fn send_private(env: PerformEnv, args: SendMessage) -> anyhow::Result<Selector> {
    let connection = env.require_connection()?;
    let user = numeric(&args.target, "user")?;
    let mut segments = Vec::new();
    if let Some(reply) = &args.reply {
        let id = reply.get("message").unwrap_or_default();
        segments.push(json!({ "type": "reply", "data": { "id": id } }));
    }
    segments.extend(serialize_chain(&args.message));
    let data = connection
        .call(
            "send_msg",
            json!({ "message_type": "private", "user_id": user, "message": segments }),
        )
        .await?;
    let id = data
        .get("message_id")
        .and_then(value_string)
        .context("send_msg response missing message_id")?;
    Ok(args.target.clone().message(id))
}

async fn revoke(env: PerformEnv, args: MessageTarget) -> anyhow::Result<()> {
    let connection = env.require_connection()?;
    let message_id = numeric(&args.target, "message")?;
    connection
        .call("delete_msg", json!({ "message_id": message_id }))
        .await?;
    Ok(())
}

async fn kick_member(env: PerformEnv, args: RemoveMemberArgs) -> anyhow::Result<()> {
    let connection = env.require_connection()?;
    connection
        .call(
            "set_group_kick",
            json!({
                "group_id": numeric(&args.target, "group")?,
                "user_id": numeric(&args.target, "member")?,
                "reject_add_request": args.permanent,
            }),
        )
        .await?;
    Ok(())
}

async fn mute_member(env: PerformEnv, args: MuteMemberArgs) -> anyhow::Result<()> {
    let connection = env.require_connection()?;
    connection
        .call(
            "set_group_ban",
            json!({
                "group_id": numeric(&args.target, "group")?,
                "user_id": numeric(&args.target, "member")?,
                "duration": args.duration.as_secs(),
            }),
        )
        .await?;
    Ok(())
}

async fn unmute_member(env: PerformEnv, args: SceneTarget) -> anyhow::Result<()> {
    let connection = env.require_connection()?;
    connection
        .call(
            "set_group_ban",
            json!({
                "group_id": numeric(&args.target, "group")?,
                "user_id": numeric(&args.target, "member")?,
                "duration": 0,
            }),
        )
        .await?;
    Ok(())
}

async fn mute_all(env: PerformEnv, args: SceneTarget) -> anyhow::Result<()> {
    set_whole_ban(env, &args.target, true).await
}

async fn unmute_all(env: PerformEnv, args: SceneTarget) -> anyhow::Result<()> {
    set_whole_ban(env, &args.target, false).await
}

async fn set_whole_ban(env: PerformEnv, target: &Selector, enable: bool) -> anyhow::Result<()> {
    let connection = env.require_connection()?;
    connection
        .call(
            "set_group_whole_ban",
            json!({ "group_id": numeric(target, "group")?, "enable": enable }),
        )
        .await?;
    Ok(())
}

async fn leave_group(env: PerformEnv, args: SceneTarget) -> anyhow::Result<()> {
    let connection = env.require_connection()?;
    connection
        .call(
            "set_group_leave",
            json!({ "group_id": numeric(&args.target, "group")? }),
        )
        .await?;
    Ok(())
}

async fn accept_request(env: PerformEnv, args: AcceptRequest) -> anyhow::Result<()> {
    let connection = env.require_connection()?;
    let (flag, kind) = request_parts(&args.target)?;
    if kind == "friend" {
        connection
            .call(
                "set_friend_add_request",
                json!({ "flag": flag, "approve": true }),
            )
            .await?;
    } else {
        connection
            .call(
                "set_group_add_request",
                json!({ "flag": flag, "sub_type": kind, "approve": true }),
            )
            .await?;
    }
    Ok(())
}

async fn reject_request(env: PerformEnv, args: RejectRequest) -> anyhow::Result<()> {
    let connection = env.require_connection()?;
    let (flag, kind) = request_parts(&args.target)?;
    if kind == "friend" {
        connection
            .call(
                "set_friend_add_request",
                json!({ "flag": flag, "approve": false }),
            )
            .await?;
    } else {
        connection
            .call(
                "set_group_add_request",
                json!({
                    "flag": flag,
                    "sub_type": kind,
                    "approve": false,
                    "reason": args.reason.unwrap_or_default(),
                }),
            )
            .await?;
    }
    Ok(())
}

async fn fetch_picture(_env: PerformEnv, args: ResourceArgs) -> anyhow::Result<Vec<u8>> {
    let url = args
        .url
        .as_deref()
        .with_context(|| format!("resource '{}' has no download url", args.resource))?;
    let response = reqwest::get(url).await?.error_for_status()?;
    Ok(response.bytes().await?.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_registers_the_action_surface() {
        let collector = collector().expect("no conflicts");
        assert_eq!(collector.name(), "onebot::action");
        assert_eq!(collector.layer(), Layer::Protocol);
        assert!(collector.template().connection);
        assert_eq!(collector.len(), 15);
    }

    #[test]
    fn numeric_rejects_missing_and_non_numeric_segments() {
        let target = Selector::new().land("qq").group("123");
        assert_eq!(numeric(&target, "group").expect("numeric"), 123);
        assert!(numeric(&target, "member").is_err());
        let bad = Selector::new().land("qq").group("abc");
        assert!(numeric(&bad, "group").is_err());
    }

    #[test]
    fn request_parts_split_flag_and_kind() {
        let target = Selector::new()
            .land("qq")
            .group("9")
            .push("request", "FLAG123@invite");
        let (flag, kind) = request_parts(&target).expect("well-formed");
        assert_eq!(flag, "FLAG123");
        assert_eq!(kind, "invite");

        let bare = Selector::new().land("qq").group("9").push("request", "FLAG123");
        assert!(request_parts(&bare).is_err());
    }
}
