//! The standard capability catalog.
//!
//! These are the abstract operations adapters implement. Declaring one here
//! promises nothing about any given protocol: a call resolves only if some
//! collector registered a perform for the derived key, otherwise the caller
//! gets a [`crate::resolve::ResolutionError`].

use std::time::Duration;

use serde_json::Value;

use crate::capability::{target_overload, Capability};
use crate::elements::{Element, MessageChain};
use crate::selector::{Pattern, Selector};

// ---------------------------------------------------------------------------
// Messaging
// ---------------------------------------------------------------------------

/// Arguments for [`MessageSend`].
#[derive(Debug, Clone)]
pub struct SendMessage {
    /// Scene to deliver into (group, user, channel, ...).
    pub target: Selector,
    /// Content to send.
    pub message: MessageChain,
    /// Message being replied to, if any.
    pub reply: Option<Selector>,
}

/// Send a message to a scene; resolves to the selector of the sent message.
pub enum MessageSend {}

impl Capability for MessageSend {
    type Args = SendMessage;
    type Output = Selector;
    const NAME: &'static str = "message::send";

    fn dispatch_key(args: &Self::Args) -> Pattern {
        target_overload(&args.target)
    }
}

/// Arguments for [`MessageRevoke`] and [`MessageEdit`].
#[derive(Debug, Clone)]
pub struct MessageTarget {
    /// The message being operated on.
    pub target: Selector,
}

/// Revoke (recall) a previously sent message.
pub enum MessageRevoke {}

impl Capability for MessageRevoke {
    type Args = MessageTarget;
    type Output = ();
    const NAME: &'static str = "message::revoke";

    fn dispatch_key(args: &Self::Args) -> Pattern {
        target_overload(&args.target)
    }
}

/// Arguments for [`MessageEdit`].
#[derive(Debug, Clone)]
pub struct EditMessage {
    /// The message being edited.
    pub target: Selector,
    /// Replacement content.
    pub content: MessageChain,
}

/// Edit a previously sent message in place.
pub enum MessageEdit {}

impl Capability for MessageEdit {
    type Args = EditMessage;
    type Output = ();
    const NAME: &'static str = "message::edit";

    fn dispatch_key(args: &Self::Args) -> Pattern {
        target_overload(&args.target)
    }
}

// ---------------------------------------------------------------------------
// Requests (friend/join applications)
// ---------------------------------------------------------------------------

/// Arguments for [`RequestAccept`].
#[derive(Debug, Clone)]
pub struct AcceptRequest {
    /// The pending request.
    pub target: Selector,
}

/// Accept a pending friend/join request.
pub enum RequestAccept {}

impl Capability for RequestAccept {
    type Args = AcceptRequest;
    type Output = ();
    const NAME: &'static str = "request::accept";

    fn dispatch_key(args: &Self::Args) -> Pattern {
        target_overload(&args.target)
    }
}

/// Arguments for [`RequestReject`].
#[derive(Debug, Clone)]
pub struct RejectRequest {
    /// The pending request.
    pub target: Selector,
    /// Optional reason shown to the requester.
    pub reason: Option<String>,
    /// Whether further requests from the same sender should be blocked.
    pub forever: bool,
}

/// Reject a pending friend/join request.
pub enum RequestReject {}

impl Capability for RequestReject {
    type Args = RejectRequest;
    type Output = ();
    const NAME: &'static str = "request::reject";

    fn dispatch_key(args: &Self::Args) -> Pattern {
        target_overload(&args.target)
    }
}

// ---------------------------------------------------------------------------
// Scene membership and privileges
// ---------------------------------------------------------------------------

/// Arguments for [`RemoveMember`].
#[derive(Debug, Clone)]
pub struct RemoveMemberArgs {
    /// The member to remove.
    pub target: Selector,
    /// Optional reason.
    pub reason: Option<String>,
    /// Whether the member should be barred from rejoining.
    pub permanent: bool,
}

/// Remove (kick) a member from a scene.
pub enum RemoveMember {}

impl Capability for RemoveMember {
    type Args = RemoveMemberArgs;
    type Output = ();
    const NAME: &'static str = "scene::remove_member";

    fn dispatch_key(args: &Self::Args) -> Pattern {
        target_overload(&args.target)
    }
}

/// Arguments for [`MuteMember`].
#[derive(Debug, Clone)]
pub struct MuteMemberArgs {
    /// The member to mute.
    pub target: Selector,
    /// How long the mute lasts.
    pub duration: Duration,
}

/// Mute a member of a scene.
pub enum MuteMember {}

impl Capability for MuteMember {
    type Args = MuteMemberArgs;
    type Output = ();
    const NAME: &'static str = "privilege::mute";

    fn dispatch_key(args: &Self::Args) -> Pattern {
        target_overload(&args.target)
    }
}

/// Arguments for capabilities addressed at a bare scene or member with no
/// extras.
#[derive(Debug, Clone)]
pub struct SceneTarget {
    /// The addressed scene or member.
    pub target: Selector,
}

/// Lift a member mute.
pub enum UnmuteMember {}

impl Capability for UnmuteMember {
    type Args = SceneTarget;
    type Output = ();
    const NAME: &'static str = "privilege::unmute";

    fn dispatch_key(args: &Self::Args) -> Pattern {
        target_overload(&args.target)
    }
}

/// Mute an entire scene.
pub enum MuteAll {}

impl Capability for MuteAll {
    type Args = SceneTarget;
    type Output = ();
    const NAME: &'static str = "privilege::mute_all";

    fn dispatch_key(args: &Self::Args) -> Pattern {
        target_overload(&args.target)
    }
}

/// Lift a scene-wide mute.
pub enum UnmuteAll {}

impl Capability for UnmuteAll {
    type Args = SceneTarget;
    type Output = ();
    const NAME: &'static str = "privilege::unmute_all";

    fn dispatch_key(args: &Self::Args) -> Pattern {
        target_overload(&args.target)
    }
}

/// Leave a scene the bound account is part of.
pub enum LeaveScene {}

impl Capability for LeaveScene {
    type Args = SceneTarget;
    type Output = ();
    const NAME: &'static str = "scene::leave";

    fn dispatch_key(args: &Self::Args) -> Pattern {
        target_overload(&args.target)
    }
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// Arguments for [`FetchResource`].
#[derive(Debug, Clone)]
pub struct ResourceArgs {
    /// Resource address (e.g. `land.picture`).
    pub resource: Selector,
    /// Out-of-band download URL, when the platform provides one.
    pub url: Option<String>,
}

/// Fetch the bytes of a platform resource (image, file, ...).
pub enum FetchResource {}

impl Capability for FetchResource {
    type Args = ResourceArgs;
    type Output = Vec<u8>;
    const NAME: &'static str = "resource::fetch";

    fn dispatch_key(args: &Self::Args) -> Pattern {
        target_overload(&args.resource)
    }
}

// ---------------------------------------------------------------------------
// Wire decoding
// ---------------------------------------------------------------------------

/// Arguments for [`DeserializeElement`]: one raw wire element plus the
/// discriminator tag the adapter extracted from it.
#[derive(Debug, Clone)]
pub struct RawElement {
    /// The element discriminator, e.g. `text`, `at`, `image`.
    pub kind: String,
    /// The raw wire payload of the element.
    pub value: Value,
}

/// Decode one raw wire element into an [`Element`]. Dispatched by the
/// discriminator overload: the key is the single `kind` segment.
pub enum DeserializeElement {}

impl Capability for DeserializeElement {
    type Args = RawElement;
    type Output = Element;
    const NAME: &'static str = "message::deserialize_element";

    fn dispatch_key(args: &Self::Args) -> Pattern {
        Pattern::single(args.kind.as_str())
    }
}
