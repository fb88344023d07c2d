//! Abstract operations and their dispatch-key derivation.
//!
//! A [`Capability`] names one abstract operation (send a message, mute a
//! member, fetch a resource) with a fixed argument and output type. Many
//! independently authored performs implement the same capability for
//! different address shapes; the engine picks exactly one at call time.
//!
//! The *overload strategy* of a capability is its [`Capability::dispatch_key`]
//! implementation: a pure function from call arguments to the dispatch key
//! the layered lookup runs on. Two strategies cover everything this crate
//! ships:
//!
//! - **target overload**, the key is the segment-name path of the
//!   `target` [`Selector`] argument ([`target_overload`]);
//! - **discriminator overload**, the key is a single segment taken from a
//!   tag field of the raw payload ([`discriminator_overload`]).
//!
//! Ranking among registered keys is prefix specificity, longest first; see
//! [`Pattern`].

use crate::selector::{Pattern, Selector};

/// A named abstract operation with typed arguments, a typed output, and an
/// overload strategy.
///
/// Capabilities are zero-sized marker types; the declaration is immutable
/// and the `TypeId` of the marker keys every artifact store. Implementors
/// live in [`crate::standard`].
pub trait Capability: Send + Sync + 'static {
    /// Call arguments. One or more fields are dispatch carriers read by
    /// [`Capability::dispatch_key`].
    type Args: Send + 'static;

    /// Successful output of the operation.
    type Output: Send + 'static;

    /// Stable operation name used in logs and errors, e.g. `message::send`.
    const NAME: &'static str;

    /// Derive the dispatch key for a concrete call. Pure; must not inspect
    /// anything but the arguments.
    fn dispatch_key(args: &Self::Args) -> Pattern;
}

/// The built-in target overload strategy: the key is the segment-name path
/// of the target selector.
pub fn target_overload(target: &Selector) -> Pattern {
    target.path()
}

/// The built-in discriminator overload strategy: the key is one segment
/// holding a payload tag. A missing tag yields the empty key, which only a
/// catch-all registration can match.
pub fn discriminator_overload(tag: Option<&str>) -> Pattern {
    match tag {
        Some(tag) => Pattern::single(tag),
        None => Pattern::default(),
    }
}
