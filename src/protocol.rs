//! The seam a protocol adapter implements.
//!
//! A protocol contributes three things: a [`Platform`] descriptor, the
//! collectors that fill its isolate, and the event pipeline that turns its
//! inbound frames into domain events. The bridge assembles all of it
//! before any traffic starts ([`crate::bridge::Bridge::start_protocol`]).

use std::fmt;

use crate::artifact::{Isolate, RegistrationConflict};
use crate::event::EventPipeline;

/// Identity of the platform a protocol speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    /// Platform name, e.g. `OneBot`.
    pub name: &'static str,
    /// Name of this implementation.
    pub implementation: &'static str,
    /// Protocol generation/version.
    pub generation: &'static str,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({})", self.name, self.generation, self.implementation)
    }
}

/// A protocol adapter.
pub trait Protocol: Send + Sync {
    /// The platform this protocol speaks for.
    fn platform(&self) -> Platform;

    /// Attach the protocol's collectors to `isolate`. Called once per
    /// protocol instance during assembly; a conflict is fatal.
    fn register(&self, isolate: &mut Isolate) -> Result<(), RegistrationConflict>;

    /// Build the protocol's frame-ingestion pipeline.
    fn pipeline(&self) -> EventPipeline;
}
