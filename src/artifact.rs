//! Artifact stores and layered isolates.
//!
//! Every collector finalizes into an [`ArtifactStore`]: a mapping from
//! `(capability, pattern)` to a perform. An [`Isolate`] composes stores in a
//! fixed layer order, [`Layer::Protocol`], then [`Layer::Connection`],
//! then [`Layer::Application`], later layers shadowing earlier ones, and
//! answers the layered longest-prefix lookup the resolver runs on every
//! call.
//!
//! Assembly (attach/detach) needs `&mut Isolate` and happens before any
//! resolution traffic; steady-state lookup is read-only and is shared
//! behind an `Arc`.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::collector::{Collector, CollectorMeta, PerformToken};
use crate::selector::Pattern;

/// Override precedence of an attached collector. Later variants shadow
/// earlier ones for an identical `(capability, key)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Layer {
    /// Protocol-wide registrations, assembled first.
    Protocol,
    /// Per-connection / per-account registrations, layered on top.
    Connection,
    /// Application-wide registrations, layered last (highest precedence).
    Application,
}

impl Layer {
    const ALL: [Layer; 3] = [Layer::Protocol, Layer::Connection, Layer::Application];

    fn index(self) -> usize {
        match self {
            Layer::Protocol => 0,
            Layer::Connection => 1,
            Layer::Application => 2,
        }
    }
}

/// Two registrations at the same layer would both match the same reachable
/// key. Detected at registration/assembly time; a configuration carrying
/// one of these must not start.
#[derive(Debug, Error)]
#[error(
    "duplicate perform for {capability} at key '{pattern}' \
     (already registered by collector '{existing}', rejected from '{incoming}')"
)]
pub struct RegistrationConflict {
    /// Capability both registrations implement.
    pub capability: &'static str,
    /// The contested registration key.
    pub pattern: Pattern,
    /// Collector that registered the key first.
    pub existing: String,
    /// Collector whose registration was rejected.
    pub incoming: String,
}

/// One stored registration.
pub(crate) struct PerformEntry {
    pub(crate) capability_id: TypeId,
    pub(crate) capability: &'static str,
    pub(crate) pattern: Pattern,
    pub(crate) collector: Arc<CollectorMeta>,
    /// Type-erased [`crate::collector::BoxPerform`], downcast by the
    /// resolver using the capability's `TypeId`.
    pub(crate) handler: Arc<dyn std::any::Any + Send + Sync>,
}

/// Mapping from `(capability, pattern)` to perform, owned by one collector.
#[derive(Default)]
pub struct ArtifactStore {
    entries: HashMap<TypeId, HashMap<Pattern, PerformEntry>>,
}

impl ArtifactStore {
    pub(crate) fn insert(
        &mut self,
        capability: TypeId,
        entry: PerformEntry,
        incoming: &str,
    ) -> Result<(), RegistrationConflict> {
        let by_pattern = self.entries.entry(capability).or_default();
        if let Some(existing) = by_pattern.get(&entry.pattern) {
            return Err(RegistrationConflict {
                capability: entry.capability,
                pattern: entry.pattern.clone(),
                existing: existing.collector.name.clone(),
                incoming: incoming.to_owned(),
            });
        }
        by_pattern.insert(entry.pattern.clone(), entry);
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }

    fn merge_from(&mut self, other: ArtifactStore) -> Result<(), RegistrationConflict> {
        for (capability, by_pattern) in other.entries {
            for (_, entry) in by_pattern {
                let incoming = entry.collector.name.clone();
                self.insert(capability, entry, &incoming)?;
            }
        }
        Ok(())
    }
}

/// A layered composition of artifact stores.
///
/// Lookup scans layers from highest precedence to lowest. Within a layer
/// the registered key with the longest matching prefix wins; a hit in a
/// higher layer always wins over a lower layer, even when the lower layer
/// holds a more specific key. The result is deterministic regardless of
/// the order collectors were built or attached.
#[derive(Default)]
pub struct Isolate {
    layers: [ArtifactStore; 3],
}

impl Isolate {
    /// An isolate with no registrations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a finalized collector's store into the layer the collector
    /// declared.
    ///
    /// A duplicate `(capability, pattern)` within that layer is a
    /// [`RegistrationConflict`]; the isolate must be considered poisoned
    /// and discarded when attachment fails.
    pub fn attach(&mut self, collector: Collector) -> Result<(), RegistrationConflict> {
        let layer = collector.layer();
        tracing::debug!(
            collector = collector.name(),
            ?layer,
            performs = collector.len(),
            "attaching collector"
        );
        self.layers[layer.index()].merge_from(collector.into_store())
    }

    /// Remove one registration from a layer. Returns whether anything was
    /// removed. Assembly-phase only, like [`Isolate::attach`].
    pub fn detach(&mut self, layer: Layer, token: &PerformToken) -> bool {
        self.layers[layer.index()]
            .entries
            .get_mut(&token.capability_id)
            .and_then(|by_pattern| by_pattern.remove(token.pattern()))
            .is_some()
    }

    /// Total number of registrations across all layers.
    pub fn len(&self) -> usize {
        self.layers.iter().map(ArtifactStore::len).sum()
    }

    /// Whether the isolate holds no registrations.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Layered longest-prefix lookup for `key` under `capability`.
    pub(crate) fn lookup(&self, capability: TypeId, key: &Pattern) -> Option<&PerformEntry> {
        for layer in Layer::ALL.iter().rev() {
            let Some(by_pattern) = self.layers[layer.index()].entries.get(&capability) else {
                continue;
            };
            for len in (0..=key.segments().len()).rev() {
                if let Some(entry) = by_pattern.get(&key.segments()[..len]) {
                    return Some(entry);
                }
            }
        }
        None
    }
}
