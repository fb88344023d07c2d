//! Registration-time builders for perform bundles.
//!
//! An adapter module contributes implementations by filling a [`Collector`]:
//! an explicit builder value threaded through every registration call. There
//! is no ambient "currently assembling" state anywhere in the crate, a
//! collector is created, filled with [`Collector::collect`], and attached to
//! an [`crate::artifact::Isolate`] at its declared layer.
//!
//! Each collector carries a [`Template`] enumerating the ambient components
//! its performs may read at call time. Templates extend by union, so a
//! collector built "on top of" another inherits its requirements.

use std::any::TypeId;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::artifact::{ArtifactStore, Layer, PerformEntry, RegistrationConflict};
use crate::capability::Capability;
use crate::resolve::PerformEnv;
use crate::selector::Pattern;

/// Type-erased perform callable: the stored form of every registration.
pub(crate) type BoxPerform<A, O> =
    Arc<dyn Fn(PerformEnv, A) -> BoxFuture<'static, anyhow::Result<O>> + Send + Sync>;

/// The set of ambient components a collector's performs may read.
///
/// The resolver populates a perform's environment with exactly the
/// components its collector's template declares; everything else is absent
/// regardless of what the calling context could offer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Template {
    /// Performs may read the current connection.
    pub connection: bool,
    /// Performs may read the current account.
    pub account: bool,
    /// Performs may read the application (bridge) handle.
    pub application: bool,
}

impl Template {
    /// A template declaring no ambient components.
    pub const fn empty() -> Self {
        Self {
            connection: false,
            account: false,
            application: false,
        }
    }

    /// Declare the current connection.
    pub const fn with_connection(mut self) -> Self {
        self.connection = true;
        self
    }

    /// Declare the current account.
    pub const fn with_account(mut self) -> Self {
        self.account = true;
        self
    }

    /// Declare the application handle.
    pub const fn with_application(mut self) -> Self {
        self.application = true;
        self
    }

    /// Inherit a parent template's declarations on top of this one.
    pub const fn union(self, parent: Self) -> Self {
        Self {
            connection: self.connection || parent.connection,
            account: self.account || parent.account,
            application: self.application || parent.application,
        }
    }
}

/// Identity of a collector, shared by every entry it registered.
#[derive(Debug)]
pub(crate) struct CollectorMeta {
    pub(crate) name: String,
    pub(crate) template: Template,
}

/// A token identifying one registration, returned by [`Collector::collect`].
///
/// Tokens are plain data: use them to assert what got registered in tests,
/// or to detach a registration from an isolate during assembly.
#[derive(Debug, Clone)]
pub struct PerformToken {
    pub(crate) capability_id: TypeId,
    capability: &'static str,
    pattern: Pattern,
    collector: String,
}

impl PerformToken {
    pub(crate) fn from_entry(entry: &PerformEntry) -> Self {
        Self {
            capability_id: entry.capability_id,
            capability: entry.capability,
            pattern: entry.pattern.clone(),
            collector: entry.collector.name.clone(),
        }
    }

    /// Name of the capability this registration implements.
    pub fn capability(&self) -> &'static str {
        self.capability
    }

    /// The registration key.
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// Name of the collector that contributed the registration.
    pub fn collector(&self) -> &str {
        &self.collector
    }
}

impl fmt::Display for PerformToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.capability, self.pattern, self.collector)
    }
}

/// A named, append-only bundle of perform registrations authored as a unit.
pub struct Collector {
    meta: Arc<CollectorMeta>,
    layer: Layer,
    store: ArtifactStore,
}

impl Collector {
    /// Create an empty collector destined for `layer`, whose performs may
    /// read the components declared in `template`.
    pub fn new(name: impl Into<String>, layer: Layer, template: Template) -> Self {
        Self {
            meta: Arc::new(CollectorMeta {
                name: name.into(),
                template,
            }),
            layer,
            store: ArtifactStore::default(),
        }
    }

    /// The collector's name.
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// The isolate layer this collector attaches at.
    pub fn layer(&self) -> Layer {
        self.layer
    }

    /// The collector's component template.
    pub fn template(&self) -> Template {
        self.meta.template
    }

    /// Number of registrations collected so far.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether nothing has been collected yet.
    pub fn is_empty(&self) -> bool {
        self.store.len() == 0
    }

    /// Register `perform` as the implementation of capability `C` for
    /// registration key `pattern` (a dotted segment-name prefix such as
    /// `land.group`; the empty string registers a catch-all).
    ///
    /// Registering the same `(capability, pattern)` twice in one collector
    /// is a [`RegistrationConflict`]: with prefix matching, two keys of
    /// equal specificity that both match a call are necessarily identical,
    /// so the duplicate is rejected at registration time rather than left
    /// to iteration order.
    pub fn collect<C, F, Fut>(
        &mut self,
        pattern: &str,
        perform: F,
    ) -> Result<PerformToken, RegistrationConflict>
    where
        C: Capability,
        F: Fn(PerformEnv, C::Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<C::Output>> + Send + 'static,
    {
        let pattern = Pattern::parse(pattern);
        let handler: BoxPerform<C::Args, C::Output> = Arc::new(move |env, args| {
            let fut: BoxFuture<'static, anyhow::Result<C::Output>> =
                Box::pin(perform(env, args));
            fut
        });
        let entry = PerformEntry {
            capability_id: TypeId::of::<C>(),
            capability: C::NAME,
            pattern: pattern.clone(),
            collector: Arc::clone(&self.meta),
            handler: Arc::new(handler),
        };
        self.store
            .insert(TypeId::of::<C>(), entry, &self.meta.name)?;
        tracing::debug!(
            collector = %self.meta.name,
            capability = C::NAME,
            pattern = %pattern,
            "perform registered"
        );
        Ok(PerformToken {
            capability_id: TypeId::of::<C>(),
            capability: C::NAME,
            pattern,
            collector: self.meta.name.clone(),
        })
    }

    /// Finalize the collector, yielding its artifact store for attachment.
    pub(crate) fn into_store(self) -> ArtifactStore {
        self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standard::{MessageRevoke, MessageTarget};

    #[test]
    fn template_union_inherits_parent() {
        let parent = Template::empty().with_connection();
        let child = Template::empty().with_account().union(parent);
        assert!(child.connection);
        assert!(child.account);
        assert!(!child.application);
    }

    #[test]
    fn collect_returns_introspectable_token() {
        let mut collector =
            Collector::new("test", Layer::Protocol, Template::empty());
        let token = collector
            .collect::<MessageRevoke, _, _>("land.group.message", |_env, _args: MessageTarget| {
                async { Ok(()) }
            })
            .expect("first registration");
        assert_eq!(token.capability(), "message::revoke");
        assert_eq!(token.pattern().to_string(), "land.group.message");
        assert_eq!(token.collector(), "test");
        assert_eq!(collector.len(), 1);
    }

    #[test]
    fn duplicate_key_in_one_collector_is_a_conflict() {
        let mut collector =
            Collector::new("test", Layer::Protocol, Template::empty());
        collector
            .collect::<MessageRevoke, _, _>("land.group", |_env, _args| async { Ok(()) })
            .expect("first registration");
        let err = collector
            .collect::<MessageRevoke, _, _>("land.group", |_env, _args| async { Ok(()) })
            .expect_err("duplicate must conflict");
        assert_eq!(err.capability, "message::revoke");
        assert_eq!(err.pattern.to_string(), "land.group");
    }
}
