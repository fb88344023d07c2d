//! The resolution context: from a capability call to exactly one perform.
//!
//! A [`Resolver`] owns a read-only view of an assembled
//! [`crate::artifact::Isolate`] plus the ambient components of the calling
//! context (connection, account, application). [`Resolver::call`] derives
//! the dispatch key with the capability's overload strategy, walks the
//! isolate's layers, builds a transient [`PerformEnv`] holding only the
//! components the chosen perform's template declares, and invokes.
//!
//! Framework failures ([`ResolutionError`]) surface immediately and are
//! never retried. Errors raised by the perform itself are domain errors:
//! they pass through unmodified as [`DispatchError::Perform`].

use std::any::TypeId;
use std::sync::Arc;

use thiserror::Error;

use crate::artifact::Isolate;
use crate::bridge::Bridge;
use crate::capability::Capability;
use crate::collector::{BoxPerform, PerformToken, Template};
use crate::connection::Connection;
use crate::registry::Account;
use crate::selector::Pattern;

/// No perform could be chosen for a call.
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// No layer holds a registration matching the derived key.
    #[error("no perform registered for {capability} matching key '{key}'")]
    NoPerform {
        /// The capability being called.
        capability: &'static str,
        /// The dispatch key derived from the call arguments.
        key: Pattern,
    },
    /// A registration was found but its stored signature does not belong to
    /// the capability. Unreachable through [`crate::collector::Collector`];
    /// kept as an error rather than a panic.
    #[error("registered perform for {capability} has a mismatched signature")]
    SignatureMismatch {
        /// The capability being called.
        capability: &'static str,
    },
}

/// Failure of a dispatched call.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The framework could not choose a perform.
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    /// The perform ran and failed; the error is opaque to this layer and
    /// carried through unmodified.
    #[error(transparent)]
    Perform(anyhow::Error),
}

/// A perform declared a component its call context does not carry.
#[derive(Debug, Error)]
#[error("perform requires ambient component '{0}' but none is bound to this call")]
pub struct MissingComponent(pub &'static str);

/// The transient environment a perform receives.
///
/// Every field is optional: it is populated only when the calling context
/// carries the component **and** the perform's collector template declares
/// it. Performs check explicitly via the `require_*` accessors.
#[derive(Clone, Default)]
pub struct PerformEnv {
    /// The connection the call should ride on, if any.
    pub connection: Option<Connection>,
    /// The account the call acts as, if any.
    pub account: Option<Account>,
    /// The application (bridge) handle, if any.
    pub application: Option<Bridge>,
}

impl PerformEnv {
    /// The current connection, or [`MissingComponent`].
    pub fn require_connection(&self) -> Result<Connection, MissingComponent> {
        self.connection.clone().ok_or(MissingComponent("connection"))
    }

    /// The current account, or [`MissingComponent`].
    pub fn require_account(&self) -> Result<Account, MissingComponent> {
        self.account.clone().ok_or(MissingComponent("account"))
    }

    /// The application handle, or [`MissingComponent`].
    pub fn require_application(&self) -> Result<Bridge, MissingComponent> {
        self.application.clone().ok_or(MissingComponent("application"))
    }

    /// Restrict to the components `template` declares.
    fn scoped_to(&self, template: Template) -> PerformEnv {
        PerformEnv {
            connection: if template.connection {
                self.connection.clone()
            } else {
                None
            },
            account: if template.account {
                self.account.clone()
            } else {
                None
            },
            application: if template.application {
                self.application.clone()
            } else {
                None
            },
        }
    }
}

/// A resolved perform for one concrete call, ready to invoke.
pub struct Resolved<C: Capability> {
    handler: BoxPerform<C::Args, C::Output>,
    template: Template,
    token: PerformToken,
}

impl<C: Capability> Resolved<C> {
    /// Identity of the chosen registration.
    pub fn token(&self) -> &PerformToken {
        &self.token
    }

    /// Component template of the collector that contributed the perform.
    pub fn template(&self) -> Template {
        self.template
    }

    /// Invoke with an explicit environment. Prefer [`Resolver::call`],
    /// which scopes the environment to the perform's template first.
    pub async fn invoke(&self, env: PerformEnv, args: C::Args) -> anyhow::Result<C::Output> {
        (self.handler)(env, args).await
    }
}

/// The runtime call resolver and invoker.
///
/// Cheap to construct per call path; lookups are read-only and safe for
/// unbounded concurrent callers.
#[derive(Clone)]
pub struct Resolver {
    isolate: Arc<Isolate>,
    env: PerformEnv,
}

impl Resolver {
    /// A resolver over `isolate` with an empty ambient set.
    pub fn new(isolate: Arc<Isolate>) -> Self {
        Self {
            isolate,
            env: PerformEnv::default(),
        }
    }

    /// Bind the current connection.
    pub fn with_connection(mut self, connection: Connection) -> Self {
        self.env.connection = Some(connection);
        self
    }

    /// Bind the current account.
    pub fn with_account(mut self, account: Account) -> Self {
        self.env.account = Some(account);
        self
    }

    /// Bind the application handle.
    pub fn with_application(mut self, application: Bridge) -> Self {
        self.env.application = Some(application);
        self
    }

    /// Resolve capability `C` for `args` without invoking.
    pub fn resolve<C: Capability>(&self, args: &C::Args) -> Result<Resolved<C>, ResolutionError> {
        let key = C::dispatch_key(args);
        let entry = self
            .isolate
            .lookup(TypeId::of::<C>(), &key)
            .ok_or_else(|| ResolutionError::NoPerform {
                capability: C::NAME,
                key: key.clone(),
            })?;
        let handler = entry
            .handler
            .downcast_ref::<BoxPerform<C::Args, C::Output>>()
            .ok_or(ResolutionError::SignatureMismatch { capability: C::NAME })?;
        Ok(Resolved {
            handler: Arc::clone(handler),
            template: entry.collector.template,
            token: PerformToken::from_entry(entry),
        })
    }

    /// Resolve and invoke capability `C`, scoping the environment to the
    /// chosen perform's template. Synchronous from the caller's point of
    /// view: the future completes when the perform does.
    pub async fn call<C: Capability>(&self, args: C::Args) -> Result<C::Output, DispatchError> {
        let resolved = self.resolve::<C>(&args)?;
        tracing::trace!(
            capability = C::NAME,
            perform = %resolved.token(),
            "dispatching call"
        );
        let env = self.env.scoped_to(resolved.template);
        resolved
            .invoke(env, args)
            .await
            .map_err(DispatchError::Perform)
    }
}
