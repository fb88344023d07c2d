//! The global account registry.
//!
//! Accounts announce themselves over a live connection (platform lifecycle
//! frames) and are routed through it until it drops. The registry is the
//! single source of truth for "which route is currently served by which
//! connection"; connection tasks add and remove entries concurrently while
//! other tasks read.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::connection::{Connection, TransportError};
use crate::selector::Selector;

/// A live account bound to a connection.
#[derive(Clone)]
pub struct Account {
    route: Selector,
    connection: Connection,
}

impl Account {
    /// Bind `route` to `connection`.
    pub fn new(route: Selector, connection: Connection) -> Self {
        Self { route, connection }
    }

    /// The account's route selector (e.g. `land(qq).account(123)`).
    pub fn route(&self) -> &Selector {
        &self.route
    }

    /// The connection currently serving this account.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Whether the serving connection is currently live.
    pub fn available(&self) -> bool {
        self.connection.alive()
    }

    /// A resolver over the serving connection's isolate with the
    /// connection, account, and application components bound.
    pub fn resolver(&self) -> crate::resolve::Resolver {
        self.connection.resolver().with_account(self.clone())
    }

    /// Issue a wire call through the serving connection.
    pub async fn call(
        &self,
        action: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, TransportError> {
        self.connection.call(action, params).await
    }
}

/// Concurrent mapping from account route to [`Account`].
#[derive(Default)]
pub struct AccountRegistry {
    inner: RwLock<HashMap<Selector, Account>>,
}

impl AccountRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for the account's route. Returns the
    /// replaced account, if any.
    pub fn register(&self, account: Account) -> Option<Account> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(account.route.clone(), account)
    }

    /// Remove the entry for `route`, returning it if present.
    pub fn remove(&self, route: &Selector) -> Option<Account> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(route)
    }

    /// The account bound to `route`, if any.
    pub fn get(&self, route: &Selector) -> Option<Account> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(route)
            .cloned()
    }

    /// Whether `route` is currently registered.
    pub fn contains(&self, route: &Selector) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(route)
    }

    /// All currently registered routes.
    pub fn routes(&self) -> Vec<Selector> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Number of registered accounts.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no account is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
