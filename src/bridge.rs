//! The application object tying the pieces together.
//!
//! A [`Bridge`] owns the global [`AccountRegistry`] and the event bus every
//! connection reports into, and spawns connection tasks. It is the
//! "application" ambient component a perform can declare. Cheap to clone;
//! clones share the same state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::artifact::{Isolate, RegistrationConflict};
use crate::connection::{Connection, ConnectionConfig};
use crate::event::{Event, EventPipeline};
use crate::protocol::Protocol;
use crate::registry::AccountRegistry;

/// How long [`ConnectionHandle::stop`] waits for a graceful exit before
/// aborting the task.
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct BridgeInner {
    accounts: AccountRegistry,
    events: mpsc::Sender<Event>,
    shutdowns: Mutex<Vec<watch::Sender<bool>>>,
}

/// Shared application state: account registry, event bus, and the shutdown
/// fan-out to every connection task.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl Bridge {
    /// Create a bridge and the receiving end of its event bus. The caller
    /// drains the receiver; events are dropped (with a warning) once it is
    /// closed.
    pub fn new(event_buffer: usize) -> (Self, mpsc::Receiver<Event>) {
        let (events, rx) = mpsc::channel(event_buffer);
        (
            Self {
                inner: Arc::new(BridgeInner {
                    accounts: AccountRegistry::new(),
                    events,
                    shutdowns: Mutex::new(Vec::new()),
                }),
            },
            rx,
        )
    }

    /// The global account registry.
    pub fn accounts(&self) -> &AccountRegistry {
        &self.inner.accounts
    }

    /// Deliver an event to the bus, preserving per-connection order.
    pub(crate) async fn emit(&self, event: Event) {
        if self.inner.events.send(event).await.is_err() {
            warn!("event bus closed, dropping event");
        }
    }

    /// Spawn a connection task over an already assembled isolate.
    ///
    /// Assembly must be complete: the isolate is frozen behind an `Arc`
    /// from here on. The pipeline inherits the config's strict-frame flag.
    pub fn start_connection(
        &self,
        config: ConnectionConfig,
        isolate: Arc<Isolate>,
        mut pipeline: EventPipeline,
    ) -> ConnectionHandle {
        pipeline.set_strict(config.strict_frames);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        lock(&self.inner.shutdowns).push(shutdown_tx.clone());

        let connection = Connection::new(config, isolate, self.clone());
        let task = tokio::spawn(connection.clone().run(Arc::new(pipeline), shutdown_rx));
        ConnectionHandle {
            connection,
            shutdown: shutdown_tx,
            task,
        }
    }

    /// Assemble a protocol's isolate and pipeline, then spawn a connection
    /// for it.
    pub fn start_protocol(
        &self,
        protocol: &dyn Protocol,
        config: ConnectionConfig,
    ) -> Result<ConnectionHandle, RegistrationConflict> {
        let platform = protocol.platform();
        let mut isolate = Isolate::new();
        protocol.register(&mut isolate)?;
        info!(%platform, performs = isolate.len(), "protocol assembled");
        Ok(self.start_connection(config, Arc::new(isolate), protocol.pipeline()))
    }

    /// Signal every connection task to shut down. Cooperative: tasks
    /// finish in-flight work and exit at their next suspension point.
    pub fn shutdown(&self) {
        info!("bridge shutdown requested");
        for tx in lock(&self.inner.shutdowns).iter() {
            let _ = tx.send(true);
        }
    }
}

/// Owner's handle to a spawned connection task.
pub struct ConnectionHandle {
    connection: Connection,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ConnectionHandle {
    /// The connection this handle controls.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Whether the connection task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop this connection: signal shutdown, wait for a graceful exit,
    /// abort if it takes longer than the stop timeout.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let mut task = self.task;
        if tokio::time::timeout(STOP_TIMEOUT, &mut task).await.is_err() {
            warn!("connection task did not stop in time, aborting");
            task.abort();
        }
    }
}
