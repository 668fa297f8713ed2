use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backoff::BackoffPolicy;
use super::machine::{Command, Step, StreamMachine};
use super::transport::{Connector, FrameSource, WsConnector};
use super::Endpoint;
use crate::domain::{StreamSnapshot, StreamUpdate};
use crate::error::StreamError;

const UPDATE_BUFFER: usize = 64;

/// Live stream client.
///
/// `start` spawns one background task that connects, reads frames and
/// reconnects with backoff until `stop`. Consumers either follow every
/// update in order through [`subscribe`](Self::subscribe) or read the latest
/// state through [`snapshot`](Self::snapshot) / [`watch`](Self::watch).
///
/// Once `stop` returns, no further update is emitted: the active flag lives in
/// the state machine and updates are published while its lock is held.
pub struct StreamClient {
    connector: Arc<dyn Connector>,
    policy: BackoffPolicy,
    outputs: Outputs,
    session: Option<Session>,
}

#[derive(Clone)]
struct Outputs {
    updates: broadcast::Sender<StreamUpdate>,
    snapshot: Arc<watch::Sender<StreamSnapshot>>,
}

/// One start..stop lifetime. A restart gets a fresh machine so a task that is
/// still winding down can never touch the new session.
struct Session {
    machine: Arc<Mutex<StreamMachine>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl StreamClient {
    /// Client over real websockets.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self::with_connector(WsConnector, policy)
    }

    pub fn with_connector(connector: impl Connector, policy: BackoffPolicy) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_BUFFER);
        let (snapshot, _) = watch::channel(StreamSnapshot::default());
        Self {
            connector: Arc::new(connector),
            policy,
            outputs: Outputs {
                updates,
                snapshot: Arc::new(snapshot),
            },
            session: None,
        }
    }

    /// Begin connecting to `endpoint`.
    ///
    /// Fails only on caller misuse (bad endpoint, no tokio runtime). Calling
    /// it on an active client does nothing.
    pub fn start(&mut self, endpoint: &str) -> Result<(), StreamError> {
        let endpoint: Endpoint = endpoint.parse()?;
        if self.session.is_some() {
            debug!(url = %endpoint, "Stream client already active");
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| StreamError::NoRuntime)?;

        let machine = Arc::new(Mutex::new(StreamMachine::new(self.policy)));
        let cancel = CancellationToken::new();
        let driver = Driver {
            machine: Arc::clone(&machine),
            outputs: self.outputs.clone(),
            connector: Arc::clone(&self.connector),
            endpoint,
            cancel: cancel.clone(),
        };

        // emitted before start returns so subscribers always see Connecting first
        let first = driver.apply(StreamMachine::start);
        info!(url = %driver.endpoint, "Stream client started");
        let task = runtime.spawn(driver.run(first));

        self.session = Some(Session {
            machine,
            cancel,
            task,
        });
        Ok(())
    }

    /// Stop the client: no emission after this returns, the socket is closed
    /// and any pending reconnect is dropped. Safe to call repeatedly.
    pub fn stop(&mut self) {
        let _ = self.halt();
    }

    /// Stop and wait for the background task to release the socket.
    pub async fn shutdown(&mut self) {
        if let Some(task) = self.halt() {
            if let Err(e) = task.await {
                warn!(error = %e, "Stream task ended abnormally");
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Ordered stream of every status change and reading.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamUpdate> {
        self.outputs.updates.subscribe()
    }

    /// Receiver that always holds the latest snapshot.
    pub fn watch(&self) -> watch::Receiver<StreamSnapshot> {
        self.outputs.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        self.outputs.snapshot.borrow().clone()
    }

    fn halt(&mut self) -> Option<JoinHandle<()>> {
        let session = self.session.take()?;
        if lock(&session.machine).stop() {
            info!("Stream client stopped");
        }
        session.cancel.cancel();
        Some(session.task)
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock(machine: &Mutex<StreamMachine>) -> MutexGuard<'_, StreamMachine> {
    machine.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State owned by the background task.
struct Driver {
    machine: Arc<Mutex<StreamMachine>>,
    outputs: Outputs,
    connector: Arc<dyn Connector>,
    endpoint: Endpoint,
    cancel: CancellationToken,
}

impl Driver {
    /// Feed one event into the machine and publish the resulting updates
    /// before releasing the lock.
    fn apply(&self, event: impl FnOnce(&mut StreamMachine) -> Step) -> Option<Command> {
        let mut machine = lock(&self.machine);
        let step = event(&mut machine);
        if !step.updates.is_empty() {
            for update in step.updates {
                // no subscribers is fine, the snapshot still carries the state
                let _ = self.outputs.updates.send(update);
            }
            self.outputs.snapshot.send_replace(machine.snapshot());
        }
        step.command
    }

    async fn run(self, first: Option<Command>) {
        let mut next = first;
        let mut socket: Option<Box<dyn FrameSource>> = None;

        while let Some(command) = next.take() {
            next = match command {
                Command::Connect { epoch } => {
                    let attempt = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        attempt = self.connector.connect(&self.endpoint) => attempt,
                    };
                    match attempt {
                        Ok(opened) => {
                            socket = Some(opened);
                            self.apply(|m| m.on_open(epoch))
                        }
                        Err(e) => {
                            debug!(epoch, error = %e, "Stream connect failed");
                            self.apply(|m| m.on_close(epoch))
                        }
                    }
                }
                Command::Listen { epoch } => match socket.as_mut() {
                    Some(conn) => self.listen(epoch, conn.as_mut()).await,
                    None => None,
                },
                Command::Retry { delay } => {
                    socket = None;
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    self.apply(StreamMachine::on_retry_elapsed)
                }
            };
        }

        if let Some(mut conn) = socket.take() {
            conn.close().await;
        }
        debug!(url = %self.endpoint, "Stream task finished");
    }

    /// Read frames until the connection ends or the client is stopped.
    async fn listen(&self, epoch: u64, conn: &mut dyn FrameSource) -> Option<Command> {
        loop {
            let frame = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                frame = conn.next_frame() => frame,
            };
            match frame {
                Ok(Some(text)) => {
                    self.apply(|m| m.on_frame(epoch, &text));
                }
                Ok(None) => {
                    debug!(epoch, "Stream closed");
                    // flushes the queued close reply to the peer
                    conn.close().await;
                    return self.apply(|m| m.on_close(epoch));
                }
                Err(e) => {
                    warn!(epoch, error = %e, "Stream transport error");
                    conn.close().await;
                    return self.apply(|m| m.on_close(epoch));
                }
            }
        }
    }
}
