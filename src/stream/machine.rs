use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::backoff::{Backoff, BackoffPolicy};
use crate::domain::{ConnectionStatus, Reading, StreamSnapshot, StreamUpdate};

/// What the driving task has to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Open a new connection tagged with `epoch`.
    Connect { epoch: u64 },
    /// Connection `epoch` is established; read frames from it.
    Listen { epoch: u64 },
    /// Wait `delay`, then report `on_retry_elapsed`.
    Retry { delay: Duration },
}

/// Result of feeding one event into the machine.
#[derive(Debug, Default, PartialEq)]
pub struct Step {
    /// Emissions, in the order the consumer must observe them.
    pub updates: Vec<StreamUpdate>,
    pub command: Option<Command>,
}

impl Step {
    fn idle() -> Self {
        Self::default()
    }

    fn status(status: ConnectionStatus, command: Command) -> Self {
        Self {
            updates: vec![StreamUpdate::Status(status)],
            command: Some(command),
        }
    }
}

/// Reconnect state machine of the stream client.
///
/// Pure and synchronous: the caller performs the I/O and reports back. Every
/// entry point checks the active flag first, so once `stop` has run nothing
/// produces an update or a command again. Socket events carry the epoch of
/// the connection they belong to and are ignored when it is not current.
#[derive(Debug)]
pub struct StreamMachine {
    active: bool,
    status: ConnectionStatus,
    reading: Arc<Reading>,
    backoff: Backoff,
    epoch: u64,
}

impl StreamMachine {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            active: false,
            status: ConnectionStatus::Disconnected,
            reading: Arc::new(Reading::default()),
            backoff: Backoff::new(policy),
            epoch: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            status: self.status,
            reading: Arc::clone(&self.reading),
        }
    }

    /// Begin connecting. A machine that is already active is left alone.
    pub fn start(&mut self) -> Step {
        if self.active {
            debug!(status = %self.status, "Stream already active, start ignored");
            return Step::idle();
        }
        self.active = true;
        self.backoff.reset();
        self.begin_attempt()
    }

    pub fn on_open(&mut self, epoch: u64) -> Step {
        if !self.is_current(epoch) || self.status != ConnectionStatus::Connecting {
            return Step::idle();
        }
        self.status = ConnectionStatus::Connected;
        self.backoff.reset();
        debug!(epoch, "Stream connected");
        Step::status(ConnectionStatus::Connected, Command::Listen { epoch })
    }

    /// Decode one inbound frame. Malformed frames are logged and dropped
    /// without touching the status or the previous reading.
    pub fn on_frame(&mut self, epoch: u64, text: &str) -> Step {
        if !self.is_current(epoch) || self.status != ConnectionStatus::Connected {
            return Step::idle();
        }
        match Reading::from_frame(text) {
            Ok(reading) => {
                let reading = Arc::new(reading);
                self.reading = Arc::clone(&reading);
                Step {
                    updates: vec![StreamUpdate::Reading(reading)],
                    command: None,
                }
            }
            Err(e) => {
                warn!(epoch, error = %e, "Dropping malformed stream frame");
                Step::idle()
            }
        }
    }

    /// Socket closed, errored, or never opened.
    pub fn on_close(&mut self, epoch: u64) -> Step {
        if !self.is_current(epoch) || self.status == ConnectionStatus::Disconnected {
            return Step::idle();
        }
        self.status = ConnectionStatus::Disconnected;
        let delay = self.backoff.on_loss();
        debug!(epoch, delay_ms = delay.as_millis() as u64, "Stream lost, scheduling reconnect");
        Step::status(ConnectionStatus::Disconnected, Command::Retry { delay })
    }

    pub fn on_retry_elapsed(&mut self) -> Step {
        if !self.active || self.status != ConnectionStatus::Disconnected {
            return Step::idle();
        }
        self.begin_attempt()
    }

    /// Deactivate. Returns whether the machine was active before the call.
    pub fn stop(&mut self) -> bool {
        std::mem::replace(&mut self.active, false)
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.active && epoch == self.epoch
    }

    fn begin_attempt(&mut self) -> Step {
        self.epoch += 1;
        self.status = ConnectionStatus::Connecting;
        Step::status(
            ConnectionStatus::Connecting,
            Command::Connect { epoch: self.epoch },
        )
    }
}

impl Default for StreamMachine {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}
