//! Keepalive tracking for one live connection.
//!
//! The monitor owns the idle deadline and at most one outstanding
//! acknowledgment. It performs no recovery on its own: a failed
//! acknowledgment is reported back to the supervisor as
//! [`HeartbeatAction::Reengage`]. An acknowledgment that does not settle
//! within one idle period counts as failed.

use std::sync::Arc;
use std::time::Duration;

use orion_client::{OrionApi, OrionError, Session};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::SessionError;

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(200_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    AwaitingPing,
    Ponging,
}

/// What caused an acknowledgment to be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckTrigger {
    Ping,
    IdleTimeout,
}

#[derive(Debug)]
pub struct AckOutcome {
    pub trigger: AckTrigger,
    pub result: Result<(), OrionError>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum HeartbeatAction {
    None,
    Reengage(SessionError),
}

pub struct HeartbeatMonitor {
    api: Arc<dyn OrionApi>,
    session: Session,
    idle_timeout: Duration,
    deadline: Instant,
    state: HeartbeatState,
    ack: Option<JoinHandle<()>>,
    acks_tx: UnboundedSender<AckOutcome>,
    acks_rx: UnboundedReceiver<AckOutcome>,
}

impl HeartbeatMonitor {
    pub fn new(api: Arc<dyn OrionApi>, session: Session, idle_timeout: Duration) -> Self {
        let (acks_tx, acks_rx) = unbounded_channel();
        Self {
            api,
            session,
            idle_timeout,
            deadline: Instant::now() + idle_timeout,
            state: HeartbeatState::AwaitingPing,
            ack: None,
            acks_tx,
            acks_rx,
        }
    }

    pub fn state(&self) -> HeartbeatState {
        self.state
    }

    /// When the idle timer fires unless traffic arrives first.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Any inbound message re-arms the idle timer.
    pub fn touch(&mut self) {
        self.deadline = Instant::now() + self.idle_timeout;
    }

    /// Platform keepalive received.
    pub fn on_ping(&mut self) {
        self.send_ack(AckTrigger::Ping);
    }

    /// Idle timer fired with no traffic: acknowledge unprompted.
    pub fn on_idle(&mut self) {
        debug!(idle_ms = self.idle_timeout.as_millis() as u64, "no traffic, sending keepalive");
        self.touch();
        self.send_ack(AckTrigger::IdleTimeout);
    }

    /// Wait for the outstanding acknowledgment to settle.
    pub async fn next_ack(&mut self) -> Option<AckOutcome> {
        self.acks_rx.recv().await
    }

    pub fn on_ack(&mut self, outcome: AckOutcome) -> HeartbeatAction {
        self.state = HeartbeatState::AwaitingPing;
        self.ack = None;
        match outcome.result {
            Ok(()) => {
                debug!(trigger = ?outcome.trigger, "heartbeat acknowledged");
                HeartbeatAction::None
            }
            Err(err) => {
                warn!(trigger = ?outcome.trigger, error = %err, "heartbeat acknowledgment failed");
                HeartbeatAction::Reengage(SessionError::HeartbeatLost(err.to_string()))
            }
        }
    }

    fn send_ack(&mut self, trigger: AckTrigger) {
        if self.state == HeartbeatState::Ponging {
            debug!(?trigger, "acknowledgment already outstanding");
            return;
        }
        self.state = HeartbeatState::Ponging;
        let api = Arc::clone(&self.api);
        let session = self.session.clone();
        let tx = self.acks_tx.clone();
        let limit = self.idle_timeout;
        self.ack = Some(tokio::spawn(async move {
            let result = match tokio::time::timeout(limit, api.pong(&session)).await {
                Ok(result) => result,
                Err(_) => Err(OrionError::Network(format!(
                    "no acknowledgment within {}ms",
                    limit.as_millis()
                ))),
            };
            let _ = tx.send(AckOutcome { trigger, result });
        }));
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        if let Some(ack) = self.ack.take() {
            ack.abort();
        }
    }
}
