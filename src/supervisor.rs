//! Reconnect supervisor: owns the lifecycle of one RX node.
//!
//! ```text
//! Idle -> Authenticating -> Resolving -> Engaging -> Connected -> Closing -> Idle
//!               \______________\____________\___________\
//!                                                        ErrorBackoff -> Authenticating
//! ```
//!
//! A single task drives the state machine, so at most one connection
//! attempt is ever in flight. Each attempt gets a new epoch; results of
//! background work (re-engagement) carry the epoch they were started in and
//! are discarded once the supervisor has moved past it. While connected, one
//! `select!` loop arbitrates between the transport, the heartbeat and
//! re-engagement; a transport close or error always wins.

use std::sync::Arc;
use std::time::Duration;

use orion_client::transport::ABNORMAL_CLOSE_CODE;
use orion_client::{Connection, Credentials, DELIBERATE_CLOSE_CODE, InboundEvent, OrionApi, Session, Transport, TransportEvent};
use strum_macros::{AsRefStr, Display};
use tokio::sync::mpsc::unbounded_channel;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::OrionConfig;
use crate::dispatch::{Decryptor, Dispatched, EventDispatcher};
use crate::engagement::{EngagementController, EngagementState};
use crate::error::{Recovery, SessionError};
use crate::groups::resolve;
use crate::heartbeat::{HeartbeatAction, HeartbeatMonitor};
use crate::logger::SESSION_TARGET;
use crate::sink::RxSink;
use crate::status::NodeStatus;

/// Upper bound for teardown calls (disengage, logout) during shutdown.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Display)]
pub enum SupervisorState {
    Idle,
    Authenticating,
    Resolving,
    Engaging,
    Connected,
    Closing,
    ErrorBackoff,
}

/// How one connection attempt ended.
#[derive(Debug)]
enum AttemptEnd {
    /// caller asked to stop; teardown is done
    Shutdown,
    /// server closed with the deliberate code; do not come back
    Deliberate,
    Retry { error: SessionError, delay: Duration },
}

pub struct Supervisor {
    id: String,
    config: OrionConfig,
    credentials: Credentials,
    api: Arc<dyn OrionApi>,
    transport: Arc<dyn Transport>,
    engagement: Arc<EngagementController>,
    sink: Arc<dyn RxSink>,
    decryptor: Option<Arc<dyn Decryptor>>,
    state: watch::Sender<SupervisorState>,
    epoch: u64,
    shutdown: CancellationToken,
}

/// Handle on a running supervisor.
pub struct SupervisorHandle {
    id: String,
    shutdown: CancellationToken,
    state: watch::Receiver<SupervisorState>,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Orderly shutdown: disengage, close with the deliberate code, log out.
    pub async fn close(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            warn!(node = %self.id, error = %e, "supervisor task ended abnormally");
        }
    }
}

impl Supervisor {
    pub fn new(
        config: OrionConfig,
        credentials: Credentials,
        api: Arc<dyn OrionApi>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn RxSink>,
    ) -> Self {
        let (state, _) = watch::channel(SupervisorState::Idle);
        Self {
            id: Uuid::new_v4().to_string(),
            config,
            credentials,
            engagement: EngagementController::new(Arc::clone(&api)),
            api,
            transport,
            sink,
            decryptor: None,
            state,
            epoch: 0,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_decryptor(mut self, decryptor: Arc<dyn Decryptor>) -> Self {
        self.decryptor = Some(decryptor);
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Start the lifecycle loop on the current runtime.
    pub fn spawn(self) -> SupervisorHandle {
        let id = self.id.clone();
        let shutdown = self.shutdown.clone();
        let state = self.state.subscribe();
        let task = tokio::spawn(self.run());
        SupervisorHandle { id, shutdown, state, task }
    }

    async fn run(mut self) {
        info!(node = %self.id, groups = %self.config.groups, "rx node starting");
        loop {
            self.epoch += 1;
            match self.attempt().await {
                AttemptEnd::Shutdown => break,
                AttemptEnd::Deliberate => {
                    info!(node = %self.id, "server closed with the deliberate close code, not reconnecting");
                    break;
                }
                AttemptEnd::Retry { error: err, delay } => {
                    self.transition(SupervisorState::ErrorBackoff);
                    warn!(
                        target: SESSION_TARGET,
                        node = %self.id,
                        attempt = self.epoch,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "connection attempt failed"
                    );
                    self.sink.status(NodeStatus::error(err.status_text()));
                    if !self.pause(delay).await {
                        break;
                    }
                }
            }
        }
        self.transition(SupervisorState::Idle);
        self.sink.status(NodeStatus::disconnected());
        info!(node = %self.id, "rx node stopped");
    }

    fn transition(&self, to: SupervisorState) {
        let from = self.state.send_replace(to);
        if from != to {
            info!(
                target: SESSION_TARGET,
                node = %self.id,
                attempt = self.epoch,
                from = from.as_ref(),
                state = to.as_ref(),
                "state transition"
            );
        }
    }

    /// A failure while establishing the connection: fixed backoff.
    fn backoff(&self, error: SessionError) -> AttemptEnd {
        AttemptEnd::Retry { error, delay: self.config.retry_delay }
    }

    /// A failure of the live connection: delay by recovery policy.
    fn recover(&self, error: SessionError) -> AttemptEnd {
        let delay = match error.recovery() {
            Recovery::Immediate => Duration::ZERO,
            Recovery::ShortDelay => self.config.close_retry_delay,
            _ => self.config.retry_delay,
        };
        AttemptEnd::Retry { error, delay }
    }

    /// Sleep unless shutdown comes first. False means stop.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Run `fut` unless shutdown is requested first.
    async fn guard<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            out = fut => Some(out),
        }
    }

    async fn attempt(&self) -> AttemptEnd {
        self.transition(SupervisorState::Authenticating);
        self.sink.status(NodeStatus::connecting("Authenticating"));
        let session = match self.guard(self.api.login(&self.credentials)).await {
            None => return AttemptEnd::Shutdown,
            Some(Err(e)) => return self.backoff(SessionError::Auth(e)),
            Some(Ok(session)) => session,
        };
        debug!(node = %self.id, user_id = %session.user_id, "authenticated");

        self.transition(SupervisorState::Resolving);
        self.sink.status(NodeStatus::connecting("Resolving groups"));
        let groups = match self.guard(resolve(&self.config.groups, self.api.as_ref(), &session)).await {
            None => {
                self.logout(session).await;
                return AttemptEnd::Shutdown;
            }
            Some(Err(e)) => {
                self.logout_later(session);
                return self.backoff(e);
            }
            Some(Ok(groups)) => groups,
        };

        self.transition(SupervisorState::Engaging);
        self.sink.status(NodeStatus::connecting("Connecting"));
        let conn = match self.guard(self.transport.connect(&session)).await {
            None => {
                self.logout(session).await;
                return AttemptEnd::Shutdown;
            }
            Some(Err(e)) => {
                self.logout_later(session);
                return self.backoff(SessionError::Transport(e.to_string()));
            }
            Some(Ok(conn)) => conn,
        };
        self.sink.status(NodeStatus::connected());
        let engaged = self.engagement.engage(&session, &groups, self.config.verbosity);
        let engaged = match self.guard(engaged).await {
            None => {
                conn.shutdown(DELIBERATE_CLOSE_CODE).await;
                self.logout(session).await;
                return AttemptEnd::Shutdown;
            }
            Some(Err(e)) => {
                conn.shutdown(DELIBERATE_CLOSE_CODE).await;
                self.logout_later(session);
                return self.backoff(e);
            }
            Some(Ok(engaged)) => engaged,
        };

        self.transition(SupervisorState::Connected);
        self.sink.status(NodeStatus::engaged(engaged.verbosity));
        self.connected(session, engaged, conn).await
    }

    /// Receive loop of a live connection. The connection, its heartbeat and
    /// its dispatcher live and die together in here.
    async fn connected(&self, session: Session, mut engaged: EngagementState, mut conn: Connection) -> AttemptEnd {
        let epoch = self.epoch;
        let mut dispatcher = EventDispatcher::new(session.user_id.clone(), self.config.dispatch(), Arc::clone(&self.sink));
        if let Some(decryptor) = &self.decryptor {
            dispatcher = dispatcher.with_decryptor(Arc::clone(decryptor));
        }
        let mut heartbeat = HeartbeatMonitor::new(Arc::clone(&self.api), session.clone(), self.config.idle_timeout);
        let (reengage_tx, mut reengage_rx) = unbounded_channel::<(u64, Result<EngagementState, SessionError>)>();
        let mut reengaging: Option<JoinHandle<()>> = None;
        let mut socket_open = true;

        let end = loop {
            let idle = tokio::time::sleep_until(heartbeat.deadline());
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break AttemptEnd::Shutdown,
                event = conn.next_event() => match event {
                    Some(TransportEvent::Open) => debug!(node = %self.id, "event stream open"),
                    Some(TransportEvent::Message(raw)) => {
                        heartbeat.touch();
                        match InboundEvent::decode(&raw) {
                            Ok(event) => {
                                if dispatcher.dispatch(event) == Dispatched::Ping {
                                    heartbeat.on_ping();
                                }
                            }
                            Err(e) => {
                                warn!(node = %self.id, error = %e, "undecodable frame, forwarding raw");
                                dispatcher.dispatch_raw(raw);
                            }
                        }
                    }
                    Some(TransportEvent::Close { code, was_clean }) => {
                        socket_open = false;
                        if code == DELIBERATE_CLOSE_CODE {
                            break AttemptEnd::Deliberate;
                        }
                        debug!(node = %self.id, code, was_clean, "event stream closed");
                        break self.recover(SessionError::TransportClosedUnclean { code });
                    }
                    Some(TransportEvent::Error(e)) => {
                        socket_open = false;
                        break self.recover(SessionError::Transport(e));
                    }
                    None => {
                        socket_open = false;
                        break self.recover(SessionError::TransportClosedUnclean { code: ABNORMAL_CLOSE_CODE });
                    }
                },
                Some(outcome) = heartbeat.next_ack() => {
                    if let HeartbeatAction::Reengage(err) = heartbeat.on_ack(outcome) {
                        if reengaging.is_some() {
                            debug!(node = %self.id, "re-engagement already running");
                            continue;
                        }
                        info!(target: SESSION_TARGET, node = %self.id, attempt = epoch, reason = %err, "re-engaging");
                        self.sink.status(NodeStatus::connecting("Re-engaging"));
                        let controller = Arc::clone(&self.engagement);
                        let session = session.clone();
                        let groups = engaged.groups.clone();
                        let verbosity = engaged.verbosity;
                        let tx = reengage_tx.clone();
                        reengaging = Some(tokio::spawn(async move {
                            let result = controller.engage(&session, &groups, verbosity).await;
                            let _ = tx.send((epoch, result));
                        }));
                    }
                }
                Some((started_in, result)) = reengage_rx.recv() => {
                    if started_in != epoch {
                        debug!(node = %self.id, started_in, epoch, "discarding stale re-engagement");
                        continue;
                    }
                    reengaging = None;
                    match result {
                        Ok(state) => {
                            self.sink.status(NodeStatus::engaged(state.verbosity));
                            engaged = state;
                        }
                        Err(e) => break self.recover(e),
                    }
                }
                _ = idle => heartbeat.on_idle(),
            }
        };

        if let Some(task) = reengaging.take() {
            task.abort();
        }
        drop(heartbeat);
        drop(dispatcher);

        match end {
            AttemptEnd::Shutdown => {
                self.transition(SupervisorState::Closing);
                self.sink.status(NodeStatus::connecting("Closing"));
                match tokio::time::timeout(TEARDOWN_TIMEOUT, engaged.disengage.invoke()).await {
                    Ok(Ok(())) => debug!(node = %self.id, "disengaged"),
                    Ok(Err(e)) => warn!(node = %self.id, error = %e, "disengage failed"),
                    Err(_) => warn!(node = %self.id, "disengage timed out"),
                }
                conn.shutdown(DELIBERATE_CLOSE_CODE).await;
                self.logout(session).await;
            }
            AttemptEnd::Deliberate => {
                drop(conn);
                self.logout(session).await;
            }
            AttemptEnd::Retry { .. } => {
                if socket_open {
                    conn.shutdown(DELIBERATE_CLOSE_CODE).await;
                } else {
                    drop(conn);
                }
                self.logout_later(session);
            }
        }
        end
    }

    /// Best-effort logout, awaited with a bound.
    async fn logout(&self, session: Session) {
        match tokio::time::timeout(TEARDOWN_TIMEOUT, self.api.logout(&session)).await {
            Ok(Ok(())) => debug!(node = %self.id, "logged out"),
            Ok(Err(e)) => warn!(node = %self.id, error = %e, "logout failed"),
            Err(_) => warn!(node = %self.id, "logout timed out"),
        }
    }

    /// Best-effort logout that does not hold up the next attempt.
    fn logout_later(&self, session: Session) {
        let api = Arc::clone(&self.api);
        let id = self.id.clone();
        tokio::spawn(async move {
            if let Err(e) = api.logout(&session).await {
                warn!(node = %id, error = %e, "logout failed");
            }
        });
    }
}
