//! In-memory stand-ins for the platform, shared by the session tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use channel_orion::config::OrionConfig;
use channel_orion::groups::GroupSpec;
use orion_client::media::{LyreRequest, Outgoing, SendOptions};
use orion_client::{Connection, Credentials, EngageRequest, OrionApi, OrionError, Session, Transport, TransportEvent};
use serde_json::{Value, json};
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};

pub const USER_ID: &str = "u-self";

/// Every platform interaction, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Login,
    Logout(String),
    UserGroups,
    Engage { seqnum: u64, groups: Vec<String>, verbosity: String },
    Pong,
    Connect,
    Close(u16),
    StatusUpdate(Value),
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

pub struct FakeApi {
    pub log: CallLog,
    pub groups: Mutex<Vec<String>>,
    pub login_failures: AtomicUsize,
    pub engage_conflicts: AtomicUsize,
    pub engage_failures: AtomicUsize,
    pub pong_failures: AtomicUsize,
    /// `pong` never answers while set
    pub pong_hangs: AtomicBool,
    sessions: AtomicUsize,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            log: Arc::new(Mutex::new(Vec::new())),
            groups: Mutex::new(vec!["g1".into()]),
            login_failures: AtomicUsize::new(0),
            engage_conflicts: AtomicUsize::new(0),
            engage_failures: AtomicUsize::new(0),
            pong_failures: AtomicUsize::new(0),
            pong_hangs: AtomicBool::new(false),
            sessions: AtomicUsize::new(0),
        })
    }

    pub fn set_groups(&self, groups: &[&str]) {
        *self.groups.lock().unwrap() = groups.iter().map(|g| g.to_string()).collect();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    pub fn engages(&self) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Engage { groups, .. } => Some(groups),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.log.lock().unwrap().push(call);
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl OrionApi for FakeApi {
    async fn login(&self, credentials: &Credentials) -> Result<Session, OrionError> {
        self.record(Call::Login);
        if take_one(&self.login_failures) {
            return Err(OrionError::Network("connection refused".into()));
        }
        let n = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = credentials;
        Ok(Session::new(format!("tok-{n}"), USER_ID, Some(format!("s-{n}"))))
    }

    async fn logout(&self, session: &Session) -> Result<(), OrionError> {
        self.record(Call::Logout(session.session_id.clone().unwrap_or_default()));
        Ok(())
    }

    async fn whoami(&self, _session: &Session) -> Result<Value, OrionError> {
        Ok(json!({"id": USER_ID}))
    }

    async fn user_groups(&self, _session: &Session) -> Result<Vec<String>, OrionError> {
        self.record(Call::UserGroups);
        Ok(self.groups.lock().unwrap().clone())
    }

    async fn engage(&self, _session: &Session, request: &EngageRequest) -> Result<Value, OrionError> {
        self.record(Call::Engage {
            seqnum: request.seqnum,
            groups: request.group_ids.clone(),
            verbosity: request.destinations[0].verbosity.clone(),
        });
        if take_one(&self.engage_conflicts) {
            return Err(OrionError::Conflict);
        }
        if take_one(&self.engage_failures) {
            return Err(OrionError::Status { endpoint: "/api/engage".into(), status: 500 });
        }
        Ok(json!({"groups": request.group_ids}))
    }

    async fn pong(&self, _session: &Session) -> Result<(), OrionError> {
        self.record(Call::Pong);
        if self.pong_hangs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if take_one(&self.pong_failures) {
            return Err(OrionError::Status { endpoint: "/api/pong".into(), status: 401 });
        }
        Ok(())
    }

    async fn ticket(&self, session: &Session) -> Result<String, OrionError> {
        Ok(format!("ticket-{}", session.user_id))
    }

    async fn get_user(&self, _session: &Session, user_id: &str) -> Result<Value, OrionError> {
        if user_id == USER_ID {
            Ok(json!({"id": USER_ID, "name": "Self"}))
        } else {
            Err(OrionError::Status { endpoint: "/api/users".into(), status: 404 })
        }
    }

    async fn get_group(&self, _session: &Session, group_id: &str) -> Result<Value, OrionError> {
        if group_id.starts_with('g') {
            Ok(json!({"id": group_id, "name": "Group"}))
        } else {
            Err(OrionError::Status { endpoint: "/api/groups".into(), status: 404 })
        }
    }

    async fn get_user_status(&self, _session: &Session, user_id: &str) -> Result<Value, OrionError> {
        Ok(json!({"id": user_id, "status": "available"}))
    }

    async fn update_user_status(&self, _session: &Session, status: &Value) -> Result<(), OrionError> {
        self.record(Call::StatusUpdate(status.clone()));
        Ok(())
    }
}

/// Transport whose connections are driven by the test.
pub struct FakeTransport {
    log: CallLog,
    links: Mutex<Vec<UnboundedSender<TransportEvent>>>,
    pub connect_failures: AtomicUsize,
}

impl FakeTransport {
    pub fn new(log: CallLog) -> Arc<Self> {
        Arc::new(Self {
            log,
            links: Mutex::new(Vec::new()),
            connect_failures: AtomicUsize::new(0),
        })
    }

    pub fn connections(&self) -> usize {
        self.links.lock().unwrap().len()
    }

    /// Push an event into connection `n` (0-based).
    pub fn push(&self, n: usize, event: TransportEvent) {
        let links = self.links.lock().unwrap();
        let _ = links[n].send(event);
    }

    pub fn push_json(&self, n: usize, value: Value) {
        self.push(n, TransportEvent::Message(value.to_string()));
    }

    /// Push to the newest connection.
    pub fn push_latest(&self, value: Value) {
        let n = self.connections() - 1;
        self.push_json(n, value);
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, _session: &Session) -> Result<Connection, OrionError> {
        self.log.lock().unwrap().push(Call::Connect);
        if take_one(&self.connect_failures) {
            return Err(OrionError::WebSocket("handshake refused".into()));
        }
        let (events_tx, events_rx) = unbounded_channel();
        let (close_tx, mut close_rx) = unbounded_channel::<u16>();
        let _ = events_tx.send(TransportEvent::Open);
        let log = Arc::clone(&self.log);
        let task = tokio::spawn(async move {
            if let Some(code) = close_rx.recv().await {
                log.lock().unwrap().push(Call::Close(code));
            }
        });
        self.links.lock().unwrap().push(events_tx);
        Ok(Connection::new(events_rx, close_tx, Some(task)))
    }
}

/// Test config with short delays.
pub fn config(groups: &str) -> OrionConfig {
    let mut config = OrionConfig::new(GroupSpec::parse(groups));
    config.retry_delay = Duration::from_millis(200);
    config.close_retry_delay = Duration::from_millis(50);
    config
}

pub fn credentials() -> Credentials {
    Credentials::new("alice", "pw")
}

/// Poll `cond` until it holds or `timeout` passes.
pub async fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

/// Lyre and media base stand-in that records what it was given.
#[derive(Default)]
pub struct RecordingTransmitter {
    pub sent: Mutex<Vec<LyreRequest>>,
    /// (group, content, addressing) of each media base send
    pub announced: Mutex<Vec<(String, Outgoing, SendOptions)>>,
    pub uploads: Mutex<Vec<Vec<u8>>>,
    /// groups whose announcement is refused
    pub refuse: Mutex<Vec<String>>,
}

#[async_trait]
impl channel_orion::node::Transmitter for RecordingTransmitter {
    async fn transmit(&self, request: &LyreRequest) -> Result<Value, OrionError> {
        self.sent.lock().unwrap().push(request.clone());
        Ok(json!({"status": "queued"}))
    }

    async fn send(
        &self,
        _session: &Session,
        group_id: &str,
        outgoing: &Outgoing,
        options: &SendOptions,
    ) -> Result<String, OrionError> {
        if self.refuse.lock().unwrap().iter().any(|g| g == group_id) {
            return Err(OrionError::Status { endpoint: format!("/ptt/{group_id}"), status: 403 });
        }
        let mut announced = self.announced.lock().unwrap();
        announced.push((group_id.to_string(), outgoing.clone(), options.clone()));
        Ok(format!("https://media.test/{group_id}/{}", announced.len()))
    }

    async fn upload(&self, _session: &Session, data: Vec<u8>) -> Result<String, OrionError> {
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push(data);
        Ok(format!("https://media.test/upload/{}", uploads.len()))
    }
}
