//! Host-facing nodes: RX (event stream), TX (transmit and media base
//! sends), media helpers, profile lookup and user status.

use std::sync::Arc;

use async_trait::async_trait;
use orion_client::media::{Conversion, LyreRequest, MediaServices, Outgoing, SendOptions, payload_bytes};
use orion_client::{Credentials, HttpOrionApi, OrionApi, OrionError, Session, Transport, WsTransport};
use serde::Deserialize;
use serde_json::Value;
use strum_macros::{AsRefStr, Display};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::OrionConfig;
use crate::dispatch::Decryptor;
use crate::error::SessionError;
use crate::groups::{GroupSet, GroupSpec, resolve};
use crate::sink::RxSink;
use crate::supervisor::{Supervisor, SupervisorHandle, SupervisorState};

/// Receives events for the configured groups and keeps the subscription
/// alive until closed.
pub struct RxNode {
    handle: SupervisorHandle,
}

impl RxNode {
    /// Start against the live platform.
    pub fn start(config: OrionConfig, credentials: Credentials, sink: Arc<dyn RxSink>) -> Self {
        let api: Arc<dyn OrionApi> = Arc::new(HttpOrionApi::new(config.endpoints.clone()));
        let transport = Arc::new(WsTransport::new(Arc::clone(&api), config.endpoints.clone()));
        Self::start_with(Supervisor::new(config, credentials, api, transport, sink))
    }

    /// Start with a decryptor for multimedia events.
    pub fn start_decrypting(
        config: OrionConfig,
        credentials: Credentials,
        sink: Arc<dyn RxSink>,
        decryptor: Arc<dyn Decryptor>,
    ) -> Self {
        let api: Arc<dyn OrionApi> = Arc::new(HttpOrionApi::new(config.endpoints.clone()));
        let transport: Arc<dyn Transport> = Arc::new(WsTransport::new(Arc::clone(&api), config.endpoints.clone()));
        Self::start_with(Supervisor::new(config, credentials, api, transport, sink).with_decryptor(decryptor))
    }

    pub fn start_with(supervisor: Supervisor) -> Self {
        Self { handle: supervisor.spawn() }
    }

    pub fn id(&self) -> &str {
        self.handle.id()
    }

    pub fn state(&self) -> SupervisorState {
        self.handle.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.handle.subscribe()
    }

    /// Disengage, close the stream with the deliberate code and log out.
    pub async fn close(self) {
        self.handle.close().await
    }
}

/// Sends a text-to-speech message or a media reference to groups, or
/// raw content through the media base.
#[async_trait]
pub trait Transmitter: Send + Sync {
    async fn transmit(&self, request: &LyreRequest) -> Result<Value, OrionError>;

    /// Upload `outgoing` and announce it to one group. Returns the media url.
    async fn send(
        &self,
        session: &Session,
        group_id: &str,
        outgoing: &Outgoing,
        options: &SendOptions,
    ) -> Result<String, OrionError>;

    async fn upload(&self, session: &Session, data: Vec<u8>) -> Result<String, OrionError>;
}

#[async_trait]
impl Transmitter for MediaServices {
    async fn transmit(&self, request: &LyreRequest) -> Result<Value, OrionError> {
        self.lyre(request).await
    }

    async fn send(
        &self,
        session: &Session,
        group_id: &str,
        outgoing: &Outgoing,
        options: &SendOptions,
    ) -> Result<String, OrionError> {
        MediaServices::send(self, session, group_id, outgoing, options).await
    }

    async fn upload(&self, session: &Session, data: Vec<u8>) -> Result<String, OrionError> {
        MediaServices::upload(self, session, data).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display)]
pub enum TxStatus {
    Idle,
    Transmitting,
}

/// `group_ids` may be given as one comma separated string or a list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum GroupIds {
    One(String),
    Many(Vec<String>),
}

/// Input message of the TX node.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TxMessage {
    #[serde(default)]
    pub group_ids: Option<GroupIds>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub media: Option<String>,
    /// user id of a direct transmission
    #[serde(default)]
    pub target: Option<String>,
}

impl TxMessage {
    pub fn text(message: impl Into<String>) -> Self {
        Self { message: Some(message.into()), ..Default::default() }
    }
}

pub struct TxNode {
    api: Arc<dyn OrionApi>,
    transmitter: Arc<dyn Transmitter>,
    credentials: Credentials,
    groups: GroupSpec,
    status: watch::Sender<TxStatus>,
}

impl TxNode {
    pub fn new(config: &OrionConfig, credentials: Credentials) -> Self {
        let api: Arc<dyn OrionApi> = Arc::new(HttpOrionApi::new(config.endpoints.clone()));
        let transmitter = Arc::new(MediaServices::new(config.endpoints.clone()));
        Self::with_parts(api, transmitter, credentials, config.groups.clone())
    }

    pub fn with_parts(
        api: Arc<dyn OrionApi>,
        transmitter: Arc<dyn Transmitter>,
        credentials: Credentials,
        groups: GroupSpec,
    ) -> Self {
        let (status, _) = watch::channel(TxStatus::Idle);
        Self { api, transmitter, credentials, groups, status }
    }

    pub fn subscribe(&self) -> watch::Receiver<TxStatus> {
        self.status.subscribe()
    }

    /// Authenticate, transmit, log out. Every call uses a fresh session.
    pub async fn transmit(&self, msg: &TxMessage) -> Result<Value, SessionError> {
        self.status.send_replace(TxStatus::Transmitting);
        let result = match self.login().await {
            Ok(session) => {
                let result = self.lyre(&session, msg).await;
                self.logout(&session, "transmit").await;
                result
            }
            Err(e) => Err(e),
        };
        self.status.send_replace(TxStatus::Idle);
        result
    }

    /// Upload `outgoing` to the media base and announce it to each group.
    /// Returns the media urls in group order.
    pub async fn send(
        &self,
        outgoing: &Outgoing,
        options: &SendOptions,
        group_ids: Option<&GroupIds>,
    ) -> Result<Vec<String>, SessionError> {
        self.status.send_replace(TxStatus::Transmitting);
        let result = match self.login().await {
            Ok(session) => {
                let result = self.send_to_groups(&session, outgoing, options, group_ids).await;
                self.logout(&session, "send").await;
                result
            }
            Err(e) => Err(e),
        };
        self.status.send_replace(TxStatus::Idle);
        result
    }

    /// Store raw bytes on the media base without announcing them.
    pub async fn upload(&self, data: Vec<u8>) -> Result<String, SessionError> {
        let session = self.login().await?;
        let result = self.transmitter.upload(&session, data).await.map_err(SessionError::Transmit);
        self.logout(&session, "upload").await;
        result
    }

    async fn login(&self) -> Result<Session, SessionError> {
        self.api.login(&self.credentials).await.map_err(SessionError::Auth)
    }

    async fn logout(&self, session: &Session, after: &str) {
        if let Err(e) = self.api.logout(session).await {
            warn!(error = %e, "logout after {after} failed");
        }
    }

    async fn send_to_groups(
        &self,
        session: &Session,
        outgoing: &Outgoing,
        options: &SendOptions,
        group_ids: Option<&GroupIds>,
    ) -> Result<Vec<String>, SessionError> {
        let groups = self.groups_for(session, group_ids).await?;
        info!(groups = %groups, kind = ?outgoing, direct = options.target.is_some(), "sending via media base");
        let mut urls = Vec::with_capacity(groups.len());
        for group in groups.iter() {
            let url = self
                .transmitter
                .send(session, group, outgoing, options)
                .await
                .map_err(SessionError::Transmit)?;
            urls.push(url);
        }
        Ok(urls)
    }

    async fn groups_for(&self, session: &Session, group_ids: Option<&GroupIds>) -> Result<GroupSet, SessionError> {
        let spec = match group_ids {
            Some(GroupIds::One(raw)) => GroupSpec::parse(raw),
            Some(GroupIds::Many(ids)) => GroupSpec::List(ids.iter().map(String::as_str).collect()),
            None => self.groups.clone(),
        };
        resolve(&spec, self.api.as_ref(), session).await
    }

    async fn lyre(&self, session: &Session, msg: &TxMessage) -> Result<Value, SessionError> {
        let groups = self.groups_for(session, msg.group_ids.as_ref()).await?;
        let mut request = LyreRequest::new(session, groups.to_vec());
        request.message = msg.message.clone();
        request.media = msg.media.clone();
        request.target = msg.target.clone();
        info!(groups = %groups, direct = request.target.is_some(), "transmitting");
        self.transmitter.transmit(&request).await.map_err(SessionError::Transmit)
    }
}

/// Output of a media conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaOutput {
    pub message: Value,
    /// raw bytes when `return_type` asked for a buffer
    pub payload: Option<Vec<u8>>,
}

impl MediaOutput {
    fn passthrough(message: Value) -> Self {
        Self { message, payload: None }
    }
}

/// Encode, decode, transcribe and translate through the locris service.
/// Messages missing the field a conversion needs are passed through.
pub struct MediaNode {
    services: MediaServices,
}

impl MediaNode {
    pub fn new(services: MediaServices) -> Self {
        Self { services }
    }

    /// WAV payload to opus media.
    pub async fn encode(&self, msg: Value) -> Result<MediaOutput, SessionError> {
        if msg.get("payload").is_none() {
            debug!("encode: no payload, passing through");
            return Ok(MediaOutput::passthrough(msg));
        }
        self.convert(Conversion::Wav2Ov, msg).await
    }

    /// Opus media of a `ptt` event to WAV.
    pub async fn decode(&self, msg: Value, return_type: Option<&str>) -> Result<MediaOutput, SessionError> {
        if msg.get("event_type").and_then(Value::as_str) != Some("ptt") {
            debug!("decode: not a ptt event, passing through");
            return Ok(MediaOutput::passthrough(msg));
        }
        let mut msg = msg;
        if let (Some(kind), Some(obj)) = (return_type, msg.as_object_mut()) {
            obj.insert("return_type".into(), Value::String(kind.to_string()));
        }
        self.convert(Conversion::Ov2Wav, msg).await
    }

    pub async fn transcribe(&self, msg: Value) -> Result<MediaOutput, SessionError> {
        self.convert_media(Conversion::Stt, msg).await
    }

    pub async fn translate(&self, msg: Value) -> Result<MediaOutput, SessionError> {
        self.convert_media(Conversion::Translate, msg).await
    }

    async fn convert_media(&self, conversion: Conversion, msg: Value) -> Result<MediaOutput, SessionError> {
        if msg.get("media").is_none() {
            debug!(?conversion, "no media, passing through");
            return Ok(MediaOutput::passthrough(msg));
        }
        self.convert(conversion, msg).await
    }

    async fn convert(&self, conversion: Conversion, msg: Value) -> Result<MediaOutput, SessionError> {
        let wants_buffer = msg.get("return_type").and_then(Value::as_str) == Some("buffer");
        let message = self
            .services
            .convert(conversion, &msg)
            .await
            .map_err(SessionError::Transmit)?;
        let payload = if wants_buffer {
            message.get("payload").and_then(payload_bytes)
        } else {
            None
        };
        Ok(MediaOutput { message, payload })
    }
}

/// Resolve `target` to a user profile, or a group profile when no user
/// has that id.
pub async fn lookup(api: &dyn OrionApi, credentials: &Credentials, target: &str) -> Result<Value, SessionError> {
    let session = api.login(credentials).await.map_err(SessionError::Auth)?;
    let found = match api.get_user(&session, target).await {
        Ok(user) => Ok(user),
        Err(user_err) => {
            debug!(target, error = %user_err, "no such user, trying groups");
            api.get_group(&session, target).await.map_err(SessionError::Resolution)
        }
    };
    if let Err(e) = api.logout(&session).await {
        warn!(error = %e, "logout after lookup failed");
    }
    found
}

/// Current presence of `user_id`.
pub async fn user_status(api: &dyn OrionApi, credentials: &Credentials, user_id: &str) -> Result<Value, SessionError> {
    let session = api.login(credentials).await.map_err(SessionError::Auth)?;
    let status = api.get_user_status(&session, user_id).await.map_err(SessionError::Resolution);
    if let Err(e) = api.logout(&session).await {
        warn!(error = %e, "logout after status lookup failed");
    }
    status
}

/// Publish a presence update for the logged in user.
pub async fn set_user_status(api: &dyn OrionApi, credentials: &Credentials, status: &Value) -> Result<(), SessionError> {
    let session = api.login(credentials).await.map_err(SessionError::Auth)?;
    let result = api.update_user_status(&session, status).await.map_err(SessionError::Transmit);
    if let Err(e) = api.logout(&session).await {
        warn!(error = %e, "logout after status update failed");
    }
    result
}
