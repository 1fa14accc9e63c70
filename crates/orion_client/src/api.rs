//! REST surface of the Orion platform.
//!
//! [`OrionApi`] is the seam the session core talks through; [`HttpOrionApi`]
//! is the reqwest-backed implementation. Every call sends the raw token in
//! the `Authorization` header and only accepts the status code the endpoint
//! documents.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, trace, warn};

use crate::endpoints::Endpoints;
use crate::error::OrionError;
use crate::session::{Credentials, LoginResponse, Session};

/// Upper bound on one REST call, connect and body included.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Destination name used for every engagement of the event stream.
pub const EVENT_STREAM_DESTINATION: &str = "EventStream";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub destination: String,
    pub verbosity: String,
}

/// Body of `POST /api/engage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngageRequest {
    pub seqnum: u64,
    #[serde(rename = "groupIds")]
    pub group_ids: Vec<String>,
    pub destinations: Vec<Destination>,
}

impl EngageRequest {
    pub fn event_stream(seqnum: u64, group_ids: Vec<String>, verbosity: &str) -> Self {
        Self {
            seqnum,
            group_ids,
            destinations: vec![Destination {
                destination: EVENT_STREAM_DESTINATION.into(),
                verbosity: verbosity.into(),
            }],
        }
    }
}

#[async_trait]
pub trait OrionApi: Send + Sync {
    /// Exchange credentials for a session.
    async fn login(&self, credentials: &Credentials) -> Result<Session, OrionError>;
    /// Invalidate the session token.
    async fn logout(&self, session: &Session) -> Result<(), OrionError>;
    async fn whoami(&self, session: &Session) -> Result<Value, OrionError>;
    /// Ids of every group the session's user belongs to, in platform order.
    async fn user_groups(&self, session: &Session) -> Result<Vec<String>, OrionError>;
    /// Subscribe the session to a group set. `OrionError::Conflict` on 409.
    async fn engage(&self, session: &Session, request: &EngageRequest) -> Result<Value, OrionError>;
    /// Acknowledge an event stream keepalive.
    async fn pong(&self, session: &Session) -> Result<(), OrionError>;
    /// One-shot websocket ticket bound to the session token.
    async fn ticket(&self, session: &Session) -> Result<String, OrionError>;
    async fn get_user(&self, session: &Session, user_id: &str) -> Result<Value, OrionError>;
    async fn get_group(&self, session: &Session, group_id: &str) -> Result<Value, OrionError>;
    async fn get_user_status(&self, session: &Session, user_id: &str) -> Result<Value, OrionError>;
    async fn update_user_status(&self, session: &Session, status: &Value) -> Result<(), OrionError>;
}

#[derive(Debug, Deserialize)]
struct TicketResponse {
    token_id: String,
}

#[derive(Debug, Deserialize)]
struct GroupRef {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct UserGroups {
    #[serde(default)]
    groups: Vec<GroupRef>,
}

#[derive(Debug, Clone)]
pub struct HttpOrionApi {
    client: Client,
    endpoints: Endpoints,
}

/// reqwest client whose requests fail once `timeout` has passed.
pub fn http_client(timeout: Duration) -> Client {
    match Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "http client could not be built with a timeout, using defaults");
            Client::new()
        }
    }
}

impl HttpOrionApi {
    pub fn new(endpoints: Endpoints) -> Self {
        Self::with_timeout(endpoints, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(endpoints: Endpoints, timeout: Duration) -> Self {
        Self { client: http_client(timeout), endpoints }
    }

    pub fn with_client(client: Client, endpoints: Endpoints) -> Self {
        Self { client, endpoints }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Issue a request and insist on `expect`. Returns the (possibly empty)
    /// JSON body.
    async fn call(
        &self,
        token: Option<&str>,
        method: Method,
        url: String,
        expect: StatusCode,
        body: Option<&Value>,
    ) -> Result<Value, OrionError> {
        trace!(%method, %url, "orion call");
        let mut req = self.client.request(method, &url);
        if let Some(token) = token {
            req = req.header(reqwest::header::AUTHORIZATION, token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await.map_err(|e| OrionError::Network(e.to_string()))?;
        let status = resp.status();
        if status == StatusCode::CONFLICT && expect != StatusCode::CONFLICT {
            return Err(OrionError::Conflict);
        }
        if status != expect {
            let endpoint = resp.url().path().to_string();
            debug!(%endpoint, status = status.as_u16(), "unexpected status");
            return Err(OrionError::Status { endpoint, status: status.as_u16() });
        }
        let text = resp.text().await.map_err(|e| OrionError::Network(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn api(&self, path: &str) -> String {
        format!("{}{}", self.endpoints.api, path)
    }
}

#[async_trait]
impl OrionApi for HttpOrionApi {
    async fn login(&self, credentials: &Credentials) -> Result<Session, OrionError> {
        let body = json!({ "uid": credentials.username, "password": credentials.secret() });
        let value = self
            .call(None, Method::POST, self.api("/api/login"), StatusCode::OK, Some(&body))
            .await
            .map_err(|e| match e {
                OrionError::Status { status, .. } if (400..500).contains(&status) => {
                    OrionError::Rejected(status)
                }
                other => other,
            })?;
        let login: LoginResponse = serde_json::from_value(value)?;
        match login.token.filter(|t| !t.is_empty()) {
            Some(token) => Ok(Session::new(token, login.id.unwrap_or_default(), login.session_id)),
            None => Err(OrionError::NoToken(credentials.username.clone())),
        }
    }

    async fn logout(&self, session: &Session) -> Result<(), OrionError> {
        let Some(session_id) = session.session_id.as_deref() else {
            debug!(user_id = %session.user_id, "no platform session id, skipping logout");
            return Ok(());
        };
        self.call(
            Some(session.token()),
            Method::POST,
            self.api(&format!("/api/logout/{session_id}")),
            StatusCode::NO_CONTENT,
            None,
        )
        .await
        .map(|_| ())
    }

    async fn whoami(&self, session: &Session) -> Result<Value, OrionError> {
        self.call(Some(session.token()), Method::GET, self.api("/api/whoami"), StatusCode::OK, None)
            .await
    }

    async fn user_groups(&self, session: &Session) -> Result<Vec<String>, OrionError> {
        let user_id = if session.user_id.is_empty() {
            let me = self.whoami(session).await?;
            me.get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| OrionError::Decode("whoami without id".into()))?
        } else {
            session.user_id.clone()
        };
        let value = self.get_user(session, &user_id).await?;
        let user: UserGroups = serde_json::from_value(value)?;
        Ok(user.groups.into_iter().map(|g| g.id).collect())
    }

    async fn engage(&self, session: &Session, request: &EngageRequest) -> Result<Value, OrionError> {
        let body = serde_json::to_value(request)?;
        self.call(Some(session.token()), Method::POST, self.api("/api/engage"), StatusCode::OK, Some(&body))
            .await
    }

    async fn pong(&self, session: &Session) -> Result<(), OrionError> {
        self.call(Some(session.token()), Method::POST, self.api("/api/pong"), StatusCode::OK, None)
            .await
            .map(|_| ())
    }

    async fn ticket(&self, session: &Session) -> Result<String, OrionError> {
        let url = format!("{}/api/ticket", self.endpoints.eventstream);
        let value = self.call(Some(session.token()), Method::GET, url, StatusCode::OK, None).await?;
        let ticket: TicketResponse = serde_json::from_value(value)?;
        if ticket.token_id.is_empty() {
            warn!("event stream handed out an empty ticket");
            return Err(OrionError::Decode("empty ticket".into()));
        }
        Ok(ticket.token_id)
    }

    async fn get_user(&self, session: &Session, user_id: &str) -> Result<Value, OrionError> {
        self.call(
            Some(session.token()),
            Method::GET,
            self.api(&format!("/api/users/{user_id}")),
            StatusCode::OK,
            None,
        )
        .await
    }

    async fn get_group(&self, session: &Session, group_id: &str) -> Result<Value, OrionError> {
        self.call(
            Some(session.token()),
            Method::GET,
            self.api(&format!("/api/groups/{group_id}")),
            StatusCode::OK,
            None,
        )
        .await
    }

    async fn get_user_status(&self, session: &Session, user_id: &str) -> Result<Value, OrionError> {
        self.call(
            Some(session.token()),
            Method::GET,
            self.api(&format!("/api/users/{user_id}/status")),
            StatusCode::OK,
            None,
        )
        .await
    }

    async fn update_user_status(&self, session: &Session, status: &Value) -> Result<(), OrionError> {
        let user_id = status
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| OrionError::Decode("user status without id".into()))?;
        self.call(
            Some(session.token()),
            Method::PATCH,
            self.api(&format!("/api/users/{user_id}/status")),
            StatusCode::NO_CONTENT,
            Some(status),
        )
        .await
        .map(|_| ())
    }
}
