//! Helper services around the platform: `lyre` transmits text-to-speech or
//! pre-encoded media to groups, `locris` converts between WAV and the
//! platform's opus container and transcribes/translates audio events.
//!
//! Raw content goes the other way through the media base: the file is PUT
//! under a fresh name and then announced to a group with a `ptt` or
//! `multimedia` event that points at it.

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, info};
use uuid::Uuid;

use crate::api::http_client;
use crate::endpoints::Endpoints;
use crate::error::OrionError;
use crate::session::Session;

/// Conversions can take a while on long recordings.
pub const MEDIA_TIMEOUT: Duration = Duration::from_secs(120);

/// Marker prefix of plain (unencrypted) text media.
pub const TEXT_PREFIX: &str = "Vt11";
const DEFAULT_UPLOAD_TYPE: &str = "application/x-www-form-urlencoded";

/// Body of `POST <lyre>/lyre`.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct LyreRequest {
    pub token: String,
    pub group_ids: Vec<String>,
    pub message: Option<String>,
    pub media: Option<String>,
    pub target: Option<String>,
}

impl fmt::Debug for LyreRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LyreRequest")
            .field("token", &"<redacted>")
            .field("group_ids", &self.group_ids)
            .field("message", &self.message)
            .field("media", &self.media)
            .field("target", &self.target)
            .finish()
    }
}

impl LyreRequest {
    pub fn new(session: &Session, group_ids: Vec<String>) -> Self {
        Self {
            token: session.token().to_string(),
            group_ids,
            message: None,
            media: None,
            target: None,
        }
    }
}

/// Conversions offered by the locris service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// WAV/PCM payload to opus media
    Wav2Ov,
    /// opus media to WAV payload
    Ov2Wav,
    /// speech to text
    Stt,
    Translate,
}

impl Conversion {
    fn path(self) -> &'static str {
        match self {
            Conversion::Wav2Ov => "/wav2ov",
            Conversion::Ov2Wav => "/ov2wav",
            Conversion::Stt => "/stt",
            Conversion::Translate => "/translate",
        }
    }
}

/// Content to upload to the media base and announce to a group.
#[derive(Clone, PartialEq)]
pub enum Outgoing {
    /// opus encoded voice
    Ptt(Vec<u8>),
    Text(String),
    Image {
        data: Vec<u8>,
        mime_type: String,
        thumbnail: Option<Vec<u8>>,
    },
}

impl fmt::Debug for Outgoing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outgoing::Ptt(data) => write!(f, "Ptt({} bytes)", data.len()),
            Outgoing::Text(text) => write!(f, "Text({} chars)", text.chars().count()),
            Outgoing::Image { data, mime_type, thumbnail } => write!(
                f,
                "Image({mime_type}, {} bytes, thumbnail: {})",
                data.len(),
                thumbnail.is_some()
            ),
        }
    }
}

/// Addressing of a media base send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// user id of a direct transmission
    pub target: Option<String>,
    /// set when the content is encrypted with a stream key
    pub stream_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaBaseResponse {
    #[serde(default)]
    mediabase: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MediaServices {
    client: Client,
    endpoints: Endpoints,
}

impl MediaServices {
    pub fn new(endpoints: Endpoints) -> Self {
        Self::with_timeout(endpoints, MEDIA_TIMEOUT)
    }

    pub fn with_timeout(endpoints: Endpoints, timeout: Duration) -> Self {
        Self { client: http_client(timeout), endpoints }
    }

    pub async fn lyre(&self, request: &LyreRequest) -> Result<Value, OrionError> {
        let url = format!("{}/lyre", self.endpoints.lyre);
        info!(groups = ?request.group_ids, target = ?request.target, "transmitting via lyre");
        self.post(&url, &serde_json::to_value(request)?).await
    }

    /// Run a locris conversion over a message object.
    pub async fn convert(&self, conversion: Conversion, message: &Value) -> Result<Value, OrionError> {
        let url = format!("{}{}", self.endpoints.locris, conversion.path());
        debug!(?conversion, "locris conversion");
        self.post(&url, message).await
    }

    /// Base url new media is stored under. Falls back to the configured
    /// media endpoint when the platform does not name one.
    pub async fn media_base(&self, session: &Session) -> Result<String, OrionError> {
        let url = format!("{}/admin/mediabase", self.endpoints.api);
        let resp = self
            .client
            .get(&url)
            .header(AUTHORIZATION, session.token())
            .send()
            .await
            .map_err(|e| OrionError::Network(e.to_string()))?;
        let status = resp.status();
        if status != StatusCode::OK {
            return Err(OrionError::Status { endpoint: "/admin/mediabase".into(), status: status.as_u16() });
        }
        let body: MediaBaseResponse = resp.json().await.map_err(|e| OrionError::Decode(e.to_string()))?;
        let base = match body.mediabase.filter(|b| !b.trim().is_empty()) {
            Some(base) => base,
            None => {
                debug!(media = %self.endpoints.media, "no media base announced, using configured media endpoint");
                self.endpoints.media.clone()
            }
        };
        Ok(if base.ends_with('/') { base } else { format!("{base}/") })
    }

    /// PUT raw content to `url`.
    pub async fn put_media(&self, url: &str, data: Vec<u8>, mime_type: Option<&str>) -> Result<(), OrionError> {
        let resp = self
            .client
            .put(url)
            .header(CONTENT_TYPE, mime_type.unwrap_or(DEFAULT_UPLOAD_TYPE))
            .body(data)
            .send()
            .await
            .map_err(|e| OrionError::Network(e.to_string()))?;
        let status = resp.status();
        if status != StatusCode::OK {
            return Err(OrionError::Service(format!("{url} answered {status}")));
        }
        Ok(())
    }

    /// Store `data` under a fresh name on the media base and return its url.
    pub async fn upload(&self, session: &Session, data: Vec<u8>) -> Result<String, OrionError> {
        let url = format!("{}{}", self.media_base(session).await?, Uuid::new_v4());
        self.put_media(&url, data, None).await?;
        info!(%url, "media uploaded");
        Ok(url)
    }

    /// Upload `outgoing` and announce it to `group_id`. Returns the media url.
    pub async fn send(
        &self,
        session: &Session,
        group_id: &str,
        outgoing: &Outgoing,
        options: &SendOptions,
    ) -> Result<String, OrionError> {
        let base = self.media_base(session).await?;
        let id = Uuid::new_v4();
        let ts = Utc::now().timestamp_millis() as f64 / 1000.0;

        let (path, event, media_url) = match outgoing {
            Outgoing::Ptt(audio) => {
                let media_url = format!("{base}{id}.ov");
                self.put_media(&media_url, audio.clone(), None).await?;
                let mut event = Map::new();
                event.insert("media".into(), json!(media_url));
                event.insert("ts".into(), json!(ts));
                add_addressing(&mut event, options);
                ("ptt", Value::Object(event), media_url)
            }
            Outgoing::Text(text) => {
                let media_url = format!("{base}{id}.txt");
                let body = if options.stream_key.is_none() && !text.starts_with(TEXT_PREFIX) {
                    format!("{TEXT_PREFIX}{text}")
                } else {
                    text.clone()
                };
                self.put_media(&media_url, body.into_bytes(), None).await?;
                let mut inner = Map::new();
                inner.insert("media".into(), json!(media_url));
                inner.insert("char_set".into(), json!("utf-8"));
                inner.insert("mime_type".into(), json!("text/plain"));
                inner.insert("ts".into(), json!(ts));
                add_addressing(&mut inner, options);
                let event = json!({"event_type": "text", "text_event": inner});
                ("multimedia", event, media_url)
            }
            Outgoing::Image { data, mime_type, thumbnail } => {
                let ext = mime_type.rsplit('/').next().unwrap_or("bin");
                let file_name = format!("{id}.{ext}");
                let media_url = format!("{base}{file_name}");
                self.put_media(&media_url, data.clone(), None).await?;
                let mut inner = Map::new();
                if let Some(thumb) = thumbnail {
                    let thumb_url = format!("{base}{id}_thumb.{ext}");
                    self.put_media(&thumb_url, thumb.clone(), Some(mime_type.as_str())).await?;
                    inner.insert("thumbnail_url".into(), json!(thumb_url));
                }
                inner.insert("media".into(), json!(media_url));
                inner.insert("mime_type".into(), json!(mime_type));
                inner.insert("friendly_filename".into(), json!(file_name));
                inner.insert("ts".into(), json!(ts));
                add_addressing(&mut inner, options);
                let event = json!({"event_type": "image", "image_event": inner});
                ("multimedia", event, media_url)
            }
        };

        let url = format!("{}/{path}/{group_id}", self.endpoints.api);
        info!(group_id, kind = path, target = ?options.target, "announcing media");
        self.post_event(session, &url, &event).await?;
        Ok(media_url)
    }

    async fn post_event(&self, session: &Session, url: &str, event: &Value) -> Result<(), OrionError> {
        let resp = self
            .client
            .post(url)
            .header(AUTHORIZATION, session.token())
            .json(event)
            .send()
            .await
            .map_err(|e| OrionError::Network(e.to_string()))?;
        let status = resp.status();
        if status != StatusCode::NO_CONTENT {
            let endpoint = resp.url().path().to_string();
            return Err(OrionError::Status { endpoint, status: status.as_u16() });
        }
        Ok(())
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Value, OrionError> {
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| OrionError::Network(e.to_string()))?;
        let status = resp.status();
        if status != StatusCode::OK {
            return Err(OrionError::Service(format!("{url} answered {status}")));
        }
        let text = resp.text().await.map_err(|e| OrionError::Network(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

fn add_addressing(event: &mut Map<String, Value>, options: &SendOptions) {
    if let Some(target) = &options.target {
        event.insert("target_user_id".into(), json!(target));
    }
    if let Some(key) = &options.stream_key {
        event.insert("stream_key".into(), json!(key));
    }
}

/// Extract raw bytes from a JSON payload encoded either as an array of
/// byte values or as `{"type":"Buffer","data":[...]}`.
pub fn payload_bytes(payload: &Value) -> Option<Vec<u8>> {
    let items = match payload {
        Value::Array(items) => items,
        Value::Object(map) => map.get("data")?.as_array()?,
        _ => return None,
    };
    items
        .iter()
        .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
        .collect()
}
