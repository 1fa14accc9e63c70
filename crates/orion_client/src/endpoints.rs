//! Service endpoints of the Orion platform.
//!
//! Every endpoint has a production default and can be overridden through a
//! key/value lookup (usually the process environment).

use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_API: &str = "https://api.orionlabs.io";
pub const DEFAULT_MEDIA: &str = "https://alnitak-rx.orionlabs.io";
pub const DEFAULT_EVENTSTREAM: &str = "https://alnilam.orionlabs.io";
pub const DEFAULT_EVENTSTREAM_WS: &str = "wss://alnilam.orionlabs.io";
pub const DEFAULT_LOCRIS: &str = "https://locris.api.orionaster.com";
pub const DEFAULT_LYRE: &str = "https://lyre.api.orionaster.com";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    /// REST API (auth, engage, pong, users, groups)
    pub api: String,
    pub media: String,
    /// HTTP side of the event stream, hands out websocket tickets
    pub eventstream: String,
    /// websocket side of the event stream
    pub eventstream_ws: String,
    /// audio helper service (encode, decode, transcribe, translate)
    pub locris: String,
    /// transmit service
    pub lyre: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api: DEFAULT_API.into(),
            media: DEFAULT_MEDIA.into(),
            eventstream: DEFAULT_EVENTSTREAM.into(),
            eventstream_ws: DEFAULT_EVENTSTREAM_WS.into(),
            locris: DEFAULT_LOCRIS.into(),
            lyre: DEFAULT_LYRE.into(),
        }
    }
}

impl Endpoints {
    /// Config keys that override the defaults.
    pub const KEYS: [&'static str; 6] = [
        "ORION_API_URL",
        "ORION_MEDIA_URL",
        "ORION_EVENTSTREAM_URL",
        "ORION_EVENTSTREAM_WS",
        "ORION_LOCRIS_URL",
        "ORION_LYRE_URL",
    ];

    /// Build the endpoint set, asking `lookup` for each override key.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |key: &str, default: &str| {
            lookup(key)
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let endpoints = Self {
            api: pick("ORION_API_URL", DEFAULT_API),
            media: pick("ORION_MEDIA_URL", DEFAULT_MEDIA),
            eventstream: pick("ORION_EVENTSTREAM_URL", DEFAULT_EVENTSTREAM),
            eventstream_ws: pick("ORION_EVENTSTREAM_WS", DEFAULT_EVENTSTREAM_WS),
            locris: pick("ORION_LOCRIS_URL", DEFAULT_LOCRIS),
            lyre: pick("ORION_LYRE_URL", DEFAULT_LYRE),
        };
        endpoints.log();
        endpoints
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Point every endpoint at one base url. Handy for local mocks.
    pub fn single_host(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        let ws = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.clone()
        };
        Self {
            api: base.clone(),
            media: base.clone(),
            eventstream: base.clone(),
            eventstream_ws: ws,
            locris: base.clone(),
            lyre: base,
        }
    }

    /// Websocket url of the event stream for a one-shot ticket.
    pub fn stream_url(&self, ticket: &str) -> String {
        format!("{}/stream/{}/wss", self.eventstream_ws, ticket)
    }

    fn log(&self) {
        debug!(
            api = %self.api,
            media = %self.media,
            eventstream = %self.eventstream,
            eventstream_ws = %self.eventstream_ws,
            locris = %self.locris,
            lyre = %self.lyre,
            "orion service endpoints"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_overrides_and_defaults() {
        let mut map = HashMap::new();
        map.insert("ORION_API_URL", "http://localhost:9000/".to_string());
        map.insert("ORION_LYRE_URL", "   ".to_string());
        let ep = Endpoints::from_lookup(|k| map.get(k).cloned());
        assert_eq!(ep.api, "http://localhost:9000");
        assert_eq!(ep.lyre, DEFAULT_LYRE);
        assert_eq!(ep.eventstream_ws, DEFAULT_EVENTSTREAM_WS);
    }

    #[test]
    fn test_single_host_maps_scheme() {
        let ep = Endpoints::single_host("http://127.0.0.1:4000/");
        assert_eq!(ep.eventstream_ws, "ws://127.0.0.1:4000");
        assert_eq!(ep.stream_url("abc"), "ws://127.0.0.1:4000/stream/abc/wss");
    }
}
