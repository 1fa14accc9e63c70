//! Routing of inbound events to the RX outputs.
//!
//! | event        | all | ptt | userstatus | direct              |
//! |--------------|-----|-----|------------|---------------------|
//! | `ptt`        | yes | yes |            | with a target user  |
//! | `userstatus` | yes |     | yes        |                     |
//! | multimedia   | yes |     |            |                     |
//! | `ping`       | when surfaced            |                     |
//! | other        | yes |     |            |                     |
//!
//! With `ignore_self` an event from this session's own user is suppressed
//! on every output.
//!
//! When a [`Decryptor`] is configured, routed outputs go through a single
//! worker task so that a slow decryption never holds up the receive loop
//! and the host still sees events in arrival order.

use std::sync::Arc;

use async_trait::async_trait;
use orion_client::InboundEvent;
use orion_client::event::MultimediaEvent;
use serde_json::Value;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::sink::{RxOutputs, RxSink};

#[async_trait]
pub trait Decryptor: Send + Sync {
    /// Decrypt a multimedia event into its plain JSON form.
    async fn decrypt(&self, event: &MultimediaEvent) -> Result<Value, SessionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    pub ignore_self: bool,
    pub surface_pings: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { ignore_self: false, surface_pings: true }
    }
}

/// What the receive loop needs to know after dispatching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    Routed,
    Suppressed,
    /// a keepalive: the heartbeat monitor must acknowledge it
    Ping,
}

enum Pending {
    Ready(RxOutputs),
    Encrypted(MultimediaEvent),
}

pub struct EventDispatcher {
    user_id: String,
    config: DispatchConfig,
    sink: Arc<dyn RxSink>,
    queue: Option<UnboundedSender<Pending>>,
}

impl EventDispatcher {
    pub fn new(user_id: impl Into<String>, config: DispatchConfig, sink: Arc<dyn RxSink>) -> Self {
        Self {
            user_id: user_id.into(),
            config,
            sink,
            queue: None,
        }
    }

    /// Route through an ordered worker that decrypts multimedia events.
    pub fn with_decryptor(mut self, decryptor: Arc<dyn Decryptor>) -> Self {
        let (tx, mut rx) = unbounded_channel::<Pending>();
        let sink = Arc::clone(&self.sink);
        // The worker exits once the queue is dropped and drained.
        tokio::spawn(async move {
            while let Some(pending) = rx.recv().await {
                let outputs = match pending {
                    Pending::Ready(outputs) => outputs,
                    Pending::Encrypted(event) => {
                        let value = match decryptor.decrypt(&event).await {
                            Ok(plain) => plain,
                            Err(err) => {
                                warn!(kind = %event.event_type, error = %err, "forwarding undecrypted event");
                                InboundEvent::Multimedia(event).to_value()
                            }
                        };
                        RxOutputs { all: Some(value), ..Default::default() }
                    }
                };
                sink.send(outputs);
            }
        });
        self.queue = Some(tx);
        self
    }

    /// Classify one event and hand its outputs to the sink.
    pub fn dispatch(&self, event: InboundEvent) -> Dispatched {
        let is_ping = matches!(event, InboundEvent::Ping(_));
        if let (InboundEvent::Multimedia(mm), Some(_)) = (&event, &self.queue) {
            self.enqueue(Pending::Encrypted(mm.clone()));
            return Dispatched::Routed;
        }
        let outputs = self.route(&event);
        let routed = !outputs.is_empty();
        if routed {
            self.emit(outputs);
        }
        match (is_ping, routed) {
            (true, _) => Dispatched::Ping,
            (false, true) => Dispatched::Routed,
            (false, false) => Dispatched::Suppressed,
        }
    }

    /// Forward a frame that could not be decoded as-is on the generic output.
    pub fn dispatch_raw(&self, raw: String) {
        self.emit(RxOutputs { all: Some(Value::String(raw)), ..Default::default() });
    }

    /// Pure routing decision for `event`.
    pub fn route(&self, event: &InboundEvent) -> RxOutputs {
        let mut out = RxOutputs::default();
        match event {
            InboundEvent::Ptt(ptt) => {
                if self.is_self(ptt.sender.as_deref()) {
                    debug!("suppressing own ptt event");
                    return out;
                }
                let value = event.to_value();
                if ptt.target_user_id.is_some() {
                    out.direct = Some(value.clone());
                }
                out.ptt = Some(value.clone());
                out.all = Some(value);
            }
            InboundEvent::UserStatus(status) => {
                if self.is_self(status.id.as_deref()) {
                    debug!("suppressing own userstatus event");
                    return out;
                }
                let value = event.to_value();
                out.userstatus = Some(value.clone());
                out.all = Some(value);
            }
            InboundEvent::Ping(_) => {
                if self.config.surface_pings {
                    out.all = Some(event.to_value());
                }
            }
            InboundEvent::Multimedia(_) | InboundEvent::Other(_) => {
                out.all = Some(event.to_value());
            }
        }
        out
    }

    fn is_self(&self, id: Option<&str>) -> bool {
        self.config.ignore_self && id == Some(self.user_id.as_str())
    }

    fn emit(&self, outputs: RxOutputs) {
        match &self.queue {
            Some(_) => self.enqueue(Pending::Ready(outputs)),
            None => self.sink.send(outputs),
        }
    }

    fn enqueue(&self, pending: Pending) {
        if let Some(queue) = &self.queue {
            if queue.send(pending).is_err() {
                warn!("dispatch worker gone, event dropped");
            }
        }
    }
}
