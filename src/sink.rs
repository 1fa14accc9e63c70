//! Host-facing side of an RX node: four ordered outputs plus a status signal.

use schemars::JsonSchema;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::watch;
use tracing::debug;

use crate::status::NodeStatus;

pub const OUTPUT_ALL: usize = 0;
pub const OUTPUT_PTT: usize = 1;
pub const OUTPUT_USERSTATUS: usize = 2;
pub const OUTPUT_DIRECT: usize = 3;

/// One routing decision: the same event may land on several outputs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, JsonSchema)]
pub struct RxOutputs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ptt: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub userstatus: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direct: Option<Value>,
}

impl RxOutputs {
    pub fn is_empty(&self) -> bool {
        self.all.is_none() && self.ptt.is_none() && self.userstatus.is_none() && self.direct.is_none()
    }

    /// Outputs in port order.
    pub fn ports(&self) -> [Option<&Value>; 4] {
        [self.all.as_ref(), self.ptt.as_ref(), self.userstatus.as_ref(), self.direct.as_ref()]
    }
}

/// Receives what an RX node produces. Calls must not block.
pub trait RxSink: Send + Sync {
    fn send(&self, outputs: RxOutputs);
    fn status(&self, status: NodeStatus);
}

/// Channel-backed sink for hosts that consume outputs from a task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    outputs: UnboundedSender<RxOutputs>,
    status: watch::Sender<NodeStatus>,
}

pub struct RxReceiver {
    pub outputs: UnboundedReceiver<RxOutputs>,
    pub status: watch::Receiver<NodeStatus>,
}

impl ChannelSink {
    pub fn new() -> (Self, RxReceiver) {
        let (outputs, outputs_rx) = unbounded_channel();
        let (status, status_rx) = watch::channel(NodeStatus::default());
        (
            Self { outputs, status },
            RxReceiver { outputs: outputs_rx, status: status_rx },
        )
    }
}

impl RxSink for ChannelSink {
    fn send(&self, outputs: RxOutputs) {
        if self.outputs.send(outputs).is_err() {
            debug!("rx outputs dropped, receiver gone");
        }
    }

    fn status(&self, status: NodeStatus) {
        self.status.send_replace(status);
    }
}
