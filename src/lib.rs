pub mod config;
pub mod dispatch;
pub mod engagement;
pub mod error;
pub mod groups;
pub mod heartbeat;
pub mod logger;
pub mod node;
pub mod schema;
pub mod secret;
pub mod sink;
pub mod status;
pub mod supervisor;

pub use config::OrionConfig;
pub use error::SessionError;
pub use node::{RxNode, TxMessage, TxNode};
pub use sink::{ChannelSink, RxOutputs, RxSink};
pub use status::{Health, NodeStatus};
pub use supervisor::{Supervisor, SupervisorHandle, SupervisorState};
