pub mod api;
pub mod endpoints;
pub mod error;
pub mod event;
pub mod media;
pub mod session;
pub mod transport;

pub use api::{EngageRequest, HttpOrionApi, OrionApi, REQUEST_TIMEOUT, http_client};
pub use endpoints::Endpoints;
pub use error::OrionError;
pub use event::InboundEvent;
pub use session::{Credentials, Session};
pub use transport::{Connection, DELIBERATE_CLOSE_CODE, Transport, TransportEvent, WsTransport};
