//! Wire protocol and WebSocket transport for administrative clients.

pub mod protocol;
pub mod websocket;

pub use protocol::{ClientEnvelope, ServerEnvelope, binary_attachment, decode_binary_attachment};
pub use websocket::{TransportEvent, WsState, WsTransport, create_ws_router};
