//! Signaling channel over WebSocket

pub mod channel;
pub mod codec;

pub use channel::{ReconnectPolicy, WebSocketChannel, WebSocketConnector};
