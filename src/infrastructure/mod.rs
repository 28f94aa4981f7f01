//! Infrastructure layer - WebSocket signaling and the webrtc-rs transport

pub mod rtc;
pub mod signaling;
