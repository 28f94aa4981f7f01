//! ProctorLink - real-time camera sessions for remote exam proctoring
//!
//! Negotiates WebRTC peer connections between exam-taker devices, an
//! analysis consumer and observer consoles over a shared signaling channel.
//! The layout follows Domain-Driven Design: negotiation rules and the session
//! aggregate live in `domain`, the manager in `application`, and the
//! WebSocket and webrtc-rs adapters in `infrastructure`.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use application::{MediaStreamHandle, PeerSessionManager};
pub use domain::shared::error::{ErrorKind, SessionError};
pub use domain::shared::result::Result;
