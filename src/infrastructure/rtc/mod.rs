//! Peer connections and local media backed by webrtc-rs

pub mod media;
pub mod webrtc_peer;

pub use media::{LocalVideoTrack, SampleVideoSource};
pub use webrtc_peer::{WebRtcPeer, WebRtcPeerFactory};
