//! Application layer - the session manager and the handles it gives the UI

pub mod session_manager;
pub mod stream;

pub use session_manager::{
    ManagerConfig, ManagerEvent, PeerSessionManager, SessionSnapshot, TeardownGuard,
};
pub use stream::{MediaStream, MediaStreamHandle, StreamSlot};
