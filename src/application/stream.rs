//! Per-session media stream handle handed to the UI

use crate::domain::negotiation::role::SessionKey;
use crate::domain::session::ports::{MediaTrack, RemoteTrack};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Media a session exposes: the local preview for sending roles, the
/// inbound stream for viewers
#[derive(Clone)]
pub enum MediaStream {
    Local(Arc<dyn MediaTrack>),
    Remote(RemoteTrack),
}

impl MediaStream {
    pub fn track_id(&self) -> &str {
        match self {
            MediaStream::Local(track) => track.id(),
            MediaStream::Remote(track) => &track.id,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, MediaStream::Remote(_))
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaStream::Local(track) => f.debug_tuple("Local").field(&track.id()).finish(),
            MediaStream::Remote(track) => f.debug_tuple("Remote").field(&track.id).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum StreamSlot {
    Pending,
    Ready(MediaStream),
    /// Media acquisition failed or the session ended with nothing to replace it
    Unavailable,
}

/// Resolves to the session's media once negotiation produces it
pub struct MediaStreamHandle {
    key: SessionKey,
    rx: watch::Receiver<StreamSlot>,
}

impl MediaStreamHandle {
    pub(crate) fn new(key: SessionKey, rx: watch::Receiver<StreamSlot>) -> Self {
        Self { key, rx }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn current(&self) -> StreamSlot {
        self.rx.borrow().clone()
    }

    /// Wait until the stream is ready; `None` if it never will be
    pub async fn wait(&mut self) -> Option<MediaStream> {
        loop {
            let slot = self.rx.borrow_and_update().clone();
            match slot {
                StreamSlot::Ready(stream) => return Some(stream),
                StreamSlot::Unavailable => return None,
                StreamSlot::Pending => {}
            }
            if self.rx.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Wait for the next update, e.g. a fresh stream after reconnection
    pub async fn changed(&mut self) -> Option<StreamSlot> {
        self.rx.changed().await.ok()?;
        let slot = self.rx.borrow_and_update().clone();
        Some(slot)
    }
}
