//! Local camera track and the media source handing them out

use crate::domain::session::ports::{MediaConstraints, MediaSource, MediaTrack};
use crate::domain::shared::error::SessionError;
use crate::domain::shared::result::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use webrtc::api::media_engine::MIME_TYPE_VP8;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

const STREAM_ID: &str = "proctorlink-camera";

/// VP8 video track fed with encoded frames by the capture pipeline
pub struct LocalVideoTrack {
    id: String,
    track: Arc<TrackLocalStaticSample>,
    stopped: AtomicBool,
}

impl LocalVideoTrack {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                ..Default::default()
            },
            id.clone(),
            STREAM_ID.to_owned(),
        ));

        Self {
            id,
            track,
            stopped: AtomicBool::new(false),
        }
    }

    /// Push one encoded frame
    pub async fn write_frame(&self, data: Bytes, duration: Duration) -> Result<()> {
        if self.is_stopped() {
            return Err(SessionError::MediaAcquisition(format!(
                "track {} is stopped",
                self.id
            )));
        }

        self.track
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await
            .map_err(|e| SessionError::MediaAcquisition(e.to_string()))
    }
}

impl MediaTrack for LocalVideoTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            info!("Camera track {} released", self.id);
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn rtc_track(&self) -> Option<Arc<dyn TrackLocal + Send + Sync>> {
        Some(self.track.clone())
    }
}

/// Hands out camera tracks; a disabled source behaves like denied permission
pub struct SampleVideoSource {
    enabled: bool,
    issued: AtomicU64,
}

impl SampleVideoSource {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            issued: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl MediaSource for SampleVideoSource {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<Arc<dyn MediaTrack>> {
        if !constraints.video {
            return Err(SessionError::MediaAcquisition(
                "no video requested".to_string(),
            ));
        }
        if !self.enabled {
            return Err(SessionError::MediaAcquisition(
                "camera access denied".to_string(),
            ));
        }
        if constraints.audio {
            debug!("Audio capture is not supported, sending video only");
        }

        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        let track = LocalVideoTrack::new(format!("camera-{}", n));
        info!("Camera track {} acquired", track.id());
        Ok(Arc::new(track))
    }
}
