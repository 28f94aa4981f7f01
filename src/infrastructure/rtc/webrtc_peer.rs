//! webrtc-rs backed peer connections

use crate::domain::negotiation::message::{IceCandidate, SdpKind, SessionDescription};
use crate::domain::negotiation::role::SessionKey;
use crate::domain::session::ports::{
    MediaTrack, PeerConnection, PeerConnectionFactory, PeerEvent, PeerEventSender, RemoteTrack,
};
use crate::domain::session::value_object::TransportState;
use crate::domain::shared::error::SessionError;
use crate::domain::shared::result::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

fn rtc_error(context: &str) -> impl Fn(webrtc::Error) -> SessionError + '_ {
    move |e| SessionError::Negotiation(format!("{}: {}", context, e))
}

/// Builds peer connections from one shared webrtc-rs API instance
pub struct WebRtcPeerFactory {
    api: API,
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcPeerFactory {
    pub fn new(ice_servers: Vec<RTCIceServer>) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(rtc_error("register codecs"))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(rtc_error("register interceptors"))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api, ice_servers })
    }

    fn configuration(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            bundle_policy: RTCBundlePolicy::MaxBundle,
            rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
            ..Default::default()
        }
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcPeerFactory {
    async fn create(
        &self,
        key: &SessionKey,
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerConnection>> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(self.configuration())
                .await
                .map_err(|e| SessionError::PeerConnection(e.to_string()))?,
        );

        let candidate_events = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let local = candidate.and_then(|c| match c.to_json() {
                Ok(init) => Some(IceCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_mline_index: init.sdp_mline_index,
                }),
                Err(e) => {
                    warn!("Dropping unserializable local candidate: {}", e);
                    None
                }
            });
            candidate_events.emit(PeerEvent::LocalCandidate(local));
            Box::pin(async {})
        }));

        let state_events = events.clone();
        let label = key.to_string();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            debug!("Peer connection {} state: {}", label, state);
            if let Some(transport) = transport_state(state) {
                state_events.emit(PeerEvent::TransportStateChanged(transport));
            }
            Box::pin(async {})
        }));

        let track_events = events;
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                info!("Remote {} track {} arrived", track.kind(), track.id());
                track_events.emit(PeerEvent::RemoteTrack(RemoteTrack {
                    id: track.id(),
                    stream_id: track.stream_id(),
                    kind: track.kind().to_string(),
                    inner: Some(track),
                }));
                Box::pin(async {})
            },
        ));

        Ok(Arc::new(WebRtcPeer { pc }))
    }
}

fn transport_state(state: RTCPeerConnectionState) -> Option<TransportState> {
    match state {
        RTCPeerConnectionState::New => Some(TransportState::New),
        RTCPeerConnectionState::Connecting => Some(TransportState::Connecting),
        RTCPeerConnectionState::Connected => Some(TransportState::Connected),
        RTCPeerConnectionState::Disconnected => Some(TransportState::Disconnected),
        RTCPeerConnectionState::Failed => Some(TransportState::Failed),
        RTCPeerConnectionState::Closed => Some(TransportState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription> {
    let result = match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
        SdpKind::Pranswer => RTCSessionDescription::pranswer(description.sdp),
        SdpKind::Rollback => {
            return Err(SessionError::Negotiation(
                "rollback descriptions are not supported".to_string(),
            ))
        }
    };
    result.map_err(rtc_error("parse description"))
}

fn from_rtc_description(description: RTCSessionDescription) -> Result<SessionDescription> {
    let kind = match description.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        RTCSdpType::Pranswer => SdpKind::Pranswer,
        RTCSdpType::Rollback => SdpKind::Rollback,
        RTCSdpType::Unspecified => {
            return Err(SessionError::Negotiation(
                "description without a type".to_string(),
            ))
        }
    };
    Ok(SessionDescription {
        kind,
        sdp: description.sdp,
    })
}

/// One webrtc-rs peer connection
pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(rtc_error("create offer"))?;
        from_rtc_description(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(rtc_error("create answer"))?;
        from_rtc_description(answer)
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.pc
            .set_local_description(to_rtc_description(description)?)
            .await
            .map_err(rtc_error("set local description"))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(to_rtc_description(description)?)
            .await
            .map_err(rtc_error("set remote description"))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            ..Default::default()
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(rtc_error("add candidate"))
    }

    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<()> {
        let local = track.rtc_track().ok_or_else(|| {
            SessionError::Negotiation(format!("track {} cannot be sent", track.id()))
        })?;

        let sender = self
            .pc
            .add_track(local)
            .await
            .map_err(rtc_error("add track"))?;

        // Inbound RTCP must be drained for interceptors (NACK, reports) to run
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pc
            .close()
            .await
            .map_err(|e| SessionError::PeerConnection(e.to_string()))
    }
}
