//! In-memory fakes of the channel, peer connection and media ports

#![allow(dead_code)]

use async_trait::async_trait;
use proctorlink::application::{ManagerConfig, PeerSessionManager};
use proctorlink::domain::negotiation::{
    Address, IceCandidate, MessageKind, SessionDescription, SessionKey, SignalingMessage,
};
use proctorlink::domain::session::{
    ChannelEvent, ChannelHandle, MediaConstraints, MediaSource, MediaTrack, PeerConnection,
    PeerConnectionFactory, PeerEvent, PeerEventSender, SignalingChannel, SignalingConnector,
};
use proctorlink::domain::shared::value_objects::{AdminId, LocalIdentity, StudentId};
use proctorlink::{Result, SessionError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

/// Poll a condition until it holds
#[macro_export]
macro_rules! eventually {
    ($cond:expr) => {{
        let mut reached = false;
        for _ in 0..400 {
            if $cond {
                reached = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(reached, "condition not reached: {}", stringify!($cond));
    }};
}

// ---------------------------------------------------------------------------
// Signaling

#[derive(Default)]
pub struct FakeChannel {
    sent: Mutex<Vec<SignalingMessage>>,
    connected: AtomicBool,
    disconnects: AtomicUsize,
}

impl FakeChannel {
    pub fn sent(&self) -> Vec<SignalingMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_of(&self, kind: MessageKind) -> Vec<SignalingMessage> {
        self.sent()
            .into_iter()
            .filter(|m| m.kind() == kind)
            .collect()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl SignalingChannel for FakeChannel {
    fn send(&self, message: SignalingMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(SessionError::Transport("not connected".to_string()));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct FakeConnector {
    channels: Mutex<Vec<(Arc<FakeChannel>, mpsc::UnboundedSender<ChannelEvent>)>>,
}

impl FakeConnector {
    pub fn connects(&self) -> usize {
        self.channels.lock().unwrap().len()
    }

    pub fn channel(&self) -> Arc<FakeChannel> {
        self.latest().0
    }

    fn latest(&self) -> (Arc<FakeChannel>, mpsc::UnboundedSender<ChannelEvent>) {
        self.channels
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no channel opened")
    }

    pub fn go_online(&self, generation: u64) {
        let (channel, events) = self.latest();
        channel.connected.store(true, Ordering::SeqCst);
        events.send(ChannelEvent::Connected { generation }).unwrap();
    }

    pub fn go_offline(&self, reason: &str) {
        let (channel, events) = self.latest();
        channel.connected.store(false, Ordering::SeqCst);
        events
            .send(ChannelEvent::Disconnected {
                reason: reason.to_string(),
            })
            .unwrap();
    }

    pub fn emit(&self, event: ChannelEvent) {
        let (_, events) = self.latest();
        events.send(event).unwrap();
    }

    pub fn deliver(&self, message: SignalingMessage) {
        self.emit(ChannelEvent::Message(message));
    }
}

impl SignalingConnector for FakeConnector {
    fn connect(&self, _endpoint: &str) -> ChannelHandle {
        let channel = Arc::new(FakeChannel::default());
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.lock().unwrap().push((channel.clone(), tx));
        ChannelHandle {
            channel,
            events: rx,
        }
    }
}

// ---------------------------------------------------------------------------
// Peer connections

pub struct FakePeer {
    pub key: SessionKey,
    ops: Mutex<Vec<String>>,
    events: PeerEventSender,
    closes: AtomicUsize,
}

impl FakePeer {
    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Simulate a transport callback
    pub fn emit(&self, event: PeerEvent) {
        self.events.emit(event);
    }

    fn log(&self, op: String) {
        self.ops.lock().unwrap().push(op);
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        self.log("create_offer".to_string());
        Ok(SessionDescription::offer(format!("offer-{}", self.key)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.log("create_answer".to_string());
        Ok(SessionDescription::answer(format!("answer-{}", self.key)))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.log(format!("set_local:{}", description.sdp));
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        if description.sdp == "bad" {
            return Err(SessionError::Negotiation("unparseable sdp".to_string()));
        }
        self.log(format!("set_remote:{}", description.sdp));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        if candidate.candidate == "bad" {
            return Err(SessionError::Negotiation("malformed candidate".to_string()));
        }
        self.log(format!("candidate:{}", candidate.candidate));
        Ok(())
    }

    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<()> {
        self.log(format!("add_track:{}", track.id()));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakePeerFactory {
    peers: Mutex<Vec<Arc<FakePeer>>>,
}

impl FakePeerFactory {
    pub fn all(&self) -> Vec<Arc<FakePeer>> {
        self.peers.lock().unwrap().clone()
    }

    pub fn for_key(&self, key: &SessionKey) -> Vec<Arc<FakePeer>> {
        self.all().into_iter().filter(|p| &p.key == key).collect()
    }

    pub fn latest(&self, key: &SessionKey) -> Arc<FakePeer> {
        self.for_key(key).pop().expect("no peer for key")
    }
}

#[async_trait]
impl PeerConnectionFactory for FakePeerFactory {
    async fn create(
        &self,
        key: &SessionKey,
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerConnection>> {
        let peer = Arc::new(FakePeer {
            key: key.clone(),
            ops: Mutex::new(Vec::new()),
            events,
            closes: AtomicUsize::new(0),
        });
        self.peers.lock().unwrap().push(peer.clone());
        Ok(peer)
    }
}

// ---------------------------------------------------------------------------
// Media

pub struct FakeTrack {
    id: String,
    stops: AtomicUsize,
}

impl FakeTrack {
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl MediaTrack for FakeTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stops() > 0
    }
}

#[derive(Default)]
pub struct FakeMedia {
    deny: AtomicBool,
    gate: Mutex<Option<Arc<Notify>>>,
    issued: Mutex<Vec<Arc<FakeTrack>>>,
}

impl FakeMedia {
    pub fn deny(&self) {
        self.deny.store(true, Ordering::SeqCst);
    }

    /// Hold every acquisition until the returned notify fires
    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn issued(&self) -> Vec<Arc<FakeTrack>> {
        self.issued.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaSource for FakeMedia {
    async fn acquire(&self, _constraints: MediaConstraints) -> Result<Arc<dyn MediaTrack>> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.deny.load(Ordering::SeqCst) {
            return Err(SessionError::MediaAcquisition("permission denied".to_string()));
        }

        let mut issued = self.issued.lock().unwrap();
        let track = Arc::new(FakeTrack {
            id: format!("camera-{}", issued.len()),
            stops: AtomicUsize::new(0),
        });
        issued.push(track.clone());
        Ok(track)
    }
}

// ---------------------------------------------------------------------------
// Harness

pub struct Harness {
    pub manager: PeerSessionManager,
    pub connector: Arc<FakeConnector>,
    pub peers: Arc<FakePeerFactory>,
    pub media: Arc<FakeMedia>,
}

impl Harness {
    pub fn new(identity: LocalIdentity) -> Self {
        Self::with_timeout(identity, Duration::from_secs(30))
    }

    pub fn with_timeout(identity: LocalIdentity, timeout: Duration) -> Self {
        let connector = Arc::new(FakeConnector::default());
        let peers = Arc::new(FakePeerFactory::default());
        let media = Arc::new(FakeMedia::default());

        let manager = PeerSessionManager::new(
            identity,
            ManagerConfig::new("ws://signaling.test").with_negotiation_timeout(timeout),
            connector.clone(),
            peers.clone(),
            media.clone(),
        );

        Self {
            manager,
            connector,
            peers,
            media,
        }
    }

    pub fn student(id: &str) -> Self {
        Self::new(LocalIdentity::student(id))
    }

    pub fn admin(id: Option<&str>) -> Self {
        Self::new(LocalIdentity::admin(id))
    }
}

// ---------------------------------------------------------------------------
// Messages

pub fn offer_from_student(student: &str, sdp: &str) -> SignalingMessage {
    SignalingMessage::Offer {
        description: SessionDescription::offer(sdp),
        address: Address::student(StudentId::from(student)),
    }
}

pub fn offer_from_admin(student: &str, admin: &str) -> SignalingMessage {
    SignalingMessage::Offer {
        description: SessionDescription::offer(format!("admin-offer-{}", admin)),
        address: Address::from_admin(StudentId::from(student), Some(AdminId::new(admin))),
    }
}

pub fn answer_to(student: &str, sdp: &str) -> SignalingMessage {
    SignalingMessage::Answer {
        description: SessionDescription::answer(sdp),
        address: Address::student(StudentId::from(student)),
    }
}

pub fn candidate_to(student: &str, candidate: &str) -> SignalingMessage {
    SignalingMessage::Candidate {
        candidate: IceCandidate::new(candidate),
        address: Address::student(StudentId::from(student)),
    }
}

pub fn analysis_candidate_to(student: &str, candidate: &str) -> SignalingMessage {
    SignalingMessage::Candidate {
        candidate: IceCandidate::new(candidate),
        address: Address::analysis(StudentId::from(student)),
    }
}
