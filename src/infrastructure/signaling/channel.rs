//! WebSocket signaling channel with automatic reconnection

use crate::domain::negotiation::message::SignalingMessage;
use crate::domain::session::ports::{
    ChannelEvent, ChannelHandle, SignalingChannel, SignalingConnector,
};
use crate::domain::shared::error::SessionError;
use crate::domain::shared::result::Result;
use crate::infrastructure::signaling::codec;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Retry budget and backoff for (re)connecting
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts before giving up
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl ReconnectPolicy {
    /// Exponential backoff for the given 1-based attempt, plus up to 25% jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let backoff = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        let jitter_ceiling = (backoff.as_millis() / 4) as u64;
        let jitter = if jitter_ceiling == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ceiling)
        };
        backoff + Duration::from_millis(jitter)
    }
}

/// Opens WebSocket channels; each channel runs its own connection task
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    policy: ReconnectPolicy,
}

impl WebSocketConnector {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy }
    }
}

impl SignalingConnector for WebSocketConnector {
    fn connect(&self, endpoint: &str) -> ChannelHandle {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connected = Arc::new(AtomicBool::new(false));

        let channel = Arc::new(WebSocketChannel {
            outbound: outbound_tx,
            connected: connected.clone(),
            shutdown: shutdown_tx,
        });

        tokio::spawn(run_connection(
            endpoint.to_string(),
            self.policy.clone(),
            outbound_rx,
            event_tx,
            connected,
            shutdown_rx,
        ));

        ChannelHandle {
            channel,
            events: event_rx,
        }
    }
}

/// Sending half of a WebSocket signaling channel
pub struct WebSocketChannel {
    outbound: mpsc::UnboundedSender<String>,
    connected: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
}

impl SignalingChannel for WebSocketChannel {
    fn send(&self, message: SignalingMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(SessionError::Transport(format!(
                "Cannot send {}: signaling channel not connected",
                message.kind()
            )));
        }

        let frame = codec::encode(&message)?;
        self.outbound
            .send(frame)
            .map_err(|_| SessionError::Transport("Signaling channel closed".to_string()))
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.shutdown.send_replace(true);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

enum PumpExit {
    Shutdown,
    Lost(String),
}

async fn run_connection(
    endpoint: String,
    policy: ReconnectPolicy,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    connected: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut generation = 0u64;
    let mut failures = 0u32;

    loop {
        if *shutdown.borrow() {
            break;
        }

        debug!("Connecting to signaling server {}", endpoint);
        let attempt = tokio::select! {
            result = connect_async(endpoint.as_str()) => result,
            _ = shutdown.changed() => break,
        };

        match attempt {
            Ok((stream, _)) => {
                failures = 0;
                // Frames queued for a previous connection are meaningless now
                while outbound.try_recv().is_ok() {}

                generation += 1;
                connected.store(true, Ordering::SeqCst);
                info!("Signaling connected to {} (generation {})", endpoint, generation);
                if events.send(ChannelEvent::Connected { generation }).is_err() {
                    break;
                }

                let exit = pump(stream, &mut outbound, &events, &mut shutdown).await;
                connected.store(false, Ordering::SeqCst);

                match exit {
                    PumpExit::Shutdown => break,
                    PumpExit::Lost(reason) => {
                        warn!("Signaling connection lost: {}", reason);
                        if events.send(ChannelEvent::Disconnected { reason }).is_err() {
                            break;
                        }
                        tokio::select! {
                            _ = tokio::time::sleep(policy.delay_for(1)) => {}
                            _ = shutdown.changed() => break,
                        }
                    }
                }
            }
            Err(e) => {
                failures += 1;
                warn!(
                    "Signaling connect attempt {}/{} failed: {}",
                    failures, policy.max_attempts, e
                );
                let _ = events.send(ChannelEvent::ConnectError {
                    attempt: failures,
                    message: e.to_string(),
                });

                if failures >= policy.max_attempts {
                    error!("Giving up on signaling server {} after {} attempts", endpoint, failures);
                    break;
                }

                let delay = policy.delay_for(failures);
                debug!("Retrying in {:?}", delay);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
    let _ = events.send(ChannelEvent::Terminated);
    debug!("Signaling task for {} finished", endpoint);
}

async fn pump(
    stream: WsStream,
    outbound: &mut mpsc::UnboundedReceiver<String>,
    events: &mpsc::UnboundedSender<ChannelEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> PumpExit {
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = write.send(Message::Close(None)).await;
                return PumpExit::Shutdown;
            }
            frame = outbound.recv() => match frame {
                Some(text) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        return PumpExit::Lost(e.to_string());
                    }
                }
                None => return PumpExit::Shutdown,
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => match codec::decode(&text) {
                    Ok(message) => {
                        debug!("Received {} frame", message.kind());
                        if events.send(ChannelEvent::Message(message)).is_err() {
                            return PumpExit::Shutdown;
                        }
                    }
                    Err(e) => warn!("Skipping signaling frame: {}", e),
                },
                Some(Ok(Message::Close(frame))) => {
                    return PumpExit::Lost(format!("closed by server: {:?}", frame));
                }
                // tungstenite answers pings on its own
                Some(Ok(_)) => {}
                Some(Err(e)) => return PumpExit::Lost(e.to_string()),
                None => return PumpExit::Lost("stream ended".to_string()),
            },
        }
    }
}
