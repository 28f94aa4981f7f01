use proctorlink::application::{MediaStreamHandle, PeerSessionManager};
use proctorlink::config::Config;
use proctorlink::domain::negotiation::Role;
use proctorlink::domain::shared::value_objects::{LocalIdentity, StudentId};
use proctorlink::infrastructure::rtc::{SampleVideoSource, WebRtcPeerFactory};
use proctorlink::infrastructure::signaling::WebSocketConnector;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    // Initialize tracing; RUST_LOG wins over the configured filter
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting ProctorLink");
    info!("Signaling endpoint: {}", config.signaling.url);

    let identity = config.local_identity()?;
    let manager = PeerSessionManager::new(
        identity.clone(),
        config.manager_config(),
        Arc::new(WebSocketConnector::new(config.reconnect_policy())),
        Arc::new(WebRtcPeerFactory::new(config.ice_servers())?),
        Arc::new(SampleVideoSource::new(config.session.camera_enabled)),
    );
    let guard = manager.teardown_guard();

    let mut handles = Vec::new();
    match &identity {
        LocalIdentity::Student { student_id } => {
            info!("Student {} joining exam", student_id);
            handles.push(manager.start_session(Role::Analysis, None).await?);
            handles.push(manager.start_session(Role::Sender, None).await?);
        }
        LocalIdentity::Admin { .. } => {
            if config.identity.observe.is_empty() {
                warn!("No students to observe; set identity.observe");
            }
            for student in &config.identity.observe {
                let handle = manager
                    .start_session(Role::Viewer, Some(StudentId::new(student.as_str())))
                    .await?;
                handles.push(handle);
            }
            spawn_activity_log(&manager);
        }
    }

    for handle in handles {
        tokio::spawn(report_stream(handle));
    }

    info!("ProctorLink running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    guard.release().await;
    Ok(())
}

async fn report_stream(mut handle: MediaStreamHandle) {
    match handle.wait().await {
        Some(stream) => info!("Stream {} ready for {}", stream.track_id(), handle.key()),
        None => warn!("No stream for {}", handle.key()),
    }
}

fn spawn_activity_log(manager: &PeerSessionManager) {
    let mut activity = manager.subscribe_activity();
    tokio::spawn(async move {
        loop {
            match activity.recv().await {
                Ok(report) => info!(
                    "Suspicious activity #{} student={:?} at {}: {}",
                    report.id, report.student_id, report.timestamp, report.activity
                ),
                Err(RecvError::Lagged(missed)) => warn!("Missed {} activity reports", missed),
                Err(RecvError::Closed) => break,
            }
        }
    });
}
