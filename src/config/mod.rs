//! Configuration management
//!
//! Defaults, then an optional TOML file, then `PROCTOR__SECTION__KEY`
//! environment variables.

use crate::application::session_manager::ManagerConfig;
use crate::domain::session::ports::MediaConstraints;
use crate::domain::shared::error::SessionError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::LocalIdentity;
use crate::infrastructure::signaling::ReconnectPolicy;
use config::{Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use webrtc::ice_transport::ice_server::RTCIceServer;

const DEFAULT_FILE: &str = "proctorlink";
const ENV_PREFIX: &str = "PROCTOR";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub signaling: SignalingConfig,
    pub ice: IceConfig,
    pub session: SessionConfig,
    pub identity: IdentityConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    pub url: String,
    pub reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceConfig {
    pub servers: Vec<IceServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub negotiation_timeout_secs: u64,
    /// Off behaves like a denied camera permission
    pub camera_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    Student,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub kind: IdentityKind,
    /// Student id, or the server-assigned admin id if known
    #[serde(default)]
    pub id: Option<String>,
    /// Students an admin console observes on startup
    #[serde(default)]
    pub observe: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            signaling: SignalingConfig {
                url: "ws://localhost:8000/signaling".to_string(),
                reconnect_attempts: 5,
                reconnect_base_delay_ms: 500,
                reconnect_max_delay_ms: 10_000,
            },
            ice: IceConfig {
                servers: vec![IceServerConfig {
                    urls: vec![
                        "stun:stun.l.google.com:19302".to_string(),
                        "stun:stun1.l.google.com:19302".to_string(),
                    ],
                    username: None,
                    credential: None,
                }],
            },
            session: SessionConfig {
                negotiation_timeout_secs: 30,
                camera_enabled: true,
            },
            identity: IdentityConfig {
                kind: IdentityKind::Admin,
                id: None,
                observe: Vec::new(),
            },
            logging: LoggingConfig {
                filter: "info".to_string(),
            },
        }
    }
}

impl Config {
    /// Load from `path` (or `proctorlink.toml` if present) and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, environment())
    }

    fn load_with(path: Option<&Path>, env: Environment) -> Result<Self> {
        let defaults = config::Config::try_from(&Config::default()).map_err(config_error)?;
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_FILE).required(false),
        };

        let config: Config = config::Config::builder()
            .add_source(defaults)
            .add_source(file)
            .add_source(env)
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(config_error)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.signaling.url.trim();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return invalid(format!("signaling.url must be a ws:// or wss:// URL, got {:?}", url));
        }
        if self.signaling.reconnect_attempts == 0 {
            return invalid("signaling.reconnect_attempts must be at least 1");
        }
        if self.session.negotiation_timeout_secs == 0 {
            return invalid("session.negotiation_timeout_secs must be positive");
        }
        for server in &self.ice.servers {
            let turn = server.urls.iter().any(|u| u.starts_with("turn:") || u.starts_with("turns:"));
            if turn && (server.username.is_none() || server.credential.is_none()) {
                return invalid(format!("TURN server {:?} needs username and credential", server.urls));
            }
        }
        self.local_identity().map(|_| ())
    }

    pub fn local_identity(&self) -> Result<LocalIdentity> {
        match self.identity.kind {
            IdentityKind::Student => match self.identity.id.as_deref() {
                Some(id) if !id.trim().is_empty() => Ok(LocalIdentity::student(id.trim())),
                _ => Err(SessionError::Config(
                    "identity.id is required for students".to_string(),
                )),
            },
            IdentityKind::Admin => Ok(LocalIdentity::admin(self.identity.id.as_deref())),
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            endpoint: self.signaling.url.clone(),
            negotiation_timeout: Duration::from_secs(self.session.negotiation_timeout_secs),
            media_constraints: MediaConstraints::default(),
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.signaling.reconnect_attempts,
            base_delay: Duration::from_millis(self.signaling.reconnect_base_delay_ms),
            max_delay: Duration::from_millis(self.signaling.reconnect_max_delay_ms),
        }
    }

    pub fn ice_servers(&self) -> Vec<RTCIceServer> {
        self.ice
            .servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect()
    }
}

/// `PROCTOR__IDENTITY__OBSERVE=42,43` fills the observe list
fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("identity.observe")
        .try_parsing(true)
}

fn invalid(message: impl Into<String>) -> Result<()> {
    Err(SessionError::Config(message.into()))
}

fn config_error(e: config::ConfigError) -> SessionError {
    SessionError::Config(e.to_string())
}
