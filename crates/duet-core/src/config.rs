//! Client and relay configuration.
//!
//! Loaded from environment variables. The access token is redacted in Debug
//! output.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::net::SocketAddr;

use crate::domain::call::GlarePolicy;
use crate::domain::identity::{ChannelName, PeerId};
use crate::error::ConfigError;

/// Default relay address clients connect to.
pub const DEFAULT_RELAY_ADDR: &str = "127.0.0.1:4433";

/// Default relay bind address.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:4433";

/// TLS server name presented by the relay's self-signed certificate.
pub const DEFAULT_SERVER_NAME: &str = "localhost";

pub const DEFAULT_CHANNEL: &str = "duet";

// ---------------------------------------------------------------------------
// Media engine
// ---------------------------------------------------------------------------

/// Externally provisioned media engine credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub app_id: String,
    pub channel: ChannelName,
    pub token: String,
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("app_id", &self.app_id)
            .field("channel", &self.channel)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl EngineConfig {
    pub fn new(app_id: impl Into<String>, channel: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            channel: ChannelName(channel.into()),
            token: token.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub relay_addr: SocketAddr,
    pub server_name: String,
    pub engine: EngineConfig,
    /// Fixed local id; a random one is generated when absent.
    pub peer_id: Option<PeerId>,
    pub glare_policy: GlarePolicy,
}

impl ClientConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let app_id = vars
            .get("DUET_APP_ID")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("DUET_APP_ID".to_string()))?
            .clone();

        let channel = vars
            .get("DUET_CHANNEL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_CHANNEL.to_string());

        let token = vars.get("DUET_TOKEN").cloned().unwrap_or_default();

        let relay_addr = parse_addr(vars, "DUET_RELAY_ADDR", DEFAULT_RELAY_ADDR)?;

        let server_name = vars
            .get("DUET_SERVER_NAME")
            .cloned()
            .unwrap_or_else(|| DEFAULT_SERVER_NAME.to_string());

        let peer_id = vars
            .get("DUET_PEER_ID")
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(PeerId::from);

        let glare_policy = match vars.get("DUET_GLARE_POLICY") {
            Some(raw) => raw
                .parse::<GlarePolicy>()
                .map_err(|e| ConfigError::InvalidValue(e.to_string()))?,
            None => GlarePolicy::default(),
        };

        Ok(Self {
            relay_addr,
            server_name,
            engine: EngineConfig::new(app_id, channel, token),
            peer_id,
            glare_policy,
        })
    }
}

// ---------------------------------------------------------------------------
// Relay server
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// When set, room joins must present this app id.
    pub app_id: Option<String>,
    /// When set, room joins must present this token.
    pub token: Option<String>,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("app_id", &self.app_id)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Ok(Self {
            bind_addr: parse_addr(vars, "DUET_BIND_ADDR", DEFAULT_BIND_ADDR)?,
            app_id: vars.get("DUET_APP_ID").filter(|v| !v.is_empty()).cloned(),
            token: vars.get("DUET_TOKEN").filter(|v| !v.is_empty()).cloned(),
        })
    }
}

fn parse_addr(
    vars: &HashMap<String, String>,
    name: &str,
    default: &str,
) -> Result<SocketAddr, ConfigError> {
    let raw = vars.get(name).map(String::as_str).unwrap_or(default);
    raw.parse()
        .map_err(|e| ConfigError::InvalidValue(format!("{name}='{raw}': {e}")))
}
