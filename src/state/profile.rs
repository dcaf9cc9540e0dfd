//! VPN profile types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Transport protocol for the tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transport {
    /// UDP transport (OpenVPN default).
    #[default]
    Udp,
    /// TCP transport.
    Tcp,
    /// Explicit TCP client mode.
    TcpClient,
}

impl Transport {
    /// Parse a `proto` directive argument.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::UnsupportedProtocol`] for anything outside
    /// {udp, tcp, tcp-client}.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Ok(Transport::Udp),
            "tcp" => Ok(Transport::Tcp),
            "tcp-client" => Ok(Transport::TcpClient),
            other => Err(ParseError::UnsupportedProtocol(other.to_string())),
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Udp => write!(f, "udp"),
            Transport::Tcp => write!(f, "tcp"),
            Transport::TcpClient => write!(f, "tcp-client"),
        }
    }
}

/// Username/password authentication mode.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthUserPass {
    /// No username/password authentication.
    #[default]
    None,
    /// Bare `auth-user-pass`: credentials prompted interactively.
    Prompt,
    /// `auth-user-pass <path>`: credentials read from a file.
    File(String),
}

/// One remote server endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remote {
    pub host: String,
    pub port: u16,
}

/// Parsed, validated, persistable representation of an OpenVPN client
/// configuration.
///
/// `validated` reflects the most recent validation pass and is authoritative
/// for whether the profile may be connected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpnProfile {
    /// Stable id derived from the source file stem plus import timestamp.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Source filename at import time.
    pub source_file: String,
    /// Remote endpoints in configuration order.
    pub remotes: Vec<Remote>,
    /// Default port applied to `remote` lines without an explicit port.
    pub default_port: u16,
    pub transport: Transport,
    /// Virtual device type (`tun`/`tap`; membership enforced at validation).
    pub device: String,
    pub cipher: Option<String>,
    /// HMAC digest (`auth` directive).
    pub auth_digest: Option<String>,
    pub tls_version_min: Option<String>,
    pub remote_cert_eku: Option<String>,
    /// Inline CA certificate in PEM form.
    pub ca: Option<String>,
    /// Inline client certificate in PEM form.
    pub cert: Option<String>,
    /// Inline client private key in PEM form.
    pub key: Option<String>,
    pub auth_user_pass: AuthUserPass,
    /// Keepalive `(interval, timeout)` seconds.
    pub keepalive: Option<(u32, u32)>,
    pub verb: u32,
    pub mute: Option<u32>,
    pub reneg_sec: Option<u32>,
    pub float: bool,
    pub nobind: bool,
    pub persist_key: bool,
    pub persist_tun: bool,
    pub mute_replay_warnings: bool,
    /// Compression mode; bare `comp-lzo` maps to `adaptive`.
    pub comp_lzo: Option<String>,
    /// Unrecognized directives, order of first appearance preserved.
    pub extras: Vec<(String, String)>,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    /// Verdict of the most recent validation pass.
    pub validated: bool,
    pub validation_error: Option<String>,
    pub priority: i32,
    pub active: bool,
}

impl VpnProfile {
    /// Fresh profile with OpenVPN defaults, prior to directive parsing.
    pub fn new(id: String, name: String, source_file: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            source_file,
            remotes: Vec::new(),
            default_port: 1194,
            transport: Transport::default(),
            device: "tun".to_string(),
            cipher: None,
            auth_digest: None,
            tls_version_min: None,
            remote_cert_eku: None,
            ca: None,
            cert: None,
            key: None,
            auth_user_pass: AuthUserPass::default(),
            keepalive: None,
            verb: 3,
            mute: None,
            reneg_sec: None,
            float: false,
            nobind: false,
            persist_key: false,
            persist_tun: false,
            mute_replay_warnings: false,
            comp_lzo: None,
            extras: Vec::new(),
            created_at: now,
            last_modified: now,
            validated: false,
            validation_error: None,
            priority: 5,
            active: false,
        }
    }
}
