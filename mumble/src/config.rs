//! Client configuration. Every option defaults so that
//! `MumbleConfig::new(address, username)` alone is enough to connect.

use std::sync::Arc;
use std::time::Duration;

use rustls::{ClientConfig, RootCertStore};

use crate::error::{Error, Result};
use crate::event::Event;

/// Cadence at which outgoing audio frames are emitted. Mumble only accepts
/// these four intervals.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AudioInterval {
    Ms10,
    Ms20,
    Ms40,
    Ms60,
}

impl AudioInterval {
    pub fn as_duration(self) -> Duration {
        match self {
            AudioInterval::Ms10 => Duration::from_millis(10),
            AudioInterval::Ms20 => Duration::from_millis(20),
            AudioInterval::Ms40 => Duration::from_millis(40),
            AudioInterval::Ms60 => Duration::from_millis(60),
        }
    }

    pub fn from_millis(ms: u64) -> Result<Self> {
        match ms {
            10 => Ok(AudioInterval::Ms10),
            20 => Ok(AudioInterval::Ms20),
            40 => Ok(AudioInterval::Ms40),
            60 => Ok(AudioInterval::Ms60),
            other => Err(Error::Config(format!(
                "audio interval must be one of 10, 20, 40, 60 ms, got {other}"
            ))),
        }
    }
}

impl Default for AudioInterval {
    fn default() -> Self {
        AudioInterval::Ms10
    }
}

/// Optional post-handshake verifier: given the peer's certificate chain,
/// return `Ok(())` to accept the connection or an error to abort it. Runs
/// after rustls's own verification succeeds, so it can only add scrutiny
/// (pinning, CA allowlists), never bypass it.
pub type TlsVerify = Arc<dyn Fn(&[rustls::Certificate]) -> Result<()> + Send + Sync>;

/// A listener for events raised during the handshake window itself, before
/// `Client::connect` has a client to hand back for `Client::on_event`. The
/// only event this ever delivers is `Disconnect { reason: Rejected(..) }`,
/// since every other handshake-window event either has no externally
/// observable effect yet or is the `Connect` that `connect` itself reports
/// via its return value.
pub type EventListener = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Clone)]
pub struct MumbleConfig {
    pub username: String,
    pub password: String,
    pub address: String,
    pub tokens: Vec<String>,
    pub audio_interval: AudioInterval,
    pub audio_data_bytes: usize,
    pub tls_config: Option<Arc<ClientConfig>>,
    pub tls_verify: Option<TlsVerify>,
    pub dialer_timeout: Duration,
    pub on_event: Option<EventListener>,
}

impl MumbleConfig {
    /// The only two options every connection needs; everything else takes
    /// its documented default.
    pub fn new(address: impl Into<String>, username: impl Into<String>) -> Self {
        MumbleConfig {
            username: username.into(),
            password: String::new(),
            address: address.into(),
            tokens: Vec::new(),
            audio_interval: AudioInterval::default(),
            audio_data_bytes: 40,
            tls_config: None,
            tls_verify: None,
            dialer_timeout: Duration::from_secs(20),
            on_event: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_tokens(mut self, tokens: Vec<String>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_audio_interval(mut self, interval: AudioInterval) -> Self {
        self.audio_interval = interval;
        self
    }

    pub fn with_audio_data_bytes(mut self, bytes: usize) -> Self {
        self.audio_data_bytes = bytes;
        self
    }

    pub fn with_tls_config(mut self, config: Arc<ClientConfig>) -> Self {
        self.tls_config = Some(config);
        self
    }

    pub fn with_tls_verify(mut self, verify: TlsVerify) -> Self {
        self.tls_verify = Some(verify);
        self
    }

    pub fn with_dialer_timeout(mut self, timeout: Duration) -> Self {
        self.dialer_timeout = timeout;
        self
    }

    pub fn with_on_event(mut self, listener: EventListener) -> Self {
        self.on_event = Some(listener);
        self
    }

    /// Splits `address` into a `(host, port)` pair, defaulting the port to
    /// Mumble's standard TCP control port, 64738 — the same default port
    /// the UDP ping probe uses.
    pub fn host_port(&self) -> (&str, u16) {
        match self.address.rsplit_once(':') {
            Some((host, port)) => match port.parse() {
                Ok(port) => (host, port),
                Err(_) => (self.address.as_str(), 64738),
            },
            None => (self.address.as_str(), 64738),
        }
    }

    /// Builds the rustls `ClientConfig` to use for the handshake: either the
    /// caller-supplied one or a platform-default root store built from
    /// `webpki-roots`.
    pub fn resolve_tls_config(&self) -> Arc<ClientConfig> {
        if let Some(config) = &self.tls_config {
            return Arc::clone(config);
        }

        let mut roots = RootCertStore::empty();
        roots.add_server_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.0.iter().map(|ta| {
            rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
                ta.subject,
                ta.spki,
                ta.name_constraints,
            )
        }));

        Arc::new(
            ClientConfig::builder()
                .with_safe_defaults()
                .with_root_certificates(roots)
                .with_no_client_auth(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_has_every_default() {
        let config = MumbleConfig::new("example.org", "alice");
        assert_eq!(config.password, "");
        assert!(config.tokens.is_empty());
        assert_eq!(config.audio_interval, AudioInterval::Ms10);
        assert_eq!(config.audio_data_bytes, 40);
        assert_eq!(config.dialer_timeout, Duration::from_secs(20));
        assert!(config.on_event.is_none());
    }

    #[test]
    fn host_port_defaults_to_64738() {
        let config = MumbleConfig::new("example.org", "alice");
        assert_eq!(config.host_port(), ("example.org", 64738));
    }

    #[test]
    fn host_port_parses_explicit_port() {
        let config = MumbleConfig::new("example.org:12345", "alice");
        assert_eq!(config.host_port(), ("example.org", 12345));
    }

    #[test]
    fn audio_interval_rejects_unsupported_values() {
        assert!(AudioInterval::from_millis(25).is_err());
        assert!(AudioInterval::from_millis(60).is_ok());
    }
}
