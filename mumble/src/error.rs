use thiserror::Error;

/// The reason a `Reject` packet gave for refusing authentication.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RejectReason {
    pub kind: RejectKind,
    pub reason: String,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RejectKind {
    None,
    WrongVersion,
    InvalidUsername,
    WrongUserPassword,
    WrongServerPassword,
    UsernameInUse,
    ServerFull,
    NoCertificate,
    AuthenticatorFail,
    Other(i32),
}

/// Top-level error taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid user input: a bad audio interval, an out-of-range voice
    /// target id, etc.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// TCP/TLS read/write failure, read-deadline exceeded, or a frame length
    /// that exceeds the configured maximum.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Missing required protobuf field, unknown reference (e.g. a channel id
    /// not present in the store), a malformed varint, or an unexpected audio
    /// format.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Encoder/decoder failure in the audio pipelines.
    #[error("codec error: {0}")]
    Codec(String),

    /// The requested operation is not valid for the client's current
    /// lifecycle state (connect while connected, pause while not playing...).
    #[error("invalid state: {0}")]
    State(String),

    /// The server rejected authentication.
    #[error("rejected by server: {0:?} {1}", .0.kind, .0.reason)]
    Rejected(RejectReason),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] tokio_rustls::rustls::Error),

    #[error("packet length {len} exceeds maximum of {max}")]
    PacketTooLarge { len: u32, max: u32 },

    #[error("read deadline exceeded")]
    ReadTimeout,

    #[error("connection closed")]
    Closed,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
