//! An async Mumble voice-chat client library built on tokio.
//!
//! [`Client::connect`] handles the TCP/TLS handshake and login, then hands
//! back a cheaply-cloneable [`Client`] whose reader task keeps a replicated
//! copy of the server's state ([`Store`]) up to date and delivers [`Event`]s
//! and [`AudioData`] to any listeners attached with
//! [`Client::on_event`]/[`Client::on_audio`].

mod audio_frame;
mod audio_in;
mod audio_out;
mod certlock;
mod client;
mod codec;
mod config;
mod control;
mod dispatch;
pub mod error;
mod event;
mod eventmux;
mod ping;
mod state;
mod transport;
mod varint;
mod version;
mod voice_target;

pub use audio_in::DrainOutcome;
pub use audio_out::AudioChunk;
pub use certlock::CertLock;
pub use client::{Client, ClientState, PingStats};
pub use codec::{AudioDecoder, AudioEncoder, OpusAudioDecoder, OpusAudioEncoder, AUDIO_MAX_FRAME_SIZE};
pub use config::{AudioInterval, EventListener, MumbleConfig, TlsVerify};
pub use error::{Error, RejectKind, RejectReason, Result, TransportError};
pub use event::{
    AudioData, ContextActionInvoked, DisconnectReason, Event, PermissionDenied, PermissionDeniedKind,
    TextMessage,
};
pub use eventmux::Handle as ListenerHandle;
pub use ping::{ping, PingResponse};
pub use state::{
    Acl, AclGroup, AclRule, Ban, Channel, ChannelChangeMask, ContextAction, ContextActionRegistry,
    Description, PendingAcl, Store, User, UserChangeMask,
};
pub use version::Version;
pub use voice_target::{VoiceTarget, VoiceTargetChannel, VoiceTargetRegistry, LOOPBACK};
