//! Typed change events, carrying the diff bitmask directly rather than
//! requiring a listener to diff before/after snapshots itself.

use std::sync::Arc;

use crate::error::RejectReason;
use crate::state::{ChannelChangeMask, UserChangeMask};

/// Why a `Disconnect` event fired.
#[derive(Debug, Clone)]
pub enum DisconnectReason {
    /// The application called `disconnect()`.
    User,
    /// A transport or protocol error tore the session down.
    Error(Arc<crate::error::Error>),
    /// The server sent a `Reject` during the handshake.
    Rejected(RejectReason),
}

#[derive(Debug, Clone)]
pub struct TextMessage {
    pub actor: Option<u32>,
    pub recipients: Vec<u32>,
    pub channels: Vec<u32>,
    pub trees: Vec<u32>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct AudioData {
    pub session: u32,
    pub pcm: Vec<i16>,
    pub sample_rate: u32,
    pub position: Option<(f32, f32, f32)>,
}

#[derive(Debug, Clone)]
pub struct ContextActionInvoked {
    pub session: Option<u32>,
    pub channel_id: Option<u32>,
    pub action: String,
}

#[derive(Debug, Clone)]
pub struct PermissionDenied {
    pub permission: u32,
    pub channel_id: Option<u32>,
    pub session: Option<u32>,
    pub reason: String,
    pub kind: PermissionDeniedKind,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PermissionDeniedKind {
    Permission,
    SuperUser,
    ChannelName,
    TextTooLong,
    H9K,
    TemporaryChannel,
    MissingCertificate,
    UserName,
    ChannelFull,
    NestingLimit,
    Other(i32),
}

#[derive(Debug, Clone)]
pub enum Event {
    /// The handshake finished and the client transitioned to `Synced`.
    Connect {
        welcome_message: String,
        session: u32,
        maximum_bitrate: u32,
    },

    /// Fired exactly once per connection, on reader termination.
    Disconnect { reason: DisconnectReason },

    TextMessage(TextMessage),

    /// A `UserState` update landed; `change` names which fields moved.
    UserChange { session: u32, change: UserChangeMask },

    UserRemove { session: u32, actor: Option<u32>, reason: String, banned: bool },

    /// A `ChannelState` update landed. `ChannelChangeMask::POSITION` tracks
    /// `position` as its own bit (see `DESIGN.md`).
    ChannelChange { channel_id: u32, change: ChannelChangeMask },

    ChannelRemove { channel_id: u32 },

    /// Decoded, jitter-buffered PCM ready for playback.
    AudioData(AudioData),

    ContextAction(ContextActionInvoked),

    PermissionDenied(PermissionDenied),

    /// A completed ACL, published once its `QueryUsers` reply has resolved
    /// every referenced name.
    AclChange { channel_id: u32 },

    /// `PermissionQuery`'s flush hint cleared this channel's cached
    /// permission bitmask.
    PermissionChange { channel_id: u32 },
}
