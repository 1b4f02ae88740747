//! The control-message codec: the fixed, 0-25 opcode table and the
//! protobuf marshal/unmarshal step for each payload. Opcode 1 (the audio
//! tunnel) never reaches this module — [`crate::transport`] dispatches it
//! straight to [`crate::audio_frame`].
//!
//! This crate hand-rolls the table and the framing rather than going
//! through `mumble-protocol-2x`'s own `Framed`/codec integration; it
//! only borrows that crate's generated `msgs` payload types and uses the
//! `protobuf` crate directly to call `write_to_bytes`/`parse_from_bytes` on
//! them.

use mumble_protocol::control::msgs;
use protobuf::Message as _;

use crate::error::{Error, Result};

/// One decoded control message, tagged by the opcode it travelled under.
/// Every variant boxes its payload so the enum stays a handful of words
/// regardless of how large an individual message (e.g. `UserState`) gets.
#[derive(Debug, Clone)]
pub enum ControlMessage {
    Version(Box<msgs::Version>),
    Authenticate(Box<msgs::Authenticate>),
    Ping(Box<msgs::Ping>),
    Reject(Box<msgs::Reject>),
    ServerSync(Box<msgs::ServerSync>),
    ChannelRemove(Box<msgs::ChannelRemove>),
    ChannelState(Box<msgs::ChannelState>),
    UserRemove(Box<msgs::UserRemove>),
    UserState(Box<msgs::UserState>),
    BanList(Box<msgs::BanList>),
    TextMessage(Box<msgs::TextMessage>),
    PermissionDenied(Box<msgs::PermissionDenied>),
    Acl(Box<msgs::ACL>),
    QueryUsers(Box<msgs::QueryUsers>),
    CryptSetup(Box<msgs::CryptSetup>),
    ContextActionModify(Box<msgs::ContextActionModify>),
    ContextAction(Box<msgs::ContextAction>),
    UserList(Box<msgs::UserList>),
    VoiceTarget(Box<msgs::VoiceTarget>),
    PermissionQuery(Box<msgs::PermissionQuery>),
    CodecVersion(Box<msgs::CodecVersion>),
    UserStats(Box<msgs::UserStats>),
    RequestBlob(Box<msgs::RequestBlob>),
    ServerConfig(Box<msgs::ServerConfig>),
    SuggestConfig(Box<msgs::SuggestConfig>),
}

impl ControlMessage {
    /// The opcode this message travels under. Opcode 1
    /// (audio tunnel) is deliberately absent — it never becomes a
    /// `ControlMessage`.
    pub fn opcode(&self) -> u16 {
        use ControlMessage::*;
        match self {
            Version(_) => 0,
            Authenticate(_) => 2,
            Ping(_) => 3,
            Reject(_) => 4,
            ServerSync(_) => 5,
            ChannelRemove(_) => 6,
            ChannelState(_) => 7,
            UserRemove(_) => 8,
            UserState(_) => 9,
            BanList(_) => 10,
            TextMessage(_) => 11,
            PermissionDenied(_) => 12,
            Acl(_) => 13,
            QueryUsers(_) => 14,
            CryptSetup(_) => 15,
            ContextActionModify(_) => 16,
            ContextAction(_) => 17,
            UserList(_) => 18,
            VoiceTarget(_) => 19,
            PermissionQuery(_) => 20,
            CodecVersion(_) => 21,
            UserStats(_) => 22,
            RequestBlob(_) => 23,
            ServerConfig(_) => 24,
            SuggestConfig(_) => 25,
        }
    }

    /// Marshals the payload to protobuf bytes. The opcode itself is written
    /// by the transport's 6-byte frame header, not by this function.
    pub fn encode(&self) -> Result<Vec<u8>> {
        use ControlMessage::*;
        let bytes = match self {
            Version(m) => m.write_to_bytes(),
            Authenticate(m) => m.write_to_bytes(),
            Ping(m) => m.write_to_bytes(),
            Reject(m) => m.write_to_bytes(),
            ServerSync(m) => m.write_to_bytes(),
            ChannelRemove(m) => m.write_to_bytes(),
            ChannelState(m) => m.write_to_bytes(),
            UserRemove(m) => m.write_to_bytes(),
            UserState(m) => m.write_to_bytes(),
            BanList(m) => m.write_to_bytes(),
            TextMessage(m) => m.write_to_bytes(),
            PermissionDenied(m) => m.write_to_bytes(),
            Acl(m) => m.write_to_bytes(),
            QueryUsers(m) => m.write_to_bytes(),
            CryptSetup(m) => m.write_to_bytes(),
            ContextActionModify(m) => m.write_to_bytes(),
            ContextAction(m) => m.write_to_bytes(),
            UserList(m) => m.write_to_bytes(),
            VoiceTarget(m) => m.write_to_bytes(),
            PermissionQuery(m) => m.write_to_bytes(),
            CodecVersion(m) => m.write_to_bytes(),
            UserStats(m) => m.write_to_bytes(),
            RequestBlob(m) => m.write_to_bytes(),
            ServerConfig(m) => m.write_to_bytes(),
            SuggestConfig(m) => m.write_to_bytes(),
        };
        bytes.map_err(|e| Error::Protocol(format!("control message encode failed: {e}")))
    }

    /// Unmarshals a payload received under `opcode`. Returns `Ok(None)` for
    /// any opcode outside the fixed 0-25 table (other than 1, which callers
    /// must never route here) so forward-compatible peers can add new
    /// message types without breaking this client.
    pub fn decode(opcode: u16, payload: &[u8]) -> Result<Option<ControlMessage>> {
        macro_rules! parse {
            ($ty:ty, $variant:ident) => {
                <$ty as protobuf::Message>::parse_from_bytes(payload)
                    .map(|m| Some(ControlMessage::$variant(Box::new(m))))
                    .map_err(|e| {
                        Error::Protocol(format!(
                            "control message decode failed (opcode {opcode}): {e}"
                        ))
                    })
            };
        }

        match opcode {
            0 => parse!(msgs::Version, Version),
            2 => parse!(msgs::Authenticate, Authenticate),
            3 => parse!(msgs::Ping, Ping),
            4 => parse!(msgs::Reject, Reject),
            5 => parse!(msgs::ServerSync, ServerSync),
            6 => parse!(msgs::ChannelRemove, ChannelRemove),
            7 => parse!(msgs::ChannelState, ChannelState),
            8 => parse!(msgs::UserRemove, UserRemove),
            9 => parse!(msgs::UserState, UserState),
            10 => parse!(msgs::BanList, BanList),
            11 => parse!(msgs::TextMessage, TextMessage),
            12 => parse!(msgs::PermissionDenied, PermissionDenied),
            13 => parse!(msgs::ACL, Acl),
            14 => parse!(msgs::QueryUsers, QueryUsers),
            15 => parse!(msgs::CryptSetup, CryptSetup),
            16 => parse!(msgs::ContextActionModify, ContextActionModify),
            17 => parse!(msgs::ContextAction, ContextAction),
            18 => parse!(msgs::UserList, UserList),
            19 => parse!(msgs::VoiceTarget, VoiceTarget),
            20 => parse!(msgs::PermissionQuery, PermissionQuery),
            21 => parse!(msgs::CodecVersion, CodecVersion),
            22 => parse!(msgs::UserStats, UserStats),
            23 => parse!(msgs::RequestBlob, RequestBlob),
            24 => parse!(msgs::ServerConfig, ServerConfig),
            25 => parse!(msgs::SuggestConfig, SuggestConfig),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_version() {
        let mut msg = msgs::Version::new();
        msg.set_version(crate::version::pack(1, 5, 0));
        msg.set_release("test".into());
        let wrapped = ControlMessage::Version(Box::new(msg));

        let encoded = wrapped.encode().unwrap();
        let decoded = ControlMessage::decode(wrapped.opcode(), &encoded)
            .unwrap()
            .unwrap();

        match decoded {
            ControlMessage::Version(m) => {
                assert_eq!(m.get_version(), crate::version::pack(1, 5, 0));
                assert_eq!(m.get_release(), "test");
            }
            other => panic!("wrong variant decoded: {other:?}"),
        }
    }

    #[test]
    fn unknown_opcode_decodes_to_none() {
        assert!(ControlMessage::decode(200, &[]).unwrap().is_none());
    }

    #[test]
    fn opcode_table_matches_wire_format() {
        let mut msg = msgs::UserState::new();
        msg.set_session(1);
        let wrapped = ControlMessage::UserState(Box::new(msg));
        assert_eq!(wrapped.opcode(), 9);
    }
}
