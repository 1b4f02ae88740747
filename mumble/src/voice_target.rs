//! Voice targets. A voice target is built
//! locally, sent to the server as a `VoiceTarget` control message so it
//! gets a numeric id in `[1, 30]`, and only then can the outgoing audio
//! pipeline select it.

use mumble_protocol::control::msgs;
use protobuf::RepeatedField;

use crate::error::{Error, Result};

pub const LOOPBACK: u8 = 31;

#[derive(Debug, Clone, Default)]
pub struct VoiceTargetChannel {
    pub channel_id: u32,
    pub recursive: bool,
    pub links: bool,
    pub group: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct VoiceTarget {
    id: u8,
    users: Vec<u32>,
    channels: Vec<VoiceTargetChannel>,
}

impl VoiceTarget {
    /// `id` must be in `[1, 30]` — 0 is "normal" (no target) and 31 is the
    /// reserved loopback id, neither of which can be registered.
    pub fn new(id: u8) -> Result<Self> {
        if !(1..=30).contains(&id) {
            return Err(Error::Config(format!(
                "voice target id must be in [1, 30], got {id}"
            )));
        }
        Ok(VoiceTarget { id, users: Vec::new(), channels: Vec::new() })
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn add_user(&mut self, session: u32) -> &mut Self {
        self.users.push(session);
        self
    }

    pub fn add_channel(&mut self, channel: VoiceTargetChannel) -> &mut Self {
        self.channels.push(channel);
        self
    }

    /// Builds the `VoiceTarget` control message to register this target
    /// with the server.
    pub fn to_message(&self) -> msgs::VoiceTarget {
        let mut msg = msgs::VoiceTarget::new();
        msg.set_id(self.id as u32);

        let mut targets = RepeatedField::new();

        if !self.users.is_empty() {
            let mut target = msgs::VoiceTarget_Target::new();
            target.set_session(RepeatedField::from_vec(self.users.clone()));
            targets.push(target);
        }

        for channel in &self.channels {
            let mut target = msgs::VoiceTarget_Target::new();
            target.set_channel_id(channel.channel_id);
            target.set_links(channel.links);
            target.set_children(channel.recursive);
            if let Some(group) = &channel.group {
                target.set_group(group.clone());
            }
            targets.push(target);
        }

        msg.set_targets(targets);
        msg
    }
}

/// Tracks which target ids have been registered with the server and which
/// one is currently selected for outgoing audio. Activating an id that
/// hasn't been registered yet (other than 0 "normal" or 31 loopback) is a
/// `Config` error: a target must be registered with the server before it
/// can be activated.
#[derive(Debug, Default)]
pub struct VoiceTargetRegistry {
    registered: std::collections::HashSet<u8>,
    active: u8,
}

impl VoiceTargetRegistry {
    pub fn mark_registered(&mut self, id: u8) {
        self.registered.insert(id);
    }

    pub fn activate(&mut self, id: u8) -> Result<()> {
        if id != 0 && id != LOOPBACK && !self.registered.contains(&id) {
            return Err(Error::Config(format!(
                "voice target {id} was activated before being registered"
            )));
        }
        self.active = id;
        Ok(())
    }

    pub fn active(&self) -> u8 {
        self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_ids() {
        assert!(VoiceTarget::new(0).is_err());
        assert!(VoiceTarget::new(31).is_err());
        assert!(VoiceTarget::new(15).is_ok());
    }

    #[test]
    fn activation_requires_registration() {
        let mut registry = VoiceTargetRegistry::default();
        assert!(registry.activate(5).is_err());
        registry.mark_registered(5);
        assert!(registry.activate(5).is_ok());
        assert_eq!(registry.active(), 5);
    }

    #[test]
    fn loopback_and_normal_need_no_registration() {
        let mut registry = VoiceTargetRegistry::default();
        assert!(registry.activate(0).is_ok());
        assert!(registry.activate(LOOPBACK).is_ok());
    }
}
