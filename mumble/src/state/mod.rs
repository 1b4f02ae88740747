//! The replicated server-state store. Owned exclusively by the
//! reader task; every mutation here runs from inside [`crate::dispatch`] and
//! keeps the cross-index invariants (user ↔ channel, channel ↔ parent) true
//! at every observable point.

pub mod acl;
pub mod channel;
pub mod context_action;
pub mod user;

use std::collections::HashMap;

pub use acl::{Acl, AclGroup, AclRule, PendingAcl};
pub use channel::{Channel, ChannelChangeMask, Description};
pub use context_action::{ContextAction, ContextActionRegistry};
pub use user::{User, UserChangeMask};

use crate::error::{Error, Result};
use crate::version::Version;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ban {
    pub address: Vec<u8>,
    pub mask: u32,
    pub name: String,
    pub hash: String,
    pub reason: String,
    pub start: String,
    pub duration: u32,
}

#[derive(Debug, Default)]
pub struct Store {
    pub users: HashMap<u32, User>,
    pub channels: HashMap<u32, Channel>,
    pub acls: HashMap<u32, Acl>,
    pub pending_acls: HashMap<u32, PendingAcl>,
    pub bans: Vec<Ban>,
    /// Registered-user-id → name (from `UserList`); independent from the
    /// transient `users` session map.
    pub registered_users: HashMap<u32, String>,
    pub context_actions: ContextActionRegistry,
    pub server_version: Option<Version>,
    pub max_bandwidth: Option<u32>,
    pub welcome_text: String,
    pub max_message_length: Option<u32>,
    pub allow_html: Option<bool>,
    pub image_message_length: Option<u32>,
    pub max_users: Option<u32>,
    /// This session's own session id, set once `ServerSync` arrives.
    pub self_session: Option<u32>,
}

impl Store {
    /// A freshly synced store: the root channel is guaranteed to exist
    /// between `ServerSync` and disconnect.
    pub fn new() -> Self {
        let mut store = Store::default();
        store.channels.insert(0, Channel::root());
        store
    }

    pub fn user(&self, session: u32) -> Option<&User> {
        self.users.get(&session)
    }

    pub fn user_mut(&mut self, session: u32) -> Option<&mut User> {
        self.users.get_mut(&session)
    }

    pub fn channel(&self, id: u32) -> Option<&Channel> {
        self.channels.get(&id)
    }

    pub fn channel_mut(&mut self, id: u32) -> Option<&mut Channel> {
        self.channels.get_mut(&id)
    }

    pub fn self_user(&self) -> Option<&User> {
        self.self_session.and_then(|id| self.users.get(&id))
    }

    /// Inserts a brand-new user into the default channel (root) — the
    /// initial channel for a newly-seen user always defaults to root.
    pub fn insert_user(&mut self, session: u32) -> Result<&mut User> {
        if !self.channels.contains_key(&0) {
            return Err(Error::Protocol(
                "cannot register a new user: root channel is missing".into(),
            ));
        }

        self.channels.get_mut(&0).unwrap().users.insert(session);
        Ok(self.users.entry(session).or_insert_with(|| User::new(session)))
    }

    /// Moves `session` into `new_channel`, maintaining both user↔channel
    /// indexes atomically.
    pub fn move_user(&mut self, session: u32, new_channel: u32) -> Result<()> {
        if !self.channels.contains_key(&new_channel) {
            return Err(Error::Protocol(format!(
                "UserState referenced unknown channel {new_channel}"
            )));
        }

        let old_channel = self
            .users
            .get(&session)
            .ok_or_else(|| Error::Protocol(format!("UserState referenced unknown session {session}")))?
            .channel_id;

        if old_channel == new_channel {
            return Ok(());
        }

        if let Some(old) = self.channels.get_mut(&old_channel) {
            old.users.remove(&session);
        }
        self.channels.get_mut(&new_channel).unwrap().users.insert(session);
        self.users.get_mut(&session).unwrap().channel_id = new_channel;

        Ok(())
    }

    /// Removes a user, unlinking it from its channel's users map.
    pub fn remove_user(&mut self, session: u32) -> Option<User> {
        let user = self.users.remove(&session)?;
        if let Some(channel) = self.channels.get_mut(&user.channel_id) {
            channel.users.remove(&session);
        }
        Some(user)
    }

    /// Inserts a brand-new channel under `parent`.
    pub fn insert_channel(&mut self, id: u32, parent: u32) -> Result<&mut Channel> {
        if !self.channels.contains_key(&parent) {
            return Err(Error::Protocol(format!(
                "ChannelState referenced unknown parent {parent}"
            )));
        }
        self.channels.get_mut(&parent).unwrap().children.insert(id);
        Ok(self.channels.entry(id).or_insert_with(|| Channel::new(id)))
    }

    /// Moves a channel to a new parent, maintaining the children-map
    /// invariant that every channel's id appears in its parent's children
    /// set.
    pub fn reparent_channel(&mut self, id: u32, new_parent: u32) -> Result<()> {
        if !self.channels.contains_key(&new_parent) {
            return Err(Error::Protocol(format!(
                "ChannelState referenced unknown parent {new_parent}"
            )));
        }

        let old_parent = self
            .channels
            .get(&id)
            .ok_or_else(|| Error::Protocol(format!("ChannelState referenced unknown channel {id}")))?
            .parent;

        if let Some(old_parent) = old_parent {
            if let Some(old) = self.channels.get_mut(&old_parent) {
                old.children.remove(&id);
            }
        }
        self.channels.get_mut(&new_parent).unwrap().children.insert(id);
        self.channels.get_mut(&id).unwrap().parent = Some(new_parent);

        Ok(())
    }

    /// Removes a channel, unlinking it from its parent's children map and
    /// purging its permission cache.
    pub fn remove_channel(&mut self, id: u32) -> Option<Channel> {
        let channel = self.channels.remove(&id)?;
        if let Some(parent) = channel.parent {
            if let Some(parent) = self.channels.get_mut(&parent) {
                parent.children.remove(&id);
            }
        }
        Some(channel)
    }

    /// `PermissionQuery`'s flush hint: clears every cached per-channel
    /// permission entry and returns the ids of channels that had one, so the
    /// caller can emit a `permission-changed` event for each.
    pub fn flush_permissions(&mut self) -> Vec<u32> {
        let mut flushed = Vec::new();
        for (id, channel) in self.channels.iter_mut() {
            if !channel.permissions.is_empty() {
                channel.permissions.clear();
                flushed.push(*id);
            }
        }
        flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_user_defaults_to_root() {
        let mut store = Store::new();
        store.insert_user(7).unwrap();
        assert_eq!(store.user(7).unwrap().channel_id, 0);
        assert!(store.channel(0).unwrap().users.contains(&7));
    }

    #[test]
    fn move_user_updates_both_indexes() {
        let mut store = Store::new();
        store.insert_user(7).unwrap();
        store.insert_channel(5, 0).unwrap();

        store.move_user(7, 5).unwrap();

        assert!(!store.channel(0).unwrap().users.contains(&7));
        assert!(store.channel(5).unwrap().users.contains(&7));
        assert_eq!(store.user(7).unwrap().channel_id, 5);
    }

    #[test]
    fn move_user_rejects_unknown_channel() {
        let mut store = Store::new();
        store.insert_user(7).unwrap();
        assert!(store.move_user(7, 99).is_err());
    }

    #[test]
    fn remove_channel_unlinks_from_parent() {
        let mut store = Store::new();
        store.insert_channel(5, 0).unwrap();
        assert!(store.channel(0).unwrap().children.contains(&5));

        store.remove_channel(5).unwrap();
        assert!(!store.channel(0).unwrap().children.contains(&5));
    }

    #[test]
    fn remove_user_unlinks_from_channel() {
        let mut store = Store::new();
        store.insert_user(7).unwrap();
        store.remove_user(7);
        assert!(!store.channel(0).unwrap().users.contains(&7));
    }

    #[test]
    fn flush_permissions_clears_every_cache() {
        let mut store = Store::new();
        store.insert_channel(5, 0).unwrap();
        store.channel_mut(5).unwrap().permissions.insert(1, 0xFF);

        let flushed = store.flush_permissions();
        assert_eq!(flushed, vec![5]);
        assert!(store.channel(5).unwrap().permissions.is_empty());
    }
}
