//! Handler dispatch: the opcode → function table that turns a decoded
//! [`ControlMessage`] into state mutations plus the typed events those
//! mutations produce.
//!
//! Event suppression during the handshake window is the caller's
//! responsibility ([`crate::client`]) — handlers here always mutate state
//! and always return the events that mutation implies; the state ends up
//! correct either way, only delivery is gated.

use mumble_protocol::control::msgs;

use crate::control::ControlMessage;
use crate::error::{Error, Result};
use crate::event::{
    ContextActionInvoked, DisconnectReason, Event, PermissionDenied, PermissionDeniedKind, TextMessage,
};
use crate::state::acl::{Acl, AclGroup, AclRule, PendingAcl};
use crate::state::context_action::ContextAction;
use crate::state::{ChannelChangeMask, Description, Store, UserChangeMask};
use crate::version::Version;

/// Applies one decoded control message to `store`, returning the events it
/// produced. `None` is never returned for an opcode outside the handled
/// set — [`ControlMessage::decode`] already filtered those out before this
/// function is reached.
pub fn dispatch(store: &mut Store, msg: ControlMessage) -> Result<Vec<Event>> {
    use ControlMessage::*;
    match msg {
        Version(m) => handle_version(store, *m),
        Authenticate(_) => Ok(Vec::new()),
        Ping(_) => Ok(Vec::new()),
        Reject(m) => handle_reject(*m),
        ServerSync(m) => handle_server_sync(store, *m),
        ChannelRemove(m) => handle_channel_remove(store, *m),
        ChannelState(m) => handle_channel_state(store, *m),
        UserRemove(m) => handle_user_remove(store, *m),
        UserState(m) => handle_user_state(store, *m),
        BanList(m) => handle_ban_list(store, *m),
        TextMessage(m) => handle_text_message(*m),
        PermissionDenied(m) => handle_permission_denied(*m),
        Acl(m) => handle_acl(store, *m),
        QueryUsers(m) => handle_query_users(store, *m),
        CryptSetup(_) => Ok(Vec::new()),
        ContextActionModify(m) => handle_context_action_modify(store, *m),
        ContextAction(m) => handle_context_action(*m),
        UserList(m) => handle_user_list(store, *m),
        VoiceTarget(_) => Ok(Vec::new()),
        PermissionQuery(m) => handle_permission_query(store, *m),
        CodecVersion(_) => Ok(Vec::new()),
        UserStats(m) => handle_user_stats(store, *m),
        RequestBlob(_) => Ok(Vec::new()),
        ServerConfig(m) => handle_server_config(store, *m),
        SuggestConfig(_) => Ok(Vec::new()),
    }
}

fn handle_version(store: &mut Store, packet: msgs::Version) -> Result<Vec<Event>> {
    store.server_version = Some(Version {
        packed: packet.get_version(),
        release: packet.get_release().to_string(),
        os: packet.get_os().to_string(),
        os_version: packet.get_os_version().to_string(),
    });
    Ok(Vec::new())
}

fn handle_reject(packet: msgs::Reject) -> Result<Vec<Event>> {
    use crate::error::{RejectKind, RejectReason};

    let kind = match packet.get_field_type() {
        msgs::Reject_RejectType::None => RejectKind::None,
        msgs::Reject_RejectType::WrongVersion => RejectKind::WrongVersion,
        msgs::Reject_RejectType::InvalidUsername => RejectKind::InvalidUsername,
        msgs::Reject_RejectType::WrongUserPW => RejectKind::WrongUserPassword,
        msgs::Reject_RejectType::WrongServerPW => RejectKind::WrongServerPassword,
        msgs::Reject_RejectType::UsernameInUse => RejectKind::UsernameInUse,
        msgs::Reject_RejectType::ServerIsFull => RejectKind::ServerFull,
        msgs::Reject_RejectType::NoCertificate => RejectKind::NoCertificate,
        msgs::Reject_RejectType::AuthenticatorFail => RejectKind::AuthenticatorFail,
        other => RejectKind::Other(other as i32),
    };

    Ok(vec![Event::Disconnect {
        reason: DisconnectReason::Rejected(RejectReason {
            kind,
            reason: packet.get_reason().to_string(),
        }),
    }])
}

fn handle_server_sync(store: &mut Store, packet: msgs::ServerSync) -> Result<Vec<Event>> {
    let session = packet.get_session();
    let max_bandwidth = packet.get_max_bandwidth();
    store.self_session = Some(session);
    store.max_bandwidth = Some(max_bandwidth);
    store.welcome_text = packet.get_welcome_text().to_string();

    Ok(vec![Event::Connect {
        welcome_message: store.welcome_text.clone(),
        session,
        maximum_bitrate: max_bandwidth,
    }])
}

fn handle_channel_remove(store: &mut Store, packet: msgs::ChannelRemove) -> Result<Vec<Event>> {
    let channel_id = packet.get_channel_id();
    if store.remove_channel(channel_id).is_none() {
        return Err(Error::Protocol(format!(
            "ChannelRemove referenced unknown channel {channel_id}"
        )));
    }
    Ok(vec![Event::ChannelRemove { channel_id }])
}

fn handle_channel_state(store: &mut Store, mut packet: msgs::ChannelState) -> Result<Vec<Event>> {
    let channel_id = packet.get_channel_id();
    let mut change = ChannelChangeMask::default();

    if !store.channels.contains_key(&channel_id) {
        let parent = if packet.has_parent() { packet.get_parent() } else { 0 };
        store.insert_channel(channel_id, parent)?;
        change.set(ChannelChangeMask::PARENT);
    } else if packet.has_parent() {
        let parent = packet.get_parent();
        if store.channel(channel_id).and_then(|c| c.parent) != Some(parent) {
            store.reparent_channel(channel_id, parent)?;
            change.set(ChannelChangeMask::PARENT);
        }
    }

    let channel = store
        .channel_mut(channel_id)
        .ok_or_else(|| Error::Protocol(format!("ChannelState lost channel {channel_id} mid-update")))?;

    if packet.has_name() {
        channel.name = packet.take_name();
        change.set(ChannelChangeMask::NAME);
    }

    if !packet.get_links().is_empty() || !packet.get_links_add().is_empty() || !packet.get_links_remove().is_empty() {
        if !packet.get_links().is_empty() {
            channel.links.clear();
            channel.links.extend(packet.get_links().iter().map(|v| *v as usize));
        }
        channel.links.extend(packet.get_links_add().iter().map(|v| *v as usize));
        for id in packet.get_links_remove() {
            channel.links.remove(*id as usize);
        }
        change.set(ChannelChangeMask::LINKS);
    }

    if packet.has_description() {
        channel.description = Description::Text(packet.take_description());
        change.set(ChannelChangeMask::DESCRIPTION);
    } else if packet.has_description_hash() {
        channel.description = Description::Hash(packet.take_description_hash());
        change.set(ChannelChangeMask::DESCRIPTION);
    }

    if packet.has_temporary() {
        channel.temporary = packet.get_temporary();
        change.set(ChannelChangeMask::TEMPORARY);
    }

    if packet.has_position() {
        channel.position = packet.get_position();
        change.set(ChannelChangeMask::POSITION);
    }

    if packet.has_max_users() {
        channel.max_users = packet.get_max_users();
        change.set(ChannelChangeMask::MAX_USERS);
    }

    if change.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![Event::ChannelChange { channel_id, change }])
}

fn handle_user_remove(store: &mut Store, packet: msgs::UserRemove) -> Result<Vec<Event>> {
    let session = packet.get_session();
    if store.remove_user(session).is_none() {
        return Err(Error::Protocol(format!("UserRemove referenced unknown session {session}")));
    }

    Ok(vec![Event::UserRemove {
        session,
        actor: if packet.has_actor() { Some(packet.get_actor()) } else { None },
        reason: packet.get_reason().to_string(),
        banned: packet.get_ban(),
    }])
}

fn handle_user_state(store: &mut Store, mut packet: msgs::UserState) -> Result<Vec<Event>> {
    let session = packet.get_session();
    let mut change = UserChangeMask::default();

    if !store.users.contains_key(&session) {
        store.insert_user(session)?;
        change.set(UserChangeMask::CONNECTED);
        change.set(UserChangeMask::CHANNEL);
    }

    if packet.has_channel_id() {
        let target = packet.get_channel_id();
        if store.user(session).map(|u| u.channel_id) != Some(target) {
            store.move_user(session, target)?;
            change.set(UserChangeMask::CHANNEL);
        }
    }

    let user = store
        .user_mut(session)
        .ok_or_else(|| Error::Protocol(format!("UserState lost session {session} mid-update")))?;

    if packet.has_name() {
        user.name = packet.take_name();
        change.set(UserChangeMask::NAME);
    }

    if packet.has_user_id() {
        user.registered_id = packet.get_user_id();
        change.set(UserChangeMask::REGISTRATION);
    }

    if packet.has_mute() || packet.has_deaf() || packet.has_suppress() {
        if packet.has_mute() {
            user.mute = packet.get_mute();
        }
        if packet.has_deaf() {
            user.deaf = packet.get_deaf();
        }
        if packet.has_suppress() {
            user.suppress = packet.get_suppress();
        }
        change.set(UserChangeMask::MUTE_DEAF_SUPPRESS);
    }

    if packet.has_self_mute() || packet.has_self_deaf() {
        if packet.has_self_mute() {
            user.self_mute = packet.get_self_mute();
        }
        if packet.has_self_deaf() {
            user.self_deaf = packet.get_self_deaf();
        }
        change.set(UserChangeMask::SELF_MUTE_DEAF);
    }

    if packet.has_comment() {
        user.comment = packet.take_comment();
        user.comment_hash.clear();
        change.set(UserChangeMask::COMMENT);
    } else if packet.has_comment_hash() {
        user.comment_hash = packet.take_comment_hash();
        user.comment.clear();
        change.set(UserChangeMask::COMMENT);
    }

    if packet.has_texture() {
        user.texture = packet.take_texture();
        user.texture_hash.clear();
        change.set(UserChangeMask::TEXTURE);
    } else if packet.has_texture_hash() {
        user.texture_hash = packet.take_texture_hash();
        user.texture.clear();
        change.set(UserChangeMask::TEXTURE);
    }

    if packet.has_priority_speaker() {
        user.priority_speaker = packet.get_priority_speaker();
        change.set(UserChangeMask::PRIORITY_SPEAKER);
    }

    if packet.has_recording() {
        user.recording = packet.get_recording();
        change.set(UserChangeMask::RECORDING);
    }

    if packet.has_hash() {
        user.certificate_hash = packet.take_hash().into_bytes();
    }

    if change.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![Event::UserChange { session, change }])
}

fn handle_ban_list(store: &mut Store, packet: msgs::BanList) -> Result<Vec<Event>> {
    store.bans = packet
        .get_bans()
        .iter()
        .map(|b| crate::state::Ban {
            address: b.get_address().to_vec(),
            mask: b.get_mask(),
            name: b.get_name().to_string(),
            hash: b.get_hash().to_string(),
            reason: b.get_reason().to_string(),
            start: b.get_start().to_string(),
            duration: b.get_duration(),
        })
        .collect();
    Ok(Vec::new())
}

fn handle_text_message(packet: msgs::TextMessage) -> Result<Vec<Event>> {
    Ok(vec![Event::TextMessage(TextMessage {
        actor: if packet.has_actor() { Some(packet.get_actor()) } else { None },
        recipients: packet.get_session().to_vec(),
        channels: packet.get_channel_id().to_vec(),
        trees: packet.get_tree_id().to_vec(),
        message: packet.get_message().to_string(),
    })])
}

fn handle_permission_denied(packet: msgs::PermissionDenied) -> Result<Vec<Event>> {
    use msgs::PermissionDenied_DenyType::*;

    let kind = match packet.get_field_type() {
        Permission => PermissionDeniedKind::Permission,
        SuperUser => PermissionDeniedKind::SuperUser,
        ChannelName => PermissionDeniedKind::ChannelName,
        TextTooLong => PermissionDeniedKind::TextTooLong,
        H9K => PermissionDeniedKind::H9K,
        TemporaryChannel => PermissionDeniedKind::TemporaryChannel,
        MissingCertificate => PermissionDeniedKind::MissingCertificate,
        UserName => PermissionDeniedKind::UserName,
        ChannelFull => PermissionDeniedKind::ChannelFull,
        NestingLimit => PermissionDeniedKind::NestingLimit,
        other => PermissionDeniedKind::Other(other as i32),
    };

    Ok(vec![Event::PermissionDenied(PermissionDenied {
        permission: packet.get_permission(),
        channel_id: if packet.has_channel_id() { Some(packet.get_channel_id()) } else { None },
        session: if packet.has_session() { Some(packet.get_session()) } else { None },
        reason: packet.get_reason().to_string(),
        kind,
    })])
}

fn handle_acl(store: &mut Store, packet: msgs::ACL) -> Result<Vec<Event>> {
    let channel_id = packet.get_channel_id();

    let groups = packet
        .get_groups()
        .iter()
        .map(|g| AclGroup {
            name: g.get_name().to_string(),
            inherited: g.get_inherited(),
            inherit: g.get_inherit(),
            inheritable: g.get_inheritable(),
            add: g.get_add().to_vec(),
            remove: g.get_remove().to_vec(),
            members: g.get_inherited_members().to_vec(),
        })
        .collect::<Vec<_>>();

    let rules = packet
        .get_acl()
        .iter()
        .map(|r| AclRule {
            apply_here: r.get_apply_here(),
            apply_sub_channels: r.get_apply_subs(),
            inherited: r.get_inherited(),
            user_id: if r.has_user_id() { Some(r.get_user_id() as u32) } else { None },
            group: if r.get_group().is_empty() { None } else { Some(r.get_group().to_string()) },
            grant: r.get_grant(),
            deny: r.get_deny(),
        })
        .collect::<Vec<_>>();

    let mut awaiting: Vec<u32> = rules.iter().filter_map(|r| r.user_id).collect();
    for group in &groups {
        awaiting.extend(group.add.iter().copied());
    }
    awaiting.sort_unstable();
    awaiting.dedup();

    let acl = Acl {
        channel_id,
        inherits: packet.get_inherit(),
        groups,
        rules,
        user_names: std::collections::HashMap::new(),
    };

    if awaiting.is_empty() {
        store.acls.insert(channel_id, acl);
        return Ok(vec![Event::AclChange { channel_id }]);
    }

    store.pending_acls.insert(channel_id, PendingAcl::new(acl, awaiting));
    Ok(Vec::new())
}

fn handle_query_users(store: &mut Store, packet: msgs::QueryUsers) -> Result<Vec<Event>> {
    let ids = packet.get_ids();
    let names = packet.get_names();
    let resolved: std::collections::HashMap<u32, String> = ids
        .iter()
        .copied()
        .zip(names.iter().cloned())
        .collect();

    for (id, name) in &resolved {
        store.registered_users.insert(*id, name.clone());
    }

    let mut events = Vec::new();
    let pending: Vec<u32> = store.pending_acls.keys().copied().collect();
    for channel_id in pending {
        if let Some(pending) = store.pending_acls.remove(&channel_id) {
            match pending.resolve(&resolved) {
                Ok(acl) => {
                    store.acls.insert(channel_id, acl);
                    events.push(Event::AclChange { channel_id });
                }
                Err(still_pending) => {
                    store.pending_acls.insert(channel_id, still_pending);
                }
            }
        }
    }

    Ok(events)
}

fn handle_context_action_modify(store: &mut Store, packet: msgs::ContextActionModify) -> Result<Vec<Event>> {
    match packet.get_operation() {
        msgs::ContextActionModify_Operation::Add => {
            store.context_actions.add(ContextAction {
                action: packet.get_action().to_string(),
                text: packet.get_text().to_string(),
                context: packet.get_context() as u32,
            });
        }
        msgs::ContextActionModify_Operation::Remove => {
            store.context_actions.remove(packet.get_action());
        }
    }
    Ok(Vec::new())
}

fn handle_context_action(packet: msgs::ContextAction) -> Result<Vec<Event>> {
    Ok(vec![Event::ContextAction(ContextActionInvoked {
        session: if packet.has_session() { Some(packet.get_session()) } else { None },
        channel_id: if packet.has_channel_id() { Some(packet.get_channel_id()) } else { None },
        action: packet.get_action().to_string(),
    })])
}

fn handle_user_list(store: &mut Store, packet: msgs::UserList) -> Result<Vec<Event>> {
    store.registered_users.clear();
    for entry in packet.get_users() {
        store.registered_users.insert(entry.get_user_id(), entry.get_name().to_string());
    }
    Ok(Vec::new())
}

fn handle_permission_query(store: &mut Store, packet: msgs::PermissionQuery) -> Result<Vec<Event>> {
    if packet.get_flush() {
        return Ok(store
            .flush_permissions()
            .into_iter()
            .map(|channel_id| Event::PermissionChange { channel_id })
            .collect());
    }

    let channel_id = packet.get_channel_id();
    let session = store.self_session;
    if let (Some(channel), Some(session)) = (store.channel_mut(channel_id), session) {
        channel.permissions.insert(session, packet.get_permissions());
    }
    Ok(vec![Event::PermissionChange { channel_id }])
}

fn handle_user_stats(store: &mut Store, packet: msgs::UserStats) -> Result<Vec<Event>> {
    let session = packet.get_session();
    if let Some(user) = store.user_mut(session) {
        user.stats = Some(Box::new(packet));
    }
    Ok(Vec::new())
}

fn handle_server_config(store: &mut Store, packet: msgs::ServerConfig) -> Result<Vec<Event>> {
    if packet.has_max_bandwidth() {
        store.max_bandwidth = Some(packet.get_max_bandwidth());
    }
    if packet.has_welcome_text() {
        store.welcome_text = packet.get_welcome_text().to_string();
    }
    if packet.has_allow_html() {
        store.allow_html = Some(packet.get_allow_html());
    }
    if packet.has_message_length() {
        store.max_message_length = Some(packet.get_message_length());
    }
    if packet.has_image_message_length() {
        store.image_message_length = Some(packet.get_image_message_length());
    }
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_state_on_unknown_channel_creates_it() {
        let mut store = Store::new();
        let mut packet = msgs::ChannelState::new();
        packet.set_channel_id(5);
        packet.set_name("general".into());

        let events = handle_channel_state(&mut store, packet).unwrap();
        assert!(store.channel(5).is_some());
        assert_eq!(store.channel(5).unwrap().name, "general");
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn user_remove_unknown_session_is_protocol_error() {
        let mut store = Store::new();
        let mut packet = msgs::UserRemove::new();
        packet.set_session(42);
        assert!(handle_user_remove(&mut store, packet).is_err());
    }

    #[test]
    fn acl_without_referenced_users_publishes_immediately() {
        let mut store = Store::new();
        let mut packet = msgs::ACL::new();
        packet.set_channel_id(0);

        let events = handle_acl(&mut store, packet).unwrap();
        assert_eq!(events.len(), 1);
        assert!(store.acls.contains_key(&0));
    }

    #[test]
    fn acl_with_referenced_users_waits_for_query_users() {
        let mut store = Store::new();
        let mut packet = msgs::ACL::new();
        packet.set_channel_id(0);
        let mut rule = msgs::ACL_ChanACL::new();
        rule.set_user_id(7);
        rule.set_grant(1);
        let mut rules = protobuf::RepeatedField::new();
        rules.push(rule);
        packet.set_acl(rules);

        let events = handle_acl(&mut store, packet).unwrap();
        assert!(events.is_empty());
        assert!(store.pending_acls.contains_key(&0));

        let mut query = msgs::QueryUsers::new();
        query.set_ids(protobuf::RepeatedField::from_vec(vec![7]));
        query.set_names(protobuf::RepeatedField::from_vec(vec!["alice".to_string()]));

        let events = handle_query_users(&mut store, query).unwrap();
        assert_eq!(events.len(), 1);
        assert!(store.acls.contains_key(&0));
        assert!(!store.pending_acls.contains_key(&0));
    }

    #[test]
    fn permission_query_flush_clears_every_cache() {
        let mut store = Store::new();
        store.insert_channel(5, 0).unwrap();
        store.channel_mut(5).unwrap().permissions.insert(1, 0xFF);

        let mut packet = msgs::PermissionQuery::new();
        packet.set_flush(true);

        let events = handle_permission_query(&mut store, packet).unwrap();
        assert_eq!(events.len(), 1);
        assert!(store.channel(5).unwrap().permissions.is_empty());
    }
}
