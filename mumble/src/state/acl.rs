//! Access-control objects. An ACL
//! arrives in two protocol steps — the `Acl` message itself, then a
//! `QueryUsers` reply that supplies the display names for the user ids the
//! rules reference — so the partial object is buffered until both have
//! landed.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclGroup {
    pub name: String,
    pub inherited: bool,
    pub inherit: bool,
    pub inheritable: bool,
    pub add: Vec<u32>,
    pub remove: Vec<u32>,
    /// Resulting membership after inheritance is applied by the server;
    /// reported alongside `add`/`remove` on the wire.
    pub members: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclRule {
    pub apply_here: bool,
    pub apply_sub_channels: bool,
    pub inherited: bool,
    /// Registered user id the rule is bound to, if not bound to a group.
    pub user_id: Option<u32>,
    pub group: Option<String>,
    pub grant: u32,
    pub deny: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acl {
    pub channel_id: u32,
    pub inherits: bool,
    pub groups: Vec<AclGroup>,
    pub rules: Vec<AclRule>,
    /// Registered-user-id → display name, resolved from the `QueryUsers`
    /// reply that completes this ACL.
    pub user_names: HashMap<u32, String>,
}

/// An `Acl` received but not yet published because its `QueryUsers` reply
/// hasn't arrived.
#[derive(Debug, Clone)]
pub struct PendingAcl {
    pub acl: Acl,
    pub awaiting: Vec<u32>,
}

impl PendingAcl {
    pub fn new(acl: Acl, awaiting: Vec<u32>) -> Self {
        PendingAcl { acl, awaiting }
    }

    /// Folds in a `QueryUsers` reply; returns the completed `Acl` once every
    /// awaited id has been named.
    pub fn resolve(mut self, names: &HashMap<u32, String>) -> Result<Acl, Self> {
        self.awaiting.retain(|id| !names.contains_key(id));
        self.acl.user_names.extend(
            names
                .iter()
                .filter(|(id, _)| self.acl.needs_name(**id))
                .map(|(id, name)| (*id, name.clone())),
        );

        if self.awaiting.is_empty() {
            Ok(self.acl)
        } else {
            Err(self)
        }
    }
}

impl Acl {
    fn needs_name(&self, id: u32) -> bool {
        self.rules.iter().any(|r| r.user_id == Some(id))
            || self.groups.iter().any(|g| g.add.contains(&id) || g.members.contains(&id))
    }
}
