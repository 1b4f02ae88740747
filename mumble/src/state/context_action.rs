//! Context-action registry. The server
//! adds/removes entries with `ContextActionModify`; the client exposes the
//! live set and fires a `ContextAction` event when the server invokes one on
//! its behalf.

use std::collections::HashMap;

pub const CONTEXT_SERVER: u32 = 1 << 0;
pub const CONTEXT_CHANNEL: u32 = 1 << 1;
pub const CONTEXT_USER: u32 = 1 << 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextAction {
    pub action: String,
    pub text: String,
    pub context: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ContextActionRegistry {
    actions: HashMap<String, ContextAction>,
}

impl ContextActionRegistry {
    pub fn add(&mut self, action: ContextAction) {
        self.actions.insert(action.action.clone(), action);
    }

    pub fn remove(&mut self, action: &str) -> Option<ContextAction> {
        self.actions.remove(action)
    }

    pub fn get(&self, action: &str) -> Option<&ContextAction> {
        self.actions.get(action)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContextAction> {
        self.actions.values()
    }
}
