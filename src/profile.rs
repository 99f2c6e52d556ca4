//! This bridge's own MkIX identity, fetched once at startup via
//! `GetMyProfile` and consulted by the classifier to drop self-authored
//! frames and tell group chat from private chat.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Handle shared between the classifier and the action dispatcher, the
/// only two places that mutate `groups`/`friends` after startup.
pub type SharedProfile = Arc<Mutex<MyProfile>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MyProfile {
    pub uuid: String,
    pub username: String,
    #[serde(default)]
    pub bio: String,
    #[serde(rename = "lastUpdate")]
    pub last_update: i64,
    #[serde(default)]
    pub groups: HashSet<String>,
    #[serde(default)]
    pub friends: HashSet<String>,
}

impl MyProfile {
    pub fn is_self(&self, sender_id: &str) -> bool {
        self.uuid == sender_id
    }
}
