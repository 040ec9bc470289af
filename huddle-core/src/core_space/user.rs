//! User accounts as seen by the access core

use super::types::{normalize_email, ChannelId, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-channel notification preference
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPreference {
    /// Notify on every message (default when unset)
    #[default]
    All,
    /// Only direct mentions notify
    Mute,
}

impl NotificationPreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationPreference::All => "all",
            NotificationPreference::Mute => "mute",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "all" => Some(NotificationPreference::All),
            "mute" => Some(NotificationPreference::Mute),
            _ => None,
        }
    }
}

/// A registered account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,

    /// Display name, also the handle matched by `@mentions`
    pub display_name: String,

    /// Unique email, stored normalized
    pub email: String,

    /// Platform-wide administrator
    pub is_global_admin: bool,

    /// Channel → preference; unset channels default to `All`
    pub preferences: HashMap<ChannelId, NotificationPreference>,

    pub created_at: Timestamp,
}

impl User {
    pub fn new(id: UserId, display_name: impl Into<String>, email: &str) -> Self {
        User {
            id,
            display_name: display_name.into(),
            email: normalize_email(email),
            is_global_admin: false,
            preferences: HashMap::new(),
            created_at: Timestamp::now(),
        }
    }

    /// Builder-style helper for platform administrators
    pub fn global_admin(mut self) -> Self {
        self.is_global_admin = true;
        self
    }

    /// Effective preference for a channel
    pub fn preference_for(&self, channel_id: &ChannelId) -> NotificationPreference {
        self.preferences.get(channel_id).copied().unwrap_or_default()
    }
}
