//! Permission records: the (user, workspace) → role binding

use super::role::{PermissionSet, Role};
use super::types::{ChannelId, Timestamp, UserId, WorkspaceId};
use serde::{Deserialize, Serialize};

/// Per-channel role that supersedes the workspace role for channel-scoped
/// decisions only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRoleOverride {
    pub channel_id: ChannelId,
    pub role: Role,
}

/// At most one record exists per (user, workspace)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRecord {
    pub user_id: UserId,
    pub workspace_id: WorkspaceId,
    pub role: Role,

    /// Unique per channel
    pub channel_overrides: Vec<ChannelRoleOverride>,

    /// Explicit grants, added on top of the role defaults
    pub permission_set: PermissionSet,

    pub updated_at: Timestamp,
}

impl PermissionRecord {
    pub fn new(user_id: UserId, workspace_id: WorkspaceId, role: Role) -> Self {
        PermissionRecord {
            user_id,
            workspace_id,
            role,
            channel_overrides: Vec::new(),
            permission_set: PermissionSet::empty(),
            updated_at: Timestamp::now(),
        }
    }

    /// Default record created on join / invite acceptance
    pub fn member(user_id: UserId, workspace_id: WorkspaceId) -> Self {
        Self::new(user_id, workspace_id, Role::Member)
    }

    pub fn channel_override(&self, channel_id: &ChannelId) -> Option<Role> {
        self.channel_overrides
            .iter()
            .find(|o| &o.channel_id == channel_id)
            .map(|o| o.role)
    }

    /// Insert or replace the override for a channel
    pub fn set_channel_override(&mut self, channel_id: ChannelId, role: Role) {
        match self.channel_overrides.iter_mut().find(|o| o.channel_id == channel_id) {
            Some(existing) => existing.role = role,
            None => self.channel_overrides.push(ChannelRoleOverride { channel_id, role }),
        }
        self.updated_at = Timestamp::now();
    }

    /// Drop the override for a channel, returning whether one existed
    pub fn remove_channel_override(&mut self, channel_id: &ChannelId) -> bool {
        let before = self.channel_overrides.len();
        self.channel_overrides.retain(|o| &o.channel_id != channel_id);
        let removed = self.channel_overrides.len() != before;
        if removed {
            self.updated_at = Timestamp::now();
        }
        removed
    }
}

/// In-place change to an existing record. Stores apply it atomically and
/// never create a record for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionUpdate {
    Role(Role),
    Grant(PermissionSet),
    /// Only applies while the user is in the channel's member set
    ChannelOverride { channel_id: ChannelId, role: Role },
}

impl PermissionUpdate {
    pub fn apply(&self, record: &mut PermissionRecord) {
        match self {
            PermissionUpdate::Role(role) => record.role = *role,
            PermissionUpdate::Grant(set) => record.permission_set.extend(set),
            PermissionUpdate::ChannelOverride { channel_id, role } => {
                record.set_channel_override(channel_id.clone(), *role)
            }
        }
        record.updated_at = Timestamp::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> PermissionRecord {
        PermissionRecord::member(UserId::new("bob"), WorkspaceId::new("w1"))
    }

    #[test]
    fn test_override_is_unique_per_channel() {
        let mut record = record();
        let channel = ChannelId::new("c1");

        record.set_channel_override(channel.clone(), Role::Guest);
        record.set_channel_override(channel.clone(), Role::Admin);

        assert_eq!(record.channel_overrides.len(), 1);
        assert_eq!(record.channel_override(&channel), Some(Role::Admin));
    }

    #[test]
    fn test_remove_override() {
        let mut record = record();
        let channel = ChannelId::new("c1");
        record.set_channel_override(channel.clone(), Role::Admin);

        assert!(record.remove_channel_override(&channel));
        assert!(!record.remove_channel_override(&channel));
        assert_eq!(record.channel_override(&channel), None);
    }

    #[test]
    fn test_updates_merge_into_record() {
        let mut record = record();
        let c1 = ChannelId::new("c1");
        let c2 = ChannelId::new("c2");
        record.set_channel_override(c1.clone(), Role::Member);

        PermissionUpdate::ChannelOverride {
            channel_id: c2.clone(),
            role: Role::Admin,
        }
        .apply(&mut record);
        PermissionUpdate::Role(Role::Admin).apply(&mut record);

        assert_eq!(record.role, Role::Admin);
        assert_eq!(record.channel_override(&c1), Some(Role::Member));
        assert_eq!(record.channel_override(&c2), Some(Role::Admin));
    }
}
