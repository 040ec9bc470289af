//! Effective role and permission resolution
//!
//! Resolution is a pure function of an [`AccessSnapshot`]. The
//! [`PermissionResolver`] only loads a fresh snapshot from the store on every
//! call; nothing is cached between calls.

use super::error::{AccessResult, Denial};
use crate::core_space::channel::Channel;
use crate::core_space::permission::PermissionRecord;
use crate::core_space::role::{Permission, PermissionSet, Role, RoleCatalog};
use crate::core_space::storage::Store;
use crate::core_space::types::{ChannelId, UserId, WorkspaceId};
use crate::core_space::user::User;
use crate::core_space::workspace::Workspace;
use serde::Serialize;
use std::sync::Arc;

/// Everything a decision about one user needs, read in one go
#[derive(Debug, Clone)]
pub struct AccessSnapshot {
    pub user_id: UserId,
    pub workspace: Workspace,
    pub channel: Option<Channel>,
    /// `None` for unknown users; they resolve to no role
    pub user: Option<User>,
    pub record: Option<PermissionRecord>,
}

/// Which rule produced the resolved role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleSource {
    Owner,
    GlobalAdmin,
    Record,
    None,
}

/// Result of resolution for a (user, workspace, channel?) triple
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedAccess {
    pub source: RoleSource,

    /// Role at workspace scope
    pub workspace_role: Option<Role>,

    /// Role governing channel-scoped decisions (override, else workspace role).
    /// `None` when no channel was given.
    pub channel_role: Option<Role>,

    /// Defaults of the scoped role plus explicit grants
    pub permissions: PermissionSet,
}

impl ResolvedAccess {
    fn none() -> Self {
        ResolvedAccess {
            source: RoleSource::None,
            workspace_role: None,
            channel_role: None,
            permissions: PermissionSet::empty(),
        }
    }

    /// Role for the narrowest scope that was resolved
    pub fn role(&self) -> Option<Role> {
        self.channel_role.or(self.workspace_role)
    }

    pub fn can(&self, permission: Permission) -> bool {
        self.permissions.contains(permission)
    }

    /// Owner, global admin or admin record
    pub fn is_workspace_admin(&self) -> bool {
        self.workspace_role == Some(Role::Admin)
    }

    pub fn is_channel_admin(&self) -> bool {
        self.is_workspace_admin() || self.channel_role == Some(Role::Admin)
    }

    /// Holds a non-guest workspace role
    pub fn is_full_member(&self) -> bool {
        matches!(self.workspace_role, Some(Role::Admin) | Some(Role::Member))
    }
}

/// Resolve effective access. First match wins:
///
/// 1. workspace owner: admin, full set
/// 2. global admin: admin, full set
/// 3. Permission record, or nothing at all
/// 4. a channel override replaces the role for channel scope only
/// 5. permissions = defaults(scoped role) ∪ explicit set
pub fn resolve_snapshot(snapshot: &AccessSnapshot) -> ResolvedAccess {
    let scoped = snapshot.channel.is_some();

    let elevated = if snapshot.workspace.is_owner(&snapshot.user_id) {
        Some(RoleSource::Owner)
    } else if snapshot.user.as_ref().is_some_and(|u| u.is_global_admin) {
        Some(RoleSource::GlobalAdmin)
    } else {
        None
    };

    if let Some(source) = elevated {
        return ResolvedAccess {
            source,
            workspace_role: Some(Role::Admin),
            channel_role: scoped.then_some(Role::Admin),
            permissions: RoleCatalog::full_set(),
        };
    }

    let Some(record) = &snapshot.record else {
        return ResolvedAccess::none();
    };

    let channel_role = snapshot
        .channel
        .as_ref()
        .map(|c| record.channel_override(&c.id).unwrap_or(record.role));
    let scoped_role = channel_role.unwrap_or(record.role);

    ResolvedAccess {
        source: RoleSource::Record,
        workspace_role: Some(record.role),
        channel_role,
        permissions: RoleCatalog::defaults(scoped_role).union(&record.permission_set),
    }
}

/// Loads snapshots from the store and resolves them
#[derive(Clone)]
pub struct PermissionResolver {
    store: Arc<dyn Store>,
}

impl PermissionResolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Snapshot at workspace scope, optionally narrowed to a channel.
    /// A channel from another workspace counts as missing.
    pub fn snapshot(
        &self,
        user_id: &UserId,
        workspace_id: &WorkspaceId,
        channel_id: Option<&ChannelId>,
    ) -> AccessResult<AccessSnapshot> {
        let workspace = self
            .store
            .find_workspace(workspace_id)?
            .ok_or(Denial::WorkspaceNotFound)?;

        let channel = match channel_id {
            Some(id) => {
                let channel = self
                    .store
                    .find_channel(id)?
                    .filter(|c| &c.workspace_id == workspace_id)
                    .ok_or(Denial::ChannelNotFound)?;
                Some(channel)
            }
            None => None,
        };

        self.complete(user_id, workspace, channel)
    }

    /// Snapshot for a channel, looking up its workspace
    pub fn snapshot_for_channel(&self, user_id: &UserId, channel_id: &ChannelId) -> AccessResult<AccessSnapshot> {
        let channel = self.store.find_channel(channel_id)?.ok_or(Denial::ChannelNotFound)?;
        let workspace = self
            .store
            .find_workspace(&channel.workspace_id)?
            .ok_or(Denial::WorkspaceNotFound)?;
        self.complete(user_id, workspace, Some(channel))
    }

    fn complete(
        &self,
        user_id: &UserId,
        workspace: Workspace,
        channel: Option<Channel>,
    ) -> AccessResult<AccessSnapshot> {
        let user = self.store.find_user(user_id)?;
        let record = self.store.find_permission(user_id, &workspace.id)?;
        Ok(AccessSnapshot {
            user_id: user_id.clone(),
            workspace,
            channel,
            user,
            record,
        })
    }

    pub fn resolve(
        &self,
        user_id: &UserId,
        workspace_id: &WorkspaceId,
        channel_id: Option<&ChannelId>,
    ) -> AccessResult<ResolvedAccess> {
        let snapshot = self.snapshot(user_id, workspace_id, channel_id)?;
        Ok(resolve_snapshot(&snapshot))
    }
}
