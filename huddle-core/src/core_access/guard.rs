//! Access decisions
//!
//! The `check_*` functions are pure over a snapshot. [`AccessGuard`] loads the
//! snapshot, runs the check, and logs/counts the outcome.

use super::error::{AccessError, AccessResult, Denial};
use super::resolver::{resolve_snapshot, AccessSnapshot, PermissionResolver, ResolvedAccess};
use crate::core_space::channel::{Channel, ChannelKind};
use crate::core_space::role::{Permission, Role};
use crate::core_space::storage::Store;
use crate::core_space::types::{ChannelId, UserId, WorkspaceId};
use crate::metrics::record_denial;
use std::sync::Arc;
use tracing::debug;

/// Channel membership as seen by posting and viewing.
///
/// Explicit members always count. Non-guest workspace members (admins
/// included) are implicit members of public channels only; private channels
/// and guests need explicit membership. Implicit members follow the channel
/// room but receive no per-user `message` notifications.
pub fn is_channel_member(snapshot: &AccessSnapshot, access: &ResolvedAccess) -> bool {
    let Some(channel) = &snapshot.channel else {
        return false;
    };
    channel.is_member(&snapshot.user_id) || (channel.is_public() && access.is_full_member())
}

pub fn check_create_channel(snapshot: &AccessSnapshot, kind: ChannelKind) -> Result<ResolvedAccess, Denial> {
    let access = resolve_snapshot(snapshot);
    let allowed = match access.workspace_role {
        Some(Role::Admin) => true,
        Some(Role::Member) => kind == ChannelKind::Private || access.can(Permission::ManageChannels),
        Some(Role::Guest) | None => false,
    };
    allowed.then_some(access).ok_or(Denial::NotAllowed)
}

pub fn check_post_message(snapshot: &AccessSnapshot) -> Result<ResolvedAccess, Denial> {
    let access = resolve_snapshot(snapshot);
    if is_channel_member(snapshot, &access) && access.can(Permission::Post) {
        Ok(access)
    } else {
        Err(Denial::NotAllowed)
    }
}

pub fn check_manage_workspace(snapshot: &AccessSnapshot) -> Result<ResolvedAccess, Denial> {
    let access = resolve_snapshot(snapshot);
    access.is_workspace_admin().then_some(access).ok_or(Denial::NotAllowed)
}

pub fn check_manage_channel(snapshot: &AccessSnapshot) -> Result<ResolvedAccess, Denial> {
    let access = resolve_snapshot(snapshot);
    access.is_channel_admin().then_some(access).ok_or(Denial::NotAllowed)
}

/// The owner can never be removed, whoever asks
pub fn check_remove_channel_member(snapshot: &AccessSnapshot, target: &UserId) -> Result<ResolvedAccess, Denial> {
    if snapshot.workspace.is_owner(target) {
        return Err(Denial::CannotRemoveOwner);
    }
    check_manage_channel(snapshot)
}

pub fn check_view_channel(snapshot: &AccessSnapshot) -> Result<ResolvedAccess, Denial> {
    let access = resolve_snapshot(snapshot);
    let public = snapshot.workspace.is_public() && snapshot.channel.as_ref().is_some_and(Channel::is_public);
    if public || is_channel_member(snapshot, &access) || access.is_channel_admin() {
        Ok(access)
    } else {
        Err(Denial::NotAllowed)
    }
}

/// An allowed decision together with the state it was made on
#[derive(Debug, Clone)]
pub struct Grant {
    pub snapshot: AccessSnapshot,
    pub access: ResolvedAccess,
}

/// Store-backed guard
#[derive(Clone)]
pub struct AccessGuard {
    resolver: PermissionResolver,
}

impl AccessGuard {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            resolver: PermissionResolver::new(store),
        }
    }

    pub fn resolver(&self) -> &PermissionResolver {
        &self.resolver
    }

    pub fn create_channel(&self, user_id: &UserId, workspace_id: &WorkspaceId, kind: ChannelKind) -> AccessResult<Grant> {
        let snapshot = self.load("create_channel", || self.resolver.snapshot(user_id, workspace_id, None))?;
        self.evaluate("create_channel", snapshot, |s| check_create_channel(s, kind))
    }

    pub fn post_message(&self, user_id: &UserId, channel_id: &ChannelId) -> AccessResult<Grant> {
        let snapshot = self.load("post_message", || self.resolver.snapshot_for_channel(user_id, channel_id))?;
        self.evaluate("post_message", snapshot, check_post_message)
    }

    pub fn manage_workspace(&self, user_id: &UserId, workspace_id: &WorkspaceId) -> AccessResult<Grant> {
        let snapshot = self.load("manage_workspace", || self.resolver.snapshot(user_id, workspace_id, None))?;
        self.evaluate("manage_workspace", snapshot, check_manage_workspace)
    }

    pub fn manage_channel(&self, user_id: &UserId, channel_id: &ChannelId) -> AccessResult<Grant> {
        let snapshot = self.load("manage_channel", || self.resolver.snapshot_for_channel(user_id, channel_id))?;
        self.evaluate("manage_channel", snapshot, check_manage_channel)
    }

    pub fn remove_channel_member(
        &self,
        caller: &UserId,
        channel_id: &ChannelId,
        target: &UserId,
    ) -> AccessResult<Grant> {
        let snapshot = self.load("remove_channel_member", || self.resolver.snapshot_for_channel(caller, channel_id))?;
        self.evaluate("remove_channel_member", snapshot, |s| check_remove_channel_member(s, target))
    }

    /// Anonymous callers may only read public channels of public workspaces
    pub fn view_channel(&self, user_id: Option<&UserId>, channel_id: &ChannelId) -> AccessResult<Channel> {
        let anonymous = UserId::new("");
        let user_id = user_id.unwrap_or(&anonymous);
        let snapshot = self.load("view_channel", || self.resolver.snapshot_for_channel(user_id, channel_id))?;
        let grant = self.evaluate("view_channel", snapshot, check_view_channel)?;
        grant
            .snapshot
            .channel
            .ok_or(AccessError::Denied(Denial::ChannelNotFound))
    }

    fn load(
        &self,
        operation: &'static str,
        load: impl FnOnce() -> AccessResult<AccessSnapshot>,
    ) -> AccessResult<AccessSnapshot> {
        load().map_err(|err| {
            if let Some(denial) = err.denial() {
                record_denial(operation, denial.code());
                debug!(operation, code = denial.code(), "access denied");
            }
            err
        })
    }

    fn evaluate(
        &self,
        operation: &'static str,
        snapshot: AccessSnapshot,
        check: impl FnOnce(&AccessSnapshot) -> Result<ResolvedAccess, Denial>,
    ) -> AccessResult<Grant> {
        match check(&snapshot) {
            Ok(access) => {
                debug!(
                    operation,
                    user_id = %snapshot.user_id,
                    workspace_id = %snapshot.workspace.id,
                    role = ?access.role(),
                    "access allowed"
                );
                Ok(Grant { snapshot, access })
            }
            Err(denial) => {
                record_denial(operation, denial.code());
                debug!(
                    operation,
                    user_id = %snapshot.user_id,
                    workspace_id = %snapshot.workspace.id,
                    code = denial.code(),
                    "access denied"
                );
                Err(denial.into())
            }
        }
    }
}
