//! Membership state machine: invitations, joins, leaves, removals, roles
//!
//! Every operation checks its preconditions in order and returns the first
//! failure without writing anything. Admissions go through the store's atomic
//! conditional writes, so a lost race surfaces as `ALREADY_MEMBER`.

use super::error::{AccessError, AccessResult, Denial};
use super::guard::{check_view_channel, AccessGuard};
use super::resolver::{resolve_snapshot, AccessSnapshot};
use crate::config::LimitsConfig;
use crate::core_notify::dispatch::NotificationDispatcher;
use crate::core_notify::fanout::NotificationFanout;
use crate::core_space::channel::{Channel, ChannelKind};
use crate::core_space::notification::{Notification, NotificationKind};
use crate::core_space::permission::{PermissionRecord, PermissionUpdate};
use crate::core_space::role::{PermissionSet, Role};
use crate::core_space::storage::{Admission, ChannelAdmission, Store, WorkspaceAdmission};
use crate::core_space::types::{ChannelId, NotificationId, UserId, WorkspaceId};
use crate::core_space::user::{NotificationPreference, User};
use crate::core_space::workspace::{Workspace, WorkspaceVisibility};
use crate::metrics::record_denial;
use std::sync::Arc;
use tracing::{debug, info};

pub struct MembershipService {
    store: Arc<dyn Store>,
    guard: AccessGuard,
    fanout: Arc<NotificationFanout>,
    dispatcher: Arc<NotificationDispatcher>,
    limits: LimitsConfig,
}

impl MembershipService {
    pub fn new(
        store: Arc<dyn Store>,
        fanout: Arc<NotificationFanout>,
        dispatcher: Arc<NotificationDispatcher>,
        limits: LimitsConfig,
    ) -> Self {
        Self {
            guard: AccessGuard::new(store.clone()),
            store,
            fanout,
            dispatcher,
            limits,
        }
    }

    // ===== Workspaces =====

    pub async fn create_workspace(
        &self,
        owner_id: &UserId,
        name: &str,
        visibility: WorkspaceVisibility,
    ) -> AccessResult<Workspace> {
        let name = self.validate_name(name)?;
        self.user("create_workspace", owner_id)?;

        let workspace = Workspace::new(name, owner_id.clone(), visibility);
        self.store.insert_workspace(&workspace)?;

        info!(workspace_id = %workspace.id, owner_id = %owner_id, visibility = visibility.as_str(), "workspace created");
        Ok(workspace)
    }

    /// Owner or global admin only. Channels, records, invitations and
    /// messages go with it.
    pub async fn delete_workspace(&self, caller: &UserId, workspace_id: &WorkspaceId) -> AccessResult<()> {
        const OP: &str = "delete_workspace";
        let workspace = self.workspace(OP, workspace_id)?;
        let is_global_admin = self.store.find_user(caller)?.is_some_and(|u| u.is_global_admin);
        if !workspace.is_owner(caller) && !is_global_admin {
            return Err(self.refuse(OP, Denial::NotAllowed));
        }

        self.store.delete_workspace(workspace_id)?;
        info!(workspace_id = %workspace_id, caller = %caller, "workspace deleted");
        Ok(())
    }

    /// Returns `false` when the email was already pending
    pub async fn invite_to_workspace(
        &self,
        caller: &UserId,
        workspace_id: &WorkspaceId,
        email: &str,
    ) -> AccessResult<bool> {
        const OP: &str = "invite_to_workspace";
        let grant = self.guard.manage_workspace(caller, workspace_id)?;
        let workspace = &grant.snapshot.workspace;

        let invitee = self
            .store
            .find_user_by_email(email)?
            .ok_or_else(|| self.refuse(OP, Denial::UserNotFound))?;
        if self.holds_membership(workspace, &invitee.id)? {
            return Err(self.refuse(OP, Denial::AlreadyMember));
        }

        let added = self.store.add_workspace_invitation(workspace_id, &invitee.email)?;
        info!(workspace_id = %workspace_id, invitee = %invitee.id, added, "workspace invitation");

        if added {
            self.notify(&invitee, NotificationKind::WorkspaceInvite, caller, workspace, None)
                .await?;
        }
        Ok(added)
    }

    /// Join with a workspace id as the code. Private workspaces need a
    /// pending invitation for the caller's email.
    pub async fn join_workspace(&self, caller: &UserId, code: &str) -> AccessResult<Workspace> {
        const OP: &str = "join_workspace";
        let user = self.user(OP, caller)?;
        let workspace = self
            .store
            .find_workspace(&WorkspaceId::new(code))?
            .ok_or_else(|| self.refuse(OP, Denial::InvalidInvite))?;

        if self.holds_membership(&workspace, caller)? {
            return Err(self.refuse(OP, Denial::AlreadyMember));
        }
        if !workspace.is_public() && !workspace.has_invitation(&user.email) {
            return Err(self.refuse(OP, Denial::InvalidInvite));
        }

        self.admit(OP, &workspace, &user).await?;
        info!(workspace_id = %workspace.id, user_id = %caller, "joined workspace");
        self.workspace(OP, &workspace.id)
    }

    /// Queue a join request on a public workspace. Returns `false` when one
    /// was already queued.
    pub async fn request_to_join(&self, caller: &UserId, workspace_id: &WorkspaceId) -> AccessResult<bool> {
        const OP: &str = "request_to_join";
        let user = self.user(OP, caller)?;
        let workspace = self.workspace(OP, workspace_id)?;

        if !workspace.is_public() {
            return Err(self.refuse(OP, Denial::NotAllowed));
        }
        if self.holds_membership(&workspace, caller)? {
            return Err(self.refuse(OP, Denial::AlreadyMember));
        }

        let queued = self.store.add_join_request(workspace_id, caller)?;
        if queued {
            info!(workspace_id = %workspace_id, user_id = %caller, "join requested");
            if let Some(owner) = self.store.find_user(&workspace.owner_id)? {
                self.notify(&owner, NotificationKind::JoinRequest, &user.id, &workspace, None)
                    .await?;
            }
        }
        Ok(queued)
    }

    pub async fn approve_join_request(
        &self,
        caller: &UserId,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
    ) -> AccessResult<()> {
        const OP: &str = "approve_join_request";
        let grant = self.guard.manage_workspace(caller, workspace_id)?;
        let workspace = &grant.snapshot.workspace;
        if !workspace.join_requests.contains(user_id) {
            return Err(self.refuse(OP, Denial::NotFound));
        }
        let requester = self.user(OP, user_id)?;

        if let Err(err) = self.admit(OP, workspace, &requester).await {
            if err.denial() == Some(Denial::AlreadyMember) {
                self.store.remove_join_request(workspace_id, user_id)?;
            }
            return Err(err);
        }

        info!(workspace_id = %workspace_id, user_id = %user_id, approved_by = %caller, "join request approved");
        self.notify(&requester, NotificationKind::JoinApproved, caller, workspace, None)
            .await
    }

    pub async fn reject_join_request(
        &self,
        caller: &UserId,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
    ) -> AccessResult<()> {
        const OP: &str = "reject_join_request";
        let grant = self.guard.manage_workspace(caller, workspace_id)?;
        if !self.store.remove_join_request(workspace_id, user_id)? {
            return Err(self.refuse(OP, Denial::NotFound));
        }

        info!(workspace_id = %workspace_id, user_id = %user_id, rejected_by = %caller, "join request rejected");
        if let Some(requester) = self.store.find_user(user_id)? {
            self.notify(&requester, NotificationKind::JoinRejected, caller, &grant.snapshot.workspace, None)
                .await?;
        }
        Ok(())
    }

    pub async fn leave_workspace(&self, caller: &UserId, workspace_id: &WorkspaceId) -> AccessResult<()> {
        const OP: &str = "leave_workspace";
        let workspace = self.workspace(OP, workspace_id)?;
        if workspace.is_owner(caller) {
            return Err(self.refuse(OP, Denial::CannotRemoveOwner));
        }
        if !self.store.remove_workspace_member(workspace_id, caller)? {
            return Err(self.refuse(OP, Denial::UserNotInWorkspace));
        }

        info!(workspace_id = %workspace_id, user_id = %caller, "left workspace");
        Ok(())
    }

    pub async fn remove_workspace_member(
        &self,
        caller: &UserId,
        workspace_id: &WorkspaceId,
        target: &UserId,
    ) -> AccessResult<()> {
        const OP: &str = "remove_workspace_member";
        let workspace = self.workspace(OP, workspace_id)?;
        if workspace.is_owner(target) {
            return Err(self.refuse(OP, Denial::CannotRemoveOwner));
        }
        self.guard.manage_workspace(caller, workspace_id)?;

        if !self.store.remove_workspace_member(workspace_id, target)? {
            return Err(self.refuse(OP, Denial::UserNotInWorkspace));
        }

        info!(workspace_id = %workspace_id, user_id = %target, removed_by = %caller, "workspace member removed");
        Ok(())
    }

    pub async fn update_workspace_role(
        &self,
        caller: &UserId,
        workspace_id: &WorkspaceId,
        target: &UserId,
        role: Role,
    ) -> AccessResult<PermissionRecord> {
        const OP: &str = "update_workspace_role";
        self.check_record_target(OP, caller, workspace_id, target)?;
        let record = self
            .store
            .update_permission(target, workspace_id, &PermissionUpdate::Role(role))?
            .ok_or_else(|| self.refuse(OP, Denial::UserNotInWorkspace))?;

        info!(workspace_id = %workspace_id, user_id = %target, role = role.as_str(), "workspace role updated");
        Ok(record)
    }

    /// Add explicit permission tokens on top of the role defaults
    pub async fn grant_permissions(
        &self,
        caller: &UserId,
        workspace_id: &WorkspaceId,
        target: &UserId,
        permissions: &PermissionSet,
    ) -> AccessResult<PermissionRecord> {
        const OP: &str = "grant_permissions";
        self.check_record_target(OP, caller, workspace_id, target)?;
        let record = self
            .store
            .update_permission(target, workspace_id, &PermissionUpdate::Grant(permissions.clone()))?
            .ok_or_else(|| self.refuse(OP, Denial::UserNotInWorkspace))?;

        info!(workspace_id = %workspace_id, user_id = %target, granted = permissions.len(), "permissions granted");
        Ok(record)
    }

    // ===== Channels =====

    /// The creator becomes the first member, and a creator holding a record
    /// gets an admin override for the new channel.
    pub async fn create_channel(
        &self,
        caller: &UserId,
        workspace_id: &WorkspaceId,
        name: &str,
        kind: ChannelKind,
    ) -> AccessResult<Channel> {
        let name = self.validate_name(name)?;
        self.guard.create_channel(caller, workspace_id, kind)?;

        let channel = Channel::new(workspace_id.clone(), name, kind, caller.clone());
        self.store.insert_channel(&channel)?;

        // No record (owner, global admin): nothing to override
        let creator_admin = PermissionUpdate::ChannelOverride {
            channel_id: channel.id.clone(),
            role: Role::Admin,
        };
        self.store.update_permission(caller, workspace_id, &creator_admin)?;

        info!(channel_id = %channel.id, workspace_id = %workspace_id, kind = kind.as_str(), creator = %caller, "channel created");
        Ok(channel)
    }

    /// Channels of a workspace the caller can view
    pub async fn list_channels(&self, caller: &UserId, workspace_id: &WorkspaceId) -> AccessResult<Vec<Channel>> {
        let workspace = self.workspace("list_channels", workspace_id)?;
        let user = self.store.find_user(caller)?;
        let record = self.store.find_permission(caller, workspace_id)?;

        let channels = self
            .store
            .list_channels(workspace_id)?
            .into_iter()
            .filter(|channel| {
                let snapshot = AccessSnapshot {
                    user_id: caller.clone(),
                    workspace: workspace.clone(),
                    channel: Some(channel.clone()),
                    user: user.clone(),
                    record: record.clone(),
                };
                check_view_channel(&snapshot).is_ok()
            })
            .collect();
        Ok(channels)
    }

    /// Returns `false` when the email was already pending
    pub async fn invite_to_channel(&self, caller: &UserId, channel_id: &ChannelId, email: &str) -> AccessResult<bool> {
        const OP: &str = "invite_to_channel";
        let grant = self.guard.manage_channel(caller, channel_id)?;
        let channel = self.granted_channel(&grant.snapshot)?;

        let invitee = self
            .store
            .find_user_by_email(email)?
            .ok_or_else(|| self.refuse(OP, Denial::UserNotFound))?;
        if channel.is_member(&invitee.id) {
            return Err(self.refuse(OP, Denial::AlreadyMember));
        }

        let added = self.store.add_channel_invitation(channel_id, &invitee.email)?;
        info!(channel_id = %channel_id, invitee = %invitee.id, added, "channel invitation");

        if added {
            self.notify(
                &invitee,
                NotificationKind::ChannelInvite,
                caller,
                &grant.snapshot.workspace,
                Some(channel),
            )
            .await?;
        }
        Ok(added)
    }

    /// Join with a channel id as the code. Private channels need a pending
    /// invitation; public ones need non-guest workspace membership.
    pub async fn join_channel(&self, caller: &UserId, code: &str) -> AccessResult<Channel> {
        const OP: &str = "join_channel";
        let user = self.user(OP, caller)?;
        let channel = self
            .store
            .find_channel(&ChannelId::new(code))?
            .ok_or_else(|| self.refuse(OP, Denial::InvalidInvite))?;
        let workspace = self
            .store
            .find_workspace(&channel.workspace_id)?
            .ok_or_else(|| self.refuse(OP, Denial::InvalidInvite))?;

        if channel.is_member(caller) {
            return Err(self.refuse(OP, Denial::AlreadyMember));
        }

        match channel.kind {
            ChannelKind::Private => {
                if !channel.has_invitation(&user.email) {
                    return Err(self.refuse(OP, Denial::InvalidInvite));
                }
            }
            ChannelKind::Public => {
                let access = resolve_snapshot(&AccessSnapshot {
                    user_id: caller.clone(),
                    workspace: workspace.clone(),
                    channel: None,
                    user: Some(user.clone()),
                    record: self.store.find_permission(caller, &workspace.id)?,
                });
                match access.workspace_role {
                    None => return Err(self.refuse(OP, Denial::UserNotInWorkspace)),
                    Some(Role::Guest) => return Err(self.refuse(OP, Denial::NotAllowed)),
                    Some(_) => {}
                }
            }
        }

        self.admit_to_channel(OP, &channel, &user).await?;
        info!(channel_id = %channel.id, user_id = %caller, "joined channel");
        self.channel(OP, &channel.id)
    }

    /// Add a user directly. Private channels admit workspace outsiders as
    /// guests; public channels require workspace membership.
    pub async fn add_channel_member(&self, caller: &UserId, channel_id: &ChannelId, target: &UserId) -> AccessResult<()> {
        const OP: &str = "add_channel_member";
        let grant = self.guard.manage_channel(caller, channel_id)?;
        let channel = self.granted_channel(&grant.snapshot)?;
        let user = self.user(OP, target)?;

        if channel.is_member(target) {
            return Err(self.refuse(OP, Denial::UserAlreadyInChannel));
        }
        if channel.is_public() && !self.holds_membership(&grant.snapshot.workspace, target)? {
            return Err(self.refuse(OP, Denial::UserNotInWorkspace));
        }

        let result = self.admit_to_channel(OP, channel, &user).await;
        if result.as_ref().err().and_then(AccessError::denial) == Some(Denial::AlreadyMember) {
            return Err(self.refuse(OP, Denial::UserAlreadyInChannel));
        }
        result?;

        info!(channel_id = %channel_id, user_id = %target, added_by = %caller, "channel member added");
        Ok(())
    }

    pub async fn leave_channel(&self, caller: &UserId, channel_id: &ChannelId) -> AccessResult<()> {
        const OP: &str = "leave_channel";
        self.channel(OP, channel_id)?;
        if !self.store.remove_channel_member(channel_id, caller)? {
            return Err(self.refuse(OP, Denial::NotFound));
        }

        info!(channel_id = %channel_id, user_id = %caller, "left channel");
        Ok(())
    }

    pub async fn remove_channel_member(&self, caller: &UserId, channel_id: &ChannelId, target: &UserId) -> AccessResult<()> {
        const OP: &str = "remove_channel_member";
        self.guard.remove_channel_member(caller, channel_id, target)?;
        if !self.store.remove_channel_member(channel_id, target)? {
            return Err(self.refuse(OP, Denial::NotFound));
        }

        info!(channel_id = %channel_id, user_id = %target, removed_by = %caller, "channel member removed");
        Ok(())
    }

    pub async fn update_channel_role(
        &self,
        caller: &UserId,
        channel_id: &ChannelId,
        target: &UserId,
        role: Role,
    ) -> AccessResult<PermissionRecord> {
        const OP: &str = "update_channel_role";
        let grant = self.guard.manage_channel(caller, channel_id)?;
        let channel = self.granted_channel(&grant.snapshot)?;

        if !channel.is_member(target) {
            return Err(self.refuse(OP, Denial::NotFound));
        }
        if grant.snapshot.workspace.is_owner(target) {
            return Err(self.refuse(OP, Denial::NotAllowed));
        }
        let update = PermissionUpdate::ChannelOverride {
            channel_id: channel_id.clone(),
            role,
        };
        let Some(record) = self.store.update_permission(target, &channel.workspace_id, &update)? else {
            // Lost the target between the check and the write
            let still_in_channel = self.store.find_channel(channel_id)?.is_some_and(|c| c.is_member(target));
            let denial = if still_in_channel {
                Denial::UserNotInWorkspace
            } else {
                Denial::NotFound
            };
            return Err(self.refuse(OP, denial));
        };

        info!(channel_id = %channel_id, user_id = %target, role = role.as_str(), "channel role updated");
        Ok(record)
    }

    // ===== Per-user =====

    pub async fn set_notification_preference(
        &self,
        caller: &UserId,
        channel_id: &ChannelId,
        preference: NotificationPreference,
    ) -> AccessResult<()> {
        self.guard.view_channel(Some(caller), channel_id)?;
        self.store.set_notification_preference(caller, channel_id, preference)?;
        debug!(user_id = %caller, channel_id = %channel_id, preference = preference.as_str(), "preference set");
        Ok(())
    }

    /// Only the recipient may mark a notification read
    pub async fn mark_notification_read(&self, caller: &UserId, notification_id: &NotificationId) -> AccessResult<()> {
        const OP: &str = "mark_notification_read";
        let notification = self
            .store
            .find_notification(notification_id)?
            .ok_or_else(|| self.refuse(OP, Denial::NotFound))?;
        if &notification.recipient_id != caller {
            return Err(self.refuse(OP, Denial::NotAllowed));
        }
        self.store.mark_notification_read(notification_id)?;
        Ok(())
    }

    pub async fn list_notifications(&self, caller: &UserId, unread_only: bool) -> AccessResult<Vec<Notification>> {
        Ok(self.store.list_notifications(caller, unread_only)?)
    }

    // ===== Helpers =====

    fn validate_name(&self, name: &str) -> AccessResult<String> {
        let name = name.trim();
        let len = name.chars().count();
        if len == 0 || len > self.limits.max_name_len {
            return Err(AccessError::InvalidInput(format!(
                "name must be 1 to {} characters, got {}",
                self.limits.max_name_len, len
            )));
        }
        Ok(name.to_string())
    }

    fn refuse(&self, operation: &'static str, denial: Denial) -> AccessError {
        record_denial(operation, denial.code());
        debug!(operation, code = denial.code(), "membership operation refused");
        denial.into()
    }

    fn user(&self, operation: &'static str, user_id: &UserId) -> AccessResult<User> {
        self.store
            .find_user(user_id)?
            .ok_or_else(|| self.refuse(operation, Denial::UserNotFound))
    }

    fn workspace(&self, operation: &'static str, workspace_id: &WorkspaceId) -> AccessResult<Workspace> {
        self.store
            .find_workspace(workspace_id)?
            .ok_or_else(|| self.refuse(operation, Denial::WorkspaceNotFound))
    }

    fn channel(&self, operation: &'static str, channel_id: &ChannelId) -> AccessResult<Channel> {
        self.store
            .find_channel(channel_id)?
            .ok_or_else(|| self.refuse(operation, Denial::ChannelNotFound))
    }

    fn granted_channel<'a>(&self, snapshot: &'a AccessSnapshot) -> AccessResult<&'a Channel> {
        snapshot
            .channel
            .as_ref()
            .ok_or(AccessError::Denied(Denial::ChannelNotFound))
    }

    /// Owner, or anyone holding a Permission record
    fn holds_membership(&self, workspace: &Workspace, user_id: &UserId) -> AccessResult<bool> {
        Ok(workspace.is_owner(user_id) || self.store.find_permission(user_id, &workspace.id)?.is_some())
    }

    /// Shared by role updates and grants. The record itself is checked by
    /// the conditional write.
    fn check_record_target(
        &self,
        operation: &'static str,
        caller: &UserId,
        workspace_id: &WorkspaceId,
        target: &UserId,
    ) -> AccessResult<()> {
        let grant = self.guard.manage_workspace(caller, workspace_id)?;
        if grant.snapshot.workspace.is_owner(target) {
            return Err(self.refuse(operation, Denial::NotAllowed));
        }
        Ok(())
    }

    async fn admit(&self, operation: &'static str, workspace: &Workspace, user: &User) -> AccessResult<()> {
        let admission = WorkspaceAdmission {
            record: PermissionRecord::member(user.id.clone(), workspace.id.clone()),
            email: Some(user.email.clone()),
        };
        match self.store.admit_workspace_member(&admission)? {
            Admission::Admitted => Ok(()),
            Admission::AlreadyMember => Err(self.refuse(operation, Denial::AlreadyMember)),
        }
    }

    async fn admit_to_channel(&self, operation: &'static str, channel: &Channel, user: &User) -> AccessResult<()> {
        let admission = ChannelAdmission {
            workspace_id: channel.workspace_id.clone(),
            channel_id: channel.id.clone(),
            user_id: user.id.clone(),
            role: Role::Member,
            email: Some(user.email.clone()),
        };
        match self.store.admit_channel_member(&admission)? {
            Admission::Admitted => Ok(()),
            Admission::AlreadyMember => Err(self.refuse(operation, Denial::AlreadyMember)),
        }
    }

    /// Best effort: delivery problems are absorbed by the dispatcher
    async fn notify(
        &self,
        recipient: &User,
        kind: NotificationKind,
        actor_id: &UserId,
        workspace: &Workspace,
        channel: Option<&Channel>,
    ) -> AccessResult<()> {
        let actor = match self.store.find_user(actor_id)? {
            Some(actor) => actor,
            None => User::new(actor_id.clone(), actor_id.as_str(), ""),
        };
        let intent = self.fanout.membership_event(recipient, kind, &actor, workspace, channel);
        self.dispatcher.dispatch(vec![intent]).await;
        Ok(())
    }
}
