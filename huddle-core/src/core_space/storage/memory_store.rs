//! In-memory store
//!
//! All state sits behind one mutex, so every trait method (admissions
//! included) is atomic with respect to every other.

use super::{
    Admission, ChannelAdmission, IdentityStore, MembershipStore, MessageStore, NotificationStore,
    StoreError, StoreResult, WorkspaceAdmission,
};
use crate::core_space::channel::Channel;
use crate::core_space::message::Message;
use crate::core_space::notification::Notification;
use crate::core_space::permission::{PermissionRecord, PermissionUpdate};
use crate::core_space::role::Role;
use crate::core_space::types::{normalize_email, ChannelId, NotificationId, UserId, WorkspaceId};
use crate::core_space::user::{NotificationPreference, User};
use crate::core_space::workspace::Workspace;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct State {
    users: HashMap<UserId, User>,
    workspaces: HashMap<WorkspaceId, Workspace>,
    channels: HashMap<ChannelId, Channel>,
    permissions: HashMap<(UserId, WorkspaceId), PermissionRecord>,
    messages: Vec<Message>,
    notifications: Vec<Notification>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl IdentityStore for MemoryStore {
    fn insert_user(&self, user: &User) -> StoreResult<()> {
        let mut state = self.lock()?;
        if state.users.contains_key(&user.id) {
            return Err(StoreError::Conflict(format!("user {}", user.id)));
        }
        if state.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict(format!("email {}", user.email)));
        }
        state.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    fn find_user(&self, user_id: &UserId) -> StoreResult<Option<User>> {
        Ok(self.lock()?.users.get(user_id).cloned())
    }

    fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let email = normalize_email(email);
        Ok(self.lock()?.users.values().find(|u| u.email == email).cloned())
    }

    fn find_user_by_handle(&self, handle: &str) -> StoreResult<Option<User>> {
        Ok(self
            .lock()?
            .users
            .values()
            .filter(|u| u.display_name == handle)
            .min_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)))
            .cloned())
    }

    fn set_notification_preference(
        &self,
        user_id: &UserId,
        channel_id: &ChannelId,
        preference: NotificationPreference,
    ) -> StoreResult<()> {
        let mut state = self.lock()?;
        let user = state
            .users
            .get_mut(user_id)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown user {}", user_id)))?;
        user.preferences.insert(channel_id.clone(), preference);
        Ok(())
    }
}

impl MembershipStore for MemoryStore {
    fn insert_workspace(&self, workspace: &Workspace) -> StoreResult<()> {
        let mut state = self.lock()?;
        if state.workspaces.contains_key(&workspace.id) {
            return Err(StoreError::Conflict(format!("workspace {}", workspace.id)));
        }
        state.workspaces.insert(workspace.id.clone(), workspace.clone());
        Ok(())
    }

    fn find_workspace(&self, workspace_id: &WorkspaceId) -> StoreResult<Option<Workspace>> {
        Ok(self.lock()?.workspaces.get(workspace_id).cloned())
    }

    fn delete_workspace(&self, workspace_id: &WorkspaceId) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.workspaces.remove(workspace_id);
        state.channels.retain(|_, c| &c.workspace_id != workspace_id);
        state.permissions.retain(|(_, ws), _| ws != workspace_id);
        state.messages.retain(|m| &m.workspace_id != workspace_id);
        Ok(())
    }

    fn add_workspace_invitation(&self, workspace_id: &WorkspaceId, email: &str) -> StoreResult<bool> {
        let mut state = self.lock()?;
        Ok(state
            .workspaces
            .get_mut(workspace_id)
            .map(|ws| ws.invitations.insert(normalize_email(email)))
            .unwrap_or(false))
    }

    fn add_join_request(&self, workspace_id: &WorkspaceId, user_id: &UserId) -> StoreResult<bool> {
        let mut state = self.lock()?;
        Ok(state
            .workspaces
            .get_mut(workspace_id)
            .map(|ws| ws.join_requests.insert(user_id.clone()))
            .unwrap_or(false))
    }

    fn remove_join_request(&self, workspace_id: &WorkspaceId, user_id: &UserId) -> StoreResult<bool> {
        let mut state = self.lock()?;
        Ok(state
            .workspaces
            .get_mut(workspace_id)
            .map(|ws| ws.join_requests.remove(user_id))
            .unwrap_or(false))
    }

    fn admit_workspace_member(&self, admission: &WorkspaceAdmission) -> StoreResult<Admission> {
        let mut state = self.lock()?;
        let record = &admission.record;
        let key = (record.user_id.clone(), record.workspace_id.clone());
        if state.permissions.contains_key(&key) {
            return Ok(Admission::AlreadyMember);
        }

        let workspace = state
            .workspaces
            .get_mut(&record.workspace_id)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown workspace {}", record.workspace_id)))?;
        workspace.members.insert(record.user_id.clone());
        workspace.join_requests.remove(&record.user_id);
        if let Some(email) = &admission.email {
            workspace.invitations.remove(&normalize_email(email));
        }

        state.permissions.insert(key, record.clone());
        Ok(Admission::Admitted)
    }

    fn remove_workspace_member(&self, workspace_id: &WorkspaceId, user_id: &UserId) -> StoreResult<bool> {
        let mut state = self.lock()?;
        let removed = match state.workspaces.get_mut(workspace_id) {
            Some(ws) => ws.members.remove(user_id),
            None => false,
        };
        let had_record = state
            .permissions
            .remove(&(user_id.clone(), workspace_id.clone()))
            .is_some();

        for channel in state.channels.values_mut() {
            if &channel.workspace_id == workspace_id {
                channel.members.remove(user_id);
            }
        }
        Ok(removed || had_record)
    }

    fn insert_channel(&self, channel: &Channel) -> StoreResult<()> {
        let mut state = self.lock()?;
        if !state.workspaces.contains_key(&channel.workspace_id) {
            return Err(StoreError::Corrupt(format!("unknown workspace {}", channel.workspace_id)));
        }
        if state.channels.contains_key(&channel.id) {
            return Err(StoreError::Conflict(format!("channel {}", channel.id)));
        }
        state.channels.insert(channel.id.clone(), channel.clone());
        Ok(())
    }

    fn find_channel(&self, channel_id: &ChannelId) -> StoreResult<Option<Channel>> {
        Ok(self.lock()?.channels.get(channel_id).cloned())
    }

    fn list_channels(&self, workspace_id: &WorkspaceId) -> StoreResult<Vec<Channel>> {
        let state = self.lock()?;
        let mut channels: Vec<Channel> = state
            .channels
            .values()
            .filter(|c| &c.workspace_id == workspace_id)
            .cloned()
            .collect();
        channels.sort_by_key(|c| c.created_at);
        Ok(channels)
    }

    fn add_channel_invitation(&self, channel_id: &ChannelId, email: &str) -> StoreResult<bool> {
        let mut state = self.lock()?;
        Ok(state
            .channels
            .get_mut(channel_id)
            .map(|c| c.invitations.insert(normalize_email(email)))
            .unwrap_or(false))
    }

    fn admit_channel_member(&self, admission: &ChannelAdmission) -> StoreResult<Admission> {
        let mut state = self.lock()?;
        let channel = state
            .channels
            .get_mut(&admission.channel_id)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown channel {}", admission.channel_id)))?;
        if channel.members.contains(&admission.user_id) {
            return Ok(Admission::AlreadyMember);
        }
        channel.members.insert(admission.user_id.clone());
        if let Some(email) = &admission.email {
            channel.invitations.remove(&normalize_email(email));
        }

        let is_owner = state
            .workspaces
            .get(&admission.workspace_id)
            .is_some_and(|ws| ws.is_owner(&admission.user_id));
        if is_owner {
            return Ok(Admission::Admitted);
        }
        let key = (admission.user_id.clone(), admission.workspace_id.clone());
        let record = state.permissions.entry(key).or_insert_with(|| {
            PermissionRecord::new(
                admission.user_id.clone(),
                admission.workspace_id.clone(),
                Role::Guest,
            )
        });
        record.set_channel_override(admission.channel_id.clone(), admission.role);
        Ok(Admission::Admitted)
    }

    fn remove_channel_member(&self, channel_id: &ChannelId, user_id: &UserId) -> StoreResult<bool> {
        let mut state = self.lock()?;
        let Some(channel) = state.channels.get_mut(channel_id) else {
            return Ok(false);
        };
        if !channel.members.remove(user_id) {
            return Ok(false);
        }
        let key = (user_id.clone(), channel.workspace_id.clone());
        if let Some(record) = state.permissions.get_mut(&key) {
            record.remove_channel_override(channel_id);
        }
        Ok(true)
    }

    fn find_permission(&self, user_id: &UserId, workspace_id: &WorkspaceId) -> StoreResult<Option<PermissionRecord>> {
        Ok(self
            .lock()?
            .permissions
            .get(&(user_id.clone(), workspace_id.clone()))
            .cloned())
    }

    fn update_permission(
        &self,
        user_id: &UserId,
        workspace_id: &WorkspaceId,
        update: &PermissionUpdate,
    ) -> StoreResult<Option<PermissionRecord>> {
        let mut state = self.lock()?;
        if let PermissionUpdate::ChannelOverride { channel_id, .. } = update {
            let in_channel = state
                .channels
                .get(channel_id)
                .is_some_and(|c| &c.workspace_id == workspace_id && c.is_member(user_id));
            if !in_channel {
                return Ok(None);
            }
        }
        let Some(record) = state.permissions.get_mut(&(user_id.clone(), workspace_id.clone())) else {
            return Ok(None);
        };
        update.apply(record);
        Ok(Some(record.clone()))
    }
}

impl MessageStore for MemoryStore {
    fn append_message(&self, message: &Message) -> StoreResult<()> {
        self.lock()?.messages.push(message.clone());
        Ok(())
    }

    fn list_messages(&self, channel_id: &ChannelId, limit: usize) -> StoreResult<Vec<Message>> {
        let state = self.lock()?;
        Ok(state
            .messages
            .iter()
            .rev()
            .filter(|m| &m.channel_id == channel_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

impl NotificationStore for MemoryStore {
    fn insert_notification(&self, notification: &Notification) -> StoreResult<()> {
        self.lock()?.notifications.push(notification.clone());
        Ok(())
    }

    fn find_notification(&self, notification_id: &NotificationId) -> StoreResult<Option<Notification>> {
        Ok(self
            .lock()?
            .notifications
            .iter()
            .find(|n| &n.id == notification_id)
            .cloned())
    }

    fn mark_notification_read(&self, notification_id: &NotificationId) -> StoreResult<()> {
        let mut state = self.lock()?;
        if let Some(n) = state.notifications.iter_mut().find(|n| &n.id == notification_id) {
            n.read = true;
        }
        Ok(())
    }

    fn list_notifications(&self, recipient_id: &UserId, unread_only: bool) -> StoreResult<Vec<Notification>> {
        let state = self.lock()?;
        Ok(state
            .notifications
            .iter()
            .rev()
            .filter(|n| &n.recipient_id == recipient_id && (!unread_only || !n.read))
            .cloned()
            .collect())
    }
}
