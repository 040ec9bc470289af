//! Store wrapper with failure injection

use crate::core_space::channel::Channel;
use crate::core_space::message::Message;
use crate::core_space::notification::Notification;
use crate::core_space::permission::{PermissionRecord, PermissionUpdate};
use crate::core_space::storage::{
    Admission, ChannelAdmission, IdentityStore, MembershipStore, MessageStore, NotificationStore, Store, StoreError,
    StoreResult, WorkspaceAdmission,
};
use crate::core_space::types::{ChannelId, NotificationId, UserId, WorkspaceId};
use crate::core_space::user::{NotificationPreference, User};
use crate::core_space::workspace::Workspace;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

type Hook = Box<dyn FnOnce(&dyn Store) + Send>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Delegates to an inner store, failing user lookups for chosen ids and
/// optionally running a one-shot hook right after the next permission read.
pub struct FaultyStore {
    inner: Arc<dyn Store>,
    broken_users: Mutex<HashSet<UserId>>,
    after_permission_read: Mutex<Option<Hook>>,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn Store>) -> Self {
        Self {
            inner,
            broken_users: Mutex::new(HashSet::new()),
            after_permission_read: Mutex::new(None),
        }
    }

    /// Make every `find_user` for `user_id` fail
    pub fn fail_user(&self, user_id: UserId) {
        lock(&self.broken_users).insert(user_id);
    }

    /// Run `hook` against the inner store once, after the next
    /// `find_permission` returns its result
    pub fn after_next_permission_read(&self, hook: impl FnOnce(&dyn Store) + Send + 'static) {
        *lock(&self.after_permission_read) = Some(Box::new(hook));
    }
}

impl IdentityStore for FaultyStore {
    fn insert_user(&self, user: &User) -> StoreResult<()> {
        self.inner.insert_user(user)
    }

    fn find_user(&self, user_id: &UserId) -> StoreResult<Option<User>> {
        if lock(&self.broken_users).contains(user_id) {
            return Err(StoreError::Corrupt(format!("injected failure for {}", user_id)));
        }
        self.inner.find_user(user_id)
    }

    fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.inner.find_user_by_email(email)
    }

    fn find_user_by_handle(&self, handle: &str) -> StoreResult<Option<User>> {
        self.inner.find_user_by_handle(handle)
    }

    fn set_notification_preference(
        &self,
        user_id: &UserId,
        channel_id: &ChannelId,
        preference: NotificationPreference,
    ) -> StoreResult<()> {
        self.inner.set_notification_preference(user_id, channel_id, preference)
    }
}

impl MembershipStore for FaultyStore {
    fn insert_workspace(&self, workspace: &Workspace) -> StoreResult<()> {
        self.inner.insert_workspace(workspace)
    }

    fn find_workspace(&self, workspace_id: &WorkspaceId) -> StoreResult<Option<Workspace>> {
        self.inner.find_workspace(workspace_id)
    }

    fn delete_workspace(&self, workspace_id: &WorkspaceId) -> StoreResult<()> {
        self.inner.delete_workspace(workspace_id)
    }

    fn add_workspace_invitation(&self, workspace_id: &WorkspaceId, email: &str) -> StoreResult<bool> {
        self.inner.add_workspace_invitation(workspace_id, email)
    }

    fn add_join_request(&self, workspace_id: &WorkspaceId, user_id: &UserId) -> StoreResult<bool> {
        self.inner.add_join_request(workspace_id, user_id)
    }

    fn remove_join_request(&self, workspace_id: &WorkspaceId, user_id: &UserId) -> StoreResult<bool> {
        self.inner.remove_join_request(workspace_id, user_id)
    }

    fn admit_workspace_member(&self, admission: &WorkspaceAdmission) -> StoreResult<Admission> {
        self.inner.admit_workspace_member(admission)
    }

    fn remove_workspace_member(&self, workspace_id: &WorkspaceId, user_id: &UserId) -> StoreResult<bool> {
        self.inner.remove_workspace_member(workspace_id, user_id)
    }

    fn insert_channel(&self, channel: &Channel) -> StoreResult<()> {
        self.inner.insert_channel(channel)
    }

    fn find_channel(&self, channel_id: &ChannelId) -> StoreResult<Option<Channel>> {
        self.inner.find_channel(channel_id)
    }

    fn list_channels(&self, workspace_id: &WorkspaceId) -> StoreResult<Vec<Channel>> {
        self.inner.list_channels(workspace_id)
    }

    fn add_channel_invitation(&self, channel_id: &ChannelId, email: &str) -> StoreResult<bool> {
        self.inner.add_channel_invitation(channel_id, email)
    }

    fn admit_channel_member(&self, admission: &ChannelAdmission) -> StoreResult<Admission> {
        self.inner.admit_channel_member(admission)
    }

    fn remove_channel_member(&self, channel_id: &ChannelId, user_id: &UserId) -> StoreResult<bool> {
        self.inner.remove_channel_member(channel_id, user_id)
    }

    fn find_permission(&self, user_id: &UserId, workspace_id: &WorkspaceId) -> StoreResult<Option<PermissionRecord>> {
        let result = self.inner.find_permission(user_id, workspace_id);
        let hook = lock(&self.after_permission_read).take();
        if let Some(hook) = hook {
            hook(self.inner.as_ref());
        }
        result
    }

    fn update_permission(
        &self,
        user_id: &UserId,
        workspace_id: &WorkspaceId,
        update: &PermissionUpdate,
    ) -> StoreResult<Option<PermissionRecord>> {
        self.inner.update_permission(user_id, workspace_id, update)
    }
}

impl MessageStore for FaultyStore {
    fn append_message(&self, message: &Message) -> StoreResult<()> {
        self.inner.append_message(message)
    }

    fn list_messages(&self, channel_id: &ChannelId, limit: usize) -> StoreResult<Vec<Message>> {
        self.inner.list_messages(channel_id, limit)
    }
}

impl NotificationStore for FaultyStore {
    fn insert_notification(&self, notification: &Notification) -> StoreResult<()> {
        self.inner.insert_notification(notification)
    }

    fn find_notification(&self, notification_id: &NotificationId) -> StoreResult<Option<Notification>> {
        self.inner.find_notification(notification_id)
    }

    fn mark_notification_read(&self, notification_id: &NotificationId) -> StoreResult<()> {
        self.inner.mark_notification_read(notification_id)
    }

    fn list_notifications(&self, recipient_id: &UserId, unread_only: bool) -> StoreResult<Vec<Notification>> {
        self.inner.list_notifications(recipient_id, unread_only)
    }
}
