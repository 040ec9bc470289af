//! Storage layer for Workspaces, Channels, permissions and notifications
//!
//! The access core consumes persistence through the narrow traits below.
//! Two backends ship with the crate:
//!
//! - [`MemoryStore`]: a single-lock in-process store (tests, embedding)
//! - [`SqlStore`]: SQLite through an `r2d2` pool with versioned migrations
//!
//! Admissions (`admit_workspace_member`, `admit_channel_member`) are atomic
//! conditional writes: the "not yet a member" check and the write that makes
//! the user a member happen in one step, so two concurrent joins can never
//! both create a Permission record.

pub mod memory_store;
pub mod migrations;
pub mod sql_store;

pub use memory_store::MemoryStore;
pub use migrations::{migrate, CURRENT_SCHEMA_VERSION};
pub use sql_store::SqlStore;

use super::channel::Channel;
use super::message::Message;
use super::notification::Notification;
use super::permission::{PermissionRecord, PermissionUpdate};
use super::role::Role;
use super::types::{ChannelId, NotificationId, UserId, WorkspaceId};
use super::user::{NotificationPreference, User};
use super::workspace::Workspace;

/// Storage backend failures. These are infrastructure errors, never denials.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("duplicate key: {0}")]
    Conflict(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of an atomic admission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    AlreadyMember,
}

/// Atomic workspace admission: create the Permission record if absent, add
/// the user to the member set, and clear their pending invitation and join
/// request.
#[derive(Debug, Clone)]
pub struct WorkspaceAdmission {
    pub record: PermissionRecord,
    /// Normalized email whose invitation is consumed
    pub email: Option<String>,
}

/// Atomic channel admission: add to the member set, upsert the channel role
/// override, and consume the pending invitation. A user with no workspace
/// record receives a `Guest` record that carries the override; the workspace
/// owner never gets a record.
#[derive(Debug, Clone)]
pub struct ChannelAdmission {
    pub workspace_id: WorkspaceId,
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub role: Role,
    pub email: Option<String>,
}

/// Identity collaborator
pub trait IdentityStore: Send + Sync {
    fn insert_user(&self, user: &User) -> StoreResult<()>;

    fn find_user(&self, user_id: &UserId) -> StoreResult<Option<User>>;

    fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    /// Exact, case-sensitive display-name match
    fn find_user_by_handle(&self, handle: &str) -> StoreResult<Option<User>>;

    fn set_notification_preference(
        &self,
        user_id: &UserId,
        channel_id: &ChannelId,
        preference: NotificationPreference,
    ) -> StoreResult<()>;
}

/// Workspace/channel membership, ownership, invitations and permissions
pub trait MembershipStore: Send + Sync {
    // ===== Workspaces =====

    fn insert_workspace(&self, workspace: &Workspace) -> StoreResult<()>;

    fn find_workspace(&self, workspace_id: &WorkspaceId) -> StoreResult<Option<Workspace>>;

    /// Delete a Workspace and everything under it
    fn delete_workspace(&self, workspace_id: &WorkspaceId) -> StoreResult<()>;

    /// Returns `false` when the email was already pending
    fn add_workspace_invitation(&self, workspace_id: &WorkspaceId, email: &str) -> StoreResult<bool>;

    fn add_join_request(&self, workspace_id: &WorkspaceId, user_id: &UserId) -> StoreResult<bool>;

    fn remove_join_request(&self, workspace_id: &WorkspaceId, user_id: &UserId) -> StoreResult<bool>;

    fn admit_workspace_member(&self, admission: &WorkspaceAdmission) -> StoreResult<Admission>;

    /// Remove from the member set and from every channel of the workspace,
    /// and delete the Permission record. Returns `false` if not a member.
    fn remove_workspace_member(&self, workspace_id: &WorkspaceId, user_id: &UserId) -> StoreResult<bool>;

    // ===== Channels =====

    fn insert_channel(&self, channel: &Channel) -> StoreResult<()>;

    fn find_channel(&self, channel_id: &ChannelId) -> StoreResult<Option<Channel>>;

    fn list_channels(&self, workspace_id: &WorkspaceId) -> StoreResult<Vec<Channel>>;

    fn add_channel_invitation(&self, channel_id: &ChannelId, email: &str) -> StoreResult<bool>;

    fn admit_channel_member(&self, admission: &ChannelAdmission) -> StoreResult<Admission>;

    /// Remove from the channel and prune that channel's override from the
    /// user's record in the same transaction
    fn remove_channel_member(&self, channel_id: &ChannelId, user_id: &UserId) -> StoreResult<bool>;

    // ===== Permissions =====

    fn find_permission(&self, user_id: &UserId, workspace_id: &WorkspaceId) -> StoreResult<Option<PermissionRecord>>;

    /// Apply `update` to the existing record in one atomic step. Returns the
    /// updated record, or `None` (writing nothing) when the record is gone,
    /// or for a channel override, when the user is not in the channel.
    fn update_permission(
        &self,
        user_id: &UserId,
        workspace_id: &WorkspaceId,
        update: &PermissionUpdate,
    ) -> StoreResult<Option<PermissionRecord>>;
}

pub trait MessageStore: Send + Sync {
    fn append_message(&self, message: &Message) -> StoreResult<()>;

    /// Most recent messages first
    fn list_messages(&self, channel_id: &ChannelId, limit: usize) -> StoreResult<Vec<Message>>;
}

pub trait NotificationStore: Send + Sync {
    fn insert_notification(&self, notification: &Notification) -> StoreResult<()>;

    fn find_notification(&self, notification_id: &NotificationId) -> StoreResult<Option<Notification>>;

    fn mark_notification_read(&self, notification_id: &NotificationId) -> StoreResult<()>;

    /// Newest first
    fn list_notifications(&self, recipient_id: &UserId, unread_only: bool) -> StoreResult<Vec<Notification>>;
}

/// Everything the core needs from persistence
pub trait Store: IdentityStore + MembershipStore + MessageStore + NotificationStore {}

impl<T> Store for T where T: IdentityStore + MembershipStore + MessageStore + NotificationStore {}
