//! Workspace & Channel model
//!
//! Data structures for the entities the access core reasons about, plus the
//! storage traits and backends that persist them.
//!
//! ## Architecture
//!
//! - **Workspace**: top-level container with an owner, members and invitations
//! - **Channel**: public or private sub-space with explicit members
//! - **PermissionRecord**: one per (user, workspace), carrying a role,
//!   per-channel role overrides and extra permission grants
//! - **Notification**: durable per-recipient record produced by fan-out

pub mod channel;
pub mod message;
pub mod notification;
pub mod permission;
pub mod role;
pub mod storage;
pub mod types;
pub mod user;
pub mod workspace;

pub use channel::{Channel, ChannelKind};
pub use message::Message;
pub use notification::{Notification, NotificationKind};
pub use permission::{ChannelRoleOverride, PermissionRecord, PermissionUpdate};
pub use role::{Permission, PermissionSet, Role, RoleCatalog, UnknownToken};
pub use storage::{MemoryStore, SqlStore, Store, StoreError, StoreResult};
pub use types::{normalize_email, ChannelId, MessageId, NotificationId, Timestamp, UserId, WorkspaceId};
pub use user::{NotificationPreference, User};
pub use workspace::{Workspace, WorkspaceVisibility};
