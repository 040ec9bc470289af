//! SQL-based storage implementation
//!
//! Admissions run inside `BEGIN IMMEDIATE` transactions and use
//! `INSERT ... ON CONFLICT DO NOTHING` on the membership primary keys, so the
//! "not yet a member" check and the write are one conditional statement.
//! Record updates are conditional the same way: they touch existing rows
//! only, so a concurrent removal is never undone.

use super::migrations::migrate;
use super::{
    Admission, ChannelAdmission, IdentityStore, MembershipStore, MessageStore, NotificationStore,
    StoreError, StoreResult, WorkspaceAdmission,
};
use crate::core_space::channel::{Channel, ChannelKind};
use crate::core_space::message::Message;
use crate::core_space::notification::{Notification, NotificationKind};
use crate::core_space::permission::{ChannelRoleOverride, PermissionRecord, PermissionUpdate};
use crate::core_space::role::{PermissionSet, Role};
use crate::core_space::types::{
    normalize_email, ChannelId, MessageId, NotificationId, Timestamp, UserId, WorkspaceId,
};
use crate::core_space::user::{NotificationPreference, User};
use crate::core_space::workspace::{Workspace, WorkspaceVisibility};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;

/// SQLite-backed store
pub struct SqlStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqlStore {
    /// Wrap an existing pool and bring its schema up to date
    pub fn new(pool: Pool<SqliteConnectionManager>) -> StoreResult<Self> {
        migrate(&pool)?;
        Ok(Self { pool })
    }

    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>, pool_size: u32, busy_timeout: Duration) -> StoreResult<Self> {
        let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")
        });
        let pool = Pool::builder().max_size(pool_size.max(1)).build(manager)?;
        Self::new(pool)
    }

    /// Private in-memory database. A single pooled connection keeps every
    /// caller on the same database.
    pub fn open_in_memory() -> StoreResult<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder().max_size(1).build(manager)?;
        Self::new(pool)
    }

    fn conn(&self) -> StoreResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }
}

fn now_millis() -> i64 {
    Timestamp::now().as_millis() as i64
}

fn ts(millis: i64) -> Timestamp {
    Timestamp::from_millis(millis.max(0) as u64)
}

fn conflict(err: rusqlite::Error, what: String) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            StoreError::Conflict(what)
        }
        _ => StoreError::Database(err),
    }
}

fn parse_role(s: &str) -> StoreResult<Role> {
    s.parse().map_err(|_| StoreError::Corrupt(format!("role '{}'", s)))
}

fn string_set(conn: &Connection, sql: &str, key: &str) -> StoreResult<BTreeSet<String>> {
    let mut stmt = conn.prepare(sql)?;
    let values = stmt
        .query_map(params![key], |row| row.get::<_, String>(0))?
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(values)
}

fn load_user(conn: &Connection, sql: &str, key: &str) -> StoreResult<Option<User>> {
    let row = conn
        .query_row(sql, params![key], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, bool>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })
        .optional()?;

    let Some((id, display_name, email, is_global_admin, created_at)) = row else {
        return Ok(None);
    };

    let mut stmt =
        conn.prepare("SELECT channel_id, preference FROM notification_preferences WHERE user_id = ?")?;
    let raw = stmt
        .query_map(params![&id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut preferences = HashMap::new();
    for (channel_id, preference) in raw {
        let preference = NotificationPreference::parse(&preference)
            .ok_or_else(|| StoreError::Corrupt(format!("preference '{}'", preference)))?;
        preferences.insert(ChannelId::new(channel_id), preference);
    }

    Ok(Some(User {
        id: UserId::new(id),
        display_name,
        email,
        is_global_admin,
        preferences,
        created_at: ts(created_at),
    }))
}

fn load_workspace(conn: &Connection, workspace_id: &WorkspaceId) -> StoreResult<Option<Workspace>> {
    let row = conn
        .query_row(
            "SELECT name, visibility, owner_id, created_at, updated_at FROM workspaces WHERE id = ?",
            params![workspace_id.as_str()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            },
        )
        .optional()?;

    let Some((name, visibility, owner_id, created_at, updated_at)) = row else {
        return Ok(None);
    };
    let visibility = WorkspaceVisibility::parse(&visibility)
        .ok_or_else(|| StoreError::Corrupt(format!("visibility '{}'", visibility)))?;

    let key = workspace_id.as_str();
    let members = string_set(conn, "SELECT user_id FROM workspace_members WHERE workspace_id = ?", key)?;
    let invitations = string_set(conn, "SELECT email FROM workspace_invitations WHERE workspace_id = ?", key)?;
    let join_requests =
        string_set(conn, "SELECT user_id FROM workspace_join_requests WHERE workspace_id = ?", key)?;

    Ok(Some(Workspace {
        id: workspace_id.clone(),
        name,
        visibility,
        owner_id: UserId::new(owner_id),
        members: members.into_iter().map(UserId::new).collect(),
        invitations,
        join_requests: join_requests.into_iter().map(UserId::new).collect(),
        created_at: ts(created_at),
        updated_at: ts(updated_at),
    }))
}

fn load_channel(conn: &Connection, channel_id: &ChannelId) -> StoreResult<Option<Channel>> {
    let row = conn
        .query_row(
            "SELECT workspace_id, name, kind, created_by, created_at FROM channels WHERE id = ?",
            params![channel_id.as_str()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            },
        )
        .optional()?;

    let Some((workspace_id, name, kind, created_by, created_at)) = row else {
        return Ok(None);
    };
    let kind = ChannelKind::parse(&kind).ok_or_else(|| StoreError::Corrupt(format!("channel kind '{}'", kind)))?;

    let key = channel_id.as_str();
    let members = string_set(conn, "SELECT user_id FROM channel_members WHERE channel_id = ?", key)?;
    let invitations = string_set(conn, "SELECT email FROM channel_invitations WHERE channel_id = ?", key)?;

    Ok(Some(Channel {
        id: channel_id.clone(),
        workspace_id: WorkspaceId::new(workspace_id),
        name,
        kind,
        members: members.into_iter().map(UserId::new).collect(),
        invitations,
        created_by: UserId::new(created_by),
        created_at: ts(created_at),
    }))
}

fn load_permission(
    conn: &Connection,
    user_id: &UserId,
    workspace_id: &WorkspaceId,
) -> StoreResult<Option<PermissionRecord>> {
    let row = conn
        .query_row(
            "SELECT role, permission_set, updated_at FROM permissions
             WHERE user_id = ? AND workspace_id = ?",
            params![user_id.as_str(), workspace_id.as_str()],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?)),
        )
        .optional()?;

    let Some((role, permission_set, updated_at)) = row else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT channel_id, role FROM channel_role_overrides
         WHERE user_id = ? AND workspace_id = ? ORDER BY channel_id",
    )?;
    let raw = stmt
        .query_map(params![user_id.as_str(), workspace_id.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let channel_overrides = raw
        .into_iter()
        .map(|(channel_id, role)| {
            Ok(ChannelRoleOverride {
                channel_id: ChannelId::new(channel_id),
                role: parse_role(&role)?,
            })
        })
        .collect::<StoreResult<Vec<_>>>()?;

    Ok(Some(PermissionRecord {
        user_id: user_id.clone(),
        workspace_id: workspace_id.clone(),
        role: parse_role(&role)?,
        channel_overrides,
        permission_set: serde_json::from_str::<PermissionSet>(&permission_set)?,
        updated_at: ts(updated_at),
    }))
}

fn write_overrides(conn: &Connection, record: &PermissionRecord) -> StoreResult<()> {
    conn.execute(
        "DELETE FROM channel_role_overrides WHERE user_id = ? AND workspace_id = ?",
        params![record.user_id.as_str(), record.workspace_id.as_str()],
    )?;
    for o in &record.channel_overrides {
        conn.execute(
            "INSERT INTO channel_role_overrides (user_id, workspace_id, channel_id, role)
             VALUES (?, ?, ?, ?)",
            params![
                record.user_id.as_str(),
                record.workspace_id.as_str(),
                o.channel_id.as_str(),
                o.role.as_str(),
            ],
        )?;
    }
    Ok(())
}

fn load_notification_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawNotification> {
    Ok(RawNotification {
        id: row.get(0)?,
        recipient_id: row.get(1)?,
        kind: row.get(2)?,
        actor_id: row.get(3)?,
        workspace_id: row.get(4)?,
        channel_id: row.get(5)?,
        message_id: row.get(6)?,
        read: row.get(7)?,
        created_at: row.get(8)?,
    })
}

const NOTIFICATION_COLUMNS: &str =
    "id, recipient_id, kind, actor_id, workspace_id, channel_id, message_id, read, created_at";

struct RawNotification {
    id: String,
    recipient_id: String,
    kind: String,
    actor_id: Option<String>,
    workspace_id: Option<String>,
    channel_id: Option<String>,
    message_id: Option<String>,
    read: bool,
    created_at: i64,
}

impl TryFrom<RawNotification> for Notification {
    type Error = StoreError;

    fn try_from(raw: RawNotification) -> StoreResult<Self> {
        let kind = NotificationKind::parse(&raw.kind)
            .ok_or_else(|| StoreError::Corrupt(format!("notification kind '{}'", raw.kind)))?;
        Ok(Notification {
            id: NotificationId::new(raw.id),
            recipient_id: UserId::new(raw.recipient_id),
            kind,
            actor_id: raw.actor_id.map(UserId::new),
            workspace_id: raw.workspace_id.map(WorkspaceId::new),
            channel_id: raw.channel_id.map(ChannelId::new),
            message_id: raw.message_id.map(MessageId::new),
            read: raw.read,
            created_at: ts(raw.created_at),
        })
    }
}

impl IdentityStore for SqlStore {
    fn insert_user(&self, user: &User) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO users (id, display_name, email, is_global_admin, created_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                user.id.as_str(),
                &user.display_name,
                normalize_email(&user.email),
                user.is_global_admin,
                user.created_at.as_millis() as i64,
            ],
        )
        .map_err(|e| conflict(e, format!("user {} / {}", user.id, user.email)))?;

        for (channel_id, preference) in &user.preferences {
            tx.execute(
                "INSERT INTO notification_preferences (user_id, channel_id, preference) VALUES (?, ?, ?)",
                params![user.id.as_str(), channel_id.as_str(), preference.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn find_user(&self, user_id: &UserId) -> StoreResult<Option<User>> {
        let conn = self.conn()?;
        load_user(
            &conn,
            "SELECT id, display_name, email, is_global_admin, created_at FROM users WHERE id = ?",
            user_id.as_str(),
        )
    }

    fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let conn = self.conn()?;
        load_user(
            &conn,
            "SELECT id, display_name, email, is_global_admin, created_at FROM users WHERE email = ?",
            &normalize_email(email),
        )
    }

    fn find_user_by_handle(&self, handle: &str) -> StoreResult<Option<User>> {
        let conn = self.conn()?;
        load_user(
            &conn,
            "SELECT id, display_name, email, is_global_admin, created_at FROM users
             WHERE display_name = ? ORDER BY created_at, id LIMIT 1",
            handle,
        )
    }

    fn set_notification_preference(
        &self,
        user_id: &UserId,
        channel_id: &ChannelId,
        preference: NotificationPreference,
    ) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO notification_preferences (user_id, channel_id, preference) VALUES (?, ?, ?)
             ON CONFLICT(user_id, channel_id) DO UPDATE SET preference = excluded.preference",
            params![user_id.as_str(), channel_id.as_str(), preference.as_str()],
        )?;
        Ok(())
    }
}

impl MembershipStore for SqlStore {
    fn insert_workspace(&self, workspace: &Workspace) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO workspaces (id, name, visibility, owner_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                workspace.id.as_str(),
                &workspace.name,
                workspace.visibility.as_str(),
                workspace.owner_id.as_str(),
                workspace.created_at.as_millis() as i64,
                workspace.updated_at.as_millis() as i64,
            ],
        )
        .map_err(|e| conflict(e, format!("workspace {}", workspace.id)))?;

        for user_id in &workspace.members {
            tx.execute(
                "INSERT INTO workspace_members (workspace_id, user_id, joined_at) VALUES (?, ?, ?)",
                params![workspace.id.as_str(), user_id.as_str(), workspace.created_at.as_millis() as i64],
            )?;
        }
        for email in &workspace.invitations {
            tx.execute(
                "INSERT INTO workspace_invitations (workspace_id, email, invited_at) VALUES (?, ?, ?)",
                params![workspace.id.as_str(), email, now_millis()],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn find_workspace(&self, workspace_id: &WorkspaceId) -> StoreResult<Option<Workspace>> {
        let conn = self.conn()?;
        load_workspace(&conn, workspace_id)
    }

    fn delete_workspace(&self, workspace_id: &WorkspaceId) -> StoreResult<()> {
        let conn = self.conn()?;
        // Channels, members, invitations, permissions and messages cascade
        conn.execute("DELETE FROM workspaces WHERE id = ?", params![workspace_id.as_str()])?;
        Ok(())
    }

    fn add_workspace_invitation(&self, workspace_id: &WorkspaceId, email: &str) -> StoreResult<bool> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO workspace_invitations (workspace_id, email, invited_at) VALUES (?, ?, ?)",
            params![workspace_id.as_str(), normalize_email(email), now_millis()],
        )?;
        Ok(inserted > 0)
    }

    fn add_join_request(&self, workspace_id: &WorkspaceId, user_id: &UserId) -> StoreResult<bool> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO workspace_join_requests (workspace_id, user_id, requested_at)
             VALUES (?, ?, ?)",
            params![workspace_id.as_str(), user_id.as_str(), now_millis()],
        )?;
        Ok(inserted > 0)
    }

    fn remove_join_request(&self, workspace_id: &WorkspaceId, user_id: &UserId) -> StoreResult<bool> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM workspace_join_requests WHERE workspace_id = ? AND user_id = ?",
            params![workspace_id.as_str(), user_id.as_str()],
        )?;
        Ok(removed > 0)
    }

    fn admit_workspace_member(&self, admission: &WorkspaceAdmission) -> StoreResult<Admission> {
        let record = &admission.record;
        let user = record.user_id.as_str();
        let workspace = record.workspace_id.as_str();

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let inserted = tx.execute(
            "INSERT INTO permissions (user_id, workspace_id, role, permission_set, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(user_id, workspace_id) DO NOTHING",
            params![
                user,
                workspace,
                record.role.as_str(),
                serde_json::to_string(&record.permission_set)?,
                record.updated_at.as_millis() as i64,
            ],
        )?;
        if inserted == 0 {
            // Dropping the transaction rolls it back
            return Ok(Admission::AlreadyMember);
        }

        write_overrides(&tx, record)?;
        tx.execute(
            "INSERT OR IGNORE INTO workspace_members (workspace_id, user_id, joined_at) VALUES (?, ?, ?)",
            params![workspace, user, now_millis()],
        )?;
        tx.execute(
            "DELETE FROM workspace_join_requests WHERE workspace_id = ? AND user_id = ?",
            params![workspace, user],
        )?;
        if let Some(email) = &admission.email {
            tx.execute(
                "DELETE FROM workspace_invitations WHERE workspace_id = ? AND email = ?",
                params![workspace, normalize_email(email)],
            )?;
        }

        tx.commit()?;
        Ok(Admission::Admitted)
    }

    fn remove_workspace_member(&self, workspace_id: &WorkspaceId, user_id: &UserId) -> StoreResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let members = tx.execute(
            "DELETE FROM workspace_members WHERE workspace_id = ? AND user_id = ?",
            params![workspace_id.as_str(), user_id.as_str()],
        )?;
        tx.execute(
            "DELETE FROM channel_members WHERE user_id = ?
             AND channel_id IN (SELECT id FROM channels WHERE workspace_id = ?)",
            params![user_id.as_str(), workspace_id.as_str()],
        )?;
        // Overrides cascade with the record
        let records = tx.execute(
            "DELETE FROM permissions WHERE user_id = ? AND workspace_id = ?",
            params![user_id.as_str(), workspace_id.as_str()],
        )?;

        tx.commit()?;
        Ok(members + records > 0)
    }

    fn insert_channel(&self, channel: &Channel) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO channels (id, workspace_id, name, kind, created_by, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                channel.id.as_str(),
                channel.workspace_id.as_str(),
                &channel.name,
                channel.kind.as_str(),
                channel.created_by.as_str(),
                channel.created_at.as_millis() as i64,
            ],
        )
        .map_err(|e| conflict(e, format!("channel {}", channel.id)))?;

        for user_id in &channel.members {
            tx.execute(
                "INSERT INTO channel_members (channel_id, user_id, joined_at) VALUES (?, ?, ?)",
                params![channel.id.as_str(), user_id.as_str(), channel.created_at.as_millis() as i64],
            )?;
        }
        for email in &channel.invitations {
            tx.execute(
                "INSERT INTO channel_invitations (channel_id, email, invited_at) VALUES (?, ?, ?)",
                params![channel.id.as_str(), email, now_millis()],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn find_channel(&self, channel_id: &ChannelId) -> StoreResult<Option<Channel>> {
        let conn = self.conn()?;
        load_channel(&conn, channel_id)
    }

    fn list_channels(&self, workspace_id: &WorkspaceId) -> StoreResult<Vec<Channel>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id FROM channels WHERE workspace_id = ? ORDER BY created_at, id")?;
        let ids = stmt
            .query_map(params![workspace_id.as_str()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut channels = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(channel) = load_channel(&conn, &ChannelId::new(id))? {
                channels.push(channel);
            }
        }
        Ok(channels)
    }

    fn add_channel_invitation(&self, channel_id: &ChannelId, email: &str) -> StoreResult<bool> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO channel_invitations (channel_id, email, invited_at) VALUES (?, ?, ?)",
            params![channel_id.as_str(), normalize_email(email), now_millis()],
        )?;
        Ok(inserted > 0)
    }

    fn admit_channel_member(&self, admission: &ChannelAdmission) -> StoreResult<Admission> {
        let user = admission.user_id.as_str();
        let workspace = admission.workspace_id.as_str();
        let channel = admission.channel_id.as_str();
        let now = now_millis();

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let inserted = tx.execute(
            "INSERT INTO channel_members (channel_id, user_id, joined_at) VALUES (?, ?, ?)
             ON CONFLICT(channel_id, user_id) DO NOTHING",
            params![channel, user, now],
        )?;
        if inserted == 0 {
            return Ok(Admission::AlreadyMember);
        }
        if let Some(email) = &admission.email {
            tx.execute(
                "DELETE FROM channel_invitations WHERE channel_id = ? AND email = ?",
                params![channel, normalize_email(email)],
            )?;
        }

        let is_owner = tx
            .query_row(
                "SELECT 1 FROM workspaces WHERE id = ? AND owner_id = ?",
                params![workspace, user],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if is_owner {
            tx.commit()?;
            return Ok(Admission::Admitted);
        }

        tx.execute(
            "INSERT INTO permissions (user_id, workspace_id, role, permission_set, updated_at)
             VALUES (?, ?, 'guest', '[]', ?)
             ON CONFLICT(user_id, workspace_id) DO UPDATE SET updated_at = excluded.updated_at",
            params![user, workspace, now],
        )?;
        tx.execute(
            "INSERT INTO channel_role_overrides (user_id, workspace_id, channel_id, role)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(user_id, channel_id) DO UPDATE SET role = excluded.role",
            params![user, workspace, channel, admission.role.as_str()],
        )?;

        tx.commit()?;
        Ok(Admission::Admitted)
    }

    fn remove_channel_member(&self, channel_id: &ChannelId, user_id: &UserId) -> StoreResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let removed = tx.execute(
            "DELETE FROM channel_members WHERE channel_id = ? AND user_id = ?",
            params![channel_id.as_str(), user_id.as_str()],
        )?;
        if removed == 0 {
            return Ok(false);
        }
        tx.execute(
            "DELETE FROM channel_role_overrides WHERE channel_id = ? AND user_id = ?",
            params![channel_id.as_str(), user_id.as_str()],
        )?;

        tx.commit()?;
        Ok(true)
    }

    fn find_permission(&self, user_id: &UserId, workspace_id: &WorkspaceId) -> StoreResult<Option<PermissionRecord>> {
        let conn = self.conn()?;
        load_permission(&conn, user_id, workspace_id)
    }

    fn update_permission(
        &self,
        user_id: &UserId,
        workspace_id: &WorkspaceId,
        update: &PermissionUpdate,
    ) -> StoreResult<Option<PermissionRecord>> {
        let user = user_id.as_str();
        let workspace = workspace_id.as_str();

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let touched = tx.execute(
            "UPDATE permissions SET updated_at = ? WHERE user_id = ? AND workspace_id = ?",
            params![now_millis(), user, workspace],
        )?;
        if touched == 0 {
            return Ok(None);
        }

        match update {
            PermissionUpdate::Role(role) => {
                tx.execute(
                    "UPDATE permissions SET role = ? WHERE user_id = ? AND workspace_id = ?",
                    params![role.as_str(), user, workspace],
                )?;
            }
            PermissionUpdate::Grant(set) => {
                // The write lock is held, so this read-merge-write cannot interleave
                let current: String = tx.query_row(
                    "SELECT permission_set FROM permissions WHERE user_id = ? AND workspace_id = ?",
                    params![user, workspace],
                    |row| row.get(0),
                )?;
                let mut merged = serde_json::from_str::<PermissionSet>(&current)?;
                merged.extend(set);
                tx.execute(
                    "UPDATE permissions SET permission_set = ? WHERE user_id = ? AND workspace_id = ?",
                    params![serde_json::to_string(&merged)?, user, workspace],
                )?;
            }
            PermissionUpdate::ChannelOverride { channel_id, role } => {
                let written = tx.execute(
                    "INSERT INTO channel_role_overrides (user_id, workspace_id, channel_id, role)
                     SELECT ?1, ?2, ?3, ?4 WHERE EXISTS (
                        SELECT 1 FROM channel_members m JOIN channels c ON c.id = m.channel_id
                        WHERE m.channel_id = ?3 AND m.user_id = ?1 AND c.workspace_id = ?2
                     )
                     ON CONFLICT(user_id, channel_id) DO UPDATE SET role = excluded.role",
                    params![user, workspace, channel_id.as_str(), role.as_str()],
                )?;
                if written == 0 {
                    return Ok(None);
                }
            }
        }

        let record = load_permission(&tx, user_id, workspace_id)?;
        tx.commit()?;
        Ok(record)
    }
}

impl MessageStore for SqlStore {
    fn append_message(&self, message: &Message) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO messages (id, workspace_id, channel_id, sender_id, body, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                message.id.as_str(),
                message.workspace_id.as_str(),
                message.channel_id.as_str(),
                message.sender_id.as_str(),
                &message.text,
                message.created_at.as_millis() as i64,
            ],
        )
        .map_err(|e| conflict(e, format!("message {}", message.id)))?;
        Ok(())
    }

    fn list_messages(&self, channel_id: &ChannelId, limit: usize) -> StoreResult<Vec<Message>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, workspace_id, sender_id, body, created_at FROM messages
             WHERE channel_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )?;
        let messages = stmt
            .query_map(params![channel_id.as_str(), limit as i64], |row| {
                Ok(Message {
                    id: MessageId::new(row.get::<_, String>(0)?),
                    workspace_id: WorkspaceId::new(row.get::<_, String>(1)?),
                    channel_id: channel_id.clone(),
                    sender_id: UserId::new(row.get::<_, String>(2)?),
                    text: row.get(3)?,
                    created_at: ts(row.get(4)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }
}

impl NotificationStore for SqlStore {
    fn insert_notification(&self, notification: &Notification) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            &format!("INSERT INTO notifications ({NOTIFICATION_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"),
            params![
                notification.id.as_str(),
                notification.recipient_id.as_str(),
                notification.kind.as_str(),
                notification.actor_id.as_ref().map(|id| id.as_str()),
                notification.workspace_id.as_ref().map(|id| id.as_str()),
                notification.channel_id.as_ref().map(|id| id.as_str()),
                notification.message_id.as_ref().map(|id| id.as_str()),
                notification.read,
                notification.created_at.as_millis() as i64,
            ],
        )
        .map_err(|e| conflict(e, format!("notification {}", notification.id)))?;
        Ok(())
    }

    fn find_notification(&self, notification_id: &NotificationId) -> StoreResult<Option<Notification>> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?"),
                params![notification_id.as_str()],
                load_notification_row,
            )
            .optional()?;
        raw.map(Notification::try_from).transpose()
    }

    fn mark_notification_read(&self, notification_id: &NotificationId) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE notifications SET read = 1 WHERE id = ?",
            params![notification_id.as_str()],
        )?;
        Ok(())
    }

    fn list_notifications(&self, recipient_id: &UserId, unread_only: bool) -> StoreResult<Vec<Notification>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications
             WHERE recipient_id = ? {}
             ORDER BY created_at DESC, rowid DESC",
            if unread_only { "AND read = 0" } else { "" }
        );
        let mut stmt = conn.prepare(&sql)?;
        let raw = stmt
            .query_map(params![recipient_id.as_str()], load_notification_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(Notification::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_space::role::Permission;

    fn store_with_workspace() -> (SqlStore, Workspace) {
        let store = SqlStore::open_in_memory().unwrap();
        store
            .insert_user(&User::new(UserId::new("alice"), "alice", "alice@example.com"))
            .unwrap();
        store
            .insert_user(&User::new(UserId::new("bob"), "bob", "bob@example.com"))
            .unwrap();
        let ws = Workspace::new("Acme".into(), UserId::new("alice"), WorkspaceVisibility::Private);
        store.insert_workspace(&ws).unwrap();
        (store, ws)
    }

    #[test]
    fn test_workspace_round_trip() {
        let (store, ws) = store_with_workspace();
        let loaded = store.find_workspace(&ws.id).unwrap().unwrap();
        assert_eq!(loaded.name, "Acme");
        assert_eq!(loaded.visibility, WorkspaceVisibility::Private);
        assert!(loaded.is_member(&UserId::new("alice")));
        assert!(store.find_workspace(&WorkspaceId::new("missing")).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_email_is_conflict() {
        let (store, _) = store_with_workspace();
        let err = store
            .insert_user(&User::new(UserId::new("bob2"), "bob2", "BOB@example.com"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn test_invitation_set_semantics() {
        let (store, ws) = store_with_workspace();
        assert!(store.add_workspace_invitation(&ws.id, "bob@example.com").unwrap());
        assert!(!store.add_workspace_invitation(&ws.id, "Bob@Example.com").unwrap());

        let loaded = store.find_workspace(&ws.id).unwrap().unwrap();
        assert_eq!(loaded.invitations.len(), 1);
    }

    #[test]
    fn test_admission_is_conditional() {
        let (store, ws) = store_with_workspace();
        store.add_workspace_invitation(&ws.id, "bob@example.com").unwrap();

        let admission = WorkspaceAdmission {
            record: PermissionRecord::member(UserId::new("bob"), ws.id.clone()),
            email: Some("bob@example.com".into()),
        };
        assert_eq!(store.admit_workspace_member(&admission).unwrap(), Admission::Admitted);
        assert_eq!(store.admit_workspace_member(&admission).unwrap(), Admission::AlreadyMember);

        let loaded = store.find_workspace(&ws.id).unwrap().unwrap();
        assert!(loaded.is_member(&UserId::new("bob")));
        assert!(loaded.invitations.is_empty());
    }

    fn admit_bob(store: &SqlStore, ws: &Workspace) {
        store
            .admit_workspace_member(&WorkspaceAdmission {
                record: PermissionRecord::member(UserId::new("bob"), ws.id.clone()),
                email: None,
            })
            .unwrap();
    }

    fn admit_to_channel(store: &SqlStore, ws: &Workspace, channel: &Channel, user: &str) -> Admission {
        store
            .admit_channel_member(&ChannelAdmission {
                workspace_id: ws.id.clone(),
                channel_id: channel.id.clone(),
                user_id: UserId::new(user),
                role: Role::Member,
                email: None,
            })
            .unwrap()
    }

    #[test]
    fn test_update_permission_touches_existing_records_only() {
        let (store, ws) = store_with_workspace();
        let bob = UserId::new("bob");
        let to_admin = PermissionUpdate::Role(Role::Admin);
        assert!(store.update_permission(&bob, &ws.id, &to_admin).unwrap().is_none());
        assert!(store.find_permission(&bob, &ws.id).unwrap().is_none());

        admit_bob(&store, &ws);
        let grant: PermissionSet = [Permission::ManageChannels].into_iter().collect();
        store.update_permission(&bob, &ws.id, &PermissionUpdate::Grant(grant)).unwrap();
        let record = store.update_permission(&bob, &ws.id, &to_admin).unwrap().unwrap();
        assert_eq!(record.role, Role::Admin);
        assert!(record.permission_set.contains(Permission::ManageChannels));

        // A removed member stays removed
        store.remove_workspace_member(&ws.id, &bob).unwrap();
        assert!(store.update_permission(&bob, &ws.id, &to_admin).unwrap().is_none());
        assert!(store.find_permission(&bob, &ws.id).unwrap().is_none());
    }

    #[test]
    fn test_override_update_is_per_channel() {
        let (store, ws) = store_with_workspace();
        let ops = Channel::new(ws.id.clone(), "ops".into(), ChannelKind::Private, UserId::new("alice"));
        let dev = Channel::new(ws.id.clone(), "dev".into(), ChannelKind::Private, UserId::new("alice"));
        store.insert_channel(&ops).unwrap();
        store.insert_channel(&dev).unwrap();
        admit_bob(&store, &ws);
        admit_to_channel(&store, &ws, &ops, "bob");
        admit_to_channel(&store, &ws, &dev, "bob");

        let bob = UserId::new("bob");
        let record = store
            .update_permission(
                &bob,
                &ws.id,
                &PermissionUpdate::ChannelOverride {
                    channel_id: ops.id.clone(),
                    role: Role::Admin,
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(record.channel_override(&ops.id), Some(Role::Admin));
        assert_eq!(record.channel_override(&dev.id), Some(Role::Member));

        store.remove_channel_member(&dev.id, &bob).unwrap();
        let stale = PermissionUpdate::ChannelOverride {
            channel_id: dev.id.clone(),
            role: Role::Admin,
        };
        assert!(store.update_permission(&bob, &ws.id, &stale).unwrap().is_none());
        let record = store.find_permission(&bob, &ws.id).unwrap().unwrap();
        assert_eq!(record.channel_override(&dev.id), None);
    }

    #[test]
    fn test_owner_joining_a_channel_gets_no_record() {
        let (store, ws) = store_with_workspace();
        let ops = Channel::new(ws.id.clone(), "ops".into(), ChannelKind::Private, UserId::new("bob"));
        store.insert_channel(&ops).unwrap();

        assert_eq!(admit_to_channel(&store, &ws, &ops, "alice"), Admission::Admitted);
        assert!(store.find_channel(&ops.id).unwrap().unwrap().is_member(&UserId::new("alice")));
        assert!(store.find_permission(&UserId::new("alice"), &ws.id).unwrap().is_none());
    }

    #[test]
    fn test_channel_admission_creates_guest_record() {
        let (store, ws) = store_with_workspace();
        let channel = Channel::new(ws.id.clone(), "ops".into(), ChannelKind::Private, UserId::new("alice"));
        store.insert_channel(&channel).unwrap();
        store.add_channel_invitation(&channel.id, "bob@example.com").unwrap();

        let admission = ChannelAdmission {
            workspace_id: ws.id.clone(),
            channel_id: channel.id.clone(),
            user_id: UserId::new("bob"),
            role: Role::Member,
            email: Some("bob@example.com".into()),
        };
        assert_eq!(store.admit_channel_member(&admission).unwrap(), Admission::Admitted);
        assert_eq!(store.admit_channel_member(&admission).unwrap(), Admission::AlreadyMember);

        let record = store.find_permission(&UserId::new("bob"), &ws.id).unwrap().unwrap();
        assert_eq!(record.role, Role::Guest);
        assert_eq!(record.channel_override(&channel.id), Some(Role::Member));

        let loaded = store.find_channel(&channel.id).unwrap().unwrap();
        assert!(loaded.is_member(&UserId::new("bob")));
        assert!(loaded.invitations.is_empty());
    }

    #[test]
    fn test_remove_workspace_member_cascades() {
        let (store, ws) = store_with_workspace();
        let channel = Channel::new(ws.id.clone(), "general".into(), ChannelKind::Public, UserId::new("alice"));
        store.insert_channel(&channel).unwrap();
        store
            .admit_workspace_member(&WorkspaceAdmission {
                record: PermissionRecord::member(UserId::new("bob"), ws.id.clone()),
                email: None,
            })
            .unwrap();
        store
            .admit_channel_member(&ChannelAdmission {
                workspace_id: ws.id.clone(),
                channel_id: channel.id.clone(),
                user_id: UserId::new("bob"),
                role: Role::Member,
                email: None,
            })
            .unwrap();

        assert!(store.remove_workspace_member(&ws.id, &UserId::new("bob")).unwrap());
        assert!(store.find_permission(&UserId::new("bob"), &ws.id).unwrap().is_none());
        let channel = store.find_channel(&channel.id).unwrap().unwrap();
        assert!(!channel.is_member(&UserId::new("bob")));
        assert!(!store.remove_workspace_member(&ws.id, &UserId::new("bob")).unwrap());
    }

    #[test]
    fn test_delete_workspace_cascades() {
        let (store, ws) = store_with_workspace();
        let channel = Channel::new(ws.id.clone(), "general".into(), ChannelKind::Public, UserId::new("alice"));
        store.insert_channel(&channel).unwrap();
        admit_bob(&store, &ws);

        store.delete_workspace(&ws.id).unwrap();
        assert!(store.find_channel(&channel.id).unwrap().is_none());
        assert!(store.find_permission(&UserId::new("bob"), &ws.id).unwrap().is_none());
    }

    #[test]
    fn test_notifications_newest_first_and_read_flag() {
        let (store, _) = store_with_workspace();
        let bob = UserId::new("bob");
        let mut first = Notification::new(bob.clone(), NotificationKind::Message);
        first.created_at = Timestamp::from_millis(1);
        let mut second = Notification::new(bob.clone(), NotificationKind::Mention);
        second.created_at = Timestamp::from_millis(2);
        store.insert_notification(&first).unwrap();
        store.insert_notification(&second).unwrap();

        store.mark_notification_read(&first.id).unwrap();

        let all = store.list_notifications(&bob, false).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, second.id);

        let unread = store.list_notifications(&bob, true).unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].kind, NotificationKind::Mention);
    }

    #[test]
    fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huddle.db");
        {
            let store = SqlStore::open(&path, 2, Duration::from_secs(1)).unwrap();
            store
                .insert_user(&User::new(UserId::new("carol"), "carol", "carol@example.com"))
                .unwrap();
        }
        let store = SqlStore::open(&path, 2, Duration::from_secs(1)).unwrap();
        let carol = store.find_user_by_handle("carol").unwrap().unwrap();
        assert_eq!(carol.email, "carol@example.com");
        assert!(store.find_user_by_handle("Carol").unwrap().is_none());
    }
}
