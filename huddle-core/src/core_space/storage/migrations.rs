//! Database migrations for the Workspace/Channel/permission schema
//!
//! Each migration is applied atomically and tracked in `schema_version`.

use super::{StoreError, StoreResult};
use crate::core_space::types::Timestamp;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

/// Current schema version
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Migration descriptor
pub struct Migration {
    pub version: i32,
    pub description: &'static str,
    pub up_sql: &'static str,
}

/// All available migrations in order
pub fn get_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Users, workspaces, channels and permissions",
            up_sql: r#"
                CREATE TABLE IF NOT EXISTS users (
                    id TEXT PRIMARY KEY,
                    display_name TEXT NOT NULL,
                    email TEXT NOT NULL UNIQUE,             -- normalized (lowercase)
                    is_global_admin INTEGER NOT NULL DEFAULT 0,
                    created_at INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_users_display_name ON users(display_name);

                CREATE TABLE IF NOT EXISTS workspaces (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    visibility TEXT NOT NULL CHECK(visibility IN ('public', 'private')),
                    owner_id TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS workspace_members (
                    workspace_id TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    joined_at INTEGER NOT NULL,
                    PRIMARY KEY (workspace_id, user_id),
                    FOREIGN KEY (workspace_id) REFERENCES workspaces(id) ON DELETE CASCADE
                );

                CREATE INDEX IF NOT EXISTS idx_workspace_members_user ON workspace_members(user_id);

                CREATE TABLE IF NOT EXISTS workspace_invitations (
                    workspace_id TEXT NOT NULL,
                    email TEXT NOT NULL,
                    invited_at INTEGER NOT NULL,
                    PRIMARY KEY (workspace_id, email),
                    FOREIGN KEY (workspace_id) REFERENCES workspaces(id) ON DELETE CASCADE
                );

                CREATE TABLE IF NOT EXISTS workspace_join_requests (
                    workspace_id TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    requested_at INTEGER NOT NULL,
                    PRIMARY KEY (workspace_id, user_id),
                    FOREIGN KEY (workspace_id) REFERENCES workspaces(id) ON DELETE CASCADE
                );

                CREATE TABLE IF NOT EXISTS channels (
                    id TEXT PRIMARY KEY,
                    workspace_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    kind TEXT NOT NULL CHECK(kind IN ('public', 'private')),
                    created_by TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    FOREIGN KEY (workspace_id) REFERENCES workspaces(id) ON DELETE CASCADE
                );

                CREATE INDEX IF NOT EXISTS idx_channels_workspace ON channels(workspace_id);

                CREATE TABLE IF NOT EXISTS channel_members (
                    channel_id TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    joined_at INTEGER NOT NULL,
                    PRIMARY KEY (channel_id, user_id),
                    FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE
                );

                CREATE INDEX IF NOT EXISTS idx_channel_members_user ON channel_members(user_id);

                CREATE TABLE IF NOT EXISTS channel_invitations (
                    channel_id TEXT NOT NULL,
                    email TEXT NOT NULL,
                    invited_at INTEGER NOT NULL,
                    PRIMARY KEY (channel_id, email),
                    FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE
                );

                -- One record per (user, workspace)
                CREATE TABLE IF NOT EXISTS permissions (
                    user_id TEXT NOT NULL,
                    workspace_id TEXT NOT NULL,
                    role TEXT NOT NULL CHECK(role IN ('admin', 'member', 'guest')),
                    permission_set TEXT NOT NULL DEFAULT '[]',  -- JSON array of tokens
                    updated_at INTEGER NOT NULL,
                    PRIMARY KEY (user_id, workspace_id),
                    FOREIGN KEY (workspace_id) REFERENCES workspaces(id) ON DELETE CASCADE
                );

                -- Unique per channel within a record
                CREATE TABLE IF NOT EXISTS channel_role_overrides (
                    user_id TEXT NOT NULL,
                    workspace_id TEXT NOT NULL,
                    channel_id TEXT NOT NULL,
                    role TEXT NOT NULL CHECK(role IN ('admin', 'member', 'guest')),
                    PRIMARY KEY (user_id, channel_id),
                    FOREIGN KEY (user_id, workspace_id)
                        REFERENCES permissions(user_id, workspace_id) ON DELETE CASCADE,
                    FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE
                );

                CREATE INDEX IF NOT EXISTS idx_overrides_record
                    ON channel_role_overrides(user_id, workspace_id);
            "#,
        },
        Migration {
            version: 2,
            description: "Messages, notifications and notification preferences",
            up_sql: r#"
                CREATE TABLE IF NOT EXISTS notification_preferences (
                    user_id TEXT NOT NULL,
                    channel_id TEXT NOT NULL,
                    preference TEXT NOT NULL CHECK(preference IN ('all', 'mute')),
                    PRIMARY KEY (user_id, channel_id),
                    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
                );

                CREATE TABLE IF NOT EXISTS messages (
                    id TEXT PRIMARY KEY,
                    workspace_id TEXT NOT NULL,
                    channel_id TEXT NOT NULL,
                    sender_id TEXT NOT NULL,
                    body TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    FOREIGN KEY (workspace_id) REFERENCES workspaces(id) ON DELETE CASCADE,
                    FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE
                );

                CREATE INDEX IF NOT EXISTS idx_messages_channel ON messages(channel_id, created_at);

                -- Notifications outlive the resources they reference
                CREATE TABLE IF NOT EXISTS notifications (
                    id TEXT PRIMARY KEY,
                    recipient_id TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    actor_id TEXT,
                    workspace_id TEXT,
                    channel_id TEXT,
                    message_id TEXT,
                    read INTEGER NOT NULL DEFAULT 0,
                    created_at INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_notifications_recipient
                    ON notifications(recipient_id, read, created_at);
            "#,
        },
    ]
}

fn current_version(conn: &Connection) -> StoreResult<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;

    Ok(version.unwrap_or(0))
}

/// Run all pending migrations, returning the resulting schema version
pub fn migrate(pool: &Pool<SqliteConnectionManager>) -> StoreResult<i32> {
    let mut conn = pool.get()?;
    let current = current_version(&conn)?;

    for migration in get_migrations().into_iter().filter(|m| m.version > current) {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.up_sql).map_err(|e| {
            StoreError::Migration(format!("v{} ({}): {}", migration.version, migration.description, e))
        })?;
        tx.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?, ?)",
            params![migration.version, Timestamp::now().as_millis() as i64],
        )?;
        tx.commit()?;

        info!(
            version = migration.version,
            description = migration.description,
            "applied schema migration"
        );
    }

    current_version(&conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_test_pool() -> Pool<SqliteConnectionManager> {
        let manager = SqliteConnectionManager::memory();
        Pool::builder().max_size(1).build(manager).expect("Failed to create pool")
    }

    #[test]
    fn test_initial_migration() {
        let pool = setup_test_pool();
        let version = migrate(&pool).expect("Migration failed");
        assert_eq!(version, CURRENT_SCHEMA_VERSION);

        let conn = pool.get().unwrap();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        for table in [
            "users",
            "workspaces",
            "workspace_members",
            "workspace_invitations",
            "channels",
            "channel_members",
            "permissions",
            "channel_role_overrides",
            "messages",
            "notifications",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {}", table);
        }
    }

    #[test]
    fn test_idempotent_migrations() {
        let pool = setup_test_pool();
        migrate(&pool).expect("First migration failed");
        let version = migrate(&pool).expect("Second migration failed");
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_override_cascades_with_permission_record() {
        let pool = setup_test_pool();
        migrate(&pool).unwrap();
        let conn = pool.get().unwrap();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();

        conn.execute_batch(
            "INSERT INTO workspaces VALUES ('w1', 'Acme', 'public', 'alice', 1, 1);
             INSERT INTO channels VALUES ('c1', 'w1', 'general', 'public', 'alice', 1);
             INSERT INTO permissions VALUES ('bob', 'w1', 'member', '[]', 1);
             INSERT INTO channel_role_overrides VALUES ('bob', 'w1', 'c1', 'admin');
             DELETE FROM permissions WHERE user_id = 'bob';",
        )
        .unwrap();

        let count: i32 = conn
            .query_row("SELECT COUNT(*) FROM channel_role_overrides", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
