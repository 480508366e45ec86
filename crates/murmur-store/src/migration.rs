//! Versioned schema migrations.
//!
//! Each migration is a static SQL batch with a version number. Applied
//! versions are recorded in `_migrations`, so [`run_all`] can be called on
//! every start.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// Append new migrations at the end; never edit one that has shipped.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "chats, users, messages, attachments",
        sql: r#"
            CREATE TABLE users (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                telegram_id INTEGER NOT NULL UNIQUE,
                name        TEXT NOT NULL,
                role        TEXT NOT NULL DEFAULT 'user'
                            CHECK(role IN ('user','developer','admin')),
                created_at  INTEGER NOT NULL,
                updated_at  INTEGER NOT NULL
            );

            CREATE TABLE chats (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                telegram_id         INTEGER NOT NULL UNIQUE,
                system_instructions TEXT NOT NULL DEFAULT '',
                created_at          INTEGER NOT NULL
            );

            CREATE TABLE messages (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id       INTEGER NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
                user_id       INTEGER REFERENCES users(id) ON DELETE SET NULL,
                telegram_id   INTEGER,
                content       TEXT NOT NULL DEFAULT '',
                quote_content TEXT,
                quote_user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
                created_at    INTEGER NOT NULL
            );
            CREATE INDEX idx_messages_chat_time ON messages(chat_id, created_at, id);

            CREATE TABLE attachments (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
                position   INTEGER NOT NULL,
                mime_type  TEXT NOT NULL,
                data       BLOB NOT NULL
            );
            CREATE INDEX idx_attachments_message ON attachments(message_id, position);
        "#,
    },
    Migration {
        version: 2,
        description: "bot key/value state",
        sql: r#"
            CREATE TABLE bot_state (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
        "#,
    },
];

/// Apply all pending migrations in version order.
pub fn run_all(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        );",
    )
    .map_err(|e| StoreError::Migration {
        version: 0,
        message: format!("cannot create _migrations: {e}"),
    })?;

    let applied = current_version(conn)?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > applied).collect();
    if pending.is_empty() {
        debug!(version = applied, "schema up to date");
        return Ok(());
    }

    for migration in pending {
        apply(conn, migration)?;
    }
    info!(version = current_version(conn)?, "schema migrated");
    Ok(())
}

/// Highest applied migration version, or 0 on a fresh database.
pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |row| row.get(0),
    )
    .map_err(|e| StoreError::Migration {
        version: 0,
        message: format!("cannot read schema version: {e}"),
    })
}

fn apply(conn: &Connection, migration: &Migration) -> StoreResult<()> {
    info!(
        version = migration.version,
        description = migration.description,
        "applying migration"
    );
    let fail = |message: String| StoreError::Migration {
        version: migration.version,
        message,
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| fail(format!("begin: {e}")))?;

    if let Err(e) = tx.execute_batch(migration.sql) {
        warn!(version = migration.version, error = %e, "migration failed, rolling back");
        return Err(fail(e.to_string()));
    }

    tx.execute(
        "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![
            migration.version,
            migration.description,
            chrono::Utc::now().timestamp()
        ],
    )
    .map_err(|e| fail(format!("record: {e}")))?;

    tx.commit().map_err(|e| fail(format!("commit: {e}")))
}

// ── tests ────────────────────────────────────────────────────────────
