//! Relational store for users, reviewer program assignments and the audit
//! trail. Backed by SQLite; the schema is created on open.

use std::fs::create_dir_all;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0} already exists")]
    Conflict(String),
    #[error("invalid stored value: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT UNIQUE NOT NULL,
    email TEXT UNIQUE,
    password_hash TEXT NOT NULL,
    role TEXT NOT NULL CHECK(role IN ('admin', 'reviewer')),
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    username TEXT NOT NULL,
    action TEXT NOT NULL CHECK(action IN ('VIEW', 'UPDATE')),
    application_row INTEGER NOT NULL,
    application_title TEXT NOT NULL,
    field_name TEXT,
    old_value TEXT,
    new_value TEXT,
    timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_logs_row ON audit_logs(application_row);
CREATE INDEX IF NOT EXISTS idx_audit_logs_user ON audit_logs(user_id);

CREATE TABLE IF NOT EXISTS reviewer_programs (
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    program TEXT NOT NULL,
    PRIMARY KEY (user_id, program)
);
"#;

/// A user row as stored, including the password hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub password_hash: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

/// Data needed to append one audit entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuditEntry {
    pub user_id: i64,
    pub username: String,
    pub action: String,
    pub application_row: u32,
    pub application_title: String,
    pub field_name: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

/// An audit entry as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRow {
    pub id: i64,
    pub user_id: i64,
    pub username: String,
    pub action: String,
    pub application_row: u32,
    pub application_title: String,
    pub field_name: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file, creating parent directories.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    /// Run raw SQL against the connection, for tests that need a broken schema.
    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<()> {
        self.lock().execute_batch(sql)?;
        Ok(())
    }

    // ---- users ----

    /// Insert a user and return the stored row.
    ///
    /// # Errors
    /// * `StoreError::Conflict` when the username or email is taken
    pub fn insert_user(
        &self,
        username: &str,
        email: Option<&str>,
        password_hash: &str,
        role: &str,
    ) -> Result<UserRow> {
        let stamp = now_stamp();
        let created_at = parse_timestamp(&stamp)?;
        let conn = self.lock();
        let inserted = conn.execute(
            "INSERT INTO users (username, email, password_hash, role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![username, email, password_hash, role, stamp],
        );

        match inserted {
            Ok(_) => Ok(UserRow {
                id: conn.last_insert_rowid(),
                username: username.to_string(),
                email: email.map(str::to_string),
                password_hash: password_hash.to_string(),
                role: role.to_string(),
                created_at,
            }),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation
                    && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Err(StoreError::Conflict(format!("User {username}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT id, username, email, password_hash, role, created_at
             FROM users WHERE id = ?1",
            params![id],
            user_from_row,
        )
        .optional()?
        .transpose()
    }

    /// Look a user up by username, or by email when no username matches.
    pub fn user_by_login(&self, login: &str) -> Result<Option<UserRow>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT id, username, email, password_hash, role, created_at
             FROM users WHERE username = ?1 OR email = ?1
             ORDER BY username = ?1 DESC LIMIT 1",
            params![login],
            user_from_row,
        )
        .optional()?
        .transpose()
    }

    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, username, email, password_hash, role, created_at
             FROM users ORDER BY id",
        )?;
        let rows = stmt.query_map([], user_from_row)?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row??);
        }
        Ok(users)
    }

    pub fn count_users(&self) -> Result<i64> {
        let conn = self.lock();
        Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?)
    }

    /// Returns whether a row was updated.
    pub fn update_password(&self, id: i64, password_hash: &str) -> Result<bool> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE users SET password_hash = ?1 WHERE id = ?2",
            params![password_hash, id],
        )?;
        Ok(changed > 0)
    }

    /// Returns whether a row was deleted. Program assignments cascade.
    pub fn delete_user(&self, id: i64) -> Result<bool> {
        let conn = self.lock();
        let changed = conn.execute("DELETE FROM users WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    // ---- reviewer programs ----

    pub fn programs_for(&self, user_id: i64) -> Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT program FROM reviewer_programs WHERE user_id = ?1 ORDER BY program",
        )?;
        let rows = stmt.query_map(params![user_id], |r| r.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Replace a reviewer's assignments with `programs` in one transaction.
    pub fn replace_programs(&self, user_id: i64, programs: &[String]) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM reviewer_programs WHERE user_id = ?1",
            params![user_id],
        )?;
        for program in programs {
            tx.execute(
                "INSERT OR IGNORE INTO reviewer_programs (user_id, program) VALUES (?1, ?2)",
                params![user_id, program],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Returns whether an assignment was removed.
    pub fn remove_program(&self, user_id: i64, program: &str) -> Result<bool> {
        let conn = self.lock();
        let changed = conn.execute(
            "DELETE FROM reviewer_programs WHERE user_id = ?1 AND program = ?2",
            params![user_id, program],
        )?;
        Ok(changed > 0)
    }

    // ---- audit ----

    pub fn insert_audit(&self, entry: &NewAuditEntry) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO audit_logs
             (user_id, username, action, application_row, application_title,
              field_name, old_value, new_value, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entry.user_id,
                entry.username,
                entry.action,
                entry.application_row,
                entry.application_title,
                entry.field_name,
                entry.old_value,
                entry.new_value,
                now_stamp(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn audit_for_row(&self, application_row: u32) -> Result<Vec<AuditRow>> {
        self.query_audit(
            "SELECT * FROM audit_logs WHERE application_row = ?1
             ORDER BY timestamp DESC, id DESC",
            params![application_row],
        )
    }

    pub fn audit_for_user(&self, user_id: i64) -> Result<Vec<AuditRow>> {
        self.query_audit(
            "SELECT * FROM audit_logs WHERE user_id = ?1
             ORDER BY timestamp DESC, id DESC",
            params![user_id],
        )
    }

    pub fn recent_audit(&self, limit: u32) -> Result<Vec<AuditRow>> {
        self.query_audit(
            "SELECT * FROM audit_logs ORDER BY timestamp DESC, id DESC LIMIT ?1",
            params![limit],
        )
    }

    fn query_audit(&self, sql: &str, args: impl rusqlite::Params) -> Result<Vec<AuditRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(args, audit_from_row)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row??);
        }
        Ok(entries)
    }
}

// Fixed width so text ordering matches time ordering.
fn now_stamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {raw:?}: {e}")))
}

// The outer result carries SQLite errors, the inner one decoding errors.
fn user_from_row(r: &Row<'_>) -> rusqlite::Result<Result<UserRow>> {
    let created_at: String = r.get("created_at")?;
    let id = r.get("id")?;
    let username = r.get("username")?;
    let email = r.get("email")?;
    let password_hash = r.get("password_hash")?;
    let role = r.get("role")?;

    Ok(parse_timestamp(&created_at).map(|created_at| UserRow {
        id,
        username,
        email,
        password_hash,
        role,
        created_at,
    }))
}

fn audit_from_row(r: &Row<'_>) -> rusqlite::Result<Result<AuditRow>> {
    let timestamp: String = r.get("timestamp")?;
    let id = r.get("id")?;
    let user_id = r.get("user_id")?;
    let username = r.get("username")?;
    let action = r.get("action")?;
    let application_row = r.get("application_row")?;
    let application_title = r.get("application_title")?;
    let field_name = r.get("field_name")?;
    let old_value = r.get("old_value")?;
    let new_value = r.get("new_value")?;

    Ok(parse_timestamp(&timestamp).map(|timestamp| AuditRow {
        id,
        user_id,
        username,
        action,
        application_row,
        application_title,
        field_name,
        old_value,
        new_value,
        timestamp,
    }))
}
