//! Append-only audit trail of application views and field updates.
//!
//! Writing an entry never fails the operation being audited: store errors are
//! logged and the entry is dropped.

use std::fmt;

use chrono::{DateTime, Utc};
use log::{debug, error};
use serde::Serialize;

use crate::error::AppError;
use crate::login::User;
use crate::record::Record;
use crate::store::{AuditRow, Database, NewAuditEntry};

/// Title stored when the record has no value in the title field.
pub const TITLE_SENTINEL: &str = "N/A";

/// Entries returned by `recent` when no limit is given.
pub const DEFAULT_LIMIT: u32 = 100;

/// Upper bound on entries returned by `recent`.
pub const MAX_LIMIT: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditAction {
    View,
    Update,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::View => "VIEW",
            AuditAction::Update => "UPDATE",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit entry as reported to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub user_id: i64,
    pub username: String,
    pub action: AuditAction,
    pub application_row: u32,
    pub application_title: String,
    pub field_name: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = AppError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        let action = match row.action.as_str() {
            "VIEW" => AuditAction::View,
            "UPDATE" => AuditAction::Update,
            other => {
                return Err(AppError::Internal(format!(
                    "Audit entry {} has unknown action {other:?}",
                    row.id
                )));
            }
        };
        Ok(AuditEntry {
            id: row.id,
            user_id: row.user_id,
            username: row.username,
            action,
            application_row: row.application_row,
            application_title: row.application_title,
            field_name: row.field_name,
            old_value: row.old_value,
            new_value: row.new_value,
            timestamp: row.timestamp,
        })
    }
}

/// Clamp a requested page size into `1..=MAX_LIMIT`.
pub fn clamp_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

#[derive(Debug, Clone)]
pub struct AuditTrail {
    db: Database,
    title_field: String,
}

impl AuditTrail {
    pub fn new(db: Database, title_field: impl Into<String>) -> Self {
        AuditTrail {
            db,
            title_field: title_field.into(),
        }
    }

    /// Title snapshot for a record as the cell holds it, or the sentinel
    /// when blank.
    pub fn title_of(&self, record: &Record) -> String {
        record
            .get(&self.title_field)
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(TITLE_SENTINEL)
            .to_string()
    }

    pub fn log_view(&self, user: &User, record: &Record) {
        self.append(NewAuditEntry {
            user_id: user.id,
            username: user.username.clone(),
            action: AuditAction::View.to_string(),
            application_row: record.row_index(),
            application_title: self.title_of(record),
            field_name: None,
            old_value: None,
            new_value: None,
        });
    }

    /// Record a field update with the value read before the write.
    ///
    /// `record` is the pre-update snapshot; its title is what gets stored.
    /// A missing old or new value is stored as the empty string.
    pub fn log_update(
        &self,
        user: &User,
        record: &Record,
        field: &str,
        old_value: Option<&str>,
        new_value: Option<&str>,
    ) {
        self.append(NewAuditEntry {
            user_id: user.id,
            username: user.username.clone(),
            action: AuditAction::Update.to_string(),
            application_row: record.row_index(),
            application_title: self.title_of(record),
            field_name: Some(field.to_string()),
            old_value: Some(old_value.unwrap_or_default().to_string()),
            new_value: Some(new_value.unwrap_or_default().to_string()),
        });
    }

    fn append(&self, entry: NewAuditEntry) {
        match self.db.insert_audit(&entry) {
            Ok(id) => debug!(
                "Audit {id}: {} {} row {}",
                entry.username, entry.action, entry.application_row
            ),
            Err(e) => error!(
                "Failed to write {} audit entry for row {}: {e}",
                entry.action, entry.application_row
            ),
        }
    }

    /// Every entry for one application row, newest first.
    pub fn history(&self, row_index: u32) -> Result<Vec<AuditEntry>, AppError> {
        self.collect(self.db.audit_for_row(row_index))
    }

    /// The most recent entries across all rows, newest first.
    pub fn recent(&self, limit: Option<u32>) -> Result<Vec<AuditEntry>, AppError> {
        self.collect(self.db.recent_audit(clamp_limit(limit)))
    }

    /// Every entry written by one user, newest first.
    pub fn by_user(&self, user_id: i64) -> Result<Vec<AuditEntry>, AppError> {
        self.collect(self.db.audit_for_user(user_id))
    }

    fn collect(
        &self,
        rows: crate::store::Result<Vec<AuditRow>>,
    ) -> Result<Vec<AuditEntry>, AppError> {
        rows.map_err(|e| AppError::from_store(e, "Failed to fetch audit logs"))?
            .into_iter()
            .map(AuditEntry::try_from)
            .collect()
    }
}
