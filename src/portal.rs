//! Application review operations, composed from the spreadsheet adapter, the
//! authorization gate and the audit trail.
//!
//! Every method takes the authenticated [`User`] and applies the access rules
//! itself, so the HTTP layer only has to extract and forward arguments.

use log::{info, warn};

use crate::access::{Scope, require_admin};
use crate::adapter::SpreadsheetAdapter;
use crate::audit::{AuditEntry, AuditTrail};
use crate::error::AppError;
use crate::login::{Accounts, Role, User};
use crate::record::Record;
use crate::sheets::SheetsClient;
use crate::store::Database;

pub struct Portal<C: SheetsClient> {
    pub adapter: SpreadsheetAdapter<C>,
    pub audit: AuditTrail,
    pub accounts: Accounts,
    db: Database,
}

impl<C: SheetsClient> Portal<C> {
    pub fn new(adapter: SpreadsheetAdapter<C>, db: Database) -> Self {
        let audit = AuditTrail::new(db.clone(), adapter.settings().title_field.clone());
        Portal {
            adapter,
            audit,
            accounts: Accounts::new(db.clone()),
            db,
        }
    }

    /// Access scope of `user`, read fresh from the program assignments.
    pub fn scope_of(&self, user: &User) -> Result<Scope, AppError> {
        let assigned = match user.role {
            Role::Admin => Vec::new(),
            Role::Reviewer => self
                .db
                .programs_for(user.id)
                .map_err(|e| AppError::from_store(e, "Failed to fetch reviewer programs"))?,
        };
        Ok(Scope::for_user(user, assigned))
    }

    /// All applications `user` may see, in sheet order.
    pub async fn list_applications(&self, user: &User) -> Result<Vec<Record>, AppError> {
        let scope = self.scope_of(user)?;
        let records = self
            .adapter
            .fetch_all()
            .await
            .map_err(|e| AppError::from_sheets(e, "Failed to fetch applications"))?;
        Ok(scope.filter(records, |r| self.adapter.program_of(r)))
    }

    async fn load_in_scope(
        &self,
        user: &User,
        row_index: u32,
        context: &str,
    ) -> Result<Record, AppError> {
        let scope = self.scope_of(user)?;
        let record = self
            .adapter
            .find(row_index)
            .await
            .map_err(|e| AppError::from_sheets(e, context))?
            .ok_or_else(|| AppError::NotFound("Application not found".to_string()))?;

        if !scope.permits(self.adapter.program_of(&record)) {
            warn!(
                "{} denied access to row {row_index} outside assigned programs",
                user.username
            );
            return Err(AppError::Forbidden(
                "Application is outside your assigned programs".to_string(),
            ));
        }
        Ok(record)
    }

    /// One application; a `VIEW` entry is appended on success.
    pub async fn view_application(&self, user: &User, row_index: u32) -> Result<Record, AppError> {
        let record = self
            .load_in_scope(user, row_index, "Failed to fetch application")
            .await?;
        self.audit.log_view(user, &record);
        Ok(record)
    }

    /// Overwrite one field of one application.
    ///
    /// The old value comes from the record read before the write, and the
    /// `UPDATE` entry is appended only after the write succeeded. The read,
    /// the write and the log are separate steps: two concurrent updates of
    /// the same cell both log the same old value and the later write wins.
    ///
    /// # Errors
    /// * `AppError::ValidationFailed` when `field` is blank or `value` missing
    /// * `AppError::NotFound` when no record has `row_index`
    /// * `AppError::Forbidden` when the record is outside the reviewer's scope
    /// * `AppError::UnknownField` when the header no longer exists
    pub async fn update_application(
        &self,
        user: &User,
        row_index: u32,
        field: &str,
        value: Option<&str>,
    ) -> Result<(), AppError> {
        let Some(value) = value.filter(|_| !field.is_empty()) else {
            return Err(AppError::ValidationFailed(
                "Field name and value required".to_string(),
            ));
        };

        let record = self
            .load_in_scope(user, row_index, "Failed to update application")
            .await?;
        let old_value = record.get(field).map(str::to_string);

        self.adapter
            .update_field(row_index, field, value)
            .await
            .map_err(|e| AppError::from_sheets(e, "Failed to update application"))?;

        self.audit
            .log_update(user, &record, field, old_value.as_deref(), Some(value));
        info!("{} updated {field:?} on row {row_index}", user.username);
        Ok(())
    }

    /// Audit history of one row, newest first. Any authenticated user.
    pub fn application_history(&self, row_index: u32) -> Result<Vec<AuditEntry>, AppError> {
        self.audit.history(row_index)
    }

    /// Recent audit entries, optionally for one user only (admin only).
    pub fn audit_log(
        &self,
        user: &User,
        limit: Option<u32>,
        user_id: Option<i64>,
    ) -> Result<Vec<AuditEntry>, AppError> {
        require_admin(user)?;
        match user_id {
            Some(id) => self.audit.by_user(id),
            None => self.audit.recent(limit),
        }
    }

    /// Distinct program values in the sheet (admin only).
    pub async fn programs(&self, user: &User) -> Result<Vec<String>, AppError> {
        require_admin(user)?;
        self.adapter
            .programs()
            .await
            .map_err(|e| AppError::from_sheets(e, "Failed to fetch programs"))
    }

    /// Programs assigned to a reviewer (admin only).
    pub fn reviewer_programs(&self, user: &User, reviewer_id: i64) -> Result<Vec<String>, AppError> {
        require_admin(user)?;
        self.existing_user(reviewer_id)?;
        self.db
            .programs_for(reviewer_id)
            .map_err(|e| AppError::from_store(e, "Failed to fetch reviewer programs"))
    }

    /// Replace a reviewer's program set (admin only). Blank names are dropped.
    pub fn assign_programs(
        &self,
        user: &User,
        reviewer_id: i64,
        programs: &[String],
    ) -> Result<Vec<String>, AppError> {
        require_admin(user)?;
        self.existing_user(reviewer_id)?;

        let cleaned: Vec<String> = programs
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
        self.db
            .replace_programs(reviewer_id, &cleaned)
            .map_err(|e| AppError::from_store(e, "Failed to update reviewer programs"))?;
        info!(
            "{} assigned {} program(s) to user {reviewer_id}",
            user.username,
            cleaned.len()
        );

        self.db
            .programs_for(reviewer_id)
            .map_err(|e| AppError::from_store(e, "Failed to fetch reviewer programs"))
    }

    /// Remove one program from a reviewer (admin only).
    pub fn unassign_program(
        &self,
        user: &User,
        reviewer_id: i64,
        program: &str,
    ) -> Result<(), AppError> {
        require_admin(user)?;
        let removed = self
            .db
            .remove_program(reviewer_id, program.trim())
            .map_err(|e| AppError::from_store(e, "Failed to update reviewer programs"))?;
        if !removed {
            return Err(AppError::NotFound("Program assignment not found".to_string()));
        }
        Ok(())
    }

    /// Drop and rebuild the spreadsheet client (admin only).
    pub fn reconnect_sheets(&self, user: &User) -> Result<(), AppError> {
        require_admin(user)?;
        self.adapter
            .reconnect()
            .map_err(|e| AppError::from_sheets(e, "Failed to reconnect spreadsheet"))?;
        info!("Spreadsheet client rebuilt by {}", user.username);
        Ok(())
    }

    fn existing_user(&self, id: i64) -> Result<User, AppError> {
        self.accounts
            .get(id)?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditAction;
    use crate::config::SheetSettings;
    use crate::login::NewUser;
    use crate::sheets::{MemorySheet, SheetsError};

    struct Fixture {
        portal: Portal<MemorySheet>,
        sheet: MemorySheet,
        admin: User,
        reviewer: User,
    }

    fn fixture() -> Fixture {
        let sheet = MemorySheet::from_rows(&[
            &["Name", "Program", "APPROVED RESEARCH TITLE"],
            &["Ana", "CS", "Sleep study"],
            &["Bo", "EE", ""],
            &["Cy", "CS", "Gait analysis"],
        ]);
        let db = Database::open_in_memory().unwrap();
        let adapter = SpreadsheetAdapter::with_client(SheetSettings::default(), sheet.clone());
        let portal = Portal::new(adapter, db);

        let create = |name: &str, role: &str| {
            portal
                .accounts
                .create(&NewUser {
                    username: name.to_string(),
                    password: "secret123".to_string(),
                    email: None,
                    role: Some(role.to_string()),
                })
                .unwrap()
        };
        let admin = create("admin", "admin");
        let reviewer = create("rev", "reviewer");

        Fixture {
            portal,
            sheet,
            admin,
            reviewer,
        }
    }

    #[tokio::test]
    async fn admin_lists_everything() {
        let f = fixture();
        let records = f.portal.list_applications(&f.admin).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].row_index(), 2);
        assert_eq!(records[0].row_number(), 1);
    }

    #[tokio::test]
    async fn reviewer_without_programs_sees_nothing() {
        let f = fixture();
        let records = f.portal.list_applications(&f.reviewer).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn reviewer_sees_assigned_programs() {
        let f = fixture();
        f.portal
            .assign_programs(&f.admin, f.reviewer.id, &[" CS ".to_string(), "".to_string()])
            .unwrap();

        let rows: Vec<u32> = f
            .portal
            .list_applications(&f.reviewer)
            .await
            .unwrap()
            .iter()
            .map(Record::row_index)
            .collect();
        assert_eq!(rows, vec![2, 4]);

        assert!(matches!(
            f.portal.view_application(&f.reviewer, 3).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(f.portal.application_history(3).unwrap().is_empty());
    }

    #[tokio::test]
    async fn view_logs_once() {
        let f = fixture();
        let record = f.portal.view_application(&f.admin, 3).await.unwrap();
        assert_eq!(record.get("Name"), Some("Bo"));

        let history = f.portal.application_history(3).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, AuditAction::View);
        assert_eq!(history[0].application_title, "N/A");
        assert_eq!(history[0].username, "admin");
    }

    #[tokio::test]
    async fn audit_store_failure_does_not_fail_requests() {
        let f = fixture();
        f.portal.db.execute_raw("DROP TABLE audit_logs;").unwrap();

        let record = f.portal.view_application(&f.admin, 2).await.unwrap();
        assert_eq!(record.row_index(), 2);
        assert_eq!(record.get("Name"), Some("Ana"));

        f.portal
            .update_application(&f.admin, 2, "Program", Some("EE"))
            .await
            .unwrap();
        assert_eq!(f.sheet.cell(1, 1), "EE");

        assert!(f.portal.application_history(2).is_err());
    }

    #[tokio::test]
    async fn missing_row_is_not_found() {
        let f = fixture();
        assert!(matches!(
            f.portal.view_application(&f.admin, 99).await,
            Err(AppError::NotFound(_))
        ));
        assert!(f.portal.application_history(99).unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_writes_cell_and_logs_before_after() {
        let f = fixture();
        f.portal
            .update_application(&f.admin, 2, "Program", Some("EE"))
            .await
            .unwrap();

        let records = f.portal.list_applications(&f.admin).await.unwrap();
        assert_eq!(records[0].get("Program"), Some("EE"));
        assert_eq!(f.sheet.cell(1, 1), "EE");

        let history = f.portal.application_history(2).unwrap();
        assert_eq!(history.len(), 1);
        let entry = &history[0];
        assert_eq!(entry.action, AuditAction::Update);
        assert_eq!(entry.field_name.as_deref(), Some("Program"));
        assert_eq!(entry.old_value.as_deref(), Some("CS"));
        assert_eq!(entry.new_value.as_deref(), Some("EE"));
        assert_eq!(entry.application_title, "Sleep study");
    }

    #[tokio::test]
    async fn update_validation() {
        let f = fixture();
        assert!(matches!(
            f.portal.update_application(&f.admin, 2, "", Some("x")).await,
            Err(AppError::ValidationFailed(_))
        ));
        assert!(matches!(
            f.portal.update_application(&f.admin, 2, "Program", None).await,
            Err(AppError::ValidationFailed(_))
        ));
        assert!(matches!(
            f.portal.update_application(&f.admin, 99, "Program", Some("x")).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            f.portal.update_application(&f.admin, 2, "Status", Some("x")).await,
            Err(AppError::UnknownField(_))
        ));
        assert!(f.portal.application_history(2).unwrap().is_empty());
    }

    #[tokio::test]
    async fn reviewer_cannot_update_out_of_scope() {
        let f = fixture();
        f.portal
            .assign_programs(&f.admin, f.reviewer.id, &["CS".to_string()])
            .unwrap();

        assert!(matches!(
            f.portal
                .update_application(&f.reviewer, 3, "Program", Some("CS"))
                .await,
            Err(AppError::Forbidden(_))
        ));
        assert_eq!(f.sheet.cell(2, 1), "EE");

        f.portal
            .update_application(&f.reviewer, 4, "Name", Some("Cyd"))
            .await
            .unwrap();
        assert_eq!(f.sheet.cell(3, 0), "Cyd");
    }

    #[tokio::test]
    async fn offline_sheet_is_unavailable() {
        let f = fixture();
        f.sheet.set_offline(true);
        let err = f.portal.list_applications(&f.admin).await.unwrap_err();
        assert_eq!(err.to_string(), "Failed to fetch applications");
    }

    #[tokio::test]
    async fn unconstructible_client_is_unavailable() {
        let adapter: SpreadsheetAdapter<MemorySheet> =
            SpreadsheetAdapter::new(SheetSettings::default(), || {
                Err(SheetsError::Unavailable("no credentials".to_string()))
            });
        let portal = Portal::new(adapter, Database::open_in_memory().unwrap());
        let admin = portal
            .accounts
            .create(&NewUser {
                username: "admin".to_string(),
                password: "secret123".to_string(),
                email: None,
                role: Some("admin".to_string()),
            })
            .unwrap();

        assert!(matches!(
            portal.list_applications(&admin).await,
            Err(AppError::AdapterUnavailable)
        ));
        assert!(matches!(
            portal.reconnect_sheets(&admin),
            Err(AppError::AdapterUnavailable)
        ));
    }

    #[tokio::test]
    async fn admin_only_operations() {
        let f = fixture();
        assert!(matches!(
            f.portal.audit_log(&f.reviewer, None, None),
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            f.portal.programs(&f.reviewer).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            f.portal.assign_programs(&f.reviewer, f.reviewer.id, &[]),
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            f.portal.reconnect_sheets(&f.reviewer),
            Err(AppError::Forbidden(_))
        ));

        assert_eq!(f.portal.programs(&f.admin).await.unwrap(), vec!["CS", "EE"]);
        f.portal.reconnect_sheets(&f.admin).unwrap();
    }

    #[tokio::test]
    async fn program_assignment_lifecycle() {
        let f = fixture();
        assert!(matches!(
            f.portal.reviewer_programs(&f.admin, 999),
            Err(AppError::NotFound(_))
        ));

        let set = f
            .portal
            .assign_programs(&f.admin, f.reviewer.id, &["EE".to_string(), "CS".to_string()])
            .unwrap();
        assert_eq!(set, vec!["CS", "EE"]);

        f.portal
            .unassign_program(&f.admin, f.reviewer.id, "EE")
            .unwrap();
        assert_eq!(
            f.portal.reviewer_programs(&f.admin, f.reviewer.id).unwrap(),
            vec!["CS"]
        );
        assert!(matches!(
            f.portal.unassign_program(&f.admin, f.reviewer.id, "EE"),
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn audit_log_by_user() {
        let f = fixture();
        f.portal.view_application(&f.admin, 2).await.unwrap();
        f.portal.view_application(&f.admin, 3).await.unwrap();

        let all = f.portal.audit_log(&f.admin, Some(1), None).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].application_row, 3);

        let mine = f.portal.audit_log(&f.admin, None, Some(f.admin.id)).unwrap();
        assert_eq!(mine.len(), 2);
        assert!(
            f.portal
                .audit_log(&f.admin, None, Some(f.reviewer.id))
                .unwrap()
                .is_empty()
        );
    }
}
