//! Authorization gate: decides which records a principal may see or change.

use std::collections::BTreeSet;

use log::warn;

use crate::error::AppError;
use crate::login::{Role, User};
use crate::record::Record;

/// Records visible to one principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Every record (admins).
    All,
    /// Only records whose program is in the set. Empty means nothing.
    Programs(BTreeSet<String>),
}

impl Scope {
    /// Scope for `user` given the programs assigned to them.
    pub fn for_user(user: &User, assigned: Vec<String>) -> Scope {
        match user.role {
            Role::Admin => Scope::All,
            Role::Reviewer => {
                let programs: BTreeSet<String> = assigned
                    .into_iter()
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect();
                if programs.is_empty() {
                    warn!("Reviewer {} has no assigned programs", user.username);
                }
                Scope::Programs(programs)
            }
        }
    }

    /// Whether a record with this program value is visible.
    ///
    /// A record without a program is only visible to `All`.
    pub fn permits(&self, program: Option<&str>) -> bool {
        match self {
            Scope::All => true,
            Scope::Programs(allowed) => program
                .map(str::trim)
                .is_some_and(|p| allowed.contains(p)),
        }
    }

    /// Keep only permitted records, preserving order.
    pub fn filter<F>(&self, records: Vec<Record>, program_of: F) -> Vec<Record>
    where
        F: Fn(&Record) -> Option<&str>,
    {
        match self {
            Scope::All => records,
            Scope::Programs(_) => records
                .into_iter()
                .filter(|r| self.permits(program_of(r)))
                .collect(),
        }
    }
}

/// Fail with `Forbidden` unless `user` is an admin.
pub fn require_admin(user: &User) -> Result<(), AppError> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden("Admin access required".to_string()))
    }
}
