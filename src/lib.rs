/*!
# RERC Review Portal

A JSON API for reviewing research-ethics applications, built in Rust.

## Overview

Applications are submitted through a form whose responses land in a Google
Sheets tab. The portal treats that tab as its datastore: each data row is one
application, each header of row 1 is one field. Reviewers read and edit
applications through the API while every view and every edit is written to
an append-only audit trail in SQLite.

## Architecture

### Spreadsheet Layer
- **Technologies**: Google Sheets REST v4, reqwest, service-account OAuth2
- **Key Components**:
  - Sheets Client - Reads A1 ranges and writes single cells
  - Spreadsheet Adapter - Turns rows into records and addresses cells by header
  - Column Arithmetic - Bijective base-26 column letters and A1 ranges

### Portal Layer
- **Authorization Gate** - Admins see everything, reviewers only the
  programs assigned to them, reviewers without programs see nothing
- **Audit Trail** - `VIEW` and `UPDATE` entries with a title snapshot and
  the before/after pair of every edit
- **Accounts** - Argon2 password hashes and opaque session tokens

### Data Persistence Layer
- SQLite for users, reviewer program assignments and the audit trail
- The spreadsheet itself is never cached

## Modules

- **columns**: Column letter conversion and A1 range parsing
- **record**: One application materialised from one sheet row
- **sheets**: The spreadsheet client trait and an in-memory sheet
- **google**: The Google Sheets client
- **adapter**: Record reads and field writes over a sheets client
- **store**: SQLite persistence
- **audit**: Audit trail writer and queries
- **access**: Authorization gate
- **login**: Users, password hashing and sessions
- **portal**: The review operations composed from the modules above
- **app**: Routing and middleware (`web` feature)

## REST API Endpoints

- `/api/auth/login`, `/api/auth/logout`, `/api/auth/me` - Sessions
- `/api/applications` - Applications visible to the caller
- `/api/applications/{row}` - View (`GET`) or edit one field (`PATCH`)
- `/api/applications/{row}/history` - Audit entries of one application
- `/api/audit` - Recent audit entries (admin)
- `/api/programs`, `/api/reviewer-programs/{user}` - Program scoping (admin)
- `/api/users` - User management (admin)
*/

pub mod access;
pub mod adapter;
pub mod audit;
pub mod columns;
pub mod config;
pub mod error;
pub mod google;
pub mod login;
pub mod portal;
pub mod record;
pub mod sheets;
pub mod store;

#[cfg(feature = "web")]
pub mod app;

pub use adapter::SpreadsheetAdapter;
pub use config::Config;
pub use error::AppError;
pub use portal::Portal;
pub use record::Record;
pub use sheets::{MemorySheet, SheetsClient, SheetsError};
