//! The spreadsheet adapter: sheet ranges in, [`Record`]s out, single-cell
//! writes back.
//!
//! Nothing is cached except the client handle. Every read goes to the sheet,
//! and `update_field` re-reads the header row before writing so a column
//! moved upstream is still addressed correctly.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use log::{info, warn};

use crate::columns::{cell_range, column_to_letter, letter_to_column, quote_sheet_name};
use crate::config::SheetSettings;
use crate::record::{Record, records_from_rows};
use crate::sheets::{SheetsClient, SheetsError};

/// Header spellings tried after the configured program field.
const PROGRAM_FALLBACKS: [&str; 3] = ["Program", "PROGRAM", "program"];

type ClientFactory<C> = Box<dyn Fn() -> Result<C, SheetsError> + Send + Sync>;

pub struct SpreadsheetAdapter<C: SheetsClient> {
    factory: ClientFactory<C>,
    client: RwLock<Option<Arc<C>>>,
    settings: SheetSettings,
}

impl<C: SheetsClient> SpreadsheetAdapter<C> {
    /// Create an adapter that builds its client on first use.
    ///
    /// # Arguments
    /// * `settings` - Sheet name and meaningful columns
    /// * `factory` - Builds the remote client; an error here surfaces as
    ///   `SheetsError::Unavailable` from every operation until it succeeds
    pub fn new<F>(mut settings: SheetSettings, factory: F) -> Self
    where
        F: Fn() -> Result<C, SheetsError> + Send + Sync + 'static,
    {
        if letter_to_column(&settings.last_column).is_none() {
            warn!(
                "Invalid last column {:?}, falling back to ZZ",
                settings.last_column
            );
            settings.last_column = "ZZ".to_string();
        }
        settings.last_column = settings.last_column.to_ascii_uppercase();

        SpreadsheetAdapter {
            factory: Box::new(factory),
            client: RwLock::new(None),
            settings,
        }
    }

    /// Create an adapter around an already constructed client.
    pub fn with_client(settings: SheetSettings, client: C) -> Self
    where
        C: Clone,
    {
        Self::new(settings, move || Ok(client.clone()))
    }

    pub fn settings(&self) -> &SheetSettings {
        &self.settings
    }

    /// Whether a client handle is currently cached.
    pub fn is_connected(&self) -> bool {
        self.client.read().unwrap().is_some()
    }

    /// Drop the cached client; the next operation builds a new one.
    pub fn reset(&self) {
        *self.client.write().unwrap() = None;
    }

    /// Drop the cached client and build a new one immediately.
    ///
    /// # Errors
    /// * `SheetsError::Unavailable` if the factory fails; the adapter is then
    ///   left disconnected
    pub fn reconnect(&self) -> Result<(), SheetsError> {
        let mut slot = self.client.write().unwrap();
        *slot = None;
        let client = (self.factory)().map_err(unavailable)?;
        *slot = Some(Arc::new(client));
        info!("Spreadsheet client reconnected");
        Ok(())
    }

    fn client(&self) -> Result<Arc<C>, SheetsError> {
        if let Some(client) = self.client.read().unwrap().as_ref() {
            return Ok(Arc::clone(client));
        }

        let mut slot = self.client.write().unwrap();
        if let Some(client) = slot.as_ref() {
            return Ok(Arc::clone(client));
        }
        let client = Arc::new((self.factory)().map_err(unavailable)?);
        *slot = Some(Arc::clone(&client));
        info!("Spreadsheet client initialized");
        Ok(client)
    }

    fn full_range(&self) -> String {
        format!(
            "{}!A:{}",
            quote_sheet_name(&self.settings.sheet_name),
            self.settings.last_column
        )
    }

    fn header_range(&self) -> String {
        format!("{}!1:1", quote_sheet_name(&self.settings.sheet_name))
    }

    /// Read every row of the sheet and convert data rows to records.
    ///
    /// # Returns
    /// * Records in sheet order; empty when the sheet has no rows at all
    ///
    /// # Errors
    /// * `SheetsError::Unavailable` when the client cannot be built
    /// * Any transport or remote error from the read
    pub async fn fetch_all(&self) -> Result<Vec<Record>, SheetsError> {
        let client = self.client()?;
        let rows = client.read_range(&self.full_range()).await?;
        Ok(records_from_rows(&rows))
    }

    /// Read the header row as it currently stands.
    pub async fn headers(&self) -> Result<Vec<String>, SheetsError> {
        let client = self.client()?;
        let mut rows = client.read_range(&self.header_range()).await?;
        Ok(if rows.is_empty() {
            Vec::new()
        } else {
            rows.swap_remove(0)
        })
    }

    /// Fetch all records and return the one at `row_index`, if any.
    pub async fn find(&self, row_index: u32) -> Result<Option<Record>, SheetsError> {
        Ok(self
            .fetch_all()
            .await?
            .into_iter()
            .find(|r| r.row_index() == row_index))
    }

    /// Overwrite one cell, addressed by row and header name.
    ///
    /// # Arguments
    /// * `row_index` - 1-based physical row; must be a data row (2 or more)
    /// * `header` - Exact header string from row 1
    /// * `value` - New raw cell value
    ///
    /// # Errors
    /// * `SheetsError::UnknownField` when `header` is not in row 1
    /// * `SheetsError::InvalidRange` when `row_index` addresses the header row
    /// * `SheetsError::Unavailable` when the client cannot be built
    pub async fn update_field(
        &self,
        row_index: u32,
        header: &str,
        value: &str,
    ) -> Result<(), SheetsError> {
        if row_index < 2 {
            return Err(SheetsError::InvalidRange(format!(
                "row {row_index} is not a data row"
            )));
        }

        let headers = self.headers().await?;
        let column = headers
            .iter()
            .position(|h| h == header)
            .ok_or_else(|| SheetsError::UnknownField(header.to_string()))?;

        let range = cell_range(&self.settings.sheet_name, column, row_index);
        let client = self.client()?;
        client.write_cell(&range, value).await?;

        info!(
            "Updated {}{} ({header:?})",
            column_to_letter(column),
            row_index
        );
        Ok(())
    }

    /// Program of a record: the configured field, then common spellings.
    pub fn program_of<'a>(&self, record: &'a Record) -> Option<&'a str> {
        let mut candidates = vec![self.settings.program_field.as_str()];
        candidates.extend(
            PROGRAM_FALLBACKS
                .iter()
                .filter(|c| **c != self.settings.program_field),
        );
        record.first_non_blank(&candidates)
    }

    /// Distinct non-blank program values across all records, sorted.
    pub async fn programs(&self) -> Result<Vec<String>, SheetsError> {
        let records = self.fetch_all().await?;
        let programs: BTreeSet<String> = records
            .iter()
            .filter_map(|r| self.program_of(r))
            .map(str::to_string)
            .collect();
        Ok(programs.into_iter().collect())
    }
}

fn unavailable(e: SheetsError) -> SheetsError {
    match e {
        SheetsError::Unavailable(_) => e,
        other => SheetsError::Unavailable(other.to_string()),
    }
}
