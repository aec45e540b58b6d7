//! Remote spreadsheet access.
//!
//! [`SheetsClient`] is the seam between the adapter and whatever hosts the
//! sheet. Ranges are A1 strings such as `'Form Responses 1'!A:ZZ`.
//! [`MemorySheet`] keeps the grid in process and honours the same ranges.

use std::future::Future;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use crate::columns::A1Range;

/// Errors raised while talking to the spreadsheet.
#[derive(Debug, Error)]
pub enum SheetsError {
    /// The client could not be constructed (missing or bad credentials).
    #[error("Spreadsheet client unavailable: {0}")]
    Unavailable(String),

    /// A header name was not present in row 1.
    #[error("Column \"{0}\" not found")]
    UnknownField(String),

    /// The range string could not be understood.
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// The remote service answered with an error status.
    #[error("Spreadsheet service returned {status}: {message}")]
    Remote { status: u16, message: String },

    /// Network or decoding failure.
    #[error("Spreadsheet transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for SheetsError {
    fn from(e: reqwest::Error) -> Self {
        SheetsError::Transport(e.to_string())
    }
}

/// Read and write access to one spreadsheet document.
pub trait SheetsClient: Send + Sync + 'static {
    /// Read a rectangular range as rows of strings.
    ///
    /// Trailing empty cells of a row and trailing empty rows may be omitted,
    /// so callers must not assume rectangular output.
    fn read_range(
        &self,
        range: &str,
    ) -> impl Future<Output = Result<Vec<Vec<String>>, SheetsError>> + Send;

    /// Overwrite one cell with a raw (unparsed) value.
    fn write_cell(
        &self,
        range: &str,
        value: &str,
    ) -> impl Future<Output = Result<(), SheetsError>> + Send;
}

/// A spreadsheet held in memory.
///
/// Clones share the same grid, so a test can keep one handle for
/// inspection while the adapter owns another.
#[derive(Debug, Clone, Default)]
pub struct MemorySheet {
    grid: Arc<RwLock<Vec<Vec<String>>>>,
    offline: Arc<RwLock<bool>>,
}

impl MemorySheet {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        MemorySheet {
            grid: Arc::new(RwLock::new(rows)),
            offline: Arc::new(RwLock::new(false)),
        }
    }

    /// Convenience constructor from string slices.
    pub fn from_rows(rows: &[&[&str]]) -> Self {
        Self::new(
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }

    /// Copy of the current grid.
    pub fn snapshot(&self) -> Vec<Vec<String>> {
        self.grid.read().unwrap().clone()
    }

    /// Value at a zero-based position, empty when out of bounds.
    pub fn cell(&self, row: usize, col: usize) -> String {
        self.grid
            .read()
            .unwrap()
            .get(row)
            .and_then(|r| r.get(col))
            .cloned()
            .unwrap_or_default()
    }

    /// Make every subsequent call fail with a transport error.
    pub fn set_offline(&self, offline: bool) {
        *self.offline.write().unwrap() = offline;
    }

    fn check_online(&self) -> Result<(), SheetsError> {
        if *self.offline.read().unwrap() {
            return Err(SheetsError::Transport("sheet is offline".to_string()));
        }
        Ok(())
    }

    fn read(&self, range: &str) -> Result<Vec<Vec<String>>, SheetsError> {
        self.check_online()?;
        let bounds =
            A1Range::parse(range).ok_or_else(|| SheetsError::InvalidRange(range.to_string()))?;

        let grid = self.grid.read().unwrap();
        let mut rows: Vec<Vec<String>> = grid
            .iter()
            .enumerate()
            .filter(|(i, _)| bounds.contains_row(*i as u32 + 1))
            .map(|(_, row)| {
                let mut cells: Vec<String> = row
                    .iter()
                    .enumerate()
                    .filter(|(c, _)| bounds.contains_column(*c))
                    .map(|(_, v)| v.clone())
                    .collect();
                while cells.last().is_some_and(|v| v.is_empty()) {
                    cells.pop();
                }
                cells
            })
            .collect();

        while rows.last().is_some_and(|r| r.is_empty()) {
            rows.pop();
        }

        Ok(rows)
    }

    fn write(&self, range: &str, value: &str) -> Result<(), SheetsError> {
        self.check_online()?;
        let bounds =
            A1Range::parse(range).ok_or_else(|| SheetsError::InvalidRange(range.to_string()))?;
        let (Some(col), Some(row)) = (bounds.start_col, bounds.start_row) else {
            return Err(SheetsError::InvalidRange(range.to_string()));
        };
        if !bounds.is_single_cell() {
            return Err(SheetsError::InvalidRange(range.to_string()));
        }

        let mut grid = self.grid.write().unwrap();
        let row = row as usize - 1;
        if grid.len() <= row {
            grid.resize_with(row + 1, Vec::new);
        }
        let cells = &mut grid[row];
        if cells.len() <= col {
            cells.resize(col + 1, String::new());
        }
        cells[col] = value.to_string();

        Ok(())
    }
}

impl SheetsClient for MemorySheet {
    async fn read_range(&self, range: &str) -> Result<Vec<Vec<String>>, SheetsError> {
        self.read(range)
    }

    async fn write_cell(&self, range: &str, value: &str) -> Result<(), SheetsError> {
        self.write(range, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet() -> MemorySheet {
        MemorySheet::from_rows(&[&["Name", "Program", "Notes"], &["Ana", "CS", ""], &["Bo"]])
    }

    #[tokio::test]
    async fn reads_whole_width_and_trims() {
        let rows = sheet().read_range("'S'!A:ZZ").await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1], vec!["Ana".to_string(), "CS".to_string()]);
        assert_eq!(rows[2], vec!["Bo".to_string()]);
    }

    #[tokio::test]
    async fn reads_header_row_only() {
        let rows = sheet().read_range("'S'!1:1").await.unwrap();
        assert_eq!(rows, vec![vec!["Name", "Program", "Notes"]]);
    }

    #[tokio::test]
    async fn narrow_column_span() {
        let rows = sheet().read_range("'S'!A:A").await.unwrap();
        assert_eq!(rows.iter().map(|r| r.len()).collect::<Vec<_>>(), vec![1, 1, 1]);
    }

    #[tokio::test]
    async fn writes_single_cell_and_grows() {
        let sheet = sheet();
        sheet.write_cell("'S'!B3", "EE").await.unwrap();
        sheet.write_cell("'S'!D5", "x").await.unwrap();

        assert_eq!(sheet.cell(2, 1), "EE");
        assert_eq!(sheet.cell(4, 3), "x");
        assert_eq!(sheet.cell(1, 1), "CS");
    }

    #[tokio::test]
    async fn rejects_multi_cell_writes() {
        let err = sheet().write_cell("'S'!A1:B2", "x").await.unwrap_err();
        assert!(matches!(err, SheetsError::InvalidRange(_)));
    }

    #[tokio::test]
    async fn offline_sheet_fails() {
        let sheet = sheet();
        sheet.set_offline(true);
        assert!(matches!(
            sheet.read_range("'S'!A:Z").await,
            Err(SheetsError::Transport(_))
        ));
    }
}
