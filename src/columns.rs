//! Spreadsheet column notation and A1 range handling.
//!
//! Columns are addressed with zero-based indices inside the crate and with
//! letters (`A`, `B`, ..., `Z`, `AA`, ...) when talking to the sheet.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref A1_REGEX: Regex =
        Regex::new(r"^([A-Za-z]+)?([0-9]+)?(?::([A-Za-z]+)?([0-9]+)?)?$").unwrap();
}

/// Convert a zero-based column index to its letter form.
///
/// This is bijective base-26: every digit is `index % 26`, after which the
/// index becomes `index / 26 - 1`, stopping once it would go negative.
///
/// # Examples
/// ```
/// use rerc_portal::columns::column_to_letter;
///
/// assert_eq!(column_to_letter(0), "A");
/// assert_eq!(column_to_letter(25), "Z");
/// assert_eq!(column_to_letter(26), "AA");
/// assert_eq!(column_to_letter(701), "ZZ");
/// ```
pub fn column_to_letter(index: usize) -> String {
    let mut letters = Vec::new();
    let mut n = index as i64;

    while n >= 0 {
        letters.push((b'A' + (n % 26) as u8) as char);
        n = n / 26 - 1;
    }

    letters.iter().rev().collect()
}

/// Convert column letters back to a zero-based index.
///
/// Lowercase letters are accepted. Returns `None` for an empty string or any
/// non-alphabetic character.
pub fn letter_to_column(letters: &str) -> Option<usize> {
    if letters.is_empty() {
        return None;
    }

    let mut acc: usize = 0;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        let digit = (c.to_ascii_uppercase() as u8 - b'A') as usize + 1;
        acc = acc.checked_mul(26)?.checked_add(digit)?;
    }

    Some(acc - 1)
}

/// Quote a sheet (tab) name for use in an A1 range.
///
/// Single quotes inside the name are doubled.
pub fn quote_sheet_name(name: &str) -> String {
    format!("'{}'", name.replace('\'', "''"))
}

/// Build the A1 address of a single cell, e.g. `'Form Responses 1'!C5`.
pub fn cell_range(sheet: &str, column: usize, row: u32) -> String {
    format!(
        "{}!{}{}",
        quote_sheet_name(sheet),
        column_to_letter(column),
        row
    )
}

/// A parsed A1 range with every bound optional.
///
/// `A:ZZ` has columns but no rows, `1:1` has rows but no columns and `C5`
/// is a single cell. Columns are zero-based, rows one-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct A1Range {
    pub start_col: Option<usize>,
    pub start_row: Option<u32>,
    pub end_col: Option<usize>,
    pub end_row: Option<u32>,
}

impl A1Range {
    /// Parse a range, with or without a leading `Sheet!` prefix.
    pub fn parse(range: &str) -> Option<Self> {
        let body = match range.rfind('!') {
            Some(pos) => &range[pos + 1..],
            None => range,
        };

        let caps = A1_REGEX.captures(body.trim())?;
        let col = |i: usize| caps.get(i).and_then(|m| letter_to_column(m.as_str()));
        let row = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());

        let start_col = col(1);
        let start_row = row(2);
        if start_col.is_none() && start_row.is_none() {
            return None;
        }
        if start_row == Some(0) {
            return None;
        }

        let is_span = body.contains(':');
        let (end_col, end_row) = if is_span {
            (col(3), row(4))
        } else {
            (start_col, start_row)
        };
        if is_span && end_col.is_none() && end_row.is_none() {
            return None;
        }

        Some(A1Range {
            start_col,
            start_row,
            end_col,
            end_row,
        })
    }

    /// Whether the range addresses exactly one cell.
    pub fn is_single_cell(&self) -> bool {
        matches!(
            (self.start_col, self.start_row, self.end_col, self.end_row),
            (Some(a), Some(b), Some(c), Some(d)) if a == c && b == d
        )
    }

    /// Whether the zero-based column falls inside the range.
    pub fn contains_column(&self, col: usize) -> bool {
        self.start_col.is_none_or(|s| col >= s) && self.end_col.is_none_or(|e| col <= e)
    }

    /// Whether the one-based row falls inside the range.
    pub fn contains_row(&self, row: u32) -> bool {
        self.start_row.is_none_or(|s| row >= s) && self.end_row.is_none_or(|e| row <= e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_and_double_letters() {
        assert_eq!(column_to_letter(0), "A");
        assert_eq!(column_to_letter(1), "B");
        assert_eq!(column_to_letter(25), "Z");
        assert_eq!(column_to_letter(26), "AA");
        assert_eq!(column_to_letter(27), "AB");
        assert_eq!(column_to_letter(51), "AZ");
        assert_eq!(column_to_letter(52), "BA");
        assert_eq!(column_to_letter(701), "ZZ");
        assert_eq!(column_to_letter(702), "AAA");
    }

    #[test]
    fn letters_round_trip() {
        for index in 0..2000 {
            let letters = column_to_letter(index);
            assert_eq!(letter_to_column(&letters), Some(index), "{letters}");
        }
        assert_eq!(letter_to_column("zz"), Some(701));
    }

    #[test]
    fn rejects_bad_letters() {
        assert_eq!(letter_to_column(""), None);
        assert_eq!(letter_to_column("A1"), None);
        assert_eq!(letter_to_column("-"), None);
    }

    #[test]
    fn quotes_sheet_names() {
        assert_eq!(quote_sheet_name("Form Responses 1"), "'Form Responses 1'");
        assert_eq!(quote_sheet_name("Bob's"), "'Bob''s'");
        assert_eq!(cell_range("Sheet1", 2, 5), "'Sheet1'!C5");
    }

    #[test]
    fn parses_column_span() {
        let range = A1Range::parse("'Form Responses 1'!A:ZZ").unwrap();
        assert_eq!(range.start_col, Some(0));
        assert_eq!(range.end_col, Some(701));
        assert_eq!(range.start_row, None);
        assert!(range.contains_row(5000));
        assert!(!range.contains_column(702));
    }

    #[test]
    fn parses_row_span_and_cells() {
        let header = A1Range::parse("Sheet!1:1").unwrap();
        assert_eq!(header.start_row, Some(1));
        assert_eq!(header.end_row, Some(1));
        assert!(header.contains_column(300));
        assert!(!header.contains_row(2));

        let cell = A1Range::parse("Sheet!C5").unwrap();
        assert!(cell.is_single_cell());
        assert_eq!(cell.start_col, Some(2));
        assert_eq!(cell.start_row, Some(5));

        let block = A1Range::parse("B2:D9").unwrap();
        assert!(!block.is_single_cell());
        assert!(block.contains_column(3));
        assert!(!block.contains_row(10));
    }

    #[test]
    fn rejects_malformed_ranges() {
        assert!(A1Range::parse("Sheet!").is_none());
        assert!(A1Range::parse("Sheet!A0").is_none());
        assert!(A1Range::parse("Sheet!5A").is_none());
        assert!(A1Range::parse("A1:").is_none());
    }
}
