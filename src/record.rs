use log::warn;
use serde::ser::{Serialize, SerializeMap, Serializer};

/// Synthetic key carrying the 1-based physical sheet row.
pub const ROW_INDEX_KEY: &str = "rowIndex";

/// Synthetic key carrying the position of the row among data rows.
pub const ROW_NUMBER_KEY: &str = "rowNumber";

/// One application, materialised from one sheet row.
///
/// Keys are the header strings of row 1 exactly as they appear in the sheet,
/// including any trailing whitespace or punctuation. Values are always
/// strings; a cell missing from the remote response is the empty string.
///
/// Two synthetic attributes are carried next to the header fields and are
/// serialised as `rowIndex` and `rowNumber`. A header with one of those
/// names is dropped so the synthetic keys are never shadowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    row_index: u32,
    fields: Vec<(String, String)>,
}

impl Record {
    /// Build a record from the header row and one data row.
    ///
    /// # Arguments
    /// * `headers` - Header strings from row 1
    /// * `row` - Cell values of the data row; may be shorter than `headers`
    /// * `row_index` - 1-based physical row of `row` in the sheet
    pub fn from_row(headers: &[String], row: &[String], row_index: u32) -> Self {
        let mut fields: Vec<(String, String)> = Vec::with_capacity(headers.len());

        for (col, header) in headers.iter().enumerate() {
            if is_reserved(header) {
                warn!("Header {header:?} collides with a synthetic key; column {col} ignored");
                continue;
            }
            // Repeated header names resolve to the first column, same as updates.
            if fields.iter().any(|(h, _)| h == header) {
                continue;
            }
            let value = row.get(col).cloned().unwrap_or_default();
            fields.push((header.clone(), value));
        }

        Record { row_index, fields }
    }

    /// 1-based physical row in the sheet; the external identifier.
    pub fn row_index(&self) -> u32 {
        self.row_index
    }

    /// Position among data rows (`row_index - 1`, so the first data row is 1).
    pub fn row_number(&self) -> u32 {
        self.row_index.saturating_sub(1)
    }

    /// Value of a header field, `None` when the header does not exist.
    pub fn get(&self, header: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(h, _)| h == header)
            .map(|(_, v)| v.as_str())
    }

    /// Header names in sheet order.
    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(h, _)| h.as_str())
    }

    /// Header/value pairs in sheet order.
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// First non-blank value among `candidates`, trimmed.
    pub fn first_non_blank(&self, candidates: &[&str]) -> Option<&str> {
        candidates
            .iter()
            .filter_map(|c| self.get(c))
            .map(str::trim)
            .find(|v| !v.is_empty())
    }
}

fn is_reserved(header: &str) -> bool {
    header == ROW_INDEX_KEY || header == ROW_NUMBER_KEY
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 2))?;
        map.serialize_entry(ROW_INDEX_KEY, &self.row_index)?;
        map.serialize_entry(ROW_NUMBER_KEY, &self.row_number())?;
        for (header, value) in &self.fields {
            map.serialize_entry(header, value)?;
        }
        map.end()
    }
}

/// Convert a raw range (header row first) into records.
///
/// An empty range yields no records. Data row `i` (counting the header as 0)
/// gets `row_index = i + 1`.
pub fn records_from_rows(rows: &[Vec<String>]) -> Vec<Record> {
    let Some((headers, data)) = rows.split_first() else {
        return Vec::new();
    };

    data.iter()
        .enumerate()
        .map(|(i, row)| Record::from_row(headers, row, (i + 2) as u32))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn single_row_scenario() {
        let rows = vec![strings(&["Name", "Program"]), strings(&["Ana", "CS"])];
        let records = records_from_rows(&rows);

        assert_eq!(records.len(), 1);
        let json = serde_json::to_value(&records[0]).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"rowIndex": 2, "rowNumber": 1, "Name": "Ana", "Program": "CS"})
        );
    }

    #[test]
    fn empty_range_gives_no_records() {
        assert!(records_from_rows(&[]).is_empty());
        assert!(records_from_rows(&[strings(&["Name"])]).is_empty());
    }

    #[test]
    fn short_rows_are_padded() {
        let rows = vec![
            strings(&["A", "B", "C"]),
            strings(&["1"]),
            vec![],
            strings(&["x", "y", "z"]),
        ];
        let records = records_from_rows(&rows);

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].get("B"), Some(""));
        assert_eq!(records[1].get("A"), Some(""));
        assert_eq!(records[2].row_index(), 4);
        assert_eq!(records[2].get("C"), Some("z"));
        for record in &records {
            assert_eq!(record.headers().count(), 3);
        }
    }

    #[test]
    fn headers_are_opaque() {
        let rows = vec![
            strings(&["Title ", "Email (required)"]),
            strings(&["t", "e"]),
        ];
        let record = &records_from_rows(&rows)[0];

        assert_eq!(record.get("Title "), Some("t"));
        assert_eq!(record.get("Title"), None);
        assert_eq!(record.get("Email (required)"), Some("e"));
    }

    #[test]
    fn reserved_headers_are_dropped() {
        let rows = vec![strings(&["rowIndex", "Name"]), strings(&["99", "Ana"])];
        let record = &records_from_rows(&rows)[0];

        assert_eq!(record.get("rowIndex"), None);
        let json = serde_json::to_value(record).unwrap();
        assert_eq!(json["rowIndex"], 2);
        assert_eq!(json.as_object().unwrap().len(), 3);
    }

    #[test]
    fn duplicate_headers_keep_first_column() {
        let rows = vec![strings(&["X", "X", "Y"]), strings(&["first", "second", "y"])];
        let record = &records_from_rows(&rows)[0];

        assert_eq!(record.get("X"), Some("first"));
        assert_eq!(record.headers().collect::<Vec<_>>(), vec!["X", "Y"]);
    }

    #[test]
    fn first_non_blank_trims() {
        let rows = vec![strings(&["Program", "PROGRAM"]), strings(&["  ", " EE "])];
        let record = &records_from_rows(&rows)[0];

        assert_eq!(record.first_non_blank(&["Program", "PROGRAM"]), Some("EE"));
        assert_eq!(record.first_non_blank(&["program"]), None);
    }
}
