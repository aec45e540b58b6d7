#![cfg(not(tarpaulin_include))]

use rerc_portal::adapter::SpreadsheetAdapter;
use rerc_portal::columns::{column_to_letter, letter_to_column};
use rerc_portal::config::SheetSettings;
use rerc_portal::sheets::{MemorySheet, SheetsError};

#[tokio::main]
async fn main() -> Result<(), SheetsError> {
    println!("=== Spreadsheet Adapter Test Suite ===\n");

    println!("Test 1: Column letters");
    for (col, letter) in [(0, "A"), (25, "Z"), (26, "AA"), (701, "ZZ"), (702, "AAA")] {
        assert_eq!(column_to_letter(col), letter);
        assert_eq!(letter_to_column(letter), Some(col));
    }
    println!("0 -> A, 25 -> Z, 26 -> AA, 701 -> ZZ, 702 -> AAA - PASS\n");

    let sheet = MemorySheet::from_rows(&[
        &["Name", "Program", "APPROVED RESEARCH TITLE"],
        &["Ana", "CS", "Sleep study"],
        &["Bo", "EE"],
    ]);
    let adapter = SpreadsheetAdapter::with_client(SheetSettings::default(), sheet.clone());

    println!("Test 2: Fetch all records");
    let records = adapter.fetch_all().await?;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].row_index(), 2);
    assert_eq!(records[0].row_number(), 1);
    assert_eq!(records[1].get("APPROVED RESEARCH TITLE"), Some(""));
    println!("{} records, first at row {} - PASS\n", records.len(), records[0].row_index());

    println!("Test 3: Update one field");
    adapter.update_field(2, "Program", "EE").await?;
    let record = adapter.find(2).await?.expect("row 2 exists");
    assert_eq!(record.get("Program"), Some("EE"));
    assert_eq!(sheet.cell(1, 1), "EE");
    println!("Row 2 Program is now {} - PASS\n", sheet.cell(1, 1));

    println!("Test 4: Unknown header");
    match adapter.update_field(2, "Status", "Approved").await {
        Err(SheetsError::UnknownField(field)) => println!("Rejected {field:?} - PASS\n"),
        other => panic!("expected UnknownField, got {other:?}"),
    }

    println!("Test 5: Header row is not writable");
    assert!(adapter.update_field(1, "Program", "x").await.is_err());
    assert_eq!(sheet.cell(0, 1), "Program");
    println!("Row 1 unchanged - PASS\n");

    println!("Test 6: Distinct programs");
    let programs = adapter.programs().await?;
    assert_eq!(programs, vec!["EE".to_string()]);
    println!("Programs: {programs:?} - PASS\n");

    println!("All tests completed.");
    Ok(())
}
