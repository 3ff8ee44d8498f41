use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use document_reader::types::{ErrorReason, FieldRecord, ParseStatus};
use document_reader::{Document, DocumentReader, ReaderOptions, Registry, SourceRef};

fn tmp_file(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("document-reader-{name}-{nanos}.csv"))
}

/// Header on line 0, then `rows` data lines; lines listed in `bad` have no price.
fn write_price_list(path: &PathBuf, rows: usize, bad: &[usize]) {
    let mut text = String::from("sku,price\n");
    for line in 1..=rows {
        if bad.contains(&line) {
            text.push_str(&format!("B{line},\n"));
        } else {
            text.push_str(&format!("B{line},1\n"));
        }
    }
    std::fs::write(path, text).unwrap();
}

fn run(name: &str, bad: &[usize]) -> (Document, usize) {
    let registry = Registry::from_json_path("tests/fixtures/kinds.json").unwrap();
    let reader = DocumentReader::new(registry, ReaderOptions::default()).unwrap();

    let path = tmp_file(name);
    write_price_list(&path, 150, bad);
    let mut doc = Document::new(name, "price_list", SourceRef::from_path(&path).unwrap());

    reader.analyze(&mut doc).unwrap();
    assert!(doc.parse_definition.as_ref().unwrap().head);
    reader.schedule_parse(&mut doc, &()).unwrap();

    let mut last_line = 0;
    let summary = reader
        .parse(&mut doc, &mut |_: FieldRecord, line: usize| last_line = line)
        .unwrap();

    let _ = std::fs::remove_file(path);
    assert_eq!(summary.accepted + summary.rejected + 1, summary.lines_read);
    (doc, last_line)
}

#[test]
fn twenty_one_errors_in_first_hundred_lines_abort() {
    let mut bad: Vec<usize> = (5..=100).step_by(5).collect();
    bad.push(3);
    let (doc, last_line) = run("abort-21", &bad);

    assert_eq!(doc.status(), ParseStatus::Error);
    assert_eq!(doc.document_error, Some(ErrorReason::MaxErrorsReached));
    assert_eq!(doc.parse_errors.len(), 21);
    assert_eq!(doc.parse_errors.last().unwrap().line, 100);
    assert!(
        doc.parse_errors
            .iter()
            .all(|e| e.reason == ErrorReason::NotAllRequiredFieldsSet)
    );
    // Nothing past the aborting line reaches the sink.
    assert_eq!(last_line, 99);
    assert!(doc.parse_finished_at.is_some());
}

#[test]
fn early_errors_abort_at_grace_line_even_when_rows_turn_clean() {
    let bad: Vec<usize> = (1..=21).collect();
    let (doc, last_line) = run("abort-early", &bad);

    assert_eq!(doc.status(), ParseStatus::Error);
    assert_eq!(doc.document_error, Some(ErrorReason::MaxErrorsReached));
    assert_eq!(doc.parse_errors.len(), 21);
    assert_eq!(doc.parse_errors.last().unwrap().line, 21);
    // Line 100 is accepted, then the ratio check stops the run.
    assert_eq!(last_line, 100);
}

#[test]
fn nineteen_errors_in_first_hundred_lines_do_not_abort() {
    let bad: Vec<usize> = (5..=95).step_by(5).collect();
    let (doc, last_line) = run("abort-19", &bad);

    assert_eq!(doc.status(), ParseStatus::Parsed);
    assert!(doc.document_error.is_none());
    assert_eq!(doc.parse_errors.len(), 19);
    assert_eq!(last_line, 150);
}

#[test]
fn error_count_ceiling_applies_before_grace_lines() {
    let registry = Registry::from_json_path("tests/fixtures/kinds.json").unwrap();
    let opts = ReaderOptions::from_json_str(r#"{"abort": {"max_errors": 3}}"#).unwrap();
    let reader = DocumentReader::new(registry, opts).unwrap();

    let path = tmp_file("ceiling");
    write_price_list(&path, 20, &[2, 4, 6, 8, 10]);
    let mut doc = Document::new("ceiling", "price_list", SourceRef::from_path(&path).unwrap());
    reader.analyze(&mut doc).unwrap();
    reader.schedule_parse(&mut doc, &()).unwrap();
    let summary = reader
        .parse(&mut doc, &mut |_: FieldRecord, _: usize| {})
        .unwrap();

    assert!(summary.aborted);
    assert_eq!(doc.parse_errors.len(), 4);
    assert_eq!(doc.parse_errors.last().unwrap().line, 8);
    assert_eq!(doc.status(), ParseStatus::Error);

    let _ = std::fs::remove_file(path);
}
