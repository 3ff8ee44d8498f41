//! Row Parser: one raw row in, one validated record (or a reason) out.

use std::collections::BTreeMap;

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::registry::DocumentKind;
use crate::types::{Cell, ErrorReason, FieldRecord, ParseDefinition, ParseErrorRecord};

/// Why a row produced neither a record nor an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Every mapped cell is blank.
    Blank,
    /// First non-blank row of a definition with `head = true`.
    Header,
    /// Required field missing on the baseline (first) row; not reported.
    IncompleteBaseline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    Accepted(FieldRecord),
    Skipped(SkipReason),
    Rejected(ParseErrorRecord),
}

/// Stateful per-run parser. The first non-blank row fixes the baseline line; missing required
/// fields are only reported on lines strictly after it.
pub struct RowParser<'a> {
    kind: &'a dyn DocumentKind,
    definition: &'a ParseDefinition,
    required: Vec<&'a str>,
    start_line: Option<usize>,
}

impl<'a> RowParser<'a> {
    pub fn new(kind: &'a dyn DocumentKind, definition: &'a ParseDefinition) -> Self {
        Self {
            kind,
            definition,
            required: kind.required_fields(),
            start_line: None,
        }
    }

    #[cfg(test)]
    fn start_line(&self) -> Option<usize> {
        self.start_line
    }

    pub fn parse_row(&mut self, row: &[Cell], line: usize) -> RowOutcome {
        let blank = self
            .definition
            .columns
            .values()
            .all(|&idx| row.get(idx).is_none_or(Cell::is_blank));
        if blank {
            return RowOutcome::Skipped(SkipReason::Blank);
        }

        if self.start_line.is_none() {
            self.start_line = Some(line);
            if self.definition.head {
                return RowOutcome::Skipped(SkipReason::Header);
            }
        }

        let raw_data: Vec<String> = row.iter().map(|c| c.raw_text().into_owned()).collect();
        let mut fields = BTreeMap::new();

        for (field, &idx) in &self.definition.columns {
            let Some(def) = self.kind.definition(field) else {
                return RowOutcome::Rejected(
                    ParseErrorRecord::new(line, raw_data, ErrorReason::UnknownField).with_field(field.as_str()),
                );
            };

            let raw = row.get(idx).map(Cell::normalized).unwrap_or_default();
            let cleaned = clean_value(&raw, def.transliterate);

            let rule = def.rule();
            if rule.pattern.is_some_and(|re| !re.is_match(&cleaned)) {
                continue;
            }

            let value = match rule.gsub {
                Some(gsub) if !cleaned.trim().is_empty() => gsub.apply(strip_symmetric_quotes(&cleaned)),
                _ => cleaned,
            };
            fields.insert(field.clone(), value);
        }

        for &name in &self.required {
            if fields.get(name).is_none_or(|v| v.trim().is_empty()) {
                if self.start_line.is_some_and(|start| start < line) {
                    return RowOutcome::Rejected(
                        ParseErrorRecord::new(line, raw_data, ErrorReason::NotAllRequiredFieldsSet).with_field(name),
                    );
                }
                return RowOutcome::Skipped(SkipReason::IncompleteBaseline);
            }
        }

        RowOutcome::Accepted(FieldRecord { raw_data, line, fields })
    }
}

/// Trim, optionally fold to base characters, drop control characters.
pub fn clean_value(raw: &str, transliterate: bool) -> String {
    let trimmed = raw.trim();
    let folded: String = if transliterate {
        trimmed.nfkd().filter(|c| !is_combining_mark(*c)).collect()
    } else {
        trimmed.to_string()
    };
    folded.chars().filter(|c| !c.is_control()).collect()
}

/// Removes the same number of leading and trailing `"` characters.
pub fn strip_symmetric_quotes(value: &str) -> &str {
    let lead = value.bytes().take_while(|&b| b == b'"').count();
    let trail = value.bytes().rev().take_while(|&b| b == b'"').count();
    let k = lead.min(trail).min(value.len() / 2);
    &value[k..value.len() - k]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ColumnDefinition, ColumnSet, Gsub, Validation};
    use crate::types::CsvFormat;
    use regex::Regex;

    fn kind() -> ColumnSet {
        ColumnSet::new(
            "price_list",
            vec![
                ColumnDefinition::new("sku")
                    .required()
                    .pattern(r"^[A-Z][0-9]+$")
                    .unwrap()
                    .gsub(Gsub::Remove(Regex::new("-").unwrap())),
                ColumnDefinition::new("price").required().validation(Validation::Float),
                ColumnDefinition::new("qty").validation(Validation::Integer),
                ColumnDefinition::new("name").transliterate(),
            ],
        )
    }

    fn definition(head: bool, pairs: &[(&str, usize)]) -> ParseDefinition {
        ParseDefinition::new(
            CsvFormat::Csv,
            pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            head,
        )
    }

    fn text(cells: &[&str]) -> Vec<Cell> {
        cells.iter().map(|c| Cell::from(*c)).collect()
    }

    fn accepted(outcome: RowOutcome) -> FieldRecord {
        match outcome {
            RowOutcome::Accepted(rec) => rec,
            other => panic!("expected accepted row, got {other:?}"),
        }
    }

    #[test]
    fn blank_rows_are_skipped_silently() {
        let kind = kind();
        let def = definition(false, &[("sku", 0), ("price", 1)]);
        let mut parser = RowParser::new(&kind, &def);
        assert_eq!(
            parser.parse_row(&text(&["  ", "", "ignored"]), 0),
            RowOutcome::Skipped(SkipReason::Blank)
        );
        assert_eq!(parser.parse_row(&[], 1), RowOutcome::Skipped(SkipReason::Blank));
        assert_eq!(parser.start_line(), None);
    }

    #[test]
    fn header_row_is_consumed_without_parsing() {
        let kind = kind();
        let def = definition(true, &[("sku", 0), ("price", 1)]);
        let mut parser = RowParser::new(&kind, &def);
        assert_eq!(parser.parse_row(&text(&["", ""]), 0), RowOutcome::Skipped(SkipReason::Blank));
        assert_eq!(
            parser.parse_row(&text(&["SKU", "Price"]), 1),
            RowOutcome::Skipped(SkipReason::Header)
        );
        assert_eq!(parser.start_line(), Some(1));
        let rec = accepted(parser.parse_row(&text(&["A1", "9.99"]), 2));
        assert_eq!(rec.line, 2);
        assert_eq!(rec.get("price"), Some("9.99"));
    }

    #[test]
    fn float_shortcut_normalizes_comma() {
        let kind = kind();
        let def = definition(false, &[("sku", 0), ("price", 1)]);
        let mut parser = RowParser::new(&kind, &def);
        let rec = accepted(parser.parse_row(&text(&["A1", "3,5"]), 0));
        assert_eq!(rec.get("price"), Some("3.5"));
    }

    #[test]
    fn whole_float_cells_become_integers_before_cleaning() {
        let kind = kind();
        let def = definition(false, &[("sku", 0), ("price", 1), ("qty", 2)]);
        let mut parser = RowParser::new(&kind, &def);
        let row = vec![Cell::from("A1"), Cell::Float(2.5), Cell::Float(7.0)];
        let rec = accepted(parser.parse_row(&row, 0));
        assert_eq!(rec.get("qty"), Some("7"));
        assert_eq!(rec.get("price"), Some("2.5"));
        assert_eq!(rec.raw_data, vec!["A1", "2.5", "7.0"]);
    }

    #[test]
    fn rejected_row_keeps_source_cell_text() {
        let kind = kind();
        let def = definition(false, &[("sku", 0), ("price", 1), ("qty", 2)]);
        let mut parser = RowParser::new(&kind, &def);
        accepted(parser.parse_row(&text(&["A1", "1", "1"]), 0));
        match parser.parse_row(&[Cell::from(""), Cell::Float(4.0), Cell::Float(7.0)], 1) {
            RowOutcome::Rejected(err) => assert_eq!(err.raw_row, vec!["", "4.0", "7.0"]),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn invalid_optional_value_is_left_unset() {
        let kind = kind();
        let def = definition(false, &[("sku", 0), ("price", 1), ("qty", 2)]);
        let mut parser = RowParser::new(&kind, &def);
        let rec = accepted(parser.parse_row(&text(&["A1", "1", "many"]), 0));
        assert_eq!(rec.get("qty"), None);
    }

    #[test]
    fn missing_required_field_is_reported_after_baseline_only() {
        let kind = kind();
        let def = definition(false, &[("sku", 0), ("price", 1)]);
        let mut parser = RowParser::new(&kind, &def);

        assert_eq!(
            parser.parse_row(&text(&["A1", "n/a"]), 0),
            RowOutcome::Skipped(SkipReason::IncompleteBaseline)
        );
        match parser.parse_row(&text(&["A2", ""]), 1) {
            RowOutcome::Rejected(err) => {
                assert_eq!(err.reason, ErrorReason::NotAllRequiredFieldsSet);
                assert_eq!(err.field.as_deref(), Some("price"));
                assert_eq!(err.line, 1);
                assert_eq!(err.raw_row, vec!["A2", ""]);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn unknown_field_rejects_row() {
        let kind = kind();
        let def = definition(false, &[("sku", 0), ("colour", 1)]);
        let mut parser = RowParser::new(&kind, &def);
        match parser.parse_row(&text(&["A1", "red"]), 0) {
            RowOutcome::Rejected(err) => {
                assert_eq!(err.reason, ErrorReason::UnknownField);
                assert_eq!(err.field.as_deref(), Some("colour"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn gsub_strips_symmetric_quotes_first() {
        let kind = ColumnSet::new(
            "codes",
            vec![ColumnDefinition::new("code")
                .required()
                .gsub(Gsub::Replace(Regex::new("-").unwrap(), "/".to_string()))],
        );
        let def = definition(false, &[("code", 0)]);
        let mut parser = RowParser::new(&kind, &def);
        let rec = accepted(parser.parse_row(&text(&["\"\"A-1\"\""]), 0));
        assert_eq!(rec.get("code"), Some("A/1"));
    }

    #[test]
    fn cleaning_trims_transliterates_and_drops_control_chars() {
        assert_eq!(clean_value("  Crème brûlée\u{7} ", true), "Creme brulee");
        assert_eq!(clean_value("Crème", false), "Crème");
        assert_eq!(clean_value("a\u{0}b", false), "ab");
    }

    #[test]
    fn symmetric_quote_stripping() {
        assert_eq!(strip_symmetric_quotes("\"abc\""), "abc");
        assert_eq!(strip_symmetric_quotes("\"\"abc\""), "\"abc");
        assert_eq!(strip_symmetric_quotes("abc\""), "abc\"");
        assert_eq!(strip_symmetric_quotes("\"\"\"\""), "");
        assert_eq!(strip_symmetric_quotes("\""), "\"");
    }

    #[test]
    fn accepted_records_always_carry_required_fields() {
        let kind = kind();
        let def = definition(false, &[("sku", 0), ("price", 1), ("name", 2)]);
        let mut parser = RowParser::new(&kind, &def);
        let inputs = [
            ["A1", "1", "x"],
            ["", "2", "y"],
            ["B2", "", "z"],
            ["C3", "abc", ""],
            ["D4", "0,5", ""],
            ["e5", "1", "w"],
        ];
        for (line, cells) in inputs.iter().enumerate() {
            if let RowOutcome::Accepted(rec) = parser.parse_row(&text(cells), line) {
                for name in kind.required_fields() {
                    assert!(!rec.get(name).unwrap_or("").trim().is_empty());
                }
            }
        }
    }
}
