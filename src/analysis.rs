//! Column-layout inference from a small sample of rows.
//!
//! Each sampled row yields two row-scoped maps:
//!
//! - `head`: field -> column whose text matches the field's header pattern
//! - `cols`: required field -> column whose text passes the field's validator
//!
//! A `head` map covering every required field wins immediately (`head = true`). Otherwise two
//! consecutive rows whose `cols` maps are sufficient and agree on every required field are taken
//! as a stable data layout (`head = false`). Anything else needs a manual mapping.

use std::collections::BTreeMap;

use crate::registry::DocumentKind;
use crate::types::{ParseDefinition, ParseStatus, is_sufficient};

/// Terminal result of an analysis run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisOutcome {
    Analyzed(ParseDefinition),
    NeedsManualAnalyze,
    Unparseable,
}

impl AnalysisOutcome {
    pub fn status(&self) -> ParseStatus {
        match self {
            AnalysisOutcome::Analyzed(_) => ParseStatus::Analyzed,
            AnalysisOutcome::NeedsManualAnalyze => ParseStatus::NeedsManualAnalyze,
            AnalysisOutcome::Unparseable => ParseStatus::Unparseable,
        }
    }

    pub fn definition(&self) -> Option<&ParseDefinition> {
        match self {
            AnalysisOutcome::Analyzed(def) => Some(def),
            _ => None,
        }
    }
}

/// Inferred mapping before the format is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inference {
    pub columns: BTreeMap<String, usize>,
    pub head: bool,
}

pub struct Analyzer<'a> {
    kind: &'a dyn DocumentKind,
    sample_rows: usize,
}

impl<'a> Analyzer<'a> {
    pub fn new(kind: &'a dyn DocumentKind, sample_rows: usize) -> Self {
        Self { kind, sample_rows }
    }

    /// Infers a mapping from the first `sample_rows` of `rows`. Pure; the same rows always give
    /// the same answer.
    pub fn infer(&self, rows: &[Vec<String>]) -> Option<Inference> {
        let required = self.kind.required_fields();
        let mut prev_cols: Option<BTreeMap<String, usize>> = None;

        for (i, row) in rows.iter().take(self.sample_rows).enumerate() {
            let (head, cols) = self.scan_row(row, &required);

            if is_sufficient(&head, &required) {
                tracing::debug!(row = i, ?head, "header row found");
                return Some(Inference {
                    columns: head,
                    head: true,
                });
            }

            if let Some(prev) = &prev_cols {
                let identical = required.iter().all(|f| prev.get(*f) == cols.get(*f));
                if identical && is_sufficient(&cols, &required) {
                    tracing::debug!(row = i, ?cols, "two consecutive rows share a layout");
                    return Some(Inference {
                        columns: cols,
                        head: false,
                    });
                }
            }
            prev_cols = Some(cols);
        }
        None
    }

    fn scan_row(&self, row: &[String], required: &[&str]) -> (BTreeMap<String, usize>, BTreeMap<String, usize>) {
        let mut head = BTreeMap::new();
        let mut cols = BTreeMap::new();

        for (col, cell) in row.iter().enumerate() {
            let cell = cell.trim();
            if cell.is_empty() {
                continue;
            }
            for def in self.kind.column_definitions() {
                let is_required = required.contains(&def.name.as_str());

                if !head.contains_key(&def.name)
                    && def.matches_head(cell)
                    && !(is_required && claimed(&head, col, required))
                {
                    head.insert(def.name.clone(), col);
                }

                if is_required
                    && !cols.contains_key(&def.name)
                    && def.matches_value(cell)
                    && !claimed(&cols, col, required)
                {
                    cols.insert(def.name.clone(), col);
                }
            }
        }
        (head, cols)
    }
}

/// Column already taken by a required field.
fn claimed(map: &BTreeMap<String, usize>, col: usize, required: &[&str]) -> bool {
    required.iter().any(|r| map.get(*r) == Some(&col))
}
