//! Summaries computed from ledger rows, and their text and JSON rendering.

use std::collections::BTreeMap;

use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Table};
use serde::Serialize;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumString};

use crate::monitor::Family;
use crate::record::{CheckRecord, CheckType};

/// Output format for the summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub ok: usize,
    pub total: usize,
}

impl Tally {
    fn add(&mut self, other: Tally) {
        self.ok += other.ok;
        self.total += other.total;
    }
}

/// `ok/total` per check type.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub by_type: BTreeMap<CheckType, Tally>,
}

impl Summary {
    pub fn from_records(records: &[CheckRecord]) -> Self {
        let mut by_type: BTreeMap<CheckType, Tally> = BTreeMap::new();
        for record in records {
            let tally = by_type.entry(record.check_type).or_default();
            tally.total += 1;
            if record.is_ok() {
                tally.ok += 1;
            }
        }
        Summary { by_type }
    }

    pub fn get(&self, check_type: CheckType) -> Tally {
        self.by_type.get(&check_type).copied().unwrap_or_default()
    }

    /// Combined tally of every row type of `family`.
    pub fn family(&self, family: Family) -> Tally {
        let mut tally = Tally::default();
        for check_type in family.check_types() {
            tally.add(self.get(*check_type));
        }
        tally
    }

    pub fn ok(&self) -> usize {
        self.by_type.values().map(|t| t.ok).sum()
    }

    pub fn total(&self) -> usize {
        self.by_type.values().map(|t| t.total).sum()
    }
}

/// One line per check type with at least one row, grouped by family.
pub fn summary_table(summary: &Summary) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Family", "Check", "OK", "Total"]);

    for family in Family::iter() {
        for check_type in family.check_types() {
            let tally = summary.get(*check_type);
            if tally.total == 0 {
                continue;
            }
            let color = if tally.ok == tally.total {
                Color::Green
            } else if tally.ok == 0 {
                Color::Red
            } else {
                Color::Yellow
            };
            table.add_row(vec![
                Cell::new(family.to_string().to_uppercase()),
                Cell::new(check_type),
                Cell::new(tally.ok).fg(color),
                Cell::new(tally.total),
            ]);
        }
    }
    table
}

/// One-line family rollup, e.g. `PDF: 16/16 OK`.
pub fn family_lines(summary: &Summary) -> Vec<String> {
    Family::iter()
        .map(|family| {
            let tally = summary.family(family);
            format!(
                "{:<5} {}/{} OK",
                format!("{}:", family.to_string().to_uppercase()),
                tally.ok,
                tally.total
            )
        })
        .collect()
}

#[derive(Serialize)]
struct JsonSummary<'a> {
    summary: &'a BTreeMap<CheckType, Tally>,
    families: BTreeMap<Family, Tally>,
    ok: usize,
    total: usize,
}

pub fn summary_json(summary: &Summary) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&JsonSummary {
        summary: &summary.by_type,
        families: Family::iter().map(|f| (f, summary.family(f))).collect(),
        ok: summary.ok(),
        total: summary.total(),
    })
}
