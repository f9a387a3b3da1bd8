//! Session-scoped ledger of per-series statistic snapshots.
//!
//! Rows are addressed by position. Deleting a row shifts every later row down
//! by one, so anything holding a position must be rebuilt after a mutation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatSnapshot {
    pub mean: String,
    pub std: String,
    pub info: String,
}

impl StatSnapshot {
    pub fn is_empty(&self) -> bool {
        self.mean.is_empty() && self.std.is_empty() && self.info.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryRow(pub Vec<StatSnapshot>);

impl HistoryRow {
    pub fn cells(&self) -> &[StatSnapshot] {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("history row {position} does not exist (ledger has {len} rows)")]
    RowOutOfRange { position: usize, len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DenominatorPolicy {
    #[default]
    Independent,
    /// Stds divide by the count of numeric means; no means, no std average.
    MeanCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ColumnAggregate {
    pub mean: Option<f64>,
    pub std: Option<f64>,
}

impl ColumnAggregate {
    pub fn mean_text(&self) -> String {
        format_aggregate(self.mean)
    }

    pub fn std_text(&self) -> String {
        format_aggregate(self.std)
    }
}

#[derive(Debug, Default)]
pub struct HistoryLedger {
    rows: Vec<HistoryRow>,
}

impl HistoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, row: HistoryRow) -> usize {
        self.rows.push(row);
        self.rows.len() - 1
    }

    pub fn delete_row(&mut self, position: usize) -> Result<HistoryRow, HistoryError> {
        if position >= self.rows.len() {
            return Err(HistoryError::RowOutOfRange {
                position,
                len: self.rows.len(),
            });
        }
        Ok(self.rows.remove(position))
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    pub fn rows(&self) -> &[HistoryRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_count(&self) -> usize {
        self.rows.iter().map(|row| row.0.len()).max().unwrap_or(0)
    }

    pub fn aggregate(&self, policy: DenominatorPolicy) -> Vec<ColumnAggregate> {
        (0..self.column_count())
            .map(|column| self.aggregate_column(column, policy))
            .collect()
    }

    fn aggregate_column(&self, column: usize, policy: DenominatorPolicy) -> ColumnAggregate {
        let mut mean_sum = 0.0;
        let mut mean_count = 0usize;
        let mut std_sum = 0.0;
        let mut std_count = 0usize;

        for cell in self.rows.iter().filter_map(|row| row.0.get(column)) {
            if let Some(mean) = parse_stat(&cell.mean) {
                mean_sum += mean;
                mean_count += 1;
            }
            if let Some(std) = parse_stat(&cell.std) {
                std_sum += std;
                std_count += 1;
            }
        }

        let std_denominator = match policy {
            DenominatorPolicy::Independent => std_count,
            DenominatorPolicy::MeanCount => mean_count,
        };
        ColumnAggregate {
            mean: average(mean_sum, mean_count),
            std: average(std_sum, std_denominator),
        }
    }
}

fn parse_stat(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|value| value.is_finite())
}

fn average(sum: f64, count: usize) -> Option<f64> {
    (count > 0).then(|| sum / count as f64)
}

pub fn format_aggregate(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.4}")).unwrap_or_default()
}

pub fn provenance_lines(info: &str) -> String {
    info.replacen("/ROI origin:", "\n/ROI origin:", 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(mean: &str, std: &str) -> StatSnapshot {
        StatSnapshot {
            mean: mean.to_string(),
            std: std.to_string(),
            info: String::new(),
        }
    }

    fn row(cells: &[(&str, &str)]) -> HistoryRow {
        HistoryRow(cells.iter().map(|(m, s)| cell(m, s)).collect())
    }

    #[test]
    fn delete_only_row_empties_ledger() {
        let mut ledger = HistoryLedger::new();
        ledger.record(row(&[("1", "2")]));
        ledger.delete_row(0).expect("row exists");
        assert!(ledger.is_empty());
    }

    #[test]
    fn deleting_shifts_later_rows_down() {
        let mut ledger = HistoryLedger::new();
        for value in ["a", "b", "c", "d"] {
            ledger.record(row(&[(value, "")]));
        }
        let removed = ledger.delete_row(1).expect("row exists");
        assert_eq!(removed.cells()[0].mean, "b");
        let remaining: Vec<&str> = ledger
            .rows()
            .iter()
            .map(|row| row.cells()[0].mean.as_str())
            .collect();
        assert_eq!(remaining, vec!["a", "c", "d"]);
    }

    #[test]
    fn delete_out_of_range_is_an_error() {
        let mut ledger = HistoryLedger::new();
        ledger.record(row(&[("1", "1")]));
        assert_eq!(
            ledger.delete_row(3),
            Err(HistoryError::RowOutOfRange { position: 3, len: 1 })
        );
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn aggregate_skips_empty_means() {
        let mut ledger = HistoryLedger::new();
        ledger.record(row(&[("10", "1")]));
        ledger.record(row(&[("20", "3")]));
        ledger.record(row(&[("", "")]));
        let aggregate = ledger.aggregate(DenominatorPolicy::Independent);
        assert_eq!(aggregate[0].mean, Some(15.0));
        assert_eq!(aggregate[0].std, Some(2.0));
        assert_eq!(aggregate[0].mean_text(), "15.0000");
    }

    #[test]
    fn independent_denominators_count_each_field() {
        let mut ledger = HistoryLedger::new();
        ledger.record(row(&[("10", "")]));
        ledger.record(row(&[("", "4")]));
        ledger.record(row(&[("20", "8")]));

        let independent = ledger.aggregate(DenominatorPolicy::Independent);
        assert_eq!(independent[0].mean, Some(15.0));
        assert_eq!(independent[0].std, Some(6.0));

        let mean_count = ledger.aggregate(DenominatorPolicy::MeanCount);
        assert_eq!(mean_count[0].std, Some(6.0));

        let mut stds_only = HistoryLedger::new();
        stds_only.record(row(&[("", "4")]));
        let legacy = stds_only.aggregate(DenominatorPolicy::MeanCount);
        assert_eq!(legacy[0].mean, None);
        assert_eq!(legacy[0].std, None);
        assert_eq!(legacy[0].std_text(), "");
    }

    #[test]
    fn mean_count_policy_divides_std_by_mean_entries() {
        let mut ledger = HistoryLedger::new();
        ledger.record(row(&[("10", "3")]));
        ledger.record(row(&[("30", "")]));
        let aggregate = ledger.aggregate(DenominatorPolicy::MeanCount);
        assert_eq!(aggregate[0].mean, Some(20.0));
        assert_eq!(aggregate[0].std, Some(1.5));
    }

    #[test]
    fn columns_aggregate_independently() {
        let mut ledger = HistoryLedger::new();
        ledger.record(row(&[("1", "1"), ("", "")]));
        ledger.record(row(&[("3", "1"), ("7", "2")]));
        let aggregate = ledger.aggregate(DenominatorPolicy::Independent);
        assert_eq!(aggregate.len(), 2);
        assert_eq!(aggregate[0].mean, Some(2.0));
        assert_eq!(aggregate[1].mean, Some(7.0));
        assert_eq!(aggregate[1].std_text(), "2.0000");
    }

    #[test]
    fn non_numeric_entries_are_ignored() {
        let mut ledger = HistoryLedger::new();
        ledger.record(row(&[("n/a", "x")]));
        ledger.record(row(&[("4.5", "0.25")]));
        let aggregate = ledger.aggregate(DenominatorPolicy::Independent);
        assert_eq!(aggregate[0].mean, Some(4.5));
        assert_eq!(aggregate[0].std, Some(0.25));
    }

    #[test]
    fn rows_serialize_as_plain_arrays() {
        let json = serde_json::to_string(&row(&[("1", "2")])).expect("serializes");
        assert_eq!(json, r#"[{"mean":"1","std":"2","info":""}]"#);
    }

    #[test]
    fn provenance_breaks_before_roi_origin() {
        assert_eq!(
            provenance_lines("ct_a/img_001.dcm/ROI origin:(1,2)/ROI size:10x10"),
            "ct_a/img_001.dcm\n/ROI origin:(1,2)/ROI size:10x10"
        );
    }
}
