use ryoshu_core::ReconciledRecord;
use serde::Serialize;
use std::collections::BTreeMap;

/// Summary of how much a reconciliation pass collapsed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeStats {
    pub raw_count: usize,
    pub merged_count: usize,
    /// Percentage of raw drafts absorbed into another record (0–100).
    pub merge_ratio: f64,
    pub largest_group: usize,
    /// Multi-member groups per merge reason.
    pub reasons: BTreeMap<String, usize>,
}

impl MergeStats {
    pub fn from_records(records: &[ReconciledRecord]) -> Self {
        let merged_count = records.len();
        let raw_count: usize = records.iter().map(|r| r.group_size.max(1)).sum();
        let merge_ratio = if raw_count == 0 {
            0.0
        } else {
            (1.0 - merged_count as f64 / raw_count as f64) * 100.0
        };
        let largest_group = records.iter().map(|r| r.group_size).max().unwrap_or(0);

        let mut reasons = BTreeMap::new();
        for r in records.iter().filter(|r| r.group_size > 1) {
            *reasons.entry(r.merge_reason.clone()).or_insert(0) += 1;
        }

        MergeStats { raw_count, merged_count, merge_ratio, largest_group, reasons }
    }
}
