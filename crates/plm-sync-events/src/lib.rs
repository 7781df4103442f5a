//! Change history log: summary and detail sections (spec.md §4.10).
//!
//! The detail section is an append-only JSONL stream of [`HistoryEvent`]s,
//! one line per event, in the style of a publish event log. The summary
//! section is a one-row-per-rack snapshot, keyed by rack number, updated in
//! place as racks change state. Integrity tooling ([`reconcile_summary`])
//! checks the two sections agree on rack membership and can repair drift.
//!
//! # Example
//!
//! ```
//! use plm_sync_events::{ChangeHistoryLog, SummaryRow};
//! use plm_sync_types::{EventKind, HistoryEvent, SyncStatus};
//! use chrono::Utc;
//!
//! let mut log = ChangeHistoryLog::new();
//! log.record(HistoryEvent {
//!     timestamp: Utc::now(),
//!     rack_number: "R1".to_string(),
//!     event: EventKind::RackCreated,
//!     actor: None,
//!     summary: "Rack R1 created".to_string(),
//!     details: None,
//!     link: None,
//! });
//! log.upsert_summary(SummaryRow {
//!     number: "R1".to_string(),
//!     name: "Rack One".to_string(),
//!     status: SyncStatus::Synced,
//!     opaque_id: Some("id-1".to_string()),
//!     created_at: Utc::now(),
//!     last_refresh: None,
//!     last_sync: Some(Utc::now()),
//!     last_push: Some(Utc::now()),
//!     checksum: Some("R1:1:A".to_string()),
//! });
//! assert_eq!(log.detail().len(), 1);
//! assert_eq!(log.summary().len(), 1);
//! ```

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use plm_sync_types::{HistoryEvent, PlmError, Result, SyncStatus};
use serde::{Deserialize, Serialize};

/// Default detail-section file name.
pub const DETAIL_FILE: &str = "history-detail.jsonl";
/// Default summary-section file name.
pub const SUMMARY_FILE: &str = "history-summary.json";

pub fn detail_path(state_dir: &Path) -> PathBuf {
    state_dir.join(DETAIL_FILE)
}

pub fn summary_path(state_dir: &Path) -> PathBuf {
    state_dir.join(SUMMARY_FILE)
}

/// One row of the summary section (spec.md §4.10).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub number: String,
    pub name: String,
    pub status: SyncStatus,
    #[serde(default)]
    pub opaque_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_refresh: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_push: Option<DateTime<Utc>>,
    #[serde(default)]
    pub checksum: Option<String>,
}

/// The change history log: summary rows keyed by rack number, plus an
/// append-only detail event list.
#[derive(Debug, Default)]
pub struct ChangeHistoryLog {
    detail: Vec<HistoryEvent>,
    summary: BTreeMap<String, SummaryRow>,
}

impl ChangeHistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a detail event. Never mutates the summary section.
    pub fn record(&mut self, event: HistoryEvent) {
        self.detail.push(event);
    }

    /// Insert or replace a rack's summary row.
    pub fn upsert_summary(&mut self, row: SummaryRow) {
        self.summary.insert(row.number.clone(), row);
    }

    /// Remove a rack's summary row (used by reconciliation repair).
    pub fn remove_summary(&mut self, number: &str) {
        self.summary.remove(number);
    }

    pub fn detail(&self) -> &[HistoryEvent] {
        &self.detail
    }

    pub fn summary(&self) -> &BTreeMap<String, SummaryRow> {
        &self.summary
    }

    pub fn events_for_rack(&self, rack_number: &str) -> Vec<&HistoryEvent> {
        self.detail.iter().filter(|e| e.rack_number == rack_number).collect()
    }

    /// Append unwritten detail events to `path` in JSONL format.
    pub fn write_detail(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| PlmError::Configuration(e.to_string()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| PlmError::Configuration(e.to_string()))?;
        let mut writer = std::io::BufWriter::new(file);
        for event in &self.detail {
            let line =
                serde_json::to_string(event).map_err(|e| PlmError::Configuration(e.to_string()))?;
            writeln!(writer, "{line}").map_err(|e| PlmError::Configuration(e.to_string()))?;
        }
        writer.flush().map_err(|e| PlmError::Configuration(e.to_string()))?;
        Ok(())
    }

    /// Load detail events from a JSONL file, replacing any in-memory events.
    pub fn read_detail(path: &Path) -> Result<Vec<HistoryEvent>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(path).map_err(|e| PlmError::Configuration(e.to_string()))?;
        let reader = BufReader::new(file);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|e| PlmError::Configuration(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            let event: HistoryEvent =
                serde_json::from_str(&line).map_err(|e| PlmError::Configuration(e.to_string()))?;
            events.push(event);
        }
        Ok(events)
    }

    /// Overwrite the summary-section file wholesale (it's a snapshot, not a log).
    pub fn write_summary(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| PlmError::Configuration(e.to_string()))?;
        }
        let rows: Vec<&SummaryRow> = self.summary.values().collect();
        let json =
            serde_json::to_string_pretty(&rows).map_err(|e| PlmError::Configuration(e.to_string()))?;
        fs::write(path, json).map_err(|e| PlmError::Configuration(e.to_string()))?;
        Ok(())
    }

    pub fn read_summary(path: &Path) -> Result<BTreeMap<String, SummaryRow>> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(path).map_err(|e| PlmError::Configuration(e.to_string()))?;
        let rows: Vec<SummaryRow> =
            serde_json::from_str(&content).map_err(|e| PlmError::Configuration(e.to_string()))?;
        Ok(rows.into_iter().map(|r| (r.number.clone(), r)).collect())
    }

    /// Load both sections from `state_dir`.
    pub fn load(state_dir: &Path) -> Result<Self> {
        let detail = Self::read_detail(&detail_path(state_dir))?;
        let summary = Self::read_summary(&summary_path(state_dir))?;
        Ok(Self { detail, summary })
    }

    /// Persist both sections to `state_dir`.
    pub fn save(&self, state_dir: &Path) -> Result<()> {
        self.write_detail(&detail_path(state_dir))?;
        self.write_summary(&summary_path(state_dir))?;
        Ok(())
    }
}

/// Result of comparing summary-section membership against the set of rack
/// configuration sheets actually present (spec.md §4.10 "integrity tools").
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    /// Racks with a configuration sheet but no summary row.
    pub missing_summary: Vec<String>,
    /// Summary rows with no corresponding configuration sheet.
    pub orphan_summary: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.missing_summary.is_empty() && self.orphan_summary.is_empty()
    }
}

/// Compare the set of known rack sheet numbers against the summary section,
/// without modifying either side.
pub fn reconcile_summary(log: &ChangeHistoryLog, rack_numbers: &[String]) -> ReconcileReport {
    let known: std::collections::BTreeSet<&str> = rack_numbers.iter().map(String::as_str).collect();
    let summarized: std::collections::BTreeSet<&str> =
        log.summary.keys().map(String::as_str).collect();

    ReconcileReport {
        missing_summary: known.difference(&summarized).map(|s| s.to_string()).collect(),
        orphan_summary: summarized.difference(&known).map(|s| s.to_string()).collect(),
    }
}

/// Repair mode: add placeholder rows for racks missing from the summary, and
/// drop orphan rows whose configuration sheet no longer exists.
pub fn repair_summary(log: &mut ChangeHistoryLog, rack_numbers: &[String], now: DateTime<Utc>) {
    let report = reconcile_summary(log, rack_numbers);
    for number in report.missing_summary {
        log.upsert_summary(SummaryRow {
            number: number.clone(),
            name: number,
            status: SyncStatus::Placeholder,
            opaque_id: None,
            created_at: now,
            last_refresh: None,
            last_sync: None,
            last_push: None,
            checksum: None,
        });
    }
    for number in report.orphan_summary {
        log.remove_summary(&number);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plm_sync_types::EventKind;
    use tempfile::tempdir;

    fn sample_event(rack: &str) -> HistoryEvent {
        HistoryEvent {
            timestamp: Utc::now(),
            rack_number: rack.to_string(),
            event: EventKind::RackCreated,
            actor: Some("user@example.com".to_string()),
            summary: format!("Rack {rack} created"),
            details: None,
            link: None,
        }
    }

    fn sample_row(number: &str, status: SyncStatus) -> SummaryRow {
        SummaryRow {
            number: number.to_string(),
            name: format!("Rack {number}"),
            status,
            opaque_id: None,
            created_at: Utc::now(),
            last_refresh: None,
            last_sync: None,
            last_push: None,
            checksum: None,
        }
    }

    #[test]
    fn record_appends_to_detail_only() {
        let mut log = ChangeHistoryLog::new();
        log.record(sample_event("R1"));
        assert_eq!(log.detail().len(), 1);
        assert!(log.summary().is_empty());
    }

    #[test]
    fn upsert_summary_replaces_existing_row() {
        let mut log = ChangeHistoryLog::new();
        log.upsert_summary(sample_row("R1", SyncStatus::Placeholder));
        log.upsert_summary(sample_row("R1", SyncStatus::Synced));
        assert_eq!(log.summary().len(), 1);
        assert_eq!(log.summary()["R1"].status, SyncStatus::Synced);
    }

    #[test]
    fn events_for_rack_filters_correctly() {
        let mut log = ChangeHistoryLog::new();
        log.record(sample_event("R1"));
        log.record(sample_event("R2"));
        log.record(sample_event("R1"));
        assert_eq!(log.events_for_rack("R1").len(), 2);
    }

    #[test]
    fn save_then_load_round_trips_both_sections() {
        let dir = tempdir().expect("tempdir");
        let mut log = ChangeHistoryLog::new();
        log.record(sample_event("R1"));
        log.upsert_summary(sample_row("R1", SyncStatus::Synced));
        log.save(dir.path()).expect("save");

        let loaded = ChangeHistoryLog::load(dir.path()).expect("load");
        assert_eq!(loaded.detail().len(), 1);
        assert_eq!(loaded.summary().len(), 1);
    }

    #[test]
    fn write_detail_appends_across_calls() {
        let dir = tempdir().expect("tempdir");
        let path = detail_path(dir.path());

        let mut log1 = ChangeHistoryLog::new();
        log1.record(sample_event("R1"));
        log1.write_detail(&path).expect("write1");

        let mut log2 = ChangeHistoryLog::new();
        log2.record(sample_event("R2"));
        log2.write_detail(&path).expect("write2");

        let events = ChangeHistoryLog::read_detail(&path).expect("read");
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn reconcile_reports_missing_and_orphan_rows() {
        let mut log = ChangeHistoryLog::new();
        log.upsert_summary(sample_row("R1", SyncStatus::Synced));
        log.upsert_summary(sample_row("ORPHAN", SyncStatus::Synced));

        let report = reconcile_summary(&log, &["R1".to_string(), "R2".to_string()]);
        assert_eq!(report.missing_summary, vec!["R2".to_string()]);
        assert_eq!(report.orphan_summary, vec!["ORPHAN".to_string()]);
        assert!(!report.is_clean());
    }

    #[test]
    fn repair_summary_adds_placeholders_and_drops_orphans() {
        let mut log = ChangeHistoryLog::new();
        log.upsert_summary(sample_row("ORPHAN", SyncStatus::Synced));
        let now = Utc::now();

        repair_summary(&mut log, &["R1".to_string()], now);

        assert!(log.summary().contains_key("R1"));
        assert_eq!(log.summary()["R1"].status, SyncStatus::Placeholder);
        assert!(!log.summary().contains_key("ORPHAN"));
    }

    #[test]
    fn reconcile_clean_when_sets_match() {
        let mut log = ChangeHistoryLog::new();
        log.upsert_summary(sample_row("R1", SyncStatus::Synced));
        let report = reconcile_summary(&log, &["R1".to_string()]);
        assert!(report.is_clean());
    }
}
