//! End-to-end tests driving the `plm-sync` binary as a subprocess against a
//! workbook project file on disk — the same way a real user invocation
//! would, with no network access required for the commands that don't need
//! one (spec.md §6's workbook is stood in for by the JSON project file).

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use insta::assert_snapshot;
use predicates::str::contains;
use tempfile::tempdir;

fn plm_sync_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("plm-sync"))
}

/// A workbook with one rack ("RACK-1") placed once on the overview grid,
/// holding four of "CABLE-1".
fn write_single_rack_workbook(dir: &Path) {
    let workbook = r#"{
  "sheets": {
    "Grid": {
      "rows": [
        [{"Text": "Grid"}],
        [{"Text": "Row"}, {"Text": "Col1"}],
        [{"Text": "Row1"}, {"Text": "RACK-1"}]
      ]
    },
    "RACK-1": {
      "rows": [
        [{"Text": "RACK-1"}, {"Text": "Rack One"}, {"Text": "Cabinet"}, "Empty", {"Text": "placeholder"}, "Empty", "Empty"],
        [{"Text": "Child"}, {"Text": "Qty"}],
        [{"Text": "CABLE-1"}, {"Number": 4.0}]
      ]
    }
  },
  "protected": []
}"#;
    fs::write(dir.join("workbook.json"), workbook).expect("write workbook fixture");
}

/// A workbook with an empty grid: no racks placed anywhere.
fn write_empty_grid_workbook(dir: &Path) {
    let workbook = r#"{
  "sheets": {
    "Grid": {
      "rows": [
        [{"Text": "Grid"}],
        [{"Text": "Row"}, {"Text": "Col1"}]
      ]
    }
  },
  "protected": []
}"#;
    fs::write(dir.join("workbook.json"), workbook).expect("write workbook fixture");
}

#[test]
fn consolidate_command_flattens_grid_into_sorted_bom() {
    let td = tempdir().expect("tempdir");
    write_single_rack_workbook(td.path());

    let output = plm_sync_cmd()
        .current_dir(td.path())
        .arg("consolidate")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let stdout = String::from_utf8(output).expect("utf8");
    assert_snapshot!(stdout, @r#"
2 unique item(s) across 1 rack placement(s)
    CABLE-1 x4
    RACK-1 x1
"#);
}

#[test]
fn preflight_without_credentials_reports_the_failure() {
    let td = tempdir().expect("tempdir");
    write_single_rack_workbook(td.path());

    plm_sync_cmd()
        .current_dir(td.path())
        .arg("--config-home")
        .arg(td.path().join("no-such-config"))
        .arg("preflight")
        .env_remove("ARENA_EMAIL")
        .env_remove("ARENA_PASSWORD")
        .env_remove("ARENA_WORKSPACE_ID")
        .env_remove("ARENA_API_BASE")
        .assert()
        .failure()
        .stderr(contains("resolving PLM credentials"));
}

#[test]
fn cache_invalidate_reports_the_invalidated_number() {
    let td = tempdir().expect("tempdir");

    plm_sync_cmd()
        .current_dir(td.path())
        .arg("--state-dir")
        .arg(".plm-sync")
        .arg("cache-invalidate")
        .arg("CABLE-1")
        .assert()
        .success()
        .stderr(contains("invalidated CABLE-1"));
}

#[test]
fn history_reconcile_is_clean_with_no_racks_placed_and_no_log() {
    let td = tempdir().expect("tempdir");
    write_empty_grid_workbook(td.path());

    plm_sync_cmd()
        .current_dir(td.path())
        .arg("--state-dir")
        .arg(".plm-sync")
        .arg("history-reconcile")
        .assert()
        .success()
        .stderr(contains("change history summary matches the grid"));
}

#[test]
fn history_reconcile_without_repair_fails_on_drift() {
    let td = tempdir().expect("tempdir");
    write_single_rack_workbook(td.path());

    // A summary row for a rack no longer on the grid: orphaned.
    let state_dir = td.path().join(".plm-sync");
    fs::create_dir_all(&state_dir).expect("mkdir state dir");
    fs::write(
        state_dir.join("history-summary.json"),
        r#"[{"number": "ORPHAN", "name": "Orphan", "status": "synced", "created_at": "2026-01-01T00:00:00Z"}]"#,
    )
    .expect("write summary fixture");

    plm_sync_cmd()
        .current_dir(td.path())
        .arg("--state-dir")
        .arg(".plm-sync")
        .arg("history-reconcile")
        .assert()
        .failure()
        .stderr(contains("rack RACK-1 is on the grid but has no summary row"))
        .stderr(contains("summary row ORPHAN has no matching rack on the grid"));
}
