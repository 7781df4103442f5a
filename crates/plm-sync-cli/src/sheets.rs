//! Sheet layout conventions for the CLI's workbook project file.
//!
//! A rack sheet's metadata row (row 1) is
//! `[number, name, category, description, status, parent_id, checksum]`;
//! its data rows (row 3+) are `[child_number, quantity]` pairs. The grid
//! sheet's metadata row is just its own name; its data rows are
//! `[row_name, rack_at_col_1, rack_at_col_2, ...]` with empty cells meaning
//! no placement. The top assembly lives in its own single-metadata-row
//! sheet, conventionally named `Top`.

use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use plm_sync_engine::consolidation::parse_quantity_cell;
use plm_sync_engine::push::{DesiredLine, GridInput, RackInput, RowInput, TopInput};
use plm_sync_engine::workbook::{CellValue, Row, WorkbookAdapter};
use plm_sync_types::{GridPlacement, SyncStatus};

pub const TOP_SHEET: &str = "Top";

fn cell_text(row: &Row, index: usize) -> Option<&str> {
    row.get(index).and_then(CellValue::as_text).filter(|s| !s.trim().is_empty())
}

fn parse_status(raw: Option<&str>) -> SyncStatus {
    raw.and_then(|s| serde_json::from_value(serde_json::Value::String(s.to_string())).ok())
        .unwrap_or_default()
}

fn status_label(status: SyncStatus) -> &'static str {
    match status {
        SyncStatus::Placeholder => "placeholder",
        SyncStatus::Synced => "synced",
        SyncStatus::LocalModified => "local_modified",
        SyncStatus::RemoteModified => "remote_modified",
        SyncStatus::Error => "error",
    }
}

/// Read the overview grid sheet into the push pipeline's `GridInput`.
pub fn load_grid(wb: &dyn WorkbookAdapter, sheet_name: &str) -> Result<GridInput> {
    let snapshot = wb
        .read_sheet(sheet_name)
        .ok_or_else(|| anyhow!("grid sheet {sheet_name:?} not found in workbook"))?;

    let mut rows = Vec::new();
    for row in snapshot.data_rows() {
        let Some(row_name) = cell_text(row, 0) else { continue };
        let mut placements = Vec::new();
        for (column_index, cell) in row.iter().enumerate().skip(1) {
            if cell.is_empty() {
                continue;
            }
            if let Some(rack_number) = cell.as_text() {
                placements.push((rack_number.to_string(), column_index));
            }
        }
        rows.push(RowInput { row_name: row_name.to_string(), category: None, placements });
    }
    Ok(GridInput { rows })
}

/// Read one rack's configuration sheet into the push pipeline's `RackInput`.
pub fn load_rack(wb: &dyn WorkbookAdapter, rack_number: &str) -> Result<RackInput> {
    let snapshot = wb
        .read_sheet(rack_number)
        .ok_or_else(|| anyhow!("rack sheet {rack_number:?} not found in workbook"))?;
    let meta = snapshot
        .metadata_row()
        .ok_or_else(|| anyhow!("rack sheet {rack_number:?} has no metadata row"))?;

    let name = cell_text(meta, 1).unwrap_or(rack_number).to_string();
    let category = cell_text(meta, 2).map(str::to_string);
    let description = cell_text(meta, 3).map(str::to_string);
    let status = parse_status(cell_text(meta, 4));
    let parent_id = cell_text(meta, 5).map(str::to_string);

    let mut children = Vec::new();
    for row in snapshot.data_rows() {
        let Some(child_number) = cell_text(row, 0) else { continue };
        let raw_qty = cell_text(row, 1).unwrap_or("1");
        let mut warnings = Vec::new();
        let quantity = parse_quantity_cell(raw_qty, &format!("{rack_number} {child_number}"), &mut warnings);
        for warning in warnings {
            log::warn!("{warning}");
        }
        children.push(DesiredLine { child_number: child_number.to_string(), quantity });
    }

    Ok(RackInput { name, description, category, status, parent_id, children })
}

/// Read every rack sheet placed anywhere in `grid`. A rack placed in the
/// grid with no matching sheet is simply absent from the result — preflight
/// and push both already treat that as a fatal, reportable condition.
pub fn load_all_racks(wb: &dyn WorkbookAdapter, grid: &GridInput) -> BTreeMap<String, RackInput> {
    let mut racks = BTreeMap::new();
    for rack_number in grid.placed_racks() {
        if let Ok(rack) = load_rack(wb, &rack_number) {
            racks.insert(rack_number, rack);
        }
    }
    racks
}

/// Read the checksum stored in a rack sheet's metadata row (column 7), the
/// last value [`plm_sync_engine::status::compute_checksum`] produced for it.
pub fn load_rack_checksum(wb: &dyn WorkbookAdapter, rack_number: &str) -> Option<String> {
    let snapshot = wb.read_sheet(rack_number)?;
    let meta = snapshot.metadata_row()?;
    cell_text(meta, 6).map(str::to_string)
}

/// Read the top assembly sheet.
pub fn load_top(wb: &dyn WorkbookAdapter) -> Result<TopInput> {
    let snapshot = wb
        .read_sheet(TOP_SHEET)
        .ok_or_else(|| anyhow!("{TOP_SHEET:?} sheet not found in workbook"))?;
    let meta = snapshot
        .metadata_row()
        .ok_or_else(|| anyhow!("{TOP_SHEET:?} sheet has no metadata row"))?;
    let number = cell_text(meta, 0)
        .ok_or_else(|| anyhow!("{TOP_SHEET:?} sheet is missing its item number in column 1"))?
        .to_string();
    let name = cell_text(meta, 1).unwrap_or(&number).to_string();
    let category = cell_text(meta, 2).map(str::to_string);
    let description = cell_text(meta, 3).map(str::to_string);
    Ok(TopInput { number, name, category, description })
}

/// Every non-empty grid cell, resolved to a flat list of placements — the
/// shape the consolidation engine scans.
pub fn grid_placements(grid: &GridInput) -> Vec<GridPlacement> {
    grid.rows
        .iter()
        .enumerate()
        .flat_map(|(row_index, row)| {
            row.placements
                .iter()
                .map(move |(rack_number, column_index)| GridPlacement {
                    row_index,
                    column_index: *column_index,
                    rack_number: rack_number.clone(),
                })
        })
        .collect()
}

/// Each distinct rack's own (non-nested) children, as the consolidation
/// engine needs them.
pub fn rack_children_map(racks: &BTreeMap<String, RackInput>) -> BTreeMap<String, Vec<(String, u32)>> {
    racks
        .iter()
        .map(|(number, rack)| {
            let children = rack.children.iter().map(|c| (c.child_number.clone(), c.quantity)).collect();
            (number.clone(), children)
        })
        .collect()
}

/// Write a rack's metadata row back after a successful push, leaving its
/// data rows (the authored children) untouched.
pub fn write_rack_status(
    wb: &mut dyn WorkbookAdapter,
    rack_number: &str,
    status: SyncStatus,
    parent_id: &str,
    checksum: &str,
) -> Result<()> {
    let mut snapshot = wb
        .read_sheet(rack_number)
        .ok_or_else(|| anyhow!("rack sheet {rack_number:?} not found in workbook"))?;
    if snapshot.rows.is_empty() {
        snapshot.rows.push(Vec::new());
    }
    let meta = &mut snapshot.rows[0];
    let set = |meta: &mut Row, index: usize, value: CellValue| {
        while meta.len() <= index {
            meta.push(CellValue::Empty);
        }
        meta[index] = value;
    };
    set(meta, 0, CellValue::from(rack_number));
    set(meta, 4, CellValue::from(status_label(status)));
    set(meta, 5, CellValue::from(parent_id));
    set(meta, 6, CellValue::from(checksum));

    wb.write_sheet(rack_number, snapshot.rows).context("writing updated rack status back to the workbook")
}
