//! The host workbook, modeled abstractly.
//!
//! Spreadsheet rendering, menu shells, and formatting are someone else's
//! problem; this crate only needs a pluggable, name-unique, typed-cell
//! two-dimensional store with per-sheet protection. [`WorkbookAdapter`] is
//! that seam. [`InMemoryWorkbook`] is a reference implementation used by
//! tests and by callers that don't have a real spreadsheet host (the CLI,
//! for instance).

use std::collections::BTreeMap;

use plm_sync_types::{PlmError, Result};
use serde::{Deserialize, Serialize};

/// A single typed cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Empty,
}

impl CellValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty) || matches!(self, CellValue::Text(s) if s.trim().is_empty())
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        if value.trim().is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(value.to_string())
        }
    }
}

impl From<u32> for CellValue {
    fn from(value: u32) -> Self {
        CellValue::Number(value as f64)
    }
}

/// One row of a sheet: ordered cell values.
pub type Row = Vec<CellValue>;

/// A full read of one sheet at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SheetSnapshot {
    pub rows: Vec<Row>,
}

impl SheetSnapshot {
    /// Row 1 is metadata, row 2 is the header, row 3+ is data.
    pub fn data_rows(&self) -> &[Row] {
        if self.rows.len() > 2 {
            &self.rows[2..]
        } else {
            &[]
        }
    }

    pub fn metadata_row(&self) -> Option<&Row> {
        self.rows.first()
    }

    pub fn header_row(&self) -> Option<&Row> {
        self.rows.get(1)
    }
}

/// The pluggable host workbook.
pub trait WorkbookAdapter {
    fn read_sheet(&self, name: &str) -> Option<SheetSnapshot>;
    fn write_sheet(&mut self, name: &str, rows: Vec<Row>) -> Result<()>;
    fn protect_sheet(&mut self, name: &str) -> Result<()>;
    fn is_protected(&self, name: &str) -> bool;
    fn sheet_names(&self) -> Vec<String>;
    fn delete_sheet(&mut self, name: &str) -> Result<()>;
}

/// An in-process workbook, used by tests and the CLI where no real
/// spreadsheet host is attached. Serializable so the CLI can load and save
/// it as a single project file in place of a real spreadsheet.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct InMemoryWorkbook {
    sheets: BTreeMap<String, SheetSnapshot>,
    protected: std::collections::BTreeSet<String>,
}

impl InMemoryWorkbook {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkbookAdapter for InMemoryWorkbook {
    fn read_sheet(&self, name: &str) -> Option<SheetSnapshot> {
        self.sheets.get(name).cloned()
    }

    fn write_sheet(&mut self, name: &str, rows: Vec<Row>) -> Result<()> {
        if self.protected.contains(name) {
            return Err(PlmError::Validation(vec![format!(
                "sheet {name} is protected against direct writes"
            )]));
        }
        self.sheets.insert(name.to_string(), SheetSnapshot { rows });
        Ok(())
    }

    fn protect_sheet(&mut self, name: &str) -> Result<()> {
        self.protected.insert(name.to_string());
        Ok(())
    }

    fn is_protected(&self, name: &str) -> bool {
        self.protected.contains(name)
    }

    fn sheet_names(&self) -> Vec<String> {
        self.sheets.keys().cloned().collect()
    }

    fn delete_sheet(&mut self, name: &str) -> Result<()> {
        self.sheets.remove(name);
        self.protected.remove(name);
        Ok(())
    }
}
