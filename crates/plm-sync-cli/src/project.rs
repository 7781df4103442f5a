//! Loads and saves the workbook project file the CLI operates on.
//!
//! There is no real spreadsheet host to attach to from a terminal, so the
//! CLI persists an [`InMemoryWorkbook`] as a single JSON file instead. The
//! sheet conventions (grid layout, rack sheet layout) live in
//! [`crate::sheets`], not here — this module only knows how to get the
//! workbook's bytes on and off disk.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use plm_sync_engine::workbook::InMemoryWorkbook;

pub struct ProjectFile {
    path: PathBuf,
    pub workbook: InMemoryWorkbook,
}

impl ProjectFile {
    /// Load the project file at `path`, or start from an empty workbook if
    /// it doesn't exist yet (the first `push`/`preflight` against a brand
    /// new project creates it on save).
    pub fn load(path: &Path) -> Result<Self> {
        let workbook = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("reading workbook project file {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("parsing workbook project file {}", path.display()))?
        } else {
            InMemoryWorkbook::new()
        };
        Ok(Self { path: path.to_path_buf(), workbook })
    }

    pub fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.workbook).context("serializing workbook project file")?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating directory {}", parent.display()))?;
            }
        }
        fs::write(&self.path, content).with_context(|| format!("writing workbook project file {}", self.path.display()))
    }
}
