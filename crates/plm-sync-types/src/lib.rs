//! Core domain types shared across the `plm-sync` workspace.
//!
//! This crate has no behavior of its own: it defines the Item/BOM line/rack
//! sheet/creation-context shapes that the session, cache, diff, consolidation
//! and push-pipeline crates all build on, plus the error taxonomy raised at
//! every layer.
//!
//! # Example
//!
//! ```
//! use plm_sync_types::{BomLine, SyncStatus};
//!
//! let line = BomLine {
//!     line_id: Some("bl-1".to_string()),
//!     child_id: "itm-42".to_string(),
//!     child_number: "CABLE-9".to_string(),
//!     quantity: 4,
//!     level: 1,
//!     line_number: None,
//!     attributes: Default::default(),
//! };
//! assert_eq!(line.quantity, 4);
//! assert_eq!(SyncStatus::default(), SyncStatus::Placeholder);
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A PLM item: server-assigned, cached locally, never destroyed by this system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Opaque, server-assigned identifier.
    pub id: String,
    /// Human-readable item number.
    pub number: String,
    /// Display name.
    pub name: String,
    /// Description, when present.
    #[serde(default)]
    pub description: Option<String>,
    /// Revision label (e.g. "A", "02").
    #[serde(default)]
    pub revision: Option<String>,
    /// Category name.
    #[serde(default)]
    pub category_name: Option<String>,
    /// Category opaque id.
    #[serde(default)]
    pub category_id: Option<String>,
    /// Lifecycle phase name.
    #[serde(default)]
    pub lifecycle_name: Option<String>,
    /// Lifecycle phase opaque id.
    #[serde(default)]
    pub lifecycle_id: Option<String>,
    /// Whether this item is itself an assembly (has children).
    #[serde(default)]
    pub is_assembly: bool,
    /// Assembly type, when `is_assembly` is set.
    #[serde(default)]
    pub assembly_type: Option<String>,
}

/// A trimmed item record, stored in the sharded item cache.
///
/// Only the fields callers actually need from the cache are kept; URLs and
/// secondary identifiers are dropped to fit the shard size budget (see
/// `plm-sync-cache`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: String,
    pub number: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub revision: Option<String>,
    #[serde(default)]
    pub is_assembly: bool,
    #[serde(default)]
    pub assembly_type: Option<String>,
    #[serde(default)]
    pub category_name: Option<String>,
    #[serde(default)]
    pub lifecycle_name: Option<String>,
}

impl From<&Item> for CacheEntry {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id.clone(),
            number: item.number.clone(),
            name: item.name.clone(),
            description: item.description.clone(),
            revision: item.revision.clone(),
            is_assembly: item.is_assembly,
            assembly_type: item.assembly_type.clone(),
            category_name: item.category_name.clone(),
            lifecycle_name: item.lifecycle_name.clone(),
        }
    }
}

/// A child relationship under a parent item.
///
/// Diffing and smart-sync key on `child_id` (the resolved opaque id), never
/// on `child_number` — renaming an item in the PLM must not churn BOM lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BomLine {
    /// Server-assigned BOM line id. `None` for a line not yet pushed.
    #[serde(default)]
    pub line_id: Option<String>,
    /// Resolved child item opaque id.
    pub child_id: String,
    /// Child item number, kept for display and error messages.
    pub child_number: String,
    /// Quantity, non-negative.
    pub quantity: u32,
    /// Hierarchy level; 0 = top of this BOM.
    #[serde(default)]
    pub level: u32,
    /// Optional sequential line number.
    #[serde(default)]
    pub line_number: Option<u32>,
    /// Additional attribute id -> value map (e.g. the position attribute).
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Per-rack sync status (spec.md §3, state machine in §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Local only; no parent opaque id yet.
    #[default]
    Placeholder,
    /// Last known-good state: local and remote agree.
    Synced,
    /// The rack sheet changed locally since the last sync.
    LocalModified,
    /// The remote BOM diverged from what this sheet last pushed.
    RemoteModified,
    /// The last operation against this rack failed.
    Error,
}

/// Fixed metadata row (row 1) of a rack configuration sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RackMeta {
    pub parent_number: String,
    pub parent_name: String,
    #[serde(default)]
    pub parent_description: Option<String>,
    pub status: SyncStatus,
    /// Set once `status != Placeholder`.
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
    #[serde(default)]
    pub checksum: Option<String>,
}

impl RackMeta {
    /// spec.md §3 invariant: status != Placeholder implies a non-empty parent id.
    pub fn invariant_holds(&self) -> bool {
        (self.status == SyncStatus::Placeholder) == self.parent_id.is_none()
    }
}

/// One row of the overview grid: a rack number placed at a column position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridPlacement {
    pub row_index: usize,
    pub column_index: usize,
    pub rack_number: String,
}

/// One kind of entry in the append-only creation context (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationKind {
    Leaf,
    Row,
    Top,
}

/// A single entry in the ordered creation log produced by a push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreationEntry {
    pub kind: CreationKind,
    pub number: String,
    pub opaque_id: String,
}

/// The ordered log of server-side creations produced by one push, read in
/// reverse for rollback (spec.md §4.8.3).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreationContext {
    entries: Vec<CreationEntry>,
}

impl CreationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, kind: CreationKind, number: impl Into<String>, opaque_id: impl Into<String>) {
        self.entries.push(CreationEntry {
            kind,
            number: number.into(),
            opaque_id: opaque_id.into(),
        });
    }

    pub fn entries(&self) -> &[CreationEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries in reverse-creation order: top before rows before leaves.
    pub fn rollback_order(&self) -> impl Iterator<Item = &CreationEntry> {
        self.entries.iter().rev()
    }
}

/// One BOM line difference, classified by the diff engine (spec.md §4.5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DiffEntry {
    Add(BomLine),
    Update { line_id: String, child_id: String, from_qty: u32, to_qty: u32 },
    Remove { line_id: String, child_id: String },
    /// Display-only: parent revision differs between local sheet and remote item.
    Revision { local: String, remote: String },
}

/// Result of diffing a local BOM against the remote BOM for one parent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BomDiff {
    pub to_add: Vec<BomLine>,
    pub to_update: Vec<(BomLine, u32)>,
    pub to_remove: Vec<BomLine>,
    pub revision_changed: Option<(String, String)>,
}

impl BomDiff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_update.is_empty() && self.to_remove.is_empty()
    }
}

/// One row of the consolidated (flattened) BOM produced by the consolidation
/// engine (spec.md §4.7).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedLine {
    pub child_number: String,
    pub quantity: u32,
    pub level: u32,
    pub category: Option<String>,
}

/// Kinds of structured events written to the change history log (spec.md §4.10).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    RackCreated,
    StatusChange { before: SyncStatus, after: SyncStatus },
    LocalEdit,
    RefreshAccepted,
    RefreshDeclined,
    RefreshNoChanges,
    TopPush,
    BomPull,
    ManualSync,
    BatchCheck,
    Error { message: String },
    ChecksumMismatch,
    Migration,
    RevisionChange { from: String, to: String },
    LifecycleChange { from: String, to: String },
    RackCloned,
    TemplateLoaded,
}

/// One row of the change history log detail section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub timestamp: DateTime<Utc>,
    pub rack_number: String,
    pub event: EventKind,
    #[serde(default)]
    pub actor: Option<String>,
    pub summary: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
}

/// The taxonomy of errors this system raises, per spec.md §7.
///
/// The HTTP client and domain API translate transport failures into these
/// variants at the boundary; callers above that boundary match on kind, not
/// on HTTP status codes or string contents.
#[derive(Debug, thiserror::Error)]
pub enum PlmError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("session expired after a retried authentication failure")]
    SessionExpired,

    #[error("workspace mismatch: configured {configured}, server returned {returned}")]
    WorkspaceMismatch { configured: String, returned: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limited, retry exhausted")]
    RateLimited,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("validation failed: {0:?}")]
    Validation(Vec<String>),

    #[error("cancelled by user")]
    UserCancelled,

    #[error("partial rollback: {succeeded} of {attempted} deletions completed")]
    Partial { succeeded: usize, attempted: usize },
}

pub type Result<T> = std::result::Result<T, PlmError>;

/// Map an HTTP status code to the user-facing friendly message from spec.md §7.
pub fn friendly_message(status: u16) -> &'static str {
    match status {
        401 => "Please re-authenticate",
        403 => "Permission denied",
        404 => "Item not found",
        429 => "Server is rate-limiting, try again",
        500..=599 => "Server error, retry shortly",
        _ => "Unexpected error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_status_default_is_placeholder() {
        assert_eq!(SyncStatus::default(), SyncStatus::Placeholder);
    }

    #[test]
    fn rack_meta_invariant_placeholder_has_no_parent_id() {
        let meta = RackMeta {
            parent_number: "R1".into(),
            parent_name: "Rack One".into(),
            parent_description: None,
            status: SyncStatus::Placeholder,
            parent_id: None,
            last_sync: None,
            checksum: None,
        };
        assert!(meta.invariant_holds());
    }

    #[test]
    fn rack_meta_invariant_violated_when_synced_without_id() {
        let meta = RackMeta {
            parent_number: "R1".into(),
            parent_name: "Rack One".into(),
            parent_description: None,
            status: SyncStatus::Synced,
            parent_id: None,
            last_sync: None,
            checksum: None,
        };
        assert!(!meta.invariant_holds());
    }

    #[test]
    fn creation_context_rollback_is_reverse_order() {
        let mut ctx = CreationContext::new();
        ctx.append(CreationKind::Leaf, "R1", "id-1");
        ctx.append(CreationKind::Leaf, "R2", "id-2");
        ctx.append(CreationKind::Row, "ROW1", "id-3");
        ctx.append(CreationKind::Top, "TOP", "id-4");

        let order: Vec<&str> = ctx.rollback_order().map(|e| e.number.as_str()).collect();
        assert_eq!(order, vec!["TOP", "ROW1", "R2", "R1"]);
    }

    #[test]
    fn bom_diff_empty_when_no_changes() {
        let diff = BomDiff::default();
        assert!(diff.is_empty());
    }

    #[test]
    fn friendly_messages_match_spec() {
        assert_eq!(friendly_message(401), "Please re-authenticate");
        assert_eq!(friendly_message(403), "Permission denied");
        assert_eq!(friendly_message(404), "Item not found");
        assert_eq!(friendly_message(429), "Server is rate-limiting, try again");
        assert_eq!(friendly_message(502), "Server error, retry shortly");
    }

    #[test]
    fn cache_entry_from_item_drops_secondary_fields() {
        let item = Item {
            id: "id-1".into(),
            number: "N-1".into(),
            name: "Widget".into(),
            description: Some("desc".into()),
            revision: Some("A".into()),
            category_name: Some("Electrical".into()),
            category_id: Some("cat-1".into()),
            lifecycle_name: Some("Production".into()),
            lifecycle_id: Some("lc-1".into()),
            is_assembly: false,
            assembly_type: None,
        };
        let cached = CacheEntry::from(&item);
        assert_eq!(cached.id, "id-1");
        assert_eq!(cached.category_name.as_deref(), Some("Electrical"));
    }

    #[test]
    fn event_kind_serializes_with_tag() {
        let event = HistoryEvent {
            timestamp: Utc::now(),
            rack_number: "R1".into(),
            event: EventKind::StatusChange {
                before: SyncStatus::Placeholder,
                after: SyncStatus::Synced,
            },
            actor: Some("user@example.com".into()),
            summary: "Rack pushed".into(),
            details: None,
            link: None,
        };
        let json = serde_json::to_string(&event).expect("serialize");
        let parsed: HistoryEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.rack_number, "R1");
    }
}
