//! # plm-sync-engine
//!
//! The sync engine: BOM diffing, grid consolidation, status detection, the
//! structured push pipeline, and the multi-level BOM loader.
//!
//! This crate has no transport of its own — `plm-sync-client` owns the HTTP
//! session. Everything here operates on plain domain types
//! ([`plm_sync_types::BomLine`] and friends) or on the small traits in
//! [`push`] and [`loader`] that the push pipeline and the tree walker need,
//! so both can be driven in tests against in-memory fakes. [`gateway`] wires
//! those traits to a live [`plm_sync_client::ArenaClient`].
//!
//! ## Pipeline
//!
//! 1. [`workbook`] reads a rack sheet or the overview grid off a
//!    [`workbook::WorkbookAdapter`] into plain rows.
//! 2. [`consolidation::consolidate`] walks the grid and flattens it into a
//!    quantity-multiplied BOM for display.
//! 3. [`diff::diff_bom`] compares a rack's desired children against its
//!    remote BOM, keyed on opaque child id.
//! 4. [`status::detect_status`] recomputes a rack's [`plm_sync_types::SyncStatus`]
//!    from its checksum and an optional diff.
//! 5. [`push::run_preflight`] and [`push::run_push`] validate and then
//!    execute a push, recording everything created into a
//!    [`plm_sync_types::CreationContext`] that [`push::rollback`] can undo.
//! 6. [`loader::load_tree_parallel`] or [`loader::run_bulk_export`] pull a
//!    multi-level BOM back down for a full local rebuild.

/// BOM diff engine: local vs. remote, keyed on opaque child id.
pub mod diff;

/// Grid consolidation: quantity-multiplied, flattened BOM for display.
pub mod consolidation;

/// Sync status detection state machine.
pub mod status;

/// Rack sheet and overview grid reading, behind the `WorkbookAdapter` trait.
pub mod workbook;

/// Structured push pipeline: pre-flight, three-phase creation, rollback.
pub mod push;

/// Multi-level BOM loader: parallel tree walk and bulk-export fast path.
pub mod loader;

/// Live `PlmGateway`/`BomTreeGateway` adapters over `ArenaClient`.
pub mod gateway;
