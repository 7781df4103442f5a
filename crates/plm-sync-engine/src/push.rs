//! Structured push pipeline.
//!
//! A side-effect-free validation pass that can only fail closed, followed by
//! an execution pass that appends to an ordered, ID-keyed log as it goes (one
//! entry per created item), so that a failure partway through has something
//! to roll back with.
//!
//! [`PlmGateway`] is the seam a real `ArenaClient` sits behind; tests drive
//! the pipeline against an in-memory fake instead of a mock HTTP server.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use plm_sync_config::PositionAttributeConfig;
use plm_sync_types::{BomLine, CreationContext, CreationKind, HistoryEvent, Item, PlmError, Result, SyncStatus};

use crate::diff::diff_bom;
use crate::status::compute_checksum;

/// The domain operations the push pipeline needs, independent of transport.
/// Implemented for `plm_sync_client::ArenaClient` by callers that wire up a
/// live session; tests implement it directly against a fixture.
pub trait PlmGateway {
    /// Cheap reachability check against a lightweight metadata endpoint.
    fn probe(&self) -> Result<()>;
    /// Resolve a child item number to its opaque id via the item cache.
    fn resolve_child(&self, number: &str) -> Result<Option<ResolvedChild>>;
    /// Whether the given attribute id is configured server-side.
    fn attribute_exists(&self, attribute_id: &str) -> Result<bool>;
    fn find_item_by_number(&self, number: &str) -> Result<Option<Item>>;
    fn create_item(
        &self,
        number: &str,
        name: &str,
        category: Option<&str>,
        description: Option<&str>,
    ) -> Result<Item>;
    fn get_bom_lines(&self, parent_id: &str) -> Result<Vec<BomLine>>;
    fn create_bom_line(&self, parent_id: &str, line: &BomLine) -> Result<BomLine>;
    fn update_bom_line(&self, parent_id: &str, line_id: &str, new_quantity: u32) -> Result<()>;
    fn delete_bom_line(&self, parent_id: &str, line_id: &str) -> Result<()>;
    fn delete_item(&self, opaque_id: &str) -> Result<()>;
}

/// A child item resolved through the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedChild {
    pub id: String,
    pub number: String,
}

/// One child line a rack configuration sheet wants in its BOM, before
/// resolution against the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredLine {
    pub child_number: String,
    pub quantity: u32,
}

/// One rack's authoring input: the rack configuration sheet content the
/// push pipeline reads.
#[derive(Debug, Clone, PartialEq)]
pub struct RackInput {
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub status: SyncStatus,
    pub parent_id: Option<String>,
    pub children: Vec<DesiredLine>,
}

/// One grid row: a name, a category for the row item, and the rack numbers
/// placed in it with their (1-based) column positions.
#[derive(Debug, Clone, PartialEq)]
pub struct RowInput {
    pub row_name: String,
    pub category: Option<String>,
    pub placements: Vec<(String, usize)>,
}

/// The overview grid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridInput {
    pub rows: Vec<RowInput>,
}

impl GridInput {
    /// Every distinct rack number placed anywhere in the grid.
    pub fn placed_racks(&self) -> BTreeSet<String> {
        self.rows
            .iter()
            .flat_map(|row| row.placements.iter().map(|(number, _)| number.clone()))
            .collect()
    }
}

/// The top assembly's authoring input.
#[derive(Debug, Clone, PartialEq)]
pub struct TopInput {
    pub number: String,
    pub name: String,
    pub category: Option<String>,
    pub description: Option<String>,
}

/// Result of pre-flight validation: zero side effects; a non-empty `errors`
/// aborts the push before any write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreflightReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl PreflightReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

fn normalize_number(number: &str) -> String {
    number.trim().to_lowercase()
}

/// Run pre-flight checks with zero side effects.
pub fn run_preflight(
    gateway: &dyn PlmGateway,
    grid: &GridInput,
    racks: &BTreeMap<String, RackInput>,
    position_attribute: Option<&PositionAttributeConfig>,
) -> PreflightReport {
    let mut errors = Vec::new();
    let warnings = Vec::new();

    if let Err(e) = gateway.probe() {
        errors.push(format!("PLM session unreachable: {e}"));
    }

    let placed = grid.placed_racks();
    if placed.is_empty() {
        errors.push("grid sheet has no placements".to_string());
    }

    if let Some(attr) = position_attribute {
        match gateway.attribute_exists(&attr.attribute_id) {
            Ok(true) => {}
            Ok(false) => errors.push(format!(
                "configured position attribute {} is not present in the PLM",
                attr.attribute_name
            )),
            Err(e) => errors.push(format!("could not verify position attribute: {e}")),
        }
    }

    let known: BTreeSet<String> = racks.keys().map(|k| normalize_number(k)).collect();
    for rack_number in &placed {
        if !known.contains(&normalize_number(rack_number)) {
            errors.push(format!(
                "rack {rack_number} is placed in the grid but has no configuration sheet"
            ));
        }
    }

    let mut needed_by: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (rack_number, rack) in racks {
        if !placed.contains(rack_number) {
            continue;
        }
        for child in &rack.children {
            let resolved = gateway.resolve_child(&child.child_number).unwrap_or(None);
            if resolved.is_none() {
                needed_by
                    .entry(child.child_number.clone())
                    .or_default()
                    .push(rack_number.clone());
            }
        }
    }
    if !needed_by.is_empty() {
        let items: Vec<String> = needed_by
            .into_iter()
            .map(|(child, racks)| format!("{child} (needed by: {})", racks.join(", ")))
            .collect();
        errors.push(format!("Missing child components: {}", items.join(", ")));
    }

    PreflightReport { errors, warnings }
}

/// One rack's outcome after a successful push phase.
#[derive(Debug, Clone, PartialEq)]
pub struct RackPushResult {
    pub number: String,
    pub parent_id: String,
    pub checksum: String,
}

/// One row's outcome after a successful push phase.
#[derive(Debug, Clone, PartialEq)]
pub struct RowPushResult {
    pub row_name: String,
    pub parent_id: String,
}

/// The full result of a completed push.
#[derive(Debug, Clone, PartialEq)]
pub struct PushOutcome {
    pub context: CreationContext,
    pub racks: Vec<RackPushResult>,
    pub rows: Vec<RowPushResult>,
    pub top_id: String,
    pub events: Vec<HistoryEvent>,
}

/// Is this transport error an HTTP 405, the signal that a PUT against a BOM
/// line isn't supported and smart-sync must fall back to delete+create?
fn is_method_not_allowed(err: &PlmError) -> bool {
    matches!(err, PlmError::Transport(message) if message.starts_with("405"))
}

/// Resolve every desired child line against the cache, failing fatally on
/// the first unresolved child. Exposed for callers (e.g. a status check)
/// that need the same resolution `run_push` uses without running a push.
pub fn resolve_lines(
    gateway: &dyn PlmGateway,
    rack_number: &str,
    desired: &[DesiredLine],
) -> Result<Vec<BomLine>> {
    desired
        .iter()
        .map(|d| {
            let resolved = gateway.resolve_child(&d.child_number)?.ok_or_else(|| {
                PlmError::NotFound(format!(
                    "Child component {} not found in PLM. Needed for rack {}.",
                    d.child_number, rack_number
                ))
            })?;
            Ok(BomLine {
                line_id: None,
                child_id: resolved.id,
                child_number: resolved.number,
                quantity: d.quantity,
                level: 1,
                line_number: None,
                attributes: Default::default(),
            })
        })
        .collect()
}

/// Apply a computed diff in smart-sync order: DELETE, then PUT (falling back
/// to DELETE+POST on 405), then POST.
fn apply_diff(gateway: &dyn PlmGateway, parent_id: &str, diff: &plm_sync_types::BomDiff) -> Result<()> {
    for line in &diff.to_remove {
        if let Some(line_id) = &line.line_id {
            gateway.delete_bom_line(parent_id, line_id)?;
        }
    }
    for (line, _previous_remote_qty) in &diff.to_update {
        let Some(line_id) = &line.line_id else { continue };
        match gateway.update_bom_line(parent_id, line_id, line.quantity) {
            Ok(()) => {}
            Err(e) if is_method_not_allowed(&e) => {
                gateway.delete_bom_line(parent_id, line_id)?;
                gateway.create_bom_line(parent_id, line)?;
            }
            Err(e) => return Err(e),
        }
    }
    for line in &diff.to_add {
        gateway.create_bom_line(parent_id, line)?;
    }
    Ok(())
}

/// Find-or-create a rack, row, or top item and sync its BOM against `desired`.
fn find_or_create_and_sync(
    gateway: &dyn PlmGateway,
    number: &str,
    name: &str,
    category: Option<&str>,
    description: Option<&str>,
    desired: Vec<BomLine>,
) -> Result<(Item, bool, String)> {
    let (item, created) = match gateway.find_item_by_number(number)? {
        Some(item) => (item, false),
        None => (gateway.create_item(number, name, category, description)?, true),
    };

    let remote = if created { Vec::new() } else { gateway.get_bom_lines(&item.id)? };
    let diff = diff_bom(&desired, &remote);
    apply_diff(gateway, &item.id, &diff)?;

    let checksum = compute_checksum(&desired, item.revision.as_deref());
    Ok((item, created, checksum))
}

/// A push that failed after at least some writes succeeded. Carries the
/// [`CreationContext`] built up to the point of failure so the caller can
/// offer it to [`rollback`] rather than leaving orphaned items behind.
#[derive(Debug, Clone, PartialEq)]
pub struct PushError {
    pub source: PlmError,
    pub context: CreationContext,
}

impl std::fmt::Display for PushError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} item(s) created before failure)", self.source, self.context.len())
    }
}

impl std::error::Error for PushError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Execute the three-phase push: leaves (racks), then rows (level 1), then
/// top (level 0). Returns the creation context and per-entity results on
/// success; on the first error after at least one successful creation, the
/// partially-built [`CreationContext`] is returned inside [`PushError`] so
/// the caller can still offer it to [`rollback`].
pub fn run_push(
    gateway: &dyn PlmGateway,
    grid: &GridInput,
    racks: &BTreeMap<String, RackInput>,
    position_attribute: Option<&PositionAttributeConfig>,
    top: &TopInput,
) -> std::result::Result<PushOutcome, PushError> {
    let mut context = CreationContext::new();
    let mut events = Vec::new();
    let mut rack_results: Vec<RackPushResult> = Vec::new();
    let mut rack_ids: BTreeMap<String, String> = BTreeMap::new();

    let placed = grid.placed_racks();

    // Phase 1: leaves.
    for rack_number in &placed {
        let Some(rack) = racks.get(rack_number) else {
            return Err(PushError {
                source: PlmError::Validation(vec![format!(
                    "rack {rack_number} placed in grid has no configuration sheet"
                )]),
                context,
            });
        };

        let desired = match resolve_lines(gateway, rack_number, &rack.children) {
            Ok(desired) => desired,
            Err(source) => return Err(PushError { source, context }),
        };
        let (item, created, checksum) = match find_or_create_and_sync(
            gateway,
            rack_number,
            &rack.name,
            rack.category.as_deref(),
            rack.description.as_deref(),
            desired,
        ) {
            Ok(result) => result,
            Err(source) => return Err(PushError { source, context }),
        };

        if created {
            context.append(CreationKind::Leaf, rack_number.clone(), item.id.clone());
            events.push(HistoryEvent {
                timestamp: Utc::now(),
                rack_number: rack_number.clone(),
                event: plm_sync_types::EventKind::RackCreated,
                actor: None,
                summary: format!("Rack {rack_number} created"),
                details: None,
                link: None,
            });
        }
        events.push(HistoryEvent {
            timestamp: Utc::now(),
            rack_number: rack_number.clone(),
            event: plm_sync_types::EventKind::StatusChange { before: rack.status, after: SyncStatus::Synced },
            actor: None,
            summary: format!("Rack {rack_number} BOM pushed"),
            details: None,
            link: None,
        });

        rack_ids.insert(rack_number.clone(), item.id.clone());
        rack_results.push(RackPushResult { number: rack_number.clone(), parent_id: item.id, checksum });
    }

    // Phase 2: rows.
    let mut row_results = Vec::new();
    for row in &grid.rows {
        let mut counts: BTreeMap<String, (u32, Vec<usize>)> = BTreeMap::new();
        for (rack_number, position) in &row.placements {
            let entry = counts.entry(rack_number.clone()).or_insert((0, Vec::new()));
            entry.0 += 1;
            entry.1.push(*position);
        }

        let mut desired = Vec::new();
        for (rack_number, (count, positions)) in &counts {
            let Some(rack_id) = rack_ids.get(rack_number) else {
                return Err(PushError {
                    source: PlmError::Validation(vec![format!(
                        "row {} references rack {rack_number} with no resolved item id",
                        row.row_name
                    )]),
                    context,
                });
            };
            let mut attributes = BTreeMap::new();
            if let Some(attr) = position_attribute {
                let label = positions.iter().map(|p| format!("Pos {p}")).collect::<Vec<_>>().join(", ");
                attributes.insert(attr.attribute_id.clone(), label);
            }
            desired.push(BomLine {
                line_id: None,
                child_id: rack_id.clone(),
                child_number: rack_number.clone(),
                quantity: *count,
                level: 1,
                line_number: None,
                attributes,
            });
        }

        let item = match gateway.create_item(&row.row_name, &row.row_name, row.category.as_deref(), None) {
            Ok(item) => item,
            Err(source) => return Err(PushError { source, context }),
        };
        context.append(CreationKind::Row, row.row_name.clone(), item.id.clone());
        let diff = diff_bom(&desired, &[]);
        if let Err(source) = apply_diff(gateway, &item.id, &diff) {
            return Err(PushError { source, context });
        }

        row_results.push(RowPushResult { row_name: row.row_name.clone(), parent_id: item.id });
    }

    // Phase 3: top.
    let top_item = match gateway.create_item(&top.number, &top.name, top.category.as_deref(), top.description.as_deref()) {
        Ok(item) => item,
        Err(source) => return Err(PushError { source, context }),
    };
    context.append(CreationKind::Top, top.number.clone(), top_item.id.clone());
    let top_desired: Vec<BomLine> = row_results
        .iter()
        .map(|row| BomLine {
            line_id: None,
            child_id: row.parent_id.clone(),
            child_number: row.row_name.clone(),
            quantity: 1,
            level: 0,
            line_number: None,
            attributes: Default::default(),
        })
        .collect();
    let top_diff = diff_bom(&top_desired, &[]);
    if let Err(source) = apply_diff(gateway, &top_item.id, &top_diff) {
        return Err(PushError { source, context });
    }
    events.push(HistoryEvent {
        timestamp: Utc::now(),
        rack_number: top.number.clone(),
        event: plm_sync_types::EventKind::TopPush,
        actor: None,
        summary: format!("Top assembly {} pushed with {} rows", top.number, row_results.len()),
        details: None,
        link: None,
    });

    Ok(PushOutcome { context, racks: rack_results, rows: row_results, top_id: top_item.id, events })
}

/// Outcome of a rollback attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RollbackReport {
    pub attempted: usize,
    pub succeeded: usize,
}

/// Delete every entry in `context`, in reverse-creation order (top → rows →
/// leaves), tolerating individual failures. A 404 during deletion counts as
/// success — the item is already gone, which is the desired end state.
///
/// Returns `Err(PlmError::Partial { .. })` if any deletion failed for a
/// reason other than "already gone", surfaced as a `Partial` error.
pub fn rollback(gateway: &dyn PlmGateway, context: &CreationContext) -> Result<RollbackReport> {
    let mut succeeded = 0;
    let mut attempted = 0;

    for entry in context.rollback_order() {
        attempted += 1;
        match gateway.delete_item(&entry.opaque_id) {
            Ok(()) => succeeded += 1,
            Err(PlmError::NotFound(_)) => succeeded += 1,
            Err(_) => {}
        }
    }

    if succeeded == attempted {
        Ok(RollbackReport { attempted, succeeded })
    } else {
        Err(PlmError::Partial { succeeded, attempted })
    }
}
