//! Multi-level BOM loader.
//!
//! Two independent ways to reach the same `Vec<TreeNode>` shape. Path A
//! walks the BOM tree breadth-first, one `getBOMLines` call per parent, with
//! each depth-capped wave run concurrently via a `chunks(max_concurrent)` +
//! `thread::scope` wave runner. Path B asks the server to do the walk itself
//! via a bulk export and polls for the result. Callers choose a path;
//! nothing here decides for them.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use plm_sync_client::ArenaClient;
use plm_sync_types::{BomLine, PlmError, Result};
use serde::Deserialize;
use serde_json::{json, Value};

/// Depth cap for the parallel tree walk: it never walks past 10 levels.
pub const MAX_DEPTH: u32 = 10;

/// How many export poll attempts before giving up.
const EXPORT_POLL_MAX_ATTEMPTS: u32 = 40;

/// Delay between export poll attempts.
const EXPORT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// One parent's resolved children, as read from the server, at a given depth.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub parent_id: String,
    pub level: u32,
    pub lines: Vec<BomLine>,
}

/// The one domain operation the parallel tree walk needs. `Sync` so a shared
/// `&dyn BomTreeGateway` can cross `thread::scope`'s boundary.
pub trait BomTreeGateway: Sync {
    fn get_bom_lines(&self, parent_id: &str) -> Result<Vec<BomLine>>;
}

/// Walk the BOM tree breadth-first from `root_id`, fetching each wave's
/// parents concurrently, `max_concurrent` at a time.
///
/// A cycle guard tracks every opaque id seen so far; a child already visited
/// is never re-queued. Depth is additionally capped at [`MAX_DEPTH`], since a
/// long non-cyclic chain would otherwise still run away.
pub fn load_tree_parallel(
    gateway: &(impl BomTreeGateway + ?Sized),
    root_id: &str,
    max_concurrent: usize,
) -> Result<Vec<TreeNode>> {
    let max_concurrent = max_concurrent.max(1);
    let mut nodes = Vec::new();
    let mut frontier = vec![root_id.to_string()];
    let visited = Mutex::new(BTreeSet::from([root_id.to_string()]));
    let mut level = 0;

    while !frontier.is_empty() && level < MAX_DEPTH {
        let mut wave_results: Vec<(String, Result<Vec<BomLine>>)> = Vec::with_capacity(frontier.len());

        for chunk in frontier.chunks(max_concurrent) {
            thread::scope(|scope| {
                let handles: Vec<_> = chunk
                    .iter()
                    .map(|parent_id| {
                        let parent_id = parent_id.clone();
                        scope.spawn(move || {
                            let result = gateway.get_bom_lines(&parent_id);
                            (parent_id, result)
                        })
                    })
                    .collect();
                for handle in handles {
                    wave_results.push(handle.join().expect("BOM fetch thread panicked"));
                }
            });
        }

        let mut next_frontier = Vec::new();
        for (parent_id, result) in wave_results {
            let lines = result?;
            {
                let mut seen = visited.lock().expect("visited lock poisoned");
                for line in &lines {
                    if seen.insert(line.child_id.clone()) {
                        next_frontier.push(line.child_id.clone());
                    }
                }
            }
            nodes.push(TreeNode { parent_id, level, lines });
        }

        frontier = next_frontier;
        level += 1;
    }

    Ok(nodes)
}

/// Run the bulk-export fast path end-to-end: ensure a definition, kick off a
/// run against `root_opaque_id`, poll until terminal, then download and
/// parse the result.
pub fn run_bulk_export(
    client: &ArenaClient,
    persisted_def_id: Option<&str>,
    root_opaque_id: &str,
) -> Result<Vec<TreeNode>> {
    let definition_id = client.ensure_export_definition(persisted_def_id)?;
    let run_id = client.run_bom_export(&definition_id, root_opaque_id)?;

    let mut attempts = 0;
    let status = loop {
        let status = client.get_export_run_status(&definition_id, &run_id)?;
        if status.is_terminal() {
            break status;
        }
        attempts += 1;
        if attempts >= EXPORT_POLL_MAX_ATTEMPTS {
            return Err(PlmError::Transport(format!(
                "export run {run_id} did not complete after {EXPORT_POLL_MAX_ATTEMPTS} polls"
            )));
        }
        thread::sleep(EXPORT_POLL_INTERVAL);
    };

    if status.status != "COMPLETE" {
        return Err(PlmError::Transport(format!("export run {run_id} ended in status {}", status.status)));
    }
    let file_id = status
        .file_id
        .ok_or_else(|| PlmError::Transport("completed export run has no file id".into()))?;

    let payload = client.download_export_file(&definition_id, &run_id, &file_id)?;
    parse_export_payload(&payload)
}

#[derive(Debug, Deserialize)]
struct FlatLine {
    parent_id: String,
    child_id: String,
    child_number: String,
    quantity: u32,
    #[serde(default)]
    level: u32,
    #[serde(default)]
    line_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PerLevelGroup {
    parent_id: String,
    #[serde(default)]
    level: u32,
    lines: Vec<FlatLine>,
}

#[derive(Debug, Deserialize)]
struct PerLevelPayload {
    levels: Vec<PerLevelGroup>,
}

fn flat_line_to_bom_line(line: FlatLine) -> BomLine {
    BomLine {
        line_id: line.line_id,
        child_id: line.child_id,
        child_number: line.child_number,
        quantity: line.quantity,
        level: line.level,
        line_number: None,
        attributes: Default::default(),
    }
}

/// Parse a bulk export payload, auto-detecting which of two documented
/// shapes the server used: a flat array of parent/child lines, or a
/// `{"levels": [...]}` envelope that already groups lines per parent
/// Either shape must be accepted.
pub fn parse_export_payload(value: &Value) -> Result<Vec<TreeNode>> {
    if let Some(levels) = value.get("levels") {
        let payload: PerLevelPayload = serde_json::from_value(json!({ "levels": levels }))
            .map_err(|e| PlmError::Transport(format!("malformed per-level export payload: {e}")))?;
        return Ok(payload
            .levels
            .into_iter()
            .map(|group| TreeNode {
                parent_id: group.parent_id,
                level: group.level,
                lines: group.lines.into_iter().map(flat_line_to_bom_line).collect(),
            })
            .collect());
    }

    let flat: Vec<FlatLine> = serde_json::from_value(value.clone())
        .map_err(|e| PlmError::Transport(format!("malformed flat export payload: {e}")))?;

    let mut by_parent: BTreeMap<(String, u32), Vec<BomLine>> = BTreeMap::new();
    for line in flat {
        let key = (line.parent_id.clone(), line.level);
        by_parent.entry(key).or_default().push(flat_line_to_bom_line(line));
    }

    Ok(by_parent
        .into_iter()
        .map(|((parent_id, level), lines)| TreeNode { parent_id, level, lines })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;

    struct FixtureTree {
        children: Map<String, Vec<BomLine>>,
    }

    impl BomTreeGateway for FixtureTree {
        fn get_bom_lines(&self, parent_id: &str) -> Result<Vec<BomLine>> {
            Ok(self.children.get(parent_id).cloned().unwrap_or_default())
        }
    }

    fn line(child_id: &str, qty: u32) -> BomLine {
        BomLine {
            line_id: Some(format!("bl-{child_id}")),
            child_id: child_id.to_string(),
            child_number: child_id.to_string(),
            quantity: qty,
            level: 0,
            line_number: None,
            attributes: Default::default(),
        }
    }

    #[test]
    fn walks_three_level_tree_breadth_first() {
        let mut children = Map::new();
        children.insert("root".to_string(), vec![line("a", 1), line("b", 2)]);
        children.insert("a".to_string(), vec![line("leaf-1", 3)]);
        children.insert("b".to_string(), vec![line("leaf-2", 4)]);
        let tree = FixtureTree { children };

        let nodes = load_tree_parallel(&tree, "root", 4).expect("walk succeeds");
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].parent_id, "root");
        assert_eq!(nodes[0].level, 0);
        let leaf_levels: BTreeSet<u32> = nodes[1..].iter().map(|n| n.level).collect();
        assert_eq!(leaf_levels, BTreeSet::from([1]));
    }

    #[test]
    fn cycle_does_not_requeue_a_visited_child() {
        let mut children = Map::new();
        children.insert("root".to_string(), vec![line("a", 1)]);
        children.insert("a".to_string(), vec![line("root", 1)]);
        let tree = FixtureTree { children };

        let nodes = load_tree_parallel(&tree, "root", 2).expect("walk succeeds");
        // root and a are each visited exactly once.
        assert_eq!(nodes.iter().filter(|n| n.parent_id == "root").count(), 1);
        assert_eq!(nodes.iter().filter(|n| n.parent_id == "a").count(), 1);
    }

    #[test]
    fn depth_cap_stops_a_long_non_cyclic_chain() {
        let mut children = Map::new();
        for depth in 0..(MAX_DEPTH + 5) {
            children.insert(format!("n{depth}"), vec![line(&format!("n{}", depth + 1), 1)]);
        }
        let tree = FixtureTree { children };

        let nodes = load_tree_parallel(&tree, "n0", 1).expect("walk succeeds");
        assert_eq!(nodes.len() as u32, MAX_DEPTH);
    }

    #[test]
    fn single_fetch_failure_propagates() {
        struct Failing;
        impl BomTreeGateway for Failing {
            fn get_bom_lines(&self, _parent_id: &str) -> Result<Vec<BomLine>> {
                Err(PlmError::Transport("boom".into()))
            }
        }
        let err = load_tree_parallel(&Failing, "root", 2).unwrap_err();
        assert!(matches!(err, PlmError::Transport(_)));
    }

    #[test]
    fn parses_flat_export_payload_grouped_by_parent_and_level() {
        let payload = json!([
            { "parent_id": "p1", "child_id": "c1", "child_number": "C1", "quantity": 2, "level": 1 },
            { "parent_id": "p1", "child_id": "c2", "child_number": "C2", "quantity": 1, "level": 1 },
            { "parent_id": "c1", "child_id": "c3", "child_number": "C3", "quantity": 4, "level": 2 },
        ]);
        let nodes = parse_export_payload(&payload).expect("parses");
        assert_eq!(nodes.len(), 2);
        let p1 = nodes.iter().find(|n| n.parent_id == "p1").expect("p1 present");
        assert_eq!(p1.lines.len(), 2);
    }

    #[test]
    fn parses_per_level_export_payload() {
        let payload = json!({
            "levels": [
                {
                    "parent_id": "p1",
                    "level": 1,
                    "lines": [
                        { "parent_id": "p1", "child_id": "c1", "child_number": "C1", "quantity": 2 }
                    ]
                }
            ]
        });
        let nodes = parse_export_payload(&payload).expect("parses");
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].level, 1);
        assert_eq!(nodes[0].lines[0].quantity, 2);
    }

    #[test]
    fn malformed_payload_is_a_transport_error_not_a_panic() {
        let payload = json!({ "garbage": true });
        let err = parse_export_payload(&payload).unwrap_err();
        assert!(matches!(err, PlmError::Transport(_)));
    }
}
