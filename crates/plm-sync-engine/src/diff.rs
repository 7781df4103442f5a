//! BOM diff engine.
//!
//! Diffing is always keyed on `child_id`, the resolved opaque id — never on
//! `child_number`. Renaming an item server-side must never look like a
//! remove-then-add to this engine.

use std::collections::BTreeMap;

use plm_sync_types::{BomDiff, BomLine};

/// Diff a local (desired) BOM against the remote (current) BOM for one parent.
///
/// `local` and `remote` need not be sorted or deduplicated by caller; only
/// the first line seen per `child_id` on each side is considered, matching
/// a single-quantity-per-child BOM model.
pub fn diff_bom(local: &[BomLine], remote: &[BomLine]) -> BomDiff {
    let mut remote_by_child: BTreeMap<&str, &BomLine> = BTreeMap::new();
    for line in remote {
        remote_by_child.entry(line.child_id.as_str()).or_insert(line);
    }

    let mut local_children: std::collections::BTreeSet<&str> = std::collections::BTreeSet::new();
    let mut to_add = Vec::new();
    let mut to_update = Vec::new();

    for line in local {
        local_children.insert(line.child_id.as_str());
        match remote_by_child.get(line.child_id.as_str()) {
            Some(remote_line) => {
                if remote_line.quantity != line.quantity {
                    // The PUT target is the remote line id — the desired line
                    // coming out of the grid/sheet never carries one.
                    let mut updated = line.clone();
                    updated.line_id = remote_line.line_id.clone();
                    to_update.push((updated, remote_line.quantity));
                }
            }
            None => to_add.push(line.clone()),
        }
    }

    let to_remove: Vec<BomLine> = remote
        .iter()
        .filter(|line| !local_children.contains(line.child_id.as_str()))
        .cloned()
        .collect();

    BomDiff { to_add, to_update, to_remove, revision_changed: None }
}

/// Compare a parent's local and remote revision labels. Display-only: a
/// mismatch here never blocks a push.
pub fn diff_revision(local_revision: Option<&str>, remote_revision: Option<&str>) -> Option<(String, String)> {
    match (local_revision, remote_revision) {
        (Some(local), Some(remote)) if local != remote => Some((local.to_string(), remote.to_string())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(child_id: &str, child_number: &str, quantity: u32) -> BomLine {
        BomLine {
            line_id: Some(format!("bl-{child_id}")),
            child_id: child_id.to_string(),
            child_number: child_number.to_string(),
            quantity,
            level: 1,
            line_number: None,
            attributes: Default::default(),
        }
    }

    #[test]
    fn new_local_line_is_added() {
        let local = vec![line("itm-1", "CABLE-1", 2)];
        let diff = diff_bom(&local, &[]);
        assert_eq!(diff.to_add.len(), 1);
        assert!(diff.to_update.is_empty());
        assert!(diff.to_remove.is_empty());
    }

    #[test]
    fn missing_remote_line_is_removed() {
        let remote = vec![line("itm-1", "CABLE-1", 2)];
        let diff = diff_bom(&[], &remote);
        assert_eq!(diff.to_remove.len(), 1);
    }

    #[test]
    fn quantity_change_is_an_update_not_add_remove() {
        let local = vec![line("itm-1", "CABLE-1", 4)];
        let remote = vec![line("itm-1", "CABLE-1", 2)];
        let diff = diff_bom(&local, &remote);
        assert!(diff.to_add.is_empty());
        assert!(diff.to_remove.is_empty());
        assert_eq!(diff.to_update, vec![(local[0].clone(), 2)]);
    }

    #[test]
    fn matching_quantity_is_a_no_op() {
        let local = vec![line("itm-1", "CABLE-1", 2)];
        let remote = vec![line("itm-1", "CABLE-1", 2)];
        assert!(diff_bom(&local, &remote).is_empty());
    }

    #[test]
    fn rename_via_child_number_does_not_churn_diff() {
        // Same child_id, different child_number: must be a no-op, not remove+add.
        let local = vec![line("itm-1", "CABLE-1-RENAMED", 2)];
        let remote = vec![line("itm-1", "CABLE-1", 2)];
        assert!(diff_bom(&local, &remote).is_empty());
    }

    #[test]
    fn update_adopts_remote_line_id_when_local_has_none() {
        // Desired lines built fresh from a rack sheet never carry a line id;
        // only the remote side knows it. The PUT target must come from there.
        let local = vec![BomLine { line_id: None, ..line("itm-1", "CABLE-1", 5) }];
        let remote = vec![line("itm-1", "CABLE-1", 2)];
        let diff = diff_bom(&local, &remote);
        assert_eq!(diff.to_update.len(), 1);
        assert_eq!(diff.to_update[0].0.line_id, remote[0].line_id);
        assert_eq!(diff.to_update[0].0.quantity, 5);
        assert_eq!(diff.to_update[0].1, 2);
    }

    #[test]
    fn revision_mismatch_is_display_only() {
        assert_eq!(diff_revision(Some("A"), Some("B")), Some(("A".to_string(), "B".to_string())));
        assert_eq!(diff_revision(Some("A"), Some("A")), None);
        assert_eq!(diff_revision(None, Some("B")), None);
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    fn child_id_strategy() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9]{0,7}".prop_map(|s| s.to_string())
    }

    fn line_strategy() -> impl Strategy<Value = BomLine> {
        (child_id_strategy(), 1u32..500).prop_map(|(child_id, quantity)| BomLine {
            line_id: Some(format!("bl-{child_id}")),
            child_number: child_id.to_uppercase(),
            child_id,
            quantity,
            level: 1,
            line_number: None,
            attributes: Default::default(),
        })
    }

    fn bom_strategy() -> impl Strategy<Value = Vec<BomLine>> {
        prop::collection::vec(line_strategy(), 0..8).prop_map(|lines| {
            // Dedup by child_id, keeping the first occurrence, mirroring
            // diff_bom's own single-quantity-per-child assumption.
            let mut seen = std::collections::BTreeSet::new();
            lines.into_iter().filter(|l| seen.insert(l.child_id.clone())).collect()
        })
    }

    proptest! {
        /// Diffing a BOM against itself always yields a no-op, regardless of
        /// line_id noise or ordering.
        #[test]
        fn diffing_identical_boms_is_empty(lines in bom_strategy()) {
            let diff = diff_bom(&lines, &lines);
            prop_assert!(diff.is_empty());
        }

        /// Every child present locally but absent remotely ends up in
        /// `to_add`, and every child present remotely but absent locally
        /// ends up in `to_remove` — the three buckets partition the two
        /// input sets by child_id membership with no overlap.
        #[test]
        fn add_and_remove_partition_by_child_id(local in bom_strategy(), remote in bom_strategy()) {
            let diff = diff_bom(&local, &remote);

            let remote_ids: std::collections::BTreeSet<&str> =
                remote.iter().map(|l| l.child_id.as_str()).collect();
            let local_ids: std::collections::BTreeSet<&str> =
                local.iter().map(|l| l.child_id.as_str()).collect();

            for added in &diff.to_add {
                prop_assert!(!remote_ids.contains(added.child_id.as_str()));
            }
            for removed in &diff.to_remove {
                prop_assert!(!local_ids.contains(removed.child_id.as_str()));
            }
            for (updated, _) in &diff.to_update {
                prop_assert!(local_ids.contains(updated.child_id.as_str()));
                prop_assert!(remote_ids.contains(updated.child_id.as_str()));
            }
        }

        /// Swapping local and remote swaps to_add and to_remove (modulo the
        /// line_id adoption on updates, which is asymmetric by design).
        #[test]
        fn swapping_sides_swaps_add_and_remove(local in bom_strategy(), remote in bom_strategy()) {
            let forward = diff_bom(&local, &remote);
            let backward = diff_bom(&remote, &local);

            let forward_add_ids: std::collections::BTreeSet<&str> =
                forward.to_add.iter().map(|l| l.child_id.as_str()).collect();
            let backward_remove_ids: std::collections::BTreeSet<&str> =
                backward.to_remove.iter().map(|l| l.child_id.as_str()).collect();
            prop_assert_eq!(forward_add_ids, backward_remove_ids);
        }
    }
}
