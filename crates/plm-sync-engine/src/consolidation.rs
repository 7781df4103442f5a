//! Consolidation engine.
//!
//! Scans the grid sheet once, counts how many times each rack is placed,
//! then for each distinct rack multiplies its own child lines by that count
//! and accumulates into a single flat, level-annotated BOM. The grid places
//! racks only — a rack's children are plain components, never further grid
//! placements — so there is no recursion and no cycle to guard against.

use std::collections::BTreeMap;

use plm_sync_config::UserConfig;
use plm_sync_types::{CacheEntry, ConsolidatedLine, GridPlacement};

/// Parse a quantity cell per spec.md §4.7: negative or non-numeric values are
/// treated as 1, with a warning pushed to `warnings`.
pub fn parse_quantity_cell(raw: &str, context: &str, warnings: &mut Vec<String>) -> u32 {
    match raw.trim().parse::<i64>() {
        Ok(n) if n > 0 => n as u32,
        Ok(_) => {
            warnings.push(format!("{context}: quantity {raw:?} is not positive, treating as 1"));
            1
        }
        Err(_) => {
            warnings.push(format!("{context}: quantity {raw:?} is not numeric, treating as 1"));
            1
        }
    }
}

/// Summary header emitted alongside the flattened lines.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConsolidationSummary {
    pub source_grid: String,
    pub total_unique_items: usize,
    pub total_rack_placements: u32,
}

/// Consolidate a grid of rack placements into flattened BOM lines.
///
/// `grid` is every non-empty cell of the overview grid, each resolved to a
/// rack number. `rack_children` gives each distinct rack's own BOM lines, as
/// `(child_number, quantity)` pairs read from its configuration sheet. `cache`
/// resolves a child or rack number to its item record for category lookup;
/// entries absent from the cache fall back to the configured leaf level.
///
/// The racks themselves are included in the output at their placement count,
/// alongside their accumulated children — matching a grid-consolidation view
/// that shows both "how many of this rack are placed" and "how many of this
/// part are needed across all of them".
pub fn consolidate(
    source_grid: &str,
    grid: &[GridPlacement],
    rack_children: &BTreeMap<String, Vec<(String, u32)>>,
    cache: &BTreeMap<String, CacheEntry>,
    config: &UserConfig,
) -> (Vec<ConsolidatedLine>, ConsolidationSummary) {
    let mut counts: BTreeMap<String, u32> = BTreeMap::new();
    for placement in grid {
        *counts.entry(placement.rack_number.clone()).or_insert(0) += 1;
    }

    let mut merged: BTreeMap<String, u32> = BTreeMap::new();
    for (rack_number, count) in &counts {
        *merged.entry(rack_number.clone()).or_insert(0) += count;
        if let Some(children) = rack_children.get(rack_number) {
            for (child_number, quantity) in children {
                *merged.entry(child_number.clone()).or_insert(0) += quantity * count;
            }
        }
    }

    let total_rack_placements: u32 = counts.values().sum();

    let mut lines: Vec<ConsolidatedLine> = merged
        .into_iter()
        .map(|(child_number, quantity)| {
            let category = cache.get(&child_number).and_then(|e| e.category_name.clone());
            let level = category
                .as_deref()
                .map(|c| config.level_for_category(c))
                .unwrap_or(config.bom_levels.leaf_level);
            ConsolidatedLine { child_number, quantity, level, category }
        })
        .collect();

    lines.sort_by(|a, b| {
        a.level
            .cmp(&b.level)
            .then_with(|| a.category.cmp(&b.category))
            .then_with(|| a.child_number.cmp(&b.child_number))
    });

    let summary = ConsolidationSummary {
        source_grid: source_grid.to_string(),
        total_unique_items: lines.len(),
        total_rack_placements,
    };

    (lines, summary)
}

/// Render a consolidated line's display indent: two spaces per level below
/// the root.
pub fn indent_for_level(level: u32) -> String {
    " ".repeat((2 * level) as usize)
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// `parse_quantity_cell` never panics and always returns a positive
        /// quantity, for arbitrary input text.
        #[test]
        fn parse_quantity_cell_is_always_positive(raw in "\\PC{0,12}") {
            let mut warnings = Vec::new();
            let qty = parse_quantity_cell(&raw, "ctx", &mut warnings);
            prop_assert!(qty >= 1);
        }

        /// Any positive integer parses back to itself with no warning.
        #[test]
        fn positive_integers_parse_without_warning(n in 1u32..1_000_000) {
            let mut warnings = Vec::new();
            let qty = parse_quantity_cell(&n.to_string(), "ctx", &mut warnings);
            prop_assert_eq!(qty, n);
            prop_assert!(warnings.is_empty());
        }

        /// Consolidation soundness: the total quantity contributed by a rack's
        /// children is always placement_count * per-placement quantity, and
        /// the rack's own consolidated quantity equals its placement count —
        /// regardless of how many distinct racks share the grid.
        #[test]
        fn consolidation_multiplies_children_by_placement_count(
            placements in 1u32..6,
            child_qty in 1u32..20,
        ) {
            let grid: Vec<GridPlacement> = (0..placements)
                .map(|i| GridPlacement { row_index: 0, column_index: i as usize, rack_number: "R1".to_string() })
                .collect();
            let rack_children =
                BTreeMap::from([("R1".to_string(), vec![("CHILD".to_string(), child_qty)])]);
            let cache = BTreeMap::new();
            let config = UserConfig::new();

            let (consolidated, summary) = consolidate("Grid", &grid, &rack_children, &cache, &config);
            let child_line = consolidated.iter().find(|l| l.child_number == "CHILD").unwrap();
            let rack_line = consolidated.iter().find(|l| l.child_number == "R1").unwrap();

            prop_assert_eq!(child_line.quantity, placements * child_qty);
            prop_assert_eq!(rack_line.quantity, placements);
            prop_assert_eq!(summary.total_rack_placements, placements);
        }

        /// Consolidated output is always sorted by (level, category,
        /// child_number), regardless of grid placement order.
        #[test]
        fn consolidated_lines_are_sorted(placements in prop::collection::vec("[A-C]", 1..8)) {
            let grid: Vec<GridPlacement> = placements
                .iter()
                .enumerate()
                .map(|(i, rack)| GridPlacement { row_index: 0, column_index: i, rack_number: rack.clone() })
                .collect();
            let cache = BTreeMap::new();
            let config = UserConfig::new();

            let (consolidated, _) = consolidate("Grid", &grid, &BTreeMap::new(), &cache, &config);
            for pair in consolidated.windows(2) {
                let key = |l: &ConsolidatedLine| (l.level, l.category.clone(), l.child_number.clone());
                prop_assert!(key(&pair[0]) <= key(&pair[1]));
            }
        }
    }
}
