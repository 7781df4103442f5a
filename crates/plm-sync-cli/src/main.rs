//! Command-line entry point for plm-sync.
//!
//! Talks to the same engine, client, and cache crates a hosted spreadsheet
//! add-in would: the workbook is a JSON project file on disk instead of a
//! live spreadsheet, and progress goes to stderr instead of a status pane.

mod project;
mod reporter;
mod sheets;

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use plm_sync_auth::resolve_credentials;
use plm_sync_cache::ItemCache;
use plm_sync_client::ArenaClient;
use plm_sync_config::{load_config, UserConfig};
use plm_sync_engine::consolidation::{consolidate, indent_for_level};
use plm_sync_engine::diff::diff_bom;
use plm_sync_engine::push::{resolve_lines, rollback, run_preflight, run_push, PlmGateway};
use plm_sync_engine::status::{batch_check, compute_checksum, has_local_edit, BatchCheckInput};
use plm_sync_events::{reconcile_summary, repair_summary, ChangeHistoryLog};
use plm_sync_types::{BomDiff, CacheEntry, SyncStatus};

use project::ProjectFile;
use reporter::{CliReporter, Reporter};

#[derive(Parser, Debug)]
#[command(name = "plm-sync", version, about = "Sync a workbook BOM hierarchy against a PLM workspace")]
struct Cli {
    /// Path to the workbook project file (JSON).
    #[arg(long, default_value = "workbook.json")]
    workbook: PathBuf,

    /// Directory for the item cache and change history log.
    #[arg(long, default_value = ".plm-sync")]
    state_dir: PathBuf,

    /// Directory credentials are resolved from (defaults to the platform config dir).
    #[arg(long)]
    config_home: Option<PathBuf>,

    /// Name of the overview grid sheet.
    #[arg(long, default_value = "Grid")]
    grid_sheet: String,

    /// How long a session token is trusted before a fresh login is forced,
    /// e.g. "6h" or "30m".
    #[arg(long, value_parser = parse_duration, default_value = "6h")]
    session_ttl: Duration,

    #[command(subcommand)]
    cmd: Commands,
}

fn parse_duration(s: &str) -> Result<Duration> {
    humantime::parse_duration(s).with_context(|| format!("invalid duration: {s}"))
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the grid and every placed rack's sheet with zero writes.
    Preflight,
    /// Push the grid and every placed rack's BOM to the PLM.
    Push {
        /// Roll back automatically if the push fails partway through, with no prompt.
        #[arg(long)]
        auto_rollback: bool,
    },
    /// Recompute sync status for every rack placed on the grid.
    Status,
    /// Flatten the grid into a single consolidated, quantity-multiplied BOM.
    Consolidate,
    /// Rebuild the local item cache from a full paginated pull.
    CacheRefresh,
    /// Drop a single cached item by number, forcing a fresh lookup next time.
    CacheInvalidate { number: String },
    /// Compare the change history summary against the racks placed on the grid.
    HistoryReconcile {
        /// Add placeholder rows for missing racks and drop orphaned ones.
        #[arg(long)]
        repair: bool,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let mut reporter = CliReporter;

    match &cli.cmd {
        Commands::Preflight => cmd_preflight(&cli, &mut reporter),
        Commands::Push { auto_rollback } => cmd_push(&cli, *auto_rollback, &mut reporter),
        Commands::Status => cmd_status(&cli),
        Commands::Consolidate => cmd_consolidate(&cli),
        Commands::CacheRefresh => cmd_cache_refresh(&cli, &mut reporter),
        Commands::CacheInvalidate { number } => cmd_cache_invalidate(&cli, number, &mut reporter),
        Commands::HistoryReconcile { repair } => cmd_history_reconcile(&cli, *repair, &mut reporter),
    }
}

fn build_client(cli: &Cli) -> Result<ArenaClient> {
    let credentials =
        resolve_credentials(cli.config_home.as_deref()).context("resolving PLM credentials")?;
    let client = ArenaClient::new(credentials, cli.state_dir.join("cache"))
        .context("building PLM client")?;
    Ok(client.with_session_ttl(cli.session_ttl))
}

fn load_cli_config(cli: &Cli) -> Result<UserConfig> {
    let dir = cli
        .workbook
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
    load_config(dir).context("loading plm-sync configuration")
}

fn cmd_preflight(cli: &Cli, reporter: &mut dyn Reporter) -> Result<()> {
    let client = build_client(cli)?;
    let config = load_cli_config(cli)?;
    let project = ProjectFile::load(&cli.workbook)?;

    let grid = sheets::load_grid(&project.workbook, &cli.grid_sheet)?;
    let racks = sheets::load_all_racks(&project.workbook, &grid);

    let report = run_preflight(&client, &grid, &racks, config.position_attribute.as_ref());
    for warning in &report.warnings {
        reporter.warn(warning);
    }
    for error in &report.errors {
        reporter.error(error);
    }
    if report.is_ok() {
        reporter.info("preflight passed, ready to push");
        Ok(())
    } else {
        anyhow::bail!("preflight failed with {} error(s)", report.errors.len());
    }
}

fn prompt_yes_no(prompt: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush().ok();
    let mut line = String::new();
    std::io::stdin().read_line(&mut line).context("reading confirmation from stdin")?;
    Ok(matches!(line.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn cmd_push(cli: &Cli, auto_rollback: bool, reporter: &mut dyn Reporter) -> Result<()> {
    let client = build_client(cli)?;
    let config = load_cli_config(cli)?;
    let mut project = ProjectFile::load(&cli.workbook)?;

    let grid = sheets::load_grid(&project.workbook, &cli.grid_sheet)?;
    let racks = sheets::load_all_racks(&project.workbook, &grid);
    let top = sheets::load_top(&project.workbook)?;
    let position_attribute = config.position_attribute.as_ref();

    let preflight = run_preflight(&client, &grid, &racks, position_attribute);
    if !preflight.is_ok() {
        for error in &preflight.errors {
            reporter.error(error);
        }
        anyhow::bail!("preflight failed, push aborted");
    }
    for warning in &preflight.warnings {
        reporter.warn(warning);
    }

    match run_push(&client, &grid, &racks, position_attribute, &top) {
        Ok(outcome) => {
            for rack_result in &outcome.racks {
                sheets::write_rack_status(
                    &mut project.workbook,
                    &rack_result.number,
                    SyncStatus::Synced,
                    &rack_result.parent_id,
                    &rack_result.checksum,
                )?;
            }
            project.save().context("saving workbook project file")?;

            let mut log = ChangeHistoryLog::load(&cli.state_dir).context("loading change history log")?;
            for event in &outcome.events {
                log.record(event.clone());
            }
            log.save(&cli.state_dir).context("saving change history log")?;
            client.flush_cache().context("flushing item cache")?;

            reporter.info(&format!(
                "push complete: {} rack(s), {} row(s), top assembly {}",
                outcome.racks.len(),
                outcome.rows.len(),
                outcome.top_id
            ));
            Ok(())
        }
        Err(failure) => {
            reporter.error(&format!("push failed: {failure}"));
            let should_rollback = if failure.context.is_empty() {
                false
            } else if auto_rollback {
                true
            } else {
                prompt_yes_no(&format!(
                    "{} item(s) were created before the failure. Roll back now? [y/N] ",
                    failure.context.len()
                ))?
            };

            if should_rollback {
                let report = rollback(&client, &failure.context).context("rolling back partial push")?;
                reporter.info(&format!("rollback: {}/{} deletion(s) succeeded", report.succeeded, report.attempted));
            } else if !failure.context.is_empty() {
                reporter.warn(&format!(
                    "{} item(s) left in the PLM from this push; rerun with --auto-rollback or roll back manually",
                    failure.context.len()
                ));
            }
            anyhow::bail!("{failure}")
        }
    }
}

fn cmd_status(cli: &Cli) -> Result<()> {
    let client = build_client(cli)?;
    let project = ProjectFile::load(&cli.workbook)?;
    let grid = sheets::load_grid(&project.workbook, &cli.grid_sheet)?;
    let racks = sheets::load_all_racks(&project.workbook, &grid);

    struct RackStatusCtx {
        number: String,
        current: SyncStatus,
        parent_id: Option<String>,
        local_edit: bool,
        diff: Option<BomDiff>,
    }

    let mut ctxs = Vec::new();
    for (number, rack) in &racks {
        let mut diff = None;
        let mut local_edit = false;
        if let Some(parent_id) = &rack.parent_id {
            let desired = resolve_lines(&client, number, &rack.children)
                .with_context(|| format!("resolving children for rack {number}"))?;
            let remote = PlmGateway::get_bom_lines(&client, parent_id)
                .with_context(|| format!("fetching remote BOM for rack {number}"))?;
            let revision = client.get_item(parent_id).ok().and_then(|item| item.revision);
            let current_checksum = compute_checksum(&desired, revision.as_deref());
            let stored_checksum = sheets::load_rack_checksum(&project.workbook, number);
            local_edit = has_local_edit(stored_checksum.as_deref(), &current_checksum);
            diff = Some(diff_bom(&desired, &remote));
        }
        ctxs.push(RackStatusCtx { number: number.clone(), current: rack.status, parent_id: rack.parent_id.clone(), local_edit, diff });
    }

    let inputs: Vec<BatchCheckInput<'_>> = ctxs
        .iter()
        .map(|c| BatchCheckInput {
            rack_number: c.number.clone(),
            current: c.current,
            parent_id: c.parent_id.clone(),
            local_edit: c.local_edit,
            remote_diff: c.diff.as_ref(),
        })
        .collect();

    for (number, status) in batch_check(&inputs) {
        println!("{number}\t{status:?}");
    }
    Ok(())
}

fn cmd_consolidate(cli: &Cli) -> Result<()> {
    let config = load_cli_config(cli)?;
    let project = ProjectFile::load(&cli.workbook)?;
    let grid = sheets::load_grid(&project.workbook, &cli.grid_sheet)?;
    let racks = sheets::load_all_racks(&project.workbook, &grid);
    let placements = sheets::grid_placements(&grid);
    let rack_children = sheets::rack_children_map(&racks);

    let cache: BTreeMap<String, CacheEntry> = match ItemCache::open(cli.state_dir.join("cache")) {
        Ok(item_cache) => item_cache.iter().map(|entry| (entry.number.clone(), entry.clone())).collect(),
        Err(_) => BTreeMap::new(),
    };

    let (lines, summary) = consolidate(&cli.grid_sheet, &placements, &rack_children, &cache, &config);
    println!("{} unique item(s) across {} rack placement(s)", summary.total_unique_items, summary.total_rack_placements);
    for line in &lines {
        println!("{}{} x{}", indent_for_level(line.level), line.child_number, line.quantity);
    }
    Ok(())
}

fn cmd_cache_refresh(cli: &Cli, reporter: &mut dyn Reporter) -> Result<()> {
    let client = build_client(cli)?;
    client.refresh_cache().context("refreshing item cache")?;
    reporter.info("item cache refreshed");
    Ok(())
}

fn cmd_cache_invalidate(cli: &Cli, number: &str, reporter: &mut dyn Reporter) -> Result<()> {
    let mut cache = ItemCache::open(cli.state_dir.join("cache")).context("opening item cache")?;
    cache.invalidate(number).context("invalidating cache entry")?;
    cache.save().context("saving item cache")?;
    reporter.info(&format!("invalidated {number}"));
    Ok(())
}

fn cmd_history_reconcile(cli: &Cli, repair: bool, reporter: &mut dyn Reporter) -> Result<()> {
    let project = ProjectFile::load(&cli.workbook)?;
    let grid = sheets::load_grid(&project.workbook, &cli.grid_sheet)?;
    let rack_numbers: Vec<String> = grid.placed_racks().into_iter().collect();

    let mut log = ChangeHistoryLog::load(&cli.state_dir).context("loading change history log")?;
    let report = reconcile_summary(&log, &rack_numbers);
    if report.is_clean() {
        reporter.info("change history summary matches the grid");
        return Ok(());
    }

    for missing in &report.missing_summary {
        reporter.warn(&format!("rack {missing} is on the grid but has no summary row"));
    }
    for orphan in &report.orphan_summary {
        reporter.warn(&format!("summary row {orphan} has no matching rack on the grid"));
    }

    if repair {
        repair_summary(&mut log, &rack_numbers, chrono::Utc::now());
        log.save(&cli.state_dir).context("saving repaired change history log")?;
        reporter.info("change history summary repaired");
    } else {
        anyhow::bail!("change history summary is out of sync; rerun with --repair to fix it");
    }
    Ok(())
}
