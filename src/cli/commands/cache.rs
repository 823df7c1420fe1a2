//! Cache command - inspect and clean the build cache

use crate::cache::{
    format_bytes, parse_fingerprint, BuildState, CacheCoordinator, CacheEntrySummary, EntryState,
};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::cli::commands::open_cache;
use crate::config::Config;
use crate::error::VendResult;
use crate::ui::{self, UiContext};
use chrono::Utc;
use console::style;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> VendResult<()> {
    let coordinator = open_cache(config).await?;

    match args.action {
        CacheAction::List { format } => list_entries(&coordinator, format).await,
        CacheAction::Show { fingerprint } => show_entry(&coordinator, &fingerprint).await,
        CacheAction::Gc { dry_run } => collect(&coordinator, dry_run).await,
    }
}

/// List every fingerprint in the store
async fn list_entries(coordinator: &CacheCoordinator, format: OutputFormat) -> VendResult<()> {
    let entries = coordinator.list_entries().await?;

    if entries.is_empty() && !matches!(format, OutputFormat::Json) {
        println!("No builds found.");
        return Ok(());
    }

    match format {
        OutputFormat::Table => print_table(&entries),
        OutputFormat::Json => print_json(&entries)?,
        OutputFormat::Plain => {
            for entry in &entries {
                println!("{}", entry.fingerprint);
            }
        }
    }

    Ok(())
}

fn print_table(entries: &[CacheEntrySummary]) {
    println!(
        "{:<34} {:<12} {:>8} {:>10} {:<18}",
        "FINGERPRINT", "STATE", "WHEELS", "SIZE", "MODIFIED"
    );
    println!("{}", "-".repeat(86));

    for entry in entries {
        let state = entry.state.to_string();
        let state_display = match entry.state {
            EntryState::Ready => style(format!("{:<12}", state)).green().to_string(),
            EntryState::Building => style(format!("{:<12}", state)).yellow().to_string(),
            EntryState::Stale | EntryState::Incomplete => {
                style(format!("{:<12}", state)).dim().to_string()
            }
        };

        println!(
            "{:<34} {} {:>8} {:>10} {:<18}",
            entry.fingerprint,
            state_display,
            entry.artifacts,
            format_bytes(entry.size),
            entry.last_modified.format("%Y-%m-%d %H:%M")
        );
    }

    let total: u64 = entries.iter().map(|e| e.size).sum();
    println!();
    println!("Total: {} build(s), {}", entries.len(), format_bytes(total));
}

fn print_json(entries: &[CacheEntrySummary]) -> VendResult<()> {
    #[derive(serde::Serialize)]
    struct EntryJson {
        fingerprint: String,
        state: String,
        artifacts: usize,
        size: u64,
        last_modified: String,
    }

    let json_entries: Vec<EntryJson> = entries
        .iter()
        .map(|e| EntryJson {
            fingerprint: e.fingerprint.to_string(),
            state: e.state.to_string(),
            artifacts: e.artifacts,
            size: e.size,
            last_modified: e.last_modified.to_rfc3339(),
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&json_entries)?);
    Ok(())
}

/// Show one fingerprint's state, manifest or reservation
async fn show_entry(coordinator: &CacheCoordinator, raw: &str) -> VendResult<()> {
    let ctx = UiContext::detect();
    let fp = parse_fingerprint(raw)?;
    let now = Utc::now();

    ui::key_value(&ctx, "Fingerprint", fp.as_str());

    match coordinator.inspect(&fp).await? {
        BuildState::Ready(manifest) => {
            ui::key_value(&ctx, "State", "ready");
            ui::key_value(&ctx, "Runtime", manifest.runtime.tag());
            ui::key_value(
                &ctx,
                "Built",
                &manifest.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            );
            ui::key_value(
                &ctx,
                "Location",
                &coordinator
                    .store()
                    .location(&coordinator.layout().build_prefix(&fp)),
            );
            ui::key_value(&ctx, "Size", &format_bytes(manifest.total_size()));

            ui::section(&ctx, "Requested");
            for req in &manifest.requirements {
                ui::remark(&ctx, req);
            }
            ui::section(&ctx, "Wheels");
            for artifact in &manifest.artifacts {
                ui::step_ok(&ctx, artifact.file_name());
            }
        }
        BuildState::Reserved(reservation) => {
            let stale = reservation.is_stale(now, coordinator.grace());
            ui::key_value(&ctx, "State", if stale { "stale" } else { "building" });
            ui::key_value(&ctx, "Owner", &reservation.owner.to_string());
            ui::key_value(
                &ctx,
                "Age",
                &format!("{}s", reservation.age(now).as_secs()),
            );
            ui::key_value(
                &ctx,
                "Reclaimable after",
                &reservation
                    .expires_at(coordinator.grace())
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string(),
            );
        }
        BuildState::Absent => {
            ui::key_value(&ctx, "State", "absent");
        }
    }

    if let Some(marker) = coordinator.read_failure(&fp).await? {
        ui::section(&ctx, "Last failure");
        ui::step_error_detail(
            &ctx,
            &marker.failed_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            &marker.summary,
        );
        for line in marker.diagnostic.lines() {
            ui::remark(&ctx, line);
        }
    }

    Ok(())
}

/// Remove leftovers of finished and abandoned builds
async fn collect(coordinator: &CacheCoordinator, dry_run: bool) -> VendResult<()> {
    let ctx = UiContext::detect();
    let report = coordinator.collect_garbage(dry_run).await?;

    if report.deleted_keys.is_empty() {
        ui::step_ok(&ctx, "Nothing to collect");
        return Ok(());
    }

    for key in &report.deleted_keys {
        if dry_run {
            ui::remark(&ctx, &format!("would remove {}", key));
        } else {
            ui::remark(&ctx, &format!("removed {}", key));
        }
    }

    let verb = if dry_run { "Would reclaim" } else { "Reclaimed" };
    ui::step_ok(
        &ctx,
        &format!(
            "{} {} from {} object(s), {} abandoned build(s)",
            verb,
            format_bytes(report.reclaimed_bytes),
            report.deleted_keys.len(),
            report.abandoned_builds
        ),
    );
    Ok(())
}
