//! Subcommand handlers.

use std::sync::Arc;

use anyhow::Result;
use ingestor_core::{
    CatalogImporter, ImportOptions, ImportSummary, ProgressSink, SyncReport, TreeSummary,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::context::AppContext;
use super::exit::{ProcessExit, determine_exit_outcome};
use super::progress::TerminalProgress;
use crate::cli::{Command, ImportArgs, ShowArgs, SyncArgs};

pub(crate) async fn dispatch(
    ctx: AppContext,
    command: Command,
    quiet: bool,
    cancel: &CancellationToken,
) -> Result<ProcessExit> {
    let exit = match command {
        Command::Sync(args) => run_sync(&ctx, &args, cancel).await,
        Command::Import(args) => run_import(ctx.importer.clone(), &args, quiet, cancel).await?,
        Command::Show(args) => run_show(&ctx, &args).await?,
    };
    ctx.db.close().await;
    Ok(exit)
}

async fn run_sync(ctx: &AppContext, args: &SyncArgs, cancel: &CancellationToken) -> ProcessExit {
    let report = ctx.sync.ensure_all(args.member, &args.only, cancel).await;
    print_sync_report(&report);
    if report.was_cancelled() {
        return ProcessExit::Failure;
    }
    determine_exit_outcome(report.succeeded(), report.failed())
}

fn print_sync_report(report: &SyncReport) {
    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(validator) => println!(
                "{:<20} ok      fresh until {}",
                outcome.entity,
                validator.expires_at.to_rfc3339()
            ),
            Err(e) => {
                let stale = outcome.last_validator.as_ref().map_or_else(
                    || "never synced".to_string(),
                    |v| format!("last fresh until {}", v.expires_at.to_rfc3339()),
                );
                println!("{:<20} failed  {e} ({stale})", outcome.entity);
            }
        }
    }
    println!(
        "member {}: {} synced, {} failed",
        report.member_id,
        report.succeeded(),
        report.failed()
    );
}

async fn run_import(
    importer: CatalogImporter,
    args: &ImportArgs,
    quiet: bool,
    cancel: &CancellationToken,
) -> Result<ProcessExit> {
    let options = ImportOptions {
        skip_character_tree: args.skip_character_tree,
        skip_inventory_tree: args.skip_inventory_tree,
        skip_location_tree: args.skip_location_tree,
        disable_progress_output: args.no_progress || quiet,
    };
    let importer = if options.disable_progress_output {
        importer
    } else {
        let progress: Arc<dyn ProgressSink> = Arc::new(TerminalProgress::new());
        importer.with_progress(progress)
    };

    let summary = importer.import(options, cancel).await?;
    print_import_summary(&summary);

    let imported: usize = [summary.inventory, summary.location, summary.character]
        .iter()
        .flatten()
        .map(|t| t.imported)
        .sum();
    info!(imported, failed = summary.failed(), "import complete");
    Ok(determine_exit_outcome(imported, summary.failed()))
}

fn print_import_summary(summary: &ImportSummary) {
    let line = |name: &str, tree: Option<TreeSummary>| match tree {
        Some(t) => println!("{name:<10} {} imported, {} failed", t.imported, t.failed),
        None => println!("{name:<10} skipped"),
    };
    line("inventory", summary.inventory);
    line("location", summary.location);
    line("character", summary.character);
}

async fn run_show(ctx: &AppContext, args: &ShowArgs) -> Result<ProcessExit> {
    let json = ctx.sync.show(args.entity, args.member, args.page()).await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(ProcessExit::Success)
}
