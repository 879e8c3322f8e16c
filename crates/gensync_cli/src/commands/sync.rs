//! Sync command implementation.

use super::relations_store;
use crate::directory::{DirectoryRepository, SameFileRules};
use crate::error::CliError;
use gensync_engine::{
    ConflictPolicy, IdentityMapper, PropertyMatcher, QueryRange, SyncConfig, SyncMode,
    SyncReport, Synchronizer,
};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Options of a directory synchronization.
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    /// Reconciliation mode.
    pub mode: SyncMode,
    /// Conflict policy for two-way mode.
    pub conflict_policy: ConflictPolicy,
    /// Files processed per chunk.
    pub chunk_size: usize,
    /// Whether existing files with the same name and content are paired.
    pub initial_matching: bool,
    /// Modification times of the unrelated files to pick up.
    pub query_range: QueryRange,
}

/// Runs the sync command.
pub async fn run(
    state: &Path,
    profile: &str,
    a: &Path,
    b: &Path,
    options: SyncOptions,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let report = sync_directories(state, profile, a, b, options).await?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print_text_output(&report);
        }
    }

    Ok(())
}

/// Synchronizes the files of `a` and `b`, keeping the relations in `state`.
///
/// Ctrl-C cancels the run after the file being written; completed work is
/// kept.
pub async fn sync_directories(
    state: &Path,
    profile: &str,
    a: &Path,
    b: &Path,
    options: SyncOptions,
) -> Result<SyncReport, CliError> {
    for dir in [a, b] {
        if !dir.is_dir() {
            return Err(CliError::NotADirectory(dir.to_path_buf()));
        }
    }
    if a.canonicalize().ok() == b.canonicalize().ok() {
        return Err(CliError::SameDirectory(a.to_path_buf()));
    }

    let config = SyncConfig::new(profile)
        .with_mode(options.mode)
        .with_conflict_policy(options.conflict_policy)
        .with_chunk_size(options.chunk_size)
        .with_initial_matching(options.initial_matching)
        .with_query_range(options.query_range);
    let synchronizer = Arc::new(
        Synchronizer::new(
            config,
            Arc::new(DirectoryRepository::new(a)),
            Arc::new(DirectoryRepository::new(b)),
            IdentityMapper,
            Arc::new(relations_store(state, profile)),
        )
        .with_matcher(PropertyMatcher::new(SameFileRules)),
    );

    let canceller = Arc::clone(&synchronizer);
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling after the current file");
            canceller.cancel();
        }
    });

    let result = synchronizer.synchronize().await;
    watcher.abort();
    result.map_err(CliError::from)
}

fn print_text_output(report: &SyncReport) {
    println!("GenSync Run");
    println!("===========");
    println!();
    println!("Profile: {}", report.profile);
    println!("Run:     {}", report.run_id);
    if let Some(finished) = report.finished_at {
        let elapsed = finished - report.started_at;
        println!("Time:    {} ms", elapsed.num_milliseconds());
    }
    println!();
    println!("Writes:");
    println!(
        "  A: {} created, {} updated, {} deleted",
        report.a.created, report.a.updated, report.a.deleted
    );
    println!(
        "  B: {} created, {} updated, {} deleted",
        report.b.created, report.b.updated, report.b.deleted
    );
    println!("Matched:  {}", report.matched);
    println!("Skipped:  {}", report.skipped_with_error);

    if !report.entities.is_empty() {
        println!();
        println!("Problems:");
        for entity in &report.entities {
            println!(
                "  [{:?}] {} {}: {}",
                entity.severity, entity.action, entity.entity, entity.message
            );
        }
    }
}
