//! Inspect command implementation.

use super::{relations_store, render, RawRecord};
use crate::error::CliError;
use gensync_engine::{decode_relations, RELATIONS_FORMAT_VERSION};
use gensync_storage::StateStore;
use serde::Serialize;
use std::path::Path;

/// Relations inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Relations file path.
    pub path: String,
    /// File size in bytes.
    pub size: u64,
    /// Envelope format version.
    pub format_version: u16,
    /// Persisted relations.
    pub relations: Vec<RelationView>,
}

/// One relation rendered for display.
#[derive(Debug, Serialize)]
pub struct RelationView {
    /// A-side id.
    pub a_id: String,
    /// A-side version at the last run.
    pub a_version: String,
    /// B-side id.
    pub b_id: String,
    /// B-side version at the last run.
    pub b_version: String,
}

impl From<&RawRecord> for RelationView {
    fn from(record: &RawRecord) -> Self {
        Self {
            a_id: render(&record.a_id),
            a_version: render(&record.a_version),
            b_id: render(&record.b_id),
            b_version: render(&record.b_version),
        }
    }
}

/// Runs the inspect command.
pub fn run(state: &Path, profile: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(state, profile)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Loads and decodes the relations of `profile`.
pub fn inspect(state: &Path, profile: &str) -> Result<InspectResult, CliError> {
    let store = relations_store(state, profile);
    let bytes = store
        .load()?
        .ok_or_else(|| CliError::NoRelations(store.path().to_path_buf()))?;
    let records: Vec<RawRecord> = decode_relations(&bytes)?;

    Ok(InspectResult {
        path: store.path().display().to_string(),
        size: bytes.len() as u64,
        format_version: RELATIONS_FORMAT_VERSION,
        relations: records.iter().map(RelationView::from).collect(),
    })
}

fn print_text_output(result: &InspectResult) {
    println!("GenSync Relations");
    println!("=================");
    println!();
    println!("Path:    {}", result.path);
    println!("Size:    {} bytes", result.size);
    println!("Format:  v{}", result.format_version);
    println!();
    println!("Relations: {}", result.relations.len());
    for relation in &result.relations {
        println!(
            "  {} @ {}  <->  {} @ {}",
            relation.a_id,
            short(&relation.a_version),
            relation.b_id,
            short(&relation.b_version)
        );
    }
}

/// Shortens long version tokens such as content hashes.
fn short(version: &str) -> &str {
    match version.char_indices().nth(12) {
        Some((index, _)) => &version[..index],
        None => version,
    }
}
