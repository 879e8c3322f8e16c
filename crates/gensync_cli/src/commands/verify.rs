//! Verify command implementation.

use super::{relations_store, render, RawRecord};
use crate::error::CliError;
use gensync_engine::{decode_relations, RELATIONS_FORMAT_VERSION};
use gensync_storage::StateStore;
use std::collections::HashMap;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of records checked.
    pub records_checked: usize,
    /// Records whose ids are used by no other record.
    pub valid_records: usize,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(state: &Path, profile: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = relations_store(state, profile);
    println!("Verifying relations at {:?}", store.path());
    println!();

    let Some(bytes) = store.load()? else {
        println!("Relations file not found (this is normal before the first run)");
        return Ok(());
    };

    let result = verify_bytes(&bytes);
    println!("Records checked: {}", result.records_checked);
    println!("Valid records:   {}", result.valid_records);
    for error in &result.errors {
        println!("  - {error}");
    }

    println!();
    if result.is_ok() {
        println!("✓ Relations verification passed");
        Ok(())
    } else {
        println!("✗ Relations verification failed");
        Err(CliError::VerificationFailed(result.errors.len()).into())
    }
}

/// Checks the envelope and the 1:1 property of an encoded relations file.
pub fn verify_bytes(bytes: &[u8]) -> VerifyResult {
    let mut result = VerifyResult::default();

    let records: Vec<RawRecord> = match decode_relations(bytes) {
        Ok(records) => records,
        Err(e) => {
            result.errors.push(format!(
                "envelope unreadable (expected format v{RELATIONS_FORMAT_VERSION}): {e}"
            ));
            return result;
        }
    };
    result.records_checked = records.len();

    // Values are keyed by their debug rendering so that 1 and "1" stay apart.
    let mut a_uses: HashMap<String, usize> = HashMap::new();
    let mut b_uses: HashMap<String, usize> = HashMap::new();
    for record in &records {
        *a_uses.entry(format!("{:?}", record.a_id)).or_default() += 1;
        *b_uses.entry(format!("{:?}", record.b_id)).or_default() += 1;
    }

    for (index, record) in records.iter().enumerate() {
        let a_count = a_uses[&format!("{:?}", record.a_id)];
        let b_count = b_uses[&format!("{:?}", record.b_id)];
        if a_count > 1 {
            result.errors.push(format!(
                "record {index}: A id {} is used by {a_count} relations",
                render(&record.a_id)
            ));
        }
        if b_count > 1 {
            result.errors.push(format!(
                "record {index}: B id {} is used by {b_count} relations",
                render(&record.b_id)
            ));
        }
        if a_count == 1 && b_count == 1 {
            result.valid_records += 1;
        }
    }

    result
}
