//! Run reports and progress reporting.

use crate::state::SyncAction;
use crate::types::Side;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use uuid::Uuid;

/// Severity of an entity report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The entity was skipped and will be re-evaluated by the next run.
    Warning,
    /// The entity stopped the run.
    Error,
}

/// Something noteworthy that happened to one entity.
#[derive(Debug, Clone, Serialize)]
pub struct EntityReport {
    /// Action that was being executed.
    pub action: SyncAction,
    /// Debug rendering of the entity id(s) involved.
    pub entity: String,
    /// Severity.
    pub severity: Severity,
    /// Description of what happened.
    pub message: String,
}

/// Write counters for one side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SideCounts {
    /// Entities created.
    pub created: u64,
    /// Entities updated.
    pub updated: u64,
    /// Entities deleted.
    pub deleted: u64,
}

impl SideCounts {
    /// Returns the number of writes.
    pub fn total(&self) -> u64 {
        self.created + self.updated + self.deleted
    }
}

/// Outcome of one synchronization run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    /// Run id.
    pub run_id: Uuid,
    /// Profile name.
    pub profile: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: Option<DateTime<Utc>>,
    /// Writes performed on A.
    pub a: SideCounts,
    /// Writes performed on B.
    pub b: SideCounts,
    /// Relations established by initial matching.
    pub matched: u64,
    /// Entities skipped because of an error.
    pub skipped_with_error: u64,
    /// Writes rejected because the entity changed concurrently.
    pub concurrent_modifications: u64,
    /// Per-entity warnings and errors.
    pub entities: Vec<EntityReport>,
    /// Message of the error that stopped the run.
    pub aborted: Option<String>,
}

impl SyncReport {
    /// Creates an empty report for a run.
    pub fn new(run_id: Uuid, profile: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            profile: profile.into(),
            started_at,
            finished_at: None,
            a: SideCounts::default(),
            b: SideCounts::default(),
            matched: 0,
            skipped_with_error: 0,
            concurrent_modifications: 0,
            entities: Vec::new(),
            aborted: None,
        }
    }

    /// Returns the counters of one side.
    pub fn side(&self, side: Side) -> &SideCounts {
        match side {
            Side::A => &self.a,
            Side::B => &self.b,
        }
    }

    pub(crate) fn side_mut(&mut self, side: Side) -> &mut SideCounts {
        match side {
            Side::A => &mut self.a,
            Side::B => &mut self.b,
        }
    }

    /// Returns the number of writes on both sides.
    pub fn total_writes(&self) -> u64 {
        self.a.total() + self.b.total()
    }

    /// Returns true if any entity was skipped or rejected.
    pub fn has_warnings(&self) -> bool {
        self.entities
            .iter()
            .any(|report| report.severity == Severity::Warning)
    }

    /// Returns true if the run was stopped by an error.
    pub fn has_errors(&self) -> bool {
        self.aborted.is_some()
    }

    pub(crate) fn warn(&mut self, action: SyncAction, entity: String, message: String) {
        self.entities.push(EntityReport {
            action,
            entity,
            severity: Severity::Warning,
            message,
        });
    }

    pub(crate) fn abort(&mut self, action: Option<SyncAction>, entity: String, message: String) {
        if let Some(action) = action {
            self.entities.push(EntityReport {
                action,
                entity,
                severity: Severity::Error,
                message: message.clone(),
            });
        }
        self.aborted = Some(message);
    }
}

/// Receives progress of the execution phase.
pub trait ProgressReporter: Send + Sync {
    /// Called once before the first job with the number of jobs planned.
    fn begin(&self, total: usize);

    /// Called after each job, whatever its outcome.
    fn job_completed(&self);

    /// Called once after the last job, also when the run was stopped.
    fn finished(&self);
}

/// Progress reporter that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressReporter for NullProgress {
    fn begin(&self, _total: usize) {}
    fn job_completed(&self) {}
    fn finished(&self) {}
}

/// Progress reporter that counts calls.
#[derive(Debug, Default)]
pub struct CountingProgress {
    total: AtomicUsize,
    completed: AtomicU64,
    finished: AtomicU64,
}

impl CountingProgress {
    /// Creates a new counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of the totals announced by `begin`.
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Number of completed jobs.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    /// Number of `finished` calls.
    pub fn finished_count(&self) -> u64 {
        self.finished.load(Ordering::SeqCst)
    }
}

impl ProgressReporter for CountingProgress {
    fn begin(&self, total: usize) {
        self.total.fetch_add(total, Ordering::SeqCst);
    }

    fn job_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn finished(&self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_counters() {
        let mut report = SyncReport::new(Uuid::new_v4(), "p", Utc::now());
        report.side_mut(Side::A).created += 2;
        report.side_mut(Side::B).deleted += 1;

        assert_eq!(report.total_writes(), 3);
        assert_eq!(report.side(Side::A).created, 2);
        assert!(!report.has_warnings());
        assert!(!report.has_errors());
    }

    #[test]
    fn warnings_and_errors_are_distinguished() {
        let mut report = SyncReport::new(Uuid::new_v4(), "p", Utc::now());
        report.warn(SyncAction::CreateInB, "1".into(), "mapping failed".into());
        assert!(report.has_warnings());
        assert!(!report.has_errors());

        report.abort(Some(SyncAction::UpdateAToB), "2".into(), "token expired".into());
        assert!(report.has_errors());
        assert_eq!(report.entities.len(), 2);
        assert_eq!(report.entities[1].severity, Severity::Error);
        assert_eq!(report.aborted.as_deref(), Some("token expired"));
    }

    #[test]
    fn counting_progress() {
        let progress = CountingProgress::new();
        progress.begin(3);
        progress.job_completed();
        progress.job_completed();
        progress.finished();

        assert_eq!(progress.total(), 3);
        assert_eq!(progress.completed(), 2);
        assert_eq!(progress.finished_count(), 1);
    }
}
