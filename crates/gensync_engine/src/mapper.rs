//! Entity mapping between the two sides.

use crate::config::SyncMode;
use crate::error::SyncResult;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Information about the running synchronization, passed to mappers.
#[derive(Debug, Clone)]
pub struct SyncContext {
    /// Id of the current run.
    pub run_id: Uuid,
    /// Profile name.
    pub profile: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Reconciliation mode of the run.
    pub mode: SyncMode,
}

impl SyncContext {
    /// Creates a context for a new run.
    pub fn new(profile: impl Into<String>, mode: SyncMode) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            profile: profile.into(),
            started_at: Utc::now(),
            mode,
        }
    }
}

/// Maps entities between the A-side and B-side representation.
///
/// Both methods receive the target to overwrite: a blank entity when
/// creating, or the current target entity when updating. Mappers must not
/// perform I/O.
pub trait EntityMapper<A, B>: Send + Sync {
    /// Writes `source` onto `target`.
    fn map_a_to_b(&self, source: &A, target: B, context: &SyncContext) -> SyncResult<B>;

    /// Writes `source` onto `target`.
    fn map_b_to_a(&self, source: &B, target: A, context: &SyncContext) -> SyncResult<A>;
}

/// Mapper for two sides sharing one entity type.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityMapper;

impl<E: Clone> EntityMapper<E, E> for IdentityMapper {
    fn map_a_to_b(&self, source: &E, _target: E, _context: &SyncContext) -> SyncResult<E> {
        Ok(source.clone())
    }

    fn map_b_to_a(&self, source: &E, _target: E, _context: &SyncContext) -> SyncResult<E> {
        Ok(source.clone())
    }
}
