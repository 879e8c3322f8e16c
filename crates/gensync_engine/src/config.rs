//! Configuration for the sync engine.

use crate::conflict::ConflictPolicy;
use crate::error::{SyncError, SyncResult};
use crate::repository::QueryRange;
use crate::types::Direction;

/// How the two sides are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Propagate in one direction and undo entities that appear on the
    /// target side without a counterpart.
    OneWayReplicate(Direction),
    /// Propagate in one direction but leave foreign entities on the target
    /// side untouched.
    OneWayMerge(Direction),
    /// Propagate changes in both directions, arbitrating conflicts.
    TwoWay,
}

impl SyncMode {
    /// Returns the direction of a one-way mode.
    pub fn direction(&self) -> Option<Direction> {
        match self {
            SyncMode::OneWayReplicate(direction) | SyncMode::OneWayMerge(direction) => {
                Some(*direction)
            }
            SyncMode::TwoWay => None,
        }
    }

    /// Converts to a code.
    pub fn to_code(&self) -> u8 {
        match self {
            SyncMode::OneWayReplicate(Direction::AToB) => 1,
            SyncMode::OneWayReplicate(Direction::BToA) => 2,
            SyncMode::OneWayMerge(Direction::AToB) => 3,
            SyncMode::OneWayMerge(Direction::BToA) => 4,
            SyncMode::TwoWay => 5,
        }
    }

    /// Converts from a code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(SyncMode::OneWayReplicate(Direction::AToB)),
            2 => Some(SyncMode::OneWayReplicate(Direction::BToA)),
            3 => Some(SyncMode::OneWayMerge(Direction::AToB)),
            4 => Some(SyncMode::OneWayMerge(Direction::BToA)),
            5 => Some(SyncMode::TwoWay),
            _ => None,
        }
    }
}

/// Configuration for a synchronization profile.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Profile name, used in logs and reports.
    pub profile: String,
    /// Reconciliation mode.
    pub mode: SyncMode,
    /// Conflict policy for two-way mode.
    pub conflict_policy: ConflictPolicy,
    /// Maximum number of relations processed per chunk.
    pub chunk_size: usize,
    /// Whether unrelated entities on both sides are paired before creating
    /// anything.
    pub initial_matching: bool,
    /// Range passed to the repositories' version queries.
    pub query_range: QueryRange,
}

impl SyncConfig {
    /// Creates a configuration for the given profile.
    pub fn new(profile: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
            mode: SyncMode::TwoWay,
            conflict_policy: ConflictPolicy::Automatic,
            chunk_size: 100,
            initial_matching: true,
            query_range: QueryRange::default(),
        }
    }

    /// Sets the reconciliation mode.
    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Sets the chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Enables or disables initial matching.
    pub fn with_initial_matching(mut self, enabled: bool) -> Self {
        self.initial_matching = enabled;
        self
    }

    /// Sets the version query range.
    pub fn with_query_range(mut self, range: QueryRange) -> Self {
        self.query_range = range;
        self
    }

    /// Checks the configuration for values the engine cannot work with.
    pub fn validate(&self) -> SyncResult<()> {
        if self.chunk_size == 0 {
            return Err(SyncError::InvalidConfiguration(
                "chunk size must be at least 1".into(),
            ));
        }
        if let (Some(from), Some(to)) = (self.query_range.from, self.query_range.to) {
            if from > to {
                return Err(SyncError::InvalidConfiguration(
                    "query range starts after it ends".into(),
                ));
            }
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("default")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new("work")
            .with_mode(SyncMode::OneWayMerge(Direction::BToA))
            .with_conflict_policy(ConflictPolicy::BWins)
            .with_chunk_size(25)
            .with_initial_matching(false);

        assert_eq!(config.profile, "work");
        assert_eq!(config.mode, SyncMode::OneWayMerge(Direction::BToA));
        assert_eq!(config.conflict_policy, ConflictPolicy::BWins);
        assert_eq!(config.chunk_size, 25);
        assert!(!config.initial_matching);
    }

    #[test]
    fn default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.mode, SyncMode::TwoWay);
        assert_eq!(config.conflict_policy, ConflictPolicy::Automatic);
        assert!(config.initial_matching);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let config = SyncConfig::default().with_chunk_size(0);
        assert!(matches!(
            config.validate(),
            Err(SyncError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn inverted_query_range_is_rejected() {
        let now = Utc::now();
        let config = SyncConfig::default().with_query_range(QueryRange {
            from: Some(now),
            to: Some(now - Duration::days(1)),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn mode_codes() {
        for code in 1..=5 {
            let mode = SyncMode::from_code(code).unwrap();
            assert_eq!(mode.to_code(), code);
        }
        assert_eq!(SyncMode::from_code(0), None);
        assert_eq!(SyncMode::TwoWay.direction(), None);
        assert_eq!(
            SyncMode::OneWayReplicate(Direction::AToB).direction(),
            Some(Direction::AToB)
        );
    }
}
