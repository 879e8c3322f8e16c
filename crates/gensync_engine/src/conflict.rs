//! Conflict resolution for two-way synchronization.
//!
//! A conflict exists when both sides of a relation moved since the last run
//! and at least one of them changed: Changed/Changed, Changed/Deleted and
//! Deleted/Changed. One-way modes never consult these strategies.

use crate::types::Side;
use chrono::{DateTime, Utc};

/// How a Changed/Changed conflict is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Overwrite B with A.
    KeepA,
    /// Overwrite A with B.
    KeepB,
    /// Compare modification times once both entities are loaded and
    /// overwrite the older one.
    KeepNewer,
}

/// How a conflict between a change and a deletion is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionResolution {
    /// Delete the changed entity as well.
    DeleteWins,
    /// Recreate the deleted entity from the changed one.
    ChangeWins,
}

/// Strategy consulted by the two-way state factory.
///
/// Only Changed/Changed has to be decided by every strategy; the deletion
/// conflicts default to "delete wins".
pub trait ConflictResolutionStrategy: Send + Sync {
    /// Both entities changed.
    fn changed_changed(&self) -> ConflictResolution;

    /// A changed, B was deleted.
    fn changed_deleted(&self) -> DeletionResolution {
        DeletionResolution::DeleteWins
    }

    /// A was deleted, B changed.
    fn deleted_changed(&self) -> DeletionResolution {
        DeletionResolution::DeleteWins
    }
}

/// Built-in conflict policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// A always wins, including against deletions on B.
    AWins,
    /// B always wins, including against deletions on A.
    BWins,
    /// The more recently modified entity wins; deletions win over changes.
    Automatic,
}

impl ConflictPolicy {
    /// Converts to a code.
    pub fn to_code(&self) -> u8 {
        match self {
            ConflictPolicy::AWins => 1,
            ConflictPolicy::BWins => 2,
            ConflictPolicy::Automatic => 3,
        }
    }

    /// Converts from a code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ConflictPolicy::AWins),
            2 => Some(ConflictPolicy::BWins),
            3 => Some(ConflictPolicy::Automatic),
            _ => None,
        }
    }
}

impl ConflictResolutionStrategy for ConflictPolicy {
    fn changed_changed(&self) -> ConflictResolution {
        match self {
            ConflictPolicy::AWins => ConflictResolution::KeepA,
            ConflictPolicy::BWins => ConflictResolution::KeepB,
            ConflictPolicy::Automatic => ConflictResolution::KeepNewer,
        }
    }

    fn changed_deleted(&self) -> DeletionResolution {
        match self {
            ConflictPolicy::AWins => DeletionResolution::ChangeWins,
            ConflictPolicy::BWins | ConflictPolicy::Automatic => DeletionResolution::DeleteWins,
        }
    }

    fn deleted_changed(&self) -> DeletionResolution {
        match self {
            ConflictPolicy::BWins => DeletionResolution::ChangeWins,
            ConflictPolicy::AWins | ConflictPolicy::Automatic => DeletionResolution::DeleteWins,
        }
    }
}

/// Picks the side whose entity was modified more recently.
///
/// Only a strictly later timestamp wins. Equal timestamps, or a missing
/// timestamp on either side, fall back to A.
pub fn newer_side(a_modified: Option<DateTime<Utc>>, b_modified: Option<DateTime<Utc>>) -> Side {
    match (a_modified, b_modified) {
        (Some(a), Some(b)) if b > a => Side::B,
        _ => Side::A,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn policy_changed_changed() {
        assert_eq!(ConflictPolicy::AWins.changed_changed(), ConflictResolution::KeepA);
        assert_eq!(ConflictPolicy::BWins.changed_changed(), ConflictResolution::KeepB);
        assert_eq!(
            ConflictPolicy::Automatic.changed_changed(),
            ConflictResolution::KeepNewer
        );
    }

    #[test]
    fn policy_deletion_conflicts() {
        assert_eq!(
            ConflictPolicy::AWins.changed_deleted(),
            DeletionResolution::ChangeWins
        );
        assert_eq!(
            ConflictPolicy::AWins.deleted_changed(),
            DeletionResolution::DeleteWins
        );
        assert_eq!(
            ConflictPolicy::BWins.changed_deleted(),
            DeletionResolution::DeleteWins
        );
        assert_eq!(
            ConflictPolicy::BWins.deleted_changed(),
            DeletionResolution::ChangeWins
        );
        assert_eq!(
            ConflictPolicy::Automatic.changed_deleted(),
            DeletionResolution::DeleteWins
        );
        assert_eq!(
            ConflictPolicy::Automatic.deleted_changed(),
            DeletionResolution::DeleteWins
        );
    }

    #[test]
    fn custom_strategy_defaults_to_delete_wins() {
        struct AlwaysB;
        impl ConflictResolutionStrategy for AlwaysB {
            fn changed_changed(&self) -> ConflictResolution {
                ConflictResolution::KeepB
            }
        }

        assert_eq!(AlwaysB.changed_deleted(), DeletionResolution::DeleteWins);
        assert_eq!(AlwaysB.deleted_changed(), DeletionResolution::DeleteWins);
    }

    #[test]
    fn policy_codes() {
        assert_eq!(ConflictPolicy::from_code(1), Some(ConflictPolicy::AWins));
        assert_eq!(ConflictPolicy::from_code(2), Some(ConflictPolicy::BWins));
        assert_eq!(ConflictPolicy::from_code(3), Some(ConflictPolicy::Automatic));
        assert_eq!(ConflictPolicy::from_code(0), None);
        assert_eq!(ConflictPolicy::Automatic.to_code(), 3);
    }

    #[test]
    fn strictly_newer_wins() {
        assert_eq!(newer_side(Some(at(9)), Some(at(10))), Side::B);
        assert_eq!(newer_side(Some(at(11)), Some(at(10))), Side::A);
        assert_eq!(
            newer_side(Some(at(10)), Some(at(10) + Duration::seconds(1))),
            Side::B
        );
    }

    #[test]
    fn ties_and_missing_timestamps_fall_back_to_a() {
        assert_eq!(newer_side(Some(at(10)), Some(at(10))), Side::A);
        assert_eq!(newer_side(None, Some(at(10))), Side::A);
        assert_eq!(newer_side(Some(at(10)), None), Side::A);
        assert_eq!(newer_side(None, None), Side::A);
    }
}
