//! Per-relation sync states.
//!
//! Every relation (and every new entity without a relation) gets exactly one
//! [`EntitySyncState`] per run. The [`StateFactory`] derives it from the
//! status of both sides and the configured mode:
//!
//! ```text
//!  A \ B       Unchanged      Changed         Deleted
//!  Unchanged   DoNothing      (mode)          (mode)
//!  Changed     (mode)         (mode/conflict) (mode/conflict)
//!  Deleted     (mode)         (mode/conflict) Discard
//! ```

use crate::config::SyncMode;
use crate::conflict::{ConflictResolution, ConflictResolutionStrategy, DeletionResolution};
use crate::relation::RelationRecord;
use crate::types::{Direction, Side};
use crate::version::EntityVersion;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Status of one side of a known relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideStatus<V> {
    /// Still at the recorded version; carries the current version.
    Unchanged(V),
    /// Modified since the last run; carries the current version.
    Changed(V),
    /// No longer present.
    Deleted,
}

impl<V> SideStatus<V> {
    /// Returns the current version unless the entity was deleted.
    pub fn current(&self) -> Option<&V> {
        match self {
            SideStatus::Unchanged(v) | SideStatus::Changed(v) => Some(v),
            SideStatus::Deleted => None,
        }
    }
}

/// A relation whose entities both still exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownRelation<AI, AV, BI, BV> {
    /// The persisted record.
    pub record: RelationRecord<AI, AV, BI, BV>,
    /// Current A-side version.
    pub a_version: AV,
    /// Current B-side version.
    pub b_version: BV,
}

/// Kind of a sync state, without its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    /// Nothing to do.
    DoNothing,
    /// Forget the relation or ignore the entity.
    Discard,
    /// Create a counterpart of a B-entity in A.
    CreateInA,
    /// Create a counterpart of an A-entity in B.
    CreateInB,
    /// Overwrite B with A.
    UpdateAToB,
    /// Overwrite A with B.
    UpdateBToA,
    /// Undo a change made on A.
    RestoreInA,
    /// Undo a change made on B.
    RestoreInB,
    /// Overwrite the older entity with the newer one.
    UpdateFromNewerToOlder,
    /// Delete the related A-entity.
    DeleteInA,
    /// Delete the related B-entity.
    DeleteInB,
    /// Delete an unrelated A-entity without recording anything.
    DeleteInAWithNoRetry,
    /// Delete an unrelated B-entity without recording anything.
    DeleteInBWithNoRetry,
}

impl SyncAction {
    /// Returns the side written by this action, if it is fixed.
    pub fn target(&self) -> Option<Side> {
        match self {
            SyncAction::CreateInA
            | SyncAction::UpdateBToA
            | SyncAction::RestoreInA
            | SyncAction::DeleteInA
            | SyncAction::DeleteInAWithNoRetry => Some(Side::A),
            SyncAction::CreateInB
            | SyncAction::UpdateAToB
            | SyncAction::RestoreInB
            | SyncAction::DeleteInB
            | SyncAction::DeleteInBWithNoRetry => Some(Side::B),
            SyncAction::DoNothing | SyncAction::Discard | SyncAction::UpdateFromNewerToOlder => {
                None
            }
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncAction::DoNothing => "do nothing",
            SyncAction::Discard => "discard",
            SyncAction::CreateInA => "create in A",
            SyncAction::CreateInB => "create in B",
            SyncAction::UpdateAToB => "update A to B",
            SyncAction::UpdateBToA => "update B to A",
            SyncAction::RestoreInA => "restore in A",
            SyncAction::RestoreInB => "restore in B",
            SyncAction::UpdateFromNewerToOlder => "update from newer to older",
            SyncAction::DeleteInA => "delete in A",
            SyncAction::DeleteInB => "delete in B",
            SyncAction::DeleteInAWithNoRetry => "delete in A (no retry)",
            SyncAction::DeleteInBWithNoRetry => "delete in B (no retry)",
        };
        f.write_str(name)
    }
}

/// What happens to one relation or unrelated entity in this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntitySyncState<AI, AV, BI, BV> {
    /// Keep the record as is.
    DoNothing(RelationRecord<AI, AV, BI, BV>),
    /// Drop the record, or ignore an unrelated entity.
    Discard,
    /// Create a counterpart of this B-entity in A.
    CreateInA(EntityVersion<BI, BV>),
    /// Create a counterpart of this A-entity in B.
    CreateInB(EntityVersion<AI, AV>),
    /// Overwrite B with A.
    UpdateAToB(KnownRelation<AI, AV, BI, BV>),
    /// Overwrite A with B.
    UpdateBToA(KnownRelation<AI, AV, BI, BV>),
    /// Overwrite A with B, undoing a change made on A.
    RestoreInA(KnownRelation<AI, AV, BI, BV>),
    /// Overwrite B with A, undoing a change made on B.
    RestoreInB(KnownRelation<AI, AV, BI, BV>),
    /// Overwrite whichever entity is older; decided once both are loaded.
    UpdateFromNewerToOlder(KnownRelation<AI, AV, BI, BV>),
    /// Delete the A-entity of the relation.
    DeleteInA {
        /// The persisted record.
        record: RelationRecord<AI, AV, BI, BV>,
        /// Current A-side version.
        a_version: AV,
    },
    /// Delete the B-entity of the relation.
    DeleteInB {
        /// The persisted record.
        record: RelationRecord<AI, AV, BI, BV>,
        /// Current B-side version.
        b_version: BV,
    },
    /// Delete an A-entity that has no relation.
    DeleteInAWithNoRetry(EntityVersion<AI, AV>),
    /// Delete a B-entity that has no relation.
    DeleteInBWithNoRetry(EntityVersion<BI, BV>),
}

impl<AI: fmt::Debug, AV, BI: fmt::Debug, BV> EntitySyncState<AI, AV, BI, BV> {
    /// Returns the kind of this state.
    pub fn action(&self) -> SyncAction {
        match self {
            EntitySyncState::DoNothing(_) => SyncAction::DoNothing,
            EntitySyncState::Discard => SyncAction::Discard,
            EntitySyncState::CreateInA(_) => SyncAction::CreateInA,
            EntitySyncState::CreateInB(_) => SyncAction::CreateInB,
            EntitySyncState::UpdateAToB(_) => SyncAction::UpdateAToB,
            EntitySyncState::UpdateBToA(_) => SyncAction::UpdateBToA,
            EntitySyncState::RestoreInA(_) => SyncAction::RestoreInA,
            EntitySyncState::RestoreInB(_) => SyncAction::RestoreInB,
            EntitySyncState::UpdateFromNewerToOlder(_) => SyncAction::UpdateFromNewerToOlder,
            EntitySyncState::DeleteInA { .. } => SyncAction::DeleteInA,
            EntitySyncState::DeleteInB { .. } => SyncAction::DeleteInB,
            EntitySyncState::DeleteInAWithNoRetry(_) => SyncAction::DeleteInAWithNoRetry,
            EntitySyncState::DeleteInBWithNoRetry(_) => SyncAction::DeleteInBWithNoRetry,
        }
    }

    /// Returns true if executing this state touches a repository.
    pub fn requires_io(&self) -> bool {
        !matches!(self, EntitySyncState::DoNothing(_) | EntitySyncState::Discard)
    }

    /// Returns the A-entity that must be loaded before execution.
    pub fn a_id_to_load(&self) -> Option<&AI> {
        match self {
            EntitySyncState::CreateInB(source) => Some(&source.id),
            EntitySyncState::UpdateAToB(known)
            | EntitySyncState::UpdateBToA(known)
            | EntitySyncState::RestoreInA(known)
            | EntitySyncState::RestoreInB(known)
            | EntitySyncState::UpdateFromNewerToOlder(known) => Some(&known.record.a_id),
            _ => None,
        }
    }

    /// Returns the B-entity that must be loaded before execution.
    pub fn b_id_to_load(&self) -> Option<&BI> {
        match self {
            EntitySyncState::CreateInA(source) => Some(&source.id),
            EntitySyncState::UpdateAToB(known)
            | EntitySyncState::UpdateBToA(known)
            | EntitySyncState::RestoreInA(known)
            | EntitySyncState::RestoreInB(known)
            | EntitySyncState::UpdateFromNewerToOlder(known) => Some(&known.record.b_id),
            _ => None,
        }
    }

    /// Returns the record to persist if this state is not executed
    /// successfully.
    ///
    /// Keeping the old record makes the next run derive the same intent
    /// again; states that would create a relation yield nothing.
    pub fn into_fallback_record(self) -> Option<RelationRecord<AI, AV, BI, BV>> {
        match self {
            EntitySyncState::DoNothing(record)
            | EntitySyncState::DeleteInA { record, .. }
            | EntitySyncState::DeleteInB { record, .. } => Some(record),
            EntitySyncState::UpdateAToB(known)
            | EntitySyncState::UpdateBToA(known)
            | EntitySyncState::RestoreInA(known)
            | EntitySyncState::RestoreInB(known)
            | EntitySyncState::UpdateFromNewerToOlder(known) => Some(known.record),
            EntitySyncState::Discard
            | EntitySyncState::CreateInA(_)
            | EntitySyncState::CreateInB(_)
            | EntitySyncState::DeleteInAWithNoRetry(_)
            | EntitySyncState::DeleteInBWithNoRetry(_) => None,
        }
    }

    /// Describes the entities involved, for logs and reports.
    pub fn describe(&self) -> String {
        match self {
            EntitySyncState::DoNothing(record)
            | EntitySyncState::DeleteInA { record, .. }
            | EntitySyncState::DeleteInB { record, .. } => describe_record(record),
            EntitySyncState::UpdateAToB(known)
            | EntitySyncState::UpdateBToA(known)
            | EntitySyncState::RestoreInA(known)
            | EntitySyncState::RestoreInB(known)
            | EntitySyncState::UpdateFromNewerToOlder(known) => describe_record(&known.record),
            EntitySyncState::CreateInB(source) | EntitySyncState::DeleteInAWithNoRetry(source) => {
                format!("A {:?}", source.id)
            }
            EntitySyncState::CreateInA(source) | EntitySyncState::DeleteInBWithNoRetry(source) => {
                format!("B {:?}", source.id)
            }
            EntitySyncState::Discard => String::from("-"),
        }
    }
}

pub(crate) fn describe_record<AI: fmt::Debug, AV, BI: fmt::Debug, BV>(
    record: &RelationRecord<AI, AV, BI, BV>,
) -> String {
    format!("A {:?} <-> B {:?}", record.a_id, record.b_id)
}

/// Derives the sync state of a relation or unrelated entity.
#[derive(Clone)]
pub struct StateFactory {
    mode: SyncMode,
    conflicts: Arc<dyn ConflictResolutionStrategy>,
}

impl StateFactory {
    /// Creates a factory for the given mode.
    ///
    /// The conflict strategy is only consulted in two-way mode.
    pub fn new(mode: SyncMode, conflicts: Arc<dyn ConflictResolutionStrategy>) -> Self {
        Self { mode, conflicts }
    }

    /// Returns the mode.
    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// State of a known relation.
    pub fn for_relation<AI, AV, BI, BV>(
        &self,
        record: RelationRecord<AI, AV, BI, BV>,
        a: SideStatus<AV>,
        b: SideStatus<BV>,
    ) -> EntitySyncState<AI, AV, BI, BV> {
        match self.mode {
            SyncMode::OneWayReplicate(Direction::AToB) | SyncMode::OneWayMerge(Direction::AToB) => {
                one_way_a_to_b(record, a, b)
            }
            SyncMode::OneWayReplicate(Direction::BToA) | SyncMode::OneWayMerge(Direction::BToA) => {
                one_way_b_to_a(record, a, b)
            }
            SyncMode::TwoWay => self.two_way(record, a, b),
        }
    }

    /// State of an A-entity without relation.
    pub fn for_added_a<AI, AV, BI, BV>(
        &self,
        a: EntityVersion<AI, AV>,
    ) -> EntitySyncState<AI, AV, BI, BV> {
        match self.mode {
            SyncMode::OneWayReplicate(Direction::BToA) => EntitySyncState::DeleteInAWithNoRetry(a),
            SyncMode::OneWayMerge(Direction::BToA) => EntitySyncState::Discard,
            SyncMode::OneWayReplicate(Direction::AToB)
            | SyncMode::OneWayMerge(Direction::AToB)
            | SyncMode::TwoWay => EntitySyncState::CreateInB(a),
        }
    }

    /// State of a B-entity without relation.
    pub fn for_added_b<AI, AV, BI, BV>(
        &self,
        b: EntityVersion<BI, BV>,
    ) -> EntitySyncState<AI, AV, BI, BV> {
        match self.mode {
            SyncMode::OneWayReplicate(Direction::AToB) => EntitySyncState::DeleteInBWithNoRetry(b),
            SyncMode::OneWayMerge(Direction::AToB) => EntitySyncState::Discard,
            SyncMode::OneWayReplicate(Direction::BToA)
            | SyncMode::OneWayMerge(Direction::BToA)
            | SyncMode::TwoWay => EntitySyncState::CreateInA(b),
        }
    }

    fn two_way<AI, AV, BI, BV>(
        &self,
        record: RelationRecord<AI, AV, BI, BV>,
        a: SideStatus<AV>,
        b: SideStatus<BV>,
    ) -> EntitySyncState<AI, AV, BI, BV> {
        use SideStatus::{Changed, Deleted, Unchanged};

        match (a, b) {
            (Unchanged(_), Unchanged(_)) => EntitySyncState::DoNothing(record),
            (Deleted, Deleted) => EntitySyncState::Discard,
            (Changed(a_version), Unchanged(b_version)) => {
                EntitySyncState::UpdateAToB(known(record, a_version, b_version))
            }
            (Unchanged(a_version), Changed(b_version)) => {
                EntitySyncState::UpdateBToA(known(record, a_version, b_version))
            }
            (Unchanged(a_version), Deleted) => EntitySyncState::DeleteInA { record, a_version },
            (Deleted, Unchanged(b_version)) => EntitySyncState::DeleteInB { record, b_version },
            (Changed(a_version), Changed(b_version)) => {
                let relation = known(record, a_version, b_version);
                match self.conflicts.changed_changed() {
                    ConflictResolution::KeepA => EntitySyncState::UpdateAToB(relation),
                    ConflictResolution::KeepB => EntitySyncState::UpdateBToA(relation),
                    ConflictResolution::KeepNewer => {
                        EntitySyncState::UpdateFromNewerToOlder(relation)
                    }
                }
            }
            (Changed(a_version), Deleted) => match self.conflicts.changed_deleted() {
                DeletionResolution::DeleteWins => EntitySyncState::DeleteInA { record, a_version },
                DeletionResolution::ChangeWins => {
                    EntitySyncState::CreateInB(EntityVersion::new(record.a_id, a_version))
                }
            },
            (Deleted, Changed(b_version)) => match self.conflicts.deleted_changed() {
                DeletionResolution::DeleteWins => EntitySyncState::DeleteInB { record, b_version },
                DeletionResolution::ChangeWins => {
                    EntitySyncState::CreateInA(EntityVersion::new(record.b_id, b_version))
                }
            },
        }
    }
}

impl fmt::Debug for StateFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateFactory")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

fn known<AI, AV, BI, BV>(
    record: RelationRecord<AI, AV, BI, BV>,
    a_version: AV,
    b_version: BV,
) -> KnownRelation<AI, AV, BI, BV> {
    KnownRelation {
        record,
        a_version,
        b_version,
    }
}

fn one_way_a_to_b<AI, AV, BI, BV>(
    record: RelationRecord<AI, AV, BI, BV>,
    a: SideStatus<AV>,
    b: SideStatus<BV>,
) -> EntitySyncState<AI, AV, BI, BV> {
    use SideStatus::{Changed, Deleted, Unchanged};

    match (a, b) {
        (Changed(a_version), Changed(b_version) | Unchanged(b_version)) => {
            EntitySyncState::UpdateAToB(known(record, a_version, b_version))
        }
        (Changed(a_version) | Unchanged(a_version), Deleted) => {
            EntitySyncState::CreateInB(EntityVersion::new(record.a_id, a_version))
        }
        (Unchanged(a_version), Changed(b_version)) => {
            EntitySyncState::RestoreInB(known(record, a_version, b_version))
        }
        (Deleted, Changed(b_version) | Unchanged(b_version)) => {
            EntitySyncState::DeleteInB { record, b_version }
        }
        (Deleted, Deleted) => EntitySyncState::Discard,
        (Unchanged(_), Unchanged(_)) => EntitySyncState::DoNothing(record),
    }
}

fn one_way_b_to_a<AI, AV, BI, BV>(
    record: RelationRecord<AI, AV, BI, BV>,
    a: SideStatus<AV>,
    b: SideStatus<BV>,
) -> EntitySyncState<AI, AV, BI, BV> {
    use SideStatus::{Changed, Deleted, Unchanged};

    match (a, b) {
        (Changed(a_version) | Unchanged(a_version), Changed(b_version)) => {
            EntitySyncState::UpdateBToA(known(record, a_version, b_version))
        }
        (Deleted, Changed(b_version) | Unchanged(b_version)) => {
            EntitySyncState::CreateInA(EntityVersion::new(record.b_id, b_version))
        }
        (Changed(a_version), Unchanged(b_version)) => {
            EntitySyncState::RestoreInA(known(record, a_version, b_version))
        }
        (Changed(a_version) | Unchanged(a_version), Deleted) => {
            EntitySyncState::DeleteInA { record, a_version }
        }
        (Deleted, Deleted) => EntitySyncState::Discard,
        (Unchanged(_), Unchanged(_)) => EntitySyncState::DoNothing(record),
    }
}
