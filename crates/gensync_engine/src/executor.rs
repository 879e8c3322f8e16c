//! Chunked execution of sync states.
//!
//! Execution happens in two phases per chunk. First the entities the states
//! need are loaded with one `get` call per side; then every state is resolved
//! into a job and the jobs run one by one, grouped per side as
//! delete, update, create.
//!
//! Failures are split by an [`ExceptionHandlingStrategy`]. A per-entity
//! failure keeps the relation as it was, so the next run derives the same
//! intent again. A run-aborting failure stops execution; the records of all
//! jobs not yet executed are kept unchanged so completed work is persisted and
//! nothing is lost.

use crate::conflict::newer_side;
use crate::error::{SyncError, SyncResult};
use crate::mapper::{EntityMapper, SyncContext};
use crate::relation::RelationRecord;
use crate::report::{ProgressReporter, SyncReport};
use crate::repository::EntityRepository;
use crate::state::{describe_record, EntitySyncState, KnownRelation, SyncAction};
use crate::types::Side;
use crate::version::EntityVersion;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, warn};

/// Relation record type of a repository pair.
pub type RecordOf<A, B> = RelationRecord<
    <A as EntityRepository>::Id,
    <A as EntityRepository>::Version,
    <B as EntityRepository>::Id,
    <B as EntityRepository>::Version,
>;

/// Sync state type of a repository pair.
pub type StateOf<A, B> = EntitySyncState<
    <A as EntityRepository>::Id,
    <A as EntityRepository>::Version,
    <B as EntityRepository>::Id,
    <B as EntityRepository>::Version,
>;

type KnownOf<A, B> = KnownRelation<
    <A as EntityRepository>::Id,
    <A as EntityRepository>::Version,
    <B as EntityRepository>::Id,
    <B as EntityRepository>::Version,
>;

/// Decides whether an error affects one entity or the whole run.
pub trait ExceptionHandlingStrategy: Send + Sync {
    /// Returns true if `error` must stop the run.
    fn is_run_aborting(&self, error: &SyncError) -> bool {
        error.is_run_aborting()
    }
}

/// Uses [`SyncError::is_run_aborting`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultExceptionHandling;

impl ExceptionHandlingStrategy for DefaultExceptionHandling {}

/// Entities loaded during a run, by id.
pub(crate) struct EntityCache<A: EntityRepository, B: EntityRepository> {
    pub(crate) a: HashMap<A::Id, A::Entity>,
    pub(crate) b: HashMap<B::Id, B::Entity>,
}

impl<A: EntityRepository, B: EntityRepository> Default for EntityCache<A, B> {
    fn default() -> Self {
        Self {
            a: HashMap::new(),
            b: HashMap::new(),
        }
    }
}

/// Entities the executor is done with, handed to `cleanup` per chunk.
struct Released<A: EntityRepository, B: EntityRepository> {
    a: Vec<A::Entity>,
    b: Vec<B::Entity>,
}

impl<A: EntityRepository, B: EntityRepository> Default for Released<A, B> {
    fn default() -> Self {
        Self {
            a: Vec::new(),
            b: Vec::new(),
        }
    }
}

enum SyncJob<A: EntityRepository, B: EntityRepository> {
    CreateInA {
        source: EntityVersion<B::Id, B::Version>,
        entity: B::Entity,
    },
    CreateInB {
        source: EntityVersion<A::Id, A::Version>,
        entity: A::Entity,
    },
    UpdateAToB {
        action: SyncAction,
        relation: KnownOf<A, B>,
        source: A::Entity,
        target: B::Entity,
    },
    UpdateBToA {
        action: SyncAction,
        relation: KnownOf<A, B>,
        source: B::Entity,
        target: A::Entity,
    },
    DeleteInA {
        action: SyncAction,
        record: Option<RecordOf<A, B>>,
        target: EntityVersion<A::Id, A::Version>,
    },
    DeleteInB {
        action: SyncAction,
        record: Option<RecordOf<A, B>>,
        target: EntityVersion<B::Id, B::Version>,
    },
}

impl<A: EntityRepository, B: EntityRepository> SyncJob<A, B> {
    fn action(&self) -> SyncAction {
        match self {
            SyncJob::CreateInA { .. } => SyncAction::CreateInA,
            SyncJob::CreateInB { .. } => SyncAction::CreateInB,
            SyncJob::UpdateAToB { action, .. }
            | SyncJob::UpdateBToA { action, .. }
            | SyncJob::DeleteInA { action, .. }
            | SyncJob::DeleteInB { action, .. } => *action,
        }
    }

    /// Execution order: side A first, then deletes, updates, creates.
    fn order(&self) -> (u8, u8) {
        match self {
            SyncJob::DeleteInA { .. } => (0, 0),
            SyncJob::UpdateBToA { .. } => (0, 1),
            SyncJob::CreateInA { .. } => (0, 2),
            SyncJob::DeleteInB { .. } => (1, 0),
            SyncJob::UpdateAToB { .. } => (1, 1),
            SyncJob::CreateInB { .. } => (1, 2),
        }
    }

    fn describe(&self) -> String {
        match self {
            SyncJob::CreateInA { source, .. } => format!("B {:?}", source.id),
            SyncJob::CreateInB { source, .. } => format!("A {:?}", source.id),
            SyncJob::UpdateAToB { relation, .. } | SyncJob::UpdateBToA { relation, .. } => {
                describe_record(&relation.record)
            }
            SyncJob::DeleteInA { record: Some(record), .. }
            | SyncJob::DeleteInB { record: Some(record), .. } => describe_record(record),
            SyncJob::DeleteInA { target, .. } => format!("A {:?}", target.id),
            SyncJob::DeleteInB { target, .. } => format!("B {:?}", target.id),
        }
    }

    fn into_fallback(self, released: &mut Released<A, B>) -> Option<RecordOf<A, B>> {
        match self {
            SyncJob::CreateInA { entity, .. } => {
                released.b.push(entity);
                None
            }
            SyncJob::CreateInB { entity, .. } => {
                released.a.push(entity);
                None
            }
            SyncJob::UpdateAToB {
                relation,
                source,
                target,
                ..
            } => {
                released.a.push(source);
                released.b.push(target);
                Some(relation.record)
            }
            SyncJob::UpdateBToA {
                relation,
                source,
                target,
                ..
            } => {
                released.b.push(source);
                released.a.push(target);
                Some(relation.record)
            }
            SyncJob::DeleteInA { record, .. } | SyncJob::DeleteInB { record, .. } => record,
        }
    }
}

enum Resolved<A: EntityRepository, B: EntityRepository> {
    Job(SyncJob<A, B>),
    Done(Option<RecordOf<A, B>>),
}

/// Executes the states of one run.
pub(crate) struct BatchExecutor<'a, A: EntityRepository, B: EntityRepository, M> {
    a: &'a A,
    b: &'a B,
    mapper: &'a M,
    context: &'a SyncContext,
    exceptions: &'a dyn ExceptionHandlingStrategy,
    progress: &'a dyn ProgressReporter,
    cancelled: &'a AtomicBool,
    chunk_size: usize,
    cache: EntityCache<A, B>,
    records: Vec<RecordOf<A, B>>,
    report: SyncReport,
}

impl<'a, A, B, M> BatchExecutor<'a, A, B, M>
where
    A: EntityRepository,
    B: EntityRepository,
    M: EntityMapper<A::Entity, B::Entity>,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        a: &'a A,
        b: &'a B,
        mapper: &'a M,
        context: &'a SyncContext,
        exceptions: &'a dyn ExceptionHandlingStrategy,
        progress: &'a dyn ProgressReporter,
        cancelled: &'a AtomicBool,
        chunk_size: usize,
    ) -> Self {
        Self {
            a,
            b,
            mapper,
            context,
            exceptions,
            progress,
            cancelled,
            chunk_size: chunk_size.max(1),
            cache: EntityCache::default(),
            records: Vec::new(),
            report: SyncReport::new(context.run_id, context.profile.clone(), context.started_at),
        }
    }

    /// Uses entities loaded before execution instead of fetching them again.
    pub(crate) fn with_cache(mut self, cache: EntityCache<A, B>) -> Self {
        self.cache = cache;
        self
    }

    /// Continues an existing report.
    pub(crate) fn with_report(mut self, report: SyncReport) -> Self {
        self.report = report;
        self
    }

    /// Returns the records to persist and the report.
    pub(crate) fn finish(self) -> (Vec<RecordOf<A, B>>, SyncReport) {
        (self.records, self.report)
    }

    /// Executes all states.
    ///
    /// On a run-aborting error the records collected so far (including the
    /// unchanged records of unexecuted states) remain available via
    /// [`BatchExecutor::finish`].
    pub(crate) async fn execute(&mut self, states: Vec<StateOf<A, B>>) -> SyncResult<()> {
        let (with_io, without_io): (Vec<_>, Vec<_>) =
            states.into_iter().partition(|state| state.requires_io());

        for state in without_io {
            if let Some(record) = state.into_fallback_record() {
                self.records.push(record);
            }
        }

        self.progress.begin(with_io.len());
        debug!(jobs = with_io.len(), chunk_size = self.chunk_size, "executing states");

        let mut pending = with_io.into_iter();
        let mut outcome = Ok(());
        loop {
            let chunk: Vec<_> = pending.by_ref().take(self.chunk_size).collect();
            if chunk.is_empty() {
                break;
            }
            if let Err(e) = self.execute_chunk(chunk).await {
                for state in pending.by_ref() {
                    if let Some(record) = state.into_fallback_record() {
                        self.records.push(record);
                    }
                }
                outcome = Err(e);
                break;
            }
        }

        self.release_cache().await;
        self.progress.finished();
        outcome
    }

    async fn execute_chunk(&mut self, chunk: Vec<StateOf<A, B>>) -> SyncResult<()> {
        if let Err(e) = self.check_cancelled() {
            return Err(self.abort_chunk(chunk, e));
        }

        let a_ids: Vec<A::Id> = chunk
            .iter()
            .filter_map(|state| state.a_id_to_load())
            .filter(|id| !self.cache.a.contains_key(*id))
            .cloned()
            .collect();
        let b_ids: Vec<B::Id> = chunk
            .iter()
            .filter_map(|state| state.b_id_to_load())
            .filter(|id| !self.cache.b.contains_key(*id))
            .cloned()
            .collect();

        let mut load_errors: HashMap<Side, String> = HashMap::new();
        if !a_ids.is_empty() {
            match self.a.get(&a_ids).await {
                Ok(loaded) => self.cache.a.extend(loaded),
                Err(e) if self.exceptions.is_run_aborting(&e) => {
                    return Err(self.abort_chunk(chunk, e));
                }
                Err(e) => {
                    warn!(side = %Side::A, entities = a_ids.len(), error = %e, "loading entities failed");
                    load_errors.insert(Side::A, e.to_string());
                }
            }
        }
        if !b_ids.is_empty() {
            match self.b.get(&b_ids).await {
                Ok(loaded) => self.cache.b.extend(loaded),
                Err(e) if self.exceptions.is_run_aborting(&e) => {
                    return Err(self.abort_chunk(chunk, e));
                }
                Err(e) => {
                    warn!(side = %Side::B, entities = b_ids.len(), error = %e, "loading entities failed");
                    load_errors.insert(Side::B, e.to_string());
                }
            }
        }

        let mut released = Released::default();
        let mut jobs = Vec::with_capacity(chunk.len());
        for state in chunk {
            match self.resolve(state, &load_errors, &mut released) {
                Resolved::Job(job) => jobs.push(job),
                Resolved::Done(record) => {
                    self.records.extend(record);
                    self.progress.job_completed();
                }
            }
        }
        jobs.sort_by_key(SyncJob::order);

        let mut jobs = jobs.into_iter();
        let mut outcome = Ok(());
        while let Some(job) = jobs.next() {
            let action = job.action();
            let entity = job.describe();

            let result = match self.check_cancelled() {
                Ok(()) => self.run_job(job, &mut released).await,
                Err(e) => Err((e, job.into_fallback(&mut released))),
            };

            match result {
                Ok(record) => {
                    debug!(action = %action, entity = %entity, "job completed");
                    self.records.extend(record);
                }
                Err((e, fallback)) => {
                    self.records.extend(fallback);
                    if self.exceptions.is_run_aborting(&e) {
                        error!(action = %action, entity = %entity, error = %e, "run aborted");
                        self.report.abort(Some(action), entity, e.to_string());
                        for rest in jobs.by_ref() {
                            let record = rest.into_fallback(&mut released);
                            self.records.extend(record);
                        }
                        self.progress.job_completed();
                        outcome = Err(e);
                        break;
                    }
                    warn!(action = %action, entity = %entity, error = %e, "entity skipped");
                    self.report.skipped_with_error += 1;
                    self.report.warn(action, entity, e.to_string());
                }
            }
            self.progress.job_completed();
        }

        self.release(released).await;
        outcome
    }

    fn resolve(
        &mut self,
        state: StateOf<A, B>,
        load_errors: &HashMap<Side, String>,
        released: &mut Released<A, B>,
    ) -> Resolved<A, B> {
        let action = state.action();
        match state {
            EntitySyncState::CreateInA(source) => match self.cache.b.remove(&source.id) {
                Some(entity) => Resolved::Job(SyncJob::CreateInA { source, entity }),
                None => {
                    self.entity_unavailable(action, format!("B {:?}", source.id), &[Side::B], load_errors);
                    Resolved::Done(None)
                }
            },
            EntitySyncState::CreateInB(source) => match self.cache.a.remove(&source.id) {
                Some(entity) => Resolved::Job(SyncJob::CreateInB { source, entity }),
                None => {
                    self.entity_unavailable(action, format!("A {:?}", source.id), &[Side::A], load_errors);
                    Resolved::Done(None)
                }
            },
            EntitySyncState::UpdateAToB(relation)
            | EntitySyncState::RestoreInB(relation)
            | EntitySyncState::UpdateBToA(relation)
            | EntitySyncState::RestoreInA(relation)
            | EntitySyncState::UpdateFromNewerToOlder(relation) => {
                let a_entity = self.cache.a.remove(&relation.record.a_id);
                let b_entity = self.cache.b.remove(&relation.record.b_id);
                let (a_entity, b_entity) = match (a_entity, b_entity) {
                    (Some(a_entity), Some(b_entity)) => (a_entity, b_entity),
                    (a_entity, b_entity) => {
                        released.a.extend(a_entity);
                        released.b.extend(b_entity);
                        self.entity_unavailable(
                            action,
                            describe_record(&relation.record),
                            &[Side::A, Side::B],
                            load_errors,
                        );
                        return Resolved::Done(Some(relation.record));
                    }
                };

                let direction = match action {
                    SyncAction::UpdateAToB | SyncAction::RestoreInB => Side::A,
                    SyncAction::UpdateBToA | SyncAction::RestoreInA => Side::B,
                    _ => {
                        let newer = newer_side(
                            self.a.last_modified(&a_entity),
                            self.b.last_modified(&b_entity),
                        );
                        debug!(entity = %describe_record(&relation.record), newer = %newer, "conflict resolved by modification time");
                        newer
                    }
                };

                match direction {
                    Side::A => Resolved::Job(SyncJob::UpdateAToB {
                        action,
                        relation,
                        source: a_entity,
                        target: b_entity,
                    }),
                    Side::B => Resolved::Job(SyncJob::UpdateBToA {
                        action,
                        relation,
                        source: b_entity,
                        target: a_entity,
                    }),
                }
            }
            EntitySyncState::DeleteInA { record, a_version } => Resolved::Job(SyncJob::DeleteInA {
                action,
                target: EntityVersion::new(record.a_id.clone(), a_version),
                record: Some(record),
            }),
            EntitySyncState::DeleteInB { record, b_version } => Resolved::Job(SyncJob::DeleteInB {
                action,
                target: EntityVersion::new(record.b_id.clone(), b_version),
                record: Some(record),
            }),
            EntitySyncState::DeleteInAWithNoRetry(target) => Resolved::Job(SyncJob::DeleteInA {
                action,
                record: None,
                target,
            }),
            EntitySyncState::DeleteInBWithNoRetry(target) => Resolved::Job(SyncJob::DeleteInB {
                action,
                record: None,
                target,
            }),
            state @ (EntitySyncState::DoNothing(_) | EntitySyncState::Discard) => {
                Resolved::Done(state.into_fallback_record())
            }
        }
    }

    /// A required entity could not be loaded: either it vanished since the
    /// version query, or loading failed.
    fn entity_unavailable(
        &mut self,
        action: SyncAction,
        entity: String,
        sides: &[Side],
        load_errors: &HashMap<Side, String>,
    ) {
        let messages: Vec<&str> = sides
            .iter()
            .filter_map(|side| load_errors.get(side).map(String::as_str))
            .collect();
        if messages.is_empty() {
            debug!(action = %action, entity = %entity, "entity vanished before execution");
            return;
        }
        let message = messages.join("; ");
        warn!(action = %action, entity = %entity, error = %message, "entity skipped");
        self.report.skipped_with_error += 1;
        self.report.warn(action, entity, format!("loading failed: {message}"));
    }

    async fn run_job(
        &mut self,
        job: SyncJob<A, B>,
        released: &mut Released<A, B>,
    ) -> Result<Option<RecordOf<A, B>>, (SyncError, Option<RecordOf<A, B>>)> {
        let mapper = self.mapper;
        let context = self.context;

        match job {
            SyncJob::CreateInA { source, entity } => {
                let result = self
                    .a
                    .create(Box::new(|blank| mapper.map_b_to_a(&entity, blank, context)))
                    .await;
                released.b.push(entity);
                match result {
                    Ok(created) => {
                        self.report.side_mut(Side::A).created += 1;
                        Ok(Some(RelationRecord::new(
                            created.id,
                            created.version,
                            source.id,
                            source.version,
                        )))
                    }
                    Err(e) => Err((e, None)),
                }
            }
            SyncJob::CreateInB { source, entity } => {
                let result = self
                    .b
                    .create(Box::new(|blank| mapper.map_a_to_b(&entity, blank, context)))
                    .await;
                released.a.push(entity);
                match result {
                    Ok(created) => {
                        self.report.side_mut(Side::B).created += 1;
                        Ok(Some(RelationRecord::new(
                            source.id,
                            source.version,
                            created.id,
                            created.version,
                        )))
                    }
                    Err(e) => Err((e, None)),
                }
            }
            SyncJob::UpdateAToB {
                action,
                relation,
                source,
                target,
            } => {
                let KnownRelation {
                    record,
                    a_version,
                    b_version,
                } = relation;
                let result = self
                    .b
                    .try_update(
                        &record.b_id,
                        &b_version,
                        target,
                        Box::new(|current| mapper.map_a_to_b(&source, current, context)),
                    )
                    .await;
                released.a.push(source);
                match result {
                    Ok(Some(updated)) => {
                        self.report.side_mut(Side::B).updated += 1;
                        Ok(Some(RelationRecord::new(
                            record.a_id,
                            a_version,
                            updated.id,
                            updated.version,
                        )))
                    }
                    Ok(None) => Ok(Some(self.concurrently_modified(action, record))),
                    Err(e) => Err((e, Some(record))),
                }
            }
            SyncJob::UpdateBToA {
                action,
                relation,
                source,
                target,
            } => {
                let KnownRelation {
                    record,
                    a_version,
                    b_version,
                } = relation;
                let result = self
                    .a
                    .try_update(
                        &record.a_id,
                        &a_version,
                        target,
                        Box::new(|current| mapper.map_b_to_a(&source, current, context)),
                    )
                    .await;
                released.b.push(source);
                match result {
                    Ok(Some(updated)) => {
                        self.report.side_mut(Side::A).updated += 1;
                        Ok(Some(RelationRecord::new(
                            updated.id,
                            updated.version,
                            record.b_id,
                            b_version,
                        )))
                    }
                    Ok(None) => Ok(Some(self.concurrently_modified(action, record))),
                    Err(e) => Err((e, Some(record))),
                }
            }
            SyncJob::DeleteInA {
                action,
                record,
                target,
            } => match self.a.try_delete(&target.id, &target.version).await {
                Ok(deleted) => {
                    self.deleted(Side::A, action, deleted, &target.id);
                    Ok(None)
                }
                Err(e) => Err((e, record)),
            },
            SyncJob::DeleteInB {
                action,
                record,
                target,
            } => match self.b.try_delete(&target.id, &target.version).await {
                Ok(deleted) => {
                    self.deleted(Side::B, action, deleted, &target.id);
                    Ok(None)
                }
                Err(e) => Err((e, record)),
            },
        }
    }

    fn concurrently_modified(&mut self, action: SyncAction, record: RecordOf<A, B>) -> RecordOf<A, B> {
        let entity = describe_record(&record);
        warn!(action = %action, entity = %entity, "entity modified concurrently, keeping previous relation");
        self.report.concurrent_modifications += 1;
        self.report.warn(
            action,
            entity,
            "entity was modified concurrently and will be re-evaluated".into(),
        );
        record
    }

    fn deleted(&mut self, side: Side, action: SyncAction, deleted: bool, id: &dyn std::fmt::Debug) {
        if deleted {
            self.report.side_mut(side).deleted += 1;
        } else {
            debug!(action = %action, side = %side, id = ?id, "entity already gone");
        }
    }

    /// Pushes the records of a chunk that is not executed at all.
    fn abort_chunk(&mut self, chunk: Vec<StateOf<A, B>>, e: SyncError) -> SyncError {
        error!(error = %e, "run aborted");
        self.report.abort(None, String::new(), e.to_string());
        for state in chunk {
            if let Some(record) = state.into_fallback_record() {
                self.records.push(record);
            }
        }
        e
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn release(&self, released: Released<A, B>) {
        if !released.a.is_empty() {
            self.a.cleanup(released.a).await;
        }
        if !released.b.is_empty() {
            self.b.cleanup(released.b).await;
        }
    }

    async fn release_cache(&mut self) {
        let cache = std::mem::take(&mut self.cache);
        let released = Released {
            a: cache.a.into_values().collect(),
            b: cache.b.into_values().collect(),
        };
        self.release(released).await;
    }
}
