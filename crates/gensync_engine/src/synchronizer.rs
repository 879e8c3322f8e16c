//! Orchestration of one synchronization run.

use crate::config::SyncConfig;
use crate::conflict::ConflictResolutionStrategy;
use crate::error::{SyncError, SyncResult};
use crate::executor::{
    BatchExecutor, DefaultExceptionHandling, EntityCache, ExceptionHandlingStrategy, RecordOf,
    StateOf,
};
use crate::mapper::{EntityMapper, SyncContext};
use crate::matcher::InitialEntityMatcher;
use crate::persistence::RelationStore;
use crate::relation::{EntityRelationStorage, RelationRecord};
use crate::report::{NullProgress, ProgressReporter, SyncReport};
use crate::repository::EntityRepository;
use crate::state::{EntitySyncState, SideStatus, StateFactory, SyncAction};
use crate::version::{DefaultVersionComparer, EntityVersion, VersionComparer, VersionDelta, VersionStorage};
use chrono::Utc;
use gensync_storage::StateStore;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

type Matcher<A, B> = dyn InitialEntityMatcher<
    <A as EntityRepository>::Id,
    <A as EntityRepository>::Entity,
    <B as EntityRepository>::Id,
    <B as EntityRepository>::Entity,
>;

/// Synchronizes two repositories according to a [`SyncConfig`].
///
/// Each call to [`Synchronizer::synchronize`] performs one complete run:
///
/// 1. Load the persisted relations
/// 2. Query the versions of both sides and diff them against the relations
/// 3. Pair new entities with the initial matcher
/// 4. Derive one sync state per relation and per new entity
/// 5. Execute the states in chunks
/// 6. Persist the relations, also when the run was aborted
///
/// Only one run per profile may be active at a time; callers that schedule
/// runs are responsible for that.
pub struct Synchronizer<A: EntityRepository, B: EntityRepository, M> {
    config: SyncConfig,
    a: Arc<A>,
    b: Arc<B>,
    mapper: Arc<M>,
    relations: RelationStore,
    matcher: Option<Arc<Matcher<A, B>>>,
    conflicts: Arc<dyn ConflictResolutionStrategy>,
    exceptions: Arc<dyn ExceptionHandlingStrategy>,
    progress: Arc<dyn ProgressReporter>,
    a_comparer: Arc<dyn VersionComparer<A::Version>>,
    b_comparer: Arc<dyn VersionComparer<B::Version>>,
    cancelled: AtomicBool,
    last_report: RwLock<Option<SyncReport>>,
}

impl<A, B, M> Synchronizer<A, B, M>
where
    A: EntityRepository,
    B: EntityRepository,
    M: EntityMapper<A::Entity, B::Entity>,
{
    /// Creates a synchronizer.
    ///
    /// Relations are persisted in `store`; use one store per profile.
    pub fn new(config: SyncConfig, a: Arc<A>, b: Arc<B>, mapper: M, store: Arc<dyn StateStore>) -> Self {
        let conflicts = Arc::new(config.conflict_policy);
        Self {
            config,
            a,
            b,
            mapper: Arc::new(mapper),
            relations: RelationStore::new(store),
            matcher: None,
            conflicts,
            exceptions: Arc::new(DefaultExceptionHandling),
            progress: Arc::new(NullProgress),
            a_comparer: Arc::new(DefaultVersionComparer),
            b_comparer: Arc::new(DefaultVersionComparer),
            cancelled: AtomicBool::new(false),
            last_report: RwLock::new(None),
        }
    }

    /// Pairs unrelated entities with `matcher` before creating anything.
    ///
    /// Only used while [`SyncConfig::initial_matching`] is enabled.
    pub fn with_matcher(
        mut self,
        matcher: impl InitialEntityMatcher<A::Id, A::Entity, B::Id, B::Entity> + 'static,
    ) -> Self {
        self.matcher = Some(Arc::new(matcher));
        self
    }

    /// Replaces the conflict strategy derived from the configured policy.
    pub fn with_conflict_strategy(
        mut self,
        strategy: impl ConflictResolutionStrategy + 'static,
    ) -> Self {
        self.conflicts = Arc::new(strategy);
        self
    }

    /// Replaces the default error classification.
    pub fn with_exception_handling(
        mut self,
        strategy: impl ExceptionHandlingStrategy + 'static,
    ) -> Self {
        self.exceptions = Arc::new(strategy);
        self
    }

    /// Reports execution progress to `progress`.
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Replaces the version comparers of both sides.
    pub fn with_version_comparers(
        mut self,
        a: Arc<dyn VersionComparer<A::Version>>,
        b: Arc<dyn VersionComparer<B::Version>>,
    ) -> Self {
        self.a_comparer = a;
        self.b_comparer = b;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the A-side repository.
    pub fn a_repository(&self) -> &Arc<A> {
        &self.a
    }

    /// Returns the B-side repository.
    pub fn b_repository(&self) -> &Arc<B> {
        &self.b
    }

    /// Returns the report of the last run, including aborted runs.
    pub fn last_report(&self) -> Option<SyncReport> {
        self.last_report.read().clone()
    }

    /// Requests cancellation of the running synchronization.
    ///
    /// The run stops before its next job and persists what was completed.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true if cancellation was requested and not yet consumed by a
    /// run.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Performs one synchronization run.
    ///
    /// # Errors
    ///
    /// Returns the error that stopped the run. Per-entity failures do not
    /// fail the run; they are listed in the returned report.
    pub async fn synchronize(&self) -> SyncResult<SyncReport> {
        self.config.validate()?;

        let context = SyncContext::new(self.config.profile.clone(), self.config.mode);
        let span = info_span!(
            "sync_run",
            profile = %context.profile,
            run_id = %context.run_id
        );

        let (result, mut report) = self.run(&context).instrument(span).await;
        self.cancelled.store(false, Ordering::SeqCst);

        report.finished_at = Some(Utc::now());
        *self.last_report.write() = Some(report.clone());
        result.map(|()| report)
    }

    async fn run(&self, context: &SyncContext) -> (SyncResult<()>, SyncReport) {
        let mut report = SyncReport::new(context.run_id, context.profile.clone(), context.started_at);
        info!(mode = ?self.config.mode, "synchronization started");

        let known = match self.load_relations() {
            Ok(known) => known,
            Err(e) => return self.abort_early(report, e),
        };

        let known_a: Vec<A::Id> = known.iter().map(|r| r.a_id.clone()).collect();
        let known_b: Vec<B::Id> = known.iter().map(|r| r.b_id.clone()).collect();
        let a_versions = match self.a.get_versions(self.config.query_range, &known_a).await {
            Ok(versions) => versions,
            Err(e) => return self.abort_early(report, e),
        };
        let b_versions = match self.b.get_versions(self.config.query_range, &known_b).await {
            Ok(versions) => versions,
            Err(e) => return self.abort_early(report, e),
        };

        let mut a_storage = VersionStorage::with_known(
            known
                .iter()
                .map(|r| EntityVersion::new(r.a_id.clone(), r.a_version.clone())),
            self.a_comparer.clone(),
        );
        let mut b_storage = VersionStorage::with_known(
            known
                .iter()
                .map(|r| EntityVersion::new(r.b_id.clone(), r.b_version.clone())),
            self.b_comparer.clone(),
        );
        let a_delta = a_storage.set_new_versions(a_versions);
        let b_delta = b_storage.set_new_versions(b_versions);
        debug!(
            a_added = a_delta.added.len(),
            a_changed = a_delta.changed.len(),
            a_deleted = a_delta.deleted.len(),
            b_added = b_delta.added.len(),
            b_changed = b_delta.changed.len(),
            b_deleted = b_delta.deleted.len(),
            "versions compared"
        );

        let factory = StateFactory::new(self.config.mode, self.conflicts.clone());
        let mut states: Vec<StateOf<A, B>> = {
            let a_status = StatusLookup::new(&a_delta);
            let b_status = StatusLookup::new(&b_delta);
            known
                .into_iter()
                .map(|record| {
                    let a = a_status.status(&record.a_id);
                    let b = b_status.status(&record.b_id);
                    factory.for_relation(record, a, b)
                })
                .collect()
        };

        let mut added_a = a_delta.added;
        let mut added_b = b_delta.added;
        let mut cache = EntityCache::default();
        if let Err(e) = self
            .match_added(&mut added_a, &mut added_b, &mut cache, &mut states, &mut report)
            .await
        {
            return self.abort_early(report, e);
        }

        states.extend(added_a.into_iter().map(|a| factory.for_added_a(a)));
        states.extend(added_b.into_iter().map(|b| factory.for_added_b(b)));

        let mut executor = BatchExecutor::new(
            self.a.as_ref(),
            self.b.as_ref(),
            self.mapper.as_ref(),
            context,
            self.exceptions.as_ref(),
            self.progress.as_ref(),
            &self.cancelled,
            self.config.chunk_size,
        )
        .with_cache(cache)
        .with_report(report);
        let outcome = executor.execute(states).await;
        let (records, mut report) = executor.finish();

        let saved = self.relations.save(&records);
        let result = match (outcome, saved) {
            (Ok(()), Ok(())) => {
                info!(
                    writes = report.total_writes(),
                    relations = records.len(),
                    skipped = report.skipped_with_error,
                    "synchronization finished"
                );
                Ok(())
            }
            (Ok(()), Err(e)) => {
                error!(error = %e, "persisting relations failed");
                report.abort(None, String::new(), e.to_string());
                Err(e)
            }
            (Err(e), saved) => {
                if let Err(save_error) = saved {
                    error!(error = %save_error, "persisting relations after abort failed");
                }
                Err(e)
            }
        };
        (result, report)
    }

    /// Loads the persisted relations, skipping records that reuse an id.
    fn load_relations(&self) -> SyncResult<Vec<RecordOf<A, B>>> {
        let records: Vec<RecordOf<A, B>> = self.relations.load()?.unwrap_or_default();

        let mut seen = EntityRelationStorage::new();
        let mut kept = Vec::with_capacity(records.len());
        for record in records {
            if seen
                .add_relation(record.a_id.clone(), record.b_id.clone())
                .is_ok()
            {
                kept.push(record);
            } else {
                warn!(a_id = ?record.a_id, b_id = ?record.b_id, "ignoring relation record with duplicate id");
            }
        }
        debug!(relations = kept.len(), "relations loaded");
        Ok(kept)
    }

    /// Runs the initial matcher on the new entities of both sides.
    ///
    /// Matched pairs leave `added_a`/`added_b` and become relations; the
    /// entities loaded for unmatched ones stay in `cache` for execution.
    async fn match_added(
        &self,
        added_a: &mut Vec<EntityVersion<A::Id, A::Version>>,
        added_b: &mut Vec<EntityVersion<B::Id, B::Version>>,
        cache: &mut EntityCache<A, B>,
        states: &mut Vec<StateOf<A, B>>,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let Some(matcher) = self.matcher.as_ref() else {
            return Ok(());
        };
        if !self.config.initial_matching || added_a.is_empty() || added_b.is_empty() {
            return Ok(());
        }

        if let Err(e) = self.load_added(added_a, added_b, cache).await {
            if self.exceptions.is_run_aborting(&e) {
                return Err(e);
            }
            self.defer_added(added_a, added_b, cache, report, &e).await;
            return Ok(());
        }

        let relations = {
            let a_entities: Vec<(&A::Id, &A::Entity)> = added_a
                .iter()
                .filter_map(|v| cache.a.get_key_value(&v.id))
                .collect();
            let b_entities: Vec<(&B::Id, &B::Entity)> = added_b
                .iter()
                .filter_map(|v| cache.b.get_key_value(&v.id))
                .collect();
            matcher.find_matching_entities(&a_entities, &b_entities)
        };
        if relations.is_empty() {
            return Ok(());
        }

        let mut matched_a = HashSet::new();
        let mut matched_b = HashSet::new();
        let mut released_a = Vec::new();
        let mut released_b = Vec::new();
        let b_versions: HashMap<&B::Id, &B::Version> =
            added_b.iter().map(|v| (&v.id, &v.version)).collect();
        for a in added_a.iter() {
            let Some(b_id) = relations.try_get_b_by_a(&a.id) else {
                continue;
            };
            let Some(b_version) = b_versions.get(b_id) else {
                continue;
            };
            states.push(EntitySyncState::DoNothing(RelationRecord::new(
                a.id.clone(),
                a.version.clone(),
                b_id.clone(),
                (*b_version).clone(),
            )));
            matched_a.insert(a.id.clone());
            matched_b.insert(b_id.clone());
            report.matched += 1;
        }
        drop(b_versions);

        added_a.retain(|v| !matched_a.contains(&v.id));
        added_b.retain(|v| !matched_b.contains(&v.id));
        for id in &matched_a {
            released_a.extend(cache.a.remove(id));
        }
        for id in &matched_b {
            released_b.extend(cache.b.remove(id));
        }
        info!(matched = matched_a.len(), "initial matching related existing entities");

        if !released_a.is_empty() {
            self.a.cleanup(released_a).await;
        }
        if !released_b.is_empty() {
            self.b.cleanup(released_b).await;
        }
        Ok(())
    }

    async fn load_added(
        &self,
        added_a: &[EntityVersion<A::Id, A::Version>],
        added_b: &[EntityVersion<B::Id, B::Version>],
        cache: &mut EntityCache<A, B>,
    ) -> SyncResult<()> {
        for chunk in added_a.chunks(self.config.chunk_size) {
            let ids: Vec<A::Id> = chunk.iter().map(|v| v.id.clone()).collect();
            cache.a.extend(self.a.get(&ids).await?);
        }
        for chunk in added_b.chunks(self.config.chunk_size) {
            let ids: Vec<B::Id> = chunk.iter().map(|v| v.id.clone()).collect();
            cache.b.extend(self.b.get(&ids).await?);
        }
        Ok(())
    }

    /// Leaves all new entities for the next run.
    ///
    /// Creating counterparts without matching could duplicate entities that
    /// already exist on both sides. Nothing is recorded for them, so the next
    /// run sees them as new again.
    async fn defer_added(
        &self,
        added_a: &mut Vec<EntityVersion<A::Id, A::Version>>,
        added_b: &mut Vec<EntityVersion<B::Id, B::Version>>,
        cache: &mut EntityCache<A, B>,
        report: &mut SyncReport,
        error: &SyncError,
    ) {
        warn!(
            a_added = added_a.len(),
            b_added = added_b.len(),
            error = %error,
            "loading entities for initial matching failed, new entities deferred"
        );
        let message = format!("initial matching failed: {error}");
        for version in added_a.drain(..) {
            report.skipped_with_error += 1;
            report.warn(SyncAction::Discard, format!("A {:?}", version.id), message.clone());
        }
        for version in added_b.drain(..) {
            report.skipped_with_error += 1;
            report.warn(SyncAction::Discard, format!("B {:?}", version.id), message.clone());
        }

        let cache = std::mem::take(cache);
        let released_a: Vec<A::Entity> = cache.a.into_values().collect();
        let released_b: Vec<B::Entity> = cache.b.into_values().collect();
        if !released_a.is_empty() {
            self.a.cleanup(released_a).await;
        }
        if !released_b.is_empty() {
            self.b.cleanup(released_b).await;
        }
    }

    fn abort_early(&self, mut report: SyncReport, e: SyncError) -> (SyncResult<()>, SyncReport) {
        error!(error = %e, "synchronization failed before execution");
        report.abort(None, String::new(), e.to_string());
        (Err(e), report)
    }
}

impl<A: EntityRepository, B: EntityRepository, M> std::fmt::Debug for Synchronizer<A, B, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("config", &self.config)
            .field("relations", &self.relations)
            .finish_non_exhaustive()
    }
}

/// Current status of the ids of one side.
struct StatusLookup<'a, I, V> {
    changed: HashMap<&'a I, &'a V>,
    unchanged: HashMap<&'a I, &'a V>,
}

impl<'a, I, V> StatusLookup<'a, I, V>
where
    I: Eq + std::hash::Hash,
    V: Clone,
{
    fn new(delta: &'a VersionDelta<I, V>) -> Self {
        Self {
            changed: delta.changed.iter().map(|v| (&v.id, &v.version)).collect(),
            unchanged: delta.unchanged.iter().map(|v| (&v.id, &v.version)).collect(),
        }
    }

    fn status(&self, id: &I) -> SideStatus<V> {
        if let Some(version) = self.changed.get(id) {
            SideStatus::Changed((*version).clone())
        } else if let Some(version) = self.unchanged.get(id) {
            SideStatus::Unchanged((*version).clone())
        } else {
            SideStatus::Deleted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncMode;
    use crate::mapper::IdentityMapper;
    use crate::memory::{InMemoryRepository, InjectedFailure, Operation};
    use crate::report::CountingProgress;
    use crate::repository::QueryRange;
    use crate::types::Direction;
    use gensync_storage::InMemoryStore;

    type Repo = InMemoryRepository<u32, String>;

    struct Fixture {
        a: Arc<Repo>,
        b: Arc<Repo>,
        store: Arc<InMemoryStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                a: Arc::new(InMemoryRepository::new(|n| n as u32)),
                b: Arc::new(InMemoryRepository::new(|n| 1000 + n as u32)),
                store: Arc::new(InMemoryStore::new()),
            }
        }

        fn synchronizer(&self, config: SyncConfig) -> Synchronizer<Repo, Repo, IdentityMapper> {
            Synchronizer::new(
                config,
                self.a.clone(),
                self.b.clone(),
                IdentityMapper,
                self.store.clone(),
            )
        }

        fn records(&self) -> Vec<RelationRecord<u32, u64, u32, u64>> {
            RelationStore::new(self.store.clone())
                .load()
                .unwrap()
                .unwrap_or_default()
        }
    }

    #[tokio::test]
    async fn first_run_creates_and_second_run_is_idle() {
        let fx = Fixture::new();
        fx.a.insert("alpha".into());
        fx.b.insert("beta".into());
        let sync = fx.synchronizer(SyncConfig::new("test"));

        let report = sync.synchronize().await.unwrap();
        assert_eq!(report.a.created, 1);
        assert_eq!(report.b.created, 1);
        assert_eq!(fx.records().len(), 2);

        let second = sync.synchronize().await.unwrap();
        assert_eq!(second.total_writes(), 0);
        assert!(!second.has_warnings());
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_io() {
        let fx = Fixture::new();
        let sync = fx.synchronizer(SyncConfig::new("test").with_chunk_size(0));

        let err = sync.synchronize().await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidConfiguration(_)));
        assert_eq!(fx.store.save_count(), 0);
    }

    #[tokio::test]
    async fn version_query_failure_does_not_save() {
        let fx = Fixture::new();
        fx.a.insert("alpha".into());
        fx.b.fail_next(Operation::GetVersions, InjectedFailure::Overload);
        let sync = fx.synchronizer(SyncConfig::new("test"));

        let err = sync.synchronize().await.unwrap_err();
        assert!(err.retry_not_before().is_some());
        assert_eq!(fx.store.save_count(), 0);
        assert_eq!(fx.a.write_count() + fx.b.write_count(), 0);

        let report = sync.last_report().unwrap();
        assert!(report.has_errors());
        assert!(report.finished_at.is_some());
    }

    #[tokio::test]
    async fn cancelled_run_persists_nothing_new_and_resets() {
        let fx = Fixture::new();
        fx.a.insert("alpha".into());
        let sync = fx.synchronizer(SyncConfig::new("test"));

        sync.cancel();
        assert!(sync.is_cancelled());
        let err = sync.synchronize().await.unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert!(!sync.is_cancelled());
        assert_eq!(fx.b.len(), 0);
        assert!(fx.records().is_empty());

        sync.synchronize().await.unwrap();
        assert_eq!(fx.b.len(), 1);
    }

    #[tokio::test]
    async fn progress_is_reported_per_job() {
        let fx = Fixture::new();
        for name in ["a", "b", "c"] {
            fx.a.insert(name.into());
        }
        let progress = Arc::new(CountingProgress::new());
        let sync = fx
            .synchronizer(
                SyncConfig::new("test").with_mode(SyncMode::OneWayReplicate(Direction::AToB)),
            )
            .with_progress(progress.clone());

        sync.synchronize().await.unwrap();

        assert_eq!(progress.total(), 3);
        assert_eq!(progress.completed(), 3);
        assert_eq!(progress.finished_count(), 1);
    }

    #[tokio::test]
    async fn duplicate_persisted_records_are_ignored() {
        let fx = Fixture::new();
        let a_id = fx.a.insert("alpha".into());
        let b_id = fx.b.insert("alpha".into());
        let other_b = fx.b.insert("other".into());
        let a_version = fx.a.version(&a_id).unwrap();
        let b_version = fx.b.version(&b_id).unwrap();
        let other_version = fx.b.version(&other_b).unwrap();

        RelationStore::new(fx.store.clone())
            .save(&[
                RelationRecord::new(a_id, a_version, b_id, b_version),
                RelationRecord::new(a_id, a_version, other_b, other_version),
            ])
            .unwrap();

        let sync = fx.synchronizer(
            SyncConfig::new("test").with_mode(SyncMode::OneWayMerge(Direction::AToB)),
        );
        let report = sync.synchronize().await.unwrap();

        assert_eq!(report.total_writes(), 0);
        let records = fx.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].b_id, b_id);
    }

    #[tokio::test]
    async fn query_range_reaches_repositories() {
        let fx = Fixture::new();
        let range = QueryRange {
            from: Some(Utc::now()),
            to: None,
        };
        let sync = fx.synchronizer(SyncConfig::new("test").with_query_range(range));

        sync.synchronize().await.unwrap();

        assert_eq!(fx.a.last_range(), Some(range));
        assert_eq!(fx.b.last_range(), Some(range));
    }
}
