//! In-memory repository for tests and embedding.

use crate::error::{SyncError, SyncResult};
use crate::repository::{EntityInitializer, EntityModifier, EntityRepository, QueryRange, SyncId};
use crate::version::EntityVersion;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Repository operation a failure can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `get_versions`
    GetVersions,
    /// `get`
    Get,
    /// `create`
    Create,
    /// `try_update`
    Update,
    /// `try_delete`
    Delete,
}

/// Kind of an injected failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    /// A retryable repository error that only affects the entity.
    Transient,
    /// A permanent repository error that only affects the entity.
    Permanent,
    /// Authentication failure, stops the run.
    Authentication,
    /// Overload with a back-off hint, stops the run.
    Overload,
    /// Cancellation, stops the run.
    Cancel,
}

impl InjectedFailure {
    fn to_error(self, operation: Operation) -> SyncError {
        match self {
            InjectedFailure::Transient => {
                SyncError::repository_retryable(format!("injected {operation:?} failure"))
            }
            InjectedFailure::Permanent => {
                SyncError::repository(format!("injected {operation:?} failure"))
            }
            InjectedFailure::Authentication => {
                SyncError::AuthenticationFailed("injected credential rejection".into())
            }
            InjectedFailure::Overload => SyncError::overloaded(
                "injected overload",
                Some(Utc::now() + chrono::Duration::minutes(5)),
            ),
            InjectedFailure::Cancel => SyncError::Cancelled,
        }
    }
}

type EntityPredicate<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;

struct FailureRule<I, E> {
    operation: Operation,
    id: Option<I>,
    predicate: Option<EntityPredicate<E>>,
    failure: InjectedFailure,
    skip: usize,
    remaining: Option<usize>,
}

impl<I: PartialEq, E> FailureRule<I, E> {
    fn applies(&self, operation: Operation, ids: &[&I], entity: Option<&E>) -> bool {
        if self.operation != operation || self.remaining == Some(0) {
            return false;
        }
        if let Some(id) = &self.id {
            if !ids.iter().any(|candidate| *candidate == id) {
                return false;
            }
        }
        match (&self.predicate, entity) {
            (Some(predicate), Some(entity)) => predicate(entity),
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

struct Inner<I, E> {
    entries: Vec<(I, u64, E)>,
    next_version: u64,
    next_id: u64,
    creates: u64,
    updates: u64,
    deletes: u64,
    cleaned_up: u64,
    last_range: Option<QueryRange>,
    failures: Vec<FailureRule<I, E>>,
}

impl<I: PartialEq, E> Inner<I, E> {
    fn position(&self, id: &I) -> Option<usize> {
        self.entries.iter().position(|(candidate, _, _)| candidate == id)
    }

    fn bump_version(&mut self) -> u64 {
        let version = self.next_version;
        self.next_version += 1;
        version
    }

    fn check(&mut self, operation: Operation, ids: &[&I], entity: Option<&E>) -> SyncResult<()> {
        for rule in &mut self.failures {
            if !rule.applies(operation, ids, entity) {
                continue;
            }
            if rule.skip > 0 {
                rule.skip -= 1;
                continue;
            }
            if let Some(remaining) = rule.remaining.as_mut() {
                *remaining -= 1;
            }
            return Err(rule.failure.to_error(operation));
        }
        Ok(())
    }
}

/// Versioned in-memory entity collection.
///
/// Versions are drawn from one counter, so every write produces a version
/// never seen before. Writes through [`EntityRepository`] are counted;
/// the mutation helpers (`insert`, `modify`, `remove`) simulate changes
/// made by other users and are not.
///
/// # Example
///
/// ```rust
/// use gensync_engine::InMemoryRepository;
///
/// let repo: InMemoryRepository<u32, String> = InMemoryRepository::new(|n| n as u32);
/// let id = repo.insert("first".to_string());
/// assert!(repo.modify(&id, |e| e.push_str(" edited")));
/// assert_eq!(repo.entity(&id).unwrap(), "first edited");
/// assert_eq!(repo.write_count(), 0);
/// ```
pub struct InMemoryRepository<I, E> {
    inner: Mutex<Inner<I, E>>,
    id_generator: Box<dyn Fn(u64) -> I + Send + Sync>,
    modified: Option<Box<dyn Fn(&E) -> Option<DateTime<Utc>> + Send + Sync>>,
}

impl<I, E> InMemoryRepository<I, E>
where
    I: SyncId,
    E: Clone + Default + Send + Sync + 'static,
{
    /// Creates an empty repository; `id_generator` receives 1, 2, 3, ...
    pub fn new(id_generator: impl Fn(u64) -> I + Send + Sync + 'static) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: Vec::new(),
                next_version: 1,
                next_id: 1,
                creates: 0,
                updates: 0,
                deletes: 0,
                cleaned_up: 0,
                last_range: None,
                failures: Vec::new(),
            }),
            id_generator: Box::new(id_generator),
            modified: None,
        }
    }

    /// Reports modification times extracted from the entities.
    ///
    /// The times also decide which entities a bounded `get_versions` query
    /// returns.
    pub fn with_modified(
        mut self,
        modified: impl Fn(&E) -> Option<DateTime<Utc>> + Send + Sync + 'static,
    ) -> Self {
        self.modified = Some(Box::new(modified));
        self
    }

    /// Adds an entity with a generated id.
    pub fn insert(&self, entity: E) -> I {
        let mut inner = self.inner.lock();
        let id = self.generate_id(&mut inner);
        let version = inner.bump_version();
        inner.entries.push((id.clone(), version, entity));
        id
    }

    /// Adds or replaces an entity with a given id.
    pub fn insert_with_id(&self, id: I, entity: E) {
        let mut inner = self.inner.lock();
        let version = inner.bump_version();
        match inner.position(&id) {
            Some(index) => inner.entries[index] = (id, version, entity),
            None => inner.entries.push((id, version, entity)),
        }
    }

    /// Changes an entity and gives it a new version.
    pub fn modify(&self, id: &I, change: impl FnOnce(&mut E)) -> bool {
        let mut inner = self.inner.lock();
        let Some(index) = inner.position(id) else {
            return false;
        };
        let version = inner.bump_version();
        let entry = &mut inner.entries[index];
        change(&mut entry.2);
        entry.1 = version;
        true
    }

    /// Gives an entity a new version without changing it.
    pub fn touch(&self, id: &I) -> bool {
        self.modify(id, |_| {})
    }

    /// Removes an entity.
    pub fn remove(&self, id: &I) -> bool {
        let mut inner = self.inner.lock();
        match inner.position(id) {
            Some(index) => {
                inner.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Returns a copy of an entity.
    pub fn entity(&self, id: &I) -> Option<E> {
        let inner = self.inner.lock();
        inner.position(id).map(|index| inner.entries[index].2.clone())
    }

    /// Returns the current version of an entity.
    pub fn version(&self, id: &I) -> Option<u64> {
        let inner = self.inner.lock();
        inner.position(id).map(|index| inner.entries[index].1)
    }

    /// Returns all ids in insertion order.
    pub fn ids(&self) -> Vec<I> {
        self.inner.lock().entries.iter().map(|(id, _, _)| id.clone()).collect()
    }

    /// Returns copies of all entities in insertion order.
    pub fn entities(&self) -> Vec<(I, E)> {
        self.inner
            .lock()
            .entries
            .iter()
            .map(|(id, _, entity)| (id.clone(), entity.clone()))
            .collect()
    }

    /// Returns the number of entities.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns true if the repository holds no entities.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Successful `create` calls.
    pub fn creates(&self) -> u64 {
        self.inner.lock().creates
    }

    /// Successful `try_update` calls.
    pub fn updates(&self) -> u64 {
        self.inner.lock().updates
    }

    /// Successful `try_delete` calls.
    pub fn deletes(&self) -> u64 {
        self.inner.lock().deletes
    }

    /// Sum of creates, updates and deletes.
    pub fn write_count(&self) -> u64 {
        let inner = self.inner.lock();
        inner.creates + inner.updates + inner.deletes
    }

    /// Resets the write counters.
    pub fn reset_counters(&self) {
        let mut inner = self.inner.lock();
        inner.creates = 0;
        inner.updates = 0;
        inner.deletes = 0;
        inner.cleaned_up = 0;
    }

    /// Number of entities handed to `cleanup`.
    pub fn cleaned_up(&self) -> u64 {
        self.inner.lock().cleaned_up
    }

    /// Range passed to the last `get_versions` call.
    pub fn last_range(&self) -> Option<QueryRange> {
        self.inner.lock().last_range
    }

    /// Makes the next call of `operation` fail.
    pub fn fail_next(&self, operation: Operation, failure: InjectedFailure) {
        self.push_rule(operation, None, None, failure, 0, Some(1));
    }

    /// Makes one call of `operation` fail after `successes` calls went through.
    pub fn fail_after(&self, operation: Operation, successes: usize, failure: InjectedFailure) {
        self.push_rule(operation, None, None, failure, successes, Some(1));
    }

    /// Makes every call of `operation` fail.
    pub fn fail_always(&self, operation: Operation, failure: InjectedFailure) {
        self.push_rule(operation, None, None, failure, 0, None);
    }

    /// Makes every call of `operation` involving `id` fail.
    pub fn fail_for_id(&self, operation: Operation, id: I, failure: InjectedFailure) {
        self.push_rule(operation, Some(id), None, failure, 0, None);
    }

    /// Makes every create of an entity matching `predicate` fail.
    pub fn fail_create_if(
        &self,
        predicate: impl Fn(&E) -> bool + Send + Sync + 'static,
        failure: InjectedFailure,
    ) {
        self.push_rule(
            Operation::Create,
            None,
            Some(Box::new(predicate)),
            failure,
            0,
            None,
        );
    }

    /// Removes all injected failures.
    pub fn clear_failures(&self) {
        self.inner.lock().failures.clear();
    }

    fn push_rule(
        &self,
        operation: Operation,
        id: Option<I>,
        predicate: Option<EntityPredicate<E>>,
        failure: InjectedFailure,
        skip: usize,
        remaining: Option<usize>,
    ) {
        self.inner.lock().failures.push(FailureRule {
            operation,
            id,
            predicate,
            failure,
            skip,
            remaining,
        });
    }

    fn generate_id(&self, inner: &mut Inner<I, E>) -> I {
        loop {
            let id = (self.id_generator)(inner.next_id);
            inner.next_id += 1;
            if inner.position(&id).is_none() {
                return id;
            }
        }
    }
}

#[async_trait]
impl<I, E> EntityRepository for InMemoryRepository<I, E>
where
    I: SyncId,
    E: Clone + Default + Send + Sync + 'static,
{
    type Id = I;
    type Version = u64;
    type Entity = E;

    async fn get_versions(
        &self,
        range: QueryRange,
        known: &[I],
    ) -> SyncResult<Vec<EntityVersion<I, u64>>> {
        let mut inner = self.inner.lock();
        inner.check(Operation::GetVersions, &[], None)?;
        inner.last_range = Some(range);
        Ok(inner
            .entries
            .iter()
            .filter(|(id, _, entity)| {
                // Entities without a modification time are always in range.
                range.is_unbounded()
                    || known.contains(id)
                    || self.last_modified(entity).map_or(true, |at| range.contains(at))
            })
            .map(|(id, version, _)| EntityVersion::new(id.clone(), *version))
            .collect())
    }

    async fn get(&self, ids: &[I]) -> SyncResult<Vec<(I, E)>> {
        let mut inner = self.inner.lock();
        let id_refs: Vec<&I> = ids.iter().collect();
        inner.check(Operation::Get, &id_refs, None)?;
        Ok(ids
            .iter()
            .filter_map(|id| {
                inner
                    .position(id)
                    .map(|index| (id.clone(), inner.entries[index].2.clone()))
            })
            .collect())
    }

    async fn create(
        &self,
        initializer: EntityInitializer<'_, E>,
    ) -> SyncResult<EntityVersion<I, u64>> {
        let entity = initializer(E::default())?;
        let mut inner = self.inner.lock();
        inner.check(Operation::Create, &[], Some(&entity))?;
        let id = self.generate_id(&mut inner);
        let version = inner.bump_version();
        inner.entries.push((id.clone(), version, entity));
        inner.creates += 1;
        Ok(EntityVersion::new(id, version))
    }

    async fn try_update(
        &self,
        id: &I,
        expected: &u64,
        current: E,
        modifier: EntityModifier<'_, E>,
    ) -> SyncResult<Option<EntityVersion<I, u64>>> {
        {
            let mut inner = self.inner.lock();
            inner.check(Operation::Update, &[id], None)?;
            match inner.position(id) {
                Some(index) if inner.entries[index].1 == *expected => {}
                _ => return Ok(None),
            }
        }

        let updated = modifier(current)?;

        let mut inner = self.inner.lock();
        let Some(index) = inner.position(id) else {
            return Ok(None);
        };
        if inner.entries[index].1 != *expected {
            return Ok(None);
        }
        let version = inner.bump_version();
        inner.entries[index].1 = version;
        inner.entries[index].2 = updated;
        inner.updates += 1;
        Ok(Some(EntityVersion::new(id.clone(), version)))
    }

    async fn try_delete(&self, id: &I, expected: &u64) -> SyncResult<bool> {
        let mut inner = self.inner.lock();
        inner.check(Operation::Delete, &[id], None)?;
        match inner.position(id) {
            Some(index) if inner.entries[index].1 == *expected => {
                inner.entries.remove(index);
                inner.deletes += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn last_modified(&self, entity: &E) -> Option<DateTime<Utc>> {
        self.modified.as_ref().and_then(|modified| modified(entity))
    }

    async fn cleanup(&self, entities: Vec<E>) {
        self.inner.lock().cleaned_up += entities.len() as u64;
    }
}

impl<I, E> std::fmt::Debug for InMemoryRepository<I, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("InMemoryRepository")
            .field("entities", &inner.entries.len())
            .field("creates", &inner.creates)
            .field("updates", &inner.updates)
            .field("deletes", &inner.deletes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> InMemoryRepository<u32, String> {
        InMemoryRepository::new(|n| n as u32)
    }

    #[tokio::test]
    async fn versions_change_on_every_write() {
        let repo = repo();
        let id = repo.insert("a".into());
        let before = repo.version(&id).unwrap();

        repo.touch(&id);
        let after = repo.version(&id).unwrap();
        assert_ne!(before, after);

        let versions = repo.get_versions(QueryRange::default(), &[]).await.unwrap();
        assert_eq!(versions, vec![EntityVersion::new(id, after)]);
    }

    #[tokio::test]
    async fn bounded_range_keeps_known_entities() {
        use chrono::TimeZone;

        let jan = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let repo: InMemoryRepository<u32, (String, Option<DateTime<Utc>>)> =
            InMemoryRepository::new(|n| n as u32).with_modified(|e: &(String, Option<DateTime<Utc>>)| e.1);
        let recent = repo.insert(("recent".into(), Some(jan)));
        let old = repo.insert(("old".into(), Some(jan - chrono::Duration::days(400))));
        let undated = repo.insert(("undated".into(), None));
        let range = QueryRange {
            from: Some(jan - chrono::Duration::days(30)),
            to: None,
        };

        let ids = |versions: Vec<EntityVersion<u32, u64>>| -> Vec<u32> {
            versions.into_iter().map(|v| v.id).collect()
        };
        assert_eq!(ids(repo.get_versions(range, &[]).await.unwrap()), vec![recent, undated]);
        assert_eq!(
            ids(repo.get_versions(range, &[old]).await.unwrap()),
            vec![recent, old, undated]
        );
        assert_eq!(ids(repo.get_versions(QueryRange::unbounded(), &[]).await.unwrap()).len(), 3);
    }

    #[tokio::test]
    async fn create_uses_initializer() {
        let repo = repo();
        let created = repo
            .create(Box::new(|blank: String| Ok(blank + "mapped")))
            .await
            .unwrap();

        assert_eq!(repo.entity(&created.id).unwrap(), "mapped");
        assert_eq!(repo.version(&created.id), Some(created.version));
        assert_eq!(repo.creates(), 1);
    }

    #[tokio::test]
    async fn update_checks_expected_version() {
        let repo = repo();
        let id = repo.insert("a".into());
        let version = repo.version(&id).unwrap();

        let stale = repo
            .try_update(&id, &(version + 100), "a".into(), Box::new(|e: String| Ok(e + "!")))
            .await
            .unwrap();
        assert!(stale.is_none());
        assert_eq!(repo.updates(), 0);

        let updated = repo
            .try_update(&id, &version, "a".into(), Box::new(|e: String| Ok(e + "!")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(repo.entity(&id).unwrap(), "a!");
        assert_eq!(repo.version(&id), Some(updated.version));
    }

    #[tokio::test]
    async fn delete_of_missing_entity_returns_false() {
        let repo = repo();
        let id = repo.insert("a".into());
        let version = repo.version(&id).unwrap();

        assert!(repo.try_delete(&id, &version).await.unwrap());
        assert!(!repo.try_delete(&id, &version).await.unwrap());
        assert_eq!(repo.deletes(), 1);
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn get_omits_missing_ids() {
        let repo = repo();
        let first = repo.insert("a".into());
        let loaded = repo.get(&[first, 99]).await.unwrap();
        assert_eq!(loaded, vec![(first, "a".to_string())]);
    }

    #[tokio::test]
    async fn injected_failures() {
        let repo = repo();
        repo.fail_next(Operation::GetVersions, InjectedFailure::Authentication);
        let err = repo.get_versions(QueryRange::default(), &[]).await.unwrap_err();
        assert!(err.is_run_aborting());
        assert!(repo.get_versions(QueryRange::default(), &[]).await.is_ok());

        repo.fail_create_if(|e: &String| e.contains("bad"), InjectedFailure::Transient);
        let rejected = repo.create(Box::new(|_: String| Ok("bad".to_string()))).await;
        assert!(matches!(rejected, Err(SyncError::Repository { retryable: true, .. })));
        assert!(repo.create(Box::new(|_: String| Ok("good".to_string()))).await.is_ok());
        assert_eq!(repo.len(), 1);

        repo.fail_after(Operation::Create, 1, InjectedFailure::Cancel);
        assert!(repo.create(Box::new(|_: String| Ok("one".to_string()))).await.is_ok());
        assert!(matches!(
            repo.create(Box::new(|_: String| Ok("two".to_string()))).await,
            Err(SyncError::Cancelled)
        ));
        assert!(repo.create(Box::new(|_: String| Ok("three".to_string()))).await.is_ok());
    }

    #[tokio::test]
    async fn mapping_errors_leave_repository_unchanged() {
        let repo = repo();
        let result = repo
            .create(Box::new(|_: String| Err(SyncError::mapping("no name"))))
            .await;
        assert!(matches!(result, Err(SyncError::Mapping(_))));
        assert!(repo.is_empty());
        assert_eq!(repo.creates(), 0);
    }
}
