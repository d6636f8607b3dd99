//! Migration execution engine.
//!
//! Every migrating call holds the store lock for its whole duration, refuses
//! to run over a dirty record, and marks the record dirty before each step so
//! a failure half way through is visible to the next run.

mod report;

pub use report::{AppliedStep, MigrationReport, MigrationStatus};

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use strata_core::backend::{Driver, VersionStore};
use strata_core::error::{Result, StrataError};
use strata_core::migration::{Version, VersionRecord};
use strata_core::plan::{PlannedStep, StepPlan, Target};

use crate::source::MigrationSource;

/// Default time to wait for another run to release the lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(15);

/// Applies migrations from a source to a backend.
pub struct Migrator<S, B> {
    source: S,
    backend: B,
    lock_timeout: Duration,
}

impl<S, B> Migrator<S, B>
where
    S: MigrationSource,
    B: VersionStore + Driver,
{
    pub fn new(source: S, backend: B) -> Self {
        Self {
            source,
            backend,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Set how long to wait for the run lock.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Give the backend back, e.g. to close the connection.
    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Apply every pending migration.
    pub async fn up(&mut self) -> Result<MigrationReport> {
        self.migrate(Target::Latest).await
    }

    /// Revert every applied migration.
    pub async fn down(&mut self) -> Result<MigrationReport> {
        self.migrate(Target::Base).await
    }

    /// Apply `n` migrations forward (`n > 0`) or revert `|n|` (`n < 0`).
    /// `n = 0` is a valid request that always yields `NoChange`.
    ///
    /// When fewer than `|n|` migrations remain in that direction the call
    /// fails with `ShortLimit` before anything is applied, rather than
    /// applying the remainder and then reporting the shortfall.
    pub async fn steps(&mut self, n: i64) -> Result<MigrationReport> {
        self.migrate(Target::Relative(n)).await
    }

    /// Migrate up or down until `version` is current.
    pub async fn goto(&mut self, version: Version) -> Result<MigrationReport> {
        self.migrate(Target::Version(version)).await
    }

    /// Record `version` as current and clean without running any script.
    ///
    /// This is the recovery path after a failed run: fix the database by
    /// hand, then force the version that matches its actual state.
    pub async fn force(&mut self, version: Version) -> Result<()> {
        if version != 0 && !self.source.list()?.contains(version) {
            return Err(StrataError::InvalidArgument(format!(
                "Cannot force unknown version {}",
                version
            )));
        }

        self.backend.lock(self.lock_timeout).await?;

        let result = match self.read_or_initialize().await {
            Ok(previous) => {
                warn!("Forcing version {} (was {})", version, previous);
                self.backend.write(VersionRecord::clean(version)).await
            }
            Err(e) => Err(e),
        };

        self.release_lock().await;
        result
    }

    /// The stored record. An uninitialized store reports version 0.
    pub async fn version(&mut self) -> Result<VersionRecord> {
        match self.backend.read().await {
            Err(StrataError::StoreUninitialized) => Ok(VersionRecord::default()),
            other => other,
        }
    }

    /// Applied and pending migrations.
    pub async fn status(&mut self) -> Result<MigrationStatus> {
        let current = self.version().await?;
        let set = self.source.list()?;

        let (applied, pending): (Vec<_>, Vec<_>) = set
            .iter()
            .cloned()
            .partition(|m| m.version <= current.version);

        Ok(MigrationStatus {
            current,
            applied,
            pending,
        })
    }

    async fn migrate(&mut self, target: Target) -> Result<MigrationReport> {
        self.backend.lock(self.lock_timeout).await?;

        let result = self.migrate_locked(target).await;

        // Always release the lock, even on error.
        self.release_lock().await;

        result
    }

    async fn release_lock(&mut self) {
        if let Err(e) = self.backend.unlock().await {
            warn!("Failed to release migration lock: {}", e);
        }
    }

    async fn migrate_locked(&mut self, target: Target) -> Result<MigrationReport> {
        let current = self.read_or_initialize().await?;
        if current.dirty {
            return Err(StrataError::Dirty {
                version: current.version,
            });
        }

        let set = self.source.list()?;
        let plan = StepPlan::compute(&set, current.version, target)?;
        info!(
            "Migrating {} from {} to {} ({} steps)",
            plan.direction,
            plan.from,
            plan.to,
            plan.len()
        );

        let mut steps = Vec::with_capacity(plan.len());
        let mut version = current.version;

        for step in &plan.steps {
            let elapsed = self.apply_step(version, step).await?;
            version = step.record_after;

            let description = set
                .get(step.version)
                .map(|m| m.description.clone())
                .unwrap_or_default();
            info!(
                "Migration {} {} ({}) in {:?}",
                step.version, step.direction, description, elapsed
            );
            steps.push(AppliedStep {
                version: step.version,
                description,
                direction: step.direction,
                elapsed,
            });
        }

        Ok(MigrationReport {
            direction: plan.direction,
            from: plan.from,
            to: version,
            steps,
        })
    }

    async fn apply_step(&mut self, current: Version, step: &PlannedStep) -> Result<Duration> {
        let script = self.source.read(step.version, step.direction)?;
        let statements = script.statements();
        let done = VersionRecord::clean(step.record_after);
        let started = Instant::now();

        debug!(
            "Applying migration {} {} ({} statements, transactional: {})",
            step.version,
            step.direction,
            statements.len(),
            script.transactional
        );

        self.backend.write(VersionRecord::dirty(current)).await?;

        let executed = if script.transactional {
            self.backend.execute_recorded(&statements, done).await
        } else {
            self.backend.execute(&statements, false).await
        };

        executed.map_err(|e| {
            let cause = match e {
                StrataError::Database(msg) => msg,
                other => other.to_string(),
            };
            StrataError::Execution {
                version: step.version,
                direction: step.direction,
                cause,
            }
        })?;

        if !script.transactional {
            self.backend.write(done).await?;
        }

        Ok(started.elapsed())
    }

    async fn read_or_initialize(&mut self) -> Result<VersionRecord> {
        match self.backend.read().await {
            Err(StrataError::StoreUninitialized) => {
                info!("Initializing version store");
                self.backend.initialize().await?;
                self.backend.read().await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::EmbeddedSource;
    use crate::testing::{reversible_source, up_only_source, MemoryBackend};
    use strata_core::migration::Direction;

    fn migrator(
        source: EmbeddedSource,
        backend: &MemoryBackend,
    ) -> Migrator<EmbeddedSource, MemoryBackend> {
        Migrator::new(source, backend.clone()).with_lock_timeout(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_up_from_empty_store() {
        let backend = MemoryBackend::new();
        let mut m = migrator(up_only_source(&[1, 2, 3]).unwrap(), &backend);

        let report = m.up().await.unwrap();
        assert_eq!(report.from, 0);
        assert_eq!(report.to, 3);
        assert_eq!(report.steps.len(), 3);
        assert_eq!(backend.record(), Some(VersionRecord::clean(3)));
        assert_eq!(
            backend.executed(),
            vec!["CREATE TABLE t1", "CREATE TABLE t2", "CREATE TABLE t3"]
        );
        assert!(!backend.is_locked());
    }

    #[tokio::test]
    async fn test_up_at_latest_is_no_change() {
        let backend = MemoryBackend::with_record(VersionRecord::clean(3));
        let mut m = migrator(up_only_source(&[1, 2, 3]).unwrap(), &backend);

        let err = m.up().await.unwrap_err();
        assert!(err.is_no_change());
        assert_eq!(backend.record(), Some(VersionRecord::clean(3)));
        assert_eq!(backend.writes(), 0);
    }

    #[tokio::test]
    async fn test_up_then_down_round_trip() {
        let backend = MemoryBackend::new();
        let mut m = migrator(reversible_source(&[1, 2, 5]).unwrap(), &backend);

        m.up().await.unwrap();
        let report = m.down().await.unwrap();

        assert_eq!(report.direction, Direction::Down);
        assert_eq!(report.to, 0);
        assert_eq!(backend.record(), Some(VersionRecord::clean(0)));
        assert_eq!(
            backend.executed()[3..],
            ["DROP TABLE t5", "DROP TABLE t2", "DROP TABLE t1"]
        );
    }

    #[tokio::test]
    async fn test_steps_forward_from_middle() {
        let backend = MemoryBackend::with_record(VersionRecord::clean(2));
        let mut m = migrator(reversible_source(&[1, 2, 3, 4, 5]).unwrap(), &backend);

        let report = m.steps(2).await.unwrap();
        assert_eq!(report.to, 4);
        assert_eq!(backend.executed(), vec!["CREATE TABLE t3", "CREATE TABLE t4"]);
        assert_eq!(backend.record(), Some(VersionRecord::clean(4)));
    }

    #[tokio::test]
    async fn test_steps_round_trip() {
        let backend = MemoryBackend::with_record(VersionRecord::clean(2));
        let mut m = migrator(reversible_source(&[1, 2, 3, 4, 5]).unwrap(), &backend);

        m.steps(3).await.unwrap();
        m.steps(-3).await.unwrap();
        assert_eq!(backend.record(), Some(VersionRecord::clean(2)));
    }

    #[tokio::test]
    async fn test_steps_zero_is_no_change() {
        let backend = MemoryBackend::with_record(VersionRecord::clean(1));
        let mut m = migrator(reversible_source(&[1, 2]).unwrap(), &backend);

        assert!(m.steps(0).await.unwrap_err().is_no_change());
        assert_eq!(backend.writes(), 0);
    }

    #[tokio::test]
    async fn test_steps_past_the_end_applies_nothing() {
        let backend = MemoryBackend::with_record(VersionRecord::clean(1));
        let mut m = migrator(reversible_source(&[1, 2, 3]).unwrap(), &backend);

        let err = m.steps(5).await.unwrap_err();
        assert!(matches!(
            err,
            StrataError::ShortLimit {
                requested: 5,
                available: 2
            }
        ));
        assert!(backend.executed().is_empty());
        assert_eq!(backend.writes(), 0);
        assert!(!backend.is_locked());
    }

    #[tokio::test]
    async fn test_failure_halts_and_leaves_dirty() {
        let backend = MemoryBackend::with_record(VersionRecord::clean(2));
        backend.fail_on("CREATE TABLE t3");
        let mut m = migrator(reversible_source(&[1, 2, 3, 4, 5]).unwrap(), &backend);

        let err = m.up().await.unwrap_err();
        match err {
            StrataError::Execution {
                version,
                direction,
                cause,
            } => {
                assert_eq!(version, 3);
                assert_eq!(direction, Direction::Up);
                assert!(cause.contains("CREATE TABLE t3"));
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(backend.record(), Some(VersionRecord::dirty(2)));
        assert!(backend.executed().is_empty());
        assert!(!backend.is_locked());
    }

    #[tokio::test]
    async fn test_dirty_blocks_every_operation_without_writes() {
        let backend = MemoryBackend::with_record(VersionRecord::dirty(2));
        let mut m = migrator(reversible_source(&[1, 2, 3]).unwrap(), &backend);

        assert!(matches!(m.up().await, Err(StrataError::Dirty { version: 2 })));
        assert!(matches!(m.down().await, Err(StrataError::Dirty { .. })));
        assert!(matches!(m.steps(1).await, Err(StrataError::Dirty { .. })));
        assert!(matches!(m.steps(0).await, Err(StrataError::Dirty { .. })));
        assert!(matches!(m.goto(3).await, Err(StrataError::Dirty { .. })));

        assert_eq!(backend.writes(), 0);
        assert!(backend.executed().is_empty());
    }

    #[tokio::test]
    async fn test_force_clears_dirty() {
        let backend = MemoryBackend::with_record(VersionRecord::dirty(2));
        let mut m = migrator(reversible_source(&[1, 2, 3]).unwrap(), &backend);

        m.force(2).await.unwrap();
        assert_eq!(backend.record(), Some(VersionRecord::clean(2)));

        m.up().await.unwrap();
        assert_eq!(backend.record(), Some(VersionRecord::clean(3)));
    }

    #[tokio::test]
    async fn test_force_unknown_version() {
        let backend = MemoryBackend::new();
        let mut m = migrator(reversible_source(&[1, 2]).unwrap(), &backend);

        assert!(matches!(
            m.force(9).await,
            Err(StrataError::InvalidArgument(_))
        ));
        m.force(0).await.unwrap();
        assert_eq!(backend.record(), Some(VersionRecord::clean(0)));
    }

    #[tokio::test]
    async fn test_non_transactional_failure_keeps_partial_effects() {
        let source = EmbeddedSource::new([
            ("1_init.up.sql", "CREATE TABLE users (email TEXT);"),
            (
                "2_index.up.sql",
                "-- strata:no-transaction\nCREATE INDEX CONCURRENTLY a ON users (email);\nCREATE INDEX CONCURRENTLY b ON users (email);",
            ),
        ])
        .unwrap();
        let backend = MemoryBackend::with_record(VersionRecord::clean(1));
        backend.fail_on("CREATE INDEX CONCURRENTLY b ON users (email)");
        let mut m = migrator(source, &backend);

        assert!(m.up().await.is_err());
        assert_eq!(backend.record(), Some(VersionRecord::dirty(1)));
        assert_eq!(backend.executed().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_down_script_fails_before_writing() {
        let backend = MemoryBackend::with_record(VersionRecord::clean(3));
        let mut m = migrator(up_only_source(&[1, 2, 3]).unwrap(), &backend);

        let err = m.down().await.unwrap_err();
        assert!(matches!(
            err,
            StrataError::MissingScript {
                version: 3,
                direction: Direction::Down
            }
        ));
        assert_eq!(backend.writes(), 0);
    }

    #[tokio::test]
    async fn test_goto() {
        let backend = MemoryBackend::new();
        let mut m = migrator(reversible_source(&[10, 20, 30]).unwrap(), &backend);

        assert_eq!(m.goto(20).await.unwrap().to, 20);
        assert_eq!(m.goto(10).await.unwrap().to, 10);
        assert_eq!(m.goto(0).await.unwrap().to, 0);
        assert!(m.goto(0).await.unwrap_err().is_no_change());
    }

    #[tokio::test]
    async fn test_concurrent_run_times_out() {
        let backend = MemoryBackend::new();
        let mut holder = backend.session();
        holder.lock(Duration::ZERO).await.unwrap();

        let mut m = migrator(reversible_source(&[1]).unwrap(), &backend.session());
        let err = m.up().await.unwrap_err();
        assert!(matches!(err, StrataError::LockTimeout { .. }));
        assert_eq!(backend.record(), None);
    }

    #[tokio::test]
    async fn test_status_and_version() {
        let backend = MemoryBackend::new();
        let mut m = migrator(reversible_source(&[1, 2, 3]).unwrap(), &backend);

        assert_eq!(m.version().await.unwrap(), VersionRecord::clean(0));
        m.steps(1).await.unwrap();

        let status = m.status().await.unwrap();
        assert_eq!(status.current, VersionRecord::clean(1));
        assert_eq!(status.applied.len(), 1);
        assert_eq!(status.pending.len(), 2);
        assert!(!status.is_up_to_date());
    }
}
