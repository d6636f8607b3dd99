use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;

use strata_core::backend::{Driver, VersionStore};
use strata_core::error::{Result, StrataError};
use strata_core::migration::VersionRecord;

#[derive(Debug, Default)]
struct State {
    record: Option<VersionRecord>,
    executed: Vec<String>,
    writes: usize,
    failing: HashSet<String>,
    lock_owner: Option<usize>,
    sessions: usize,
}

/// In-memory version store and driver.
///
/// Clones share state and session; [`MemoryBackend::session`] opens another
/// session on the same "database", which contends for the run lock.
///
/// # Example
///
/// ```ignore
/// let backend = MemoryBackend::new();
/// backend.fail_on("CREATE TABLE t3");
///
/// let mut migrator = Migrator::new(source, backend.clone());
/// assert!(migrator.up().await.is_err());
/// assert_eq!(backend.record(), Some(VersionRecord::dirty(2)));
/// ```
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
    session: usize,
}

impl MemoryBackend {
    /// An uninitialized store.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                sessions: 1,
                ..Default::default()
            })),
            session: 0,
        }
    }

    /// A store already holding `record`.
    pub fn with_record(record: VersionRecord) -> Self {
        let backend = Self::new();
        backend.state.lock().unwrap().record = Some(record);
        backend
    }

    /// Open another session against the same state.
    pub fn session(&self) -> Self {
        let mut state = self.state.lock().unwrap();
        let session = state.sessions;
        state.sessions += 1;
        Self {
            state: self.state.clone(),
            session,
        }
    }

    /// Make every execution of `statement` fail.
    pub fn fail_on(&self, statement: impl Into<String>) {
        self.state.lock().unwrap().failing.insert(statement.into());
    }

    /// Current record, `None` while uninitialized.
    pub fn record(&self) -> Option<VersionRecord> {
        self.state.lock().unwrap().record
    }

    /// Statements that took effect, in order.
    pub fn executed(&self) -> Vec<String> {
        self.state.lock().unwrap().executed.clone()
    }

    /// Number of version record writes, including initialization.
    pub fn writes(&self) -> usize {
        self.state.lock().unwrap().writes
    }

    /// Whether any session holds the run lock.
    pub fn is_locked(&self) -> bool {
        self.state.lock().unwrap().lock_owner.is_some()
    }

    fn try_lock(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.lock_owner {
            Some(owner) if owner != self.session => false,
            _ => {
                state.lock_owner = Some(self.session);
                true
            }
        }
    }

    /// Apply statements; with `atomic`, nothing takes effect on failure.
    fn run(&self, statements: &[String], atomic: bool, record: Option<VersionRecord>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let mut staged = Vec::new();

        for statement in statements {
            if state.failing.contains(statement) {
                if !atomic {
                    state.executed.extend(staged);
                }
                return Err(StrataError::Database(format!(
                    "statement failed: {}",
                    statement
                )));
            }
            staged.push(statement.clone());
        }

        state.executed.extend(staged);
        if let Some(record) = record {
            state.record = Some(record);
            state.writes += 1;
        }
        Ok(())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionStore for MemoryBackend {
    fn initialize(&mut self) -> BoxFuture<'_, Result<()>> {
        async move {
            let mut state = self.state.lock().unwrap();
            if state.record.is_none() {
                state.record = Some(VersionRecord::default());
                state.writes += 1;
            }
            Ok(())
        }
        .boxed()
    }

    fn read(&mut self) -> BoxFuture<'_, Result<VersionRecord>> {
        async move { self.record().ok_or(StrataError::StoreUninitialized) }.boxed()
    }

    fn write(&mut self, record: VersionRecord) -> BoxFuture<'_, Result<()>> {
        async move {
            let mut state = self.state.lock().unwrap();
            state.record = Some(record);
            state.writes += 1;
            Ok(())
        }
        .boxed()
    }

    fn lock(&mut self, timeout: Duration) -> BoxFuture<'_, Result<()>> {
        async move {
            let started = Instant::now();
            loop {
                if self.try_lock() {
                    return Ok(());
                }
                let waited = started.elapsed();
                if waited >= timeout {
                    return Err(StrataError::LockTimeout { waited });
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
        .boxed()
    }

    fn unlock(&mut self) -> BoxFuture<'_, Result<()>> {
        async move {
            let mut state = self.state.lock().unwrap();
            if state.lock_owner == Some(self.session) {
                state.lock_owner = None;
            }
            Ok(())
        }
        .boxed()
    }
}

impl Driver for MemoryBackend {
    fn execute<'a>(
        &'a mut self,
        statements: &'a [String],
        use_transaction: bool,
    ) -> BoxFuture<'a, Result<()>> {
        async move { self.run(statements, use_transaction, None) }.boxed()
    }

    fn execute_recorded<'a>(
        &'a mut self,
        statements: &'a [String],
        record: VersionRecord,
    ) -> BoxFuture<'a, Result<()>> {
        async move { self.run(statements, true, Some(record)) }.boxed()
    }
}
