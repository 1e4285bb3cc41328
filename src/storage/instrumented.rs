use crate::catalog::types::Row;
use crate::storage::{StatKey, Statement, StatementExecutor, StoreError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub trait StatementTelemetryHook: Send + Sync {
    fn on_statement(&self, _event: &StatementTelemetryEvent) {}
    fn on_batch(&self, _event: &StatementTelemetryEvent) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementTelemetryEvent {
    pub stat: StatKey,
    pub statements: usize,
    pub latency_micros: u64,
    pub ok: bool,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct StatCounters {
    calls: AtomicU64,
    failures: AtomicU64,
    micros: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatSnapshot {
    pub stat: StatKey,
    pub calls: u64,
    pub failures: u64,
    pub total_micros: u64,
}

impl StatSnapshot {
    pub fn avg_micros(&self) -> u64 {
        if self.calls == 0 {
            0
        } else {
            self.total_micros / self.calls
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryStatistics {
    pub entries: Vec<StatSnapshot>,
}

impl DirectoryStatistics {
    pub fn get(&self, stat: StatKey) -> StatSnapshot {
        self.entries[stat.slot()]
    }

    pub fn total_calls(&self) -> u64 {
        self.entries.iter().map(|e| e.calls).sum()
    }
}

/// Measure-around-call decorator for any executor. Counters are kept per
/// [`StatKey`]; a batch attributes its latency evenly to its statements.
pub struct InstrumentedExecutor<E> {
    inner: E,
    counters: [StatCounters; 7],
    hooks: Mutex<Vec<Arc<dyn StatementTelemetryHook>>>,
}

impl<E> std::fmt::Debug for InstrumentedExecutor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentedExecutor")
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl<E: StatementExecutor> InstrumentedExecutor<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            counters: Default::default(),
            hooks: Mutex::new(Vec::new()),
        }
    }

    pub fn add_telemetry_hook(&self, hook: Arc<dyn StatementTelemetryHook>) {
        self.hooks.lock().push(hook);
    }

    pub fn statistics(&self) -> DirectoryStatistics {
        let entries = StatKey::ALL
            .iter()
            .map(|stat| {
                let c = &self.counters[stat.slot()];
                StatSnapshot {
                    stat: *stat,
                    calls: c.calls.load(Ordering::Relaxed),
                    failures: c.failures.load(Ordering::Relaxed),
                    total_micros: c.micros.load(Ordering::Relaxed),
                }
            })
            .collect();
        DirectoryStatistics { entries }
    }

    fn record(&self, stat: StatKey, micros: u64, ok: bool) {
        let c = &self.counters[stat.slot()];
        c.calls.fetch_add(1, Ordering::Relaxed);
        c.micros.fetch_add(micros, Ordering::Relaxed);
        if !ok {
            c.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn emit(&self, event: StatementTelemetryEvent, batch: bool) {
        let hooks = self.hooks.lock().clone();
        for hook in hooks {
            if batch {
                hook.on_batch(&event);
            } else {
                hook.on_statement(&event);
            }
        }
    }

    fn measured<T>(
        &self,
        statement: &Statement,
        call: impl FnOnce() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let started = Instant::now();
        let result = call();
        let micros = elapsed_micros(started);
        self.record(statement.stat, micros, result.is_ok());
        self.emit(
            StatementTelemetryEvent {
                stat: statement.stat,
                statements: 1,
                latency_micros: micros,
                ok: result.is_ok(),
                error: result.as_ref().err().map(ToString::to_string),
            },
            false,
        );
        result
    }
}

impl<E: StatementExecutor> StatementExecutor for InstrumentedExecutor<E> {
    fn query(&self, statement: &Statement) -> Result<Vec<Row>, StoreError> {
        self.measured(statement, || self.inner.query(statement))
    }

    fn execute(&self, statement: &Statement) -> Result<u64, StoreError> {
        self.measured(statement, || self.inner.execute(statement))
    }

    fn execute_batch(&self, statements: &[Statement]) -> Result<u64, StoreError> {
        let started = Instant::now();
        let result = self.inner.execute_batch(statements);
        let micros = elapsed_micros(started);
        let share = micros / statements.len().max(1) as u64;
        let failed_at = match &result {
            Err(StoreError::Batch { index, .. }) => Some(*index),
            _ => None,
        };
        for (pos, statement) in statements.iter().enumerate() {
            let ok = match (&result, failed_at) {
                (Ok(_), _) => true,
                (Err(_), Some(index)) => pos != index,
                (Err(_), None) => false,
            };
            self.record(statement.stat, share, ok);
        }
        if let Some(first) = statements.first() {
            self.emit(
                StatementTelemetryEvent {
                    stat: first.stat,
                    statements: statements.len(),
                    latency_micros: micros,
                    ok: result.is_ok(),
                    error: result.as_ref().err().map(ToString::to_string),
                },
                true,
            );
        }
        result
    }

    fn execute_ddl(&self, sql: &str) -> Result<(), StoreError> {
        let started = Instant::now();
        let result = self.inner.execute_ddl(sql);
        self.record(StatKey::Metadata, elapsed_micros(started), result.is_ok());
        result
    }
}

fn elapsed_micros(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::{InstrumentedExecutor, StatementTelemetryEvent, StatementTelemetryHook};
    use crate::catalog::types::{ColumnType, Row, Value};
    use crate::storage::{Param, StatKey, Statement, StatementExecutor, StoreError};
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Fails every statement whose SQL mentions "boom".
    struct Scripted;

    impl StatementExecutor for Scripted {
        fn query(&self, statement: &Statement) -> Result<Vec<Row>, StoreError> {
            if statement.sql.contains("boom") {
                return Err(StoreError::Backend("boom".into()));
            }
            Ok(vec![Row::from_values(vec![Value::from(1)])])
        }

        fn execute(&self, _statement: &Statement) -> Result<u64, StoreError> {
            Ok(1)
        }

        fn execute_batch(&self, statements: &[Statement]) -> Result<u64, StoreError> {
            for (index, statement) in statements.iter().enumerate() {
                if statement.sql.contains("boom") {
                    return Err(StoreError::Batch {
                        index,
                        source: Box::new(StoreError::Backend("boom".into())),
                    });
                }
            }
            Ok(statements.len() as u64)
        }

        fn execute_ddl(&self, _sql: &str) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<(bool, StatementTelemetryEvent)>>,
    }

    impl StatementTelemetryHook for Recording {
        fn on_statement(&self, event: &StatementTelemetryEvent) {
            self.events.lock().push((false, event.clone()));
        }

        fn on_batch(&self, event: &StatementTelemetryEvent) {
            self.events.lock().push((true, event.clone()));
        }
    }

    fn stmt(sql: &str, stat: StatKey) -> Statement {
        Statement::new(sql.into(), stat)
            .bind(Param::typed("id", ColumnType::Integer, &Value::from(1)).expect("param"))
    }

    #[test]
    fn counts_calls_and_failures_per_stat_key() {
        let exec = InstrumentedExecutor::new(Scripted);
        exec.query(&stmt("SELECT 1", StatKey::PrimaryIndexRead)).expect("ok");
        exec.query(&stmt("SELECT boom", StatKey::PrimaryIndexRead))
            .expect_err("fails");
        exec.execute(&stmt("DELETE", StatKey::SecondaryIndexDelete))
            .expect("ok");

        let stats = exec.statistics();
        let reads = stats.get(StatKey::PrimaryIndexRead);
        assert_eq!(reads.calls, 2);
        assert_eq!(reads.failures, 1);
        assert_eq!(stats.get(StatKey::SecondaryIndexDelete).calls, 1);
        assert_eq!(stats.get(StatKey::PrimaryIndexWrite).calls, 0);
        assert_eq!(stats.total_calls(), 3);
    }

    #[test]
    fn batch_failure_is_charged_to_the_failing_statement() {
        let exec = InstrumentedExecutor::new(Scripted);
        let hook = Arc::new(Recording::default());
        exec.add_telemetry_hook(hook.clone());
        exec.execute_batch(&[
            stmt("INSERT ok", StatKey::SecondaryIndexWrite),
            stmt("INSERT boom", StatKey::PrimaryIndexWrite),
        ])
        .expect_err("fails");

        let stats = exec.statistics();
        assert_eq!(stats.get(StatKey::SecondaryIndexWrite).failures, 0);
        assert_eq!(stats.get(StatKey::PrimaryIndexWrite).failures, 1);

        let events = hook.events.lock();
        assert_eq!(events.len(), 1);
        assert!(events[0].0);
        assert_eq!(events[0].1.statements, 2);
        assert!(!events[0].1.ok);
    }
}
