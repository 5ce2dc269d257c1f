//! Serialized refresh cycles.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::ingest::{CycleReport, IngestError, Ingestor};
use crate::mapper::MetricMapper;
use crate::registry::MetricRegistry;
use crate::source::ExportSource;

/// Outcome of a refresh, shared between coalesced callers.
pub type RefreshResult = Result<CycleReport, Arc<IngestError>>;

#[derive(Debug, Default)]
struct CycleState {
    last: Option<RefreshResult>,
}

/// Runs fetch-and-ingest cycles one at a time.
///
/// A caller that had to wait for a cycle started by someone else gets that
/// cycle's outcome instead of starting a new one.
pub struct Refresher<S> {
    source: S,
    ingestor: Ingestor,
    cycle: Mutex<CycleState>,
    completed: AtomicU64,
    succeeded: AtomicBool,
}

impl<S: ExportSource> Refresher<S> {
    pub fn new(source: S, registry: Arc<MetricRegistry>) -> Self {
        Self {
            source,
            ingestor: Ingestor::new(MetricMapper::new(registry)),
            cycle: Mutex::new(CycleState::default()),
            completed: AtomicU64::new(0),
            succeeded: AtomicBool::new(false),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        self.ingestor.mapper().registry()
    }

    /// Number of cycles run so far.
    pub fn cycles(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    /// Whether any cycle has completed successfully.
    pub fn is_ready(&self) -> bool {
        self.succeeded.load(Ordering::Acquire)
    }

    /// Refresh the registry from the source.
    pub async fn refresh(&self) -> RefreshResult {
        let seen = self.completed.load(Ordering::Acquire);
        let mut state = self.cycle.lock().await;

        if self.completed.load(Ordering::Acquire) != seen
            && let Some(last) = &state.last
        {
            debug!("Joining refresh that completed while waiting");
            return last.clone();
        }

        let outcome = self.run_cycle().await;
        state.last = Some(outcome.clone());
        self.completed.fetch_add(1, Ordering::AcqRel);
        outcome
    }

    async fn run_cycle(&self) -> RefreshResult {
        let started = Instant::now();
        let exporter = self.registry().exporter();

        let result = match self.source.open().await {
            Ok(stream) => self.ingestor.ingest(stream).await,
            Err(e) => Err(IngestError::from(e)),
        };

        match result {
            Ok(report) => {
                exporter.record_success(&report);
                self.succeeded.store(true, Ordering::Release);
                debug!(
                    source = %self.source.describe(),
                    recorded = report.recorded,
                    "Refresh complete"
                );
                Ok(report)
            }
            Err(e) => {
                exporter.record_failure(started.elapsed().as_secs_f64());
                error!(source = %self.source.describe(), error = %e, "Refresh failed");
                Err(Arc::new(e))
            }
        }
    }
}

/// Create a shareable refresher handle.
pub type SharedRefresher<S> = Arc<Refresher<S>>;
