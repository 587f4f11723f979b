//! Ordered, single-writer persistence of streamed solutions.

use std::sync::Arc;

use dispatch_core::{
    AvailabilityVisitIdMap, RunErrorSource, RunStore, SolveVrpResponse, UnassignedVisit,
    WriteScheduleParams,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Capacity of the queue between the stream pump and the writer.
///
/// Producers wait when the queue is full, so the solver cannot outrun
/// persistence by more than this many solutions.
pub const WRITE_QUEUE_CAPACITY: usize = 5;

/// Run-level values attached to every schedule a collector writes.
#[derive(Debug, Clone, Default)]
pub struct CollectorContext {
    /// Region of the run.
    pub service_region_id: i64,
    /// Run the solutions belong to.
    pub optimizer_run_id: i64,
    /// Probe id mapping for availability runs.
    pub availability_visit_ids: AvailabilityVisitIdMap,
    /// Unassigned visits of the problem before solving.
    pub previous_unassigned_visits: Vec<UnassignedVisit>,
}

/// Persists solutions in arrival order through one consumer task.
///
/// A failed write is recorded against the run as a
/// [`RunErrorSource::LogisticsWrite`] error and the consumer moves on.
pub struct ResultCollector {
    store: Arc<dyn RunStore>,
    optimizer_run_id: i64,
    sender: mpsc::Sender<SolveVrpResponse>,
    consumer: JoinHandle<()>,
}

impl std::fmt::Debug for ResultCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCollector")
            .field("optimizer_run_id", &self.optimizer_run_id)
            .finish_non_exhaustive()
    }
}

impl ResultCollector {
    /// Spawn the consumer and return the producer side.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn start(store: Arc<dyn RunStore>, context: CollectorContext) -> Self {
        let (sender, receiver) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        let optimizer_run_id = context.optimizer_run_id;
        let consumer = tokio::spawn(drain(Arc::clone(&store), context, receiver));
        Self {
            store,
            optimizer_run_id,
            sender,
            consumer,
        }
    }

    /// Run the collector writes for.
    #[must_use]
    pub const fn optimizer_run_id(&self) -> i64 {
        self.optimizer_run_id
    }

    /// Queue a solution, waiting while the queue is full.
    pub async fn add_result(&self, response: SolveVrpResponse) {
        if self.sender.send(response).await.is_err() {
            log::error!(
                "result collector for optimizer run {} stopped before all results were queued",
                self.optimizer_run_id
            );
        }
    }

    /// Record a run-level error outside the write queue.
    pub async fn record_error(&self, source: RunErrorSource, message: &str) {
        record_run_error(self.store.as_ref(), self.optimizer_run_id, source, message).await;
    }

    /// Stop accepting results and wait until every queued one is written.
    pub async fn close(self) {
        let Self {
            sender,
            consumer,
            optimizer_run_id,
            ..
        } = self;
        drop(sender);
        if let Err(err) = consumer.await {
            log::error!("result collector for optimizer run {optimizer_run_id} failed: {err}");
        }
    }
}

async fn drain(
    store: Arc<dyn RunStore>,
    context: CollectorContext,
    mut receiver: mpsc::Receiver<SolveVrpResponse>,
) {
    while let Some(response) = receiver.recv().await {
        let params = WriteScheduleParams {
            service_region_id: context.service_region_id,
            optimizer_run_id: context.optimizer_run_id,
            optimizer_version: &response.optimizer_version,
            solution: &response.solution,
            availability_visit_ids: &context.availability_visit_ids,
            previous_unassigned_visits: &context.previous_unassigned_visits,
        };
        if let Err(err) = store.write_schedule_for_solution(params).await {
            let message = err.to_string();
            record_run_error(
                store.as_ref(),
                context.optimizer_run_id,
                RunErrorSource::LogisticsWrite,
                &message,
            )
            .await;
            log::error!(
                "failed to write schedule for optimizer run {}: {message}",
                context.optimizer_run_id
            );
        }
    }
}

pub(crate) async fn record_run_error(
    store: &dyn RunStore,
    optimizer_run_id: i64,
    source: RunErrorSource,
    message: &str,
) {
    if let Err(err) = store
        .add_optimizer_run_error(optimizer_run_id, source, message)
        .await
    {
        log::warn!("failed to record {source:?} error for optimizer run {optimizer_run_id}: {err}");
    }
}
