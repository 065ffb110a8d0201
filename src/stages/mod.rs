//! Pipeline stages
//!
//! Each stage owns a bounded worker pool (a [`tokio::sync::Semaphore`]) and
//! can run on its own over a batch of segments, or be driven one segment at
//! a time by the coordinator in `app::pipeline_interactor`.

use std::future::Future;

use tracing::error;

use crate::domain::errors::DomainError;

pub mod composer;
pub mod extraction;
pub mod retry;
pub mod selection;
pub mod synthesis;

pub use composer::VideoComposer;
pub use extraction::ClipExtractionStage;
pub use retry::RetryPolicy;
pub use selection::{ClipSelectionStage, LlmVerdict, SelectionPrep, SelectionResult};
pub use synthesis::SpeechSynthesisStage;

/// Spawn one task per item and gather results into slots matching input order.
///
/// Completion order does not matter; slot `i` always holds the result for
/// item `i`. A task that panics leaves [`DomainError::WorkerAborted`] in its slot.
pub async fn run_in_slots<T, R, F, Fut>(
    items: Vec<T>,
    work: F,
) -> Vec<Result<R, DomainError>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<R, DomainError>> + Send + 'static,
{
    let handles: Vec<_> = items
        .into_iter()
        .map(|item| tokio::spawn(work(item)))
        .collect();

    let mut slots = Vec::with_capacity(handles.len());
    for (slot, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(result) => slots.push(result),
            Err(e) => {
                error!("Task for slot {} panicked: {}", slot, e);
                slots.push(Err(DomainError::WorkerAborted(format!("slot {}: {}", slot, e))));
            }
        }
    }
    slots
}

/// Acquire a worker slot, mapping a closed pool into a domain error
pub(crate) async fn acquire(
    pool: &tokio::sync::Semaphore,
) -> Result<tokio::sync::SemaphorePermit<'_>, DomainError> {
    pool.acquire()
        .await
        .map_err(|e| DomainError::Config(format!("worker pool closed: {}", e)))
}
