//! In-flight guard: wraps a dequeued descriptor until the worker is done.

use std::sync::Arc;

use tracing::info;

use super::{DispatchQueue, JobDescriptor};

/// A dequeued descriptor owned by a worker.
///
/// Dropping the guard always marks the descriptor done. If the worker never
/// called `finish` (it bailed out for shutdown, or its task was aborted) the
/// descriptor goes back on the queue first, so nothing is silently lost.
pub struct InFlight {
    queue: Arc<DispatchQueue>,
    job: JobDescriptor,
    finished: bool,
}

impl InFlight {
    pub fn new(queue: Arc<DispatchQueue>, job: JobDescriptor) -> Self {
        Self {
            queue,
            job,
            finished: false,
        }
    }

    pub fn job(&self) -> &JobDescriptor {
        &self.job
    }

    /// The attempt ran; hand back the descriptor without re-enqueueing it.
    pub fn finish(mut self) -> JobDescriptor {
        self.finished = true;
        self.job.clone()
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.finished {
            info!(
                "Re-enqueueing unprocessed job {} for document {}",
                self.job.descriptor_id, self.job.document_id
            );
            self.queue.enqueue(self.job.clone());
        }
        self.queue.mark_done();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_finish_does_not_requeue() {
        let queue = Arc::new(DispatchQueue::new());
        queue.enqueue(JobDescriptor::new(1, "a", 0));
        let job = queue.dequeue(Duration::from_millis(50)).await.unwrap();

        let guard = InFlight::new(queue.clone(), job);
        assert_eq!(guard.job().document_id, 1);
        let job = guard.finish();
        assert_eq!(job.document_id, 1);
        assert_eq!(queue.queue_size(), 0);
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_drop_requeues_unfinished() {
        let queue = Arc::new(DispatchQueue::new());
        queue.enqueue(JobDescriptor::new(2, "b", 1));
        let job = queue.dequeue(Duration::from_millis(50)).await.unwrap();
        let original_id = job.descriptor_id.clone();

        drop(InFlight::new(queue.clone(), job));
        assert_eq!(queue.queue_size(), 1);
        assert_eq!(queue.in_flight(), 0);

        let again = queue.dequeue(Duration::from_millis(50)).await.unwrap();
        assert_eq!(again.descriptor_id, original_id);
        assert_eq!(again.retry_count, 1);
    }
}
