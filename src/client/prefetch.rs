//! Read-ahead worker pool.
//!
//! After an open, the opened file's siblings are promoted to their owners'
//! local tiers in the background. Jobs go through a bounded queue served by
//! a fixed number of workers; when the queue is full the job is dropped.
//! Every failure is ignored.

use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, mpsc};

use super::router::RequestRouter;

struct PrefetchJob {
    opened: String,
}

pub struct PrefetchPool {
    queue: mpsc::Sender<PrefetchJob>,
}

impl PrefetchPool {
    /// Spawns `workers` tasks on the current runtime. Workers stop once the
    /// pool is dropped or the router is gone.
    pub fn start(router: Weak<RequestRouter>, workers: usize, queue_depth: usize) -> Self {
        let (queue, receiver) = mpsc::channel(queue_depth.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        for worker_id in 0..workers {
            let receiver = receiver.clone();
            let router = router.clone();
            tokio::spawn(async move {
                worker_loop(worker_id, receiver, router).await;
            });
        }

        Self { queue }
    }

    /// Queues read-ahead for the siblings of `opened`. Returns `false` when
    /// the job was dropped.
    pub fn submit(&self, opened: &str) -> bool {
        match self.queue.try_send(PrefetchJob {
            opened: opened.to_string(),
        }) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Read-ahead for {} dropped: {}", opened, e);
                false
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<PrefetchJob>>>,
    router: Weak<RequestRouter>,
) {
    loop {
        let job = { receiver.lock().await.recv().await };
        let Some(job) = job else {
            break;
        };
        let Some(router) = router.upgrade() else {
            break;
        };

        let promoted = router.prefetch_siblings(&job.opened).await;
        tracing::debug!(
            "Read-ahead worker {} promoted {} sibling(s) of {}",
            worker_id,
            promoted,
            job.opened
        );
    }
}
