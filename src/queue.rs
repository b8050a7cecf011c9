use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::error;

pub type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Runs jobs one at a time per key, in submission order.
///
/// A key with queued work has exactly one worker task draining it; the entry is
/// removed when the worker finds the queue empty. Jobs for different keys run
/// concurrently.
pub struct SerialQueues<K> {
    queues: Arc<Mutex<HashMap<K, VecDeque<Job>>>>,
}

impl<K> Default for SerialQueues<K> {
    fn default() -> Self {
        Self {
            queues: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K> SerialQueues<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `job` behind the work already submitted for `key`. Must be called
    /// from within a tokio runtime.
    pub fn submit(&self, key: K, job: Job) {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        match queues.get_mut(&key) {
            Some(pending) => pending.push_back(job),
            None => {
                queues.insert(key.clone(), VecDeque::new());
                tokio::spawn(drain(self.queues.clone(), key, job));
            }
        }
    }

    /// Number of keys with work in flight.
    #[cfg(test)]
    pub fn busy(&self) -> usize {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

async fn drain<K: Eq + Hash>(queues: Arc<Mutex<HashMap<K, VecDeque<Job>>>>, key: K, first: Job) {
    let mut next = Some(first);
    while let Some(job) = next {
        // A panicking job must not strand the rest of the queue.
        if let Err(e) = tokio::spawn(job).await {
            error!(error = %e, "Queued job did not complete");
        }

        let mut queues = queues.lock().unwrap_or_else(PoisonError::into_inner);
        next = queues.get_mut(&key).and_then(VecDeque::pop_front);
        if next.is_none() {
            queues.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn settle<K: Eq + Hash + Clone + Send + 'static>(queues: &SerialQueues<K>) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while queues.busy() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("queues did not drain");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_jobs_for_one_key_run_in_order() {
        let queues = SerialQueues::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..50u32 {
            let seen = seen.clone();
            queues.submit(
                1u8,
                Box::pin(async move {
                    // Earlier jobs take longer, so any overlap would reorder them.
                    tokio::time::sleep(Duration::from_micros(u64::from(50 - i) * 20)).await;
                    seen.lock().unwrap().push(i);
                }),
            );
        }
        settle(&queues).await;

        assert_eq!(*seen.lock().unwrap(), (0..50).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_keys_run_concurrently() {
        let queues = SerialQueues::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        queues.submit(
            "blocked",
            Box::pin(async move {
                let _ = rx.await;
            }),
        );
        queues.submit(
            "free",
            Box::pin(async move {
                let _ = tx.send(());
            }),
        );
        settle(&queues).await;
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_stall_queue() {
        let queues = SerialQueues::new();
        let ran = Arc::new(Mutex::new(false));

        queues.submit(7u64, Box::pin(async { panic!("job failed") }));
        let flag = ran.clone();
        queues.submit(
            7u64,
            Box::pin(async move {
                *flag.lock().unwrap() = true;
            }),
        );
        settle(&queues).await;

        assert!(*ran.lock().unwrap());
    }
}
