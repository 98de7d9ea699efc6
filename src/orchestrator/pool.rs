//! Fixed-size worker pool
//!
//! Workers pull tasks from one shared queue. Every task result is captured,
//! panics included, and handed back by [`WorkerPool::drain`], which is the
//! barrier: it returns only after the queue is empty and every worker exited.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// A queued unit of work
struct Job<T> {
    label: String,
    task: BoxFuture<'static, Result<T>>,
}

/// Captured result of one task
#[derive(Debug)]
pub struct TaskResult<T> {
    pub label: String,
    /// The task's value, or the rendered error or panic message
    pub result: Result<T, String>,
}

pub struct WorkerPool<T> {
    sender: mpsc::Sender<Job<T>>,
    workers: Vec<JoinHandle<Vec<TaskResult<T>>>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Start `size` workers (at least one)
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (sender, receiver) = mpsc::channel(size * 2);
        let queue = Arc::new(Mutex::new(receiver));

        let workers = (0..size)
            .map(|id| tokio::spawn(worker(id, Arc::clone(&queue))))
            .collect();

        debug!("Started worker pool with {} workers", size);
        Self { sender, workers }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue a task, waiting while the queue is full
    pub async fn submit<F>(&self, label: impl Into<String>, task: F) -> Result<()>
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let job = Job {
            label: label.into(),
            task: task.boxed(),
        };
        self.sender
            .send(job)
            .await
            .map_err(|e| anyhow!("worker pool is closed, dropped task '{}'", e.0.label))
    }

    /// Close the queue and wait for every queued task to finish
    pub async fn drain(self) -> Vec<TaskResult<T>> {
        drop(self.sender);

        let mut results = Vec::new();
        for (id, handle) in self.workers.into_iter().enumerate() {
            match handle.await {
                Ok(mut done) => results.append(&mut done),
                Err(e) => error!("Worker {} terminated abnormally: {}", id, e),
            }
        }
        results
    }
}

async fn worker<T>(id: usize, queue: Arc<Mutex<mpsc::Receiver<Job<T>>>>) -> Vec<TaskResult<T>> {
    let mut results = Vec::new();

    loop {
        // Only the lock holder waits on the channel
        let job = queue.lock().await.recv().await;
        let Some(job) = job else { break };

        let result = match AssertUnwindSafe(job.task).catch_unwind().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!("Task '{}' failed: {:#}", job.label, e);
                Err(format!("{:#}", e))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Task '{}' panicked: {}", job.label, message);
                Err(format!("panicked: {}", message))
            }
        };
        results.push(TaskResult {
            label: job.label,
            result,
        });
    }

    debug!("Worker {} finished {} tasks", id, results.len());
    results
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_drain_waits_for_every_task() {
        let pool = WorkerPool::new(2);
        for i in 0..10u64 {
            pool.submit(format!("task-{}", i), async move {
                tokio::time::sleep(Duration::from_millis(i % 3)).await;
                Ok(i)
            })
            .await
            .unwrap();
        }

        let results = pool.drain().await;
        assert_eq!(results.len(), 10);
        let mut values: Vec<u64> = results.into_iter().map(|r| r.result.unwrap()).collect();
        values.sort();
        assert_eq!(values, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new(3);
        assert_eq!(pool.size(), 3);

        for i in 0..12 {
            let (running, peak) = (running.clone(), peak.clone());
            pool.submit(format!("t{}", i), async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        }

        pool.drain().await;
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_errors_and_panics_are_captured() {
        let pool = WorkerPool::new(1);
        pool.submit("ok", async { Ok(1) }).await.unwrap();
        pool.submit("err", async { Err(anyhow!("boom")) }).await.unwrap();
        pool.submit("panic", async {
            if true {
                panic!("exploded");
            }
            Ok(0)
        })
        .await
        .unwrap();
        pool.submit("after", async { Ok(2) }).await.unwrap();

        let results = pool.drain().await;
        let by_label = |label: &str| results.iter().find(|r| r.label == label).unwrap();

        assert_eq!(by_label("ok").result, Ok(1));
        assert_eq!(by_label("err").result, Err("boom".to_string()));
        assert_eq!(by_label("panic").result, Err("panicked: exploded".to_string()));
        // The worker survives a panicking task
        assert_eq!(by_label("after").result, Ok(2));
    }

    #[tokio::test]
    async fn test_zero_size_pool_still_runs() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.size(), 1);
        pool.submit("only", async { Ok("done") }).await.unwrap();
        assert_eq!(pool.drain().await[0].result, Ok("done"));
    }
}
