//! Bridges blocking or CPU-bound work into the cooperative pipeline.
//!
//! One callable, a bounded (or unbounded) worker pool on tokio's blocking
//! threads, and a completion channel. `put` schedules and returns
//! immediately; `get` hands back completed results in completion order,
//! which has no relation to submission order.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tracing::debug;

use crate::element::{Buffer, Data, TransformFn};
use crate::error::{PipelineError, Result};

/// Operator-selected worker pool kind. Only thread pools are bundled:
/// this is a single-process composition engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Thread,
}

impl PoolKind {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "thread" => Ok(PoolKind::Thread),
            other => Err(PipelineError::config(
                format!(
                    "unsupported worker pool `{other}`; only `thread` is bundled \
                     (a process pool would need a serializable task boundary)"
                ),
                "parallel",
            )),
        }
    }
}

pub struct ParallelBridge {
    func: TransformFn,
    permits: Option<Arc<Semaphore>>,
    results_tx: mpsc::UnboundedSender<anyhow::Result<Data>>,
    results_rx: Mutex<mpsc::UnboundedReceiver<anyhow::Result<Data>>>,
}

impl ParallelBridge {
    pub fn new(func: TransformFn, _pool: PoolKind, max_workers: Option<usize>) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        ParallelBridge {
            func,
            permits: max_workers.map(|n| Arc::new(Semaphore::new(n))),
            results_tx,
            results_rx: Mutex::new(results_rx),
        }
    }
}

#[async_trait]
impl Buffer for ParallelBridge {
    /// Schedule one invocation on the worker pool; returns without
    /// waiting. Pool-width back pressure is applied inside the spawned
    /// task, not at the submission point.
    async fn put(&self, data: Data) -> anyhow::Result<()> {
        let func = self.func.clone();
        let tx = self.results_tx.clone();
        let permits = self.permits.clone();
        tokio::spawn(async move {
            let _permit = match permits {
                Some(sem) => sem.acquire_owned().await.ok(),
                None => None,
            };
            let result = match tokio::task::spawn_blocking(move || func(data)).await {
                Ok(r) => r,
                Err(e) => Err(anyhow!("worker panicked: {e}")),
            };
            debug!("worker invocation completed");
            // receiver gone means the consuming chain stopped; drop
            let _ = tx.send(result);
        });
        Ok(())
    }

    /// Return one completed result, waiting until at least one in-flight
    /// invocation finishes. Never blocks while completed results are
    /// pending.
    async fn get(&self) -> anyhow::Result<Option<Data>> {
        let mut rx = self.results_rx.lock().await;
        match rx.recv().await {
            Some(Ok(data)) => Ok(Some(data)),
            Some(Err(e)) => Err(e),
            // the bridge owns a sender for its whole lifetime, so this
            // only happens after it is dropped mid-get
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;
    use std::time::Duration;

    fn sleepy() -> TransformFn {
        Arc::new(|d: Data| {
            let ms = d.as_u64().unwrap();
            std::thread::sleep(Duration::from_millis(ms));
            Ok(d)
        })
    }

    #[tokio::test]
    async fn all_results_come_back_exactly_once() {
        let bridge = ParallelBridge::new(sleepy(), PoolKind::Thread, Some(4));
        for ms in [30u64, 5, 15] {
            bridge.put(json!(ms)).await.unwrap();
        }
        let mut seen = HashSet::new();
        for _ in 0..3 {
            let d = bridge.get().await.unwrap().unwrap();
            assert!(seen.insert(d.as_u64().unwrap()));
        }
        assert_eq!(seen, HashSet::from([30, 5, 15]));
    }

    #[tokio::test]
    async fn put_returns_before_the_work_finishes() {
        let bridge = ParallelBridge::new(sleepy(), PoolKind::Thread, Some(1));
        let start = std::time::Instant::now();
        bridge.put(json!(200u64)).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(bridge.get().await.unwrap().unwrap(), json!(200u64));
    }

    #[tokio::test]
    async fn worker_errors_surface_on_get() {
        let f: TransformFn = Arc::new(|_| anyhow::bail!("no good"));
        let bridge = ParallelBridge::new(f, PoolKind::Thread, None);
        bridge.put(json!(1)).await.unwrap();
        assert!(bridge.get().await.is_err());
    }

    #[test]
    fn pool_kind_parses() {
        assert_eq!(PoolKind::parse("thread").unwrap(), PoolKind::Thread);
        assert!(PoolKind::parse("process").is_err());
    }
}
