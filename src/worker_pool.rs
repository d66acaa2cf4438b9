// Worker pool for parallel match simulation.
//
// Each match runs on a dedicated OS thread (the Lua VM work is blocking
// and must stay off the async runtime). The pool has a fixed capacity;
// callers check `has_capacity()` before dispatching.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::engine::game::{self, MatchOutcome};
use crate::engine::sandbox::Sandbox;
use crate::metrics;

/// One scheduled pairing: the index into the pair enumeration plus the
/// two strategy sources to pit against each other.
pub struct MatchJob {
    pub pair_index: usize,
    pub source_a: String,
    pub source_b: String,
    pub rounds: u32,
}

/// Result message sent back to the orchestrator when a worker finishes.
pub struct MatchCompletion {
    pub pair_index: usize,
    pub outcome: MatchOutcome,
}

/// Manages a fixed-size pool of OS threads for match simulation.
pub struct WorkerPool {
    worker_count: usize,
    active_workers: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count,
            active_workers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Whether the pool has capacity to accept another match.
    pub fn has_capacity(&self) -> bool {
        self.active_workers.load(Ordering::Relaxed) < self.worker_count
    }

    /// Current number of active workers.
    pub fn active_count(&self) -> usize {
        self.active_workers.load(Ordering::Relaxed)
    }

    /// Spawn one match on a new OS thread. Returns false if the pool is
    /// at capacity. The completion message is pushed onto `results`
    /// when the match finishes; a dropped receiver is ignored since the
    /// orchestrating run is already gone.
    pub fn spawn_match(
        &self,
        sandbox: Sandbox,
        job: MatchJob,
        results: UnboundedSender<MatchCompletion>,
    ) -> bool {
        if !self.has_capacity() {
            return false;
        }

        let active = self.active_workers.clone();
        active.fetch_add(1, Ordering::Relaxed);
        metrics::MATCH_WORKERS_ACTIVE.set(active.load(Ordering::Relaxed) as i64);

        let thread_name = format!("match-sim-{}", job.pair_index);

        std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                let outcome =
                    game::play_match(&sandbox, &job.source_a, &job.source_b, job.rounds);

                active.fetch_sub(1, Ordering::Relaxed);
                metrics::MATCH_WORKERS_ACTIVE.set(active.load(Ordering::Relaxed) as i64);

                let _ = results.send(MatchCompletion {
                    pair_index: job.pair_index,
                    outcome,
                });
            })
            .expect("failed to spawn match simulation thread");

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sandbox::SandboxConfig;

    #[test]
    fn test_worker_pool_capacity() {
        let pool = WorkerPool::new(4);
        assert!(pool.has_capacity());
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn test_worker_pool_zero_capacity() {
        let pool = WorkerPool::new(0);
        assert!(!pool.has_capacity());
    }

    #[tokio::test]
    async fn test_spawn_match_delivers_completion() {
        let pool = WorkerPool::new(1);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let accepted = pool.spawn_match(
            Sandbox::new(SandboxConfig::default()),
            MatchJob {
                pair_index: 3,
                source_a: "function decide() return \"cooperate\" end".into(),
                source_b: "function decide() return \"defect\" end".into(),
                rounds: 4,
            },
            tx,
        );
        assert!(accepted);

        let completion = rx.recv().await.unwrap();
        assert_eq!(completion.pair_index, 3);
        assert_eq!(completion.outcome.score_a, 0);
        assert_eq!(completion.outcome.score_b, 20);
    }

    #[tokio::test]
    async fn test_full_pool_rejects_job() {
        let pool = WorkerPool::new(0);
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let accepted = pool.spawn_match(
            Sandbox::new(SandboxConfig::default()),
            MatchJob {
                pair_index: 0,
                source_a: String::new(),
                source_b: String::new(),
                rounds: 1,
            },
            tx,
        );
        assert!(!accepted);
    }
}
