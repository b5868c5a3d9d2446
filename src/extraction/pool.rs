//! Bounded worker pool and per-call timeouts for oracle work.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::debug;

use super::oracle::{ExtractionOracle, OracleRequest};
use crate::error::OracleError;

/// Runs oracle calls on their own threads with a timeout, and caps how many
/// of those threads exist at once.
///
/// A call that overruns is abandoned: its thread finishes in the background,
/// its result is dropped and it keeps its slot until it returns. A caller
/// that finds every slot taken waits for one up to the call timeout.
pub(crate) struct OracleCalls {
    permits: Receiver<()>,
    release: Sender<()>,
    limit: usize,
}

/// Slot of one running call, given back when dropped.
struct Permit(Sender<()>);

impl Drop for Permit {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

impl OracleCalls {
    /// Allows at most `limit` (at least 1) call threads.
    pub(crate) fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        let (release, permits) = bounded(limit);
        for _ in 0..limit {
            // Capacity is limit, so this never blocks.
            let _ = release.send(());
        }
        Self {
            permits,
            release,
            limit,
        }
    }

    /// Call threads alive right now, abandoned ones included.
    pub(crate) fn in_flight(&self) -> usize {
        self.limit - self.permits.len()
    }

    /// Runs one oracle call and waits at most `timeout` for its result.
    pub(crate) fn call(
        &self,
        oracle: &Arc<dyn ExtractionOracle>,
        request: &OracleRequest,
        timeout: Duration,
    ) -> Result<String, OracleError> {
        let timed_out = || OracleError::Timeout {
            duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        };
        if self.permits.recv_timeout(timeout).is_err() {
            debug!(chunk = %request.chunk_id, limit = self.limit, "No free oracle slot");
            return Err(timed_out());
        }
        let permit = Permit(self.release.clone());

        let (tx, rx) = bounded(1);
        let oracle = Arc::clone(oracle);
        let req = request.clone();
        thread::Builder::new()
            .name(format!("hyperibis-oracle-{}", request.chunk_id))
            .spawn(move || {
                let _permit = permit;
                let _ = tx.send(oracle.complete(&req, timeout));
            })
            .map_err(|e| OracleError::Unavailable {
                message: format!("cannot spawn oracle call: {e}"),
            })?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(timed_out()),
            Err(RecvTimeoutError::Disconnected) => Err(OracleError::Unavailable {
                message: "oracle call ended without a result".to_string(),
            }),
        }
    }
}

/// Applies `f` to every item on up to `workers` threads and returns the
/// results in input order.
pub(crate) fn map_ordered<T, R, F>(items: Vec<T>, workers: usize, f: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    let n = items.len();
    if n == 0 {
        return Vec::new();
    }
    let workers = workers.clamp(1, n);

    let (job_tx, job_rx) = bounded::<(usize, T)>(n);
    for job in items.into_iter().enumerate() {
        // Capacity is n, so this never blocks.
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    let (done_tx, done_rx) = unbounded::<(usize, R)>();
    thread::scope(|s| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let done_tx = done_tx.clone();
            let f = &f;
            s.spawn(move || {
                while let Ok((idx, item)) = job_rx.recv() {
                    if done_tx.send((idx, f(item))).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(done_tx);

    let mut results: Vec<(usize, R)> = done_rx.iter().collect();
    results.sort_by_key(|(idx, _)| *idx);
    results.into_iter().map(|(_, r)| r).collect()
}
