use crate::bsp::{Peer, WorkerId};
use crate::codec::MessageCodec;
use crate::error::{KMeansError, Result};
use crate::feeder::BatchFeeder;
use crate::kernel::{launch, LaunchConfig};
use crate::merge::should_continue;
use crate::vector::CenterSet;
use rayon::prelude::*;
use std::time::Duration;
use tracing::{debug, info};

/// Per-round record kept by a worker.
#[derive(Clone, Debug, PartialEq)]
pub struct RoundStats {
    pub superstep: u64,
    pub changed: usize,
    pub assigned: usize,
    pub messages_received: usize,
}

/// What one worker reports once the job has terminated.
#[derive(Clone, Debug)]
pub struct WorkerSummary {
    pub worker: WorkerId,
    pub is_master: bool,
    pub supersteps: u64,
    pub centers: CenterSet,
    pub cached_vectors: usize,
    pub rounds: Vec<RoundStats>,
    pub kernel_time: Duration,
}

/// Drives one worker through its supersteps:
///
/// ```text
/// INIT -> ASSIGN (batch loop) -> AGGREGATE -> BARRIER -> MERGE & CHECK
///      -> ASSIGN again, or TERMINATE
/// ```
///
/// Every worker sees the same merged messages and the same superstep
/// counter, so all of them stop in the same round.
pub struct KMeansWorker<'a> {
    launch: LaunchConfig,
    max_iterations: u64,
    tolerance: f64,
    codec: &'a dyn MessageCodec,
    initial: CenterSet,
}

impl<'a> KMeansWorker<'a> {
    pub fn new(
        launch: LaunchConfig,
        max_iterations: u64,
        codec: &'a dyn MessageCodec,
        initial: CenterSet,
    ) -> Self {
        KMeansWorker {
            launch,
            max_iterations,
            tolerance: 0.0,
            codec,
            initial,
        }
    }

    /// Centers moving by at most `tolerance` (L1) no longer count as changed.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Runs the round loop and the output pass. Any failure aborts the whole
    /// group so sibling workers do not wait on a barrier forever.
    pub fn run<P>(&self, peer: &P) -> Result<WorkerSummary>
    where
        P: Peer + ?Sized,
    {
        self.run_inner(peer).map_err(|e| {
            peer.abort(&e.to_string());
            e
        })
    }

    fn run_inner<P>(&self, peer: &P) -> Result<WorkerSummary>
    where
        P: Peer + ?Sized,
    {
        let worker = peer.current_worker_id();
        let feeder = BatchFeeder::new(self.initial.dimension());
        let mut centers = self.initial.clone();
        let mut rounds = Vec::new();
        let mut kernel_time = Duration::ZERO;

        loop {
            let round = launch(
                self.launch,
                &centers,
                &feeder,
                peer,
                self.codec,
                self.tolerance,
            )?;
            kernel_time += round.elapsed;

            let superstep = peer.superstep_count();
            let changed = round.merge.changed;
            debug!(
                worker,
                superstep,
                changed,
                assigned = round.assigned,
                received = round.messages_received,
                "round merged"
            );
            rounds.push(RoundStats {
                superstep,
                changed,
                assigned: round.assigned,
                messages_received: round.messages_received,
            });
            centers = round.merge.centers;

            if !should_continue(changed, superstep, self.max_iterations) {
                if changed == 0 {
                    info!(worker, superstep, "converged");
                } else {
                    info!(worker, superstep, changed, "iteration limit reached");
                }
                break;
            }
        }

        let cache = feeder.into_cache()?;
        let labels: Vec<usize> = cache
            .as_slice()
            .par_iter()
            .map(|v| centers.nearest(v))
            .collect();
        for (v, &label) in cache.iter().zip(labels.iter()) {
            peer.write(label, v)?;
        }
        peer.flush()?;
        debug!(worker, written = labels.len(), "assignments written");

        Ok(WorkerSummary {
            worker,
            is_master: peer.is_master(),
            supersteps: peer.superstep_count(),
            centers,
            cached_vectors: cache.len(),
            rounds,
            kernel_time,
        })
    }
}

/// Checks that every worker ended with the same center set.
pub fn agreed_centers(summaries: &[WorkerSummary]) -> Result<CenterSet> {
    let first = summaries
        .first()
        .ok_or_else(|| KMeansError::transport("no worker summaries"))?;
    if let Some(other) = summaries.iter().find(|s| s.centers != first.centers) {
        return Err(KMeansError::transport(format!(
            "workers {} and {} disagree on the final centers",
            first.worker, other.worker
        )));
    }
    Ok(first.centers.clone())
}
