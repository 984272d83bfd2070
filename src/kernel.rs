use crate::bsp::{Peer, SyncBarrier};
use crate::codec::{MessageCodec, PartialSum};
use crate::error::{KMeansError, Result};
use crate::feeder::BatchFeeder;
use crate::layout::{SharedLayout, SharedRegion};
use crate::merge::{merge_with_tolerance, MergeOutcome};
use crate::vector::{nearest_center, CenterSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

/// Upper bound on `block_size * grid_size`; every kernel thread is an OS thread.
pub const MAX_THREADS_PER_LAUNCH: usize = 4096;

/// Shape of one launch: `grid_size` blocks of `block_size` threads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaunchConfig {
    pub block_size: usize,
    pub grid_size: usize,
}

impl LaunchConfig {
    pub fn total_threads(&self) -> Option<usize> {
        self.block_size.checked_mul(self.grid_size)
    }
}

/// Identity of one kernel thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThreadIdx {
    pub block_index: usize,
    pub thread_index: usize,
    pub global_thread_index: usize,
}

impl ThreadIdx {
    fn new(block_index: usize, thread_index: usize, block_size: usize) -> Self {
        ThreadIdx {
            block_index,
            thread_index,
            global_thread_index: block_index * block_size + thread_index,
        }
    }
}

/// What one kernel launch (one superstep) produced.
#[derive(Clone, Debug)]
pub struct RoundResult {
    pub merge: MergeOutcome,
    /// Vectors this worker assigned during the round, over all blocks.
    pub assigned: usize,
    /// Partial-sum messages this worker broadcast (per destination).
    pub messages_sent: usize,
    /// Messages merged after the barrier.
    pub messages_received: usize,
    pub elapsed: Duration,
}

struct BlockState {
    region: SharedRegion,
    barrier: SyncBarrier,
    /// `labels[t]` is the center thread `t` picked for its staged vector.
    labels: Vec<AtomicUsize>,
    staged: AtomicUsize,
    failed: AtomicBool,
}

struct LaunchState<'a, P: Peer + ?Sized> {
    grid_size: usize,
    centers: &'a CenterSet,
    feeder: &'a BatchFeeder,
    peer: &'a P,
    codec: &'a dyn MessageCodec,
    tolerance: f64,
    blocks: Vec<BlockState>,
    grid_barrier: SyncBarrier,
    grid_failed: AtomicBool,
    assigned: AtomicUsize,
    messages_sent: AtomicUsize,
    first_error: Mutex<Option<KMeansError>>,
}

impl<'a, P: Peer + ?Sized> LaunchState<'a, P> {
    fn new(
        config: LaunchConfig,
        centers: &'a CenterSet,
        feeder: &'a BatchFeeder,
        peer: &'a P,
        codec: &'a dyn MessageCodec,
        tolerance: f64,
    ) -> Self {
        let layout = SharedLayout::new(centers.k(), centers.dimension(), config.block_size);
        LaunchState {
            grid_size: config.grid_size,
            centers,
            feeder,
            peer,
            codec,
            tolerance,
            blocks: (0..config.grid_size)
                .map(|_| BlockState {
                    region: SharedRegion::new(layout),
                    barrier: SyncBarrier::new(config.block_size),
                    labels: (0..config.block_size).map(|_| AtomicUsize::new(0)).collect(),
                    staged: AtomicUsize::new(0),
                    failed: AtomicBool::new(false),
                })
                .collect(),
            grid_barrier: SyncBarrier::new(config.grid_size),
            grid_failed: AtomicBool::new(false),
            assigned: AtomicUsize::new(0),
            messages_sent: AtomicUsize::new(0),
            first_error: Mutex::new(None),
        }
    }

    fn record_error(&self, block: &BlockState, err: KMeansError) {
        block.failed.store(true, Ordering::SeqCst);
        self.note_error(err);
    }

    fn note_error(&self, err: KMeansError) {
        self.grid_failed.store(true, Ordering::SeqCst);
        let mut slot = self.first_error.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    /// Fails the launch and releases every thread parked on a barrier.
    fn abort(&self, err: KMeansError) {
        let reason = err.to_string();
        self.note_error(err);
        for block in &self.blocks {
            block.failed.store(true, Ordering::SeqCst);
            block.barrier.break_barrier(&reason);
        }
        self.grid_barrier.break_barrier(&reason);
    }
}

/// Runs one round of the assignment kernel for this worker: assign and
/// accumulate every vector of the shard, broadcast partial sums, `sync()`
/// with the other workers and merge what they sent.
///
/// Each block owns one [`SharedRegion`] and one block barrier and goes through
///
/// ```text
/// INIT -> (stage | barrier | assign | barrier | reduce)* -> aggregate -> grid barrier
/// ```
///
/// after which global thread 0 runs the inter-worker `sync()` and the merge.
/// Thread 0 of a block is the only writer of the stage and the accumulators.
/// Other threads only publish their chosen center and bump the integer
/// counts, and thread 0 folds the batch into `accum` in thread-index order,
/// so a block's partial sums do not depend on scheduling.
///
/// The shared-region size must already have been checked against the
/// platform budget; the kernel does not validate it.
pub fn launch<P>(
    config: LaunchConfig,
    centers: &CenterSet,
    feeder: &BatchFeeder,
    peer: &P,
    codec: &dyn MessageCodec,
    tolerance: f64,
) -> Result<RoundResult>
where
    P: Peer + ?Sized,
{
    if config.block_size == 0 || config.grid_size == 0 {
        return Err(KMeansError::config("block and grid size must be non-zero"));
    }
    match config.total_threads() {
        Some(n) if n <= MAX_THREADS_PER_LAUNCH => {}
        _ => {
            return Err(KMeansError::config(format!(
                "{} blocks of {} threads exceed the {} threads a launch may use",
                config.grid_size, config.block_size, MAX_THREADS_PER_LAUNCH
            )))
        }
    }
    let start = Instant::now();
    let state = LaunchState::new(config, centers, feeder, peer, codec, tolerance);

    let merged = thread::scope(|s| {
        let mut handles = Vec::with_capacity(config.grid_size * config.block_size);
        'spawn: for b in 0..config.grid_size {
            for t in 0..config.block_size {
                let state = &state;
                let idx = ThreadIdx::new(b, t, config.block_size);
                let spawned = thread::Builder::new()
                    .name(format!("kernel-{}-{}", b, t))
                    .spawn_scoped(s, move || run_thread(state, idx));
                match spawned {
                    Ok(h) => handles.push(h),
                    Err(e) => {
                        state.abort(KMeansError::transport(format!(
                            "could not start kernel thread {}/{}: {}",
                            b, t, e
                        )));
                        break 'spawn;
                    }
                }
            }
        }

        let mut merged = None;
        let mut panicked = false;
        for h in handles {
            match h.join() {
                Ok(Some(outcome)) => merged = Some(outcome),
                Ok(None) => {}
                Err(_) => panicked = true,
            }
        }
        (merged, panicked)
    });

    if let Some(err) = state
        .first_error
        .into_inner()
        .unwrap_or_else(|p| p.into_inner())
    {
        return Err(err);
    }
    let (merged, panicked) = merged;
    if panicked {
        return Err(KMeansError::transport("kernel thread panicked"));
    }
    let (merge, messages_received) =
        merged.ok_or_else(|| KMeansError::transport("global thread 0 produced no merge"))?;

    Ok(RoundResult {
        merge,
        assigned: state.assigned.load(Ordering::SeqCst),
        messages_sent: state.messages_sent.load(Ordering::SeqCst),
        messages_received,
        elapsed: start.elapsed(),
    })
}

fn run_thread<P>(state: &LaunchState<'_, P>, idx: ThreadIdx) -> Option<(MergeOutcome, usize)>
where
    P: Peer + ?Sized,
{
    // a broken barrier means the launch was aborted and the error is recorded
    block_round(state, idx).ok().flatten()
}

fn block_round<P>(
    state: &LaunchState<'_, P>,
    idx: ThreadIdx,
) -> Result<Option<(MergeOutcome, usize)>>
where
    P: Peer + ?Sized,
{
    let block = &state.blocks[idx.block_index];
    let region = &block.region;
    let dim = state.centers.dimension();

    // INIT
    if idx.thread_index == 0 {
        for (c, row) in state.centers.rows().enumerate() {
            region.centers().store_row(c, row);
        }
        region.reset_accumulators();
        region.set_has_more(true);
    }
    block.barrier.wait()?;

    // centers are read-only for the rest of the round
    let centers = region.centers().to_vec();
    let mut v = vec![0.0; dim];
    let mut batch = idx.block_index;

    loop {
        if idx.thread_index == 0 {
            match state.feeder.stage(state.peer, region, batch, state.grid_size) {
                Ok(n) => block.staged.store(n, Ordering::SeqCst),
                Err(e) => {
                    state.record_error(block, e);
                    block.staged.store(0, Ordering::SeqCst);
                    region.set_has_more(false);
                }
            }
            batch += state.grid_size;
        }
        block.barrier.wait()?;

        // read before the next barrier; thread 0 restages only after it
        let staged = block.staged.load(Ordering::SeqCst);
        let more = region.has_more();

        if idx.thread_index < staged {
            region.stage().load_row(idx.thread_index, &mut v);
            let c = nearest_center(&centers, dim, &v);
            block.labels[idx.thread_index].store(c, Ordering::Relaxed);
            region.counts()[c].fetch_add(1, Ordering::Relaxed);
        }
        block.barrier.wait()?;

        if idx.thread_index == 0 {
            // reduce the batch in thread-index order
            for t in 0..staged {
                let c = block.labels[t].load(Ordering::Relaxed);
                region.stage().load_row(t, &mut v);
                region.accum().add_row(c, &v);
            }
            state.assigned.fetch_add(staged, Ordering::Relaxed);
        }

        if !more {
            break;
        }
    }

    if idx.thread_index != 0 {
        return Ok(None);
    }

    if !block.failed.load(Ordering::SeqCst) {
        if let Err(e) = aggregate_and_broadcast(state, region) {
            state.record_error(block, e);
        }
    }
    state.grid_barrier.wait()?;

    if idx.global_thread_index != 0 || state.grid_failed.load(Ordering::SeqCst) {
        return Ok(None);
    }

    match sync_and_merge(state) {
        Ok(out) => Ok(Some(out)),
        Err(e) => {
            state.record_error(block, e);
            Ok(None)
        }
    }
}

/// Thread 0 of a block: one message per touched center, sent to every worker.
fn aggregate_and_broadcast<P>(state: &LaunchState<'_, P>, region: &SharedRegion) -> Result<()>
where
    P: Peer + ?Sized,
{
    let workers = state.peer.all_worker_ids();
    let dim = state.centers.dimension();
    let mut sum = vec![0.0; dim];

    for (c, count) in region.counts().iter().enumerate() {
        let count = count.load(Ordering::SeqCst);
        if count == 0 {
            continue;
        }
        region.accum().load_row(c, &mut sum);
        let payload = state
            .codec
            .encode(&PartialSum::new(c, u64::from(count), sum.clone()))?;
        for &w in &workers {
            state.peer.send(w, payload.clone())?;
        }
        state.messages_sent.fetch_add(1, Ordering::Relaxed);
    }
    Ok(())
}

/// Global thread 0: barrier with the other workers, then merge everything
/// they broadcast this round.
fn sync_and_merge<P>(state: &LaunchState<'_, P>) -> Result<(MergeOutcome, usize)>
where
    P: Peer + ?Sized,
{
    state.peer.sync()?;

    let expected = state.peer.pending_message_count();
    let mut messages = Vec::with_capacity(expected);
    while let Some(payload) = state.peer.next_message() {
        messages.push(state.codec.decode(&payload)?);
    }
    let received = messages.len();
    let outcome = merge_with_tolerance(state.centers, messages, state.tolerance)?;
    Ok((outcome, received))
}
