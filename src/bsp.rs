use crate::error::{KMeansError, Result};
use crate::io::{AssignmentWriter, RecordSource};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use tracing::{debug, warn};

pub type WorkerId = usize;

/// One participant of a synchronous superstep group: worker identity, a
/// message bus and a collective barrier. A distributed runtime plugs in here;
/// [`LocalCluster`] runs a whole group inside one process.
///
/// Messages sent during superstep `s` become readable through
/// [`Peer::next_message`] only after the `sync()` that ends `s`; unread
/// messages are dropped by the following `sync()`.
pub trait Peer: RecordSource {
    fn current_worker_id(&self) -> WorkerId;
    fn all_worker_ids(&self) -> Vec<WorkerId>;
    fn send(&self, to: WorkerId, payload: Vec<u8>) -> Result<()>;
    /// Collective barrier. Returns once every worker has arrived and all
    /// messages sent before it are deliverable.
    fn sync(&self) -> Result<()>;
    /// Number of completed `sync()` calls.
    fn superstep_count(&self) -> u64;
    fn pending_message_count(&self) -> usize;
    fn next_message(&self) -> Option<Vec<u8>>;
    fn write(&self, cluster: usize, vector: &[f64]) -> Result<()>;
    fn flush(&self) -> Result<()>;
    /// Fails the whole group: every pending and future `sync()` and `send()`
    /// returns a transport error.
    fn abort(&self, reason: &str);

    fn num_workers(&self) -> usize {
        self.all_worker_ids().len()
    }

    /// The worker in the middle of the id list collects job-level output.
    fn master_id(&self) -> WorkerId {
        let ids = self.all_worker_ids();
        ids[ids.len() / 2]
    }

    fn is_master(&self) -> bool {
        self.current_worker_id() == self.master_id()
    }
}

#[derive(Default)]
struct BarrierState {
    arrived: usize,
    generation: u64,
    broken: Option<String>,
}

/// Reusable barrier that can be broken, releasing every waiter with an error.
pub struct SyncBarrier {
    parties: usize,
    state: Mutex<BarrierState>,
    cv: Condvar,
}

impl SyncBarrier {
    pub fn new(parties: usize) -> Self {
        SyncBarrier {
            parties,
            state: Mutex::new(BarrierState::default()),
            cv: Condvar::new(),
        }
    }

    pub fn wait(&self) -> Result<()> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| KMeansError::transport("barrier lock poisoned"))?;
        if let Some(reason) = &guard.broken {
            return Err(KMeansError::transport(format!("barrier broken: {}", reason)));
        }
        let entry_gen = guard.generation;
        guard.arrived += 1;
        if guard.arrived == self.parties {
            // release this generation
            guard.arrived = 0;
            guard.generation = guard.generation.wrapping_add(1);
            self.cv.notify_all();
            return Ok(());
        }
        while guard.generation == entry_gen && guard.broken.is_none() {
            guard = self
                .cv
                .wait(guard)
                .map_err(|_| KMeansError::transport("barrier lock poisoned"))?;
        }
        match &guard.broken {
            Some(reason) if guard.generation == entry_gen => {
                Err(KMeansError::transport(format!("barrier broken: {}", reason)))
            }
            _ => Ok(()),
        }
    }

    pub fn break_barrier(&self, reason: &str) {
        let mut guard = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if guard.broken.is_none() {
            guard.broken = Some(reason.to_string());
        }
        self.cv.notify_all();
    }

    pub fn is_broken(&self) -> bool {
        self.state
            .lock()
            .map(|g| g.broken.is_some())
            .unwrap_or(true)
    }
}

/// Builds the peers of an in-process synchronous group.
pub struct LocalCluster;

impl LocalCluster {
    /// One peer per shard; `writers[i]` receives worker `i`'s assignments.
    pub fn new(
        shards: Vec<Box<dyn RecordSource>>,
        writers: Vec<Box<dyn AssignmentWriter>>,
    ) -> Result<Vec<LocalPeer>> {
        if shards.is_empty() {
            return Err(KMeansError::config("a cluster needs at least one worker"));
        }
        if shards.len() != writers.len() {
            return Err(KMeansError::config(format!(
                "{} shards but {} writers",
                shards.len(),
                writers.len()
            )));
        }
        let n = shards.len();
        let barrier = Arc::new(SyncBarrier::new(n));
        let (senders, receivers): (Vec<Sender<Vec<u8>>>, Vec<Receiver<Vec<u8>>>) =
            (0..n).map(|_| unbounded()).unzip();

        Ok(shards
            .into_iter()
            .zip(writers)
            .zip(receivers)
            .enumerate()
            .map(|(id, ((source, writer), inbox))| LocalPeer {
                id,
                senders: senders.clone(),
                inbox,
                current: Mutex::new(VecDeque::new()),
                superstep: AtomicU64::new(0),
                barrier: Arc::clone(&barrier),
                source,
                writer,
            })
            .collect())
    }
}

pub struct LocalPeer {
    id: WorkerId,
    senders: Vec<Sender<Vec<u8>>>,
    inbox: Receiver<Vec<u8>>,
    current: Mutex<VecDeque<Vec<u8>>>,
    superstep: AtomicU64,
    barrier: Arc<SyncBarrier>,
    source: Box<dyn RecordSource>,
    writer: Box<dyn AssignmentWriter>,
}

impl RecordSource for LocalPeer {
    fn read_next_record(&self) -> Result<Option<String>> {
        self.source.read_next_record()
    }
}

impl Peer for LocalPeer {
    fn current_worker_id(&self) -> WorkerId {
        self.id
    }

    fn all_worker_ids(&self) -> Vec<WorkerId> {
        (0..self.senders.len()).collect()
    }

    fn send(&self, to: WorkerId, payload: Vec<u8>) -> Result<()> {
        if self.barrier.is_broken() {
            return Err(KMeansError::transport("message bus is down"));
        }
        let sender = self
            .senders
            .get(to)
            .ok_or_else(|| KMeansError::transport(format!("unknown worker {}", to)))?;
        sender
            .send(payload)
            .map_err(|_| KMeansError::transport(format!("worker {} is gone", to)))
    }

    fn sync(&self) -> Result<()> {
        // arrive: every send of this superstep has happened
        self.barrier.wait()?;
        {
            let mut current = self
                .current
                .lock()
                .map_err(|_| KMeansError::transport("inbox lock poisoned"))?;
            current.clear();
            current.extend(self.inbox.try_iter());
            debug!(
                worker = self.id,
                messages = current.len(),
                "delivered superstep messages"
            );
        }
        // depart: nobody sends for the next superstep before everyone drained
        self.barrier.wait()?;
        self.superstep.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn superstep_count(&self) -> u64 {
        self.superstep.load(Ordering::SeqCst)
    }

    fn pending_message_count(&self) -> usize {
        self.current
            .lock()
            .map(|c| c.len())
            .unwrap_or_else(|p| p.into_inner().len())
    }

    fn next_message(&self) -> Option<Vec<u8>> {
        self.current
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
    }

    fn write(&self, cluster: usize, vector: &[f64]) -> Result<()> {
        self.writer.write(cluster, vector)
    }

    fn flush(&self) -> Result<()> {
        self.writer.flush()
    }

    fn abort(&self, reason: &str) {
        warn!(worker = self.id, "aborting superstep group: {}", reason);
        self.barrier.break_barrier(reason);
    }
}
