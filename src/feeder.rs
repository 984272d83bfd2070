use crate::cache::VectorCache;
use crate::codec::parse_vector_record;
use crate::error::{KMeansError, Result};
use crate::io::RecordSource;
use crate::layout::SharedRegion;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct FeederState {
    cache: VectorCache,
}

/// Stages batches of input vectors into a block's shared region.
///
/// Batches are numbered from the start of the shard: batch `j` holds cached
/// vectors `[j*B, (j+1)*B)`. Block `b` of a `g`-block grid stages batches
/// `b, b+g, b+2g, ...`, so which vectors a block sees never depends on
/// scheduling. All blocks of one worker share the feeder; the first round
/// reads the shard lazily under the mutex, whichever block gets there first.
#[derive(Debug)]
pub struct BatchFeeder {
    dim: usize,
    state: Mutex<FeederState>,
}

impl BatchFeeder {
    pub fn new(dim: usize) -> Self {
        BatchFeeder {
            dim,
            state: Mutex::new(FeederState::default()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, FeederState>> {
        self.state
            .lock()
            .map_err(|_| KMeansError::transport("batch feeder lock poisoned"))
    }

    /// Reads and caches records until `wanted` vectors are cached or the
    /// shard is exhausted.
    fn fill<S>(&self, state: &mut FeederState, source: &S, wanted: usize) -> Result<()>
    where
        S: RecordSource + ?Sized,
    {
        while !state.cache.is_frozen() && state.cache.len() < wanted {
            match source.read_next_record()? {
                Some(record) => {
                    if record.trim().is_empty() {
                        continue;
                    }
                    state.cache.push(parse_vector_record(&record, self.dim)?);
                }
                None => state.cache.freeze(),
            }
        }
        Ok(())
    }

    /// Fills `stage[0..i)` with batch `batch` and returns `i`.
    ///
    /// While the cache is still filling, missing records are read from
    /// `source` and appended to it; afterwards the cache is replayed.
    /// `has_more` is cleared once it is known that the block's next batch,
    /// `batch + stride`, would be empty.
    pub fn stage<S>(
        &self,
        source: &S,
        region: &SharedRegion,
        batch: usize,
        stride: usize,
    ) -> Result<usize>
    where
        S: RecordSource + ?Sized,
    {
        let mut state = self.lock()?;
        let block_size = region.layout().block_size;
        let start = batch * block_size;
        self.fill(&mut state, source, start + block_size)?;

        let stage = region.stage();
        let end = state.cache.len().min(start + block_size);
        let mut i = 0;
        for v in state.cache.as_slice().get(start..end).unwrap_or(&[]) {
            stage.store_row(i, v);
            i += 1;
        }

        let next = (batch + stride.max(1)) * block_size;
        if state.cache.is_frozen() && next >= state.cache.len() {
            region.set_has_more(false);
        }
        Ok(i)
    }

    pub fn cached_len(&self) -> Result<usize> {
        Ok(self.lock()?.cache.len())
    }

    pub fn into_cache(self) -> Result<VectorCache> {
        self.state
            .into_inner()
            .map(|s| s.cache)
            .map_err(|_| KMeansError::transport("batch feeder lock poisoned"))
    }
}
