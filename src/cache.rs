use crate::vector::InputVector;

/// Per-worker store of the vectors read from the worker's shard.
///
/// Filled while the first round streams the shard, then frozen: later rounds
/// replay the same vectors in the same order instead of re-reading input.
#[derive(Debug, Default)]
pub struct VectorCache {
    vectors: Vec<InputVector>,
    frozen: bool,
}

impl VectorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a freshly read vector. Ignored once the cache is frozen.
    pub fn push(&mut self, v: InputVector) {
        debug_assert!(!self.frozen, "push into a frozen vector cache");
        if !self.frozen {
            self.vectors.push(v);
        }
    }

    /// Marks the shard as fully read.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn get(&self, i: usize) -> Option<&InputVector> {
        self.vectors.get(i)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, InputVector> {
        self.vectors.iter()
    }

    pub fn as_slice(&self) -> &[InputVector] {
        &self.vectors
    }
}
