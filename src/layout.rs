use std::mem;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

const F64_SIZE: usize = mem::size_of::<f64>();
const U32_SIZE: usize = mem::size_of::<u32>();

#[inline]
fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) / align * align
}

/// Byte offsets of the five arrays of a block-shared region:
///
/// ```text
/// centers[K][D]  f64
/// accum[K][D]    f64
/// count[K]       u32
/// stage[B][D]    f64
/// has_more       u32 flag
/// ```
///
/// Offsets are a pure function of `(K, D, B)`, so every thread of a block
/// derives the same layout without coordinating.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SharedLayout {
    pub k: usize,
    pub dim: usize,
    pub block_size: usize,
    pub centers_offset: usize,
    pub accum_offset: usize,
    pub count_offset: usize,
    pub stage_offset: usize,
    pub has_more_offset: usize,
    pub total_size: usize,
}

impl SharedLayout {
    pub fn new(k: usize, dim: usize, block_size: usize) -> Self {
        let centers_offset = 0;
        let centers_size = k * dim * F64_SIZE;

        let accum_offset = align_up(centers_offset + centers_size, F64_SIZE);
        let accum_size = k * dim * F64_SIZE;

        let count_offset = align_up(accum_offset + accum_size, U32_SIZE);
        let count_size = k * U32_SIZE;

        let stage_offset = align_up(count_offset + count_size, F64_SIZE);
        let stage_size = block_size * dim * F64_SIZE;

        let has_more_offset = align_up(stage_offset + stage_size, U32_SIZE);
        let total_size = has_more_offset + U32_SIZE;

        let layout = SharedLayout {
            k,
            dim,
            block_size,
            centers_offset,
            accum_offset,
            count_offset,
            stage_offset,
            has_more_offset,
            total_size,
        };
        debug_assert!(layout.is_disjoint(), "overlapping shared layout: {:?}", layout);
        layout
    }

    /// `(name, offset, byte length, alignment)` of every array, in address order.
    pub fn regions(&self) -> [(&'static str, usize, usize, usize); 5] {
        [
            ("centers", self.centers_offset, self.k * self.dim * F64_SIZE, F64_SIZE),
            ("accum", self.accum_offset, self.k * self.dim * F64_SIZE, F64_SIZE),
            ("count", self.count_offset, self.k * U32_SIZE, U32_SIZE),
            ("stage", self.stage_offset, self.block_size * self.dim * F64_SIZE, F64_SIZE),
            ("has_more", self.has_more_offset, U32_SIZE, U32_SIZE),
        ]
    }

    pub fn is_disjoint(&self) -> bool {
        let regions = self.regions();
        regions.windows(2).all(|w| w[0].1 + w[0].2 <= w[1].1)
            && regions.iter().all(|r| r.1 % r.3 == 0)
            && regions[4].1 + regions[4].2 <= self.total_size
    }

    pub fn fits(&self, budget: usize) -> bool {
        self.total_size <= budget
    }
}

/// A `rows x cols` f64 matrix inside a shared region. Values are stored as
/// bit patterns in `AtomicU64` cells so concurrent threads can add into them.
#[derive(Clone, Copy)]
pub struct SharedMatrix<'a> {
    cells: &'a [AtomicU64],
    cols: usize,
}

impl<'a> SharedMatrix<'a> {
    pub fn rows(&self) -> usize {
        if self.cols == 0 {
            0
        } else {
            self.cells.len() / self.cols
        }
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        f64::from_bits(self.cells[row * self.cols + col].load(Ordering::Relaxed))
    }

    pub fn set(&self, row: usize, col: usize, value: f64) {
        self.cells[row * self.cols + col].store(value.to_bits(), Ordering::Relaxed);
    }

    /// Lock-free `cell += value`.
    pub fn atomic_add(&self, row: usize, col: usize, value: f64) {
        let cell = &self.cells[row * self.cols + col];
        let mut current = cell.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + value).to_bits();
            match cell.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => return,
                Err(seen) => current = seen,
            }
        }
    }

    pub fn load_row(&self, row: usize, out: &mut [f64]) {
        for (col, slot) in out.iter_mut().enumerate().take(self.cols) {
            *slot = self.get(row, col);
        }
    }

    pub fn store_row(&self, row: usize, values: &[f64]) {
        for (col, &v) in values.iter().enumerate().take(self.cols) {
            self.set(row, col, v);
        }
    }

    pub fn add_row(&self, row: usize, values: &[f64]) {
        for (col, &v) in values.iter().enumerate().take(self.cols) {
            self.atomic_add(row, col, v);
        }
    }

    /// Copies the whole matrix out in row-major order.
    pub fn to_vec(&self) -> Vec<f64> {
        self.cells
            .iter()
            .map(|c| f64::from_bits(c.load(Ordering::Relaxed)))
            .collect()
    }

    pub fn fill_zero(&self) {
        for c in self.cells {
            c.store(0f64.to_bits(), Ordering::Relaxed);
        }
    }
}

/// Scratch region shared by all threads of one block.
///
/// Backed by `AtomicU64` words so the allocation is 8-byte aligned; the f64
/// arrays live on whole words and the u32 arrays are viewed through
/// `AtomicU32` at 4-byte aligned offsets. No byte is ever reached through
/// both widths because the arrays never overlap.
pub struct SharedRegion {
    layout: SharedLayout,
    words: Box<[AtomicU64]>,
}

impl SharedRegion {
    pub fn new(layout: SharedLayout) -> Self {
        let word_count = align_up(layout.total_size, F64_SIZE) / F64_SIZE;
        let words = (0..word_count).map(|_| AtomicU64::new(0)).collect();
        let region = SharedRegion { layout, words };
        region.has_more_flag().store(1, Ordering::Relaxed);
        region
    }

    pub fn layout(&self) -> &SharedLayout {
        &self.layout
    }

    fn f64_array(&self, offset: usize, rows: usize) -> SharedMatrix<'_> {
        debug_assert_eq!(offset % F64_SIZE, 0);
        let start = offset / F64_SIZE;
        let len = rows * self.layout.dim;
        SharedMatrix {
            cells: &self.words[start..start + len],
            cols: self.layout.dim,
        }
    }

    fn u32_array(&self, offset: usize, len: usize) -> &[AtomicU32] {
        assert!(offset % U32_SIZE == 0 && offset + len * U32_SIZE <= self.words.len() * F64_SIZE);
        // SAFETY: the range is in bounds and 4-byte aligned (checked above;
        // the base allocation is 8-byte aligned). AtomicU32 has the same layout
        // as u32, and these bytes are only ever accessed through this view.
        unsafe {
            let base = self.words.as_ptr() as *const u8;
            std::slice::from_raw_parts(base.add(offset) as *const AtomicU32, len)
        }
    }

    pub fn centers(&self) -> SharedMatrix<'_> {
        self.f64_array(self.layout.centers_offset, self.layout.k)
    }

    pub fn accum(&self) -> SharedMatrix<'_> {
        self.f64_array(self.layout.accum_offset, self.layout.k)
    }

    pub fn stage(&self) -> SharedMatrix<'_> {
        self.f64_array(self.layout.stage_offset, self.layout.block_size)
    }

    pub fn counts(&self) -> &[AtomicU32] {
        self.u32_array(self.layout.count_offset, self.layout.k)
    }

    fn has_more_flag(&self) -> &AtomicU32 {
        &self.u32_array(self.layout.has_more_offset, 1)[0]
    }

    pub fn has_more(&self) -> bool {
        self.has_more_flag().load(Ordering::Acquire) != 0
    }

    pub fn set_has_more(&self, more: bool) {
        self.has_more_flag().store(more as u32, Ordering::Release);
    }

    /// Zeroes `accum` and `count` for a new round.
    pub fn reset_accumulators(&self) {
        self.accum().fill_zero();
        for c in self.counts() {
            c.store(0, Ordering::Relaxed);
        }
    }
}
