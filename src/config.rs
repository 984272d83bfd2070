use crate::codec::WireFormat;
use crate::error::{KMeansError, Result};
use crate::kernel::{LaunchConfig, MAX_THREADS_PER_LAUNCH};
use crate::layout::SharedLayout;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Shared memory available to one block on common accelerators.
pub const DEFAULT_SHARED_MEMORY_BUDGET: usize = 48 * 1024;

fn default_block_size() -> usize {
    64
}

fn default_grid_size() -> usize {
    1
}

fn default_max_iterations() -> u64 {
    100
}

fn default_num_workers() -> usize {
    2
}

fn default_shared_memory_budget() -> usize {
    DEFAULT_SHARED_MEMORY_BUDGET
}

fn default_input() -> PathBuf {
    PathBuf::from("input/vectors.txt")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

/// Configuration for one clustering job.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct KMeansConfig {
    /// Number of centers.
    pub k: usize,

    /// Vector dimension.
    pub dimension: usize,

    /// Threads per block; also the number of vectors staged per batch.
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Blocks per worker.
    #[serde(default = "default_grid_size")]
    pub grid_size: usize,

    /// The job stops once the superstep counter exceeds this.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,

    /// A center whose L1 movement is at most this no longer counts as
    /// changed. Zero means any movement at all keeps the job iterating.
    #[serde(default)]
    pub convergence_tolerance: f64,

    #[serde(default = "default_num_workers")]
    pub num_workers: usize,

    /// Bytes of block-shared memory a launch may use.
    #[serde(default = "default_shared_memory_budget")]
    pub shared_memory_budget: usize,

    #[serde(default)]
    pub wire_format: WireFormat,

    /// Explicit starting centers. When absent, the first `k` input records are used.
    #[serde(default)]
    pub initial_centers: Option<Vec<Vec<f64>>>,

    /// Text file with one comma-separated vector per line.
    #[serde(default = "default_input")]
    pub input: PathBuf,

    /// Directory for `part-<worker>.txt` assignments and `centers.txt`.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl KMeansConfig {
    pub fn new(k: usize, dimension: usize) -> Self {
        Self {
            k,
            dimension,
            block_size: default_block_size(),
            grid_size: default_grid_size(),
            max_iterations: default_max_iterations(),
            convergence_tolerance: 0.0,
            num_workers: default_num_workers(),
            shared_memory_budget: default_shared_memory_budget(),
            wire_format: WireFormat::default(),
            initial_centers: None,
            input: default_input(),
            output_dir: default_output_dir(),
        }
    }

    /// Loads a YAML job file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: KMeansConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_grid_size(mut self, grid_size: usize) -> Self {
        self.grid_size = grid_size;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u64) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_convergence_tolerance(mut self, tolerance: f64) -> Self {
        self.convergence_tolerance = tolerance;
        self
    }

    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    pub fn with_shared_memory_budget(mut self, budget: usize) -> Self {
        self.shared_memory_budget = budget;
        self
    }

    pub fn with_wire_format(mut self, wire_format: WireFormat) -> Self {
        self.wire_format = wire_format;
        self
    }

    pub fn with_initial_centers(mut self, centers: Vec<Vec<f64>>) -> Self {
        self.initial_centers = Some(centers);
        self
    }

    pub fn with_input(mut self, input: impl Into<PathBuf>) -> Self {
        self.input = input.into();
        self
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    pub fn shared_layout(&self) -> SharedLayout {
        SharedLayout::new(self.k, self.dimension, self.block_size)
    }

    pub fn launch_config(&self) -> LaunchConfig {
        LaunchConfig {
            block_size: self.block_size,
            grid_size: self.grid_size,
        }
    }

    /// Rejects configurations that can never launch. Runs before any round.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("k", self.k),
            ("dimension", self.dimension),
            ("block_size", self.block_size),
            ("grid_size", self.grid_size),
            ("num_workers", self.num_workers),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(KMeansError::config(format!("{} must be greater than 0", name)));
            }
        }

        match self.launch_config().total_threads() {
            Some(n) if n <= MAX_THREADS_PER_LAUNCH => {}
            _ => {
                return Err(KMeansError::config(format!(
                    "grid_size {} x block_size {} exceeds {} kernel threads per worker",
                    self.grid_size, self.block_size, MAX_THREADS_PER_LAUNCH
                )))
            }
        }

        if !(self.convergence_tolerance >= 0.0) {
            return Err(KMeansError::config(format!(
                "convergence_tolerance must be a non-negative number, got {}",
                self.convergence_tolerance
            )));
        }

        let layout = self.shared_layout();
        if !layout.fits(self.shared_memory_budget) {
            return Err(KMeansError::config(format!(
                "shared region needs {} bytes (k={}, dimension={}, block_size={}) but the budget is {}",
                layout.total_size, self.k, self.dimension, self.block_size, self.shared_memory_budget
            )));
        }

        if let Some(centers) = &self.initial_centers {
            if centers.len() != self.k {
                return Err(KMeansError::config(format!(
                    "{} initial centers given, expected {}",
                    centers.len(),
                    self.k
                )));
            }
            if let Some((i, c)) = centers
                .iter()
                .enumerate()
                .find(|(_, c)| c.len() != self.dimension)
            {
                return Err(KMeansError::config(format!(
                    "initial center {} has dimension {}, expected {}",
                    i,
                    c.len(),
                    self.dimension
                )));
            }
        }

        info!(
            k = self.k,
            dimension = self.dimension,
            block_size = self.block_size,
            grid_size = self.grid_size,
            workers = self.num_workers,
            shared_bytes = layout.total_size,
            "configuration validated"
        );
        Ok(())
    }
}
