pub mod bsp;
pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod feeder;
pub mod io;
pub mod job;
pub mod kernel;
pub mod layout;
pub mod merge;
pub mod utils;
pub mod vector;
pub mod worker;

pub use config::KMeansConfig;
pub use error::{KMeansError, Result};
pub use job::{run_job, run_shards, JobSummary};
