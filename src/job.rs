use crate::bsp::LocalCluster;
use crate::codec::parse_vector_record;
use crate::config::KMeansConfig;
use crate::error::{KMeansError, Result};
use crate::io::{
    read_records, shard_records, write_centers, AssignmentWriter, MemorySource, RecordSource,
    TextFileWriter,
};
use crate::vector::CenterSet;
use crate::worker::{agreed_centers, KMeansWorker, WorkerSummary};
use std::thread;
use std::time::Instant;
use tracing::info;

/// Outcome of a whole job.
#[derive(Clone, Debug)]
pub struct JobSummary {
    pub centers: CenterSet,
    pub supersteps: u64,
    pub workers: Vec<WorkerSummary>,
}

impl JobSummary {
    pub fn master(&self) -> Option<&WorkerSummary> {
        self.workers.iter().find(|w| w.is_master)
    }
}

/// Initial centers: the configured ones, or else the first `k` records.
pub fn initial_centers(config: &KMeansConfig, records: &[String]) -> Result<CenterSet> {
    if let Some(rows) = &config.initial_centers {
        return CenterSet::from_rows(rows.clone());
    }
    if records.len() < config.k {
        return Err(KMeansError::config(format!(
            "need at least {} input records to seed the centers, found {}",
            config.k,
            records.len()
        )));
    }
    let rows = records[..config.k]
        .iter()
        .map(|r| parse_vector_record(r, config.dimension))
        .collect::<Result<Vec<_>>>()?;
    CenterSet::from_rows(rows)
}

/// Runs one worker thread per shard until every worker has terminated.
pub fn run_shards(
    config: &KMeansConfig,
    initial: CenterSet,
    shards: Vec<Box<dyn RecordSource>>,
    writers: Vec<Box<dyn AssignmentWriter>>,
) -> Result<JobSummary> {
    config.validate()?;
    if initial.k() != config.k || initial.dimension() != config.dimension {
        return Err(KMeansError::config(format!(
            "initial centers are {}x{}, expected {}x{}",
            initial.k(),
            initial.dimension(),
            config.k,
            config.dimension
        )));
    }

    let peers = LocalCluster::new(shards, writers)?;
    let codec = config.wire_format.codec();
    let worker = KMeansWorker::new(
        config.launch_config(),
        config.max_iterations,
        codec.as_ref(),
        initial,
    )
    .with_tolerance(config.convergence_tolerance);

    let results: Vec<Result<WorkerSummary>> = thread::scope(|s| {
        let handles: Vec<_> = peers
            .iter()
            .map(|peer| {
                let worker = &worker;
                s.spawn(move || worker.run(peer))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| Err(KMeansError::transport("worker thread panicked")))
            })
            .collect()
    });

    // the first non-transport error is the root cause; transport errors are
    // usually siblings reacting to the abort
    let mut workers = Vec::with_capacity(results.len());
    let mut first_transport = None;
    for res in results {
        match res {
            Ok(summary) => workers.push(summary),
            Err(e @ KMeansError::Transport(_)) => {
                first_transport.get_or_insert(e);
            }
            Err(e) => return Err(e),
        }
    }
    if let Some(e) = first_transport {
        return Err(e);
    }

    let centers = agreed_centers(&workers)?;
    let supersteps = workers.iter().map(|w| w.supersteps).max().unwrap_or(0);
    Ok(JobSummary {
        centers,
        supersteps,
        workers,
    })
}

/// Runs a file-based job: reads `config.input`, splits it across
/// `config.num_workers` workers and writes `part-<worker>.txt` plus the
/// master's `centers.txt` into `config.output_dir`.
pub fn run_job(config: &KMeansConfig) -> Result<JobSummary> {
    config.validate()?;
    let start = Instant::now();

    let records = read_records(&config.input)?;
    info!(
        records = records.len(),
        input = %config.input.display(),
        "input loaded"
    );
    let initial = initial_centers(config, &records)?;

    let shards: Vec<Box<dyn RecordSource>> = shard_records(records, config.num_workers)
        .into_iter()
        .map(|shard| Box::new(MemorySource::new(shard)) as Box<dyn RecordSource>)
        .collect();
    let writers = (0..config.num_workers)
        .map(|w| {
            let path = config.output_dir.join(format!("part-{}.txt", w));
            Ok(Box::new(TextFileWriter::create(path)?) as Box<dyn AssignmentWriter>)
        })
        .collect::<Result<Vec<_>>>()?;

    let summary = run_shards(config, initial, shards, writers)?;

    let centers_path = config.output_dir.join("centers.txt");
    write_centers(&centers_path, &summary.centers)?;
    if let Some(master) = summary.master() {
        info!(
            master = master.worker,
            supersteps = summary.supersteps,
            kernel_ms = master.kernel_time.as_millis() as u64,
            total_ms = start.elapsed().as_millis() as u64,
            centers = %centers_path.display(),
            "job finished"
        );
    }
    Ok(summary)
}
