use crate::codec::format_vector;
use crate::error::{KMeansError, Result};
use crate::vector::CenterSet;
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// A worker's shard of input records. Each record is yielded exactly once;
/// `Ok(None)` means the shard is exhausted.
pub trait RecordSource: Send + Sync {
    fn read_next_record(&self) -> Result<Option<String>>;
}

/// Sink for the post-convergence `(clusterId, vector)` assignments.
pub trait AssignmentWriter: Send + Sync {
    fn write(&self, cluster: usize, vector: &[f64]) -> Result<()>;

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

fn poisoned(what: &str) -> KMeansError {
    KMeansError::transport(format!("{} lock poisoned", what))
}

/// In-memory shard, mostly for tests and pre-sharded input.
pub struct MemorySource {
    records: Mutex<VecDeque<String>>,
}

impl MemorySource {
    pub fn new(records: Vec<String>) -> Self {
        MemorySource {
            records: Mutex::new(records.into()),
        }
    }
}

impl RecordSource for MemorySource {
    fn read_next_record(&self) -> Result<Option<String>> {
        let mut records = self.records.lock().map_err(|_| poisoned("record source"))?;
        Ok(records.pop_front())
    }
}

/// Reads every non-blank line of a record file.
pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let file = File::open(path.as_ref())?;
    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if !line.trim().is_empty() {
            records.push(line);
        }
    }
    Ok(records)
}

pub fn write_records(path: impl AsRef<Path>, records: &[String]) -> Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut out = BufWriter::new(File::create(path.as_ref())?);
    for r in records {
        writeln!(out, "{}", r)?;
    }
    out.flush()?;
    Ok(())
}

/// Splits records into `n` contiguous shards of near-equal size; the first
/// `len % n` shards get one extra record.
pub fn shard_records(records: Vec<String>, n: usize) -> Vec<Vec<String>> {
    if n == 0 {
        return Vec::new();
    }
    let base = records.len() / n;
    let extra = records.len() % n;
    let mut iter = records.into_iter();
    (0..n)
        .map(|i| {
            let take = base + usize::from(i < extra);
            iter.by_ref().take(take).collect()
        })
        .collect()
}

/// Writes `"<clusterId>\t<v1>,...,<vD>"` lines.
pub struct TextFileWriter {
    out: Mutex<BufWriter<File>>,
}

impl TextFileWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(TextFileWriter {
            out: Mutex::new(BufWriter::new(File::create(path.as_ref())?)),
        })
    }
}

impl AssignmentWriter for TextFileWriter {
    fn write(&self, cluster: usize, vector: &[f64]) -> Result<()> {
        let mut out = self.out.lock().map_err(|_| poisoned("output file"))?;
        writeln!(out, "{}\t{}", cluster, format_vector(vector))?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let mut out = self.out.lock().map_err(|_| poisoned("output file"))?;
        out.flush()?;
        Ok(())
    }
}

/// Collects assignments in memory. Clones share the same buffer.
#[derive(Clone, Debug, Default)]
pub struct MemoryWriter {
    records: Arc<Mutex<Vec<(usize, Vec<f64>)>>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(usize, Vec<f64>)> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_else(|p| p.into_inner().clone())
    }
}

impl AssignmentWriter for MemoryWriter {
    fn write(&self, cluster: usize, vector: &[f64]) -> Result<()> {
        let mut records = self.records.lock().map_err(|_| poisoned("memory writer"))?;
        records.push((cluster, vector.to_vec()));
        Ok(())
    }
}

/// Writes `"<centerIndex>\t<v1>,...,<vD>"` lines.
pub fn write_centers(path: impl AsRef<Path>, centers: &CenterSet) -> Result<()> {
    let lines: Vec<String> = centers
        .rows()
        .enumerate()
        .map(|(i, row)| format!("{}\t{}", i, format_vector(row)))
        .collect();
    write_records(path, &lines)
}
