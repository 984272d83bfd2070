use hybrid_kmeans::codec::format_vector;
use hybrid_kmeans::io::{AssignmentWriter, MemorySource, MemoryWriter, RecordSource};
use hybrid_kmeans::vector::{squared_distance, CenterSet};
use hybrid_kmeans::{run_shards, JobSummary, KMeansConfig, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Turn literal vectors into text records
#[allow(dead_code)]
pub fn records(vectors: &[&[f64]]) -> Vec<String> {
    vectors.iter().map(|v| format_vector(v)).collect()
}

#[allow(dead_code)]
pub fn centers(rows: &[&[f64]]) -> CenterSet {
    CenterSet::from_rows(rows.iter().map(|r| r.to_vec()).collect()).unwrap()
}

/// Run a job over in-memory shards; returns the summary and each worker's writer
#[allow(dead_code)]
pub fn run_memory_job(
    config: &KMeansConfig,
    initial: CenterSet,
    shards: Vec<Vec<String>>,
) -> Result<(JobSummary, Vec<MemoryWriter>)> {
    let writers: Vec<MemoryWriter> = shards.iter().map(|_| MemoryWriter::new()).collect();
    let sources: Vec<Box<dyn RecordSource>> = shards
        .into_iter()
        .map(|s| Box::new(MemorySource::new(s)) as Box<dyn RecordSource>)
        .collect();
    let boxed: Vec<Box<dyn AssignmentWriter>> = writers
        .iter()
        .map(|w| Box::new(w.clone()) as Box<dyn AssignmentWriter>)
        .collect();
    let summary = run_shards(config, initial, sources, boxed)?;
    Ok((summary, writers))
}

/// Component-wise mean
#[allow(dead_code)]
pub fn mean_of(vectors: &[Vec<f64>]) -> Vec<f64> {
    let dim = vectors[0].len();
    let mut sum = vec![0.0; dim];
    for v in vectors {
        for d in 0..dim {
            sum[d] += v[d];
        }
    }
    sum.iter().map(|s| s / vectors.len() as f64).collect()
}

/// Well-separated clusters on a grid of multiples of `separation`. Noise is
/// drawn from quarter steps so sums stay exactly representable.
/// Returns (vectors, true_labels)
#[allow(dead_code)]
pub fn create_grid_clusters(
    num_clusters: usize,
    points_per_cluster: usize,
    dim: usize,
    separation: f64,
    seed: u64,
) -> (Vec<Vec<f64>>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = Vec::with_capacity(num_clusters * points_per_cluster);
    let mut labels = Vec::with_capacity(num_clusters * points_per_cluster);

    for _ in 0..points_per_cluster {
        for cluster_id in 0..num_clusters {
            let v: Vec<f64> = (0..dim)
                .map(|d| {
                    let noise = rng.gen_range(-4..=4) as f64 * 0.25;
                    cluster_id as f64 * separation + d as f64 + noise
                })
                .collect();
            data.push(v);
            labels.push(cluster_id);
        }
    }
    (data, labels)
}

/// Verify that each vector is assigned to its nearest center
#[allow(dead_code)]
pub fn verify_optimal_assignment(assignments: &[(usize, Vec<f64>)], centers: &CenterSet) -> bool {
    assignments.iter().all(|(label, v)| {
        let assigned = squared_distance(v, centers.row(*label));
        centers
            .rows()
            .all(|c| squared_distance(v, c) >= assigned)
    })
}

/// 1-D values on 0.1 steps; almost none of them, or their sums, are exact in binary
#[allow(dead_code)]
pub fn decimal_steps(count: usize) -> Vec<f64> {
    (0..count).map(|i| 0.1 * i as f64 + 0.01).collect()
}

/// The K=1 mean a round produces for 1-D shards: each block folds its
/// batches (`b, b + grid, ...`) in input order starting from zero, and the
/// block sums are combined in ascending `(count, sum)` order.
#[allow(dead_code)]
pub fn blocked_reference_mean(shards: &[Vec<f64>], block_size: usize, grid_size: usize) -> f64 {
    let mut partials: Vec<(u64, f64)> = Vec::new();
    for shard in shards {
        for block in 0..grid_size {
            let mut sum = 0.0;
            let mut count = 0u64;
            for batch in shard.chunks(block_size).skip(block).step_by(grid_size) {
                for x in batch {
                    sum += x;
                    count += 1;
                }
            }
            if count > 0 {
                partials.push((count, sum));
            }
        }
    }
    partials.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.to_bits().cmp(&b.1.to_bits())));

    let total: u64 = partials.iter().map(|p| p.0).sum();
    let mut iter = partials.iter();
    let first = iter.next().map(|p| p.1).unwrap_or(0.0);
    iter.fold(first, |acc, p| acc + p.1) / total as f64
}
