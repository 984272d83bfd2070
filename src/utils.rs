use crate::codec::format_vector;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

/// Generates `count` text records scattered around `clusters` centers placed
/// `separation` apart along every axis. Deterministic for a given seed:
/// each batch of records draws from its own seeded generator.
pub fn generate_clustered_records(
    count: usize,
    clusters: usize,
    dimension: usize,
    separation: f64,
    seed: u64,
) -> Vec<String> {
    let batch_size = 1000;
    let total_batches = (count + batch_size - 1) / batch_size;
    let clusters = clusters.max(1);

    (0..total_batches)
        .into_par_iter()
        .flat_map_iter(|batch_num| {
            let start_idx = batch_num * batch_size;
            let end_idx = ((batch_num + 1) * batch_size).min(count);
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(batch_num as u64));

            (start_idx..end_idx)
                .map(|i| {
                    let cluster = i % clusters;
                    let v: Vec<f64> = (0..dimension)
                        .map(|_| cluster as f64 * separation + rng.gen_range(-0.5..0.5))
                        .collect();
                    format_vector(&v)
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::parse_vector_record;

    #[test]
    fn generated_records_parse() {
        let records = generate_clustered_records(2500, 3, 4, 10.0, 7);
        assert_eq!(records.len(), 2500);
        for r in &records {
            assert_eq!(parse_vector_record(r, 4).unwrap().len(), 4);
        }
        assert_eq!(records, generate_clustered_records(2500, 3, 4, 10.0, 7));
    }
}
