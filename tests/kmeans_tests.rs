mod test_utils;

use hybrid_kmeans::codec::WireFormat;
use hybrid_kmeans::io::shard_records;
use hybrid_kmeans::{KMeansConfig, KMeansError};
use test_utils::*;

// ============================================================================
// End-to-end rounds
// ============================================================================

#[test]
fn test_two_workers_converge_in_two_supersteps() {
    // Worker A holds (0,0),(0,1); worker B holds (10,0),(10,1)
    let config = KMeansConfig::new(2, 2).with_block_size(4).with_num_workers(2);
    let initial = centers(&[&[0.0, 0.0], &[10.0, 0.0]]);
    let shards = vec![
        records(&[&[0.0, 0.0], &[0.0, 1.0]]),
        records(&[&[10.0, 0.0], &[10.0, 1.0]]),
    ];

    let (summary, writers) = run_memory_job(&config, initial, shards).expect("job failed");

    assert_eq!(summary.supersteps, 2);
    assert_eq!(summary.centers.row(0), &[0.0, 0.5]);
    assert_eq!(summary.centers.row(1), &[10.0, 0.5]);

    for worker in &summary.workers {
        let changed: Vec<usize> = worker.rounds.iter().map(|r| r.changed).collect();
        assert_eq!(changed, vec![2, 0]);
        assert_eq!(worker.cached_vectors, 2);
    }

    // Final assignments are unchanged from round 1
    let a = writers[0].records();
    let b = writers[1].records();
    assert!(a.iter().all(|(label, _)| *label == 0));
    assert!(b.iter().all(|(label, _)| *label == 1));
}

#[test]
fn test_single_center_reaches_global_mean() {
    // K=1: round 1 moves the center to the global mean, round 2 confirms it
    let (data, _) = create_grid_clusters(3, 20, 3, 8.0, 11);
    let expected = mean_of(&data);

    let config = KMeansConfig::new(1, 3).with_block_size(8).with_num_workers(3);
    let shards = shard_records(records(&data.iter().map(|v| v.as_slice()).collect::<Vec<_>>()), 3);
    let (summary, _) =
        run_memory_job(&config, centers(&[&[100.0, 100.0, 100.0]]), shards).expect("job failed");

    assert_eq!(summary.centers.row(0), expected.as_slice());
    assert!(summary.supersteps <= 2);
    let master = summary.master().expect("no master");
    assert_eq!(master.rounds[0].changed, 1);
    assert_eq!(master.rounds.last().map(|r| r.changed), Some(0));
}

#[test]
fn test_single_center_settles_on_inexact_data() {
    let values = decimal_steps(2000);
    let layouts = [(64, 1, 1), (64, 4, 2), (7, 3, 3), (32, 2, 4)];

    for (block_size, grid_size, workers) in layouts {
        let config = KMeansConfig::new(1, 1)
            .with_block_size(block_size)
            .with_grid_size(grid_size)
            .with_num_workers(workers);
        let all: Vec<String> = values.iter().map(|x| x.to_string()).collect();
        let shards = shard_records(all, workers);
        let numeric: Vec<Vec<f64>> = shards
            .iter()
            .map(|s| s.iter().map(|r| r.parse::<f64>().unwrap()).collect())
            .collect();
        let expected = blocked_reference_mean(&numeric, block_size, grid_size);

        for _ in 0..5 {
            let (summary, _) = run_memory_job(&config, centers(&[&[0.0]]), shards.clone())
                .expect("job failed");
            assert!(
                summary.supersteps <= 2,
                "{} supersteps with B={} G={} W={}",
                summary.supersteps,
                block_size,
                grid_size,
                workers
            );
            let master = summary.master().expect("no master");
            assert_eq!(master.rounds[0].changed, 1);
            assert_eq!(master.rounds.last().map(|r| r.changed), Some(0));
            assert_eq!(summary.centers.row(0)[0].to_bits(), expected.to_bits());
        }
    }
}

#[test]
fn test_multi_round_convergence() {
    // 1-D data that needs several rounds before assignments settle
    let config = KMeansConfig::new(2, 1).with_block_size(2).with_num_workers(2);
    let shards = vec![records(&[&[0.0], &[2.0]]), records(&[&[3.0], &[10.0]])];

    let (summary, writers) =
        run_memory_job(&config, centers(&[&[0.0], &[2.0]]), shards).expect("job failed");

    assert_eq!(summary.supersteps, 4);
    assert_eq!(summary.centers.row(0), &[5.0 / 3.0]);
    assert_eq!(summary.centers.row(1), &[10.0]);

    let changed: Vec<usize> = summary.workers[0].rounds.iter().map(|r| r.changed).collect();
    assert_eq!(changed, vec![1, 2, 2, 0]);

    let labels: Vec<usize> = writers
        .iter()
        .flat_map(|w| w.records())
        .map(|(label, _)| label)
        .collect();
    assert_eq!(labels, vec![0, 0, 0, 1]);
}

#[test]
fn test_iteration_limit_stops_the_loop() {
    let config = KMeansConfig::new(2, 1)
        .with_block_size(2)
        .with_num_workers(2)
        .with_max_iterations(1);
    let shards = vec![records(&[&[0.0], &[2.0]]), records(&[&[3.0], &[10.0]])];

    let (summary, _) =
        run_memory_job(&config, centers(&[&[0.0], &[2.0]]), shards).expect("job failed");

    // superstep 2 exceeds the limit of 1 even though centers still moved
    assert_eq!(summary.supersteps, 2);
    assert_eq!(summary.centers.row(0), &[1.0]);
    assert_eq!(summary.centers.row(1), &[6.5]);
    assert_eq!(summary.workers[0].rounds.last().map(|r| r.changed), Some(2));
}

// ============================================================================
// Edge cases
// ============================================================================

#[test]
fn test_unassigned_center_is_left_unchanged() {
    let config = KMeansConfig::new(3, 2).with_block_size(4).with_num_workers(2);
    let initial = centers(&[&[0.0, 0.0], &[10.0, 0.0], &[1234.5, -987.25]]);
    let shards = vec![
        records(&[&[0.0, 0.0], &[0.0, 1.0]]),
        records(&[&[10.0, 0.0], &[10.0, 1.0]]),
    ];

    let (summary, _) = run_memory_job(&config, initial, shards).expect("job failed");

    assert_eq!(summary.centers.row(2), &[1234.5, -987.25]);
    assert!(summary.centers.row(2).iter().all(|x| x.is_finite()));
}

#[test]
fn test_worker_with_empty_shard() {
    let config = KMeansConfig::new(1, 2).with_block_size(4).with_num_workers(3);
    let shards = vec![
        records(&[&[1.0, 1.0], &[3.0, 3.0]]),
        Vec::new(),
        records(&[&[2.0, 2.0]]),
    ];

    let (summary, writers) =
        run_memory_job(&config, centers(&[&[0.0, 0.0]]), shards).expect("job failed");

    assert_eq!(summary.centers.row(0), &[2.0, 2.0]);
    assert!(writers[1].records().is_empty());
    assert_eq!(summary.workers[1].cached_vectors, 0);
}

#[test]
fn test_result_independent_of_worker_and_block_count() {
    let (data, _) = create_grid_clusters(4, 30, 5, 12.0, 3);
    let all = records(&data.iter().map(|v| v.as_slice()).collect::<Vec<_>>());
    let initial = || {
        centers(&[
            data[0].as_slice(),
            data[1].as_slice(),
            data[2].as_slice(),
            data[3].as_slice(),
        ])
    };

    let single = KMeansConfig::new(4, 5).with_block_size(16).with_num_workers(1);
    let (one, _) = run_memory_job(&single, initial(), shard_records(all.clone(), 1)).unwrap();

    let many = KMeansConfig::new(4, 5)
        .with_block_size(3)
        .with_grid_size(3)
        .with_num_workers(4);
    let (four, _) = run_memory_job(&many, initial(), shard_records(all, 4)).unwrap();

    assert_eq!(one.centers, four.centers);
    assert_eq!(one.supersteps, four.supersteps);
}

#[test]
fn test_binary_wire_format_matches_text() {
    let (data, _) = create_grid_clusters(3, 25, 4, 10.0, 5);
    let all = records(&data.iter().map(|v| v.as_slice()).collect::<Vec<_>>());
    let initial = centers(&[data[0].as_slice(), data[1].as_slice(), data[2].as_slice()]);

    let text = KMeansConfig::new(3, 4).with_block_size(8).with_num_workers(3);
    let binary = text.clone().with_wire_format(WireFormat::Binary);

    let (a, _) = run_memory_job(&text, initial.clone(), shard_records(all.clone(), 3)).unwrap();
    let (b, _) = run_memory_job(&binary, initial, shard_records(all, 3)).unwrap();

    assert_eq!(a.centers, b.centers);
    assert_eq!(a.supersteps, b.supersteps);
}

#[test]
fn test_recovers_well_separated_clusters() {
    let (data, true_labels) = create_grid_clusters(3, 40, 4, 50.0, 21);
    let all = records(&data.iter().map(|v| v.as_slice()).collect::<Vec<_>>());
    let initial = centers(&[data[0].as_slice(), data[1].as_slice(), data[2].as_slice()]);

    let config = KMeansConfig::new(3, 4)
        .with_block_size(8)
        .with_grid_size(2)
        .with_num_workers(3);
    let (summary, writers) = run_memory_job(&config, initial, shard_records(all, 3)).unwrap();

    let assignments: Vec<(usize, Vec<f64>)> = writers.iter().flat_map(|w| w.records()).collect();
    assert_eq!(assignments.len(), data.len());
    assert!(verify_optimal_assignment(&assignments, &summary.centers));

    // output keeps shard order, so labels line up with the input order
    for ((label, v), (expected, truth)) in assignments.iter().zip(true_labels.iter().zip(&data)) {
        assert_eq!(v, truth);
        assert_eq!(label, expected);
    }
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_malformed_record_aborts_the_job() {
    let config = KMeansConfig::new(1, 2).with_block_size(2).with_num_workers(2);
    let shards = vec![
        records(&[&[0.0, 0.0], &[1.0, 1.0]]),
        vec!["2,2".to_string(), "3,not-a-number".to_string()],
    ];

    let err = run_memory_job(&config, centers(&[&[0.0, 0.0]]), shards).unwrap_err();
    assert!(matches!(err, KMeansError::Parse(_)), "got {:?}", err);
}

#[test]
fn test_overflowing_sums_fail_with_either_wire_format() {
    for format in [WireFormat::Text, WireFormat::Binary] {
        // one worker sums both records, so its partial sum overflows
        let config = KMeansConfig::new(1, 1)
            .with_block_size(2)
            .with_num_workers(1)
            .with_wire_format(format);
        let shards = vec![records(&[&[1e308], &[1e308]])];
        let err = run_memory_job(&config, centers(&[&[0.0]]), shards).unwrap_err();
        assert!(matches!(err, KMeansError::Overflow(_)), "{:?}: {:?}", format, err);

        // two workers each send a finite sum; the merged total overflows
        let config = config.with_num_workers(2);
        let shards = vec![records(&[&[1e308]]), records(&[&[1e308]])];
        let err = run_memory_job(&config, centers(&[&[0.0]]), shards).unwrap_err();
        assert!(matches!(err, KMeansError::Overflow(_)), "{:?}: {:?}", format, err);
    }
}

#[test]
fn test_oversized_shared_region_rejected_before_launch() {
    let config = KMeansConfig::new(1, 2)
        .with_block_size(64)
        .with_shared_memory_budget(128);
    let shards = vec![records(&[&[0.0, 0.0]]), Vec::new()];

    let err = run_memory_job(&config, centers(&[&[0.0, 0.0]]), shards).unwrap_err();
    assert!(matches!(err, KMeansError::Config(_)));
}

#[test]
fn test_initial_center_shape_must_match_config() {
    let config = KMeansConfig::new(2, 2).with_num_workers(1);
    let err = run_memory_job(&config, centers(&[&[0.0, 0.0]]), vec![Vec::new()]).unwrap_err();
    assert!(matches!(err, KMeansError::Config(_)));
}
