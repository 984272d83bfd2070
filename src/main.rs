use hybrid_kmeans::io::write_records;
use hybrid_kmeans::utils::generate_clustered_records;
use hybrid_kmeans::{run_job, KMeansConfig};
use std::env;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <config.yaml>", args[0]);
        std::process::exit(1);
    }

    let config = KMeansConfig::from_file(&args[1])?;
    config.validate()?;

    // Generate input vectors if the configured file doesn't exist
    if !config.input.exists() {
        let num_vectors = 10_000;
        println!(
            "Generating {} test vectors into {}...",
            num_vectors,
            config.input.display()
        );
        let records =
            generate_clustered_records(num_vectors, config.k, config.dimension, 10.0, 42);
        write_records(&config.input, &records)?;
    }

    let summary = run_job(&config)?;

    println!(
        "Finished after {} supersteps with {} workers",
        summary.supersteps,
        summary.workers.len()
    );
    for (i, row) in summary.centers.rows().enumerate() {
        println!("  center {}: {:?}", i, row);
    }
    Ok(())
}
