use oddity_core::campaign::Campaign;
use oddity_core::config::OddityConfig;
use oddity_core::corpus::SeedCorpus;

use clap::Parser;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use std::path::PathBuf;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Black-box anomaly-guided fuzzer", long_about = None)]
struct Cli {
    /// Directory with base cases (seed files; hidden files are skipped)
    #[clap(short, long, value_parser)]
    base_dir: PathBuf,
    /// Directory to put findings in (created if absent)
    #[clap(short, long, value_parser)]
    out_dir: PathBuf,
    /// File with regexs which automatically mark a run as unusual
    #[clap(long)]
    regexs: Option<PathBuf>,
    /// TOML configuration file
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Override the configured iteration count
    #[clap(short, long)]
    iterations: Option<u64>,
    /// RNG seed for a reproducible campaign; entropy-based when omitted
    #[clap(long)]
    seed: Option<u64>,
    /// The program to fuzz. Use @@ in the command if the program reads a file
    #[clap(required = true, num_args = 1.., value_parser)]
    command: Vec<String>,
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    let mut config = match &cli.config_file {
        Some(config_path) => {
            println!("Loading configuration from specified path: {config_path:?}");
            OddityConfig::load_from_file(config_path)?
        }
        None => {
            let default_config_path = PathBuf::from("oddity.toml");
            if default_config_path.exists() {
                println!(
                    "No config file specified via CLI, loading default: {default_config_path:?}",
                );
                OddityConfig::load_from_file(&default_config_path)?
            } else {
                OddityConfig::default()
            }
        }
    };
    if let Some(iterations) = cli.iterations {
        config.campaign.max_iterations = iterations;
    }

    let corpus = SeedCorpus::load_from_dir(&cli.base_dir)?;
    let patterns = match &cli.regexs {
        Some(path) => Campaign::load_patterns(path)?,
        None => Vec::new(),
    };

    println!(
        "Fuzzing {:?} with command line arguments: {:?}",
        cli.command[0],
        &cli.command[1..],
    );
    let seed_names: Vec<&str> = corpus.seeds().iter().map(|s| s.name.as_str()).collect();
    println!("Starting with base files: {seed_names:?}");
    println!();

    let rng_seed = cli.seed.unwrap_or_else(entropy_seed);
    println!("RNG seed: {rng_seed}");
    let mut rng = ChaCha8Rng::seed_from_u64(rng_seed);

    let campaign = Campaign::new(cli.command, corpus, cli.out_dir, patterns, config)?;

    let start_time = Instant::now();
    let outcome = campaign.run(&mut rng)?;
    let elapsed = start_time.elapsed();

    println!();
    println!("Campaign finished in {elapsed:.2?}.");
    println!(
        "Total Executions: {}, Findings Saved: {}",
        outcome.executions, outcome.findings,
    );

    Ok(())
}

/// Seed for non-reproducible campaigns; wall-clock nanoseconds are plenty
/// for picking mutation offsets.
fn entropy_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
