use crate::classifier::{default_ignore, AnomalyClassifier, Baseline, Check};
use crate::config::OddityConfig;
use crate::corpus::SeedCorpus;
use crate::executor::CommandExecutor;
use crate::mutator::{self, MutationError};
use rand::Rng;
use regex::bytes::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Fatal campaign errors. Setup problems (bad pattern file, undetermined
/// base-case run) abort before any mutation; persistence failures abort
/// mid-loop because losing findings defeats the point of fuzzing.
#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("pattern file {0:?} does not exist")]
    MissingPatternFile(PathBuf),
    #[error("failed to read pattern file {path:?}: {source}")]
    UnreadablePatternFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid pattern {pattern:?} in {path:?}: {source}")]
    InvalidPattern {
        path: PathBuf,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("failed to create output directory {path:?}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("seed corpus is empty")]
    EmptyCorpus,
    #[error("base case '{0}' did not produce a defined exit status; check the command and timeout")]
    BaseCaseFailed(String),
    #[error("failed to save finding {path:?}: {source}")]
    PersistFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Mutation(#[from] MutationError),
}

/// Counters reported when a campaign finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CampaignOutcome {
    /// Mutated cases executed (base-case runs excluded).
    pub executions: u64,
    /// Flagged cases persisted to the output directory.
    pub findings: u64,
}

/// One fuzzing session: baseline construction, seed sanity check, then the
/// sequential mutate-run-classify loop.
pub struct Campaign {
    executor: CommandExecutor,
    corpus: SeedCorpus,
    out_dir: PathBuf,
    patterns: Vec<Regex>,
    config: OddityConfig,
}

impl Campaign {
    /// Wires a campaign together and creates the output directory. The
    /// command is the target's argument vector; an `@@` token anywhere in it
    /// selects file-input delivery.
    pub fn new(
        command: Vec<String>,
        corpus: SeedCorpus,
        out_dir: PathBuf,
        patterns: Vec<Regex>,
        config: OddityConfig,
    ) -> Result<Self, CampaignError> {
        if corpus.is_empty() {
            return Err(CampaignError::EmptyCorpus);
        }
        fs::create_dir_all(&out_dir).map_err(|source| CampaignError::OutputDir {
            path: out_dir.clone(),
            source,
        })?;
        let executor =
            CommandExecutor::new(command, Duration::from_millis(config.executor.timeout_ms));
        Ok(Self {
            executor,
            corpus,
            out_dir,
            patterns,
            config,
        })
    }

    /// Reads a newline-separated pattern file into compiled override
    /// patterns, skipping blank lines. Any unloadable or invalid pattern is
    /// fatal: a silently dropped known-bad signature would mask findings.
    pub fn load_patterns(path: &Path) -> Result<Vec<Regex>, CampaignError> {
        if !path.is_file() {
            return Err(CampaignError::MissingPatternFile(path.to_path_buf()));
        }
        let content =
            fs::read_to_string(path).map_err(|source| CampaignError::UnreadablePatternFile {
                path: path.to_path_buf(),
                source,
            })?;

        let mut patterns = Vec::new();
        for line in content.lines() {
            if line.is_empty() {
                continue;
            }
            let pattern = Regex::new(line).map_err(|source| CampaignError::InvalidPattern {
                path: path.to_path_buf(),
                pattern: line.to_string(),
                source,
            })?;
            patterns.push(pattern);
        }
        Ok(patterns)
    }

    /// Runs base cases, builds the baseline, reports seeds that already look
    /// unusual against it, then fuzzes for the configured iteration count.
    pub fn run<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<CampaignOutcome, CampaignError> {
        let (baseline, seed_verdict_inputs) = self.build_baseline()?;

        println!("Got baseline statistics:");
        println!("  return:  {}", baseline.status);
        println!("  runtime: {:.1}s", baseline.runtime);
        println!("  stdout:  {} bytes", baseline.stdout.len());
        println!("  stderr:  {} bytes", baseline.stderr.len());

        let classifier = AnomalyClassifier::new(baseline, self.patterns.clone()).with_tolerances(
            self.config.classifier.runtime_tolerance_secs,
            self.config.classifier.stderr_similarity_threshold,
        );

        println!();
        println!("Checking for irregularities within base cases...");
        let seed_ignore = default_ignore();
        for (name, run) in &seed_verdict_inputs {
            let verdict = classifier.classify(run, &seed_ignore);
            if let Some(reason) = verdict.reason() {
                println!("Base case \"{name}\" is unusual due to its {reason}");
            }
        }

        println!();
        println!("Beginning fuzzing");
        println!();

        let loop_ignore: HashSet<Check> =
            self.config.classifier.loop_ignore.iter().copied().collect();
        let mut findings = 0u64;
        let mut executions = 0u64;

        for iteration in 0..self.config.campaign.max_iterations {
            // The corpus is non-empty by construction.
            let Some(seed) = self.corpus.choose(rng) else {
                return Err(CampaignError::EmptyCorpus);
            };
            let mutated = mutator::random_replace(
                &seed.bytes,
                self.config.campaign.mutations_per_case,
                rng,
            )?;

            let run = self.executor.execute(&mutated);
            executions += 1;

            let verdict = classifier.classify(&run, &loop_ignore);
            if let Some(reason) = verdict.reason() {
                println!("Mutated case is unusual due to its {reason}");
                let save_name = format!("run{iteration}");
                println!("Saving to {save_name} in the output directory");
                let save_path = self.out_dir.join(save_name);
                fs::write(&save_path, &mutated).map_err(|source| {
                    CampaignError::PersistFailed {
                        path: save_path.clone(),
                        source,
                    }
                })?;
                findings += 1;
            }
        }

        Ok(CampaignOutcome {
            executions,
            findings,
        })
    }

    /// Runs every seed once and aggregates the baseline. A seed run without
    /// a defined exit status means the target or timeout is misconfigured,
    /// which no amount of fuzzing will fix; abort and name the seed.
    fn build_baseline(&self) -> Result<(Baseline, Vec<(String, crate::executor::ExecutionResult)>), CampaignError> {
        let mut seed_runs = Vec::new();
        for seed in self.corpus.seeds() {
            println!("Testing {}", seed.name);
            let run = self.executor.execute(&seed.bytes);
            if run.timed_out() {
                return Err(CampaignError::BaseCaseFailed(seed.name.clone()));
            }
            seed_runs.push((seed.name.clone(), run));
        }

        let runs: Vec<_> = seed_runs.iter().map(|(_, run)| run.clone()).collect();
        let baseline = Baseline::from_seed_runs(&runs).ok_or(CampaignError::EmptyCorpus)?;
        Ok((baseline, seed_runs))
    }
}
