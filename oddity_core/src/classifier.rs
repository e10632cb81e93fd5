use crate::executor::ExecutionResult;
use crate::similarity;
use regex::bytes::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;

/// Default lower bound on the stderr matching ratio; runs scoring below it
/// are flagged. Tuned against single-seed stream variance, so it only holds
/// while the baseline streams come from one designated seed run.
pub const DEFAULT_STDERR_SIMILARITY_THRESHOLD: f64 = 0.6;

/// Default half-width, in seconds, of the accepted runtime window around the
/// baseline mean.
pub const DEFAULT_RUNTIME_TOLERANCE_SECS: f64 = 1.0;

/// The individual checks the classifier runs, in priority order. Putting a
/// check's name in the `ignore` set skips it; `Stdout` and `Stderr` double as
/// stream selectors for the pattern check.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Check {
    Stdout,
    Stderr,
    Timeout,
    #[serde(rename = "return")]
    ReturnCode,
    Runtime,
}

/// The ignore set used when sanity-checking seeds: raw stderr comparison is
/// too noisy to hold seeds against their own baseline.
pub fn default_ignore() -> HashSet<Check> {
    HashSet::from([Check::Stderr])
}

/// Why a run was flagged, ordered strongest signal first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnomalyReason {
    /// An override pattern matched one of the captured streams. A known-bad
    /// signature always wins, even over a timeout.
    RegexMatch,
    /// The run hit the deadline or never produced a defined exit status.
    Timeout,
    /// The run exited with a status other than the baseline's, carried here.
    ReturnCode(i32),
    /// The run's duration fell outside the accepted window.
    Runtime,
    /// The run's stderr diverged too far from the baseline stream.
    Stderr,
}

impl fmt::Display for AnomalyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnomalyReason::RegexMatch => write!(f, "regex match"),
            AnomalyReason::Timeout => write!(f, "timeout"),
            AnomalyReason::ReturnCode(status) => write!(f, "return ({status})"),
            AnomalyReason::Runtime => write!(f, "runtime"),
            AnomalyReason::Stderr => write!(f, "stderr"),
        }
    }
}

/// One classification outcome. At most one reason is reported: the first
/// check to fire, in the fixed priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnomalyVerdict {
    reason: Option<AnomalyReason>,
}

impl AnomalyVerdict {
    pub fn normal() -> Self {
        Self { reason: None }
    }

    pub fn flagged(reason: AnomalyReason) -> Self {
        Self {
            reason: Some(reason),
        }
    }

    pub fn is_anomalous(&self) -> bool {
        self.reason.is_some()
    }

    pub fn reason(&self) -> Option<&AnomalyReason> {
        self.reason.as_ref()
    }
}

/// Expected-behavior profile aggregated from the seed runs.
///
/// The exit status is the rounded mean of the seed statuses and the runtime
/// the mean of the seed runtimes (to a tenth of a second). The stdout and
/// stderr streams are taken verbatim from the first seed run: byte streams
/// from different seeds are not comparable, so merging them would produce a
/// stream no real run resembles.
#[derive(Debug, Clone)]
pub struct Baseline {
    pub status: i32,
    pub runtime: f64,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl Baseline {
    /// Builds the profile from one or more seed runs, the first of which
    /// donates the representative streams. Returns `None` for an empty
    /// slice. Callers are expected to have rejected undetermined runs
    /// already; a baseline built from sentinels is meaningless.
    pub fn from_seed_runs(runs: &[ExecutionResult]) -> Option<Self> {
        let first = runs.first()?;
        let count = runs.len() as f64;
        let mean_status = runs.iter().map(|r| r.status as f64).sum::<f64>() / count;
        let mean_runtime = runs.iter().map(|r| r.runtime).sum::<f64>() / count;
        Some(Self {
            status: mean_status.round() as i32,
            runtime: (mean_runtime * 10.0).round() / 10.0,
            stdout: first.stdout.clone(),
            stderr: first.stderr.clone(),
        })
    }
}

/// Decides whether a run deviates from the baseline.
///
/// Pure comparison logic over one [`Baseline`] and a set of compiled
/// override patterns; safe to call concurrently and deterministic for fixed
/// inputs. Checks run in fixed priority order and short-circuit on the first
/// hit: pattern match, timeout, return-code mismatch, runtime deviation,
/// stderr divergence.
#[derive(Debug)]
pub struct AnomalyClassifier {
    baseline: Baseline,
    patterns: Vec<Regex>,
    runtime_tolerance: f64,
    stderr_threshold: f64,
}

impl AnomalyClassifier {
    pub fn new(baseline: Baseline, patterns: Vec<Regex>) -> Self {
        Self {
            baseline,
            patterns,
            runtime_tolerance: DEFAULT_RUNTIME_TOLERANCE_SECS,
            stderr_threshold: DEFAULT_STDERR_SIMILARITY_THRESHOLD,
        }
    }

    /// Overrides the default runtime window and stderr threshold. The
    /// defaults match the tuned values; widen the window for targets with
    /// legitimately variable runtimes.
    pub fn with_tolerances(mut self, runtime_tolerance: f64, stderr_threshold: f64) -> Self {
        self.runtime_tolerance = runtime_tolerance;
        self.stderr_threshold = stderr_threshold;
        self
    }

    pub fn baseline(&self) -> &Baseline {
        &self.baseline
    }

    /// Classifies one run. Checks named in `ignore` are skipped entirely;
    /// with every applicable check ignored the verdict is normal.
    pub fn classify(&self, run: &ExecutionResult, ignore: &HashSet<Check>) -> AnomalyVerdict {
        let check_stdout = !ignore.contains(&Check::Stdout);
        let check_stderr = !ignore.contains(&Check::Stderr);
        for pattern in &self.patterns {
            if (check_stdout && pattern.is_match(&run.stdout))
                || (check_stderr && pattern.is_match(&run.stderr))
            {
                return AnomalyVerdict::flagged(AnomalyReason::RegexMatch);
            }
        }

        if !ignore.contains(&Check::Timeout) && run.timed_out() {
            return AnomalyVerdict::flagged(AnomalyReason::Timeout);
        }

        if !ignore.contains(&Check::ReturnCode)
            && !run.timed_out()
            && run.status != self.baseline.status
        {
            return AnomalyVerdict::flagged(AnomalyReason::ReturnCode(run.status));
        }

        if !ignore.contains(&Check::Runtime)
            && (run.runtime < self.baseline.runtime - self.runtime_tolerance
                || run.runtime > self.baseline.runtime + self.runtime_tolerance)
        {
            return AnomalyVerdict::flagged(AnomalyReason::Runtime);
        }

        if check_stderr {
            let ratio = similarity::whitespace_junk_ratio(&run.stderr, &self.baseline.stderr);
            if ratio < self.stderr_threshold {
                return AnomalyVerdict::flagged(AnomalyReason::Stderr);
            }
        }

        AnomalyVerdict::normal()
    }
}
