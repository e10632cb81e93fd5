pub mod campaign;
pub mod classifier;
pub mod config;
pub mod corpus;
pub mod executor;
pub mod mutator;
pub mod similarity;

pub use campaign::{Campaign, CampaignError, CampaignOutcome};
pub use classifier::{AnomalyClassifier, AnomalyReason, AnomalyVerdict, Baseline, Check};
pub use config::OddityConfig;
pub use corpus::{CorpusError, Seed, SeedCorpus};
pub use executor::{CommandExecutor, ExecutionResult, FILE_INPUT_TOKEN, RUNTIME_SENTINEL, STATUS_SENTINEL};
pub use mutator::{MutationError, byte_replace, charset_replace, frequency_insert, random_delete, random_insert, random_replace};
