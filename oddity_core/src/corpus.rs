use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while assembling the seed corpus. All of these are setup
/// failures: the campaign refuses to start without a usable corpus.
#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("seed directory {0:?} does not exist or is not a directory")]
    MissingDirectory(PathBuf),
    #[error("seed directory {0:?} contains no usable seed files")]
    NoSeeds(PathBuf),
    #[error("failed to scan seed directory {path:?}: {source}")]
    ScanFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read seed file {path:?}: {source}")]
    UnreadableSeed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One seed case: the file's name for reporting, its full contents as the
/// case bytes.
#[derive(Debug, Clone)]
pub struct Seed {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// The initial corpus, loaded once per campaign from a directory of seed
/// files. Read-only after loading; mutation templates are drawn from it at
/// random.
#[derive(Debug, Default)]
pub struct SeedCorpus {
    seeds: Vec<Seed>,
}

impl SeedCorpus {
    /// Loads every regular file in `dir` as one seed, in name order.
    ///
    /// Hidden files (names starting with a dot) and subdirectories are
    /// skipped, as are empty files, which cannot template byte mutations.
    /// A missing directory or one yielding no seeds is an error naming the
    /// offending path.
    pub fn load_from_dir(dir: &Path) -> Result<Self, CorpusError> {
        if !dir.is_dir() {
            return Err(CorpusError::MissingDirectory(dir.to_path_buf()));
        }

        let entries = fs::read_dir(dir).map_err(|source| CorpusError::ScanFailed {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut seeds = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| CorpusError::ScanFailed {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !path.is_file() {
                continue;
            }
            let bytes = fs::read(&path).map_err(|source| CorpusError::UnreadableSeed {
                path: path.clone(),
                source,
            })?;
            if bytes.is_empty() {
                eprintln!("Skipping empty seed file {path:?}");
                continue;
            }
            seeds.push(Seed { name, bytes });
        }

        if seeds.is_empty() {
            return Err(CorpusError::NoSeeds(dir.to_path_buf()));
        }
        // Directory iteration order is platform-dependent; pin it so the
        // baseline's representative streams come from a stable first seed.
        seeds.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Self { seeds })
    }

    pub fn seeds(&self) -> &[Seed] {
        &self.seeds
    }

    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }

    /// Uniformly random seed, `None` only for an empty corpus (which
    /// `load_from_dir` never produces).
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&Seed> {
        if self.seeds.is_empty() {
            return None;
        }
        Some(&self.seeds[rng.random_range(0..self.seeds.len())])
    }
}
