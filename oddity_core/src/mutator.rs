use rand::Rng;
use rand::seq::index::sample;
use std::collections::HashMap;
use std::ops::RangeInclusive;
use thiserror::Error;

/// Default run-length range for insertions and deletions.
pub const DEFAULT_RUN_LENGTH_RANGE: RangeInclusive<usize> = 1..=9;

/// Replacement charset of control and quoting bytes, chosen to probe string
/// terminators, escaping and control-flow handling in the target's parser:
/// NUL, ETX, EOT, CAN, EM, ESC, DEL, CR, LF, single quote, double quote,
/// backslash.
pub const CONTROL_QUOTE_CHARSET: [u8; 12] = [
    0x00, 0x03, 0x04, 0x18, 0x19, 0x1b, 0x7f, b'\r', b'\n', b'\'', b'"', b'\\',
];

/// Every byte value, the default insertion alphabet.
pub const ALL_BYTES: [u8; 256] = {
    let mut alphabet = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        alphabet[i] = i as u8;
        i += 1;
    }
    alphabet
};

/// A rule was invoked with parameters it cannot honor. These are caller
/// bugs, not run-to-run hazards: the default campaign always supplies valid
/// parameters and sufficiently long seeds.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    #[error("replacement range {0}..={1} leaves the byte domain [0, 255]")]
    InvalidRange(u16, u16),
    #[error("cannot mutate an empty case")]
    EmptyCase,
    #[error("run length range is empty")]
    EmptyLengthRange,
    #[error("run length {0} exceeds an alphabet of {1} distinct bytes")]
    RunExceedsAlphabet(usize, usize),
    #[error("case of {len} bytes is too short for deletion runs up to {max_run} bytes")]
    CaseTooShort { len: usize, max_run: usize },
    #[error("case must contain at least 3 whitespace-delimited tokens, found {0}")]
    NotHumanReadable(usize),
}

/// Overwrites one uniformly chosen byte per round with a uniform draw from
/// `values`. Rounds are sequential: each operates on the previous round's
/// result. The input is never modified; a new buffer of equal length is
/// returned.
pub fn byte_replace<R: Rng + ?Sized>(
    case: &[u8],
    rounds: usize,
    values: RangeInclusive<u16>,
    rng: &mut R,
) -> Result<Vec<u8>, MutationError> {
    if values.is_empty() || *values.end() > u8::MAX as u16 {
        return Err(MutationError::InvalidRange(*values.start(), *values.end()));
    }
    if case.is_empty() {
        return Err(MutationError::EmptyCase);
    }
    let mut mutated = case.to_vec();
    for _ in 0..rounds {
        let position = rng.random_range(0..mutated.len());
        mutated[position] = rng.random_range(values.clone()) as u8;
    }
    Ok(mutated)
}

/// [`byte_replace`] over the full byte range. The default campaign rule.
pub fn random_replace<R: Rng + ?Sized>(
    case: &[u8],
    rounds: usize,
    rng: &mut R,
) -> Result<Vec<u8>, MutationError> {
    byte_replace(case, rounds, 0..=u8::MAX as u16, rng)
}

/// [`byte_replace`] drawing replacements from [`CONTROL_QUOTE_CHARSET`].
pub fn charset_replace<R: Rng + ?Sized>(
    case: &[u8],
    rounds: usize,
    rng: &mut R,
) -> Result<Vec<u8>, MutationError> {
    if case.is_empty() {
        return Err(MutationError::EmptyCase);
    }
    let mut mutated = case.to_vec();
    for _ in 0..rounds {
        let position = rng.random_range(0..mutated.len());
        mutated[position] = CONTROL_QUOTE_CHARSET[rng.random_range(0..CONTROL_QUOTE_CHARSET.len())];
    }
    Ok(mutated)
}

/// Per round, inserts a run of bytes at a uniform offset (the end of the
/// case included). The run's length is uniform in `length_range` and its
/// bytes are sampled from `alphabet` without replacement, so a single run
/// never repeats a byte.
pub fn random_insert<R: Rng + ?Sized>(
    case: &[u8],
    rounds: usize,
    length_range: RangeInclusive<usize>,
    alphabet: &[u8],
    rng: &mut R,
) -> Result<Vec<u8>, MutationError> {
    if length_range.is_empty() {
        return Err(MutationError::EmptyLengthRange);
    }
    if *length_range.end() > alphabet.len() {
        return Err(MutationError::RunExceedsAlphabet(
            *length_range.end(),
            alphabet.len(),
        ));
    }
    let mut mutated = case.to_vec();
    for _ in 0..rounds {
        let position = rng.random_range(0..=mutated.len());
        let run_length = rng.random_range(length_range.clone());
        let run: Vec<u8> = sample(rng, alphabet.len(), run_length)
            .iter()
            .map(|i| alphabet[i])
            .collect();
        mutated.splice(position..position, run);
    }
    Ok(mutated)
}

/// Per round, removes a run of uniform length in `length_range` starting at
/// a uniform offset in `0..len - max(length_range)`.
///
/// Each round re-checks the shrinking case against the longest possible run
/// and fails with [`MutationError::CaseTooShort`] once the case can no
/// longer absorb it; callers must supply seeds longer than
/// `max(length_range)`.
pub fn random_delete<R: Rng + ?Sized>(
    case: &[u8],
    rounds: usize,
    length_range: RangeInclusive<usize>,
    rng: &mut R,
) -> Result<Vec<u8>, MutationError> {
    if length_range.is_empty() || *length_range.start() == 0 {
        return Err(MutationError::EmptyLengthRange);
    }
    let max_run = *length_range.end();
    let mut mutated = case.to_vec();
    for _ in 0..rounds {
        if mutated.len() <= max_run {
            return Err(MutationError::CaseTooShort {
                len: mutated.len(),
                max_run,
            });
        }
        let position = rng.random_range(0..mutated.len() - max_run);
        let run_length = rng.random_range(length_range.clone());
        mutated.drain(position..position + run_length);
    }
    Ok(mutated)
}

/// For human-readable cases: per round, re-inserts one of the case's most
/// frequent whitespace-delimited tokens at a uniform byte offset. The token
/// pool is the top tenth of distinct tokens by frequency (rounded up, at
/// least one); ties break toward the lexicographically smaller token so the
/// pool is stable for a given case.
pub fn frequency_insert<R: Rng + ?Sized>(
    case: &[u8],
    rounds: usize,
    rng: &mut R,
) -> Result<Vec<u8>, MutationError> {
    let tokens: Vec<&[u8]> = case
        .split(|byte| byte.is_ascii_whitespace())
        .filter(|token| !token.is_empty())
        .collect();
    if tokens.len() < 3 {
        return Err(MutationError::NotHumanReadable(tokens.len()));
    }

    let mut counts: HashMap<&[u8], usize> = HashMap::new();
    for &token in &tokens {
        *counts.entry(token).or_default() += 1;
    }
    let mut ranked: Vec<(&[u8], usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.truncate(ranked.len().div_ceil(10));

    let mut mutated = case.to_vec();
    for _ in 0..rounds {
        let token = ranked[rng.random_range(0..ranked.len())].0;
        let position = rng.random_range(0..=mutated.len());
        mutated.splice(position..position, token.iter().copied());
    }
    Ok(mutated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;

    fn rng(seed: u8) -> ChaCha8Rng {
        ChaCha8Rng::from_seed([seed; 32])
    }

    #[test]
    fn byte_replace_preserves_length_for_any_round_count() {
        let mut rng = rng(1);
        let case = b"some starting case".to_vec();
        for rounds in 0..20 {
            let mutated = random_replace(&case, rounds, &mut rng).unwrap();
            assert_eq!(mutated.len(), case.len(), "rounds = {rounds}");
        }
    }

    #[test]
    fn byte_replace_leaves_the_input_untouched() {
        let mut rng = rng(2);
        let case = b"immutable".to_vec();
        let snapshot = case.clone();
        let _ = random_replace(&case, 8, &mut rng).unwrap();
        assert_eq!(case, snapshot);
    }

    #[test]
    fn byte_replace_respects_a_narrow_value_range() {
        let mut rng = rng(3);
        let mutated = byte_replace(b"\x00\x00\x00\x00", 32, 65..=65, &mut rng).unwrap();
        for &byte in &mutated {
            assert!(byte == 0 || byte == 65);
        }
        assert!(mutated.iter().any(|&b| b == 65), "32 rounds on 4 bytes must hit");
    }

    #[test]
    fn byte_replace_rejects_out_of_domain_ranges() {
        let mut rng = rng(4);
        assert_eq!(
            byte_replace(b"abc", 1, 0..=256, &mut rng),
            Err(MutationError::InvalidRange(0, 256)),
        );
        assert!(matches!(
            byte_replace(b"abc", 1, 9..=3, &mut rng),
            Err(MutationError::InvalidRange(..)),
        ));
    }

    #[test]
    fn byte_replace_rejects_empty_cases() {
        let mut rng = rng(5);
        assert_eq!(
            random_replace(b"", 1, &mut rng),
            Err(MutationError::EmptyCase)
        );
    }

    #[test]
    fn charset_replace_changes_at_most_n_bytes_within_the_charset() {
        let original = b"hello";
        for seed in 0..32 {
            let mut rng = rng(seed);
            let mutated = charset_replace(original, 1, &mut rng).unwrap();
            assert_eq!(mutated.len(), original.len());
            let mut diffs: Vec<(usize, u8)> = Vec::new();
            for (i, (&new, &old)) in mutated.iter().zip(original.iter()).enumerate() {
                if new != old {
                    diffs.push((i, new));
                }
            }
            assert!(diffs.len() <= 1, "one round may change at most one byte");
            for (_, byte) in diffs {
                assert!(
                    CONTROL_QUOTE_CHARSET.contains(&byte),
                    "replacement {byte:#04x} outside the control/quote charset",
                );
            }
        }
    }

    #[test]
    fn random_insert_with_fixed_run_length_grows_linearly() {
        let case = b"seed".to_vec();
        for k in 1..=5usize {
            for rounds in 0..10 {
                let mut rng = rng(rounds as u8);
                let mutated = random_insert(&case, rounds, k..=k, &ALL_BYTES, &mut rng).unwrap();
                assert_eq!(mutated.len(), case.len() + rounds * k);
            }
        }
    }

    #[test]
    fn random_insert_samples_runs_without_replacement() {
        let mut rng = rng(7);
        // A run as long as the whole alphabet must use every byte once.
        let alphabet = [b'a', b'b', b'c', b'd'];
        let mutated = random_insert(b"", 1, 4..=4, &alphabet, &mut rng).unwrap();
        let mut run = mutated.clone();
        run.sort_unstable();
        assert_eq!(run, alphabet);
    }

    #[test]
    fn random_insert_rejects_runs_longer_than_the_alphabet() {
        let mut rng = rng(8);
        assert_eq!(
            random_insert(b"x", 1, 1..=5, &[b'a', b'b'], &mut rng),
            Err(MutationError::RunExceedsAlphabet(5, 2)),
        );
    }

    #[test]
    fn random_delete_shortens_within_the_expected_bounds() {
        let case = vec![b'x'; 64];
        for seed in 0..16 {
            let mut rng = rng(seed);
            let mutated =
                random_delete(&case, 1, DEFAULT_RUN_LENGTH_RANGE, &mut rng).unwrap();
            assert!(mutated.len() < case.len(), "deletion must strictly shrink");
            assert!(mutated.len() >= case.len() - *DEFAULT_RUN_LENGTH_RANGE.end());
            assert!(mutated.len() <= case.len() - *DEFAULT_RUN_LENGTH_RANGE.start());
        }
    }

    #[test]
    fn random_delete_rejects_cases_shorter_than_the_longest_run() {
        let mut rng = rng(9);
        let result = random_delete(b"short", 1, DEFAULT_RUN_LENGTH_RANGE, &mut rng);
        assert_eq!(
            result,
            Err(MutationError::CaseTooShort {
                len: 5,
                max_run: 9
            }),
        );
    }

    #[test]
    fn frequency_insert_reinserts_the_most_common_token() {
        // Distinct tokens: GET (3), /a (1), /b (1) -> pool of ceil(3/10) = 1,
        // so only "GET" can ever be inserted.
        let case = b"GET /a GET /b GET".to_vec();
        let mut rng = rng(10);
        let mutated = frequency_insert(&case, 1, &mut rng).unwrap();
        assert_eq!(mutated.len(), case.len() + 3);
        let occurrences = |haystack: &[u8]| {
            haystack
                .windows(3)
                .filter(|window| *window == b"GET")
                .count()
        };
        assert_eq!(occurrences(&mutated), occurrences(&case) + 1);
    }

    #[test]
    fn frequency_insert_rejects_cases_with_too_few_tokens() {
        let mut rng = rng(11);
        assert_eq!(
            frequency_insert(b"one two", 3, &mut rng),
            Err(MutationError::NotHumanReadable(2)),
        );
        assert_eq!(
            frequency_insert(b"\xffbinary\xfe", 1, &mut rng),
            Err(MutationError::NotHumanReadable(1)),
        );
    }

    #[test]
    fn mutations_are_reproducible_for_a_fixed_seed() {
        let case = b"deterministic input".to_vec();
        let first = random_replace(&case, 10, &mut rng(42)).unwrap();
        let second = random_replace(&case, 10, &mut rng(42)).unwrap();
        assert_eq!(first, second);
    }
}
