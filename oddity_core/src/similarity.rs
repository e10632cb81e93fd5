//! Junk-aware sequence similarity for comparing captured output streams.
//!
//! The stderr-divergence check needs a matching ratio that aligns two byte
//! streams while treating whitespace as low-significance filler, so that two
//! diagnostics differing only in padding or line breaks still compare as
//! similar. No crate in our stack implements this junk-aware longest-match
//! ratio, so it lives here.

use std::collections::HashMap;

/// Sequences at least this long get popular bytes demoted to junk, which
/// keeps the matcher from anchoring alignments on filler that dominates a
/// long stream.
const AUTOJUNK_MIN_LEN: usize = 200;

fn is_whitespace_junk(byte: u8) -> bool {
    matches!(byte, b' ' | b'\r' | b'\n' | b'\t')
}

/// Matching ratio in `[0.0, 1.0]` between `a` and `b`, with space, carriage
/// return, newline and tab treated as junk for alignment. Two empty
/// sequences are fully similar.
pub fn whitespace_junk_ratio(a: &[u8], b: &[u8]) -> f64 {
    SequenceMatcher::new(a, b).ratio()
}

struct Match {
    a_start: usize,
    b_start: usize,
    len: usize,
}

/// Byte-sequence matcher computing the total size of the longest matching
/// blocks between `a` and `b`: repeatedly find the longest contiguous match
/// containing no junk, then recurse into the pieces to its left and right.
struct SequenceMatcher<'a> {
    a: &'a [u8],
    b: &'a [u8],
    /// Positions of each byte value in `b`, junk and popular bytes excluded.
    b_index: HashMap<u8, Vec<usize>>,
    /// Bytes of `b` classified as junk by the whitespace predicate.
    b_junk: [bool; 256],
}

impl<'a> SequenceMatcher<'a> {
    fn new(a: &'a [u8], b: &'a [u8]) -> Self {
        let mut b_index: HashMap<u8, Vec<usize>> = HashMap::new();
        for (pos, &byte) in b.iter().enumerate() {
            b_index.entry(byte).or_default().push(pos);
        }

        let mut b_junk = [false; 256];
        for byte in 0..=255u8 {
            if is_whitespace_junk(byte) {
                b_junk[byte as usize] = true;
                b_index.remove(&byte);
            }
        }

        if b.len() >= AUTOJUNK_MIN_LEN {
            let popular_threshold = b.len() / 100 + 1;
            b_index.retain(|_, positions| positions.len() <= popular_threshold);
        }

        Self { a, b, b_index, b_junk }
    }

    fn is_b_junk(&self, pos: usize) -> bool {
        self.b_junk[self.b[pos] as usize]
    }

    /// Longest matching block within `a[a_lo..a_hi]` / `b[b_lo..b_hi]`.
    ///
    /// Junk never anchors a match, but a maximal non-junk match is extended
    /// afterwards with equal junk bytes hugging its edges, so interior
    /// whitespace still counts toward the ratio.
    fn find_longest_match(&self, a_lo: usize, a_hi: usize, b_lo: usize, b_hi: usize) -> Match {
        let mut best_a = a_lo;
        let mut best_b = b_lo;
        let mut best_len = 0usize;

        // run_lengths[j] = length of the match ending at a[i], b[j].
        let mut run_lengths: HashMap<usize, usize> = HashMap::new();
        for a_pos in a_lo..a_hi {
            let mut new_runs: HashMap<usize, usize> = HashMap::new();
            if let Some(positions) = self.b_index.get(&self.a[a_pos]) {
                for &b_pos in positions {
                    if b_pos < b_lo {
                        continue;
                    }
                    if b_pos >= b_hi {
                        break;
                    }
                    let len = b_pos
                        .checked_sub(1)
                        .and_then(|prev| run_lengths.get(&prev))
                        .copied()
                        .unwrap_or(0)
                        + 1;
                    new_runs.insert(b_pos, len);
                    if len > best_len {
                        best_a = a_pos + 1 - len;
                        best_b = b_pos + 1 - len;
                        best_len = len;
                    }
                }
            }
            run_lengths = new_runs;
        }

        // Widen with equal non-junk bytes first, then with equal junk bytes.
        for junk_pass in [false, true] {
            while best_a > a_lo
                && best_b > b_lo
                && self.is_b_junk(best_b - 1) == junk_pass
                && self.a[best_a - 1] == self.b[best_b - 1]
            {
                best_a -= 1;
                best_b -= 1;
                best_len += 1;
            }
            while best_a + best_len < a_hi
                && best_b + best_len < b_hi
                && self.is_b_junk(best_b + best_len) == junk_pass
                && self.a[best_a + best_len] == self.b[best_b + best_len]
            {
                best_len += 1;
            }
        }

        Match {
            a_start: best_a,
            b_start: best_b,
            len: best_len,
        }
    }

    /// Total number of matched bytes across all matching blocks.
    fn matched_total(&self) -> usize {
        let mut total = 0usize;
        let mut queue = vec![(0usize, self.a.len(), 0usize, self.b.len())];
        while let Some((a_lo, a_hi, b_lo, b_hi)) = queue.pop() {
            let m = self.find_longest_match(a_lo, a_hi, b_lo, b_hi);
            if m.len == 0 {
                continue;
            }
            total += m.len;
            queue.push((a_lo, m.a_start, b_lo, m.b_start));
            queue.push((m.a_start + m.len, a_hi, m.b_start + m.len, b_hi));
        }
        total
    }

    fn ratio(&self) -> f64 {
        let combined_len = self.a.len() + self.b.len();
        if combined_len == 0 {
            return 1.0;
        }
        2.0 * self.matched_total() as f64 / combined_len as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sequences_are_fully_similar() {
        assert_eq!(whitespace_junk_ratio(b"", b""), 1.0);
    }

    #[test]
    fn identical_sequences_are_fully_similar() {
        assert_eq!(whitespace_junk_ratio(b"segfault at 0x0", b"segfault at 0x0"), 1.0);
    }

    #[test]
    fn disjoint_sequences_have_zero_ratio() {
        assert_eq!(whitespace_junk_ratio(b"aaaa", b"bbbb"), 0.0);
    }

    #[test]
    fn one_empty_side_has_zero_ratio() {
        assert_eq!(whitespace_junk_ratio(b"", b"error"), 0.0);
        assert_eq!(whitespace_junk_ratio(b"error", b""), 0.0);
    }

    #[test]
    fn overlapping_sequences_score_their_common_run() {
        // "bcd" matches: 2 * 3 / (4 + 4).
        assert_eq!(whitespace_junk_ratio(b"abcd", b"bcde"), 0.75);
    }

    #[test]
    fn junk_does_not_anchor_alignment_but_still_matches_at_edges() {
        // The space in "a a" cannot seed a match on its own, yet once the
        // two 'a' runs align the interior byte comparisons still count.
        // Blocks: "a" at 0 and "a" at 2 -> 2 matched, ratio 2*2/5.
        assert_eq!(whitespace_junk_ratio(b"a a", b"aa"), 0.8);
    }

    #[test]
    fn whitespace_only_variation_keeps_high_similarity() {
        let base = b"parse error: unexpected token".as_slice();
        let padded = b"parse   error: unexpected token\n".as_slice();
        assert!(whitespace_junk_ratio(padded, base) > 0.9);
    }

    #[test]
    fn divergent_diagnostics_fall_below_the_stderr_threshold() {
        let base = b"usage: target FILE\n".as_slice();
        let crash = b"Segmentation fault (core dumped)\n".as_slice();
        assert!(whitespace_junk_ratio(crash, base) < 0.6);
    }

    #[test]
    fn ratio_is_symmetric_in_total_match_size() {
        let a = b"one two three".as_slice();
        let b = b"one two four".as_slice();
        let forward = whitespace_junk_ratio(a, b);
        assert!(forward > 0.6 && forward < 1.0);
        assert_eq!(whitespace_junk_ratio(b, a), forward);
    }

    #[test]
    fn long_streams_with_popular_filler_still_compare() {
        // 400 '.' bytes trip the popularity demotion; the ratio must stay
        // defined and high for identical streams.
        let long = vec![b'.'; 400];
        assert_eq!(whitespace_junk_ratio(&long, &long), 1.0);
    }
}
