//! # Pair Scheduler
//!
//! Partitions the complete set of unordered rank pairs `{(i, j) : i < j < n}`
//! into rounds in which no rank appears twice, so that all pairs of a round
//! can communicate concurrently. Both the all-pairs benchmark and the
//! clock-offset calibration walk this schedule, and every rank builds it
//! independently — the construction must therefore be deterministic and
//! produce the identical schedule everywhere.

/// An unordered pair of distinct ranks, stored as `(lower, higher)`.
pub type Pair = (usize, usize);

/// Builds the round schedule for a group of `n` ranks.
///
/// Greedy round-robin: repeatedly walk the remaining pairs in lexicographic
/// order and accept a pair iff neither endpoint is already engaged in the
/// round under construction. The union of all rounds is exactly the complete
/// pair set, and each round is conflict-free.
pub fn build_pairs(n: usize) -> Vec<Vec<Pair>> {
    let mut remaining: Vec<Pair> = Vec::with_capacity(count_pairs(n));
    for i in 0..n {
        for j in (i + 1)..n {
            remaining.push((i, j));
        }
    }

    let mut rounds = Vec::new();
    while !remaining.is_empty() {
        let mut round: Vec<Pair> = Vec::new();
        let mut busy = vec![false; n];
        remaining.retain(|&(i, j)| {
            if busy[i] || busy[j] {
                true
            } else {
                busy[i] = true;
                busy[j] = true;
                round.push((i, j));
                false
            }
        });
        rounds.push(round);
    }
    rounds
}

/// Number of unordered pairs in a group of `n` ranks.
pub fn count_pairs(n: usize) -> usize {
    n * n.saturating_sub(1) / 2
}

/// Index of pair `(i, j)` in the flat upper-triangular layout used to
/// exchange per-pair results: all pairs with the lower rank first, ordered by
/// `(min(i, j), max(i, j))`.
pub fn pair_index(n: usize, i: usize, j: usize) -> usize {
    debug_assert!(i != j && i < n && j < n);
    let (lo, hi) = if i < j { (i, j) } else { (j, i) };
    (2 * n - lo - 1) * lo / 2 + hi - lo - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn four_ranks_form_three_perfect_rounds() {
        let rounds = build_pairs(4);
        assert_eq!(rounds.len(), 3);
        assert_eq!(rounds[0], vec![(0, 1), (2, 3)]);
        assert_eq!(rounds[1], vec![(0, 2), (1, 3)]);
        assert_eq!(rounds[2], vec![(0, 3), (1, 2)]);
    }

    #[test]
    fn schedule_partitions_all_pairs() {
        for n in 2..10 {
            let rounds = build_pairs(n);
            let mut seen = HashSet::new();
            for round in &rounds {
                let mut busy = HashSet::new();
                for &(i, j) in round {
                    assert!(i < j && j < n);
                    // No rank twice within a round.
                    assert!(busy.insert(i));
                    assert!(busy.insert(j));
                    // No pair twice across the schedule.
                    assert!(seen.insert((i, j)));
                }
            }
            assert_eq!(seen.len(), count_pairs(n));
            assert!(rounds.iter().all(|r| !r.is_empty()));
        }
    }

    #[test]
    fn pair_index_is_a_bijection() {
        let n = 7;
        let mut seen = vec![false; count_pairs(n)];
        for i in 0..n {
            for j in (i + 1)..n {
                let idx = pair_index(n, i, j);
                assert_eq!(idx, pair_index(n, j, i));
                assert!(!seen[idx]);
                seen[idx] = true;
            }
        }
        assert!(seen.iter().all(|&s| s));
        assert_eq!(pair_index(4, 0, 1), 0);
        assert_eq!(pair_index(4, 2, 3), 5);
    }
}
