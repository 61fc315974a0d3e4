//! # Group Utilities
//!
//! Builds a sub-group containing one process per physical host: processor
//! names are all-gathered, indirectly sorted, and the first rank observed
//! for each distinct name joins the new group while all others are excluded.
//! Every rank runs the identical deterministic walk, so the membership and
//! ordering agree everywhere without further coordination.

use crate::transport::{Communicator, TransportError};

/// Fixed on-wire length of a processor name in the all-gather exchange.
const NAME_LEN: usize = 64;

/// Splits off a group with exactly one member per distinct host name.
///
/// Returns the new group handle at its members and `None` at every excluded
/// rank. Members are ordered by the sort order of their host names.
/// Collective over the whole group.
pub fn one_per_host(
    comm: &dyn Communicator,
) -> Result<Option<Box<dyn Communicator>>, TransportError> {
    let size = comm.size();
    let rank = comm.rank();

    let mut padded = [0u8; NAME_LEN];
    let name = comm.processor_name();
    let bytes = name.as_bytes();
    let n = bytes.len().min(NAME_LEN);
    padded[..n].copy_from_slice(&bytes[..n]);
    let all = comm.allgather(&padded)?;
    let names: Vec<&[u8]> = (0..size)
        .map(|r| &all[r * NAME_LEN..(r + 1) * NAME_LEN])
        .collect();

    // Indirect sort by (name, rank); the rank tiebreak makes the permutation
    // identical at every rank even between equal names.
    let mut order: Vec<usize> = (0..size).collect();
    order.sort_by_key(|&r| (names[r], r));

    // Walk the sorted names until this rank is found. The first rank of each
    // name group becomes a member; `key` counts the name groups that opened
    // before this rank's position and so orders the members by host.
    let mut color = None;
    let mut key = 0u32;
    for (pos, &r) in order.iter().enumerate() {
        let new_host = pos == 0 || names[order[pos - 1]] != names[r];
        if new_host {
            if r == rank {
                color = Some(0);
            } else {
                key += 1;
            }
        }
        if r == rank {
            break;
        }
    }

    comm.split(color, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalClusterBuilder;

    #[test]
    fn first_rank_of_each_host_joins_in_host_order() {
        let hosts: Vec<String> = ["alpha", "alpha", "beta", "beta", "alpha"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let results = LocalClusterBuilder::new(5).host_names(hosts).run(|comm| {
            one_per_host(comm)
                .unwrap()
                .map(|sub| (sub.rank(), sub.size()))
        });
        // Rank 0 is the first "alpha", rank 2 the first "beta".
        assert_eq!(results[0], Some((0, 2)));
        assert_eq!(results[2], Some((1, 2)));
        assert_eq!(results[1], None);
        assert_eq!(results[3], None);
        assert_eq!(results[4], None);
    }

    #[test]
    fn single_host_collapses_to_rank_zero() {
        let results = LocalClusterBuilder::new(3).run(|comm| {
            one_per_host(comm)
                .unwrap()
                .map(|sub| (sub.rank(), sub.size()))
        });
        assert_eq!(results[0], Some((0, 1)));
        assert_eq!(results[1], None);
        assert_eq!(results[2], None);
    }
}
