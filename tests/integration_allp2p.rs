use cluster_bench::containers::RoundtripContainer;
use cluster_bench::measure::measure_allp2p;
use cluster_bench::pairs::{count_pairs, pair_index};
use cluster_bench::transport::LocalCluster;
use cluster_bench::Precision;

/// All-pairs timing fills one record per unordered pair and gathers the
/// identical matrix to every rank.
#[test]
fn all_pairs_fill_the_triangular_matrix() {
    let precision = Precision {
        min_reps: 4,
        max_reps: 30,
        cl: 0.95,
        eps: 0.5,
    };
    let n = 4;
    let results = LocalCluster::run(n, |comm| {
        let mut container = RoundtripContainer::new();
        measure_allp2p(comm, &mut container, true, 128, &precision).unwrap()
    });

    for records in &results {
        assert_eq!(records.len(), count_pairs(n));
        for i in 0..n {
            for j in (i + 1)..n {
                let record = &records[pair_index(n, i, j)];
                assert_eq!(record.m, 128);
                assert!(record.t > 0.0, "pair ({i},{j}) has no time");
                assert!(record.reps >= 4 && record.reps <= 30);
            }
        }
    }

    // The gather distributes one matrix; every rank must hold the same one.
    for records in &results[1..] {
        assert_eq!(records, &results[0]);
    }
}

/// The serialized mode (a barrier between consecutive pairs of a round)
/// produces the same matrix shape.
#[test]
fn sequential_mode_matches_the_schedule() {
    let precision = Precision::fixed(3);
    let n = 5;
    let results = LocalCluster::run(n, |comm| {
        let mut container = RoundtripContainer::new();
        measure_allp2p(comm, &mut container, false, 0, &precision).unwrap()
    });

    for records in &results {
        assert_eq!(records.len(), count_pairs(n));
        assert!(records.iter().all(|r| r.reps == 3 && r.m == 0));
    }
}
