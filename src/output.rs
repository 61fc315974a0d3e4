//! # Result Output Module
//!
//! Human-readable result tables and the serializable run report. The table
//! format is the traditional benchmark layout — one commented header, one
//! row per message size — so existing tooling that scrapes such tables keeps
//! working. The JSON report carries the full configuration next to the
//! results so a run is self-describing.

use crate::measure::{Measurement, MsgSet, Precision};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// A complete, self-describing benchmark run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique identifier of this run.
    pub run_id: Uuid,
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Engine version that produced the report.
    pub version: String,
    /// Label of the measured operation.
    pub operation: String,
    /// Timing method used.
    pub timing: String,
    /// Number of ranks in the group.
    pub procs: usize,
    /// Repetition policy of the run.
    pub precision: Precision,
    /// Message grid of the run.
    pub msgset: MsgSet,
    /// One record per measured message size.
    pub results: Vec<Measurement>,
}

impl RunReport {
    pub fn new(
        operation: String,
        timing: String,
        procs: usize,
        precision: Precision,
        msgset: MsgSet,
        results: Vec<Measurement>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            version: crate::VERSION.to_string(),
            operation,
            timing,
            procs,
            precision,
            msgset,
            results,
        }
    }

    /// Writes the report as pretty-printed JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}

/// Prints the run header: operation, timing method and group shape.
pub fn print_header(operation: &str, timing: &str, procs: usize) {
    println!("#operation\t{operation}");
    println!("#timing\t\t{timing}");
    println!("#procs\t\t{procs}");
    println!("#");
}

/// Prints the repetition policy.
pub fn print_precision(precision: &Precision) {
    println!("#Precision");
    println!("#min_reps\t{}", precision.min_reps);
    println!("#max_reps\t{}", precision.max_reps);
    println!("#cl\t\t{:e}", precision.cl);
    println!("#eps\t\t{:e}", precision.eps);
    println!("#");
}

/// Prints the message grid.
pub fn print_msgset(msgset: &MsgSet) {
    println!("#Message set");
    println!("#min_size\t{}", msgset.min_size);
    println!("#max_size\t{}", msgset.max_size);
    println!("#stride\t\t{}", msgset.stride);
    println!("#max_diff\t{:e}", msgset.max_diff);
    println!("#min_stride\t{}", msgset.min_stride);
    println!("#max_num\t{}", msgset.max_num);
    println!("#");
}

/// Prints the result table. The third column reports whether the measured
/// time exceeds the group's clock-resolution floor.
pub fn print_results(results: &[Measurement]) {
    println!("#msg\ttime\t\treliable\treps\tci");
    for r in results {
        println!(
            "{}\t{:e}\t{}\t{}\t{:e}",
            r.m,
            r.t,
            u8::from(r.wtick < r.t),
            r.reps,
            r.ci
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_round_trips_through_json() {
        let report = RunReport::new(
            "bcast".into(),
            "max".into(),
            4,
            Precision::default(),
            MsgSet::default(),
            vec![Measurement {
                m: 1024,
                t: 5.0e-5,
                wtick: 1e-9,
                reps: 12,
                ci: 1.0e-6,
            }],
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        report.write_json(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let back: RunReport = serde_json::from_str(&text).unwrap();
        assert_eq!(back.run_id, report.run_id);
        assert_eq!(back.operation, "bcast");
        assert_eq!(back.results.len(), 1);
        assert_eq!(back.results[0].m, 1024);
    }
}
