//! # Command-Line Interface Module
//!
//! Argument parsing for the `cluster-bench` binary using the `clap` derive
//! API. Arguments are grouped into repetition control (`-r -R -c -e`), the
//! message grid (`-m -M -S -s -d -n`), the operation and timing method, and
//! output handling. The numeric surface deliberately mirrors the classic
//! option letters of message-passing benchmark suites.
//!
//! Validation that matters to the measurement core happens here: an inverted
//! repetition policy is clamped (the smaller bound is raised to match)
//! before it ever reaches the engine.

use crate::measure::{MsgSet, Precision, TimingMethod};
use clap::{
    builder::styling::{AnsiColor, Styles},
    Parser, ValueEnum,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Defines the styles for the help message.
fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None, styles = styles())]
pub struct Args {
    /// Communication operation to benchmark
    #[arg(short = 'o', long, value_enum, default_value_t = Operation::Bcast, help_heading = "Core Options")]
    pub operation: Operation,

    /// Timing method for collective benchmarks
    #[arg(short = 't', long, value_enum, default_value_t = Timing::Max, help_heading = "Core Options")]
    pub timing: Timing,

    /// Number of ranks in the in-process cluster
    #[arg(short = 'p', long, default_value_t = num_cpus::get(), help_heading = "Core Options")]
    pub procs: usize,

    /// Root rank of collective benchmarks
    #[arg(long, default_value_t = 0, help_heading = "Core Options")]
    pub root: usize,

    /// Minimum number of repetitions per observation series
    #[arg(short = 'r', long, default_value_t = crate::defaults::MIN_REPS, help_heading = "Repetition")]
    pub min_reps: usize,

    /// Maximum number of repetitions per observation series
    #[arg(short = 'R', long, default_value_t = crate::defaults::MAX_REPS, help_heading = "Repetition")]
    pub max_reps: usize,

    /// Confidence level of the Student-t interval (0 < cl < 1)
    #[arg(short = 'c', long, default_value_t = crate::defaults::CONFIDENCE_LEVEL, help_heading = "Repetition")]
    pub confidence: f64,

    /// Relative-error target (0 < eps < 1)
    #[arg(short = 'e', long, default_value_t = crate::defaults::RELATIVE_ERROR, help_heading = "Repetition")]
    pub error: f64,

    /// Minimum message size in bytes
    #[arg(short = 'm', long, default_value_t = crate::defaults::MIN_SIZE, help_heading = "Message Grid")]
    pub min_size: usize,

    /// Maximum message size in bytes
    #[arg(short = 'M', long, default_value_t = crate::defaults::MAX_SIZE, help_heading = "Message Grid")]
    pub max_size: usize,

    /// Stride between message sizes in bytes; 0 selects sizes adaptively
    #[arg(short = 'S', long, default_value_t = crate::defaults::STRIDE, help_heading = "Message Grid")]
    pub stride: usize,

    /// Minimum stride between adaptively selected sizes
    #[arg(short = 's', long, default_value_t = crate::defaults::MIN_STRIDE, help_heading = "Message Grid")]
    pub min_stride: usize,

    /// Maximum relative difference tolerated by the adaptive linear model
    #[arg(short = 'd', long, default_value_t = crate::defaults::MAX_DIFF, help_heading = "Message Grid")]
    pub max_diff: f64,

    /// Maximum number of adaptively selected message sizes
    #[arg(short = 'n', long, default_value_t = crate::defaults::MAX_NUM, help_heading = "Message Grid")]
    pub max_num: usize,

    /// Serialize the pairs of an all-pairs round instead of running them
    /// concurrently
    #[arg(long, help_heading = "Advanced")]
    pub sequential: bool,

    /// Pin each rank thread to a CPU core
    #[arg(long, help_heading = "Advanced")]
    pub pin: bool,

    /// Write the run report as JSON to this path
    #[arg(long, help_heading = "Output")]
    pub json: Option<PathBuf>,

    /// Log file path, or "stderr" to log there
    #[arg(long, help_heading = "Output")]
    pub log_file: Option<String>,

    /// Suppress the user-facing stdout log
    #[arg(short = 'q', long, help_heading = "Output")]
    pub quiet: bool,

    /// Increase log verbosity (-v for debug, -vv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, help_heading = "Output")]
    pub verbose: u8,
}

/// Communication operations the binary can benchmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum Operation {
    /// Broadcast from the root
    Bcast,
    /// Scatter from the root
    Scatter,
    /// Gather to the root
    Gather,
    /// Scatter with per-rank shares
    Scatterv,
    /// Gather with per-rank shares
    Gatherv,
    /// Reduction to the root
    Reduce,
    /// Group duplicate-and-free
    CommDup,
    /// Round-trip between ranks 0 and 1
    P2p,
    /// Round-trips between all rank pairs
    Allp2p,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Bcast => "bcast",
            Operation::Scatter => "scatter",
            Operation::Gather => "gather",
            Operation::Scatterv => "scatterv",
            Operation::Gatherv => "gatherv",
            Operation::Reduce => "reduce",
            Operation::CommDup => "comm_dup_free",
            Operation::P2p => "p2p",
            Operation::Allp2p => "allp2p",
        };
        write!(f, "{name}")
    }
}

/// Timing methods selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum Timing {
    /// Group-wide maximum of locally timed invocations
    Max,
    /// Root-side timing with barrier confirmation
    Root,
    /// Clock-adjusted global timing
    Global,
    /// The specialized broadcast timer (broadcast operation only)
    Bcast,
}

impl fmt::Display for Timing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Timing::Max => "max",
            Timing::Root => "root",
            Timing::Global => "global",
            Timing::Bcast => "bcast",
        };
        write!(f, "{name}")
    }
}

impl Timing {
    /// The engine-side method for the three general disciplines; the
    /// specialized broadcast timer has its own entry point.
    pub fn method(&self) -> Option<TimingMethod> {
        match self {
            Timing::Max => Some(TimingMethod::Max),
            Timing::Root => Some(TimingMethod::Root),
            Timing::Global => Some(TimingMethod::Global),
            Timing::Bcast => None,
        }
    }
}

impl Args {
    /// The repetition policy, clamped to a valid shape: a zero bound is
    /// raised to one, and when the bounds are inverted the smaller one is
    /// raised to match.
    pub fn precision(&self) -> Precision {
        let min_reps = self.min_reps.max(1);
        let max_reps = self.max_reps.max(min_reps);
        Precision {
            min_reps,
            max_reps,
            cl: self.confidence,
            eps: self.error,
        }
    }

    /// The message grid.
    pub fn msgset(&self) -> MsgSet {
        MsgSet {
            min_size: self.min_size,
            max_size: self.max_size.max(self.min_size),
            stride: self.stride,
            max_diff: self.max_diff,
            min_stride: self.min_stride.max(1),
            max_num: self.max_num.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverted_repetition_bounds_are_clamped_upward() {
        let args = Args::parse_from(["cluster-bench", "-r", "50", "-R", "10"]);
        let precision = args.precision();
        assert_eq!(precision.min_reps, 50);
        assert_eq!(precision.max_reps, 50);
    }

    #[test]
    fn option_letters_map_to_the_message_grid() {
        let args = Args::parse_from([
            "cluster-bench",
            "-m", "16",
            "-M", "1024",
            "-S", "0",
            "-s", "32",
            "-d", "0.2",
            "-n", "12",
        ]);
        let msgset = args.msgset();
        assert_eq!(msgset.min_size, 16);
        assert_eq!(msgset.max_size, 1024);
        assert_eq!(msgset.stride, 0);
        assert_eq!(msgset.min_stride, 32);
        assert_eq!(msgset.max_diff, 0.2);
        assert_eq!(msgset.max_num, 12);
    }

    #[test]
    fn timing_maps_to_engine_methods() {
        assert_eq!(Timing::Max.method(), Some(TimingMethod::Max));
        assert_eq!(Timing::Global.method(), Some(TimingMethod::Global));
        assert_eq!(Timing::Bcast.method(), None);
    }
}
