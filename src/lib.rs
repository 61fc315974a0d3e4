//! # Cluster Bench
//!
//! A statistical benchmarking engine for message-passing communication
//! primitives. The library measures how long point-to-point exchanges and
//! collective operations take across a group of ranked processes, and
//! produces per-message-size timings qualified by Student-t confidence
//! intervals, for consumption by autotuners, performance models and
//! schedulers.
//!
//! The engine is transport-agnostic: everything is written against the
//! [`transport::Communicator`] trait, and the crate ships an in-process
//! reference cluster ([`transport::LocalCluster`]) that runs ranks as
//! threads for testing and local exploration.

pub mod calibration;
pub mod cli;
pub mod containers;
pub mod group;
pub mod measure;
pub mod output;
pub mod pairs;
pub mod stats;
pub mod sweep;
pub mod transport;

pub use calibration::CalibrationRegistry;
pub use containers::{CollContainer, OperationError, P2pContainer};
pub use measure::{MeasureError, Measurement, MsgSet, Precision, TimingMethod};
pub use transport::{Communicator, LocalCluster, LocalClusterBuilder, TransportError};

/// The current version of the benchmark engine
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    /// Default minimum number of repetitions per observation series
    pub const MIN_REPS: usize = 30;

    /// Default maximum number of repetitions per observation series
    pub const MAX_REPS: usize = 1000;

    /// Default confidence level for the Student-t interval
    pub const CONFIDENCE_LEVEL: f64 = 0.95;

    /// Default relative-error target
    pub const RELATIVE_ERROR: f64 = 0.025;

    /// Default minimum message size in bytes
    pub const MIN_SIZE: usize = 0;

    /// Default maximum message size in bytes
    pub const MAX_SIZE: usize = 204800;

    /// Default fixed stride between message sizes in bytes
    pub const STRIDE: usize = 1024;

    /// Default tolerance of the adaptive sweep's linear model
    pub const MAX_DIFF: f64 = 0.1;

    /// Default floor on the adaptive stride in bytes
    pub const MIN_STRIDE: usize = 64;

    /// Default ceiling on the number of adaptively selected sizes
    pub const MAX_NUM: usize = 100;
}
