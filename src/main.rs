//! # Cluster Bench - Main Entry Point
//!
//! The binary runs the measurement engine over the in-process reference
//! cluster: it spawns one thread per rank, executes the selected benchmark
//! on every rank, and prints the coordinator's result table (optionally also
//! writing a JSON run report).
//!
//! The main function performs these key operations:
//! 1. **Initialize logging**: detailed file log plus a clean colorized
//!    stdout layer
//! 2. **Parse arguments**: repetition policy, message grid, operation and
//!    timing method
//! 3. **Spawn the cluster**: one thread per rank with a shared clock
//! 4. **Run the benchmark**: every rank executes the same engine call
//! 5. **Report**: table to stdout, optional JSON report

use anyhow::{anyhow, Result};
use clap::Parser;
use cluster_bench::{
    calibration::CalibrationRegistry,
    cli::{Args, Operation, Timing},
    containers::{
        BcastContainer, CollContainer, CommDupFreeContainer, GatherContainer, GathervContainer,
        ReduceContainer, RoundtripContainer, ScatterContainer, ScattervContainer,
    },
    measure::{
        measure_allp2p, measure_bcast_msgset, measure_global_msgset, measure_max_msgset,
        measure_p2p_msgset, measure_root_msgset, MeasureError, Measurement, MsgSet, Precision,
        TimingMethod,
    },
    output,
    transport::{Communicator, LocalClusterBuilder},
    OperationError,
};
use tracing::{error, info};
use tracing_subscriber::{filter::LevelFilter, prelude::*, Layer};

mod logging;
use logging::RankLineFormatter;

fn main() -> Result<()> {
    // Parse command-line arguments first, as they control logging behavior.
    let args = Args::parse();

    // - default: INFO
    // -v: DEBUG
    // -vv and more: TRACE
    let log_level = match args.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    // Configure the detailed log layer (file or stderr). The guard must be
    // kept alive for the duration of the program for file logging.
    let guard;
    let detailed_log_layer;
    if let Some("stderr") = args.log_file.as_deref() {
        detailed_log_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(log_level)
            .boxed();
        guard = None;
    } else {
        let file_appender = match args.log_file.as_deref() {
            Some(path_str) => {
                let log_path = std::path::Path::new(path_str);
                let log_dir = log_path
                    .parent()
                    .unwrap_or_else(|| std::path::Path::new("."));
                let log_filename = log_path
                    .file_name()
                    .unwrap_or_else(|| std::ffi::OsStr::new("cluster_bench.log"));
                tracing_appender::rolling::daily(log_dir, log_filename)
            }
            None => tracing_appender::rolling::daily(".", "cluster_bench.log"),
        };
        let (non_blocking_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        detailed_log_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false) // No color codes in the file logger
            .with_filter(log_level)
            .boxed();
        guard = Some(file_guard);
    }

    // Clean, user-facing output to stdout unless --quiet is given.
    let stdout_log = if !args.quiet {
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .event_format(RankLineFormatter)
                .with_filter(log_level),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(detailed_log_layer)
        .with(stdout_log)
        .init();
    let _log_guard = guard;

    let procs = args.procs.max(1);
    if args.root >= procs {
        return Err(anyhow!(
            "root rank {} is outside the group of {} ranks",
            args.root,
            procs
        ));
    }
    if args.timing == Timing::Bcast && args.operation != Operation::Bcast {
        return Err(anyhow!(
            "the bcast timing method applies to the bcast operation only"
        ));
    }

    let precision = args.precision();
    let msgset = args.msgset();

    info!(
        "Benchmarking {} with {} timing over {} ranks",
        args.operation, args.timing, procs
    );

    let args_ref = &args;
    let precision_ref = &precision;
    let msgset_ref = &msgset;
    let outcomes = LocalClusterBuilder::new(procs)
        .pin_cores(args.pin)
        .run(move |comm| run_benchmark(comm, args_ref, precision_ref, msgset_ref));

    // Each rank returns the same engine status; the coordinator additionally
    // carries the results.
    let mut results = None;
    for outcome in outcomes {
        match outcome {
            Ok(Some(r)) => results = Some(r),
            Ok(None) => {}
            Err(e) => {
                error!("Benchmark failed: {e}");
                return Err(e.into());
            }
        }
    }
    let results = results.ok_or_else(|| anyhow!("no rank produced results"))?;

    info!("Benchmark completed, {} message sizes measured", results.len());

    output::print_header(&args.operation.to_string(), &args.timing.to_string(), procs);
    output::print_precision(&precision);
    output::print_msgset(&msgset);
    output::print_results(&results);

    if let Some(path) = &args.json {
        let report = output::RunReport::new(
            args.operation.to_string(),
            args.timing.to_string(),
            procs,
            precision,
            msgset,
            results,
        );
        report.write_json(path)?;
        info!("Run report written to {}", path.display());
    }

    Ok(())
}

/// Executes the selected benchmark at one rank. Returns the result series at
/// the reporting rank and `None` elsewhere.
fn run_benchmark(
    comm: &dyn Communicator,
    args: &Args,
    precision: &Precision,
    msgset: &MsgSet,
) -> Result<Option<Vec<Measurement>>, MeasureError> {
    let mut registry = CalibrationRegistry::new();

    match args.operation {
        Operation::P2p => {
            let mut container = RoundtripContainer::new();
            measure_p2p_msgset(comm, &mut container, 0, 1, msgset, precision)
        }
        Operation::Allp2p => {
            let mut container = RoundtripContainer::new();
            let results = measure_allp2p(
                comm,
                &mut container,
                !args.sequential,
                msgset.min_size,
                precision,
            )?;
            // Every rank holds the gathered matrix; report it once.
            Ok((comm.rank() == 0).then_some(results))
        }
        Operation::Bcast if args.timing == Timing::Bcast => {
            let mut op = |comm: &dyn Communicator,
                          buf: &mut [u8],
                          root: usize|
             -> Result<(), OperationError> {
                comm.bcast(buf, root)?;
                Ok(())
            };
            let results = measure_bcast_msgset(
                comm,
                &mut registry,
                &mut op,
                args.root,
                msgset,
                precision.max_reps,
            )?;
            Ok((comm.rank() == args.root).then_some(results))
        }
        _ => {
            let mut container = collective_container(args.operation);
            let results = match args.timing.method().unwrap_or(TimingMethod::Max) {
                TimingMethod::Max => {
                    measure_max_msgset(comm, container.as_mut(), args.root, msgset, precision)?
                }
                TimingMethod::Root => measure_root_msgset(
                    comm,
                    &mut registry,
                    container.as_mut(),
                    args.root,
                    msgset,
                    precision,
                )?,
                TimingMethod::Global => measure_global_msgset(
                    comm,
                    &mut registry,
                    container.as_mut(),
                    args.root,
                    msgset,
                    precision,
                )?,
            };
            Ok((comm.rank() == args.root).then_some(results))
        }
    }
}

/// Builds the stock container for a collective operation.
fn collective_container(operation: Operation) -> Box<dyn CollContainer> {
    match operation {
        Operation::Scatter => Box::new(ScatterContainer::new()),
        Operation::Gather => Box::new(GatherContainer::new()),
        Operation::Scatterv => Box::new(ScattervContainer::new(None)),
        Operation::Gatherv => Box::new(GathervContainer::new(None)),
        Operation::Reduce => Box::new(ReduceContainer::new()),
        Operation::CommDup => Box::new(CommDupFreeContainer::new()),
        _ => Box::new(BcastContainer::new()),
    }
}
