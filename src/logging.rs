use colored::Colorize;
use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;

/// Stdout formatter for benchmark runs.
///
/// Events raised on a cluster rank thread are prefixed with that rank (the
/// cluster names its threads `rank-N`), so interleaved output from concurrent
/// ranks stays attributable; events from the driver thread carry no prefix.
/// Severity is shown as a short colored tag instead of coloring whole lines,
/// and informational messages are left untouched so result tables remain
/// machine-readable.
pub struct RankLineFormatter;

impl<S, N> FormatEvent<S, N> for RankLineFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let current = std::thread::current();
        if let Some(rank) = current.name().filter(|name| name.starts_with("rank-")) {
            write!(writer, "{} ", format!("[{rank}]").dimmed())?;
        }

        match *event.metadata().level() {
            Level::ERROR => write!(writer, "{} ", "error:".red().bold())?,
            Level::WARN => write!(writer, "{} ", "warning:".yellow().bold())?,
            Level::DEBUG => write!(writer, "{} ", "debug:".dimmed())?,
            Level::TRACE => write!(writer, "{} ", "trace:".dimmed())?,
            Level::INFO => {}
        }

        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
