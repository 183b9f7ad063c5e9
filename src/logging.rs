use colored::*;
use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;

/// A custom tracing event formatter for the operator-facing stdout stream.
///
/// Each line is prefixed with the gateway's short level tag (`[I]`, `[W]`,
/// `[E]`, `[D]`, `[T]`) and the whole line is colored by severity; no
/// timestamps or module paths, those belong to the detailed log file.
pub struct ConsoleFormatter;

impl<S, N> FormatEvent<S, N> for ConsoleFormatter
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
        // Buffer the formatted fields so the color applies to the whole line.
        let mut buffer = String::new();
        let mut buf_writer = Writer::new(&mut buffer);
        ctx.format_fields(buf_writer.by_ref(), event)?;

        let (tag, colored_output) = match *event.metadata().level() {
            Level::INFO => ("[I]", buffer.white()),
            Level::WARN => ("[W]", buffer.yellow()),
            Level::ERROR => ("[E]", buffer.red()),
            Level::DEBUG => ("[D]", buffer.blue()),
            Level::TRACE => ("[T]", buffer.purple()),
        };

        writeln!(writer, "{} {}", tag, colored_output)
    }
}
