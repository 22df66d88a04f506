//! Terminal output for the `streambridge` binary.
//!
//! Tuples go to stdout, one per line. Lifecycle status lines go to stderr,
//! colored and timestamped, so stdout stays machine-readable.

use std::io::{self, Write};

use chrono::Utc;
use owo_colors::OwoColorize;

use crate::bridge::{CommandSpec, Tuple, TupleSink};

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// How tuples are rendered on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// `index<TAB>text`
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Render a tuple as a single output line (without the trailing newline).
#[must_use]
pub fn format_tuple(tuple: &Tuple, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => format!("{}\t{}", tuple.index, tuple.text),
        OutputFormat::Json => match serde_json::to_string(tuple) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize tuple");
                format!("{}\t{}", tuple.index, tuple.text)
            }
        },
    }
}

/// Render a command line with shell quoting.
#[must_use]
pub fn format_command(command: &CommandSpec) -> String {
    command
        .argv()
        .into_iter()
        .map(|arg| shell_escape::escape(arg.into()).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Sink that writes each tuple as a line.
#[derive(Debug)]
pub struct TuplePrinter<W: Write> {
    out: W,
    format: OutputFormat,
    written: usize,
}

impl<W: Write> TuplePrinter<W> {
    #[must_use]
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self {
            out,
            format,
            written: 0,
        }
    }

    /// Number of tuples written so far.
    #[must_use]
    pub fn written(&self) -> usize {
        self.written
    }

    #[must_use]
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl TuplePrinter<io::Stdout> {
    /// Printer writing to the process's stdout.
    #[must_use]
    pub fn stdout(format: OutputFormat) -> Self {
        Self::new(io::stdout(), format)
    }
}

impl<W: Write> TupleSink for TuplePrinter<W> {
    fn add(&mut self, tuple: Tuple) {
        let line = format_tuple(&tuple, self.format);
        if let Err(e) = writeln!(self.out, "{line}").and_then(|()| self.out.flush()) {
            tracing::warn!(error = %e, index = tuple.index, "Failed to write tuple");
            return;
        }
        self.written += 1;
    }
}

/// Print bridge start information.
pub fn print_bridge_start(command: &CommandSpec, pid: Option<u32>) {
    let pid = pid.map_or_else(|| "?".to_string(), |p| p.to_string());
    eprintln!(
        "{} {} pid={} {}",
        timestamp().dimmed(),
        "[BRIDGE]".blue().bold(),
        pid.cyan(),
        format_command(command)
    );
    let _ = io::stderr().flush();
}

/// Print bridge end information.
pub fn print_bridge_end(records: usize, tuples: usize) {
    eprintln!(
        "{} {} records={}, tuples={}",
        timestamp().dimmed(),
        "[BRIDGE]".green().bold(),
        records,
        tuples
    );
}

/// Print a fatal error.
pub fn print_error(err: &dyn std::error::Error) {
    eprintln!(
        "{} {} {}",
        timestamp().dimmed(),
        "[ERROR]".red().bold(),
        err
    );
}
