//! Rendering of outcome records

use std::io::{self, Write};

use hostmap_exec::{OutcomeRecord, Payload};

/// Output format for results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// Human readable blocks per host
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Write one record to `out`
///
/// # Errors
/// Returns error if writing fails
pub fn write_record(
    out: &mut impl Write,
    record: &OutcomeRecord,
    format: Format,
) -> io::Result<()> {
    match format {
        Format::Json => {
            serde_json::to_writer(&mut *out, record)?;
            writeln!(out)
        }
        Format::Text => write_text(out, record),
    }
}

fn write_text(out: &mut impl Write, record: &OutcomeRecord) -> io::Result<()> {
    writeln!(out, "== {} ==", record.hostname)?;

    if let Some(e) = &record.error {
        return writeln!(out, "error: {e}");
    }

    match &record.result {
        Payload::Output(output) => {
            out.write_all(output.stdout.as_bytes())?;
            if !output.stdout.is_empty() && !output.stdout.ends_with('\n') {
                writeln!(out)?;
            }
            if let Some(status) = output.exit_status.filter(|s| *s != 0) {
                writeln!(out, "(exit status {status})")?;
            }
            Ok(())
        }
        Payload::Transfer { remote_path, bytes } => {
            writeln!(out, "copied {bytes} bytes to {remote_path}")
        }
        Payload::None => Ok(()),
    }
}
