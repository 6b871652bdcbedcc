//! Progress rendering for the terminal

use crate::error::CliError;
use large_track_compress_lib::{Progress, Stage};
use std::io::Write;

/// Renders snapshots as text lines or JSON lines on stdout
pub struct Reporter {
    json: bool,
}

impl Reporter {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn render(&self, progress: &Progress) -> Result<(), CliError> {
        let mut stdout = std::io::stdout().lock();
        if self.json {
            serde_json::to_writer(&mut stdout, progress)?;
            let _ = writeln!(stdout);
            return Ok(());
        }

        let _ = writeln!(stdout, "{}", format_line(progress));
        match progress.stage {
            Stage::Completed => {
                if let Some(output) = &progress.output {
                    let _ = writeln!(stdout, "  → Saved to {}", output.display());
                }
            }
            Stage::Failed => {
                if let Some(message) = &progress.message {
                    let _ = writeln!(stdout, "  → {}", message);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// `[stage] file - pct% | points: a -> b | speed: X/s`
pub fn format_line(progress: &Progress) -> String {
    let file = progress
        .input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| progress.input.display().to_string());
    format!(
        "[{}] {} - {:.2}% | points: {} -> {} | speed: {}/s",
        progress.stage.name(),
        file,
        progress.fraction_completed() * 100.0,
        progress.processed_points,
        progress.written_points,
        format_bytes(progress.throughput_bytes_per_second)
    )
}

/// Human readable byte count using decimal units
pub fn format_bytes(bytes: f64) -> String {
    const UNITS: [&str; 5] = ["bytes", "KB", "MB", "GB", "TB"];
    if !bytes.is_finite() || bytes <= 0.0 {
        return "0 bytes".to_string();
    }

    let mut value = bytes;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", value.round() as u64, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
