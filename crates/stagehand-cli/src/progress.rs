//! CLI progress rendering.
//!
//! Presentation only: the engine computes rate and ETA, this module draws
//! them. A terminal gets an indicatif bar, anything else gets throttled
//! single-line updates.

use std::io::{self, IsTerminal, Write};
use std::time::{Duration, Instant};

use indicatif::{HumanBytes, ProgressBar, ProgressDrawTarget, ProgressState, ProgressStyle};
use stagehand_core::ProgressReport;

/// What the numbers in a report count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressUnit {
    /// Byte counts, shown with rate and ETA.
    Bytes,
    /// Percent points reported by the worker.
    Percent,
}

// ============================================================================
// CLI Progress Printer
// ============================================================================

/// CLI progress display that automatically selects terminal or plain output.
pub struct CliProgressPrinter {
    inner: ProgressRender,
}

enum ProgressRender {
    Fancy(FancyProgress),
    Plain(PlainProgress),
}

impl CliProgressPrinter {
    /// Create a new progress printer, auto-detecting terminal capability.
    pub fn new(label: &str, unit: ProgressUnit) -> Self {
        let inner = if io::stdout().is_terminal() {
            ProgressRender::Fancy(FancyProgress::new(label, unit))
        } else {
            ProgressRender::Plain(PlainProgress::new(label, unit))
        };
        Self { inner }
    }

    /// Redraw with the latest report.
    pub fn update(&mut self, report: &ProgressReport) {
        match &mut self.inner {
            ProgressRender::Fancy(inner) => inner.update(report),
            ProgressRender::Plain(inner) => inner.update(report),
        }
    }

    /// Finish and clear the progress display.
    pub fn finish(&mut self) {
        match &mut self.inner {
            ProgressRender::Fancy(inner) => inner.finish(),
            ProgressRender::Plain(inner) => inner.finish(),
        }
    }
}

// ============================================================================
// Fancy Terminal Progress (indicatif)
// ============================================================================

struct FancyProgress {
    bar: ProgressBar,
    unit: ProgressUnit,
    saw_length: bool,
}

impl FancyProgress {
    fn new(label: &str, unit: ProgressUnit) -> Self {
        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stdout());
        if let Ok(style) = ProgressStyle::with_template("{msg} {spinner}") {
            bar.set_style(style);
        }
        bar.set_message(label.to_string());
        bar.enable_steady_tick(Duration::from_millis(120));
        Self {
            bar,
            unit,
            saw_length: false,
        }
    }

    fn update(&mut self, report: &ProgressReport) {
        if report.total == 0 {
            self.bar.tick();
            return;
        }

        if !self.saw_length {
            if let Some(style) = self.bar_style() {
                self.bar.set_style(style);
            }
            self.saw_length = true;
        }
        if self.bar.length() != Some(report.total) {
            self.bar.set_length(report.total);
        }
        self.bar.set_position(report.done.min(report.total));
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }

    fn bar_style(&self) -> Option<ProgressStyle> {
        match self.unit {
            ProgressUnit::Percent => {
                ProgressStyle::with_template("{msg} {bar:28.cyan/blue} {pos:>3}%").ok()
            }
            ProgressUnit::Bytes => Some(
                ProgressStyle::with_template(
                    "{msg} {bar:28.cyan/blue} {human_bytes:>9} / {human_total:>9} ({percent:>3}%) @ {binary_bytes_per_sec} ETA {eta}",
                )
                .ok()?
                .with_key("human_bytes", |state: &ProgressState, w: &mut dyn std::fmt::Write| {
                    let _ = write!(w, "{}", HumanBytes(state.pos()));
                })
                .with_key("human_total", |state: &ProgressState, w: &mut dyn std::fmt::Write| {
                    let value = state
                        .len()
                        .map_or_else(|| "?".to_string(), |len| HumanBytes(len).to_string());
                    let _ = write!(w, "{value}");
                }),
            ),
        }
    }
}

// ============================================================================
// Plain Progress (non-terminal)
// ============================================================================

struct PlainProgress {
    label: String,
    unit: ProgressUnit,
    last_emit: Option<Instant>,
    last_line_len: usize,
    printed: bool,
}

impl PlainProgress {
    fn new(label: &str, unit: ProgressUnit) -> Self {
        Self {
            label: label.to_string(),
            unit,
            last_emit: None,
            last_line_len: 0,
            printed: false,
        }
    }

    fn update(&mut self, report: &ProgressReport) {
        const MIN_INTERVAL: Duration = Duration::from_millis(250);
        let now = Instant::now();
        let finished = report.total > 0 && report.done >= report.total;
        if !finished
            && self
                .last_emit
                .is_some_and(|last| now.duration_since(last) < MIN_INTERVAL)
        {
            return;
        }
        self.last_emit = Some(now);

        let line = format_line(&self.label, self.unit, report);
        let pad = self.last_line_len.saturating_sub(line.len());
        print!("\r{line}{:pad$}", "");
        io::stdout().flush().ok();

        self.last_line_len = line.len();
        self.printed = true;
    }

    fn finish(&mut self) {
        if self.printed {
            println!();
            self.printed = false;
            self.last_line_len = 0;
        }
    }
}

/// Single status line for non-terminal output.
fn format_line(label: &str, unit: ProgressUnit, report: &ProgressReport) -> String {
    use std::fmt::Write;

    let mut line = label.to_string();
    match unit {
        ProgressUnit::Percent => {
            let _ = write!(line, ": {:>3}%", report.percent);
        }
        ProgressUnit::Bytes if report.total == 0 => {
            let _ = write!(line, ": {} downloaded", HumanBytes(report.done));
        }
        ProgressUnit::Bytes => {
            let _ = write!(
                line,
                ": {} / {} ({:>3}%) @ {}/s",
                HumanBytes(report.done),
                HumanBytes(report.total),
                report.percent,
                HumanBytes(rate_as_bytes(report.rate_bps)),
            );
            if let Some(eta) = report.eta_seconds {
                let _ = write!(line, " ETA {}", format_eta(eta));
            }
        }
    }
    line
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn rate_as_bytes(rate_bps: f64) -> u64 {
    if rate_bps.is_finite() && rate_bps > 0.0 {
        rate_bps as u64
    } else {
        0
    }
}

fn format_eta(seconds: u64) -> String {
    let (h, m, s) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    if h > 0 {
        format!("{h}h{m:02}m")
    } else if m > 0 {
        format!("{m}m{s:02}s")
    } else {
        format!("{s}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(done: u64, total: u64) -> ProgressReport {
        ProgressReport {
            done,
            total,
            percent: stagehand_core::percent_of(done, total),
            eta_seconds: None,
            rate_bps: 0.0,
        }
    }

    #[test]
    fn test_format_eta() {
        assert_eq!(format_eta(7), "7s");
        assert_eq!(format_eta(125), "2m05s");
        assert_eq!(format_eta(3 * 3600 + 60 * 4), "3h04m");
    }

    #[test]
    fn test_percent_line() {
        let line = format_line("Installing", ProgressUnit::Percent, &report(42, 100));
        assert_eq!(line, "Installing:  42%");
    }

    #[test]
    fn test_bytes_line_with_eta() {
        let mut r = report(512, 1024);
        r.rate_bps = 256.0;
        r.eta_seconds = Some(2);
        let line = format_line("helper", ProgressUnit::Bytes, &r);
        assert!(line.starts_with("helper: 512 B / 1.00 KiB ( 50%)"));
        assert!(line.ends_with("ETA 2s"));
    }

    #[test]
    fn test_bytes_line_unknown_total() {
        let line = format_line("helper", ProgressUnit::Bytes, &report(2048, 0));
        assert_eq!(line, "helper: 2.00 KiB downloaded");
    }

    #[test]
    fn test_rate_ignores_nonsense() {
        assert_eq!(rate_as_bytes(f64::NAN), 0);
        assert_eq!(rate_as_bytes(-3.0), 0);
        assert_eq!(rate_as_bytes(10.9), 10);
    }
}
