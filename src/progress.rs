//! Terminal progress display for the `connekt` client
//!
//! A single bar tracks the transfer fraction; status changes print above it
//! (cargo-style) so the history stays visible while the bar keeps updating.

use crate::observer::{TransferObserver, TransferStatus};
use crossterm::style::{Color, Stylize};
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Bar resolution; fractions are mapped onto 0..=STEPS
const STEPS: u64 = 1000;

pub struct TransferProgress {
    bar: ProgressBar,
    start_time: Instant,
    last_status: Mutex<Option<TransferStatus>>,
}

impl TransferProgress {
    pub fn new(label: &str) -> Self {
        let bar = ProgressBar::new(STEPS);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {percent:>3}%")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.set_message(label.to_string());
        bar.enable_steady_tick(Duration::from_millis(120));

        Self {
            bar,
            start_time: Instant::now(),
            last_status: Mutex::new(None),
        }
    }

    pub fn last_status(&self) -> Option<TransferStatus> {
        self.last_status.lock().clone()
    }

    /// Print a line above the bar without tearing it
    pub fn println(&self, line: &str) {
        self.bar.suspend(|| println!("{line}"));
    }

    pub fn finish(&self) {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        match self.last_status() {
            Some(TransferStatus::Completed(_)) => {
                self.bar.finish_with_message(format!(
                    "{} in {:.1}s",
                    "Completed".with(Color::Green).bold(),
                    elapsed
                ));
            }
            _ => self.bar.abandon(),
        }
    }
}

impl TransferObserver for TransferProgress {
    fn on_progress(&self, fraction: f64) {
        let pos = (fraction.clamp(0.0, 1.0) * STEPS as f64).round() as u64;
        self.bar.set_position(pos);
    }

    fn on_status_changed(&self, status: &TransferStatus) {
        let text = status.to_string();
        let styled = match status {
            TransferStatus::Completed(_) => text.with(Color::Green).bold(),
            TransferStatus::Paused => text.with(Color::Yellow).bold(),
            TransferStatus::NotFound | TransferStatus::Failed(_) => text.with(Color::Red).bold(),
            _ => text.with(Color::Cyan),
        };
        self.println(&format!("  {styled}"));
        *self.last_status.lock() = Some(status.clone());
    }
}
