use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::sink::BulkSummary;

use super::styling::{paint, Tone};

/// Spinner for the phase of a run currently in flight.
///
/// A disabled tracker draws nothing, so tests and scheduled runs without a
/// terminal stay quiet.
pub struct PhaseProgress {
    pb: ProgressBar,
}

impl PhaseProgress {
    pub fn start_fetch(enabled: bool) -> Self {
        if enabled {
            eprintln!("{}  {}", paint(Tone::Value, "⚙️"), paint(Tone::Heading, "Phases"));
        }
        let pb = create_spinner(
            enabled,
            paint(Tone::Pending, "Phase 1/3: Fetching change records").to_string(),
        );
        Self { pb }
    }

    pub fn finish_fetch_start_transform(self, fetched: usize) -> Self {
        self.pb.finish_with_message(
            paint(Tone::Good, format!("Phase 1/3: Fetched {fetched} change records ✓")).to_string(),
        );
        let pb = create_spinner(
            !self.pb.is_hidden(),
            paint(Tone::Pending, "Phase 2/3: Transforming and enriching").to_string(),
        );
        Self { pb }
    }

    pub fn finish_transform(self, documents: usize) {
        self.pb.finish_with_message(
            paint(Tone::Good, format!("Phase 2/3: Prepared {documents} documents ✓")).to_string(),
        );
    }

    pub fn start_load(enabled: bool, documents: usize) -> Self {
        let pb = create_spinner(
            enabled,
            paint(Tone::Pending, format!("Phase 3/3: Loading {documents} documents")).to_string(),
        );
        Self { pb }
    }

    pub fn finish_load(self, summary: &BulkSummary) {
        let message = if summary.failed.is_empty() {
            paint(Tone::Good, format!(
                "Phase 3/3: Loaded {} documents ✓",
                summary.succeeded
            ))
        } else {
            paint(Tone::Bad, format!(
                "Phase 3/3: Loaded {} documents, {} rejected",
                summary.succeeded,
                summary.failed.len()
            ))
        };
        self.pb.finish_with_message(message.to_string());
        if !self.pb.is_hidden() {
            eprintln!();
        }
    }
}

fn create_spinner(enabled: bool, message: String) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new_spinner();
    pb.set_draw_target(ProgressDrawTarget::stderr());
    if let Ok(style) = ProgressStyle::default_spinner().template("  {msg} {spinner}") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}
