mod progress;
mod styling;
mod summary;
mod tables;

pub use progress::PhaseProgress;
pub use summary::print_summary;

use styling::{paint, Tone};

/// Prints the snowdrift banner to stderr.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        paint(Tone::Brand, "❄ snowdrift"),
        paint(Tone::Muted, env!("CARGO_PKG_VERSION")),
        paint(Tone::Muted, "Change-management ETL")
    );
}
