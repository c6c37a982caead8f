use std::fmt::Write;

use comfy_table::Cell;

use crate::pipeline::{InvocationResponse, RunReport};

use super::styling::{paint, Tone};
use super::tables::{create_table, cyan_header, enrichment_cell, failure_count_cell};

const MAX_LISTED_REJECTIONS: usize = 10;

/// Prints a human-readable summary of a run to stderr.
///
/// Shows the extraction window, per-stage counts, rejected documents and
/// any stage failures.
pub fn print_summary(report: &RunReport, response: &InvocationResponse) {
    eprintln!("{}", render_summary(report, response));
}

fn add_section_header(output: &mut String, emoji: &str, title: &str) {
    let _ = writeln!(output, "{} {}", paint(Tone::Value, emoji), paint(Tone::Heading, title));
}

fn render_summary(report: &RunReport, response: &InvocationResponse) -> String {
    let mut output = String::new();

    add_section_header(&mut output, "📊", "Run");

    let status = if response.status_code == 200 {
        paint(Tone::Good, format!("{} {}", response.status_code, response.body))
    } else {
        paint(Tone::Bad, format!("{} {}", response.status_code, response.body))
    };
    let window = report.window.as_ref().map_or_else(
        || "n/a".to_string(),
        |(start, end)| format!("{start} → {end}"),
    );

    let _ = writeln!(
        output,
        "  {} {}\n  {} {}\n  {} {}\n  {} {:.2}s\n",
        paint(Tone::Muted, "Started:"),
        paint(Tone::Value, &report.started_at),
        paint(Tone::Muted, "Window:"),
        paint(Tone::Value, window),
        paint(Tone::Muted, "Status:"),
        status,
        paint(Tone::Muted, "Duration:"),
        report.execution_secs,
    );

    add_section_header(&mut output, "📋", "Stages");

    let mut table = create_table();
    table.set_header(cyan_header(&[
        "Fetched",
        "Transformed",
        "Skipped",
        "Enriched",
        "Loaded",
        "Rejected",
        "Metrics",
    ]));
    table.add_row(vec![
        Cell::new(report.fetched),
        Cell::new(report.transformed),
        failure_count_cell(report.skipped),
        enrichment_cell(report.enriched, report.transformed),
        Cell::new(report.load.succeeded),
        failure_count_cell(report.load.failed.len()),
        Cell::new(if report.metrics_written { "written" } else { "—" }),
    ]);
    let _ = writeln!(output, "{table}\n");

    if !report.load.failed.is_empty() {
        add_section_header(&mut output, "⚠️", "Rejected documents");
        let mut rejected = create_table();
        rejected.set_header(cyan_header(&["Id", "Status", "Reason"]));
        for failure in report.load.failed.iter().take(MAX_LISTED_REJECTIONS) {
            rejected.add_row(vec![
                Cell::new(&failure.id),
                Cell::new(failure.status),
                Cell::new(&failure.reason),
            ]);
        }
        let _ = writeln!(output, "{rejected}");
        if report.load.failed.len() > MAX_LISTED_REJECTIONS {
            let _ = writeln!(
                output,
                "  {}",
                paint(Tone::Muted, format!(
                    "... and {} more",
                    report.load.failed.len() - MAX_LISTED_REJECTIONS
                ))
            );
        }
        output.push('\n');
    }

    if !report.failures.is_empty() {
        add_section_header(&mut output, "❌", "Failures");
        for failure in &report.failures {
            let stage = failure
                .stage
                .map_or_else(|| "setup".to_string(), |s| s.to_string());
            let _ = writeln!(output, "  {} {}", paint(Tone::Bad, stage), failure.message);
        }
    }

    output
}
