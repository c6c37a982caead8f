use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color as TableColor, ContentArrangement, Table};

/// Table and cell creation helpers
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn cyan_header(labels: &[&str]) -> Vec<Cell> {
    labels
        .iter()
        .map(|label| Cell::new(*label).fg(TableColor::Cyan))
        .collect()
}

/// Green when nothing failed, red otherwise.
pub fn failure_count_cell(failed: usize) -> Cell {
    if failed == 0 {
        Cell::new(failed).fg(TableColor::Green)
    } else {
        Cell::new(failed).fg(TableColor::Red)
    }
}

pub fn enrichment_cell(enriched: usize, total: usize) -> Cell {
    #[allow(clippy::cast_precision_loss)]
    let rate = if total > 0 {
        enriched as f64 / total as f64 * 100.0
    } else {
        100.0
    };
    let text = format!("{enriched} ({rate:.1}%)");
    if rate > 80.0 {
        Cell::new(text).fg(TableColor::Green)
    } else if rate >= 50.0 {
        Cell::new(text).fg(TableColor::Yellow)
    } else {
        Cell::new(text).fg(TableColor::Red)
    }
}
