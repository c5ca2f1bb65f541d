//! Output formatting for mapped options and presets.

use anyhow::{Context, Result};
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};
use lister_model::{ListerDefinition, ListerOption, value_text};

const OPTION_COLUMNS: [&str; 5] = ["Label", "Value", "Description", "Group", "Icon"];

pub fn apply_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(120);
}

fn header_cell(label: &str) -> Cell {
    Cell::new(label)
        .fg(Color::Cyan)
        .add_attribute(Attribute::Bold)
}

fn option_row(option: &ListerOption) -> [String; 5] {
    [
        option.label.clone(),
        value_text(&option.value),
        option.description.clone().unwrap_or_default(),
        option.group.clone().unwrap_or_default(),
        option.icon.clone().unwrap_or_default(),
    ]
}

pub fn render_table(options: &[ListerOption]) -> Table {
    let mut table = Table::new();
    table.set_header(OPTION_COLUMNS.iter().map(|label| header_cell(label)));
    apply_table_style(&mut table);
    for option in options {
        table.add_row(option_row(option));
    }
    table
}

/// Pretty-printed JSON array of options.
pub fn render_json(options: &[ListerOption]) -> Result<String> {
    serde_json::to_string_pretty(options).context("serialize options")
}

/// CSV with a header row; absent optional fields are empty cells.
pub fn render_csv(options: &[ListerOption]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(OPTION_COLUMNS.iter().map(|label| label.to_lowercase()))
        .context("write csv header")?;
    for option in options {
        writer
            .write_record(option_row(option))
            .context("write csv row")?;
    }
    let bytes = writer.into_inner().context("flush csv")?;
    String::from_utf8(bytes).context("csv output is not UTF-8")
}

/// One row per registered preset.
pub fn render_presets<'a>(presets: impl IntoIterator<Item = (&'a str, &'a ListerDefinition)>) -> Table {
    let mut table = Table::new();
    table.set_header(
        ["Kind", "Title", "Method", "Endpoint", "Selector"]
            .iter()
            .map(|label| header_cell(label)),
    );
    apply_table_style(&mut table);
    for (kind, def) in presets {
        table.add_row(vec![
            kind.to_string(),
            def.title.clone(),
            def.source.method.as_str().to_string(),
            def.source.endpoint.clone(),
            def.selector.describe(),
        ]);
    }
    table
}
