pub mod run;
pub mod sessions;

use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use paperlink_consolidate::Config;
use paperlink_sources::{SourceKind, SourceSettings};

/// `paperlink config`: print the effective configuration.
pub fn show_config(config: &Config) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    let batch = |cap: Option<usize>| cap.map_or_else(|| "source max".to_string(), |n| n.to_string());

    table.add_row(vec!["Checkpoint dir", &config.checkpoint_dir.display().to_string()]);
    table.add_row(vec!["Checkpoint interval", &format!("{}s", config.checkpoint_interval_secs)]);
    table.add_row(vec!["Workers", &config.workers.to_string()]);
    table.add_row(vec!["Primary source", config.primary.name()]);
    table.add_row(vec!["Secondary source", config.secondary.name()]);
    table.add_row(vec!["Abstract priority", &config.source_priority().join(" > ")]);
    table.add_row(vec!["Batch size (id_harvest)", &batch(config.id_harvest_batch_size)]);
    table.add_row(vec!["Batch size (batch_enrich)", &batch(config.batch_enrich_batch_size)]);
    table.add_row(vec!["Batch size (full_enrich)", &batch(config.full_enrich_batch_size)]);
    table.add_row(vec![
        "Stop after",
        &config.stop_after.map_or_else(|| "-".to_string(), |p| p.to_string()),
    ]);
    if let Some(path) = &config.output_file {
        table.add_row(vec!["Output file", &path.display().to_string()]);
    }

    for kind in SourceKind::ALL {
        add_source_rows(&mut table, kind, kind.settings(&config.sources));
    }

    eprintln!("\n{table}");
}

fn add_source_rows(table: &mut Table, kind: SourceKind, s: &SourceSettings) {
    let name = kind.name();
    table.add_row(vec![
        format!("{name} base URL"),
        s.base_url.clone().unwrap_or_else(|| "default".to_string()),
    ]);
    table.add_row(vec![
        format!("{name} rate"),
        s.requests_per_second
            .map_or_else(|| "default".to_string(), |r| format!("{r} req/s")),
    ]);
    table.add_row(vec![
        format!("{name} API key"),
        if s.api_key().is_some() { "configured" } else { "not set" }.to_string(),
    ]);
    if let Some(mailto) = &s.mailto {
        table.add_row(vec![format!("{name} mailto"), mailto.clone()]);
    }
    table.add_row(vec![
        format!("{name} timeout / retries"),
        format!("{}s / {}", s.timeout_secs, s.max_retries),
    ]);
}
