use anyhow::Result;
use ftpdex::types::{SearchHit, SearchPage};
use tracing::info;

use super::Workspace;

pub fn search(
    workspace: &Workspace,
    query: &str,
    page: usize,
    sort: Option<&str>,
    online_only: bool,
    format: &str,
) -> Result<()> {
    info!("Searching for: {}", query);
    let results = workspace.orchestrator.engine().search(query, page, sort, online_only)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&results)?),
        _ => print_text(query, page.max(1), &results),
    }
    Ok(())
}

fn print_text(query: &str, page: usize, results: &SearchPage) {
    if results.hits.is_empty() {
        if results.total == 0 {
            println!("No files match '{}'", query);
        } else {
            println!("Page {} is past the last page ({})", page, results.page_count);
        }
        return;
    }

    println!(
        "\n{} matches for '{}' (page {}/{})",
        results.total, query, page, results.page_count
    );
    println!("{}", "=".repeat(60));
    for hit in &results.hits {
        println!("{}", describe(hit));
    }
}

fn describe(hit: &SearchHit) -> String {
    let kind = if hit.is_dir { "dir " } else { "file" };
    let modified = hit
        .modified
        .map(|m| m.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "-".to_string());
    format!("{} {:>12} {} {}", kind, human_size(hit.size), modified, hit.url())
}

/// Size with a binary unit suffix
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
