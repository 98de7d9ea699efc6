use anyhow::Result;
use ftpdex::config::Config;
use tracing::info;

use super::search::human_size;
use super::Workspace;

pub fn show_stats(workspace: &Workspace, config: &Config) -> Result<()> {
    info!("Loading network statistics...");
    let stats = workspace.orchestrator.catalog().stats()?;

    println!("\nftpdex Statistics:");
    println!("==================");
    match &config.store.snapshot_path {
        Some(path) => println!("Snapshot: {}", path.display()),
        None => println!("Snapshot: none (in-memory only)"),
    }
    println!("Servers: {} ({} online)", stats.servers, stats.online);
    println!("Files: {}", stats.total_files);
    println!("Total size: {}", human_size(stats.total_size));
    if let Some(ping) = stats.last_ping {
        println!("Last ping: {}", ping.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(crawl) = stats.last_crawl {
        println!("Last crawl: {}", crawl.format("%Y-%m-%d %H:%M:%S"));
    }
    Ok(())
}
