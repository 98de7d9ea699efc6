use anyhow::Result;
use tracing::info;

use super::Workspace;

pub async fn run_batch(workspace: &Workspace, concurrency: usize) -> Result<()> {
    info!("Crawling online servers...");
    let report = workspace.orchestrator.run_crawl_batch(concurrency).await?;

    println!("\nCrawl batch:");
    println!("============");
    println!("Servers crawled: {}/{}", report.succeeded, report.attempted);
    println!("Entries recorded: {}", report.entries);
    println!("Entries purged: {}", report.purged_entries);
    println!("Stale postings removed: {}", report.postings.removed);

    if !report.failed.is_empty() {
        println!("\nFailed servers:");
        for (server, reason) in &report.failed {
            println!("  {}: {}", server, reason);
        }
    }
    Ok(())
}

pub fn reindex(workspace: &Workspace) -> Result<()> {
    let report = workspace.orchestrator.reindex()?;
    println!(
        "Reindexed {} servers ({} entries), removed {} stale refs from {} posting sets",
        report.servers, report.entries, report.postings.removed, report.postings.postings
    );
    Ok(())
}
