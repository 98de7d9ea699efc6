use anyhow::Result;
use chrono::{DateTime, Utc};
use ftpdex::catalog::PingOutcome;

use super::search::human_size;
use super::Workspace;

fn when(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "never".to_string())
}

pub fn list_servers(workspace: &Workspace) -> Result<()> {
    let servers = workspace.orchestrator.catalog().list_servers()?;
    if servers.is_empty() {
        println!("No servers known yet. Report one with:");
        println!("  ftpdex report-ping <host>");
        return Ok(());
    }

    println!("\nServers:");
    println!("========");
    for server in &servers {
        println!(
            "{} {:<20} {:<24} {:>8} files {:>12}  crawled {}",
            if server.is_alive { "+" } else { "-" },
            server.id,
            server.name,
            server.total_files,
            human_size(server.total_size),
            when(server.last_crawl)
        );
    }
    Ok(())
}

pub fn show_server(workspace: &Workspace, id: &str) -> Result<()> {
    let detail = workspace.orchestrator.catalog().server_detail(id)?;
    let summary = &detail.summary;

    println!("\n{} ({})", summary.name, summary.id);
    println!("{}", "=".repeat(summary.name.len() + summary.id.len() + 3));
    println!("URL: {}", detail.url);
    println!("Online: {}", summary.is_alive);
    println!("Port: {}", detail.port);
    println!("Login: {}", detail.login);
    println!("Encoding: {}", detail.encoding);
    println!("Files: {}", summary.total_files);
    println!("Size: {}", human_size(summary.total_size));
    println!("Last ping: {}", when(summary.last_ping));
    println!("Last crawl: {}", when(summary.last_crawl));
    match detail.current_generation {
        Some(generation) => println!("Current generation: {}", generation),
        None => println!("Current generation: none"),
    }
    for (generation, state) in &detail.generations {
        println!("  generation {}: {}", generation, state);
    }
    Ok(())
}

pub fn report_ping(workspace: &Workspace, host: &str, is_alive: bool) -> Result<()> {
    match workspace.orchestrator.catalog().report_ping(host, is_alive)? {
        PingOutcome::Created => println!("Added server {}", host),
        PingOutcome::Updated => println!("Marked {} {}", host, if is_alive { "online" } else { "offline" }),
        PingOutcome::Ignored => println!("Unknown server {} is offline, nothing recorded", host),
    }
    Ok(())
}

pub fn rename(workspace: &Workspace, id: &str, name: &str) -> Result<()> {
    workspace.orchestrator.catalog().rename(id, name)?;
    println!("Renamed {} to '{}'", id, name.trim());
    Ok(())
}

pub fn delete(workspace: &Workspace, id: &str) -> Result<()> {
    let removed = workspace.orchestrator.catalog().delete(id)?;
    println!("Deleted {} and {} entries", id, removed);
    Ok(())
}

pub fn list_files(workspace: &Workspace, id: &str) -> Result<()> {
    for entry in workspace.orchestrator.catalog().list_entries(id)? {
        let suffix = if entry.is_dir { "/" } else { "" };
        println!("{:>12}  {}{}", human_size(entry.size), entry.path, suffix);
    }
    Ok(())
}
