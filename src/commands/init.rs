use anyhow::{Context, Result};
use ftpdex::config::Config;
use std::path::PathBuf;

pub fn init_config(path: PathBuf) -> Result<()> {
    let config_path = path.join("ftpdex.toml");
    if config_path.exists() {
        anyhow::bail!("{} already exists", config_path.display());
    }

    let content = toml::to_string_pretty(&Config::default()).context("Failed to render default configuration")?;
    std::fs::create_dir_all(&path)?;
    std::fs::write(&config_path, format!("# ftpdex configuration\n\n{}", content))?;
    println!("Created configuration file: {}", config_path.display());
    Ok(())
}
