//! Configuration commands

use anyhow::Result;
use devm_config::GlobalConfig;
use std::path::Path;

/// Print the effective configuration
pub fn config(config: &GlobalConfig, path: &Path) -> Result<()> {
    if path.exists() {
        println!("# Config file: {:?}\n", path);
    } else {
        println!("# Config file: {:?} (not created yet, showing defaults)\n", path);
    }
    println!("{}", config.to_toml()?);
    Ok(())
}
