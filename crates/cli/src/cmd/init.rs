//! Write a starter config

use anyhow::Result;
use owo_colors::OwoColorize;
use std::path::Path;

pub async fn run(config_path: &Path) -> Result<()> {
    if crate::config::write_example(config_path)? {
        println!("{} {}", "Created".green(), config_path.display());
        println!();
        println!("Edit the [[jobs]] entries, then start scheduling with:");
        println!("  {}", "ks run".cyan());
    } else {
        println!(
            "{} {}",
            "Config already exists:".yellow(),
            config_path.display()
        );
    }
    Ok(())
}
