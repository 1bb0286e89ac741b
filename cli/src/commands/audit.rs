use anyhow::{Context, Result};
use audit::SecureLogger;
use colored::*;
use std::path::Path;

/// Verify the hash chain of an audit file; returns whether it is intact
pub fn verify(path: &Path) -> Result<bool> {
    let report = SecureLogger::verify_file(path)
        .with_context(|| format!("Failed to read audit log {}", path.display()))?;

    if report.valid {
        println!(
            "{} {} entries in {}",
            "Chain intact:".green().bold(),
            report.entries,
            path.display()
        );
    } else {
        println!(
            "{} first broken entry at line {}",
            "Chain broken:".red().bold(),
            report
                .broken_at
                .map(|line| line.to_string())
                .unwrap_or_else(|| "?".to_string())
        );
        println!("  {} entries verified before the break", report.entries);
    }

    Ok(report.valid)
}
