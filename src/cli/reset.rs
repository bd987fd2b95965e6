//! CLI `reset` command — delete the database file after confirmation.

use anyhow::{Context, Result};
use std::io::Write;

use crate::config::LoreConfig;

/// Delete the database (and its WAL sidecars) after an explicit confirmation.
pub fn reset(config: &LoreConfig, yes: bool) -> Result<()> {
    let db_path = config.resolved_db_path();

    if !db_path.exists() {
        println!("Nothing to reset: no database at {}", db_path.display());
        return Ok(());
    }

    if !yes {
        print!(
            "This permanently deletes {} and its transaction history. Type 'yes' to continue: ",
            db_path.display()
        );
        std::io::stdout().flush()?;
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        if answer.trim() != "yes" {
            println!("Aborted.");
            return Ok(());
        }
    }

    std::fs::remove_file(&db_path)
        .with_context(|| format!("failed to delete {}", db_path.display()))?;
    for suffix in ["-wal", "-shm"] {
        let sidecar = std::path::PathBuf::from(format!("{}{suffix}", db_path.display()));
        if sidecar.exists() {
            let _ = std::fs::remove_file(&sidecar);
        }
    }

    println!("Deleted {}. A fresh database is created on next serve.", db_path.display());
    Ok(())
}
