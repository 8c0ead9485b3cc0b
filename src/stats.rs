//! Database statistics.
//!
//! Row counts for every relation plus a per-archive breakdown of the ingest
//! ledger. Used by `passdb stats` to confirm an ingest landed.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::models::EntityKind;
use crate::progress::format_number;

/// Per-archive totals from the ingest ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveStats {
    pub archive: String,
    pub entries: i64,
    pub added: i64,
    pub duplicate: i64,
    pub malformed: i64,
    pub last_completed: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    pub usernames: i64,
    pub domains: i64,
    pub passwords: i64,
    pub records: i64,
    pub archives: Vec<ArchiveStats>,
}

pub async fn collect_stats(pool: &SqlitePool) -> Result<Stats> {
    let mut counts = [0i64; 3];
    for (count, kind) in counts.iter_mut().zip(EntityKind::ALL) {
        *count = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", kind.table()))
            .fetch_one(pool)
            .await?;
    }

    let records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
        .fetch_one(pool)
        .await?;

    let archive_rows = sqlx::query(
        r#"
        SELECT
            archive,
            COUNT(*) AS entries,
            SUM(added) AS added,
            SUM(duplicate) AS duplicate,
            SUM(malformed) AS malformed,
            MAX(completed_at) AS last_completed
        FROM ingested_entries
        GROUP BY archive
        ORDER BY last_completed DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let archives = archive_rows
        .iter()
        .map(|row| ArchiveStats {
            archive: row.get("archive"),
            entries: row.get("entries"),
            added: row.get("added"),
            duplicate: row.get("duplicate"),
            malformed: row.get("malformed"),
            last_completed: row.get("last_completed"),
        })
        .collect();

    Ok(Stats {
        usernames: counts[0],
        domains: counts[1],
        passwords: counts[2],
        records,
        archives,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect_initialized(config).await?;
    let stats = collect_stats(&pool).await;
    pool.close().await;
    let stats = stats?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("passdb — Database Stats");
    println!("=======================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Usernames:   {}", format_number(stats.usernames as u64));
    println!("  Domains:     {}", format_number(stats.domains as u64));
    println!("  Passwords:   {}", format_number(stats.passwords as u64));
    println!("  Records:     {}", format_number(stats.records as u64));

    if !stats.archives.is_empty() {
        println!();
        println!("  Ingested archives:");
        println!(
            "  {:<28} {:>7} {:>12} {:>12} {:>10}   {}",
            "ARCHIVE", "ENTRIES", "ADDED", "DUPLICATE", "MALFORMED", "COMPLETED"
        );
        println!("  {}", "-".repeat(92));

        for a in &stats.archives {
            println!(
                "  {:<28} {:>7} {:>12} {:>12} {:>10}   {}",
                a.archive,
                a.entries,
                format_number(a.added as u64),
                format_number(a.duplicate as u64),
                format_number(a.malformed as u64),
                format_ts_iso(a.last_completed)
            );
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
