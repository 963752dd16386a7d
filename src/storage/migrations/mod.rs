//! Schema migrations for the queue database
//!
//! Each migration is a `files/NNN_name/up.sql` directory embedded at compile
//! time. Applied versions are tracked in `schema_migrations` with a checksum
//! of their SQL; an applied migration whose file later changed is an error.
//! Rows written with the older 16-hex-digit checksum are rewritten to SHA-256
//! the first time they are seen.

use anyhow::{Context, Result, bail};
use include_dir::{Dir, include_dir};
use log::{debug, info};
use sqlx::SqlitePool;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

static EMBEDDED: Dir = include_dir!("$CARGO_MANIFEST_DIR/src/storage/migrations/files");

#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub name: String,
    pub sql: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AppliedMigration {
    pub version: i64,
    pub name: String,
    pub checksum: String,
}

/// Embedded migrations in ascending version order
pub fn embedded_migrations() -> Result<Vec<Migration>> {
    let mut migrations = EMBEDDED
        .dirs()
        .map(|dir| {
            let dir_name = dir
                .path()
                .file_name()
                .and_then(|n| n.to_str())
                .context("Migration directory name is not UTF-8")?;
            let (version, name) = dir_name
                .split_once('_')
                .with_context(|| format!("Migration directory '{}' is not named NNN_name", dir_name))?;
            let version = version
                .parse::<i64>()
                .with_context(|| format!("Migration directory '{}' has no numeric version", dir_name))?;
            let sql = EMBEDDED
                .get_file(dir.path().join("up.sql"))
                .and_then(|f| f.contents_utf8())
                .with_context(|| format!("Migration '{}' has no readable up.sql", dir_name))?;

            Ok(Migration {
                version,
                name: name.to_string(),
                sql: sql.to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    migrations.sort_by_key(|m| m.version);
    if let Some(pair) = migrations.windows(2).find(|w| w[0].version == w[1].version) {
        bail!("Duplicate migration version {}", pair[0].version);
    }
    Ok(migrations)
}

/// Line-ending independent SHA-256 of migration SQL, hex encoded
pub fn checksum(sql: &str) -> String {
    let digest = Sha256::digest(sql.replace("\r\n", "\n").as_bytes());
    format!("{:x}", digest)
}

fn is_legacy_checksum(value: &str) -> bool {
    value.len() == 16 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

pub async fn applied_migrations(pool: &SqlitePool) -> Result<Vec<AppliedMigration>> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            checksum TEXT NOT NULL,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create schema_migrations")?;

    sqlx::query_as::<_, AppliedMigration>("SELECT version, name, checksum FROM schema_migrations ORDER BY version")
        .fetch_all(pool)
        .await
        .context("Failed to read schema_migrations")
}

/// Bring the database up to the newest embedded schema
///
/// Returns how many migrations were applied. Each one runs in its own
/// transaction together with its bookkeeping row.
pub async fn run_migrations(pool: &SqlitePool) -> Result<usize> {
    let embedded = embedded_migrations()?;
    let applied = applied_migrations(pool).await?;

    let by_version: HashMap<i64, &Migration> = embedded.iter().map(|m| (m.version, m)).collect();
    for row in &applied {
        let Some(migration) = by_version.get(&row.version) else {
            bail!(
                "Database has migration {} '{}' which this build does not know; it was written by a newer version",
                row.version,
                row.name
            );
        };
        let expected = checksum(&migration.sql);
        if is_legacy_checksum(&row.checksum) {
            sqlx::query("UPDATE schema_migrations SET checksum = ? WHERE version = ?")
                .bind(&expected)
                .bind(row.version)
                .execute(pool)
                .await
                .context("Failed to upgrade migration checksum")?;
            info!("Upgraded checksum of migration {} '{}' to SHA-256", row.version, row.name);
        } else if expected != row.checksum {
            bail!("Migration {} '{}' changed after it was applied", row.version, row.name);
        }
    }

    let newest_applied = applied.iter().map(|r| r.version).max().unwrap_or(0);
    let pending: Vec<&Migration> = embedded.iter().filter(|m| m.version > newest_applied).collect();
    if pending.is_empty() {
        debug!("Queue database schema is current (version {})", newest_applied);
        return Ok(0);
    }

    for migration in &pending {
        let mut tx = pool.begin().await.context("Failed to begin migration")?;
        sqlx::raw_sql(&migration.sql)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Migration {} '{}' failed", migration.version, migration.name))?;
        sqlx::query("INSERT INTO schema_migrations (version, name, checksum) VALUES (?, ?, ?)")
            .bind(migration.version)
            .bind(&migration.name)
            .bind(checksum(&migration.sql))
            .execute(&mut *tx)
            .await
            .context("Failed to record migration")?;
        tx.commit().await.context("Failed to commit migration")?;

        info!("Applied migration {} '{}'", migration.version, migration.name);
    }

    Ok(pending.len())
}
