//! SQLite-backed popularity ledger and cache metadata.
//!
//! The ledger holds one row per (fingerprint, hour bucket); increments are
//! single upsert statements, so concurrent resolvers never lose updates.
//! Buckets are stored as `YYYY-MM-DD HH:00` UTC text and compared
//! lexicographically for trailing-window queries.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{migrate::MigrateDatabase, Pool, Row, Sqlite};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::models::{Fingerprint, SnapshotVersion};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS popularity (
    locale TEXT NOT NULL,
    timezone TEXT NOT NULL,
    auto_selected INTEGER NOT NULL,
    hour_bucket TEXT NOT NULL,
    count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (locale, timezone, auto_selected, hour_bucket)
);

CREATE INDEX IF NOT EXISTS idx_popularity_bucket ON popularity(hour_bucket);

CREATE TABLE IF NOT EXISTS cache_meta (
    key TEXT PRIMARY KEY,
    value TEXT,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS generated_images (
    image_key TEXT PRIMARY KEY,
    file_name TEXT NOT NULL,
    locale TEXT NOT NULL,
    timezone TEXT NOT NULL,
    snapshot_version TEXT NOT NULL,
    generated_at TEXT NOT NULL
);
"#;

#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    pub fn pool(&self) -> Pool<Sqlite> {
        self.pool.clone()
    }

    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let in_memory = config.url.contains(":memory:");
        if !in_memory && !Sqlite::database_exists(&config.url).await? {
            Sqlite::create_database(&config.url).await?;
        }

        // A pooled :memory: database is a different database per connection
        let max_connections = if in_memory {
            1
        } else {
            config.max_connections.unwrap_or(10)
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Database schema ready");
        Ok(())
    }

    // =========================================================================
    // Popularity ledger
    // =========================================================================

    /// Count one resolved request against the current hour bucket.
    pub async fn record_hit(&self, fingerprint: &Fingerprint) -> Result<(), sqlx::Error> {
        self.record_hit_at(fingerprint, Utc::now()).await
    }

    /// Count one resolved request against the bucket containing `at`.
    pub async fn record_hit_at(
        &self,
        fingerprint: &Fingerprint,
        at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO popularity (locale, timezone, auto_selected, hour_bucket, count)
            VALUES (?, ?, ?, ?, 1)
            ON CONFLICT(locale, timezone, auto_selected, hour_bucket)
            DO UPDATE SET count = count + 1
            "#,
        )
        .bind(&fingerprint.locale)
        .bind(&fingerprint.timezone)
        .bind(fingerprint.auto_selected)
        .bind(hour_bucket(at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fingerprints whose summed count over the trailing window reaches
    /// `min_count`, most popular first, ties broken by fingerprint order,
    /// truncated to `limit`. Only auto-selected variants participate.
    pub async fn top_k(
        &self,
        window_hours: i64,
        min_count: i64,
        limit: i64,
    ) -> Result<Vec<Fingerprint>, sqlx::Error> {
        self.top_k_excluding(window_hours, min_count, limit, None).await
    }

    /// `top_k` with a timezone excluded inside the query, so the limit is
    /// filled after exclusion (the default timezone is always pre-generated
    /// and would otherwise crowd out real candidates).
    pub async fn top_k_excluding(
        &self,
        window_hours: i64,
        min_count: i64,
        limit: i64,
        exclude_timezone: Option<&str>,
    ) -> Result<Vec<Fingerprint>, sqlx::Error> {
        let cutoff = hour_bucket(Utc::now() - Duration::hours(window_hours));

        let mut sql = String::from(
            "SELECT locale, timezone, SUM(count) AS total \
             FROM popularity \
             WHERE hour_bucket > ? AND auto_selected = 1",
        );
        if exclude_timezone.is_some() {
            sql.push_str(" AND timezone != ?");
        }
        sql.push_str(
            " GROUP BY locale, timezone \
             HAVING SUM(count) >= ? \
             ORDER BY total DESC, locale ASC, timezone ASC \
             LIMIT ?",
        );

        let mut query = sqlx::query(&sql).bind(cutoff);
        if let Some(timezone) = exclude_timezone {
            query = query.bind(timezone);
        }
        let rows = query
            .bind(min_count)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| Fingerprint {
                locale: row.get("locale"),
                timezone: row.get("timezone"),
                auto_selected: true,
            })
            .collect())
    }

    /// Delete buckets older than the retention horizon. Returns rows removed.
    pub async fn prune_popularity(&self, retention_days: i64) -> Result<u64, sqlx::Error> {
        let cutoff = hour_bucket(Utc::now() - Duration::days(retention_days));
        let result = sqlx::query("DELETE FROM popularity WHERE hour_bucket < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // =========================================================================
    // Cache metadata
    // =========================================================================

    pub async fn set_meta(&self, key: &str, value: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO cache_meta (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_meta(&self, key: &str) -> Result<Option<String>, sqlx::Error> {
        let row = sqlx::query("SELECT value FROM cache_meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|r| r.get::<Option<String>, _>("value")))
    }

    /// Record a warm tier entry written by the refresh cycle. Bookkeeping
    /// only; resolvers never consult this table.
    pub async fn save_generated_image(
        &self,
        fingerprint: &Fingerprint,
        file_name: &str,
        snapshot_version: &SnapshotVersion,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO generated_images
                (image_key, file_name, locale, timezone, snapshot_version, generated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(image_key) DO UPDATE SET
                file_name = excluded.file_name,
                snapshot_version = excluded.snapshot_version,
                generated_at = excluded.generated_at
            "#,
        )
        .bind(fingerprint.to_string())
        .bind(file_name)
        .bind(&fingerprint.locale)
        .bind(&fingerprint.timezone)
        .bind(snapshot_version.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// UTC hour bucket key, e.g. `2026-08-06 14:00`.
pub fn hour_bucket(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:00").to_string()
}
