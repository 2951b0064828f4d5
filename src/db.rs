use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};

use crate::cache::{expiry, timestamp};
use crate::config::FeedConfig;
use crate::filter::normalize_title;

#[derive(Debug, Clone, FromRow)]
pub struct Feed {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub last_fetched: Option<String>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Headline {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    #[serde(skip)]
    pub title_key: String,
    pub url: String,
    pub source: Option<String>,
    pub published: Option<String>,
    pub fetched_at: String,
}

/// A headline as scraped from a feed, before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewHeadline {
    pub title: String,
    pub url: String,
    pub source: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct AudioClip {
    pub audio: Vec<u8>,
    pub content_type: String,
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                last_fetched TEXT,
                last_error TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS headlines (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id),
                title TEXT NOT NULL,
                title_key TEXT NOT NULL UNIQUE,
                url TEXT NOT NULL UNIQUE,
                source TEXT,
                published TEXT,
                fetched_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_headlines_published
            ON headlines(published DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cartoon_cache (
                key TEXT PRIMARY KEY,
                headline TEXT NOT NULL,
                image_url TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS explanation_cache (
                key TEXT PRIMARY KEY,
                headline TEXT NOT NULL,
                explanation TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tts_cache (
                text_hash TEXT NOT NULL,
                voice_id TEXT NOT NULL,
                audio BLOB NOT NULL,
                content_type TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                PRIMARY KEY (text_hash, voice_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn sync_feeds(&self, configs: &[FeedConfig]) -> anyhow::Result<()> {
        for config in configs {
            sqlx::query(
                r#"
                INSERT INTO feeds (name, url)
                VALUES (?, ?)
                ON CONFLICT(url) DO UPDATE SET name = excluded.name
                "#,
            )
            .bind(&config.name)
            .bind(&config.url)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn get_all_feeds(&self) -> anyhow::Result<Vec<Feed>> {
        let feeds = sqlx::query_as::<_, Feed>("SELECT * FROM feeds ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(feeds)
    }

    pub async fn update_feed_fetched(&self, feed_id: i64, error: Option<&str>) -> anyhow::Result<()> {
        let now = timestamp(Utc::now());
        sqlx::query("UPDATE feeds SET last_fetched = ?, last_error = ? WHERE id = ?")
            .bind(&now)
            .bind(error)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Store a headline, merging it into an existing row that has the same
    /// URL or the same normalized title. Returns `true` when a new row was
    /// inserted.
    pub async fn upsert_headline(&self, feed_id: i64, headline: &NewHeadline) -> anyhow::Result<bool> {
        let title_key = normalize_title(&headline.title);
        let published = headline.published.map(timestamp);
        let now = timestamp(Utc::now());

        let existing: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM headlines WHERE url = ? OR title_key = ? LIMIT 1")
                .bind(&headline.url)
                .bind(&title_key)
                .fetch_optional(&self.pool)
                .await?;

        if let Some((id,)) = existing {
            sqlx::query(
                r#"
                UPDATE headlines
                SET title = ?,
                    source = COALESCE(?, source),
                    published = COALESCE(?, published),
                    fetched_at = ?
                WHERE id = ?
                "#,
            )
            .bind(&headline.title)
            .bind(&headline.source)
            .bind(&published)
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO headlines (feed_id, title, title_key, url, source, published, fetched_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(feed_id)
        .bind(&headline.title)
        .bind(&title_key)
        .bind(&headline.url)
        .bind(&headline.source)
        .bind(&published)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(true)
    }

    pub async fn get_latest_headlines(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<Headline>> {
        let headlines = sqlx::query_as::<_, Headline>(
            r#"
            SELECT * FROM headlines
            ORDER BY published DESC NULLS LAST, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(headlines)
    }

    pub async fn get_headline(&self, id: i64) -> anyhow::Result<Option<Headline>> {
        let headline = sqlx::query_as::<_, Headline>("SELECT * FROM headlines WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(headline)
    }

    pub async fn count_headlines(&self) -> anyhow::Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM headlines")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    pub async fn get_cartoon(&self, key: &str) -> anyhow::Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT image_url FROM cartoon_cache WHERE key = ? AND expires_at > ?")
                .bind(key)
                .bind(timestamp(Utc::now()))
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|r| r.0))
    }

    pub async fn put_cartoon(
        &self,
        key: &str,
        headline: &str,
        image_url: &str,
        ttl: Duration,
    ) -> anyhow::Result<()> {
        let (created_at, expires_at) = expiry(ttl);
        sqlx::query(
            r#"
            INSERT INTO cartoon_cache (key, headline, image_url, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                headline = excluded.headline,
                image_url = excluded.image_url,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(headline)
        .bind(image_url)
        .bind(&created_at)
        .bind(&expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_explanation(&self, key: &str) -> anyhow::Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT explanation FROM explanation_cache WHERE key = ? AND expires_at > ?",
        )
        .bind(key)
        .bind(timestamp(Utc::now()))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.0))
    }

    pub async fn put_explanation(
        &self,
        key: &str,
        headline: &str,
        explanation: &str,
        ttl: Duration,
    ) -> anyhow::Result<()> {
        let (created_at, expires_at) = expiry(ttl);
        sqlx::query(
            r#"
            INSERT INTO explanation_cache (key, headline, explanation, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                headline = excluded.headline,
                explanation = excluded.explanation,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(headline)
        .bind(explanation)
        .bind(&created_at)
        .bind(&expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_tts(&self, text_hash: &str, voice_id: &str) -> anyhow::Result<Option<AudioClip>> {
        let row: Option<(Vec<u8>, String)> = sqlx::query_as(
            r#"
            SELECT audio, content_type FROM tts_cache
            WHERE text_hash = ? AND voice_id = ? AND expires_at > ?
            "#,
        )
        .bind(text_hash)
        .bind(voice_id)
        .bind(timestamp(Utc::now()))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(audio, content_type)| AudioClip {
            audio,
            content_type,
        }))
    }

    pub async fn put_tts(
        &self,
        text_hash: &str,
        voice_id: &str,
        audio: &AudioClip,
        ttl: Duration,
    ) -> anyhow::Result<()> {
        let (created_at, expires_at) = expiry(ttl);
        sqlx::query(
            r#"
            INSERT INTO tts_cache (text_hash, voice_id, audio, content_type, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(text_hash, voice_id) DO UPDATE SET
                audio = excluded.audio,
                content_type = excluded.content_type,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(text_hash)
        .bind(voice_id)
        .bind(&audio.audio)
        .bind(&audio.content_type)
        .bind(&created_at)
        .bind(&expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete stale entries from every cache table. Returns the number of
    /// rows removed.
    pub async fn purge_expired(&self) -> anyhow::Result<u64> {
        let now = timestamp(Utc::now());
        let mut removed = 0;
        for table in ["cartoon_cache", "explanation_cache", "tts_cache"] {
            let result = sqlx::query(&format!("DELETE FROM {} WHERE expires_at <= ?", table))
                .bind(&now)
                .execute(&self.pool)
                .await?;
            removed += result.rows_affected();
        }
        Ok(removed)
    }
}
