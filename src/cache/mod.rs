//! Persistent phrase audio cache
//!
//! Audio synthesized by the remote provider is stored in `SQLite`, keyed by
//! [`CacheKey`], so that a populated board keeps speaking offline and across
//! restarts. The database is opened lazily on first use.

mod key;
pub mod pregen;
mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use serde::Serialize;

use crate::voice::VoiceIdentity;
use crate::{Error, Result};

pub use key::CacheKey;
pub use pregen::{Pacer, PregenEvent, PregenPlan, PregenProgress, PregenSummary, bulk_populate};
pub use schema::SCHEMA_VERSION;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Pooled database connection
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// How long to wait for a pooled connection before reporting the store unavailable
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the cache lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// `SQLite` file on disk
    File(PathBuf),
    /// Private in-memory database (tests, ephemeral sessions)
    Memory,
}

/// A cached phrase with its audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub source_text: String,
    pub voice: VoiceIdentity,
    pub audio: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// A cached phrase without its audio, for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntrySummary {
    pub key: String,
    pub source_text: String,
    pub voice: VoiceIdentity,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// Aggregate cache statistics, computed on demand
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entry_count: u64,
    pub total_bytes: u64,
}

/// Content-addressed store of synthesized phrase audio
///
/// Cloning is cheap; clones share the same database.
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    location: StoreLocation,
    pool: OnceLock<DbPool>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("location", &self.inner.location)
            .field("open", &self.inner.pool.get().is_some())
            .finish()
    }
}

impl CacheStore {
    /// Create a store; nothing is opened until the first operation
    #[must_use]
    pub fn new(location: StoreLocation) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                location,
                pool: OnceLock::new(),
            }),
        }
    }

    /// Create a store backed by an `SQLite` file
    #[must_use]
    pub fn file<P: AsRef<Path>>(path: P) -> Self {
        Self::new(StoreLocation::File(path.as_ref().to_path_buf()))
    }

    /// Create a private in-memory store
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(StoreLocation::Memory)
    }

    #[must_use]
    pub fn location(&self) -> &StoreLocation {
        &self.inner.location
    }

    /// Look up cached audio for a phrase
    ///
    /// A missing entry is `Ok(None)`, never an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the database cannot be opened
    pub fn get(&self, text: &str, voice: VoiceIdentity) -> Result<Option<Vec<u8>>> {
        let key = CacheKey::derive(text, voice);
        let conn = self.conn()?;

        let result = conn.query_row(
            "SELECT audio FROM audio_cache WHERE key = ?1",
            rusqlite::params![key.as_str()],
            |row| row.get::<_, Vec<u8>>(0),
        );

        match result {
            Ok(audio) => {
                tracing::debug!(key = %key, voice = %voice, bytes = audio.len(), "cache hit");
                Ok(Some(audio))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                tracing::debug!(key = %key, voice = %voice, "cache miss");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Whether audio for a phrase is already cached
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the database cannot be opened
    pub fn contains(&self, text: &str, voice: VoiceIdentity) -> Result<bool> {
        let key = CacheKey::derive(text, voice);
        let conn = self.conn()?;

        let found: i64 = conn.query_row(
            "SELECT COUNT(*) FROM audio_cache WHERE key = ?1",
            rusqlite::params![key.as_str()],
            |row| row.get(0),
        )?;

        Ok(found > 0)
    }

    /// Fetch the full entry for a phrase
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the database cannot be opened
    pub fn entry(&self, text: &str, voice: VoiceIdentity) -> Result<Option<CacheEntry>> {
        let key = CacheKey::derive(text, voice);
        let conn = self.conn()?;

        let result = conn.query_row(
            "SELECT text, voice, audio, created_at FROM audio_cache WHERE key = ?1",
            rusqlite::params![key.as_str()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        );

        match result {
            Ok((source_text, voice, audio, created_at)) => Ok(Some(CacheEntry {
                key,
                source_text,
                voice: VoiceIdentity::normalize(&voice),
                audio,
                created_at: parse_timestamp(&created_at),
            })),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Store audio for a phrase, replacing any previous entry for the same key
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` or `StorageQuotaExceeded` if the write fails
    pub fn put(&self, text: &str, voice: VoiceIdentity, audio: &[u8]) -> Result<()> {
        let key = CacheKey::derive(text, voice);
        let conn = self.conn()?;

        conn.execute(
            r"
            INSERT OR REPLACE INTO audio_cache (key, text, voice, audio, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            rusqlite::params![
                key.as_str(),
                text,
                voice.as_str(),
                audio,
                Utc::now().to_rfc3339(),
            ],
        )?;

        tracing::debug!(key = %key, voice = %voice, bytes = audio.len(), "cached audio");
        Ok(())
    }

    /// Count entries and bytes with a full scan
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the database cannot be opened
    pub fn stats(&self) -> Result<CacheStats> {
        let conn = self.conn()?;

        let (entry_count, total_bytes): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(length(audio)), 0) FROM audio_cache",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(CacheStats {
            entry_count: u64::try_from(entry_count).unwrap_or_default(),
            total_bytes: u64::try_from(total_bytes).unwrap_or_default(),
        })
    }

    /// List cached phrases, newest first
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the database cannot be opened
    pub fn entries(&self) -> Result<Vec<CacheEntrySummary>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            r"
            SELECT key, text, voice, length(audio), created_at
            FROM audio_cache
            ORDER BY created_at DESC, text ASC
            ",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(CacheEntrySummary {
                key: row.get(0)?,
                source_text: row.get(1)?,
                voice: VoiceIdentity::normalize(&row.get::<_, String>(2)?),
                size: u64::try_from(row.get::<_, i64>(3)?).unwrap_or_default(),
                created_at: parse_timestamp(&row.get::<_, String>(4)?),
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Remove every entry
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the database cannot be opened
    pub fn clear(&self) -> Result<()> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM audio_cache", [])?;

        tracing::info!(removed, "audio cache cleared");
        Ok(())
    }

    fn conn(&self) -> Result<DbConn> {
        Ok(self.pool()?.get()?)
    }

    fn pool(&self) -> Result<&DbPool> {
        if let Some(pool) = self.inner.pool.get() {
            return Ok(pool);
        }

        let pool = open(&self.inner.location)?;
        Ok(self.inner.pool.get_or_init(|| pool))
    }
}

/// Open a pool and run migrations
fn open(location: &StoreLocation) -> Result<DbPool> {
    let (manager, max_size) = match location {
        StoreLocation::File(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::StorageUnavailable(format!(
                        "cannot create {}: {e}",
                        parent.display()
                    ))
                })?;
            }
            (SqliteConnectionManager::file(path), 4)
        }
        // Every in-memory connection is its own database, so keep exactly one
        StoreLocation::Memory => (SqliteConnectionManager::memory(), 1),
    };

    let pool = Pool::builder()
        .max_size(max_size)
        .connection_timeout(CONNECTION_TIMEOUT)
        .build(manager)
        .map_err(|e| Error::StorageUnavailable(e.to_string()))?;

    let conn = pool.get()?;
    schema::init(&conn)?;

    tracing::info!(location = ?location, version = SCHEMA_VERSION, "audio cache opened");
    Ok(pool)
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|t| t.and_utc())
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_is_lazy() {
        let store = CacheStore::in_memory();
        assert!(store.inner.pool.get().is_none());

        store.stats().unwrap();
        assert!(store.inner.pool.get().is_some());
    }

    #[test]
    fn test_round_trip() {
        let store = CacheStore::in_memory();
        let audio = vec![0xff, 0xfb, 0x90, 0x00, 0x01];

        store.put("Tubig", VoiceIdentity::Female, &audio).unwrap();

        assert_eq!(store.get("Tubig", VoiceIdentity::Female).unwrap(), Some(audio));
        assert_eq!(store.get("Tubig", VoiceIdentity::Male).unwrap(), None);
    }

    #[test]
    fn test_put_replaces() {
        let store = CacheStore::in_memory();
        store.put("Kain", VoiceIdentity::Child, b"first").unwrap();
        store.put("Kain", VoiceIdentity::Child, b"second!").unwrap();

        assert_eq!(
            store.get("Kain", VoiceIdentity::Child).unwrap().as_deref(),
            Some(&b"second!"[..])
        );
        assert_eq!(
            store.stats().unwrap(),
            CacheStats {
                entry_count: 1,
                total_bytes: 7
            }
        );
    }

    #[test]
    fn test_entry_metadata() {
        let store = CacheStore::in_memory();
        store.put("Salamat po", VoiceIdentity::Female, b"abc").unwrap();

        let entry = store
            .entry("Salamat po", VoiceIdentity::Female)
            .unwrap()
            .unwrap();
        assert_eq!(entry.key, CacheKey::derive("Salamat po", VoiceIdentity::Female));
        assert_eq!(entry.source_text, "Salamat po");
        assert_eq!(entry.voice, VoiceIdentity::Female);
        assert_eq!(entry.audio, b"abc");
        assert!(entry.created_at > DateTime::<Utc>::default());
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert_eq!(
            parse_timestamp("2026-01-02 03:04:05").to_rfc3339(),
            "2026-01-02T03:04:05+00:00"
        );
        assert_eq!(parse_timestamp("garbage"), DateTime::<Utc>::default());
    }
}
