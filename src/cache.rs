//! Durable result cache, keyed by the exact candidate string that produced a
//! resolution. Every upsert commits before the next record is processed, so
//! an interrupted batch resumes warm instead of re-querying providers.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};

use crate::errors::{AppError, AppResult};
use crate::records::{ApproximationLevel, Source};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS geocode_cache (
    query TEXT PRIMARY KEY,
    lat REAL NOT NULL,
    lng REAL NOT NULL,
    confidence REAL,
    formatted TEXT,
    components TEXT NOT NULL DEFAULT '{}',
    source TEXT NOT NULL,
    approximation TEXT,
    resolved_at TEXT NOT NULL
)";

/// Cached resolution, minus the query string (that is the key).
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub lat: f64,
    pub lng: f64,
    pub confidence: Option<f64>,
    pub formatted: Option<String>,
    pub components: BTreeMap<String, String>,
    pub source: Source,
    pub approximation: Option<ApproximationLevel>,
}

pub struct ResultCache {
    conn: Mutex<Connection>,
}

impl ResultCache {
    pub fn open<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::bootstrap(conn)
    }

    pub fn in_memory() -> AppResult<Self> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(conn: Connection) -> AppResult<Self> {
        conn.execute(SCHEMA, [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn get(&self, query: &str) -> AppResult<Option<CacheEntry>> {
        let row = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT lat, lng, confidence, formatted, components, source, approximation
                FROM geocode_cache
                WHERE query = ?1",
                [query],
                |row| {
                    Ok((
                        row.get::<_, f64>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, Option<f64>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, Option<String>>(6)?,
                    ))
                },
            )
            .optional()?
        };

        let Some((lat, lng, confidence, formatted, components, source, approximation)) = row
        else {
            return Ok(None);
        };

        let source = Source::parse(&source)
            .ok_or_else(|| AppError::Input(format!("unknown cached source tag: {source}")))?;
        let approximation = match approximation {
            Some(tag) => Some(ApproximationLevel::parse(&tag).ok_or_else(|| {
                AppError::Input(format!("unknown cached approximation tag: {tag}"))
            })?),
            None => None,
        };

        Ok(Some(CacheEntry {
            lat,
            lng,
            confidence,
            formatted,
            components: serde_json::from_str(&components)?,
            source,
            approximation,
        }))
    }

    pub fn upsert(&self, query: &str, entry: &CacheEntry) -> AppResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO geocode_cache
                (query, lat, lng, confidence, formatted, components, source, approximation, resolved_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(query) DO UPDATE SET
                lat = excluded.lat,
                lng = excluded.lng,
                confidence = excluded.confidence,
                formatted = excluded.formatted,
                components = excluded.components,
                source = excluded.source,
                approximation = excluded.approximation,
                resolved_at = excluded.resolved_at",
            (
                query,
                entry.lat,
                entry.lng,
                entry.confidence,
                entry.formatted.as_deref(),
                serde_json::to_string(&entry.components)?,
                entry.source.as_str(),
                entry.approximation.map(|a| a.as_str()),
                Utc::now().to_rfc3339(),
            ),
        )?;
        Ok(())
    }

    pub fn len(&self) -> AppResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM geocode_cache", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> AppResult<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry() -> CacheEntry {
        CacheEntry {
            lat: 22.9999,
            lng: 120.2270,
            confidence: Some(9.0),
            formatted: Some("臺南市永康區中華路100號".into()),
            components: BTreeMap::from([("county".to_string(), "臺南市".to_string())]),
            source: Source::PrimaryProvider,
            approximation: None,
        }
    }

    #[test]
    fn upsert_and_get_round_trip() {
        let cache = ResultCache::in_memory().unwrap();
        assert!(cache.is_empty().unwrap());
        assert!(cache.get("臺南市永康區中華路100號").unwrap().is_none());

        let entry = sample_entry();
        cache.upsert("臺南市永康區中華路100號", &entry).unwrap();
        let fetched = cache.get("臺南市永康區中華路100號").unwrap().unwrap();
        assert_eq!(fetched, entry);
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[test]
    fn upsert_overwrites_existing_key() {
        let cache = ResultCache::in_memory().unwrap();
        let mut entry = sample_entry();
        cache.upsert("key", &entry).unwrap();

        entry.lat = 23.5;
        entry.source = Source::StreetFallback;
        entry.approximation = Some(ApproximationLevel::Street);
        cache.upsert("key", &entry).unwrap();

        let fetched = cache.get("key").unwrap().unwrap();
        assert_eq!(fetched.lat, 23.5);
        assert_eq!(fetched.source, Source::StreetFallback);
        assert_eq!(fetched.approximation, Some(ApproximationLevel::Street));
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[test]
    fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        {
            let cache = ResultCache::open(&path).unwrap();
            cache.upsert("key", &sample_entry()).unwrap();
        }

        let reopened = ResultCache::open(&path).unwrap();
        assert_eq!(reopened.get("key").unwrap().unwrap(), sample_entry());
    }
}
