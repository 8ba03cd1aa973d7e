//! Two-tier cache of extraction results keyed by content fingerprint and
//! the extraction settings that produced them.
//!
//! **L1** – [`DashMap`] in-memory map (lock-free concurrent reads).
//! **L2** – Optional SQLite database on disk (persists across process restarts).
//!
//! On [`lookup`](ResultCache::lookup): check L1 first; on miss, fall through
//! to L2 and promote the entry into L1 on hit. On [`put`](ResultCache::put):
//! write-through to both tiers.
//!
//! The settings tag is part of the key: a result computed with the model or
//! OCR switched off, or with a different page budget, is never served to a
//! run configured otherwise. Every entry also carries the pipeline version
//! that produced it. An entry from another version is reported as
//! [`CacheLookup::Stale`] and never returned as a hit; the next `put` for that
//! key replaces it. Each write is a single `INSERT OR REPLACE`, so a reader
//! sees either the old row or the new one.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use rusqlite::{Connection, OpenFlags, params};
use thiserror::Error;

use crate::error::Warning;
use crate::model::ExtractionResult;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("failed to open cache database at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("cache database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to encode cached result: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("cache writer lock poisoned")]
    Poisoned,
}

/// A stored result with the page count of the document it came from and
/// the warnings raised while computing it.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedRecord {
    pub result: ExtractionResult,
    pub page_count: usize,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(CachedRecord),
    Miss,
    /// An entry exists but was written by another pipeline version.
    Stale { found_version: String },
}

/// Counters reported by `folio cache stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stale: u64,
    pub entries: usize,
    pub disk_entries: usize,
    pub persistent: bool,
}

#[derive(Clone, Debug)]
struct CacheEntry {
    version: String,
    record: CachedRecord,
}

/// Open a SQLite connection with WAL mode and standard pragmas.
fn open_sqlite(path: &Path, read_only: bool) -> Result<Connection, rusqlite::Error> {
    let flags = if read_only {
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
    } else {
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
    };
    let conn = Connection::open_with_flags(path, flags)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(conn)
}

/// The single writer connection (puts and clears).
struct SqliteWriter {
    conn: Connection,
}

impl SqliteWriter {
    fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = open_sqlite(path, false)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS result_cache (
                 fingerprint    TEXT NOT NULL,
                 settings       TEXT NOT NULL,
                 version        TEXT NOT NULL,
                 page_count     INTEGER NOT NULL,
                 result_json    TEXT NOT NULL,
                 warnings_json  TEXT NOT NULL DEFAULT '[]',
                 inserted_at    INTEGER NOT NULL,
                 PRIMARY KEY (fingerprint, settings)
             );",
        )?;
        Ok(Self { conn })
    }

    fn put(&self, fingerprint: &str, settings: &str, row: &StoredRow) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT OR REPLACE INTO result_cache
                 (fingerprint, settings, version, page_count, result_json, warnings_json, inserted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                fingerprint,
                settings,
                row.version,
                row.page_count as i64,
                row.result_json,
                row.warnings_json,
                now_epoch() as i64
            ],
        )?;
        Ok(())
    }

    fn clear(&self) -> Result<usize, rusqlite::Error> {
        let removed = self.conn.execute("DELETE FROM result_cache", [])?;
        // Without VACUUM the deleted pages stay allocated in the file.
        if let Err(e) = self.conn.execute_batch("VACUUM") {
            tracing::warn!(error = %e, "cache VACUUM failed; rows were deleted");
        }
        Ok(removed)
    }

    fn count(&self) -> usize {
        self.conn
            .query_row("SELECT COUNT(*) FROM result_cache", [], |row| row.get(0))
            .unwrap_or(0)
    }
}

struct StoredRow {
    version: String,
    page_count: usize,
    result_json: String,
    warnings_json: String,
}

/// Pool of read-only SQLite connections for concurrent L2 lookups.
///
/// WAL mode lets each reader proceed while the writer commits. Connections
/// are returned to the pool after use; an empty pool opens a new one.
struct ReadPool {
    pool: Mutex<Vec<Connection>>,
    path: PathBuf,
}

impl ReadPool {
    fn new(path: &Path) -> Self {
        Self {
            pool: Mutex::new(Vec::new()),
            path: path.to_path_buf(),
        }
    }

    fn acquire(&self) -> Option<Connection> {
        if let Ok(mut pool) = self.pool.lock()
            && let Some(conn) = pool.pop()
        {
            return Some(conn);
        }
        open_sqlite(&self.path, true).ok()
    }

    fn release(&self, conn: Connection) {
        if let Ok(mut pool) = self.pool.lock() {
            pool.push(conn);
        }
    }

    fn get(&self, fingerprint: &str, settings: &str) -> Option<StoredRow> {
        let conn = self.acquire()?;
        let row = Self::query(&conn, fingerprint, settings);
        self.release(conn);
        row
    }

    fn query(conn: &Connection, fingerprint: &str, settings: &str) -> Option<StoredRow> {
        let mut stmt = conn
            .prepare_cached(
                "SELECT version, page_count, result_json, warnings_json
                 FROM result_cache
                 WHERE fingerprint = ?1 AND settings = ?2",
            )
            .ok()?;
        stmt.query_row(params![fingerprint, settings], |row| {
            let page_count: i64 = row.get(1)?;
            Ok(StoredRow {
                version: row.get(0)?,
                page_count: usize::try_from(page_count).unwrap_or(0),
                result_json: row.get(2)?,
                warnings_json: row.get(3)?,
            })
        })
        .ok()
    }
}

fn decode_row(row: &StoredRow) -> Result<CachedRecord, serde_json::Error> {
    Ok(CachedRecord {
        result: serde_json::from_str(&row.result_json)?,
        page_count: row.page_count,
        warnings: serde_json::from_str(&row.warnings_json)?,
    })
}

fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

type CacheKey = (String, String);

fn cache_key(fingerprint: &str, settings: &str) -> CacheKey {
    (fingerprint.to_string(), settings.to_string())
}

/// Thread-safe two-tier result cache.
///
/// L1: [`DashMap`] shared by every worker.
/// L2: Optional SQLite database. Reads use a [`ReadPool`] of concurrent
///     connections; writes go through a single [`SqliteWriter`] behind a
///     [`Mutex`].
pub struct ResultCache {
    version: String,
    entries: DashMap<CacheKey, CacheEntry>,
    sqlite_writer: Option<Mutex<SqliteWriter>>,
    read_pool: Option<ReadPool>,
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
}

impl ResultCache {
    /// In-memory-only cache (no persistence).
    pub fn in_memory(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            entries: DashMap::new(),
            sqlite_writer: None,
            read_pool: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale: AtomicU64::new(0),
        }
    }

    /// Open a persistent cache backed by a SQLite database at `path`.
    pub fn open(path: &Path, version: impl Into<String>) -> Result<Self, CacheError> {
        let writer = SqliteWriter::open(path).map_err(|source| CacheError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            sqlite_writer: Some(Mutex::new(writer)),
            read_pool: Some(ReadPool::new(path)),
            ..Self::in_memory(version)
        })
    }

    /// Pipeline version stamped on every write and required on every hit.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Look up `fingerprint` under `settings`, distinguishing a miss from a
    /// stale entry.
    pub fn lookup(&self, fingerprint: &str, settings: &str) -> CacheLookup {
        let key = cache_key(fingerprint, settings);
        if let Some(entry) = self.entries.get(&key) {
            if entry.version == self.version {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(fingerprint, settings, "cache L1 hit");
                return CacheLookup::Hit(entry.record.clone());
            }
            let found_version = entry.version.clone();
            drop(entry);
            return self.stale_lookup(fingerprint, found_version);
        }

        if let Some(pool) = &self.read_pool
            && let Some(row) = pool.get(fingerprint, settings)
        {
            if row.version != self.version {
                return self.stale_lookup(fingerprint, row.version);
            }
            match decode_row(&row) {
                Ok(record) => {
                    tracing::trace!(fingerprint, settings, "cache L2 hit, promoting to L1");
                    self.entries.insert(
                        key,
                        CacheEntry {
                            version: row.version,
                            record: record.clone(),
                        },
                    );
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return CacheLookup::Hit(record);
                }
                Err(e) => {
                    tracing::warn!(fingerprint, error = %e, "undecodable cache row, treating as miss");
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(fingerprint, settings, "cache miss");
        CacheLookup::Miss
    }

    fn stale_lookup(&self, fingerprint: &str, found_version: String) -> CacheLookup {
        self.stale.fetch_add(1, Ordering::Relaxed);
        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            fingerprint,
            found_version = %found_version,
            current_version = %self.version,
            "stale cache entry ignored"
        );
        CacheLookup::Stale { found_version }
    }

    /// The cached result for `fingerprint` under `settings` and the current
    /// version.
    pub fn get(&self, fingerprint: &str, settings: &str) -> Option<ExtractionResult> {
        match self.lookup(fingerprint, settings) {
            CacheLookup::Hit(record) => Some(record.result),
            CacheLookup::Miss | CacheLookup::Stale { .. } => None,
        }
    }

    /// Store `record` under the current version, replacing any previous
    /// entry for the same key. A failed disk write is retried once; if it
    /// still fails the in-memory tier keeps the entry and the error is
    /// returned.
    ///
    /// Both tiers are updated under the writer lock, so concurrent writers
    /// of one key leave L1 and L2 holding the same record.
    pub fn put(&self, fingerprint: &str, settings: &str, record: &CachedRecord) -> Result<(), CacheError> {
        let key = cache_key(fingerprint, settings);
        let entry = CacheEntry {
            version: self.version.clone(),
            record: record.clone(),
        };

        let Some(writer) = &self.sqlite_writer else {
            self.entries.insert(key, entry);
            return Ok(());
        };

        let row = StoredRow {
            version: self.version.clone(),
            page_count: record.page_count,
            result_json: serde_json::to_string(&record.result)?,
            warnings_json: serde_json::to_string(&record.warnings)?,
        };
        let Ok(store) = writer.lock() else {
            self.entries.insert(key, entry);
            return Err(CacheError::Poisoned);
        };
        let disk = store.put(fingerprint, settings, &row).or_else(|first| {
            tracing::debug!(fingerprint, error = %first, "cache write failed, retrying");
            store.put(fingerprint, settings, &row)
        });
        self.entries.insert(key, entry);
        drop(store);
        disk.map_err(CacheError::from)
    }

    /// Remove all entries from both tiers. Returns how many entries the
    /// persistent tier held, or the in-memory tier without persistence.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let Some(writer) = &self.sqlite_writer else {
            let removed = self.entries.len();
            self.entries.clear();
            return Ok(removed);
        };
        let store = writer.lock().map_err(|_| CacheError::Poisoned)?;
        self.entries.clear();
        Ok(store.clear()?)
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Misses, stale lookups included.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn stale(&self) -> u64 {
        self.stale.load(Ordering::Relaxed)
    }

    /// Entries in the L1 in-memory tier.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rows in the L2 store (0 without persistence).
    pub fn disk_len(&self) -> usize {
        self.sqlite_writer
            .as_ref()
            .and_then(|w| w.lock().ok().map(|store| store.count()))
            .unwrap_or(0)
    }

    pub fn has_persistence(&self) -> bool {
        self.sqlite_writer.is_some()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits(),
            misses: self.misses(),
            stale: self.stale(),
            entries: self.len(),
            disk_entries: self.disk_len(),
            persistent: self.has_persistence(),
        }
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("version", &self.version)
            .field("l1_entries", &self.entries.len())
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .field("stale", &self.stale())
            .field("persistent", &self.has_persistence())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WarningKind;
    use crate::model::{Confidence, Field, Source};
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;

    static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn temp_cache_path() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!(
            "folio_test_cache_{}_{}",
            std::process::id(),
            id,
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("results.db");
        let _ = std::fs::remove_file(&path);
        path
    }

    const SETTINGS: &str = "pages=3;ocr=off;llm=off";

    fn record(title: &str, page_count: usize) -> CachedRecord {
        CachedRecord {
            result: sample(title),
            page_count,
            warnings: Vec::new(),
        }
    }

    fn sample(title: &str) -> ExtractionResult {
        ExtractionResult {
            title: Field::found(title, Confidence::High, Source::Heuristic),
            date: Field::found("2023-03-15", Confidence::High, Source::Heuristic),
            volume_issue: Field::empty(),
            description: Field::found("A report.", Confidence::High, Source::Llm),
        }
    }

    #[test]
    fn miss_on_empty() {
        let cache = ResultCache::in_memory("v1");
        assert_eq!(cache.lookup("abc", SETTINGS), CacheLookup::Miss);
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 0);
    }

    #[test]
    fn put_then_get_round_trips() {
        let cache = ResultCache::in_memory("v1");
        let stored = record("Annual Report", 12);
        cache.put("abc", SETTINGS, &stored).unwrap();
        assert_eq!(cache.lookup("abc", SETTINGS), CacheLookup::Hit(stored.clone()));
        assert_eq!(cache.get("abc", SETTINGS), Some(stored.result));
        assert_eq!(cache.hits(), 2);
    }

    #[test]
    fn other_settings_are_a_miss() {
        let cache = ResultCache::in_memory("v1");
        cache.put("abc", "llm=off", &record("Offline", 1)).unwrap();
        assert_eq!(cache.lookup("abc", "llm=gpt-4"), CacheLookup::Miss);
        assert_eq!(cache.stale(), 0);

        cache.put("abc", "llm=gpt-4", &record("Online", 1)).unwrap();
        let title = |settings| {
            cache
                .get("abc", settings)
                .and_then(|r| r.title.value().map(String::from))
        };
        assert_eq!(title("llm=off").as_deref(), Some("Offline"));
        assert_eq!(title("llm=gpt-4").as_deref(), Some("Online"));
    }

    #[test]
    fn warnings_survive_restart() {
        let path = temp_cache_path();
        let cache = ResultCache::open(&path, "v1").unwrap();
        let stored = CachedRecord {
            warnings: vec![
                Warning::new(WarningKind::PageExtractionDegraded, "OCR produced no text").on_page(1),
            ],
            ..record("Scanned", 2)
        };
        cache.put("fp", SETTINGS, &stored).unwrap();
        drop(cache);

        let reopened = ResultCache::open(&path, "v1").unwrap();
        match reopened.lookup("fp", SETTINGS) {
            CacheLookup::Hit(hit) => assert_eq!(hit.warnings, stored.warnings),
            other => panic!("expected hit, got {other:?}"),
        }
    }

    #[test]
    fn version_change_is_stale_then_overwritten() {
        let path = temp_cache_path();
        let old = ResultCache::open(&path, "v1").unwrap();
        old.put("abc", SETTINGS, &record("Old", 3)).unwrap();
        drop(old);

        let cache = ResultCache::open(&path, "v2").unwrap();
        assert_eq!(
            cache.lookup("abc", SETTINGS),
            CacheLookup::Stale {
                found_version: "v1".into()
            }
        );
        assert_eq!(cache.get("abc", SETTINGS), None);
        assert_eq!(cache.stale(), 2);

        cache.put("abc", SETTINGS, &record("New", 3)).unwrap();
        drop(cache);
        let reopened = ResultCache::open(&path, "v2").unwrap();
        assert_eq!(
            reopened.get("abc", SETTINGS).and_then(|r| r.title.value().map(String::from)),
            Some("New".to_string())
        );
        assert_eq!(reopened.disk_len(), 1);
    }

    #[test]
    fn sqlite_persists_across_restart_and_promotes() {
        let path = temp_cache_path();
        let cache = ResultCache::open(&path, "v1").unwrap();
        cache.put("fp1", SETTINGS, &record("Persisted", 5)).unwrap();
        assert_eq!(cache.disk_len(), 1);
        drop(cache);

        let cache = ResultCache::open(&path, "v1").unwrap();
        assert!(cache.is_empty());
        match cache.lookup("fp1", SETTINGS) {
            CacheLookup::Hit(record) => {
                assert_eq!(record.page_count, 5);
                assert_eq!(record.result.title.value(), Some("Persisted"));
            }
            other => panic!("expected hit, got {other:?}"),
        }
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn undecodable_row_is_a_miss() {
        let path = temp_cache_path();
        let cache = ResultCache::open(&path, "v1").unwrap();
        cache.put("fp1", SETTINGS, &record("x", 1)).unwrap();
        drop(cache);

        let conn = Connection::open(&path).unwrap();
        conn.execute("UPDATE result_cache SET result_json = 'not json'", [])
            .unwrap();
        drop(conn);

        let cache = ResultCache::open(&path, "v1").unwrap();
        assert_eq!(cache.lookup("fp1", SETTINGS), CacheLookup::Miss);
    }

    #[test]
    fn failed_disk_write_is_reported_but_kept_in_memory() {
        let path = temp_cache_path();
        let cache = ResultCache::open(&path, "v1").unwrap();
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch("DROP TABLE result_cache").unwrap();
        drop(conn);

        let err = cache.put("fp1", SETTINGS, &record("x", 1));
        assert!(matches!(err, Err(CacheError::Sqlite(_))));
        assert!(cache.get("fp1", SETTINGS).is_some());
    }

    #[test]
    fn clear_empties_both_tiers() {
        let path = temp_cache_path();
        let cache = ResultCache::open(&path, "v1").unwrap();
        cache.put("a", SETTINGS, &record("A", 1)).unwrap();
        cache.put("b", SETTINGS, &record("B", 1)).unwrap();
        assert_eq!(cache.stats().disk_entries, 2);
        assert_eq!(cache.clear().unwrap(), 2);
        assert!(cache.is_empty());
        assert_eq!(cache.disk_len(), 0);
        assert_eq!(cache.lookup("a", SETTINGS), CacheLookup::Miss);
    }

    #[test]
    fn failed_clear_is_reported() {
        let path = temp_cache_path();
        let cache = ResultCache::open(&path, "v1").unwrap();
        cache.put("a", SETTINGS, &record("A", 1)).unwrap();
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch("DROP TABLE result_cache").unwrap();
        drop(conn);

        assert!(matches!(cache.clear(), Err(CacheError::Sqlite(_))));
    }

    #[test]
    fn concurrent_puts_same_fingerprint_last_writer_wins() {
        let path = temp_cache_path();
        let cache = Arc::new(ResultCache::open(&path, "v1").unwrap());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let c = cache.clone();
                std::thread::spawn(move || {
                    c.put("same", SETTINGS, &record(&format!("Writer {i}"), 1))
                        .unwrap();
                    assert!(c.get("same", SETTINGS).is_some());
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.disk_len(), 1);
        let title = cache
            .get("same", SETTINGS)
            .and_then(|r| r.title.value().map(String::from));
        assert!(title.as_deref().is_some_and(|t| t.starts_with("Writer ")));

        // Memory and disk agree on the winner.
        drop(cache);
        let reopened = ResultCache::open(&path, "v1").unwrap();
        let on_disk = reopened
            .get("same", SETTINGS)
            .and_then(|r| r.title.value().map(String::from));
        assert_eq!(on_disk, title);
    }

    #[test]
    fn in_memory_has_no_persistence() {
        let cache = ResultCache::in_memory("v1");
        assert!(!cache.has_persistence());
        assert_eq!(cache.disk_len(), 0);
        assert_eq!(cache.version(), "v1");
    }
}
