//! SQLite code store bound to a single source file.

use super::manifest::{find_manifest, IndexManifest, MANIFEST_FILE_NAME};
use super::CodeLookup;
use crate::config::IndexConfig;
use crate::freshness::{artifact_path, is_fresh};
use crate::normalize::normalize_code;
use crate::{IndexError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Database file inside the index directory.
const DB_FILE_NAME: &str = "codes.sqlite";

const INSERT_SQL: &str = "INSERT OR IGNORE INTO codes (code) VALUES (?1)";
const LOOKUP_SQL: &str = "SELECT 1 FROM codes WHERE code = ?1";
const SCAN_SQL: &str = "SELECT code FROM codes";

/// What `ensure_built` found on disk.
#[derive(Debug)]
enum StoreState {
    Missing,
    Stale,
    Reusable(IndexManifest),
}

impl StoreState {
    fn inspect(source: &Path, index_dir: &Path) -> Result<Self> {
        if find_manifest(index_dir).is_none() {
            return Ok(StoreState::Missing);
        }
        let Some(manifest) = IndexManifest::load(index_dir) else {
            return Ok(StoreState::Stale);
        };
        if !index_dir.join(DB_FILE_NAME).is_file() || !is_fresh(source, index_dir)? {
            return Ok(StoreState::Stale);
        }
        Ok(StoreState::Reusable(manifest))
    }
}

/// A presence-only set of normalized codes derived from one source file.
///
/// Content reflects the source as of the last build. Lookups go through a
/// small pool of read-only connections; nothing writes after the build.
pub struct CodeStore {
    source_path: PathBuf,
    index_dir: PathBuf,
    manifest_path: PathBuf,
    readers: Vec<Mutex<Option<Connection>>>,
    next_reader: AtomicUsize,
    opened_at: DateTime<Utc>,
    record_count: u64,
    reused: bool,
}

impl CodeStore {
    /// Open the index for `source`, building it first if missing or stale.
    ///
    /// Any failure is returned as [`IndexError::Build`] naming `source`.
    /// A failed build removes its partially written index directory.
    pub fn ensure_built(source: impl AsRef<Path>, config: &IndexConfig) -> Result<Self> {
        let source = source.as_ref();
        Self::ensure_built_inner(source, config).map_err(|e| IndexError::build(source, e))
    }

    fn ensure_built_inner(source: &Path, config: &IndexConfig) -> Result<Self> {
        let index_dir = artifact_path(source, &config.index_suffix);

        let (manifest, reused) = match StoreState::inspect(source, &index_dir)? {
            StoreState::Reusable(manifest) => {
                info!("Found index for {}", source.display());
                (manifest, true)
            }
            state => {
                if matches!(state, StoreState::Stale) {
                    info!(
                        "Index for {} is stale or incomplete, rebuilding",
                        source.display()
                    );
                }
                (Self::rebuild(source, &index_dir, config)?, false)
            }
        };

        let manifest_path =
            find_manifest(&index_dir).unwrap_or_else(|| index_dir.join(MANIFEST_FILE_NAME));
        let readers = open_readers(&index_dir.join(DB_FILE_NAME), config.readers_per_store)?;

        Ok(Self {
            source_path: source.to_path_buf(),
            index_dir,
            manifest_path,
            readers,
            next_reader: AtomicUsize::new(0),
            opened_at: Utc::now(),
            record_count: manifest.record_count,
            reused,
        })
    }

    fn rebuild(source: &Path, index_dir: &Path, config: &IndexConfig) -> Result<IndexManifest> {
        info!("Building index for {}", source.display());
        let start = Instant::now();

        // Source must be readable before anything is removed or created.
        File::open(source).map_err(|e| IndexError::io_with_path(e, source))?;

        if index_dir.exists() {
            fs::remove_dir_all(index_dir).map_err(|e| IndexError::io_with_path(e, index_dir))?;
        }

        match build_index(source, index_dir, config.batch_size) {
            Ok(manifest) => {
                info!(
                    "Built index for {} ({} codes) in {:.2}s",
                    source.display(),
                    manifest.record_count,
                    start.elapsed().as_secs_f64()
                );
                Ok(manifest)
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(index_dir) {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        warn!(
                            "Failed to remove partial index {}: {}",
                            index_dir.display(),
                            cleanup
                        );
                    }
                }
                Err(e)
            }
        }
    }

    /// Whether `code` is in this store.
    ///
    /// Blank input is `Ok(false)` without touching the database.
    pub fn has(&self, code: &str) -> Result<bool> {
        let Some(code) = normalize_code(code) else {
            return Ok(false);
        };

        let guard = self.checkout();
        let conn = guard.as_ref().ok_or_else(|| IndexError::StoreClosed {
            path: self.source_path.clone(),
        })?;

        let found = conn
            .prepare_cached(LOOKUP_SQL)
            .and_then(|mut stmt| stmt.query_row(params![code], |_| Ok(())).optional())
            .map_err(|e| IndexError::Lookup {
                path: self.source_path.clone(),
                source: e,
            })?;

        Ok(found.is_some())
    }

    /// Visit every stored code, in key order.
    ///
    /// Holds one reader for the whole scan.
    pub fn for_each_code(&self, mut f: impl FnMut(&str)) -> Result<()> {
        let guard = self.checkout();
        let conn = guard.as_ref().ok_or_else(|| IndexError::StoreClosed {
            path: self.source_path.clone(),
        })?;

        let mut scan = || -> rusqlite::Result<()> {
            let mut stmt = conn.prepare(SCAN_SQL)?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let code: String = row.get(0)?;
                f(&code);
            }
            Ok(())
        };
        scan().map_err(|e| IndexError::Lookup {
            path: self.source_path.clone(),
            source: e,
        })
    }

    /// Pick a reader, preferring an idle one.
    ///
    /// A reader poisoned by a panicking caller is still usable: statements
    /// are reset when dropped, so the connection holds no half-done work.
    fn checkout(&self) -> MutexGuard<'_, Option<Connection>> {
        let n = self.readers.len();
        let start = self.next_reader.fetch_add(1, Ordering::Relaxed) % n;
        for i in 0..n {
            match self.readers[(start + i) % n].try_lock() {
                Ok(guard) => return guard,
                Err(TryLockError::Poisoned(poisoned)) => return poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => {}
            }
        }
        self.readers[start]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Release every connection. Safe to call more than once.
    pub fn close(&self) -> Result<()> {
        let mut first_err = None;
        let mut closed = 0usize;

        for slot in &self.readers {
            let conn = match slot.lock() {
                Ok(mut guard) => guard.take(),
                Err(poisoned) => poisoned.into_inner().take(),
            };
            if let Some(conn) = conn {
                closed += 1;
                if let Err((_, e)) = conn.close() {
                    first_err.get_or_insert(e);
                }
            }
        }

        if closed > 0 {
            debug!("Closed index for {}", self.source_path.display());
        }

        match first_err {
            Some(e) => Err(IndexError::Database {
                message: format!("Failed to close index for {}", self.source_path.display()),
                source: Some(e),
            }),
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.readers.iter().all(|slot| match slot.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        })
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    /// Marker file of the build this store serves. Its mtime identifies the
    /// index generation that derived artifacts must not predate.
    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Distinct codes stored, as recorded at build time.
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// True if an existing index was opened instead of built.
    pub fn was_reused(&self) -> bool {
        self.reused
    }
}

impl CodeLookup for CodeStore {
    fn has(&self, code: &str) -> Result<bool> {
        CodeStore::has(self, code)
    }
}

impl std::fmt::Debug for CodeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeStore")
            .field("source_path", &self.source_path)
            .field("index_dir", &self.index_dir)
            .field("record_count", &self.record_count)
            .field("reused", &self.reused)
            .field("opened_at", &self.opened_at)
            .finish()
    }
}

fn build_index(source: &Path, index_dir: &Path, batch_size: usize) -> Result<IndexManifest> {
    fs::create_dir_all(index_dir).map_err(|e| IndexError::io_with_path(e, index_dir))?;

    let mut conn = Connection::open(index_dir.join(DB_FILE_NAME))?;
    configure_writer(&conn)?;
    ensure_schema(&conn)?;

    let record_count = bulk_load(&mut conn, source, batch_size)?;

    // Fold the WAL into the main file so read-only connections need no side files.
    conn.query_row("PRAGMA journal_mode=DELETE", [], |_| Ok(()))?;
    conn.close().map_err(|(_, e)| IndexError::from(e))?;

    let manifest = IndexManifest::new(source, record_count);
    manifest.write(index_dir)?;
    Ok(manifest)
}

fn configure_writer(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=FULL;
        PRAGMA temp_store=MEMORY;
        ",
    )?;
    Ok(())
}

fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS codes (
            code TEXT PRIMARY KEY NOT NULL
        ) WITHOUT ROWID",
        [],
    )?;
    Ok(())
}

/// Stream `source` into the store, committing every `batch_size` rows.
///
/// Returns the number of distinct codes inserted.
fn bulk_load(conn: &mut Connection, source: &Path, batch_size: usize) -> Result<u64> {
    let file = File::open(source).map_err(|e| IndexError::io_with_path(e, source))?;
    let reader = BufReader::new(file);

    let mut tx = conn.transaction()?;
    let mut pending = 0usize;
    let mut inserted = 0u64;
    let mut batches = 0u64;

    for line in reader.lines() {
        let line = line.map_err(|e| IndexError::io_with_path(e, source))?;
        let Some(code) = normalize_code(&line) else {
            continue;
        };

        inserted += tx.prepare_cached(INSERT_SQL)?.execute(params![code])? as u64;
        pending += 1;

        if pending == batch_size {
            tx.commit()?;
            batches += 1;
            debug!(
                "Committed batch {} for {} ({} codes so far)",
                batches,
                source.display(),
                inserted
            );
            tx = conn.transaction()?;
            pending = 0;
        }
    }

    tx.commit()?;
    Ok(inserted)
}

fn open_readers(db_path: &Path, count: usize) -> Result<Vec<Mutex<Option<Connection>>>> {
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    (0..count.max(1))
        .map(|_| {
            let conn = Connection::open_with_flags(db_path, flags)?;
            conn.busy_timeout(std::time::Duration::from_secs(30))?;
            Ok(Mutex::new(Some(conn)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn write_txt_file(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.join(name);
        let mut content = String::new();
        for l in lines {
            content.push_str(l);
            content.push('\n');
        }
        fs::write(&path, content).unwrap();
        path
    }

    fn backdate(path: &Path) {
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(3600))
            .unwrap();
    }

    #[test]
    fn test_ensure_built_creates_and_loads() {
        let temp = TempDir::new().unwrap();
        let txt = write_txt_file(temp.path(), "codes.txt", &["abc123", "  DEF456  ", ""]);

        let store = CodeStore::ensure_built(&txt, &IndexConfig::default()).unwrap();

        assert_eq!(store.source_path(), txt.as_path());
        assert_eq!(store.index_dir(), artifact_path(&txt, ".idx").as_path());
        assert!(find_manifest(store.index_dir()).is_some());
        assert!(!store.was_reused());
        assert_eq!(store.record_count(), 2);

        assert!(store.has("abc123").unwrap());
        assert!(store.has("  def456  ").unwrap());
        assert!(!store.has("ZZZ999").unwrap());
        assert!(!store.has("   ").unwrap());

        store.close().unwrap();
    }

    #[test]
    fn test_reuses_existing_index() {
        let temp = TempDir::new().unwrap();
        let txt = write_txt_file(temp.path(), "codes.txt", &["FIRST123"]);
        backdate(&txt);

        let store1 = CodeStore::ensure_built(&txt, &IndexConfig::default()).unwrap();
        assert!(store1.has("FIRST123").unwrap());
        store1.close().unwrap();

        write_txt_file(temp.path(), "codes.txt", &["FIRST123", "NEWCODE99"]);
        backdate(&txt);

        let store2 = CodeStore::ensure_built(&txt, &IndexConfig::default()).unwrap();
        assert!(store2.was_reused());
        assert!(store2.has("FIRST123").unwrap());
        assert!(!store2.has("NEWCODE99").unwrap());
    }

    #[test]
    fn test_rebuilds_when_source_is_newer() {
        let temp = TempDir::new().unwrap();
        let txt = write_txt_file(temp.path(), "codes.txt", &["FIRST123"]);

        let store1 = CodeStore::ensure_built(&txt, &IndexConfig::default()).unwrap();
        store1.close().unwrap();

        write_txt_file(temp.path(), "codes.txt", &["NEWCODE99"]);
        File::options()
            .write(true)
            .open(&txt)
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(3600))
            .unwrap();

        let store2 = CodeStore::ensure_built(&txt, &IndexConfig::default()).unwrap();
        assert!(!store2.was_reused());
        assert!(store2.has("NEWCODE99").unwrap());
        assert!(!store2.has("FIRST123").unwrap());
    }

    #[test]
    fn test_rebuilds_without_marker() {
        let temp = TempDir::new().unwrap();
        let txt = write_txt_file(temp.path(), "codes.txt", &["ABCD1234"]);
        let index_dir = artifact_path(&txt, ".idx");
        fs::create_dir_all(&index_dir).unwrap();
        fs::write(index_dir.join("leftover"), "junk").unwrap();

        let store = CodeStore::ensure_built(&txt, &IndexConfig::default()).unwrap();
        assert!(!store.was_reused());
        assert!(store.has("abcd1234").unwrap());
        assert!(!index_dir.join("leftover").exists());
    }

    #[test]
    fn test_small_batches_keep_every_code() {
        let temp = TempDir::new().unwrap();
        let codes: Vec<String> = (0..2_503).map(|i| format!("code{:06}", i)).collect();
        let lines: Vec<&str> = codes.iter().map(String::as_str).collect();
        let txt = write_txt_file(temp.path(), "codes.txt", &lines);

        let config = IndexConfig {
            batch_size: 100,
            ..IndexConfig::default()
        };
        let store = CodeStore::ensure_built(&txt, &config).unwrap();

        assert_eq!(store.record_count(), 2_503);
        assert!(store.has("CODE000000").unwrap());
        assert!(store.has("code002502").unwrap());
        assert!(!store.has("code002503").unwrap());
    }

    #[test]
    fn test_duplicates_are_counted_once() {
        let temp = TempDir::new().unwrap();
        let txt = write_txt_file(temp.path(), "codes.txt", &["abc", "ABC", " Abc "]);

        let store = CodeStore::ensure_built(&txt, &IndexConfig::default()).unwrap();
        assert_eq!(store.record_count(), 1);
    }

    #[test]
    fn test_missing_source_fails_without_leftovers() {
        let temp = TempDir::new().unwrap();
        let txt = temp.path().join("absent.txt");

        let err = CodeStore::ensure_built(&txt, &IndexConfig::default()).unwrap_err();
        assert!(err.is_build());
        assert_eq!(err.source_path(), Some(txt.as_path()));
        assert!(!artifact_path(&txt, ".idx").exists());
    }

    #[test]
    fn test_invalid_utf8_aborts_build() {
        let temp = TempDir::new().unwrap();
        let txt = temp.path().join("codes.txt");
        fs::write(&txt, b"GOOD1234\n\xff\xfe\n").unwrap();

        let err = CodeStore::ensure_built(&txt, &IndexConfig::default()).unwrap_err();
        assert!(err.is_build());
        assert!(!artifact_path(&txt, ".idx").exists());
    }

    #[test]
    fn test_lookup_after_close_is_error() {
        let temp = TempDir::new().unwrap();
        let txt = write_txt_file(temp.path(), "codes.txt", &["ABCD1234"]);

        let store = CodeStore::ensure_built(&txt, &IndexConfig::default()).unwrap();
        store.close().unwrap();
        assert!(store.is_closed());
        store.close().unwrap();

        let err = store.has("ABCD1234").unwrap_err();
        assert!(err.is_lookup());
        // Blank input never reaches the engine.
        assert!(!store.has("  ").unwrap());
    }

    #[test]
    fn test_for_each_code_visits_distinct_codes() {
        let temp = TempDir::new().unwrap();
        let txt = write_txt_file(temp.path(), "codes.txt", &["bbb222", "AAA111", " aaa111 "]);
        let store = CodeStore::ensure_built(&txt, &IndexConfig::default()).unwrap();

        let mut seen = Vec::new();
        store.for_each_code(|c| seen.push(c.to_string())).unwrap();
        assert_eq!(seen, vec!["AAA111", "BBB222"]);
        assert_eq!(
            store.manifest_path(),
            store.index_dir().join(MANIFEST_FILE_NAME).as_path()
        );

        store.close().unwrap();
        let err = store.for_each_code(|_| {}).unwrap_err();
        assert!(err.is_lookup());
    }

    #[test]
    fn test_poisoned_reader_keeps_serving() {
        let temp = TempDir::new().unwrap();
        let txt = write_txt_file(temp.path(), "codes.txt", &["ABCD1234"]);
        let config = IndexConfig {
            readers_per_store: 1,
            ..IndexConfig::default()
        };
        let store = CodeStore::ensure_built(&txt, &config).unwrap();

        let joined = std::thread::scope(|s| {
            s.spawn(|| {
                let _guard = store.checkout();
                panic!("reader thread died mid-request");
            })
            .join()
        });
        assert!(joined.is_err());
        assert!(store.readers[0].is_poisoned());

        assert!(store.has("abcd1234").unwrap());
        assert!(!store.has("ZZZZ0000").unwrap());

        store.close().unwrap();
        assert!(store.is_closed());
        assert!(store.has("ABCD1234").unwrap_err().is_lookup());
    }

    #[test]
    fn test_concurrent_readers() {
        let temp = TempDir::new().unwrap();
        let txt = write_txt_file(temp.path(), "codes.txt", &["ABCD1234", "WXYZ9876"]);
        let store = CodeStore::ensure_built(&txt, &IndexConfig::default()).unwrap();

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..200 {
                        assert!(store.has("abcd1234").unwrap());
                        assert!(!store.has("NOPE0000").unwrap());
                    }
                });
            }
        });
    }
}
