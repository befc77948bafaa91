//! Reference case database backed by rusqlite.
//!
//! This backend keeps a single `data_sources` table and implements the staged
//! add-image protocol on top of a `committed` flag. Filesystem detection is a
//! magic-byte probe standing in for a real forensic I/O library; the engine
//! itself never depends on how detection is done.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};

use chrono::Utc;
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{AddImageError, AddImageLiveStatus, AddImageProcess, CaseDatabase, CaseDbError};
use crate::types::{DataSource, DataSourceKind, display_name};

const PROBE_LEN: usize = 4096;
const READ_BUF_LEN: usize = 1024 * 1024;

impl From<rusqlite::Error> for CaseDbError {
    fn from(err: rusqlite::Error) -> Self {
        CaseDbError::Backend(err.to_string())
    }
}

struct CaseLock {
    locked: Mutex<bool>,
    cv: Condvar,
}

impl CaseLock {
    fn new() -> Self {
        Self {
            locked: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut held = self.locked.lock().unwrap();
        while *held {
            held = self.cv.wait(held).unwrap();
        }
        *held = true;
    }

    fn release(&self) {
        *self.locked.lock().unwrap() = false;
        self.cv.notify_one();
    }
}

struct Inner {
    conn: Mutex<Connection>,
    lock: CaseLock,
}

/// Case database stored in a single sqlite file.
#[derive(Clone)]
pub struct SqliteCaseDb {
    inner: Arc<Inner>,
}

impl SqliteCaseDb {
    pub fn open(path: &Path) -> Result<Self, CaseDbError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Throwaway database for tests.
    pub fn in_memory() -> Result<Self, CaseDbError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, CaseDbError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS data_sources (
                id INTEGER PRIMARY KEY,
                device_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                size INTEGER NOT NULL,
                expected_size INTEGER NOT NULL,
                content_sha256 TEXT NOT NULL DEFAULT '',
                time_zone TEXT NOT NULL,
                added_at TEXT NOT NULL,
                committed INTEGER NOT NULL DEFAULT 0
            )",
        )?;
        Ok(Self {
            inner: Arc::new(Inner {
                conn: Mutex::new(conn),
                lock: CaseLock::new(),
            }),
        })
    }

    fn insert_data_source(
        &self,
        device_id: &str,
        kind: DataSourceKind,
        name: &str,
        size: u64,
        expected_size: u64,
        sha256: &str,
        time_zone: &str,
        committed: bool,
    ) -> Result<i64, CaseDbError> {
        let conn = self.inner.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO data_sources
                (device_id, kind, name, size, expected_size, content_sha256,
                 time_zone, added_at, committed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                device_id,
                kind_label(kind),
                name,
                size as i64,
                expected_size as i64,
                sha256,
                time_zone,
                Utc::now().to_rfc3339(),
                committed as i64,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }
}

impl CaseDatabase for SqliteCaseDb {
    fn acquire_exclusive_lock(&self) {
        self.inner.lock.acquire();
    }

    fn release_exclusive_lock(&self) {
        self.inner.lock.release();
    }

    fn make_add_image_process(
        &self,
        time_zone: &str,
        detect_filesystems: bool,
        skip_fat_orphans: bool,
    ) -> Box<dyn AddImageProcess> {
        Box::new(SqliteAddImageProcess {
            db: self.clone(),
            time_zone: time_zone.to_string(),
            detect_filesystems,
            skip_fat_orphans,
            status: Arc::new(AddImageLiveStatus::default()),
            staged: None,
        })
    }

    fn image_by_id(&self, id: i64) -> Result<DataSource, CaseDbError> {
        let conn = self.inner.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, device_id, kind, name, size, expected_size
             FROM data_sources WHERE id = ?1 AND committed = 1",
        )?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => row_to_data_source(row),
            None => Err(CaseDbError::UnknownDataSource(id)),
        }
    }

    fn add_local_files_data_source(
        &self,
        device_id: &str,
        root_name: &str,
        time_zone: &str,
        paths: &[PathBuf],
        progress: &mut dyn FnMut(&Path),
    ) -> Result<DataSource, CaseDbError> {
        let mut total = 0u64;
        for path in paths {
            let meta = std::fs::metadata(path)?;
            total += meta.len();
            progress(path);
        }
        let id = self.insert_data_source(
            device_id,
            DataSourceKind::LocalFiles,
            root_name,
            total,
            total,
            "",
            time_zone,
            true,
        )?;
        self.image_by_id(id)
    }

    fn add_image_record(
        &self,
        device_id: &str,
        path: &Path,
        time_zone: &str,
    ) -> Result<DataSource, CaseDbError> {
        let len = std::fs::metadata(path)?.len();
        let id = self.insert_data_source(
            device_id,
            DataSourceKind::MemoryImage,
            &display_name(path),
            len,
            len,
            "",
            time_zone,
            true,
        )?;
        self.image_by_id(id)
    }
}

struct SqliteAddImageProcess {
    db: SqliteCaseDb,
    time_zone: String,
    detect_filesystems: bool,
    skip_fat_orphans: bool,
    status: Arc<AddImageLiveStatus>,
    staged: Option<i64>,
}

impl AddImageProcess for SqliteAddImageProcess {
    fn live_status(&self) -> Arc<AddImageLiveStatus> {
        Arc::clone(&self.status)
    }

    fn run(&mut self, device_id: &str, paths: &[PathBuf]) -> Result<(), AddImageError> {
        if self.staged.is_some() {
            return Err(AddImageError::Structural(
                "add-image process already ran".to_string(),
            ));
        }
        let first = paths
            .first()
            .ok_or_else(|| AddImageError::Structural("no image paths supplied".to_string()))?;

        if self.detect_filesystems && !probe_filesystem(first)? {
            return Err(AddImageError::NoFilesystem {
                path: first.clone(),
            });
        }
        if self.skip_fat_orphans {
            debug!("orphan FAT files will not be recovered for {device_id}");
        }

        let mut expected = 0u64;
        for path in paths {
            expected += std::fs::metadata(path)
                .map_err(|err| {
                    AddImageError::Structural(format!("cannot stat {}: {err}", path.display()))
                })?
                .len();
        }

        let mut hasher = Sha256::new();
        let mut read_total = 0u64;
        let mut truncated = None;
        for path in paths {
            match hash_image_part(path, expected, &mut read_total, &mut hasher, &self.status) {
                Ok(()) => {}
                Err(err) => {
                    // Keep what was read so far; the staged image is still usable.
                    truncated = Some(format!("short read of {}: {err}", path.display()));
                    break;
                }
            }
        }

        let id = self
            .db
            .insert_data_source(
                device_id,
                DataSourceKind::Image,
                &display_name(first),
                read_total,
                expected,
                &hex::encode(hasher.finalize()),
                &self.time_zone,
                false,
            )
            .map_err(|err| AddImageError::Structural(err.to_string()))?;
        self.staged = Some(id);

        match truncated {
            Some(msg) => Err(AddImageError::Recoverable(msg)),
            None => Ok(()),
        }
    }

    fn commit(&mut self) -> Result<i64, CaseDbError> {
        let id = self
            .staged
            .take()
            .ok_or_else(|| CaseDbError::Backend("no staged image to commit".to_string()))?;
        let conn = self.db.inner.conn.lock().unwrap();
        conn.execute(
            "UPDATE data_sources SET committed = 1 WHERE id = ?1",
            [id],
        )?;
        Ok(id)
    }

    fn revert(&mut self) -> Result<(), CaseDbError> {
        // A failed run may not have staged anything; reverting is then a no-op.
        if let Some(id) = self.staged.take() {
            let conn = self.db.inner.conn.lock().unwrap();
            conn.execute("DELETE FROM data_sources WHERE id = ?1", [id])?;
        }
        Ok(())
    }
}

fn hash_image_part(
    path: &Path,
    expected: u64,
    read_total: &mut u64,
    hasher: &mut Sha256,
    status: &AddImageLiveStatus,
) -> std::io::Result<()> {
    let mut file = File::open(path)?;
    let mut buf = vec![0u8; READ_BUF_LEN];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        *read_total += n as u64;
        let pct = if expected > 0 {
            ((*read_total * 100) / expected) as u8
        } else {
            100
        };
        status.update(&path.display().to_string(), pct);
    }
    Ok(())
}

/// Magic-byte check for filesystems the reference backend recognizes:
/// NTFS, FAT boot sectors, and ext2/3/4 superblocks.
fn probe_filesystem(path: &Path) -> Result<bool, AddImageError> {
    let mut file = File::open(path).map_err(|err| {
        AddImageError::Structural(format!("cannot open {}: {err}", path.display()))
    })?;
    let mut header = vec![0u8; PROBE_LEN];
    let mut read = 0usize;
    while read < header.len() {
        let n = file.read(&mut header[read..]).map_err(|err| {
            AddImageError::Structural(format!("cannot read {}: {err}", path.display()))
        })?;
        if n == 0 {
            break;
        }
        read += n;
    }
    header.truncate(read);
    Ok(header_has_filesystem(&header))
}

fn header_has_filesystem(header: &[u8]) -> bool {
    if header.len() >= 7 && &header[3..7] == b"NTFS" {
        return true;
    }
    if header.len() >= 512 && header[510] == 0x55 && header[511] == 0xAA {
        return true;
    }
    // ext superblock magic, little-endian, at offset 1080 within the image.
    if header.len() >= 1082 && header[1080] == 0x53 && header[1081] == 0xEF {
        return true;
    }
    false
}

fn kind_label(kind: DataSourceKind) -> &'static str {
    match kind {
        DataSourceKind::Image => "image",
        DataSourceKind::LocalFiles => "local_files",
        DataSourceKind::MemoryImage => "memory_image",
    }
}

fn row_to_data_source(row: &rusqlite::Row<'_>) -> Result<DataSource, CaseDbError> {
    let kind: String = row.get(2)?;
    let kind = match kind.as_str() {
        "image" => DataSourceKind::Image,
        "local_files" => DataSourceKind::LocalFiles,
        "memory_image" => DataSourceKind::MemoryImage,
        other => {
            return Err(CaseDbError::Backend(format!(
                "unknown data source kind: {other}"
            )));
        }
    };
    let size: i64 = row.get(4)?;
    let expected_size: i64 = row.get(5)?;
    Ok(DataSource {
        id: row.get(0)?,
        device_id: row.get(1)?,
        kind,
        name: row.get(3)?,
        size: size as u64,
        expected_size: expected_size as u64,
    })
}
