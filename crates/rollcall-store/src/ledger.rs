//! [`AttendanceLedger`] — append-only CSV log of successful recognitions.
//!
//! Layout: one header row, then one row per record:
//!
//! ```text
//! identity_id,display_name,timestamp,source,evidence
//! S1,Alice,2026-10-18T09:30:00Z,upload,20261018T093000Z_5f0c....png
//! ```
//!
//! Timestamps are UTC, second precision, RFC 3339.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use chrono::{DateTime, SecondsFormat, Utc};

use rollcall_core::AttendanceRecord;

use crate::{csv, Result, StoreError};

pub const LEDGER_HEADER: [&str; 5] = ["identity_id", "display_name", "timestamp", "source", "evidence"];

/// One writer lock per ledger file for the whole process.
static WRITER_LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();

fn writer_lock(path: &Path) -> Arc<Mutex<()>> {
    let mut locks = WRITER_LOCKS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    locks.entry(path.to_path_buf()).or_default().clone()
}

/// Append-only attendance log.
///
/// All appends to the same file are serialized by a process-wide lock, so
/// rows appear in lock acquisition order and the header is written exactly
/// once. The write runs on a blocking thread that finishes even if the
/// calling future is dropped.
#[derive(Clone)]
pub struct AttendanceLedger {
    path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl AttendanceLedger {
    /// Prepare a ledger at `path`. The file itself is created on first append.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|e| StoreError::io(path, e))?
                .join(path)
        };
        let (Some(parent), Some(file_name)) = (path.parent(), path.file_name()) else {
            return Err(StoreError::io(
                &path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "ledger path has no file name"),
            ));
        };
        std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        // One lock per file, however the path was spelled.
        let path = std::fs::canonicalize(parent)
            .map_err(|e| StoreError::io(parent, e))?
            .join(file_name);

        Ok(Self {
            lock: writer_lock(&path),
            path: Arc::new(path),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably append one record.
    pub async fn append(&self, record: &AttendanceRecord) -> Result<()> {
        let row = encode_record(record);
        let path = Arc::clone(&self.path);
        let lock = Arc::clone(&self.lock);

        tokio::task::spawn_blocking(move || {
            let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            append_row(&path, &row)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))??;

        tracing::debug!(
            identity = %record.identity_id,
            source = %record.source,
            "attendance row appended"
        );
        Ok(())
    }

    /// All records in append order. A ledger that was never written is empty.
    pub async fn read_all(&self) -> Result<Vec<AttendanceRecord>> {
        let path = Arc::clone(&self.path);
        let lock = Arc::clone(&self.lock);

        tokio::task::spawn_blocking(move || {
            let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            read_records(&path)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.read_all().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

fn encode_record(record: &AttendanceRecord) -> String {
    let timestamp = record.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true);
    csv::encode_row(&[
        &record.identity_id,
        &record.display_name,
        &timestamp,
        &record.source,
        &record.evidence,
    ])
}

fn append_row(path: &Path, row: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .map_err(|e| StoreError::io(path, e))?;
    let len = file.metadata().map_err(|e| StoreError::io(path, e))?.len();

    let mut buf = String::new();
    if len == 0 {
        buf.push_str(&csv::encode_row(&LEDGER_HEADER));
    } else {
        check_existing(&mut file, path)?;
    }
    buf.push_str(row);

    file.write_all(buf.as_bytes())
        .map_err(|e| StoreError::io(path, e))?;
    file.sync_data().map_err(|e| StoreError::io(path, e))?;
    Ok(())
}

/// Refuse to extend a log whose header is foreign or whose last row was
/// torn, including a tear inside a quoted field.
fn check_existing(file: &mut File, path: &Path) -> Result<()> {
    let mut existing = Vec::new();
    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.read_to_end(&mut existing))
        .map_err(|e| StoreError::io(path, e))?;

    let header = csv::encode_row(&LEDGER_HEADER);
    if !existing.starts_with(header.as_bytes()) {
        return Err(StoreError::corrupt(
            format!("ledger {}", path.display()),
            "header row does not match",
        ));
    }
    if !csv::ends_at_row_boundary(&existing) {
        return Err(StoreError::corrupt(
            format!("ledger {}", path.display()),
            "last row is incomplete",
        ));
    }
    Ok(())
}

fn read_records(path: &Path) -> Result<Vec<AttendanceRecord>> {
    let text = match std::fs::read(path) {
        Ok(bytes) => String::from_utf8(bytes).map_err(|e| {
            StoreError::corrupt(format!("ledger {}", path.display()), e.to_string())
        })?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(path, e)),
    };

    let what = || format!("ledger {}", path.display());
    let rows = csv::parse(&text).map_err(|detail| StoreError::corrupt(what(), detail))?;
    let mut rows = rows.into_iter();

    match rows.next() {
        None => return Ok(Vec::new()),
        Some(header) if header == LEDGER_HEADER => {}
        Some(header) => {
            return Err(StoreError::corrupt(
                what(),
                format!("unexpected header {header:?}"),
            ))
        }
    }

    rows.enumerate()
        .map(|(i, row)| {
            decode_record(row).map_err(|detail| {
                StoreError::corrupt(what(), format!("row {}: {detail}", i + 1))
            })
        })
        .collect()
}

fn decode_record(row: Vec<String>) -> Result<AttendanceRecord, String> {
    let [identity_id, display_name, timestamp, source, evidence]: [String; 5] = row
        .try_into()
        .map_err(|row: Vec<String>| format!("expected 5 columns, found {}", row.len()))?;

    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map_err(|e| format!("bad timestamp {timestamp:?}: {e}"))?
        .with_timezone(&Utc);

    Ok(AttendanceRecord {
        identity_id,
        display_name,
        timestamp,
        source,
        evidence,
    })
}
