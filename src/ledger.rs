//! Append-only CSV result ledger.
//!
//! Every probe outcome becomes one line. The header is written once, when the
//! file is created; afterwards lines are only ever appended. Each record is
//! serialized into a complete line first and handed to the OS in a single
//! write on an append-mode handle, so an interrupted run never leaves half a
//! row behind. Columns are CSV-quoted where needed; only the free-text note is
//! rewritten, so stored paths always point at the real file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::record::{format_timestamp, CheckRecord, CheckType, Status};

/// Column header of the ledger file.
pub const HEADER: &str = "timestamp,type,target,status,code_or_port,ms,filepath,hash,note";

const COLUMNS: usize = 9;

/// Handle on the ledger file.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    /// Opens the ledger at `path`, creating it with a header row if it does not
    /// exist yet. Parent directories are created as needed.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        // create_new fails if another handle created the file first, in which
        // case the header is already there
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(format!("{}\n", HEADER).as_bytes())?;
                tracing::debug!(path = %path.display(), "created ledger");
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
        Ok(Ledger { path })
    }

    /// Opens an existing ledger without creating it.
    pub fn existing<P: AsRef<Path>>(path: P) -> Option<Self> {
        let path = path.as_ref();
        path.is_file().then(|| Ledger {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record as a single line.
    pub fn append(&self, record: &CheckRecord) -> io::Result<()> {
        let line = encode_line(record)?;
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(&line)
    }

    /// Reads every well-formed record in file order.
    pub fn read_all(&self) -> io::Result<Vec<CheckRecord>> {
        self.read_from(0)
    }

    /// Reads the records after the first `offset` data rows.
    pub fn read_from(&self, offset: usize) -> io::Result<Vec<CheckRecord>> {
        Ok(self.rows()?.into_iter().skip(offset).flatten().collect())
    }

    /// Number of data rows currently in the ledger.
    pub fn row_count(&self) -> io::Result<usize> {
        Ok(self.rows()?.len())
    }

    /// Last `n` raw lines of the file, header included when the file is short.
    pub fn tail(&self, n: usize) -> io::Result<Vec<String>> {
        let reader = BufReader::new(File::open(&self.path)?);
        let lines = reader.lines().collect::<io::Result<Vec<_>>>()?;
        let start = lines.len().saturating_sub(n);
        Ok(lines[start..].to_vec())
    }

    /// Every data row in order; `None` marks a row that could not be decoded.
    fn rows(&self) -> io::Result<Vec<Option<CheckRecord>>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&self.path)?;
        let mut rows = Vec::new();
        for result in reader.records() {
            match result {
                Ok(row) => {
                    let record = decode_row(&row);
                    if record.is_none() {
                        tracing::warn!(row = ?row, "skipping malformed ledger row");
                    }
                    rows.push(record);
                }
                Err(e) if e.is_io_error() => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable ledger row");
                    rows.push(None);
                }
            }
        }
        Ok(rows)
    }
}

/// Makes free text safe for a single ledger line.
pub fn sanitize(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|c| match c {
            ',' => ';',
            '\n' | '\r' => ' ',
            other => other,
        })
        .collect()
}

/// Keeps a value on one line without altering anything else, for paths and
/// URLs that must survive the round trip unchanged.
fn single_line(value: &str) -> String {
    value.replace(['\n', '\r'], " ")
}

fn encode_line(record: &CheckRecord) -> io::Result<Vec<u8>> {
    let timestamp = format_timestamp(&record.timestamp);
    let check_type = record.check_type.to_string();
    let status = record.status.to_string();
    let duration = record.duration_ms.to_string();
    let target = single_line(&record.target);
    let code = single_line(&record.code_or_port);
    let path = single_line(record.artifact_path.as_deref().unwrap_or_default());
    let hash = single_line(record.content_hash.as_deref().unwrap_or_default());
    let note = sanitize(&record.note);

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record([
        timestamp.as_str(),
        check_type.as_str(),
        target.as_str(),
        status.as_str(),
        code.as_str(),
        duration.as_str(),
        path.as_str(),
        hash.as_str(),
        note.as_str(),
    ])?;
    writer.into_inner().map_err(|e| e.into_error())
}

fn decode_row(row: &csv::StringRecord) -> Option<CheckRecord> {
    if row.len() != COLUMNS {
        return None;
    }
    let optional = |s: &str| (!s.is_empty()).then(|| s.to_string());
    Some(CheckRecord {
        timestamp: DateTime::parse_from_rfc3339(row.get(0)?)
            .ok()?
            .with_timezone(&Utc),
        check_type: CheckType::from_str(row.get(1)?).ok()?,
        target: row.get(2)?.to_string(),
        status: Status::from_str(row.get(3)?).ok()?,
        code_or_port: row.get(4)?.to_string(),
        duration_ms: row.get(5)?.parse().ok()?,
        artifact_path: optional(row.get(6)?),
        content_hash: optional(row.get(7)?),
        note: row.get(8)?.to_string(),
    })
}
