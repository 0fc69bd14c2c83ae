//! Artifact store for downloaded documents, certificates and revocation lists.
//!
//! Layout: `<root>/<kind>/<YYYYmmddTHHMMSSZ>-<basename>`. Files are written
//! once and never modified; a name clash gets a numeric suffix instead.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use openssl::sha::Sha256;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// The downloadable artifact families, also used as sub-directory names.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Crt,
    Crl,
}

/// A file persisted by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub size: usize,
    /// Lowercase hex SHA-256 of the stored bytes.
    pub digest: String,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Creates the root and one sub-directory per [`DocumentKind`].
    pub fn open<P: AsRef<Path>>(root: P) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        for kind in DocumentKind::iter() {
            fs::create_dir_all(root.join(kind.to_string()))?;
        }
        Ok(ArtifactStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, kind: DocumentKind) -> PathBuf {
        self.root.join(kind.to_string())
    }

    /// Persists `bytes` downloaded from `origin`, then digests what actually
    /// landed on disk.
    pub fn store(
        &self,
        kind: DocumentKind,
        origin: &str,
        bytes: &[u8],
        captured_at: DateTime<Utc>,
    ) -> io::Result<Artifact> {
        let name = format!(
            "{}-{}",
            captured_at.format("%Y%m%dT%H%M%SZ"),
            basename(origin, kind)
        );
        let (path, mut file) = self.create_unique(kind, &name)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);

        let digest = digest_file(&path)?;
        Ok(Artifact {
            path,
            size: bytes.len(),
            digest,
        })
    }

    fn create_unique(&self, kind: DocumentKind, name: &str) -> io::Result<(PathBuf, fs::File)> {
        let dir = self.dir(kind);
        let mut candidate = dir.join(name);
        let mut attempt = 1;
        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
            {
                Ok(file) => return Ok((candidate, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    candidate = dir.join(format!("{}.{}", name, attempt));
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Newest stored artifact of `kind` whose original basename is `basename`.
    ///
    /// Only `<stamp>-<name>` and its `.N` clash copies match. The latest stamp
    /// wins, then the highest clash number.
    pub fn latest(&self, kind: DocumentKind, basename: &str) -> io::Result<Option<PathBuf>> {
        let name = sanitize_name(basename);
        let mut newest: Option<((String, u32), PathBuf)> = None;
        for entry in fs::read_dir(self.dir(kind))? {
            let path = entry?.path();
            let key = match path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| capture_key(n, &name))
            {
                Some(key) => key,
                None => continue,
            };
            if newest.as_ref().map(|(k, _)| key > *k).unwrap_or(true) {
                newest = Some((key, path));
            }
        }
        Ok(newest.map(|(_, path)| path))
    }
}

/// `(stamp, clash number)` when `file_name` is a capture of `name`.
fn capture_key(file_name: &str, name: &str) -> Option<(String, u32)> {
    let stamp = file_name.get(..STAMP_LEN)?;
    if !is_stamp(stamp) {
        return None;
    }
    let rest = file_name[STAMP_LEN..].strip_prefix('-')?.strip_prefix(name)?;
    let clash = match rest.strip_prefix('.') {
        None if rest.is_empty() => 0,
        Some(n) if !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) => n.parse().ok()?,
        _ => return None,
    };
    Some((stamp.to_string(), clash))
}

const STAMP_LEN: usize = "20250101T000000Z".len();

fn is_stamp(value: &str) -> bool {
    value.bytes().enumerate().all(|(i, b)| match i {
        8 => b == b'T',
        15 => b == b'Z',
        _ => b.is_ascii_digit(),
    })
}

/// Hex SHA-256 of a file's current content.
pub fn digest_file(path: &Path) -> io::Result<String> {
    Ok(digest(&fs::read(path)?))
}

pub fn digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finish())
}

/// Last URL path segment, percent-decoded and reduced to `[A-Za-z0-9._-]`.
pub fn basename(origin: &str, kind: DocumentKind) -> String {
    let segment = url::Url::parse(origin)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut s| s.next_back().map(str::to_string))
        })
        .unwrap_or_default();
    let decoded = urlencoding::decode(&segment)
        .map(|d| d.into_owned())
        .unwrap_or(segment);
    let name = sanitize_name(&decoded);
    if name.is_empty() {
        format!("{}_file", kind)
    } else {
        name
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
