//! File entries and the name-manifest text codec.
//!
//! The name manifest is a decrypted UTF-8 table with one CRLF-terminated
//! record per file: `index,hash,path`.  The hash is the CRC32 of the
//! entry's plaintext.  Records are sorted ascending by index after parsing
//! so the file table can be matched positionally in a single pass.

use crc32fast::Hasher;

use crate::error::{Error, Result};
use crate::header::FileHeader;

/// One logical asset inside the archive.  Identity is the virtual path
/// (slash-delimited, unique within a stream).
#[derive(Debug, Clone)]
pub struct PackEntry {
    /// Slash-delimited virtual path.
    pub path: String,
    /// 1-based position in the data blob; recomputed on every save.
    pub index: u32,
    /// CRC32 of the plaintext, as recorded in the manifest.
    pub hash: u32,
    /// Set when the cached plaintext supersedes the on-disk span.  A
    /// changed entry is re-encrypted on save; an unchanged one is copied
    /// verbatim.
    pub changed: bool,
    /// Binary record parsed from the file table.  `None` until a new
    /// entry's first save.
    pub header: Option<FileHeader>,
    data: Option<Vec<u8>>,
}

impl PackEntry {
    /// Create an entry that exists only in memory.  It carries no header
    /// until the first save encrypts it into a data blob.
    pub fn new(path: impl Into<String>, data: Vec<u8>) -> Self {
        let hash = crc32(&data);
        PackEntry {
            path: path.into(),
            index: 0,
            hash,
            changed: true,
            header: None,
            data: Some(data),
        }
    }

    fn from_record(index: u32, hash: u32, path: String) -> Self {
        PackEntry { path, index, hash, changed: false, header: None, data: None }
    }

    /// Replace the plaintext.  The cache becomes the source of truth and
    /// the entry is re-encrypted on the next save.
    pub fn set_data(&mut self, data: Vec<u8>) {
        self.hash = crc32(&data);
        self.data = Some(data);
        self.changed = true;
    }

    /// Decrypted plaintext, if cached.
    pub fn cached_data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    pub(crate) fn store_cache(&mut self, data: Vec<u8>) {
        self.data = Some(data);
    }

    /// Drop the cached plaintext of an unchanged entry.  A changed entry's
    /// cache is its only copy of the data, so it is kept.
    pub fn clear_cache(&mut self) {
        if !self.changed {
            self.data = None;
        }
    }

    /// Plaintext for re-encryption; `MissingData` if the cache is empty.
    pub(crate) fn data_for_save(&self) -> Result<&[u8]> {
        self.data
            .as_deref()
            .ok_or_else(|| Error::MissingData(self.path.clone()))
    }
}

pub(crate) fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

// ── Manifest codec ───────────────────────────────────────────────────────────

/// Parse the decrypted name manifest into entries, sorted ascending by
/// index.  Paths may contain commas; only the first two commas delimit.
pub fn parse_manifest(text: &str) -> Result<Vec<PackEntry>> {
    let mut entries = Vec::new();
    for line in text.lines() {
        if line.is_empty() {
            continue;
        }
        let mut fields = line.splitn(3, ',');
        let (index, hash, path) = match (fields.next(), fields.next(), fields.next()) {
            (Some(i), Some(h), Some(p)) if !p.is_empty() => (i, h, p),
            _ => {
                return Err(Error::Corrupt(format!(
                    "malformed manifest record: {line:?}"
                )))
            }
        };
        let index: u32 = index.parse().map_err(|_| {
            Error::Corrupt(format!("bad index in manifest record: {line:?}"))
        })?;
        let hash: u32 = hash.parse().map_err(|_| {
            Error::Corrupt(format!("bad hash in manifest record: {line:?}"))
        })?;
        entries.push(PackEntry::from_record(index, hash, path.to_owned()));
    }
    entries.sort_by_key(|e| e.index);
    Ok(entries)
}

/// Serialize manifest records in their final save order.
pub fn write_manifest<'a, I>(records: I) -> String
where
    I: IntoIterator<Item = (u32, u32, &'a str)>,
{
    let mut out = String::new();
    for (index, hash, path) in records {
        out.push_str(&format!("{index},{hash},{path}\r\n"));
    }
    out
}
