//! High-level [`Archive`] API — the primary embedding surface.
//!
//! ```no_run
//! use m2pack::archive::Archive;
//!
//! let mut ar = Archive::open("Xml.m2h", "Xml.m2d")?;
//! let data = ar.read_entry("string/en/itemname.xml")?;
//! ar.set_entry_data("string/en/itemname.xml", data)?;
//! ar.save("out/Xml.m2h", "out/Xml.m2d", None)?;
//! # Ok::<(), m2pack::Error>(())
//! ```
//!
//! The source data blob stays open read-only for the archive's lifetime;
//! decrypt-on-demand reads seek into it and never load it whole.  Dropping
//! the `Archive` releases the handle — required before reloading the same
//! pair on platforms with exclusive-write semantics.  `save` takes
//! `&mut self`, so at most one save per archive runs at a time.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::crypto;
use crate::entry::PackEntry;
use crate::error::{Error, Result};
use crate::header::BlobSizes;
use crate::rebuild::{self, ProgressHook, SaveReport};
use crate::stream::PackStream;
use crate::version::PackVersion;

/// The loaded source pair.  Absent for archives built from scratch.
#[derive(Debug)]
struct SourcePair {
    header_path: PathBuf,
    data_path: PathBuf,
    data_file: File,
}

#[derive(Debug)]
pub struct Archive {
    stream: PackStream,
    source: Option<SourcePair>,
}

/// Lightweight listing row.
#[derive(Debug, Clone, Serialize)]
pub struct EntryInfo {
    pub path: String,
    pub index: u32,
    pub changed: bool,
    pub pipeline: Option<&'static str>,
    pub raw_size: Option<u64>,
    pub encoded_size: Option<u64>,
}

impl From<&PackEntry> for EntryInfo {
    fn from(e: &PackEntry) -> Self {
        EntryInfo {
            path: e.path.clone(),
            index: e.index,
            changed: e.changed,
            pipeline: e.header.map(|h| h.flag.name()),
            raw_size: e.header.map(|h| h.sizes.raw),
            encoded_size: e.header.map(|h| h.sizes.encoded),
        }
    }
}

impl Archive {
    /// Load an archive pair.  The header file is parsed eagerly; entry
    /// payloads are decrypted on demand.
    pub fn open(
        header_path: impl AsRef<Path>,
        data_path: impl AsRef<Path>,
    ) -> Result<Self> {
        let header_path = header_path.as_ref().to_owned();
        let data_path = data_path.as_ref().to_owned();

        let file = File::open(&header_path).map_err(|e| Error::io(&header_path, e))?;
        let mut reader = BufReader::new(file);
        let stream = PackStream::load(&mut reader, &header_path)?;

        let data_file = File::open(&data_path).map_err(|e| Error::io(&data_path, e))?;
        debug!(version = stream.version().name(), entries = stream.len(),
               header = %header_path.display(), "archive loaded");

        Ok(Archive {
            stream,
            source: Some(SourcePair { header_path, data_path, data_file }),
        })
    }

    /// An empty archive to be populated with [`Archive::add_entry`] and
    /// written with [`Archive::save`].
    pub fn create(version: PackVersion) -> Self {
        Archive { stream: PackStream::new(version), source: None }
    }

    #[inline]
    pub fn version(&self) -> PackVersion {
        self.stream.version()
    }

    pub fn len(&self) -> usize {
        self.stream.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stream.is_empty()
    }

    pub fn header_path(&self) -> Option<&Path> {
        self.source.as_ref().map(|s| s.header_path.as_path())
    }

    pub fn data_path(&self) -> Option<&Path> {
        self.source.as_ref().map(|s| s.data_path.as_path())
    }

    /// Entries in current index order.
    pub fn entries(&self) -> &[PackEntry] {
        self.stream.entries()
    }

    pub fn entry(&self, path: &str) -> Option<&PackEntry> {
        self.stream.get(path)
    }

    pub fn list(&self) -> Vec<EntryInfo> {
        self.stream.entries().iter().map(EntryInfo::from).collect()
    }

    /// Declared sizes of the encrypted manifest and file table, for
    /// diagnostics.
    pub fn declared_sizes(&self) -> (BlobSizes, BlobSizes) {
        (self.stream.manifest_sizes, self.stream.table_sizes)
    }

    /// Decrypt one entry's plaintext, caching it on the entry.
    pub fn read_entry(&mut self, path: &str) -> Result<Vec<u8>> {
        let version = self.stream.version();
        let source = self.source.as_mut();
        let entry = self
            .stream
            .get_mut(path)
            .ok_or_else(|| Error::EntryNotFound(path.to_owned()))?;

        if let Some(data) = entry.cached_data() {
            return Ok(data.to_vec());
        }
        let header = entry
            .header
            .ok_or_else(|| Error::MissingData(path.to_owned()))?;
        let pair = source.ok_or_else(|| Error::MissingData(path.to_owned()))?;
        let data = crypto::decrypt_from(version, &header, &mut pair.data_file, path)?;
        entry.store_cache(data.clone());
        Ok(data)
    }

    /// Replace an entry's plaintext and mark it changed (re-encrypted on
    /// the next save).
    pub fn set_entry_data(&mut self, path: &str, data: Vec<u8>) -> Result<()> {
        let entry = self
            .stream
            .get_mut(path)
            .ok_or_else(|| Error::EntryNotFound(path.to_owned()))?;
        entry.set_data(data);
        Ok(())
    }

    /// Insert a new entry under `parent_path` ("" for the root).  The
    /// entry keeps no header until the first save encrypts it.
    pub fn add_entry(&mut self, parent_path: &str, mut entry: PackEntry) -> Result<()> {
        let parent = parent_path.trim_matches('/');
        if !parent.is_empty() {
            entry.path = format!("{}/{}", parent, entry.path);
        }
        self.stream.add(entry)
    }

    pub fn remove_entry(&mut self, path: &str) -> Result<PackEntry> {
        self.stream.remove(path)
    }

    /// Rebuild the archive into a new pair.
    ///
    /// The source pair is never overwritten in place (attempts are refused
    /// up front), and the output becomes authoritative only once its
    /// header file is written, strictly after the data blob.  `progress`
    /// is called after each entry with (done, total); returning false
    /// cancels the save between entries.
    pub fn save(
        &mut self,
        out_header: impl AsRef<Path>,
        out_data: impl AsRef<Path>,
        progress: Option<ProgressHook<'_>>,
    ) -> Result<SaveReport> {
        let out_header = out_header.as_ref();
        let out_data = out_data.as_ref();

        if let Some(pair) = &self.source {
            for (out, src) in [(out_header, &pair.header_path), (out_data, &pair.data_path)] {
                if same_file(out, src) {
                    return Err(Error::io(
                        out,
                        std::io::Error::new(
                            std::io::ErrorKind::InvalidInput,
                            "refusing to overwrite the source archive in place",
                        ),
                    ));
                }
            }
        }

        let source = self.source.as_mut().map(|s| &mut s.data_file);
        rebuild::save(&mut self.stream, source, out_header, out_data, progress)
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
