//! The container stream: fixed header fields plus the entry arena.
//!
//! A [`PackStream`] owns every entry of one archive in a single `Vec` and
//! keeps a path-keyed map of indices into it.  Directory-style views and
//! lookups go through that map; entry state is never duplicated.
//!
//! The fixed fields after the magic — file count and the two
//! raw/compressed/encoded size triples — are version-specific in both
//! order and width.  Each shape lives in exactly one decode arm and one
//! encode arm below; nothing else in the crate re-reads these layouts.

use std::collections::HashMap;
use std::io::{self, Cursor, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::crypto::{self, BufferFlag};
use crate::entry::{self, PackEntry};
use crate::error::{Error, Result};
use crate::header::{BlobSizes, FileHeader};
use crate::version::PackVersion;

#[derive(Debug)]
pub struct PackStream {
    version: PackVersion,
    /// Declared sizes of the encrypted name manifest; recomputed on save.
    pub(crate) manifest_sizes: BlobSizes,
    /// Declared sizes of the encrypted file table; recomputed on save.
    pub(crate) table_sizes: BlobSizes,
    entries: Vec<PackEntry>,
    by_path: HashMap<String, usize>,
}

impl PackStream {
    /// An empty stream for building an archive from scratch.  Every entry
    /// added to it is new, so the first save encrypts everything fresh.
    pub fn new(version: PackVersion) -> Self {
        PackStream {
            version,
            manifest_sizes: BlobSizes::default(),
            table_sizes: BlobSizes::default(),
            entries: Vec::new(),
            by_path: HashMap::new(),
        }
    }

    /// Decode a full header file: magic, fixed fields, then the encrypted
    /// manifest and file-table blobs.  `path` names the header file in
    /// errors.
    pub fn load<R: Read>(reader: &mut R, path: &Path) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader
            .read_exact(&mut magic)
            .map_err(|e| Error::io(path, e))?;
        let version = PackVersion::from_magic(magic)?;

        let (file_count, manifest_sizes, table_sizes) =
            decode_fixed(version, reader).map_err(|e| Error::io(path, e))?;

        let manifest_blob = read_blob(reader, manifest_sizes.encoded, "name manifest")?;
        let manifest = crypto::decrypt(
            version,
            BufferFlag::AesZstd,
            manifest_sizes,
            &manifest_blob,
            "name manifest",
        )?;
        let manifest = String::from_utf8(manifest)
            .map_err(|_| Error::Corrupt("name manifest is not valid utf-8".into()))?;
        let mut entries = entry::parse_manifest(&manifest)?;

        if entries.len() as u64 != file_count {
            return Err(Error::Corrupt(format!(
                "declared file count {} but manifest lists {} entries",
                file_count,
                entries.len()
            )));
        }

        let table_blob = read_blob(reader, table_sizes.encoded, "file table")?;
        let table = crypto::decrypt(
            version,
            BufferFlag::AesZstd,
            table_sizes,
            &table_blob,
            "file table",
        )?;
        attach_headers(version, &table, &mut entries)?;

        let by_path = index_paths(&entries)?;
        Ok(PackStream { version, manifest_sizes, table_sizes, entries, by_path })
    }

    #[inline]
    pub fn version(&self) -> PackVersion {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in current index order.
    pub fn entries(&self) -> &[PackEntry] {
        &self.entries
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [PackEntry] {
        &mut self.entries
    }

    pub fn get(&self, path: &str) -> Option<&PackEntry> {
        self.by_path.get(path).map(|&i| &self.entries[i])
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut PackEntry> {
        let &i = self.by_path.get(path)?;
        Some(&mut self.entries[i])
    }

    /// Insert a new entry at the end of the index order.
    pub fn add(&mut self, mut entry: PackEntry) -> Result<()> {
        if self.by_path.contains_key(&entry.path) {
            return Err(Error::DuplicateEntry(entry.path));
        }
        let next = self.entries.iter().map(|e| e.index).max().unwrap_or(0) + 1;
        entry.index = next;
        self.by_path.insert(entry.path.clone(), self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    /// Remove an entry by path.  Remaining indices keep their gaps until
    /// the next save compacts them back to 1..N.
    pub fn remove(&mut self, path: &str) -> Result<PackEntry> {
        let i = *self
            .by_path
            .get(path)
            .ok_or_else(|| Error::EntryNotFound(path.to_owned()))?;
        let removed = self.entries.remove(i);
        self.reindex();
        Ok(removed)
    }

    /// Restore the path map after a save reorders the arena.
    pub(crate) fn reindex(&mut self) {
        self.by_path.clear();
        for (i, e) in self.entries.iter().enumerate() {
            self.by_path.insert(e.path.clone(), i);
        }
    }
}

fn read_blob<R: Read>(reader: &mut R, encoded: u64, label: &str) -> Result<Vec<u8>> {
    let len = usize::try_from(encoded)
        .map_err(|_| Error::Corrupt(format!("declared {label} size overflows usize")))?;
    let mut blob = vec![0u8; len];
    reader
        .read_exact(&mut blob)
        .map_err(|_| Error::Corrupt(format!("header file truncated inside the {label} blob")))?;
    Ok(blob)
}

fn attach_headers(
    version: PackVersion,
    table: &[u8],
    entries: &mut [PackEntry],
) -> Result<()> {
    let expected = entries.len() * version.record_len();
    if table.len() != expected {
        return Err(Error::Corrupt(format!(
            "file table is {} bytes, expected {} for {} records",
            table.len(),
            expected,
            entries.len()
        )));
    }
    let mut cursor = Cursor::new(table);
    for _ in 0..entries.len() {
        let header = FileHeader::decode(version, &mut cursor)?;
        let slot = header.index as usize;
        if slot == 0 || slot > entries.len() {
            return Err(Error::Corrupt(format!(
                "file table index {} out of range 1..={}",
                header.index,
                entries.len()
            )));
        }
        let entry = &mut entries[slot - 1];
        if entry.header.is_some() {
            return Err(Error::Corrupt(format!(
                "duplicate file table index {}",
                header.index
            )));
        }
        entry.header = Some(header);
    }
    Ok(())
}

fn index_paths(entries: &[PackEntry]) -> Result<HashMap<String, usize>> {
    let mut map = HashMap::with_capacity(entries.len());
    for (i, e) in entries.iter().enumerate() {
        if map.insert(e.path.clone(), i).is_some() {
            return Err(Error::Corrupt(format!("duplicate entry path {}", e.path)));
        }
    }
    Ok(map)
}

// ── Fixed-field codecs ───────────────────────────────────────────────────────

fn read_size<R: Read>(r: &mut R, wide: bool) -> io::Result<u64> {
    if wide {
        r.read_u64::<LittleEndian>()
    } else {
        r.read_u32::<LittleEndian>().map(u64::from)
    }
}

fn read_triple<R: Read>(r: &mut R, wide: bool) -> io::Result<BlobSizes> {
    let compressed = read_size(r, wide)?;
    let encoded = read_size(r, wide)?;
    let raw = read_size(r, wide)?;
    Ok(BlobSizes { raw, compressed, encoded })
}

/// Read the version-specific fixed fields that follow the magic.
fn decode_fixed<R: Read>(
    version: PackVersion,
    r: &mut R,
) -> io::Result<(u64, BlobSizes, BlobSizes)> {
    let wide = version.wide_stream_sizes();
    match version {
        PackVersion::Ms2f => {
            let _reserved = r.read_u32::<LittleEndian>()?;
            let manifest = read_triple(r, wide)?;
            let file_count = r.read_u64::<LittleEndian>()?;
            let table = read_triple(r, wide)?;
            Ok((file_count, manifest, table))
        }
        PackVersion::Ns2f => {
            let file_count = u64::from(r.read_u32::<LittleEndian>()?);
            let manifest = read_triple(r, wide)?;
            let table = read_triple(r, wide)?;
            Ok((file_count, manifest, table))
        }
        PackVersion::Os2f | PackVersion::Ps2f => {
            let file_count = u64::from(r.read_u32::<LittleEndian>()?);
            if version == PackVersion::Ps2f {
                let _reserved = r.read_u32::<LittleEndian>()?;
            }
            let manifest = read_triple(r, wide)?;
            let table = read_triple(r, wide)?;
            Ok((file_count, manifest, table))
        }
    }
}

fn push_size(out: &mut Vec<u8>, v: u64, wide: bool, version: PackVersion) -> Result<()> {
    if wide {
        out.extend_from_slice(&v.to_le_bytes());
    } else {
        let narrow = u32::try_from(v).map_err(|_| {
            Error::Format(format!(
                "size {} exceeds the {} fixed-field width",
                v,
                version.name()
            ))
        })?;
        out.extend_from_slice(&narrow.to_le_bytes());
    }
    Ok(())
}

fn push_triple(out: &mut Vec<u8>, s: &BlobSizes, wide: bool, version: PackVersion) -> Result<()> {
    push_size(out, s.compressed, wide, version)?;
    push_size(out, s.encoded, wide, version)?;
    push_size(out, s.raw, wide, version)
}

/// Append magic plus the version-specific fixed fields to `out`.
pub fn encode_fixed(
    version: PackVersion,
    file_count: u64,
    manifest: &BlobSizes,
    table: &BlobSizes,
    out: &mut Vec<u8>,
) -> Result<()> {
    out.extend_from_slice(&version.magic());
    let wide = version.wide_stream_sizes();
    match version {
        PackVersion::Ms2f => {
            out.extend_from_slice(&0u32.to_le_bytes());
            push_triple(out, manifest, wide, version)?;
            out.extend_from_slice(&file_count.to_le_bytes());
            push_triple(out, table, wide, version)?;
        }
        PackVersion::Ns2f => {
            let count = u32::try_from(file_count).map_err(|_| {
                Error::Format(format!(
                    "file count {} exceeds the NS2F fixed-field width",
                    file_count
                ))
            })?;
            out.extend_from_slice(&count.to_le_bytes());
            push_triple(out, manifest, wide, version)?;
            push_triple(out, table, wide, version)?;
        }
        PackVersion::Os2f | PackVersion::Ps2f => {
            let count = u32::try_from(file_count).map_err(|_| {
                Error::Format(format!(
                    "file count {} exceeds the {} fixed-field width",
                    file_count,
                    version.name()
                ))
            })?;
            out.extend_from_slice(&count.to_le_bytes());
            if version == PackVersion::Ps2f {
                out.extend_from_slice(&0u32.to_le_bytes());
            }
            push_triple(out, manifest, wide, version)?;
            push_triple(out, table, wide, version)?;
        }
    }
    Ok(())
}
