//! Save/repack: rewrite the archive pair after edits.
//!
//! The rebuild walks the entry list in index order and emits the output
//! data blob in a single pass: changed or new entries are encrypted fresh,
//! unchanged entries are copied verbatim from the source blob — their
//! original ciphertext bytes, untouched.  Re-encrypting them would both
//! cost a full pipeline pass and change their bytes, since the cipher
//! nonce is random.
//!
//! Output order: the data blob is written and flushed first, the header
//! file last.  The output pair only becomes authoritative once its header
//! file exists, so an abort at any point leaves the source archive intact.
//! Output paths must differ from the source pair; the source is never
//! rewritten in place.

use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, info};

use crate::crypto::{self, BufferFlag};
use crate::entry;
use crate::error::{Error, Result};
use crate::header::FileHeader;
use crate::stream::{self, PackStream};

/// Outcome of a completed save.
#[derive(Debug, Clone, Copy)]
pub struct SaveReport {
    pub entries: usize,
    /// Total length of the output data blob — the sum of every entry's
    /// final encoded size.
    pub data_bytes: u64,
}

/// Progress hook, invoked after each entry with (done, total).  Returning
/// false aborts the save between entries with [`Error::Cancelled`].
pub type ProgressHook<'a> = &'a mut dyn FnMut(usize, usize) -> bool;

struct Rebuilt {
    pos: usize,
    header: FileHeader,
    hash: u32,
}

/// Rebuild `stream` into the pair at `out_header` / `out_data`.
///
/// `source` is a random-access view of the original data blob; it is only
/// read for verbatim copies, so a stream built from scratch may pass
/// `None`.  On success the stream's indices, headers, and declared sizes
/// are updated in place; on any failure the stream is left untouched.
pub(crate) fn save<R: Read + Seek>(
    stream: &mut PackStream,
    mut source: Option<&mut R>,
    out_header: &Path,
    out_data: &Path,
    mut progress: Option<ProgressHook<'_>>,
) -> Result<SaveReport> {
    let version = stream.version();
    let total = stream.len();

    // Deterministic output order that survives additions and removals.
    let mut order: Vec<usize> = (0..total).collect();
    order.sort_by_key(|&i| stream.entries()[i].index);

    let out = File::create(out_data).map_err(|e| Error::io(out_data, e))?;
    let mut writer = BufWriter::new(out);

    let mut rebuilt: Vec<Rebuilt> = Vec::with_capacity(total);
    let mut running: u64 = 0;

    for (done, &pos) in order.iter().enumerate() {
        let e = &stream.entries()[pos];
        let index = (done + 1) as u32;

        let (header, hash) = match e.header {
            // Unchanged: verbatim byte copy of the original encoded span.
            Some(prior) if !e.changed => {
                let src = source
                    .as_deref_mut()
                    .ok_or_else(|| Error::MissingData(e.path.clone()))?;
                let span = read_span(src, &prior, &e.path)?;
                writer.write_all(&span).map_err(|e| Error::io(out_data, e))?;
                (FileHeader { index, offset: running, ..prior }, e.hash)
            }
            // Changed or brand new: run the pipeline over the cached
            // plaintext.  A prior header keeps its flag; only entries that
            // have never been written run the extension heuristic.
            prior => {
                let data = e.data_for_save()?;
                let flag = prior
                    .map(|h| h.flag)
                    .unwrap_or_else(|| BufferFlag::for_path(&e.path));
                let (cipher, sizes) = crypto::encrypt(version, flag, data)?;
                writer.write_all(&cipher).map_err(|e| Error::io(out_data, e))?;
                debug!(path = %e.path, pipeline = flag.name(), raw = sizes.raw,
                       encoded = sizes.encoded, "entry re-encrypted");
                (FileHeader { index, flag, offset: running, sizes }, entry::crc32(data))
            }
        };

        running += header.sizes.encoded;
        rebuilt.push(Rebuilt { pos, header, hash });

        if let Some(cb) = progress.as_mut() {
            if !cb(done + 1, total) {
                return Err(Error::Cancelled);
            }
        }
    }

    writer.flush().map_err(|e| Error::io(out_data, e))?;
    drop(writer);

    // Manifest and file table, both in final order, both compressed and
    // encrypted like any other blob.
    let manifest = entry::write_manifest(
        rebuilt
            .iter()
            .map(|r| (r.header.index, r.hash, stream.entries()[r.pos].path.as_str())),
    );
    let (manifest_blob, manifest_sizes) =
        crypto::encrypt(version, BufferFlag::AesZstd, manifest.as_bytes())?;

    let mut table = Vec::with_capacity(total * version.record_len());
    for r in &rebuilt {
        r.header.encode(version, &mut table)?;
    }
    let (table_blob, table_sizes) = crypto::encrypt(version, BufferFlag::AesZstd, &table)?;

    let mut fixed = Vec::new();
    stream::encode_fixed(version, total as u64, &manifest_sizes, &table_sizes, &mut fixed)?;

    // The data blob is fully on disk; only now does the header file appear.
    let head = File::create(out_header).map_err(|e| Error::io(out_header, e))?;
    let mut head = BufWriter::new(head);
    head.write_all(&fixed).map_err(|e| Error::io(out_header, e))?;
    head.write_all(&manifest_blob).map_err(|e| Error::io(out_header, e))?;
    head.write_all(&table_blob).map_err(|e| Error::io(out_header, e))?;
    head.flush().map_err(|e| Error::io(out_header, e))?;

    // Commit: indices always; headers only for freshly encrypted entries.
    // Unchanged entries keep their prior header, which still addresses the
    // open source blob, so a follow-up save stays correct.
    for r in &rebuilt {
        let e = &mut stream.entries_mut()[r.pos];
        e.index = r.header.index;
        e.hash = r.hash;
        if e.changed || e.header.is_none() {
            e.header = Some(r.header);
        }
    }
    stream.entries_mut().sort_by_key(|e| e.index);
    stream.reindex();
    stream.manifest_sizes = manifest_sizes;
    stream.table_sizes = table_sizes;

    info!(entries = total, data_bytes = running, out = %out_data.display(), "archive saved");
    Ok(SaveReport { entries: total, data_bytes: running })
}

fn read_span<R: Read + Seek>(src: &mut R, header: &FileHeader, path: &str) -> Result<Vec<u8>> {
    let len = usize::try_from(header.sizes.encoded)
        .map_err(|_| Error::Corrupt(format!("encoded size of {path} overflows usize")))?;
    src.seek(SeekFrom::Start(header.offset))
        .map_err(|e| Error::Corrupt(format!("seek to offset {} failed: {e}", header.offset)))?;
    let mut buf = vec![0u8; len];
    src.read_exact(&mut buf).map_err(|_| {
        Error::Corrupt(format!(
            "encoded span of {path} ({}..{}) runs past the end of the data blob",
            header.offset,
            header.offset + header.sizes.encoded
        ))
    })?;
    Ok(buf)
}
