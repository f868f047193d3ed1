//! Per-entry file-table records.
//!
//! Each loaded entry owns exactly one [`FileHeader`]: its 1-based index,
//! the byte offset of its encoded span inside the data blob, the three
//! sizes tracked through the pipeline, and the [`BufferFlag`] that selects
//! the pipeline.  The on-disk record shape differs per version in both
//! field order and width; every shape is a stateless function over raw
//! bytes below, dispatched from [`FileHeader::decode`] / [`FileHeader::encode`].

use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::crypto::BufferFlag;
use crate::error::{Error, Result};
use crate::version::PackVersion;

/// Plaintext length, post-compression length, and final on-disk length of
/// one encoded blob.  For pipelines that skip a stage the skipped size
/// equals its predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlobSizes {
    pub raw: u64,
    pub compressed: u64,
    pub encoded: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// 1-based position of the entry's span in the data blob.
    pub index: u32,
    pub flag: BufferFlag,
    /// Byte offset of the encoded span inside the data blob.
    pub offset: u64,
    pub sizes: BlobSizes,
}

impl FileHeader {
    /// Decode one record from a decrypted file-table buffer.
    ///
    /// The table is always an in-memory buffer by the time records are
    /// parsed, so a short read can only mean the table was truncated.
    pub fn decode<R: Read>(version: PackVersion, reader: &mut R) -> Result<Self> {
        match version {
            PackVersion::Ms2f => decode_ms2f(reader),
            PackVersion::Ns2f => decode_ns2f(reader),
            PackVersion::Os2f => decode_v3(reader, false),
            PackVersion::Ps2f => decode_v3(reader, true),
        }
    }

    /// Append this record's on-disk bytes to `out`.
    pub fn encode(&self, version: PackVersion, out: &mut Vec<u8>) -> Result<()> {
        let encoded = u32::try_from(self.sizes.encoded).map_err(|_| {
            Error::Format(format!(
                "entry {} encoded size {} exceeds the {} record width",
                self.index,
                self.sizes.encoded,
                version.name()
            ))
        })?;
        match version {
            PackVersion::Ms2f => {
                out.extend_from_slice(&self.index.to_le_bytes());
                out.extend_from_slice(&self.flag.raw().to_le_bytes());
                out.extend_from_slice(&0u32.to_le_bytes());
                out.extend_from_slice(&self.offset.to_le_bytes());
                out.extend_from_slice(&encoded.to_le_bytes());
                out.extend_from_slice(&self.sizes.compressed.to_le_bytes());
                out.extend_from_slice(&self.sizes.raw.to_le_bytes());
            }
            PackVersion::Ns2f => {
                out.extend_from_slice(&self.flag.raw().to_le_bytes());
                out.extend_from_slice(&self.index.to_le_bytes());
                out.extend_from_slice(&encoded.to_le_bytes());
                out.extend_from_slice(&self.sizes.compressed.to_le_bytes());
                out.extend_from_slice(&self.sizes.raw.to_le_bytes());
                out.extend_from_slice(&self.offset.to_le_bytes());
            }
            PackVersion::Os2f | PackVersion::Ps2f => {
                out.extend_from_slice(&self.index.to_le_bytes());
                out.extend_from_slice(&self.flag.raw().to_le_bytes());
                out.extend_from_slice(&encoded.to_le_bytes());
                if version == PackVersion::Ps2f {
                    out.extend_from_slice(&0u32.to_le_bytes());
                }
                out.extend_from_slice(&self.offset.to_le_bytes());
                out.extend_from_slice(&self.sizes.compressed.to_le_bytes());
                out.extend_from_slice(&self.sizes.raw.to_le_bytes());
            }
        }
        Ok(())
    }
}

fn truncated(_: std::io::Error) -> Error {
    Error::Corrupt("truncated file table".into())
}

fn decode_ms2f<R: Read>(r: &mut R) -> Result<FileHeader> {
    let index = r.read_u32::<LittleEndian>().map_err(truncated)?;
    let flag = BufferFlag::from_raw(r.read_u32::<LittleEndian>().map_err(truncated)?)?;
    let _reserved = r.read_u32::<LittleEndian>().map_err(truncated)?;
    let offset = r.read_u64::<LittleEndian>().map_err(truncated)?;
    let encoded = r.read_u32::<LittleEndian>().map_err(truncated)?;
    let compressed = r.read_u64::<LittleEndian>().map_err(truncated)?;
    let raw = r.read_u64::<LittleEndian>().map_err(truncated)?;
    Ok(FileHeader {
        index,
        flag,
        offset,
        sizes: BlobSizes { raw, compressed, encoded: encoded.into() },
    })
}

fn decode_ns2f<R: Read>(r: &mut R) -> Result<FileHeader> {
    let flag = BufferFlag::from_raw(r.read_u32::<LittleEndian>().map_err(truncated)?)?;
    let index = r.read_u32::<LittleEndian>().map_err(truncated)?;
    let encoded = r.read_u32::<LittleEndian>().map_err(truncated)?;
    let compressed = r.read_u64::<LittleEndian>().map_err(truncated)?;
    let raw = r.read_u64::<LittleEndian>().map_err(truncated)?;
    let offset = r.read_u64::<LittleEndian>().map_err(truncated)?;
    Ok(FileHeader {
        index,
        flag,
        offset,
        sizes: BlobSizes { raw, compressed, encoded: encoded.into() },
    })
}

fn decode_v3<R: Read>(r: &mut R, has_reserved: bool) -> Result<FileHeader> {
    let index = r.read_u32::<LittleEndian>().map_err(truncated)?;
    let flag = BufferFlag::from_raw(r.read_u32::<LittleEndian>().map_err(truncated)?)?;
    let encoded = r.read_u32::<LittleEndian>().map_err(truncated)?;
    if has_reserved {
        let _reserved = r.read_u32::<LittleEndian>().map_err(truncated)?;
    }
    let offset = r.read_u64::<LittleEndian>().map_err(truncated)?;
    let compressed = r.read_u64::<LittleEndian>().map_err(truncated)?;
    let raw = r.read_u64::<LittleEndian>().map_err(truncated)?;
    Ok(FileHeader {
        index,
        flag,
        offset,
        sizes: BlobSizes { raw, compressed, encoded: encoded.into() },
    })
}
