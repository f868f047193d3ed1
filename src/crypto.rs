//! Encryption/compression pipeline dispatcher.
//!
//! Every blob in the archive — each entry's data span, the name manifest,
//! and the file table — goes through one of three pipelines selected by a
//! [`BufferFlag`]:
//!
//! - **Xor**: one reversible pass against a per-version rolling key table.
//!   Size-preserving; used for streaming media that must stay seekable.
//! - **Aes**: AES-256-GCM over the plaintext.  Payload layout is
//!   `nonce (12 B) || ciphertext || GCM tag (16 B)`, so the encoded length
//!   always exceeds the raw length by [`AEAD_OVERHEAD`].
//! - **AesZstd**: zstd-compress, then AES-256-GCM over the compressed bytes.
//!
//! The GCM nonce is random per encryption, so encrypting the same plaintext
//! twice yields different ciphertext.  The rebuild path copies unchanged
//! entries verbatim for exactly this reason.
//!
//! Keys are a pure function of the version tag: the AES key comes from
//! BLAKE3 key derivation over the 4-byte magic, and the XOR table from the
//! BLAKE3 XOF under a separate context string.

use std::io::{Read, Seek, SeekFrom};

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng};
use aes_gcm::{Aes256Gcm, Nonce};

use crate::error::{Error, Result};
use crate::header::{BlobSizes, FileHeader};
use crate::version::PackVersion;

/// Byte length of the AES-GCM nonce prepended to every cipher payload.
pub const NONCE_LEN: usize = 12;
/// Byte length of the GCM tag appended to every cipher payload.
pub const TAG_LEN: usize = 16;
/// Fixed growth of a cipher pipeline: `encoded == input + AEAD_OVERHEAD`.
pub const AEAD_OVERHEAD: u64 = (NONCE_LEN + TAG_LEN) as u64;

const XOR_TABLE_LEN: usize = 512;
const ZSTD_LEVEL: i32 = 3;

const AES_KEY_CONTEXT: &str = "m2pack 2019-02-14 pack stream aes-256-gcm key";
const XOR_KEY_CONTEXT: &str = "m2pack 2019-02-14 pack stream xor key table";

// ── BufferFlag ───────────────────────────────────────────────────────────────

const FLAG_AES: u32 = 0x01;
const FLAG_ZSTD: u32 = 0x02;
const FLAG_XOR: u32 = 0x04;

/// Pipeline selector carried in every file-table record.
///
/// Chosen once when an entry is first written (see [`BufferFlag::for_path`])
/// and preserved unchanged for the entry's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferFlag {
    Xor,
    Aes,
    AesZstd,
}

impl BufferFlag {
    /// The on-disk u32 for this flag.
    #[inline]
    pub const fn raw(self) -> u32 {
        match self {
            BufferFlag::Xor => FLAG_XOR,
            BufferFlag::Aes => FLAG_AES,
            BufferFlag::AesZstd => FLAG_AES | FLAG_ZSTD,
        }
    }

    /// Resolve an on-disk flag.  The flag comes out of the decrypted file
    /// table, so an unknown value means the table itself is bad.
    pub fn from_raw(raw: u32) -> Result<Self> {
        match raw {
            FLAG_XOR => Ok(BufferFlag::Xor),
            FLAG_AES => Ok(BufferFlag::Aes),
            v if v == FLAG_AES | FLAG_ZSTD => Ok(BufferFlag::AesZstd),
            other => Err(Error::Corrupt(format!(
                "unknown buffer flag {other:#010x} in file table"
            ))),
        }
    }

    /// Extension heuristic applied to entries that have never been written:
    /// `.usm` video streams get the size-preserving XOR pass, `.png` images
    /// are encrypted without compression, everything else is compressed
    /// first.
    pub fn for_path(path: &str) -> Self {
        if path.ends_with(".usm") {
            BufferFlag::Xor
        } else if path.ends_with(".png") {
            BufferFlag::Aes
        } else {
            BufferFlag::AesZstd
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            BufferFlag::Xor => "xor",
            BufferFlag::Aes => "aes",
            BufferFlag::AesZstd => "aes+zstd",
        }
    }
}

// ── Key schedule ─────────────────────────────────────────────────────────────

fn aes_key(version: PackVersion) -> [u8; 32] {
    blake3::derive_key(AES_KEY_CONTEXT, &version.magic())
}

fn xor_table(version: PackVersion) -> [u8; XOR_TABLE_LEN] {
    let mut table = [0u8; XOR_TABLE_LEN];
    let mut hasher = blake3::Hasher::new_derive_key(XOR_KEY_CONTEXT);
    hasher.update(&version.magic());
    hasher.finalize_xof().fill(&mut table);
    table
}

fn xor_pass(version: PackVersion, data: &mut [u8]) {
    let table = xor_table(version);
    for (i, b) in data.iter_mut().enumerate() {
        *b ^= table[i % XOR_TABLE_LEN];
    }
}

// ── Cipher primitives ────────────────────────────────────────────────────────

fn aes_encrypt(version: PackVersion, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(&aes_key(version))
        .map_err(|_| Error::Format("bad aes key length".into()))?;
    let nonce = Aes256Gcm::generate_nonce(&mut AeadOsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| Error::Format("payload too large to encrypt".into()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(nonce.as_slice());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn aes_decrypt(version: PackVersion, data: &[u8], label: &str) -> Result<Vec<u8>> {
    if data.len() < NONCE_LEN + TAG_LEN {
        return Err(Error::decrypt(label, "payload shorter than the aead envelope"));
    }
    let cipher = Aes256Gcm::new_from_slice(&aes_key(version))
        .map_err(|_| Error::decrypt(label, "bad aes key length"))?;
    let nonce = Nonce::from_slice(&data[..NONCE_LEN]);
    cipher
        .decrypt(nonce, &data[NONCE_LEN..])
        .map_err(|_| Error::decrypt(label, "aead authentication failed"))
}

// ── Pipelines ────────────────────────────────────────────────────────────────

/// Run `plaintext` forward through the pipeline selected by `flag`.
///
/// Returns the encoded bytes and the raw/compressed/encoded size triple
/// that must be recorded in the entry's header.
pub fn encrypt(
    version: PackVersion,
    flag: BufferFlag,
    plaintext: &[u8],
) -> Result<(Vec<u8>, BlobSizes)> {
    let raw = plaintext.len() as u64;
    match flag {
        BufferFlag::Xor => {
            let mut out = plaintext.to_vec();
            xor_pass(version, &mut out);
            Ok((out, BlobSizes { raw, compressed: raw, encoded: raw }))
        }
        BufferFlag::Aes => {
            let out = aes_encrypt(version, plaintext)?;
            let encoded = out.len() as u64;
            Ok((out, BlobSizes { raw, compressed: raw, encoded }))
        }
        BufferFlag::AesZstd => {
            // No store fallback: the compressed stream is written even when
            // it fails to shrink the payload.
            let packed = zstd::encode_all(plaintext, ZSTD_LEVEL)
                .map_err(|e| Error::Format(format!("zstd compression failed: {e}")))?;
            let compressed = packed.len() as u64;
            let out = aes_encrypt(version, &packed)?;
            let encoded = out.len() as u64;
            Ok((out, BlobSizes { raw, compressed, encoded }))
        }
    }
}

/// Run `ciphertext` backward through the pipeline, checking every size
/// field along the way.  `label` names the blob in error messages (an entry
/// path, or "name manifest" / "file table").
pub fn decrypt(
    version: PackVersion,
    flag: BufferFlag,
    sizes: BlobSizes,
    ciphertext: &[u8],
    label: &str,
) -> Result<Vec<u8>> {
    if ciphertext.len() as u64 != sizes.encoded {
        return Err(Error::decrypt(
            label,
            format!("expected {} encoded bytes, got {}", sizes.encoded, ciphertext.len()),
        ));
    }
    match flag {
        BufferFlag::Xor => {
            if sizes.raw != sizes.encoded {
                return Err(Error::decrypt(label, "xor span sizes disagree"));
            }
            let mut out = ciphertext.to_vec();
            xor_pass(version, &mut out);
            Ok(out)
        }
        BufferFlag::Aes => {
            let out = aes_decrypt(version, ciphertext, label)?;
            if out.len() as u64 != sizes.raw {
                return Err(Error::decrypt(
                    label,
                    format!("expected {} plaintext bytes, got {}", sizes.raw, out.len()),
                ));
            }
            Ok(out)
        }
        BufferFlag::AesZstd => {
            let packed = aes_decrypt(version, ciphertext, label)?;
            if packed.len() as u64 != sizes.compressed {
                return Err(Error::decrypt(
                    label,
                    format!("expected {} compressed bytes, got {}", sizes.compressed, packed.len()),
                ));
            }
            let out = zstd::decode_all(&packed[..]).map_err(|e| {
                Error::Corrupt(format!("zstd decompression of {label} failed: {e}"))
            })?;
            if out.len() as u64 != sizes.raw {
                return Err(Error::decrypt(
                    label,
                    format!("expected {} plaintext bytes, got {}", sizes.raw, out.len()),
                ));
            }
            Ok(out)
        }
    }
}

/// Decrypt one entry's span from a random-access view of the data blob.
///
/// Seeks to `header.offset` and reads exactly `header.sizes.encoded` bytes —
/// the blob is never loaded whole, so this stays cheap against
/// multi-gigabyte archives.
pub fn decrypt_from<R: Read + Seek>(
    version: PackVersion,
    header: &FileHeader,
    source: &mut R,
    label: &str,
) -> Result<Vec<u8>> {
    let len = usize::try_from(header.sizes.encoded)
        .map_err(|_| Error::Corrupt(format!("encoded size of {label} overflows usize")))?;
    source
        .seek(SeekFrom::Start(header.offset))
        .map_err(|e| Error::Corrupt(format!("seek to offset {} failed: {e}", header.offset)))?;
    let mut buf = vec![0u8; len];
    source.read_exact(&mut buf).map_err(|_| {
        Error::Corrupt(format!(
            "encoded span of {label} ({}..{}) runs past the end of the data blob",
            header.offset,
            header.offset + header.sizes.encoded
        ))
    })?;
    decrypt(version, header.flag, header.sizes, &buf, label)
}
