//! Version registry: 4-byte magic → header-layout variant.
//!
//! Four historical on-disk layouts exist.  The version tag is decided once,
//! from the first four bytes of the header file, and is immutable for the
//! lifetime of a loaded archive.  Everything that differs between versions —
//! fixed-field order, size-field width, per-entry record shape — is keyed
//! off this enum and implemented as stateless per-version functions in
//! `stream` and `header`; no other module re-derives layout facts.

use crate::error::{Error, Result};

pub const MAGIC_MS2F: [u8; 4] = *b"MS2F";
pub const MAGIC_NS2F: [u8; 4] = *b"NS2F";
pub const MAGIC_OS2F: [u8; 4] = *b"OS2F";
pub const MAGIC_PS2F: [u8; 4] = *b"PS2F";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackVersion {
    Ms2f,
    Ns2f,
    Os2f,
    Ps2f,
}

pub const ALL_VERSIONS: [PackVersion; 4] = [
    PackVersion::Ms2f,
    PackVersion::Ns2f,
    PackVersion::Os2f,
    PackVersion::Ps2f,
];

impl PackVersion {
    /// Resolve a magic to a version tag.  Anything unrecognized is a
    /// `Format` error and the load must abort before touching any state.
    pub fn from_magic(magic: [u8; 4]) -> Result<Self> {
        match magic {
            MAGIC_MS2F => Ok(PackVersion::Ms2f),
            MAGIC_NS2F => Ok(PackVersion::Ns2f),
            MAGIC_OS2F => Ok(PackVersion::Os2f),
            MAGIC_PS2F => Ok(PackVersion::Ps2f),
            other => Err(Error::Format(format!(
                "unrecognized magic {:02x?}",
                other
            ))),
        }
    }

    #[inline]
    pub const fn magic(self) -> [u8; 4] {
        match self {
            PackVersion::Ms2f => MAGIC_MS2F,
            PackVersion::Ns2f => MAGIC_NS2F,
            PackVersion::Os2f => MAGIC_OS2F,
            PackVersion::Ps2f => MAGIC_PS2F,
        }
    }

    /// Human-readable tag (diagnostics only — never parsed).
    pub const fn name(self) -> &'static str {
        match self {
            PackVersion::Ms2f => "MS2F",
            PackVersion::Ns2f => "NS2F",
            PackVersion::Os2f => "OS2F",
            PackVersion::Ps2f => "PS2F",
        }
    }

    /// Whether the fixed stream header stores its size sextuple as u64
    /// fields.  NS2F is the one u32-wide layout; encoding a size above
    /// `u32::MAX` under it is a `Format` error, never a truncation.
    #[inline]
    pub const fn wide_stream_sizes(self) -> bool {
        !matches!(self, PackVersion::Ns2f)
    }

    /// Byte length of one file-table record under this version.
    #[inline]
    pub const fn record_len(self) -> usize {
        match self {
            PackVersion::Ms2f => 40,
            PackVersion::Ns2f => 36,
            PackVersion::Os2f => 36,
            PackVersion::Ps2f => 40,
        }
    }

    /// Parse from a CLI string.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "MS2F" => Some(PackVersion::Ms2f),
            "NS2F" => Some(PackVersion::Ns2f),
            "OS2F" => Some(PackVersion::Os2f),
            "PS2F" => Some(PackVersion::Ps2f),
            _ => None,
        }
    }
}
