//! Crate-wide error taxonomy.
//!
//! Load and save failures fall into four fatal classes: `Format` (the fixed
//! header cannot be understood at all), `Corrupt` (the header parsed but the
//! archive contradicts itself), `Decrypt` (a single entry's ciphertext fails
//! integrity or size checks), and `Io` (disk failures, always carrying the
//! offending path).  Nothing is downgraded; every public operation returns
//! a typed [`Result`].

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Unrecognized magic or a fixed-header field that cannot be encoded
    /// in the selected version's layout.  Aborts the load with no state
    /// mutated.
    #[error("format error: {0}")]
    Format(String),

    /// The archive contradicts itself: a file-table index out of range, a
    /// truncated blob, a count mismatch, or a decompression failure.
    #[error("corrupt archive: {0}")]
    Corrupt(String),

    /// Cipher or size-field mismatch for one entry.  Entries already
    /// processed are unaffected.
    #[error("decrypt failed for {path}: {detail}")]
    Decrypt { path: String, detail: String },

    /// Disk or path failure, surfaced with the failing path.  A failed save
    /// never touches the source archive pair.
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no entry named {0}")]
    EntryNotFound(String),

    #[error("an entry named {0} already exists")]
    DuplicateEntry(String),

    /// A changed or new entry has no cached plaintext to encrypt.
    #[error("entry {0} has no data to write")]
    MissingData(String),

    /// The progress hook requested an abort between entries.
    #[error("save cancelled by caller")]
    Cancelled,
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io { path: path.into(), source }
    }

    pub(crate) fn decrypt(path: impl Into<String>, detail: impl Into<String>) -> Self {
        Error::Decrypt { path: path.into(), detail: detail.into() }
    }
}
