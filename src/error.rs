//! Error vocabulary for `dfucom`.
//!
//! Parsing and extraction failures abort the update before any byte reaches
//! the device; connection failures are fatal and never retried. The only
//! recoverable condition is a console line that cannot be decoded, which the
//! monitor logs and skips.

use std::time::Duration;

use thiserror::Error;

use crate::record::RecordError;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while driving a modem firmware update.
#[derive(Error, Debug)]
pub enum Error {
    /// A resource file line failed record framing or hex decoding. Carries
    /// the file and 1-based line number of the offending line.
    #[error("malformed record at {file}:{line}: {source}")]
    MalformedRecord {
        file: String,
        line: usize,
        #[source]
        source: RecordError,
    },

    /// The selected image archive does not contain one of the resources the
    /// update needs.
    #[error("firmware image `{image}` has no `{resource}` entry")]
    Extraction {
        image: String,
        resource: &'static str,
    },

    /// The selected image archive could not be read at all.
    #[error("failed to read firmware archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// The serial link failed. Fatal; the update is never resumed.
    #[error("serial connection error: {0}")]
    Connection(#[from] serialport::Error),

    /// The host side cannot drive an update: missing or ambiguous image
    /// candidates, unreadable image store, and the like.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A console line matched a marker but is not valid UTF-8. Recoverable
    /// at the line level; the monitor logs it and keeps reading.
    #[error("console line is not valid UTF-8: {0}")]
    Decode(#[from] std::str::Utf8Error),

    /// A bounded wait on the device expired.
    #[error("timed out after {waited:?} waiting for {waiting_for}")]
    Timeout {
        waited: Duration,
        waiting_for: &'static str,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
