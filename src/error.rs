// SPDX-License-Identifier: GPL-2.0

//! Error taxonomy for the image metadata resource subsystem.
//!
//! A library crate needs a matchable error surface rather than an opaque
//! `anyhow::Error` — callers (a WIM library, a fsck tool, a fuzzer) need to
//! tell a corrupt tree apart from a host allocation failure. The variants
//! mirror the taxonomy in the format's own error codes: structural/integrity
//! failures are `InvalidMetadata`, truncated input is `UnexpectedEndOfFile`,
//! and upstream decompression failures are threaded through unchanged.

use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// A structural or semantic violation of the on-disk format: an offset
    /// out of bounds, a length under the minimum, a cycle, a mismatched
    /// hard-link group, and so on. Fatal for the image being parsed.
    InvalidMetadata { reason: String },
    /// The buffer ended before a record that claimed more bytes than were
    /// available.
    UnexpectedEndOfFile,
    /// The injected codec failed to decompress the resource. The original
    /// error is preserved as the cause.
    Decompression(Box<dyn std::error::Error + Send + Sync + 'static>),
    /// A `Vec`/`String` allocation failed. In practice this only surfaces
    /// from the standard allocator's global handler, but callers that wrap
    /// us in a `catch_unwind` boundary still want a named variant to match
    /// on rather than a panic.
    OutOfMemory,
}

impl Error {
    pub(crate) fn invalid(reason: impl Into<String>) -> Error {
        Error::InvalidMetadata { reason: reason.into() }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidMetadata { reason } => {
                write!(f, "invalid metadata resource: {reason}")
            }
            Error::UnexpectedEndOfFile => write!(f, "unexpected end of file"),
            Error::Decompression(e) => write!(f, "decompression failed: {e}"),
            Error::OutOfMemory => write!(f, "out of memory"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Decompression(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
