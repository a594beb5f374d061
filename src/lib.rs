// SPDX-License-Identifier: GPL-2.0

//! Parsing, validation, and serialization for a WIM image metadata
//! resource: the binary, self-referential on-disk directory tree that
//! pairs hard-link groups, named streams, security descriptor indirection,
//! and short (DOS) names.
//!
//! The compression codec, the blob/lookup table, and WIM header/resource
//! locator parsing are out of scope — they're consumed only through the
//! narrow interfaces in [`collab`].

pub mod collab;
mod codec;
pub mod dentry;
pub mod error;
pub mod inode;
pub mod metadata;
pub mod security;
mod serialize;
mod tree;
mod verify;
pub mod warn;

pub use dentry::{DentryId, DentryNode, FileAttributes, Parent, Stream, StreamType};
pub use error::{Error, Result};
pub use inode::{Inode, InodeId};
pub use metadata::{ImageMetadata, ParseOptions, UnhashedStream};
pub use security::SecurityData;
pub use warn::{CollectingSink, NullSink, Warning, WarnSink};
