// SPDX-License-Identifier: GPL-2.0

//! Warning sink — the channel for "tolerated anomaly, continue" conditions.
//!
//! A handful of source corruptions are well-known enough that rejecting them
//! outright would make the library unusable against the corpus of files
//! that actually exist in the wild (see spec §7, "tolerated anomalies").
//! Those get reported here instead of as an `Err`.

use crate::inode::InodeId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// The metadata resource's would-be root dentry was itself an
    /// end-of-directory sentinel (`length == 0`). The image is treated as
    /// empty.
    EmptyTreeEncodedAsEndOfDirectory,
    /// The root dentry carried a nonempty long or short name. The name is
    /// stripped at parse time.
    RootDentryHadName,
    /// A directory inode carried an unnamed DATA stream. Only reported when
    /// `ParseOptions::strict_directory_streams` is `false`; under strict
    /// parsing this is `Error::InvalidMetadata` instead.
    DirectoryHasUnnamedDataStream { inode: InodeId },
}

pub trait WarnSink {
    fn warn(&mut self, warning: Warning);
}

impl<F: FnMut(Warning)> WarnSink for F {
    fn warn(&mut self, warning: Warning) {
        self(warning)
    }
}

/// A sink that just remembers everything it was told, in order. Handy for
/// tests and for callers who want to inspect anomalies after the fact
/// instead of reacting to them as they occur.
#[derive(Debug, Default, Clone)]
pub struct CollectingSink(pub Vec<Warning>);

impl WarnSink for CollectingSink {
    fn warn(&mut self, warning: Warning) {
        self.0.push(warning);
    }
}

/// A sink that discards everything. Useful when a caller genuinely doesn't
/// care about tolerated anomalies.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl WarnSink for NullSink {
    fn warn(&mut self, _warning: Warning) {}
}
