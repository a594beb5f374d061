// SPDX-License-Identifier: GPL-2.0

//! Verifier — structural and semantic invariants over the built inode set,
//! run once after tree parsing and inode unification and before an
//! `ImageMetadata` is handed to the caller.

use crate::collab::BlobTable;
use crate::dentry::StreamType;
use crate::error::{Error, Result};
use crate::inode::Inode;
use crate::security::SecurityData;
use crate::warn::{Warning, WarnSink};

/// The minimum size of reparse point data (`ReparseTag` + `ReparseDataLength`
/// + `Reserved`), below which a `REPARSE_POINT` stream can't even hold a
/// well-formed reparse header.
const REPARSE_DATA_MIN_SIZE: u64 = 8;

pub(crate) struct VerifyOptions {
    pub strict_directory_streams: bool,
}

/// Checks every inode against spec §4.6. `blobs` is optional: the blob
/// table lives outside this crate's scope, so when the caller hasn't wired
/// one up the reparse-point size check is skipped rather than guessed at.
pub(crate) fn verify_inodes(
    inodes: &[Inode],
    security_data: &SecurityData,
    blobs: Option<&dyn BlobTable>,
    opts: &VerifyOptions,
    warn: &mut dyn WarnSink,
) -> Result<()> {
    for (idx, inode) in inodes.iter().enumerate() {
        if inode.security_id != -1
            && inode.security_id as u32 >= security_data.num_entries()
        {
            return Err(Error::invalid(format!(
                "inode {idx} has out-of-range security_id {}",
                inode.security_id
            )));
        }

        let has_unnamed_data = inode
            .streams
            .iter()
            .any(|s| s.stream_type == StreamType::Data && s.name.is_empty());
        if inode.is_directory() && has_unnamed_data {
            if opts.strict_directory_streams {
                return Err(Error::invalid(format!(
                    "directory inode {idx} has an unnamed DATA stream"
                )));
            }
            warn.warn(Warning::DirectoryHasUnnamedDataStream {
                inode: crate::inode::InodeId(idx as u32),
            });
        }

        if inode.is_reparse_point() {
            let reparse_stream = inode
                .streams
                .iter()
                .find(|s| s.stream_type == StreamType::ReparsePoint);
            match reparse_stream {
                None => {
                    return Err(Error::invalid(format!(
                        "reparse-point inode {idx} has no REPARSE_POINT stream"
                    )))
                }
                Some(s) => {
                    if let (Some(blobs), Some(hash)) = (blobs, s.hash) {
                        let size = blobs.lookup(&hash).map(|b| b.size).unwrap_or(0);
                        if size < REPARSE_DATA_MIN_SIZE {
                            return Err(Error::invalid(format!(
                                "reparse-point inode {idx} has undersized reparse data ({size} \
                                 bytes, need at least {REPARSE_DATA_MIN_SIZE})"
                            )));
                        }
                    }
                }
            }
        }

        let mut seen = std::collections::HashSet::new();
        for s in &inode.streams {
            if !seen.insert((s.stream_type, s.name.clone())) {
                return Err(Error::invalid(format!(
                    "inode {idx} has a duplicate stream name within one stream type"
                )));
            }
        }

        for t in [inode.creation_time, inode.last_access_time, inode.last_write_time] {
            if t == u64::MAX {
                return Err(Error::invalid(format!(
                    "inode {idx} has a FILETIME value outside the representable range"
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dentry::{FileAttributes, Stream};

    fn base_inode() -> Inode {
        Inode {
            hard_link_group_id: 0,
            attributes: FileAttributes::ARCHIVE,
            security_id: -1,
            creation_time: 1,
            last_access_time: 1,
            last_write_time: 1,
            reparse_tag_or_flags: 0,
            streams: Vec::new(),
            dentries: vec![0],
        }
    }

    #[test]
    fn out_of_range_security_id_is_rejected() {
        let mut inode = base_inode();
        inode.security_id = 5;
        let opts = VerifyOptions { strict_directory_streams: true };
        let mut sink = crate::warn::NullSink;
        assert!(verify_inodes(&[inode], &SecurityData::default(), None, &opts, &mut sink).is_err());
    }

    #[test]
    fn directory_with_unnamed_data_stream_is_rejected_when_strict() {
        let mut inode = base_inode();
        inode.attributes = FileAttributes::DIRECTORY;
        inode.streams.push(Stream { stream_type: StreamType::Data, name: Vec::new(), hash: None });
        let opts = VerifyOptions { strict_directory_streams: true };
        let mut sink = crate::warn::NullSink;
        assert!(verify_inodes(&[inode], &SecurityData::default(), None, &opts, &mut sink).is_err());
    }

    #[test]
    fn directory_with_unnamed_data_stream_warns_when_lenient() {
        let mut inode = base_inode();
        inode.attributes = FileAttributes::DIRECTORY;
        inode.streams.push(Stream { stream_type: StreamType::Data, name: Vec::new(), hash: None });
        let opts = VerifyOptions { strict_directory_streams: false };
        let mut sink = crate::warn::CollectingSink::default();
        verify_inodes(&[inode], &SecurityData::default(), None, &opts, &mut sink).unwrap();
        assert_eq!(sink.0.len(), 1);
    }

    #[test]
    fn reparse_point_without_stream_is_rejected() {
        let mut inode = base_inode();
        inode.attributes = FileAttributes::REPARSE_POINT;
        let opts = VerifyOptions { strict_directory_streams: true };
        let mut sink = crate::warn::NullSink;
        assert!(verify_inodes(&[inode], &SecurityData::default(), None, &opts, &mut sink).is_err());
    }

    #[test]
    fn duplicate_stream_names_are_rejected() {
        let mut inode = base_inode();
        inode.streams.push(Stream { stream_type: StreamType::Data, name: vec![b'a' as u16], hash: None });
        inode.streams.push(Stream { stream_type: StreamType::Data, name: vec![b'a' as u16], hash: None });
        let opts = VerifyOptions { strict_directory_streams: true };
        let mut sink = crate::warn::NullSink;
        assert!(verify_inodes(&[inode], &SecurityData::default(), None, &opts, &mut sink).is_err());
    }
}
