// SPDX-License-Identifier: GPL-2.0

//! Tree parser — walks the flat buffer following subdir offsets to
//! reconstruct the parent/child tree, starting from the root dentry already
//! located at `security_data.total_length`.

use std::collections::HashSet;

use crate::dentry::{classify_stream, read_dentry, DentryId, DentryNode, DentryRead, Parent};
use crate::error::{Error, Result};
use crate::inode::{unify_inodes, InodeId, ProvisionalInode};
use crate::warn::{Warning, WarnSink};

/// Everything the tree parser produces, before verification: the dentry
/// arena, the unified inode arena, and the root (`None` for an empty
/// image).
pub(crate) struct ParsedTree {
    pub dentries: Vec<DentryNode>,
    pub inodes: Vec<crate::inode::Inode>,
    pub root: Option<DentryId>,
}

struct Builder<'a> {
    buf: &'a [u8],
    buf_len: usize,
    visited_offsets: HashSet<u64>,
    dentries: Vec<DentryNode>,
    provisional: Vec<(u32, ProvisionalInode)>,
}

impl<'a> Builder<'a> {
    /// Parses a contiguous run of sibling dentry records starting at
    /// `offset`, stopping at the end-of-directory sentinel. Each child is
    /// appended to the returned list in disk order, and recursively
    /// expanded before the next sibling is parsed (so `visited_offsets`
    /// reflects a full pre-order walk, matching how a cycle back to an
    /// already-consumed offset is detected regardless of where in the tree
    /// it is reached from).
    fn parse_siblings(&mut self, offset: u64, parent: Parent) -> Result<Vec<DentryId>> {
        let mut children = Vec::new();
        let mut cursor = offset;

        loop {
            if cursor != 0 && !self.visited_offsets.insert(cursor) {
                return Err(Error::invalid(format!(
                    "offset {cursor} is referenced by more than one dentry (cycle or aliasing)"
                )));
            }

            match read_dentry(self.buf, self.buf_len, cursor as usize)? {
                DentryRead::EndOfDirectory => break,
                DentryRead::Record(rec) => {
                    let is_dir = rec.attributes.is_directory();
                    if rec.subdir_offset != 0 && !is_dir {
                        return Err(Error::invalid(
                            "a non-directory dentry has a nonzero subdir_offset",
                        ));
                    }

                    let dentry_id = DentryId(self.dentries.len() as u32);
                    let streams = rec
                        .streams
                        .iter()
                        .map(|s| crate::dentry::Stream {
                            stream_type: classify_stream(rec.attributes, &s.name),
                            name: s.name.clone(),
                            hash: s.hash,
                        })
                        .collect();

                    self.dentries.push(DentryNode {
                        parent,
                        children: Vec::new(),
                        inode: InodeId(dentry_id.0), // placeholder, replaced after unification
                        file_name: rec.file_name.clone(),
                        short_name: rec.short_name.clone(),
                        is_win32_name: true,
                        legacy_hash: rec.legacy_hash,
                    });
                    self.provisional.push((
                        dentry_id.0,
                        ProvisionalInode {
                            hard_link_group_id: rec.hard_link_group_id,
                            attributes: rec.attributes,
                            security_id: rec.security_id,
                            creation_time: rec.creation_time,
                            last_access_time: rec.last_access_time,
                            last_write_time: rec.last_write_time,
                            reparse_tag_or_flags: rec.reparse_tag_or_flags,
                            streams,
                        },
                    ));

                    children.push(dentry_id);

                    if rec.subdir_offset != 0 {
                        let grandchildren =
                            self.parse_siblings(rec.subdir_offset, Parent::Dentry(dentry_id))?;
                        self.dentries[dentry_id.0 as usize].children = grandchildren;
                    }

                    cursor += rec.record_len;
                }
            }
        }

        Ok(children)
    }
}

/// Parses the dentry tree starting at `root_offset` (= the security data's
/// `total_length`). Tolerates the two well-known anomalies spec §4.4 calls
/// out (an empty tree, a named root) by reporting them through `warn`
/// rather than failing.
pub(crate) fn parse_tree(
    buf: &[u8],
    buf_len: usize,
    root_offset: u64,
    warn: &mut dyn WarnSink,
) -> Result<ParsedTree> {
    match read_dentry(buf, buf_len, root_offset as usize)? {
        DentryRead::EndOfDirectory => {
            warn.warn(Warning::EmptyTreeEncodedAsEndOfDirectory);
            Ok(ParsedTree { dentries: Vec::new(), inodes: Vec::new(), root: None })
        }
        DentryRead::Record(rec) => {
            if !rec.attributes.is_directory() {
                return Err(Error::invalid("root of the image must be a directory"));
            }
            if !rec.file_name.is_empty() || !rec.short_name.is_empty() {
                warn.warn(Warning::RootDentryHadName);
            }

            let mut builder = Builder {
                buf,
                buf_len,
                visited_offsets: HashSet::new(),
                dentries: Vec::new(),
                provisional: Vec::new(),
            };
            builder.visited_offsets.insert(root_offset);

            let root_id = DentryId(0);
            let streams = rec
                .streams
                .iter()
                .map(|s| crate::dentry::Stream {
                    stream_type: classify_stream(rec.attributes, &s.name),
                    name: s.name.clone(),
                    hash: s.hash,
                })
                .collect();
            builder.dentries.push(DentryNode {
                parent: Parent::Root,
                children: Vec::new(),
                inode: InodeId(0),
                file_name: Vec::new(), // root name is always canonicalized away
                short_name: Vec::new(),
                is_win32_name: true,
                legacy_hash: rec.legacy_hash,
            });
            builder.provisional.push((
                0,
                ProvisionalInode {
                    hard_link_group_id: rec.hard_link_group_id,
                    attributes: rec.attributes,
                    security_id: rec.security_id,
                    creation_time: rec.creation_time,
                    last_access_time: rec.last_access_time,
                    last_write_time: rec.last_write_time,
                    reparse_tag_or_flags: rec.reparse_tag_or_flags,
                    streams,
                },
            ));

            if rec.subdir_offset != 0 {
                let children = builder.parse_siblings(rec.subdir_offset, Parent::Dentry(root_id))?;
                builder.dentries[0].children = children;
            }

            let Builder { dentries, provisional, .. } = builder;
            let (inodes, per_dentry) = unify_inodes(provisional)?;
            let mut dentries = dentries;
            for (i, d) in dentries.iter_mut().enumerate() {
                d.inode = per_dentry[i];
            }

            Ok(ParsedTree { dentries, inodes, root: Some(root_id) })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dentry::{dentry_out_total_length, write_dentry, FileAttributes};
    use crate::warn::CollectingSink;

    fn empty_dir(file_name: &[u16], subdir_offset: u64) -> (Vec<u8>, u64) {
        let len = dentry_out_total_length(file_name, &[], &[]);
        let mut buf = vec![0u8; len as usize];
        write_dentry(
            &mut buf,
            0,
            FileAttributes::DIRECTORY,
            -1,
            subdir_offset,
            0,
            0,
            0,
            0,
            file_name,
            &[],
            &[],
        );
        (buf, len)
    }

    #[test]
    fn empty_image_warns_and_yields_no_root() {
        let buf = [0u8; 8];
        let mut sink = CollectingSink::default();
        let tree = parse_tree(&buf, buf.len(), 0, &mut sink).unwrap();
        assert!(tree.root.is_none());
        assert_eq!(sink.0, vec![Warning::EmptyTreeEncodedAsEndOfDirectory]);
    }

    #[test]
    fn named_root_is_tolerated_with_warning() {
        let name: Vec<u16> = "junk".encode_utf16().collect();
        let (buf, _) = empty_dir(&name, 0);
        let mut buf = buf;
        buf.extend_from_slice(&[0u8; 8]); // trailing sentinel, harmless
        let mut sink = CollectingSink::default();
        let tree = parse_tree(&buf, buf.len(), 0, &mut sink).unwrap();
        assert!(tree.root.is_some());
        assert_eq!(sink.0, vec![Warning::RootDentryHadName]);
    }

    #[test]
    fn non_directory_root_is_rejected() {
        let len = dentry_out_total_length(&[], &[], &[]);
        let mut buf = vec![0u8; len as usize];
        write_dentry(&mut buf, 0, FileAttributes::ARCHIVE, -1, 0, 0, 0, 0, 0, &[], &[], &[]);
        let mut sink = CollectingSink::default();
        assert!(parse_tree(&buf, buf.len(), 0, &mut sink).is_err());
    }
}
