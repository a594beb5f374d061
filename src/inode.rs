// SPDX-License-Identifier: GPL-2.0

//! Inode unifier — collects dentries by hard-link group id into inodes.
//!
//! The on-disk format stores one flat dentry per path; dentries that share
//! a nonzero `hard_link_group_id` describe the same logical file reached
//! through multiple names and must be coalesced into a single inode with
//! `nlink > 1`.

use crate::dentry::{FileAttributes, Stream};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct InodeId(pub u32);

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Inode {
    pub hard_link_group_id: u64,
    pub attributes: FileAttributes,
    pub security_id: i32,
    pub creation_time: u64,
    pub last_access_time: u64,
    pub last_write_time: u64,
    pub reparse_tag_or_flags: u64,
    pub streams: Vec<Stream>,
    /// Dentries (by index into `ImageMetadata::dentries`) that resolve to
    /// this inode. `nlink` is `dentries.len()`.
    pub dentries: Vec<u32>,
}

impl Inode {
    pub fn nlink(&self) -> usize {
        self.dentries.len()
    }

    pub fn is_directory(&self) -> bool {
        self.attributes.is_directory()
    }

    pub fn is_reparse_point(&self) -> bool {
        self.attributes.is_reparse_point()
    }
}

/// The fields a group of same-`hard_link_group_id` dentries must agree on
/// before they can be merged into a single inode (spec §4.5 step 2).
pub(crate) struct ProvisionalInode {
    pub hard_link_group_id: u64,
    pub attributes: FileAttributes,
    pub security_id: i32,
    pub creation_time: u64,
    pub last_access_time: u64,
    pub last_write_time: u64,
    pub reparse_tag_or_flags: u64,
    pub streams: Vec<Stream>,
}

fn stream_hash_set(streams: &[Stream]) -> Vec<(crate::dentry::StreamType, Vec<u16>, Option<[u8; 20]>)> {
    let mut v: Vec<_> = streams
        .iter()
        .map(|s| (s.stream_type, s.name.clone(), s.hash))
        .collect();
    v.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
    v
}

fn consistent(a: &ProvisionalInode, b: &ProvisionalInode) -> bool {
    a.attributes == b.attributes
        && a.security_id == b.security_id
        && a.creation_time == b.creation_time
        && a.last_access_time == b.last_access_time
        && a.last_write_time == b.last_write_time
        && a.reparse_tag_or_flags == b.reparse_tag_or_flags
        && stream_hash_set(&a.streams) == stream_hash_set(&b.streams)
}

/// Buckets `provisional[i]` (one per dentry, indexed by dentry id) by
/// `hard_link_group_id`, merging dentries that share a nonzero id into one
/// canonical `Inode`. Returns the final inode arena plus, for each dentry
/// index, the `InodeId` it resolves to.
pub(crate) fn unify_inodes(provisional: Vec<(u32, ProvisionalInode)>) -> Result<(Vec<Inode>, Vec<InodeId>)> {
    use std::collections::HashMap;

    let mut by_group: HashMap<u64, Vec<usize>> = HashMap::new();
    for (idx, (_, p)) in provisional.iter().enumerate() {
        if p.hard_link_group_id != 0 {
            by_group.entry(p.hard_link_group_id).or_default().push(idx);
        }
    }

    let mut inodes = Vec::new();
    // dentry_id -> InodeId, populated in dentry-id order at the end.
    let mut resolved: HashMap<u32, InodeId> = HashMap::new();

    for (idx, (dentry_id, p)) in provisional.iter().enumerate() {
        if p.hard_link_group_id != 0 {
            continue; // handled by the group loop below
        }
        let inode_id = InodeId(inodes.len() as u32);
        inodes.push(Inode {
            hard_link_group_id: 0,
            attributes: p.attributes,
            security_id: p.security_id,
            creation_time: p.creation_time,
            last_access_time: p.last_access_time,
            last_write_time: p.last_write_time,
            reparse_tag_or_flags: p.reparse_tag_or_flags,
            streams: p.streams.clone(),
            dentries: vec![*dentry_id],
        });
        resolved.insert(*dentry_id, inode_id);
        let _ = idx;
    }

    // Stable order over groups: by first member's position in `provisional`.
    let mut group_ids: Vec<u64> = by_group.keys().copied().collect();
    group_ids.sort_by_key(|id| by_group[id][0]);

    for group_id in group_ids {
        let members = &by_group[&group_id];
        let canonical = &provisional[members[0]].1;
        for &m in &members[1..] {
            let other = &provisional[m].1;
            if !consistent(canonical, other) {
                return Err(Error::invalid(format!(
                    "hard-link group {group_id} has inconsistent dentries (attributes, times, \
                     security id, reparse tag, or streams differ)"
                )));
            }
        }

        let inode_id = InodeId(inodes.len() as u32);
        let dentry_ids: Vec<u32> = members.iter().map(|&m| provisional[m].0).collect();
        inodes.push(Inode {
            hard_link_group_id: group_id,
            attributes: canonical.attributes,
            security_id: canonical.security_id,
            creation_time: canonical.creation_time,
            last_access_time: canonical.last_access_time,
            last_write_time: canonical.last_write_time,
            reparse_tag_or_flags: canonical.reparse_tag_or_flags,
            streams: canonical.streams.clone(),
            dentries: dentry_ids.clone(),
        });
        for d in dentry_ids {
            resolved.insert(d, inode_id);
        }
    }

    let mut per_dentry = Vec::with_capacity(provisional.len());
    for (dentry_id, _) in &provisional {
        per_dentry.push(*resolved.get(dentry_id).expect("every dentry is resolved"));
    }

    Ok((inodes, per_dentry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dentry::StreamType;

    fn prov(group: u64) -> ProvisionalInode {
        ProvisionalInode {
            hard_link_group_id: group,
            attributes: FileAttributes::ARCHIVE,
            security_id: -1,
            creation_time: 1,
            last_access_time: 1,
            last_write_time: 1,
            reparse_tag_or_flags: 0,
            streams: vec![Stream {
                stream_type: StreamType::Data,
                name: Vec::new(),
                hash: Some([1u8; 20]),
            }],
        }
    }

    #[test]
    fn unique_dentries_each_get_their_own_inode() {
        let input = vec![(0u32, prov(0)), (1u32, prov(0))];
        let (inodes, per_dentry) = unify_inodes(input).unwrap();
        assert_eq!(inodes.len(), 2);
        assert_ne!(per_dentry[0], per_dentry[1]);
        assert_eq!(inodes[0].nlink(), 1);
    }

    #[test]
    fn shared_group_id_merges_into_one_inode() {
        let input = vec![(0u32, prov(42)), (1u32, prov(42))];
        let (inodes, per_dentry) = unify_inodes(input).unwrap();
        assert_eq!(inodes.len(), 1);
        assert_eq!(per_dentry[0], per_dentry[1]);
        assert_eq!(inodes[0].nlink(), 2);
    }

    #[test]
    fn mismatched_group_members_are_rejected() {
        let mut b = prov(7);
        b.attributes = FileAttributes::DIRECTORY;
        let input = vec![(0u32, prov(7)), (1u32, b)];
        assert!(unify_inodes(input).is_err());
    }
}
