// SPDX-License-Identifier: GPL-2.0

//! Tree serializer — precomputes subdir offsets, allocates one buffer sized
//! to fit, writes security data, dentries, and end-of-directory sentinels,
//! then asserts the buffer was filled exactly.

use crate::codec::{align_up, put_u64};
use crate::dentry::{dentry_out_total_length, write_dentry, DentryId, DentryNode, RawStream};
use crate::inode::Inode;
use crate::security::{recalculate_security_data_length, write_security_data, SecurityData};

fn raw_streams(inode: &Inode) -> Vec<RawStream> {
    inode
        .streams
        .iter()
        .map(|s| RawStream { name: s.name.clone(), hash: s.hash })
        .collect()
}

/// Depth-first pre-order offset assignment (spec §4.7 step 3). For every
/// directory with children, reserves contiguous space for all of its
/// children plus their trailing sentinel before recursing into any of
/// them, so a directory's `subdir_offset` always points at the start of an
/// unbroken run.
fn assign_subdir_offsets(
    dentries: &[DentryNode],
    inodes: &[Inode],
    id: DentryId,
    subdir_offsets: &mut [u64],
    cursor: &mut u64,
) {
    let node = &dentries[id.0 as usize];
    if node.children.is_empty() {
        subdir_offsets[id.0 as usize] = 0;
        return;
    }

    subdir_offsets[id.0 as usize] = *cursor;
    for &child in &node.children {
        let child_node = &dentries[child.0 as usize];
        let child_inode = &inodes[child_node.inode.0 as usize];
        let streams = raw_streams(child_inode);
        *cursor += dentry_out_total_length(&child_node.file_name, &child_node.short_name, &streams);
    }
    *cursor += 8; // end-of-directory sentinel terminating this run

    for &child in &node.children {
        assign_subdir_offsets(dentries, inodes, child, subdir_offsets, cursor);
    }
}

fn write_one_dentry(
    buf: &mut [u8],
    offset: usize,
    dentries: &[DentryNode],
    inodes: &[Inode],
    subdir_offsets: &[u64],
    id: DentryId,
) -> usize {
    let node = &dentries[id.0 as usize];
    let inode = &inodes[node.inode.0 as usize];
    let streams = raw_streams(inode);
    write_dentry(
        buf,
        offset,
        inode.attributes,
        inode.security_id,
        subdir_offsets[id.0 as usize],
        inode.creation_time,
        inode.last_access_time,
        inode.last_write_time,
        inode.hard_link_group_id,
        &node.file_name,
        &node.short_name,
        &streams,
    )
}

/// Writes every directory's child run, recursing depth-first in the same
/// order `assign_subdir_offsets` walked. `written_end` tracks the highest
/// offset any write has reached, so the caller can assert it against the
/// precomputed buffer size once the whole tree is written.
fn write_dentry_tree(
    buf: &mut [u8],
    dentries: &[DentryNode],
    inodes: &[Inode],
    subdir_offsets: &[u64],
    id: DentryId,
    written_end: &mut u64,
) {
    let node = &dentries[id.0 as usize];
    if node.children.is_empty() {
        return;
    }

    let mut off = subdir_offsets[id.0 as usize] as usize;
    for &child in &node.children {
        off = write_one_dentry(buf, off, dentries, inodes, subdir_offsets, child);
    }
    put_u64(buf, off, 0);
    off += 8;
    *written_end = (*written_end).max(off as u64);

    for &child in &node.children {
        write_dentry_tree(buf, dentries, inodes, subdir_offsets, child, written_end);
    }
}

/// Serializes the tree rooted at `root` (spec §4.7). `root == None` encodes
/// the empty-image case: only the security data block is written.
pub(crate) fn serialize_tree(
    dentries: &[DentryNode],
    inodes: &[Inode],
    root: Option<DentryId>,
    security_data: &mut SecurityData,
) -> Vec<u8> {
    recalculate_security_data_length(security_data);

    let root = match root {
        None => {
            let mut buf = vec![0u8; security_data.total_length as usize];
            write_security_data(security_data, &mut buf);
            return buf;
        }
        Some(r) => r,
    };

    let root_node = &dentries[root.0 as usize];
    let root_inode = &inodes[root_node.inode.0 as usize];
    let root_streams = raw_streams(root_inode);

    let mut cursor = align_up(security_data.total_length as u64, 8)
        + dentry_out_total_length(&root_node.file_name, &root_node.short_name, &root_streams)
        + 8; // trailing end-of-directory after the root

    let mut subdir_offsets = vec![0u64; dentries.len()];
    assign_subdir_offsets(dentries, inodes, root, &mut subdir_offsets, &mut cursor);

    let mut buf = vec![0u8; cursor as usize];
    let sec_end = write_security_data(security_data, &mut buf);

    let after_root = write_one_dentry(&mut buf, sec_end, dentries, inodes, &subdir_offsets, root);
    put_u64(&mut buf, after_root, 0); // top-level sentinel after the root
    let mut written_end = (after_root + 8) as u64;

    write_dentry_tree(&mut buf, dentries, inodes, &subdir_offsets, root, &mut written_end);

    assert_eq!(
        written_end,
        cursor,
        "serializer did not fill the precomputed buffer exactly"
    );
    buf
}
