// SPDX-License-Identifier: GPL-2.0

//! Security data codec — the image's set of Windows security descriptors.
//!
//! Stored once per image as a length-prefixed array of opaque SD byte
//! strings; inodes reference entries by index. `total_length` is
//! authoritative: the parser trusts it (after validating it) rather than
//! summing entry sizes to find where the first dentry begins.

use crate::codec::{align_up, get_bytes, get_u32, get_u64, put_bytes, put_u32, put_u64};
use crate::error::{Error, Result};

const HEADER_SIZE: usize = 8; // total_length:u32 + num_entries:u32
const SIZE_ENTRY_WIDTH: usize = 8; // u64 per entry

#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SecurityData {
    /// Raw, opaque security descriptor bytes, in on-disk order.
    pub entries: Vec<Vec<u8>>,
    /// The on-disk `total_length` field. Authoritative after a successful
    /// parse; recomputed by `recalculate_security_data_length` before every
    /// serialization.
    pub total_length: u32,
}

impl SecurityData {
    pub fn num_entries(&self) -> u32 {
        self.entries.len() as u32
    }

    /// Returns the index of `sd` in `entries`, appending it if it isn't
    /// already present. Security descriptors repeat heavily within a single
    /// image (most files in a tree share an ACL), so capture/update
    /// collaborators intern by content rather than appending duplicates.
    pub fn add_or_dedup(&mut self, sd: &[u8]) -> i32 {
        if let Some(idx) = self.entries.iter().position(|e| e.as_slice() == sd) {
            return idx as i32;
        }
        self.entries.push(sd.to_vec());
        (self.entries.len() - 1) as i32
    }
}

/// Parses the security data block starting at offset 0 of `buf`.
/// `len` is the full metadata resource length (not just this block) — the
/// block's own `total_length` must not exceed it.
///
/// Returns the parsed `SecurityData` and the offset of the first byte past
/// it (where the root dentry begins).
pub fn read_security_data(buf: &[u8], len: usize) -> Result<(SecurityData, usize)> {
    if len < HEADER_SIZE {
        return Err(Error::invalid(format!(
            "metadata resource too short for security data header ({len} < {HEADER_SIZE})"
        )));
    }

    let total_length = get_u32(buf, 0)?;
    let num_entries = get_u32(buf, 4)?;

    if total_length % 8 != 0 {
        return Err(Error::invalid(format!(
            "security data total_length {total_length} is not 8-byte aligned"
        )));
    }
    if (total_length as usize) > len {
        return Err(Error::invalid(format!(
            "security data total_length {total_length} exceeds resource length {len}"
        )));
    }
    if (total_length as usize) < HEADER_SIZE {
        return Err(Error::invalid(
            "security data total_length smaller than its own header",
        ));
    }

    let max_entries = (total_length as u64 - HEADER_SIZE as u64) / SIZE_ENTRY_WIDTH as u64;
    if num_entries as u64 > max_entries {
        return Err(Error::invalid(format!(
            "security data declares {num_entries} entries but total_length {total_length} \
             cannot hold more than {max_entries}"
        )));
    }

    let sizes_off = HEADER_SIZE;
    let mut sizes = Vec::with_capacity(num_entries as usize);
    for i in 0..num_entries as usize {
        sizes.push(get_u64(buf, sizes_off + i * SIZE_ENTRY_WIDTH)?);
    }

    let data_off = sizes_off + num_entries as usize * SIZE_ENTRY_WIDTH;
    let sum: u64 = sizes.iter().sum();
    let required = data_off as u64 + sum;
    if required > total_length as u64 {
        return Err(Error::invalid(format!(
            "security data entries overflow total_length ({required} > {total_length})"
        )));
    }

    let mut entries = Vec::with_capacity(num_entries as usize);
    let mut cursor = data_off;
    for &size in &sizes {
        let sd = get_bytes(buf, cursor, size as usize)?;
        entries.push(sd.to_vec());
        cursor += size as usize;
    }

    let sd = SecurityData { entries, total_length };
    Ok((sd, total_length as usize))
}

/// Recomputes `total_length` from the current entries. Must be called
/// before every serialization, since callers may have added SDs via
/// `add_or_dedup` since the last write.
pub fn recalculate_security_data_length(sd: &mut SecurityData) {
    let raw = HEADER_SIZE as u64
        + sd.entries.len() as u64 * SIZE_ENTRY_WIDTH as u64
        + sd.entries.iter().map(|e| e.len() as u64).sum::<u64>();
    sd.total_length = align_up(raw, 8) as u32;
}

/// Writes the security data block into `buf` starting at offset 0. `buf`
/// must be at least `sd.total_length` bytes and is expected to already be
/// zeroed (the trailing pad is therefore implicit). Returns the offset of
/// the first byte past the block.
pub fn write_security_data(sd: &SecurityData, buf: &mut [u8]) -> usize {
    put_u32(buf, 0, sd.total_length);
    put_u32(buf, 4, sd.num_entries());

    let sizes_off = HEADER_SIZE;
    for (i, e) in sd.entries.iter().enumerate() {
        put_u64(buf, sizes_off + i * SIZE_ENTRY_WIDTH, e.len() as u64);
    }

    let mut cursor = sizes_off + sd.entries.len() * SIZE_ENTRY_WIDTH;
    for e in &sd.entries {
        put_bytes(buf, cursor, e);
        cursor += e.len();
    }

    sd.total_length as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_security_data_roundtrips() {
        let mut sd = SecurityData::default();
        recalculate_security_data_length(&mut sd);
        assert_eq!(sd.total_length, 8);

        let mut buf = vec![0u8; sd.total_length as usize];
        let end = write_security_data(&sd, &mut buf);
        assert_eq!(end, 8);

        let (parsed, next_off) = read_security_data(&buf, buf.len()).unwrap();
        assert_eq!(next_off, 8);
        assert_eq!(parsed.entries.len(), 0);
    }

    #[test]
    fn entries_roundtrip_and_dedup() {
        let mut sd = SecurityData::default();
        let idx_a = sd.add_or_dedup(b"sd-a");
        let idx_b = sd.add_or_dedup(b"sd-bbb");
        let idx_a_again = sd.add_or_dedup(b"sd-a");
        assert_eq!(idx_a, idx_a_again);
        assert_ne!(idx_a, idx_b);

        recalculate_security_data_length(&mut sd);
        let mut buf = vec![0u8; sd.total_length as usize];
        write_security_data(&sd, &mut buf);

        let (parsed, next_off) = read_security_data(&buf, buf.len()).unwrap();
        assert_eq!(next_off, sd.total_length as usize);
        assert_eq!(parsed.entries, sd.entries);
    }

    #[test]
    fn oversized_total_length_is_rejected() {
        let mut buf = vec![0u8; 16];
        put_u32(&mut buf, 0, 17);
        put_u32(&mut buf, 4, 0);
        assert!(read_security_data(&buf, buf.len()).is_err());
    }

    #[test]
    fn misaligned_total_length_is_rejected() {
        let mut buf = vec![0u8; 16];
        put_u32(&mut buf, 0, 9);
        put_u32(&mut buf, 4, 0);
        assert!(read_security_data(&buf, buf.len()).is_err());
    }
}
