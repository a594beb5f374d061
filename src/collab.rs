// SPDX-License-Identifier: GPL-2.0

//! External collaborator interfaces.
//!
//! Everything this crate needs from the rest of a WIM library — the
//! compression codec, the blob/lookup table, hashing — is named here as a
//! narrow trait or free function rather than pulled in as a dependency. A
//! real library wires its own codec and blob table through these seams;
//! this crate never constructs one itself.

use crate::error::Result;

/// Metadata a codec returns after compressing and writing a resource: where
/// it landed and how big it is on disk. Opaque beyond that — this crate
/// only ever threads it back to the caller.
#[derive(Debug, Clone, Copy)]
pub struct ResourceHeader {
    pub offset_in_wim: u64,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

/// What a stream's blob reference resolves to once it's been deduplicated
/// against the blob table. `size` is the only field the verifier needs (to
/// check a reparse point's minimum data size); the rest is opaque.
#[derive(Debug, Clone, Copy)]
pub struct BlobRef {
    pub size: u64,
}

/// The compression/decompression boundary. `lte` (lookup table entry) is
/// typed as `&dyn Any` because its concrete shape belongs to the resource
/// locator subsystem this crate doesn't depend on; a real caller downcasts
/// it on their side of the call.
pub trait ResourceCodec {
    fn decompress(&self, lte: &dyn std::any::Any) -> Result<Vec<u8>>;
    fn compress_and_write(&mut self, buf: &[u8], flags: u32) -> Result<(ResourceHeader, [u8; 20])>;
}

/// The deduplicated blob store streams refer to by hash.
pub trait BlobTable {
    fn lookup(&self, hash: &[u8; 20]) -> Option<BlobRef>;
}

const H0: u32 = 0x6745_2301;
const H1: u32 = 0xEFCD_AB89;
const H2: u32 = 0x98BA_DCFE;
const H3: u32 = 0x1032_5476;
const H4: u32 = 0xC3D2_E1F0;

/// A minimal, dependency-free SHA-1. Used only to verify
/// `ParseOptions::dont_check_metadata_hash`'s gate in
/// `ImageMetadata::parse` — not exposed as a general-purpose hashing API,
/// so a single fixed, non-configurable digest doesn't earn a crypto crate
/// dependency.
pub fn sha1(buf: &[u8]) -> [u8; 20] {
    let mut h = [H0, H1, H2, H3, H4];

    let bit_len = (buf.len() as u64) * 8;
    let mut msg = buf.to_vec();
    msg.push(0x80);
    while msg.len() % 64 != 56 {
        msg.push(0);
    }
    msg.extend_from_slice(&bit_len.to_be_bytes());

    for chunk in msg.chunks_exact(64) {
        let mut w = [0u32; 80];
        for i in 0..16 {
            w[i] = u32::from_be_bytes(chunk[i * 4..i * 4 + 4].try_into().unwrap());
        }
        for i in 16..80 {
            w[i] = (w[i - 3] ^ w[i - 8] ^ w[i - 14] ^ w[i - 16]).rotate_left(1);
        }

        let (mut a, mut b, mut c, mut d, mut e) = (h[0], h[1], h[2], h[3], h[4]);
        for (i, &wi) in w.iter().enumerate() {
            let (f, k) = match i {
                0..=19 => ((b & c) | ((!b) & d), 0x5A82_7999u32),
                20..=39 => (b ^ c ^ d, 0x6ED9_EBA1),
                40..=59 => ((b & c) | (b & d) | (c & d), 0x8F1B_BCDC),
                _ => (b ^ c ^ d, 0xCA62_C1D6),
            };
            let tmp = a
                .rotate_left(5)
                .wrapping_add(f)
                .wrapping_add(e)
                .wrapping_add(k)
                .wrapping_add(wi);
            e = d;
            d = c;
            c = b.rotate_left(30);
            b = a;
            a = tmp;
        }

        h[0] = h[0].wrapping_add(a);
        h[1] = h[1].wrapping_add(b);
        h[2] = h[2].wrapping_add(c);
        h[3] = h[3].wrapping_add(d);
        h[4] = h[4].wrapping_add(e);
    }

    let mut out = [0u8; 20];
    for (i, word) in h.iter().enumerate() {
        out[i * 4..i * 4 + 4].copy_from_slice(&word.to_be_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_matches_known_vectors() {
        assert_eq!(
            sha1(b""),
            [
                0xda, 0x39, 0xa3, 0xee, 0x5e, 0x6b, 0x4b, 0x0d, 0x32, 0x55, 0xbf, 0xef, 0x95, 0x60,
                0x18, 0x90, 0xaf, 0xd8, 0x07, 0x09
            ]
        );
        assert_eq!(
            sha1(b"abc"),
            [
                0xa9, 0x99, 0x3e, 0x36, 0x47, 0x06, 0x81, 0x6a, 0xba, 0x3e, 0x25, 0x71, 0x78, 0x50,
                0xc2, 0x6c, 0x9c, 0xd0, 0xd8, 0x9d
            ]
        );
    }
}
