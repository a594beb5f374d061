// SPDX-License-Identifier: GPL-2.0

//! Image metadata object — binds a root dentry, a security data set, and an
//! inode list to the blob descriptor of its own (compressed) resource.

use crate::collab::{sha1, BlobTable, ResourceHeader};
use crate::dentry::{DentryId, DentryNode, FileAttributes, Parent};
use crate::error::{Error, Result};
use crate::inode::{Inode, InodeId};
use crate::security::{read_security_data, SecurityData};
use crate::serialize::serialize_tree;
use crate::tree::parse_tree;
use crate::verify::{verify_inodes, VerifyOptions};
use crate::warn::WarnSink;

/// Tuning knobs threaded into `ImageMetadata::parse`. `Default` matches the
/// strictest reading of the format (reject what spec §3 marks as
/// warning-only, require the recorded hash to match).
#[derive(Debug, Clone, Copy)]
pub struct ParseOptions {
    /// When `true` (the default), a directory inode carrying an unnamed
    /// DATA stream is a hard `InvalidMetadata` error. When `false`, it's
    /// reported through the warning sink instead and tolerated.
    pub strict_directory_streams: bool,
    /// Mirrors the resource locator's `dont_check_metadata_hash` flag: when
    /// `true`, a SHA-1 mismatch against the caller-supplied expected hash is
    /// ignored rather than rejected.
    pub dont_check_metadata_hash: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        ParseOptions { strict_directory_streams: true, dont_check_metadata_hash: false }
    }
}

/// A stream that has been captured but not yet assigned a final blob
/// reference — bookkeeping for the capture/update collaborators (out of
/// scope here) so the field in spec §3's data model has a concrete home.
#[derive(Debug, Clone)]
pub struct UnhashedStream {
    pub inode: InodeId,
    pub stream_index: usize,
}

#[derive(Debug, Clone)]
pub struct ImageMetadata {
    pub dentries: Vec<DentryNode>,
    pub inodes: Vec<Inode>,
    pub root: Option<DentryId>,
    pub security_data: SecurityData,
    pub unhashed_streams: Vec<UnhashedStream>,
    /// Set once this image's resource has been written by a codec; `None`
    /// until the first successful `serialize` handoff.
    pub resource_header: Option<ResourceHeader>,
}

impl ImageMetadata {
    /// Parses an already-decompressed metadata resource buffer. `expected_hash`
    /// is the hash recorded for this resource elsewhere in the WIM (e.g. in
    /// the lookup table); pass `None` when there's nothing to check against.
    pub fn parse(
        resource_bytes: &[u8],
        expected_hash: Option<[u8; 20]>,
        blobs: Option<&dyn BlobTable>,
        options: &ParseOptions,
        warn: &mut dyn WarnSink,
    ) -> Result<ImageMetadata> {
        log::trace!("parsing metadata resource ({} bytes)", resource_bytes.len());

        if let Some(expected) = expected_hash {
            if !options.dont_check_metadata_hash {
                let actual = sha1(resource_bytes);
                if actual != expected {
                    return Err(Error::invalid(
                        "metadata resource hash does not match the recorded hash",
                    ));
                }
            }
        }

        log::trace!("parsing security data");
        let (security_data, root_offset) =
            read_security_data(resource_bytes, resource_bytes.len())?;
        log::debug!(
            "security data: {} entries, total_length={}",
            security_data.num_entries(),
            security_data.total_length
        );

        log::trace!("parsing dentry tree at offset {root_offset}");
        let tree = parse_tree(resource_bytes, resource_bytes.len(), root_offset as u64, warn)?;
        log::debug!(
            "dentry tree: {} dentries, {} inodes",
            tree.dentries.len(),
            tree.inodes.len()
        );

        log::trace!("verifying inode invariants");
        let verify_opts = VerifyOptions { strict_directory_streams: options.strict_directory_streams };
        verify_inodes(&tree.inodes, &security_data, blobs, &verify_opts, warn)?;

        Ok(ImageMetadata {
            dentries: tree.dentries,
            inodes: tree.inodes,
            root: tree.root,
            security_data,
            unhashed_streams: Vec::new(),
            resource_header: None,
        })
    }

    /// Serializes the tree (spec §4.7). Mutates `security_data.total_length`
    /// in place, since every serialization recomputes it from the current
    /// entries.
    pub fn serialize(&mut self) -> Vec<u8> {
        log::trace!("serializing metadata resource");
        let buf = serialize_tree(&self.dentries, &self.inodes, self.root, &mut self.security_data);
        log::debug!("serialized metadata resource: {} bytes", buf.len());
        buf
    }

    /// Records the codec's result for this image's own compressed resource
    /// and its freshly computed hash, so a caller can update the WIM's
    /// lookup table entry for this image (spec §4.8's "bind back" step).
    pub fn bind_resource(&mut self, header: ResourceHeader) {
        self.resource_header = Some(header);
    }

    /// A brand-new image with a single, empty, unnamed root directory — no
    /// children, no security descriptors.
    pub fn new_empty() -> ImageMetadata {
        let root_inode = Inode {
            hard_link_group_id: 0,
            attributes: FileAttributes::DIRECTORY,
            security_id: -1,
            creation_time: 0,
            last_access_time: 0,
            last_write_time: 0,
            reparse_tag_or_flags: 0,
            streams: Vec::new(),
            dentries: vec![0],
        };
        let root_dentry = DentryNode {
            parent: Parent::Root,
            children: Vec::new(),
            inode: InodeId(0),
            file_name: Vec::new(),
            short_name: Vec::new(),
            is_win32_name: true,
            legacy_hash: None,
        };

        ImageMetadata {
            dentries: vec![root_dentry],
            inodes: vec![root_inode],
            root: Some(DentryId(0)),
            security_data: SecurityData::default(),
            unhashed_streams: Vec::new(),
            resource_header: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dentry::{write_dentry, RawStream, Stream, StreamType};
    use crate::warn::{CollectingSink, Warning};

    #[test]
    fn empty_image_scenario() {
        let mut md = ImageMetadata::new_empty();
        md.root = None;
        md.dentries.clear();
        md.inodes.clear();

        let buf = md.serialize();
        assert_eq!(buf, vec![8, 0, 0, 0, 0, 0, 0, 0]);

        let mut sink = CollectingSink::default();
        let parsed =
            ImageMetadata::parse(&buf, None, None, &ParseOptions::default(), &mut sink).unwrap();
        assert!(parsed.root.is_none());
        assert_eq!(sink.0, vec![Warning::EmptyTreeEncodedAsEndOfDirectory]);
    }

    #[test]
    fn single_file_image_round_trips() {
        let mut md = ImageMetadata::new_empty();
        let file_inode = Inode {
            hard_link_group_id: 0,
            attributes: FileAttributes::ARCHIVE,
            security_id: -1,
            creation_time: 10,
            last_access_time: 11,
            last_write_time: 12,
            reparse_tag_or_flags: 0,
            streams: vec![Stream {
                stream_type: StreamType::Data,
                name: Vec::new(),
                hash: Some([0x11u8; 20]),
            }],
            dentries: vec![1],
        };
        md.inodes.push(file_inode);
        md.dentries.push(DentryNode {
            parent: Parent::Dentry(DentryId(0)),
            children: Vec::new(),
            inode: InodeId(1),
            file_name: "hello.txt".encode_utf16().collect(),
            short_name: Vec::new(),
            is_win32_name: true,
            legacy_hash: None,
        });
        md.dentries[0].children.push(DentryId(1));

        let buf = md.serialize();
        let mut sink = CollectingSink::default();
        let parsed =
            ImageMetadata::parse(&buf, None, None, &ParseOptions::default(), &mut sink).unwrap();
        assert!(sink.0.is_empty());
        assert_eq!(parsed.inodes.len(), 2);
        let file = parsed
            .inodes
            .iter()
            .find(|i| !i.is_directory())
            .expect("one file inode");
        assert_eq!(file.streams.len(), 1);
        assert_eq!(file.streams[0].hash, Some([0x11u8; 20]));
    }

    #[test]
    fn hard_link_group_yields_nlink_two() {
        let mut md = ImageMetadata::new_empty();
        let shared = Inode {
            hard_link_group_id: 42,
            attributes: FileAttributes::ARCHIVE,
            security_id: -1,
            creation_time: 5,
            last_access_time: 5,
            last_write_time: 5,
            reparse_tag_or_flags: 0,
            streams: vec![Stream { stream_type: StreamType::Data, name: Vec::new(), hash: Some([2u8; 20]) }],
            dentries: vec![1, 2],
        };
        md.inodes.push(shared);
        md.dentries.push(DentryNode {
            parent: Parent::Dentry(DentryId(0)),
            children: Vec::new(),
            inode: InodeId(1),
            file_name: "a".encode_utf16().collect(),
            short_name: Vec::new(),
            is_win32_name: true,
            legacy_hash: None,
        });
        md.dentries.push(DentryNode {
            parent: Parent::Dentry(DentryId(0)),
            children: Vec::new(),
            inode: InodeId(1),
            file_name: "b".encode_utf16().collect(),
            short_name: Vec::new(),
            is_win32_name: true,
            legacy_hash: None,
        });
        md.dentries[0].children.extend([DentryId(1), DentryId(2)]);

        let buf = md.serialize();
        let mut sink = CollectingSink::default();
        let parsed =
            ImageMetadata::parse(&buf, None, None, &ParseOptions::default(), &mut sink).unwrap();
        let file = parsed.inodes.iter().find(|i| !i.is_directory()).unwrap();
        assert_eq!(file.nlink(), 2);
    }

    #[test]
    fn mismatched_hard_link_group_is_rejected() {
        let names = [
            "a".encode_utf16().collect::<Vec<u16>>(),
            "b".encode_utf16().collect::<Vec<u16>>(),
        ];
        let streams = vec![RawStream { name: Vec::new(), hash: Some([3u8; 20]) }];

        let root_len = crate::dentry::dentry_out_total_length(&[], &[], &[]);
        let child_a_len = crate::dentry::dentry_out_total_length(&names[0], &[], &streams);
        let child_b_len = crate::dentry::dentry_out_total_length(&names[1], &[], &streams);

        let sec_end: u64 = 8;
        let root_off = sec_end;
        let children_off = root_off + root_len + 8;
        let total = children_off + child_a_len + child_b_len + 8;

        let mut buf = vec![0u8; total as usize];
        crate::codec::put_u32(&mut buf, 0, 8); // security data total_length
        write_dentry(
            &mut buf,
            root_off as usize,
            FileAttributes::DIRECTORY,
            -1,
            children_off,
            0,
            0,
            0,
            0,
            &[],
            &[],
            &[],
        );
        let mut off = children_off as usize;
        off = write_dentry(
            &mut buf,
            off,
            FileAttributes::ARCHIVE,
            -1,
            0,
            1,
            1,
            1,
            42,
            &names[0],
            &[],
            &streams,
        );
        write_dentry(
            &mut buf,
            off,
            FileAttributes::DIRECTORY, // mismatched attributes
            -1,
            0,
            1,
            1,
            1,
            42,
            &names[1],
            &[],
            &streams,
        );

        let mut sink = CollectingSink::default();
        let result = ImageMetadata::parse(&buf, None, None, &ParseOptions::default(), &mut sink);
        assert!(result.is_err());
    }

    #[test]
    fn oversized_security_data_is_rejected_before_any_root_is_built() {
        let mut buf = vec![0u8; 16];
        crate::codec::put_u32(&mut buf, 0, 17); // total_length = len + 1
        crate::codec::put_u32(&mut buf, 4, 0);

        let mut sink = CollectingSink::default();
        let result = ImageMetadata::parse(&buf, None, None, &ParseOptions::default(), &mut sink);
        assert!(result.is_err());
    }

    #[test]
    fn named_root_is_tolerated_and_stripped_on_serialize() {
        let name: Vec<u16> = "junk".encode_utf16().collect();
        let root_len = crate::dentry::dentry_out_total_length(&name, &[], &[]);
        let mut buf = vec![0u8; (8 + root_len + 8) as usize];
        crate::codec::put_u32(&mut buf, 0, 8); // security data total_length
        write_dentry(&mut buf, 8, FileAttributes::DIRECTORY, -1, 0, 0, 0, 0, 0, &name, &[], &[]);

        let mut sink = CollectingSink::default();
        let mut parsed =
            ImageMetadata::parse(&buf, None, None, &ParseOptions::default(), &mut sink).unwrap();
        assert_eq!(sink.0, vec![Warning::RootDentryHadName]);
        assert_eq!(parsed.dentries[0].file_name, Vec::<u16>::new());

        let reserialized = parsed.serialize();
        let mut sink2 = CollectingSink::default();
        let reparsed =
            ImageMetadata::parse(&reserialized, None, None, &ParseOptions::default(), &mut sink2)
                .unwrap();
        assert!(sink2.0.is_empty());
        assert!(reparsed.dentries[0].file_name.is_empty());
    }
}
