//! `$Secure` security descriptor store.
//!
//! Since NTFS 3.0 every distinct security descriptor lives once in the
//! `$Secure` system file (MFT entry 9): the `$SDS` data stream holds the
//! descriptors, each behind a 20-byte entry header, and the `$SII` index
//! maps a 32-bit descriptor identifier to its offset and size inside
//! `$SDS`. Volumes upgraded from NTFS 1.x have a different file at entry
//! 9; the name check below detects that and reports the index as absent
//! rather than failing.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};
use log::debug;

use crate::error::{NtfsError, Result};
use crate::mft::attr::{Attribute, ATTR_INDEX_ALLOCATION, ATTR_INDEX_ROOT};
use crate::mft::fixup::apply_fixup;
use crate::mft::{Mft, MFT_ENTRY_SECURE};
use crate::stream::ClusterStream;
use crate::util::{le16, le32, le64};
use crate::volume::{VolumeParams, VolumeReader};

/// Size of the entry header preceding each descriptor in `$SDS`.
const SDS_HEADER_SIZE: u64 = 20;

/// Upper bound for one descriptor; `$SDS` entries are far smaller.
const MAX_DESCRIPTOR_SIZE: u32 = 1 << 20;

/// Index nodes deeper than this mean a crafted tree.
const MAX_INDEX_DEPTH: usize = 32;

const INDEX_ENTRY_FLAG_SUBNODE: u16 = 0x01;
const INDEX_ENTRY_FLAG_LAST: u16 = 0x02;

/// Resolves 32-bit security identifiers to descriptors via `$SII`/`$SDS`.
pub struct SecurityDescriptorIndex {
    params: VolumeParams,
    /// The `$SDS` named data attribute.
    sds: Attribute,
    /// Node bytes of the `$SII` index root (node header + entries).
    root_node: Vec<u8>,
    /// Size of one `$SII` index record in the allocation stream.
    index_block_size: u32,
    /// The `$SII` `$INDEX_ALLOCATION` attribute, when the tree spills
    /// out of the root.
    allocation: Option<Attribute>,
}

/// Location of one descriptor inside `$SDS`, as recorded by `$SII`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SdsRef {
    id: u32,
    offset: u64,
    size: u32,
}

impl SecurityDescriptorIndex {
    /// Build the index from MFT entry 9.
    ///
    /// Returns `Ok(None)` when the entry is not named `$Secure` (legacy
    /// volume without a descriptor store).
    pub(crate) fn build(mft: &Mft, io: &dyn VolumeReader) -> Result<Option<Self>> {
        let entry = mft.entry(io, MFT_ENTRY_SECURE)?;

        let is_secure = entry
            .file_name()
            .map(|f| f.name == "$Secure")
            .unwrap_or(false);
        if !is_secure {
            debug!("MFT entry 9 is not $Secure; no security descriptor store");
            return Ok(None);
        }

        let sds = entry
            .alternate_data_attribute("$SDS")
            .ok_or_else(|| NtfsError::MissingValue("$Secure has no $SDS data stream".into()))?
            .clone();
        let root = entry
            .attribute_by_type(ATTR_INDEX_ROOT, Some("$SII"))
            .ok_or_else(|| NtfsError::MissingValue("$Secure has no $SII index root".into()))?;
        let root_value = root.resident_value().ok_or_else(|| {
            NtfsError::CorruptRecord("$SII index root is not resident".into())
        })?;
        if root_value.len() < 32 {
            return Err(NtfsError::CorruptRecord(format!(
                "$SII index root of {} bytes is too short",
                root_value.len()
            )));
        }

        let index_block_size = le32(root_value, 8);
        let allocation = entry
            .attribute_by_type(ATTR_INDEX_ALLOCATION, Some("$SII"))
            .cloned();

        Ok(Some(Self {
            params: *mft.params(),
            sds,
            root_node: root_value[16..].to_vec(),
            index_block_size,
            allocation,
        }))
    }

    /// Resolve an identifier to its descriptor.
    ///
    /// Identifier 0 is never assigned; it and unknown identifiers yield
    /// `Ok(None)`.
    pub fn lookup(
        &self,
        io: &dyn VolumeReader,
        id: u32,
    ) -> Result<Option<SecurityDescriptor>> {
        if id == 0 {
            return Ok(None);
        }
        let Some(sds_ref) = self.find_in_tree(io, id)? else {
            return Ok(None);
        };
        self.read_descriptor(io, sds_ref).map(Some)
    }

    /// Walk the `$SII` B-tree from the root to the leaf holding `id`.
    fn find_in_tree(&self, io: &dyn VolumeReader, id: u32) -> Result<Option<SdsRef>> {
        let mut node = self.root_node.clone();

        for _ in 0..MAX_INDEX_DEPTH {
            match self.scan_node(&node, id)? {
                NodeOutcome::Found(sds_ref) => return Ok(Some(sds_ref)),
                NodeOutcome::NotPresent => return Ok(None),
                NodeOutcome::Descend(vcn) => {
                    node = self.load_index_block(io, vcn)?;
                }
            }
        }
        Err(NtfsError::CorruptRecord(format!(
            "$SII index deeper than {MAX_INDEX_DEPTH} levels looking up id {id}"
        )))
    }

    /// Scan one node's sorted entries for `id`.
    fn scan_node(&self, node: &[u8], id: u32) -> Result<NodeOutcome> {
        if node.len() < 16 {
            return Err(NtfsError::CorruptRecord("$SII index node truncated".into()));
        }
        let entries_offset = le32(node, 0) as usize;
        let index_size = (le32(node, 4) as usize).min(node.len());
        let mut pos = entries_offset;

        loop {
            if pos + 16 > index_size {
                return Err(NtfsError::CorruptRecord(format!(
                    "$SII index node ends at {pos} without a last entry"
                )));
            }
            let entry = &node[pos..];
            let data_offset = le16(entry, 0x00) as usize;
            let data_size = le16(entry, 0x02) as usize;
            let entry_size = le16(entry, 0x08) as usize;
            let key_size = le16(entry, 0x0A) as usize;
            let flags = le16(entry, 0x0C);

            if entry_size < 16 || pos + entry_size > index_size {
                return Err(NtfsError::CorruptRecord(format!(
                    "$SII index entry at {pos} claims {entry_size} bytes"
                )));
            }

            let is_last = flags & INDEX_ENTRY_FLAG_LAST != 0;
            let key = if !is_last {
                if key_size < 4 || pos + 16 + 4 > index_size {
                    return Err(NtfsError::CorruptRecord(format!(
                        "$SII index entry at {pos} has a {key_size}-byte key"
                    )));
                }
                Some(le32(entry, 0x10))
            } else {
                None
            };

            // Entries are sorted by key; the first entry at or past the
            // target decides where to go.
            if is_last || key.unwrap() > id {
                if flags & INDEX_ENTRY_FLAG_SUBNODE != 0 {
                    if entry_size < 24 {
                        return Err(NtfsError::CorruptRecord(
                            "$SII subnode entry too small for a VCN".into(),
                        ));
                    }
                    return Ok(NodeOutcome::Descend(le64(entry, entry_size - 8)));
                }
                return Ok(NodeOutcome::NotPresent);
            }

            if key.unwrap() == id {
                if data_size < 20 || data_offset + data_size > entry_size {
                    return Err(NtfsError::CorruptRecord(format!(
                        "$SII value for id {id} claims {data_size} bytes at {data_offset}"
                    )));
                }
                let value = &entry[data_offset..data_offset + data_size];
                return Ok(NodeOutcome::Found(SdsRef {
                    id: le32(value, 4),
                    offset: le64(value, 8),
                    size: le32(value, 16),
                }));
            }

            pos += entry_size;
        }
    }

    /// Load and fix up one INDX record from the `$SII` allocation stream.
    fn load_index_block(&self, io: &dyn VolumeReader, vcn: u64) -> Result<Vec<u8>> {
        let allocation = self.allocation.as_ref().ok_or_else(|| {
            NtfsError::CorruptRecord(
                "$SII root points at a subnode but $Secure has no $SII allocation".into(),
            )
        })?;
        let block_size = self.index_block_size as usize;
        if block_size < 0x20 || block_size % self.params.bytes_per_sector as usize != 0 {
            return Err(NtfsError::CorruptRecord(format!(
                "$SII index block size {block_size} is not sector-aligned"
            )));
        }

        // Subnode VCNs count clusters when an index record spans one or
        // more clusters, and 512-byte blocks when it is smaller.
        let vcn_unit = if self.index_block_size >= self.params.cluster_size {
            self.params.cluster_size as u64
        } else {
            512
        };

        let mut stream = ClusterStream::new(io, allocation, self.params.cluster_size)?;
        let mut block = stream.read_exact_to_vec(vcn * vcn_unit, block_size)?;

        if &block[0..4] != b"INDX" {
            return Err(NtfsError::CorruptRecord(format!(
                "$SII index block at VCN {vcn} has invalid signature"
            )));
        }
        let usa_offset = le16(&block, 0x04) as usize;
        let usa_count = le16(&block, 0x06) as usize;
        apply_fixup(
            &mut block,
            usa_offset,
            usa_count,
            self.params.bytes_per_sector as usize,
        )
        .map_err(|e| NtfsError::CorruptRecord(format!("$SII index block at VCN {vcn}: {e}")))?;

        // The node header starts at 0x18 in an INDX record.
        Ok(block[0x18..].to_vec())
    }

    /// Read and validate one descriptor from `$SDS`.
    fn read_descriptor(
        &self,
        io: &dyn VolumeReader,
        sds_ref: SdsRef,
    ) -> Result<SecurityDescriptor> {
        if sds_ref.size < SDS_HEADER_SIZE as u32 || sds_ref.size > MAX_DESCRIPTOR_SIZE {
            return Err(NtfsError::CorruptRecord(format!(
                "$SDS entry for id {} claims {} bytes",
                sds_ref.id, sds_ref.size
            )));
        }

        let mut stream = ClusterStream::new(io, &self.sds, self.params.cluster_size)?;
        let header = stream.read_exact_to_vec(sds_ref.offset, SDS_HEADER_SIZE as usize)?;

        let mut cursor = Cursor::new(&header);
        let _hash = cursor.read_u32::<LittleEndian>()?;
        let header_id = cursor.read_u32::<LittleEndian>()?;
        let header_offset = cursor.read_u64::<LittleEndian>()?;
        let header_size = cursor.read_u32::<LittleEndian>()?;

        // The stream header must agree with what the index promised.
        if header_id != sds_ref.id || header_offset != sds_ref.offset || header_size != sds_ref.size
        {
            return Err(NtfsError::CorruptRecord(format!(
                "$SDS entry disagrees with $SII for id {}: header id {header_id}, \
                 offset {header_offset}, size {header_size}",
                sds_ref.id
            )));
        }

        let payload = stream.read_exact_to_vec(
            sds_ref.offset + SDS_HEADER_SIZE,
            (sds_ref.size as u64 - SDS_HEADER_SIZE) as usize,
        )?;
        SecurityDescriptor::parse(payload)
    }
}

enum NodeOutcome {
    Found(SdsRef),
    NotPresent,
    Descend(u64),
}

// ---- Descriptor payload ----

/// Control flag: the descriptor is in self-relative layout.
pub const SE_SELF_RELATIVE: u16 = 0x8000;
/// Control flag: a DACL is present.
pub const SE_DACL_PRESENT: u16 = 0x0004;
/// Control flag: a SACL is present.
pub const SE_SACL_PRESENT: u16 = 0x0010;

/// A parsed self-relative security descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityDescriptor {
    pub revision: u8,
    pub control: u16,
    pub owner: Option<Sid>,
    pub group: Option<Sid>,
    pub sacl: Option<Acl>,
    pub dacl: Option<Acl>,
    /// The raw descriptor bytes, for callers that decode ACEs themselves.
    pub raw: Vec<u8>,
}

impl SecurityDescriptor {
    /// Parse a self-relative SECURITY_DESCRIPTOR blob.
    pub fn parse(data: Vec<u8>) -> Result<Self> {
        if data.len() < 20 {
            return Err(NtfsError::CorruptRecord(format!(
                "security descriptor of {} bytes is too short",
                data.len()
            )));
        }
        let revision = data[0];
        if revision != 1 {
            return Err(NtfsError::CorruptRecord(format!(
                "security descriptor revision {revision} is not 1"
            )));
        }
        let control = le16(&data, 0x02);
        let owner_offset = le32(&data, 0x04) as usize;
        let group_offset = le32(&data, 0x08) as usize;
        let sacl_offset = le32(&data, 0x0C) as usize;
        let dacl_offset = le32(&data, 0x10) as usize;

        let owner = parse_sid_at(&data, owner_offset, "owner")?;
        let group = parse_sid_at(&data, group_offset, "group")?;
        let sacl = parse_acl_at(&data, sacl_offset, "SACL")?;
        let dacl = parse_acl_at(&data, dacl_offset, "DACL")?;

        Ok(Self {
            revision,
            control,
            owner,
            group,
            sacl,
            dacl,
            raw: data,
        })
    }

    pub fn is_self_relative(&self) -> bool {
        self.control & SE_SELF_RELATIVE != 0
    }
}

fn parse_sid_at(data: &[u8], offset: usize, what: &str) -> Result<Option<Sid>> {
    if offset == 0 {
        return Ok(None);
    }
    if offset >= data.len() {
        return Err(NtfsError::CorruptRecord(format!(
            "security descriptor {what} offset {offset} is outside the descriptor"
        )));
    }
    Sid::parse(&data[offset..]).map(Some)
}

fn parse_acl_at(data: &[u8], offset: usize, what: &str) -> Result<Option<Acl>> {
    if offset == 0 {
        return Ok(None);
    }
    if offset + 8 > data.len() {
        return Err(NtfsError::CorruptRecord(format!(
            "security descriptor {what} offset {offset} is outside the descriptor"
        )));
    }
    let acl = &data[offset..];
    Ok(Some(Acl {
        revision: acl[0],
        size: le16(acl, 2),
        ace_count: le16(acl, 4),
    }))
}

/// An access control list header; ACE decoding is left to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acl {
    pub revision: u8,
    pub size: u16,
    pub ace_count: u16,
}

/// A Windows security identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sid {
    pub revision: u8,
    pub identifier_authority: u64,
    pub subauthorities: Vec<u32>,
}

impl Sid {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(NtfsError::CorruptRecord("SID truncated".into()));
        }
        let mut cursor = Cursor::new(data);
        let revision = cursor.read_u8()?;
        let count = cursor.read_u8()? as usize;
        if count > 15 {
            return Err(NtfsError::CorruptRecord(format!(
                "SID claims {count} subauthorities"
            )));
        }
        if data.len() < 8 + count * 4 {
            return Err(NtfsError::CorruptRecord(format!(
                "SID with {count} subauthorities needs {} bytes, has {}",
                8 + count * 4,
                data.len()
            )));
        }
        // The 48-bit identifier authority is the lone big-endian field.
        let mut authority: u64 = 0;
        for _ in 0..6 {
            authority = (authority << 8) | cursor.read_u8()? as u64;
        }
        let mut subauthorities = Vec::with_capacity(count);
        for _ in 0..count {
            subauthorities.push(cursor.read_u32::<LittleEndian>()?);
        }
        Ok(Self {
            revision,
            identifier_authority: authority,
            subauthorities,
        })
    }
}

impl std::fmt::Display for Sid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "S-{}-{}", self.revision, self.identifier_authority)?;
        for sub in &self.subauthorities {
            write!(f, "-{sub}")?;
        }
        Ok(())
    }
}
