//! MFT record parsing.
//!
//! An MFT entry is a fixed-size record: a 48-byte header protected by the
//! multi-sector fixup, followed by a chain of attributes terminated by
//! `0xFFFFFFFF`. Unused slots in the table are zero-filled and parse to an
//! empty, not-in-use entry rather than an error.

use log::debug;

use crate::error::{NtfsError, Result};
use crate::mft::attr::{
    namespace_rank, parse_attribute, Attribute, AttributeBody, FileName, ATTR_ATTRIBUTE_LIST,
    ATTR_DATA, ATTR_END, ATTR_FILE_NAME, FILE_REFERENCE_ENTRY_MASK,
};
use crate::mft::fixup::apply_fixup;
use crate::util::{le16, le32, le64};

const MFT_RECORD_MAGIC: &[u8; 4] = b"FILE";
const MFT_RECORD_BAD_MAGIC: &[u8; 4] = b"BAAD";

const MFT_RECORD_HEADER_SIZE: usize = 48;

const MFT_RECORD_FLAG_IN_USE: u16 = 0x0001;
const MFT_RECORD_FLAG_DIRECTORY: u16 = 0x0002;

/// One parsed MFT entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MftEntry {
    pub index: u64,
    pub sequence: u16,
    pub hard_link_count: u16,
    pub flags: u16,
    pub used_size: u32,
    pub allocated_size: u32,
    /// File reference of the base record; 0 for base records themselves.
    pub base_reference: u64,
    attributes: Vec<Attribute>,
    /// Index of the unnamed `$DATA` attribute, if any.
    data_attribute: Option<usize>,
    /// Index of the primary `$FILE_NAME` attribute, if any.
    file_name_attribute: Option<usize>,
}

impl MftEntry {
    /// Parse a fixed-size MFT record. `record` is consumed so the fixup
    /// can be applied in place.
    pub fn parse(mut record: Vec<u8>, index: u64, bytes_per_sector: u32, cluster_size: u32) -> Result<Self> {
        if record.len() < MFT_RECORD_HEADER_SIZE {
            return Err(NtfsError::CorruptRecord(format!(
                "MFT entry {index}: record of {} bytes is too short",
                record.len()
            )));
        }

        let magic: [u8; 4] = record[0..4].try_into().unwrap();
        if magic == [0, 0, 0, 0] {
            // An unused slot: the table allocates entries ahead of use.
            return Ok(Self::empty(index));
        }
        if &magic == MFT_RECORD_BAD_MAGIC {
            return Err(NtfsError::CorruptRecord(format!(
                "MFT entry {index}: marked bad by a failed multi-sector write"
            )));
        }
        if &magic != MFT_RECORD_MAGIC {
            return Err(NtfsError::CorruptRecord(format!(
                "MFT entry {index}: invalid signature {magic:02x?}"
            )));
        }

        let usa_offset = le16(&record, 0x04) as usize;
        let usa_count = le16(&record, 0x06) as usize;
        let bytes_per_sector = bytes_per_sector as usize;
        apply_fixup(&mut record, usa_offset, usa_count, bytes_per_sector).map_err(|e| {
            NtfsError::CorruptRecord(format!("MFT entry {index}: {e}"))
        })?;

        let sequence = le16(&record, 0x10);
        let hard_link_count = le16(&record, 0x12);
        let first_attribute_offset = le16(&record, 0x14) as usize;
        let flags = le16(&record, 0x16);
        let used_size = le32(&record, 0x18);
        let allocated_size = le32(&record, 0x1C);
        let base_reference = le64(&record, 0x20);

        if used_size as usize > record.len() {
            return Err(NtfsError::CorruptRecord(format!(
                "MFT entry {index}: used size {used_size} exceeds record size {}",
                record.len()
            )));
        }
        if first_attribute_offset < MFT_RECORD_HEADER_SIZE
            || first_attribute_offset >= used_size as usize
        {
            return Err(NtfsError::CorruptRecord(format!(
                "MFT entry {index}: first attribute offset {first_attribute_offset} out of range"
            )));
        }

        let mut entry = Self {
            index,
            sequence,
            hard_link_count,
            flags,
            used_size,
            allocated_size,
            base_reference,
            attributes: Vec::new(),
            data_attribute: None,
            file_name_attribute: None,
        };

        let mut offset = first_attribute_offset;
        while offset + 4 <= used_size as usize {
            if le32(&record, offset) == ATTR_END {
                break;
            }
            let (attribute, consumed) =
                parse_attribute(&record[..used_size as usize], offset, cluster_size).map_err(
                    |e| match e {
                        NtfsError::TruncatedAttribute(msg) => NtfsError::TruncatedAttribute(
                            format!("MFT entry {index}: {msg}"),
                        ),
                        other => other,
                    },
                )?;
            entry.attributes.push(attribute);
            offset += consumed;
        }

        entry.refresh_attribute_indices();
        debug!(
            "parsed MFT entry {index}: {} attributes, in_use={}, dir={}",
            entry.attributes.len(),
            entry.is_in_use(),
            entry.is_directory()
        );
        Ok(entry)
    }

    fn empty(index: u64) -> Self {
        Self {
            index,
            sequence: 0,
            hard_link_count: 0,
            flags: 0,
            used_size: 0,
            allocated_size: 0,
            base_reference: 0,
            attributes: Vec::new(),
            data_attribute: None,
            file_name_attribute: None,
        }
    }

    pub fn is_in_use(&self) -> bool {
        self.flags & MFT_RECORD_FLAG_IN_USE != 0
    }

    pub fn is_directory(&self) -> bool {
        self.flags & MFT_RECORD_FLAG_DIRECTORY != 0
    }

    /// Whether this is a base record (as opposed to an extension record
    /// referenced by another entry's attribute list).
    pub fn is_base_record(&self) -> bool {
        self.base_reference & FILE_REFERENCE_ENTRY_MASK == 0
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// The unnamed `$DATA` attribute, if the entry has one.
    pub fn data_attribute(&self) -> Option<&Attribute> {
        self.data_attribute.map(|i| &self.attributes[i])
    }

    /// A named `$DATA` attribute (alternate data stream).
    pub fn alternate_data_attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|a| a.type_code == ATTR_DATA && a.name_is(name))
    }

    /// First attribute with the given type code and name (`None` matches
    /// only unnamed attributes).
    pub fn attribute_by_type(&self, type_code: u32, name: Option<&str>) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|a| a.type_code == type_code && a.name.as_deref() == name)
    }

    /// The `$ATTRIBUTE_LIST` attribute, if present.
    pub fn attribute_list(&self) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|a| a.type_code == ATTR_ATTRIBUTE_LIST)
    }

    /// The primary `$FILE_NAME` payload (best namespace wins).
    pub fn file_name(&self) -> Option<FileName> {
        let attribute = self.file_name_attribute.map(|i| &self.attributes[i])?;
        FileName::parse(attribute.resident_value()?).ok()
    }

    /// Append attributes recovered from extension records, then re-derive
    /// the cached attribute positions.
    ///
    /// A non-resident extension extent (`first_vcn > 0`) continues an
    /// attribute whose first extent lives in this entry: its runs are
    /// appended to the base attribute instead of surfacing as a second
    /// attribute.
    pub(crate) fn merge_extension_attributes(&mut self, attributes: Vec<Attribute>) {
        for incoming in attributes {
            if let AttributeBody::NonResident {
                first_vcn,
                last_vcn,
                runs: extent_runs,
                ..
            } = &incoming.body
            {
                if *first_vcn > 0 {
                    let target = self.attributes.iter_mut().find(|a| {
                        a.type_code == incoming.type_code
                            && a.name == incoming.name
                            && matches!(
                                &a.body,
                                AttributeBody::NonResident { first_vcn: 0, .. }
                            )
                    });
                    if let Some(base) = target {
                        if let AttributeBody::NonResident {
                            runs,
                            last_vcn: base_last,
                            ..
                        } = &mut base.body
                        {
                            runs.extend(extent_runs.iter().cloned());
                            *base_last = (*base_last).max(*last_vcn);
                        }
                        continue;
                    }
                }
            }
            self.attributes.push(incoming);
        }
        self.refresh_attribute_indices();
    }

    fn refresh_attribute_indices(&mut self) {
        self.data_attribute = self
            .attributes
            .iter()
            .position(|a| a.type_code == ATTR_DATA && a.is_unnamed());

        self.file_name_attribute = None;
        let mut best_rank = 0u8;
        for (i, attribute) in self.attributes.iter().enumerate() {
            if attribute.type_code != ATTR_FILE_NAME {
                continue;
            }
            let Some(value) = attribute.resident_value() else {
                continue;
            };
            let Ok(file_name) = FileName::parse(value) else {
                continue;
            };
            let rank = namespace_rank(file_name.namespace);
            if self.file_name_attribute.is_none() || rank > best_rank {
                self.file_name_attribute = Some(i);
                best_rank = rank;
            }
        }
    }
}
