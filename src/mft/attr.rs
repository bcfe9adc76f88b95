//! Attribute decoding.
//!
//! Each MFT record is a chain of typed attributes. This module decodes the
//! common attribute header, the resident/non-resident split, and the two
//! payload layouts the runtime itself consumes: `$FILE_NAME` (for the
//! primary-name bookkeeping and the `$Secure` name check) and
//! `$ATTRIBUTE_LIST` (for attributes spilled into extension records).
//! Every other payload is carried opaquely for callers to decode.

use chrono::{DateTime, TimeZone, Utc};

use crate::error::{NtfsError, Result};
use crate::mft::runs::{self, DataRun};
use crate::util::{le16, le32, le64, utf16le_string};

// ---- Attribute type codes ----

pub const ATTR_STANDARD_INFORMATION: u32 = 0x10;
pub const ATTR_ATTRIBUTE_LIST: u32 = 0x20;
pub const ATTR_FILE_NAME: u32 = 0x30;
pub const ATTR_SECURITY_DESCRIPTOR: u32 = 0x50;
pub const ATTR_DATA: u32 = 0x80;
pub const ATTR_INDEX_ROOT: u32 = 0x90;
pub const ATTR_INDEX_ALLOCATION: u32 = 0xA0;
pub const ATTR_BITMAP: u32 = 0xB0;
pub const ATTR_END: u32 = 0xFFFF_FFFF;

// ---- Attribute flags ----

pub const ATTR_FLAG_COMPRESSED: u16 = 0x0001;
pub const ATTR_FLAG_ENCRYPTED: u16 = 0x4000;
pub const ATTR_FLAG_SPARSE: u16 = 0x8000;

// ---- File-name namespaces ----

pub const NAMESPACE_POSIX: u8 = 0;
pub const NAMESPACE_WIN32: u8 = 1;
pub const NAMESPACE_DOS: u8 = 2;
pub const NAMESPACE_WIN32_AND_DOS: u8 = 3;

/// Mask selecting the entry number from a 64-bit file reference; the top
/// 16 bits are the sequence number.
pub const FILE_REFERENCE_ENTRY_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

/// One decoded attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub type_code: u32,
    /// Attribute name, e.g. `$SDS` or `$SII`; `None` for unnamed.
    pub name: Option<String>,
    pub flags: u16,
    pub id: u16,
    pub body: AttributeBody,
}

/// Where an attribute's payload lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeBody {
    /// The payload is stored inline in the MFT record.
    Resident { value: Vec<u8> },
    /// The payload is stored in clusters described by a run list.
    NonResident {
        runs: Vec<DataRun>,
        first_vcn: u64,
        last_vcn: u64,
        allocated_size: u64,
        valid_size: u64,
        initialized_size: u64,
        /// Compression unit size as a power-of-two cluster count;
        /// 0 means uncompressed.
        compression_unit: u8,
        /// Stored only for compressed attributes.
        total_allocated: Option<u64>,
    },
}

impl Attribute {
    pub fn is_resident(&self) -> bool {
        matches!(self.body, AttributeBody::Resident { .. })
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & ATTR_FLAG_COMPRESSED != 0
    }

    pub fn is_sparse(&self) -> bool {
        self.flags & ATTR_FLAG_SPARSE != 0
    }

    pub fn is_unnamed(&self) -> bool {
        self.name.is_none()
    }

    pub fn name_is(&self, name: &str) -> bool {
        self.name.as_deref() == Some(name)
    }

    /// Resident payload, if this attribute is resident.
    pub fn resident_value(&self) -> Option<&[u8]> {
        match &self.body {
            AttributeBody::Resident { value } => Some(value),
            AttributeBody::NonResident { .. } => None,
        }
    }

    /// Logical payload size: value length when resident, valid size when
    /// non-resident.
    pub fn value_size(&self) -> u64 {
        match &self.body {
            AttributeBody::Resident { value } => value.len() as u64,
            AttributeBody::NonResident { valid_size, .. } => *valid_size,
        }
    }
}

/// Decode the attribute at `offset` within a fixed-up MFT record.
///
/// Returns the attribute and the number of bytes it occupies. The caller
/// stops at the `0xFFFFFFFF` terminator before calling this.
pub fn parse_attribute(
    record: &[u8],
    offset: usize,
    cluster_size: u32,
) -> Result<(Attribute, usize)> {
    if offset + 16 > record.len() {
        return Err(NtfsError::TruncatedAttribute(format!(
            "header at offset {offset} exceeds record size {}",
            record.len()
        )));
    }

    let type_code = le32(record, offset);
    let length = le32(record, offset + 4) as usize;
    let non_resident = record[offset + 8] != 0;
    let name_length = record[offset + 9] as usize;
    let name_offset = le16(record, offset + 10) as usize;
    let flags = le16(record, offset + 12);
    let id = le16(record, offset + 14);

    if length < 16 || offset + length > record.len() {
        return Err(NtfsError::TruncatedAttribute(format!(
            "attribute {type_code:#x} at offset {offset} claims {length} bytes"
        )));
    }
    let attr = &record[offset..offset + length];

    let name = if name_length > 0 {
        let end = name_offset + name_length * 2;
        if end > attr.len() {
            return Err(NtfsError::TruncatedAttribute(format!(
                "attribute {type_code:#x} name exceeds attribute length {length}"
            )));
        }
        Some(utf16le_string(&attr[name_offset..end]))
    } else {
        None
    };

    let body = if non_resident {
        parse_non_resident_body(attr, type_code, cluster_size)?
    } else {
        parse_resident_body(attr, type_code)?
    };

    Ok((
        Attribute {
            type_code,
            name,
            flags,
            id,
            body,
        },
        length,
    ))
}

fn parse_resident_body(attr: &[u8], type_code: u32) -> Result<AttributeBody> {
    if attr.len() < 24 {
        return Err(NtfsError::TruncatedAttribute(format!(
            "resident attribute {type_code:#x} header truncated"
        )));
    }
    let value_length = le32(attr, 0x10) as usize;
    let value_offset = le16(attr, 0x14) as usize;
    if value_offset + value_length > attr.len() {
        return Err(NtfsError::TruncatedAttribute(format!(
            "resident attribute {type_code:#x} value ({value_length} bytes at {value_offset}) \
             exceeds attribute length {}",
            attr.len()
        )));
    }
    Ok(AttributeBody::Resident {
        value: attr[value_offset..value_offset + value_length].to_vec(),
    })
}

fn parse_non_resident_body(attr: &[u8], type_code: u32, cluster_size: u32) -> Result<AttributeBody> {
    if attr.len() < 0x40 {
        return Err(NtfsError::TruncatedAttribute(format!(
            "non-resident attribute {type_code:#x} header truncated"
        )));
    }
    let first_vcn = le64(attr, 0x10);
    let last_vcn = le64(attr, 0x18);
    let run_offset = le16(attr, 0x20) as usize;
    let compression_unit_raw = le16(attr, 0x22);
    let allocated_size = le64(attr, 0x28);
    let valid_size = le64(attr, 0x30);
    let initialized_size = le64(attr, 0x38);

    let total_allocated = if compression_unit_raw > 0 {
        if attr.len() < 0x48 {
            return Err(NtfsError::TruncatedAttribute(format!(
                "compressed attribute {type_code:#x} missing total allocated size"
            )));
        }
        Some(le64(attr, 0x40))
    } else {
        None
    };

    if compression_unit_raw > 31 {
        return Err(NtfsError::TruncatedAttribute(format!(
            "attribute {type_code:#x} compression unit exponent {compression_unit_raw} out of range"
        )));
    }
    if initialized_size > valid_size || valid_size > allocated_size {
        return Err(NtfsError::CorruptRecord(format!(
            "attribute {type_code:#x} sizes inverted: initialized {initialized_size}, \
             valid {valid_size}, allocated {allocated_size}"
        )));
    }
    if run_offset < 0x40 || run_offset > attr.len() {
        return Err(NtfsError::TruncatedAttribute(format!(
            "attribute {type_code:#x} run list offset {run_offset} out of range"
        )));
    }

    // Each extent's run list covers exactly its VCN span. The first
    // extent carries the authoritative sizes; extents of a split
    // attribute (first_vcn > 0) carry zeros there.
    let expected_clusters = if first_vcn == 0 && allocated_size == 0 {
        0
    } else {
        if last_vcn < first_vcn {
            return Err(NtfsError::CorruptRecord(format!(
                "attribute {type_code:#x} VCN range {first_vcn}..{last_vcn} inverted"
            )));
        }
        last_vcn - first_vcn + 1
    };
    if first_vcn == 0 && expected_clusters > allocated_size.div_ceil((cluster_size as u64).max(1)) {
        return Err(NtfsError::CorruptRuns(format!(
            "attribute {type_code:#x} VCN span {expected_clusters} exceeds its allocated size \
             {allocated_size}"
        )));
    }

    let runs = runs::decode_runs(&attr[run_offset..], expected_clusters)?;

    if runs::total_clusters(&runs) != expected_clusters {
        return Err(NtfsError::CorruptRuns(format!(
            "attribute {type_code:#x} run list covers {} of {expected_clusters} clusters",
            runs::total_clusters(&runs)
        )));
    }

    Ok(AttributeBody::NonResident {
        runs,
        first_vcn,
        last_vcn,
        allocated_size,
        valid_size,
        initialized_size,
        compression_unit: compression_unit_raw as u8,
        total_allocated,
    })
}

// ---- $FILE_NAME ----

/// Decoded `$FILE_NAME` payload.
#[derive(Debug, Clone)]
pub struct FileName {
    pub parent_reference: u64,
    pub creation_time: u64,
    pub modification_time: u64,
    pub access_time: u64,
    pub allocated_size: u64,
    pub data_size: u64,
    pub file_attributes: u32,
    pub namespace: u8,
    pub name: String,
}

impl FileName {
    /// Decode from a resident `$FILE_NAME` value.
    pub fn parse(value: &[u8]) -> Result<Self> {
        if value.len() < 66 {
            return Err(NtfsError::TruncatedAttribute(format!(
                "$FILE_NAME value of {} bytes is too short",
                value.len()
            )));
        }
        let name_length = value[0x40] as usize;
        let name_end = 0x42 + name_length * 2;
        if name_end > value.len() {
            return Err(NtfsError::TruncatedAttribute(format!(
                "$FILE_NAME name of {name_length} characters exceeds value size {}",
                value.len()
            )));
        }
        Ok(Self {
            parent_reference: le64(value, 0x00),
            creation_time: le64(value, 0x08),
            modification_time: le64(value, 0x10),
            access_time: le64(value, 0x20),
            allocated_size: le64(value, 0x28),
            data_size: le64(value, 0x30),
            file_attributes: le32(value, 0x38),
            namespace: value[0x41],
            name: utf16le_string(&value[0x42..name_end]),
        })
    }

    /// MFT entry number of the parent directory.
    pub fn parent_entry(&self) -> u64 {
        self.parent_reference & FILE_REFERENCE_ENTRY_MASK
    }

    pub fn creation(&self) -> DateTime<Utc> {
        filetime_to_datetime(self.creation_time)
    }

    pub fn modification(&self) -> DateTime<Utc> {
        filetime_to_datetime(self.modification_time)
    }

    pub fn access(&self) -> DateTime<Utc> {
        filetime_to_datetime(self.access_time)
    }
}

/// Preference rank for choosing the primary `$FILE_NAME` when an entry
/// carries several: Win32 beats the combined Win32/DOS name, which beats
/// POSIX; a DOS-only short name is the last resort.
pub fn namespace_rank(namespace: u8) -> u8 {
    match namespace {
        NAMESPACE_WIN32 => 3,
        NAMESPACE_WIN32_AND_DOS => 2,
        NAMESPACE_POSIX => 1,
        _ => 0,
    }
}

/// Convert a FILETIME (100 ns intervals since 1601-01-01) to UTC.
pub fn filetime_to_datetime(filetime: u64) -> DateTime<Utc> {
    // Seconds between 1601-01-01 and 1970-01-01.
    const EPOCH_DELTA_SECS: i64 = 11_644_473_600;
    let secs = (filetime / 10_000_000) as i64 - EPOCH_DELTA_SECS;
    let nanos = (filetime % 10_000_000) as u32 * 100;
    Utc.timestamp_opt(secs, nanos)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().unwrap())
}

// ---- $ATTRIBUTE_LIST ----

/// One record of an `$ATTRIBUTE_LIST` payload, naming where an attribute
/// of the file actually lives.
#[derive(Debug, Clone)]
pub struct AttributeListEntry {
    pub type_code: u32,
    pub name: Option<String>,
    pub first_vcn: u64,
    /// File reference of the MFT entry holding the attribute.
    pub reference: u64,
    pub id: u16,
}

impl AttributeListEntry {
    /// MFT entry number the reference points at.
    pub fn entry_number(&self) -> u64 {
        self.reference & FILE_REFERENCE_ENTRY_MASK
    }
}

/// Parse every record of an `$ATTRIBUTE_LIST` payload.
pub fn parse_attribute_list(data: &[u8]) -> Result<Vec<AttributeListEntry>> {
    let mut entries = Vec::new();
    let mut offset = 0usize;

    while offset < data.len() {
        // A zero-padded tail ends the list.
        if data.len() - offset < 4 || le32(data, offset) == 0 {
            break;
        }
        if data.len() - offset < 26 {
            return Err(NtfsError::TruncatedAttribute(format!(
                "attribute list record at offset {offset} truncated"
            )));
        }
        let type_code = le32(data, offset);
        let record_length = le16(data, offset + 4) as usize;
        let name_length = data[offset + 6] as usize;
        let name_offset = data[offset + 7] as usize;
        let first_vcn = le64(data, offset + 8);
        let reference = le64(data, offset + 16);
        let id = le16(data, offset + 24);

        if record_length < 26 || offset + record_length > data.len() {
            return Err(NtfsError::TruncatedAttribute(format!(
                "attribute list record at offset {offset} claims {record_length} bytes"
            )));
        }
        let name = if name_length > 0 {
            let start = offset + name_offset;
            let end = start + name_length * 2;
            if end > offset + record_length {
                return Err(NtfsError::TruncatedAttribute(format!(
                    "attribute list name at offset {offset} exceeds its record"
                )));
            }
            Some(utf16le_string(&data[start..end]))
        } else {
            None
        };

        entries.push(AttributeListEntry {
            type_code,
            name,
            first_vcn,
            reference,
            id,
        });
        offset += record_length;
    }

    Ok(entries)
}
