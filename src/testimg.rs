//! Synthetic NTFS volumes for tests.
//!
//! Builds an in-memory 16 MiB volume with a populated MFT at 4 MiB:
//! fixup-protected records, run lists, a `$Bitmap` payload, and an
//! optional `$Secure` store. Individual builder switches produce the
//! corrupted or exotic layouts the parser tests need.

use std::io::{Cursor, Write};

use byteorder::{LittleEndian, WriteBytesExt};

use crate::mft::attr::{
    ATTR_ATTRIBUTE_LIST, ATTR_DATA, ATTR_FILE_NAME, ATTR_INDEX_ALLOCATION, ATTR_INDEX_ROOT,
};
use crate::volume::{FileIo, VolumeParams};

pub const BYTES_PER_SECTOR: u32 = 512;
pub const CLUSTER_SIZE: u32 = 4096;
pub const ENTRY_SIZE: u32 = 1024;
pub const VOLUME_SIZE: u64 = 16 * 1024 * 1024;
pub const MFT_OFFSET: u64 = 4 * 1024 * 1024;
pub const MFT_ENTRIES: u64 = 32;

const MFT_CLUSTER: u64 = MFT_OFFSET / CLUSTER_SIZE as u64;
const BITMAP_CLUSTER: u64 = 2000;
const SECURE_INDX_CLUSTER: u64 = 3000;
const FRAG_FILE_CLUSTERS: [u64; 2] = [3100, 3200];

const FLAG_IN_USE: u16 = 0x0001;
const FLAG_DIRECTORY: u16 = 0x0002;

pub struct TestVolume {
    pub io: FileIo<Cursor<Vec<u8>>>,
    pub params: VolumeParams,
    pub mft_size: u64,
    /// Index of the entry built by the attribute-list switches.
    pub attr_list_entry: u64,
}

pub struct VolumeBuilder {
    bitmap_bits: Vec<(u64, u64)>,
    bitmap_size: u64,
    secure: Option<Vec<(u32, Vec<u8>)>>,
    secure_allocation: bool,
    attribute_list_file: bool,
    cyclic_attribute_list: bool,
    corrupt_entry_zero: bool,
    corrupt_sds: bool,
}

impl VolumeBuilder {
    /// The baseline volume: 32 MFT entries, empty bitmap, no `$Secure`.
    pub fn standard() -> Self {
        Self {
            bitmap_bits: Vec::new(),
            bitmap_size: 512,
            secure: None,
            secure_allocation: false,
            attribute_list_file: false,
            cyclic_attribute_list: false,
            corrupt_entry_zero: false,
            corrupt_sds: false,
        }
    }

    pub fn with_bitmap_bits(mut self, ranges: &[(u64, u64)]) -> Self {
        self.bitmap_bits = ranges.to_vec();
        self
    }

    pub fn with_bitmap_size(mut self, bytes: u64) -> Self {
        self.bitmap_size = bytes;
        self
    }

    pub fn with_secure_store(mut self, descriptors: &[(u32, Vec<u8>)]) -> Self {
        self.secure = Some(descriptors.to_vec());
        self
    }

    /// Push the `$SII` entries out of the root into one INDX node.
    pub fn with_secure_allocation_node(mut self) -> Self {
        self.secure_allocation = true;
        self
    }

    /// Entry 24 spills its `$DATA` second extent into entry 25 via an
    /// attribute list.
    pub fn with_attribute_list_file(mut self) -> Self {
        self.attribute_list_file = true;
        self
    }

    /// Entry 24 and entry 25 reference each other's attribute lists.
    pub fn with_cyclic_attribute_list(mut self) -> Self {
        self.cyclic_attribute_list = true;
        self
    }

    pub fn corrupt_entry_zero_fixup(mut self) -> Self {
        self.corrupt_entry_zero = true;
        self
    }

    /// Make the `$SDS` entry header disagree with the `$SII` index.
    pub fn corrupt_sds_header(mut self) -> Self {
        self.corrupt_sds = true;
        self
    }

    pub fn build(self) -> TestVolume {
        let mut disk = vec![0u8; VOLUME_SIZE as usize];
        let mft_size = MFT_ENTRIES * ENTRY_SIZE as u64;

        let mut records: Vec<Vec<u8>> = Vec::new();
        for index in 0..MFT_ENTRIES {
            records.push(self.build_record(index));
        }
        for (index, record) in records.iter().enumerate() {
            let at = MFT_OFFSET as usize + index * ENTRY_SIZE as usize;
            disk[at..at + record.len()].copy_from_slice(record);
        }

        // $Bitmap payload.
        let bitmap_at = (BITMAP_CLUSTER * CLUSTER_SIZE as u64) as usize;
        let payload = self.bitmap_payload();
        disk[bitmap_at..bitmap_at + payload.len()].copy_from_slice(&payload);

        // $SII allocation node.
        if self.secure_allocation {
            let indx = self.secure_indx_record();
            let at = (SECURE_INDX_CLUSTER * CLUSTER_SIZE as u64) as usize;
            disk[at..at + indx.len()].copy_from_slice(&indx);
        }

        if self.corrupt_entry_zero {
            // Tear the first sector boundary of entry 0.
            disk[MFT_OFFSET as usize + 510] ^= 0xFF;
        }

        TestVolume {
            io: FileIo::new(Cursor::new(disk)),
            params: VolumeParams::new(
                BYTES_PER_SECTOR,
                CLUSTER_SIZE,
                ENTRY_SIZE,
                MFT_OFFSET,
                VOLUME_SIZE,
            )
            .unwrap(),
            mft_size,
            attr_list_entry: 24,
        }
    }

    fn build_record(&self, index: u64) -> Vec<u8> {
        match index {
            0 => record_with_attributes(
                0,
                FLAG_IN_USE,
                &[
                    resident_attribute(
                        ATTR_FILE_NAME,
                        None,
                        &file_name_value("$MFT", 3, 5),
                    ),
                    NonResidentAttr {
                        type_code: ATTR_DATA,
                        runs: &[(8, Some(MFT_CLUSTER))],
                        last_vcn: 7,
                        allocated: 8 * CLUSTER_SIZE as u64,
                        valid: MFT_ENTRIES * ENTRY_SIZE as u64,
                        initialized: MFT_ENTRIES * ENTRY_SIZE as u64,
                        ..Default::default()
                    }
                    .build(),
                ],
            ),
            5 => record_with_attributes(
                5,
                FLAG_IN_USE | FLAG_DIRECTORY,
                &[resident_attribute(
                    ATTR_FILE_NAME,
                    None,
                    &file_name_value(".", 3, 5),
                )],
            ),
            6 => record_with_attributes(
                6,
                FLAG_IN_USE,
                &[
                    resident_attribute(
                        ATTR_FILE_NAME,
                        None,
                        &file_name_value("$Bitmap", 3, 5),
                    ),
                    NonResidentAttr {
                        type_code: ATTR_DATA,
                        runs: &[(1, Some(BITMAP_CLUSTER))],
                        last_vcn: 0,
                        allocated: CLUSTER_SIZE as u64,
                        valid: self.bitmap_size,
                        initialized: self.bitmap_size,
                        ..Default::default()
                    }
                    .build(),
                ],
            ),
            7 => record_with_attributes(
                7,
                FLAG_IN_USE,
                &[
                    resident_attribute(
                        ATTR_FILE_NAME,
                        None,
                        &file_name_value("$Boot", 3, 5),
                    ),
                    NonResidentAttr {
                        type_code: ATTR_DATA,
                        runs: &[(2, Some(0))],
                        last_vcn: 1,
                        allocated: 8192,
                        valid: 8192,
                        initialized: 8192,
                        ..Default::default()
                    }
                    .build(),
                ],
            ),
            9 => self.build_secure_record(),
            24 if self.attribute_list_file => record_with_attributes(
                24,
                FLAG_IN_USE,
                &[
                    resident_attribute(
                        ATTR_FILE_NAME,
                        None,
                        &file_name_value("frag.bin", 3, 5),
                    ),
                    resident_attribute(
                        ATTR_ATTRIBUTE_LIST,
                        None,
                        &attribute_list_value(&[
                            (ATTR_FILE_NAME, 0, 24, None),
                            (ATTR_DATA, 0, 24, None),
                            (ATTR_DATA, 1, 25, None),
                        ]),
                    ),
                    NonResidentAttr {
                        type_code: ATTR_DATA,
                        runs: &[(1, Some(FRAG_FILE_CLUSTERS[0]))],
                        last_vcn: 0,
                        allocated: 2 * CLUSTER_SIZE as u64,
                        valid: 2 * CLUSTER_SIZE as u64,
                        initialized: 2 * CLUSTER_SIZE as u64,
                        ..Default::default()
                    }
                    .build(),
                ],
            ),
            24 if self.cyclic_attribute_list => record_with_attributes(
                24,
                FLAG_IN_USE,
                &[
                    resident_attribute(
                        ATTR_FILE_NAME,
                        None,
                        &file_name_value("loop.bin", 3, 5),
                    ),
                    resident_attribute(
                        ATTR_ATTRIBUTE_LIST,
                        None,
                        &attribute_list_value(&[(ATTR_DATA, 0, 25, None)]),
                    ),
                ],
            ),
            25 if self.attribute_list_file => record_with_base(
                25,
                FLAG_IN_USE,
                24,
                &[NonResidentAttr {
                    type_code: ATTR_DATA,
                    runs: &[(1, Some(FRAG_FILE_CLUSTERS[1]))],
                    first_vcn: 1,
                    last_vcn: 1,
                    ..Default::default()
                }
                .build()],
            ),
            25 if self.cyclic_attribute_list => record_with_base(
                25,
                FLAG_IN_USE,
                24,
                &[
                    resident_attribute(
                        ATTR_ATTRIBUTE_LIST,
                        None,
                        &attribute_list_value(&[(ATTR_DATA, 0, 24, None)]),
                    ),
                    resident_attribute(ATTR_DATA, None, &[0u8; 8]),
                ],
            ),
            _ => record_with_attributes(
                index,
                FLAG_IN_USE,
                &[resident_attribute(
                    ATTR_FILE_NAME,
                    None,
                    &file_name_value(&format!("file{index}"), 3, 5),
                )],
            ),
        }
    }

    fn build_secure_record(&self) -> Vec<u8> {
        let Some(descriptors) = &self.secure else {
            // A legacy volume: entry 9 predates $Secure.
            return record_with_attributes(
                9,
                FLAG_IN_USE,
                &[resident_attribute(
                    ATTR_FILE_NAME,
                    None,
                    &file_name_value("$Quota", 3, 5),
                )],
            );
        };

        let (sds_blob, index_entries) = self.sds_and_entries(descriptors);

        let mut attrs = vec![
            resident_attribute(ATTR_FILE_NAME, None, &file_name_value("$Secure", 3, 5)),
            resident_attribute(ATTR_DATA, Some("$SDS"), &sds_blob),
        ];

        if self.secure_allocation {
            // Root holds only a subnode pointer; the entries live in the
            // INDX record at VCN 0.
            let root_entries = sii_last_entry(Some(0));
            attrs.push(resident_attribute(
                ATTR_INDEX_ROOT,
                Some("$SII"),
                &index_root_value(&root_entries, true),
            ));
            attrs.push(
                NonResidentAttr {
                    type_code: ATTR_INDEX_ALLOCATION,
                    name: Some("$SII"),
                    runs: &[(1, Some(SECURE_INDX_CLUSTER))],
                    last_vcn: 0,
                    allocated: CLUSTER_SIZE as u64,
                    valid: CLUSTER_SIZE as u64,
                    initialized: CLUSTER_SIZE as u64,
                    ..Default::default()
                }
                .build(),
            );
        } else {
            let mut root_entries = index_entries;
            root_entries.extend(sii_last_entry(None));
            attrs.push(resident_attribute(
                ATTR_INDEX_ROOT,
                Some("$SII"),
                &index_root_value(&root_entries, false),
            ));
        }

        record_with_attributes(9, FLAG_IN_USE, &attrs)
    }

    /// Lay out the `$SDS` blob and the matching `$SII` entries.
    fn sds_and_entries(&self, descriptors: &[(u32, Vec<u8>)]) -> (Vec<u8>, Vec<u8>) {
        let mut sorted = descriptors.to_vec();
        sorted.sort_by_key(|(id, _)| *id);

        let mut blob = Vec::new();
        let mut entries = Vec::new();
        for (id, payload) in &sorted {
            // Entries are 16-aligned within $SDS.
            while blob.len() % 16 != 0 {
                blob.push(0);
            }
            let offset = blob.len() as u64;
            let size = 20 + payload.len() as u32;

            blob.write_u32::<LittleEndian>(0x1234_5678).unwrap(); // hash
            let stored_id = if self.corrupt_sds { id + 1 } else { *id };
            blob.write_u32::<LittleEndian>(stored_id).unwrap();
            blob.write_u64::<LittleEndian>(offset).unwrap();
            blob.write_u32::<LittleEndian>(size).unwrap();
            blob.write_all(payload).unwrap();

            entries.extend(sii_entry(*id, offset, size));
        }
        (blob, entries)
    }

    fn bitmap_payload(&self) -> Vec<u8> {
        let mut payload = vec![0u8; self.bitmap_size as usize];
        for &(start, count) in &self.bitmap_bits {
            for bit in start..start + count {
                let byte = (bit / 8) as usize;
                if byte < payload.len() {
                    payload[byte] |= 1 << (bit % 8);
                }
            }
        }
        payload
    }

    fn secure_indx_record(&self) -> Vec<u8> {
        let descriptors = self.secure.as_deref().unwrap_or(&[]);
        let (_, mut entries) = self.sds_and_entries(descriptors);
        entries.extend(sii_last_entry(None));
        indx_record(0, &entries)
    }
}

// ---- Record assembly ----

/// Build a fixup-protected MFT record holding the given attributes.
pub fn record_with_attributes(index: u64, flags: u16, attrs: &[Vec<u8>]) -> Vec<u8> {
    record_with_base(index, flags, 0, attrs)
}

pub fn record_with_base(index: u64, flags: u16, base_reference: u64, attrs: &[Vec<u8>]) -> Vec<u8> {
    let mut record = vec![0u8; ENTRY_SIZE as usize];
    record[0..4].copy_from_slice(b"FILE");
    record[0x04..0x06].copy_from_slice(&48u16.to_le_bytes()); // USA offset
    record[0x06..0x08].copy_from_slice(&3u16.to_le_bytes()); // USA count
    record[0x10..0x12].copy_from_slice(&1u16.to_le_bytes()); // sequence
    record[0x12..0x14].copy_from_slice(&1u16.to_le_bytes()); // hard links
    record[0x14..0x16].copy_from_slice(&56u16.to_le_bytes()); // first attribute
    record[0x16..0x18].copy_from_slice(&flags.to_le_bytes());
    record[0x20..0x28].copy_from_slice(&base_reference.to_le_bytes());
    record[0x28..0x2A].copy_from_slice(&(attrs.len() as u16 + 1).to_le_bytes());
    record[0x2C..0x30].copy_from_slice(&(index as u32).to_le_bytes());

    let mut pos = 56usize;
    for attr in attrs {
        record[pos..pos + attr.len()].copy_from_slice(attr);
        pos += attr.len();
    }
    record[pos..pos + 4].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
    pos += 8;

    record[0x18..0x1C].copy_from_slice(&(pos as u32).to_le_bytes()); // used
    record[0x1C..0x20].copy_from_slice(&(ENTRY_SIZE).to_le_bytes()); // allocated

    fixup_protect(&mut record, 48, BYTES_PER_SECTOR as usize, 0x0001);
    record
}

/// Move the real sector-end bytes into the update sequence array and
/// stamp the sentinels, making the record fixup-valid.
pub fn fixup_protect(record: &mut [u8], usa_offset: usize, bytes_per_sector: usize, usn: u16) {
    let sectors = record.len() / bytes_per_sector;
    record[usa_offset..usa_offset + 2].copy_from_slice(&usn.to_le_bytes());
    for sector in 1..=sectors {
        let end = sector * bytes_per_sector - 2;
        let saved = usa_offset + sector * 2;
        record[saved] = record[end];
        record[saved + 1] = record[end + 1];
        record[end..end + 2].copy_from_slice(&usn.to_le_bytes());
    }
}

// ---- Attribute assembly ----

pub fn resident_attribute(type_code: u32, name: Option<&str>, value: &[u8]) -> Vec<u8> {
    let name_units: Vec<u8> = name
        .map(|n| n.encode_utf16().flat_map(|u| u.to_le_bytes()).collect())
        .unwrap_or_default();
    let name_offset = 24usize;
    let value_offset = name_offset + name_units.len();
    let length = (value_offset + value.len() + 7) & !7;

    let mut attr = vec![0u8; length];
    attr[0..4].copy_from_slice(&type_code.to_le_bytes());
    attr[4..8].copy_from_slice(&(length as u32).to_le_bytes());
    attr[9] = name.map(|n| n.len() as u8).unwrap_or(0);
    attr[10..12].copy_from_slice(&(name_offset as u16).to_le_bytes());
    attr[0x10..0x14].copy_from_slice(&(value.len() as u32).to_le_bytes());
    attr[0x14..0x16].copy_from_slice(&(value_offset as u16).to_le_bytes());
    attr[name_offset..name_offset + name_units.len()].copy_from_slice(&name_units);
    attr[value_offset..value_offset + value.len()].copy_from_slice(value);
    attr
}

/// Builder for non-resident attribute headers.
#[derive(Default)]
pub struct NonResidentAttr<'a> {
    pub type_code: u32,
    pub name: Option<&'a str>,
    pub runs: &'a [(u64, Option<u64>)],
    pub first_vcn: u64,
    pub last_vcn: u64,
    pub allocated: u64,
    pub valid: u64,
    pub initialized: u64,
    pub flags: u16,
    pub compression_unit: u16,
}

impl NonResidentAttr<'_> {
    pub fn build(&self) -> Vec<u8> {
        let name_units: Vec<u8> = self
            .name
            .map(|n| n.encode_utf16().flat_map(|u| u.to_le_bytes()).collect())
            .unwrap_or_default();
        let header_size = if self.compression_unit > 0 { 0x48 } else { 0x40 };
        let name_offset = header_size;
        let run_offset = name_offset + name_units.len();
        let run_bytes = encode_runs(self.runs);
        let length = (run_offset + run_bytes.len() + 7) & !7;

        let mut attr = vec![0u8; length];
        attr[0..4].copy_from_slice(&self.type_code.to_le_bytes());
        attr[4..8].copy_from_slice(&(length as u32).to_le_bytes());
        attr[8] = 1;
        attr[9] = self.name.map(|n| n.len() as u8).unwrap_or(0);
        attr[10..12].copy_from_slice(&(name_offset as u16).to_le_bytes());
        attr[12..14].copy_from_slice(&self.flags.to_le_bytes());
        attr[0x10..0x18].copy_from_slice(&self.first_vcn.to_le_bytes());
        attr[0x18..0x20].copy_from_slice(&self.last_vcn.to_le_bytes());
        attr[0x20..0x22].copy_from_slice(&(run_offset as u16).to_le_bytes());
        attr[0x22..0x24].copy_from_slice(&self.compression_unit.to_le_bytes());
        attr[0x28..0x30].copy_from_slice(&self.allocated.to_le_bytes());
        attr[0x30..0x38].copy_from_slice(&self.valid.to_le_bytes());
        attr[0x38..0x40].copy_from_slice(&self.initialized.to_le_bytes());
        if self.compression_unit > 0 {
            attr[0x40..0x48].copy_from_slice(&self.allocated.to_le_bytes());
        }
        attr[name_offset..name_offset + name_units.len()].copy_from_slice(&name_units);
        attr[run_offset..run_offset + run_bytes.len()].copy_from_slice(&run_bytes);
        attr
    }
}

/// Encode a run list from (length, lcn) pairs; `None` marks sparse runs.
pub fn encode_runs(runs: &[(u64, Option<u64>)]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut prev: i64 = 0;
    for &(length, lcn) in runs {
        let length_bytes = unsigned_width(length);
        match lcn {
            None => {
                out.push(length_bytes as u8);
                out.extend_from_slice(&length.to_le_bytes()[..length_bytes]);
            }
            Some(lcn) => {
                let delta = lcn as i64 - prev;
                prev = lcn as i64;
                let delta_bytes = signed_width(delta);
                out.push((length_bytes | (delta_bytes << 4)) as u8);
                out.extend_from_slice(&length.to_le_bytes()[..length_bytes]);
                out.extend_from_slice(&delta.to_le_bytes()[..delta_bytes]);
            }
        }
    }
    out.push(0);
    out
}

fn unsigned_width(value: u64) -> usize {
    for width in 1..8 {
        if value < 1u64 << (width * 8) {
            return width;
        }
    }
    8
}

fn signed_width(value: i64) -> usize {
    for width in 1..8 {
        let shift = 64 - width * 8;
        if (value << shift) >> shift == value {
            return width;
        }
    }
    8
}

pub fn file_name_value(name: &str, namespace: u8, parent: u64) -> Vec<u8> {
    let name_units: Vec<u8> = name.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
    let mut value = vec![0u8; 0x42 + name_units.len()];
    value[0x00..0x08].copy_from_slice(&parent.to_le_bytes());
    value[0x40] = name.encode_utf16().count() as u8;
    value[0x41] = namespace;
    value[0x42..].copy_from_slice(&name_units);
    value
}

pub fn attribute_list_value(records: &[(u32, u64, u64, Option<&str>)]) -> Vec<u8> {
    let mut out = Vec::new();
    for &(type_code, first_vcn, reference, name) in records {
        let name_units: Vec<u8> = name
            .map(|n| n.encode_utf16().flat_map(|u| u.to_le_bytes()).collect())
            .unwrap_or_default();
        let length = (26 + name_units.len() + 7) & !7;
        let mut rec = vec![0u8; length];
        rec[0..4].copy_from_slice(&type_code.to_le_bytes());
        rec[4..6].copy_from_slice(&(length as u16).to_le_bytes());
        rec[6] = name.map(|n| n.len() as u8).unwrap_or(0);
        rec[7] = 26;
        rec[8..16].copy_from_slice(&first_vcn.to_le_bytes());
        rec[16..24].copy_from_slice(&reference.to_le_bytes());
        rec[26..26 + name_units.len()].copy_from_slice(&name_units);
        out.extend(rec);
    }
    out
}

// ---- $Secure assembly ----

/// A minimal self-relative descriptor: owner S-1-5-18, group S-1-1-0,
/// empty DACL.
pub fn sample_descriptor() -> Vec<u8> {
    let mut data = Vec::new();
    data.write_u8(1).unwrap(); // revision
    data.write_u8(0).unwrap();
    data.write_u16::<LittleEndian>(0x8004).unwrap(); // self-relative | DACL present
    data.write_u32::<LittleEndian>(20).unwrap(); // owner
    data.write_u32::<LittleEndian>(32).unwrap(); // group
    data.write_u32::<LittleEndian>(0).unwrap(); // no SACL
    data.write_u32::<LittleEndian>(44).unwrap(); // DACL

    // Owner SID S-1-5-18.
    data.extend_from_slice(&[1, 1, 0, 0, 0, 0, 0, 5]);
    data.write_u32::<LittleEndian>(18).unwrap();
    // Group SID S-1-1-0.
    data.extend_from_slice(&[1, 1, 0, 0, 0, 0, 0, 1]);
    data.write_u32::<LittleEndian>(0).unwrap();
    // Empty DACL.
    data.write_u8(2).unwrap(); // ACL revision
    data.write_u8(0).unwrap();
    data.write_u16::<LittleEndian>(8).unwrap(); // size
    data.write_u16::<LittleEndian>(0).unwrap(); // ACE count
    data.write_u16::<LittleEndian>(0).unwrap();
    data
}

/// One `$SII` index entry: 4-byte key, 20-byte value.
fn sii_entry(id: u32, sds_offset: u64, sds_size: u32) -> Vec<u8> {
    let mut entry = vec![0u8; 40];
    entry[0x00..0x02].copy_from_slice(&20u16.to_le_bytes()); // data offset
    entry[0x02..0x04].copy_from_slice(&20u16.to_le_bytes()); // data size
    entry[0x08..0x0A].copy_from_slice(&40u16.to_le_bytes()); // entry size
    entry[0x0A..0x0C].copy_from_slice(&4u16.to_le_bytes()); // key size
    entry[0x10..0x14].copy_from_slice(&id.to_le_bytes()); // key
    entry[0x14..0x18].copy_from_slice(&0x1234_5678u32.to_le_bytes()); // hash
    entry[0x18..0x1C].copy_from_slice(&id.to_le_bytes());
    entry[0x1C..0x24].copy_from_slice(&sds_offset.to_le_bytes());
    entry[0x24..0x28].copy_from_slice(&sds_size.to_le_bytes());
    entry
}

fn sii_last_entry(subnode_vcn: Option<u64>) -> Vec<u8> {
    match subnode_vcn {
        None => {
            let mut entry = vec![0u8; 16];
            entry[0x08..0x0A].copy_from_slice(&16u16.to_le_bytes());
            entry[0x0C..0x0E].copy_from_slice(&2u16.to_le_bytes()); // last
            entry
        }
        Some(vcn) => {
            let mut entry = vec![0u8; 24];
            entry[0x08..0x0A].copy_from_slice(&24u16.to_le_bytes());
            entry[0x0C..0x0E].copy_from_slice(&3u16.to_le_bytes()); // last | subnode
            entry[0x10..0x18].copy_from_slice(&vcn.to_le_bytes());
            entry
        }
    }
}

/// An `$INDEX_ROOT` value for `$SII`: root header, node header, entries.
fn index_root_value(entries: &[u8], has_children: bool) -> Vec<u8> {
    let mut root = vec![0u8; 32 + entries.len()];
    root[0x04..0x08].copy_from_slice(&0x10u32.to_le_bytes()); // collation: ULONG
    root[0x08..0x0C].copy_from_slice(&CLUSTER_SIZE.to_le_bytes()); // index record size
    root[0x0C] = 1; // clusters per record

    let node_size = (16 + entries.len()) as u32;
    root[0x10..0x14].copy_from_slice(&16u32.to_le_bytes()); // entries offset
    root[0x14..0x18].copy_from_slice(&node_size.to_le_bytes());
    root[0x18..0x1C].copy_from_slice(&node_size.to_le_bytes());
    root[0x1C] = if has_children { 1 } else { 0 };
    root[0x20..].copy_from_slice(entries);
    root
}

/// A fixup-protected INDX record holding the given entries.
fn indx_record(vcn: u64, entries: &[u8]) -> Vec<u8> {
    let mut record = vec![0u8; CLUSTER_SIZE as usize];
    record[0..4].copy_from_slice(b"INDX");
    record[0x04..0x06].copy_from_slice(&0x28u16.to_le_bytes()); // USA offset
    let usa_count = (CLUSTER_SIZE / BYTES_PER_SECTOR + 1) as u16;
    record[0x06..0x08].copy_from_slice(&usa_count.to_le_bytes());
    record[0x10..0x18].copy_from_slice(&vcn.to_le_bytes());

    // Node header at 0x18; entries start at 0x40 (past the USA).
    let entries_offset = 0x40 - 0x18;
    record[0x18..0x1C].copy_from_slice(&(entries_offset as u32).to_le_bytes());
    record[0x1C..0x20].copy_from_slice(&((entries_offset + entries.len()) as u32).to_le_bytes());
    record[0x20..0x24]
        .copy_from_slice(&((CLUSTER_SIZE as usize - 0x18) as u32).to_le_bytes());
    record[0x40..0x40 + entries.len()].copy_from_slice(entries);

    fixup_protect(&mut record, 0x28, BYTES_PER_SECTOR as usize, 0x0002);
    record
}
