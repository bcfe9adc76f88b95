//! The Master File Table.
//!
//! The MFT is a flat array of fixed-size records whose own location is
//! described by record 0 — the table describes itself. Bootstrap
//! therefore happens in two states: a direct window at the volume's
//! declared MFT offset is enough to read entry 0, and once entry 0's
//! unnamed `$DATA` run list is decoded the window is replaced by a
//! run-list reader that can reach every fragment of the table.
//!
//! Parsed entries are shared through a bounded LRU cache; entries whose
//! handles are still held by callers are never evicted.

pub mod attr;
pub mod cache;
pub mod entry;
pub mod fixup;
pub mod runs;

use std::collections::HashSet;
use std::io::ErrorKind;
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::error::{NtfsError, Result};
use crate::mft::attr::{parse_attribute_list, Attribute, AttributeBody, ATTR_ATTRIBUTE_LIST};
use crate::mft::cache::EntryCache;
use crate::mft::entry::MftEntry;
use crate::mft::runs::DataRun;
use crate::stream::{attribute_value, ClusterStream};
use crate::volume::{read_exact_at, VolumeParams, VolumeReader};
use crate::CancelToken;

/// Well-known MFT entry numbers.
pub const MFT_ENTRY_MFT: u64 = 0;
pub const MFT_ENTRY_VOLUME: u64 = 3;
pub const MFT_ENTRY_ROOT: u64 = 5;
pub const MFT_ENTRY_BITMAP: u64 = 6;
pub const MFT_ENTRY_BOOT: u64 = 7;
pub const MFT_ENTRY_SECURE: u64 = 9;

/// `read_mft` flag: treat the supplied range as a bare `$MFT` dump and
/// never resolve entry 0's run list.
pub const MFT_ONLY: u8 = 0x01;

/// Nested attribute-list references beyond this depth are treated as a
/// crafted loop.
const MAX_ATTRIBUTE_LIST_DEPTH: usize = 16;

/// Attribute-list payloads larger than this are rejected as corrupt.
const MAX_ATTRIBUTE_LIST_SIZE: usize = 1 << 24;

#[derive(Debug)]
enum Backing {
    /// Pre-bootstrap (and MFT-only) state: a contiguous window at the
    /// declared MFT offset.
    Direct { offset: u64, size: u64 },
    /// Post-bootstrap state: entry 0's `$DATA` run list.
    Runs {
        runs: Vec<DataRun>,
        valid_size: u64,
        initialized_size: u64,
    },
}

#[derive(Debug)]
pub struct Mft {
    params: VolumeParams,
    backing: Backing,
    entry_count: u64,
    cache: Mutex<EntryCache>,
    cancel: CancelToken,
}

impl Mft {
    /// Bootstrap the table: read entry 0 through a direct window, then
    /// (unless `MFT_ONLY`) switch to its `$DATA` run list and size the
    /// table from that attribute's valid size.
    pub fn bootstrap(
        params: VolumeParams,
        io: &dyn VolumeReader,
        mft_offset: u64,
        mft_size: u64,
        flags: u8,
    ) -> Result<Self> {
        let entry_size = params.mft_entry_size as u64;

        let mut mft = Self {
            params,
            backing: Backing::Direct {
                offset: mft_offset,
                size: mft_size,
            },
            // Provisional count: whatever the direct window holds.
            entry_count: mft_size / entry_size,
            cache: Mutex::new(EntryCache::new(params.cache_capacity)),
            cancel: CancelToken::new(),
        };

        let entry_zero = mft.parse_entry(io, MFT_ENTRY_MFT)?;
        let data_attribute = entry_zero.data_attribute().ok_or_else(|| {
            NtfsError::MissingValue("MFT entry 0 has no unnamed $DATA attribute".into())
        })?;

        if flags & MFT_ONLY == 0 {
            match &data_attribute.body {
                AttributeBody::NonResident {
                    runs,
                    valid_size,
                    initialized_size,
                    ..
                } => {
                    mft.entry_count = valid_size / entry_size;
                    mft.backing = Backing::Runs {
                        runs: runs.clone(),
                        valid_size: *valid_size,
                        initialized_size: *initialized_size,
                    };
                }
                AttributeBody::Resident { .. } => {
                    return Err(NtfsError::CorruptRecord(
                        "MFT entry 0 carries a resident $DATA attribute".into(),
                    ));
                }
            }
        }

        debug!(
            "MFT bootstrap complete: {} entries of {} bytes{}",
            mft.entry_count,
            entry_size,
            if flags & MFT_ONLY != 0 { " (MFT-only)" } else { "" }
        );
        Ok(mft)
    }

    /// Observe this token to let callers cancel long scans.
    pub(crate) fn set_cancel_token(&mut self, cancel: CancelToken) {
        self.cancel = cancel;
    }

    pub fn number_of_entries(&self) -> u64 {
        self.entry_count
    }

    pub fn params(&self) -> &VolumeParams {
        &self.params
    }

    /// Whether any cached entry handle is still held by a caller.
    pub fn has_pinned_entries(&self) -> bool {
        self.cache
            .lock()
            .map(|cache| cache.has_pinned())
            .unwrap_or(true)
    }

    /// Shared (cached) read of one entry.
    pub fn entry(&self, io: &dyn VolumeReader, index: u64) -> Result<Arc<MftEntry>> {
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(entry) = cache.get(index) {
                return Ok(entry);
            }
        }

        // Parse outside the cache lock so a miss does not serialize every
        // other lookup behind this entry's I/O.
        let parsed = self.parse_entry(io, index)?;
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| NtfsError::Io(std::io::Error::other("MFT cache lock poisoned")))?;
        Ok(cache.insert(index, parsed))
    }

    /// Owned (uncached) read of one entry.
    pub fn entry_uncached(&self, io: &dyn VolumeReader, index: u64) -> Result<MftEntry> {
        self.parse_entry(io, index)
    }

    /// Read the raw record bytes for an entry, without parsing.
    pub fn raw_record(&self, io: &dyn VolumeReader, index: u64) -> Result<Vec<u8>> {
        if index >= self.entry_count {
            return Err(NtfsError::EntryOutOfRange {
                index,
                count: self.entry_count,
            });
        }
        let entry_size = self.params.mft_entry_size as usize;
        let byte_offset = index * entry_size as u64;
        let mut record = vec![0u8; entry_size];

        match &self.backing {
            Backing::Direct { offset, size } => {
                if byte_offset + entry_size as u64 > *size {
                    return Err(NtfsError::EntryOutOfRange {
                        index,
                        count: size / entry_size as u64,
                    });
                }
                read_exact_at(io, offset + byte_offset, &mut record)
                    .map_err(|e| short_read_is_corrupt(e, index))?;
            }
            Backing::Runs {
                runs,
                valid_size,
                initialized_size,
            } => {
                let mut stream = ClusterStream::over_runs(
                    io,
                    runs,
                    self.params.cluster_size,
                    *valid_size,
                    *initialized_size,
                    0,
                );
                let n = stream.read_at(byte_offset, &mut record)?;
                if n < entry_size {
                    return Err(NtfsError::CorruptRecord(format!(
                        "MFT entry {index}: table data ends after {n} of {entry_size} bytes"
                    )));
                }
            }
        }
        Ok(record)
    }

    fn parse_entry(&self, io: &dyn VolumeReader, index: u64) -> Result<MftEntry> {
        let record = self.raw_record(io, index)?;
        let mut entry = MftEntry::parse(
            record,
            index,
            self.params.bytes_per_sector,
            self.params.cluster_size,
        )?;
        self.resolve_attribute_list(io, &mut entry)?;
        Ok(entry)
    }

    /// Pull in attributes that `$ATTRIBUTE_LIST` places in other entries.
    fn resolve_attribute_list(&self, io: &dyn VolumeReader, base: &mut MftEntry) -> Result<()> {
        if base.attribute_list().is_none() {
            return Ok(());
        }

        let mut visited = HashSet::from([base.index]);
        let mut merged: Vec<Attribute> = Vec::new();
        self.collect_extension_attributes(io, base.index, base, 0, &mut visited, &mut merged)?;

        if !merged.is_empty() {
            debug!(
                "MFT entry {}: merged {} attributes from {} extension records",
                base.index,
                merged.len(),
                visited.len() - 1
            );
            base.merge_extension_attributes(merged);
        }
        Ok(())
    }

    fn collect_extension_attributes(
        &self,
        io: &dyn VolumeReader,
        base_index: u64,
        holder: &MftEntry,
        depth: usize,
        visited: &mut HashSet<u64>,
        merged: &mut Vec<Attribute>,
    ) -> Result<()> {
        let Some(list_attribute) = holder.attribute_list() else {
            return Ok(());
        };
        if depth >= MAX_ATTRIBUTE_LIST_DEPTH {
            return Err(NtfsError::CyclicAttributeList(base_index));
        }

        let payload = attribute_value(
            io,
            list_attribute,
            self.params.cluster_size,
            MAX_ATTRIBUTE_LIST_SIZE,
        )?;
        let records = parse_attribute_list(&payload)?;

        for record in records {
            if self.cancel.is_cancelled() {
                return Err(NtfsError::Cancelled);
            }
            let target = record.entry_number();
            if target == holder.index {
                continue;
            }
            if !visited.insert(target) {
                // Several list records naming one extension entry is
                // normal at the top level; a nested list reaching back
                // to an entry already on the walk is a crafted loop.
                if depth > 0 {
                    return Err(NtfsError::CyclicAttributeList(base_index));
                }
                continue;
            }

            let raw = self.raw_record(io, target)?;
            let extension = MftEntry::parse(
                raw,
                target,
                self.params.bytes_per_sector,
                self.params.cluster_size,
            )?;

            // An extension record must point back at the base.
            if extension.base_reference & attr::FILE_REFERENCE_ENTRY_MASK != base_index {
                warn!(
                    "MFT entry {base_index}: attribute list names entry {target}, \
                     which belongs to entry {}",
                    extension.base_reference & attr::FILE_REFERENCE_ENTRY_MASK
                );
                continue;
            }

            for attribute in extension.attributes() {
                if attribute.type_code != ATTR_ATTRIBUTE_LIST {
                    merged.push(attribute.clone());
                }
            }
            self.collect_extension_attributes(io, base_index, &extension, depth + 1, visited, merged)?;
        }
        Ok(())
    }
}

fn short_read_is_corrupt(e: std::io::Error, index: u64) -> NtfsError {
    if e.kind() == ErrorKind::UnexpectedEof {
        NtfsError::CorruptRecord(format!("MFT entry {index}: {e}"))
    } else {
        NtfsError::Io(e)
    }
}
