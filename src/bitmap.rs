//! `$Bitmap` allocation scan.
//!
//! MFT entry 6 carries the volume's cluster allocation map as its unnamed
//! `$DATA` attribute: bit `k` of little-endian 32-bit word `w` set means
//! cluster `32 * w + k` is allocated. The scan coalesces set bits into
//! contiguous ranges and returns them; the full list is also logged at
//! debug level for diagnostics.

use log::debug;

use crate::error::{NtfsError, Result};
use crate::mft::{Mft, MFT_ENTRY_BITMAP};
use crate::stream::ClusterStream;
use crate::volume::VolumeReader;
use crate::CancelToken;

/// A contiguous range of allocated clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterRange {
    pub first_cluster: u64,
    pub count: u64,
}

/// Scan the allocation bitmap into coalesced ranges.
pub(crate) fn read_bitmap(
    mft: &Mft,
    io: &dyn VolumeReader,
    cancel: &CancelToken,
) -> Result<Vec<ClusterRange>> {
    let entry = mft.entry(io, MFT_ENTRY_BITMAP).map_err(|e| match e {
        NtfsError::EntryOutOfRange { .. } => {
            NtfsError::MissingValue("volume has no $Bitmap entry".into())
        }
        other => other,
    })?;
    if !entry.is_in_use() {
        return Err(NtfsError::MissingValue("$Bitmap entry is not in use".into()));
    }
    let data_attribute = entry
        .data_attribute()
        .ok_or_else(|| NtfsError::MissingValue("$Bitmap entry has no $DATA attribute".into()))?;

    let bitmap_size = data_attribute.value_size();
    if bitmap_size % 4 != 0 {
        return Err(NtfsError::CorruptBitmap(format!(
            "$DATA size {bitmap_size} is not a multiple of 4"
        )));
    }

    let cluster_size = mft.params().cluster_size;
    let mut stream = ClusterStream::new(io, data_attribute, cluster_size)?;

    let mut ranges: Vec<ClusterRange> = Vec::new();
    let mut open: Option<u64> = None;
    let mut cluster: u64 = 0;

    let mut chunk = vec![0u8; cluster_size as usize];
    let mut offset: u64 = 0;
    while offset < bitmap_size {
        if cancel.is_cancelled() {
            return Err(NtfsError::Cancelled);
        }
        let n = stream.read_at(offset, &mut chunk)?;
        if n == 0 {
            break;
        }
        offset += n as u64;

        for word_bytes in chunk[..n].chunks_exact(4) {
            let mut word = u32::from_le_bytes(word_bytes.try_into().unwrap());
            if word == 0 {
                close_range(&mut ranges, &mut open, cluster);
                cluster += 32;
                continue;
            }
            if word == u32::MAX {
                open.get_or_insert(cluster);
                cluster += 32;
                continue;
            }
            for _ in 0..32 {
                if word & 1 != 0 {
                    open.get_or_insert(cluster);
                } else {
                    close_range(&mut ranges, &mut open, cluster);
                }
                cluster += 1;
                word >>= 1;
            }
        }
    }
    close_range(&mut ranges, &mut open, cluster);

    debug!(
        "$Bitmap scan: {} allocated ranges over {} clusters",
        ranges.len(),
        cluster
    );
    for range in &ranges {
        debug!(
            "  allocated clusters {} - {} ({})",
            range.first_cluster,
            range.first_cluster + range.count,
            range.count
        );
    }

    Ok(ranges)
}

fn close_range(ranges: &mut Vec<ClusterRange>, open: &mut Option<u64>, end: u64) {
    if let Some(first_cluster) = open.take() {
        ranges.push(ClusterRange {
            first_cluster,
            count: end - first_cluster,
        });
    }
}
