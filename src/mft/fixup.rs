//! Multi-sector transfer fixup.
//!
//! Every multi-sector record ($MFT entries, INDX nodes) ends each sector
//! with a two-byte update-sequence sentinel; the displaced bytes live in
//! the record's update-sequence array. A sentinel that does not match the
//! update-sequence number means the record was torn mid-write and must be
//! rejected before any field in it is trusted.

use crate::error::{NtfsError, Result};
use crate::util::le16;

/// Verify the update-sequence sentinels of `record` and restore the
/// original bytes at each sector boundary.
///
/// `usa_offset` and `usa_count` come from the record header; `usa_count`
/// includes the update-sequence number itself, so a 1024-byte record with
/// 512-byte sectors carries a count of 3.
pub fn apply_fixup(
    record: &mut [u8],
    usa_offset: usize,
    usa_count: usize,
    bytes_per_sector: usize,
) -> Result<()> {
    if usa_count < 2 {
        // A record shorter than one sector carries no sentinels.
        return Ok(());
    }
    if usa_offset + usa_count * 2 > record.len() {
        return Err(NtfsError::CorruptRecord(format!(
            "update sequence array at {usa_offset} (count {usa_count}) exceeds record size {}",
            record.len()
        )));
    }
    if (usa_count - 1) * bytes_per_sector > record.len() {
        return Err(NtfsError::CorruptRecord(format!(
            "update sequence count {usa_count} covers more than the record's {} bytes",
            record.len()
        )));
    }

    let usn = le16(record, usa_offset);

    for sector in 1..usa_count {
        let sentinel_offset = sector * bytes_per_sector - 2;
        let stored = le16(record, sentinel_offset);
        if stored != usn {
            return Err(NtfsError::CorruptRecord(format!(
                "fixup mismatch in sector {sector}: expected {usn:#06x}, found {stored:#06x}"
            )));
        }
        let saved_offset = usa_offset + sector * 2;
        record[sentinel_offset] = record[saved_offset];
        record[sentinel_offset + 1] = record[saved_offset + 1];
    }

    Ok(())
}
