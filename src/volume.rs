//! Volume I/O context.
//!
//! The boot-sector parser (outside this crate) supplies the geometry of the
//! volume as a [`VolumeParams`] value; the byte source itself is reached
//! through the [`VolumeReader`] contract. [`FileIo`] adapts any
//! `Read + Seek` source, serializing access behind a mutex so one opened
//! image can back many concurrent readers.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Mutex;

use crate::error::{NtfsError, Result};

/// Default capacity of the MFT entry cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 128;

/// Geometry and session configuration for one NTFS volume.
///
/// All values come from the volume opener; they are fixed for the life of
/// a session.
#[derive(Debug, Clone, Copy)]
pub struct VolumeParams {
    /// Bytes per sector (the fixup granularity), typically 512.
    pub bytes_per_sector: u32,
    /// Bytes per cluster, typically 4096.
    pub cluster_size: u32,
    /// Bytes per MFT entry, typically 1024.
    pub mft_entry_size: u32,
    /// Byte offset of the MFT within the volume.
    pub mft_offset: u64,
    /// Total volume size in bytes.
    pub volume_size: u64,
    /// Capacity of the MFT entry cache.
    pub cache_capacity: usize,
}

impl VolumeParams {
    /// Create a parameter block, validating the geometry.
    pub fn new(
        bytes_per_sector: u32,
        cluster_size: u32,
        mft_entry_size: u32,
        mft_offset: u64,
        volume_size: u64,
    ) -> Result<Self> {
        if bytes_per_sector == 0 || !bytes_per_sector.is_power_of_two() {
            return Err(NtfsError::InvalidArgument(format!(
                "bytes per sector {bytes_per_sector} is not a power of two"
            )));
        }
        if cluster_size == 0 || !cluster_size.is_power_of_two() {
            return Err(NtfsError::InvalidArgument(format!(
                "cluster size {cluster_size} is not a power of two"
            )));
        }
        if mft_entry_size < 48 || mft_entry_size % bytes_per_sector != 0 {
            return Err(NtfsError::InvalidArgument(format!(
                "MFT entry size {mft_entry_size} is not a multiple of the sector size"
            )));
        }
        Ok(Self {
            bytes_per_sector,
            cluster_size,
            mft_entry_size,
            mft_offset,
            volume_size,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        })
    }

    /// Override the MFT entry cache capacity.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity.max(1);
        self
    }
}

/// Synchronous positioned-read access to the volume's byte source.
///
/// Implementations must be safe to call from multiple threads; reads
/// through one handle are serialized by the implementation.
pub trait VolumeReader: Send + Sync {
    /// Read up to `buf.len()` bytes at `offset`, returning the number of
    /// bytes read. A short count means the source ended.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;
}

/// [`VolumeReader`] over any seekable byte source.
pub struct FileIo<R> {
    inner: Mutex<R>,
}

impl<R: Read + Seek + Send> FileIo<R> {
    pub fn new(source: R) -> Self {
        Self {
            inner: Mutex::new(source),
        }
    }

    /// Consume the adapter, returning the underlying source.
    pub fn into_inner(self) -> R {
        self.inner.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl<R: Read + Seek + Send> VolumeReader for FileIo<R> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut source = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("file I/O lock poisoned"))?;
        source.seek(SeekFrom::Start(offset))?;

        let mut filled = 0;
        while filled < buf.len() {
            match source.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

/// Read exactly `buf.len()` bytes at `offset`, treating a short read as
/// an unexpected end of the source.
pub(crate) fn read_exact_at(io: &dyn VolumeReader, offset: u64, buf: &mut [u8]) -> io::Result<()> {
    let n = io.read_at(offset, buf)?;
    if n < buf.len() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("short read at offset {offset}: {n} of {} bytes", buf.len()),
        ));
    }
    Ok(())
}
