//! File-system facade.
//!
//! One [`FileSystem`] owns a session: the bootstrapped MFT, the optional
//! `$Secure` index, and a read/write lock over both. Callers supply the
//! volume geometry and the byte source per call; many threads may query
//! one facade concurrently. Entry parsing and block I/O happen outside
//! the facade lock — the MFT serializes its own cache internally.

use std::sync::{Arc, RwLock};

use log::debug;

use crate::bitmap::{self, ClusterRange};
use crate::error::{NtfsError, Result};
use crate::mft::entry::MftEntry;
use crate::mft::Mft;
use crate::secure::{SecurityDescriptor, SecurityDescriptorIndex};
use crate::volume::{VolumeParams, VolumeReader};
use crate::CancelToken;

#[derive(Default)]
struct State {
    mft: Option<Arc<Mft>>,
    security: Option<Arc<SecurityDescriptorIndex>>,
}

/// A read-only NTFS session.
pub struct FileSystem {
    state: RwLock<State>,
    cancel: CancelToken,
}

impl Default for FileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem {
    /// An empty session: no MFT, no security index.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            cancel: CancelToken::new(),
        }
    }

    /// Token observed by long scans; cancelling it makes them return
    /// [`NtfsError::Cancelled`].
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Bootstrap the MFT from the volume (spec'd by `params`), reading
    /// `mft_size` bytes at `mft_offset`.
    ///
    /// With the [`crate::mft::MFT_ONLY`] flag the range is treated as a
    /// bare `$MFT` dump: entry 0's run list is never resolved and reads
    /// are confined to the supplied bytes.
    pub fn read_mft(
        &self,
        params: &VolumeParams,
        io: &dyn VolumeReader,
        mft_offset: u64,
        mft_size: u64,
        flags: u8,
    ) -> Result<()> {
        if self.read_state()?.mft.is_some() {
            return Err(NtfsError::AlreadyInitialized("MFT"));
        }
        if mft_size == 0 {
            return Err(NtfsError::OutOfBounds("MFT size is zero".into()));
        }
        if mft_size > i64::MAX as u64 {
            return Err(NtfsError::OutOfBounds(format!(
                "MFT size {mft_size} exceeds the supported maximum"
            )));
        }
        if params.volume_size > 0 && mft_offset >= params.volume_size {
            return Err(NtfsError::OutOfBounds(format!(
                "MFT offset {mft_offset} is past the volume end {}",
                params.volume_size
            )));
        }

        // Bootstrap before taking the write lease so a failure commits
        // nothing.
        let mut mft = Mft::bootstrap(*params, io, mft_offset, mft_size, flags)?;
        mft.set_cancel_token(self.cancel.clone());

        let mut state = self.write_state()?;
        if state.mft.is_some() {
            return Err(NtfsError::AlreadyInitialized("MFT"));
        }
        debug!(
            "session MFT ready: {} entries at offset {mft_offset}",
            mft.number_of_entries()
        );
        state.mft = Some(Arc::new(mft));
        Ok(())
    }

    /// Scan the `$Bitmap` allocation map into coalesced cluster ranges.
    pub fn read_bitmap(&self, io: &dyn VolumeReader) -> Result<Vec<ClusterRange>> {
        let mft = self.mft()?;
        bitmap::read_bitmap(&mft, io, &self.cancel)
    }

    /// Load the `$Secure` descriptor index. On volumes without `$Secure`
    /// this succeeds and leaves the index absent.
    pub fn read_security_descriptors(&self, io: &dyn VolumeReader) -> Result<()> {
        if self.read_state()?.security.is_some() {
            return Err(NtfsError::AlreadyInitialized("security descriptor index"));
        }
        let mft = self.mft()?;
        let index = SecurityDescriptorIndex::build(&mft, io)?;

        let mut state = self.write_state()?;
        if state.security.is_some() {
            return Err(NtfsError::AlreadyInitialized("security descriptor index"));
        }
        state.security = index.map(Arc::new);
        Ok(())
    }

    /// Number of MFT entries; 0 before `read_mft` succeeds.
    pub fn number_of_mft_entries(&self) -> u64 {
        self.read_state()
            .ok()
            .and_then(|state| state.mft.as_ref().map(|mft| mft.number_of_entries()))
            .unwrap_or(0)
    }

    /// Shared handle to a cached MFT entry.
    pub fn mft_entry_by_index(&self, io: &dyn VolumeReader, index: u64) -> Result<Arc<MftEntry>> {
        self.mft()?.entry(io, index)
    }

    /// Freshly parsed, caller-owned copy of an MFT entry.
    pub fn mft_entry_by_index_uncached(
        &self,
        io: &dyn VolumeReader,
        index: u64,
    ) -> Result<MftEntry> {
        self.mft()?.entry_uncached(io, index)
    }

    /// Resolve a security descriptor identifier.
    ///
    /// `Ok(None)` when the index is absent (legacy volume or
    /// `read_security_descriptors` not called), the id is unknown, or the
    /// id is 0; `Err` only on corruption.
    pub fn security_descriptor_by_id(
        &self,
        io: &dyn VolumeReader,
        id: u32,
    ) -> Result<Option<SecurityDescriptor>> {
        let index = match self.read_state()?.security.clone() {
            Some(index) => index,
            None => return Ok(None),
        };
        index.lookup(io, id)
    }

    /// End the session, releasing the MFT cache and the security index.
    ///
    /// Fails with [`NtfsError::BusyOnRelease`] while callers still hold
    /// shared entry handles.
    pub fn close(&self) -> Result<()> {
        let mut state = self.write_state()?;
        if let Some(mft) = &state.mft {
            if mft.has_pinned_entries() {
                return Err(NtfsError::BusyOnRelease);
            }
        }
        *state = State::default();
        Ok(())
    }

    fn mft(&self) -> Result<Arc<Mft>> {
        self.read_state()?
            .mft
            .clone()
            .ok_or_else(|| NtfsError::MissingValue("MFT has not been read".into()))
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| NtfsError::Io(std::io::Error::other("file system lock poisoned")))
    }

    fn write_state(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| NtfsError::Io(std::io::Error::other("file system lock poisoned")))
    }
}
