//! Read-only NTFS parsing for disk and partition images.
//!
//! Given a seekable byte source and the volume geometry (from the boot
//! sector, parsed elsewhere), this crate bootstraps the Master File
//! Table, serves parsed MFT entries through a bounded shared cache,
//! scans the `$Bitmap` cluster allocation map, and resolves `$Secure`
//! security descriptors by identifier. Everything is read-only; the
//! backing image is treated as immutable for the life of a session.
//!
//! ```no_run
//! use std::fs::File;
//! use ntfsview::{FileIo, FileSystem, VolumeParams};
//!
//! # fn main() -> ntfsview::Result<()> {
//! let image = File::open("volume.img")?;
//! let io = FileIo::new(image);
//! let params = VolumeParams::new(512, 4096, 1024, 4 * 1024 * 1024, 16 * 1024 * 1024)?;
//!
//! let fs = FileSystem::new();
//! fs.read_mft(&params, &io, params.mft_offset, 32 * 1024, 0)?;
//! for index in 0..fs.number_of_mft_entries() {
//!     let entry = fs.mft_entry_by_index(&io, index)?;
//!     if let Some(name) = entry.file_name() {
//!         println!("{index}: {}", name.name);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod bitmap;
pub mod error;
pub mod file_system;
pub mod mft;
pub mod secure;
pub mod stream;
pub mod volume;

pub(crate) mod util;

#[cfg(test)]
pub(crate) mod testimg;

pub use bitmap::ClusterRange;
pub use error::{NtfsError, Result};
pub use file_system::FileSystem;
pub use mft::attr::{Attribute, AttributeBody, FileName};
pub use mft::entry::MftEntry;
pub use mft::runs::DataRun;
pub use mft::MFT_ONLY;
pub use secure::{Acl, SecurityDescriptor, Sid};
pub use stream::ClusterStream;
pub use volume::{FileIo, VolumeParams, VolumeReader};

/// Cooperative cancellation for long scans.
///
/// Clones observe the same flag; once cancelled, operations that check
/// the token abandon their work and return [`NtfsError::Cancelled`].
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
