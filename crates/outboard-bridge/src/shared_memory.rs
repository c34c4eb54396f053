//! Shared memory block for one audio handshake.
//!
//! Layout (packed, native endian):
//!
//! ```text
//! [sample rate f64][sample count i32][channel count i32]
//! [input L  f32 × max_block_len]
//! [input R  f32 × max_block_len]
//! [output L f32 × max_block_len]
//! [output R f32 × max_block_len]
//! ```
//!
//! Only the header's sample count says how many leading samples of each plane are valid.

use crate::error::{BridgeError, Result};
use memmap2::MmapMut;
use std::cell::UnsafeCell;
use std::fs::OpenOptions;
use std::path::PathBuf;

pub const HEADER_LEN: usize = 16;
pub const PLANE_COUNT: usize = 4;

const SAMPLE_SIZE: usize = std::mem::size_of::<f32>();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plane {
    InputLeft = 0,
    InputRight = 1,
    OutputLeft = 2,
    OutputRight = 3,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockHeader {
    pub sample_rate: f64,
    pub num_samples: i32,
    pub num_channels: i32,
}

/// Total mapping size for a block holding `max_block_len` samples per plane.
pub fn block_size(max_block_len: usize) -> usize {
    HEADER_LEN + PLANE_COUNT * max_block_len * SAMPLE_SIZE
}

/// Uses `UnsafeCell` because the mapping is written through `&self` from both processes.
/// The handshake events serialize access: the host touches the block only between
/// "done" and the next "ready", the helper only between "ready" and "done".
pub struct SharedBlock {
    mmap: UnsafeCell<MmapMut>,
    name: String,
    max_block_len: usize,
    /// Creator owns the backing file and removes it on drop.
    owns_memory: bool,
}

impl SharedBlock {
    pub fn create(name: &str, max_block_len: usize) -> Result<Self> {
        let size = block_size(max_block_len);
        let path = shm_path(name);

        let file = create_options()
            .open(&path)
            .map_err(|e| {
                BridgeError::SharedMemoryError(format!(
                    "Failed to create shared block {}: {}",
                    path.display(),
                    e
                ))
            })?;

        file.set_len(size as u64).map_err(|e| {
            BridgeError::SharedMemoryError(format!("Failed to set block size: {}", e))
        })?;

        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| {
            BridgeError::SharedMemoryError(format!("Failed to map shared block: {}", e))
        })?;

        Ok(Self {
            mmap: UnsafeCell::new(mmap),
            name: name.to_string(),
            max_block_len,
            owns_memory: true,
        })
    }

    pub fn open(name: &str, max_block_len: usize) -> Result<Self> {
        let path = shm_path(name);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                BridgeError::SharedMemoryError(format!(
                    "Failed to open shared block {}: {}",
                    path.display(),
                    e
                ))
            })?;

        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| {
            BridgeError::SharedMemoryError(format!("Failed to map shared block: {}", e))
        })?;

        let expected = block_size(max_block_len);
        if mmap.len() < expected {
            return Err(BridgeError::SharedMemoryError(format!(
                "Shared block {} is {} bytes, expected {}",
                name,
                mmap.len(),
                expected
            )));
        }

        Ok(Self {
            mmap: UnsafeCell::new(mmap),
            name: name.to_string(),
            max_block_len,
            owns_memory: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_block_len(&self) -> usize {
        self.max_block_len
    }

    pub fn header(&self) -> BlockHeader {
        // SAFETY: see the type-level comment; reads happen on the side that holds the turn
        let mmap = unsafe { &*self.mmap.get() };
        let mut rate = [0u8; 8];
        let mut samples = [0u8; 4];
        let mut channels = [0u8; 4];
        rate.copy_from_slice(&mmap[0..8]);
        samples.copy_from_slice(&mmap[8..12]);
        channels.copy_from_slice(&mmap[12..16]);

        BlockHeader {
            sample_rate: f64::from_ne_bytes(rate),
            num_samples: i32::from_ne_bytes(samples),
            num_channels: i32::from_ne_bytes(channels),
        }
    }

    pub fn write_header(&self, header: &BlockHeader) {
        // SAFETY: single writer per handshake turn
        let mmap = unsafe { &mut *self.mmap.get() };
        mmap[0..8].copy_from_slice(&header.sample_rate.to_ne_bytes());
        mmap[8..12].copy_from_slice(&header.num_samples.to_ne_bytes());
        mmap[12..16].copy_from_slice(&header.num_channels.to_ne_bytes());
    }

    /// Header sample count clamped to what a plane can hold. Negative counts read as zero.
    pub fn valid_samples(&self) -> usize {
        let n = self.header().num_samples;
        if n <= 0 {
            0
        } else {
            (n as usize).min(self.max_block_len)
        }
    }

    fn plane_offset(&self, plane: Plane) -> usize {
        HEADER_LEN + plane as usize * self.max_block_len * SAMPLE_SIZE
    }

    /// Caller must hold the handshake turn.
    pub fn write_plane(&self, plane: Plane, data: &[f32]) -> Result<()> {
        if data.len() > self.max_block_len {
            return Err(BridgeError::SharedMemoryError(format!(
                "Data length {} exceeds block capacity {}",
                data.len(),
                self.max_block_len
            )));
        }

        let offset = self.plane_offset(plane);

        // SAFETY: single writer per handshake turn
        let mmap = unsafe { &mut *self.mmap.get() };
        let slice = &mut mmap[offset..offset + std::mem::size_of_val(data)];

        let bytes = unsafe {
            std::slice::from_raw_parts(data.as_ptr() as *const u8, std::mem::size_of_val(data))
        };

        slice.copy_from_slice(bytes);

        Ok(())
    }

    /// Copies the leading `output.len()` samples of a plane (capped at the block length).
    pub fn read_plane_into(&self, plane: Plane, output: &mut [f32]) -> usize {
        let offset = self.plane_offset(plane);
        let copy_samples = self.max_block_len.min(output.len());
        let copy_bytes = copy_samples * SAMPLE_SIZE;

        // SAFETY: reads happen on the side that holds the turn
        let mmap = unsafe { &*self.mmap.get() };
        let slice = &mmap[offset..offset + copy_bytes];

        let bytes =
            unsafe { std::slice::from_raw_parts_mut(output.as_mut_ptr() as *mut u8, copy_bytes) };

        bytes.copy_from_slice(slice);

        copy_samples
    }
}

// SAFETY: access is serialized by the ready/done handshake, one side per turn.
unsafe impl Send for SharedBlock {}
unsafe impl Sync for SharedBlock {}

impl Drop for SharedBlock {
    fn drop(&mut self) {
        if self.owns_memory {
            let _ = std::fs::remove_file(shm_path(&self.name));
        }
    }
}

pub(crate) fn create_options() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    options
}

/// Backing file for a named shared object.
pub fn shm_path(name: &str) -> PathBuf {
    #[cfg(target_os = "linux")]
    let base = PathBuf::from("/dev/shm");

    #[cfg(not(target_os = "linux"))]
    let base = std::env::temp_dir();

    base.join(name)
}

/// Removes a shared object left behind by a helper that died before cleaning up.
pub fn remove_stale(name: &str) {
    let path = shm_path(name);
    if path.exists() {
        tracing::debug!(path = %path.display(), "removing stale shared object");
        let _ = std::fs::remove_file(path);
    }
}
