//! A named, fixed-size shared region
//!
//! Regions are files under a shared-memory directory (`/dev/shm` by default),
//! which is exactly what POSIX `shm_open` hands out on Linux. Every process
//! that opens the same name sees the same bytes; unlinking removes the name
//! while processes that still hold it open keep reading the (zeroed) pages.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use tracing::{debug, trace, warn};

/// How a region is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Attach to an existing region, creating and initializing it if absent.
    AttachOrCreate,
    /// Attach to an existing region only; a missing region is unavailable.
    AttachOnly,
}

pub struct Region {
    name: &'static str,
    path: PathBuf,
    capacity: usize,
    file: File,
}

impl Region {
    /// Open region `name` under `dir`.
    ///
    /// Returns the region and whether this call created it. A freshly created
    /// region is sized to `capacity` and filled with `initial`.
    pub fn open(
        dir: &Path,
        name: &'static str,
        capacity: usize,
        mode: OpenMode,
        initial: &[u8],
    ) -> Result<(Self, bool)> {
        let path = dir.join(name);

        if mode == OpenMode::AttachOrCreate {
            match OpenOptions::new()
                .read(true)
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(file) => {
                    let region = Self {
                        name,
                        path,
                        capacity,
                        file,
                    };
                    region.file.set_len(capacity as u64)?;
                    region.write(initial)?;
                    debug!("Created shared region {} ({} bytes)", name, capacity);
                    return Ok((region, true));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(map_open_error(name, e)),
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| map_open_error(name, e))?;

        debug!("Attached to shared region {}", name);
        Ok((
            Self {
                name,
                path,
                capacity,
                file,
            },
            false,
        ))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Read the whole region. A region shorter than its capacity (being
    /// truncated or released) reads as zeroes past its end.
    pub fn read(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.capacity];
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read_at(&mut buf[filled..], filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        trace!("Read {} bytes from {}", filled, self.name);
        Ok(buf)
    }

    /// Read only the first byte, the liveness sentinel for set regions.
    pub fn first_byte(&self) -> Result<u8> {
        let mut byte = [0u8; 1];
        match self.file.read_at(&mut byte, 0)? {
            0 => Ok(0),
            _ => Ok(byte[0]),
        }
    }

    /// Overwrite the region from offset 0, zero padding up to capacity.
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.capacity {
            return Err(Error::CapacityOverflow {
                region: self.name.to_string(),
                needed: bytes.len(),
                capacity: self.capacity,
            });
        }

        let mut buf = bytes.to_vec();
        buf.resize(self.capacity, 0);
        self.file.write_all_at(&buf, 0)?;
        Ok(())
    }

    pub fn zero(&self) -> Result<()> {
        self.write(&[])
    }

    /// Remove the region's name. Already-removed regions are not an error.
    pub fn unlink(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Released shared region {}", self.name);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!("Failed to release shared region {}: {}", self.name, e);
                Err(e.into())
            }
        }
    }
}

fn map_open_error(name: &str, e: std::io::Error) -> Error {
    match e.kind() {
        ErrorKind::PermissionDenied => Error::permission_denied(name),
        ErrorKind::NotFound => Error::StoreUnavailable,
        _ => Error::Io(e),
    }
}
