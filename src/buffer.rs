//! Surface buffer allocation: the kernel/driver-level pixel memory behind
//! every [`crate::surface::Surface`].
//!
//! Two operation tables exist, selected once at probe time: the dumb-buffer
//! path everything supports, and the accelerated path delegating to a loaded
//! [`AccelDriver`]. A buffer is either created here (its owner holds destroy
//! rights) or attached from a foreign handle, name or prime descriptor (the
//! attacher may only unmap and close its local handle, never destroy the
//! allocation).

use std::io;
use std::os::fd::{AsFd, OwnedFd};
use std::ptr::NonNull;

use drm::buffer::DrmFourcc;

use crate::accel::{AccelCaps, AccelDriver};
use crate::error::{Error, Result};
use crate::format::PixelFormat;
use crate::kms::KmsOps;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ownership {
    /// This process created the allocation and may destroy it.
    Creator,
    /// The allocation belongs to another process; only detach is allowed.
    Attacher,
}

#[derive(Debug)]
pub(crate) struct Mapping {
    pub ptr: NonNull<u8>,
    pub len: usize,
}

/// A kernel or driver-level pixel allocation.
///
/// `offset` points past the optional header region at the start of the
/// mapping; `handle` is process-local, while `name` and `prime_fd` are the
/// cached cross-process identities once exported.
#[derive(Debug)]
pub struct SurfaceBuffer {
    pub handle: u32,
    /// Cached global name; 0 while unnamed.
    pub name: u32,
    /// Cached prime descriptor, once exported or imported through one.
    pub prime_fd: Option<OwnedFd>,
    pub fourcc: DrmFourcc,
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    /// Total mapping size in bytes, header region included.
    pub size: u64,
    /// Byte offset from the mapping start to the pixel data.
    pub offset: u32,
    pub ownership: Ownership,
    pub(crate) map: Option<Mapping>,
}

impl SurfaceBuffer {
    /// An unmapped buffer description, for [`AccelDriver`] implementations
    /// handing out their own allocations.
    #[allow(clippy::too_many_arguments)]
    pub fn new_unmapped(
        handle: u32,
        fourcc: DrmFourcc,
        width: u32,
        height: u32,
        pitch: u32,
        size: u64,
        offset: u32,
        ownership: Ownership,
    ) -> SurfaceBuffer {
        SurfaceBuffer {
            handle,
            name: 0,
            prime_fd: None,
            fourcc,
            width,
            height,
            pitch,
            size,
            offset,
            ownership,
            map: None,
        }
    }

    pub fn mapped(&self) -> Option<NonNull<u8>> {
        self.map.as_ref().map(|m| m.ptr)
    }

    /// Start of the pixel data of a mapped buffer.
    pub fn pixels(&self) -> Option<NonNull<u8>> {
        let map = self.map.as_ref()?;
        // offset stays within the mapping by construction
        NonNull::new(unsafe { map.ptr.as_ptr().add(self.offset as usize) })
    }

    pub fn is_mapped(&self) -> bool {
        self.map.is_some()
    }
}

impl Drop for SurfaceBuffer {
    fn drop(&mut self) {
        if self.map.is_some() {
            tracing::debug!(
                handle = self.handle,
                "surface buffer dropped while mapped; release it through the device"
            );
        }
    }
}

/// The per-device buffer operation table.
pub(crate) trait BufferOps<K: KmsOps> {
    fn create(
        &mut self,
        kms: &K,
        format: PixelFormat,
        header_size: u32,
        width: u32,
        height: u32,
    ) -> Result<SurfaceBuffer>;

    fn from_handle(&mut self, kms: &K, handle: u32, size: u64) -> Result<SurfaceBuffer>;
    fn from_name(&mut self, kms: &K, name: u32) -> Result<SurfaceBuffer>;
    fn from_prime(&mut self, kms: &K, fd: OwnedFd, size: u64) -> Result<SurfaceBuffer>;

    /// Map the buffer, returning the existing mapping when already mapped.
    fn map(&mut self, kms: &K, buffer: &mut SurfaceBuffer, for_scanout: bool)
        -> Result<NonNull<u8>>;
    fn unmap(&mut self, kms: &K, buffer: &mut SurfaceBuffer);

    /// Unmap and release. Destroys the allocation for the creator; an
    /// attacher only closes its imported handle.
    fn release(&mut self, kms: &K, buffer: SurfaceBuffer);

    /// The accelerated driver, when this table is the accelerated one.
    fn accel(&mut self) -> Option<&mut dyn AccelDriver> {
        None
    }
}

fn alloc_err(err: io::Error) -> Error {
    Error::BufferAllocationFailed(err)
}

/// Dumb-buffer operations; CPU rendering only.
pub(crate) struct DumbOps;

impl DumbOps {
    /// A foreign buffer of which only handle and byte size are known;
    /// geometry is filled in later from the embedded header.
    fn foreign(handle: u32, size: u64) -> SurfaceBuffer {
        SurfaceBuffer {
            handle,
            name: 0,
            prime_fd: None,
            fourcc: DrmFourcc::Xrgb8888,
            width: 0,
            height: 0,
            pitch: 0,
            size,
            offset: 0,
            ownership: Ownership::Attacher,
            map: None,
        }
    }
}

impl<K: KmsOps> BufferOps<K> for DumbOps {
    fn create(
        &mut self,
        kms: &K,
        format: PixelFormat,
        header_size: u32,
        width: u32,
        height: u32,
    ) -> Result<SurfaceBuffer> {
        if width == 0 || height == 0 {
            return Err(alloc_err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "zero-sized buffer",
            )));
        }

        // Scanlines needed to hold the header at the minimum row stride; the
        // device may pad the pitch further, so the real offset is computed
        // from the pitch it reports.
        let min_stride = width * format.bytes_per_pixel();
        let header_lines = if header_size == 0 {
            0
        } else {
            (header_size + min_stride - 1) / min_stride
        };

        let alloc = kms
            .create_dumb(width, height + header_lines, format.fourcc, format.bpp)
            .map_err(alloc_err)?;

        Ok(SurfaceBuffer {
            handle: alloc.handle,
            name: 0,
            prime_fd: None,
            fourcc: format.fourcc,
            width,
            height,
            pitch: alloc.pitch,
            size: alloc.size,
            offset: alloc.pitch * header_lines,
            ownership: Ownership::Creator,
            map: None,
        })
    }

    fn from_handle(&mut self, _kms: &K, handle: u32, size: u64) -> Result<SurfaceBuffer> {
        Ok(Self::foreign(handle, size))
    }

    fn from_name(&mut self, kms: &K, name: u32) -> Result<SurfaceBuffer> {
        let (handle, size) = kms.open_name(name).map_err(alloc_err)?;
        let mut buffer = Self::foreign(handle, size);
        buffer.name = name;
        Ok(buffer)
    }

    fn from_prime(&mut self, kms: &K, fd: OwnedFd, size: u64) -> Result<SurfaceBuffer> {
        let handle = kms.import_prime(fd.as_fd()).map_err(alloc_err)?;
        let mut buffer = Self::foreign(handle, size);
        buffer.prime_fd = Some(fd);
        Ok(buffer)
    }

    fn map(
        &mut self,
        kms: &K,
        buffer: &mut SurfaceBuffer,
        _for_scanout: bool,
    ) -> Result<NonNull<u8>> {
        if let Some(map) = &buffer.map {
            return Ok(map.ptr);
        }
        let len = buffer.size as usize;
        let ptr = kms.map_dumb(buffer.handle, len).map_err(alloc_err)?;
        buffer.map = Some(Mapping { ptr, len });
        Ok(ptr)
    }

    fn unmap(&mut self, kms: &K, buffer: &mut SurfaceBuffer) {
        if let Some(map) = buffer.map.take() {
            kms.unmap(map.ptr, map.len);
        }
    }

    fn release(&mut self, kms: &K, mut buffer: SurfaceBuffer) {
        self.unmap(kms, &mut buffer);
        let result = match buffer.ownership {
            Ownership::Creator => kms.destroy_dumb(buffer.handle),
            Ownership::Attacher => kms.close_handle(buffer.handle),
        };
        if let Err(err) = result {
            tracing::warn!(?err, handle = buffer.handle, "failed to release buffer");
        }
    }
}

/// Operations delegating to the loaded accelerated driver.
pub(crate) struct AccelOps {
    driver: Box<dyn AccelDriver>,
}

impl AccelOps {
    pub fn new(driver: Box<dyn AccelDriver>) -> Self {
        Self { driver }
    }

    fn import_err(err: io::Error) -> Error {
        if err.kind() == io::ErrorKind::Unsupported {
            Error::UnsupportedOperation
        } else {
            Error::BufferAllocationFailed(err)
        }
    }
}

impl<K: KmsOps> BufferOps<K> for AccelOps {
    fn create(
        &mut self,
        _kms: &K,
        format: PixelFormat,
        header_size: u32,
        width: u32,
        height: u32,
    ) -> Result<SurfaceBuffer> {
        self.driver
            .create_buffer(format.fourcc, header_size, width, height)
            .map_err(alloc_err)
    }

    fn from_handle(&mut self, _kms: &K, handle: u32, size: u64) -> Result<SurfaceBuffer> {
        if !self.driver.caps().contains(AccelCaps::IMPORT_HANDLE) {
            return Err(Error::UnsupportedOperation);
        }
        self.driver
            .buffer_from_handle(handle, size)
            .map_err(Self::import_err)
    }

    fn from_name(&mut self, _kms: &K, name: u32) -> Result<SurfaceBuffer> {
        if !self.driver.caps().contains(AccelCaps::IMPORT_NAME) {
            return Err(Error::UnsupportedOperation);
        }
        self.driver.buffer_from_name(name).map_err(Self::import_err)
    }

    fn from_prime(&mut self, _kms: &K, fd: OwnedFd, size: u64) -> Result<SurfaceBuffer> {
        if !self.driver.caps().contains(AccelCaps::IMPORT_PRIME) {
            return Err(Error::UnsupportedOperation);
        }
        self.driver
            .buffer_from_prime(fd, size)
            .map_err(Self::import_err)
    }

    fn map(
        &mut self,
        _kms: &K,
        buffer: &mut SurfaceBuffer,
        for_scanout: bool,
    ) -> Result<NonNull<u8>> {
        if let Some(map) = &buffer.map {
            return Ok(map.ptr);
        }
        let ptr = self
            .driver
            .map_buffer(buffer, for_scanout)
            .map_err(alloc_err)?;
        buffer.map = Some(Mapping {
            ptr,
            len: buffer.size as usize,
        });
        Ok(ptr)
    }

    fn unmap(&mut self, _kms: &K, buffer: &mut SurfaceBuffer) {
        if buffer.map.take().is_some() {
            self.driver.unmap_buffer(buffer);
        }
    }

    fn release(&mut self, kms: &K, mut buffer: SurfaceBuffer) {
        BufferOps::<K>::unmap(self, kms, &mut buffer);
        match buffer.ownership {
            Ownership::Creator => self.driver.destroy_buffer(buffer),
            Ownership::Attacher => {
                if let Err(err) = kms.close_handle(buffer.handle) {
                    tracing::warn!(?err, handle = buffer.handle, "failed to detach buffer");
                }
            }
        }
    }

    fn accel(&mut self) -> Option<&mut dyn AccelDriver> {
        Some(self.driver.as_mut())
    }
}
