//! Accelerated driver ABI.
//!
//! Vendor 2D engines plug in behind [`AccelDriver`]; the table is versioned
//! and a driver built against an older revision is rejected at probe time.
//! Optional entries keep their defaults and report
//! [`io::ErrorKind::Unsupported`], which the device maps to a capability
//! being unavailable and falls back to the unaccelerated path.

use std::io;
use std::os::fd::{BorrowedFd, OwnedFd};
use std::ptr::NonNull;

use bitflags::bitflags;
use drm::buffer::DrmFourcc;

use crate::buffer::SurfaceBuffer;
use crate::rect::Rect;

/// Revision of the [`AccelDriver`] table this crate was built against.
pub const ACCEL_ABI_VERSION: u32 = 1;

bitflags! {
    /// Optional operations an accelerated driver actually implements.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct AccelCaps: u32 {
        const IMPORT_HANDLE    = 1 << 0;
        const IMPORT_NAME      = 1 << 1;
        const IMPORT_PRIME     = 1 << 2;
        const CLEAR            = 1 << 3;
        const COPY_BLIT        = 1 << 4;
        const ALPHA_BLIT       = 1 << 5;
        const KEY_BLIT         = 1 << 6;
        const ALPHA_KEY_BLIT   = 1 << 7;
        const ALPHA_PIXEL_BLIT = 1 << 8;
        const FLUSH            = 1 << 9;
    }
}

/// Driver factory. Receives the kernel driver name, the device descriptor
/// and the ABI revision the caller was built against; the factory overwrites
/// `version` with the revision the driver implements.
pub type AccelFactory = fn(
    driver_name: &str,
    device_fd: Option<BorrowedFd<'_>>,
    version: &mut u32,
) -> Option<Box<dyn AccelDriver>>;

pub trait AccelDriver {
    fn caps(&self) -> AccelCaps;

    fn create_buffer(
        &mut self,
        fourcc: DrmFourcc,
        header_size: u32,
        width: u32,
        height: u32,
    ) -> io::Result<SurfaceBuffer>;

    fn buffer_from_handle(&mut self, handle: u32, size: u64) -> io::Result<SurfaceBuffer> {
        let _ = (handle, size);
        Err(unsupported())
    }

    fn buffer_from_name(&mut self, name: u32) -> io::Result<SurfaceBuffer> {
        let _ = name;
        Err(unsupported())
    }

    fn buffer_from_prime(&mut self, fd: OwnedFd, size: u64) -> io::Result<SurfaceBuffer> {
        let _ = (fd, size);
        Err(unsupported())
    }

    fn map_buffer(
        &mut self,
        buffer: &mut SurfaceBuffer,
        for_scanout: bool,
    ) -> io::Result<NonNull<u8>>;

    fn unmap_buffer(&mut self, buffer: &mut SurfaceBuffer);

    fn destroy_buffer(&mut self, buffer: SurfaceBuffer);

    /// Drain the engine's command queue.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn clear_buffer(
        &mut self,
        buffer: &mut SurfaceBuffer,
        rect: Rect,
        pixel: u32,
    ) -> io::Result<()> {
        let _ = (buffer, rect, pixel);
        Err(unsupported())
    }

    /// Whether the engine can blit between these two buffers at all.
    fn check_blit(&mut self, src: &SurfaceBuffer, dst: &SurfaceBuffer) -> bool {
        let _ = (src, dst);
        false
    }

    fn copy_blit(
        &mut self,
        src: &SurfaceBuffer,
        src_rc: Rect,
        dst: &mut SurfaceBuffer,
        dst_rc: Rect,
    ) -> io::Result<()> {
        let _ = (src, src_rc, dst, dst_rc);
        Err(unsupported())
    }

    fn alpha_blit(
        &mut self,
        src: &SurfaceBuffer,
        src_rc: Rect,
        dst: &mut SurfaceBuffer,
        dst_rc: Rect,
        alpha: u8,
    ) -> io::Result<()> {
        let _ = (src, src_rc, dst, dst_rc, alpha);
        Err(unsupported())
    }

    fn key_blit(
        &mut self,
        src: &SurfaceBuffer,
        src_rc: Rect,
        dst: &mut SurfaceBuffer,
        dst_rc: Rect,
        key: u32,
    ) -> io::Result<()> {
        let _ = (src, src_rc, dst, dst_rc, key);
        Err(unsupported())
    }

    fn alpha_key_blit(
        &mut self,
        src: &SurfaceBuffer,
        src_rc: Rect,
        dst: &mut SurfaceBuffer,
        dst_rc: Rect,
        alpha: u8,
        key: u32,
    ) -> io::Result<()> {
        let _ = (src, src_rc, dst, dst_rc, alpha, key);
        Err(unsupported())
    }

    /// Blit honouring the per-pixel alpha channel of the source.
    fn alpha_pixel_blit(
        &mut self,
        src: &SurfaceBuffer,
        src_rc: Rect,
        dst: &mut SurfaceBuffer,
        dst_rc: Rect,
    ) -> io::Result<()> {
        let _ = (src, src_rc, dst, dst_rc);
        Err(unsupported())
    }
}

pub(crate) fn unsupported() -> io::Error {
    io::Error::from(io::ErrorKind::Unsupported)
}

/// Run the factory with the version gate applied.
pub(crate) fn load_driver(
    factory: AccelFactory,
    driver_name: &str,
    device_fd: Option<BorrowedFd<'_>>,
) -> Option<Box<dyn AccelDriver>> {
    let mut version = ACCEL_ABI_VERSION;
    match factory(driver_name, device_fd, &mut version) {
        Some(driver) if version >= ACCEL_ABI_VERSION => {
            tracing::info!("using accelerated driver for {driver_name} (ABI {version})");
            Some(driver)
        }
        Some(_) => {
            tracing::warn!(
                "accelerated driver for {driver_name} implements ABI {version}, \
                 need at least {ACCEL_ABI_VERSION}; falling back to dumb buffers"
            );
            None
        }
        None => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct NullDriver;

    impl AccelDriver for NullDriver {
        fn caps(&self) -> AccelCaps {
            AccelCaps::empty()
        }

        fn create_buffer(
            &mut self,
            _fourcc: DrmFourcc,
            _header_size: u32,
            _width: u32,
            _height: u32,
        ) -> io::Result<SurfaceBuffer> {
            Err(unsupported())
        }

        fn map_buffer(
            &mut self,
            _buffer: &mut SurfaceBuffer,
            _for_scanout: bool,
        ) -> io::Result<NonNull<u8>> {
            Err(unsupported())
        }

        fn unmap_buffer(&mut self, _buffer: &mut SurfaceBuffer) {}

        fn destroy_buffer(&mut self, _buffer: SurfaceBuffer) {}
    }

    fn current(_: &str, _: Option<BorrowedFd<'_>>, _: &mut u32) -> Option<Box<dyn AccelDriver>> {
        Some(Box::new(NullDriver))
    }

    fn newer(_: &str, _: Option<BorrowedFd<'_>>, version: &mut u32) -> Option<Box<dyn AccelDriver>> {
        *version = ACCEL_ABI_VERSION + 1;
        Some(Box::new(NullDriver))
    }

    fn outdated(
        _: &str,
        _: Option<BorrowedFd<'_>>,
        version: &mut u32,
    ) -> Option<Box<dyn AccelDriver>> {
        *version = ACCEL_ABI_VERSION - 1;
        Some(Box::new(NullDriver))
    }

    fn absent(_: &str, _: Option<BorrowedFd<'_>>, _: &mut u32) -> Option<Box<dyn AccelDriver>> {
        None
    }

    #[test]
    fn version_gate() {
        assert!(load_driver(current, "test", None).is_some());
        assert!(load_driver(newer, "test", None).is_some());
        assert!(load_driver(outdated, "test", None).is_none());
        assert!(load_driver(absent, "test", None).is_none());
    }

    #[test]
    fn optional_entries_default_to_unsupported() {
        use crate::buffer::Ownership;

        let mut driver = NullDriver;
        let a = SurfaceBuffer::new_unmapped(1, DrmFourcc::Xrgb8888, 1, 1, 4, 4, 0, Ownership::Creator);
        let b = SurfaceBuffer::new_unmapped(2, DrmFourcc::Xrgb8888, 1, 1, 4, 4, 0, Ownership::Creator);
        assert!(!driver.check_blit(&a, &b));
        assert!(driver.flush().is_ok());

        let err = driver.buffer_from_name(7).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }
}
