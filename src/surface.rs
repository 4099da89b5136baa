use std::ptr::NonNull;

use bitflags::bitflags;

use crate::buffer::SurfaceBuffer;
use crate::format::PixelFormat;
use crate::rect::Rect;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct SurfaceFlags: u32 {
        /// Backed by a kernel or driver allocation rather than plain memory.
        const HARDWARE   = 1 << 0;
        /// The screen surface of a bound mode.
        const FULLSCREEN = 1 << 1;
        /// Carries a shared header and may be attached by other processes.
        const SHARED     = 1 << 2;
        /// Attached from another process. Writing is a protocol violation
        /// unless this process is the designated renderer of a shadow
        /// surface; the mapping itself is read-write.
        const FOREIGN    = 1 << 3;
    }
}

/// A pixel surface over a mapped [`SurfaceBuffer`]. The surface owns its
/// buffer, so it can never outlive the allocation behind its pixel pointer.
#[derive(Debug)]
pub struct Surface {
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub format: PixelFormat,
    pub flags: SurfaceFlags,
    pixels: NonNull<u8>,
    pub(crate) buffer: SurfaceBuffer,
}

impl Surface {
    /// Wrap a mapped buffer. `None` when the buffer has no mapping.
    pub(crate) fn new(
        buffer: SurfaceBuffer,
        format: PixelFormat,
        flags: SurfaceFlags,
    ) -> Option<Surface> {
        let pixels = buffer.pixels()?;
        Some(Surface {
            width: buffer.width,
            height: buffer.height,
            pitch: buffer.pitch,
            format,
            flags,
            pixels,
            buffer,
        })
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width as i32, self.height as i32)
    }

    pub fn buffer(&self) -> &SurfaceBuffer {
        &self.buffer
    }

    pub(crate) fn pixels_ptr(&self) -> NonNull<u8> {
        self.pixels
    }

    fn pixel_len(&self) -> usize {
        self.pitch as usize * self.height as usize
    }

    /// The pixel rows, pitch included.
    pub fn bytes(&self) -> &[u8] {
        // the mapping covers offset + pitch * height by construction
        unsafe { std::slice::from_raw_parts(self.pixels.as_ptr(), self.pixel_len()) }
    }

    /// Mutable pixel rows. On a [`SurfaceFlags::FOREIGN`] surface this is
    /// only legitimate for the designated shadow renderer.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.pixels.as_ptr(), self.pixel_len()) }
    }

    pub(crate) fn into_buffer(self) -> SurfaceBuffer {
        self.buffer
    }
}
