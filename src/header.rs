//! The header region embedded at the start of shareable buffers.
//!
//! The creator writes a [`SharedSurfaceHeader`] right after mapping; any
//! process attaching the buffer later derives geometry from it. The shadow
//! buffer's dirty-rectangle state lives in the embedded [`ShadowHeader`],
//! guarded by a process-shared semaphore when the buffer is exported and by
//! plain `&mut` exclusivity otherwise.
//!
//! All access goes through raw pointers into the mapping; the lock is held
//! for rectangle bookkeeping only, never across a pixel copy, so the hold
//! time does not depend on the dirty-region size.

use std::io;
use std::mem;
use std::ptr::NonNull;

use crate::buffer::SurfaceBuffer;
use crate::rect::Rect;

pub const HEADER_MAGIC: u32 = u32::from_le_bytes(*b"GALH");
pub const HEADER_VERSION: u32 = 1;

pub const LOCK_NONE: u32 = 0;
pub const LOCK_SEMAPHORE: u32 = 1;

/// Dirty-rectangle state of a shadow buffer. The rectangle only grows
/// (bounding union) between two drains, and a drain resets it atomically
/// under the lock.
#[repr(C)]
pub struct ShadowHeader {
    pub dirty_left: i32,
    pub dirty_top: i32,
    pub dirty_right: i32,
    pub dirty_bottom: i32,
    pub lock_kind: u32,
    pad: u32,
    sem: libc::sem_t,
}

/// Prelude of every shareable buffer. Read-only for any process other than
/// the creator.
#[repr(C)]
pub struct SharedSurfaceHeader {
    pub magic: u32,
    pub version: u32,
    pub creator_pid: i32,
    pub flags: u32,
    pub map_size: u64,
    pub pixel_offset: u32,
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub fourcc: u32,
    /// Cached global name, mirrored here on export; 0 while unnamed.
    pub name: u32,
    pub shadow: ShadowHeader,
}

/// Bytes to reserve in front of the pixel data for the header.
pub const fn region_size() -> u32 {
    mem::size_of::<SharedSurfaceHeader>() as u32
}

/// Copy of the immutable header fields, taken when attaching.
#[derive(Clone, Copy, Debug)]
pub struct HeaderInfo {
    pub creator_pid: i32,
    pub map_size: u64,
    pub pixel_offset: u32,
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub fourcc: u32,
    pub name: u32,
}

pub(crate) fn header_ptr(buffer: &SurfaceBuffer) -> Option<NonNull<SharedSurfaceHeader>> {
    if (buffer.offset as usize) < mem::size_of::<SharedSurfaceHeader>() {
        return None;
    }
    Some(buffer.mapped()?.cast())
}

/// Write the header into a freshly mapped creator buffer.
///
/// # Safety
/// `hdr` must point into a live mapping with at least
/// [`region_size`] bytes, exclusively held by the caller.
pub(crate) unsafe fn init(
    hdr: NonNull<SharedSurfaceHeader>,
    buffer: &SurfaceBuffer,
    shared_lock: bool,
) -> io::Result<()> {
    let hdr = hdr.as_ptr();
    (*hdr).magic = HEADER_MAGIC;
    (*hdr).version = HEADER_VERSION;
    (*hdr).creator_pid = std::process::id() as i32;
    (*hdr).flags = 0;
    (*hdr).map_size = buffer.size;
    (*hdr).pixel_offset = buffer.offset;
    (*hdr).width = buffer.width;
    (*hdr).height = buffer.height;
    (*hdr).pitch = buffer.pitch;
    (*hdr).fourcc = buffer.fourcc as u32;
    (*hdr).name = buffer.name;

    let shadow = &mut (*hdr).shadow;
    shadow.dirty_left = 0;
    shadow.dirty_top = 0;
    shadow.dirty_right = 0;
    shadow.dirty_bottom = 0;
    shadow.lock_kind = LOCK_NONE;

    if shared_lock {
        // unnamed POSIX semaphore shared between processes
        if libc::sem_init(&mut shadow.sem, 1, 1) < 0 {
            let err = io::Error::last_os_error();
            tracing::error!(?err, "the system does not support process-shared semaphores");
            return Err(err);
        }
        shadow.lock_kind = LOCK_SEMAPHORE;
    }

    Ok(())
}

/// # Safety
/// `hdr` must point into a live mapping of at least [`region_size`] bytes.
pub(crate) unsafe fn read(hdr: NonNull<SharedSurfaceHeader>) -> Option<HeaderInfo> {
    let hdr = hdr.as_ptr();
    if (*hdr).magic != HEADER_MAGIC || (*hdr).version != HEADER_VERSION {
        return None;
    }
    Some(HeaderInfo {
        creator_pid: (*hdr).creator_pid,
        map_size: (*hdr).map_size,
        pixel_offset: (*hdr).pixel_offset,
        width: (*hdr).width,
        height: (*hdr).height,
        pitch: (*hdr).pitch,
        fourcc: (*hdr).fourcc,
        name: (*hdr).name,
    })
}

/// Mirror a freshly assigned global name for attachers.
pub(crate) unsafe fn set_name(hdr: NonNull<SharedSurfaceHeader>, name: u32) {
    (*hdr.as_ptr()).name = name;
}

/// Tear the lock down before the creator unmaps.
pub(crate) unsafe fn destroy(hdr: NonNull<SharedSurfaceHeader>) {
    let shadow = &mut (*hdr.as_ptr()).shadow;
    if shadow.lock_kind == LOCK_SEMAPHORE {
        libc::sem_destroy(&mut shadow.sem);
        shadow.lock_kind = LOCK_NONE;
    }
}

/// Holds the header lock for rectangle bookkeeping.
pub(crate) struct HeaderLock {
    sem: Option<*mut libc::sem_t>,
}

impl HeaderLock {
    /// # Safety
    /// `hdr` must point at an initialized header in a live mapping.
    pub(crate) unsafe fn acquire(hdr: NonNull<SharedSurfaceHeader>) -> HeaderLock {
        let shadow = &mut (*hdr.as_ptr()).shadow;
        if shadow.lock_kind != LOCK_SEMAPHORE {
            return HeaderLock { sem: None };
        }
        let sem: *mut libc::sem_t = &mut shadow.sem;
        loop {
            if libc::sem_wait(sem) == 0 {
                return HeaderLock { sem: Some(sem) };
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            tracing::warn!(?err, "sem_wait failed; continuing without the shared lock");
            return HeaderLock { sem: None };
        }
    }
}

impl Drop for HeaderLock {
    fn drop(&mut self) {
        if let Some(sem) = self.sem {
            if unsafe { libc::sem_post(sem) } < 0 {
                tracing::warn!("sem_post failed");
            }
        }
    }
}

/// Union `rect` into the dirty state. Call with the lock held.
///
/// # Safety
/// `hdr` must point at an initialized header in a live mapping.
pub(crate) unsafe fn merge_dirty(hdr: NonNull<SharedSurfaceHeader>, rect: Rect) {
    let shadow = &mut (*hdr.as_ptr()).shadow;
    let current = Rect::new(
        shadow.dirty_left,
        shadow.dirty_top,
        shadow.dirty_right,
        shadow.dirty_bottom,
    );
    let merged = current.union(&rect);
    shadow.dirty_left = merged.left;
    shadow.dirty_top = merged.top;
    shadow.dirty_right = merged.right;
    shadow.dirty_bottom = merged.bottom;
}

/// Snapshot the dirty rectangle and reset it to empty. Call with the lock
/// held.
///
/// # Safety
/// `hdr` must point at an initialized header in a live mapping.
pub(crate) unsafe fn take_dirty(hdr: NonNull<SharedSurfaceHeader>) -> Rect {
    let shadow = &mut (*hdr.as_ptr()).shadow;
    let taken = Rect::new(
        shadow.dirty_left,
        shadow.dirty_top,
        shadow.dirty_right,
        shadow.dirty_bottom,
    );
    shadow.dirty_left = 0;
    shadow.dirty_top = 0;
    shadow.dirty_right = 0;
    shadow.dirty_bottom = 0;
    taken
}
