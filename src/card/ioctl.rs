//! The handful of raw ioctls the `drm` crate does not surface: GEM global
//! names and the dumb-buffer mmap offset.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, BorrowedFd};

#[repr(C)]
#[derive(Default)]
pub struct GemClose {
    pub handle: u32,
    pub pad: u32,
}

#[repr(C)]
#[derive(Default)]
pub struct GemFlink {
    pub handle: u32,
    pub name: u32,
}

#[repr(C)]
#[derive(Default)]
pub struct GemOpen {
    pub name: u32,
    pub handle: u32,
    pub size: u64,
}

#[repr(C)]
#[derive(Default)]
pub struct MapDumb {
    pub handle: u32,
    pub pad: u32,
    pub offset: u64,
}

const IOC_WRITE: u64 = 1;
const IOC_READ: u64 = 2;

const fn ioc(dir: u64, nr: u64, size: usize) -> u64 {
    (dir << 30) | ((size as u64) << 16) | ((b'd' as u64) << 8) | nr
}

const fn iow(nr: u64, size: usize) -> u64 {
    ioc(IOC_WRITE, nr, size)
}

const fn iowr(nr: u64, size: usize) -> u64 {
    ioc(IOC_READ | IOC_WRITE, nr, size)
}

pub const GEM_CLOSE: u64 = iow(0x09, mem::size_of::<GemClose>());
pub const GEM_FLINK: u64 = iowr(0x0a, mem::size_of::<GemFlink>());
pub const GEM_OPEN: u64 = iowr(0x0b, mem::size_of::<GemOpen>());
pub const MODE_MAP_DUMB: u64 = iowr(0xb3, mem::size_of::<MapDumb>());

/// Issue an ioctl, restarting when the kernel interrupts it. Same restart
/// policy as libdrm's drmIoctl.
pub fn ioctl<T>(fd: BorrowedFd<'_>, request: u64, arg: &mut T) -> io::Result<()> {
    loop {
        let rc = unsafe { libc::ioctl(fd.as_raw_fd(), request as _, arg as *mut T) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINTR) | Some(libc::EAGAIN) => continue,
            _ => return Err(err),
        }
    }
}
