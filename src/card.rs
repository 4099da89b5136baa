//! The real DRM card: a primary node plus the ioctl plumbing behind
//! [`KmsOps`]. Everything the `drm` crate wraps goes through it; global
//! names and the dumb mmap offset go through [`ioctl`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::num::NonZeroU32;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use drm::buffer::{Buffer as _, DrmFourcc};
use drm::control::dumbbuffer::DumbBuffer;
use drm::control::{connector, crtc, encoder, framebuffer, Device as ControlDevice};
use drm::Device;
use rustix::fs::{fstat, major, minor, open, FileType, Mode, OFlags};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};

use crate::error::{Error, Result};
use crate::kms::{
    Capability, ConnectorDesc, CrtcState, DumbAlloc, EncoderDesc, KmsOps, ModeDesc,
};

pub mod ioctl;

const DRM_MAJOR: u32 = 226;
/// Minors 0..64 are primary nodes; render nodes start at 128.
const PRIMARY_MINORS: u32 = 64;

pub struct DrmCard {
    fd: OwnedFd,
    path: PathBuf,
    // Dumb buffers created through the drm crate, kept for destruction.
    dumb: RefCell<HashMap<u32, DumbBuffer>>,
}

impl AsFd for DrmCard {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl Device for DrmCard {}
impl ControlDevice for DrmCard {}

impl DrmCard {
    pub fn open(path: &Path) -> Result<Self> {
        let flags = OFlags::RDWR | OFlags::CLOEXEC | OFlags::NOCTTY | OFlags::NONBLOCK;
        let fd = open(path, flags, Mode::empty()).map_err(|err| Error::DeviceOpenFailed {
            path: path.to_path_buf(),
            source: err.into(),
        })?;

        let st = fstat(&fd).map_err(|err| Error::DeviceOpenFailed {
            path: path.to_path_buf(),
            source: err.into(),
        })?;
        let is_primary = FileType::from_raw_mode(st.st_mode) == FileType::CharacterDevice
            && major(st.st_rdev) == DRM_MAJOR
            && minor(st.st_rdev) < PRIMARY_MINORS;
        if !is_primary {
            return Err(Error::NotPrimaryNode(path.to_path_buf()));
        }

        Ok(Self {
            fd,
            path: path.to_path_buf(),
            dumb: RefCell::new(HashMap::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn nz(id: u32) -> io::Result<NonZeroU32> {
    NonZeroU32::new(id)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "zero kernel resource id"))
}

/// Adapter handing our raw allocation data to the framebuffer ioctl.
struct FbSource {
    handle: drm::buffer::Handle,
    size: (u32, u32),
    pitch: u32,
    fourcc: DrmFourcc,
}

impl drm::buffer::Buffer for FbSource {
    fn size(&self) -> (u32, u32) {
        self.size
    }
    fn format(&self) -> DrmFourcc {
        self.fourcc
    }
    fn pitch(&self) -> u32 {
        self.pitch
    }
    fn handle(&self) -> drm::buffer::Handle {
        self.handle
    }
}

impl KmsOps for DrmCard {
    type ModeId = drm::control::Mode;

    fn driver_name(&self) -> Option<String> {
        self.get_driver()
            .ok()
            .map(|info| info.name().to_string_lossy().into_owned())
    }

    fn device_fd(&self) -> Option<BorrowedFd<'_>> {
        Some(self.fd.as_fd())
    }

    fn capability(&self, cap: Capability) -> io::Result<u64> {
        let cap = match cap {
            Capability::DumbBuffer => drm::DriverCapability::DumbBuffer,
            Capability::CursorWidth => drm::DriverCapability::CursorWidth,
            Capability::CursorHeight => drm::DriverCapability::CursorHeight,
        };
        self.get_driver_capability(cap)
    }

    fn connectors(&self) -> io::Result<Vec<ConnectorDesc<Self::ModeId>>> {
        let res = self.resource_handles()?;
        let mut out = Vec::with_capacity(res.connectors().len());
        for handle in res.connectors() {
            let info = match self.get_connector(*handle, false) {
                Ok(info) => info,
                Err(err) => {
                    tracing::warn!(?err, "cannot retrieve connector {}", u32::from(*handle));
                    continue;
                }
            };
            out.push(ConnectorDesc {
                id: u32::from(*handle),
                connected: info.state() == connector::State::Connected,
                current_encoder: info.current_encoder().map(u32::from),
                encoders: info.encoders().iter().copied().map(u32::from).collect(),
                modes: info
                    .modes()
                    .iter()
                    .map(|mode| ModeDesc {
                        width: mode.size().0 as u32,
                        height: mode.size().1 as u32,
                        native: *mode,
                    })
                    .collect(),
            });
        }
        Ok(out)
    }

    fn encoder(&self, id: u32) -> io::Result<EncoderDesc> {
        let info = self.get_encoder(encoder::Handle::from(nz(id)?))?;
        let res = self.resource_handles()?;
        Ok(EncoderDesc {
            id,
            crtc: info.crtc().map(u32::from),
            possible_crtcs: res
                .filter_crtcs(info.possible_crtcs())
                .into_iter()
                .map(u32::from)
                .collect(),
        })
    }

    fn crtcs(&self) -> io::Result<Vec<u32>> {
        let res = self.resource_handles()?;
        Ok(res.crtcs().iter().copied().map(u32::from).collect())
    }

    fn read_crtc(&self, id: u32) -> io::Result<CrtcState<Self::ModeId>> {
        let info = self.get_crtc(crtc::Handle::from(nz(id)?))?;
        Ok(CrtcState {
            id,
            fb: info.framebuffer().map(u32::from),
            pos: info.position(),
            mode: info.mode(),
        })
    }

    fn commit_crtc(
        &self,
        crtc_id: u32,
        fb: Option<u32>,
        pos: (u32, u32),
        connector_id: u32,
        mode: Option<Self::ModeId>,
    ) -> io::Result<()> {
        let fb = fb.map(|id| nz(id).map(framebuffer::Handle::from)).transpose()?;
        self.set_crtc(
            crtc::Handle::from(nz(crtc_id)?),
            fb,
            pos,
            &[connector::Handle::from(nz(connector_id)?)],
            mode,
        )
    }

    fn create_dumb(
        &self,
        width: u32,
        height: u32,
        fourcc: DrmFourcc,
        bpp: u32,
    ) -> io::Result<DumbAlloc> {
        let db = self.create_dumb_buffer((width, height), fourcc, bpp)?;
        let alloc = DumbAlloc {
            handle: u32::from(db.handle()),
            pitch: db.pitch(),
            size: db.pitch() as u64 * height as u64,
        };
        self.dumb.borrow_mut().insert(alloc.handle, db);
        Ok(alloc)
    }

    fn destroy_dumb(&self, handle: u32) -> io::Result<()> {
        let db = self.dumb.borrow_mut().remove(&handle).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "not a dumb buffer of this card")
        })?;
        self.destroy_dumb_buffer(db)
    }

    fn map_dumb(&self, handle: u32, len: usize) -> io::Result<NonNull<u8>> {
        let mut arg = ioctl::MapDumb {
            handle,
            ..Default::default()
        };
        ioctl::ioctl(self.fd.as_fd(), ioctl::MODE_MAP_DUMB, &mut arg)?;

        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &self.fd,
                arg.offset,
            )
        }?;
        NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))
    }

    fn unmap(&self, ptr: NonNull<u8>, len: usize) {
        if let Err(err) = unsafe { munmap(ptr.as_ptr().cast(), len) } {
            tracing::debug!(?err, "munmap failed");
        }
    }

    fn create_fb(
        &self,
        handle: u32,
        width: u32,
        height: u32,
        pitch: u32,
        fourcc: DrmFourcc,
        depth: u32,
        bpp: u32,
    ) -> io::Result<u32> {
        let source = FbSource {
            handle: drm::buffer::Handle::from(nz(handle)?),
            size: (width, height),
            pitch,
            fourcc,
        };
        let fb = ControlDevice::add_framebuffer(self, &source, depth, bpp)?;
        Ok(u32::from(fb))
    }

    fn destroy_fb(&self, fb: u32) -> io::Result<()> {
        self.destroy_framebuffer(framebuffer::Handle::from(nz(fb)?))
    }

    fn export_name(&self, handle: u32) -> io::Result<u32> {
        let mut arg = ioctl::GemFlink {
            handle,
            ..Default::default()
        };
        ioctl::ioctl(self.fd.as_fd(), ioctl::GEM_FLINK, &mut arg)?;
        Ok(arg.name)
    }

    fn open_name(&self, name: u32) -> io::Result<(u32, u64)> {
        let mut arg = ioctl::GemOpen {
            name,
            ..Default::default()
        };
        ioctl::ioctl(self.fd.as_fd(), ioctl::GEM_OPEN, &mut arg)?;
        Ok((arg.handle, arg.size))
    }

    fn close_handle(&self, handle: u32) -> io::Result<()> {
        let mut arg = ioctl::GemClose {
            handle,
            ..Default::default()
        };
        ioctl::ioctl(self.fd.as_fd(), ioctl::GEM_CLOSE, &mut arg)
    }

    fn export_prime(&self, handle: u32) -> io::Result<OwnedFd> {
        let flags = (libc::O_CLOEXEC | libc::O_RDWR) as u32;
        self.buffer_to_prime_fd(drm::buffer::Handle::from(nz(handle)?), flags)
    }

    fn import_prime(&self, fd: BorrowedFd<'_>) -> io::Result<u32> {
        self.prime_fd_to_buffer(fd).map(u32::from)
    }
}
