//! The kernel display interface this crate consumes, expressed as a narrow
//! trait so the whole device stack can run against a test double as well as
//! the real card in [`crate::card`].
//!
//! Resources are identified by their raw kernel ids; the one opaque piece is
//! the native mode descriptor, which callers carry around untouched and hand
//! back verbatim on commit.

use std::fmt::Debug;
use std::io;
use std::os::fd::{BorrowedFd, OwnedFd};
use std::ptr::NonNull;

use drm::buffer::DrmFourcc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    DumbBuffer,
    CursorWidth,
    CursorHeight,
}

/// One advertised mode of a connector.
#[derive(Clone, Debug)]
pub struct ModeDesc<M> {
    pub width: u32,
    pub height: u32,
    pub native: M,
}

#[derive(Clone, Debug)]
pub struct ConnectorDesc<M> {
    pub id: u32,
    pub connected: bool,
    /// Encoder currently driving this connector, if any.
    pub current_encoder: Option<u32>,
    /// Every encoder this connector can be routed through.
    pub encoders: Vec<u32>,
    /// Advertised modes, native-preferred first.
    pub modes: Vec<ModeDesc<M>>,
}

#[derive(Clone, Debug)]
pub struct EncoderDesc {
    pub id: u32,
    /// CRTC currently bound to this encoder, if any.
    pub crtc: Option<u32>,
    /// CRTCs this encoder is able to drive.
    pub possible_crtcs: Vec<u32>,
}

/// Snapshot of a CRTC's configuration, saved before a mode-set so it can be
/// reapplied on suspend or teardown.
#[derive(Clone, Debug)]
pub struct CrtcState<M> {
    pub id: u32,
    pub fb: Option<u32>,
    pub pos: (u32, u32),
    pub mode: Option<M>,
}

#[derive(Clone, Copy, Debug)]
pub struct DumbAlloc {
    pub handle: u32,
    pub pitch: u32,
    pub size: u64,
}

pub trait KmsOps {
    /// Opaque native mode descriptor.
    type ModeId: Copy + Debug;

    fn driver_name(&self) -> Option<String>;
    fn device_fd(&self) -> Option<BorrowedFd<'_>>;
    fn capability(&self, cap: Capability) -> io::Result<u64>;

    fn connectors(&self) -> io::Result<Vec<ConnectorDesc<Self::ModeId>>>;
    fn encoder(&self, id: u32) -> io::Result<EncoderDesc>;
    fn crtcs(&self) -> io::Result<Vec<u32>>;
    fn read_crtc(&self, id: u32) -> io::Result<CrtcState<Self::ModeId>>;

    /// Commit `fb` as the scanout buffer of `crtc` driving `connector` with
    /// `mode`. Synchronous and non-cancellable.
    fn commit_crtc(
        &self,
        crtc: u32,
        fb: Option<u32>,
        pos: (u32, u32),
        connector: u32,
        mode: Option<Self::ModeId>,
    ) -> io::Result<()>;

    fn create_dumb(&self, width: u32, height: u32, fourcc: DrmFourcc, bpp: u32)
        -> io::Result<DumbAlloc>;
    fn destroy_dumb(&self, handle: u32) -> io::Result<()>;
    /// Map `len` bytes of a dumb buffer. The mapping stays valid until
    /// [`KmsOps::unmap`]; mapping is not reference counted here.
    fn map_dumb(&self, handle: u32, len: usize) -> io::Result<NonNull<u8>>;
    fn unmap(&self, ptr: NonNull<u8>, len: usize);

    fn create_fb(
        &self,
        handle: u32,
        width: u32,
        height: u32,
        pitch: u32,
        fourcc: DrmFourcc,
        depth: u32,
        bpp: u32,
    ) -> io::Result<u32>;
    fn destroy_fb(&self, fb: u32) -> io::Result<()>;

    /// Assign a system-wide name to a buffer (flink).
    fn export_name(&self, handle: u32) -> io::Result<u32>;
    /// Open a named buffer, yielding a fresh local handle and its size.
    fn open_name(&self, name: u32) -> io::Result<(u32, u64)>;
    /// Close a handle obtained from [`KmsOps::open_name`] or
    /// [`KmsOps::import_prime`].
    fn close_handle(&self, handle: u32) -> io::Result<()>;

    fn export_prime(&self, handle: u32) -> io::Result<OwnedFd>;
    fn import_prime(&self, fd: BorrowedFd<'_>) -> io::Result<u32>;

    /// Size of the buffer behind a prime descriptor, determined by seeking
    /// it to its end.
    fn prime_size(&self, fd: BorrowedFd<'_>) -> io::Result<u64> {
        use rustix::fs::{seek, SeekFrom};
        let size = seek(fd, SeekFrom::End(0))?;
        seek(fd, SeekFrom::Start(0))?;
        Ok(size)
    }
}
