//! A resource-counting in-memory card. Buffers are leaked boxes so imported
//! handles can alias the creator's storage exactly like a real mapping; the
//! test processes are short-lived.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::os::fd::{BorrowedFd, OwnedFd};
use std::ptr::NonNull;
use std::sync::Once;

use drm::buffer::DrmFourcc;
use galena::kms::{
    Capability, ConnectorDesc, CrtcState, DumbAlloc, EncoderDesc, KmsOps, ModeDesc,
};
use galena::{VideoConfig, VideoDevice};
use rustix::fs::{fstat, ftruncate, memfd_create, MemfdFlags};

pub fn init_tracing() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FakeMode(pub u32, pub u32);

struct FakeBuffer {
    ptr: *mut u8,
    len: usize,
    owner: bool,
}

#[derive(Default)]
struct Inner {
    next_handle: u32,
    next_fb: u32,
    next_name: u32,
    buffers: HashMap<u32, FakeBuffer>,
    names: HashMap<u32, u32>,
    handle_names: HashMap<u32, u32>,
    // keyed by the backing memfd inode so dup'd descriptors resolve too
    prime: HashMap<u64, u32>,
    fbs: Vec<u32>,
    commits: Vec<(u32, Option<u32>)>,
}

pub struct FakeCard {
    pub connectors: Vec<ConnectorDesc<FakeMode>>,
    pub encoders: HashMap<u32, EncoderDesc>,
    pub crtc_ids: Vec<u32>,
    pub fail_commit: Cell<bool>,
    pub has_dumb: Cell<bool>,
    pub cursor_size: Cell<(u64, u64)>,
    inner: RefCell<Inner>,
}

impl FakeCard {
    /// One connected connector per requested output size, each with its own
    /// encoder and CRTC, in the given order.
    pub fn with_outputs(outputs: &[(u32, u32)]) -> FakeCard {
        let mut connectors = Vec::new();
        let mut encoders = HashMap::new();
        let mut crtc_ids = Vec::new();
        for (i, (w, h)) in outputs.iter().enumerate() {
            let conn = 1 + i as u32;
            let enc = 100 + i as u32;
            let crtc = 200 + i as u32;
            connectors.push(ConnectorDesc {
                id: conn,
                connected: true,
                current_encoder: Some(enc),
                encoders: vec![enc],
                modes: vec![ModeDesc {
                    width: *w,
                    height: *h,
                    native: FakeMode(*w, *h),
                }],
            });
            encoders.insert(
                enc,
                EncoderDesc {
                    id: enc,
                    crtc: Some(crtc),
                    possible_crtcs: vec![crtc],
                },
            );
            crtc_ids.push(crtc);
        }
        FakeCard {
            connectors,
            encoders,
            crtc_ids,
            fail_commit: Cell::new(false),
            has_dumb: Cell::new(true),
            cursor_size: Cell::new((0, 0)),
            inner: RefCell::new(Inner {
                next_handle: 1,
                next_fb: 1,
                next_name: 100,
                ..Default::default()
            }),
        }
    }

    pub fn live_dumb(&self) -> usize {
        self.inner
            .borrow()
            .buffers
            .values()
            .filter(|b| b.owner)
            .count()
    }

    pub fn live_handles(&self) -> usize {
        self.inner.borrow().buffers.len()
    }

    pub fn live_fbs(&self) -> usize {
        self.inner.borrow().fbs.len()
    }

    pub fn commits(&self) -> Vec<(u32, Option<u32>)> {
        self.inner.borrow().commits.clone()
    }

    fn share(&self, creator_handle: u32) -> io::Result<(u32, u64)> {
        let mut inner = self.inner.borrow_mut();
        let (ptr, len) = {
            let buf = inner
                .buffers
                .get(&creator_handle)
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "unknown buffer"))?;
            (buf.ptr, buf.len)
        };
        let handle = inner.next_handle;
        inner.next_handle += 1;
        inner.buffers.insert(
            handle,
            FakeBuffer {
                ptr,
                len,
                owner: false,
            },
        );
        Ok((handle, len as u64))
    }
}

fn not_found(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, what.to_string())
}

impl KmsOps for FakeCard {
    type ModeId = FakeMode;

    fn driver_name(&self) -> Option<String> {
        Some("fake".into())
    }

    fn device_fd(&self) -> Option<BorrowedFd<'_>> {
        None
    }

    fn capability(&self, cap: Capability) -> io::Result<u64> {
        Ok(match cap {
            Capability::DumbBuffer => self.has_dumb.get() as u64,
            Capability::CursorWidth => self.cursor_size.get().0,
            Capability::CursorHeight => self.cursor_size.get().1,
        })
    }

    fn connectors(&self) -> io::Result<Vec<ConnectorDesc<FakeMode>>> {
        Ok(self.connectors.clone())
    }

    fn encoder(&self, id: u32) -> io::Result<EncoderDesc> {
        self.encoders
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("unknown encoder"))
    }

    fn crtcs(&self) -> io::Result<Vec<u32>> {
        Ok(self.crtc_ids.clone())
    }

    fn read_crtc(&self, id: u32) -> io::Result<CrtcState<FakeMode>> {
        Ok(CrtcState {
            id,
            fb: Some(4096 + id),
            pos: (0, 0),
            mode: Some(FakeMode(1024, 768)),
        })
    }

    fn commit_crtc(
        &self,
        crtc: u32,
        fb: Option<u32>,
        _pos: (u32, u32),
        _connector: u32,
        _mode: Option<FakeMode>,
    ) -> io::Result<()> {
        if self.fail_commit.get() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "commit rejected"));
        }
        self.inner.borrow_mut().commits.push((crtc, fb));
        Ok(())
    }

    fn create_dumb(
        &self,
        width: u32,
        height: u32,
        _fourcc: DrmFourcc,
        bpp: u32,
    ) -> io::Result<DumbAlloc> {
        // pad the pitch like real hardware would
        let pitch = (width * ((bpp + 7) / 8) + 63) & !63;
        let len = pitch as usize * height as usize;
        let ptr = Box::leak(vec![0u8; len].into_boxed_slice()).as_mut_ptr();

        let mut inner = self.inner.borrow_mut();
        let handle = inner.next_handle;
        inner.next_handle += 1;
        inner.buffers.insert(
            handle,
            FakeBuffer {
                ptr,
                len,
                owner: true,
            },
        );
        Ok(DumbAlloc {
            handle,
            pitch,
            size: len as u64,
        })
    }

    fn destroy_dumb(&self, handle: u32) -> io::Result<()> {
        let mut inner = self.inner.borrow_mut();
        match inner.buffers.get(&handle) {
            Some(buf) if buf.owner => {
                inner.buffers.remove(&handle);
                Ok(())
            }
            Some(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "destroy on imported handle",
            )),
            None => Err(not_found("unknown buffer")),
        }
    }

    fn map_dumb(&self, handle: u32, len: usize) -> io::Result<NonNull<u8>> {
        let inner = self.inner.borrow();
        let buf = inner
            .buffers
            .get(&handle)
            .ok_or_else(|| not_found("unknown buffer"))?;
        if len > buf.len {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "mapping too long"));
        }
        NonNull::new(buf.ptr).ok_or_else(|| not_found("null storage"))
    }

    fn unmap(&self, _ptr: NonNull<u8>, _len: usize) {}

    fn create_fb(
        &self,
        handle: u32,
        _width: u32,
        _height: u32,
        _pitch: u32,
        _fourcc: DrmFourcc,
        _depth: u32,
        _bpp: u32,
    ) -> io::Result<u32> {
        let mut inner = self.inner.borrow_mut();
        if !inner.buffers.contains_key(&handle) {
            return Err(not_found("unknown buffer"));
        }
        let fb = inner.next_fb;
        inner.next_fb += 1;
        inner.fbs.push(fb);
        Ok(fb)
    }

    fn destroy_fb(&self, fb: u32) -> io::Result<()> {
        let mut inner = self.inner.borrow_mut();
        let pos = inner
            .fbs
            .iter()
            .position(|id| *id == fb)
            .ok_or_else(|| not_found("unknown framebuffer"))?;
        inner.fbs.remove(pos);
        Ok(())
    }

    fn export_name(&self, handle: u32) -> io::Result<u32> {
        let mut inner = self.inner.borrow_mut();
        if !inner.buffers.contains_key(&handle) {
            return Err(not_found("unknown buffer"));
        }
        if let Some(name) = inner.handle_names.get(&handle) {
            return Ok(*name);
        }
        let name = inner.next_name;
        inner.next_name += 1;
        inner.names.insert(name, handle);
        inner.handle_names.insert(handle, name);
        Ok(name)
    }

    fn open_name(&self, name: u32) -> io::Result<(u32, u64)> {
        let creator = *self
            .inner
            .borrow()
            .names
            .get(&name)
            .ok_or_else(|| not_found("unknown name"))?;
        self.share(creator)
    }

    fn close_handle(&self, handle: u32) -> io::Result<()> {
        let mut inner = self.inner.borrow_mut();
        match inner.buffers.get(&handle) {
            Some(buf) if !buf.owner => {
                inner.buffers.remove(&handle);
                Ok(())
            }
            Some(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "close on owned buffer",
            )),
            None => Err(not_found("unknown buffer")),
        }
    }

    fn export_prime(&self, handle: u32) -> io::Result<OwnedFd> {
        let len = {
            let inner = self.inner.borrow();
            inner
                .buffers
                .get(&handle)
                .ok_or_else(|| not_found("unknown buffer"))?
                .len
        };
        let fd = memfd_create("fake-prime", MemfdFlags::CLOEXEC)?;
        ftruncate(&fd, len as u64)?;
        let ino = fstat(&fd)?.st_ino;
        self.inner.borrow_mut().prime.insert(ino, handle);
        Ok(fd)
    }

    fn import_prime(&self, fd: BorrowedFd<'_>) -> io::Result<u32> {
        let ino = fstat(fd)?.st_ino;
        let creator = *self
            .inner
            .borrow()
            .prime
            .get(&ino)
            .ok_or_else(|| not_found("unknown prime fd"))?;
        self.share(creator).map(|(handle, _)| handle)
    }
}

pub fn test_config(double_buffering: bool) -> VideoConfig {
    VideoConfig {
        double_buffering,
        share_surfaces: double_buffering,
        pixel_format: None,
        ..VideoConfig::default()
    }
}

pub fn device(outputs: &[(u32, u32)], double_buffering: bool) -> VideoDevice<FakeCard> {
    init_tracing();
    VideoDevice::with_kms(FakeCard::with_outputs(outputs), test_config(double_buffering))
        .expect("probe should succeed")
}
