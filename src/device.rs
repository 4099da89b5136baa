//! The video device: one object owning the card, the buffer operation table
//! selected at probe time, the discovered mode list and the scanout state
//! machine (`Unbound -> Bound -> Suspended -> Bound -> Unbound`).

use std::io;
use std::mem;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use crate::accel::{self, AccelCaps};
use crate::blit;
use crate::buffer::{AccelOps, BufferOps, DumbOps, Ownership, SurfaceBuffer};
use crate::card::DrmCard;
use crate::config::VideoConfig;
use crate::cursor::SoftwareCursor;
use crate::error::{Error, Result};
use crate::format::{self, PixelFormat};
use crate::header;
use crate::kms::{Capability, CrtcState, KmsOps};
use crate::rect::Rect;
use crate::scanner::{self, ModeInfo};
use crate::shadow;
use crate::surface::{Surface, SurfaceFlags};

#[derive(Clone, Copy, Debug)]
pub struct DeviceCaps {
    pub dumb_buffer: bool,
    pub cursor_width: u32,
    pub cursor_height: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportTarget {
    Real,
    Shadow,
}

enum ScanoutState<M> {
    Unbound,
    Bound(Binding<M>),
    Suspended(Binding<M>),
}

struct Binding<M> {
    mode: ModeInfo<M>,
    fb: u32,
    /// CRTC configuration found when this process first took over the
    /// output; reapplied on suspend and teardown.
    saved: Option<CrtcState<M>>,
}

struct Screen {
    real: Surface,
    shadow: Option<Surface>,
    cursor: SoftwareCursor,
}

pub struct VideoDevice<K: KmsOps> {
    kms: K,
    config: VideoConfig,
    caps: DeviceCaps,
    ops: Box<dyn BufferOps<K>>,
    accelerated: bool,
    modes: Vec<ModeInfo<K::ModeId>>,
    state: ScanoutState<K::ModeId>,
    screen: Option<Screen>,
}

impl VideoDevice<DrmCard> {
    /// Open and probe the configured DRM node.
    pub fn open(config: VideoConfig) -> Result<Self> {
        tracing::debug!("opening video device {}", config.device_path.display());
        let card = DrmCard::open(&config.device_path)?;
        Self::with_kms(card, config)
    }
}

impl<K: KmsOps> VideoDevice<K> {
    /// Probe capabilities, load the accelerated driver if one is configured,
    /// and discover the mode list.
    pub fn with_kms(kms: K, config: VideoConfig) -> Result<Self> {
        let caps = DeviceCaps {
            dumb_buffer: kms
                .capability(Capability::DumbBuffer)
                .map(|v| v != 0)
                .unwrap_or(false),
            cursor_width: kms.capability(Capability::CursorWidth).unwrap_or(0) as u32,
            cursor_height: kms.capability(Capability::CursorHeight).unwrap_or(0) as u32,
        };

        let driver = config.accel_factory.and_then(|factory| {
            let name = kms.driver_name().unwrap_or_else(|| "unknown".into());
            accel::load_driver(factory, &name, kms.device_fd())
        });

        let (ops, accelerated): (Box<dyn BufferOps<K>>, bool) = match driver {
            Some(driver) => (Box::new(AccelOps::new(driver)), true),
            None if caps.dumb_buffer => (Box::new(DumbOps), false),
            None => return Err(Error::CapabilityMissing),
        };

        let modes = scanner::discover(&kms)?;

        Ok(Self {
            kms,
            config,
            caps,
            ops,
            accelerated,
            modes,
            state: ScanoutState::Unbound,
            screen: None,
        })
    }

    pub fn kms(&self) -> &K {
        &self.kms
    }

    pub fn capabilities(&self) -> &DeviceCaps {
        &self.caps
    }

    pub fn is_accelerated(&self) -> bool {
        self.accelerated
    }

    /// Optional operations the loaded driver actually implements.
    pub fn accel_caps(&mut self) -> AccelCaps {
        self.ops.accel().map(|d| d.caps()).unwrap_or_default()
    }

    pub fn modes(&self) -> &[ModeInfo<K::ModeId>] {
        &self.modes
    }

    pub fn is_bound(&self) -> bool {
        matches!(self.state, ScanoutState::Bound(_))
    }

    pub fn real_surface(&self) -> Option<&Surface> {
        self.screen.as_ref().map(|s| &s.real)
    }

    pub fn shadow_surface(&self) -> Option<&Surface> {
        self.screen.as_ref().and_then(|s| s.shadow.as_ref())
    }

    /// The surface applications render into: the shadow when double
    /// buffering is on, the scanout surface otherwise.
    pub fn render_surface_mut(&mut self) -> Option<&mut Surface> {
        let screen = self.screen.as_mut()?;
        Some(screen.shadow.as_mut().unwrap_or(&mut screen.real))
    }

    /// Whether the hardware cursor plane can hold the configured cursor box.
    pub fn hardware_cursor_usable(&self) -> bool {
        self.caps.cursor_width >= self.config.cursor_size.0
            && self.caps.cursor_height >= self.config.cursor_size.1
            && self.caps.cursor_width != 0
            && self.caps.cursor_height != 0
    }

    fn screen_format(&self) -> Result<PixelFormat> {
        let fourcc = self
            .config
            .pixel_format
            .unwrap_or_else(|| format::default_fourcc(32));
        PixelFormat::from_fourcc(fourcc)
            .ok_or_else(|| Error::UnsupportedFormat(format!("{fourcc:?}")))
    }

    /// Pick the first discovered mode large enough for the requested size,
    /// build the scanout (and shadow) surfaces and commit the mode-set.
    ///
    /// On any failure everything allocated for the attempt is rolled back
    /// and a previously bound screen stays untouched.
    pub fn bind_mode(&mut self, width: u32, height: u32) -> Result<()> {
        let format = self.screen_format()?;
        let mode = *scanner::first_fit(&self.modes, width, height)
            .ok_or(Error::NoSuitableMode { width, height })?;

        tracing::debug!(
            "setting video mode {}x{} on connector {}",
            mode.width,
            mode.height,
            mode.connector,
        );

        let real = self.create_screen_surface(
            format,
            0,
            mode.width,
            mode.height,
            true,
            SurfaceFlags::HARDWARE | SurfaceFlags::FULLSCREEN,
            false,
        )?;

        let fb = match self.kms.create_fb(
            real.buffer().handle,
            mode.width,
            mode.height,
            real.pitch,
            format.fourcc,
            format.depth,
            format.bpp,
        ) {
            Ok(fb) => fb,
            Err(err) => {
                tracing::error!(?err, "cannot create framebuffer");
                self.release_surface(real);
                return Err(Error::BufferAllocationFailed(err));
            }
        };

        let shadow = if self.config.double_buffering {
            let mut flags = SurfaceFlags::HARDWARE;
            if self.config.share_surfaces {
                flags |= SurfaceFlags::SHARED;
            }
            match self.create_screen_surface(
                format,
                header::region_size(),
                mode.width,
                mode.height,
                false,
                flags,
                self.config.share_surfaces,
            ) {
                Ok(surface) => Some(surface),
                Err(err) => {
                    if let Err(err) = self.kms.destroy_fb(fb) {
                        tracing::warn!(?err, "failed to remove framebuffer");
                    }
                    self.release_surface(real);
                    return Err(err);
                }
            }
        } else {
            None
        };

        // Keep the configuration found when this process first took over;
        // on a mode switch the old binding already holds it.
        let saved = match &self.state {
            ScanoutState::Unbound => self.kms.read_crtc(mode.crtc).ok(),
            ScanoutState::Bound(old) | ScanoutState::Suspended(old) => old.saved.clone(),
        };

        if let Err(err) =
            self.kms
                .commit_crtc(mode.crtc, Some(fb), (0, 0), mode.connector, Some(mode.native))
        {
            tracing::error!(?err, "cannot set CRTC for connector {}", mode.connector);
            if let Err(err) = self.kms.destroy_fb(fb) {
                tracing::warn!(?err, "failed to remove framebuffer");
            }
            if let Some(shadow) = shadow {
                self.release_surface(shadow);
            }
            self.release_surface(real);
            return Err(Error::ScanoutCommitFailed(err));
        }

        // the commit replaced the previous scanout; retire its resources
        if let ScanoutState::Bound(old) | ScanoutState::Suspended(old) =
            mem::replace(&mut self.state, ScanoutState::Unbound)
        {
            if let Err(err) = self.kms.destroy_fb(old.fb) {
                tracing::warn!(?err, "failed to remove old framebuffer");
            }
        }
        if let Some(old) = self.screen.take() {
            self.release_screen(old);
        }

        tracing::info!(
            "bound {}x{} mode on connector {} (crtc {})",
            mode.width,
            mode.height,
            mode.connector,
            mode.crtc,
        );
        self.screen = Some(Screen {
            real,
            shadow,
            cursor: SoftwareCursor::new(),
        });
        self.state = ScanoutState::Bound(Binding { mode, fb, saved });
        Ok(())
    }

    /// Give the output back to whoever owned it before binding, keeping the
    /// screen surfaces alive for [`VideoDevice::resume`]. Calling this while
    /// not bound is an error.
    pub fn suspend(&mut self) -> Result<()> {
        match mem::replace(&mut self.state, ScanoutState::Unbound) {
            ScanoutState::Bound(mut binding) => {
                if let Some(saved) = binding.saved.take() {
                    if let Err(err) = self.kms.commit_crtc(
                        saved.id,
                        saved.fb,
                        saved.pos,
                        binding.mode.connector,
                        saved.mode,
                    ) {
                        tracing::error!(?err, "failed to restore saved CRTC configuration");
                        binding.saved = Some(saved);
                        self.state = ScanoutState::Bound(binding);
                        return Err(Error::ScanoutCommitFailed(err));
                    }
                }
                self.state = ScanoutState::Suspended(binding);
                Ok(())
            }
            other => {
                self.state = other;
                Err(Error::InvalidState)
            }
        }
    }

    /// Re-commit the scanout buffer that was active before
    /// [`VideoDevice::suspend`], saving the interim configuration again.
    pub fn resume(&mut self) -> Result<()> {
        match mem::replace(&mut self.state, ScanoutState::Unbound) {
            ScanoutState::Suspended(mut binding) => {
                binding.saved = self.kms.read_crtc(binding.mode.crtc).ok();
                if let Err(err) = self.kms.commit_crtc(
                    binding.mode.crtc,
                    Some(binding.fb),
                    (0, 0),
                    binding.mode.connector,
                    Some(binding.mode.native),
                ) {
                    tracing::error!(?err, "failed to resume scanout");
                    self.state = ScanoutState::Suspended(binding);
                    return Err(Error::ScanoutCommitFailed(err));
                }
                self.state = ScanoutState::Bound(binding);
                Ok(())
            }
            other => {
                self.state = other;
                Err(Error::InvalidState)
            }
        }
    }

    /// Tear the binding down: remove the framebuffer, restore the saved CRTC
    /// configuration and release every screen surface. Terminal; also run on
    /// drop.
    pub fn unbind(&mut self) {
        match mem::replace(&mut self.state, ScanoutState::Unbound) {
            ScanoutState::Bound(binding) | ScanoutState::Suspended(binding) => {
                if let Some(saved) = &binding.saved {
                    if let Err(err) = self.kms.commit_crtc(
                        saved.id,
                        saved.fb,
                        saved.pos,
                        binding.mode.connector,
                        saved.mode,
                    ) {
                        tracing::warn!(
                            ?err,
                            "failed to restore CRTC for connector {}",
                            binding.mode.connector,
                        );
                    }
                }
                if let Err(err) = self.kms.destroy_fb(binding.fb) {
                    tracing::warn!(?err, "failed to remove framebuffer");
                }
            }
            ScanoutState::Unbound => {}
        }
        if let Some(screen) = self.screen.take() {
            self.release_screen(screen);
        }
    }

    /// Allocate an offscreen hardware surface in the screen pixel format.
    pub fn create_surface(&mut self, width: u32, height: u32) -> Result<Surface> {
        let format = self.screen_format()?;
        self.create_screen_surface(format, 0, width, height, false, SurfaceFlags::HARDWARE, false)
    }

    pub fn destroy_surface(&mut self, surface: Surface) {
        self.release_surface(surface);
    }

    /// Record changed regions of the shadow surface. No-op unless double
    /// buffering is on.
    pub fn mark_dirty(&mut self, rects: &[Rect]) {
        if let Some(screen) = self.screen.as_mut() {
            if let Some(shadow) = screen.shadow.as_mut() {
                shadow::mark_dirty(shadow, rects);
            }
        }
    }

    /// Drain the accumulated dirty rectangle and blit it from the shadow to
    /// the scanout surface, compositing the software cursor over the overlap.
    /// Returns whether any work was done.
    pub fn synchronize(&mut self) -> bool {
        let Some(screen) = self.screen.as_mut() else {
            return false;
        };
        let Screen {
            real,
            shadow,
            cursor,
        } = screen;
        let Some(shadow_surface) = shadow.as_ref() else {
            return false;
        };

        let bound = shadow::drain_dirty(shadow_surface);
        if bound.is_empty() {
            return false;
        }

        // the pixel copy runs outside the header lock
        let mut used_accel = false;
        if let Some(driver) = self.ops.accel() {
            if driver.caps().contains(AccelCaps::COPY_BLIT)
                && driver.check_blit(&shadow_surface.buffer, &real.buffer)
            {
                match driver.copy_blit(&shadow_surface.buffer, bound, &mut real.buffer, bound) {
                    Ok(()) => used_accel = true,
                    Err(err) if err.kind() == io::ErrorKind::Unsupported => {}
                    Err(err) => {
                        tracing::warn!(?err, "accelerated blit failed; copying in software");
                    }
                }
            }
        }
        if !used_accel {
            blit::copy_rect(shadow_surface, real, bound);
        }

        if let Some((image, x, y)) = cursor.composite_args() {
            let csr_box = Rect::from_size(x, y, image.width as i32, image.height as i32);
            let eff = csr_box.intersect(&bound);
            if !eff.is_empty() {
                blit::composite(image, real, eff, (eff.left - x, eff.top - y));
            }
        }

        if used_accel {
            if let Some(driver) = self.ops.accel() {
                if driver.caps().contains(AccelCaps::FLUSH) {
                    if let Err(err) = driver.flush() {
                        tracing::warn!(?err, "driver flush failed");
                    }
                }
            }
        }
        true
    }

    /// Install or remove the software cursor image, returning the previous
    /// one. The changed boxes are repainted immediately.
    pub fn set_cursor(
        &mut self,
        surface: Option<Surface>,
        hot_x: i32,
        hot_y: i32,
    ) -> Result<Option<Surface>> {
        let screen = self.screen.as_mut().ok_or(Error::InvalidState)?;
        let (old, old_box, new_box) = screen.cursor.replace(surface, (hot_x, hot_y));
        self.mark_dirty(&[old_box, new_box]);
        self.synchronize();
        Ok(old)
    }

    /// Move the cursor hotspot; the cursor is repainted without waiting for
    /// an unrelated synchronize.
    pub fn move_cursor(&mut self, x: i32, y: i32) -> Result<()> {
        let screen = self.screen.as_mut().ok_or(Error::InvalidState)?;
        let (old_box, new_box) = screen.cursor.move_to(x, y);
        self.mark_dirty(&[old_box, new_box]);
        self.synchronize();
        Ok(())
    }

    /// Fill a rectangle through the driver's clear engine when present,
    /// falling back to a software fill.
    pub fn fill_rect(&mut self, surface: &mut Surface, rect: Rect, pixel: u32) -> Result<()> {
        if let Some(driver) = self.ops.accel() {
            if driver.caps().contains(AccelCaps::CLEAR) {
                match driver.clear_buffer(&mut surface.buffer, rect, pixel) {
                    Ok(()) => return Ok(()),
                    Err(err) if err.kind() == io::ErrorKind::Unsupported => {}
                    Err(err) => return Err(Error::Kernel(err)),
                }
            }
        }
        blit::fill_rect(surface, rect, pixel);
        Ok(())
    }

    /// Assign (or return the cached) global name of a screen buffer.
    /// Idempotent per buffer.
    pub fn export_name(&mut self, target: ExportTarget) -> Result<u32> {
        let screen = self.screen.as_mut().ok_or(Error::InvalidState)?;
        let surface = match target {
            ExportTarget::Real => &mut screen.real,
            ExportTarget::Shadow => screen.shadow.as_mut().ok_or(Error::InvalidState)?,
        };
        let buffer = &mut surface.buffer;
        if buffer.name != 0 {
            return Ok(buffer.name);
        }
        let name = self.kms.export_name(buffer.handle).map_err(Error::Kernel)?;
        buffer.name = name;
        if let Some(hdr) = header::header_ptr(buffer) {
            // mirrored so attachers can find the name in the mapping
            unsafe { header::set_name(hdr, name) };
        }
        Ok(name)
    }

    /// Export (or return the cached) prime descriptor of a screen buffer.
    /// Idempotent per buffer.
    pub fn export_prime_fd(&mut self, target: ExportTarget) -> Result<BorrowedFd<'_>> {
        let screen = self.screen.as_mut().ok_or(Error::InvalidState)?;
        let surface = match target {
            ExportTarget::Real => &mut screen.real,
            ExportTarget::Shadow => screen.shadow.as_mut().ok_or(Error::InvalidState)?,
        };
        let buffer = &mut surface.buffer;
        if buffer.prime_fd.is_none() {
            let fd = self.kms.export_prime(buffer.handle).map_err(Error::Kernel)?;
            buffer.prime_fd = Some(fd);
        }
        match &buffer.prime_fd {
            Some(fd) => Ok(fd.as_fd()),
            None => Err(Error::InvalidState),
        }
    }

    /// Map a buffer another process exported by global name. The resulting
    /// surface is read-only by convention unless this process is the
    /// designated shadow renderer.
    pub fn attach_by_name(&mut self, name: u32) -> Result<Surface> {
        let buffer = self.ops.from_name(&self.kms, name)?;
        self.finish_attach(buffer)
    }

    /// Map a buffer known by raw handle and size.
    pub fn attach_by_handle(&mut self, handle: u32, size: u64) -> Result<Surface> {
        let buffer = self.ops.from_handle(&self.kms, handle, size)?;
        self.finish_attach(buffer)
    }

    /// Map a buffer received as a prime descriptor. A zero `size` is
    /// resolved by seeking the descriptor to its end.
    pub fn attach_by_prime_fd(&mut self, fd: OwnedFd, size: u64) -> Result<Surface> {
        let size = if size == 0 {
            self.kms.prime_size(fd.as_fd()).map_err(Error::Kernel)?
        } else {
            size
        };
        let buffer = self.ops.from_prime(&self.kms, fd, size)?;
        self.finish_attach(buffer)
    }

    fn finish_attach(&mut self, mut buffer: SurfaceBuffer) -> Result<Surface> {
        if let Err(err) = self.ops.map(&self.kms, &mut buffer, false) {
            self.ops.release(&self.kms, buffer);
            return Err(err);
        }

        let hdr = match buffer.mapped() {
            Some(base) if buffer.size >= header::region_size() as u64 => {
                base.cast::<header::SharedSurfaceHeader>()
            }
            _ => return self.reject(buffer, Error::NotShareable),
        };
        let Some(info) = (unsafe { header::read(hdr) }) else {
            return self.reject(buffer, Error::NotShareable);
        };
        let Some(format) = PixelFormat::from_raw_fourcc(info.fourcc) else {
            return self.reject(buffer, Error::UnsupportedFormat(format!("{:#x}", info.fourcc)));
        };
        // the advertised pixel region must stay inside the mapping
        let needed = info.pixel_offset as u64 + info.pitch as u64 * info.height as u64;
        if needed > buffer.size {
            return self.reject(buffer, Error::NotShareable);
        }

        buffer.width = info.width;
        buffer.height = info.height;
        buffer.pitch = info.pitch;
        buffer.offset = info.pixel_offset;
        buffer.fourcc = format.fourcc;
        if buffer.name == 0 {
            buffer.name = info.name;
        }

        let flags = SurfaceFlags::HARDWARE | SurfaceFlags::SHARED | SurfaceFlags::FOREIGN;
        Surface::new(buffer, format, flags).ok_or(Error::InvalidState)
    }

    fn reject(&mut self, buffer: SurfaceBuffer, err: Error) -> Result<Surface> {
        self.ops.release(&self.kms, buffer);
        Err(err)
    }

    fn create_screen_surface(
        &mut self,
        format: PixelFormat,
        header_size: u32,
        width: u32,
        height: u32,
        for_scanout: bool,
        flags: SurfaceFlags,
        shared_lock: bool,
    ) -> Result<Surface> {
        let mut buffer = self.ops.create(&self.kms, format, header_size, width, height)?;
        if let Err(err) = self.ops.map(&self.kms, &mut buffer, for_scanout) {
            self.ops.release(&self.kms, buffer);
            return Err(err);
        }
        if header_size > 0 {
            if let Some(hdr) = header::header_ptr(&buffer) {
                if let Err(err) = unsafe { header::init(hdr, &buffer, shared_lock) } {
                    self.ops.release(&self.kms, buffer);
                    return Err(Error::BufferAllocationFailed(err));
                }
            }
        }
        Surface::new(buffer, format, flags).ok_or(Error::InvalidState)
    }

    fn release_surface(&mut self, surface: Surface) {
        let buffer = surface.into_buffer();
        if matches!(buffer.ownership, Ownership::Creator) {
            if let Some(hdr) = header::header_ptr(&buffer) {
                // lock teardown before the memory goes away
                unsafe { header::destroy(hdr) };
            }
        }
        self.ops.release(&self.kms, buffer);
    }

    fn release_screen(&mut self, mut screen: Screen) {
        if let Some(cursor) = screen.cursor.take() {
            self.release_surface(cursor);
        }
        if let Some(shadow) = screen.shadow.take() {
            self.release_surface(shadow);
        }
        self.release_surface(screen.real);
    }
}

impl<K: KmsOps> Drop for VideoDevice<K> {
    fn drop(&mut self) {
        self.unbind();
    }
}
