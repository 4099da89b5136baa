use std::path::PathBuf;

use drm::buffer::DrmFourcc;

use crate::accel::AccelFactory;
use crate::format;

/// Video subsystem configuration, read once before the device is opened.
///
/// Every field has an environment-driven default so a bare
/// `VideoConfig::default()` works on a stock setup; construct the struct
/// directly to override.
#[derive(Clone)]
pub struct VideoConfig {
    /// Path of the DRM primary node.
    pub device_path: PathBuf,
    /// Preferred pixel format; `None` picks the 32bpp default.
    pub pixel_format: Option<DrmFourcc>,
    /// Keep a shadow render target and blit dirty regions to the scanout
    /// buffer on synchronize.
    pub double_buffering: bool,
    /// Guard the shadow dirty state with a process-shared lock so the shadow
    /// buffer can be exported to a renderer in another process.
    pub share_surfaces: bool,
    /// Cursor box the compositor wants; hardware cursor planes smaller than
    /// this fall back to the software cursor.
    pub cursor_size: (u32, u32),
    /// Factory for an external accelerated driver. Failure to produce a
    /// driver is non-fatal; the device degrades to dumb buffers.
    pub accel_factory: Option<AccelFactory>,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            device_path: std::env::var_os("GALENA_DEVICE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/dev/dri/card0")),
            pixel_format: std::env::var("GALENA_PIXEL_FORMAT")
                .ok()
                .as_deref()
                .and_then(format::parse_fourcc),
            double_buffering: env("GALENA_DOUBLE_BUFFER"),
            share_surfaces: env("GALENA_SHARED_SURFACES"),
            cursor_size: (32, 32),
            accel_factory: None,
        }
    }
}

fn env(key: &str) -> bool {
    matches!(std::env::var(key).as_deref(), Ok("1"))
}
