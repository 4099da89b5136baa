//! Hardware video-output abstraction over DRM/KMS: pixel surfaces, scanout
//! mode-setting, double-buffered dirty-rectangle synchronization and
//! cross-process surface sharing, with an optional accelerated driver behind
//! a versioned table.

pub mod accel;
pub mod buffer;
pub mod card;
pub mod config;
pub mod device;
pub mod error;
pub mod format;
pub mod header;
pub mod kms;
pub mod rect;
pub mod scanner;
pub mod shadow;
pub mod surface;

mod blit;
mod cursor;

pub use config::VideoConfig;
pub use device::{DeviceCaps, ExportTarget, VideoDevice};
pub use error::{Error, Result};
pub use format::PixelFormat;
pub use rect::Rect;
pub use surface::{Surface, SurfaceFlags};
