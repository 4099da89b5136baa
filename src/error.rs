use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to open video device {path}")]
    DeviceOpenFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0} is not a DRM primary node")]
    NotPrimaryNode(PathBuf),

    /// The device supports neither dumb buffers nor an accelerated driver.
    /// Fatal: the subsystem cannot start on this device.
    #[error("device supports neither dumb buffers nor an accelerated driver")]
    CapabilityMissing,

    /// Discovery walked every connector and found nothing usable.
    #[error("no connected display was found")]
    NoConnectedDisplay,

    /// No discovered mode is large enough for the requested size. The caller
    /// may retry with a smaller size; any bound screen is left untouched.
    #[error("no video mode can hold a {width}x{height} screen")]
    NoSuitableMode { width: u32, height: u32 },

    #[error("buffer allocation failed")]
    BufferAllocationFailed(#[source] io::Error),

    /// The mode-set commit was rejected; everything allocated for the
    /// attempt has been rolled back.
    #[error("mode-set commit was rejected by the kernel")]
    ScanoutCommitFailed(#[source] io::Error),

    #[error("unsupported pixel format {0}")]
    UnsupportedFormat(String),

    /// The active driver left this optional operation unimplemented.
    #[error("operation not supported by the active driver")]
    UnsupportedOperation,

    /// Attaching requires a shared surface header embedded in the buffer.
    #[error("buffer does not carry a shared surface header")]
    NotShareable,

    #[error("operation invalid in the current scanout state")]
    InvalidState,

    #[error("kernel display call failed")]
    Kernel(#[source] io::Error),
}
