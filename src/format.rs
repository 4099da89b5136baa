use drm::buffer::DrmFourcc;

/// Pixel format description: the wire-level fourcc plus the channel masks a
/// software renderer needs. Only formats present in the translation table are
/// accepted; anything else is rejected before a single kernel call is made.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelFormat {
    pub fourcc: DrmFourcc,
    pub bpp: u32,
    pub depth: u32,
    pub rmask: u32,
    pub gmask: u32,
    pub bmask: u32,
    pub amask: u32,
}

impl PixelFormat {
    pub fn from_fourcc(fourcc: DrmFourcc) -> Option<PixelFormat> {
        TABLE.iter().find(|f| f.fourcc == fourcc).copied()
    }

    pub fn from_raw_fourcc(raw: u32) -> Option<PixelFormat> {
        DrmFourcc::try_from(raw).ok().and_then(Self::from_fourcc)
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        (self.bpp + 7) / 8
    }

    pub fn has_alpha(&self) -> bool {
        self.amask != 0
    }
}

/// Parse a four-character code such as `XR24` from configuration.
pub fn parse_fourcc(code: &str) -> Option<DrmFourcc> {
    let bytes = code.as_bytes();
    if bytes.len() != 4 {
        return None;
    }
    let raw = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    DrmFourcc::try_from(raw).ok()
}

/// Default format for a given pixel depth when none is configured.
pub fn default_fourcc(bpp: u32) -> DrmFourcc {
    match bpp {
        32 => DrmFourcc::Xrgb8888,
        24 => DrmFourcc::Rgb888,
        8 => DrmFourcc::Rgb332,
        _ => DrmFourcc::Rgb565,
    }
}

macro_rules! fmt {
    ($fourcc:ident, $bpp:expr, $depth:expr, $r:expr, $g:expr, $b:expr, $a:expr) => {
        PixelFormat {
            fourcc: DrmFourcc::$fourcc,
            bpp: $bpp,
            depth: $depth,
            rmask: $r,
            gmask: $g,
            bmask: $b,
            amask: $a,
        }
    };
}

const TABLE: &[PixelFormat] = &[
    fmt!(Rgb332, 8, 8, 0xE0, 0x1C, 0x03, 0x00),
    fmt!(Bgr233, 8, 8, 0x0E, 0x38, 0xC0, 0x00),
    fmt!(Xrgb1555, 16, 15, 0x7C00, 0x03E0, 0x001F, 0x0000),
    fmt!(Xbgr1555, 16, 15, 0x001F, 0x03E0, 0x7C00, 0x0000),
    fmt!(Argb1555, 16, 16, 0x7C00, 0x03E0, 0x001F, 0x8000),
    fmt!(Abgr1555, 16, 16, 0x001F, 0x03E0, 0x7C00, 0x8000),
    fmt!(Rgb565, 16, 16, 0xF800, 0x07E0, 0x001F, 0x0000),
    fmt!(Bgr565, 16, 16, 0x001F, 0x07E0, 0xF800, 0x0000),
    fmt!(Rgb888, 24, 24, 0xFF0000, 0x00FF00, 0x0000FF, 0x000000),
    fmt!(Bgr888, 24, 24, 0x0000FF, 0x00FF00, 0xFF0000, 0x000000),
    fmt!(Xrgb8888, 32, 24, 0x00FF0000, 0x0000FF00, 0x000000FF, 0x00000000),
    fmt!(Xbgr8888, 32, 24, 0x000000FF, 0x0000FF00, 0x00FF0000, 0x00000000),
    fmt!(Rgbx8888, 32, 24, 0xFF000000, 0x00FF0000, 0x0000FF00, 0x00000000),
    fmt!(Bgrx8888, 32, 24, 0x0000FF00, 0x00FF0000, 0xFF000000, 0x00000000),
    fmt!(Argb8888, 32, 32, 0x00FF0000, 0x0000FF00, 0x000000FF, 0xFF000000),
    fmt!(Abgr8888, 32, 32, 0x000000FF, 0x0000FF00, 0x00FF0000, 0xFF000000),
    fmt!(Rgba8888, 32, 32, 0xFF000000, 0x00FF0000, 0x0000FF00, 0x000000FF),
    fmt!(Bgra8888, 32, 32, 0x0000FF00, 0x00FF0000, 0xFF000000, 0x000000FF),
];
