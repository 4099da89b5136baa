//! The minimal software blitter behind synchronize: a same-format scanline
//! copy, a solid fill, and the alpha-over used to composite the software
//! cursor. Anything fancier belongs to the generic blit engine upstream.

use crate::rect::Rect;
use crate::surface::Surface;

unsafe fn row(surface: &Surface, x: i32, y: i32) -> *mut u8 {
    let bpp = surface.format.bytes_per_pixel() as usize;
    surface
        .pixels_ptr()
        .as_ptr()
        .add(y as usize * surface.pitch as usize + x as usize * bpp)
}

/// Copy `rect` from `src` to the same position in `dst`. Both surfaces must
/// share a format; the rectangle is clipped to both.
pub(crate) fn copy_rect(src: &Surface, dst: &mut Surface, rect: Rect) {
    debug_assert_eq!(src.format.fourcc, dst.format.fourcc);

    let rect = rect.intersect(&src.bounds()).intersect(&dst.bounds());
    if rect.is_empty() {
        return;
    }

    let bpp = src.format.bytes_per_pixel() as usize;
    let len = rect.width() as usize * bpp;
    for y in rect.top..rect.bottom {
        unsafe {
            std::ptr::copy_nonoverlapping(row(src, rect.left, y), row(dst, rect.left, y), len);
        }
    }
}

/// Composite `src` over `dst_rect` of `dst`, reading the source starting at
/// `src_origin`. Per-pixel alpha when both sides are 32bpp and the source
/// carries an alpha channel, opaque copy otherwise.
pub(crate) fn composite(src: &Surface, dst: &mut Surface, dst_rect: Rect, src_origin: (i32, i32)) {
    let dst_rect = dst_rect.intersect(&dst.bounds());
    if dst_rect.is_empty() {
        return;
    }

    let blend = src.format.bpp == 32 && dst.format.bpp == 32 && src.format.has_alpha();
    if !blend {
        let bpp = dst.format.bytes_per_pixel() as usize;
        let len = dst_rect.width() as usize * bpp;
        for y in 0..dst_rect.height() {
            unsafe {
                std::ptr::copy_nonoverlapping(
                    row(src, src_origin.0, src_origin.1 + y),
                    row(dst, dst_rect.left, dst_rect.top + y),
                    len,
                );
            }
        }
        return;
    }

    let amask = src.format.amask;
    let ashift = amask.trailing_zeros();
    for y in 0..dst_rect.height() {
        for x in 0..dst_rect.width() {
            unsafe {
                let sp = row(src, src_origin.0 + x, src_origin.1 + y) as *const u32;
                let dp = row(dst, dst_rect.left + x, dst_rect.top + y) as *mut u32;
                let s = sp.read_unaligned();
                let a = (s & amask) >> ashift;
                match a {
                    0 => {}
                    0xFF => dp.write_unaligned(s),
                    a => {
                        let d = dp.read_unaligned();
                        let mut out = 0u32;
                        for shift in [0u32, 8, 16, 24] {
                            let sc = (s >> shift) & 0xFF;
                            let dc = (d >> shift) & 0xFF;
                            let oc = (sc * a + dc * (255 - a)) / 255;
                            out |= oc << shift;
                        }
                        dp.write_unaligned(out);
                    }
                }
            }
        }
    }
}

/// Fill `rect` of `dst` with a raw pixel value.
pub(crate) fn fill_rect(dst: &mut Surface, rect: Rect, pixel: u32) {
    let rect = rect.intersect(&dst.bounds());
    if rect.is_empty() {
        return;
    }

    let bpp = dst.format.bytes_per_pixel() as usize;
    let bytes = pixel.to_le_bytes();
    for y in rect.top..rect.bottom {
        let mut p = unsafe { row(dst, rect.left, y) };
        for _ in 0..rect.width() {
            unsafe {
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), p, bpp);
                p = p.add(bpp);
            }
        }
    }
}
