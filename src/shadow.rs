//! Dirty-rectangle bookkeeping on the shadow surface.
//!
//! The accumulated state lives in the shadow buffer's embedded header, so a
//! renderer attached from another process takes part in the same protocol.
//! A mark that completes before a drain begins is guaranteed to be included
//! in it: both touch the rectangle only under the header lock. Marks are
//! associative and commutative since the bounding union is.

use crate::header::{self, HeaderLock};
use crate::rect::Rect;
use crate::surface::Surface;

/// Clip `rects` to the surface and union their bounding rectangle into the
/// accumulated dirty state. Never blocks on I/O; the critical section only
/// merges rectangles.
pub fn mark_dirty(shadow: &mut Surface, rects: &[Rect]) {
    let bounds = shadow.bounds();
    let mut bound = Rect::EMPTY;
    for rect in rects {
        bound = bound.union(&rect.intersect(&bounds));
    }
    if bound.is_empty() {
        return;
    }

    let Some(hdr) = header::header_ptr(&shadow.buffer) else {
        return;
    };
    // header_ptr only returns a pointer into the live mapping
    unsafe {
        let _lock = HeaderLock::acquire(hdr);
        header::merge_dirty(hdr, bound);
    }
}

/// Snapshot the dirty rectangle and atomically reset it to empty.
pub(crate) fn drain_dirty(shadow: &Surface) -> Rect {
    let Some(hdr) = header::header_ptr(&shadow.buffer) else {
        return Rect::EMPTY;
    };
    unsafe {
        let _lock = HeaderLock::acquire(hdr);
        header::take_dirty(hdr)
    }
}
