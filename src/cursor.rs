//! Software cursor state, used when no usable hardware cursor plane exists.
//! The cursor participates in the dirty-rectangle protocol: every change
//! dirties the old and new cursor boxes, and synchronize composites the
//! cursor image over whatever portion of the dirty region it overlaps.

use crate::rect::Rect;
use crate::surface::Surface;

pub(crate) struct SoftwareCursor {
    surface: Option<Surface>,
    hot: (i32, i32),
    pos: (i32, i32),
}

impl SoftwareCursor {
    pub fn new() -> Self {
        Self {
            surface: None,
            hot: (0, 0),
            pos: (0, 0),
        }
    }

    fn current_box(&self) -> Rect {
        match &self.surface {
            Some(surface) => Rect::from_size(
                self.pos.0 - self.hot.0,
                self.pos.1 - self.hot.1,
                surface.width as i32,
                surface.height as i32,
            ),
            None => Rect::EMPTY,
        }
    }

    /// Swap the cursor image, returning the previous surface and the boxes
    /// to repaint.
    pub fn replace(
        &mut self,
        surface: Option<Surface>,
        hot: (i32, i32),
    ) -> (Option<Surface>, Rect, Rect) {
        let old_box = self.current_box();
        let old = std::mem::replace(&mut self.surface, surface);
        self.hot = hot;
        (old, old_box, self.current_box())
    }

    /// Move the hotspot, returning the boxes to repaint.
    pub fn move_to(&mut self, x: i32, y: i32) -> (Rect, Rect) {
        let old_box = self.current_box();
        self.pos = (x, y);
        (old_box, self.current_box())
    }

    /// The image and the top-left corner of its box, when a cursor is set.
    pub fn composite_args(&self) -> Option<(&Surface, i32, i32)> {
        self.surface
            .as_ref()
            .map(|surface| (surface, self.pos.0 - self.hot.0, self.pos.1 - self.hot.1))
    }

    pub fn take(&mut self) -> Option<Surface> {
        self.surface.take()
    }
}
