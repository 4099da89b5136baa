mod common;

use common::device;
use galena::Rect;

fn px(surface: &galena::Surface, x: i32, y: i32) -> u8 {
    surface.bytes()[(y as usize * surface.pitch as usize) + x as usize * 4]
}

#[test]
fn synchronize_without_dirt_does_nothing() {
    let mut dev = device(&[(1024, 768)], true);
    dev.bind_mode(1024, 768).unwrap();
    assert!(!dev.synchronize());
}

#[test]
fn synchronize_drains_once() {
    let mut dev = device(&[(1024, 768)], true);
    dev.bind_mode(1024, 768).unwrap();

    dev.mark_dirty(&[Rect::new(0, 0, 16, 16)]);
    assert!(dev.synchronize());
    assert!(!dev.synchronize());
}

#[test]
fn blit_covers_exactly_the_bounding_rectangle() {
    let mut dev = device(&[(1024, 768)], true);
    dev.bind_mode(1024, 768).unwrap();

    dev.render_surface_mut().unwrap().bytes_mut().fill(0xAB);
    dev.mark_dirty(&[Rect::new(0, 0, 10, 10)]);
    dev.mark_dirty(&[Rect::new(5, 5, 20, 20)]);
    assert!(dev.synchronize());

    let real = dev.real_surface().unwrap();
    assert_eq!(px(real, 0, 0), 0xAB);
    assert_eq!(px(real, 19, 19), 0xAB);
    assert_eq!(px(real, 9, 15), 0xAB);
    // outside the bounding rectangle nothing moved
    assert_eq!(px(real, 20, 0), 0x00);
    assert_eq!(px(real, 0, 20), 0x00);
    assert_eq!(px(real, 25, 25), 0x00);
}

#[test]
fn mark_order_does_not_change_the_result() {
    let rects = [Rect::new(3, 7, 40, 30), Rect::new(12, 2, 25, 50)];

    let mut forward = device(&[(640, 480)], true);
    forward.bind_mode(640, 480).unwrap();
    forward.render_surface_mut().unwrap().bytes_mut().fill(0x5C);
    forward.mark_dirty(&[rects[0]]);
    forward.mark_dirty(&[rects[1]]);
    assert!(forward.synchronize());

    let mut reverse = device(&[(640, 480)], true);
    reverse.bind_mode(640, 480).unwrap();
    reverse.render_surface_mut().unwrap().bytes_mut().fill(0x5C);
    reverse.mark_dirty(&[rects[1]]);
    reverse.mark_dirty(&[rects[0]]);
    assert!(reverse.synchronize());

    // a single call with both rectangles is equivalent as well
    let mut batched = device(&[(640, 480)], true);
    batched.bind_mode(640, 480).unwrap();
    batched.render_surface_mut().unwrap().bytes_mut().fill(0x5C);
    batched.mark_dirty(&rects);
    assert!(batched.synchronize());

    let a = forward.real_surface().unwrap().bytes();
    let b = reverse.real_surface().unwrap().bytes();
    let c = batched.real_surface().unwrap().bytes();
    assert_eq!(a, b);
    assert_eq!(a, c);
}

#[test]
fn dirty_rects_are_clipped_to_the_surface() {
    let mut dev = device(&[(640, 480)], true);
    dev.bind_mode(640, 480).unwrap();

    dev.render_surface_mut().unwrap().bytes_mut().fill(0x77);
    dev.mark_dirty(&[Rect::new(-50, -50, 8, 8), Rect::new(630, 470, 900, 900)]);
    assert!(dev.synchronize());

    let real = dev.real_surface().unwrap();
    assert_eq!(px(real, 0, 0), 0x77);
    assert_eq!(px(real, 639, 479), 0x77);
}

#[test]
fn fully_offscreen_rects_are_dropped() {
    let mut dev = device(&[(640, 480)], true);
    dev.bind_mode(640, 480).unwrap();

    dev.mark_dirty(&[Rect::new(700, 500, 800, 600)]);
    assert!(!dev.synchronize());
}

#[test]
fn single_buffered_screen_has_no_shadow() {
    let mut dev = device(&[(640, 480)], false);
    dev.bind_mode(640, 480).unwrap();
    assert!(dev.shadow_surface().is_none());
    dev.mark_dirty(&[Rect::new(0, 0, 10, 10)]);
    assert!(!dev.synchronize());
    assert_eq!(dev.kms().live_dumb(), 1);
}
