//! Procedurally drawn images: the cover art placeholder and the play-state
//! glyphs composited onto the tray icon.

use image::{Rgba, RgbaImage};
use mpn_proto::protocol::PlaybackState;

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);
const GLYPH_FILL: Rgba<u8> = Rgba([255, 255, 255, 204]);
const GLYPH_OUTLINE: Rgba<u8> = Rgba([0, 0, 0, 204]);

const DISC_EDGE: Rgba<u8> = Rgba([96, 96, 96, 179]);
const DISC_RIM: Rgba<u8> = Rgba([224, 224, 224, 204]);
const DISC_LABEL: Rgba<u8> = Rgba([75, 75, 75, 204]);

/// A stylised compact disc, used when no cover art is available.
pub fn placeholder_disc(size: u32) -> RgbaImage {
    let centre = size as f32 / 2.0;
    let scale = size.max(1) as f32;
    RgbaImage::from_fn(size, size, |x, y| {
        let dx = x as f32 + 0.5 - centre;
        let dy = y as f32 + 0.5 - centre;
        // Radius as a fraction of the image edge.
        let r = (dx * dx + dy * dy).sqrt() / scale;
        if r > 0.5 {
            TRANSPARENT
        } else if r > 0.5 - 1.0 / scale {
            DISC_EDGE
        } else if r > 0.48 {
            DISC_RIM
        } else if r > 0.16 {
            // Light sweeping across the data side.
            let angle = dy.atan2(dx);
            let shade = (179.0 + 40.0 * (2.0 * angle).cos()) as u8;
            Rgba([shade, shade, shade.saturating_add(12), 204])
        } else if r > 0.05 {
            DISC_LABEL
        } else {
            TRANSPARENT
        }
    })
}

/// Play/pause/stop glyph filling a `size` square, with a one pixel margin.
pub fn state_glyph(state: PlaybackState, size: u32) -> RgbaImage {
    let mut img = RgbaImage::from_pixel(size, size, TRANSPARENT);
    let usable = size.saturating_sub(2);
    if usable == 0 {
        return img;
    }
    let u = usable as f32;
    match state {
        PlaybackState::Playing => {
            paint_convex(&mut img, &[(1.0, 1.0), (1.0, 1.0 + u), (1.0 + u, 1.0 + u / 2.0)]);
        }
        PlaybackState::Paused => {
            let w = pause_bar_width(usable) as f32;
            paint_convex(&mut img, &rect(1.0, 1.0, w, u));
            paint_convex(&mut img, &rect(1.0 + u - w, 1.0, w, u));
        }
        PlaybackState::Stopped => {
            paint_convex(&mut img, &rect(1.0, 1.0, u, u));
        }
    }
    img
}

/// Width of one pause bar; the gap between the bars is never narrower.
fn pause_bar_width(usable: u32) -> u32 {
    match usable % 3 {
        0 => usable / 3,
        1 if usable == 4 => 1,
        _ => usable / 3 + 1,
    }
}

fn rect(x: f32, y: f32, w: f32, h: f32) -> [(f32, f32); 4] {
    [(x, y), (x, y + h), (x + w, y + h), (x + w, y)]
}

/// Fill a convex polygon with a one pixel outline just outside its edges.
fn paint_convex(img: &mut RgbaImage, polygon: &[(f32, f32)]) {
    let n = polygon.len();
    if n < 3 {
        return;
    }
    let doubled_area: f32 = (0..n)
        .map(|i| {
            let (x0, y0) = polygon[i];
            let (x1, y1) = polygon[(i + 1) % n];
            x0 * y1 - x1 * y0
        })
        .sum();
    if doubled_area == 0.0 {
        return;
    }
    let orientation = doubled_area.signum();

    for (x, y, pixel) in img.enumerate_pixels_mut() {
        let p = (x as f32 + 0.5, y as f32 + 0.5);
        // Smallest distance to an edge, positive inside.
        let mut depth = f32::INFINITY;
        for i in 0..n {
            let a = polygon[i];
            let b = polygon[(i + 1) % n];
            let (ex, ey) = (b.0 - a.0, b.1 - a.1);
            let len = (ex * ex + ey * ey).sqrt();
            if len < f32::EPSILON {
                continue;
            }
            let cross = ex * (p.1 - a.1) - ey * (p.0 - a.0);
            depth = depth.min(orientation * cross / len);
        }
        if depth >= 0.0 {
            *pixel = GLYPH_FILL;
        } else if depth >= -1.0 {
            *pixel = GLYPH_OUTLINE;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pause_bar_width() {
        assert_eq!(pause_bar_width(3), 1);
        assert_eq!(pause_bar_width(4), 1);
        assert_eq!(pause_bar_width(5), 2);
        assert_eq!(pause_bar_width(7), 3);
        assert_eq!(pause_bar_width(9), 3);
    }

    #[test]
    fn test_disc_has_transparent_corners_and_hole() {
        let disc = placeholder_disc(64);
        assert_eq!(disc.dimensions(), (64, 64));
        assert_eq!(disc.get_pixel(0, 0)[3], 0);
        assert_eq!(disc.get_pixel(32, 32)[3], 0);
        // Somewhere on the data side.
        assert!(disc.get_pixel(32, 8)[3] > 0);
    }

    #[test]
    fn test_stop_glyph_fills_square() {
        let glyph = state_glyph(PlaybackState::Stopped, 10);
        assert_eq!(*glyph.get_pixel(5, 5), GLYPH_FILL);
        assert_eq!(*glyph.get_pixel(0, 5), GLYPH_OUTLINE);
    }

    #[test]
    fn test_play_glyph_points_right() {
        let glyph = state_glyph(PlaybackState::Playing, 12);
        assert_eq!(*glyph.get_pixel(2, 6), GLYPH_FILL);
        assert_eq!(glyph.get_pixel(10, 1)[3], 0);
    }

    #[test]
    fn test_pause_glyph_has_gap() {
        let glyph = state_glyph(PlaybackState::Paused, 11);
        // usable 9, bars 3 wide: [1, 4) and [7, 10)
        assert_eq!(*glyph.get_pixel(2, 5), GLYPH_FILL);
        assert_eq!(*glyph.get_pixel(8, 5), GLYPH_FILL);
        assert_eq!(glyph.get_pixel(5, 5)[3], 0);
    }

    #[test]
    fn test_tiny_glyph_is_blank() {
        let glyph = state_glyph(PlaybackState::Playing, 2);
        assert!(glyph.pixels().all(|p| p[3] == 0));
    }
}
