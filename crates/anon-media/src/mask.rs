//! Fixed redaction of the top-right overlay region.
//!
//! Rows `[0, H/6)` and columns `[2W/3 - 10, W)` are blacked out, with integer
//! floor division throughout. The left bound saturates at column 0 for frames
//! narrower than 15 pixels.

use std::ops::Range;

use image::Rgb;

use crate::Frame;

const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

/// Pixel region blacked out in a frame of a given size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskRegion {
    /// Masked row indices
    pub rows: Range<u32>,
    /// Masked column indices
    pub cols: Range<u32>,
}

impl MaskRegion {
    /// Region for a `width` x `height` frame.
    pub fn for_dimensions(width: u32, height: u32) -> Self {
        let row_end = height / 6;
        let col_start = (2 * width / 3).saturating_sub(10);

        Self {
            rows: 0..row_end,
            cols: col_start.min(width)..width,
        }
    }

    /// Whether the pixel at (`row`, `col`) is masked.
    pub fn contains(&self, row: u32, col: u32) -> bool {
        self.rows.contains(&row) && self.cols.contains(&col)
    }
}

/// Black out the redaction region of `frame` in place.
pub fn mask_frame(frame: &mut Frame) {
    let region = MaskRegion::for_dimensions(frame.width(), frame.height());

    for row in region.rows.clone() {
        for col in region.cols.clone() {
            frame.put_pixel(col, row, BLACK);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn white(width: u32, height: u32) -> Frame {
        Frame::from_pixel(width, height, Rgb([255, 255, 255]))
    }

    #[test]
    fn test_region_for_120x300() {
        let region = MaskRegion::for_dimensions(300, 120);
        assert_eq!(region.rows, 0..20);
        assert_eq!(region.cols, 190..300);
    }

    #[test]
    fn test_region_uses_floor_division() {
        // 2 * 641 / 3 = 427, 481 / 6 = 80
        let region = MaskRegion::for_dimensions(641, 481);
        assert_eq!(region.rows, 0..80);
        assert_eq!(region.cols, 417..641);
    }

    #[test]
    fn test_mask_120x300() {
        let mut frame = white(300, 120);
        mask_frame(&mut frame);

        assert_eq!(frame.get_pixel(290, 0), &Rgb([0, 0, 0]));
        assert_eq!(frame.get_pixel(190, 19), &Rgb([0, 0, 0]));
        assert_eq!(frame.get_pixel(299, 19), &Rgb([0, 0, 0]));

        assert_eq!(frame.get_pixel(189, 19), &Rgb([255, 255, 255]));
        assert_eq!(frame.get_pixel(190, 20), &Rgb([255, 255, 255]));
        assert_eq!(frame.get_pixel(0, 0), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_mask_touches_only_region() {
        let mut frame = white(300, 120);
        mask_frame(&mut frame);
        let region = MaskRegion::for_dimensions(300, 120);

        for (col, row, pixel) in frame.enumerate_pixels() {
            let expected = if region.contains(row, col) { 0 } else { 255 };
            assert_eq!(pixel.0, [expected; 3], "pixel ({}, {})", row, col);
        }
    }

    #[test]
    fn test_narrow_frame_masks_full_width() {
        let region = MaskRegion::for_dimensions(12, 60);
        assert_eq!(region.cols, 0..12);
        assert_eq!(region.rows, 0..10);
    }

    #[test]
    fn test_tiny_frame_has_no_rows() {
        let mut frame = white(4, 5);
        mask_frame(&mut frame);
        assert!(frame.pixels().all(|p| p.0 == [255, 255, 255]));
    }
}
