use serde::Serialize;

/// Axis-aligned face region, top-left origin, in pixel offsets of the
/// image it was detected in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl From<FaceBox> for imageproc::rect::Rect {
    fn from(b: FaceBox) -> imageproc::rect::Rect {
        imageproc::rect::Rect::at(b.x as i32, b.y as i32).of_size(b.width, b.height)
    }
}

impl FaceBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> FaceBox {
        FaceBox {
            x,
            y,
            width,
            height,
        }
    }

    /// Intersects a detector box (which may hang off the image edge) with
    /// the `img_width` x `img_height` frame. Returns `None` when nothing of
    /// the box is left inside.
    pub fn clamped(
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        img_width: u32,
        img_height: u32,
    ) -> Option<FaceBox> {
        let left = (x as i64).clamp(0, img_width as i64);
        let top = (y as i64).clamp(0, img_height as i64);
        let right = (x as i64 + width as i64).clamp(0, img_width as i64);
        let bottom = (y as i64 + height as i64).clamp(0, img_height as i64);

        if right <= left || bottom <= top {
            return None;
        }

        Some(FaceBox {
            x: left as u32,
            y: top as u32,
            width: (right - left) as u32,
            height: (bottom - top) as u32,
        })
    }

    fn right(&self) -> u64 {
        self.x as u64 + self.width as u64
    }

    fn bottom(&self) -> u64 {
        self.y as u64 + self.height as u64
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Non-empty and entirely inside an `img_width` x `img_height` frame.
    pub fn fits_within(&self, img_width: u32, img_height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.right() <= img_width as u64
            && self.bottom() <= img_height as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_area() {
        assert_eq!(FaceBox::new(0, 0, 30, 30).area(), 900);
        assert_eq!(FaceBox::new(10, 5, 50, 40).area(), 2000);
    }

    #[test]
    fn test_clamped_inside() {
        let b = FaceBox::clamped(10, 20, 30, 40, 100, 100).unwrap();
        assert_eq!(b, FaceBox::new(10, 20, 30, 40));
    }

    #[test]
    fn test_clamped_overhang() {
        /*
        box starts left of and above the frame, ends past the right edge
        */
        let b = FaceBox::clamped(-5, -10, 50, 30, 40, 100).unwrap();
        assert_eq!(b, FaceBox::new(0, 0, 40, 20));
        assert!(b.fits_within(40, 100));
    }

    #[test]
    fn test_clamped_outside() {
        assert!(FaceBox::clamped(120, 0, 10, 10, 100, 100).is_none());
        assert!(FaceBox::clamped(-20, 0, 10, 10, 100, 100).is_none());
    }

    #[test]
    fn test_fits_within() {
        assert!(FaceBox::new(0, 0, 100, 100).fits_within(100, 100));
        assert!(!FaceBox::new(1, 0, 100, 100).fits_within(100, 100));
        assert!(!FaceBox::new(0, 0, 0, 10).fits_within(100, 100));
        assert!(!FaceBox::new(u32::MAX, 0, 10, 10).fits_within(100, 100));
    }
}
