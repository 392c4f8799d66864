use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// Axis-aligned pixel rectangle. Coordinates may go negative while a
/// tracker search window slides past the frame edge; width and height
/// never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Scale with independent horizontal/vertical factors, rounding half
    /// up.
    pub fn scaled(&self, fx: f32, fy: f32) -> Rect {
        Rect {
            x: scale_coord(self.x, fx),
            y: scale_coord(self.y, fy),
            width: scale_len(self.width, fx),
            height: scale_len(self.height, fy),
        }
    }

    /// Clamp to a `bounds_w` x `bounds_h` frame, shrinking as needed.
    pub fn clamped(&self, bounds_w: u32, bounds_h: u32) -> Rect {
        let x = self.x.clamp(0, bounds_w as i32);
        let y = self.y.clamp(0, bounds_h as i32);
        let width = self.width.min(bounds_w.saturating_sub(x as u32));
        let height = self.height.min(bounds_h.saturating_sub(y as u32));
        Rect {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

pub(crate) fn scale_coord(v: i32, f: f32) -> i32 {
    (v as f32 * f + 0.5).floor() as i32
}

pub(crate) fn scale_len(v: u32, f: f32) -> u32 {
    (v as f32 * f + 0.5) as u32
}

/// The per-stage transfer unit flowing through the chain: one image with
/// its region of interest, output routing flags, and whatever payloads
/// upstream stages attached (2-D features/descriptors, 3-D clouds).
#[derive(Debug, Clone)]
pub struct Block {
    pub name: String,
    pub image: DynamicImage,
    pub roi: Rect,
    pub show: bool,
    pub save: bool,
    pub publish: bool,
    /// 2-D keypoints in image coordinates, aligned with `descriptors`.
    pub features: Vec<[f32; 2]>,
    pub descriptors: Vec<Vec<u8>>,
    /// 3-D points; a block carrying a cloud is published as a cloud slot
    /// rather than an image slot.
    pub points: Option<Vec<[f32; 3]>>,
    /// Per-point colors; only meaningful when the length matches `points`.
    pub colors: Option<Vec<[f32; 3]>>,
}

impl Block {
    pub fn new(name: impl Into<String>, image: DynamicImage) -> Self {
        let (w, h) = (image.width(), image.height());
        Self {
            name: name.into(),
            image,
            roi: Rect::full(w, h),
            show: false,
            save: false,
            publish: false,
            features: Vec::new(),
            descriptors: Vec::new(),
            points: None,
            colors: None,
        }
    }

    pub fn with_flags(mut self, show: bool, save: bool, publish: bool) -> Self {
        self.show = show;
        self.save = save;
        self.publish = publish;
        self
    }

    /// A cloud-only block; carries no pixels of its own.
    pub fn cloud(
        name: impl Into<String>,
        points: Vec<[f32; 3]>,
        colors: Option<Vec<[f32; 3]>>,
    ) -> Self {
        let mut block = Block::new(name, DynamicImage::new_rgb8(0, 0));
        block.points = Some(points);
        block.colors = colors;
        block
    }

    pub fn is_cloud(&self) -> bool {
        self.points.is_some()
    }
}

/// Shared per-frame 3-D pose scratch record. Zeroed at the start of every
/// frame; only stages registered as 3-D producers/consumers see it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WorldState {
    /// 0 = nothing to fetch, 1 = world coordinates valid.
    pub fetch_kind: i32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub a: f32,
    pub b: f32,
    pub c: f32,
}

impl WorldState {
    pub fn reset(&mut self) {
        *self = WorldState::default();
    }

    pub fn pose(&self) -> [f32; 6] {
        [self.x, self.y, self.z, self.a, self.b, self.c]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_scaled_rounds_half_up() {
        let r = Rect::new(10, 21, 33, 47);
        let half = r.scaled(0.5, 0.5);
        assert_eq!(half, Rect::new(5, 11, 17, 24));
    }

    #[test]
    fn test_rect_clamped_to_bounds() {
        let r = Rect::new(-4, 90, 50, 50);
        let c = r.clamped(100, 100);
        assert_eq!(c.x, 0);
        assert_eq!(c.y, 90);
        assert_eq!(c.width, 50);
        assert_eq!(c.height, 10);
    }

    #[test]
    fn test_world_state_reset_zeroes_pose() {
        let mut w = WorldState {
            fetch_kind: 1,
            x: 1.0,
            y: 2.0,
            z: 3.0,
            a: 0.1,
            b: 0.2,
            c: 0.3,
        };
        w.reset();
        assert_eq!(w, WorldState::default());
    }
}
