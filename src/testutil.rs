// Shared fixtures for stage tests.

use image::{DynamicImage, RgbImage};

use crate::block::{Block, WorldState};
use crate::chain::stage::FrameContext;
use crate::context::{RunContext, TaskCategory};
use crate::display::HeadlessSurface;

/// Owns everything a stage call borrows, so tests can build a
/// `FrameContext` in one line.
pub struct Harness {
    pub run: RunContext,
    pub blocks: Vec<Block>,
    pub outputs: Vec<Block>,
    pub world: WorldState,
    pub display: HeadlessSurface,
}

impl Harness {
    pub fn new(task: TaskCategory, blocks: Vec<Block>) -> Self {
        Self {
            run: RunContext::new(task),
            blocks,
            outputs: Vec::new(),
            world: WorldState::default(),
            display: HeadlessSurface::new(std::env::temp_dir()),
        }
    }

    pub fn ctx(&mut self) -> FrameContext<'_> {
        FrameContext {
            run: &mut self.run,
            blocks: &mut self.blocks,
            outputs: &mut self.outputs,
            world: Some(&mut self.world),
            display: &mut self.display,
        }
    }
}

/// A dark frame with one bright axis-aligned box, handy for detector and
/// tracker tests.
pub fn bright_box_frame(w: u32, h: u32, x0: u32, y0: u32, bw: u32, bh: u32) -> DynamicImage {
    let mut img = RgbImage::from_pixel(w, h, image::Rgb([10, 10, 10]));
    for y in y0..(y0 + bh).min(h) {
        for x in x0..(x0 + bw).min(w) {
            img.put_pixel(x, y, image::Rgb([240, 240, 240]));
        }
    }
    DynamicImage::ImageRgb8(img)
}
