use image::{DynamicImage, GrayImage};
use serde::Deserialize;

use crate::block::Block;
use crate::chain::stage::{FrameContext, Stage};
use crate::config::StageConfig;
use crate::error::{BuildError, StageError};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StereoParams {
    pub max_disparity: u32,
    /// Odd SAD window side.
    pub window: u32,
}

impl Default for StereoParams {
    fn default() -> Self {
        Self {
            max_disparity: 48,
            window: 5,
        }
    }
}

/// Winner-take-all SAD block matcher. Appends a `disparity` block (raw
/// disparity values in a grayscale image) for downstream reconstruction.
pub struct StereoStage {
    label: String,
    show: bool,
    save: bool,
    params: StereoParams,
}

pub fn build(cfg: &StageConfig) -> Result<Box<dyn Stage>, BuildError> {
    let params: StereoParams = cfg.decode_params()?;
    if params.window % 2 == 0 || params.window == 0 {
        return Err(BuildError::MissingParam {
            name: cfg.name.clone(),
            what: "odd SAD window".to_string(),
        });
    }
    Ok(Box::new(StereoStage {
        label: cfg.name.clone(),
        show: cfg.show,
        save: cfg.save,
        params,
    }))
}

impl StereoStage {
    fn disparity_map(&self, left: &GrayImage, right: &GrayImage) -> GrayImage {
        let (w, h) = left.dimensions();
        let half = self.params.window / 2;
        let max_d = self.params.max_disparity.min(255);
        let mut disparity = GrayImage::new(w, h);

        let sad = |lx: u32, rx: u32, y: u32| -> u32 {
            let mut cost = 0u32;
            for dy in 0..self.params.window {
                for dx in 0..self.params.window {
                    let yy = y + dy - half;
                    let a = left.get_pixel(lx + dx - half, yy).0[0] as i32;
                    let b = right.get_pixel(rx + dx - half, yy).0[0] as i32;
                    cost += (a - b).unsigned_abs();
                }
            }
            cost
        };

        for y in half..h - half {
            for x in half..w - half {
                let mut best = (0u32, u32::MAX);
                for d in 0..=max_d.min(x - half) {
                    let cost = sad(x, x - d, y);
                    if cost < best.1 {
                        best = (d, cost);
                    }
                }
                disparity.put_pixel(x, y, image::Luma([best.0 as u8]));
            }
        }
        disparity
    }
}

impl Stage for StereoStage {
    fn label(&self) -> &str {
        &self.label
    }

    fn execute(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), StageError> {
        if ctx.blocks.len() < 2 {
            return Err(StageError::Failed(
                "stereo matching needs a stereo pair".to_string(),
            ));
        }
        let left = ctx.blocks[0].image.to_luma8();
        let right = ctx.blocks[1].image.to_luma8();
        if left.dimensions() != right.dimensions() {
            return Err(StageError::Failed(format!(
                "stereo pair size mismatch: {:?} vs {:?}",
                left.dimensions(),
                right.dimensions()
            )));
        }
        if left.width() <= self.params.window || left.height() <= self.params.window {
            return Err(StageError::Failed(
                "frame smaller than SAD window".to_string(),
            ));
        }

        let disparity = self.disparity_map(&left, &right);
        let image = DynamicImage::ImageLuma8(disparity);
        if self.show || self.save {
            ctx.outputs.push(
                Block::new(format!("{} Disparity", self.label), image.clone()).with_flags(
                    self.show,
                    self.save,
                    false,
                ),
            );
        }
        ctx.blocks.push(Block::new("disparity", image));
        Ok(())
    }
}
