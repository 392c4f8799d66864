use image::{DynamicImage, RgbImage};
use serde::Deserialize;

use crate::block::Block;
use crate::chain::stage::{FrameContext, Stage};
use crate::config::StageConfig;
use crate::error::{BuildError, StageError};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SegmentParams {
    /// Superpixel cell side in pixels.
    pub cell: u32,
}

impl Default for SegmentParams {
    fn default() -> Self {
        Self { cell: 16 }
    }
}

/// Grid segmentation: every cell collapses to its mean color. The
/// segmented view goes to the output list; the working image is left
/// untouched.
pub struct SegmentStage {
    label: String,
    show: bool,
    save: bool,
    params: SegmentParams,
}

pub fn build(cfg: &StageConfig) -> Result<Box<dyn Stage>, BuildError> {
    let params: SegmentParams = cfg.decode_params()?;
    if params.cell == 0 {
        return Err(BuildError::MissingParam {
            name: cfg.name.clone(),
            what: "non-zero cell size".to_string(),
        });
    }
    Ok(Box::new(SegmentStage {
        label: cfg.name.clone(),
        show: cfg.show,
        save: cfg.save,
        params,
    }))
}

fn segment(image: &DynamicImage, cell: u32) -> DynamicImage {
    let rgb = image.to_rgb8();
    let (w, h) = rgb.dimensions();
    let mut out = RgbImage::new(w, h);
    for cy in (0..h).step_by(cell as usize) {
        for cx in (0..w).step_by(cell as usize) {
            let cw = cell.min(w - cx);
            let ch = cell.min(h - cy);
            let mut sum = [0u32; 3];
            for y in cy..cy + ch {
                for x in cx..cx + cw {
                    let p = rgb.get_pixel(x, y).0;
                    sum[0] += p[0] as u32;
                    sum[1] += p[1] as u32;
                    sum[2] += p[2] as u32;
                }
            }
            let area = cw * ch;
            let mean = image::Rgb([
                (sum[0] / area) as u8,
                (sum[1] / area) as u8,
                (sum[2] / area) as u8,
            ]);
            for y in cy..cy + ch {
                for x in cx..cx + cw {
                    out.put_pixel(x, y, mean);
                }
            }
        }
    }
    DynamicImage::ImageRgb8(out)
}

impl Stage for SegmentStage {
    fn label(&self) -> &str {
        &self.label
    }

    fn execute(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), StageError> {
        for block in ctx.blocks.iter() {
            let segmented = segment(&block.image, self.params.cell);
            ctx.outputs.push(
                Block::new(format!("{} Segment", block.name), segmented).with_flags(
                    self.show,
                    self.save,
                    false,
                ),
            );
        }
        Ok(())
    }
}
