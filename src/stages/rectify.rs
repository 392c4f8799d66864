use image::{DynamicImage, RgbImage};
use serde::Deserialize;

use crate::chain::stage::{FrameContext, Stage};
use crate::config::StageConfig;
use crate::error::{BuildError, StageError};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RectifyParams {
    /// Vertical misalignment of the right camera, in pixels. Positive
    /// moves the right image content up.
    pub row_offset: i32,
}

/// Epipolar alignment for a calibrated rig whose only residual error is a
/// vertical offset: shifts the right image by the configured row count so
/// stereo matching can search along rows.
pub struct RectifyStage {
    label: String,
    params: RectifyParams,
}

pub fn build(cfg: &StageConfig) -> Result<Box<dyn Stage>, BuildError> {
    Ok(Box::new(RectifyStage {
        label: cfg.name.clone(),
        params: cfg.decode_params()?,
    }))
}

fn shift_rows(image: &DynamicImage, offset: i32) -> DynamicImage {
    let rgb = image.to_rgb8();
    let (w, h) = rgb.dimensions();
    let mut out = RgbImage::new(w, h);
    for y in 0..h {
        let src_y = y as i32 + offset;
        if src_y < 0 || src_y >= h as i32 {
            continue;
        }
        for x in 0..w {
            out.put_pixel(x, y, *rgb.get_pixel(x, src_y as u32));
        }
    }
    DynamicImage::ImageRgb8(out)
}

impl Stage for RectifyStage {
    fn label(&self) -> &str {
        &self.label
    }

    fn execute(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), StageError> {
        if ctx.blocks.len() < 2 {
            return Err(StageError::Failed(
                "rectification needs a stereo pair".to_string(),
            ));
        }
        if self.params.row_offset != 0 {
            let right = &mut ctx.blocks[1];
            right.image = shift_rows(&right.image, self.params.row_offset);
        }
        Ok(())
    }
}
