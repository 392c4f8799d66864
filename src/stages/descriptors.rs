use image::GrayImage;
use serde::Deserialize;

use crate::chain::stage::{FrameContext, Stage};
use crate::config::StageConfig;
use crate::error::{BuildError, StageError};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DescriptorParams {
    /// Square patch side; one descriptor bit per patch pixel.
    pub patch: u32,
}

impl Default for DescriptorParams {
    fn default() -> Self {
        Self { patch: 8 }
    }
}

/// Binary patch descriptor: each keypoint's surrounding patch is
/// thresholded against its own mean intensity, one bit per pixel.
pub struct DescriptorStage {
    label: String,
    params: DescriptorParams,
}

pub fn build(cfg: &StageConfig) -> Result<Box<dyn Stage>, BuildError> {
    Ok(Box::new(DescriptorStage {
        label: cfg.name.clone(),
        params: cfg.decode_params()?,
    }))
}

fn describe(gray: &GrayImage, center: [f32; 2], patch: u32) -> Vec<u8> {
    let (w, h) = gray.dimensions();
    let half = (patch / 2) as i32;
    let cx = center[0] as i32;
    let cy = center[1] as i32;

    let mut samples = Vec::with_capacity((patch * patch) as usize);
    let mut sum = 0u32;
    for dy in -half..(patch as i32 - half) {
        for dx in -half..(patch as i32 - half) {
            let x = (cx + dx).clamp(0, w as i32 - 1) as u32;
            let y = (cy + dy).clamp(0, h as i32 - 1) as u32;
            let v = gray.get_pixel(x, y).0[0];
            samples.push(v);
            sum += v as u32;
        }
    }
    let mean = (sum / samples.len() as u32) as u8;

    let mut bits = vec![0u8; samples.len().div_ceil(8)];
    for (i, v) in samples.iter().enumerate() {
        if *v > mean {
            bits[i / 8] |= 1 << (i % 8);
        }
    }
    bits
}

impl Stage for DescriptorStage {
    fn label(&self) -> &str {
        &self.label
    }

    fn execute(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), StageError> {
        for block in ctx.blocks.iter_mut() {
            if block.features.is_empty() {
                return Err(StageError::Failed(format!(
                    "no feature points to describe in [{}]",
                    block.name
                )));
            }
            let gray = block.image.to_luma8();
            block.descriptors = block
                .features
                .iter()
                .map(|p| describe(&gray, *p, self.params.patch))
                .collect();
        }
        Ok(())
    }
}
