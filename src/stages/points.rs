use image::GrayImage;
use serde::Deserialize;

use crate::chain::stage::{FrameContext, Stage};
use crate::config::StageConfig;
use crate::error::{BuildError, StageError};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PointParams {
    pub max_points: usize,
    /// Minimum gradient response for a corner candidate.
    pub threshold: f32,
}

impl Default for PointParams {
    fn default() -> Self {
        Self {
            max_points: 200,
            threshold: 24.0,
        }
    }
}

/// Corner detector: keeps pixels whose horizontal and vertical gradients
/// are both strong and locally maximal, strongest first.
pub struct PointStage {
    label: String,
    params: PointParams,
}

pub fn build(cfg: &StageConfig) -> Result<Box<dyn Stage>, BuildError> {
    Ok(Box::new(PointStage {
        label: cfg.name.clone(),
        params: cfg.decode_params()?,
    }))
}

fn corner_response(gray: &GrayImage, x: u32, y: u32) -> f32 {
    let at = |x: u32, y: u32| gray.get_pixel(x, y).0[0] as f32;
    let gx = (at(x + 1, y) - at(x - 1, y)).abs();
    let gy = (at(x, y + 1) - at(x, y - 1)).abs();
    gx.min(gy)
}

impl PointStage {
    fn find_corners(&self, gray: &GrayImage) -> Vec<[f32; 2]> {
        let (w, h) = gray.dimensions();
        if w < 3 || h < 3 {
            return Vec::new();
        }
        let mut candidates: Vec<(f32, [f32; 2])> = Vec::new();
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let score = corner_response(gray, x, y);
                if score < self.params.threshold {
                    continue;
                }
                // 3x3 non-maximum suppression.
                let mut is_max = true;
                'window: for dy in -1i32..=1 {
                    for dx in -1i32..=1 {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let nx = (x as i32 + dx) as u32;
                        let ny = (y as i32 + dy) as u32;
                        if nx >= 1 && nx < w - 1 && ny >= 1 && ny < h - 1 {
                            if corner_response(gray, nx, ny) > score {
                                is_max = false;
                                break 'window;
                            }
                        }
                    }
                }
                if is_max {
                    candidates.push((score, [x as f32, y as f32]));
                }
            }
        }
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));
        candidates.truncate(self.params.max_points);
        candidates.into_iter().map(|(_, p)| p).collect()
    }
}

impl Stage for PointStage {
    fn label(&self) -> &str {
        &self.label
    }

    fn execute(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), StageError> {
        for (i, block) in ctx.blocks.iter_mut().enumerate() {
            let gray = block.image.to_luma8();
            let points = self.find_corners(&gray);
            if points.is_empty() {
                return Err(StageError::Failed(format!(
                    "no feature points in [{}]",
                    block.name
                )));
            }
            let count = points.len() as f32;
            ctx.run
                .metrics
                .record(&format!("{}{}_n", self.label, i), ctx.run.frame_id, count);
            block.features = points;
            block.descriptors.clear();
        }
        Ok(())
    }
}
