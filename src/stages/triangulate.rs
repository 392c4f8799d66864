use serde::Deserialize;
use tracing::debug;

use crate::block::Block;
use crate::chain::stage::{FrameContext, Stage};
use crate::config::StageConfig;
use crate::error::{BuildError, StageError};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TriangulateParams {
    /// Focal length in pixels.
    pub focal: f32,
    /// Stereo baseline in world units.
    pub baseline: f32,
    pub min_disparity: u8,
    /// Sample every nth pixel in both directions.
    pub step: u32,
    /// Name of the disparity block to consume.
    pub disparity_block: String,
}

impl Default for TriangulateParams {
    fn default() -> Self {
        Self {
            focal: 520.0,
            baseline: 0.12,
            min_disparity: 1,
            step: 2,
            disparity_block: "disparity".to_string(),
        }
    }
}

/// Back-projects a disparity map into a colored point cloud:
/// z = f·b/d, x and y from the pinhole model around the image center.
pub struct TriangulateStage {
    label: String,
    params: TriangulateParams,
}

pub fn build(cfg: &StageConfig) -> Result<Box<dyn Stage>, BuildError> {
    let params: TriangulateParams = cfg.decode_params()?;
    if params.focal <= 0.0 || params.baseline <= 0.0 || params.step == 0 {
        return Err(BuildError::MissingParam {
            name: cfg.name.clone(),
            what: "positive focal, baseline and step".to_string(),
        });
    }
    Ok(Box::new(TriangulateStage {
        label: cfg.name.clone(),
        params,
    }))
}

impl Stage for TriangulateStage {
    fn label(&self) -> &str {
        &self.label
    }

    fn execute(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), StageError> {
        let disparity = ctx
            .blocks
            .iter()
            .rfind(|b| b.name == self.params.disparity_block)
            .ok_or_else(|| {
                StageError::Failed(format!(
                    "no [{}] block to triangulate",
                    self.params.disparity_block
                ))
            })?;
        let map = disparity.image.to_luma8();
        let (w, h) = map.dimensions();
        let cx = w as f32 / 2.0;
        let cy = h as f32 / 2.0;

        let color_source = ctx.blocks.first().and_then(|b| {
            (b.image.width() == w && b.image.height() == h).then(|| b.image.to_rgb8())
        });

        let mut points = Vec::new();
        let mut colors = color_source.is_some().then(Vec::new);
        for y in (0..h).step_by(self.params.step as usize) {
            for x in (0..w).step_by(self.params.step as usize) {
                let d = map.get_pixel(x, y).0[0];
                if d < self.params.min_disparity.max(1) {
                    continue;
                }
                let z = self.params.focal * self.params.baseline / d as f32;
                points.push([
                    (x as f32 - cx) * z / self.params.focal,
                    (y as f32 - cy) * z / self.params.focal,
                    z,
                ]);
                if let (Some(colors), Some(rgb)) = (colors.as_mut(), color_source.as_ref()) {
                    let p = rgb.get_pixel(x, y).0;
                    colors.push([
                        p[0] as f32 / 255.0,
                        p[1] as f32 / 255.0,
                        p[2] as f32 / 255.0,
                    ]);
                }
            }
        }
        if points.is_empty() {
            return Err(StageError::Failed("empty point cloud".to_string()));
        }
        debug!(points = points.len(), "cloud reconstructed");
        ctx.run.metrics.record(
            &format!("{}_n", self.label),
            ctx.run.frame_id,
            points.len() as f32,
        );

        let cloud = Block::cloud(format!("{} Cloud", self.label), points, colors);
        let mut published = cloud.clone();
        published.publish = true;
        ctx.outputs.push(published);
        ctx.blocks.push(cloud);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TaskCategory;
    use crate::testutil::Harness;
    use image::{DynamicImage, GrayImage};

    fn disparity_block(w: u32, h: u32, d: u8) -> Block {
        let map = GrayImage::from_pixel(w, h, image::Luma([d]));
        Block::new("disparity", DynamicImage::ImageLuma8(map))
    }

    fn stage() -> TriangulateStage {
        TriangulateStage {
            label: "tri".to_string(),
            params: TriangulateParams {
                focal: 100.0,
                baseline: 0.5,
                step: 4,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_constant_disparity_yields_constant_depth() {
        let left = Block::new("left", DynamicImage::new_rgb8(16, 16));
        let mut harness = Harness::new(
            TaskCategory::Cloud,
            vec![left, disparity_block(16, 16, 10)],
        );
        stage().execute(&mut harness.ctx()).unwrap();
        let cloud = harness.blocks.last().unwrap();
        let points = cloud.points.as_ref().unwrap();
        assert!(!points.is_empty());
        for p in points {
            assert!((p[2] - 5.0).abs() < 1e-5); // z = 100 * 0.5 / 10
        }
        // Colors align with points and the published copy is flagged.
        assert_eq!(cloud.colors.as_ref().unwrap().len(), points.len());
        assert!(harness.outputs.last().unwrap().publish);
    }

    #[test]
    fn test_zero_disparity_everywhere_fails() {
        let mut harness = Harness::new(TaskCategory::Cloud, vec![disparity_block(16, 16, 0)]);
        assert!(stage().execute(&mut harness.ctx()).is_err());
    }

    #[test]
    fn test_missing_disparity_block_fails() {
        let left = Block::new("left", DynamicImage::new_rgb8(16, 16));
        let mut harness = Harness::new(TaskCategory::Cloud, vec![left]);
        assert!(stage().execute(&mut harness.ctx()).is_err());
    }
}
