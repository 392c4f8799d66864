use image::DynamicImage;
use serde::Deserialize;
use tracing::debug;

use crate::block::{Block, Rect};
use crate::chain::stage::{FrameContext, Stage};
use crate::config::StageConfig;
use crate::error::{BuildError, StageError};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectParams {
    /// Grayscale cutoff separating target from background.
    pub threshold: u8,
    /// Minimum number of qualifying pixels for a detection.
    pub min_area: u32,
    /// Detect dark-on-bright targets instead.
    pub invert: bool,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            threshold: 200,
            min_area: 25,
            invert: false,
        }
    }
}

/// Intensity-blob detector: bounding box of all pixels past the
/// threshold. Doubles as the delegation target for tracker
/// reinitialization.
pub struct DetectStage {
    label: String,
    show: bool,
    save: bool,
    params: DetectParams,
}

pub fn build(cfg: &StageConfig) -> Result<Box<dyn Stage>, BuildError> {
    Ok(Box::new(DetectStage {
        label: cfg.name.clone(),
        show: cfg.show,
        save: cfg.save,
        params: cfg.decode_params()?,
    }))
}

impl DetectStage {
    pub fn from_params(label: impl Into<String>, params: DetectParams) -> Self {
        Self {
            label: label.into(),
            show: false,
            save: false,
            params,
        }
    }

    /// One rectangle per image, or None when nothing qualifies.
    pub fn detect_rect(&self, image: &DynamicImage) -> Option<Rect> {
        let gray = image.to_luma8();
        let mut min_x = u32::MAX;
        let mut min_y = u32::MAX;
        let mut max_x = 0u32;
        let mut max_y = 0u32;
        let mut area = 0u32;
        for (x, y, pixel) in gray.enumerate_pixels() {
            let hit = if self.params.invert {
                pixel.0[0] <= self.params.threshold
            } else {
                pixel.0[0] >= self.params.threshold
            };
            if hit {
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
                area += 1;
            }
        }
        if area == 0 || area < self.params.min_area {
            return None;
        }
        Some(Rect::new(
            min_x as i32,
            min_y as i32,
            max_x - min_x + 1,
            max_y - min_y + 1,
        ))
    }
}

impl Stage for DetectStage {
    fn label(&self) -> &str {
        &self.label
    }

    fn execute(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), StageError> {
        let publish = ctx.run.task.wants_roi_publish();
        for (i, block) in ctx.blocks.iter_mut().enumerate() {
            let rect = self.detect_rect(&block.image).ok_or_else(|| {
                StageError::Failed(format!("no target found in [{}]", block.name))
            })?;
            debug!(block = %block.name, ?rect, "target detected");
            block.roi = rect;
            let area = (rect.width * rect.height) as f32;
            ctx.run
                .metrics
                .record(&format!("{}{}_area", self.label, i), ctx.run.frame_id, area);
            if self.show || self.save || publish {
                let crop = block.image.crop_imm(
                    rect.x.max(0) as u32,
                    rect.y.max(0) as u32,
                    rect.width,
                    rect.height,
                );
                ctx.outputs.push(
                    Block::new(format!("{} Detect", block.name), crop).with_flags(
                        self.show,
                        self.save,
                        publish,
                    ),
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TaskCategory;
    use crate::testutil::{bright_box_frame, Harness};

    fn stage(params: serde_json::Value) -> Box<dyn Stage> {
        let cfg: StageConfig = serde_json::from_value(serde_json::json!({
            "name": "det", "prev": "det", "next": "det", "kind": "detect",
            "params": params
        }))
        .unwrap();
        build(&cfg).unwrap()
    }

    #[test]
    fn test_detects_bright_box_bounds() {
        let detector = DetectStage::from_params("det", DetectParams::default());
        let frame = bright_box_frame(64, 48, 20, 10, 12, 8);
        let rect = detector.detect_rect(&frame).unwrap();
        assert_eq!(rect, Rect::new(20, 10, 12, 8));
    }

    #[test]
    fn test_small_blob_below_min_area_is_no_detection() {
        let detector = DetectStage::from_params(
            "det",
            DetectParams {
                min_area: 100,
                ..Default::default()
            },
        );
        let frame = bright_box_frame(64, 48, 20, 10, 5, 5);
        assert!(detector.detect_rect(&frame).is_none());
    }

    #[test]
    fn test_execute_writes_roi_and_fails_without_target() {
        let mut stage = stage(serde_json::json!({}));
        let mut harness = Harness::new(
            TaskCategory::Detect,
            vec![Block::new("left", bright_box_frame(64, 48, 8, 8, 10, 10))],
        );
        stage.execute(&mut harness.ctx()).unwrap();
        assert_eq!(harness.blocks[0].roi, Rect::new(8, 8, 10, 10));
        // Detect task publishes the crop even with show/save off.
        assert_eq!(harness.outputs.len(), 1);
        assert!(harness.outputs[0].publish);

        let dark = bright_box_frame(64, 48, 0, 0, 0, 0);
        let mut harness = Harness::new(TaskCategory::Detect, vec![Block::new("left", dark)]);
        assert!(stage.execute(&mut harness.ctx()).is_err());
    }
}
