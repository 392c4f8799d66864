pub mod backend;

use image::{DynamicImage, GrayImage};
use serde::Deserialize;
use std::time::Instant;
use tracing::{debug, info};

use crate::block::{scale_len, Block, Rect};
use crate::chain::stage::{FrameContext, Stage};
use crate::config::StageConfig;
use crate::error::{BuildError, StageError};
use crate::stages::detect::{DetectParams, DetectStage};
use backend::{BackendParams, NegStrategy, TrackKind, TrackerBackend};

/// How the target rectangle is established on (re)initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InitKind {
    /// Operator picks a rectangle through the display surface.
    Manual,
    /// Configured per-camera rectangle list.
    List,
    /// Centered rectangle sized from the frame dimensions.
    #[default]
    Auto,
    /// Delegated to an auxiliary detection stage.
    Detect,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackParams {
    pub init: InitKind,
    pub track: TrackKind,
    /// Reinitialize whenever frame id is a multiple of this.
    pub reinit_period: u64,
    pub min_rects: usize,
    pub max_rects: usize,
    pub num_feat: usize,
    pub num_sel: usize,
    pub learn_rate: f32,
    pub search_radius: u32,
    pub pos_radius: u32,
    pub init_pos_radius: u32,
    pub pos_max: usize,
    pub neg: usize,
    pub init_neg: usize,
    pub neg_strategy: NegStrategy,
    /// Uniform processing scale; mutually exclusive with the fixed
    /// processing size below.
    pub scale: Option<f32>,
    pub proc_width: Option<u32>,
    pub proc_height: Option<u32>,
    /// Init rectangles for `list` mode, source coordinates. Cameras past
    /// the end of the list reuse the first entry.
    pub rects: Vec<Rect>,
    /// The auto-centered vertical offset historically derives from the
    /// rectangle width; switch off to use the height instead.
    pub center_y_from_width: bool,
    /// Params for the delegated detector in `detect` mode.
    pub detect: Option<serde_json::Value>,
}

impl Default for TrackParams {
    fn default() -> Self {
        Self {
            init: InitKind::Auto,
            track: TrackKind::Mil,
            reinit_period: 100,
            min_rects: 2,
            max_rects: 6,
            num_feat: 250,
            num_sel: 50,
            learn_rate: 0.85,
            search_radius: 25,
            pos_radius: 4,
            init_pos_radius: 3,
            pos_max: 100,
            neg: 65,
            init_neg: 65,
            neg_strategy: NegStrategy::Ring,
            scale: None,
            proc_width: None,
            proc_height: None,
            rects: Vec::new(),
            center_y_from_width: true,
            detect: None,
        }
    }
}

impl TrackParams {
    fn backend_params(&self) -> BackendParams {
        BackendParams {
            min_rects: self.min_rects,
            max_rects: self.max_rects,
            num_feat: self.num_feat,
            num_sel: self.num_sel,
            learn_rate: self.learn_rate,
            search_radius: self.search_radius,
            pos_radius: self.pos_radius,
            init_pos_radius: self.init_pos_radius,
            pos_max: self.pos_max,
            neg_count: self.neg,
            init_neg_count: self.init_neg,
            neg_strategy: self.neg_strategy,
        }
    }
}

/// Per-camera persistent tracker state; lives from one reinitialization
/// to the next.
struct CameraTracker {
    source_size: (u32, u32),
    proc_size: (u32, u32),
    x_factor: f32,
    y_factor: f32,
    /// Current target window in processing coordinates.
    rect: Rect,
    backend: Box<dyn TrackerBackend>,
}

/// Online visual tracking with per-camera scale bookkeeping and a
/// reinitialization state machine. The stage-contract exemplar: state
/// persists across frames, reinit failure latches the forced-reinit flag,
/// and an image-size change since the last reinit is fatal.
pub struct TrackStage {
    label: String,
    show: bool,
    save: bool,
    params: TrackParams,
    detector: Option<DetectStage>,
    cameras: Vec<CameraTracker>,
}

pub fn build(cfg: &StageConfig) -> Result<Box<dyn Stage>, BuildError> {
    let params: TrackParams = cfg.decode_params()?;
    if params.reinit_period == 0 {
        return Err(BuildError::MissingParam {
            name: cfg.name.clone(),
            what: "non-zero reinit period".to_string(),
        });
    }
    match params.scale {
        Some(s) if s <= 0.0 => {
            return Err(BuildError::MissingParam {
                name: cfg.name.clone(),
                what: "positive scale factor".to_string(),
            });
        }
        Some(_) => {}
        None => {
            if params.proc_width.is_none() || params.proc_height.is_none() {
                return Err(BuildError::MissingParam {
                    name: cfg.name.clone(),
                    what: "scale, or proc_width and proc_height".to_string(),
                });
            }
        }
    }
    if params.init == InitKind::List && params.rects.is_empty() {
        return Err(BuildError::MissingParam {
            name: cfg.name.clone(),
            what: "init rectangles for list mode".to_string(),
        });
    }
    let detector = match params.init {
        InitKind::Detect => {
            let value = params.detect.clone().ok_or_else(|| BuildError::MissingParam {
                name: cfg.name.clone(),
                what: "detect params for delegated init".to_string(),
            })?;
            let detect_params: DetectParams =
                serde_json::from_value(value).map_err(|e| BuildError::InvalidParams {
                    name: cfg.name.clone(),
                    source: e,
                })?;
            Some(DetectStage::from_params(format!("{} init", cfg.name), detect_params))
        }
        _ => None,
    };
    Ok(Box::new(TrackStage {
        label: cfg.name.clone(),
        show: cfg.show,
        save: cfg.save,
        params,
        detector,
        cameras: Vec::new(),
    }))
}

/// Reinit fires on frame 0, on the forced flag, and on period multiples;
/// never otherwise.
pub fn should_reinit(frame_id: u64, forced: bool, period: u64) -> bool {
    frame_id == 0 || forced || frame_id % period == 0
}

fn processing_frame(image: &DynamicImage, size: (u32, u32)) -> GrayImage {
    image
        .resize_exact(size.0, size.1, image::imageops::FilterType::Triangle)
        .to_luma8()
}

impl TrackStage {
    /// Processing size and per-axis mapping factors for a source size.
    fn scaling_for(&self, source: (u32, u32)) -> ((u32, u32), f32, f32) {
        if let Some(s) = self.params.scale {
            ((scale_len(source.0, s), scale_len(source.1, s)), s, s)
        } else {
            let pw = self.params.proc_width.unwrap();
            let ph = self.params.proc_height.unwrap();
            (
                (pw, ph),
                pw as f32 / source.0 as f32,
                ph as f32 / source.1 as f32,
            )
        }
    }

    fn initial_rect(
        &self,
        camera_index: usize,
        block: &Block,
        display: &mut dyn crate::display::DisplaySurface,
    ) -> Result<Rect, StageError> {
        match self.params.init {
            InitKind::Manual => display
                .select_rect(&block.name, &block.image)
                .ok_or_else(|| {
                    StageError::ReinitFailed(format!("no rectangle selected for [{}]", block.name))
                }),
            InitKind::List => {
                let rects = &self.params.rects;
                Ok(*rects.get(camera_index).unwrap_or(&rects[0]))
            }
            InitKind::Auto => {
                let width = block.image.width() / 12;
                let height = block.image.height() / 8;
                let y_span = if self.params.center_y_from_width {
                    width
                } else {
                    height
                };
                Ok(Rect::new(
                    block.roi.width as i32 / 2 - width as i32 / 2,
                    block.roi.height as i32 / 2 - y_span as i32 / 2,
                    width.max(1),
                    height.max(1),
                ))
            }
            InitKind::Detect => {
                let detector = self.detector.as_ref().expect("detector built for detect mode");
                detector.detect_rect(&block.image).ok_or_else(|| {
                    StageError::ReinitFailed(format!(
                        "delegated detection found nothing in [{}]",
                        block.name
                    ))
                })
            }
        }
    }

    fn reinitialize(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), StageError> {
        if ctx.blocks.is_empty() {
            return Err(StageError::ReinitFailed("no input frames".to_string()));
        }
        self.cameras.clear();
        let frame_id = ctx.run.frame_id;
        for i in 0..ctx.blocks.len() {
            let init_rect = self.initial_rect(i, &ctx.blocks[i], ctx.display)?;
            let block = &ctx.blocks[i];
            let source_size = (block.image.width(), block.image.height());
            let (proc_size, x_factor, y_factor) = self.scaling_for(source_size);
            let rect = init_rect.scaled(x_factor, y_factor);
            let mut backend = backend::create(self.params.track, &self.params.backend_params());

            let gray = processing_frame(&block.image, proc_size);
            let started = Instant::now();
            backend.train_first(&gray, rect);
            let elapsed_ms = started.elapsed().as_secs_f32() * 1e3;
            ctx.run.metrics.record(
                &format!("{}{}_t", self.label, i),
                frame_id,
                elapsed_ms,
            );
            debug!(camera = i, ?init_rect, ?proc_size, "tracker trained");

            self.cameras.push(CameraTracker {
                source_size,
                proc_size,
                x_factor,
                y_factor,
                rect,
                backend,
            });
        }
        info!(trackers = self.cameras.len(), "trackers created");
        Ok(())
    }

    fn check_sizes(&self, blocks: &[Block]) -> Result<(), StageError> {
        if blocks.len() != self.cameras.len() {
            return Err(StageError::Failed(format!(
                "camera count changed from {} to {}",
                self.cameras.len(),
                blocks.len()
            )));
        }
        for (camera, block) in self.cameras.iter().zip(blocks) {
            let actual = (block.image.width(), block.image.height());
            if actual != camera.source_size {
                return Err(StageError::SizeDrift {
                    expected: camera.source_size,
                    actual,
                });
            }
        }
        Ok(())
    }

    fn track_frame(&mut self, ctx: &mut FrameContext<'_>) {
        let frame_id = ctx.run.frame_id;
        for (i, (camera, block)) in self.cameras.iter_mut().zip(ctx.blocks.iter()).enumerate() {
            let gray = processing_frame(&block.image, camera.proc_size);
            let started = Instant::now();
            camera.rect = camera.backend.track(&gray, camera.rect);
            let elapsed_ms = started.elapsed().as_secs_f32() * 1e3;
            ctx.run
                .metrics
                .record(&format!("{}{}_t", self.label, i), frame_id, elapsed_ms);
        }
    }

    /// Map tracked windows back to source resolution, write them into the
    /// block ROIs, emit cropped display copies, and record the rectangle
    /// series.
    fn recover_scale(&mut self, ctx: &mut FrameContext<'_>) {
        let frame_id = ctx.run.frame_id;
        let publish = ctx.run.task.wants_roi_publish();
        for (i, (camera, block)) in self.cameras.iter().zip(ctx.blocks.iter_mut()).enumerate() {
            let rect = camera
                .rect
                .scaled(1.0 / camera.x_factor, 1.0 / camera.y_factor)
                .clamped(camera.source_size.0, camera.source_size.1);
            block.roi = rect;

            for (suffix, value) in [
                ("x", rect.x as f32),
                ("y", rect.y as f32),
                ("wd", rect.width as f32),
                ("ht", rect.height as f32),
            ] {
                ctx.run.metrics.record(
                    &format!("{}{}_{}", self.label, i, suffix),
                    frame_id,
                    value,
                );
            }

            if (self.show || self.save || publish) && !rect.is_empty() {
                let crop = block
                    .image
                    .crop_imm(rect.x as u32, rect.y as u32, rect.width, rect.height);
                ctx.outputs.push(
                    Block::new(format!("{} Track", block.name), crop).with_flags(
                        self.show,
                        self.save,
                        publish,
                    ),
                );
            }
        }
    }
}

impl Stage for TrackStage {
    fn label(&self) -> &str {
        &self.label
    }

    fn execute(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), StageError> {
        let frame_id = ctx.run.frame_id;
        if should_reinit(frame_id, ctx.run.reinit_requested, self.params.reinit_period) {
            ctx.run.reinit_requested = false;
            if let Err(e) = self.reinitialize(ctx) {
                // Latch the flag so the next frame tries again; this
                // frame is reported failed.
                ctx.run.reinit_requested = true;
                self.cameras.clear();
                return Err(e);
            }
        } else {
            self.check_sizes(ctx.blocks)?;
            self.track_frame(ctx);
        }
        self.recover_scale(ctx);
        Ok(())
    }
}
