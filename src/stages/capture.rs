use serde::Deserialize;

use crate::block::Block;
use crate::chain::stage::{FrameContext, Stage};
use crate::config::StageConfig;
use crate::error::{BuildError, StageError};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CaptureParams {
    /// Flag the raw frames for the host data channel.
    pub publish: bool,
}

/// Entry stage: stamps output routing on the raw source frames so they
/// reach the display surface and/or host before anything touches them.
pub struct CaptureStage {
    label: String,
    show: bool,
    save: bool,
    params: CaptureParams,
}

pub fn build(cfg: &StageConfig) -> Result<Box<dyn Stage>, BuildError> {
    Ok(Box::new(CaptureStage {
        label: cfg.name.clone(),
        show: cfg.show,
        save: cfg.save,
        params: cfg.decode_params()?,
    }))
}

impl Stage for CaptureStage {
    fn label(&self) -> &str {
        &self.label
    }

    fn execute(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), StageError> {
        if ctx.blocks.is_empty() {
            return Err(StageError::Failed("no input frames".to_string()));
        }
        if self.show || self.save || self.params.publish {
            for block in ctx.blocks.iter() {
                ctx.outputs.push(
                    Block::new(block.name.clone(), block.image.clone()).with_flags(
                        self.show,
                        self.save,
                        self.params.publish,
                    ),
                );
            }
        }
        Ok(())
    }
}
