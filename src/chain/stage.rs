use crate::block::{Block, WorldState};
use crate::context::RunContext;
use crate::display::DisplaySurface;
use crate::error::StageError;

/// Everything a stage sees for one frame: the run context, the block list
/// it transforms in place, the display/output list it appends to, the
/// world-state handle (present only for stages registered as 3-D
/// producers/consumers), and the display surface for stages that need
/// operator interaction.
pub struct FrameContext<'a> {
    pub run: &'a mut RunContext,
    pub blocks: &'a mut Vec<Block>,
    pub outputs: &'a mut Vec<Block>,
    pub world: Option<&'a mut WorldState>,
    pub display: &'a mut dyn DisplaySurface,
}

/// The uniform per-frame operation every pipeline unit implements.
/// Stages may keep arbitrary internal state between calls; a non-fatal
/// error truncates the rest of the chain for the current frame only.
pub trait Stage {
    fn label(&self) -> &str;

    fn execute(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), StageError>;
}
