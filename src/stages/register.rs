use serde::Deserialize;
use tracing::debug;

use crate::chain::stage::{FrameContext, Stage};
use crate::config::StageConfig;
use crate::error::{BuildError, StageError};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegisterParams {
    /// Value written to the world fetch flag once a pose is available.
    pub fetch_kind: i32,
}

impl Default for RegisterParams {
    fn default() -> Self {
        Self { fetch_kind: 1 }
    }
}

/// Pose estimation over the frame's point cloud: the cloud centroid
/// becomes the world translation and the dominant in-plane axis the yaw.
/// Writes the frame's WorldState and arms its fetch flag.
pub struct RegisterStage {
    label: String,
    params: RegisterParams,
}

pub fn build(cfg: &StageConfig) -> Result<Box<dyn Stage>, BuildError> {
    Ok(Box::new(RegisterStage {
        label: cfg.name.clone(),
        params: cfg.decode_params()?,
    }))
}

impl Stage for RegisterStage {
    fn label(&self) -> &str {
        &self.label
    }

    fn execute(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), StageError> {
        let cloud = ctx
            .blocks
            .iter()
            .rfind(|b| b.points.as_ref().is_some_and(|p| !p.is_empty()))
            .ok_or_else(|| StageError::Failed("no point cloud to register".to_string()))?;
        let points = cloud.points.as_ref().unwrap();

        let n = points.len() as f32;
        let mut centroid = [0.0f32; 3];
        for p in points {
            centroid[0] += p[0];
            centroid[1] += p[1];
            centroid[2] += p[2];
        }
        centroid.iter_mut().for_each(|v| *v /= n);

        // In-plane orientation from the x/z covariance of the cloud.
        let (mut sxx, mut sxz, mut szz) = (0.0f32, 0.0f32, 0.0f32);
        for p in points {
            let dx = p[0] - centroid[0];
            let dz = p[2] - centroid[2];
            sxx += dx * dx;
            sxz += dx * dz;
            szz += dz * dz;
        }
        let yaw = (2.0 * sxz).atan2(sxx - szz) / 2.0;

        let world = ctx
            .world
            .as_deref_mut()
            .ok_or_else(|| StageError::Failed("no world handle".to_string()))?;
        world.x = centroid[0];
        world.y = centroid[1];
        world.z = centroid[2];
        world.a = 0.0;
        world.b = yaw;
        world.c = 0.0;
        world.fetch_kind = self.params.fetch_kind;

        debug!(x = world.x, y = world.y, z = world.z, yaw, "pose registered");
        ctx.run
            .metrics
            .record(&format!("{}_z", self.label), ctx.run.frame_id, world.z);
        Ok(())
    }
}
