use serde::Deserialize;
use tracing::debug;

use crate::chain::stage::{FrameContext, Stage};
use crate::config::StageConfig;
use crate::error::{BuildError, StageError};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchParams {
    /// Maximum hamming distance for an accepted match.
    pub max_distance: u32,
    /// Require the best match to hold in both directions.
    pub cross_check: bool,
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            max_distance: 24,
            cross_check: true,
        }
    }
}

/// Brute-force hamming matcher over the first two blocks' descriptors.
/// Both blocks are rewritten to index-aligned matched pairs, so
/// downstream stages can treat `features[k]` on each side as
/// correspondences.
pub struct MatchStage {
    label: String,
    params: MatchParams,
}

pub fn build(cfg: &StageConfig) -> Result<Box<dyn Stage>, BuildError> {
    Ok(Box::new(MatchStage {
        label: cfg.name.clone(),
        params: cfg.decode_params()?,
    }))
}

fn hamming(a: &[u8], b: &[u8]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x ^ y).count_ones())
        .sum()
}

fn best_match(desc: &[u8], against: &[Vec<u8>]) -> Option<(usize, u32)> {
    against
        .iter()
        .enumerate()
        .map(|(i, other)| (i, hamming(desc, other)))
        .min_by_key(|(_, d)| *d)
}

impl Stage for MatchStage {
    fn label(&self) -> &str {
        &self.label
    }

    fn execute(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), StageError> {
        if ctx.blocks.len() < 2 {
            return Err(StageError::Failed(
                "descriptor matching needs a stereo pair".to_string(),
            ));
        }
        let (left, right) = {
            let (l, r) = ctx.blocks.split_at_mut(1);
            (&mut l[0], &mut r[0])
        };
        if left.descriptors.is_empty() || right.descriptors.is_empty() {
            return Err(StageError::Failed(
                "no descriptors to match".to_string(),
            ));
        }

        let mut pairs: Vec<(usize, usize)> = Vec::new();
        for (li, desc) in left.descriptors.iter().enumerate() {
            let Some((ri, dist)) = best_match(desc, &right.descriptors) else {
                continue;
            };
            if dist > self.params.max_distance {
                continue;
            }
            if self.params.cross_check {
                let (back, _) = best_match(&right.descriptors[ri], &left.descriptors).unwrap();
                if back != li {
                    continue;
                }
            }
            pairs.push((li, ri));
        }
        if pairs.is_empty() {
            return Err(StageError::Failed("no descriptor matches".to_string()));
        }
        debug!(matches = pairs.len(), "descriptors matched");
        ctx.run.metrics.record(
            &format!("{}_n", self.label),
            ctx.run.frame_id,
            pairs.len() as f32,
        );

        let keep = |block: &mut crate::block::Block, idx: &[usize]| {
            block.features = idx.iter().map(|&i| block.features[i]).collect();
            block.descriptors = idx.iter().map(|&i| block.descriptors[i].clone()).collect();
        };
        let left_idx: Vec<usize> = pairs.iter().map(|&(l, _)| l).collect();
        let right_idx: Vec<usize> = pairs.iter().map(|&(_, r)| r).collect();
        keep(left, &left_idx);
        keep(right, &right_idx);
        Ok(())
    }
}
