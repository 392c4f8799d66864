use chrono::Local;
use uuid::Uuid;

use crate::metrics::MetricSheet;

/// Task classification recorded per chain node at build time. The chain's
/// overall classification (the last node's) drives the host publish
/// policy for region-of-interest crops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskCategory {
    #[default]
    None,
    Show,
    Detect,
    Points,
    Descriptors,
    Match,
    StereoMatch,
    Cloud,
    Registration,
    Rectify,
    Segment,
}

impl TaskCategory {
    /// Whether tracked/detected region crops should be flagged for the
    /// host data channel under this task.
    pub fn wants_roi_publish(&self) -> bool {
        matches!(
            self,
            TaskCategory::Detect | TaskCategory::Cloud | TaskCategory::Registration
        )
    }
}

/// Explicit per-run state threaded through the frame loop and every stage
/// call: one of these exists per run, created before the first frame and
/// dropped at run end.
pub struct RunContext {
    pub run_id: Uuid,
    /// Timestamp label fixed at run start; names the analysis report.
    pub run_label: String,
    pub frame_id: u64,
    /// Timestamp label regenerated each frame; names saved images.
    pub frame_label: String,
    pub task: TaskCategory,
    /// Set by the reinit key or by a failed reinitialization; consumed by
    /// the tracking stage on its next execution.
    pub reinit_requested: bool,
    pub metrics: MetricSheet,
}

impl RunContext {
    pub fn new(task: TaskCategory) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            run_label: timestamp_label(),
            frame_id: 0,
            frame_label: String::new(),
            task,
            reinit_requested: false,
            metrics: MetricSheet::new(),
        }
    }

    /// Per-frame reset: stamps the frame's timestamp label. The frame id
    /// itself advances at the end of the frame, not here.
    pub fn begin_frame(&mut self) {
        self.frame_label = format!("{}_{:04}", timestamp_label(), self.frame_id);
    }
}

/// Wall-clock label used for file naming, millisecond resolution.
pub fn timestamp_label() -> String {
    Local::now().format("%y%m%d%H%M%S%3f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_label_carries_frame_id() {
        let mut ctx = RunContext::new(TaskCategory::Detect);
        ctx.frame_id = 7;
        ctx.begin_frame();
        assert!(ctx.frame_label.ends_with("_0007"));
    }

    #[test]
    fn test_publish_policy_by_task() {
        assert!(TaskCategory::Detect.wants_roi_publish());
        assert!(TaskCategory::Cloud.wants_roi_publish());
        assert!(TaskCategory::Registration.wants_roi_publish());
        assert!(!TaskCategory::Show.wants_roi_publish());
        assert!(!TaskCategory::StereoMatch.wants_roi_publish());
    }
}
