pub mod block;
pub mod chain;
pub mod config;
pub mod context;
pub mod display;
pub mod error;
pub mod link;
pub mod metrics;
pub mod runner;
pub mod source;
pub mod stages;

#[cfg(test)]
pub(crate) mod testutil;

pub use block::{Block, Rect, WorldState};
pub use chain::{Chain, ChainBuilder, FrameContext, Stage, StageRegistry};
pub use config::{RunSettings, StageConfig};
pub use context::{RunContext, TaskCategory};
pub use display::{DisplaySurface, HeadlessSurface, KeyCommand};
pub use error::AppError;
pub use link::HostLink;
pub use runner::Runner;
pub use source::{DirSource, FrameSet, FrameSource};
