use tracing::Level;

use stereoflow::error::RunError;
use stereoflow::{
    AppError, ChainBuilder, DirSource, HeadlessSurface, HostLink, RunSettings, Runner,
    StageRegistry,
};

fn init_logging() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();
}

fn main() -> Result<(), AppError> {
    init_logging();

    let settings_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "stereoflow".to_string());
    let settings = RunSettings::load(&settings_path)?;
    std::fs::create_dir_all(&settings.out_dir)?;

    let left_dir = settings
        .left_dir
        .clone()
        .ok_or_else(|| config::ConfigError::Message("left_dir is required".to_string()))?;
    let right_dir = if settings.stereo {
        Some(settings.right_dir.clone().ok_or_else(|| {
            config::ConfigError::Message("right_dir is required in stereo mode".to_string())
        })?)
    } else {
        None
    };
    let source = DirSource::open(&left_dir, right_dir.as_deref())
        .map_err(|e| AppError::Run(RunError::Source(e)))?;

    let chain = ChainBuilder::new(StageRegistry::with_builtin()).build(&settings.stages)?;
    let display = HeadlessSurface::new(settings.out_dir.clone());
    let link = if settings.link.enabled {
        HostLink::connect(&settings.link)
    } else {
        HostLink::disabled()
    };

    let mut runner = Runner::new(
        chain,
        source,
        display,
        link,
        settings.pause_ms,
        settings.out_dir.clone(),
    );
    runner.run()?;
    Ok(())
}
