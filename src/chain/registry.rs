use indexmap::IndexMap;

use crate::chain::stage::Stage;
use crate::config::StageConfig;
use crate::context::TaskCategory;
use crate::error::BuildError;
use crate::stages;

/// How to construct one stage kind, plus the classification the builder
/// records for it and whether it gets the world-state handle at runtime.
pub struct StageSpec {
    pub category: TaskCategory,
    pub uses_world: bool,
    pub build: fn(&StageConfig) -> Result<Box<dyn Stage>, BuildError>,
}

/// Kind tag → factory. Adding a stage type means registering a spec here,
/// not editing the builder.
pub struct StageRegistry {
    specs: IndexMap<String, StageSpec>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self {
            specs: IndexMap::new(),
        }
    }

    /// All builtin stage families.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("capture", TaskCategory::Show, false, stages::capture::build);
        registry.register("detect", TaskCategory::Detect, false, stages::detect::build);
        registry.register("track", TaskCategory::Detect, false, stages::track::build);
        registry.register("points", TaskCategory::Points, false, stages::points::build);
        registry.register(
            "descriptors",
            TaskCategory::Descriptors,
            false,
            stages::descriptors::build,
        );
        registry.register("match", TaskCategory::Match, false, stages::matching::build);
        registry.register(
            "stereo",
            TaskCategory::StereoMatch,
            false,
            stages::stereo::build,
        );
        registry.register(
            "triangulate",
            TaskCategory::Cloud,
            true,
            stages::triangulate::build,
        );
        registry.register(
            "register",
            TaskCategory::Registration,
            true,
            stages::register::build,
        );
        registry.register(
            "rectify",
            TaskCategory::Rectify,
            false,
            stages::rectify::build,
        );
        registry.register(
            "segment",
            TaskCategory::Segment,
            false,
            stages::segment::build,
        );
        registry
    }

    pub fn register(
        &mut self,
        kind: &str,
        category: TaskCategory,
        uses_world: bool,
        build: fn(&StageConfig) -> Result<Box<dyn Stage>, BuildError>,
    ) {
        self.specs.insert(
            kind.to_string(),
            StageSpec {
                category,
                uses_world,
                build,
            },
        );
    }

    pub fn spec(&self, kind: &str) -> Option<&StageSpec> {
        self.specs.get(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_covers_all_families() {
        let registry = StageRegistry::with_builtin();
        for kind in [
            "capture",
            "detect",
            "track",
            "points",
            "descriptors",
            "match",
            "stereo",
            "triangulate",
            "register",
            "rectify",
            "segment",
        ] {
            assert!(registry.spec(kind).is_some(), "missing builtin kind {kind}");
        }
        assert!(registry.spec("kinect").is_none());
    }

    #[test]
    fn test_world_handle_only_for_cloud_stages() {
        let registry = StageRegistry::with_builtin();
        assert!(registry.spec("triangulate").unwrap().uses_world);
        assert!(registry.spec("register").unwrap().uses_world);
        assert!(!registry.spec("track").unwrap().uses_world);
        assert!(!registry.spec("stereo").unwrap().uses_world);
    }
}
