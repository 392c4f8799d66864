use image::DynamicImage;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use crate::block::Rect;

/// Keys recognized during the inter-frame wait; anything else is ignored
/// by the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    Quit,
    Abort,
    Pause,
    Reinit,
}

/// Boundary to whatever shows images and takes input. The frame loop
/// drives show/save delivery and the inter-frame key wait through this;
/// the tracking stage uses `select_rect` for its manual init policy.
pub trait DisplaySurface {
    fn show(&mut self, name: &str, image: &DynamicImage);

    /// Persist an image under the given file stem (the loop composes
    /// stem = block name + frame timestamp label).
    fn save(&mut self, stem: &str, image: &DynamicImage) -> std::io::Result<()>;

    /// Wait for a key: `Some(timeout)` bounds the wait, `None` blocks
    /// until a key arrives (or the surface has no key source at all).
    fn wait_key(&mut self, timeout: Option<Duration>) -> Option<KeyCommand>;

    /// Let the operator pick a rectangle on the given image. A surface
    /// without pointer input returns None.
    fn select_rect(&mut self, name: &str, image: &DynamicImage) -> Option<Rect>;
}

/// Save-only surface for unattended runs: shows become debug logs, key
/// waits honor the pause interval but never produce a key, and manual
/// rectangle selection is unavailable.
pub struct HeadlessSurface {
    out_dir: PathBuf,
}

impl HeadlessSurface {
    pub fn new(out_dir: PathBuf) -> Self {
        Self { out_dir }
    }
}

impl DisplaySurface for HeadlessSurface {
    fn show(&mut self, name: &str, image: &DynamicImage) {
        debug!(name, width = image.width(), height = image.height(), "show");
    }

    fn save(&mut self, stem: &str, image: &DynamicImage) -> std::io::Result<()> {
        let path = self.out_dir.join(format!("{stem}.png"));
        image
            .save(&path)
            .map_err(|e| std::io::Error::other(e.to_string()))
    }

    fn wait_key(&mut self, timeout: Option<Duration>) -> Option<KeyCommand> {
        if let Some(timeout) = timeout {
            std::thread::sleep(timeout);
        }
        None
    }

    fn select_rect(&mut self, _name: &str, _image: &DynamicImage) -> Option<Rect> {
        None
    }
}
