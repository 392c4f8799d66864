use image::DynamicImage;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::SourceError;

/// What one fetch yields. The mode never changes within a run.
#[derive(Debug)]
pub enum FrameSet {
    Mono(DynamicImage),
    Stereo(DynamicImage, DynamicImage),
}

/// A frame source yields one image (mono) or a pair (stereo) per fetch.
/// `Ok(None)` signals a clean end of stream, not an error.
pub trait FrameSource {
    fn is_stereo(&self) -> bool;
    fn fetch(&mut self) -> Result<Option<FrameSet>, SourceError>;
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

/// Directory-backed source: image files consumed in name order. Stereo
/// mode reads two directories in lockstep and ends when either side runs
/// out.
pub struct DirSource {
    left: Vec<PathBuf>,
    right: Option<Vec<PathBuf>>,
    cursor: usize,
}

impl DirSource {
    pub fn open(left_dir: &Path, right_dir: Option<&Path>) -> Result<Self, SourceError> {
        let left = list_images(left_dir)?;
        let right = right_dir.map(list_images).transpose()?;
        info!(
            frames = left.len(),
            stereo = right.is_some(),
            "frame source opened"
        );
        Ok(Self {
            left,
            right,
            cursor: 0,
        })
    }

    fn load(&self, path: &Path) -> Result<DynamicImage, SourceError> {
        image::open(path).map_err(|e| SourceError::Decode {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

impl FrameSource for DirSource {
    fn is_stereo(&self) -> bool {
        self.right.is_some()
    }

    fn fetch(&mut self) -> Result<Option<FrameSet>, SourceError> {
        if self.cursor >= self.left.len() {
            return Ok(None);
        }
        let left = self.load(&self.left[self.cursor])?;
        let set = match &self.right {
            Some(right) => {
                let Some(path) = right.get(self.cursor) else {
                    return Ok(None);
                };
                FrameSet::Stereo(left, self.load(path)?)
            }
            None => FrameSet::Mono(left),
        };
        self.cursor += 1;
        Ok(Some(set))
    }
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>, SourceError> {
    let entries = std::fs::read_dir(dir).map_err(|e| SourceError::List {
        path: dir.to_path_buf(),
        source: e,
    })?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    if paths.is_empty() {
        return Err(SourceError::NoFrames(dir.to_path_buf()));
    }
    paths.sort();
    Ok(paths)
}
