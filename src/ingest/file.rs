//! Still-image and synthetic frame sources.
//!
//! Neither needs a video decoder, so both are always available.

use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::FrameSource;

const STILL_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

// ----------------------------------------------------------------------------
// Image sequence
// ----------------------------------------------------------------------------

/// Plays a directory of still images in file-name order, or a single image once.
pub struct ImageSequenceSource {
    origin: PathBuf,
    paths: Vec<PathBuf>,
    position: usize,
}

impl ImageSequenceSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let origin = path.as_ref().to_path_buf();
        let paths = if origin.is_dir() {
            let mut paths = Vec::new();
            for entry in std::fs::read_dir(&origin)
                .with_context(|| format!("failed to list {}", origin.display()))?
            {
                let path = entry?.path();
                if Self::is_still_image(&path) {
                    paths.push(path);
                }
            }
            paths.sort();
            paths
        } else if Self::is_still_image(&origin) {
            vec![origin.clone()]
        } else {
            return Err(anyhow!("{} is not an image or directory", origin.display()));
        };

        if paths.is_empty() {
            log::warn!("{} holds no images", origin.display());
        }
        Ok(Self {
            origin,
            paths,
            position: 0,
        })
    }

    pub fn is_still_image(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| STILL_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    }

    pub fn remaining(&self) -> usize {
        self.paths.len() - self.position
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let Some(path) = self.paths.get(self.position) else {
            return Ok(None);
        };
        let frame = image::open(path)
            .with_context(|| format!("failed to decode {}", path.display()))?
            .to_rgb8();
        self.position += 1;
        Ok(Some(frame))
    }

    fn describe(&self) -> String {
        format!("images:{} ({} files)", self.origin.display(), self.paths.len())
    }

    fn frames_captured(&self) -> u64 {
        self.position as u64
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

/// `stub://name?frames=N&width=W&height=H`. Without `frames` it never ends.
#[derive(Debug)]
pub struct SyntheticSource {
    name: String,
    limit: Option<u64>,
    width: u32,
    height: u32,
    frame_count: u64,
}

impl SyntheticSource {
    pub fn new(name: &str, limit: Option<u64>, width: u32, height: u32) -> Self {
        Self {
            name: name.to_string(),
            limit,
            width,
            height,
            frame_count: 0,
        }
    }

    pub fn parse(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("not a stub url: {}", url))?;
        let (name, query) = rest.split_once('?').unwrap_or((rest, ""));
        let mut source = Self::new(name, None, 640, 480);

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed stub parameter '{}'", pair))?;
            match key {
                "frames" => source.limit = Some(parse_number(key, value)?),
                "width" => source.width = parse_number(key, value)?,
                "height" => source.height = parse_number(key, value)?,
                other => return Err(anyhow!("unknown stub parameter '{}'", other)),
            }
        }
        if source.width == 0 || source.height == 0 {
            return Err(anyhow!("stub frame size must be non-zero"));
        }
        Ok(source)
    }

    fn render(&self) -> RgbImage {
        let shift = self.frame_count as u32;
        RgbImage::from_fn(self.width, self.height, |x, y| {
            Rgb([
                ((x + shift) % 256) as u8,
                ((y + shift) % 256) as u8,
                ((x + y) % 256) as u8,
            ])
        })
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.limit.is_some_and(|limit| self.frame_count >= limit) {
            return Ok(None);
        }
        let frame = self.render();
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn describe(&self) -> String {
        format!("stub://{} ({}x{})", self.name, self.width, self.height)
    }

    fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("stub parameter {} must be a number in range, got '{}'", key, value))
}
