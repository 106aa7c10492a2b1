//! Frame capture sources.
//!
//! The producer pulls frames one at a time through `FrameSource`:
//! - `stub://` synthetic frames (tests, demos)
//! - still images: a single file or a directory played in file-name order
//! - video files and `rtsp://` cameras (feature: ingest-ffmpeg)
//!
//! `Ok(None)` is end of stream. `Err` is a capture failure; the pipeline
//! stops on both but reports them differently.

pub mod file;
#[cfg(feature = "ingest-ffmpeg")]
pub mod ffmpeg;

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::path::Path;

pub use file::{ImageSequenceSource, SyntheticSource};
#[cfg(feature = "ingest-ffmpeg")]
pub use ffmpeg::FfmpegSource;

pub trait FrameSource {
    /// Block until the next frame is available.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;

    /// Human-readable origin, for logs.
    fn describe(&self) -> String;

    fn frames_captured(&self) -> u64;
}

/// Pick a source for a feed string.
pub fn open_source(feed: &str) -> Result<Box<dyn FrameSource>> {
    let feed = feed.trim();
    if feed.is_empty() {
        return Err(anyhow!("video feed is empty"));
    }
    if feed.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::parse(feed)?));
    }

    let path = Path::new(feed);
    if !feed.contains("://") && (path.is_dir() || ImageSequenceSource::is_still_image(path)) {
        return Ok(Box::new(ImageSequenceSource::open(path)?));
    }

    open_video(feed)
}

#[cfg(feature = "ingest-ffmpeg")]
fn open_video(feed: &str) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(FfmpegSource::open(feed)?))
}

#[cfg(not(feature = "ingest-ffmpeg"))]
fn open_video(feed: &str) -> Result<Box<dyn FrameSource>> {
    Err(anyhow!(
        "video feed '{}' requires the ingest-ffmpeg feature",
        feed
    ))
}
