//! Video file and RTSP source using FFmpeg.
//!
//! Frames are decoded and converted to RGB in memory. RTSP feeds are forced
//! onto TCP transport.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use image::RgbImage;

use super::FrameSource;

pub struct FfmpegSource {
    feed: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    frame_count: u64,
    draining: bool,
}

impl FfmpegSource {
    pub fn open(feed: &str) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = if feed.starts_with("rtsp://") {
            let mut options = ffmpeg::Dictionary::new();
            options.set("rtsp_transport", "tcp");
            ffmpeg::format::input_with_dictionary(&feed, options)
        } else {
            ffmpeg::format::input(&feed)
        }
        .with_context(|| format!("failed to open video feed '{}' with ffmpeg", feed))?;

        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("feed '{}' has no video track", feed))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        log::info!(
            "opened {} ({}x{}, ffmpeg)",
            feed,
            decoder.width(),
            decoder.height()
        );

        Ok(Self {
            feed: feed.to_string(),
            input,
            stream_index,
            decoder,
            scaler,
            frame_count: 0,
            draining: false,
        })
    }

    fn receive(&mut self) -> Result<Option<RgbImage>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        self.frame_count += 1;
        Ok(Some(frame_to_image(&rgb_frame)?))
    }
}

impl FrameSource for FfmpegSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        loop {
            if let Some(frame) = self.receive()? {
                return Ok(Some(frame));
            }
            if self.draining {
                return Ok(None);
            }

            let stream_index = self.stream_index;
            let packet = self
                .input
                .packets()
                .find(|(stream, _)| stream.index() == stream_index)
                .map(|(_, packet)| packet);

            match packet {
                Some(packet) => self
                    .decoder
                    .send_packet(&packet)
                    .context("send packet to ffmpeg decoder")?,
                None => {
                    self.draining = true;
                    self.decoder.send_eof().context("flush ffmpeg decoder")?;
                }
            }
        }
    }

    fn describe(&self) -> String {
        format!("{} (ffmpeg)", self.feed)
    }

    fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}

fn frame_to_image(frame: &ffmpeg::frame::Video) -> Result<RgbImage> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    let pixels = if stride == row_bytes {
        data.get(..row_bytes * height as usize)
            .context("ffmpeg frame is shorter than its size")?
            .to_vec()
    } else {
        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            pixels.extend_from_slice(
                data.get(start..start + row_bytes)
                    .context("ffmpeg frame row is out of bounds")?,
            );
        }
        pixels
    };

    RgbImage::from_raw(width, height, pixels).context("ffmpeg frame has unexpected size")
}
