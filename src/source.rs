use std::{fmt, path::PathBuf};

use anyhow::{bail, Context, Result};
use opencv::{prelude::*, videoio};

/// Where frames come from.
#[derive(Clone, Debug, PartialEq)]
pub enum Source {
    Camera(i32),
    File(PathBuf),
    Url(String),
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Camera(index) => write!(f, "camera {}", index),
            Source::File(path) => write!(f, "{}", path.display()),
            Source::Url(url) => write!(f, "{}", url),
        }
    }
}

pub fn open(source: &Source) -> Result<videoio::VideoCapture> {
    let capture = match source {
        Source::Camera(index) => videoio::VideoCapture::new(*index, videoio::CAP_ANY),
        Source::File(path) => {
            let path = path.to_str().context("Video file path is not valid UTF-8")?;
            videoio::VideoCapture::from_file(path, videoio::CAP_ANY)
        }
        Source::Url(url) => videoio::VideoCapture::from_file(url, videoio::CAP_ANY),
    }
    .with_context(|| format!("Cannot open video source: {}", source))?;
    if !capture.is_opened()? {
        bail!("Cannot open video source: {}", source);
    }
    Ok(capture)
}

/// Reads the next frame into `frame`. Returns `false` at end of stream or when
/// the device stops delivering frames.
pub fn read_frame(capture: &mut videoio::VideoCapture, frame: &mut Mat) -> Result<bool> {
    if !capture.read(frame).context("Failed to read frame")? {
        return Ok(false);
    }
    Ok(!frame.empty())
}

/// Reads and drops `count` frames so camera exposure can settle.
pub fn skip_frames(capture: &mut videoio::VideoCapture, count: u32) -> Result<()> {
    let mut frame = Mat::default();
    for _ in 0..count {
        if !read_frame(capture, &mut frame)? {
            bail!("Cannot read video source");
        }
    }
    Ok(())
}

/// Discards `warmup` frames and returns the next one for region selection.
pub fn grab_selection_frame(capture: &mut videoio::VideoCapture, warmup: u32) -> Result<Mat> {
    skip_frames(capture, warmup)?;
    let mut frame = Mat::default();
    if !read_frame(capture, &mut frame)? {
        bail!("Cannot read video source");
    }
    Ok(frame)
}
