mod app;
mod camshift;
mod keys;
mod overlay;
mod roi;
mod session;
mod source;
mod tracker;

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{ArgGroup, Args, Parser, Subcommand};
use opencv::core::Rect;
use tracing_subscriber::EnvFilter;

use crate::{
    camshift::CamShiftParams,
    source::Source,
    tracker::{TrackerKind, TrackerOptions},
};

#[derive(Parser, Debug)]
#[command(name = "roitrack", about = "Select an object in a video source and track it")]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Hue-histogram tracking with CamShift
    Camshift(CamShiftArgs),
    /// Pluggable OpenCV tracker; press `s` to select a region
    Track(TrackArgs),
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("input").args(["camera", "file", "url"])))]
struct CommonArgs {
    /// Camera index (default 0 when no file or url is given)
    #[arg(long, value_name = "INDEX")]
    camera: Option<i32>,
    #[arg(long, value_name = "PATH")]
    file: Option<PathBuf>,
    /// RTSP or HTTP stream
    #[arg(long, value_name = "URL")]
    url: Option<String>,
    /// Track this region instead of prompting, as x,y,w,h
    #[arg(long, value_name = "X,Y,W,H", value_parser = roi::parse)]
    roi: Option<Rect>,
    /// Run without windows (requires --roi)
    #[arg(long)]
    headless: bool,
    /// Frames discarded before the one used for region selection
    #[arg(long, default_value_t = 1)]
    warmup_frames: u32,
    /// Key poll delay per frame in milliseconds
    #[arg(long, value_name = "MS")]
    wait_ms: Option<i32>,
    /// Stop after this many frames
    #[arg(long)]
    max_frames: Option<u64>,
    #[arg(long)]
    log_json: Option<PathBuf>,
    #[arg(long, default_value_t = 5)]
    log_interval_seconds: u64,
}

impl CommonArgs {
    fn source(&self) -> Source {
        if let Some(path) = &self.file {
            Source::File(path.clone())
        } else if let Some(url) = &self.url {
            Source::Url(url.clone())
        } else {
            Source::Camera(self.camera.unwrap_or(0))
        }
    }

    fn validate(&self) -> Result<()> {
        if self.headless && self.roi.is_none() {
            bail!("--headless needs a region to track; pass --roi x,y,w,h");
        }
        if self.wait_ms.is_some_and(|ms| ms <= 0) {
            bail!("--wait-ms must be positive");
        }
        Ok(())
    }
}

#[derive(Args, Debug)]
struct CamShiftArgs {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(long, default_value_t = 180)]
    hue_bins: i32,
    /// Pixels below this HSV saturation are ignored
    #[arg(long, default_value_t = 60.0)]
    min_saturation: f64,
    /// Pixels below this HSV value are ignored
    #[arg(long, default_value_t = 32.0)]
    min_value: f64,
    #[arg(long, default_value_t = 10)]
    max_iterations: i32,
    #[arg(long, default_value_t = 1.0)]
    epsilon: f64,
}

impl CamShiftArgs {
    fn params(&self) -> Result<CamShiftParams> {
        if !(1..=180).contains(&self.hue_bins) {
            bail!("--hue-bins must be between 1 and 180");
        }
        if self.max_iterations < 1 {
            bail!("--max-iterations must be at least 1");
        }
        Ok(CamShiftParams {
            hue_bins: self.hue_bins,
            min_saturation: self.min_saturation,
            min_value: self.min_value,
            max_iterations: self.max_iterations,
            epsilon: self.epsilon,
        })
    }
}

#[derive(Args, Debug)]
struct TrackArgs {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(long, value_enum, ignore_case = true, default_value_t = TrackerKind::Csrt)]
    tracker: TrackerKind,
    /// Feed the tracker single-channel frames
    #[arg(long)]
    grayscale: bool,
    #[arg(long, value_name = "PATH")]
    goturn_model_txt: Option<PathBuf>,
    #[arg(long, value_name = "PATH")]
    goturn_model_bin: Option<PathBuf>,
}

impl TrackArgs {
    fn options(&self) -> TrackerOptions {
        TrackerOptions {
            goturn_model_txt: self.goturn_model_txt.clone(),
            goturn_model_bin: self.goturn_model_bin.clone(),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    match cli.mode {
        Mode::Camshift(args) => {
            args.common.validate()?;
            app::run_camshift(&args.common, args.params()?)
        }
        Mode::Track(args) => {
            args.common.validate()?;
            app::run_track(&args.common, args.tracker, args.options(), args.grayscale)
        }
    }
}
