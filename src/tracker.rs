use std::{
    fmt,
    path::PathBuf,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use clap::ValueEnum;
use opencv::{
    core::{Mat, Ptr, Rect},
    prelude::*,
    tracking::{self, TrackerCSRT, TrackerKCF, TrackerKCF_Params},
    video::{self, TrackerGOTURN, TrackerGOTURN_Params, TrackerMIL},
};

/// Off-the-shelf tracking algorithms selectable on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TrackerKind {
    Csrt,
    Mil,
    Kcf,
    Goturn,
    Boosting,
    Medianflow,
    Tld,
    Mosse,
}

impl TrackerKind {
    pub fn label(self) -> &'static str {
        match self {
            TrackerKind::Csrt => "CSRT",
            TrackerKind::Mil => "MIL",
            TrackerKind::Kcf => "KCF",
            TrackerKind::Goturn => "GOTURN",
            TrackerKind::Boosting => "BOOSTING",
            TrackerKind::Medianflow => "MEDIANFLOW",
            TrackerKind::Tld => "TLD",
            TrackerKind::Mosse => "MOSSE",
        }
    }

    /// Algorithms only available through OpenCV's legacy tracking API.
    pub fn is_legacy(self) -> bool {
        matches!(
            self,
            TrackerKind::Boosting | TrackerKind::Medianflow | TrackerKind::Tld | TrackerKind::Mosse
        )
    }
}

impl fmt::Display for TrackerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Extra inputs some algorithms need.
#[derive(Clone, Debug, Default)]
pub struct TrackerOptions {
    pub goturn_model_txt: Option<PathBuf>,
    pub goturn_model_bin: Option<PathBuf>,
}

/// Create a tracker of the given kind behind OpenCV's common tracker interface.
pub fn create(kind: TrackerKind, options: &TrackerOptions) -> Result<Ptr<video::Tracker>> {
    let tracker: Ptr<video::Tracker> = match kind {
        TrackerKind::Csrt => TrackerCSRT::create_def()
            .context("Failed to create CSRT tracker")?
            .into(),
        TrackerKind::Kcf => {
            let params = TrackerKCF_Params::default()?;
            TrackerKCF::create(params)
                .context("Failed to create KCF tracker")?
                .into()
        }
        TrackerKind::Mil => TrackerMIL::create_def()
            .context("Failed to create MIL tracker")?
            .into(),
        TrackerKind::Goturn => {
            let mut params = TrackerGOTURN_Params::default()?;
            if let Some(path) = &options.goturn_model_txt {
                params.set_model_txt(path.to_str().context("GOTURN model path is not valid UTF-8")?);
            }
            if let Some(path) = &options.goturn_model_bin {
                params.set_model_bin(path.to_str().context("GOTURN weights path is not valid UTF-8")?);
            }
            TrackerGOTURN::create(&params)
                .context("Failed to create GOTURN tracker (are the model files present?)")?
                .into()
        }
        TrackerKind::Boosting => upgrade(
            tracking::legacy_TrackerBoosting::create_def()
                .context("Failed to create Boosting tracker")?
                .into(),
        )?,
        TrackerKind::Medianflow => upgrade(
            tracking::legacy_TrackerMedianFlow::create_def()
                .context("Failed to create MedianFlow tracker")?
                .into(),
        )?,
        TrackerKind::Tld => upgrade(
            tracking::legacy_TrackerTLD::create_def()
                .context("Failed to create TLD tracker")?
                .into(),
        )?,
        TrackerKind::Mosse => upgrade(
            tracking::legacy_TrackerMOSSE::create()
                .context("Failed to create MOSSE tracker")?
                .into(),
        )?,
    };
    Ok(tracker)
}

fn upgrade(legacy: Ptr<tracking::legacy_Tracker>) -> Result<Ptr<video::Tracker>> {
    tracking::upgrade_tracking_api(&legacy).context("Failed to wrap legacy tracker")
}

/// Outcome of one tracker update.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackUpdate {
    pub bbox: Option<Rect>,
    pub elapsed: Duration,
}

impl TrackUpdate {
    /// Frames per second this update alone would sustain.
    pub fn fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 { 1.0 / secs } else { 0.0 }
    }
}

/// A single-object tracker that can be (re)seeded from a selected region.
pub struct ObjectTracker {
    kind: TrackerKind,
    options: TrackerOptions,
    tracker: Ptr<video::Tracker>,
    initialized: bool,
}

impl ObjectTracker {
    pub fn new(kind: TrackerKind, options: TrackerOptions) -> Result<Self> {
        let tracker = create(kind, &options)?;
        if kind.is_legacy() {
            tracing::debug!("{} tracker runs through the legacy tracking API", kind);
        }
        Ok(Self {
            kind,
            options,
            tracker,
            initialized: false,
        })
    }

    pub fn kind(&self) -> TrackerKind {
        self.kind
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Seeds the tracker with `roi` on `frame`. Reselecting builds a fresh
    /// tracker, since several algorithms cannot be initialized twice.
    pub fn init(&mut self, frame: &Mat, roi: Rect) -> Result<()> {
        if self.initialized {
            self.tracker = create(self.kind, &self.options)?;
        }
        self.tracker
            .init(frame, roi)
            .with_context(|| format!("Failed to initialize {} tracker", self.kind))?;
        self.initialized = true;
        Ok(())
    }

    pub fn update(&mut self, frame: &Mat) -> Result<TrackUpdate> {
        let start = Instant::now();
        let mut bbox = Rect::default();
        let found = self
            .tracker
            .update(frame, &mut bbox)
            .with_context(|| format!("{} tracker update failed", self.kind))?;
        Ok(TrackUpdate {
            bbox: found.then_some(bbox),
            elapsed: start.elapsed(),
        })
    }
}
