use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
    time::Instant,
};

use anyhow::{Context, Result};
use opencv::core::Rect;
use serde::Serialize;

/// Axis-aligned box as written to the event log.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BoxLog {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl From<Rect> for BoxLog {
    fn from(rect: Rect) -> Self {
        Self {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
        }
    }
}

#[derive(Serialize)]
pub struct SessionLog {
    pub event: &'static str,
    pub timestamp: String,
    pub mode: &'static str,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roi: Option<BoxLog>,
}

#[derive(Serialize)]
pub struct SelectionLog {
    pub event: &'static str,
    pub timestamp: String,
    pub frame_index: u64,
    pub roi: BoxLog,
}

#[derive(Serialize)]
pub struct FrameLog {
    pub event: &'static str,
    pub timestamp: String,
    pub frame_index: u64,
    pub tracked: bool,
    #[serde(rename = "box", skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoxLog>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub angle: Option<f32>,
}

#[derive(Serialize)]
pub struct SummaryLog {
    pub event: &'static str,
    pub timestamp: String,
    pub frame_index: u64,
    pub interval_frames: u64,
    pub interval_tracked: u64,
    pub interval_lost: u64,
    pub total_frames: u64,
    pub total_tracked: u64,
    pub total_lost: u64,
    pub fps: f64,
}

pub struct JsonLogger {
    writer: BufWriter<File>,
}

impl JsonLogger {
    pub fn new(path: &Path) -> Result<Self> {
        let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn write_event<T: Serialize>(&mut self, event: &T) -> Result<()> {
        serde_json::to_writer(&mut self.writer, event)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Per-frame counters for one tracking run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Counters {
    pub frames: u64,
    pub tracked: u64,
    pub lost: u64,
}

impl Counters {
    /// Counts a displayed frame. `outcome` is `None` while nothing is
    /// selected, otherwise whether the tracker still had the target.
    pub fn record(&mut self, outcome: Option<bool>) {
        self.frames += 1;
        match outcome {
            Some(true) => self.tracked += 1,
            Some(false) => self.lost += 1,
            None => {}
        }
    }

    pub fn reset(&mut self) {
        *self = Counters::default();
    }
}

pub struct SessionStats {
    pub start: Instant,
    pub last_summary: Instant,
    pub total: Counters,
    pub interval: Counters,
}

impl SessionStats {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_summary: now,
            total: Counters::default(),
            interval: Counters::default(),
        }
    }

    pub fn record(&mut self, outcome: Option<bool>) {
        self.total.record(outcome);
        self.interval.record(outcome);
    }

    pub fn average_fps(&self) -> f64 {
        let elapsed = self.start.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.total.frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary_due(&self, interval_seconds: u64) -> bool {
        self.last_summary.elapsed().as_secs() >= interval_seconds
    }

    /// Builds the summary for the interval just ended and starts a new one.
    pub fn take_summary(&mut self, frame_index: u64) -> SummaryLog {
        let summary = SummaryLog {
            event: "summary",
            timestamp: timestamp_now(),
            frame_index,
            interval_frames: self.interval.frames,
            interval_tracked: self.interval.tracked,
            interval_lost: self.interval.lost,
            total_frames: self.total.frames,
            total_tracked: self.total.tracked,
            total_lost: self.total.lost,
            fps: self.average_fps(),
        };
        self.interval.reset();
        self.last_summary = Instant::now();
        summary
    }
}

/// Frame statistics plus the optional JSON event log for one run.
pub struct Recorder {
    logger: Option<JsonLogger>,
    stats: SessionStats,
    interval_seconds: u64,
}

impl Recorder {
    pub fn new(log_path: Option<&Path>, interval_seconds: u64, session: &SessionLog) -> Result<Self> {
        let mut logger = match log_path {
            Some(path) => Some(JsonLogger::new(path)?),
            None => None,
        };
        if let Some(logger) = logger.as_mut() {
            logger.write_event(session)?;
            logger.flush()?;
        }
        Ok(Self {
            logger,
            stats: SessionStats::new(),
            interval_seconds,
        })
    }

    #[cfg(test)]
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn selection(&mut self, frame_index: u64, roi: Rect) -> Result<()> {
        tracing::info!("tracking region {:?} from frame {}", roi, frame_index);
        if let Some(logger) = self.logger.as_mut() {
            logger.write_event(&SelectionLog {
                event: "selection",
                timestamp: timestamp_now(),
                frame_index,
                roi: roi.into(),
            })?;
        }
        Ok(())
    }

    /// Records one displayed frame. `bbox` is `None` while nothing is being
    /// tracked and `Some(None)` when the tracker lost the target.
    pub fn frame(&mut self, frame_index: u64, bbox: Option<Option<Rect>>, angle: Option<f32>) -> Result<()> {
        let outcome = bbox.map(|found| found.is_some());
        self.stats.record(outcome);
        if let (Some(logger), Some(found)) = (self.logger.as_mut(), bbox) {
            logger.write_event(&FrameLog {
                event: "frame",
                timestamp: timestamp_now(),
                frame_index,
                tracked: found.is_some(),
                bbox: found.map(BoxLog::from),
                angle: found.and(angle),
            })?;
        }
        if self.stats.summary_due(self.interval_seconds) {
            self.summary(frame_index)?;
        }
        Ok(())
    }

    fn summary(&mut self, frame_index: u64) -> Result<()> {
        let summary = self.stats.take_summary(frame_index);
        tracing::info!(
            "frame={} processed={} tracked={} lost={} fps={:.1}",
            frame_index,
            summary.total_frames,
            summary.total_tracked,
            summary.total_lost,
            summary.fps
        );
        if let Some(logger) = self.logger.as_mut() {
            logger.write_event(&summary)?;
            logger.flush()?;
        }
        Ok(())
    }

    /// Writes the closing summary and flushes the log.
    pub fn finish(&mut self, frame_index: u64) -> Result<()> {
        self.summary(frame_index)?;
        if let Some(logger) = self.logger.as_mut() {
            logger.flush()?;
        }
        Ok(())
    }
}

pub fn timestamp_now() -> String {
    chrono::Utc::now().to_rfc3339()
}
