//! The interactive capture, track, display loop for both modes.

use anyhow::{bail, Context, Result};
use opencv::{
    core::{Mat, Rect},
    highgui, imgproc,
    prelude::*,
    videoio::VideoCapture,
};

use crate::{
    camshift::{self, CamShiftParams, CamShiftTracker},
    keys::Key,
    overlay, roi,
    session::{timestamp_now, Recorder, SessionLog},
    source,
    tracker::{ObjectTracker, TrackerKind, TrackerOptions},
    CommonArgs,
};

const CAMSHIFT_WAIT_MS: i32 = 30;
const TRACK_WAIT_MS: i32 = 1;

/// The output window, or nothing when running headless.
struct Display {
    window: &'static str,
    enabled: bool,
    wait_ms: i32,
}

impl Display {
    fn open(window: &'static str, headless: bool, wait_ms: i32) -> Self {
        let mut enabled = !headless;
        if enabled {
            if let Err(err) = highgui::named_window(window, highgui::WINDOW_AUTOSIZE) {
                tracing::warn!("Failed to open display window: {}. Running headless.", err);
                enabled = false;
            }
        }
        Self {
            window,
            enabled,
            wait_ms,
        }
    }

    fn show(&self, frame: &Mat) -> Result<Key> {
        if !self.enabled {
            return Ok(Key::None);
        }
        highgui::imshow(self.window, frame)?;
        Ok(Key::from_code(highgui::wait_key(self.wait_ms)?))
    }

    fn close(&self) -> Result<()> {
        if self.enabled {
            highgui::destroy_all_windows()?;
        }
        Ok(())
    }
}

/// Region given on the command line, checked against the first frame.
fn fixed_region(rect: Rect, frame: &Mat) -> Result<Rect> {
    roi::fit(rect, frame).with_context(|| {
        format!(
            "Region {:?} lies outside the {}x{} frame",
            rect,
            frame.cols(),
            frame.rows()
        )
    })
}

/// Grabs a fresh frame and prompts for a region on it.
fn prompt_region(
    capture: &mut VideoCapture,
    common: &CommonArgs,
    grayscale: bool,
) -> Result<Option<(Mat, Rect)>> {
    let mut frame = source::grab_selection_frame(capture, common.warmup_frames)?;
    if grayscale {
        frame = to_gray(&frame)?;
    }
    match roi::select(&frame)? {
        Some(rect) => Ok(Some((frame, rect))),
        None => {
            tracing::warn!("Empty region selected, ignoring");
            Ok(None)
        }
    }
}

fn to_gray(frame: &Mat) -> Result<Mat> {
    let mut gray = Mat::default();
    imgproc::cvt_color_def(frame, &mut gray, imgproc::COLOR_BGR2GRAY)
        .context("Failed to convert to grayscale")?;
    Ok(gray)
}

fn frame_limit_reached(common: &CommonArgs, frame_index: u64) -> bool {
    common.max_frames.is_some_and(|max| frame_index >= max)
}

pub fn run_camshift(common: &CommonArgs, params: CamShiftParams) -> Result<()> {
    let source = common.source();
    let mut capture = source::open(&source)?;
    let display = Display::open("camshift", common.headless, common.wait_ms.unwrap_or(CAMSHIFT_WAIT_MS));
    if !display.enabled && common.roi.is_none() {
        bail!("No display available for region selection; pass --roi x,y,w,h");
    }

    let first = source::grab_selection_frame(&mut capture, common.warmup_frames)?;
    // Frame indices count every frame taken from the source.
    let mut frame_index = u64::from(common.warmup_frames) + 1;
    let seed = match common.roi {
        Some(rect) => Some(fixed_region(rect, &first)?),
        None => {
            let selected = roi::select(&first)?;
            if selected.is_none() {
                tracing::warn!("Empty region selected, press s to select again");
            }
            selected
        }
    };
    let mut tracker = match seed {
        Some(rect) => Some(CamShiftTracker::new(&first, rect, params)?),
        None => None,
    };

    let session = SessionLog {
        event: "session_start",
        timestamp: timestamp_now(),
        mode: "camshift",
        source: source.to_string(),
        tracker: None,
        roi: seed.map(Into::into),
    };
    let mut recorder = Recorder::new(common.log_json.as_deref(), common.log_interval_seconds, &session)?;
    if let Some(rect) = seed {
        recorder.selection(frame_index, rect)?;
    }

    let mut frame = Mat::default();
    loop {
        if frame_limit_reached(common, frame_index) {
            break;
        }
        if !source::read_frame(&mut capture, &mut frame)? {
            tracing::info!("Video source ended after {} frames", frame_index);
            break;
        }
        frame_index += 1;

        match tracker.as_mut() {
            Some(tracker) => {
                let result = tracker.update(&frame)?;
                match &result {
                    Some(found) => {
                        overlay::draw_polygon(&mut frame, &camshift::box_polygon(found.rotated)?)?
                    }
                    None => {
                        tracing::debug!("target lost, searching from {:?}", tracker.window());
                        overlay::draw_failure(&mut frame)?
                    }
                }
                recorder.frame(
                    frame_index,
                    Some(result.map(|found| found.bounds)),
                    result.map(|found| found.rotated.angle),
                )?;
            }
            None => {
                overlay::draw_hint(&mut frame)?;
                recorder.frame(frame_index, None, None)?;
            }
        }

        match display.show(&frame)? {
            Key::Quit => break,
            Key::Select => {
                if let Some((selected, rect)) = prompt_region(&mut capture, common, false)? {
                    frame_index += u64::from(common.warmup_frames) + 1;
                    tracker = Some(CamShiftTracker::new(&selected, rect, params)?);
                    recorder.selection(frame_index, rect)?;
                }
            }
            Key::None => {}
        }
    }

    display.close()?;
    recorder.finish(frame_index)
}

pub fn run_track(
    common: &CommonArgs,
    kind: TrackerKind,
    options: TrackerOptions,
    grayscale: bool,
) -> Result<()> {
    let source = common.source();
    let mut capture = source::open(&source)?;
    let display = Display::open("Tracking", common.headless, common.wait_ms.unwrap_or(TRACK_WAIT_MS));
    if !display.enabled && common.roi.is_none() {
        bail!("No display available for region selection; pass --roi x,y,w,h");
    }
    let mut tracker = ObjectTracker::new(kind, options)?;
    tracing::info!("using {} tracker", kind);

    let session = SessionLog {
        event: "session_start",
        timestamp: timestamp_now(),
        mode: "track",
        source: source.to_string(),
        tracker: Some(kind.to_string()),
        roi: common.roi.map(Into::into),
    };
    let mut recorder = Recorder::new(common.log_json.as_deref(), common.log_interval_seconds, &session)?;

    let mut frame_index: u64 = 0;
    let mut pending = common.roi;
    if pending.is_some() {
        // The fixed region seeds on the first frame after warmup.
        source::skip_frames(&mut capture, common.warmup_frames)?;
        frame_index = u64::from(common.warmup_frames);
    }
    let mut frame = Mat::default();
    loop {
        if frame_limit_reached(common, frame_index) {
            break;
        }
        if !source::read_frame(&mut capture, &mut frame)? {
            tracing::info!("Video source ended after {} frames", frame_index);
            break;
        }
        frame_index += 1;
        if grayscale {
            frame = to_gray(&frame)?;
        }

        if let Some(rect) = pending.take() {
            let rect = fixed_region(rect, &frame)?;
            tracker.init(&frame, rect)?;
            recorder.selection(frame_index, rect)?;
        }

        if tracker.is_initialized() {
            let update = tracker.update(&frame)?;
            match update.bbox {
                Some(bbox) => overlay::draw_box(&mut frame, bbox)?,
                None => overlay::draw_failure(&mut frame)?,
            }
            overlay::draw_hud(&mut frame, tracker.kind().label(), update.fps(), update.bbox)?;
            recorder.frame(frame_index, Some(update.bbox), None)?;
        } else {
            overlay::draw_hint(&mut frame)?;
            recorder.frame(frame_index, None, None)?;
        }

        match display.show(&frame)? {
            Key::Quit => break,
            Key::Select => {
                if let Some((selected, rect)) = prompt_region(&mut capture, common, grayscale)? {
                    frame_index += u64::from(common.warmup_frames) + 1;
                    tracker.init(&selected, rect)?;
                    recorder.selection(frame_index, rect)?;
                }
            }
            Key::None => {}
        }
    }

    display.close()?;
    recorder.finish(frame_index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use opencv::{
        core::{Scalar, Size, CV_8UC3},
        videoio,
    };
    use serde_json::Value;
    use std::path::{Path, PathBuf};

    fn temp_path(name: &str, extension: &str) -> PathBuf {
        std::env::temp_dir().join(format!("roitrack-{}-{}.{}", name, std::process::id(), extension))
    }

    /// Short MJPG clip of a green square drifting right over a gray background.
    fn write_clip(name: &str, frames: i32) -> PathBuf {
        let path = temp_path(name, "avi");
        let fourcc = videoio::VideoWriter::fourcc('M', 'J', 'P', 'G').unwrap();
        let mut writer =
            videoio::VideoWriter::new(path.to_str().unwrap(), fourcc, 10.0, Size::new(160, 120), true)
                .unwrap();
        assert!(writer.is_opened().unwrap());
        for step in 0..frames {
            let mut frame =
                Mat::new_rows_cols_with_default(120, 160, CV_8UC3, Scalar::all(90.0)).unwrap();
            imgproc::rectangle(
                &mut frame,
                Rect::new(40 + step * 2, 40, 30, 30),
                Scalar::new(0.0, 255.0, 0.0, 0.0),
                imgproc::FILLED,
                imgproc::LINE_8,
                0,
            )
            .unwrap();
            writer.write(&frame).unwrap();
        }
        writer.release().unwrap();
        path
    }

    fn read_events(path: &Path) -> Vec<Value> {
        let contents = std::fs::read_to_string(path).unwrap();
        contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn frame_indices(events: &[Value]) -> Vec<u64> {
        events
            .iter()
            .filter(|event| event["event"] == "frame")
            .map(|event| event["frame_index"].as_u64().unwrap())
            .collect()
    }

    fn camshift_args(args: &[&str]) -> (CommonArgs, CamShiftParams) {
        let cli = crate::Cli::try_parse_from(
            ["roitrack", "camshift"].into_iter().chain(args.iter().copied()),
        )
        .unwrap();
        match cli.mode {
            crate::Mode::Camshift(camshift) => {
                let params = camshift.params().unwrap();
                (camshift.common, params)
            }
            crate::Mode::Track(_) => unreachable!(),
        }
    }

    fn common(args: &[&str]) -> CommonArgs {
        let cli = crate::Cli::try_parse_from(
            ["roitrack", "track"].into_iter().chain(args.iter().copied()),
        )
        .unwrap();
        match cli.mode {
            crate::Mode::Track(track) => track.common,
            crate::Mode::Camshift(_) => unreachable!(),
        }
    }

    #[test]
    fn headless_display_never_reports_keys() {
        let display = Display::open("test", true, 1);
        assert!(!display.enabled);
        let frame = Mat::default();
        assert_eq!(display.show(&frame).unwrap(), Key::None);
        display.close().unwrap();
    }

    #[test]
    fn frame_limit() {
        assert!(!frame_limit_reached(&common(&[]), 1_000_000));
        let limited = common(&["--max-frames", "3"]);
        assert!(!frame_limit_reached(&limited, 2));
        assert!(frame_limit_reached(&limited, 3));
    }

    #[test]
    fn fixed_region_is_clamped_or_rejected() {
        let frame = Mat::zeros(100, 100, opencv::core::CV_8UC3)
            .unwrap()
            .to_mat()
            .unwrap();
        assert_eq!(
            fixed_region(Rect::new(90, 90, 20, 20), &frame).unwrap(),
            Rect::new(90, 90, 10, 10)
        );
        assert!(fixed_region(Rect::new(200, 0, 20, 20), &frame).is_err());
    }

    #[test]
    fn missing_source_is_an_error() {
        let args = common(&["--file", "/nonexistent/roitrack.mp4", "--headless", "--roi", "0,0,5,5"]);
        let err = run_track(&args, TrackerKind::Kcf, TrackerOptions::default(), false).unwrap_err();
        assert!(err.to_string().contains("Cannot open video source"));
    }

    #[test]
    fn to_gray_has_one_channel() {
        let frame = Mat::zeros(4, 4, opencv::core::CV_8UC3)
            .unwrap()
            .to_mat()
            .unwrap();
        assert_eq!(to_gray(&frame).unwrap().channels(), 1);
    }

    #[test]
    fn track_runs_to_end_of_stream_after_warmup() {
        let clip = write_clip("track-eos", 8);
        let log = temp_path("track-eos", "jsonl");
        let args = common(&[
            "--file",
            clip.to_str().unwrap(),
            "--headless",
            "--roi",
            "40,40,30,30",
            "--warmup-frames",
            "2",
            "--log-interval-seconds",
            "3600",
            "--log-json",
            log.to_str().unwrap(),
        ]);
        run_track(&args, TrackerKind::Kcf, TrackerOptions::default(), false).unwrap();

        let events = read_events(&log);
        std::fs::remove_file(&clip).unwrap();
        std::fs::remove_file(&log).unwrap();

        assert_eq!(events[0]["event"], "session_start");
        assert_eq!(events[0]["tracker"], "KCF");
        // Two warmup frames are dropped, so the region seeds on frame 3.
        assert_eq!(events[1]["event"], "selection");
        assert_eq!(events[1]["frame_index"], 3);
        assert_eq!(frame_indices(&events), vec![3, 4, 5, 6, 7, 8]);
        let summary = events.last().unwrap();
        assert_eq!(summary["event"], "summary");
        assert_eq!(summary["frame_index"], 8);
        assert_eq!(summary["total_frames"], 6);
    }

    #[test]
    fn track_stops_at_frame_limit() {
        let clip = write_clip("track-limit", 8);
        let log = temp_path("track-limit", "jsonl");
        let args = common(&[
            "--file",
            clip.to_str().unwrap(),
            "--headless",
            "--roi",
            "40,40,30,30",
            "--warmup-frames",
            "0",
            "--max-frames",
            "4",
            "--log-interval-seconds",
            "3600",
            "--log-json",
            log.to_str().unwrap(),
        ]);
        run_track(&args, TrackerKind::Kcf, TrackerOptions::default(), false).unwrap();

        let events = read_events(&log);
        std::fs::remove_file(&clip).unwrap();
        std::fs::remove_file(&log).unwrap();

        assert_eq!(events[1]["frame_index"], 1);
        assert_eq!(frame_indices(&events), vec![1, 2, 3, 4]);
        let summary = events.last().unwrap();
        assert_eq!(summary["event"], "summary");
        assert_eq!(summary["frame_index"], 4);
        assert_eq!(summary["total_frames"], 4);
    }

    #[test]
    fn warmup_longer_than_clip_is_an_error() {
        let clip = write_clip("track-short", 3);
        let args = common(&[
            "--file",
            clip.to_str().unwrap(),
            "--headless",
            "--roi",
            "40,40,30,30",
            "--warmup-frames",
            "5",
        ]);
        let result = run_track(&args, TrackerKind::Kcf, TrackerOptions::default(), false);
        std::fs::remove_file(&clip).unwrap();
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Cannot read video source"));
    }

    #[test]
    fn camshift_runs_headless_to_end_of_stream() {
        let clip = write_clip("camshift-eos", 8);
        let log = temp_path("camshift-eos", "jsonl");
        let (args, params) = camshift_args(&[
            "--file",
            clip.to_str().unwrap(),
            "--headless",
            "--roi",
            "40,40,30,30",
            "--log-interval-seconds",
            "3600",
            "--log-json",
            log.to_str().unwrap(),
        ]);
        run_camshift(&args, params).unwrap();

        let events = read_events(&log);
        std::fs::remove_file(&clip).unwrap();
        std::fs::remove_file(&log).unwrap();

        assert_eq!(events[0]["event"], "session_start");
        assert_eq!(events[0]["mode"], "camshift");
        // One warmup frame plus the seeding frame come before tracking starts.
        assert_eq!(events[1]["event"], "selection");
        assert_eq!(events[1]["frame_index"], 2);
        assert_eq!(frame_indices(&events), vec![3, 4, 5, 6, 7, 8]);
        assert!(events
            .iter()
            .any(|event| event["event"] == "frame" && event["tracked"] == true));
        let summary = events.last().unwrap();
        assert_eq!(summary["event"], "summary");
        assert_eq!(summary["total_frames"], 6);
    }

    #[test]
    fn camshift_stops_at_frame_limit() {
        let clip = write_clip("camshift-limit", 8);
        let log = temp_path("camshift-limit", "jsonl");
        let (args, params) = camshift_args(&[
            "--file",
            clip.to_str().unwrap(),
            "--headless",
            "--roi",
            "40,40,30,30",
            "--max-frames",
            "5",
            "--log-interval-seconds",
            "3600",
            "--log-json",
            log.to_str().unwrap(),
        ]);
        run_camshift(&args, params).unwrap();

        let events = read_events(&log);
        std::fs::remove_file(&clip).unwrap();
        std::fs::remove_file(&log).unwrap();

        assert_eq!(frame_indices(&events), vec![3, 4, 5]);
        assert_eq!(events.last().unwrap()["frame_index"], 5);
    }
}
