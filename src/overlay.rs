use anyhow::Result;
use opencv::{
    core::{Mat, Point, Rect, Scalar, Vector},
    imgproc,
};

const BOX_COLOR: (f64, f64, f64) = (255.0, 0.0, 0.0);
const FAILURE_COLOR: (f64, f64, f64) = (0.0, 0.0, 255.0);
const INFO_COLOR: (f64, f64, f64) = (50.0, 170.0, 50.0);
const POINT_COLOR: (f64, f64, f64) = (160.0, 0.0, 0.0);

pub const FAILURE_TEXT: &str = "Tracking failure detected";
pub const SELECT_HINT: &str = "press s to select a region";

fn bgr((b, g, r): (f64, f64, f64)) -> Scalar {
    Scalar::new(b, g, r, 0.0)
}

fn text(frame: &mut Mat, label: &str, origin: Point, color: (f64, f64, f64)) -> Result<()> {
    imgproc::put_text(
        frame,
        label,
        origin,
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.75,
        bgr(color),
        2,
        imgproc::LINE_8,
        false,
    )?;
    Ok(())
}

pub fn tracker_label(name: &str) -> String {
    format!("{} Tracker", name)
}

pub fn fps_label(fps: f64) -> String {
    format!("FPS : {}", fps as i64)
}

pub fn point_label(rect: Rect) -> String {
    format!("point : ({}, {})", rect.x, rect.y)
}

/// Axis-aligned box from a pluggable tracker.
pub fn draw_box(frame: &mut Mat, rect: Rect) -> Result<()> {
    imgproc::rectangle(frame, rect, bgr(BOX_COLOR), 6, imgproc::LINE_8, 0)?;
    Ok(())
}

/// Rotated CamShift box, given as its corner polygon.
pub fn draw_polygon(frame: &mut Mat, polygon: &Vector<Point>) -> Result<()> {
    let mut polygons = Vector::<Vector<Point>>::new();
    polygons.push(polygon.clone());
    imgproc::polylines(frame, &polygons, true, bgr(BOX_COLOR), 2, imgproc::LINE_8, 0)?;
    Ok(())
}

pub fn draw_failure(frame: &mut Mat) -> Result<()> {
    text(frame, FAILURE_TEXT, Point::new(100, 100), FAILURE_COLOR)
}

/// Tracker name, update rate and top-left corner of the current box.
pub fn draw_hud(frame: &mut Mat, name: &str, fps: f64, rect: Option<Rect>) -> Result<()> {
    text(frame, &tracker_label(name), Point::new(100, 20), INFO_COLOR)?;
    text(frame, &fps_label(fps), Point::new(100, 50), INFO_COLOR)?;
    if let Some(rect) = rect {
        text(frame, &point_label(rect), Point::new(100, 80), POINT_COLOR)?;
    }
    Ok(())
}

pub fn draw_hint(frame: &mut Mat) -> Result<()> {
    text(frame, SELECT_HINT, Point::new(10, 24), INFO_COLOR)
}
