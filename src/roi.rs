use anyhow::{Context, Result};
use opencv::{core::Rect, highgui, prelude::*};

const SELECT_WINDOW: &str = "roi";

/// Parses `x,y,w,h` into a rectangle. Used as a clap value parser.
pub fn parse(value: &str) -> Result<Rect, String> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        return Err(format!("expected x,y,w,h but got {:?}", value));
    }
    let mut numbers = [0i32; 4];
    for (slot, part) in numbers.iter_mut().zip(&parts) {
        *slot = part
            .parse()
            .map_err(|_| format!("{:?} is not an integer", part))?;
    }
    let [x, y, width, height] = numbers;
    if width <= 0 || height <= 0 {
        return Err(format!("region {:?} has no area", value));
    }
    Ok(Rect::new(x, y, width, height))
}

/// Intersects `rect` with a `width` x `height` frame. Returns `None` when
/// nothing of the region is left inside the frame.
pub fn clamp_to_frame(rect: Rect, width: i32, height: i32) -> Option<Rect> {
    // Far edges in i64 so origins near i32::MAX cannot overflow.
    let x1 = i64::from(rect.x).max(0);
    let y1 = i64::from(rect.y).max(0);
    let x2 = (i64::from(rect.x) + i64::from(rect.width)).min(i64::from(width));
    let y2 = (i64::from(rect.y) + i64::from(rect.height)).min(i64::from(height));
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    // All four values now lie within 0..=width/height.
    Some(Rect::new(x1 as i32, y1 as i32, (x2 - x1) as i32, (y2 - y1) as i32))
}

/// Clamps a region to the bounds of `frame`.
pub fn fit(rect: Rect, frame: &Mat) -> Option<Rect> {
    clamp_to_frame(rect, frame.cols(), frame.rows())
}

/// Shows the interactive selection prompt on `frame`. Returns `None` when the
/// user cancels (OpenCV reports an empty rectangle in that case).
pub fn select(frame: &Mat) -> Result<Option<Rect>> {
    let rect = highgui::select_roi_def(SELECT_WINDOW, frame)
        .context("Failed to run region selection")?;
    highgui::destroy_window(SELECT_WINDOW).context("Failed to close selection window")?;
    Ok(fit(rect, frame))
}
