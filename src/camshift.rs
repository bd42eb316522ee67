//! Hue-histogram tracking on top of OpenCV's CamShift.

use anyhow::{Context, Result};
use opencv::{
    core::{self, Mat, Point, Rect, RotatedRect, Scalar, TermCriteria, Vector},
    imgproc,
    prelude::*,
    video,
};

/// Histogram and search settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CamShiftParams {
    pub hue_bins: i32,
    pub min_saturation: f64,
    pub min_value: f64,
    pub max_iterations: i32,
    pub epsilon: f64,
}

impl Default for CamShiftParams {
    fn default() -> Self {
        Self {
            hue_bins: 180,
            min_saturation: 60.0,
            min_value: 32.0,
            max_iterations: 10,
            epsilon: 1.0,
        }
    }
}

impl CamShiftParams {
    fn criteria(&self) -> Result<TermCriteria> {
        let kind = core::TermCriteria_Type::COUNT as i32 | core::TermCriteria_Type::EPS as i32;
        Ok(TermCriteria::new(kind, self.max_iterations, self.epsilon)?)
    }
}

/// Result of one CamShift step.
#[derive(Clone, Copy, Debug)]
pub struct CamShiftResult {
    pub rotated: RotatedRect,
    pub bounds: Rect,
}

pub struct CamShiftTracker {
    params: CamShiftParams,
    histogram: Mat,
    seed: Rect,
    window: Rect,
    hsv: Mat,
    mask: Mat,
    raw_projection: Mat,
    back_projection: Mat,
}

impl CamShiftTracker {
    /// Builds the hue model from `roi` of a BGR `frame`.
    pub fn new(frame: &Mat, roi: Rect, params: CamShiftParams) -> Result<Self> {
        let histogram = hue_histogram(frame, roi, &params)?;
        Ok(Self {
            params,
            histogram,
            seed: roi,
            window: roi,
            hsv: Mat::default(),
            mask: Mat::default(),
            raw_projection: Mat::default(),
            back_projection: Mat::default(),
        })
    }

    pub fn window(&self) -> Rect {
        self.window
    }

    /// Runs CamShift on the next frame. Returns `None` if the search window
    /// collapsed, in which case the window is reset to the selected region.
    pub fn update(&mut self, frame: &Mat) -> Result<Option<CamShiftResult>> {
        imgproc::cvt_color_def(frame, &mut self.hsv, imgproc::COLOR_BGR2HSV)
            .context("Failed to convert frame to HSV")?;
        let images = Vector::<Mat>::from_iter([self.hsv.clone()]);
        imgproc::calc_back_project(
            &images,
            &Vector::from_slice(&[0]),
            &self.histogram,
            &mut self.raw_projection,
            &Vector::from_slice(&[0.0, 180.0]),
            1.0,
        )
        .context("Failed to back-project hue histogram")?;
        // Unsaturated pixels report hue 0 and would otherwise look like red.
        saturation_mask(&self.hsv, &self.params, &mut self.mask)?;
        core::bitwise_and_def(&self.raw_projection, &self.mask, &mut self.back_projection)
            .context("Failed to mask back-projection")?;

        if self.window.area() == 0 {
            self.window = self.seed;
            return Ok(None);
        }
        let rotated = video::cam_shift(&self.back_projection, &mut self.window, self.params.criteria()?)
            .context("CamShift failed")?;
        if self.window.area() == 0 || rotated.size.width < 1.0 || rotated.size.height < 1.0 {
            tracing::debug!("CamShift window collapsed, resetting to {:?}", self.seed);
            self.window = self.seed;
            return Ok(None);
        }
        let bounds = rotated.bounding_rect().context("Failed to bound rotated box")?;
        Ok(Some(CamShiftResult { rotated, bounds }))
    }
}

/// Normalized hue histogram of the region, ignoring washed-out and dark pixels.
fn hue_histogram(frame: &Mat, roi: Rect, params: &CamShiftParams) -> Result<Mat> {
    let region = frame
        .roi(roi)
        .context("Selected region is outside the frame")?
        .clone_pointee();
    let mut hsv = Mat::default();
    imgproc::cvt_color_def(&region, &mut hsv, imgproc::COLOR_BGR2HSV)
        .context("Failed to convert region to HSV")?;

    let mut mask = Mat::default();
    saturation_mask(&hsv, params, &mut mask)?;

    let mut raw = Mat::default();
    let images = Vector::<Mat>::from_iter([hsv]);
    imgproc::calc_hist(
        &images,
        &Vector::from_slice(&[0]),
        &mask,
        &mut raw,
        &Vector::from_slice(&[params.hue_bins]),
        &Vector::from_slice(&[0.0, 180.0]),
        false,
    )
    .context("Failed to compute hue histogram")?;

    let mut histogram = Mat::default();
    core::normalize(&raw, &mut histogram, 0.0, 255.0, core::NORM_MINMAX, -1, &core::no_array())
        .context("Failed to normalize hue histogram")?;
    Ok(histogram)
}

/// Pixels bright and saturated enough for their hue to be meaningful.
fn saturation_mask(hsv: &Mat, params: &CamShiftParams, mask: &mut Mat) -> Result<()> {
    core::in_range(
        hsv,
        &Scalar::new(0.0, params.min_saturation, params.min_value, 0.0),
        &Scalar::new(180.0, 255.0, 255.0, 0.0),
        mask,
    )
    .context("Failed to build saturation mask")?;
    Ok(())
}

/// Corner points of a rotated box, rounded to pixels, as a closed polygon.
pub fn box_polygon(rotated: RotatedRect) -> Result<Vector<Point>> {
    let mut corners = Mat::default();
    imgproc::box_points(rotated, &mut corners).context("Failed to compute box corners")?;
    let mut polygon = Vector::<Point>::new();
    for row in 0..corners.rows() {
        let x = *corners.at_2d::<f32>(row, 0)?;
        let y = *corners.at_2d::<f32>(row, 1)?;
        polygon.push(Point::new(x.round() as i32, y.round() as i32));
    }
    Ok(polygon)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Point2f, Size2f, CV_8UC3};

    /// Gray frame with a saturated green square at `square`.
    fn frame_with_square(square: Rect) -> Mat {
        let mut frame = Mat::new_rows_cols_with_default(120, 160, CV_8UC3, Scalar::all(90.0))
            .unwrap();
        imgproc::rectangle(
            &mut frame,
            square,
            Scalar::new(0.0, 255.0, 0.0, 0.0),
            imgproc::FILLED,
            imgproc::LINE_8,
            0,
        )
        .unwrap();
        frame
    }

    #[test]
    fn default_params_follow_hsv_ranges() {
        let params = CamShiftParams::default();
        assert_eq!(params.hue_bins, 180);
        assert_eq!(params.min_saturation, 60.0);
        assert_eq!(params.min_value, 32.0);
        assert_eq!(params.max_iterations, 10);
    }

    #[test]
    fn histogram_is_normalized_to_255() {
        let square = Rect::new(40, 40, 30, 30);
        let frame = frame_with_square(square);
        let hist = hue_histogram(&frame, square, &CamShiftParams::default()).unwrap();
        assert_eq!(hist.rows(), 180);
        let mut max = 0.0;
        core::min_max_loc(&hist, None, Some(&mut max), None, None, &core::no_array()).unwrap();
        assert_eq!(max, 255.0);
        // Pure green sits in hue bin 60; the gray background is masked out.
        assert_eq!(*hist.at_2d::<f32>(60, 0).unwrap(), 255.0);
        assert_eq!(*hist.at_2d::<f32>(0, 0).unwrap(), 0.0);
    }

    #[test]
    fn follows_a_moving_square() {
        let start = Rect::new(40, 40, 30, 30);
        let mut tracker =
            CamShiftTracker::new(&frame_with_square(start), start, CamShiftParams::default())
                .unwrap();

        let moved = Rect::new(50, 45, 30, 30);
        let result = tracker.update(&frame_with_square(moved)).unwrap().unwrap();
        let center_x = result.bounds.x + result.bounds.width / 2;
        let center_y = result.bounds.y + result.bounds.height / 2;
        assert!((center_x - 65).abs() <= 3, "center x {}", center_x);
        assert!((center_y - 60).abs() <= 3, "center y {}", center_y);
    }

    #[test]
    fn lost_target_resets_window() {
        let start = Rect::new(40, 40, 30, 30);
        let mut tracker =
            CamShiftTracker::new(&frame_with_square(start), start, CamShiftParams::default())
                .unwrap();
        let blank = Mat::new_rows_cols_with_default(120, 160, CV_8UC3, Scalar::all(90.0)).unwrap();
        assert!(tracker.update(&blank).unwrap().is_none());
        assert_eq!(tracker.window(), start);
    }

    #[test]
    fn axis_aligned_box_polygon() {
        let rotated =
            RotatedRect::new(Point2f::new(50.0, 50.0), Size2f::new(20.0, 10.0), 0.0).unwrap();
        let polygon = box_polygon(rotated).unwrap();
        assert_eq!(polygon.len(), 4);
        let mut xs: Vec<i32> = polygon.iter().map(|p| p.x).collect();
        let mut ys: Vec<i32> = polygon.iter().map(|p| p.y).collect();
        xs.sort();
        ys.sort();
        assert_eq!(xs, vec![40, 40, 60, 60]);
        assert_eq!(ys, vec![45, 45, 55, 55]);
    }
}
