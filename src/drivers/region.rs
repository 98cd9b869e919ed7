use std::ops::Range;

use crate::drivers::{ChannelSeries, TimeWindow};

/// Index of the sample nearest to `target` in a non-decreasing time array.
/// Ties go to the lower index. `None` only for an empty array.
pub fn nearest_index(time: &[f64], target: f64) -> Option<usize> {
    if time.is_empty() {
        return None;
    }
    let upper = time.partition_point(|&t| t < target);
    if upper == 0 {
        return Some(0);
    }
    if upper == time.len() {
        return Some(time.len() - 1);
    }
    let below = upper - 1;
    if target - time[below] <= time[upper] - target {
        // walk back over repeated timestamps so the lowest index wins
        let value = time[below];
        Some(time[..=below].partition_point(|&t| t < value))
    } else {
        Some(upper)
    }
}

/// `[idx(t0), idx(t1))`, always a valid (possibly empty) range into `time`.
pub fn crop_bounds(time: &[f64], window: &TimeWindow) -> Range<usize> {
    match (nearest_index(time, window.t0), nearest_index(time, window.t1)) {
        (Some(start), Some(end)) => start.min(end)..end,
        _ => 0..0,
    }
}

/// Cropped copy of `series`. An empty result is returned as is; the fitter
/// rejects it.
pub fn crop(series: &ChannelSeries, window: &TimeWindow) -> ChannelSeries {
    series.slice(crop_bounds(series.time(), window))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_timestamps_round_trip() {
        let time = [0.0, 0.1, 0.25, 0.7, 1.3, 2.0];
        for (i, &t) in time.iter().enumerate() {
            assert_eq!(nearest_index(&time, t), Some(i));
        }
    }

    #[test]
    fn nearest_with_ties_and_clamping() {
        let time = [0.0, 1.0, 2.0, 3.0];
        assert_eq!(nearest_index(&time, 1.5), Some(1));
        assert_eq!(nearest_index(&time, 1.6), Some(2));
        assert_eq!(nearest_index(&time, -4.0), Some(0));
        assert_eq!(nearest_index(&time, 40.0), Some(3));
        assert_eq!(nearest_index(&[], 1.0), None);
        assert_eq!(nearest_index(&[0.0, 1.0, 1.0, 2.0], 1.0), Some(1));
    }

    #[test]
    fn crop_bounds_are_half_open_and_in_range() {
        let time: Vec<f64> = (0..10).map(f64::from).collect();
        let w = TimeWindow::new(2.2, 6.9).unwrap();
        assert_eq!(crop_bounds(&time, &w), 2..7);
        let outside = TimeWindow::new(20.0, 30.0).unwrap();
        assert_eq!(crop_bounds(&time, &outside), 9..9);
        assert_eq!(crop_bounds(&[], &w), 0..0);
    }

    #[test]
    fn empty_crop_is_not_an_error() {
        let s = ChannelSeries::new("v", "V", vec![0.0, 1.0, 2.0], vec![1.0, 2.0, 3.0]).unwrap();
        let cropped = crop(&s, &TimeWindow::new(1.1, 1.2).unwrap());
        assert!(cropped.is_empty());
        assert_eq!(s.len(), 3);
    }
}
