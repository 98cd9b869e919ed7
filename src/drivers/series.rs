use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::drivers::AnalysisError;

/// Inclusive `[t0, t1]` window in seconds on some shared time axis.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub t0: f64,
    pub t1: f64,
}

impl TimeWindow {
    pub fn new(t0: f64, t1: f64) -> Result<Self, AnalysisError> {
        if !(t0.is_finite() && t1.is_finite()) || t0 > t1 {
            return Err(AnalysisError::invalid(format!(
                "time window [{t0}, {t1}] is not ordered"
            )));
        }
        Ok(Self { t0, t1 })
    }

    pub fn duration(&self) -> f64 {
        self.t1 - self.t0
    }

    pub fn contains(&self, t: f64) -> bool {
        t >= self.t0 && t <= self.t1
    }

    /// Common part of two windows, `None` when they do not touch.
    pub fn intersect(&self, other: &TimeWindow) -> Option<TimeWindow> {
        let t0 = self.t0.max(other.t0);
        let t1 = self.t1.min(other.t1);
        (t0 <= t1).then_some(TimeWindow { t0, t1 })
    }

    /// Smallest window covering both.
    pub fn hull(&self, other: &TimeWindow) -> TimeWindow {
        TimeWindow {
            t0: self.t0.min(other.t0),
            t1: self.t1.max(other.t1),
        }
    }

    pub fn shifted(&self, offset: f64) -> TimeWindow {
        TimeWindow {
            t0: self.t0 - offset,
            t1: self.t1 - offset,
        }
    }
}

/// One sampled quantity on its own clock. Immutable once built; every
/// transformation hands back a new series.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelSeries {
    pub label: String,
    pub unit: String,
    time: Vec<f64>,
    values: Vec<f64>,
}

impl ChannelSeries {
    pub fn new(
        label: impl Into<String>,
        unit: impl Into<String>,
        time: Vec<f64>,
        values: Vec<f64>,
    ) -> Result<Self, AnalysisError> {
        let label = label.into();
        if time.len() != values.len() {
            return Err(AnalysisError::invalid(format!(
                "channel {label}: {} timestamps but {} values",
                time.len(),
                values.len()
            )));
        }
        if time.windows(2).any(|w| !(w[1] >= w[0])) {
            return Err(AnalysisError::invalid(format!(
                "channel {label}: timestamps are not non-decreasing"
            )));
        }
        Ok(Self {
            label,
            unit: unit.into(),
            time,
            values,
        })
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// First to last timestamp, `None` for an empty series.
    pub fn span(&self) -> Option<TimeWindow> {
        match (self.time.first(), self.time.last()) {
            (Some(&t0), Some(&t1)) => Some(TimeWindow { t0, t1 }),
            _ => None,
        }
    }

    /// Same samples with `offset` subtracted from every timestamp.
    pub fn shifted(&self, offset: f64) -> ChannelSeries {
        ChannelSeries {
            label: self.label.clone(),
            unit: self.unit.clone(),
            time: self.time.iter().map(|t| t - offset).collect(),
            values: self.values.clone(),
        }
    }

    /// Same timestamps, values replaced. Lengths must match.
    pub fn with_values(&self, values: Vec<f64>) -> Result<ChannelSeries, AnalysisError> {
        ChannelSeries::new(self.label.clone(), self.unit.clone(), self.time.clone(), values)
    }

    pub fn relabel(mut self, label: impl Into<String>, unit: impl Into<String>) -> ChannelSeries {
        self.label = label.into();
        self.unit = unit.into();
        self
    }

    pub fn map_values(&self, f: impl Fn(f64) -> f64) -> ChannelSeries {
        ChannelSeries {
            label: self.label.clone(),
            unit: self.unit.clone(),
            time: self.time.clone(),
            values: self.values.iter().copied().map(f).collect(),
        }
    }

    pub fn slice(&self, range: std::ops::Range<usize>) -> ChannelSeries {
        let end = range.end.min(self.len());
        let start = range.start.min(end);
        ChannelSeries {
            label: self.label.clone(),
            unit: self.unit.clone(),
            time: self.time[start..end].to_vec(),
            values: self.values[start..end].to_vec(),
        }
    }

    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.time.iter().copied().zip(self.values.iter().copied())
    }

    /// Value at `t` by linear interpolation, held constant beyond either end.
    pub fn interpolate(&self, t: f64) -> Option<f64> {
        let n = self.len();
        if n == 0 {
            return None;
        }
        if t <= self.time[0] {
            return Some(self.values[0]);
        }
        if t >= self.time[n - 1] {
            return Some(self.values[n - 1]);
        }
        let hi = self.time.partition_point(|&x| x <= t);
        let lo = hi - 1;
        let (t_lo, t_hi) = (self.time[lo], self.time[hi]);
        if t_hi == t_lo {
            return Some(self.values[lo]);
        }
        let frac = (t - t_lo) / (t_hi - t_lo);
        Some(self.values[lo] + frac * (self.values[hi] - self.values[lo]))
    }
}

/// Rectangular table of co-acquired channels sharing one time column.
#[derive(Clone, Debug)]
pub struct InstrumentTable {
    time: Vec<f64>,
    channels: BTreeMap<String, Vec<f64>>,
}

impl InstrumentTable {
    pub fn new(time: Vec<f64>) -> Self {
        Self {
            time,
            channels: BTreeMap::new(),
        }
    }

    pub fn with_channel(
        mut self,
        name: impl Into<String>,
        values: Vec<f64>,
    ) -> Result<Self, AnalysisError> {
        let name = name.into();
        if values.len() != self.time.len() {
            return Err(AnalysisError::invalid(format!(
                "channel {name} has {} samples, time column has {}",
                values.len(),
                self.time.len()
            )));
        }
        self.channels.insert(name, values);
        Ok(self)
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    pub fn channel(&self, name: &str, unit: &str) -> Result<ChannelSeries, AnalysisError> {
        let values = self
            .channels
            .get(name)
            .ok_or_else(|| AnalysisError::invalid(format!("no channel named {name}")))?;
        ChannelSeries::new(name, unit, self.time.clone(), values.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> ChannelSeries {
        ChannelSeries::new("ramp", "V", vec![0.0, 1.0, 2.0, 4.0], vec![0.0, 10.0, 20.0, 40.0])
            .unwrap()
    }

    #[test]
    fn rejects_unordered_or_ragged_series() {
        assert!(ChannelSeries::new("x", "", vec![0.0, 2.0, 1.0], vec![0.0; 3]).is_err());
        assert!(ChannelSeries::new("x", "", vec![0.0, 1.0], vec![0.0; 3]).is_err());
        assert!(ChannelSeries::new("x", "", vec![1.0, 1.0], vec![0.0; 2]).is_ok());
    }

    #[test]
    fn shift_keeps_spacing_and_source_untouched() {
        let raw = ramp();
        let shifted = raw.shifted(1.0);
        assert_eq!(shifted.time(), &[-1.0, 0.0, 1.0, 3.0]);
        assert_eq!(shifted.values(), raw.values());
        assert_eq!(raw.time()[0], 0.0);
    }

    #[test]
    fn interpolation_clamps_at_ends() {
        let s = ramp();
        assert_eq!(s.interpolate(-5.0), Some(0.0));
        assert_eq!(s.interpolate(3.0), Some(30.0));
        assert_eq!(s.interpolate(9.0), Some(40.0));
    }

    #[test]
    fn window_algebra() {
        let a = TimeWindow::new(0.0, 10.0).unwrap();
        let b = TimeWindow::new(5.0, 20.0).unwrap();
        assert_eq!(a.intersect(&b), Some(TimeWindow { t0: 5.0, t1: 10.0 }));
        assert_eq!(a.hull(&b), TimeWindow { t0: 0.0, t1: 20.0 });
        let c = TimeWindow::new(11.0, 12.0).unwrap();
        assert_eq!(a.intersect(&c), None);
        assert!(TimeWindow::new(2.0, 1.0).is_err());
    }

    #[test]
    fn table_rejects_mismatched_channel() {
        let table = InstrumentTable::new(vec![0.0, 1.0]);
        assert!(table.clone().with_channel("a", vec![1.0]).is_err());
        let table = table.with_channel("a", vec![1.0, 2.0]).unwrap();
        assert_eq!(table.channel("a", "V").unwrap().values(), &[1.0, 2.0]);
        assert!(table.channel("b", "V").is_err());
    }
}
