use log::debug;
use serde::{Deserialize, Serialize};

use crate::drivers::{AnalysisError, ChannelSeries, TimeWindow};

/// Year of the canonical epoch origin.
pub const CANONICAL_ORIGIN_YEAR: i32 = 1904;
/// Seconds between 1904-01-01 and 1970-01-01, both UTC midnight.
pub const UNIX_EPOCH_OFFSET_S: f64 = 2_082_844_800.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Seconds,
    Milliseconds,
}

impl TimeUnit {
    pub fn to_seconds(self, ticks: f64) -> f64 {
        match self {
            TimeUnit::Seconds => ticks,
            TimeUnit::Milliseconds => ticks / 1000.0,
        }
    }
}

/// Native clock description of one instrument.
///
/// `canonical = raw * unit + reference_offset`, with `reference_offset` the
/// position of the instrument's origin on the canonical axis in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstrumentEpoch {
    pub reference_offset: f64,
    pub unit: TimeUnit,
    pub origin_year: i32,
}

impl InstrumentEpoch {
    /// Clock counting from January 1st of `origin_year`, UTC.
    pub fn from_origin_year(origin_year: i32, unit: TimeUnit) -> Self {
        let days = days_from_civil(origin_year, 1, 1) - days_from_civil(CANONICAL_ORIGIN_YEAR, 1, 1);
        Self {
            reference_offset: days as f64 * 86_400.0,
            unit,
            origin_year,
        }
    }

    /// LabVIEW/NI-DAQ style seconds since 1904.
    pub fn labview_seconds() -> Self {
        Self::from_origin_year(CANONICAL_ORIGIN_YEAR, TimeUnit::Seconds)
    }

    /// Unix milliseconds, as stamped by the spectrometer software.
    pub fn unix_milliseconds() -> Self {
        Self::from_origin_year(1970, TimeUnit::Milliseconds)
    }

    pub fn to_canonical(&self, raw: f64) -> f64 {
        self.unit.to_seconds(raw) + self.reference_offset
    }

    pub fn convert(&self, raw: &[f64]) -> Vec<f64> {
        raw.iter().map(|&t| self.to_canonical(t)).collect()
    }
}

/// Days since 1970-01-01 for a proleptic Gregorian date.
fn days_from_civil(year: i32, month: u32, day: u32) -> i64 {
    let y = i64::from(year) - i64::from(month <= 2);
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let m = i64::from(month);
    let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + i64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Canonical start/end of one present instrument.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InstrumentSpan {
    pub instrument: String,
    pub span: TimeWindow,
}

impl InstrumentSpan {
    pub fn of(instrument: impl Into<String>, series: &[&ChannelSeries]) -> Option<Self> {
        let span = series
            .iter()
            .filter_map(|s| s.span())
            .reduce(|a, b| a.hull(&b))?;
        Some(Self {
            instrument: instrument.into(),
            span,
        })
    }
}

/// Shared relative time axis derived from the instruments that are present.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReconciledClock {
    /// Canonical time that becomes zero.
    pub t0_global: f64,
    /// `[0, t1_global]`: from the earliest start to the latest end.
    pub extent: TimeWindow,
    /// Relative window where every present instrument has data.
    pub overlap: Option<TimeWindow>,
    /// Per-instrument spans on the relative axis.
    pub members: Vec<InstrumentSpan>,
}

impl ReconciledClock {
    /// Absent instruments are simply not passed in.
    pub fn from_spans(spans: &[InstrumentSpan]) -> Result<Self, AnalysisError> {
        let first = spans.first().ok_or(AnalysisError::InsufficientData {
            needed: 1,
            actual: 0,
        })?;
        let t0_global = spans
            .iter()
            .map(|s| s.span.t0)
            .fold(first.span.t0, f64::min);
        let t_last = spans
            .iter()
            .map(|s| s.span.t1)
            .fold(first.span.t1, f64::max);
        let members: Vec<InstrumentSpan> = spans
            .iter()
            .map(|s| InstrumentSpan {
                instrument: s.instrument.clone(),
                span: s.span.shifted(t0_global),
            })
            .collect();
        let overlap = members
            .iter()
            .map(|m| Some(m.span))
            .reduce(|acc, next| match (acc, next) {
                (Some(a), Some(b)) => a.intersect(&b),
                _ => None,
            })
            .flatten();
        debug!(
            "reconciled {} instruments: t0_global={t0_global}, extent={}, overlap={overlap:?}",
            members.len(),
            t_last - t0_global
        );
        Ok(Self {
            t0_global,
            extent: TimeWindow {
                t0: 0.0,
                t1: t_last - t0_global,
            },
            overlap,
            members,
        })
    }

    pub fn relative(&self, canonical: f64) -> f64 {
        canonical - self.t0_global
    }

    /// Move a canonical-time series onto the shared relative axis.
    pub fn align(&self, series: &ChannelSeries) -> ChannelSeries {
        series.shifted(self.t0_global)
    }
}
