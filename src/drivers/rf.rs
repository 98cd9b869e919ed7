use crate::drivers::{AnalysisError, ChannelSeries};

/// Forward and reflected power of one RF generator, canonical time.
#[derive(Clone, Debug)]
pub struct RfLog {
    pub forward: ChannelSeries,
    pub reflected: ChannelSeries,
}

impl RfLog {
    pub fn new(forward: ChannelSeries, reflected: ChannelSeries) -> Self {
        Self { forward, reflected }
    }

    pub fn series(&self) -> [&ChannelSeries; 2] {
        [&self.forward, &self.reflected]
    }

    /// Summed power of two generators on `points` evenly spaced times
    /// spanning this log's forward record. Each generator is linearly
    /// interpolated and held constant past its own ends.
    pub fn combine(&self, other: &RfLog, points: usize) -> Result<RfLog, AnalysisError> {
        if points < 2 {
            return Err(AnalysisError::invalid(format!(
                "need at least two interpolation points, got {points}"
            )));
        }
        let span = self.forward.span().ok_or(AnalysisError::InsufficientData {
            needed: 1,
            actual: 0,
        })?;
        let step = span.duration() / (points - 1) as f64;
        let axis: Vec<f64> = (0..points).map(|k| span.t0 + step * k as f64).collect();
        let total = |a: &ChannelSeries, b: &ChannelSeries| -> Vec<f64> {
            axis.iter()
                .map(|&t| a.interpolate(t).unwrap_or(0.0) + b.interpolate(t).unwrap_or(0.0))
                .collect()
        };
        let forward = ChannelSeries::new(
            "P forward total",
            "W",
            axis.clone(),
            total(&self.forward, &other.forward),
        )?;
        let reflected = ChannelSeries::new(
            "P reflected total",
            "W",
            axis.clone(),
            total(&self.reflected, &other.reflected),
        )?;
        Ok(RfLog::new(forward, reflected))
    }
}
