use std::collections::BTreeMap;

use log::debug;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::drivers::{AnalysisError, ChannelSeries, TimeWindow};

/// H-alpha, nm.
pub const H_ALPHA_NM: f64 = 656.279;
/// H-beta, nm.
pub const H_BETA_NM: f64 = 486.135;
/// H-gamma, nm.
pub const H_GAMMA_NM: f64 = 434.0462;

/// Sequence of spectra from one spectrometer run.
#[derive(Clone, Debug)]
pub struct Spectrogram {
    /// Canonical time of each spectrum, seconds.
    time: Vec<f64>,
    /// Wavelength of each column, nm.
    wavelengths: Vec<f64>,
    /// Counts, indexed `[time, wavelength]`.
    intensities: Array2<f64>,
    pub meta: BTreeMap<String, String>,
}

impl Spectrogram {
    pub fn new(
        time: Vec<f64>,
        wavelengths: Vec<f64>,
        intensities: Array2<f64>,
    ) -> Result<Self, AnalysisError> {
        if intensities.dim() != (time.len(), wavelengths.len()) {
            return Err(AnalysisError::invalid(format!(
                "spectrogram is {:?}, expected ({}, {})",
                intensities.dim(),
                time.len(),
                wavelengths.len()
            )));
        }
        Ok(Self {
            time,
            wavelengths,
            intensities,
            meta: BTreeMap::new(),
        })
    }

    pub fn with_meta(mut self, meta: BTreeMap<String, String>) -> Self {
        self.meta = meta;
        self
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    /// Same spectra with `offset` subtracted from every timestamp.
    pub fn shifted(&self, offset: f64) -> Spectrogram {
        Spectrogram {
            time: self.time.iter().map(|t| t - offset).collect(),
            wavelengths: self.wavelengths.clone(),
            intensities: self.intensities.clone(),
            meta: self.meta.clone(),
        }
    }

    pub fn span(&self) -> Option<TimeWindow> {
        match (self.time.first(), self.time.last()) {
            (Some(&t0), Some(&t1)) => Some(TimeWindow { t0, t1 }),
            _ => None,
        }
    }

    pub fn wavelengths(&self) -> &[f64] {
        &self.wavelengths
    }

    pub fn intensities(&self) -> &Array2<f64> {
        &self.intensities
    }

    pub fn spectrum_count(&self) -> usize {
        self.time.len()
    }

    pub fn integration_time_s(&self) -> Option<f64> {
        self.meta
            .get("Integration Time (sec)")
            .and_then(|v| v.trim().parse().ok())
    }

    /// Column whose wavelength is closest to `target_nm`; first one on ties.
    pub fn nearest_column(&self, target_nm: f64) -> Option<usize> {
        self.wavelengths
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f64)>, (idx, &w)| {
                let dist = (w - target_nm).abs();
                match best {
                    Some((_, d)) if d <= dist => best,
                    _ => Some((idx, dist)),
                }
            })
            .map(|(idx, _)| idx)
    }

    /// Intensity over time at the sampled wavelength nearest `target_nm`.
    pub fn track(&self, target_nm: f64) -> Result<SpectralLineTrack, AnalysisError> {
        let column = self.nearest_column(target_nm).ok_or(AnalysisError::InsufficientData {
            needed: 1,
            actual: 0,
        })?;
        let values = self.intensities.column(column).to_vec();
        let series = ChannelSeries::new(
            format!("{target_nm} nm"),
            "counts",
            self.time.clone(),
            values,
        )?;
        debug!(
            "tracking {target_nm} nm at column {column} ({} nm)",
            self.wavelengths[column]
        );
        Ok(SpectralLineTrack {
            target_wavelength: target_nm,
            sampled_wavelength: self.wavelengths[column],
            series,
        })
    }

    /// Full spectrum at time index `index`, as `(wavelength, counts)` pairs.
    pub fn spectrum_at(&self, index: usize) -> Option<Vec<(f64, f64)>> {
        (index < self.time.len()).then(|| {
            self.wavelengths
                .iter()
                .copied()
                .zip(self.intensities.row(index).iter().copied())
                .collect()
        })
    }
}

#[derive(Clone, Debug)]
pub struct SpectralLineTrack {
    pub target_wavelength: f64,
    pub sampled_wavelength: f64,
    pub series: ChannelSeries,
}

/// What re-tracking an already tracked wavelength does.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackPolicy {
    /// Append a duplicate track.
    #[default]
    Accumulate,
    /// Overwrite the earlier track in place, keeping its position.
    Replace,
}

/// Ordered collection of tracks for one spectrometer dataset, owned by the
/// caller and passed to whoever adds tracks.
#[derive(Clone, Debug, Default)]
pub struct LineTracks {
    policy: TrackPolicy,
    tracks: Vec<SpectralLineTrack>,
}

impl LineTracks {
    pub fn new(policy: TrackPolicy) -> Self {
        Self {
            policy,
            tracks: Vec::new(),
        }
    }

    pub fn policy(&self) -> TrackPolicy {
        self.policy
    }

    pub fn track(
        &mut self,
        spectrogram: &Spectrogram,
        target_nm: f64,
    ) -> Result<&SpectralLineTrack, AnalysisError> {
        let track = spectrogram.track(target_nm)?;
        let existing = match self.policy {
            TrackPolicy::Replace => self
                .tracks
                .iter()
                .position(|t| t.target_wavelength == target_nm),
            TrackPolicy::Accumulate => None,
        };
        let idx = match existing {
            Some(idx) => {
                self.tracks[idx] = track;
                idx
            }
            None => {
                self.tracks.push(track);
                self.tracks.len() - 1
            }
        };
        Ok(&self.tracks[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &SpectralLineTrack> {
        self.tracks.iter()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn sample() -> Spectrogram {
        Spectrogram::new(
            vec![0.0, 0.1, 0.2],
            vec![486.0, 500.0, 656.0, 657.0],
            array![
                [1.0, 2.0, 3.0, 4.0],
                [5.0, 6.0, 7.0, 8.0],
                [9.0, 10.0, 11.0, 12.0]
            ],
        )
        .unwrap()
    }

    #[test]
    fn nearest_column_without_interpolation() {
        let s = sample();
        let track = s.track(H_ALPHA_NM).unwrap();
        assert_eq!(track.sampled_wavelength, 656.0);
        assert_eq!(track.series.values(), &[3.0, 7.0, 11.0]);
        assert_eq!(track.series.time(), s.time());
        // equidistant: first column wins
        assert_eq!(s.nearest_column(656.5), Some(2));
        assert_eq!(s.nearest_column(1.0), Some(0));
    }

    #[test]
    fn shape_is_checked() {
        assert!(Spectrogram::new(vec![0.0], vec![1.0, 2.0], Array2::zeros((2, 2))).is_err());
    }

    #[test]
    fn accumulate_keeps_duplicates_in_order() {
        let s = sample();
        let mut tracks = LineTracks::default();
        tracks.track(&s, H_ALPHA_NM).unwrap();
        tracks.track(&s, H_BETA_NM).unwrap();
        tracks.track(&s, H_ALPHA_NM).unwrap();
        let targets: Vec<f64> = tracks.iter().map(|t| t.target_wavelength).collect();
        assert_eq!(targets, vec![H_ALPHA_NM, H_BETA_NM, H_ALPHA_NM]);
    }

    #[test]
    fn replace_policy_overwrites_in_place() {
        let s = sample();
        let mut tracks = LineTracks::new(TrackPolicy::Replace);
        tracks.track(&s, H_ALPHA_NM).unwrap();
        tracks.track(&s, H_BETA_NM).unwrap();
        tracks.track(&s, H_ALPHA_NM).unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks.iter().next().unwrap().target_wavelength, H_ALPHA_NM);
    }

    #[test]
    fn spectrum_slice_and_metadata() {
        let mut meta = BTreeMap::new();
        meta.insert("Integration Time (sec)".to_string(), "1.000000E-1".to_string());
        let s = sample().with_meta(meta);
        assert_eq!(s.integration_time_s(), Some(0.1));
        assert_eq!(s.spectrum_at(1).unwrap()[3], (657.0, 8.0));
        assert!(s.spectrum_at(3).is_none());
    }
}
