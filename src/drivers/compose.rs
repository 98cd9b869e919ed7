use log::{info, warn};
use serde::Serialize;

use crate::config::AnalysisConfig;
use crate::drivers::epoch::{InstrumentSpan, ReconciledClock};
use crate::drivers::filter::SavitzkyGolay;
use crate::drivers::fit::{IvFit, IvFitter};
use crate::drivers::plasma::{PlasmaCalculator, PlasmaParameters, ProbeGain};
use crate::drivers::region;
use crate::drivers::rf::RfLog;
use crate::drivers::source::{DischargeSource, Instrument, ProbeLog};
use crate::drivers::spectral::{LineTracks, Spectrogram};
use crate::drivers::{AnalysisError, ChannelSeries, TimeWindow};

/// Whatever could be read for one discharge; each log may have failed.
pub struct DischargeInputs {
    pub shot: String,
    pub probe: Result<ProbeLog, AnalysisError>,
    /// Generators 1 and 2.
    pub rf: [Result<RfLog, AnalysisError>; 2],
    pub spectra: Result<Spectrogram, AnalysisError>,
}

impl DischargeInputs {
    pub fn gather(shot: impl Into<String>, source: &impl DischargeSource) -> Self {
        Self {
            shot: shot.into(),
            probe: source.probe(),
            rf: [source.rf(1), source.rf(2)],
            spectra: source.spectra(),
        }
    }
}

/// Probe channels on the shared axis plus the fit over the selected window.
#[derive(Debug)]
pub struct ProbeAnalysis {
    pub gain: ProbeGain,
    /// Pressure gauge, bias request, bias monitor and shunt, as recorded.
    pub raw: Vec<ChannelSeries>,
    pub voltage: ChannelSeries,
    pub current: ChannelSeries,
    pub pressure_raw: ChannelSeries,
    pub pressure_h2: ChannelSeries,
    /// `None` when the configured window is unusable; nothing is fitted then.
    pub fit_window: Option<TimeWindow>,
    /// Unsmoothed samples inside `fit_window`; these are what was fitted.
    pub cropped_voltage: ChannelSeries,
    pub cropped_current: ChannelSeries,
    /// Display overlays of the cropped samples.
    pub smoothed_voltage: Option<ChannelSeries>,
    pub smoothed_current: Option<ChannelSeries>,
    pub fit: Result<IvFit, AnalysisError>,
    /// `None` when there was no fit to derive it from.
    pub plasma: Option<Result<PlasmaParameters, AnalysisError>>,
}

#[derive(Debug)]
pub struct ComposedDischarge {
    pub shot: String,
    pub clock: ReconciledClock,
    /// Where every present instrument has data, relative seconds.
    pub valid_span: TimeWindow,
    pub probe: Option<ProbeAnalysis>,
    pub rf: Vec<(Instrument, RfLog)>,
    pub rf_total: Option<RfLog>,
    pub spectra: Option<Spectrogram>,
    pub missing: Vec<Instrument>,
    pub warnings: Vec<String>,
}

/// Serializable digest written next to the plots.
#[derive(Debug, Serialize)]
pub struct AnalysisSummary<'a> {
    pub shot: &'a str,
    pub t0_global: f64,
    pub extent: TimeWindow,
    pub valid_span: TimeWindow,
    pub instruments: &'a [InstrumentSpan],
    pub missing: Vec<&'static str>,
    pub fit_window: Option<TimeWindow>,
    pub fit: Option<&'a IvFit>,
    pub plasma: Option<&'a PlasmaParameters>,
    pub warnings: &'a [String],
}

impl ComposedDischarge {
    pub fn summary(&self) -> AnalysisSummary<'_> {
        let probe = self.probe.as_ref();
        AnalysisSummary {
            shot: &self.shot,
            t0_global: self.clock.t0_global,
            extent: self.clock.extent,
            valid_span: self.valid_span,
            instruments: &self.clock.members,
            missing: self.missing.iter().map(|i| i.name()).collect(),
            fit_window: probe.and_then(|p| p.fit_window),
            fit: probe.and_then(|p| p.fit.as_ref().ok()),
            plasma: probe
                .and_then(|p| p.plasma.as_ref())
                .and_then(|r| r.as_ref().ok()),
            warnings: &self.warnings,
        }
    }
}

pub struct Composer<'a> {
    config: &'a AnalysisConfig,
}

impl<'a> Composer<'a> {
    pub fn new(config: &'a AnalysisConfig) -> Self {
        Self { config }
    }

    /// Align all present instruments on one axis and run the probe and
    /// spectral analyses. Tracked lines are appended to `tracks`.
    pub fn compose(
        &self,
        inputs: DischargeInputs,
        tracks: &mut LineTracks,
    ) -> Result<ComposedDischarge, AnalysisError> {
        let DischargeInputs {
            shot,
            probe,
            rf,
            spectra,
        } = inputs;
        let mut warnings = Vec::new();
        let mut missing = Vec::new();
        let mut note_missing = |instrument: Instrument, err: AnalysisError| {
            warn!("{shot}: {instrument} unavailable: {err}");
            warnings.push(format!("{instrument}: {err}"));
            missing.push(instrument);
        };
        let probe = probe.map_err(|e| note_missing(Instrument::Probe, e)).ok();
        let [rf1, rf2] = rf;
        let rf1 = rf1.map_err(|e| note_missing(Instrument::Rf1, e)).ok();
        let rf2 = rf2.map_err(|e| note_missing(Instrument::Rf2, e)).ok();
        let spectra = spectra
            .map_err(|e| note_missing(Instrument::Spectrometer, e))
            .ok();

        let mut spans = Vec::new();
        if let Some(log) = &probe {
            let time = log.table().time();
            if let (Some(&t0), Some(&t1)) = (time.first(), time.last()) {
                spans.push(InstrumentSpan {
                    instrument: Instrument::Probe.name().to_string(),
                    span: TimeWindow { t0, t1 },
                });
            }
        }
        for (instrument, log) in [(Instrument::Rf1, &rf1), (Instrument::Rf2, &rf2)] {
            if let Some(span) = log
                .as_ref()
                .and_then(|l| InstrumentSpan::of(instrument.name(), &l.series()))
            {
                spans.push(span);
            }
        }
        if let Some(span) = spectra.as_ref().and_then(Spectrogram::span) {
            spans.push(InstrumentSpan {
                instrument: Instrument::Spectrometer.name().to_string(),
                span,
            });
        }
        if spans.is_empty() {
            return Err(AnalysisError::missing(
                "all instruments",
                format!("nothing usable for shot {shot}"),
            ));
        }
        let clock = ReconciledClock::from_spans(&spans)?;
        let valid_span = match clock.overlap {
            Some(overlap) => overlap,
            None => {
                let msg = "instrument records do not overlap; using their full extent".to_string();
                warn!("{shot}: {msg}");
                warnings.push(msg);
                clock.extent
            }
        };
        info!(
            "{shot}: {} instruments, valid span {:.3}..{:.3} s",
            clock.members.len(),
            valid_span.t0,
            valid_span.t1
        );

        let probe = match probe {
            Some(log) => match self.analyse_probe(&shot, &log, &clock, &mut warnings) {
                Ok(analysis) => Some(analysis),
                Err(e) => {
                    warn!("{shot}: {} unusable: {e}", Instrument::Probe);
                    warnings.push(format!("{}: {e}", Instrument::Probe));
                    missing.push(Instrument::Probe);
                    None
                }
            },
            None => None,
        };

        let align_rf = |log: &RfLog| {
            RfLog::new(clock.align(&log.forward), clock.align(&log.reflected))
        };
        let rf1 = rf1.as_ref().map(align_rf);
        let rf2 = rf2.as_ref().map(align_rf);
        let rf_total = match (&rf1, &rf2) {
            (Some(a), Some(b)) => match a.combine(b, self.config.rf.combine_points) {
                Ok(total) => Some(total),
                Err(e) => {
                    warn!("{shot}: RF total not computed: {e}");
                    warnings.push(format!("RF total: {e}"));
                    None
                }
            },
            _ => None,
        };
        let mut rf = Vec::new();
        rf.extend(rf1.map(|l| (Instrument::Rf1, l)));
        rf.extend(rf2.map(|l| (Instrument::Rf2, l)));

        let spectra = spectra.map(|s| s.shifted(clock.t0_global));
        if let Some(spectrogram) = &spectra {
            for &line in &self.config.spectral.lines_nm {
                if let Err(e) = tracks.track(spectrogram, line) {
                    warn!("{shot}: cannot track {line} nm: {e}");
                    warnings.push(format!("{line} nm: {e}"));
                }
            }
        }

        Ok(ComposedDischarge {
            shot,
            clock,
            valid_span,
            probe,
            rf,
            rf_total,
            spectra,
            missing,
            warnings,
        })
    }

    fn analyse_probe(
        &self,
        shot: &str,
        log: &ProbeLog,
        clock: &ReconciledClock,
        warnings: &mut Vec<String>,
    ) -> Result<ProbeAnalysis, AnalysisError> {
        let gain = match shot.parse::<u64>() {
            Ok(number) => self.config.gains.for_shot(number),
            Err(_) => {
                let msg = format!("shot id {shot} is not numeric; using current probe gains");
                warn!("{msg}");
                warnings.push(msg);
                self.config.gains.from
            }
        };
        let raw = [log.pressure_gauge()?, log.bias_request()?, log.bias()?, log.shunt()?]
            .iter()
            .map(|s| clock.align(s))
            .collect();
        let voltage = clock.align(&log.probe_voltage(gain)?);
        let current = clock.align(&log.probe_current(gain)?);
        let (pressure_raw, pressure_h2) = self.config.pressure.convert(&clock.align(&log.pressure_gauge()?));

        // a bad window fails the fit below, the channels are still kept
        let window = match self.config.fit.window {
            Some(w) => TimeWindow::new(w.t0, w.t1),
            None => voltage.span().ok_or(AnalysisError::InsufficientData {
                needed: 1,
                actual: 0,
            }),
        };
        let (cropped_voltage, cropped_current) = match &window {
            Ok(w) => (region::crop(&voltage, w), region::crop(&current, w)),
            Err(_) => (voltage.slice(0..0), current.slice(0..0)),
        };
        let fit_window = window.as_ref().ok().copied();

        let smoothing = self.config.smoothing;
        let smooth = |series: &ChannelSeries| {
            SavitzkyGolay::new(smoothing.window, smoothing.order)
                .and_then(|sg| sg.smooth_series(series))
        };
        let (smoothed_voltage, smoothed_current) = match fit_window {
            None => (None, None),
            Some(_) => match (smooth(&cropped_voltage), smooth(&cropped_current)) {
                (Ok(v), Ok(i)) => (Some(v), Some(i)),
                (Err(e), _) | (_, Err(e)) => {
                    warn!("{shot}: smoothing skipped: {e}");
                    warnings.push(format!("smoothing: {e}"));
                    (None, None)
                }
            },
        };

        let fitter = IvFitter::new(self.config.fit.options);
        let fit = window.and_then(|_| fitter.fit_series(&cropped_voltage, &cropped_current));
        let plasma = match &fit {
            Ok(fit) => {
                info!(
                    "{shot}: Te = {:.3} ± {:.3} eV, Isat = {:.4} ± {:.4} mA",
                    fit.parameters.te, fit.uncertainties.te, fit.parameters.isat, fit.uncertainties.isat
                );
                if !fit.has_finite_uncertainties() {
                    warnings.push("IV fit uncertainties are not finite".to_string());
                }
                let plasma = PlasmaCalculator::new(self.config.physics).from_fit(fit);
                match &plasma {
                    Ok(p) => info!(
                        "{shot}: n_e = {:.3e} ± {:.3e} m^-3",
                        p.density, p.density_uncertainty
                    ),
                    Err(e) => {
                        warn!("{shot}: density not computed: {e}");
                        warnings.push(format!("density: {e}"));
                    }
                }
                Some(plasma)
            }
            Err(e) => {
                warn!("{shot}: IV fit failed: {e}");
                warnings.push(format!("IV fit: {e}"));
                None
            }
        };

        Ok(ProbeAnalysis {
            gain,
            raw,
            voltage,
            current,
            pressure_raw,
            pressure_h2,
            fit_window,
            cropped_voltage,
            cropped_current,
            smoothed_voltage,
            smoothed_current,
            fit,
            plasma,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::source::parse_nidaq;
    use crate::drivers::spectral::TrackPolicy;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const T0: f64 = 3_786_000_000.0;

    /// Probe sweep from -10 V to 10 V over `samples` points starting at
    /// canonical `t0`, with gains of one.
    fn probe_log(t0: f64, samples: usize) -> ProbeLog {
        parse_nidaq("probe", &probe_text(t0, samples, || 0.0)).unwrap()
    }

    fn probe_text(t0: f64, samples: usize, mut noise: impl FnMut() -> f64) -> String {
        let mut text = String::new();
        for k in 0..samples {
            let t = t0 + k as f64 * 0.01;
            let v = -10.0 + 20.0 * k as f64 / (samples - 1) as f64;
            let i = 5.0 * (v / 6.0).tanh() + 0.2 + noise();
            text.push_str(&format!("{t},5.5,0.0,{v},{i},{v},0\n"));
        }
        text
    }

    fn rf_log(t0: f64, t1: f64) -> RfLog {
        RfLog::new(
            ChannelSeries::new("P forward", "W", vec![t0, t1], vec![100.0, 100.0]).unwrap(),
            ChannelSeries::new("P reflected", "W", vec![t0, t1], vec![5.0, 5.0]).unwrap(),
        )
    }

    fn spectra(t0: f64, t1: f64) -> Spectrogram {
        Spectrogram::new(vec![t0, t1], vec![486.0, 656.0], Array2::from_elem((2, 2), 1.0)).unwrap()
    }

    fn missing(name: &str) -> AnalysisError {
        AnalysisError::missing(name, "not found")
    }

    fn config() -> AnalysisConfig {
        let mut cfg = AnalysisConfig::default();
        cfg.gains.threshold_shot = 0;
        cfg
    }

    #[test]
    fn full_discharge_is_aligned_and_fitted() {
        let cfg = config();
        let inputs = DischargeInputs {
            shot: "231223001".into(),
            probe: Ok(probe_log(T0 + 1.0, 201)),
            rf: [Ok(rf_log(T0, T0 + 3.0)), Ok(rf_log(T0 + 0.5, T0 + 2.5))],
            spectra: Ok(spectra(T0 + 0.25, T0 + 2.75)),
        };
        let mut tracks = LineTracks::default();
        let out = Composer::new(&cfg).compose(inputs, &mut tracks).unwrap();
        assert_eq!(out.clock.t0_global, T0);
        assert!(out.missing.is_empty());
        assert!((out.valid_span.t0 - 1.0).abs() < 1e-6);
        assert!((out.valid_span.t1 - 2.5).abs() < 1e-6);

        let probe = out.probe.as_ref().unwrap();
        assert!((probe.voltage.time()[0] - 1.0).abs() < 1e-6);
        let fit = probe.fit.as_ref().unwrap();
        assert!((fit.parameters.te - 3.0).abs() < 3e-3);
        assert!((fit.parameters.isat - 5.0).abs() < 5e-3);
        let plasma = probe.plasma.as_ref().unwrap().as_ref().unwrap();
        assert!(plasma.density > 0.0);
        assert_eq!(probe.cropped_voltage.len(), probe.voltage.len() - 1);
        assert_eq!(
            probe.smoothed_current.as_ref().unwrap().len(),
            probe.cropped_current.len()
        );

        assert_eq!(tracks.len(), 3);
        assert!(out.rf_total.is_some());
        assert_eq!(out.rf.len(), 2);
        assert_eq!(out.rf[0].1.forward.time()[0], 0.0);
    }

    #[test]
    fn missing_instrument_is_recovered() {
        let cfg = config();
        let inputs = DischargeInputs {
            shot: "231223002".into(),
            probe: Ok(probe_log(T0 + 1.0, 50)),
            rf: [Err(missing("rf1")), Err(missing("rf2"))],
            spectra: Err(missing("spectra")),
        };
        let mut tracks = LineTracks::default();
        let out = Composer::new(&cfg).compose(inputs, &mut tracks).unwrap();
        assert_eq!(
            out.missing,
            vec![Instrument::Rf1, Instrument::Rf2, Instrument::Spectrometer]
        );
        assert_eq!(out.warnings.len(), 3);
        assert_eq!(out.clock.t0_global, T0 + 1.0);
        assert!(out.rf_total.is_none());
        assert!(tracks.is_empty());
        assert!(out.probe.unwrap().fit.is_ok());
    }

    #[test]
    fn empty_fit_window_fails_only_the_fit() {
        let mut cfg = config();
        cfg.fit.window = Some(TimeWindow { t0: 100.0, t1: 200.0 });
        let inputs = DischargeInputs {
            shot: "231223003".into(),
            probe: Ok(probe_log(T0, 50)),
            rf: [Ok(rf_log(T0, T0 + 1.0)), Err(missing("rf2"))],
            spectra: Err(missing("spectra")),
        };
        let mut tracks = LineTracks::new(TrackPolicy::Replace);
        let out = Composer::new(&cfg).compose(inputs, &mut tracks).unwrap();
        let probe = out.probe.as_ref().unwrap();
        assert!(probe.cropped_voltage.is_empty());
        assert!(matches!(
            probe.fit,
            Err(AnalysisError::InsufficientData { .. })
        ));
        assert!(probe.plasma.is_none());
        assert_eq!(probe.voltage.len(), 50);
        assert!(out.summary().fit.is_none());
    }

    #[test]
    fn nothing_present_is_fatal() {
        let cfg = config();
        let inputs = DischargeInputs {
            shot: "1".into(),
            probe: Err(missing("probe")),
            rf: [Err(missing("rf1")), Err(missing("rf2"))],
            spectra: Err(missing("spectra")),
        };
        assert!(matches!(
            Composer::new(&cfg).compose(inputs, &mut LineTracks::default()),
            Err(AnalysisError::MissingInstrumentData { .. })
        ));
    }

    #[test]
    fn tracks_accumulate_across_calls() {
        let cfg = config();
        let mut tracks = LineTracks::default();
        for _ in 0..2 {
            let inputs = DischargeInputs {
                shot: "231223004".into(),
                probe: Err(missing("probe")),
                rf: [Err(missing("rf1")), Err(missing("rf2"))],
                spectra: Ok(spectra(T0, T0 + 1.0)),
            };
            Composer::new(&cfg).compose(inputs, &mut tracks).unwrap();
        }
        assert_eq!(tracks.len(), 6);
    }

    #[test]
    fn fit_uses_cropped_raw_samples() {
        let cfg = config();
        let mut rng = StdRng::seed_from_u64(11);
        let text = probe_text(T0, 201, || rng.gen_range(-0.3..0.3));
        let inputs = DischargeInputs {
            shot: "231223005".into(),
            probe: parse_nidaq("probe", &text),
            rf: [Err(missing("rf1")), Err(missing("rf2"))],
            spectra: Err(missing("spectra")),
        };
        let out = Composer::new(&cfg)
            .compose(inputs, &mut LineTracks::default())
            .unwrap();
        let probe = out.probe.as_ref().unwrap();
        let fit = probe.fit.as_ref().unwrap();
        let fitter = IvFitter::new(cfg.fit.options);
        let raw = fitter
            .fit_series(&probe.cropped_voltage, &probe.cropped_current)
            .unwrap();
        assert_eq!(fit.parameters, raw.parameters);
        let smoothed = fitter
            .fit_series(
                probe.smoothed_voltage.as_ref().unwrap(),
                probe.smoothed_current.as_ref().unwrap(),
            )
            .unwrap();
        assert_ne!(fit.parameters, smoothed.parameters);
        assert!((fit.parameters.te - 3.0).abs() < 0.3);
    }

    #[test]
    fn reversed_fit_window_keeps_the_run() {
        let mut cfg = config();
        cfg.fit.window = Some(TimeWindow { t0: 2.0, t1: 1.0 });
        let inputs = DischargeInputs {
            shot: "231223006".into(),
            probe: Ok(probe_log(T0, 50)),
            rf: [Ok(rf_log(T0, T0 + 1.0)), Err(missing("rf2"))],
            spectra: Ok(spectra(T0, T0 + 1.0)),
        };
        let mut tracks = LineTracks::default();
        let out = Composer::new(&cfg).compose(inputs, &mut tracks).unwrap();
        let probe = out.probe.as_ref().unwrap();
        assert!(matches!(probe.fit, Err(AnalysisError::InvalidParameter(_))));
        assert!(probe.plasma.is_none());
        assert!(probe.fit_window.is_none());
        assert!(probe.smoothed_voltage.is_none());
        assert_eq!(probe.voltage.len(), 50);
        assert!(out.warnings.iter().any(|w| w.starts_with("IV fit")));
        assert_eq!(tracks.len(), 3);
        assert!(out.summary().fit_window.is_none());
    }

    #[test]
    fn unordered_daq_log_leaves_other_instruments() {
        let cfg = config();
        let text = format!(
            "{},5.5,0,1,1,1,0\n{},5.5,0,1,1,1,0\n{},5.5,0,1,1,1,0\n",
            T0 + 1.0,
            T0,
            T0 + 2.0
        );
        let inputs = DischargeInputs {
            shot: "231223007".into(),
            probe: parse_nidaq("probe", &text),
            rf: [Ok(rf_log(T0, T0 + 3.0)), Err(missing("rf2"))],
            spectra: Ok(spectra(T0 + 0.5, T0 + 2.5)),
        };
        let out = Composer::new(&cfg)
            .compose(inputs, &mut LineTracks::default())
            .unwrap();
        assert!(out.probe.is_none());
        assert!(out.missing.contains(&Instrument::Probe));
        assert_eq!(out.rf.len(), 1);
        assert!(out.spectra.is_some());
        assert_eq!(out.valid_span, TimeWindow { t0: 0.5, t1: 2.5 });
    }
}
