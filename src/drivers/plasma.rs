// n_e = Isat / (e * A * c * sqrt(Te / m_ion)), P = 10^((V - offset) / volts_per_decade) Torr
use serde::{Deserialize, Serialize};

use crate::drivers::{AnalysisError, ChannelSeries, IvFit};

/// Elementary charge (C).
pub const ELEMENTARY_CHARGE_C: f64 = 1.602_176_634e-19;
/// Proton rest energy (eV).
pub const PROTON_MASS_EV: f64 = 938.272_088e6;
/// Speed of light (m/s).
pub const SPEED_OF_LIGHT_M_S: f64 = 299_792_458.0;
/// Collecting area of one probe tip (m²).
pub const PROBE_AREA_M2: f64 = 6.8e-6;
/// Shot number from which the replacement bias box is installed.
pub const BIAS_BOX_CHANGE_SHOT: u64 = 231_222_000;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicalConstants {
    pub elementary_charge_c: f64,
    pub ion_mass_ev: f64,
    pub speed_of_light_m_s: f64,
    pub probe_area_m2: f64,
    /// Multiplier taking the fitted current to amperes (fits run in mA).
    pub current_to_amperes: f64,
}

impl Default for PhysicalConstants {
    fn default() -> Self {
        Self {
            elementary_charge_c: ELEMENTARY_CHARGE_C,
            ion_mass_ev: PROTON_MASS_EV,
            speed_of_light_m_s: SPEED_OF_LIGHT_M_S,
            probe_area_m2: PROBE_AREA_M2,
            current_to_amperes: 1e-3,
        }
    }
}

/// Electron density with its propagated uncertainty, both in m⁻³.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PlasmaParameters {
    pub density: f64,
    pub density_uncertainty: f64,
    pub thermal_velocity_m_s: f64,
}

impl PlasmaParameters {
    pub fn relative_uncertainty(&self) -> f64 {
        self.density_uncertainty / self.density
    }
}

#[derive(Clone, Debug, Default)]
pub struct PlasmaCalculator {
    constants: PhysicalConstants,
}

impl PlasmaCalculator {
    pub fn new(constants: PhysicalConstants) -> Self {
        Self { constants }
    }

    /// `isat` in fit current units, `te` in eV. Uncertainties may be
    /// non-finite, which then carries through to the density uncertainty.
    pub fn density(
        &self,
        isat: f64,
        isat_err: f64,
        te: f64,
        te_err: f64,
    ) -> Result<PlasmaParameters, AnalysisError> {
        if !(isat > 0.0) {
            return Err(AnalysisError::invalid(format!(
                "saturation current must be positive, got {isat}"
            )));
        }
        if !(te > 0.0) {
            return Err(AnalysisError::invalid(format!(
                "electron temperature must be positive, got {te}"
            )));
        }
        let c = &self.constants;
        if !(c.probe_area_m2 > 0.0) {
            return Err(AnalysisError::invalid("probe area must be positive"));
        }
        let thermal_velocity_m_s = c.speed_of_light_m_s * (te / c.ion_mass_ev).sqrt();
        let isat_amps = isat * c.current_to_amperes;
        let density = isat_amps / (c.elementary_charge_c * c.probe_area_m2 * thermal_velocity_m_s);
        let relative = ((isat_err / isat).powi(2) + (te_err / te).powi(2)).sqrt();
        Ok(PlasmaParameters {
            density,
            density_uncertainty: density * relative,
            thermal_velocity_m_s,
        })
    }

    pub fn from_fit(&self, fit: &IvFit) -> Result<PlasmaParameters, AnalysisError> {
        self.density(
            fit.parameters.isat,
            fit.uncertainties.isat,
            fit.parameters.te,
            fit.uncertainties.te,
        )
    }
}

/// Bias-amplifier scale factors for one hardware revision.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProbeGain {
    /// Probe volts per monitored volt.
    pub voltage: f64,
    /// Probe milliamps per shunt volt.
    pub current_ma: f64,
}

/// Gains switch at a shot-number threshold when the bias box changed.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GainSchedule {
    pub threshold_shot: u64,
    pub before: ProbeGain,
    pub from: ProbeGain,
}

impl Default for GainSchedule {
    fn default() -> Self {
        Self {
            threshold_shot: BIAS_BOX_CHANGE_SHOT,
            // divider ×10 on the bias monitor; shunt /5, ×97.8757 gain, 1 kΩ
            before: ProbeGain {
                voltage: 10.0,
                current_ma: 97.8757 / 5.0,
            },
            from: ProbeGain {
                voltage: 1.0,
                current_ma: 1.0,
            },
        }
    }
}

impl GainSchedule {
    pub fn for_shot(&self, shot: u64) -> ProbeGain {
        if shot < self.threshold_shot {
            self.before
        } else {
            self.from
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PressureGauge {
    pub offset_v: f64,
    pub volts_per_decade: f64,
    /// Raw reading is divided by this for hydrogen.
    pub hydrogen_factor: f64,
}

impl Default for PressureGauge {
    fn default() -> Self {
        Self {
            offset_v: 5.5,
            volts_per_decade: 0.5,
            hydrogen_factor: 0.42,
        }
    }
}

impl PressureGauge {
    pub fn torr(&self, volts: f64) -> f64 {
        10f64.powf((volts - self.offset_v) / self.volts_per_decade)
    }

    /// Raw and hydrogen-corrected pressure series, in Torr.
    pub fn convert(&self, gauge: &ChannelSeries) -> (ChannelSeries, ChannelSeries) {
        let raw = gauge.map_values(|v| self.torr(v)).relabel("pressure raw", "Torr");
        let h2 = raw
            .map_values(|p| p / self.hydrogen_factor)
            .relabel("pressure H2", "Torr");
        (raw, h2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn density_regression_fixture() {
        let calc = PlasmaCalculator::default();
        let p = calc.density(5.0, 0.0, 3.0, 0.0).unwrap();
        let v_th = 299_792_458.0 * (3.0f64 / 938.272_088e6).sqrt();
        let expected = 5.0e-3 / (1.602_176_634e-19 * 6.8e-6 * v_th);
        assert!(((p.density - expected) / expected).abs() < 1e-12);
        assert!(((p.density - 2.707_283_685e17) / 2.707_283_685e17).abs() < 1e-8);
        assert!(((p.thermal_velocity_m_s - 16_951.843_4) / 16_951.843_4).abs() < 1e-8);
        assert_eq!(p.density_uncertainty, 0.0);
    }

    #[test]
    fn relative_uncertainty_adds_in_quadrature() {
        let calc = PlasmaCalculator::default();
        let p = calc.density(5.0, 0.1, 3.0, 0.3).unwrap();
        let expected = ((0.1f64 / 5.0).powi(2) + (0.3f64 / 3.0).powi(2)).sqrt();
        assert_eq!(p.relative_uncertainty(), p.density * expected / p.density);
        assert!((p.relative_uncertainty() - 0.101_980_390_271_855_7).abs() < 1e-15);
    }

    #[test]
    fn rejects_unphysical_inputs() {
        let calc = PlasmaCalculator::default();
        for (isat, te) in [(0.0, 3.0), (-1.0, 3.0), (5.0, 0.0), (5.0, -2.0), (f64::NAN, 3.0)] {
            assert!(matches!(
                calc.density(isat, 0.1, te, 0.1),
                Err(AnalysisError::InvalidParameter(_))
            ));
        }
    }

    #[test]
    fn non_finite_fit_uncertainty_is_carried() {
        let p = PlasmaCalculator::default()
            .density(5.0, f64::NAN, 3.0, 0.1)
            .unwrap();
        assert!(p.density.is_finite());
        assert!(!p.density_uncertainty.is_finite());
    }

    #[test]
    fn gain_schedule_switches_at_threshold() {
        let gains = GainSchedule::default();
        assert_eq!(gains.for_shot(231_221_999).voltage, 10.0);
        assert_eq!(gains.for_shot(231_222_000), gains.from);
    }

    #[test]
    fn gauge_law() {
        let gauge = PressureGauge::default();
        assert!((gauge.torr(5.5) - 1.0).abs() < 1e-12);
        assert!((gauge.torr(4.5) - 1e-2).abs() < 1e-14);
        let s = ChannelSeries::new("AI0", "V", vec![0.0, 1.0], vec![5.5, 6.0]).unwrap();
        let (raw, h2) = gauge.convert(&s);
        assert!((raw.values()[1] - 10.0).abs() < 1e-9);
        assert!((h2.values()[0] - 1.0 / 0.42).abs() < 1e-12);
        assert_eq!(h2.unit, "Torr");
    }
}
