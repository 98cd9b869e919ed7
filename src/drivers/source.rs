use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use ndarray::Array2;

use crate::drivers::epoch::InstrumentEpoch;
use crate::drivers::error::ParseErrorKind;
use crate::drivers::plasma::ProbeGain;
use crate::drivers::rf::RfLog;
use crate::drivers::{AnalysisError, ChannelSeries, InstrumentTable, Spectrogram};

pub const PROBE_FILE: &str = "NIDAQtext.txt";
pub const RF_FILES: [&str; 2] = ["RFLog1.txt", "RFLog2.txt"];
pub const SPECTRA_DIR: &str = "spectroscopy";

/// NI-DAQ columns after the time column.
pub const NIDAQ_CHANNELS: [&str; 6] = ["AI0", "AI1", "AI2", "AI3", "AO0", "AO1"];
const PRESSURE_CHANNEL: &str = "AI0";
const BIAS_REQUEST_CHANNEL: &str = "AI1";
const BIAS_CHANNEL: &str = "AI2";
const SHUNT_CHANNEL: &str = "AI3";

/// Width of the timestamp field in fixed-width RF records.
const RF_TIME_WIDTH: usize = 14;
const SPECTRA_DATA_MARKER: &str = ">>>";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Instrument {
    Probe,
    Rf1,
    Rf2,
    Spectrometer,
}

impl Instrument {
    pub fn name(self) -> &'static str {
        match self {
            Instrument::Probe => "double probe",
            Instrument::Rf1 => "RF generator 1",
            Instrument::Rf2 => "RF generator 2",
            Instrument::Spectrometer => "spectrometer",
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Acquisition-card log: bias request/monitor, shunt and pressure gauge.
#[derive(Clone, Debug)]
pub struct ProbeLog {
    table: InstrumentTable,
}

impl ProbeLog {
    pub fn new(table: InstrumentTable) -> Result<Self, AnalysisError> {
        for name in [PRESSURE_CHANNEL, BIAS_REQUEST_CHANNEL, BIAS_CHANNEL, SHUNT_CHANNEL] {
            if !table.channel_names().any(|c| c == name) {
                return Err(AnalysisError::invalid(format!("probe log lacks {name}")));
            }
        }
        if table.time().windows(2).any(|w| w[1] < w[0]) {
            return Err(AnalysisError::invalid("probe log timestamps go backwards"));
        }
        Ok(Self { table })
    }

    pub fn table(&self) -> &InstrumentTable {
        &self.table
    }

    pub fn pressure_gauge(&self) -> Result<ChannelSeries, AnalysisError> {
        self.table.channel(PRESSURE_CHANNEL, "V")
    }

    pub fn bias_request(&self) -> Result<ChannelSeries, AnalysisError> {
        self.table.channel(BIAS_REQUEST_CHANNEL, "V")
    }

    pub fn bias(&self) -> Result<ChannelSeries, AnalysisError> {
        self.table.channel(BIAS_CHANNEL, "V")
    }

    pub fn shunt(&self) -> Result<ChannelSeries, AnalysisError> {
        self.table.channel(SHUNT_CHANNEL, "V")
    }

    pub fn probe_voltage(&self, gain: ProbeGain) -> Result<ChannelSeries, AnalysisError> {
        Ok(self
            .bias()?
            .map_values(|v| v * gain.voltage)
            .relabel("probe V", "V"))
    }

    pub fn probe_current(&self, gain: ProbeGain) -> Result<ChannelSeries, AnalysisError> {
        Ok(self
            .shunt()?
            .map_values(|v| v * gain.current_ma)
            .relabel("shunt I", "mA"))
    }
}

fn parse_number(source_name: &str, line: usize, field: &str) -> Result<f64, AnalysisError> {
    field.trim().parse::<f64>().map_err(|_| AnalysisError::Parse {
        source_name: source_name.to_string(),
        line,
        kind: ParseErrorKind::NotANumber(field.to_string()),
    })
}

/// Comma separated `time, AI0, AI1, AI2, AI3, AO0, AO1` rows, time in
/// seconds since 1904.
pub fn parse_nidaq(source_name: &str, text: &str) -> Result<ProbeLog, AnalysisError> {
    let expected = NIDAQ_CHANNELS.len() + 1;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let mut time = Vec::new();
    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); NIDAQ_CHANNELS.len()];
    for record in reader.records() {
        let record = record?;
        let line = record.position().map_or(0, |p| p.line() as usize);
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }
        if record.len() != expected {
            return Err(AnalysisError::Parse {
                source_name: source_name.to_string(),
                line,
                kind: ParseErrorKind::FieldCount {
                    expected,
                    actual: record.len(),
                },
            });
        }
        let t = parse_number(source_name, line, &record[0])?;
        if time.last().is_some_and(|&prev| t < prev) {
            return Err(AnalysisError::Parse {
                source_name: source_name.to_string(),
                line,
                kind: ParseErrorKind::TimeOrder,
            });
        }
        time.push(t);
        for (column, field) in columns.iter_mut().zip(record.iter().skip(1)) {
            column.push(parse_number(source_name, line, field)?);
        }
    }
    if time.is_empty() {
        return Err(AnalysisError::Parse {
            source_name: source_name.to_string(),
            line: 0,
            kind: ParseErrorKind::Empty,
        });
    }
    let time = InstrumentEpoch::labview_seconds().convert(&time);
    let mut table = InstrumentTable::new(time);
    for (name, values) in NIDAQ_CHANNELS.iter().zip(columns) {
        table = table.with_channel(*name, values)?;
    }
    debug!("{source_name}: {} probe samples", table.len());
    ProbeLog::new(table)
}

/// One `(time, power)` record: `t,p` or a 14-character timestamp followed
/// by the power. `None` for anything else.
fn rf_pair(line: &str) -> Option<(f64, f64)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let csv_fields: Result<Vec<f64>, _> = line.split(',').map(|f| f.trim().parse::<f64>()).collect();
    match csv_fields {
        Ok(fields) if fields.len() == 2 => return Some((fields[0], fields[1])),
        Ok(_) => return None,
        Err(_) => {}
    }
    let time = line.get(..RF_TIME_WIDTH)?.trim().parse().ok()?;
    let power = line.get(RF_TIME_WIDTH..)?.trim().parse().ok()?;
    Some((time, power))
}

/// RF generator power log. Records alternate forward, reflected; lines that
/// are not records are skipped. Time in seconds since 1904.
pub fn parse_rf_log(source_name: &str, text: &str) -> Result<RfLog, AnalysisError> {
    let pairs: Vec<(f64, f64)> = text.lines().filter_map(rf_pair).collect();
    if pairs.len() < 2 {
        return Err(AnalysisError::Parse {
            source_name: source_name.to_string(),
            line: 0,
            kind: ParseErrorKind::Empty,
        });
    }
    if pairs.len() % 2 == 1 {
        warn!("{source_name}: odd number of RF records, dropping the last one");
    }
    let epoch = InstrumentEpoch::labview_seconds();
    let mut forward = (Vec::new(), Vec::new());
    let mut reflected = (Vec::new(), Vec::new());
    for chunk in pairs.chunks_exact(2) {
        forward.0.push(epoch.to_canonical(chunk[0].0));
        forward.1.push(chunk[0].1);
        reflected.0.push(epoch.to_canonical(chunk[1].0));
        reflected.1.push(chunk[1].1);
    }
    let forward = ChannelSeries::new("P forward", "W", forward.0, forward.1)?;
    let reflected = ChannelSeries::new("P reflected", "W", reflected.0, reflected.1)?;
    debug!("{source_name}: {} RF record pairs", forward.len());
    Ok(RfLog::new(forward, reflected))
}

/// Ocean spectrometer export: header, `key: value` metadata, a `>>>`
/// marker line, a tab separated wavelength axis, then one row per spectrum
/// `human_time \t unix_ms \t counts...`.
pub fn parse_ocean_spectra(source_name: &str, text: &str) -> Result<Spectrogram, AnalysisError> {
    let lines: Vec<&str> = text.lines().collect();
    let parse_err = |line: usize, kind: ParseErrorKind| AnalysisError::Parse {
        source_name: source_name.to_string(),
        line,
        kind,
    };
    let marker = lines
        .iter()
        .position(|l| l.contains(SPECTRA_DATA_MARKER))
        .ok_or_else(|| parse_err(0, ParseErrorKind::MissingSection("spectral data marker")))?;
    let mut meta = BTreeMap::new();
    for line in lines.iter().take(marker).skip(2) {
        if let Some((key, value)) = line.trim().split_once(':') {
            meta.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    let axis_line = marker + 1;
    let axis = lines
        .get(axis_line)
        .ok_or_else(|| parse_err(axis_line + 1, ParseErrorKind::MissingSection("wavelength axis")))?;
    let wavelengths = axis
        .trim()
        .split('\t')
        .map(|f| parse_number(source_name, axis_line + 1, f))
        .collect::<Result<Vec<f64>, _>>()?;
    let mut unix_ms = Vec::new();
    let mut counts = Vec::new();
    for (idx, line) in lines.iter().enumerate().skip(marker + 2) {
        let line_no = idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let fields: Vec<&str> = trimmed.split('\t').collect();
        if fields.len() != wavelengths.len() + 2 {
            return Err(parse_err(
                line_no,
                ParseErrorKind::FieldCount {
                    expected: wavelengths.len() + 2,
                    actual: fields.len(),
                },
            ));
        }
        unix_ms.push(parse_number(source_name, line_no, fields[1])?);
        for field in &fields[2..] {
            counts.push(parse_number(source_name, line_no, field)?);
        }
    }
    if unix_ms.is_empty() {
        return Err(parse_err(lines.len(), ParseErrorKind::Empty));
    }
    let intensities = Array2::from_shape_vec((unix_ms.len(), wavelengths.len()), counts)
        .map_err(|e| AnalysisError::invalid(e.to_string()))?;
    let time = InstrumentEpoch::unix_milliseconds().convert(&unix_ms);
    debug!(
        "{source_name}: {} spectra x {} wavelengths",
        time.len(),
        wavelengths.len()
    );
    Ok(Spectrogram::new(time, wavelengths, intensities)?.with_meta(meta))
}

/// Where the logs of one discharge come from.
pub trait DischargeSource {
    fn probe(&self) -> Result<ProbeLog, AnalysisError>;
    /// `generator` is 1 or 2.
    fn rf(&self, generator: usize) -> Result<RfLog, AnalysisError>;
    fn spectra(&self) -> Result<Spectrogram, AnalysisError>;
}

/// A discharge folder `<root>/<shot>/` plus `<root>/spectroscopy/`.
#[derive(Clone, Debug)]
pub struct DischargeFolder {
    root: PathBuf,
    shot: String,
}

impl DischargeFolder {
    pub fn new(root: impl Into<PathBuf>, shot: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            shot: shot.into(),
        }
    }

    pub fn shot(&self) -> &str {
        &self.shot
    }

    pub fn dir(&self) -> PathBuf {
        self.root.join(&self.shot)
    }

    /// First `*<shot>*.txt` under the spectroscopy folder, by name.
    pub fn spectra_file(&self) -> Result<PathBuf, AnalysisError> {
        let dir = self.root.join(SPECTRA_DIR);
        let entries = fs::read_dir(&dir)
            .map_err(|e| AnalysisError::missing(Instrument::Spectrometer.name(), e))?;
        let mut candidates: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p.extension().is_some_and(|ext| ext == "txt")
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.contains(&self.shot))
            })
            .collect();
        candidates.sort();
        candidates.into_iter().next().ok_or_else(|| {
            AnalysisError::missing(
                Instrument::Spectrometer.name(),
                format!("no file for shot {} in {}", self.shot, dir.display()),
            )
        })
    }
}

fn read_log(instrument: Instrument, path: &Path) -> Result<String, AnalysisError> {
    fs::read_to_string(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => {
            AnalysisError::missing(instrument.name(), format!("{} not found", path.display()))
        }
        _ => AnalysisError::Io(e),
    })
}

impl DischargeSource for DischargeFolder {
    fn probe(&self) -> Result<ProbeLog, AnalysisError> {
        let path = self.dir().join(PROBE_FILE);
        parse_nidaq(&path.display().to_string(), &read_log(Instrument::Probe, &path)?)
    }

    fn rf(&self, generator: usize) -> Result<RfLog, AnalysisError> {
        let (instrument, file) = match generator {
            1 => (Instrument::Rf1, RF_FILES[0]),
            2 => (Instrument::Rf2, RF_FILES[1]),
            other => {
                return Err(AnalysisError::invalid(format!("no RF generator {other}")));
            }
        };
        let path = self.dir().join(file);
        parse_rf_log(&path.display().to_string(), &read_log(instrument, &path)?)
    }

    fn spectra(&self) -> Result<Spectrogram, AnalysisError> {
        let path = self.spectra_file()?;
        parse_ocean_spectra(
            &path.display().to_string(),
            &read_log(Instrument::Spectrometer, &path)?,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::epoch::UNIX_EPOCH_OFFSET_S;

    const NIDAQ: &str = "3786000000.0,5.5,0.1,-1.0,0.5,-1.0,0\n\
                         3786000000.5,5.6,0.1,0.0,0.0,0.0,0\n\
                         \n\
                         3786000001.0,5.7,0.1,1.0,-0.5,1.0,0\n";

    #[test]
    fn reads_nidaq_table_and_applies_gains() {
        let log = parse_nidaq("nidaq", NIDAQ).unwrap();
        assert_eq!(log.table().len(), 3);
        assert_eq!(log.bias().unwrap().time()[1], 3_786_000_000.5);
        let gain = ProbeGain {
            voltage: 10.0,
            current_ma: 2.0,
        };
        assert_eq!(log.probe_voltage(gain).unwrap().values(), &[-10.0, 0.0, 10.0]);
        assert_eq!(log.probe_current(gain).unwrap().values(), &[1.0, 0.0, -1.0]);
        assert_eq!(log.pressure_gauge().unwrap().values()[2], 5.7);
    }

    #[test]
    fn nidaq_errors_name_the_line() {
        let err = parse_nidaq("nidaq", "1,2,3\n").unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::Parse {
                line: 1,
                kind: ParseErrorKind::FieldCount { expected: 7, actual: 3 },
                ..
            }
        ));
        let err = parse_nidaq("nidaq", "1,2,3,4,5,6,7\n1,2,x,4,5,6,7\n").unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::Parse {
                line: 2,
                kind: ParseErrorKind::NotANumber(_),
                ..
            }
        ));
        let err = parse_nidaq("nidaq", "2,1,1,1,1,1,1\n1,1,1,1,1,1,1\n").unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::Parse {
                line: 2,
                kind: ParseErrorKind::TimeOrder,
                ..
            }
        ));
        assert!(matches!(
            parse_nidaq("nidaq", ""),
            Err(AnalysisError::Parse {
                kind: ParseErrorKind::Empty,
                ..
            })
        ));
    }

    #[test]
    fn daq_log_needs_ordered_time() {
        let mut table = InstrumentTable::new(vec![1.0, 0.0, 2.0]);
        for name in NIDAQ_CHANNELS {
            table = table.with_channel(name, vec![0.0; 3]).unwrap();
        }
        assert!(matches!(
            ProbeLog::new(table),
            Err(AnalysisError::InvalidParameter(_))
        ));
    }

    #[test]
    fn rf_records_in_both_layouts() {
        assert_eq!(rf_pair("3786000000.25,120.5"), Some((3_786_000_000.25, 120.5)));
        assert_eq!(rf_pair("3786000000.25012.5"), Some((3_786_000_000.25, 12.5)));
        assert_eq!(rf_pair("1,2,3"), None);
        assert_eq!(rf_pair("Forward Power"), None);
        assert_eq!(rf_pair(""), None);
    }

    #[test]
    fn rf_log_alternates_forward_and_reflected() {
        let text = "header line\n\
                    100.0,50\n100.1,2\n\
                    101.0,60\n101.1,3\n\
                    102.0,70\n";
        let log = parse_rf_log("rf", text).unwrap();
        assert_eq!(log.forward.values(), &[50.0, 60.0]);
        assert_eq!(log.reflected.values(), &[2.0, 3.0]);
        assert_eq!(log.reflected.time(), &[100.1, 101.1]);
        assert!(parse_rf_log("rf", "nothing here\n").is_err());
    }

    const OCEAN: &str = "Data from run.txt Node\n\
                         \n\
                         Date: Sat Dec 23 10:00:00 EST 2023\n\
                         Integration Time (sec): 1.000000E-1\n\
                         Number of Pixels in Spectrum: 3\n\
                         >>>>>Begin Spectral Data<<<<<\n\
                         400.0\t500.0\t656.3\n\
                         10-00-00-000\t1703343600000\t1\t2\t3\n\
                         10-00-00-100\t1703343600100\t4\t5\t6\n";

    #[test]
    fn reads_ocean_export() {
        let spec = parse_ocean_spectra("ocean", OCEAN).unwrap();
        assert_eq!(spec.wavelengths(), &[400.0, 500.0, 656.3]);
        assert_eq!(spec.spectrum_count(), 2);
        assert_eq!(spec.integration_time_s(), Some(0.1));
        assert_eq!(spec.meta["Number of Pixels in Spectrum"], "3");
        assert_eq!(spec.time()[0], 1_703_343_600.0 + UNIX_EPOCH_OFFSET_S);
        assert_eq!(spec.intensities()[[1, 2]], 6.0);
    }

    #[test]
    fn ocean_without_marker_or_with_ragged_rows() {
        assert!(matches!(
            parse_ocean_spectra("ocean", "a\nb\n"),
            Err(AnalysisError::Parse {
                kind: ParseErrorKind::MissingSection(_),
                ..
            })
        ));
        let ragged = OCEAN.replace("\t4\t5\t6", "\t4\t5");
        assert!(matches!(
            parse_ocean_spectra("ocean", &ragged),
            Err(AnalysisError::Parse {
                line: 9,
                kind: ParseErrorKind::FieldCount { .. },
                ..
            })
        ));
    }

    #[test]
    fn missing_folder_is_missing_instrument() {
        let folder = DischargeFolder::new(std::env::temp_dir().join("muse-no-such-root"), "1");
        assert!(matches!(
            folder.probe(),
            Err(AnalysisError::MissingInstrumentData { .. })
        ));
        assert!(matches!(
            folder.spectra(),
            Err(AnalysisError::MissingInstrumentData { .. })
        ));
    }
}
