// src/drivers/mod.rs
// Analysis core: instrument readers, clock reconciliation, probe fit and plots.
pub mod compose;
pub mod epoch;
pub mod error;
pub mod filter;
pub mod fit;
pub mod linalg;
pub mod plasma;
pub mod plot;
pub mod region;
pub mod rf;
pub mod series;
pub mod source;
pub mod spectral;
// Re-export the types most callers need.
pub use compose::{AnalysisSummary, ComposedDischarge, Composer, DischargeInputs, ProbeAnalysis};
pub use epoch::{InstrumentEpoch, InstrumentSpan, ReconciledClock, TimeUnit};
pub use error::{AnalysisError, ParseErrorKind};
pub use filter::SavitzkyGolay;
pub use fit::{FitOptions, IvFit, IvFitter, IvParameters};
pub use plasma::{PlasmaCalculator, PlasmaParameters, ProbeGain};
pub use plot::{render_iv_png, render_raw_png, render_spectra_png, render_time_png, PlotStyle};
pub use rf::RfLog;
pub use series::{ChannelSeries, InstrumentTable, TimeWindow};
pub use source::{DischargeFolder, DischargeSource, Instrument, ProbeLog};
pub use spectral::{LineTracks, SpectralLineTrack, Spectrogram, TrackPolicy};
