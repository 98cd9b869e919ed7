use thiserror::Error;

/// What went wrong while turning one line of an instrument log into numbers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// A field could not be read as a floating point number.
    NotANumber(String),
    /// The row had a different number of fields than the table.
    FieldCount { expected: usize, actual: usize },
    /// A required section marker or header line is absent.
    MissingSection(&'static str),
    /// The timestamp is earlier than the one on the previous row.
    TimeOrder,
    /// The log had no usable rows at all.
    Empty,
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotANumber(field) => write!(f, "not a number: {field:?}"),
            Self::FieldCount { expected, actual } => {
                write!(f, "expected {expected} fields, found {actual}")
            }
            Self::MissingSection(name) => write!(f, "missing section {name}"),
            Self::TimeOrder => write!(f, "timestamp earlier than the previous row"),
            Self::Empty => write!(f, "no data rows"),
        }
    }
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("insufficient data: need at least {needed} samples, got {actual}")]
    InsufficientData { needed: usize, actual: usize },
    #[error("fit did not converge within {iterations} iterations")]
    FitDidNotConverge { iterations: usize },
    #[error("{instrument} data unavailable: {reason}")]
    MissingInstrumentData { instrument: String, reason: String },
    #[error("{source_name}, line {line}: {kind}")]
    Parse {
        source_name: String,
        line: usize,
        kind: ParseErrorKind,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error("failed to render plot: {0}")]
    Plot(String),
}

impl AnalysisError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        AnalysisError::InvalidParameter(msg.into())
    }

    pub(crate) fn missing(instrument: impl Into<String>, reason: impl ToString) -> Self {
        AnalysisError::MissingInstrumentData {
            instrument: instrument.into(),
            reason: reason.to_string(),
        }
    }
}

impl<E: std::error::Error + Send + Sync + 'static> From<plotters::drawing::DrawingAreaErrorKind<E>>
    for AnalysisError
{
    fn from(value: plotters::drawing::DrawingAreaErrorKind<E>) -> Self {
        AnalysisError::Plot(format!("{value:?}"))
    }
}

impl From<image::ImageError> for AnalysisError {
    fn from(value: image::ImageError) -> Self {
        AnalysisError::Plot(value.to_string())
    }
}
