use std::io;

use thiserror::Error;

/// The ways the feature finding pipeline can fail before it ever clusters a peak
#[derive(Debug, Error)]
pub enum FeatureFinderError {
    #[error("Peak at source line {source_line} has a non-positive abundance {abundance}")]
    NonPositiveAbundance { source_line: usize, abundance: f64 },
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("Invalid mass range {start}-{end}")]
    InvalidMassRange { start: f64, end: f64 },
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
}

impl FeatureFinderError {
    pub fn invalid_parameter(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}
