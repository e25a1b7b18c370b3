use thiserror::Error;

use crate::types::RegionKey;

#[derive(Error, Debug)]
pub enum FeatureError {
    #[error("stain matrix is singular and cannot be inverted")]
    SingularStainMatrix,

    #[error("region '{name}' has an empty boundary")]
    EmptyBoundary { name: String },

    #[error("region '{name}' is invalid: {details}")]
    InvalidRegion { name: String, details: String },
}

pub type Result<T> = std::result::Result<T, FeatureError>;

/// Diagnostic record for a region that was skipped during extraction.
///
/// The engine aggregates these alongside the successful feature table; a
/// failed region never aborts the batch.
#[derive(Debug)]
pub struct RegionFailure {
    pub key: RegionKey,
    pub error: FeatureError,
}
