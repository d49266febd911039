use serde::{Deserialize, Serialize};
use thiserror::Error;
use tome_error::{ErrorCodes, TomeError};

use crate::distance::{cosine_distance_scalar, euclidean_distance_scalar, inner_product_scalar};

/// The distance metric a vector index is built with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceFunction {
    #[default]
    Cosine,
    Euclidean,
    DotProduct,
}

#[derive(Error, Debug)]
#[error("invalid distance function: {0}")]
pub struct DistanceFunctionError(pub String);

impl TomeError for DistanceFunctionError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::InvalidArgument
    }
}

impl DistanceFunction {
    /// Distance between two vectors of equal dimension. Euclidean is the
    /// squared distance, matching the convention of the graph and
    /// quantization layers, which only ever compare distances.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceFunction::Cosine => cosine_distance_scalar(a, b),
            DistanceFunction::Euclidean => euclidean_distance_scalar(a, b),
            // Negated so that smaller is closer, like the other metrics.
            DistanceFunction::DotProduct => -inner_product_scalar(a, b),
        }
    }

    /// Map a distance to a user-facing relevance score.
    pub fn score(&self, distance: f32) -> f32 {
        match self {
            DistanceFunction::Cosine | DistanceFunction::Euclidean => 1.0 / (1.0 + distance),
            DistanceFunction::DotProduct => -distance,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceFunction::Cosine => "cosine",
            DistanceFunction::Euclidean => "euclidean",
            DistanceFunction::DotProduct => "dot",
        }
    }
}

impl TryFrom<&str> for DistanceFunction {
    type Error = DistanceFunctionError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "cosine" => Ok(DistanceFunction::Cosine),
            "euclidean" | "l2" => Ok(DistanceFunction::Euclidean),
            "dot" | "ip" => Ok(DistanceFunction::DotProduct),
            _ => Err(DistanceFunctionError(value.to_string())),
        }
    }
}
