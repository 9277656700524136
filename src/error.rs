// THEORY:
// Failures in the spot pipeline fall into two very different buckets, and the
// error type keeps them apart so callers can act on the difference:
//
// 1.  **Per-file failures** (`Decode`): one upload could not be turned into
//     frames. The batch keeps going; the caller gets a notice keyed by file name.
// 2.  **Invocation failures** (`Configuration`, `ConfigLoad`): the settings
//     snapshot is unusable. Nothing is processed at all.
//
// Degenerate geometry (zero-area contours, zero-moment centroids, empty input to
// the grouper) is deliberately *not* represented here. Those cases are filtered
// out where they occur and simply produce empty results.

use thiserror::Error;

/// Result type alias for spot_vision operations.
pub type Result<T> = std::result::Result<T, SpotError>;

#[derive(Error, Debug)]
pub enum SpotError {
    /// The byte stream is not a supported image container, or it is corrupt.
    #[error("Failed to decode `{file_name}`: {message}")]
    Decode {
        file_name: String,
        message: String,
        #[source]
        source: Option<image::ImageError>,
    },

    /// A configuration value violates its documented domain.
    #[error("Invalid configuration: {parameter} {reason}")]
    Configuration { parameter: String, reason: String },

    /// The configuration sources could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Writing an overlay image failed.
    #[error("Failed to encode image: {0}")]
    Encode(#[source] image::ImageError),

    #[error("Failed to serialize results: {0}")]
    Json(#[from] serde_json::Error),

    /// The concurrent pipeline's workers are gone (shut down or panicked).
    #[error("Worker pool unavailable: {0}")]
    WorkerPool(String),
}

impl SpotError {
    pub fn decode(file_name: impl Into<String>, source: image::ImageError) -> Self {
        Self::Decode {
            file_name: file_name.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// A decode failure that did not originate in the `image` crate (e.g. the TIFF page walker).
    pub fn decode_message(file_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            file_name: file_name.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn configuration(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// True for errors scoped to a single upload; the rest of the batch may continue.
    pub fn is_per_file(&self) -> bool {
        matches!(self, SpotError::Decode { .. })
    }

    /// Short text suitable for showing next to a file name.
    pub fn user_message(&self) -> String {
        match self {
            SpotError::Decode { file_name, .. } => {
                format!("Could not load `{file_name}`. Check the file format and try again.")
            }
            SpotError::Configuration { parameter, reason } => {
                format!("Setting `{parameter}` {reason}. Fix it and run the analysis again.")
            }
            SpotError::ConfigLoad(_) => "The settings file could not be read.".to_string(),
            _ => "The analysis failed.".to_string(),
        }
    }
}
