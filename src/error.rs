// Error types shared by the metadata providers and the pipeline stages

use std::path::PathBuf;

use crate::pipeline::Stage;

/// Failures of a remote metadata provider
///
/// `Unauthorized` and `MissingApiKey` are configuration problems the user has
/// to fix; everything else is a remote failure the caller may retry.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} API key is not configured")]
    MissingApiKey { provider: &'static str },

    #[error("{provider} rejected the API key: {message}")]
    Unauthorized {
        provider: &'static str,
        message: String,
    },

    #[error("{provider} is unavailable: {message}")]
    Unavailable {
        provider: &'static str,
        message: String,
    },

    #[error("series {series_id} was not found on {provider}")]
    SeriesNotFound {
        provider: &'static str,
        series_id: String,
    },
}

impl ProviderError {
    /// True when the failure can only be fixed by changing configuration
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ProviderError::MissingApiKey { .. } | ProviderError::Unauthorized { .. }
        )
    }

    pub fn unavailable(provider: &'static str, message: impl Into<String>) -> Self {
        ProviderError::Unavailable {
            provider,
            message: message.into(),
        }
    }

    /// Map a transport error from reqwest
    pub fn from_transport(provider: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::unavailable(provider, "request timed out");
        }
        Self::unavailable(provider, err.to_string())
    }
}

/// Failures that stop a whole pipeline stage
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("another stage is already running ({0})")]
    Busy(Stage),

    #[error("{0} was cancelled")]
    Cancelled(Stage),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("no source directory selected")]
    NoSourceDirectory,

    #[error("source directory does not exist or is not a directory: {0}")]
    InvalidSourceDirectory(PathBuf),

    #[error("no files have been scanned yet")]
    NotScanned,

    #[error("no series has been selected")]
    NoSeriesSelected,

    #[error("series name is empty")]
    EmptySeriesName,

    #[error("no plan has been built yet")]
    NoPlan,

    #[error("{stage} worker failed: {message}")]
    Worker { stage: Stage, message: String },
}

impl PipelineError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, PipelineError::Provider(e) if e.is_configuration())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {key} setting '{value}'")]
    InvalidValue { key: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_are_distinguishable() {
        let auth = ProviderError::Unauthorized {
            provider: "TMDB",
            message: "Invalid API key".to_string(),
        };
        assert!(auth.is_configuration());
        assert!(PipelineError::from(auth).is_configuration());

        let missing = ProviderError::MissingApiKey { provider: "OMDb" };
        assert!(missing.is_configuration());

        let down = ProviderError::unavailable("TMDB", "HTTP 503");
        assert!(!down.is_configuration());

        let stale = ProviderError::SeriesNotFound {
            provider: "TMDB",
            series_id: "42".to_string(),
        };
        assert!(!stale.is_configuration());
        assert_eq!(stale.to_string(), "series 42 was not found on TMDB");
    }
}
