// Resolution backend errors

use hiqty_media_providers::ProviderClientError;

/// Failures resolving or streaming a single track.
///
/// These are reported and the track is skipped; they never stop a queue.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid track payload: {0}")]
    InvalidTrack(String),

    #[error("Track is not playable: {0}")]
    Unplayable(String),

    #[error("Resource not found")]
    NotFound,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider API error: {0}")]
    Api(String),
}

impl From<ProviderClientError> for BackendError {
    fn from(err: ProviderClientError) -> Self {
        if err.is_not_found() {
            return Self::NotFound;
        }
        match err {
            ProviderClientError::Network(msg) => Self::Network(msg),
            ProviderClientError::Parse(msg) => Self::InvalidTrack(msg),
            ProviderClientError::UnsupportedKind(kind) => {
                Self::InvalidUrl(format!("unsupported resource kind: {kind}"))
            }
            other => Self::Api(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}
