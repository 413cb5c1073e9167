//! Downloader error types

use paperwatch_common::errors::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Paper {external_id} has no PDF URL")]
    MissingUrl { external_id: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(#[from] AppError),

    #[error("Worker pool closed")]
    PoolClosed,
}

pub type Result<T> = std::result::Result<T, DownloadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_url_message_names_paper() {
        let err = DownloadError::MissingUrl {
            external_id: "2503.01234".into(),
        };
        assert_eq!(err.to_string(), "Paper 2503.01234 has no PDF URL");
    }

    #[test]
    fn test_store_error_wraps_app_error() {
        let err: DownloadError = AppError::DownloadStatusNotFound { id: "7".into() }.into();
        assert!(matches!(err, DownloadError::Store(_)));
        assert!(err.to_string().contains("7"));
    }
}
