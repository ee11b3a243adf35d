//! Error types for reqwest-based delivery.

use thiserror::Error;

/// Error type for transport operations.
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

impl From<Error> for formrelay_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Reqwest(e) => {
                if e.is_timeout() {
                    formrelay_core::Error::timeout()
                        .with_message("Request timed out")
                        .with_source(e)
                } else if e.is_connect() {
                    formrelay_core::Error::transient()
                        .with_message("Connection failed")
                        .with_source(e)
                } else if e.is_builder() {
                    formrelay_core::Error::terminal()
                        .with_message(e.to_string())
                        .with_source(e)
                } else {
                    formrelay_core::Error::transient()
                        .with_message(e.to_string())
                        .with_source(e)
                }
            }
        }
    }
}
