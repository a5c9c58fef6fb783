//! Error types for the posting path.
//!
//! Orchestration code (`run`, setup, authentication) uses `anyhow`; the
//! errors here are the ones callers may want to match on.

use chrono::{DateTime, Utc};

/// Raised when a single network post fails.
#[derive(Debug, thiserror::Error)]
pub enum PostError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("rate limited{}", reset_suffix(.reset))]
    RateLimited { reset: Option<DateTime<Utc>> },
    #[error("image error: {0}")]
    Image(#[from] ImageError),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("request signing failed: {0}")]
    Signing(String),
}

fn reset_suffix(reset: &Option<DateTime<Utc>>) -> String {
    reset.map(|t| format!(" until {t}")).unwrap_or_default()
}

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot decode image: {0}")]
    Decode(image::ImageError),
    #[error("cannot encode image: {0}")]
    Encode(image::ImageError),
    #[error("unable to shrink image below {max_size} bytes")]
    CannotShrink { max_size: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("bad config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Invalid arguments to [`Context::post`](crate::bot::Context::post).
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StatusError {
    #[error("cannot mix wrap and a list of status choices")]
    WrapWithChoices,
    #[error("cannot supply an empty list of status choices")]
    EmptyChoices,
}
