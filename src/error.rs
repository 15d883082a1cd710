//! Error taxonomy for the translation pipeline
//!
//! These errors never reach the UI layer as `Err`: providers and the
//! orchestrator turn every one of them into a failed
//! [`ParseResult`](crate::ParseResult) through
//! [`ParseResult::from_error`](crate::ParseResult::from_error).

use crate::types::ParseResult;
use thiserror::Error;

/// Message shown to users whenever a model reply cannot be decoded.
pub const MALFORMED_RESPONSE_MESSAGE: &str =
    "Failed to understand the query. Please try rephrasing it.";

#[derive(Error, Debug)]
pub enum FilterError {
    /// No credential was configured for a vendor.
    #[error(
        "{vendor} API key is required. Provide it via the api_key option or the {env_var} environment variable."
    )]
    MissingApiKey {
        vendor: &'static str,
        env_var: &'static str,
    },

    /// The vendor answered with a non-success status.
    #[error("API request failed: {status} {message}")]
    Api { status: u16, message: String },

    /// The request never produced a response.
    #[error("API request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The response envelope held no text to decode.
    #[error("No response content from {0} API")]
    EmptyResponse(&'static str),

    /// The model's text did not contain decodable JSON.
    ///
    /// `detail` is kept for logs only; the display text is fixed.
    #[error("Failed to understand the query. Please try rephrasing it.")]
    MalformedResponse { detail: String },

    /// Lookup of an unregistered provider name.
    #[error("LLM provider '{name}' is not registered. Available providers: {available}")]
    UnknownProvider { name: String, available: String },

    /// The HTTP client could not be created.
    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    /// Error raised by a provider outside this crate.
    #[error("{0}")]
    Provider(String),
}

impl FilterError {
    /// Stable code for programmatic handling
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingApiKey { .. } => "MISSING_API_KEY",
            Self::Api { .. } => "API_ERROR",
            Self::Http(_) => "HTTP_REQUEST_ERROR",
            Self::EmptyResponse(_) => "EMPTY_RESPONSE",
            Self::MalformedResponse { .. } => "MALFORMED_RESPONSE",
            Self::UnknownProvider { .. } => "UNKNOWN_PROVIDER",
            Self::Client(_) => "CLIENT_ERROR",
            Self::Provider(_) => "PROVIDER_ERROR",
        }
    }

    /// Configuration problems fail before any network traffic
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingApiKey { .. } | Self::UnknownProvider { .. } | Self::Client(_)
        )
    }
}

impl From<anyhow::Error> for FilterError {
    fn from(err: anyhow::Error) -> Self {
        Self::Provider(err.to_string())
    }
}

impl ParseResult {
    /// Failed result carrying the error's user-facing message
    pub fn from_error(err: &FilterError) -> Self {
        ParseResult::failure(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FilterError>;
