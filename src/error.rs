use std::io;

use thiserror::Error;

/// Errors raised while decomposing, dispatching or reassembling a batch.
///
/// Variants map onto the HTTP status the batch endpoint answers with, see
/// [`BatchError::status_code`].
#[derive(Debug, Error)]
pub enum BatchError {
    /// A raw sub-request violates the start-line or header grammar.
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    /// A body-bearing `POST`/`PUT` carries no `Content-Type` header.
    #[error("missing expected header: {0}")]
    MissingExpectedHeader(String),
    /// A `Content-Type`/`Accept` value (or another structured header) is invalid.
    #[error("malformed header: {0}")]
    MalformedHeader(String),
    /// The `Authorization` header uses a scheme other than Basic or Digest.
    #[error("\"{0}\" authorization scheme not implemented")]
    UnsupportedAuthScheme(String),
    /// The outer batch is neither `application/json` nor `multipart/mixed`.
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),
    /// Header parameters were unusable at the body decoding boundary.
    #[error("unprocessable entity: {0}")]
    Unprocessable(String),
    /// A decomposed part could not become a dispatchable request.
    #[error("invalid individual request: {0}")]
    InvalidIndividualRequest(String),
    /// A JSON entry depends on a request that did not succeed.
    #[error("request '{id}' depends on '{dependency}', which did not succeed")]
    FailedDependency {
        /// Id of the entry that was not dispatched.
        id: String,
        /// The unmet dependency.
        dependency: String,
    },
    /// A single line exceeds [`ParserConfig::max_line_len`](crate::ParserConfig).
    #[error("line exceeds maximum allowed length")]
    LineTooLong,
    /// The number of headers exceeds the configured maximum.
    #[error("number of headers exceeds maximum")]
    TooManyHeaders,
    /// The request body exceeds the configured maximum size.
    #[error("body exceeds maximum allowed size")]
    BodyTooLarge,
    /// The body is not a readable, seekable byte source.
    #[error("impossible to open or read the stream: {0}")]
    StreamResource(#[from] io::Error),
    /// An uncaught failure reported by the sub-request dispatcher.
    /// The assembled JSON response could not be serialized.
    #[error("failed to encode batch response: {0}")]
    ResponseEncoding(#[from] serde_json::Error),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl BatchError {
    /// HTTP status code the batch endpoint answers with for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MalformedRequest(_)
            | Self::MissingExpectedHeader(_)
            | Self::MalformedHeader(_)
            | Self::UnsupportedAuthScheme(_)
            | Self::InvalidIndividualRequest(_)
            | Self::LineTooLong
            | Self::TooManyHeaders
            | Self::BodyTooLarge => 400,
            Self::UnsupportedMediaType(_) => 415,
            Self::Unprocessable(_) => 422,
            Self::FailedDependency { .. } => 424,
            Self::StreamResource(_) | Self::ResponseEncoding(_) | Self::Dispatch(_) => 500,
        }
    }

    /// `true` for failures that reject the batch headers before any dispatch.
    pub fn is_header_failure(&self) -> bool {
        matches!(
            self,
            Self::MalformedHeader(_)
                | Self::MissingExpectedHeader(_)
                | Self::UnsupportedMediaType(_)
                | Self::Unprocessable(_)
        )
    }
}

/// An error a [`Dispatcher`](crate::Dispatcher) could not turn into a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dispatch failed: {message}")]
pub struct DispatchError {
    message: String,
}

impl DispatchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
