//! `layerpull_core::error` is a module containing error utilities for the layerpull project.

use std::{
    error::Error,
    fmt::{self, Display},
};

use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a layerpull-related operation.
pub type LayerpullResult<T> = Result<T, LayerpullError>;

/// An error that occurred while pulling or materializing an image.
#[derive(pretty_error_debug::Debug, Error)]
pub enum LayerpullError {
    /// A caller-supplied URL, name, tag or local alias failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A pull was started while another one was already running on the same engine.
    #[error("a pull is already in progress")]
    Busy,

    /// The remote side violated the wire protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The ancestry chain exceeds the supported layer count.
    #[error("ancestry of {count} layers exceeds the supported layer count")]
    TooManyLayers {
        /// Number of layers the remote reported.
        count: usize,
    },

    /// The remote side answered with a non-success HTTP status.
    #[error("registry returned status {status} for {url}")]
    Registry {
        /// The HTTP status code of the response.
        status: reqwest::StatusCode,
        /// The request URL.
        url: String,
    },

    /// An error raised by the HTTP client middleware stack.
    #[error("transport error: {0}")]
    Middleware(#[from] reqwest_middleware::Error),

    /// An error raised by the HTTP client while streaming a response.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// An error that occurred when performing an IO operation
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    /// The archive extractor child failed.
    #[error("layer extractor failed: {0}")]
    Extractor(String),

    /// The requested local alias already exists and `force_local` was not set.
    #[error("local image {0} already exists")]
    LocalExists(String),

    /// An error that occurred in the utilities layer.
    #[error(transparent)]
    Utils(#[from] layerpull_utils::LayerpullUtilsError),

    /// Custom error.
    #[error("Custom error: {0}")]
    Custom(#[from] AnyError),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LayerpullError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> LayerpullError {
        LayerpullError::Custom(AnyError {
            error: error.into(),
        })
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `LayerpullResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> LayerpullResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}
