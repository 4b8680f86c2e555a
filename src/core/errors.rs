//! Error types for the compset-rs library.
//!
//! Errors are split along the pipeline: the synchronous stages raise
//! terminal errors ([`CompsetError::InputData`], [`CompsetError::Projection`])
//! or errors that the clustering fallback chain absorbs
//! ([`CompsetError::DistanceMatrix`], [`CompsetError::Clustering`]). The two
//! async stages raise service errors that are always recovered from.

use std::io;
use std::num::ParseFloatError;

use thiserror::Error;

/// Main result type for compset operations.
pub type Result<T> = std::result::Result<T, CompsetError>;

/// Error type for all compset operations.
#[derive(Error, Debug)]
pub enum CompsetError {
    /// Unusable rows or columns in the input table
    #[error("Input data error: {message}")]
    InputData {
        /// Error description
        message: String,
        /// Column that caused the error (if any)
        column: Option<String>,
    },

    /// Distance matrix could not be built or is degenerate
    #[error("Distance matrix error: {message}")]
    DistanceMatrix {
        /// Error description
        message: String,
    },

    /// A clustering method failed
    #[error("Clustering error ({method}): {message}")]
    Clustering {
        /// Method that failed
        method: String,
        /// Error description
        message: String,
    },

    /// The 2D projection could not be computed
    #[error("Projection error: {message}")]
    Projection {
        /// Error description
        message: String,
        /// Additional context
        context: Option<String>,
    },

    /// The cluster naming service call failed
    #[error("Naming service error: {message}")]
    NamingService {
        /// Error description
        message: String,
    },

    /// The report service call failed
    #[error("Report service error: {message}")]
    ReportService {
        /// Error description
        message: String,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        /// Error description
        message: String,
        /// Configuration field that caused the error
        field: Option<String>,
    },

    /// Validation errors for input values
    #[error("Validation error: {message}")]
    Validation {
        /// Error description
        message: String,
        /// Field or input that failed validation
        field: Option<String>,
    },

    /// I/O related errors
    #[error("I/O error: {message}")]
    Io {
        /// Human-readable error message
        message: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error description
        message: String,
        /// Data type being serialized
        data_type: Option<String>,
        /// Underlying serialization error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal {
        /// Error description
        message: String,
        /// Additional context
        context: Option<String>,
    },
}

/// Coarse classification used when surfacing errors as status strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Terminal for the synchronous pipeline
    Terminal,
    /// Absorbed by a fallback chain
    Absorbed,
    /// Recovered with default output
    Recovered,
    /// Setup or environment problem
    Setup,
}

impl CompsetError {
    /// Create a new input data error
    pub fn input_data(message: impl Into<String>) -> Self {
        Self::InputData {
            message: message.into(),
            column: None,
        }
    }

    /// Create a new input data error naming the offending column
    pub fn input_data_column(message: impl Into<String>, column: impl Into<String>) -> Self {
        Self::InputData {
            message: message.into(),
            column: Some(column.into()),
        }
    }

    /// Create a new distance matrix error
    pub fn distance_matrix(message: impl Into<String>) -> Self {
        Self::DistanceMatrix {
            message: message.into(),
        }
    }

    /// Create a new clustering error
    pub fn clustering(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Clustering {
            method: method.into(),
            message: message.into(),
        }
    }

    /// Create a new projection error
    pub fn projection(message: impl Into<String>) -> Self {
        Self::Projection {
            message: message.into(),
            context: None,
        }
    }

    /// Create a new naming service error
    pub fn naming_service(message: impl Into<String>) -> Self {
        Self::NamingService {
            message: message.into(),
        }
    }

    /// Create a new report service error
    pub fn report_service(message: impl Into<String>) -> Self {
        Self::ReportService {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new configuration error with field context
    pub fn config_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new I/O error with context
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            context: None,
        }
    }

    /// Add context to an existing error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        match &mut self {
            Self::Projection { context: ctx, .. } | Self::Internal { context: ctx, .. } => {
                *ctx = Some(context.into());
            }
            _ => {}
        }
        self
    }

    /// How the pipeline treats this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InputData { .. } | Self::Projection { .. } => ErrorKind::Terminal,
            Self::DistanceMatrix { .. } | Self::Clustering { .. } => ErrorKind::Absorbed,
            Self::NamingService { .. } | Self::ReportService { .. } => ErrorKind::Recovered,
            Self::Config { .. }
            | Self::Validation { .. }
            | Self::Io { .. }
            | Self::Serialization { .. }
            | Self::Internal { .. } => ErrorKind::Setup,
        }
    }

    /// User-visible status string for a failed pipeline run.
    pub fn status_message(&self) -> String {
        match self {
            Self::Projection { .. } => "error: no analysis available".to_string(),
            other => format!("error: {other}"),
        }
    }
}

impl From<io::Error> for CompsetError {
    fn from(err: io::Error) -> Self {
        Self::io("I/O operation failed", err)
    }
}

impl From<serde_json::Error> for CompsetError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: format!("JSON serialization failed: {err}"),
            data_type: Some("JSON".to_string()),
            source: Some(Box::new(err)),
        }
    }
}

impl From<serde_yaml::Error> for CompsetError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization {
            message: format!("YAML serialization failed: {err}"),
            data_type: Some("YAML".to_string()),
            source: Some(Box::new(err)),
        }
    }
}

impl From<ParseFloatError> for CompsetError {
    fn from(err: ParseFloatError) -> Self {
        Self::validation(format!("Invalid float: {err}"))
    }
}

/// Result extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;

    /// Add static context to an error result
    fn context(self, msg: &'static str) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<CompsetError>,
{
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }

    fn context(self, msg: &'static str) -> Result<T> {
        self.map_err(|e| e.into().with_context(msg))
    }
}
