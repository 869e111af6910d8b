//! Error types for sqlreq

use thiserror::Error;

/// Result type alias for sqlreq operations
pub type RequestResult<T> = Result<T, RequestError>;

/// Error types for SQL request validation, execution and view materialization
#[derive(Debug, Error)]
pub enum RequestError {
    /// Database connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Driver-level error without a server message (closed connection, protocol error)
    #[error("Query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// Error reported by the database server
    #[error("Database error: {0}")]
    Database(String),

    /// The query contains a blacklisted keyword
    #[error("The query is not allowed because it contains unsafe word '{0}'")]
    ProhibitedWord(String),

    /// The query failed while being probed
    #[error("The SQL query is not valid:\n\n {message}")]
    InvalidQuery { query: String, message: String },

    /// Creating the database view failed
    #[error("SQL Error while creating {kind} VIEW {view_name} :\n {message}")]
    ViewCreation {
        kind: &'static str,
        view_name: String,
        message: String,
    },

    /// The probe produced no user-facing column
    #[error("No Column was found.\nColumns name should be prefixed by 'x_'.")]
    NoColumnFound,

    /// Execution requested on a request that was never validated
    #[error("It is not allowed to execute a not checked request.")]
    NotChecked,

    /// Unknown execution mode name
    #[error("Unimplemented mode : '{0}'")]
    UnknownMode(String),

    /// The server is too old for materialized views
    #[error(
        "Materialized View requires PostgreSQL 9.3 or greater but PostgreSQL {0} is currently installed."
    )]
    MaterializedViewUnsupported(String),

    /// Operation not permitted in the current state
    #[error("Invalid state: {0}")]
    State(String),

    /// Input rejected before any side effect
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure reported by an external collaborator (schema, scheduler, UI)
    #[error("Backend error: {0}")]
    Backend(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl RequestError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a state (precondition) error
    pub fn state(message: impl Into<String>) -> Self {
        Self::State(message.into())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a backend error
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Input was rejected before anything was executed.
    pub fn is_input_rejection(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::ProhibitedWord(_))
    }

    /// The operation was refused because a precondition did not hold.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::NotChecked
                | Self::UnknownMode(_)
                | Self::MaterializedViewUnsupported(_)
                | Self::State(_)
        )
    }

    /// Message of the underlying database failure, if this error carries one.
    pub fn database_message(&self) -> Option<&str> {
        match self {
            Self::Database(message) => Some(message),
            Self::InvalidQuery { message, .. } => Some(message),
            Self::ViewCreation { message, .. } => Some(message),
            _ => None,
        }
    }

    /// Parse a tokio_postgres error into a more specific RequestError
    pub fn from_db_error(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            return Self::Database(db_err.message().to_string());
        }
        Self::Query(err)
    }
}

impl From<serde_json::Error> for RequestError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for RequestError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}
