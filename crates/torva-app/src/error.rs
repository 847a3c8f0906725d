//! Application-shell error type; everything here is a fatal init failure.

use thiserror::Error;

/// Result alias for the application shell.
pub type AppResult<T> = Result<T, AppError>;

/// Fatal initialisation failures; each one exits the process non-zero.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required environment variable is unset.
    #[error("required environment variable {name} is not set")]
    MissingEnv {
        /// Variable name.
        name: &'static str,
    },

    /// An environment variable could not be parsed.
    #[error("environment variable {name} has invalid value '{value}'")]
    InvalidConfig {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
    },

    /// The database stayed unreachable through every connection attempt.
    #[error("database unreachable after {attempts} attempts")]
    DatabaseUnreachable {
        /// How many connection attempts were made.
        attempts: u32,
        /// Last underlying error.
        #[source]
        source: torva_data::DataError,
    },

    /// Migrations failed.
    #[error("database migration failed")]
    MigrationFailed {
        /// Underlying error.
        #[source]
        source: torva_data::DataError,
    },

    /// The swarm engine could not be constructed.
    #[error("failed to initialise swarm engine")]
    EngineInit {
        /// Underlying error.
        #[source]
        source: anyhow::Error,
    },

    /// The HTTP server failed to bind or crashed.
    #[error("api server failed")]
    ApiServer {
        /// Underlying error.
        #[source]
        source: anyhow::Error,
    },
}
