//! Error types shared by the CouchDB storage implementation.

use reqwest::StatusCode;
use thiserror::Error;

/// Convenient result alias returning [`CouchDaoError`] failures.
pub type CouchResult<T> = Result<T, CouchDaoError>;

/// Failures that can occur while interacting with CouchDB.
#[derive(Debug, Error)]
pub enum CouchDaoError {
    /// Required environment variable is missing.
    #[error("missing CouchDB environment variable `{var}`")]
    MissingEnvVar {
        /// Name of the variable.
        var: &'static str,
    },
    /// Building the HTTP client failed (invalid TLS setup, etc).
    #[error("failed to build CouchDB client")]
    ClientBuilder {
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
    /// CouchDB rejected a GET against the target database.
    #[error("failed to query CouchDB database `{database}`")]
    DatabaseQuery {
        /// Database name.
        database: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
    /// CouchDB rejected a database creation request.
    #[error("failed to create CouchDB database `{database}`")]
    DatabaseCreate {
        /// Database name.
        database: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
    /// CouchDB returned an unexpected status code for a database operation.
    #[error("unexpected CouchDB database response status {status} for `{database}`")]
    DatabaseStatus {
        /// Database name.
        database: String,
        /// Returned status.
        status: StatusCode,
    },
    /// A request could not be sent.
    #[error("failed to send CouchDB request to `{path}`")]
    RequestSend {
        /// Database-relative path.
        path: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
    /// CouchDB returned an unexpected status code.
    #[error("unexpected CouchDB response status {status} for `{path}`")]
    RequestStatus {
        /// Database-relative path.
        path: String,
        /// Returned status.
        status: StatusCode,
    },
    /// Response payload could not be parsed into JSON.
    #[error("failed to decode CouchDB response for `{path}`")]
    DecodeResponse {
        /// Database-relative path.
        path: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
    /// A document kept conflicting with concurrent writers.
    #[error("CouchDB document `{doc_id}` kept conflicting after {attempts} attempts")]
    Conflict {
        /// Raw CouchDB `_id`.
        doc_id: String,
        /// Attempts made before giving up.
        attempts: u32,
    },
    /// A bulk write reported per-document failures.
    #[error("CouchDB bulk write rejected `{doc_id}`: {reason}")]
    BulkRejected {
        /// Raw CouchDB `_id`.
        doc_id: String,
        /// Error and reason reported by CouchDB.
        reason: String,
    },
}

impl CouchDaoError {
    pub(crate) fn is_conflict(&self) -> bool {
        matches!(
            self,
            CouchDaoError::Conflict { .. }
                | CouchDaoError::RequestStatus {
                    status: StatusCode::CONFLICT,
                    ..
                }
        )
    }
}
