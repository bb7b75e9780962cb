use mongodb::error::Error as MongoError;
use thiserror::Error;

/// Result alias for the MongoDB backend.
pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// Failures raised while talking to MongoDB.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    /// Required environment variable is missing.
    #[error("missing MongoDB environment variable `{var}`")]
    MissingEnvVar {
        /// Name of the variable.
        var: &'static str,
    },
    /// Connection string could not be parsed.
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        /// Offending URI.
        uri: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Client construction failed.
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Server never answered the initial ping.
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        /// Attempts made.
        attempts: u32,
        /// Last driver error.
        #[source]
        source: MongoError,
    },
    /// Periodic ping failed.
    #[error("MongoDB ping health check failed")]
    HealthPing {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Reading from a collection failed.
    #[error("failed to read from collection `{collection}`")]
    Read {
        /// Collection name.
        collection: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Writing a document failed.
    #[error("failed to write `{collection}/{id}`")]
    Write {
        /// Collection name.
        collection: String,
        /// Document id.
        id: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Starting, committing or aborting a multi-document transaction failed.
    #[error("MongoDB transaction failed")]
    Transaction {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Opening or reading a change stream failed.
    #[error("change stream on `{collection}` failed")]
    Watch {
        /// Collection name.
        collection: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
}
