use std::{error::Error as StdError, fmt::Debug, path::PathBuf};

/// Errors returned by the telemetry client.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The client could not be configured.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The connection string could not be parsed.
    #[error("invalid connection string: {0}")]
    ConnectionString(#[from] crate::connection_string::ParseError),

    /// A `traceparent` or `Request-Id` header could not be parsed. Callers treat this as "no
    /// parent" and start a new operation.
    #[error("malformed correlation header {header:?}: {reason}")]
    MalformedHeader {
        /// Name of the offending header.
        header: &'static str,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A telemetry item failed to serialize to JSON. The item is dropped; the rest of its batch is
    /// still sent.
    ///
    /// Note: This is an error in this crate. If you spot this, please open an issue.
    #[error("serializing upload request failed with {0}")]
    UploadSerializeRequest(serde_json::Error),

    /// The request body failed to compress.
    ///
    /// Note: This is an error in this crate. If you spot this, please open an issue.
    #[error("compressing upload request failed with {0}")]
    UploadCompressRequest(std::io::Error),

    /// The ingestion response failed to deserialize from JSON.
    ///
    /// Telemetry reporting may have worked. But since we could not look into the response, we
    /// can't be sure.
    #[error("deserializing upload response failed with {0}")]
    UploadDeserializeResponse(serde_json::Error),

    /// Could not complete the HTTP request to the ingestion endpoint.
    #[error("sending upload request failed with {0}")]
    UploadConnection(Box<dyn StdError + Send + Sync + 'static>),

    /// The ingestion endpoint rejected the request.
    #[error("upload failed with status {status_code} (retry possible: {can_retry})")]
    Upload {
        /// HTTP status code of the response.
        status_code: u16,
        /// Whether the same payload may be sent again.
        can_retry: bool,
    },

    /// Reading or writing the on-disk spool failed.
    #[error("spool {path:?} failed with {source}")]
    Spool {
        /// The spool file or directory.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The channel was closed and no longer accepts telemetry.
    #[error("telemetry channel is closed")]
    ChannelClosed,

    /// The client has to be created from within a Tokio runtime.
    #[error("no Tokio runtime available to run the telemetry channel")]
    NoRuntime,
}
