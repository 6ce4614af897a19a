//! The error taxonomy shared by every crate in this workspace.

use thiserror::Error;

use crate::canonical_json::CanonicalJsonError;

/// Errors raised while hashing, signing, verifying, or persisting an event.
///
/// `NotFound` is deliberately absent: operations that may legitimately find
/// nothing return `Option`/empty collections rather than an error variant.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The requested hash algorithm is absent from the event's `hashes` map.
    #[error("hash algorithm {algorithm:?} not present in event.hashes")]
    BadHash {
        /// The algorithm that was looked up.
        algorithm: String,
    },

    /// A recorded digest or signature was not valid base64.
    #[error("invalid base64: {0}")]
    BadBase64(#[from] base64::DecodeError),

    /// The computed digest did not match the digest recorded on the event.
    #[error("content hash mismatch for algorithm {algorithm:?}")]
    HashMismatch {
        /// The algorithm whose digest did not match.
        algorithm: String,
    },

    /// Signature verification failed for the given key.
    #[error("signature verification failed for key {key_id:?}")]
    SignatureMismatch {
        /// The signing key identifier that failed to verify.
        key_id: String,
    },

    /// No signing key was available for the given server and algorithm.
    #[error("no signing key available for server {server_name:?}")]
    NoSigningKey {
        /// The server whose signing key was requested.
        server_name: String,
    },

    /// A canonical-JSON conversion failed.
    #[error("canonical JSON error: {0}")]
    Canonical(#[from] CanonicalJsonError),

    /// A `serde_json` (de)serialization failed outside of canonicalization.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias for this workspace's fallible operations.
pub type Result<T> = std::result::Result<T, Error>;
