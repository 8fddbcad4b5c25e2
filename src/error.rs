//! Error taxonomy for the backup manager core.

use thiserror::Error;

/// Top level error for pipeline, storage and config operations.
#[derive(Error, Debug)]
pub enum DbManagerError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("in use: {0}")]
    InUse(String),

    #[error("integrity failure: {0}")]
    IntegrityFailure(String),

    #[error("tool '{tool}' failed: {stderr}")]
    ToolFailure { tool: String, stderr: String },

    #[error("remote storage failure: {0}")]
    RemoteFailure(#[from] StorageError),

    #[error("critical: {0}")]
    Critical(String),

    #[error("encryption error: {0}")]
    Encryption(#[from] CryptoError),

    #[error("compression error: {0}")]
    Compression(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DbManagerError>;

/// Storage backend specific errors (S3 and SMB providers).
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("{0}")]
    Other(String),
}

/// Result alias for storage backend operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Cryptography related errors (checksum, AEAD, KDF).
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("decryption failed: authentication tag mismatch")]
    DecryptionFailed,

    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),
}

/// Result alias for cryptographic operations.
pub type CryptoResult<T> = std::result::Result<T, CryptoError>;
