//! Error types for the rootline toolkit

use thiserror::Error;

/// Result type alias using CeremonyError
pub type Result<T> = std::result::Result<T, CeremonyError>;

/// Errors that can occur while running a ceremony or verifying its output
#[derive(Error, Debug)]
pub enum CeremonyError {
    /// A signing-key directory is malformed: non-numeric name, broken
    /// attestation chain, or serial mismatch
    #[error("invalid key directory {path}: {reason}")]
    InvalidKeyDirectory { path: String, reason: String },

    /// A signer produced a public key that is not ECDSA P-256
    #[error("unsupported key type: {0}")]
    UnsupportedKey(String),

    /// A named role document is absent from the store
    #[error("missing metadata {0}")]
    MissingMetadata(String),

    /// Root or targets lacks the placeholder signature slots installed at init
    #[error("signature pre-entries not defined in {0}")]
    MissingPreEntries(String),

    /// The signer's key IDs do not intersect the role's authorized set
    #[error("key IDs {key_ids:?} are not authorized to sign role {role}")]
    NotAnAuthorizedSigner { role: String, key_ids: Vec<String> },

    /// Verification found fewer valid signatures than the role's threshold
    #[error("role {role} has {valid}/{threshold} valid signatures")]
    ThresholdNotMet {
        role: String,
        valid: usize,
        threshold: usize,
    },

    /// Proof-of-possession resolution failed: no such delegation
    #[error("unknown delegation {0}")]
    UnknownDelegation(String),

    /// Proof-of-possession resolution failed: no such key
    #[error("unknown key {0}")]
    UnknownKey(String),

    /// A lower-level role was processed before a higher role was signed
    #[error("signing pre-requisites failed for {role}: {source}")]
    PreRequisiteFailed {
        role: String,
        #[source]
        source: Box<CeremonyError>,
    },

    /// Rotation requested against a repository with no prior root
    #[error("no previous root")]
    NoPreviousRoot,

    /// A signer reference could not be resolved by any stage
    #[error("unable to resolve signer {key_ref}: not a PEM key file ({pem_error}); not a KMS reference ({kms_error})")]
    SignerResolution {
        key_ref: String,
        pem_error: String,
        kms_error: String,
    },

    /// Threshold exceeds the number of keys on the role
    #[error("threshold {threshold} exceeds {count} key(s) on role {role}")]
    InvalidThreshold {
        role: String,
        threshold: usize,
        count: usize,
    },

    /// Signature bytes failed cryptographic verification
    #[error("signature verification failed: {0}")]
    SignatureInvalid(String),

    /// A manifest's recorded hashes do not match its current bytes
    #[error("hash mismatch for {0}")]
    HashMismatch(String),

    /// Version bumps apply to delegated roles only
    #[error("unsupported version bump for top-level role {0}")]
    UnsupportedVersionBump(String),

    /// Cryptographic operation failed
    #[error("cryptographic error: {0}")]
    Crypto(String),

    /// Target-metadata configuration could not be parsed
    #[error("target configuration error: {0}")]
    Config(String),

    /// Remote repository or KMS endpoint error
    #[error("remote error: {0}")]
    Remote(String),

    /// Metadata serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Underlying I/O error
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for CeremonyError {
    fn from(err: serde_json::Error) -> Self {
        CeremonyError::Serialization(err.to_string())
    }
}

impl From<p256::ecdsa::Error> for CeremonyError {
    fn from(err: p256::ecdsa::Error) -> Self {
        CeremonyError::Crypto(err.to_string())
    }
}

impl From<hex::FromHexError> for CeremonyError {
    fn from(err: hex::FromHexError) -> Self {
        CeremonyError::Serialization(format!("invalid hex: {err}"))
    }
}

impl From<base64::DecodeError> for CeremonyError {
    fn from(err: base64::DecodeError) -> Self {
        CeremonyError::Serialization(format!("invalid base64: {err}"))
    }
}
