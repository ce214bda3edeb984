//! # Rootline Core
//!
//! Metadata model and signing primitives for the rootline key-ceremony
//! toolkit. A ceremony repository carries four top-level TUF roles plus
//! delegated targets; offline key-holders sign root and targets across a
//! multi-party session while online keys sign snapshot and timestamp.
//!
//! ## Key concepts
//!
//! - **Signed document**: a raw `signed` payload plus a signature list;
//!   placeholder entries reserve slots for offline signers
//! - **Key document**: an ECDSA P-256 public key in one of two on-wire
//!   formats, each deriving its own key ID
//! - **Signer**: a uniform sign/verify contract over PEM files, KMS-hosted
//!   keys, and PIV hardware tokens
//! - **PAE**: the length-prefixed encoding used for key proof-of-possession

pub mod canonical;
pub mod error;
pub mod keys;
pub mod kms;
pub mod metadata;
pub mod pae;
#[cfg(feature = "pivkey")]
pub mod piv;
pub mod signer;

pub use canonical::{to_canonical_json, to_pretty_json};
pub use error::{CeremonyError, Result};
pub use keys::{KeyDoc, KeyFormat};
pub use metadata::{
    with_placeholders, DelegatedRole, Delegations, ManifestMeta, Root, RoleKeys, Signature,
    SignedDocument, Snapshot, TargetFile, Targets, Timestamp, TopRole,
};
pub use signer::{resolve_signer, resolve_verifier, KeySigner, PemSigner};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
