//! Signer abstraction
//!
//! Every signing backend — an on-disk PEM key, a KMS-hosted key, a hardware
//! token — satisfies the same narrow contract: produce an ASN.1 DER ECDSA
//! signature over a message, and expose the P-256 public key so the caller
//! can derive TUF key documents for it.

use crate::error::{CeremonyError, Result};
use crate::keys::{KeyDoc, KeyFormat};
use crate::kms::KmsSigner;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{DerSignature, SigningKey, VerifyingKey};
use p256::pkcs8::DecodePrivateKey;
use std::path::Path;

/// A signing capability over ECDSA P-256.
///
/// `sign` may block: hardware tokens wait for PIN entry and KMS calls wait
/// on the network. There is no cancellation; an interrupt terminates the
/// process.
pub trait KeySigner: std::fmt::Debug {
    /// Sign `message`, returning an ASN.1 DER encoded signature.
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;

    /// The signer's public key.
    fn public_key(&self) -> VerifyingKey;

    /// The TUF key document for this signer in the requested format.
    fn key_doc(&self, format: KeyFormat) -> Result<KeyDoc> {
        KeyDoc::from_verifying_key(&self.public_key(), format)
    }
}

/// Verify a DER signature over `message` under `key`.
pub fn verify_signature(key: &VerifyingKey, message: &[u8], sig: &[u8]) -> Result<()> {
    let sig = DerSignature::from_bytes(sig)
        .map_err(|e| CeremonyError::SignatureInvalid(format!("malformed signature: {e}")))?;
    key.verify(message, &sig)
        .map_err(|e| CeremonyError::SignatureInvalid(e.to_string()))
}

/// An ECDSA P-256 signer backed by a PEM private key on disk
#[derive(Debug)]
pub struct PemSigner {
    key: SigningKey,
}

impl PemSigner {
    /// Load a signer from PKCS#8 or SEC1 PEM bytes.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key = SigningKey::from_pkcs8_pem(pem).or_else(|pkcs8_err| {
            p256::SecretKey::from_sec1_pem(pem)
                .map(SigningKey::from)
                .map_err(|sec1_err| {
                    CeremonyError::Crypto(format!(
                        "not a PKCS#8 ({pkcs8_err}) or SEC1 ({sec1_err}) P-256 key"
                    ))
                })
        })?;
        Ok(Self { key })
    }

    /// Load a signer from a PEM file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let pem = std::fs::read_to_string(path)?;
        Self::from_pem(&pem)
    }

    /// Wrap an in-memory signing key.
    pub fn from_signing_key(key: SigningKey) -> Self {
        Self { key }
    }
}

impl KeySigner for PemSigner {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let sig: DerSignature = self.key.sign(message);
        Ok(sig.as_bytes().to_vec())
    }

    fn public_key(&self) -> VerifyingKey {
        *self.key.verifying_key()
    }
}

/// Resolve a signer from `(use_hardware, key_ref)`.
///
/// With `use_hardware` the locally attached PIV token is used. Otherwise
/// `key_ref` is tried as a PEM key file first, then as a KMS reference;
/// when both stages fail the error reports each stage's cause.
pub fn resolve_signer(use_hardware: bool, key_ref: &str) -> Result<Box<dyn KeySigner>> {
    if use_hardware {
        return resolve_hardware_signer();
    }
    match PemSigner::from_file(key_ref) {
        Ok(signer) => Ok(Box::new(signer)),
        Err(pem_error) => match KmsSigner::open(key_ref) {
            Ok(signer) => Ok(Box::new(signer)),
            Err(kms_error) => Err(CeremonyError::SignerResolution {
                key_ref: key_ref.to_string(),
                pem_error: pem_error.to_string(),
                kms_error: kms_error.to_string(),
            }),
        },
    }
}

#[cfg(feature = "pivkey")]
fn resolve_hardware_signer() -> Result<Box<dyn KeySigner>> {
    Ok(Box::new(crate::piv::PivSigner::open()?))
}

#[cfg(not(feature = "pivkey"))]
fn resolve_hardware_signer() -> Result<Box<dyn KeySigner>> {
    Err(CeremonyError::Crypto(
        "hardware signing requires the pivkey feature".to_string(),
    ))
}

/// Load a verifier from a PEM public-key file.
pub fn resolve_verifier(key_ref: &str) -> Result<VerifyingKey> {
    let pem = std::fs::read_to_string(key_ref)?;
    crate::keys::public_key_from_pem(&pem)
}
