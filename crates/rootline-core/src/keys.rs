//! TUF key documents and key IDs
//!
//! ECDSA P-256 public keys appear on the wire in two formats: the legacy
//! form carries the hex of the uncompressed SEC1 point under keytype
//! `ecdsa-sha2-nistp256`, the current form carries a PEM PKIX document
//! under keytype `ecdsa`. The same EC point therefore derives two distinct
//! key IDs, and both may be live on a repository during a format migration.

use crate::canonical::to_canonical_json;
use crate::error::{CeremonyError, Result};
use p256::ecdsa::VerifyingKey;
use p256::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Keytype for the current PEM PKIX format
pub const KEY_TYPE_ECDSA: &str = "ecdsa";

/// Keytype for the legacy hex-marshalled format
pub const KEY_TYPE_ECDSA_LEGACY: &str = "ecdsa-sha2-nistp256";

/// The single signing scheme supported for ceremony roles
pub const KEY_SCHEME_ECDSA_P256: &str = "ecdsa-sha2-nistp256";

/// Hash algorithms advertised in every key document
pub const KEY_ID_HASH_ALGORITHMS: [&str; 2] = ["sha256", "sha512"];

/// On-wire encoding of an ECDSA P-256 public key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFormat {
    /// Hex of the uncompressed SEC1 point (deprecated, kept for verifiers
    /// that predate the PEM migration)
    Legacy,
    /// PEM-encoded PKIX document
    Pem,
}

/// The `keyval` block of a key document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub public: String,
}

/// A TUF public-key document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDoc {
    pub keytype: String,
    pub scheme: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyid_hash_algorithms: Option<Vec<String>>,
    pub keyval: KeyValue,
}

impl KeyDoc {
    /// Build a key document for `key` in the requested on-wire format.
    pub fn from_verifying_key(key: &VerifyingKey, format: KeyFormat) -> Result<Self> {
        let (keytype, public) = match format {
            KeyFormat::Legacy => {
                let point = key.to_encoded_point(false);
                (KEY_TYPE_ECDSA_LEGACY, hex::encode(point.as_bytes()))
            }
            KeyFormat::Pem => {
                let pem = key
                    .to_public_key_pem(LineEnding::LF)
                    .map_err(|e| CeremonyError::Crypto(e.to_string()))?;
                (KEY_TYPE_ECDSA, pem)
            }
        };
        Ok(Self {
            keytype: keytype.to_string(),
            scheme: KEY_SCHEME_ECDSA_P256.to_string(),
            keyid_hash_algorithms: Some(
                KEY_ID_HASH_ALGORITHMS.iter().map(|s| s.to_string()).collect(),
            ),
            keyval: KeyValue { public },
        })
    }

    /// Derive the key ID: SHA-256 over the canonical form of the document.
    pub fn key_id(&self) -> Result<String> {
        let canonical = to_canonical_json(self)?;
        Ok(hex::encode(Sha256::digest(&canonical)))
    }

    /// Recover the ECDSA verifying key from either on-wire format.
    pub fn verifying_key(&self) -> Result<VerifyingKey> {
        match self.keytype.as_str() {
            KEY_TYPE_ECDSA_LEGACY => {
                let point = hex::decode(self.keyval.public.trim())?;
                VerifyingKey::from_sec1_bytes(&point)
                    .map_err(|e| CeremonyError::Crypto(format!("invalid EC point: {e}")))
            }
            KEY_TYPE_ECDSA => {
                // PEM that has been through JSON tooling sometimes arrives
                // with literal backslash-n sequences.
                let pem = self.keyval.public.replace("\\n", "\n");
                VerifyingKey::from_public_key_pem(pem.trim())
                    .map_err(|e| CeremonyError::Crypto(format!("invalid PKIX key: {e}")))
            }
            other => Err(CeremonyError::UnsupportedKey(other.to_string())),
        }
    }

    /// The format this document was emitted in.
    pub fn format(&self) -> Result<KeyFormat> {
        match self.keytype.as_str() {
            KEY_TYPE_ECDSA_LEGACY => Ok(KeyFormat::Legacy),
            KEY_TYPE_ECDSA => Ok(KeyFormat::Pem),
            other => Err(CeremonyError::UnsupportedKey(other.to_string())),
        }
    }
}

/// Parse an ECDSA P-256 public key from PEM PKIX bytes.
pub fn public_key_from_pem(pem: &str) -> Result<VerifyingKey> {
    VerifyingKey::from_public_key_pem(pem.trim())
        .map_err(|e| CeremonyError::UnsupportedKey(format!("expected ECDSA P-256 PKIX key: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::SigningKey;
    use rand::rngs::OsRng;

    #[test]
    fn test_formats_yield_distinct_key_ids() {
        let key = SigningKey::random(&mut OsRng);
        let vk = key.verifying_key();

        let legacy = KeyDoc::from_verifying_key(vk, KeyFormat::Legacy).unwrap();
        let pem = KeyDoc::from_verifying_key(vk, KeyFormat::Pem).unwrap();

        assert_ne!(legacy.key_id().unwrap(), pem.key_id().unwrap());
        assert_eq!(legacy.keytype, KEY_TYPE_ECDSA_LEGACY);
        assert_eq!(pem.keytype, KEY_TYPE_ECDSA);
    }

    #[test]
    fn test_both_formats_recover_the_same_point() {
        let key = SigningKey::random(&mut OsRng);
        let vk = key.verifying_key();

        for format in [KeyFormat::Legacy, KeyFormat::Pem] {
            let doc = KeyDoc::from_verifying_key(vk, format).unwrap();
            assert_eq!(&doc.verifying_key().unwrap(), vk);
        }
    }

    #[test]
    fn test_key_id_is_stable() {
        let key = SigningKey::random(&mut OsRng);
        let doc = KeyDoc::from_verifying_key(key.verifying_key(), KeyFormat::Pem).unwrap();
        assert_eq!(doc.key_id().unwrap(), doc.key_id().unwrap());
        assert_eq!(doc.key_id().unwrap().len(), 64);
    }

    #[test]
    fn test_unknown_keytype_is_unsupported() {
        let doc = KeyDoc {
            keytype: "ed25519".into(),
            scheme: "ed25519".into(),
            keyid_hash_algorithms: None,
            keyval: KeyValue {
                public: "deadbeef".into(),
            },
        };
        assert!(matches!(
            doc.verifying_key(),
            Err(CeremonyError::UnsupportedKey(_))
        ));
    }

    #[test]
    fn test_escaped_pem_newlines_are_tolerated() {
        let key = SigningKey::random(&mut OsRng);
        let mut doc = KeyDoc::from_verifying_key(key.verifying_key(), KeyFormat::Pem).unwrap();
        doc.keyval.public = doc.keyval.public.replace('\n', "\\n");
        assert!(doc.verifying_key().is_ok());
    }
}
